use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use wms_core::{Aggregate, AggregateRoot, DocumentId, DomainError, UserId, WarehouseId};
use wms_events::Event;

use crate::error::StockError;
use crate::line::{DocumentLine, LineSpec};
use crate::resolver::{self, LineMovement, Resolution};
use crate::stock::StockDelta;

/// Kind of stock movement a document describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Receipt,
    Issue,
    Transfer,
    Adjustment,
}

/// Document lifecycle. `Cancelled` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Draft,
    Confirmed,
    Cancelled,
}

/// Aggregate root: a movement document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    id: DocumentId,
    warehouse_id: Option<WarehouseId>,
    doc_type: DocumentType,
    status: DocumentStatus,
    created_by: Option<UserId>,
    reference: Option<String>,
    notes: Option<String>,
    lines: Vec<DocumentLine>,
    applied: Vec<StockDelta>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    confirmed_at: Option<DateTime<Utc>>,
    confirmed_by: Option<UserId>,
    cancelled_at: Option<DateTime<Utc>>,
    cancelled_by: Option<UserId>,
    cancel_reason: Option<String>,
    version: u64,
    created: bool,
}

impl Document {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: DocumentId) -> Self {
        Self {
            id,
            warehouse_id: None,
            doc_type: DocumentType::Receipt,
            status: DocumentStatus::Draft,
            created_by: None,
            reference: None,
            notes: None,
            lines: Vec::new(),
            applied: Vec::new(),
            created_at: None,
            updated_at: None,
            confirmed_at: None,
            confirmed_by: None,
            cancelled_at: None,
            cancelled_by: None,
            cancel_reason: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> DocumentId {
        self.id
    }

    pub fn warehouse_id(&self) -> Option<WarehouseId> {
        self.warehouse_id
    }

    pub fn doc_type(&self) -> DocumentType {
        self.doc_type
    }

    pub fn status(&self) -> DocumentStatus {
        self.status
    }

    pub fn lines(&self) -> &[DocumentLine] {
        &self.lines
    }

    pub fn line(&self, line_no: u32) -> Option<&DocumentLine> {
        self.lines.iter().find(|l| l.line_no == line_no)
    }

    /// Net deltas committed to the ledger by confirmation (empty otherwise).
    pub fn applied(&self) -> &[StockDelta] {
        &self.applied
    }

    /// Exact inverse of the committed deltas, used to cancel a confirmed document.
    pub fn reversal(&self) -> Vec<StockDelta> {
        self.applied.iter().map(StockDelta::inverse).collect()
    }

    pub fn snapshot(&self) -> DocumentSnapshot {
        DocumentSnapshot {
            id: self.id,
            warehouse_id: self.warehouse_id,
            doc_type: self.doc_type,
            status: self.status,
            created_by: self.created_by,
            reference: self.reference.clone(),
            notes: self.notes.clone(),
            lines: self.lines.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            confirmed_at: self.confirmed_at,
            confirmed_by: self.confirmed_by,
            cancelled_at: self.cancelled_at,
            cancelled_by: self.cancelled_by,
            cancel_reason: self.cancel_reason.clone(),
            version: self.version,
        }
    }

    fn next_line_no(&self) -> u32 {
        self.lines.iter().map(|l| l.line_no).max().unwrap_or(0) + 1
    }
}

impl AggregateRoot for Document {
    type Id = DocumentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Read model of a document, produced for callers and audit snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub id: DocumentId,
    pub warehouse_id: Option<WarehouseId>,
    pub doc_type: DocumentType,
    pub status: DocumentStatus,
    pub created_by: Option<UserId>,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub lines: Vec<DocumentLine>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub confirmed_by: Option<UserId>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<UserId>,
    pub cancel_reason: Option<String>,
    pub version: u64,
}

/// Command: CreateDocument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateDocument {
    pub document_id: DocumentId,
    pub warehouse_id: WarehouseId,
    pub doc_type: DocumentType,
    pub created_by: UserId,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConfirmDocument.
///
/// Carries the resolution whose net deltas the ledger has just committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmDocument {
    pub actor: UserId,
    pub resolution: Resolution,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelDocument.
///
/// For confirmed documents `reversal` must be the committed compensation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelDocument {
    pub actor: UserId,
    pub reason: Option<String>,
    pub reversal: Vec<StockDelta>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentCommand {
    Create(CreateDocument),
    AddLine {
        actor: UserId,
        spec: LineSpec,
        occurred_at: DateTime<Utc>,
    },
    EditLine {
        actor: UserId,
        line_no: u32,
        spec: LineSpec,
        occurred_at: DateTime<Utc>,
    },
    RemoveLine {
        actor: UserId,
        line_no: u32,
        occurred_at: DateTime<Utc>,
    },
    Confirm(ConfirmDocument),
    Cancel(CancelDocument),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentCreated {
    pub document_id: DocumentId,
    pub warehouse_id: WarehouseId,
    pub doc_type: DocumentType,
    pub created_by: UserId,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAdded {
    pub document_id: DocumentId,
    pub actor: UserId,
    pub line_no: u32,
    pub spec: LineSpec,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineEdited {
    pub document_id: DocumentId,
    pub actor: UserId,
    pub line_no: u32,
    pub spec: LineSpec,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRemoved {
    pub document_id: DocumentId,
    pub actor: UserId,
    pub line_no: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentConfirmed {
    pub document_id: DocumentId,
    pub actor: UserId,
    pub lines: Vec<LineMovement>,
    pub net: Vec<StockDelta>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentCancelled {
    pub document_id: DocumentId,
    pub actor: UserId,
    pub previous_status: DocumentStatus,
    pub reason: Option<String>,
    pub reversal: Vec<StockDelta>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentEvent {
    DocumentCreated(DocumentCreated),
    LineAdded(LineAdded),
    LineEdited(LineEdited),
    LineRemoved(LineRemoved),
    DocumentConfirmed(DocumentConfirmed),
    DocumentCancelled(DocumentCancelled),
}

impl Event for DocumentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            DocumentEvent::DocumentCreated(_) => "inventory.document.created",
            DocumentEvent::LineAdded(_) => "inventory.document.line_added",
            DocumentEvent::LineEdited(_) => "inventory.document.line_edited",
            DocumentEvent::LineRemoved(_) => "inventory.document.line_removed",
            DocumentEvent::DocumentConfirmed(_) => "inventory.document.confirmed",
            DocumentEvent::DocumentCancelled(_) => "inventory.document.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            DocumentEvent::DocumentCreated(e) => e.occurred_at,
            DocumentEvent::LineAdded(e) => e.occurred_at,
            DocumentEvent::LineEdited(e) => e.occurred_at,
            DocumentEvent::LineRemoved(e) => e.occurred_at,
            DocumentEvent::DocumentConfirmed(e) => e.occurred_at,
            DocumentEvent::DocumentCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Document {
    type Command = DocumentCommand;
    type Event = DocumentEvent;
    type Error = StockError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            DocumentEvent::DocumentCreated(e) => {
                self.id = e.document_id;
                self.warehouse_id = Some(e.warehouse_id);
                self.doc_type = e.doc_type;
                self.status = DocumentStatus::Draft;
                self.created_by = Some(e.created_by);
                self.reference = e.reference.clone();
                self.notes = e.notes.clone();
                self.lines.clear();
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            DocumentEvent::LineAdded(e) => {
                self.lines.push(DocumentLine {
                    line_no: e.line_no,
                    spec: e.spec.clone(),
                    applied: Vec::new(),
                });
            }
            DocumentEvent::LineEdited(e) => {
                if let Some(line) = self.lines.iter_mut().find(|l| l.line_no == e.line_no) {
                    line.spec = e.spec.clone();
                }
            }
            DocumentEvent::LineRemoved(e) => {
                self.lines.retain(|l| l.line_no != e.line_no);
            }
            DocumentEvent::DocumentConfirmed(e) => {
                for movement in &e.lines {
                    if let Some(line) = self.lines.iter_mut().find(|l| l.line_no == movement.line_no) {
                        line.applied = movement.deltas.clone();
                    }
                }
                self.applied = e.net.clone();
                self.status = DocumentStatus::Confirmed;
                self.confirmed_at = Some(e.occurred_at);
                self.confirmed_by = Some(e.actor);
            }
            DocumentEvent::DocumentCancelled(e) => {
                self.status = DocumentStatus::Cancelled;
                self.cancelled_at = Some(e.occurred_at);
                self.cancelled_by = Some(e.actor);
                self.cancel_reason = e.reason.clone();
            }
        }

        self.updated_at = Some(event.occurred_at());
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            DocumentCommand::Create(cmd) => self.handle_create(cmd),
            DocumentCommand::AddLine {
                actor,
                spec,
                occurred_at,
            } => self.handle_add_line(*actor, spec, *occurred_at),
            DocumentCommand::EditLine {
                actor,
                line_no,
                spec,
                occurred_at,
            } => self.handle_edit_line(*actor, *line_no, spec, *occurred_at),
            DocumentCommand::RemoveLine {
                actor,
                line_no,
                occurred_at,
            } => self.handle_remove_line(*actor, *line_no, *occurred_at),
            DocumentCommand::Confirm(cmd) => self.handle_confirm(cmd),
            DocumentCommand::Cancel(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl Document {
    fn ensure_created(&self) -> Result<(), StockError> {
        if !self.created {
            return Err(StockError::not_found("document", self.id));
        }
        Ok(())
    }

    fn ensure_draft(&self, action: &'static str) -> Result<(), StockError> {
        self.ensure_created()?;
        if self.status != DocumentStatus::Draft {
            return Err(StockError::transition("document", self.status, action));
        }
        Ok(())
    }

    fn ensure_line(&self, line_no: u32) -> Result<(), StockError> {
        if self.line(line_no).is_none() {
            return Err(StockError::invalid_line(format!("line {line_no} does not exist")));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateDocument) -> Result<Vec<DocumentEvent>, StockError> {
        if self.created {
            return Err(DomainError::conflict("document already exists").into());
        }
        if cmd.document_id != self.id {
            return Err(DomainError::invariant("document_id mismatch").into());
        }

        Ok(vec![DocumentEvent::DocumentCreated(DocumentCreated {
            document_id: cmd.document_id,
            warehouse_id: cmd.warehouse_id,
            doc_type: cmd.doc_type,
            created_by: cmd.created_by,
            reference: cmd.reference.clone(),
            notes: cmd.notes.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_line(
        &self,
        actor: UserId,
        spec: &LineSpec,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<DocumentEvent>, StockError> {
        self.ensure_draft("add a line to")?;
        let line_no = self.next_line_no();
        resolver::line_deltas(self.doc_type, line_no, spec)?;

        Ok(vec![DocumentEvent::LineAdded(LineAdded {
            document_id: self.id,
            actor,
            line_no,
            spec: spec.clone(),
            occurred_at,
        })])
    }

    fn handle_edit_line(
        &self,
        actor: UserId,
        line_no: u32,
        spec: &LineSpec,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<DocumentEvent>, StockError> {
        self.ensure_draft("edit a line of")?;
        self.ensure_line(line_no)?;
        resolver::line_deltas(self.doc_type, line_no, spec)?;

        Ok(vec![DocumentEvent::LineEdited(LineEdited {
            document_id: self.id,
            actor,
            line_no,
            spec: spec.clone(),
            occurred_at,
        })])
    }

    fn handle_remove_line(
        &self,
        actor: UserId,
        line_no: u32,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<DocumentEvent>, StockError> {
        self.ensure_draft("remove a line from")?;
        self.ensure_line(line_no)?;

        Ok(vec![DocumentEvent::LineRemoved(LineRemoved {
            document_id: self.id,
            actor,
            line_no,
            occurred_at,
        })])
    }

    fn handle_confirm(&self, cmd: &ConfirmDocument) -> Result<Vec<DocumentEvent>, StockError> {
        self.ensure_draft("confirm")?;
        if self.lines.is_empty() {
            return Err(StockError::invalid_line("cannot confirm a document without lines"));
        }

        let resolved: Vec<u32> = cmd.resolution.lines.iter().map(|m| m.line_no).collect();
        let current: Vec<u32> = self.lines.iter().map(|l| l.line_no).collect();
        if resolved != current {
            return Err(DomainError::invariant("resolution does not cover the document's current lines").into());
        }

        Ok(vec![DocumentEvent::DocumentConfirmed(DocumentConfirmed {
            document_id: self.id,
            actor: cmd.actor,
            lines: cmd.resolution.lines.clone(),
            net: cmd.resolution.net.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelDocument) -> Result<Vec<DocumentEvent>, StockError> {
        self.ensure_created()?;

        match self.status {
            DocumentStatus::Draft => {
                if !cmd.reversal.is_empty() {
                    return Err(DomainError::invariant("a draft has no stock effect to reverse").into());
                }
            }
            DocumentStatus::Confirmed => {
                if cmd.reversal != self.reversal() {
                    return Err(DomainError::invariant(
                        "reversal must be the exact inverse of the committed deltas",
                    )
                    .into());
                }
            }
            DocumentStatus::Cancelled => {
                return Err(StockError::transition("document", self.status, "cancel"));
            }
        }

        Ok(vec![DocumentEvent::DocumentCancelled(DocumentCancelled {
            document_id: self.id,
            actor: cmd.actor,
            previous_status: self.status,
            reason: cmd.reason.clone(),
            reversal: cmd.reversal.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}
