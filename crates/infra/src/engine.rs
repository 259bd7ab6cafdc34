//! Stock engine: orchestration behind every inbound call.
//!
//! The engine composes the ledger, the audit sink, master data and the event
//! bus. Domain decisions stay in the aggregates; the engine only sequences
//! them around the one IO step that matters, the ledger batch.
//!
//! ## Confirmation Flow
//!
//! ```text
//! confirm(document)
//!   ↓
//! 1. Lock the document (one transition at a time per document)
//!   ↓
//! 2. Authorize against the document's warehouse
//!   ↓
//! 3. Resolve lines into net deltas (read-only, master data checks)
//!   ↓
//! 4. Decide: Document::handle(Confirm) (pure, rejects illegal transitions)
//!   ↓
//! 5. Commit: StockLedger::apply(net) (all-or-nothing)
//!   ↓
//! 6. Evolve: Document::apply(events)
//!   ↓
//! 7. Audit one record per touched row plus one for the transition
//!   ↓
//! 8. Publish envelopes on the bus
//! ```
//!
//! Any failure up to step 5 leaves ledger and document untouched. Steps 7 and
//! 8 run after the commit: an audit failure is returned as
//! `AuditWriteFailed` while the stock change stays committed, and a publish
//! failure is only logged.
//!
//! ## Lock Order
//!
//! Count before document, document before ledger stripes. Nothing locks a
//! count while holding a document.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{error, info, instrument, warn};

use wms_auth::{authorize, has_permission, Permission, Principal, WarehouseScope};
use wms_catalog::CatalogLookup;
use wms_core::{
    Aggregate, AggregateId, CountId, DocumentId, DomainError, Entity, LocationId, ProductId, UserId,
    WarehouseId,
};
use wms_events::{execute, Event, EventBus, EventEnvelope, InMemoryEventBus};
use wms_inventory::count::{adjustment_lines, check_count_target};
use wms_inventory::resolver;
use wms_inventory::{
    CancelDocument, CompleteCount, ConfirmDocument, CountCommand, CountEvent, CountScope, CountSnapshot, CountStatus,
    CreateDocument, Document, DocumentCommand, DocumentEvent, DocumentSnapshot, DocumentStatus, DocumentType,
    InventoryCount, LineSpec, RecordCount, StartCount, StockChange, StockDelta, StockError, StockKey, StockRow,
};

use crate::audit::{
    actions, AuditFilter, AuditPage, AuditQuery, AuditRecord, AuditSink, InMemoryAuditLog, Pagination, ENTITY_COUNT,
    ENTITY_DOCUMENT,
};
use crate::catalog::InMemoryCatalog;
use crate::config::EngineConfig;
use crate::ledger::{InMemoryStockLedger, StockLedger};
use crate::repository::{lock, InMemoryRepository};

pub const DOCUMENT_AGGREGATE: &str = "inventory.document";
pub const COUNT_AGGREGATE: &str = "inventory.count";

/// Input of `create_document`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDocument {
    pub doc_type: DocumentType,
    pub warehouse_id: WarehouseId,
    pub reference: Option<String>,
    pub notes: Option<String>,
}

impl NewDocument {
    pub fn new(doc_type: DocumentType, warehouse_id: WarehouseId) -> Self {
        Self {
            doc_type,
            warehouse_id,
            reference: None,
            notes: None,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentFilter {
    pub warehouse_id: Option<WarehouseId>,
    pub status: Option<DocumentStatus>,
    pub doc_type: Option<DocumentType>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockFilter {
    pub product_id: Option<ProductId>,
    pub location_id: Option<LocationId>,
    pub warehouse_id: Option<WarehouseId>,
    /// Also return rows whose quantity went back to zero.
    pub include_empty: bool,
}

/// Post-commit work: audit records to write and envelopes to publish.
#[derive(Default)]
struct Outcome {
    records: Vec<AuditRecord>,
    envelopes: Vec<EventEnvelope<JsonValue>>,
}

/// An adjustment document confirmed on behalf of a count.
struct Adjustment {
    document: Document,
    events: Vec<DocumentEvent>,
    changes: Vec<StockChange>,
}

pub struct StockEngine<L, A, C, B> {
    ledger: L,
    audit: A,
    catalog: C,
    bus: B,
    config: EngineConfig,
    documents: InMemoryRepository<Document>,
    counts: InMemoryRepository<InventoryCount>,
}

/// Engine wired entirely with in-memory adapters.
pub type InMemoryStockEngine = StockEngine<
    Arc<InMemoryStockLedger>,
    Arc<InMemoryAuditLog>,
    Arc<InMemoryCatalog>,
    Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>,
>;

impl InMemoryStockEngine {
    pub fn in_memory(config: EngineConfig) -> Self {
        Self::new(
            Arc::new(InMemoryStockLedger::with_stripes(config.ledger_stripes)),
            Arc::new(InMemoryAuditLog::new()),
            Arc::new(InMemoryCatalog::new()),
            Arc::new(InMemoryEventBus::new()),
            config,
        )
    }
}

impl<L, A, C, B> StockEngine<L, A, C, B> {
    pub fn new(ledger: L, audit: A, catalog: C, bus: B, config: EngineConfig) -> Self {
        Self {
            ledger,
            audit,
            catalog,
            bus,
            config,
            documents: InMemoryRepository::new(),
            counts: InMemoryRepository::new(),
        }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn audit(&self) -> &A {
        &self.audit
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl<L, A, C, B> StockEngine<L, A, C, B>
where
    L: StockLedger,
    A: AuditSink,
    C: CatalogLookup,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    // ---- documents -------------------------------------------------------

    #[instrument(skip(self, principal), fields(user_id = %principal.user_id))]
    pub fn create_document(&self, principal: &Principal, new: NewDocument) -> Result<DocumentSnapshot, StockError> {
        self.check_access(principal, &Permission::DOCUMENTS_WRITE, new.warehouse_id)?;
        self.ensure_active_warehouse(new.warehouse_id)?;

        let id = DocumentId::new();
        let mut document = Document::empty(id);
        let events = execute(
            &mut document,
            &DocumentCommand::Create(CreateDocument {
                document_id: id,
                warehouse_id: new.warehouse_id,
                doc_type: new.doc_type,
                created_by: principal.user_id,
                reference: new.reference,
                notes: new.notes,
                occurred_at: Utc::now(),
            }),
        )?;
        let snapshot = document.snapshot();
        self.documents.insert(document)?;
        info!(document_id = %id, doc_type = ?snapshot.doc_type, "document created");

        let mut outcome = Outcome::default();
        self.audit_document(
            &mut outcome,
            principal.user_id,
            actions::DOCUMENT_CREATED,
            None,
            &snapshot,
            &[],
            &events,
        );
        self.finish(outcome)?;
        Ok(snapshot)
    }

    #[instrument(skip(self, principal), fields(user_id = %principal.user_id))]
    pub fn add_line(
        &self,
        principal: &Principal,
        document_id: DocumentId,
        spec: LineSpec,
    ) -> Result<DocumentSnapshot, StockError> {
        self.change_draft(
            principal,
            document_id,
            DocumentCommand::AddLine {
                actor: principal.user_id,
                spec,
                occurred_at: Utc::now(),
            },
            actions::DOCUMENT_LINE_ADDED,
        )
    }

    #[instrument(skip(self, principal), fields(user_id = %principal.user_id))]
    pub fn edit_line(
        &self,
        principal: &Principal,
        document_id: DocumentId,
        line_no: u32,
        spec: LineSpec,
    ) -> Result<DocumentSnapshot, StockError> {
        self.change_draft(
            principal,
            document_id,
            DocumentCommand::EditLine {
                actor: principal.user_id,
                line_no,
                spec,
                occurred_at: Utc::now(),
            },
            actions::DOCUMENT_LINE_EDITED,
        )
    }

    #[instrument(skip(self, principal), fields(user_id = %principal.user_id))]
    pub fn remove_line(
        &self,
        principal: &Principal,
        document_id: DocumentId,
        line_no: u32,
    ) -> Result<DocumentSnapshot, StockError> {
        self.change_draft(
            principal,
            document_id,
            DocumentCommand::RemoveLine {
                actor: principal.user_id,
                line_no,
                occurred_at: Utc::now(),
            },
            actions::DOCUMENT_LINE_REMOVED,
        )
    }

    /// DRAFT → CONFIRMED: apply the document's net deltas to the ledger.
    ///
    /// Either every delta commits or none does; on `InsufficientStock` the
    /// document stays DRAFT.
    #[instrument(skip(self, principal), fields(user_id = %principal.user_id))]
    pub fn confirm(&self, principal: &Principal, document_id: DocumentId) -> Result<DocumentSnapshot, StockError> {
        let handle = self.document_handle(document_id)?;
        let mut document = lock(&handle)?;
        let warehouse_id = document_warehouse(&document)?;
        self.check_access(principal, &Permission::DOCUMENTS_CONFIRM, warehouse_id)?;

        let before = document.snapshot();
        let (events, changes) = self
            .confirm_locked(&mut document, principal.user_id, &[])
            .inspect_err(|err| warn!(%document_id, error = %err, "confirmation rejected"))?;
        let after = document.snapshot();
        drop(document);

        let mut outcome = Outcome::default();
        self.audit_document(
            &mut outcome,
            principal.user_id,
            actions::DOCUMENT_CONFIRMED,
            Some(&before),
            &after,
            &changes,
            &events,
        );
        self.finish(outcome)?;
        Ok(after)
    }

    /// Cancel a DRAFT (no stock effect) or a CONFIRMED document (exact
    /// reversal of its committed deltas).
    #[instrument(skip(self, principal), fields(user_id = %principal.user_id))]
    pub fn cancel(
        &self,
        principal: &Principal,
        document_id: DocumentId,
        reason: Option<String>,
    ) -> Result<DocumentSnapshot, StockError> {
        let handle = self.document_handle(document_id)?;
        let mut document = lock(&handle)?;
        let warehouse_id = document_warehouse(&document)?;
        self.check_access(principal, &Permission::DOCUMENTS_CANCEL, warehouse_id)?;

        let before = document.snapshot();
        let (events, changes) = self
            .cancel_locked(&mut document, principal.user_id, reason)
            .inspect_err(|err| warn!(%document_id, error = %err, "cancellation rejected"))?;
        let after = document.snapshot();
        drop(document);

        let mut outcome = Outcome::default();
        self.audit_document(
            &mut outcome,
            principal.user_id,
            actions::DOCUMENT_CANCELLED,
            Some(&before),
            &after,
            &changes,
            &events,
        );
        self.finish(outcome)?;
        Ok(after)
    }

    pub fn get_document(&self, principal: &Principal, document_id: DocumentId) -> Result<DocumentSnapshot, StockError> {
        let handle = self.document_handle(document_id)?;
        let document = lock(&handle)?;
        self.check_access(principal, &Permission::DOCUMENTS_READ, document_warehouse(&document)?)?;
        Ok(document.snapshot())
    }

    /// Documents visible to the principal, oldest first.
    pub fn list_documents(
        &self,
        principal: &Principal,
        filter: &DocumentFilter,
    ) -> Result<Vec<DocumentSnapshot>, StockError> {
        let mut snapshots = Vec::new();
        for handle in self.documents.handles()? {
            let snapshot = lock(&handle)?.snapshot();
            let Some(warehouse_id) = snapshot.warehouse_id else {
                continue;
            };
            if filter.warehouse_id.is_some_and(|w| w != warehouse_id)
                || filter.status.is_some_and(|s| s != snapshot.status)
                || filter.doc_type.is_some_and(|t| t != snapshot.doc_type)
                || authorize(principal, &Permission::DOCUMENTS_READ, warehouse_id).is_err()
            {
                continue;
            }
            snapshots.push(snapshot);
        }
        snapshots.sort_by_key(|s| (s.created_at, s.id));
        Ok(snapshots)
    }

    // ---- counts ----------------------------------------------------------

    #[instrument(skip(self, principal), fields(user_id = %principal.user_id))]
    pub fn start_count(&self, principal: &Principal, scope: CountScope) -> Result<CountSnapshot, StockError> {
        self.check_access(principal, &Permission::COUNTS_WRITE, scope.warehouse_id)?;
        self.ensure_active_warehouse(scope.warehouse_id)?;
        if let Some(location_id) = scope.location_id {
            let location = self
                .catalog
                .location(location_id)
                .ok_or_else(|| StockError::invalid_line(format!("location {location_id} does not exist")))?;
            if location.warehouse_id() != scope.warehouse_id {
                return Err(StockError::invalid_line(format!(
                    "location {} belongs to another warehouse",
                    location.barcode()
                )));
            }
        }

        let id = CountId::new();
        let mut count = InventoryCount::empty(id);
        let events = execute(
            &mut count,
            &CountCommand::Start(StartCount {
                count_id: id,
                scope,
                actor: principal.user_id,
                occurred_at: Utc::now(),
            }),
        )?;
        let snapshot = count.snapshot();
        self.counts.insert(count)?;
        info!(count_id = %id, "count started");

        let mut outcome = Outcome::default();
        self.audit_count(&mut outcome, principal.user_id, actions::COUNT_STARTED, None, &snapshot, &events);
        self.finish(outcome)?;
        Ok(snapshot)
    }

    /// Record a counted quantity; a later record for the same pair replaces it.
    #[instrument(skip(self, principal), fields(user_id = %principal.user_id))]
    pub fn record_count(
        &self,
        principal: &Principal,
        count_id: CountId,
        product_id: ProductId,
        location_id: LocationId,
        quantity: i64,
    ) -> Result<CountSnapshot, StockError> {
        let handle = self.count_handle(count_id)?;
        let mut count = lock(&handle)?;
        let scope = count_scope(&count)?;
        self.check_access(principal, &Permission::COUNTS_WRITE, scope.warehouse_id)?;

        let before = count.snapshot();
        let events = count.handle(&CountCommand::Record(RecordCount {
            actor: principal.user_id,
            product_id,
            location_id,
            quantity,
            occurred_at: Utc::now(),
        }))?;
        check_count_target(&self.catalog, &scope, product_id, location_id)?;
        for event in &events {
            count.apply(event);
        }
        let after = count.snapshot();
        drop(count);

        let mut outcome = Outcome::default();
        self.audit_count(
            &mut outcome,
            principal.user_id,
            actions::COUNT_RECORDED,
            Some(&before),
            &after,
            &events,
        );
        self.finish(outcome)?;
        Ok(after)
    }

    /// OPEN → COMPLETED.
    ///
    /// Divergences from the ledger become one ADJUSTMENT document, confirmed
    /// with each delta expecting the ledger value it was computed from. If a
    /// row moves in between, reconciliation is recomputed, up to the
    /// configured retry limit. On any failure the count stays OPEN and no
    /// document is stored.
    #[instrument(skip(self, principal), fields(user_id = %principal.user_id))]
    pub fn complete_count(&self, principal: &Principal, count_id: CountId) -> Result<CountSnapshot, StockError> {
        let handle = self.count_handle(count_id)?;
        let mut count = lock(&handle)?;
        let scope = count_scope(&count)?;
        self.check_access(principal, &Permission::COUNTS_COMPLETE, scope.warehouse_id)?;
        if count.status() != CountStatus::Open {
            return Err(StockError::transition("count", count.status(), "complete"));
        }

        let actor = principal.user_id;
        let before = count.snapshot();
        let limit = self.config.count_retry_limit.max(1);
        let mut attempt = 0;

        let (events, adjustment) = loop {
            attempt += 1;
            let deltas = self.reconcile(&count)?;
            let document_id = (!deltas.is_empty()).then(DocumentId::new);
            let events = count.handle(&CountCommand::Complete(CompleteCount {
                actor,
                adjustment_document: document_id,
                deltas: deltas.clone(),
                occurred_at: Utc::now(),
            }))?;

            let Some(document_id) = document_id else {
                break (events, None);
            };
            match self.confirm_adjustment(document_id, count_id, scope, actor, &deltas) {
                Ok(adjustment) => break (events, Some(adjustment)),
                Err(StockError::StaleRead { .. }) if attempt < limit => {
                    warn!(%count_id, attempt, "ledger moved during count completion, retrying");
                }
                Err(err) => {
                    warn!(%count_id, attempt, error = %err, "count completion rejected");
                    return Err(err);
                }
            }
        };

        for event in &events {
            count.apply(event);
        }
        let after = count.snapshot();
        drop(count);

        let mut outcome = Outcome::default();
        if let Some(adjustment) = adjustment {
            let snapshot = adjustment.document.snapshot();
            self.documents.insert(adjustment.document)?;
            info!(%count_id, document_id = %snapshot.id, rows = adjustment.changes.len(), "count adjustment confirmed");
            self.audit_document(
                &mut outcome,
                actor,
                actions::DOCUMENT_CONFIRMED,
                None,
                &snapshot,
                &adjustment.changes,
                &adjustment.events,
            );
        } else {
            info!(%count_id, "count matched the ledger");
        }
        self.audit_count(
            &mut outcome,
            actor,
            actions::COUNT_COMPLETED,
            Some(&before),
            &after,
            &events,
        );
        self.finish(outcome)?;
        Ok(after)
    }

    /// COMPLETED → OPEN, unwinding the adjustment document through the
    /// regular cancel-from-CONFIRMED path.
    #[instrument(skip(self, principal), fields(user_id = %principal.user_id))]
    pub fn reopen_count(&self, principal: &Principal, count_id: CountId) -> Result<CountSnapshot, StockError> {
        let handle = self.count_handle(count_id)?;
        let mut count = lock(&handle)?;
        let scope = count_scope(&count)?;
        self.check_access(principal, &Permission::COUNTS_COMPLETE, scope.warehouse_id)?;

        let actor = principal.user_id;
        let before = count.snapshot();
        let events = count.handle(&CountCommand::Reopen {
            actor,
            occurred_at: Utc::now(),
        })?;

        let mut outcome = Outcome::default();
        if let Some(document_id) = count.adjustment_document() {
            let document_handle = self.document_handle(document_id)?;
            let mut document = lock(&document_handle)?;
            // Already unwound if someone cancelled the adjustment directly.
            if document.status() != DocumentStatus::Cancelled {
                let doc_before = document.snapshot();
                let (doc_events, changes) = self
                    .cancel_locked(&mut document, actor, Some(format!("count {count_id} reopened")))
                    .inspect_err(|err| warn!(%count_id, error = %err, "count reopen rejected"))?;
                self.audit_document(
                    &mut outcome,
                    actor,
                    actions::DOCUMENT_CANCELLED,
                    Some(&doc_before),
                    &document.snapshot(),
                    &changes,
                    &doc_events,
                );
            }
        }

        for event in &events {
            count.apply(event);
        }
        let after = count.snapshot();
        drop(count);
        info!(%count_id, "count reopened");

        self.audit_count(
            &mut outcome,
            actor,
            actions::COUNT_REOPENED,
            Some(&before),
            &after,
            &events,
        );
        self.finish(outcome)?;
        Ok(after)
    }

    #[instrument(skip(self, principal), fields(user_id = %principal.user_id))]
    pub fn cancel_count(&self, principal: &Principal, count_id: CountId) -> Result<CountSnapshot, StockError> {
        let handle = self.count_handle(count_id)?;
        let mut count = lock(&handle)?;
        let scope = count_scope(&count)?;
        self.check_access(principal, &Permission::COUNTS_WRITE, scope.warehouse_id)?;

        let before = count.snapshot();
        let events = execute(
            &mut *count,
            &CountCommand::Cancel {
                actor: principal.user_id,
                occurred_at: Utc::now(),
            },
        )?;
        let after = count.snapshot();
        drop(count);

        let mut outcome = Outcome::default();
        self.audit_count(
            &mut outcome,
            principal.user_id,
            actions::COUNT_CANCELLED,
            Some(&before),
            &after,
            &events,
        );
        self.finish(outcome)?;
        Ok(after)
    }

    pub fn get_count(&self, principal: &Principal, count_id: CountId) -> Result<CountSnapshot, StockError> {
        let handle = self.count_handle(count_id)?;
        let count = lock(&handle)?;
        self.check_access(principal, &Permission::STOCK_READ, count_scope(&count)?.warehouse_id)?;
        Ok(count.snapshot())
    }

    // ---- ledger reads ----------------------------------------------------

    /// On-hand quantity; pairs never touched read as zero.
    pub fn get_quantity(
        &self,
        principal: &Principal,
        product_id: ProductId,
        location_id: LocationId,
    ) -> Result<i64, StockError> {
        let location = self
            .catalog
            .location(location_id)
            .ok_or_else(|| StockError::not_found("location", location_id))?;
        self.check_access(principal, &Permission::STOCK_READ, location.warehouse_id())?;
        Ok(self.ledger.quantity(&StockKey::new(product_id, location_id))?)
    }

    /// Ledger rows visible to the principal, ordered by (product, location).
    pub fn list_stock(&self, principal: &Principal, filter: &StockFilter) -> Result<Vec<StockRow>, StockError> {
        match filter.warehouse_id {
            Some(warehouse_id) => self.check_access(principal, &Permission::STOCK_READ, warehouse_id)?,
            None => {
                if !has_permission(principal, &Permission::STOCK_READ) {
                    return Err(StockError::Forbidden(format!(
                        "missing permission '{}'",
                        Permission::STOCK_READ.as_str()
                    )));
                }
            }
        }

        let mut warehouses: HashMap<LocationId, Option<WarehouseId>> = HashMap::new();
        let rows = self
            .ledger
            .rows(filter.product_id, filter.location_id)?
            .into_iter()
            .filter(|row| filter.include_empty || !row.is_empty())
            .filter(|row| {
                let warehouse = *warehouses
                    .entry(row.location_id)
                    .or_insert_with(|| self.catalog.location(row.location_id).map(|l| l.warehouse_id()));
                match warehouse {
                    Some(w) => filter.warehouse_id.is_none_or(|f| f == w) && principal.warehouses.contains(w),
                    None => filter.warehouse_id.is_none() && principal.warehouses == WarehouseScope::All,
                }
            })
            .collect();
        Ok(rows)
    }

    // ---- internals -------------------------------------------------------

    fn check_access(
        &self,
        principal: &Principal,
        permission: &Permission,
        warehouse_id: WarehouseId,
    ) -> Result<(), StockError> {
        authorize(principal, permission, warehouse_id).map_err(|err| {
            warn!(
                user_id = %principal.user_id,
                permission = permission.as_str(),
                %warehouse_id,
                "access denied"
            );
            StockError::Forbidden(err.to_string())
        })
    }

    fn ensure_active_warehouse(&self, warehouse_id: WarehouseId) -> Result<(), StockError> {
        let warehouse = self
            .catalog
            .warehouse(warehouse_id)
            .ok_or_else(|| StockError::not_found("warehouse", warehouse_id))?;
        if !warehouse.is_active() {
            return Err(DomainError::validation(format!("warehouse {} is inactive", warehouse.code())).into());
        }
        Ok(())
    }

    fn document_handle(&self, document_id: DocumentId) -> Result<Arc<Mutex<Document>>, StockError> {
        self.documents
            .get(&document_id)?
            .ok_or_else(|| StockError::not_found("document", document_id))
    }

    fn count_handle(&self, count_id: CountId) -> Result<Arc<Mutex<InventoryCount>>, StockError> {
        self.counts
            .get(&count_id)?
            .ok_or_else(|| StockError::not_found("count", count_id))
    }

    fn change_draft(
        &self,
        principal: &Principal,
        document_id: DocumentId,
        command: DocumentCommand,
        action: &'static str,
    ) -> Result<DocumentSnapshot, StockError> {
        let handle = self.document_handle(document_id)?;
        let mut document = lock(&handle)?;
        let warehouse_id = document_warehouse(&document)?;
        self.check_access(principal, &Permission::DOCUMENTS_WRITE, warehouse_id)?;

        let before = document.snapshot();
        let events = document.handle(&command)?;
        for event in &events {
            if let DocumentEvent::LineAdded(e) = event {
                resolver::check_references(&self.catalog, warehouse_id, e.line_no, &e.spec)?;
            }
            if let DocumentEvent::LineEdited(e) = event {
                resolver::check_references(&self.catalog, warehouse_id, e.line_no, &e.spec)?;
            }
        }
        for event in &events {
            document.apply(event);
        }
        let after = document.snapshot();
        drop(document);

        let mut outcome = Outcome::default();
        self.audit_document(&mut outcome, principal.user_id, action, Some(&before), &after, &[], &events);
        self.finish(outcome)?;
        Ok(after)
    }

    /// Resolve, decide, commit, evolve. `guards` supplies `expected_before`
    /// values by key for the committed net deltas.
    fn confirm_locked(
        &self,
        document: &mut Document,
        actor: UserId,
        guards: &[StockDelta],
    ) -> Result<(Vec<DocumentEvent>, Vec<StockChange>), StockError> {
        if document.status() != DocumentStatus::Draft {
            return Err(StockError::transition("document", document.status(), "confirm"));
        }
        let warehouse_id = document_warehouse(document)?;
        let mut resolution = resolver::resolve(&self.catalog, document.doc_type(), warehouse_id, document.lines())?;

        let expected: HashMap<StockKey, i64> = guards
            .iter()
            .filter_map(|d| d.expected_before.map(|e| (d.key, e)))
            .collect();
        for delta in &mut resolution.net {
            if let Some(before) = expected.get(&delta.key) {
                delta.expected_before = Some(*before);
            }
        }

        let events = document.handle(&DocumentCommand::Confirm(ConfirmDocument {
            actor,
            resolution: resolution.clone(),
            occurred_at: Utc::now(),
        }))?;
        let changes = self.ledger.apply(&resolution.net)?;
        for event in &events {
            document.apply(event);
        }
        info!(document_id = %document.id_typed(), rows = changes.len(), "document confirmed");
        Ok((events, changes))
    }

    fn cancel_locked(
        &self,
        document: &mut Document,
        actor: UserId,
        reason: Option<String>,
    ) -> Result<(Vec<DocumentEvent>, Vec<StockChange>), StockError> {
        let reversal = match document.status() {
            DocumentStatus::Confirmed => document.reversal(),
            _ => Vec::new(),
        };
        let events = document.handle(&DocumentCommand::Cancel(CancelDocument {
            actor,
            reason,
            reversal: reversal.clone(),
            occurred_at: Utc::now(),
        }))?;
        let changes = if reversal.is_empty() {
            Vec::new()
        } else {
            self.ledger
                .apply(&reversal)
                .map_err(|err| StockError::from(err).into_cancellation_conflict())?
        };
        for event in &events {
            document.apply(event);
        }
        info!(document_id = %document.id_typed(), rows = changes.len(), "document cancelled");
        Ok((events, changes))
    }

    /// Current ledger-vs-count divergences.
    fn reconcile(&self, count: &InventoryCount) -> Result<Vec<StockDelta>, StockError> {
        let mut on_hand = HashMap::new();
        for line in count.lines() {
            let key = line.key();
            on_hand.insert(key, self.ledger.quantity(&key)?);
        }
        Ok(count.reconcile(|key| on_hand.get(key).copied().unwrap_or(0)))
    }

    /// Build and confirm the adjustment document for a count, in memory only.
    fn confirm_adjustment(
        &self,
        document_id: DocumentId,
        count_id: CountId,
        scope: CountScope,
        actor: UserId,
        deltas: &[StockDelta],
    ) -> Result<Adjustment, StockError> {
        let now = Utc::now();
        let mut document = Document::empty(document_id);
        let mut events = execute(
            &mut document,
            &DocumentCommand::Create(CreateDocument {
                document_id,
                warehouse_id: scope.warehouse_id,
                doc_type: DocumentType::Adjustment,
                created_by: actor,
                reference: Some(format!("count:{count_id}")),
                notes: None,
                occurred_at: now,
            }),
        )?;
        for spec in adjustment_lines(deltas) {
            events.extend(execute(
                &mut document,
                &DocumentCommand::AddLine {
                    actor,
                    spec,
                    occurred_at: now,
                },
            )?);
        }

        let (confirmed, changes) = self.confirm_locked(&mut document, actor, deltas)?;
        events.extend(confirmed);
        Ok(Adjustment {
            document,
            events,
            changes,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn audit_document(
        &self,
        outcome: &mut Outcome,
        actor: UserId,
        action: &'static str,
        before: Option<&DocumentSnapshot>,
        after: &DocumentSnapshot,
        changes: &[StockChange],
        events: &[DocumentEvent],
    ) {
        let Some(warehouse_id) = after.warehouse_id else {
            return;
        };
        let now = Utc::now();
        for change in changes {
            outcome
                .records
                .push(AuditRecord::stock_change(actor, warehouse_id, after.id, change, now));
        }
        outcome.records.push(AuditRecord::new(
            actor,
            action,
            ENTITY_DOCUMENT,
            after.id,
            Some(warehouse_id),
            before.map(to_json).unwrap_or(JsonValue::Null),
            to_json(after),
            now,
        ));
        outcome.envelopes.extend(envelopes(
            warehouse_id,
            after.id.into(),
            DOCUMENT_AGGREGATE,
            after.version,
            events,
        ));
    }

    fn audit_count(
        &self,
        outcome: &mut Outcome,
        actor: UserId,
        action: &'static str,
        before: Option<&CountSnapshot>,
        after: &CountSnapshot,
        events: &[CountEvent],
    ) {
        let Some(scope) = after.scope else {
            return;
        };
        let mut record = AuditRecord::new(
            actor,
            action,
            ENTITY_COUNT,
            after.id,
            Some(scope.warehouse_id),
            before.map(to_json).unwrap_or(JsonValue::Null),
            to_json(after),
            Utc::now(),
        );
        if let Some(document_id) = after.adjustment_document {
            record = record.with_reference(document_id);
        }
        outcome.records.push(record);
        outcome.envelopes.extend(envelopes(
            scope.warehouse_id,
            after.id.into(),
            COUNT_AGGREGATE,
            after.version,
            events,
        ));
    }

    /// Write audit records, then publish. Both happen after the commit.
    fn finish(&self, outcome: Outcome) -> Result<(), StockError> {
        let audited = if outcome.records.is_empty() {
            Ok(())
        } else {
            self.audit.record(&outcome.records).map_err(|err| {
                error!(records = outcome.records.len(), error = %err, "audit write failed after commit");
                StockError::AuditWriteFailed {
                    failed: outcome.records.len(),
                    reason: err.to_string(),
                }
            })
        };

        for envelope in outcome.envelopes {
            let event_type = envelope.event_type().to_string();
            if let Err(err) = self.bus.publish(envelope) {
                warn!(%event_type, error = ?err, "event publication failed");
            }
        }

        audited
    }
}

impl<L, A, C, B> StockEngine<L, A, C, B>
where
    A: AuditQuery,
{
    /// Audit records matching `filter`.
    ///
    /// Without a warehouse in the filter the principal needs an unrestricted
    /// warehouse scope.
    pub fn query_audit(
        &self,
        principal: &Principal,
        filter: &AuditFilter,
        pagination: Pagination,
    ) -> Result<AuditPage, StockError> {
        let allowed = match filter.warehouse_id {
            Some(warehouse_id) => authorize(principal, &Permission::AUDIT_READ, warehouse_id).is_ok(),
            None => principal.warehouses == WarehouseScope::All && has_permission(principal, &Permission::AUDIT_READ),
        };
        if !allowed {
            warn!(user_id = %principal.user_id, "audit query denied");
            return Err(StockError::Forbidden(format!(
                "missing permission '{}'",
                Permission::AUDIT_READ.as_str()
            )));
        }

        self.audit
            .query(filter, pagination.capped(self.config.audit_page_limit))
            .map_err(|err| StockError::Storage(err.to_string()))
    }
}

fn document_warehouse(document: &Document) -> Result<WarehouseId, StockError> {
    document
        .warehouse_id()
        .ok_or_else(|| StockError::not_found("document", document.id_typed()))
}

fn count_scope(count: &InventoryCount) -> Result<CountScope, StockError> {
    count
        .scope()
        .ok_or_else(|| StockError::not_found("count", count.id_typed()))
}

fn to_json<T: Serialize>(value: &T) -> JsonValue {
    serde_json::to_value(value).unwrap_or(JsonValue::Null)
}

/// Wrap the events that brought an aggregate to `version` into envelopes.
fn envelopes<E>(
    warehouse_id: WarehouseId,
    aggregate_id: AggregateId,
    aggregate_type: &str,
    version: u64,
    events: &[E],
) -> Vec<EventEnvelope<JsonValue>>
where
    E: Event + Serialize,
{
    let first = version.saturating_sub(events.len() as u64) + 1;
    events
        .iter()
        .enumerate()
        .filter_map(|(idx, event)| {
            EventEnvelope::from_typed(warehouse_id, aggregate_id, aggregate_type, first + idx as u64, event)
                .inspect_err(|err| warn!(event_type = event.event_type(), error = %err, "failed to serialize event"))
                .ok()
        })
        .collect()
}
