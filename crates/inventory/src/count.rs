//! Inventory count aggregate and reconciliation.
//!
//! A count collects physical quantities per (product, location) while OPEN.
//! Completion compares them with the ledger and hands the divergences to the
//! engine, which confirms them as a single ADJUSTMENT document.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use wms_catalog::{CatalogLookup, LocationStatus};
use wms_core::{
    Aggregate, AggregateRoot, CountId, DocumentId, DomainError, Entity, LocationId, ProductId, UserId, WarehouseId,
};
use wms_events::Event;

use crate::error::StockError;
use crate::line::LineSpec;
use crate::stock::{StockDelta, StockKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CountStatus {
    Open,
    Completed,
    Cancelled,
}

/// What a count covers: a whole warehouse or one location inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountScope {
    pub warehouse_id: WarehouseId,
    pub location_id: Option<LocationId>,
}

impl CountScope {
    pub fn warehouse(warehouse_id: WarehouseId) -> Self {
        Self {
            warehouse_id,
            location_id: None,
        }
    }

    pub fn location(warehouse_id: WarehouseId, location_id: LocationId) -> Self {
        Self {
            warehouse_id,
            location_id: Some(location_id),
        }
    }

    pub fn covers(&self, warehouse_id: WarehouseId, location_id: LocationId) -> bool {
        warehouse_id == self.warehouse_id && self.location_id.is_none_or(|l| l == location_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountLine {
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub counted: i64,
    pub recorded_by: UserId,
    pub recorded_at: DateTime<Utc>,
}

impl CountLine {
    pub fn key(&self) -> StockKey {
        StockKey::new(self.product_id, self.location_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryCount {
    id: CountId,
    scope: Option<CountScope>,
    status: CountStatus,
    started_by: Option<UserId>,
    lines: BTreeMap<StockKey, CountLine>,
    adjustment_document: Option<DocumentId>,
    started_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    completed_by: Option<UserId>,
    cancelled_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl InventoryCount {
    pub fn empty(id: CountId) -> Self {
        Self {
            id,
            scope: None,
            status: CountStatus::Open,
            started_by: None,
            lines: BTreeMap::new(),
            adjustment_document: None,
            started_at: None,
            updated_at: None,
            completed_at: None,
            completed_by: None,
            cancelled_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> CountId {
        self.id
    }

    pub fn scope(&self) -> Option<CountScope> {
        self.scope
    }

    pub fn status(&self) -> CountStatus {
        self.status
    }

    pub fn lines(&self) -> impl Iterator<Item = &CountLine> {
        self.lines.values()
    }

    pub fn counted(&self, key: &StockKey) -> Option<i64> {
        self.lines.get(key).map(|l| l.counted)
    }

    /// The adjustment document produced by the last completion, if any.
    pub fn adjustment_document(&self) -> Option<DocumentId> {
        self.adjustment_document
    }

    /// Divergences between counted and ledger quantities.
    ///
    /// Each delta is `counted - ledger` and expects the row to still hold the
    /// ledger quantity it was computed from. Matching pairs are skipped.
    pub fn reconcile(&self, quantity_of: impl Fn(&StockKey) -> i64) -> Vec<StockDelta> {
        self.lines
            .values()
            .filter_map(|line| {
                let key = line.key();
                let on_hand = quantity_of(&key);
                let delta = line.counted - on_hand;
                (delta != 0).then(|| StockDelta::new(key, delta).expecting(on_hand))
            })
            .collect()
    }

    pub fn snapshot(&self) -> CountSnapshot {
        CountSnapshot {
            id: self.id,
            scope: self.scope,
            status: self.status,
            lines: self.lines.values().cloned().collect(),
            adjustment_document: self.adjustment_document,
            started_by: self.started_by,
            started_at: self.started_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
            completed_by: self.completed_by,
            cancelled_at: self.cancelled_at,
            version: self.version,
        }
    }
}

/// Adjustment lines for a set of reconciliation deltas, one per pair.
pub fn adjustment_lines(deltas: &[StockDelta]) -> Vec<LineSpec> {
    deltas
        .iter()
        .map(|d| LineSpec::adjustment(d.key.product_id, d.key.location_id, d.delta))
        .collect()
}

/// Master data and scope checks for a recorded pair.
pub fn check_count_target<C>(
    catalog: &C,
    scope: &CountScope,
    product_id: ProductId,
    location_id: LocationId,
) -> Result<(), StockError>
where
    C: CatalogLookup + ?Sized,
{
    let product = catalog
        .product(product_id)
        .ok_or_else(|| StockError::invalid_line(format!("product {product_id} does not exist")))?;
    if !product.is_active() {
        return Err(StockError::invalid_line(format!("product {} is inactive", product.sku())));
    }

    let location = catalog
        .location(location_id)
        .ok_or_else(|| StockError::invalid_line(format!("location {location_id} does not exist")))?;
    if location.status() != LocationStatus::Active {
        return Err(StockError::invalid_line(format!(
            "location {} is not active",
            location.barcode()
        )));
    }
    if !scope.covers(location.warehouse_id(), location_id) {
        return Err(StockError::invalid_line(format!(
            "location {} is outside the count scope",
            location.barcode()
        )));
    }
    Ok(())
}

impl AggregateRoot for InventoryCount {
    type Id = CountId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountSnapshot {
    pub id: CountId,
    pub scope: Option<CountScope>,
    pub status: CountStatus,
    pub lines: Vec<CountLine>,
    pub adjustment_document: Option<DocumentId>,
    pub started_by: Option<UserId>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub completed_by: Option<UserId>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartCount {
    pub count_id: CountId,
    pub scope: CountScope,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordCount {
    pub actor: UserId,
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CompleteCount.
///
/// `deltas` are the reconciliation deltas the engine has already committed
/// through `adjustment_document` (both empty when nothing diverged).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteCount {
    pub actor: UserId,
    pub adjustment_document: Option<DocumentId>,
    pub deltas: Vec<StockDelta>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CountCommand {
    Start(StartCount),
    Record(RecordCount),
    Complete(CompleteCount),
    Reopen {
        actor: UserId,
        occurred_at: DateTime<Utc>,
    },
    Cancel {
        actor: UserId,
        occurred_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CountEvent {
    CountStarted {
        count_id: CountId,
        scope: CountScope,
        actor: UserId,
        occurred_at: DateTime<Utc>,
    },
    QuantityCounted {
        count_id: CountId,
        line: CountLine,
        previous: Option<i64>,
    },
    CountCompleted {
        count_id: CountId,
        actor: UserId,
        adjustment_document: Option<DocumentId>,
        deltas: Vec<StockDelta>,
        occurred_at: DateTime<Utc>,
    },
    CountReopened {
        count_id: CountId,
        actor: UserId,
        reversed_document: Option<DocumentId>,
        occurred_at: DateTime<Utc>,
    },
    CountCancelled {
        count_id: CountId,
        actor: UserId,
        occurred_at: DateTime<Utc>,
    },
}

impl Event for CountEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CountEvent::CountStarted { .. } => "inventory.count.started",
            CountEvent::QuantityCounted { .. } => "inventory.count.quantity_counted",
            CountEvent::CountCompleted { .. } => "inventory.count.completed",
            CountEvent::CountReopened { .. } => "inventory.count.reopened",
            CountEvent::CountCancelled { .. } => "inventory.count.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CountEvent::CountStarted { occurred_at, .. }
            | CountEvent::CountCompleted { occurred_at, .. }
            | CountEvent::CountReopened { occurred_at, .. }
            | CountEvent::CountCancelled { occurred_at, .. } => *occurred_at,
            CountEvent::QuantityCounted { line, .. } => line.recorded_at,
        }
    }
}

impl Aggregate for InventoryCount {
    type Command = CountCommand;
    type Event = CountEvent;
    type Error = StockError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            CountEvent::CountStarted {
                count_id,
                scope,
                actor,
                occurred_at,
            } => {
                self.id = *count_id;
                self.scope = Some(*scope);
                self.status = CountStatus::Open;
                self.started_by = Some(*actor);
                self.started_at = Some(*occurred_at);
                self.created = true;
            }
            CountEvent::QuantityCounted { line, .. } => {
                self.lines.insert(line.key(), line.clone());
            }
            CountEvent::CountCompleted {
                actor,
                adjustment_document,
                occurred_at,
                ..
            } => {
                self.status = CountStatus::Completed;
                self.adjustment_document = *adjustment_document;
                self.completed_at = Some(*occurred_at);
                self.completed_by = Some(*actor);
            }
            CountEvent::CountReopened { .. } => {
                self.status = CountStatus::Open;
                self.adjustment_document = None;
                self.completed_at = None;
                self.completed_by = None;
            }
            CountEvent::CountCancelled { occurred_at, .. } => {
                self.status = CountStatus::Cancelled;
                self.cancelled_at = Some(*occurred_at);
            }
        }

        self.updated_at = Some(event.occurred_at());
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            CountCommand::Start(cmd) => {
                if self.created {
                    return Err(DomainError::conflict("count already exists").into());
                }
                if cmd.count_id != self.id {
                    return Err(DomainError::invariant("count_id mismatch").into());
                }
                Ok(vec![CountEvent::CountStarted {
                    count_id: cmd.count_id,
                    scope: cmd.scope,
                    actor: cmd.actor,
                    occurred_at: cmd.occurred_at,
                }])
            }
            CountCommand::Record(cmd) => {
                self.ensure_status(CountStatus::Open, "record a quantity in")?;
                if cmd.quantity < 0 {
                    return Err(StockError::invalid_line(format!(
                        "counted quantity cannot be negative (got {})",
                        cmd.quantity
                    )));
                }
                let line = CountLine {
                    product_id: cmd.product_id,
                    location_id: cmd.location_id,
                    counted: cmd.quantity,
                    recorded_by: cmd.actor,
                    recorded_at: cmd.occurred_at,
                };
                Ok(vec![CountEvent::QuantityCounted {
                    count_id: self.id,
                    previous: self.counted(&line.key()),
                    line,
                }])
            }
            CountCommand::Complete(cmd) => {
                self.ensure_status(CountStatus::Open, "complete")?;
                if cmd.deltas.is_empty() != cmd.adjustment_document.is_none() {
                    return Err(DomainError::invariant(
                        "an adjustment document is required exactly when there are deltas",
                    )
                    .into());
                }
                Ok(vec![CountEvent::CountCompleted {
                    count_id: self.id,
                    actor: cmd.actor,
                    adjustment_document: cmd.adjustment_document,
                    deltas: cmd.deltas.clone(),
                    occurred_at: cmd.occurred_at,
                }])
            }
            CountCommand::Reopen { actor, occurred_at } => {
                self.ensure_status(CountStatus::Completed, "reopen")?;
                Ok(vec![CountEvent::CountReopened {
                    count_id: self.id,
                    actor: *actor,
                    reversed_document: self.adjustment_document,
                    occurred_at: *occurred_at,
                }])
            }
            CountCommand::Cancel { actor, occurred_at } => {
                self.ensure_status(CountStatus::Open, "cancel")?;
                Ok(vec![CountEvent::CountCancelled {
                    count_id: self.id,
                    actor: *actor,
                    occurred_at: *occurred_at,
                }])
            }
        }
    }
}

impl InventoryCount {
    fn ensure_status(&self, expected: CountStatus, action: &'static str) -> Result<(), StockError> {
        if !self.created {
            return Err(StockError::not_found("count", self.id));
        }
        if self.status != expected {
            return Err(StockError::transition("count", self.status, action));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wms_events::execute;

    fn open_count() -> (InventoryCount, UserId) {
        let id = CountId::new();
        let user = UserId::new();
        let mut count = InventoryCount::empty(id);
        execute(
            &mut count,
            &CountCommand::Start(StartCount {
                count_id: id,
                scope: CountScope::warehouse(WarehouseId::new()),
                actor: user,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        (count, user)
    }

    fn record(count: &mut InventoryCount, actor: UserId, key: StockKey, quantity: i64) -> Result<(), StockError> {
        execute(
            count,
            &CountCommand::Record(RecordCount {
                actor,
                product_id: key.product_id,
                location_id: key.location_id,
                quantity,
                occurred_at: Utc::now(),
            }),
        )
        .map(|_| ())
    }

    fn key() -> StockKey {
        StockKey::new(ProductId::new(), LocationId::new())
    }

    #[test]
    fn last_recorded_quantity_wins() {
        let (mut count, user) = open_count();
        let k = key();
        record(&mut count, user, k, 10).unwrap();
        record(&mut count, user, k, 12).unwrap();
        assert_eq!(count.counted(&k), Some(12));
        assert_eq!(count.lines().count(), 1);
    }

    #[test]
    fn negative_count_is_an_invalid_line() {
        let (mut count, user) = open_count();
        let err = record(&mut count, user, key(), -1).unwrap_err();
        assert!(matches!(err, StockError::InvalidLine(_)));
    }

    #[test]
    fn reconcile_skips_matching_pairs_and_expects_ledger_values() {
        let (mut count, user) = open_count();
        let same = key();
        let short = key();
        record(&mut count, user, same, 50).unwrap();
        record(&mut count, user, short, 42).unwrap();

        let deltas = count.reconcile(|_| 50);
        assert_eq!(deltas, vec![StockDelta::new(short, -8).expecting(50)]);
    }

    #[test]
    fn reconcile_uses_zero_for_missing_rows() {
        let (mut count, user) = open_count();
        let k = key();
        record(&mut count, user, k, 7).unwrap();
        assert_eq!(count.reconcile(|_| 0), vec![StockDelta::new(k, 7).expecting(0)]);
    }

    #[test]
    fn adjustment_lines_carry_signed_deltas() {
        let k = key();
        let lines = adjustment_lines(&[StockDelta::new(k, -8)]);
        assert_eq!(lines, vec![LineSpec::adjustment(k.product_id, k.location_id, -8)]);
    }

    #[test]
    fn complete_then_reopen_returns_to_open() {
        let (mut count, user) = open_count();
        let k = key();
        record(&mut count, user, k, 42).unwrap();
        let doc = DocumentId::new();
        execute(
            &mut count,
            &CountCommand::Complete(CompleteCount {
                actor: user,
                adjustment_document: Some(doc),
                deltas: vec![StockDelta::new(k, -8)],
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        assert_eq!(count.status(), CountStatus::Completed);
        assert_eq!(count.adjustment_document(), Some(doc));

        // No recording once completed.
        assert!(matches!(
            record(&mut count, user, k, 1),
            Err(StockError::InvalidTransition { .. })
        ));

        let events = execute(
            &mut count,
            &CountCommand::Reopen {
                actor: user,
                occurred_at: Utc::now(),
            },
        )
        .unwrap();
        assert!(matches!(
            events[0],
            CountEvent::CountReopened {
                reversed_document: Some(d),
                ..
            } if d == doc
        ));
        assert_eq!(count.status(), CountStatus::Open);
        assert_eq!(count.adjustment_document(), None);
        assert_eq!(count.counted(&k), Some(42));
    }

    #[test]
    fn completion_requires_a_document_exactly_when_deltas_exist() {
        let (count, user) = open_count();
        let err = count
            .handle(&CountCommand::Complete(CompleteCount {
                actor: user,
                adjustment_document: None,
                deltas: vec![StockDelta::new(key(), 1)],
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, StockError::Domain(DomainError::InvariantViolation(_))));
    }

    #[test]
    fn reopen_is_only_legal_from_completed() {
        let (count, user) = open_count();
        let err = count
            .handle(&CountCommand::Reopen {
                actor: user,
                occurred_at: Utc::now(),
            })
            .unwrap_err();
        assert_eq!(
            err,
            StockError::InvalidTransition {
                entity: "count",
                from: "OPEN".to_string(),
                action: "reopen",
            }
        );
    }

    #[test]
    fn cancelled_count_is_terminal() {
        let (mut count, user) = open_count();
        execute(
            &mut count,
            &CountCommand::Cancel {
                actor: user,
                occurred_at: Utc::now(),
            },
        )
        .unwrap();
        assert_eq!(count.status(), CountStatus::Cancelled);
        assert!(matches!(
            record(&mut count, user, key(), 1),
            Err(StockError::InvalidTransition { .. })
        ));
        assert!(matches!(
            count.handle(&CountCommand::Cancel {
                actor: user,
                occurred_at: Utc::now(),
            }),
            Err(StockError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn scope_limits_locations() {
        let wh = WarehouseId::new();
        let loc = LocationId::new();
        let scope = CountScope::location(wh, loc);
        assert!(scope.covers(wh, loc));
        assert!(!scope.covers(wh, LocationId::new()));
        assert!(!scope.covers(WarehouseId::new(), loc));
        assert!(CountScope::warehouse(wh).covers(wh, LocationId::new()));
    }
}
