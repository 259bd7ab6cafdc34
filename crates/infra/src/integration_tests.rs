//! Integration tests for the full stock pipeline.
//!
//! Tests: Engine → Document/Count aggregates → StockLedger → AuditSink → EventBus
//!
//! Verifies:
//! - Confirmed documents move stock all-or-nothing
//! - Cancellation reverses exactly what was applied
//! - Counts reconcile through adjustment documents and reopen cleanly
//! - Every ledger change leaves an audit trail that sums to the ledger
//! - Warehouse scoping and permissions are enforced

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    use proptest::prelude::*;
    use serde_json::Value as JsonValue;

    use wms_auth::{Principal, Role};
    use wms_catalog::{Location, LocationStatus, Product, Warehouse};
    use wms_core::{AggregateId, DomainError, LocationId, ProductId, UserId, WarehouseId};
    use wms_events::{EventBus, EventEnvelope, InMemoryEventBus};
    use wms_inventory::{
        CountScope, CountStatus, DocumentSnapshot, DocumentStatus, DocumentType, LineSpec, StockChange, StockDelta,
        StockError, StockKey, StockRow,
    };

    use crate::audit::{actions, AuditError, AuditFilter, AuditRecord, AuditSink, Pagination, ENTITY_STOCK_ROW};
    use crate::catalog::InMemoryCatalog;
    use crate::config::EngineConfig;
    use crate::engine::{DocumentFilter, InMemoryStockEngine, NewDocument, StockEngine, StockFilter, COUNT_AGGREGATE};
    use crate::ledger::{InMemoryStockLedger, LedgerError, StockLedger};

    type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
    type Engine<L, A> = StockEngine<L, A, Arc<InMemoryCatalog>, Bus>;

    struct Site {
        warehouse: WarehouseId,
        other_warehouse: WarehouseId,
        product: ProductId,
        a: LocationId,
        b: LocationId,
        foreign: LocationId,
    }

    fn seed(catalog: &InMemoryCatalog) -> Site {
        let site = Site {
            warehouse: WarehouseId::new(),
            other_warehouse: WarehouseId::new(),
            product: ProductId::new(),
            a: LocationId::new(),
            b: LocationId::new(),
            foreign: LocationId::new(),
        };
        catalog.upsert_warehouse(Warehouse::new(site.warehouse, "WH1", "Main").unwrap());
        catalog.upsert_warehouse(Warehouse::new(site.other_warehouse, "WH2", "Overflow").unwrap());
        catalog.upsert_product(Product::new(site.product, "SKU-1", "Widget").unwrap());
        catalog.upsert_location(Location::new(site.a, site.warehouse, "A-01-01").unwrap());
        catalog.upsert_location(Location::new(site.b, site.warehouse, "B-01-01").unwrap());
        catalog.upsert_location(Location::new(site.foreign, site.other_warehouse, "Z-01-01").unwrap());
        site
    }

    fn setup() -> (InMemoryStockEngine, Site, Principal) {
        let engine = InMemoryStockEngine::in_memory(EngineConfig::default());
        let site = seed(engine.catalog());
        (engine, site, Principal::system(UserId::new()))
    }

    fn engine_with<L, A>(ledger: L, audit: A) -> (Engine<L, A>, Site) {
        let catalog = Arc::new(InMemoryCatalog::new());
        let site = seed(&catalog);
        let engine = StockEngine::new(ledger, audit, catalog, Arc::new(InMemoryEventBus::new()), EngineConfig::default());
        (engine, site)
    }

    fn post<L, A>(
        engine: &Engine<L, A>,
        principal: &Principal,
        warehouse: WarehouseId,
        doc_type: DocumentType,
        lines: Vec<LineSpec>,
    ) -> Result<DocumentSnapshot, StockError>
    where
        L: StockLedger,
        A: AuditSink,
    {
        let doc = engine.create_document(principal, NewDocument::new(doc_type, warehouse))?;
        for spec in lines {
            engine.add_line(principal, doc.id, spec)?;
        }
        engine.confirm(principal, doc.id)
    }

    fn receive<L, A>(
        engine: &Engine<L, A>,
        principal: &Principal,
        site: &Site,
        location: LocationId,
        quantity: i64,
    ) -> DocumentSnapshot
    where
        L: StockLedger,
        A: AuditSink,
    {
        post(
            engine,
            principal,
            site.warehouse,
            DocumentType::Receipt,
            vec![LineSpec::receipt(site.product, location, quantity)],
        )
        .unwrap()
    }

    fn on_hand(engine: &InMemoryStockEngine, site: &Site, location: LocationId) -> i64 {
        engine
            .ledger()
            .quantity(&StockKey::new(site.product, location))
            .unwrap()
    }

    /// Sum of audited stock deltas per row must equal the ledger.
    fn assert_audit_matches_ledger(records: &[AuditRecord], rows: &[StockRow]) {
        for row in rows {
            let entity_id = format!("{}:{}", row.product_id, row.location_id);
            let audited: i64 = records
                .iter()
                .filter(|r| r.entity_type == ENTITY_STOCK_ROW && r.entity_id == entity_id)
                .filter_map(AuditRecord::quantity_delta)
                .sum();
            assert_eq!(audited, row.quantity, "audit trail diverges for {entity_id}");
        }
    }

    #[test]
    fn receipt_then_issue_moves_stock() {
        let (engine, site, admin) = setup();

        let receipt = receive(&engine, &admin, &site, site.a, 100);
        assert_eq!(receipt.status, DocumentStatus::Confirmed);
        assert_eq!(receipt.confirmed_by, Some(admin.user_id));

        post(
            &engine,
            &admin,
            site.warehouse,
            DocumentType::Issue,
            vec![LineSpec::issue(site.product, site.a, 30)],
        )
        .unwrap();

        assert_eq!(on_hand(&engine, &site, site.a), 70);
        assert_eq!(on_hand(&engine, &site, site.b), 0);
        assert_eq!(engine.get_quantity(&admin, site.product, site.a).unwrap(), 70);
    }

    #[test]
    fn transfer_moves_between_locations() {
        let (engine, site, admin) = setup();
        receive(&engine, &admin, &site, site.a, 10);

        post(
            &engine,
            &admin,
            site.warehouse,
            DocumentType::Transfer,
            vec![LineSpec::transfer(site.product, site.a, site.b, 10)],
        )
        .unwrap();

        assert_eq!(on_hand(&engine, &site, site.a), 0);
        assert_eq!(on_hand(&engine, &site, site.b), 10);

        let rows = engine.list_stock(&admin, &StockFilter::default()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].location_id, site.b);

        let with_empty = StockFilter {
            include_empty: true,
            ..StockFilter::default()
        };
        assert_eq!(engine.list_stock(&admin, &with_empty).unwrap().len(), 2);
    }

    #[test]
    fn insufficient_stock_rejects_the_whole_document() {
        let (engine, site, admin) = setup();
        receive(&engine, &admin, &site, site.a, 10);
        receive(&engine, &admin, &site, site.b, 10);
        let audited_before = engine.audit().len();

        let doc = engine
            .create_document(&admin, NewDocument::new(DocumentType::Issue, site.warehouse))
            .unwrap();
        engine.add_line(&admin, doc.id, LineSpec::issue(site.product, site.a, 5)).unwrap();
        engine.add_line(&admin, doc.id, LineSpec::issue(site.product, site.b, 20)).unwrap();
        let audited_draft = engine.audit().len();
        assert!(audited_draft > audited_before);

        let err = engine.confirm(&admin, doc.id).unwrap_err();
        assert!(matches!(
            err,
            StockError::InsufficientStock {
                requested: 20,
                available: 10,
                ..
            }
        ));

        assert_eq!(on_hand(&engine, &site, site.a), 10);
        assert_eq!(on_hand(&engine, &site, site.b), 10);
        assert_eq!(engine.get_document(&admin, doc.id).unwrap().status, DocumentStatus::Draft);
        assert_eq!(engine.audit().len(), audited_draft);
    }

    #[test]
    fn confirmed_documents_are_immutable() {
        let (engine, site, admin) = setup();
        let receipt = receive(&engine, &admin, &site, site.a, 5);

        let err = engine.confirm(&admin, receipt.id).unwrap_err();
        assert!(matches!(err, StockError::InvalidTransition { ref from, .. } if from == "CONFIRMED"));

        let err = engine
            .add_line(&admin, receipt.id, LineSpec::receipt(site.product, site.a, 1))
            .unwrap_err();
        assert!(matches!(err, StockError::InvalidTransition { .. }));
        assert_eq!(on_hand(&engine, &site, site.a), 5);
    }

    #[test]
    fn transfer_onto_itself_is_rejected() {
        let (engine, site, admin) = setup();
        receive(&engine, &admin, &site, site.a, 10);
        let doc = engine
            .create_document(&admin, NewDocument::new(DocumentType::Transfer, site.warehouse))
            .unwrap();

        let err = engine
            .add_line(&admin, doc.id, LineSpec::transfer(site.product, site.a, site.a, 4))
            .unwrap_err();
        assert!(matches!(err, StockError::InvalidLine(_)));
        assert!(matches!(
            engine.confirm(&admin, doc.id).unwrap_err(),
            StockError::InvalidLine(_)
        ));
        assert_eq!(on_hand(&engine, &site, site.a), 10);
    }

    #[test]
    fn lines_referencing_foreign_locations_are_rejected() {
        let (engine, site, admin) = setup();
        let doc = engine
            .create_document(&admin, NewDocument::new(DocumentType::Receipt, site.warehouse))
            .unwrap();

        let err = engine
            .add_line(&admin, doc.id, LineSpec::receipt(site.product, site.foreign, 3))
            .unwrap_err();
        assert!(matches!(err, StockError::InvalidLine(_)));
        assert!(engine.get_document(&admin, doc.id).unwrap().lines.is_empty());
    }

    #[test]
    fn blocked_location_fails_confirmation() {
        let (engine, site, admin) = setup();
        let doc = engine
            .create_document(&admin, NewDocument::new(DocumentType::Receipt, site.warehouse))
            .unwrap();
        engine
            .add_line(&admin, doc.id, LineSpec::receipt(site.product, site.a, 3))
            .unwrap();

        let mut blocked = Location::new(site.a, site.warehouse, "A-01-01").unwrap();
        blocked.set_status(LocationStatus::Blocked);
        engine.catalog().upsert_location(blocked);

        let err = engine.confirm(&admin, doc.id).unwrap_err();
        assert!(matches!(err, StockError::InvalidLine(_)));
        assert_eq!(on_hand(&engine, &site, site.a), 0);
    }

    #[test]
    fn inactive_warehouse_rejects_new_documents() {
        let (engine, site, admin) = setup();
        let mut warehouse = Warehouse::new(site.warehouse, "WH1", "Main").unwrap();
        warehouse.deactivate();
        engine.catalog().upsert_warehouse(warehouse);

        let err = engine
            .create_document(&admin, NewDocument::new(DocumentType::Receipt, site.warehouse))
            .unwrap_err();
        assert!(matches!(err, StockError::Domain(DomainError::Validation(_))));
    }

    #[test]
    fn unnegatable_adjustment_is_rejected_and_the_document_stays_usable() {
        let (engine, site, admin) = setup();
        receive(&engine, &admin, &site, site.a, 10);
        let doc = engine
            .create_document(
                &admin,
                NewDocument::new(DocumentType::Adjustment, site.warehouse).with_notes("shrinkage"),
            )
            .unwrap();
        assert_eq!(doc.notes.as_deref(), Some("shrinkage"));

        let err = engine
            .add_line(&admin, doc.id, LineSpec::adjustment(site.product, site.a, i64::MIN))
            .unwrap_err();
        assert!(matches!(err, StockError::InvalidLine(_)));

        engine
            .add_line(&admin, doc.id, LineSpec::adjustment(site.product, site.a, -3))
            .unwrap();
        let err = engine
            .edit_line(&admin, doc.id, 1, LineSpec::adjustment(site.product, site.a, i64::MIN))
            .unwrap_err();
        assert!(matches!(err, StockError::InvalidLine(_)));

        let confirmed = engine.confirm(&admin, doc.id).unwrap();
        assert_eq!(confirmed.status, DocumentStatus::Confirmed);
        assert_eq!(on_hand(&engine, &site, site.a), 7);
    }

    #[test]
    fn overflowing_net_quantity_rejects_confirmation() {
        let (engine, site, admin) = setup();
        let doc = engine
            .create_document(&admin, NewDocument::new(DocumentType::Receipt, site.warehouse))
            .unwrap();
        engine
            .add_line(&admin, doc.id, LineSpec::receipt(site.product, site.a, i64::MAX))
            .unwrap();
        engine
            .add_line(&admin, doc.id, LineSpec::receipt(site.product, site.a, i64::MAX))
            .unwrap();

        let err = engine.confirm(&admin, doc.id).unwrap_err();
        assert!(matches!(err, StockError::InvalidLine(_)));
        assert_eq!(on_hand(&engine, &site, site.a), 0);
        assert_eq!(engine.get_document(&admin, doc.id).unwrap().status, DocumentStatus::Draft);

        engine.remove_line(&admin, doc.id, 2).unwrap();
        engine.confirm(&admin, doc.id).unwrap();
        assert_eq!(on_hand(&engine, &site, site.a), i64::MAX);

        let err = post(
            &engine,
            &admin,
            site.warehouse,
            DocumentType::Receipt,
            vec![LineSpec::receipt(site.product, site.a, 1)],
        )
        .unwrap_err();
        assert!(matches!(err, StockError::InvalidLine(_)));
        assert_eq!(on_hand(&engine, &site, site.a), i64::MAX);
    }

    #[test]
    fn in_memory_engine_uses_the_configured_stripes() {
        let config = EngineConfig {
            ledger_stripes: 4,
            ..EngineConfig::default()
        };
        let engine = InMemoryStockEngine::in_memory(config);
        assert_eq!(engine.ledger().stripe_count(), 4);
    }

    #[test]
    fn cancelling_a_confirmed_receipt_restores_stock() {
        let (engine, site, admin) = setup();
        let receipt = receive(&engine, &admin, &site, site.a, 12);

        let cancelled = engine
            .cancel(&admin, receipt.id, Some("wrong supplier".to_string()))
            .unwrap();
        assert_eq!(cancelled.status, DocumentStatus::Cancelled);
        assert_eq!(cancelled.cancel_reason.as_deref(), Some("wrong supplier"));
        assert_eq!(on_hand(&engine, &site, site.a), 0);

        let err = engine.cancel(&admin, receipt.id, None).unwrap_err();
        assert!(matches!(err, StockError::InvalidTransition { .. }));
    }

    #[test]
    fn cancel_conflicts_when_stock_was_consumed() {
        let (engine, site, admin) = setup();
        let receipt = receive(&engine, &admin, &site, site.a, 10);
        post(
            &engine,
            &admin,
            site.warehouse,
            DocumentType::Issue,
            vec![LineSpec::issue(site.product, site.a, 6)],
        )
        .unwrap();

        let err = engine.cancel(&admin, receipt.id, None).unwrap_err();
        assert!(matches!(
            err,
            StockError::CancellationConflict {
                requested: 10,
                available: 4,
                ..
            }
        ));
        assert_eq!(on_hand(&engine, &site, site.a), 4);
        assert_eq!(
            engine.get_document(&admin, receipt.id).unwrap().status,
            DocumentStatus::Confirmed
        );
    }

    #[test]
    fn cancelling_a_draft_leaves_the_ledger_alone() {
        let (engine, site, admin) = setup();
        let doc = engine
            .create_document(&admin, NewDocument::new(DocumentType::Issue, site.warehouse))
            .unwrap();
        engine.add_line(&admin, doc.id, LineSpec::issue(site.product, site.a, 4)).unwrap();

        let cancelled = engine.cancel(&admin, doc.id, None).unwrap();
        assert_eq!(cancelled.status, DocumentStatus::Cancelled);
        assert!(engine.ledger().rows(None, None).unwrap().is_empty());
    }

    #[test]
    fn count_divergence_posts_an_adjustment() {
        let (engine, site, admin) = setup();
        receive(&engine, &admin, &site, site.a, 50);

        let count = engine
            .start_count(&admin, CountScope::location(site.warehouse, site.a))
            .unwrap();
        engine.record_count(&admin, count.id, site.product, site.a, 40).unwrap();
        // last write wins
        engine.record_count(&admin, count.id, site.product, site.a, 42).unwrap();

        let completed = engine.complete_count(&admin, count.id).unwrap();
        assert_eq!(completed.status, CountStatus::Completed);
        assert_eq!(on_hand(&engine, &site, site.a), 42);

        let document_id = completed.adjustment_document.unwrap();
        let adjustment = engine.get_document(&admin, document_id).unwrap();
        assert_eq!(adjustment.doc_type, DocumentType::Adjustment);
        assert_eq!(adjustment.status, DocumentStatus::Confirmed);
        assert_eq!(adjustment.lines.len(), 1);
        assert_eq!(adjustment.lines[0].spec.quantity, -8);
    }

    #[test]
    fn matching_count_completes_without_a_document() {
        let (engine, site, admin) = setup();
        receive(&engine, &admin, &site, site.a, 50);
        let documents_before = engine.list_documents(&admin, &DocumentFilter::default()).unwrap().len();

        let count = engine.start_count(&admin, CountScope::warehouse(site.warehouse)).unwrap();
        engine.record_count(&admin, count.id, site.product, site.a, 50).unwrap();
        let completed = engine.complete_count(&admin, count.id).unwrap();

        assert_eq!(completed.status, CountStatus::Completed);
        assert!(completed.adjustment_document.is_none());
        assert_eq!(on_hand(&engine, &site, site.a), 50);
        assert_eq!(
            engine.list_documents(&admin, &DocumentFilter::default()).unwrap().len(),
            documents_before
        );
    }

    #[test]
    fn reopening_a_count_unwinds_its_adjustment() {
        let (engine, site, admin) = setup();
        receive(&engine, &admin, &site, site.a, 50);
        receive(&engine, &admin, &site, site.b, 5);

        let count = engine.start_count(&admin, CountScope::warehouse(site.warehouse)).unwrap();
        engine.record_count(&admin, count.id, site.product, site.a, 42).unwrap();
        engine.record_count(&admin, count.id, site.product, site.b, 9).unwrap();
        let completed = engine.complete_count(&admin, count.id).unwrap();
        assert_eq!(on_hand(&engine, &site, site.a), 42);
        assert_eq!(on_hand(&engine, &site, site.b), 9);

        let reopened = engine.reopen_count(&admin, count.id).unwrap();
        assert_eq!(reopened.status, CountStatus::Open);
        assert!(reopened.adjustment_document.is_none());
        assert_eq!(on_hand(&engine, &site, site.a), 50);
        assert_eq!(on_hand(&engine, &site, site.b), 5);

        let adjustment = engine
            .get_document(&admin, completed.adjustment_document.unwrap())
            .unwrap();
        assert_eq!(adjustment.status, DocumentStatus::Cancelled);

        // Recounting after reopen reconciles against the restored ledger.
        engine.complete_count(&admin, count.id).unwrap();
        assert_eq!(on_hand(&engine, &site, site.a), 42);
        assert_eq!(on_hand(&engine, &site, site.b), 9);
    }

    #[test]
    fn reopen_fails_when_adjusted_stock_was_consumed() {
        let (engine, site, admin) = setup();
        receive(&engine, &admin, &site, site.a, 5);

        let count = engine.start_count(&admin, CountScope::warehouse(site.warehouse)).unwrap();
        engine.record_count(&admin, count.id, site.product, site.a, 20).unwrap();
        engine.complete_count(&admin, count.id).unwrap();
        assert_eq!(on_hand(&engine, &site, site.a), 20);

        post(
            &engine,
            &admin,
            site.warehouse,
            DocumentType::Issue,
            vec![LineSpec::issue(site.product, site.a, 18)],
        )
        .unwrap();

        let err = engine.reopen_count(&admin, count.id).unwrap_err();
        assert!(matches!(err, StockError::CancellationConflict { .. }));
        assert_eq!(engine.get_count(&admin, count.id).unwrap().status, CountStatus::Completed);
        assert_eq!(on_hand(&engine, &site, site.a), 2);
    }

    #[test]
    fn counts_reject_out_of_scope_and_terminal_operations() {
        let (engine, site, admin) = setup();
        let count = engine
            .start_count(&admin, CountScope::location(site.warehouse, site.a))
            .unwrap();

        let err = engine
            .record_count(&admin, count.id, site.product, site.b, 1)
            .unwrap_err();
        assert!(matches!(err, StockError::InvalidLine(_)));

        let err = engine
            .record_count(&admin, count.id, site.product, site.a, -1)
            .unwrap_err();
        assert!(matches!(err, StockError::InvalidLine(_)));

        let cancelled = engine.cancel_count(&admin, count.id).unwrap();
        assert_eq!(cancelled.status, CountStatus::Cancelled);

        let err = engine
            .record_count(&admin, count.id, site.product, site.a, 1)
            .unwrap_err();
        assert!(matches!(err, StockError::InvalidTransition { .. }));
        let err = engine.complete_count(&admin, count.id).unwrap_err();
        assert!(matches!(err, StockError::InvalidTransition { .. }));
    }

    #[test]
    fn count_scoped_to_a_foreign_location_is_rejected() {
        let (engine, site, admin) = setup();
        let err = engine
            .start_count(&admin, CountScope::location(site.warehouse, site.foreign))
            .unwrap_err();
        assert!(matches!(err, StockError::InvalidLine(_)));
    }

    /// Moves the watched row once, right before the first guarded batch.
    struct SkewingLedger {
        inner: InMemoryStockLedger,
        key: StockKey,
        skewed: AtomicBool,
    }

    impl StockLedger for SkewingLedger {
        fn quantity(&self, key: &StockKey) -> Result<i64, LedgerError> {
            self.inner.quantity(key)
        }

        fn apply(&self, deltas: &[StockDelta]) -> Result<Vec<StockChange>, LedgerError> {
            let guarded = deltas.iter().any(|d| d.expected_before.is_some());
            if guarded && !self.skewed.swap(true, Ordering::SeqCst) {
                self.inner.apply(&[StockDelta::new(self.key, 5)])?;
            }
            self.inner.apply(deltas)
        }

        fn rows(&self, product_id: Option<ProductId>, location_id: Option<LocationId>) -> Result<Vec<StockRow>, LedgerError> {
            self.inner.rows(product_id, location_id)
        }
    }

    #[test]
    fn count_completion_retries_when_the_ledger_moves() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let site = seed(&catalog);
        let key = StockKey::new(site.product, site.a);
        let ledger = Arc::new(SkewingLedger {
            inner: InMemoryStockLedger::new(),
            key,
            skewed: AtomicBool::new(false),
        });
        let engine = StockEngine::new(
            ledger.clone(),
            Arc::new(crate::audit::InMemoryAuditLog::new()),
            catalog,
            Arc::new(InMemoryEventBus::<EventEnvelope<JsonValue>>::new()),
            EngineConfig::default(),
        );
        let admin = Principal::system(UserId::new());
        receive(&engine, &admin, &site, site.a, 50);

        let count = engine.start_count(&admin, CountScope::warehouse(site.warehouse)).unwrap();
        engine.record_count(&admin, count.id, site.product, site.a, 42).unwrap();
        let completed = engine.complete_count(&admin, count.id).unwrap();

        assert_eq!(completed.status, CountStatus::Completed);
        assert_eq!(ledger.quantity(&key).unwrap(), 42);
        let adjustment = engine
            .get_document(&admin, completed.adjustment_document.unwrap())
            .unwrap();
        assert_eq!(adjustment.lines[0].spec.quantity, -13);
    }

    #[test]
    fn permissions_and_warehouse_scope_are_enforced() {
        let (engine, site, admin) = setup();
        let operator = Principal::new(UserId::new(), vec![Role::OPERATOR]);
        let outsider = Principal::new(UserId::new(), vec![Role::MANAGER]).restricted_to([site.other_warehouse]);

        let doc = engine
            .create_document(&operator, NewDocument::new(DocumentType::Receipt, site.warehouse))
            .unwrap();
        engine
            .add_line(&operator, doc.id, LineSpec::receipt(site.product, site.a, 3))
            .unwrap();

        let err = engine.confirm(&operator, doc.id).unwrap_err();
        assert!(matches!(err, StockError::Forbidden(_)));
        let err = engine.confirm(&outsider, doc.id).unwrap_err();
        assert!(matches!(err, StockError::Forbidden(_)));
        assert_eq!(on_hand(&engine, &site, site.a), 0);

        let err = engine
            .create_document(&outsider, NewDocument::new(DocumentType::Receipt, site.warehouse))
            .unwrap_err();
        assert!(matches!(err, StockError::Forbidden(_)));

        assert!(engine
            .list_documents(&outsider, &DocumentFilter::default())
            .unwrap()
            .is_empty());
        assert_eq!(engine.list_documents(&admin, &DocumentFilter::default()).unwrap().len(), 1);

        engine.confirm(&admin, doc.id).unwrap();
        assert!(engine.list_stock(&outsider, &StockFilter::default()).unwrap().is_empty());
        let err = engine.get_quantity(&outsider, site.product, site.a).unwrap_err();
        assert!(matches!(err, StockError::Forbidden(_)));
    }

    #[test]
    fn audit_queries_require_scope() {
        let (engine, site, admin) = setup();
        receive(&engine, &admin, &site, site.a, 7);

        let auditor = Principal::new(UserId::new(), vec![Role::AUDITOR]);
        let page = engine
            .query_audit(&auditor, &AuditFilter::default(), Pagination::default())
            .unwrap();
        assert_eq!(page.total as usize, engine.audit().len());

        let stock_only = AuditFilter {
            action: Some(actions::STOCK_CHANGED.to_string()),
            ..AuditFilter::default()
        };
        let page = engine.query_audit(&auditor, &stock_only, Pagination::default()).unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].quantity_delta(), Some(7));

        let scoped = auditor.clone().restricted_to([site.warehouse]);
        let err = engine
            .query_audit(&scoped, &AuditFilter::default(), Pagination::default())
            .unwrap_err();
        assert!(matches!(err, StockError::Forbidden(_)));
        let in_scope = AuditFilter {
            warehouse_id: Some(site.warehouse),
            ..AuditFilter::default()
        };
        assert!(engine.query_audit(&scoped, &in_scope, Pagination::default()).is_ok());

        let viewer = Principal::new(UserId::new(), vec![Role::VIEWER]);
        let err = engine
            .query_audit(&viewer, &AuditFilter::default(), Pagination::default())
            .unwrap_err();
        assert!(matches!(err, StockError::Forbidden(_)));
    }

    #[test]
    fn unknown_documents_are_not_found() {
        let (engine, _site, admin) = setup();
        let err = engine.confirm(&admin, wms_core::DocumentId::new()).unwrap_err();
        assert!(matches!(err, StockError::NotFound { entity: "document", .. }));
    }

    struct FailingSink;

    impl AuditSink for FailingSink {
        fn record(&self, _records: &[AuditRecord]) -> Result<(), AuditError> {
            Err(AuditError::Storage("disk full".to_string()))
        }
    }

    #[test]
    fn audit_failure_keeps_the_committed_change() {
        let (engine, site) = engine_with(Arc::new(InMemoryStockLedger::new()), FailingSink);
        let admin = Principal::system(UserId::new());

        let err = engine
            .create_document(&admin, NewDocument::new(DocumentType::Receipt, site.warehouse))
            .unwrap_err();
        assert!(matches!(err, StockError::AuditWriteFailed { failed: 1, .. }));

        let doc = engine
            .list_documents(&admin, &DocumentFilter::default())
            .unwrap()
            .pop()
            .unwrap();
        let _ = engine.add_line(&admin, doc.id, LineSpec::receipt(site.product, site.a, 9));
        let err = engine.confirm(&admin, doc.id).unwrap_err();
        // one stock row plus the transition
        assert!(matches!(err, StockError::AuditWriteFailed { failed: 2, .. }));

        assert_eq!(
            engine.ledger().quantity(&StockKey::new(site.product, site.a)).unwrap(),
            9
        );
        assert_eq!(engine.get_document(&admin, doc.id).unwrap().status, DocumentStatus::Confirmed);
    }

    #[test]
    fn committed_transitions_are_published() {
        let (engine, site, admin) = setup();
        let subscription = engine.bus().subscribe();

        let receipt = receive(&engine, &admin, &site, site.a, 3);

        let envelopes = subscription.drain();
        let types: Vec<&str> = envelopes.iter().map(|e| e.event_type()).collect();
        assert_eq!(
            types,
            vec![
                "inventory.document.created",
                "inventory.document.line_added",
                "inventory.document.confirmed",
            ]
        );
        let sequences: Vec<u64> = envelopes.iter().map(|e| e.sequence_number()).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert!(envelopes.iter().all(|e| e.warehouse_id() == site.warehouse));
        assert!(envelopes.iter().all(|e| e.aggregate_id() == AggregateId::from(receipt.id)));

        // rejected transitions publish nothing
        let _ = engine.confirm(&admin, receipt.id);
        assert!(subscription.drain().is_empty());

        let counts = engine.bus().subscribe_to(COUNT_AGGREGATE);
        let count = engine
            .start_count(&admin, CountScope::location(site.warehouse, site.a))
            .unwrap();
        engine.record_count(&admin, count.id, site.product, site.a, 3).unwrap();
        engine.complete_count(&admin, count.id).unwrap();

        let count_types: Vec<String> = counts.drain().iter().map(|e| e.event_type().to_string()).collect();
        assert_eq!(count_types.len(), 3);
        assert!(count_types.iter().all(|t| t.starts_with("inventory.count.")));
    }

    #[test]
    fn concurrent_issues_never_oversell() {
        let (engine, site, admin) = setup();
        receive(&engine, &admin, &site, site.a, 100);
        let engine = Arc::new(engine);
        let site = Arc::new(site);

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let engine = engine.clone();
                let site = site.clone();
                let admin = admin.clone();
                thread::spawn(move || {
                    let mut confirmed = 0;
                    for _ in 0..20 {
                        let result = post(
                            engine.as_ref(),
                            &admin,
                            site.warehouse,
                            DocumentType::Issue,
                            vec![LineSpec::issue(site.product, site.a, 1)],
                        );
                        match result {
                            Ok(_) => confirmed += 1,
                            Err(StockError::InsufficientStock { .. }) => {}
                            Err(other) => panic!("unexpected error: {other}"),
                        }
                    }
                    confirmed
                })
            })
            .collect();

        let confirmed: i64 = workers.into_iter().map(|w| w.join().unwrap()).sum();
        assert_eq!(confirmed, 100);
        assert_eq!(on_hand(&engine, &site, site.a), 0);
        assert_audit_matches_ledger(&engine.audit().all(), &engine.ledger().rows(None, None).unwrap());
    }

    #[derive(Debug, Clone)]
    enum Step {
        Receive(bool, i64),
        Issue(bool, i64),
        Transfer(bool, i64),
        Count(bool, i64),
        CancelLast,
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            (any::<bool>(), 1i64..50).prop_map(|(at_a, q)| Step::Receive(at_a, q)),
            (any::<bool>(), 1i64..50).prop_map(|(at_a, q)| Step::Issue(at_a, q)),
            (any::<bool>(), 1i64..50).prop_map(|(at_a, q)| Step::Transfer(at_a, q)),
            (any::<bool>(), 0i64..80).prop_map(|(at_a, q)| Step::Count(at_a, q)),
            Just(Step::CancelLast),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn ledger_stays_non_negative_and_audited(steps in prop::collection::vec(step(), 1..25)) {
            let (engine, site, admin) = setup();
            let pick = |at_a: bool| if at_a { site.a } else { site.b };
            let mut last = None;

            for step in steps {
                let result = match step {
                    Step::Receive(at_a, q) => post(
                        &engine, &admin, site.warehouse, DocumentType::Receipt,
                        vec![LineSpec::receipt(site.product, pick(at_a), q)],
                    ).map(|d| last = Some(d.id)),
                    Step::Issue(at_a, q) => post(
                        &engine, &admin, site.warehouse, DocumentType::Issue,
                        vec![LineSpec::issue(site.product, pick(at_a), q)],
                    ).map(|d| last = Some(d.id)),
                    Step::Transfer(at_a, q) => post(
                        &engine, &admin, site.warehouse, DocumentType::Transfer,
                        vec![LineSpec::transfer(site.product, pick(at_a), pick(!at_a), q)],
                    ).map(|d| last = Some(d.id)),
                    Step::Count(at_a, q) => engine
                        .start_count(&admin, CountScope::warehouse(site.warehouse))
                        .and_then(|c| {
                            engine.record_count(&admin, c.id, site.product, pick(at_a), q)?;
                            engine.complete_count(&admin, c.id)
                        })
                        .map(|_| ()),
                    Step::CancelLast => match last.take() {
                        Some(id) => engine.cancel(&admin, id, None).map(|_| ()),
                        None => Ok(()),
                    },
                };
                match result {
                    Ok(())
                    | Err(StockError::InsufficientStock { .. })
                    | Err(StockError::CancellationConflict { .. }) => {}
                    Err(other) => prop_assert!(false, "unexpected error: {other}"),
                }
            }

            let rows = engine.ledger().rows(None, None).unwrap();
            prop_assert!(rows.iter().all(|r| r.quantity >= 0));
            assert_audit_matches_ledger(&engine.audit().all(), &rows);
        }
    }
}
