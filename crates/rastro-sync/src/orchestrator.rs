//! Sequential sync loop.
//!
//! One order at a time, paced, with every per-order failure caught and
//! counted: carriers rate-limit aggressively and a batch must survive any
//! single bad order, bad adapter, or store hiccup.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use rastro_carriers::{DispatchOutcome, DispatchTracking, TrackQuery};
use rastro_tracking::reconcile::reconcile;

use crate::store::{OrderSelection, OrderStore, StoreError, TrackableOrder};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Delay between consecutive orders.
    #[serde(default = "default_pace")]
    pub pace: Duration,
}

fn default_pace() -> Duration {
    Duration::from_millis(500)
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            pace: default_pace(),
        }
    }
}

impl SyncConfig {
    /// No pacing; tests use this.
    pub fn unpaced() -> Self {
        Self {
            pace: Duration::ZERO,
        }
    }
}

/// Outcome counters for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Orders tracked and persisted.
    pub updated: usize,
    /// Orders that failed (adapter or store); the batch continued past them.
    pub errored: usize,
    /// Orders whose route was skipped before any carrier call.
    pub skipped: usize,
    pub total: usize,
}

pub struct SyncOrchestrator {
    store: Arc<dyn OrderStore>,
    dispatcher: Arc<dyn DispatchTracking>,
    config: SyncConfig,
}

impl SyncOrchestrator {
    pub fn new(
        store: Arc<dyn OrderStore>,
        dispatcher: Arc<dyn DispatchTracking>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            dispatcher,
            config,
        }
    }

    /// Track every active order and persist whatever changed.
    ///
    /// Fails only when the initial store query fails; everything after is
    /// per-order and isolated.
    #[instrument(skip(self))]
    pub async fn run_sync(&self) -> Result<SyncReport, StoreError> {
        let orders = self.store.find_trackable(OrderSelection::ActiveTracking).await?;
        if orders.is_empty() {
            info!("no trackable orders");
            return Ok(SyncReport::default());
        }
        self.process(orders, false).await
    }

    /// Fill missing ship/ETA dates on orders that lack them. Same pipeline,
    /// restricted to date mutations, skipping systems that never produce
    /// dates.
    #[instrument(skip(self))]
    pub async fn run_backfill(&self) -> Result<SyncReport, StoreError> {
        let orders = self.store.find_trackable(OrderSelection::MissingDates).await?;
        if orders.is_empty() {
            info!("no orders missing dates");
            return Ok(SyncReport::default());
        }
        self.process(orders, true).await
    }

    async fn process(
        &self,
        orders: Vec<TrackableOrder>,
        dates_only: bool,
    ) -> Result<SyncReport, StoreError> {
        let mut report = SyncReport {
            total: orders.len(),
            ..SyncReport::default()
        };
        let last_index = orders.len() - 1;

        for (index, order) in orders.into_iter().enumerate() {
            if dates_only && !self.dispatcher.supports_date_backfill(order.route.system) {
                report.skipped += 1;
            } else {
                match self.process_one(&order, dates_only).await {
                    Ok(Processed::Updated) => report.updated += 1,
                    Ok(Processed::Skipped) => report.skipped += 1,
                    Err(e) => {
                        error!(
                            order = %order.order_number,
                            system = %order.route.system,
                            error = %e,
                            "order sync failed"
                        );
                        report.errored += 1;
                    }
                }
            }

            // Pace between orders, not after the last one.
            if index < last_index && !self.config.pace.is_zero() {
                tokio::time::sleep(self.config.pace).await;
            }
        }

        info!(
            updated = report.updated,
            errored = report.errored,
            skipped = report.skipped,
            total = report.total,
            "sync batch finished"
        );
        Ok(report)
    }

    async fn process_one(
        &self,
        order: &TrackableOrder,
        dates_only: bool,
    ) -> Result<Processed, OrderError> {
        let query = TrackQuery::new(&order.sender_document, &order.invoice_number)
            .with_lookup_side(order.lookup_side);
        let query = match &order.recipient_document {
            Some(document) => query.with_recipient(document),
            None => query,
        };

        let result = match self.dispatcher.track(&order.route, &query).await? {
            DispatchOutcome::Tracked(result) => result,
            DispatchOutcome::Skipped(reason) => {
                warn!(order = %order.order_number, reason = %reason, "order skipped");
                return Ok(Processed::Skipped);
            }
        };

        let mut mutation = reconcile(&order.snapshot, &result, Utc::now());
        if dates_only {
            mutation = mutation.retain_dates_only();
        }

        // Mutation first. A history record written before a failed apply
        // would survive alone, and the next run would append it again.
        self.store.apply(&order.id, &mutation).await?;
        if let Some(change) = &mutation.status_change {
            self.store.append_status_history(&order.id, change).await?;
        }

        Ok(Processed::Updated)
    }
}

enum Processed {
    Updated,
    Skipped,
}

/// Per-order failure: either side of the pipeline.
#[derive(Debug, thiserror::Error)]
enum OrderError {
    #[error(transparent)]
    Carrier(#[from] rastro_tracking::CarrierError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    use rastro_carriers::{CarrierRoute, LookupSide, SkipReason, TrackingSystem};
    use rastro_tracking::{
        CarrierError, CarrierResult, MutationSet, OrderSnapshot, OrderStatus, StatusChange,
        TrackingResult,
    };

    #[derive(Default)]
    struct MemoryStore {
        orders: Mutex<Vec<TrackableOrder>>,
        applied: Mutex<HashMap<String, Vec<MutationSet>>>,
        history: Mutex<Vec<(String, StatusChange)>>,
        fail_apply_for: Option<String>,
    }

    #[async_trait]
    impl OrderStore for MemoryStore {
        async fn find_trackable(
            &self,
            _selection: OrderSelection,
        ) -> Result<Vec<TrackableOrder>, StoreError> {
            Ok(self.orders.lock().unwrap().clone())
        }

        async fn apply(&self, order_id: &str, mutation: &MutationSet) -> Result<(), StoreError> {
            if self.fail_apply_for.as_deref() == Some(order_id) {
                return Err(StoreError::backend("disk on fire"));
            }
            self.applied
                .lock()
                .unwrap()
                .entry(order_id.to_string())
                .or_default()
                .push(mutation.clone());
            Ok(())
        }

        async fn append_status_history(
            &self,
            order_id: &str,
            change: &StatusChange,
        ) -> Result<(), StoreError> {
            self.history
                .lock()
                .unwrap()
                .push((order_id.to_string(), change.clone()));
            Ok(())
        }
    }

    /// Scripted dispatcher: result per invoice number.
    struct FakeDispatcher {
        results: HashMap<String, TrackingResult>,
        fail_invoices: Vec<String>,
        skip_invoices: Vec<String>,
    }

    impl FakeDispatcher {
        fn new() -> Self {
            Self {
                results: HashMap::new(),
                fail_invoices: vec![],
                skip_invoices: vec![],
            }
        }
    }

    #[async_trait]
    impl DispatchTracking for FakeDispatcher {
        async fn track(
            &self,
            _route: &CarrierRoute,
            query: &TrackQuery,
        ) -> CarrierResult<DispatchOutcome> {
            let invoice = query.invoice();
            if self.fail_invoices.contains(&invoice) {
                return Err(CarrierError::http(500, "fake"));
            }
            if self.skip_invoices.contains(&invoice) {
                return Ok(DispatchOutcome::Skipped(SkipReason::NoIntegration));
            }
            Ok(DispatchOutcome::Tracked(
                self.results.get(&invoice).cloned().unwrap_or_default(),
            ))
        }

        fn supports_date_backfill(&self, system: TrackingSystem) -> bool {
            !matches!(
                system,
                TrackingSystem::Braspress | TrackingSystem::Portal | TrackingSystem::None
            )
        }
    }

    fn order(id: &str, invoice: &str, system: TrackingSystem) -> TrackableOrder {
        TrackableOrder {
            id: id.to_string(),
            order_number: format!("PED-{id}"),
            sender_document: "47.715.256/0001-49".to_string(),
            invoice_number: invoice.to_string(),
            recipient_document: None,
            lookup_side: LookupSide::Sender,
            route: CarrierRoute::new(system),
            snapshot: OrderSnapshot::new(OrderStatus::Pending),
        }
    }

    fn delivered_result() -> TrackingResult {
        TrackingResult {
            status: Some(OrderStatus::Delivered),
            last_event: Some("Mercadoria entregue".to_string()),
            ..TrackingResult::default()
        }
    }

    fn orchestrator(store: MemoryStore, dispatcher: FakeDispatcher) -> SyncOrchestrator {
        SyncOrchestrator::new(Arc::new(store), Arc::new(dispatcher), SyncConfig::unpaced())
    }

    #[tokio::test]
    async fn empty_store_short_circuits() {
        let orch = orchestrator(MemoryStore::default(), FakeDispatcher::new());
        let report = orch.run_sync().await.unwrap();
        assert_eq!(report, SyncReport::default());
    }

    #[tokio::test]
    async fn per_order_errors_do_not_abort_the_batch() {
        let store = MemoryStore {
            orders: Mutex::new(vec![
                order("a", "1", TrackingSystem::Ssw),
                order("b", "2", TrackingSystem::Ssw),
                order("c", "3", TrackingSystem::Ssw),
            ]),
            ..MemoryStore::default()
        };
        let mut dispatcher = FakeDispatcher::new();
        dispatcher.results.insert("1".to_string(), delivered_result());
        dispatcher.fail_invoices.push("2".to_string());
        dispatcher.results.insert("3".to_string(), delivered_result());

        let report = orchestrator(store, dispatcher).run_sync().await.unwrap();
        assert_eq!(report.updated, 2);
        assert_eq!(report.errored, 1);
        assert_eq!(report.total, 3);
    }

    #[test]
    fn config_deserializes_with_default_pace() {
        let config: SyncConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.pace, Duration::from_millis(500));

        let config: SyncConfig =
            serde_json::from_value(serde_json::json!({ "pace": { "secs": 2, "nanos": 0 } }))
                .unwrap();
        assert_eq!(config.pace, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn store_failures_count_as_errors() {
        let store = MemoryStore {
            orders: Mutex::new(vec![
                order("a", "1", TrackingSystem::Ssw),
                order("b", "2", TrackingSystem::Ssw),
            ]),
            fail_apply_for: Some("a".to_string()),
            ..MemoryStore::default()
        };
        let mut dispatcher = FakeDispatcher::new();
        dispatcher.results.insert("1".to_string(), delivered_result());
        dispatcher.results.insert("2".to_string(), delivered_result());

        let report = orchestrator(store, dispatcher).run_sync().await.unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.errored, 1);
    }

    #[tokio::test]
    async fn failed_apply_leaves_no_history_record() {
        let store = MemoryStore {
            orders: Mutex::new(vec![order("a", "1", TrackingSystem::Ssw)]),
            fail_apply_for: Some("a".to_string()),
            ..MemoryStore::default()
        };
        let mut dispatcher = FakeDispatcher::new();
        dispatcher.results.insert("1".to_string(), delivered_result());

        let store_ref = Arc::new(store);
        let orch = SyncOrchestrator::new(
            store_ref.clone(),
            Arc::new(dispatcher),
            SyncConfig::unpaced(),
        );
        let report = orch.run_sync().await.unwrap();
        assert_eq!(report.errored, 1);

        // The status transition was not persisted, so no history either:
        // the next run must re-detect it as a fresh transition.
        assert!(store_ref.history.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn skipped_routes_are_counted_not_errored() {
        let store = MemoryStore {
            orders: Mutex::new(vec![
                order("a", "1", TrackingSystem::None),
                order("b", "2", TrackingSystem::Ssw),
            ]),
            ..MemoryStore::default()
        };
        let mut dispatcher = FakeDispatcher::new();
        dispatcher.skip_invoices.push("1".to_string());
        dispatcher.results.insert("2".to_string(), delivered_result());

        let report = orchestrator(store, dispatcher).run_sync().await.unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.errored, 0);
    }

    #[tokio::test]
    async fn status_change_appends_history_once() {
        let store = MemoryStore {
            orders: Mutex::new(vec![order("a", "1", TrackingSystem::Ssw)]),
            ..MemoryStore::default()
        };
        let mut dispatcher = FakeDispatcher::new();
        dispatcher.results.insert("1".to_string(), delivered_result());

        let store_ref = Arc::new(store);
        let orch = SyncOrchestrator::new(
            store_ref.clone(),
            Arc::new(dispatcher),
            SyncConfig::unpaced(),
        );
        let report = orch.run_sync().await.unwrap();
        assert_eq!(report.updated, 1);

        let history = store_ref.history.lock().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].1.status, OrderStatus::Delivered);
        assert!(history[0].1.note.contains("Mercadoria entregue"));
    }

    #[tokio::test]
    async fn backfill_restricts_to_dates_and_skips_dateless_systems() {
        let shipped = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        let store = MemoryStore {
            orders: Mutex::new(vec![
                order("a", "1", TrackingSystem::Ssw),
                order("b", "2", TrackingSystem::Braspress),
                order("c", "3", TrackingSystem::Portal),
            ]),
            ..MemoryStore::default()
        };
        let mut dispatcher = FakeDispatcher::new();
        dispatcher.results.insert(
            "1".to_string(),
            TrackingResult {
                status: Some(OrderStatus::Delivered),
                last_event: Some("Mercadoria entregue".to_string()),
                shipped_at: Some(shipped),
                ..TrackingResult::default()
            },
        );

        let store_ref = Arc::new(store);
        let orch = SyncOrchestrator::new(
            store_ref.clone(),
            Arc::new(dispatcher),
            SyncConfig::unpaced(),
        );
        let report = orch.run_backfill().await.unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.skipped, 2);

        // Only dates persisted: no status flip, no history.
        let applied = store_ref.applied.lock().unwrap();
        let mutations = applied.get("a").unwrap();
        assert_eq!(mutations.len(), 1);
        assert_eq!(mutations[0].shipped_at, Some(shipped));
        assert!(mutations[0].status.is_none());
        assert!(mutations[0].events.is_none());
        assert!(store_ref.history.lock().unwrap().is_empty());
    }
}
