//! Revenue statistics kept current from the payments and orders collections.
//!
//! A refresh issues three reads (paid payments, refunded payments, fulfilled
//! orders), derives four figures and replaces the published
//! [`RevenueStats`] wholesale. Every change notification on either
//! collection triggers another full refresh.
//!
//! Refreshes are numbered. Only the most recently started one may publish
//! its outcome, so a slow refresh that finishes after a newer one is
//! dropped instead of overwriting fresher figures. After [`shutdown`]
//! nothing is published at all.
//!
//! [`shutdown`]: RevenueAggregator::shutdown

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::errors::StorefrontError;
use crate::records::{
    sum_amounts, ChangeEvent, Collection, Filter, OrderStatus, PaymentStatus, Query, Record,
};
use crate::store::DataStore;

/// How the three reads of a refresh are issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshMode {
    /// One query after another; a write landing in between can skew the
    /// figures until the next refresh.
    #[default]
    Sequential,
    /// All reads inside one store transaction when the store supports it.
    Snapshot,
}

/// Published state, serialized for the admin UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueStats {
    pub total_revenue: f64,
    pub net_revenue: f64,
    pub avg_order_value: f64,
    pub refunded_amount: f64,
    pub is_loading: bool,
    pub error: Option<String>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl Default for RevenueStats {
    fn default() -> Self {
        Self {
            total_revenue: 0.0,
            net_revenue: 0.0,
            avg_order_value: 0.0,
            refunded_amount: 0.0,
            is_loading: true,
            error: None,
            refreshed_at: None,
        }
    }
}

impl RevenueStats {
    fn from_figures(figures: &RevenueFigures) -> Self {
        Self {
            total_revenue: figures.total_revenue,
            net_revenue: figures.net_revenue,
            avg_order_value: figures.avg_order_value,
            refunded_amount: figures.refunded_amount,
            is_loading: false,
            error: None,
            refreshed_at: Some(Utc::now()),
        }
    }
}

/// Outcome of one successful computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RevenueFigures {
    pub total_revenue: f64,
    pub refunded_amount: f64,
    pub net_revenue: f64,
    pub fulfilled_orders: usize,
    pub avg_order_value: f64,
}

impl RevenueFigures {
    pub fn derive(total_revenue: f64, refunded_amount: f64, fulfilled_orders: usize) -> Self {
        // Not floored: refunds may exceed recorded revenue.
        let net_revenue = total_revenue - refunded_amount;
        let avg_order_value = if fulfilled_orders > 0 {
            net_revenue / fulfilled_orders as f64
        } else {
            0.0
        };
        Self {
            total_revenue,
            refunded_amount,
            net_revenue,
            fulfilled_orders,
            avg_order_value,
        }
    }

    fn from_rows(paid: &[Record], refunds: &[Record], orders: &[Record]) -> Self {
        Self::derive(sum_amounts(paid), sum_amounts(refunds), orders.len())
    }
}

#[derive(Debug, Error)]
pub enum RevenueError {
    #[error("{query} query failed: {source}")]
    QueryFailed {
        query: &'static str,
        #[source]
        source: StorefrontError,
    },
}

fn paid_payments() -> Query {
    Query::new(
        Collection::Payments,
        Filter::equals("status", PaymentStatus::Paid.as_str()),
    )
}

fn refunded_payments() -> Query {
    Query::new(
        Collection::Payments,
        Filter::equals("status", PaymentStatus::Refund.as_str()),
    )
}

fn fulfilled_orders() -> Query {
    Query::new(
        Collection::Orders,
        Filter::any_of("status", OrderStatus::FULFILLED.map(OrderStatus::as_str)),
    )
}

async fn run_query(
    store: &dyn DataStore,
    label: &'static str,
    query: Query,
) -> Result<Vec<Record>, RevenueError> {
    store
        .query_rows(query.collection, &query.filter)
        .await
        .map_err(|source| RevenueError::QueryFailed {
            query: label,
            source,
        })
}

/// Run the reads and derive the figures. Any failed read fails the whole
/// computation.
pub async fn compute(
    store: &dyn DataStore,
    mode: RefreshMode,
) -> Result<RevenueFigures, RevenueError> {
    if mode == RefreshMode::Snapshot {
        if store.supports_snapshot() {
            let queries = [paid_payments(), refunded_payments(), fulfilled_orders()];
            let results = store.query_snapshot(&queries).await.map_err(|source| {
                RevenueError::QueryFailed {
                    query: "revenue snapshot",
                    source,
                }
            })?;
            return match results.as_slice() {
                [paid, refunds, orders] => Ok(RevenueFigures::from_rows(paid, refunds, orders)),
                _ => Err(RevenueError::QueryFailed {
                    query: "revenue snapshot",
                    source: StorefrontError::InvalidFilter(format!(
                        "expected 3 result sets, got {}",
                        results.len()
                    )),
                }),
            };
        }
        warn!("Store has no snapshot reads; falling back to sequential queries");
    }

    let paid = run_query(store, "paid payments", paid_payments()).await?;
    let refunds = run_query(store, "refunded payments", refunded_payments()).await?;
    let orders = run_query(store, "fulfilled orders", fulfilled_orders()).await?;
    Ok(RevenueFigures::from_rows(&paid, &refunds, &orders))
}

/// Published state plus the bookkeeping refresh tasks need to decide
/// whether they may publish.
struct Shared {
    stats: watch::Sender<RevenueStats>,
    /// Sequence number of the most recently started refresh.
    latest: AtomicU64,
    shutdown: CancellationToken,
}

impl Shared {
    fn is_active(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    fn is_current(&self, seq: u64) -> bool {
        self.latest.load(Ordering::SeqCst) == seq
    }

    fn mark_loading(&self, seq: u64) {
        self.stats.send_if_modified(|stats| {
            if !self.is_active() || !self.is_current(seq) {
                return false;
            }
            stats.is_loading = true;
            stats.error = None;
            true
        });
    }

    fn publish(&self, seq: u64, outcome: Result<RevenueFigures, RevenueError>) {
        let published = self.stats.send_if_modified(|stats| {
            if !self.is_active() {
                debug!(seq, "Aggregator shut down; dropping refresh result");
                return false;
            }
            if !self.is_current(seq) {
                debug!(seq, "Refresh superseded; dropping result");
                return false;
            }
            match &outcome {
                Ok(figures) => *stats = RevenueStats::from_figures(figures),
                Err(e) => {
                    stats.is_loading = false;
                    stats.error = Some(e.to_string());
                }
            }
            true
        });

        if !published {
            return;
        }
        match outcome {
            Ok(figures) => debug!(
                seq,
                total = figures.total_revenue,
                net = figures.net_revenue,
                orders = figures.fulfilled_orders,
                "Revenue refreshed"
            ),
            Err(e) => error!("Error calculating revenue stats: {e}"),
        }
    }
}

pub struct RevenueAggregator {
    store: Arc<dyn DataStore>,
    mode: RefreshMode,
    shared: Arc<Shared>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl RevenueAggregator {
    /// Build an aggregator that only refreshes when asked.
    pub fn new(store: Arc<dyn DataStore>, mode: RefreshMode) -> Arc<Self> {
        let (stats, _) = watch::channel(RevenueStats::default());
        Arc::new(Self {
            store,
            mode,
            shared: Arc::new(Shared {
                stats,
                latest: AtomicU64::new(0),
                shutdown: CancellationToken::new(),
            }),
            listener: Mutex::new(None),
        })
    }

    /// Subscribe to both collections, then run the initial refresh and a
    /// refresh per change notification on a background task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(store: Arc<dyn DataStore>, mode: RefreshMode) -> Arc<Self> {
        let aggregator = Self::new(store, mode);
        let payments = aggregator.store.subscribe(Collection::Payments);
        let orders = aggregator.store.subscribe(Collection::Orders);

        let handle = tokio::spawn(listen(
            Arc::downgrade(&aggregator),
            payments,
            orders,
            aggregator.shared.shutdown.clone(),
        ));
        if let Ok(mut slot) = aggregator.listener.lock() {
            *slot = Some(handle);
        }
        info!(?mode, "Revenue aggregator started");
        aggregator
    }

    pub fn stats(&self) -> RevenueStats {
        self.shared.stats.borrow().clone()
    }

    /// Receiver that observes every published state.
    pub fn watch(&self) -> watch::Receiver<RevenueStats> {
        self.shared.stats.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.shared.is_active()
    }

    /// Recompute every figure from the store and publish the result.
    ///
    /// Previous figures stay visible while loading. A failed read keeps
    /// them and sets `error` instead. Returns the state as published after
    /// this refresh, which may belong to a newer refresh if this one was
    /// superseded.
    ///
    /// The reads run on their own task: dropping the returned future does
    /// not stop the refresh from publishing its outcome.
    pub async fn refresh(&self) -> RevenueStats {
        if !self.is_active() {
            return self.stats();
        }

        let seq = self.shared.latest.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.mark_loading(seq);

        let store = Arc::clone(&self.store);
        let shared = Arc::clone(&self.shared);
        let mode = self.mode;
        let task = tokio::spawn(async move {
            let outcome = compute(store.as_ref(), mode).await;
            shared.publish(seq, outcome);
        });
        if let Err(e) = task.await {
            error!(seq, "Revenue refresh task failed: {e}");
        }
        self.stats()
    }

    /// Stop reacting to change notifications and release both
    /// subscriptions. Later refreshes, including ones already in flight,
    /// publish nothing.
    pub async fn shutdown(&self) {
        self.shared.shutdown.cancel();
        let handle = self.listener.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Revenue listener ended abnormally: {e}");
            }
        }
        info!("Revenue aggregator stopped");
    }
}

impl Drop for RevenueAggregator {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

/// Background task: initial refresh, then one full refresh per
/// notification. The receivers drop, unsubscribing, when it returns.
async fn listen(
    aggregator: Weak<RevenueAggregator>,
    mut payments: broadcast::Receiver<ChangeEvent>,
    mut orders: broadcast::Receiver<ChangeEvent>,
    shutdown: CancellationToken,
) {
    let mut trigger = "initial load".to_string();

    loop {
        let Some(agg) = aggregator.upgrade() else {
            break;
        };
        debug!(%trigger, "Refreshing revenue");
        // Dropping the refresh here only stops waiting on it; its task
        // still finishes and publishes nothing once shut down.
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = agg.refresh() => {}
        }
        drop(agg);

        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            ev = payments.recv() => ev,
            ev = orders.recv() => ev,
        };
        trigger = match event {
            Ok(ev) => format!("{:?} on {}", ev.kind, ev.collection),
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Change feed lagged; refreshing once");
                "lagged feed".to_string()
            }
            Err(RecvError::Closed) => {
                info!("Change feed closed");
                break;
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use crate::errors::Result;
    use crate::records::ChangeKind;
    use crate::store::{ChangeFeed, SqliteStore};

    /// In-memory store with failure injection and a query counter.
    #[derive(Default)]
    struct FakeStore {
        payments: Mutex<Vec<Record>>,
        orders: Mutex<Vec<Record>>,
        /// Fail queries whose filter accepts this status.
        failing_status: Mutex<Option<String>>,
        /// Delay applied after reading rows, for the next query only.
        next_delay: Mutex<Option<Duration>>,
        queries: AtomicUsize,
        feed: ChangeFeed,
    }

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    impl FakeStore {
        fn add_payment(&self, amount: Value, status: &str, notify: bool) {
            self.payments
                .lock()
                .unwrap()
                .push(record(json!({"amount": amount, "status": status})));
            if notify {
                self.feed
                    .publish(ChangeEvent::now(Collection::Payments, ChangeKind::Insert));
            }
        }

        fn add_order(&self, status: &str, notify: bool) {
            let mut orders = self.orders.lock().unwrap();
            let id = orders.len() + 1;
            orders.push(record(json!({"id": id, "status": status})));
            drop(orders);
            if notify {
                self.feed
                    .publish(ChangeEvent::now(Collection::Orders, ChangeKind::Insert));
            }
        }

        fn fail_on(&self, status: Option<&str>) {
            *self.failing_status.lock().unwrap() = status.map(str::to_string);
        }

        fn query_count(&self) -> usize {
            self.queries.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DataStore for FakeStore {
        async fn query_rows(&self, collection: Collection, filter: &Filter) -> Result<Vec<Record>> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            if let Some(status) = self.failing_status.lock().unwrap().as_deref() {
                if filter.values().contains(&status) {
                    return Err(StorefrontError::Rejected {
                        status: 503,
                        message: format!("{status} lookup unavailable"),
                    });
                }
            }
            let source = match collection {
                Collection::Payments => &self.payments,
                Collection::Orders => &self.orders,
            };
            let rows: Vec<Record> = source
                .lock()
                .unwrap()
                .iter()
                .filter(|r| filter.matches(r))
                .cloned()
                .collect();
            let delay = self.next_delay.lock().unwrap().take();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            Ok(rows)
        }

        async fn fetch_all(&self, collection: Collection) -> Result<Vec<Record>> {
            let source = match collection {
                Collection::Payments => &self.payments,
                Collection::Orders => &self.orders,
            };
            Ok(source.lock().unwrap().clone())
        }

        fn feed(&self) -> &ChangeFeed {
            &self.feed
        }
    }

    fn seeded_store() -> Arc<FakeStore> {
        let store = Arc::new(FakeStore::default());
        for amount in [10, 20, 30] {
            store.add_payment(json!(amount), "paid", false);
        }
        store.add_payment(json!(5), "refund", false);
        store
    }

    async fn wait_until(
        rx: &mut watch::Receiver<RevenueStats>,
        pred: impl Fn(&RevenueStats) -> bool,
    ) -> RevenueStats {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                {
                    let stats = rx.borrow_and_update();
                    if pred(&stats) {
                        return stats.clone();
                    }
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("timed out waiting for revenue stats")
    }

    #[test]
    fn derive_totals_and_net() {
        let figures = RevenueFigures::derive(60.0, 5.0, 0);
        assert_eq!(figures.total_revenue, 60.0);
        assert_eq!(figures.refunded_amount, 5.0);
        assert_eq!(figures.net_revenue, 55.0);
        assert_eq!(figures.avg_order_value, 0.0);
    }

    #[test]
    fn derive_average_order_value() {
        assert_eq!(RevenueFigures::derive(100.0, 0.0, 4).avg_order_value, 25.0);
    }

    #[test]
    fn net_revenue_can_go_negative() {
        let figures = RevenueFigures::derive(10.0, 30.0, 2);
        assert_eq!(figures.net_revenue, -20.0);
        assert_eq!(figures.avg_order_value, -10.0);
    }

    #[test]
    fn initial_stats_are_zeroed_and_loading() {
        let stats = RevenueStats::default();
        assert!(stats.is_loading);
        assert_eq!(stats.total_revenue, 0.0);
        assert!(stats.error.is_none());
    }

    #[test]
    fn stats_serialize_camel_case() {
        let json = serde_json::to_value(RevenueStats::default()).unwrap();
        assert_eq!(json["isLoading"], json!(true));
        assert_eq!(json["avgOrderValue"], json!(0.0));
        assert!(json["error"].is_null());
    }

    #[tokio::test]
    async fn refresh_computes_all_figures() {
        let store = seeded_store();
        store.add_order("delivered", false);
        store.add_order("completed", false);
        store.add_order("pending", false);
        let agg = RevenueAggregator::new(store.clone(), RefreshMode::Sequential);

        let stats = agg.refresh().await;
        assert_eq!(stats.total_revenue, 60.0);
        assert_eq!(stats.refunded_amount, 5.0);
        assert_eq!(stats.net_revenue, 55.0);
        assert_eq!(stats.avg_order_value, 27.5);
        assert!(!stats.is_loading);
        assert!(stats.error.is_none());
        assert!(stats.refreshed_at.is_some());
        assert_eq!(store.query_count(), 3);
    }

    #[tokio::test]
    async fn no_fulfilled_orders_means_zero_average() {
        let agg = RevenueAggregator::new(seeded_store(), RefreshMode::Sequential);
        let stats = agg.refresh().await;
        assert_eq!(stats.net_revenue, 55.0);
        assert_eq!(stats.avg_order_value, 0.0);
        assert!(stats.avg_order_value.is_finite());
    }

    #[tokio::test]
    async fn failed_refund_query_keeps_previous_figures() {
        let store = seeded_store();
        store.add_order("delivered", false);
        let agg = RevenueAggregator::new(store.clone(), RefreshMode::Sequential);
        let before = agg.refresh().await;

        store.add_payment(json!(100), "paid", false);
        store.fail_on(Some("refund"));
        let after = agg.refresh().await;

        assert_eq!(after.total_revenue, before.total_revenue);
        assert_eq!(after.net_revenue, before.net_revenue);
        assert_eq!(after.refunded_amount, before.refunded_amount);
        assert_eq!(after.avg_order_value, before.avg_order_value);
        assert!(!after.is_loading);
        let error = after.error.expect("error should be set");
        assert!(error.contains("refunded payments"));
        assert!(error.contains("refund lookup unavailable"));

        // A later successful refresh clears the error.
        store.fail_on(None);
        let recovered = agg.refresh().await;
        assert!(recovered.error.is_none());
        assert_eq!(recovered.total_revenue, 160.0);
    }

    #[tokio::test]
    async fn failed_paid_query_keeps_previous_figures() {
        let store = seeded_store();
        let agg = RevenueAggregator::new(store.clone(), RefreshMode::Sequential);
        let before = agg.refresh().await;

        store.add_payment(json!(100), "paid", false);
        store.fail_on(Some("paid"));
        let after = agg.refresh().await;

        assert_eq!(after.total_revenue, before.total_revenue);
        assert_eq!(after.net_revenue, before.net_revenue);
        assert!(!after.is_loading);
        assert!(after.error.unwrap().contains("paid payments"));
        // The failure aborts the refresh before the remaining reads.
        assert_eq!(store.query_count(), 4);
    }

    #[tokio::test]
    async fn failed_orders_query_keeps_previous_figures() {
        let store = seeded_store();
        store.add_order("delivered", false);
        let agg = RevenueAggregator::new(store.clone(), RefreshMode::Sequential);
        let before = agg.refresh().await;

        // Both payment reads succeed and would change every figure.
        store.add_payment(json!(100), "paid", false);
        store.add_payment(json!(7), "refund", false);
        store.fail_on(Some("delivered"));
        let after = agg.refresh().await;

        assert_eq!(after.total_revenue, before.total_revenue);
        assert_eq!(after.refunded_amount, before.refunded_amount);
        assert_eq!(after.net_revenue, before.net_revenue);
        assert_eq!(after.avg_order_value, before.avg_order_value);
        assert_eq!(after.refreshed_at, before.refreshed_at);
        assert!(!after.is_loading);
        assert!(after.error.unwrap().contains("fulfilled orders"));
    }

    #[tokio::test]
    async fn dropped_refresh_caller_still_publishes() {
        let store = seeded_store();
        let agg = RevenueAggregator::new(store.clone(), RefreshMode::Sequential);
        agg.refresh().await;

        store.add_payment(json!(40), "paid", false);
        *store.next_delay.lock().unwrap() = Some(Duration::from_millis(200));
        let caller = tokio::spawn({
            let agg = agg.clone();
            async move { agg.refresh().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(agg.stats().is_loading);
        caller.abort();

        let mut rx = agg.watch();
        let stats = wait_until(&mut rx, |s| !s.is_loading).await;
        assert_eq!(stats.total_revenue, 100.0);
        assert!(stats.error.is_none());
    }

    #[tokio::test]
    async fn order_change_triggers_one_recomputation() {
        let store = seeded_store();
        for _ in 0..3 {
            store.add_order("delivered", false);
        }
        let agg = RevenueAggregator::start(store.clone(), RefreshMode::Sequential);
        let mut rx = agg.watch();

        let loaded = wait_until(&mut rx, |s| !s.is_loading).await;
        assert_eq!(loaded.avg_order_value, 55.0 / 3.0);
        assert_eq!(store.query_count(), 3);

        store.add_order("completed", true);
        let updated = wait_until(&mut rx, |s| !s.is_loading && s.avg_order_value == 13.75).await;
        assert_eq!(updated.net_revenue, 55.0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.query_count(), 6);
        agg.shutdown().await;
    }

    #[tokio::test]
    async fn payment_change_triggers_refresh() {
        let store = seeded_store();
        let agg = RevenueAggregator::start(store.clone(), RefreshMode::Sequential);
        let mut rx = agg.watch();
        wait_until(&mut rx, |s| !s.is_loading).await;

        store.add_payment(json!("15"), "refund", true);
        let stats = wait_until(&mut rx, |s| !s.is_loading && s.refunded_amount == 20.0).await;
        assert_eq!(stats.net_revenue, 40.0);
        agg.shutdown().await;
    }

    #[tokio::test]
    async fn no_mutation_after_shutdown() {
        let store = seeded_store();
        let agg = RevenueAggregator::start(store.clone(), RefreshMode::Sequential);
        let mut rx = agg.watch();
        let loaded = wait_until(&mut rx, |s| !s.is_loading).await;

        agg.shutdown().await;
        assert!(!agg.is_active());
        assert_eq!(store.feed.subscriber_count(Collection::Payments), 0);
        assert_eq!(store.feed.subscriber_count(Collection::Orders), 0);

        store.add_order("delivered", true);
        store.add_payment(json!(1000), "paid", true);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(agg.refresh().await, loaded);
        assert_eq!(agg.stats(), loaded);
        assert_eq!(store.query_count(), 3);
    }

    #[tokio::test]
    async fn in_flight_refresh_is_dropped_after_shutdown() {
        let store = seeded_store();
        let agg = RevenueAggregator::new(store.clone(), RefreshMode::Sequential);
        let before = agg.stats();

        *store.next_delay.lock().unwrap() = Some(Duration::from_millis(100));
        let pending = tokio::spawn({
            let agg = agg.clone();
            async move { agg.refresh().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        agg.shutdown().await;
        pending.await.unwrap();

        let after = agg.stats();
        assert_eq!(after.total_revenue, before.total_revenue);
        assert!(after.refreshed_at.is_none());
    }

    #[tokio::test]
    async fn superseded_refresh_does_not_publish() {
        let store = seeded_store();
        let agg = RevenueAggregator::new(store.clone(), RefreshMode::Sequential);

        // The first refresh reads [10, 20, 30] and then stalls.
        *store.next_delay.lock().unwrap() = Some(Duration::from_millis(200));
        let stale = tokio::spawn({
            let agg = agg.clone();
            async move { agg.refresh().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        store.add_payment(json!(40), "paid", false);
        let fresh = agg.refresh().await;
        assert_eq!(fresh.total_revenue, 100.0);

        stale.await.unwrap();
        let stats = agg.stats();
        assert_eq!(stats.total_revenue, 100.0);
        assert!(!stats.is_loading);
    }

    #[tokio::test]
    async fn snapshot_mode_falls_back_without_store_support() {
        let store = seeded_store();
        let agg = RevenueAggregator::new(store.clone(), RefreshMode::Snapshot);
        let stats = agg.refresh().await;
        assert_eq!(stats.net_revenue, 55.0);
        assert_eq!(store.query_count(), 3);
    }

    #[tokio::test]
    async fn snapshot_mode_against_sqlite() {
        let store = Arc::new(SqliteStore::connect("sqlite::memory:").await.unwrap());
        for amount in [10.0, 20.0, 30.0] {
            store.insert_payment(Some(amount), "paid").await.unwrap();
        }
        store.insert_payment(Some(5.0), "refund").await.unwrap();
        store.insert_payment(None, "paid").await.unwrap();
        let order = store.insert_order("pending").await.unwrap();

        let agg = RevenueAggregator::start(store.clone(), RefreshMode::Snapshot);
        let mut rx = agg.watch();
        let loaded = wait_until(&mut rx, |s| !s.is_loading).await;
        assert_eq!(loaded.total_revenue, 60.0);
        assert_eq!(loaded.avg_order_value, 0.0);

        store.set_order_status(order, "delivered").await.unwrap();
        let updated = wait_until(&mut rx, |s| !s.is_loading && s.avg_order_value == 55.0).await;
        assert_eq!(updated.net_revenue, 55.0);
        agg.shutdown().await;
    }
}
