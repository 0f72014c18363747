//! Long-running background task that snapshots a store and turns
//! differences into change notifications on its feed.
//!
//! Writes made through a store publish on their own. This covers writes the
//! process never sees: other clients of the PostgREST endpoint, or other
//! connections to the SQLite file.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::records::{ChangeEvent, ChangeKind, Collection, Record};
use crate::store::DataStore;

pub struct WatcherState {
    pub store: Arc<dyn DataStore>,
    pub interval: Duration,
    pub shutdown: CancellationToken,
}

/// Last seen contents per collection.
#[derive(Default)]
struct Snapshots {
    seen: HashMap<Collection, Vec<Record>>,
}

impl Snapshots {
    /// Store `rows` and report how the collection changed, if at all.
    /// The first snapshot of a collection is a baseline, not a change.
    fn update(&mut self, collection: Collection, rows: Vec<Record>) -> Option<ChangeKind> {
        let previous = self.seen.insert(collection, rows);
        let current = &self.seen[&collection];
        match previous {
            None => None,
            Some(prev) if &prev == current => None,
            Some(prev) if current.len() > prev.len() => Some(ChangeKind::Insert),
            Some(prev) if current.len() < prev.len() => Some(ChangeKind::Delete),
            Some(_) => Some(ChangeKind::Update),
        }
    }
}

/// Spawn the watcher loop as a background [`tokio`] task.
pub async fn run(state: Arc<WatcherState>) {
    info!(
        "Watcher starting, polling every {}s",
        state.interval.as_secs_f64()
    );
    let mut snapshots = Snapshots::default();

    loop {
        poll_once(state.store.as_ref(), &mut snapshots).await;

        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            _ = tokio::time::sleep(state.interval) => {}
        }
    }

    info!("Watcher stopped");
}

/// Perform a single poll iteration over every collection.
async fn poll_once(store: &dyn DataStore, snapshots: &mut Snapshots) {
    for collection in Collection::ALL {
        match store.fetch_all(collection).await {
            Ok(rows) => {
                if let Some(kind) = snapshots.update(collection, rows) {
                    let reached = store.feed().publish(ChangeEvent::now(collection, kind));
                    debug!(%collection, ?kind, listeners = reached, "Detected change");
                }
            }
            Err(e) => {
                error!("Watcher poll error for {collection}: {e}");
            }
        }
    }
}
