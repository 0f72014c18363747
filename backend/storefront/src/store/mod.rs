//! Data-store collaborator: filtered row reads plus change subscriptions.
//!
//! The revenue aggregator only talks to [`DataStore`], so it can run
//! against SQLite, a PostgREST endpoint, or a fake in tests.

pub mod feed;
pub mod rest;
pub mod sqlite;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::errors::Result;
use crate::records::{ChangeEvent, Collection, Filter, Query, Record};

pub use feed::ChangeFeed;
pub use rest::RestStore;
pub use sqlite::SqliteStore;

#[async_trait]
pub trait DataStore: Send + Sync {
    /// Fetch every row of `collection` matching `filter`.
    async fn query_rows(&self, collection: Collection, filter: &Filter) -> Result<Vec<Record>>;

    /// Whether [`DataStore::query_snapshot`] reads inside one transaction.
    fn supports_snapshot(&self) -> bool {
        false
    }

    /// Run several queries, returning results in the same order.
    ///
    /// Stores that support it read all of them from one consistent
    /// snapshot; the default just runs them one after another.
    async fn query_snapshot(&self, queries: &[Query]) -> Result<Vec<Vec<Record>>> {
        let mut results = Vec::with_capacity(queries.len());
        for q in queries {
            results.push(self.query_rows(q.collection, &q.filter).await?);
        }
        Ok(results)
    }

    /// Fetch the whole of `collection`, ordered by id.
    async fn fetch_all(&self, collection: Collection) -> Result<Vec<Record>>;

    /// Change notifications for this store. Writes made through the store
    /// publish here directly; the watcher publishes writes made elsewhere.
    fn feed(&self) -> &ChangeFeed;

    /// Listen for writes to `collection`. Drop the receiver to unsubscribe.
    fn subscribe(&self, collection: Collection) -> broadcast::Receiver<ChangeEvent> {
        self.feed().subscribe(collection)
    }
}
