//! In-process change feed keyed by collection.
//!
//! Stores publish a [`ChangeEvent`] after each write; listeners hold a
//! `broadcast::Receiver` and unsubscribe by dropping it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::records::{ChangeEvent, Collection};

const DEFAULT_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct ChangeFeed {
    channels: Arc<HashMap<Collection, broadcast::Sender<ChangeEvent>>>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let channels = Collection::ALL
            .iter()
            .map(|c| (*c, broadcast::channel(capacity).0))
            .collect();
        Self {
            channels: Arc::new(channels),
        }
    }

    /// Publish to the event's collection. Returns the number of listeners
    /// reached; zero when nobody is subscribed.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        self.channels
            .get(&event.collection)
            .and_then(|tx| tx.send(event).ok())
            .unwrap_or(0)
    }

    pub fn subscribe(&self, collection: Collection) -> broadcast::Receiver<ChangeEvent> {
        match self.channels.get(&collection) {
            Some(tx) => tx.subscribe(),
            // Every collection gets a channel in `with_capacity`.
            None => broadcast::channel(1).1,
        }
    }

    pub fn subscriber_count(&self, collection: Collection) -> usize {
        self.channels
            .get(&collection)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}
