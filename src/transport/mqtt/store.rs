//! Delivery store: in-flight messages keyed by message identifier
//!
//! An identifier is present exactly while its acknowledgment handshake is
//! pending. Every operation takes the lock for its own duration only, so the
//! store can be shared between the dispatch path and the public API.

use crate::protocol::Message;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Concurrency-safe map from message identifier to [`Message`]
#[derive(Debug, Default)]
pub struct DeliveryStore {
    messages: Mutex<HashMap<u16, Message>>,
}

impl DeliveryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u16, Message>> {
        // A panic while holding the lock cannot leave the map half-updated
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a record, returning the one it replaced
    pub fn put(&self, message: Message) -> Option<Message> {
        self.lock().insert(message.message_id, message)
    }

    pub fn get(&self, message_id: u16) -> Option<Message> {
        self.lock().get(&message_id).cloned()
    }

    pub fn delete(&self, message_id: u16) -> Option<Message> {
        self.lock().remove(&message_id)
    }

    /// Remove the record for `message_id` only if `accept` approves it
    pub fn delete_if(
        &self,
        message_id: u16,
        accept: impl FnOnce(&Message) -> bool,
    ) -> Option<Message> {
        let mut messages = self.lock();
        match messages.get(&message_id) {
            Some(message) if accept(message) => messages.remove(&message_id),
            _ => None,
        }
    }

    pub fn contains(&self, message_id: u16) -> bool {
        self.lock().contains_key(&message_id)
    }

    /// Approximate number of in-flight records
    pub fn count(&self) -> usize {
        self.lock().len()
    }

    /// Apply `update` to the record for `message_id` if it exists.
    ///
    /// Returns the closure's result, or `None` when the id is not tracked.
    pub fn update<T>(&self, message_id: u16, update: impl FnOnce(&mut Message) -> T) -> Option<T> {
        self.lock().get_mut(&message_id).map(update)
    }

    /// Copy of every record, in no particular order
    pub fn snapshot(&self) -> Vec<Message> {
        self.lock().values().cloned().collect()
    }
}
