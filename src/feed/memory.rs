//! In-process change feed hub.
//!
//! DESIGN
//! ======
//! Subscribers are kept per board as `subscription id -> mpsc::Sender`.
//! Publishing is best-effort fan-out with `try_send`: a full channel drops
//! the event for that subscriber only, which the at-least-once, unordered
//! feed contract already tolerates. Closed channels are pruned on publish.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use super::{FeedEvent, Subscription};

pub const DEFAULT_FEED_BUFFER: usize = 256;

type Subscribers = HashMap<Uuid, HashMap<Uuid, mpsc::Sender<FeedEvent>>>;

#[derive(Clone, Default)]
pub struct FeedHub {
    subscribers: Arc<Mutex<Subscribers>>,
}

impl FeedHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber for `board_id` with a channel of `capacity` events.
    #[must_use]
    pub fn subscribe(&self, board_id: Uuid, capacity: usize) -> Subscription {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let sub_id = Uuid::new_v4();
        self.lock().entry(board_id).or_default().insert(sub_id, tx);
        debug!(%board_id, %sub_id, "feed subscriber added");

        let hub = self.clone();
        Subscription::new(board_id, rx, move || hub.remove(board_id, sub_id))
    }

    /// Deliver `event` to every subscriber of its board.
    pub fn publish(&self, event: &FeedEvent) {
        let mut subscribers = self.lock();
        let Some(board_subs) = subscribers.get_mut(&event.board_id) else {
            return;
        };

        board_subs.retain(|_, tx| !tx.is_closed());
        for (sub_id, tx) in board_subs.iter() {
            // Best-effort: if a subscriber's channel is full, skip it.
            if tx.try_send(event.clone()).is_err() {
                debug!(board_id = %event.board_id, %sub_id, "feed event dropped for slow subscriber");
            }
        }
        if board_subs.is_empty() {
            subscribers.remove(&event.board_id);
        }
    }

    #[must_use]
    pub fn subscriber_count(&self, board_id: Uuid) -> usize {
        self.lock().get(&board_id).map_or(0, HashMap::len)
    }

    fn remove(&self, board_id: Uuid, sub_id: Uuid) {
        let mut subscribers = self.lock();
        if let Some(board_subs) = subscribers.get_mut(&board_id) {
            board_subs.remove(&sub_id);
            if board_subs.is_empty() {
                subscribers.remove(&board_id);
            }
        }
        debug!(%board_id, %sub_id, "feed subscriber released");
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Subscribers> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
