//! Change feed: per-board stream of row-level change events.
//!
//! ARCHITECTURE
//! ============
//! A `ChangeFeed` hands out one `Subscription` per board. The subscription
//! is a scoped acquisition: dropping it, or calling `unsubscribe`, releases
//! the adapter-side resources and stops delivery.
//!
//! DELIVERY
//! ========
//! Events are at-least-once and unordered. Consumers must treat INSERT of a
//! known id, UPDATE of an unknown id and DELETE of an unknown id as no-ops.

pub mod memory;
pub mod postgres;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::StoreError;
use crate::types::{BoardElement, ElementRow};

// =============================================================================
// TYPES
// =============================================================================

/// Watched collection an event originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Boards,
    BoardElements,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One row-level change notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedEvent {
    pub collection: Collection,
    pub kind: ChangeKind,
    pub board_id: Uuid,
    /// Row after the change (INSERT / UPDATE).
    pub new_row: Option<serde_json::Value>,
    /// Row before the change; for DELETE at least the primary key.
    pub old_row: Option<serde_json::Value>,
}

/// Decoded `board_elements` change.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementChange {
    Insert(BoardElement),
    Update(BoardElement),
    Delete(Uuid),
}

impl FeedEvent {
    /// Build an element INSERT/UPDATE event from a stored row.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be serialized.
    pub fn element_upsert(kind: ChangeKind, row: &ElementRow) -> Result<Self, serde_json::Error> {
        Ok(Self {
            collection: Collection::BoardElements,
            kind,
            board_id: row.board_id,
            new_row: Some(serde_json::to_value(row)?),
            old_row: None,
        })
    }

    /// Build an element DELETE event carrying only the key columns.
    #[must_use]
    pub fn element_delete(board_id: Uuid, element_id: Uuid) -> Self {
        Self {
            collection: Collection::BoardElements,
            kind: ChangeKind::Delete,
            board_id,
            new_row: None,
            old_row: Some(serde_json::json!({ "id": element_id, "board_id": board_id })),
        }
    }

    /// Build a `boards` event. Board rows are announced by id only.
    #[must_use]
    pub fn board(kind: ChangeKind, board_id: Uuid) -> Self {
        let key = serde_json::json!({ "id": board_id });
        let (new_row, old_row) = match kind {
            ChangeKind::Delete => (None, Some(key)),
            ChangeKind::Insert | ChangeKind::Update => (Some(key), None),
        };
        Self { collection: Collection::Boards, kind, board_id, new_row, old_row }
    }

    /// Decode a `board_elements` event into a typed change.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Decode` if the event is for another collection or
    /// its row does not decode.
    pub fn decode_element(&self) -> Result<ElementChange, StoreError> {
        if self.collection != Collection::BoardElements {
            return Err(StoreError::Decode(format!("expected board_elements event, got {:?}", self.collection)));
        }
        match self.kind {
            ChangeKind::Insert | ChangeKind::Update => {
                let row = self
                    .new_row
                    .clone()
                    .ok_or_else(|| StoreError::Decode("event has no new row".into()))?;
                let row: ElementRow = serde_json::from_value(row)?;
                let element = BoardElement::try_from(row)?;
                Ok(if self.kind == ChangeKind::Insert {
                    ElementChange::Insert(element)
                } else {
                    ElementChange::Update(element)
                })
            }
            ChangeKind::Delete => {
                let id = self
                    .old_row
                    .as_ref()
                    .and_then(|row| row.get("id"))
                    .cloned()
                    .ok_or_else(|| StoreError::Decode("delete event has no old row id".into()))?;
                Ok(ElementChange::Delete(serde_json::from_value(id)?))
            }
        }
    }
}

// =============================================================================
// SUBSCRIPTION
// =============================================================================

type Release = Box<dyn FnOnce() + Send>;

/// Live subscription to one board's feed.
pub struct Subscription {
    board_id: Uuid,
    events: mpsc::Receiver<FeedEvent>,
    release: Option<Release>,
}

impl Subscription {
    /// Wrap a receiver; `release` runs once, on unsubscribe or drop.
    pub fn new(board_id: Uuid, events: mpsc::Receiver<FeedEvent>, release: impl FnOnce() + Send + 'static) -> Self {
        Self { board_id, events, release: Some(Box::new(release)) }
    }

    #[must_use]
    pub fn board_id(&self) -> Uuid {
        self.board_id
    }

    /// Wait for the next event. `None` once the feed side has gone away.
    pub async fn recv(&mut self) -> Option<FeedEvent> {
        self.events.recv().await
    }

    /// Next already-delivered event, if any.
    pub fn try_recv(&mut self) -> Option<FeedEvent> {
        self.events.try_recv().ok()
    }

    /// Stop delivery and release adapter resources.
    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        self.events.close();
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("board_id", &self.board_id)
            .field("released", &self.release.is_none())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// FEED
// =============================================================================

#[async_trait::async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Start receiving change events for `board_id`.
    async fn subscribe(&self, board_id: Uuid) -> Result<Subscription, StoreError>;
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
