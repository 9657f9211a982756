//! Board reconciliation engine: the element list of one open board.
//!
//! DESIGN
//! ======
//! Three sources feed the local sequence: the bulk `load`, this client's own
//! writes, and the change feed. They are merged into one ordered list with no
//! duplicate ids and no resurrected deletes:
//!
//! - `add` is a store round-trip; the returned row is inserted only if the
//!   feed has not already delivered it.
//! - `update` merges locally first, then writes; a failed write reloads the
//!   whole board from the store.
//! - `remove` and `reset_participant_elements` only write; the local removal
//!   happens when the feed DELETE arrives.
//! - Feed INSERT of a known id, UPDATE of an unknown id and DELETE of an
//!   unknown id are no-ops.
//!
//! Ids removed by a feed DELETE are remembered, so a late `add` reply, a
//! redelivered INSERT or a `load` whose read predates the delete cannot bring
//! the element back. Only the most recent `MAX_TOMBSTONES` ids are kept.
//!
//! CONSISTENCY
//! ===========
//! Last remote write wins per field group (position, data). There are no
//! versions. A delete always wins and a duplicate insert is dropped silently.
//!
//! CONCURRENCY
//! ===========
//! The engine is a cheap `Clone` handle. State sits behind a `RwLock` that is
//! never held across a store call, so feed events can be applied while an
//! `add` or `update` is in flight. Every change replaces the whole sequence
//! and publishes it on a `watch` channel. After `close`, in-flight results
//! and further feed events are ignored.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::{RwLock, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{BachecaError, Notice, StoreError};
use crate::feed::{Collection, ElementChange, FeedEvent};
use crate::services::permission;
use crate::store::RemoteStore;
use crate::types::{
    Actor, BoardConfig, BoardElement, ElementData, ElementKind, ElementPatch, INSTRUCTOR_AUTHOR, NewElement, Position,
};

// =============================================================================
// TYPES
// =============================================================================

pub const MAX_TOMBSTONES: usize = 4096;

/// Recently deleted ids, oldest evicted first.
#[derive(Default)]
struct Tombstones {
    ids: HashSet<Uuid>,
    order: VecDeque<Uuid>,
}

impl Tombstones {
    fn insert(&mut self, id: Uuid) {
        if !self.ids.insert(id) {
            return;
        }
        self.order.push_back(id);
        if self.order.len() > MAX_TOMBSTONES {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }

    fn contains(&self, id: &Uuid) -> bool {
        self.ids.contains(id)
    }
}

#[derive(Default)]
struct EngineState {
    elements: Vec<BoardElement>,
    deleted: Tombstones,
    notices: Vec<Notice>,
    closed: bool,
}

#[derive(Clone)]
pub struct BoardEngine {
    board_id: Uuid,
    store: Arc<dyn RemoteStore>,
    state: Arc<RwLock<EngineState>>,
    snapshots: Arc<watch::Sender<Vec<BoardElement>>>,
}

impl BoardEngine {
    #[must_use]
    pub fn new(board_id: Uuid, store: Arc<dyn RemoteStore>) -> Self {
        let (tx, _rx) = watch::channel(Vec::new());
        Self { board_id, store, state: Arc::new(RwLock::new(EngineState::default())), snapshots: Arc::new(tx) }
    }

    #[must_use]
    pub fn board_id(&self) -> Uuid {
        self.board_id
    }

    /// Latest published element sequence.
    #[must_use]
    pub fn snapshot(&self) -> Vec<BoardElement> {
        self.snapshots.borrow().clone()
    }

    /// Receiver notified with every new element sequence.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Vec<BoardElement>> {
        self.snapshots.subscribe()
    }

    /// Element with `id` in the latest snapshot.
    #[must_use]
    pub fn element(&self, id: Uuid) -> Option<BoardElement> {
        self.snapshots.borrow().iter().find(|e| e.id == id).cloned()
    }

    /// Drain the queued user notices.
    pub async fn take_notices(&self) -> Vec<Notice> {
        std::mem::take(&mut self.state.write().await.notices)
    }

    /// Stop accepting results and feed events.
    pub async fn close(&self) {
        self.state.write().await.closed = true;
        debug!(board_id = %self.board_id, "board engine closed");
    }

    pub async fn is_closed(&self) -> bool {
        self.state.read().await.closed
    }

    fn publish(&self, state: &EngineState) {
        self.snapshots.send_replace(state.elements.clone());
    }

    async fn fail(&self, err: StoreError) -> BachecaError {
        let err = BachecaError::from(err);
        let mut state = self.state.write().await;
        if !state.closed {
            state.notices.push(Notice::from_error(&err));
        }
        err
    }
}

// =============================================================================
// LOAD
// =============================================================================

impl BoardEngine {
    /// Replace the local sequence with the store's elements, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the read fails; the local sequence is
    /// then empty and a notice is queued.
    pub async fn load(&self) -> Result<Vec<BoardElement>, BachecaError> {
        let result = self.store.list_elements(self.board_id).await;

        let mut state = self.state.write().await;
        if state.closed {
            return result.map_err(BachecaError::from);
        }
        match result {
            Ok(elements) => {
                let elements: Vec<BoardElement> = elements
                    .into_iter()
                    .filter(|e| !state.deleted.contains(&e.id))
                    .collect();
                info!(board_id = %self.board_id, count = elements.len(), "board elements loaded");
                state.elements.clone_from(&elements);
                self.publish(&state);
                Ok(elements)
            }
            Err(e) => {
                warn!(board_id = %self.board_id, error = %e, "board load failed");
                let err = BachecaError::from(e);
                state.elements = Vec::new();
                state.notices.push(Notice::from_error(&err));
                self.publish(&state);
                Err(err)
            }
        }
    }
}

// =============================================================================
// ADD
// =============================================================================

impl BoardEngine {
    /// Place a new element of `kind` with its default payload.
    ///
    /// # Errors
    ///
    /// `PermissionDenied` before any write when `actor` may not create
    /// `kind`; `StoreUnavailable` if the insert fails.
    pub async fn add(
        &self,
        kind: ElementKind,
        actor: &Actor,
        position: Position,
        config: &BoardConfig,
    ) -> Result<BoardElement, BachecaError> {
        self.add_with(ElementData::default_for(kind), actor, position, config)
            .await
    }

    /// Place a new element carrying `data`.
    ///
    /// # Errors
    ///
    /// Same as [`BoardEngine::add`].
    pub async fn add_with(
        &self,
        data: ElementData,
        actor: &Actor,
        position: Position,
        config: &BoardConfig,
    ) -> Result<BoardElement, BachecaError> {
        permission::ensure_create(actor, data.kind(), config)?;

        let new = NewElement { board_id: self.board_id, position, author: actor.author().to_owned(), data };
        let element = match self.store.insert_element(new).await {
            Ok(element) => element,
            Err(e) => {
                warn!(board_id = %self.board_id, error = %e, "element insert failed");
                return Err(self.fail(e).await);
            }
        };

        let mut state = self.state.write().await;
        if state.closed {
            return Ok(element);
        }
        if state.deleted.contains(&element.id) || state.elements.iter().any(|e| e.id == element.id) {
            debug!(element_id = %element.id, "insert already reconciled from feed");
            return Ok(element);
        }
        let mut next = state.elements.clone();
        next.push(element.clone());
        state.elements = next;
        self.publish(&state);
        Ok(element)
    }
}

// =============================================================================
// UPDATE / REMOVE
// =============================================================================

impl BoardEngine {
    /// Merge `patch` into the element locally, then write it.
    ///
    /// # Errors
    ///
    /// `ElementNotFound` or `ValidationFailed` without a write;
    /// `StoreUnavailable` if the write fails, after reloading the board.
    pub async fn update(&self, element_id: Uuid, patch: ElementPatch) -> Result<(), BachecaError> {
        if patch.is_empty() {
            return Ok(());
        }

        {
            let mut state = self.state.write().await;
            if !state.closed {
                let current = state
                    .elements
                    .iter()
                    .find(|e| e.id == element_id)
                    .ok_or(BachecaError::ElementNotFound(element_id))?;
                let mut patched = current.clone();
                patched.apply_patch(&patch)?;
                state.elements = state
                    .elements
                    .iter()
                    .map(|e| if e.id == element_id { patched.clone() } else { e.clone() })
                    .collect();
                self.publish(&state);
            }
        }

        if let Err(e) = self.store.update_element(element_id, &patch).await {
            warn!(board_id = %self.board_id, %element_id, error = %e, "element update failed; reloading board");
            let err = self.fail(e).await;
            if !self.is_closed().await {
                // A failed reload leaves the board empty with its own notice.
                let _ = self.load().await;
            }
            return Err(err);
        }
        Ok(())
    }

    /// Delete the element remotely. The local sequence changes when the feed
    /// DELETE arrives.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the delete fails.
    pub async fn remove(&self, element_id: Uuid) -> Result<(), BachecaError> {
        if let Err(e) = self.store.delete_element(element_id).await {
            warn!(board_id = %self.board_id, %element_id, error = %e, "element delete failed");
            return Err(self.fail(e).await);
        }
        Ok(())
    }

    /// Delete every element not authored by the instructor. Local removal
    /// follows the feed DELETEs.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the bulk delete fails.
    pub async fn reset_participant_elements(&self) -> Result<u64, BachecaError> {
        match self
            .store
            .delete_elements_not_authored_by(self.board_id, INSTRUCTOR_AUTHOR)
            .await
        {
            Ok(count) => {
                info!(board_id = %self.board_id, count, "participant elements reset");
                Ok(count)
            }
            Err(e) => {
                warn!(board_id = %self.board_id, error = %e, "board reset failed");
                Err(self.fail(e).await)
            }
        }
    }
}

// =============================================================================
// FEED MERGE
// =============================================================================

impl BoardEngine {
    /// Merge one change-feed event. Returns whether the sequence changed.
    pub async fn apply_feed_event(&self, event: &FeedEvent) -> bool {
        if event.collection != Collection::BoardElements {
            return false;
        }
        if event.board_id != self.board_id {
            debug!(board_id = %self.board_id, event_board = %event.board_id, "feed event for another board");
            return false;
        }
        let change = match event.decode_element() {
            Ok(change) => change,
            Err(e) => {
                warn!(board_id = %self.board_id, error = %e, "dropping undecodable feed event");
                return false;
            }
        };

        let mut state = self.state.write().await;
        if state.closed {
            return false;
        }
        let changed = merge_change(&mut state, change);
        if changed {
            self.publish(&state);
        }
        changed
    }
}

fn merge_change(state: &mut EngineState, change: ElementChange) -> bool {
    match change {
        ElementChange::Insert(element) => {
            if state.deleted.contains(&element.id) || state.elements.iter().any(|e| e.id == element.id) {
                debug!(element_id = %element.id, "duplicate insert dropped");
                return false;
            }
            let mut next = state.elements.clone();
            next.push(element);
            state.elements = next;
            true
        }
        ElementChange::Update(element) => {
            if !state.elements.iter().any(|e| e.id == element.id) {
                debug!(element_id = %element.id, "update for unknown element dropped");
                return false;
            }
            state.elements = state
                .elements
                .iter()
                .map(|e| if e.id == element.id { element.clone() } else { e.clone() })
                .collect();
            true
        }
        ElementChange::Delete(id) => {
            state.deleted.insert(id);
            if !state.elements.iter().any(|e| e.id == id) {
                return false;
            }
            state.elements = state.elements.iter().filter(|e| e.id != id).cloned().collect();
            true
        }
    }
}

#[cfg(test)]
#[path = "engine_test.rs"]
mod tests;
