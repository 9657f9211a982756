//! Board session: one open board bound to an actor.
//!
//! ARCHITECTURE
//! ============
//! Opening a session fetches the board, subscribes to its change feed,
//! then loads the elements. The subscription is taken first so no change
//! between the load and the subscribe is missed; the engine's merge rules
//! absorb the overlap.
//!
//! A pump task owns the subscription. Element events go to the engine.
//! Board events only carry the id, so the pump refetches the board and
//! publishes it on the session's `watch` channel. Closing the session (or
//! dropping it) aborts the pump, which drops the subscription and releases
//! the feed; the engine is closed so late results are ignored.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{BachecaError, Notice};
use crate::feed::{ChangeFeed, ChangeKind, Collection, Subscription};
use crate::services::actions::ActionContext;
use crate::services::engine::BoardEngine;
use crate::services::{board, drawing, permission};
use crate::store::RemoteStore;
use crate::types::{Actor, Board, BoardConfig, ConfigPatch};

pub struct BoardSession {
    actor: Actor,
    store: Arc<dyn RemoteStore>,
    engine: BoardEngine,
    board: Arc<watch::Sender<Option<Board>>>,
    pump: JoinHandle<()>,
}

impl BoardSession {
    /// Open `board_id` for `actor`.
    ///
    /// A failed element load does not fail the session: the engine starts
    /// empty and queues a notice.
    ///
    /// # Errors
    ///
    /// `BoardNotFound` if the board does not exist; `StoreUnavailable` if the
    /// board read or the feed subscription fails.
    pub async fn open(
        store: Arc<dyn RemoteStore>,
        feed: &dyn ChangeFeed,
        board_id: Uuid,
        actor: Actor,
    ) -> Result<Self, BachecaError> {
        let current = board::open_board(store.as_ref(), board_id).await?;
        let subscription = feed.subscribe(board_id).await?;

        let engine = BoardEngine::new(board_id, store.clone());
        if let Err(e) = engine.load().await {
            warn!(%board_id, error = %e, "opening board with empty element list");
        }

        let (tx, _rx) = watch::channel(Some(current));
        let board_tx = Arc::new(tx);
        let pump = tokio::spawn(pump(subscription, engine.clone(), store.clone(), board_tx.clone()));

        info!(%board_id, actor = %actor.author(), "board session opened");
        Ok(Self { actor, store, engine, board: board_tx, pump })
    }

    #[must_use]
    pub fn board_id(&self) -> Uuid {
        self.engine.board_id()
    }

    #[must_use]
    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    #[must_use]
    pub fn engine(&self) -> &BoardEngine {
        &self.engine
    }

    /// Latest board metadata, `None` once the board has been deleted.
    #[must_use]
    pub fn board(&self) -> Option<Board> {
        self.board.borrow().clone()
    }

    #[must_use]
    pub fn watch_board(&self) -> watch::Receiver<Option<Board>> {
        self.board.subscribe()
    }

    /// Current configuration; a deleted board allows nothing.
    #[must_use]
    pub fn config(&self) -> BoardConfig {
        self.board.borrow().as_ref().map_or(
            BoardConfig {
                allow_post_it: false,
                allow_drawing: false,
                allow_poll: false,
                allow_exercise: false,
                allow_link: false,
                is_locked: true,
            },
            |b| b.config,
        )
    }

    /// Build the action context for element commands against `config`.
    #[must_use]
    pub fn actions<'a>(&'a self, config: &'a BoardConfig) -> ActionContext<'a> {
        ActionContext::new(&self.engine, &self.actor, config)
    }

    pub async fn take_notices(&self) -> Vec<Notice> {
        self.engine.take_notices().await
    }

    /// Whether the feed pump is still running.
    #[must_use]
    pub fn is_live(&self) -> bool {
        !self.pump.is_finished()
    }

    // =========================================================================
    // INSTRUCTOR COMMANDS
    // =========================================================================

    /// # Errors
    ///
    /// See [`board::update_config`].
    pub async fn update_config(&self, patch: ConfigPatch) -> Result<Board, BachecaError> {
        let updated = board::update_config(self.store.as_ref(), &self.actor, self.board_id(), patch).await?;
        self.board.send_replace(Some(updated.clone()));
        Ok(updated)
    }

    /// # Errors
    ///
    /// See [`board::rename_board`].
    pub async fn rename(&self, title: &str) -> Result<Board, BachecaError> {
        let updated = board::rename_board(self.store.as_ref(), &self.actor, self.board_id(), title).await?;
        self.board.send_replace(Some(updated.clone()));
        Ok(updated)
    }

    /// Delete every participant element. Local removal follows the feed.
    ///
    /// # Errors
    ///
    /// `PermissionDenied` for participants; `StoreUnavailable` on failure.
    pub async fn reset(&self) -> Result<u64, BachecaError> {
        permission::ensure_configure(&self.actor)?;
        self.engine.reset_participant_elements().await
    }

    // =========================================================================
    // DRAWING
    // =========================================================================

    /// # Errors
    ///
    /// See [`drawing::commit_stroke`].
    pub async fn commit_stroke(&self, raster: String) -> Result<Board, BachecaError> {
        let current = self
            .board()
            .ok_or(BachecaError::BoardNotFound(self.board_id()))?;
        let updated = drawing::commit_stroke(self.store.as_ref(), &self.actor, &current, raster).await?;
        self.board.send_replace(Some(updated.clone()));
        Ok(updated)
    }

    /// # Errors
    ///
    /// See [`drawing::clear_drawing`].
    pub async fn clear_drawing(&self) -> Result<Board, BachecaError> {
        let updated = drawing::clear_drawing(self.store.as_ref(), &self.actor, self.board_id()).await?;
        self.board.send_replace(Some(updated.clone()));
        Ok(updated)
    }

    /// Stop the feed pump and ignore anything still in flight.
    pub async fn close(&self) {
        self.pump.abort();
        self.engine.close().await;
        info!(board_id = %self.board_id(), "board session closed");
    }
}

impl Drop for BoardSession {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

// =============================================================================
// FEED PUMP
// =============================================================================

async fn pump(
    mut subscription: Subscription,
    engine: BoardEngine,
    store: Arc<dyn RemoteStore>,
    board: Arc<watch::Sender<Option<Board>>>,
) {
    let board_id = subscription.board_id();
    while let Some(event) = subscription.recv().await {
        match event.collection {
            Collection::BoardElements => {
                engine.apply_feed_event(&event).await;
            }
            Collection::Boards if event.kind == ChangeKind::Delete => {
                info!(%board_id, "board deleted remotely; closing session");
                board.send_replace(None);
                engine.close().await;
                break;
            }
            Collection::Boards => match store.get_board(board_id).await {
                Ok(Some(fresh)) => {
                    board.send_replace(Some(fresh));
                }
                Ok(None) => debug!(%board_id, "board vanished before refetch"),
                Err(e) => warn!(%board_id, error = %e, "board refetch failed"),
            },
        }
    }
    debug!(%board_id, "feed pump stopped");
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
