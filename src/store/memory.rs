//! In-process remote store with a built-in change feed.
//!
//! DESIGN
//! ======
//! Tables live behind one mutex and hold rows in their storage shape, so
//! element writes go through the same encode/decode path as the `PostgreSQL`
//! adapter. Every successful write publishes its change event on the
//! embedded `FeedHub` before the call returns, which means a subscriber can
//! see the INSERT of an element before the inserting caller sees the reply.
//!
//! `set_available(false)` makes every call fail with
//! `StoreError::Unavailable`, to exercise outage handling.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use uuid::Uuid;

use crate::error::StoreError;
use crate::feed::memory::{DEFAULT_FEED_BUFFER, FeedHub};
use crate::feed::{ChangeFeed, ChangeKind, FeedEvent, Subscription};
use crate::store::RemoteStore;
use crate::types::{
    Board, BoardElement, BoardPatch, ElementPatch, ElementRow, NewBoard, NewElement, Participant, now_ms,
};

#[derive(Default)]
struct Tables {
    boards: Vec<Board>,
    elements: Vec<ElementRow>,
    participants: HashMap<Uuid, Vec<Participant>>,
    last_created_at: i64,
}

impl Tables {
    /// Strictly increasing creation stamp so ordering by `created_at` is total.
    fn next_created_at(&mut self) -> i64 {
        let ts = now_ms().max(self.last_created_at + 1);
        self.last_created_at = ts;
        ts
    }

    fn board_with_roster(&self, board: &Board) -> Board {
        let mut board = board.clone();
        board.participants = self.participants.get(&board.id).cloned().unwrap_or_default();
        board
    }
}

pub struct MemoryStore {
    tables: Mutex<Tables>,
    hub: FeedHub,
    available: AtomicBool,
    feed_buffer: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_feed_buffer(DEFAULT_FEED_BUFFER)
    }

    #[must_use]
    pub fn with_feed_buffer(feed_buffer: usize) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            hub: FeedHub::new(),
            available: AtomicBool::new(true),
            feed_buffer,
        }
    }

    /// Toggle simulated outage.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Feed hub this store publishes on.
    #[must_use]
    pub fn hub(&self) -> &FeedHub {
        &self.hub
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store is offline".into()))
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait::async_trait]
impl RemoteStore for MemoryStore {
    async fn list_boards(&self) -> Result<Vec<Board>, StoreError> {
        self.check_available()?;
        let tables = self.lock();
        let mut boards: Vec<Board> = tables.boards.iter().map(|b| tables.board_with_roster(b)).collect();
        boards.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(boards)
    }

    async fn get_board(&self, board_id: Uuid) -> Result<Option<Board>, StoreError> {
        self.check_available()?;
        let tables = self.lock();
        Ok(tables
            .boards
            .iter()
            .find(|b| b.id == board_id)
            .map(|b| tables.board_with_roster(b)))
    }

    async fn insert_board(&self, board: NewBoard) -> Result<Board, StoreError> {
        self.check_available()?;
        let created = {
            let mut tables = self.lock();
            let created = Board {
                id: Uuid::new_v4(),
                title: board.title,
                created_at: tables.next_created_at(),
                config: board.config,
                drawing_data: None,
                participants: Vec::new(),
            };
            tables.boards.push(created.clone());
            created
        };
        self.hub.publish(&FeedEvent::board(ChangeKind::Insert, created.id));
        Ok(created)
    }

    async fn update_board(&self, board_id: Uuid, patch: &BoardPatch) -> Result<Option<Board>, StoreError> {
        self.check_available()?;
        let updated = {
            let mut tables = self.lock();
            let Some(board) = tables.boards.iter_mut().find(|b| b.id == board_id) else {
                return Ok(None);
            };
            patch.apply(board);
            let board = board.clone();
            tables.board_with_roster(&board)
        };
        self.hub.publish(&FeedEvent::board(ChangeKind::Update, board_id));
        Ok(Some(updated))
    }

    async fn delete_board(&self, board_id: Uuid) -> Result<bool, StoreError> {
        self.check_available()?;
        let removed_elements = {
            let mut tables = self.lock();
            let before = tables.boards.len();
            tables.boards.retain(|b| b.id != board_id);
            if tables.boards.len() == before {
                return Ok(false);
            }
            tables.participants.remove(&board_id);
            let (removed, kept): (Vec<ElementRow>, Vec<ElementRow>) =
                std::mem::take(&mut tables.elements).into_iter().partition(|row| row.board_id == board_id);
            tables.elements = kept;
            removed
        };
        for row in removed_elements {
            self.hub.publish(&FeedEvent::element_delete(board_id, row.id));
        }
        self.hub.publish(&FeedEvent::board(ChangeKind::Delete, board_id));
        Ok(true)
    }

    async fn list_elements(&self, board_id: Uuid) -> Result<Vec<BoardElement>, StoreError> {
        self.check_available()?;
        let mut rows: Vec<ElementRow> = self
            .lock()
            .elements
            .iter()
            .filter(|row| row.board_id == board_id)
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.created_at);
        rows.into_iter()
            .map(|row| BoardElement::try_from(row).map_err(StoreError::from))
            .collect()
    }

    async fn insert_element(&self, element: NewElement) -> Result<BoardElement, StoreError> {
        self.check_available()?;
        let row = {
            let mut tables = self.lock();
            let row = ElementRow {
                id: Uuid::new_v4(),
                board_id: element.board_id,
                kind: element.data.kind(),
                position_x: element.position.x,
                position_y: element.position.y,
                author: element.author,
                created_at: tables.next_created_at(),
                data: element.data.encode()?,
            };
            tables.elements.push(row.clone());
            row
        };
        self.hub
            .publish(&FeedEvent::element_upsert(ChangeKind::Insert, &row)?);
        Ok(BoardElement::try_from(row)?)
    }

    async fn update_element(&self, element_id: Uuid, patch: &ElementPatch) -> Result<(), StoreError> {
        self.check_available()?;
        let row = {
            let mut tables = self.lock();
            let Some(row) = tables.elements.iter_mut().find(|row| row.id == element_id) else {
                return Ok(());
            };
            let mut element = BoardElement::try_from(row.clone())?;
            element
                .apply_patch(patch)
                .map_err(|e| StoreError::Decode(e.to_string()))?;
            *row = element.to_row()?;
            row.clone()
        };
        self.hub
            .publish(&FeedEvent::element_upsert(ChangeKind::Update, &row)?);
        Ok(())
    }

    async fn delete_element(&self, element_id: Uuid) -> Result<(), StoreError> {
        self.check_available()?;
        let removed = {
            let mut tables = self.lock();
            let index = tables.elements.iter().position(|row| row.id == element_id);
            index.map(|i| tables.elements.remove(i))
        };
        if let Some(row) = removed {
            self.hub.publish(&FeedEvent::element_delete(row.board_id, row.id));
        }
        Ok(())
    }

    async fn delete_elements_not_authored_by(&self, board_id: Uuid, author: &str) -> Result<u64, StoreError> {
        self.check_available()?;
        let removed = {
            let mut tables = self.lock();
            let (removed, kept): (Vec<ElementRow>, Vec<ElementRow>) = std::mem::take(&mut tables.elements)
                .into_iter()
                .partition(|row| row.board_id == board_id && row.author != author);
            tables.elements = kept;
            removed
        };
        for row in &removed {
            self.hub.publish(&FeedEvent::element_delete(board_id, row.id));
        }
        Ok(removed.len() as u64)
    }

    async fn upsert_participant(&self, board_id: Uuid, nickname: &str) -> Result<Participant, StoreError> {
        self.check_available()?;
        let mut tables = self.lock();
        if !tables.boards.iter().any(|b| b.id == board_id) {
            return Err(StoreError::Unavailable(format!("board {board_id} does not exist")));
        }
        let now = now_ms();
        let roster = tables.participants.entry(board_id).or_default();
        if let Some(existing) = roster.iter_mut().find(|p| p.nickname == nickname) {
            existing.last_seen = now;
            return Ok(existing.clone());
        }
        let participant = Participant { nickname: nickname.to_owned(), joined_at: now, last_seen: now };
        roster.push(participant.clone());
        Ok(participant)
    }

    async fn list_participants(&self, board_id: Uuid) -> Result<Vec<Participant>, StoreError> {
        self.check_available()?;
        Ok(self
            .lock()
            .participants
            .get(&board_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl ChangeFeed for MemoryStore {
    async fn subscribe(&self, board_id: Uuid) -> Result<Subscription, StoreError> {
        self.check_available()?;
        Ok(self.hub.subscribe(board_id, self.feed_buffer))
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
