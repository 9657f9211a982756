//! Remote store: the persistence seam for boards, elements and rosters.
//!
//! ARCHITECTURE
//! ============
//! `RemoteStore` is the only way the rest of the crate touches persisted
//! state. Two adapters implement it: `memory::MemoryStore` (in-process,
//! doubles as its own change feed) and `postgres::PgStore` (`SQLx`).
//!
//! Contract shared by both adapters:
//! - identities and `created_at` are assigned by the store on insert;
//! - `list_elements` is ordered by `created_at` ascending;
//! - updates and deletes of a missing id succeed and change nothing;
//! - every write to `boards` / `board_elements` is later announced on the
//!   board's change feed (at least once, in no guaranteed order).

pub mod memory;
pub mod postgres;

use uuid::Uuid;

use crate::error::StoreError;
use crate::types::{Board, BoardElement, BoardPatch, ElementPatch, NewBoard, NewElement, Participant};

#[async_trait::async_trait]
pub trait RemoteStore: Send + Sync {
    /// All boards, newest first, each with its roster.
    async fn list_boards(&self) -> Result<Vec<Board>, StoreError>;

    /// One board with its roster, or `None` if it does not exist.
    async fn get_board(&self, board_id: Uuid) -> Result<Option<Board>, StoreError>;

    async fn insert_board(&self, board: NewBoard) -> Result<Board, StoreError>;

    /// Apply a partial update. Returns the updated board, or `None` if absent.
    async fn update_board(&self, board_id: Uuid, patch: &BoardPatch) -> Result<Option<Board>, StoreError>;

    /// Delete a board with its elements and roster. Returns whether a row was removed.
    async fn delete_board(&self, board_id: Uuid) -> Result<bool, StoreError>;

    /// Elements of one board ordered by creation time ascending.
    async fn list_elements(&self, board_id: Uuid) -> Result<Vec<BoardElement>, StoreError>;

    /// Insert an element and return the stored row with its assigned id.
    async fn insert_element(&self, element: NewElement) -> Result<BoardElement, StoreError>;

    /// Merge `patch` into the stored element. Missing ids are not an error.
    async fn update_element(&self, element_id: Uuid, patch: &ElementPatch) -> Result<(), StoreError>;

    /// Delete one element. Missing ids are not an error.
    async fn delete_element(&self, element_id: Uuid) -> Result<(), StoreError>;

    /// Delete every element of the board whose author differs from `author`.
    /// Returns the number of deleted rows.
    async fn delete_elements_not_authored_by(&self, board_id: Uuid, author: &str) -> Result<u64, StoreError>;

    /// Insert or refresh a roster entry keyed by `(board_id, nickname)`.
    async fn upsert_participant(&self, board_id: Uuid, nickname: &str) -> Result<Participant, StoreError>;

    async fn list_participants(&self, board_id: Uuid) -> Result<Vec<Participant>, StoreError>;
}
