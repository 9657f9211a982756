//! Board service: dashboard CRUD, configuration and participant join.
//!
//! DESIGN
//! ======
//! Thin layer over `RemoteStore` for board metadata. Nothing here is
//! concurrency-sensitive: metadata writes are whole-field overwrites and the
//! open session refetches the board when the feed reports a change.
//! Instructor-only operations check `permission::can_configure` before any
//! store call.

use tracing::info;
use uuid::Uuid;

use crate::error::BachecaError;
use crate::services::permission;
use crate::store::RemoteStore;
use crate::types::{
    Actor, Board, BoardPatch, ConfigPatch, DEFAULT_BOARD_TITLE, INSTRUCTOR_AUTHOR, MAX_NICKNAME_CHARS, NewBoard, Participant,
};

// =============================================================================
// CRUD
// =============================================================================

/// List every board, newest first.
///
/// # Errors
///
/// Returns `StoreUnavailable` if the read fails.
pub async fn list_boards(store: &dyn RemoteStore) -> Result<Vec<Board>, BachecaError> {
    Ok(store.list_boards().await?)
}

/// Create a board with the default configuration. A blank or missing title
/// becomes the default title.
///
/// # Errors
///
/// `PermissionDenied` for participants; `StoreUnavailable` if the insert fails.
pub async fn create_board(store: &dyn RemoteStore, actor: &Actor, title: Option<&str>) -> Result<Board, BachecaError> {
    permission::ensure_configure(actor)?;
    let title = title
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_BOARD_TITLE);
    let board = store
        .insert_board(NewBoard { title: title.to_owned(), ..NewBoard::default() })
        .await?;
    info!(board_id = %board.id, title = %board.title, "board created");
    Ok(board)
}

/// Fetch one board with its roster.
///
/// # Errors
///
/// `BoardNotFound` if absent; `StoreUnavailable` if the read fails.
pub async fn open_board(store: &dyn RemoteStore, board_id: Uuid) -> Result<Board, BachecaError> {
    store
        .get_board(board_id)
        .await?
        .ok_or(BachecaError::BoardNotFound(board_id))
}

/// # Errors
///
/// `PermissionDenied` for participants, `ValidationFailed` for a blank title,
/// `BoardNotFound` if absent, `StoreUnavailable` if the write fails.
pub async fn rename_board(
    store: &dyn RemoteStore,
    actor: &Actor,
    board_id: Uuid,
    title: &str,
) -> Result<Board, BachecaError> {
    permission::ensure_configure(actor)?;
    let title = title.trim();
    if title.is_empty() {
        return Err(BachecaError::invalid("board title is empty"));
    }
    let patch = BoardPatch { title: Some(title.to_owned()), ..BoardPatch::default() };
    store
        .update_board(board_id, &patch)
        .await?
        .ok_or(BachecaError::BoardNotFound(board_id))
}

/// Delete a board together with its elements and roster.
///
/// # Errors
///
/// `PermissionDenied` for participants, `BoardNotFound` if absent,
/// `StoreUnavailable` if the delete fails.
pub async fn delete_board(store: &dyn RemoteStore, actor: &Actor, board_id: Uuid) -> Result<(), BachecaError> {
    permission::ensure_configure(actor)?;
    if !store.delete_board(board_id).await? {
        return Err(BachecaError::BoardNotFound(board_id));
    }
    info!(%board_id, "board deleted");
    Ok(())
}

// =============================================================================
// CONFIG
// =============================================================================

/// Toggle the capability flags named by `patch`.
///
/// # Errors
///
/// `PermissionDenied` for participants, `ValidationFailed` for an empty
/// patch, `BoardNotFound` if absent, `StoreUnavailable` on store failure.
pub async fn update_config(
    store: &dyn RemoteStore,
    actor: &Actor,
    board_id: Uuid,
    patch: ConfigPatch,
) -> Result<Board, BachecaError> {
    permission::ensure_configure(actor)?;
    if patch.is_empty() {
        return Err(BachecaError::invalid("config patch names no flags"));
    }
    let board = open_board(store, board_id).await?;
    let mut config = board.config;
    patch.apply(&mut config);

    let updated = store
        .update_board(board_id, &BoardPatch { config: Some(config), ..BoardPatch::default() })
        .await?
        .ok_or(BachecaError::BoardNotFound(board_id))?;
    info!(%board_id, locked = updated.config.is_locked, "board config updated");
    Ok(updated)
}

// =============================================================================
// JOIN
// =============================================================================

/// Trim a nickname and check it fits the roster.
///
/// # Errors
///
/// Returns `ValidationFailed` if blank, longer than 30 characters, or the
/// instructor's reserved author name in any case.
pub fn validate_nickname(raw: &str) -> Result<String, BachecaError> {
    let nickname = raw.trim();
    if nickname.is_empty() {
        return Err(BachecaError::invalid("nickname is empty"));
    }
    if nickname.chars().count() > MAX_NICKNAME_CHARS {
        return Err(BachecaError::invalid(format!("nickname exceeds {MAX_NICKNAME_CHARS} characters")));
    }
    // Reset keeps rows authored by this name.
    if nickname.eq_ignore_ascii_case(INSTRUCTOR_AUTHOR) {
        return Err(BachecaError::invalid("nickname is reserved"));
    }
    Ok(nickname.to_owned())
}

/// Join `board_id` as `nickname`. Rejoining with the same nickname refreshes
/// `last_seen`; duplicate nicknames are accepted.
///
/// # Errors
///
/// `ValidationFailed` for a bad nickname, `BoardNotFound` if absent,
/// `StoreUnavailable` on store failure.
pub async fn join_board(
    store: &dyn RemoteStore,
    board_id: Uuid,
    nickname: &str,
) -> Result<(Board, Participant), BachecaError> {
    let nickname = validate_nickname(nickname)?;
    open_board(store, board_id).await?;
    let participant = store.upsert_participant(board_id, &nickname).await?;
    let board = open_board(store, board_id).await?;
    info!(%board_id, nickname = %participant.nickname, "participant joined");
    Ok((board, participant))
}

#[cfg(test)]
#[path = "board_test.rs"]
mod tests;
