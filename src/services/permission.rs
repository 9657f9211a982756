//! Permission gate consulted before every mutating board action.
//!
//! The instructor passes every check. Participants are bounded by the board's
//! capability flags and by element authorship. Nothing here is re-checked by
//! the remote store.

use crate::error::BachecaError;
use crate::types::{Actor, BoardConfig, BoardElement, ElementKind};

/// Whether the actor may place a new element of `kind`.
#[must_use]
pub fn can_create(kind: ElementKind, is_instructor: bool, config: &BoardConfig) -> bool {
    is_instructor || config.allows(kind)
}

/// Whether the actor may move, edit or delete `element`.
#[must_use]
pub fn can_edit(element: &BoardElement, is_instructor: bool, nickname: &str) -> bool {
    is_instructor || element.author == nickname
}

/// Whether the actor may vote or respond. Participants are frozen while the
/// board is locked.
#[must_use]
pub fn can_interact(is_instructor: bool, config: &BoardConfig) -> bool {
    is_instructor || !config.is_locked
}

/// Whether the actor may commit strokes to the drawing layer.
#[must_use]
pub fn can_draw(is_instructor: bool, config: &BoardConfig) -> bool {
    is_instructor || config.allow_drawing
}

/// Board-level configuration, title, reset, clear and delete.
#[must_use]
pub fn can_configure(is_instructor: bool) -> bool {
    is_instructor
}

// =============================================================================
// GUARDS
// =============================================================================

pub(crate) fn ensure_create(actor: &Actor, kind: ElementKind, config: &BoardConfig) -> Result<(), BachecaError> {
    if can_create(kind, actor.is_instructor(), config) {
        Ok(())
    } else {
        Err(BachecaError::denied(format!("creating {kind} elements is not allowed on this board")))
    }
}

pub(crate) fn ensure_edit(actor: &Actor, element: &BoardElement) -> Result<(), BachecaError> {
    if can_edit(element, actor.is_instructor(), actor.author()) {
        Ok(())
    } else {
        Err(BachecaError::denied(format!("element {} belongs to {}", element.id, element.author)))
    }
}

pub(crate) fn ensure_interact(actor: &Actor, config: &BoardConfig) -> Result<(), BachecaError> {
    if can_interact(actor.is_instructor(), config) {
        Ok(())
    } else {
        Err(BachecaError::denied("board is locked"))
    }
}

pub(crate) fn ensure_draw(actor: &Actor, config: &BoardConfig) -> Result<(), BachecaError> {
    if can_draw(actor.is_instructor(), config) {
        Ok(())
    } else {
        Err(BachecaError::denied("drawing is not allowed on this board"))
    }
}

pub(crate) fn ensure_configure(actor: &Actor) -> Result<(), BachecaError> {
    if can_configure(actor.is_instructor()) {
        Ok(())
    } else {
        Err(BachecaError::denied("only the instructor can change the board"))
    }
}

#[cfg(test)]
#[path = "permission_test.rs"]
mod tests;
