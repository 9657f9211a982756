//! Freehand drawing layer: per-client tool state and the shared raster.
//!
//! DESIGN
//! ======
//! `DrawingState` is local to one client and never synchronised; it only
//! governs the next stroke. The shared layer is the board's `drawing_data`,
//! overwritten wholesale when a stroke is committed and cleared to `None` by
//! the instructor.
//!
//! Tool, color and thickness only change while drawing mode is on, and color
//! only applies to the pen, the same constraints the toolbar enforces.

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::BachecaError;
use crate::services::permission;
use crate::store::RemoteStore;
use crate::types::{Actor, Board, BoardPatch};

pub const PALETTE: [&str; 6] = ["#000000", "#EF4444", "#3B82F6", "#10B981", "#F59E0B", "#8B5CF6"];
pub const THICKNESS_PRESETS: [u32; 3] = [2, 8, 30];
pub const DEFAULT_COLOR: &str = "#000000";
pub const DEFAULT_THICKNESS: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    #[default]
    Pen,
    Eraser,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawingState {
    pub is_drawing: bool,
    pub tool: Tool,
    pub color: String,
    pub thickness: u32,
}

impl Default for DrawingState {
    fn default() -> Self {
        Self { is_drawing: false, tool: Tool::Pen, color: DEFAULT_COLOR.to_owned(), thickness: DEFAULT_THICKNESS }
    }
}

impl DrawingState {
    pub fn toggle_drawing(&mut self) {
        self.is_drawing = !self.is_drawing;
    }

    /// # Errors
    ///
    /// `ValidationFailed` while drawing mode is off.
    pub fn set_tool(&mut self, tool: Tool) -> Result<(), BachecaError> {
        self.require_drawing()?;
        self.tool = tool;
        Ok(())
    }

    /// # Errors
    ///
    /// `ValidationFailed` while drawing mode is off, with the eraser selected,
    /// or for a color outside the palette.
    pub fn set_color(&mut self, color: &str) -> Result<(), BachecaError> {
        self.require_drawing()?;
        if self.tool != Tool::Pen {
            return Err(BachecaError::invalid("color applies to the pen only"));
        }
        let Some(color) = PALETTE.iter().find(|c| c.eq_ignore_ascii_case(color)) else {
            return Err(BachecaError::invalid(format!("color {color} is not in the palette")));
        };
        self.color = (*color).to_owned();
        Ok(())
    }

    /// # Errors
    ///
    /// `ValidationFailed` while drawing mode is off or for a non-preset thickness.
    pub fn set_thickness(&mut self, thickness: u32) -> Result<(), BachecaError> {
        self.require_drawing()?;
        if !THICKNESS_PRESETS.contains(&thickness) {
            return Err(BachecaError::invalid(format!("thickness {thickness} is not a preset")));
        }
        self.thickness = thickness;
        Ok(())
    }

    fn require_drawing(&self) -> Result<(), BachecaError> {
        if self.is_drawing {
            Ok(())
        } else {
            Err(BachecaError::invalid("drawing mode is off"))
        }
    }
}

// =============================================================================
// SHARED LAYER
// =============================================================================

/// Replace the board's drawing layer with the raster captured after a stroke.
///
/// # Errors
///
/// `PermissionDenied` if `actor` may not draw, `ValidationFailed` for an
/// empty raster, `BoardNotFound` if the board is gone, `StoreUnavailable`
/// on store failure.
pub async fn commit_stroke(
    store: &dyn RemoteStore,
    actor: &Actor,
    board: &Board,
    raster: String,
) -> Result<Board, BachecaError> {
    permission::ensure_draw(actor, &board.config)?;
    if raster.is_empty() {
        return Err(BachecaError::invalid("drawing raster is empty"));
    }
    let patch = BoardPatch { drawing_data: Some(Some(raster)), ..BoardPatch::default() };
    store
        .update_board(board.id, &patch)
        .await?
        .ok_or(BachecaError::BoardNotFound(board.id))
}

/// Blank the drawing layer.
///
/// # Errors
///
/// `PermissionDenied` for participants, `BoardNotFound` if the board is
/// gone, `StoreUnavailable` on store failure.
pub async fn clear_drawing(store: &dyn RemoteStore, actor: &Actor, board_id: Uuid) -> Result<Board, BachecaError> {
    permission::ensure_configure(actor)?;
    let patch = BoardPatch { drawing_data: Some(None), ..BoardPatch::default() };
    let board = store
        .update_board(board_id, &patch)
        .await?
        .ok_or(BachecaError::BoardNotFound(board_id))?;
    info!(%board_id, "drawing cleared");
    Ok(board)
}

#[cfg(test)]
#[path = "drawing_test.rs"]
mod tests;
