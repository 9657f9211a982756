//! Element actions: the gated commands a board UI issues.
//!
//! DESIGN
//! ======
//! Each action checks the permission gate and validates its input before
//! handing a patch to the engine, so a rejected action never reaches the
//! store. Ownership (`can_edit`) guards moving, editing and deleting;
//! voting and responding only need `can_interact` because they write into
//! elements other people authored. A locked board freezes every participant
//! action.
//!
//! Votes and responses are sent as whole field values computed from the
//! current snapshot, so two participants voting at the same moment race
//! under last-write-wins like any other data edit.

use uuid::Uuid;

use crate::error::BachecaError;
use crate::services::engine::BoardEngine;
use crate::services::{permission, poll};
use crate::types::{
    Actor, BoardConfig, BoardElement, DEFAULT_POSITION, DataPatch, ElementData, ElementKind, ElementPatch,
    ExercisePatch, ExerciseResponse, LinkPatch, POST_IT_COLORS, PollPatch, Position, PostItPatch, now_ms,
};

pub const MAX_POST_IT_CHARS: usize = 280;
pub const MAX_QUESTION_CHARS: usize = 500;
pub const MAX_RESPONSE_CHARS: usize = 1000;
pub const DEFAULT_LINK_LABEL: &str = "Link";

/// Who is acting, on which board, under which configuration.
#[derive(Clone, Copy)]
pub struct ActionContext<'a> {
    pub engine: &'a BoardEngine,
    pub actor: &'a Actor,
    pub config: &'a BoardConfig,
}

impl<'a> ActionContext<'a> {
    #[must_use]
    pub fn new(engine: &'a BoardEngine, actor: &'a Actor, config: &'a BoardConfig) -> Self {
        Self { engine, actor, config }
    }

    fn element(&self, element_id: Uuid) -> Result<BoardElement, BachecaError> {
        self.engine
            .element(element_id)
            .ok_or(BachecaError::ElementNotFound(element_id))
    }

    /// Element the actor may modify: owned (or instructor) and board not locked.
    fn owned_element(&self, element_id: Uuid) -> Result<BoardElement, BachecaError> {
        let element = self.element(element_id)?;
        permission::ensure_interact(self.actor, self.config)?;
        permission::ensure_edit(self.actor, &element)?;
        Ok(element)
    }
}

fn require_text(raw: &str, what: &str, max_chars: usize) -> Result<String, BachecaError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(BachecaError::invalid(format!("{what} is empty")));
    }
    if text.chars().count() > max_chars {
        return Err(BachecaError::invalid(format!("{what} exceeds {max_chars} characters")));
    }
    Ok(text.to_owned())
}

fn kind_mismatch(element: &BoardElement, expected: ElementKind) -> BachecaError {
    BachecaError::invalid(format!("element {} is a {}, not a {expected}", element.id, element.kind()))
}

// =============================================================================
// CREATE / MOVE / DELETE
// =============================================================================

/// Place a new element of `kind`, at `position` or the default spot.
///
/// # Errors
///
/// `PermissionDenied` when the kind is disabled or the board is locked;
/// `StoreUnavailable` if the insert fails.
pub async fn add_element(
    ctx: ActionContext<'_>,
    kind: ElementKind,
    position: Option<Position>,
) -> Result<BoardElement, BachecaError> {
    permission::ensure_interact(ctx.actor, ctx.config)?;
    ctx.engine
        .add(kind, ctx.actor, position.unwrap_or(DEFAULT_POSITION), ctx.config)
        .await
}

/// # Errors
///
/// `ElementNotFound`, `PermissionDenied`, or `StoreUnavailable` from the write.
pub async fn move_element(ctx: ActionContext<'_>, element_id: Uuid, position: Position) -> Result<(), BachecaError> {
    ctx.owned_element(element_id)?;
    ctx.engine
        .update(element_id, ElementPatch::position(position))
        .await
}

/// Ask the store to delete an element; it disappears when the feed confirms.
///
/// # Errors
///
/// `ElementNotFound`, `PermissionDenied`, or `StoreUnavailable`.
pub async fn delete_element(ctx: ActionContext<'_>, element_id: Uuid) -> Result<(), BachecaError> {
    ctx.owned_element(element_id)?;
    ctx.engine.remove(element_id).await
}

// =============================================================================
// POST-IT
// =============================================================================

/// # Errors
///
/// `ValidationFailed` for blank or over-long text or a non post-it element.
pub async fn save_post_it_text(ctx: ActionContext<'_>, element_id: Uuid, text: &str) -> Result<(), BachecaError> {
    let element = ctx.owned_element(element_id)?;
    if element.kind() != ElementKind::PostIt {
        return Err(kind_mismatch(&element, ElementKind::PostIt));
    }
    let text = require_text(text, "post-it text", MAX_POST_IT_CHARS)?;
    let patch = DataPatch::PostIt(PostItPatch { text: Some(text), color: None });
    ctx.engine.update(element_id, ElementPatch::data(patch)).await
}

/// # Errors
///
/// `ValidationFailed` for a color outside the post-it set.
pub async fn set_post_it_color(ctx: ActionContext<'_>, element_id: Uuid, color: &str) -> Result<(), BachecaError> {
    let element = ctx.owned_element(element_id)?;
    if element.kind() != ElementKind::PostIt {
        return Err(kind_mismatch(&element, ElementKind::PostIt));
    }
    if !POST_IT_COLORS.contains(&color) {
        return Err(BachecaError::invalid(format!("unknown post-it color: {color}")));
    }
    let patch = DataPatch::PostIt(PostItPatch { text: None, color: Some(color.to_owned()) });
    ctx.engine.update(element_id, ElementPatch::data(patch)).await
}

// =============================================================================
// POLL
// =============================================================================

/// Save an edited poll. Existing votes are kept.
///
/// # Errors
///
/// `ValidationFailed` when the poll does not validate.
pub async fn save_poll(
    ctx: ActionContext<'_>,
    element_id: Uuid,
    question: &str,
    options: &[String],
    multiple_choice: bool,
) -> Result<(), BachecaError> {
    let element = ctx.owned_element(element_id)?;
    if element.kind() != ElementKind::Poll {
        return Err(kind_mismatch(&element, ElementKind::Poll));
    }
    let (question, options) = poll::validate_poll(question, options)?;
    let patch = DataPatch::Poll(PollPatch {
        question: Some(question),
        options: Some(options),
        multiple_choice: Some(multiple_choice),
        votes: None,
    });
    ctx.engine.update(element_id, ElementPatch::data(patch)).await
}

/// Cast the actor's vote for `option`.
///
/// # Errors
///
/// `PermissionDenied` on a locked board; `ValidationFailed` for an out of
/// range option or a non-poll element.
pub async fn vote(ctx: ActionContext<'_>, element_id: Uuid, option: usize) -> Result<(), BachecaError> {
    let element = ctx.element(element_id)?;
    permission::ensure_interact(ctx.actor, ctx.config)?;
    let ElementData::Poll(data) = &element.data else {
        return Err(kind_mismatch(&element, ElementKind::Poll));
    };
    let votes = poll::cast_vote(data, ctx.actor.author(), option)?;
    let patch = DataPatch::Poll(PollPatch { votes: Some(votes), ..PollPatch::default() });
    ctx.engine.update(element_id, ElementPatch::data(patch)).await
}

// =============================================================================
// EXERCISE
// =============================================================================

/// # Errors
///
/// `ValidationFailed` for a blank or over-long question.
pub async fn save_exercise_question(
    ctx: ActionContext<'_>,
    element_id: Uuid,
    question: &str,
) -> Result<(), BachecaError> {
    let element = ctx.owned_element(element_id)?;
    if element.kind() != ElementKind::Exercise {
        return Err(kind_mismatch(&element, ElementKind::Exercise));
    }
    let question = require_text(question, "exercise question", MAX_QUESTION_CHARS)?;
    let patch = DataPatch::Exercise(ExercisePatch { question: Some(question), responses: None });
    ctx.engine.update(element_id, ElementPatch::data(patch)).await
}

/// Append the actor's answer. Participants answer once; the instructor may
/// answer any number of times.
///
/// # Errors
///
/// `PermissionDenied` on a locked board; `ValidationFailed` for a blank
/// answer, a second participant answer, or a non-exercise element.
pub async fn submit_response(ctx: ActionContext<'_>, element_id: Uuid, text: &str) -> Result<(), BachecaError> {
    let element = ctx.element(element_id)?;
    permission::ensure_interact(ctx.actor, ctx.config)?;
    let ElementData::Exercise(data) = &element.data else {
        return Err(kind_mismatch(&element, ElementKind::Exercise));
    };
    let text = require_text(text, "response", MAX_RESPONSE_CHARS)?;
    let author = ctx.actor.author();
    if !ctx.actor.is_instructor() && data.responses.iter().any(|r| r.author == author) {
        return Err(BachecaError::invalid(format!("{author} has already answered")));
    }

    let mut responses = data.responses.clone();
    responses.push(ExerciseResponse { author: author.to_owned(), text, timestamp: now_ms() });
    let patch = DataPatch::Exercise(ExercisePatch { question: None, responses: Some(responses) });
    ctx.engine.update(element_id, ElementPatch::data(patch)).await
}

// =============================================================================
// LINK
// =============================================================================

/// Prefix `https://` unless the URL already names http or https.
#[must_use]
pub fn normalize_url(raw: &str) -> String {
    let url = raw.trim();
    let lower = url.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        url.to_owned()
    } else {
        format!("https://{url}")
    }
}

/// # Errors
///
/// `ValidationFailed` for a blank URL or a non-link element.
pub async fn save_link(ctx: ActionContext<'_>, element_id: Uuid, url: &str, title: &str) -> Result<(), BachecaError> {
    let element = ctx.owned_element(element_id)?;
    if element.kind() != ElementKind::Link {
        return Err(kind_mismatch(&element, ElementKind::Link));
    }
    if url.trim().is_empty() {
        return Err(BachecaError::invalid("link url is empty"));
    }
    let title = match title.trim() {
        "" => DEFAULT_LINK_LABEL.to_owned(),
        t => t.to_owned(),
    };
    let patch = DataPatch::Link(LinkPatch { url: Some(normalize_url(url)), title: Some(title) });
    ctx.engine.update(element_id, ElementPatch::data(patch)).await
}

#[cfg(test)]
#[path = "actions_test.rs"]
mod tests;
