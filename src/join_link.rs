//! Participant deep links of the form `<base>?board=<uuid>`.

use uuid::Uuid;

use crate::error::ErrorCode;

const BOARD_PARAM: &str = "board";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinLinkError {
    #[error("link has no board parameter")]
    MissingBoard,
    #[error("invalid board id in link: {0}")]
    InvalidBoardId(String),
}

impl ErrorCode for JoinLinkError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::MissingBoard => "E_LINK_MISSING_BOARD",
            Self::InvalidBoardId(_) => "E_LINK_INVALID_BOARD",
        }
    }
}

/// Build the link a participant opens to join `board_id`.
#[must_use]
pub fn build(base_url: &str, board_id: Uuid) -> String {
    let base = base_url.trim();
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{base}{separator}{BOARD_PARAM}={board_id}")
}

/// Extract the board id from a join link.
///
/// Only the query string is inspected; a bare `board=<uuid>` query is
/// accepted as well. The fragment, if any, is ignored.
///
/// # Errors
///
/// Returns `MissingBoard` when no `board` parameter is present and
/// `InvalidBoardId` when its value is not a UUID.
pub fn parse(url: &str) -> Result<Uuid, JoinLinkError> {
    let without_fragment = url.trim().split('#').next().unwrap_or_default();
    let query = match without_fragment.split_once('?') {
        Some((_, query)) => query,
        None => without_fragment,
    };

    let value = query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == BOARD_PARAM)
        .map(|(_, value)| value)
        .ok_or(JoinLinkError::MissingBoard)?;

    Uuid::parse_str(value).map_err(|_| JoinLinkError::InvalidBoardId(value.to_owned()))
}

#[cfg(test)]
#[path = "join_link_test.rs"]
mod tests;
