//! Poll vote aggregation.
//!
//! DESIGN
//! ======
//! Every figure is derived from `PollData::votes` on demand; there is no
//! cached tally, so results always match the latest reconciled element.
//! `cast_vote` returns the whole new vote map, which is what the element
//! update sends: the `votes` field is one last-write-wins unit.

use crate::error::BachecaError;
use crate::types::{MAX_POLL_OPTIONS, MIN_POLL_OPTIONS, PollData, Votes};

/// Number of voters whose selection includes `option`.
#[must_use]
pub fn vote_count(votes: &Votes, option: usize) -> usize {
    votes.values().filter(|selected| selected.contains(&option)).count()
}

/// Number of distinct voters with a non-empty selection.
#[must_use]
pub fn total_votes(votes: &Votes) -> usize {
    votes.values().filter(|selected| !selected.is_empty()).count()
}

/// Share of voters selecting `option`, rounded to a whole percent. 0 with no voters.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn vote_percentage(votes: &Votes, option: usize) -> u32 {
    let total = total_votes(votes);
    if total == 0 {
        return 0;
    }
    (vote_count(votes, option) as f64 / total as f64 * 100.0).round() as u32
}

#[must_use]
pub fn has_voted(votes: &Votes, nickname: &str, option: usize) -> bool {
    votes.get(nickname).is_some_and(|selected| selected.contains(&option))
}

/// Vote map after `nickname` picks `option`.
///
/// Single choice replaces the voter's selection with `{option}`. Multiple
/// choice toggles `option` in the voter's selection; a voter left with no
/// selection is dropped from the map.
///
/// # Errors
///
/// Returns `ValidationFailed` if `option` is out of range.
pub fn cast_vote(poll: &PollData, nickname: &str, option: usize) -> Result<Votes, BachecaError> {
    if option >= poll.options.len() {
        return Err(BachecaError::invalid(format!(
            "option {option} out of range for a poll with {} options",
            poll.options.len()
        )));
    }

    let mut votes = poll.votes.clone();
    if poll.multiple_choice {
        let selected = votes.entry(nickname.to_owned()).or_default();
        if !selected.remove(&option) {
            selected.insert(option);
        }
        if selected.is_empty() {
            votes.remove(nickname);
        }
    } else {
        votes.insert(nickname.to_owned(), std::iter::once(option).collect());
    }
    Ok(votes)
}

/// Clean up a poll edit: trims the question and drops blank options.
///
/// # Errors
///
/// Returns `ValidationFailed` when the question is blank, fewer than two
/// options remain, or more than eight are given.
pub fn validate_poll(question: &str, options: &[String]) -> Result<(String, Vec<String>), BachecaError> {
    let question = question.trim();
    if question.is_empty() {
        return Err(BachecaError::invalid("poll question is empty"));
    }
    let options: Vec<String> = options
        .iter()
        .map(|o| o.trim())
        .filter(|o| !o.is_empty())
        .map(str::to_owned)
        .collect();
    if options.len() < MIN_POLL_OPTIONS {
        return Err(BachecaError::invalid(format!("a poll needs at least {MIN_POLL_OPTIONS} options")));
    }
    if options.len() > MAX_POLL_OPTIONS {
        return Err(BachecaError::invalid(format!("a poll allows at most {MAX_POLL_OPTIONS} options")));
    }
    Ok((question.to_owned(), options))
}

#[cfg(test)]
#[path = "poll_test.rs"]
mod tests;
