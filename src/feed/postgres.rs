//! `PostgreSQL` change feed over `LISTEN/NOTIFY`.
//!
//! DESIGN
//! ======
//! Triggers installed by the migration publish one JSON payload per row
//! change on `bacheca_changes`. Each subscription owns a dedicated
//! `PgListener` task that filters payloads by board id and forwards them into
//! the subscription's channel. Unsubscribing aborts the task, which drops the
//! listener connection.
//!
//! Element rows too large for a NOTIFY payload arrive as key columns only;
//! the task refetches the row before forwarding. A row already deleted by
//! then is skipped, its DELETE notification follows.
//!
//! Notifications sent while a listener is reconnecting are lost.

use serde::Deserialize;
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::{ChangeFeed, ChangeKind, Collection, FeedEvent, Subscription};
use crate::error::StoreError;
use crate::feed::memory::DEFAULT_FEED_BUFFER;
use crate::store::postgres::fetch_element_row;

pub const NOTIFY_CHANNEL: &str = "bacheca_changes";

/// Trigger payload as produced by `bacheca_notify_*`.
#[derive(Debug, Deserialize)]
struct NotifyPayload {
    table: Collection,
    #[serde(rename = "type")]
    kind: ChangeKind,
    board_id: Uuid,
    record: Option<serde_json::Value>,
    old_record: Option<serde_json::Value>,
}

impl From<NotifyPayload> for FeedEvent {
    fn from(p: NotifyPayload) -> Self {
        Self { collection: p.table, kind: p.kind, board_id: p.board_id, new_row: p.record, old_row: p.old_record }
    }
}

/// Parse a raw notification payload into a feed event.
///
/// # Errors
///
/// Returns `StoreError::Decode` if the payload is not a trigger document.
pub fn parse_payload(payload: &str) -> Result<FeedEvent, StoreError> {
    let parsed: NotifyPayload = serde_json::from_str(payload)?;
    Ok(parsed.into())
}

/// Whether `event` is an element INSERT/UPDATE announced by key columns only.
#[must_use]
pub fn needs_row_fetch(event: &FeedEvent) -> bool {
    event.collection == Collection::BoardElements
        && event.kind != ChangeKind::Delete
        && event.new_row.as_ref().is_some_and(|row| row.get("data").is_none())
}

/// Replace a key-only element row with the stored one.
async fn fetch_full_row(pool: &PgPool, mut event: FeedEvent) -> Result<Option<FeedEvent>, StoreError> {
    let element_id: Uuid = event
        .new_row
        .as_ref()
        .and_then(|row| row.get("id"))
        .cloned()
        .map(serde_json::from_value::<Uuid>)
        .transpose()?
        .ok_or_else(|| StoreError::Decode("key-only row has no id".into()))?;
    let Some(row) = fetch_element_row(pool, element_id).await? else {
        return Ok(None);
    };
    event.new_row = Some(serde_json::to_value(row)?);
    Ok(Some(event))
}

#[derive(Clone)]
pub struct PgChangeFeed {
    pool: PgPool,
    buffer: usize,
}

impl PgChangeFeed {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self::with_buffer(pool, DEFAULT_FEED_BUFFER)
    }

    #[must_use]
    pub fn with_buffer(pool: PgPool, buffer: usize) -> Self {
        Self { pool, buffer: buffer.max(1) }
    }
}

#[async_trait::async_trait]
impl ChangeFeed for PgChangeFeed {
    async fn subscribe(&self, board_id: Uuid) -> Result<Subscription, StoreError> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(NOTIFY_CHANNEL).await?;

        let (tx, rx) = mpsc::channel(self.buffer);
        let pool = self.pool.clone();
        let handle = tokio::spawn(async move {
            loop {
                let notification = match listener.recv().await {
                    Ok(n) => n,
                    Err(e) => {
                        error!(%board_id, error = %e, "change feed listener failed");
                        break;
                    }
                };
                let event = match parse_payload(notification.payload()) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(%board_id, error = %e, "dropping undecodable notification");
                        continue;
                    }
                };
                if event.board_id != board_id {
                    continue;
                }
                let event = if needs_row_fetch(&event) {
                    match fetch_full_row(&pool, event).await {
                        Ok(Some(event)) => event,
                        Ok(None) => {
                            debug!(%board_id, "element gone before refetch");
                            continue;
                        }
                        Err(e) => {
                            warn!(%board_id, error = %e, "element refetch failed");
                            continue;
                        }
                    }
                } else {
                    event
                };
                if tx.send(event).await.is_err() {
                    debug!(%board_id, "change feed receiver gone; stopping listener");
                    break;
                }
            }
        });

        debug!(%board_id, "postgres change feed subscribed");
        Ok(Subscription::new(board_id, rx, move || handle.abort()))
    }
}

#[cfg(test)]
#[path = "postgres_test.rs"]
mod tests;
