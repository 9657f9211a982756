//! `PostgreSQL` remote store.
//!
//! DESIGN
//! ======
//! Plain `SQLx` queries over `boards`, `board_elements` and
//! `board_participants`. Ids and `created_at` come from column defaults.
//! Element data patches merge with `jsonb ||`, the same shallow per-key
//! merge `ElementData::apply` performs in memory. Change notifications are
//! emitted by triggers (see `db/migrations`), not by this adapter.

use std::collections::HashMap;

use sqlx::{PgPool, QueryBuilder};
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::RemoteStore;
use crate::types::{
    Board, BoardConfig, BoardElement, BoardPatch, DataPatch, ElementKind, ElementPatch, ElementRow, NewBoard,
    NewElement, Participant, UnknownKind, now_ms,
};

type BoardTuple = (Uuid, String, i64, serde_json::Value, Option<String>);
type ElementTuple = (Uuid, Uuid, String, f64, f64, String, i64, serde_json::Value);

const BOARD_COLUMNS: &str = "id, title, created_at, config, drawing_data";
const ELEMENT_COLUMNS: &str = "id, board_id, type, position_x, position_y, author, created_at, data";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn rosters(&self, board_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<Participant>>, StoreError> {
        if board_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query_as::<_, (Uuid, String, i64, i64)>(
            "SELECT board_id, nickname, joined_at, last_seen
             FROM board_participants
             WHERE board_id = ANY($1)
             ORDER BY joined_at ASC",
        )
        .bind(board_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut out: HashMap<Uuid, Vec<Participant>> = HashMap::new();
        for (board_id, nickname, joined_at, last_seen) in rows {
            out.entry(board_id)
                .or_default()
                .push(Participant { nickname, joined_at, last_seen });
        }
        Ok(out)
    }
}

fn board_from_tuple(row: BoardTuple, participants: Vec<Participant>) -> Result<Board, StoreError> {
    let (id, title, created_at, config, drawing_data) = row;
    let config: BoardConfig = serde_json::from_value(config)?;
    Ok(Board { id, title, created_at, config, drawing_data, participants })
}

fn row_from_tuple(row: ElementTuple) -> Result<ElementRow, StoreError> {
    let (id, board_id, kind, position_x, position_y, author, created_at, data) = row;
    let kind: ElementKind = kind.parse().map_err(|e: UnknownKind| StoreError::Decode(e.to_string()))?;
    Ok(ElementRow { id, board_id, kind, position_x, position_y, author, created_at, data })
}

fn element_from_tuple(row: ElementTuple) -> Result<BoardElement, StoreError> {
    Ok(BoardElement::try_from(row_from_tuple(row)?)?)
}

/// Current stored row of one element, `None` once it is gone.
///
/// # Errors
///
/// Returns `StoreError` if the query fails or the row does not decode.
pub(crate) async fn fetch_element_row(pool: &PgPool, element_id: Uuid) -> Result<Option<ElementRow>, StoreError> {
    let row = sqlx::query_as::<_, ElementTuple>(&format!(
        "SELECT {ELEMENT_COLUMNS} FROM board_elements WHERE id = $1"
    ))
    .bind(element_id)
    .fetch_optional(pool)
    .await?;
    row.map(row_from_tuple).transpose()
}

#[async_trait::async_trait]
impl RemoteStore for PgStore {
    async fn list_boards(&self) -> Result<Vec<Board>, StoreError> {
        let rows = sqlx::query_as::<_, BoardTuple>(&format!(
            "SELECT {BOARD_COLUMNS} FROM boards ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        let ids: Vec<Uuid> = rows.iter().map(|row| row.0).collect();
        let mut rosters = self.rosters(&ids).await?;
        rows.into_iter()
            .map(|row| {
                let roster = rosters.remove(&row.0).unwrap_or_default();
                board_from_tuple(row, roster)
            })
            .collect()
    }

    async fn get_board(&self, board_id: Uuid) -> Result<Option<Board>, StoreError> {
        let row = sqlx::query_as::<_, BoardTuple>(&format!("SELECT {BOARD_COLUMNS} FROM boards WHERE id = $1"))
            .bind(board_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let roster = self.list_participants(board_id).await?;
        board_from_tuple(row, roster).map(Some)
    }

    async fn insert_board(&self, board: NewBoard) -> Result<Board, StoreError> {
        let config = serde_json::to_value(board.config)?;
        let row = sqlx::query_as::<_, BoardTuple>(&format!(
            "INSERT INTO boards (title, config) VALUES ($1, $2) RETURNING {BOARD_COLUMNS}"
        ))
        .bind(&board.title)
        .bind(config)
        .fetch_one(&self.pool)
        .await?;
        board_from_tuple(row, Vec::new())
    }

    async fn update_board(&self, board_id: Uuid, patch: &BoardPatch) -> Result<Option<Board>, StoreError> {
        if patch.is_empty() {
            return self.get_board(board_id).await;
        }

        let mut builder = QueryBuilder::new("UPDATE boards SET ");
        {
            let mut sets = builder.separated(", ");
            if let Some(title) = &patch.title {
                sets.push("title = ");
                sets.push_bind_unseparated(title.clone());
            }
            if let Some(config) = patch.config {
                sets.push("config = ");
                sets.push_bind_unseparated(serde_json::to_value(config)?);
            }
            if let Some(drawing) = &patch.drawing_data {
                sets.push("drawing_data = ");
                sets.push_bind_unseparated(drawing.clone());
            }
        }
        builder.push(" WHERE id = ");
        builder.push_bind(board_id);
        builder.push(format!(" RETURNING {BOARD_COLUMNS}"));

        let row = builder
            .build_query_as::<BoardTuple>()
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let roster = self.list_participants(board_id).await?;
        board_from_tuple(row, roster).map(Some)
    }

    async fn delete_board(&self, board_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM boards WHERE id = $1")
            .bind(board_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_elements(&self, board_id: Uuid) -> Result<Vec<BoardElement>, StoreError> {
        let rows = sqlx::query_as::<_, ElementTuple>(&format!(
            "SELECT {ELEMENT_COLUMNS} FROM board_elements WHERE board_id = $1 ORDER BY created_at ASC, id ASC"
        ))
        .bind(board_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(element_from_tuple).collect()
    }

    async fn insert_element(&self, element: NewElement) -> Result<BoardElement, StoreError> {
        let data = element.data.encode()?;
        let row = sqlx::query_as::<_, ElementTuple>(&format!(
            "INSERT INTO board_elements (board_id, type, position_x, position_y, author, data) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {ELEMENT_COLUMNS}"
        ))
        .bind(element.board_id)
        .bind(element.data.kind().as_str())
        .bind(element.position.x)
        .bind(element.position.y)
        .bind(&element.author)
        .bind(data)
        .fetch_one(&self.pool)
        .await?;
        element_from_tuple(row)
    }

    async fn update_element(&self, element_id: Uuid, patch: &ElementPatch) -> Result<(), StoreError> {
        if patch.is_empty() {
            return Ok(());
        }
        let data_patch = patch.data.as_ref().map(DataPatch::encode).transpose()?;
        let patch_kind = patch.data.as_ref().map(|d| d.kind().as_str());

        sqlx::query(
            "UPDATE board_elements SET \
                 position_x = COALESCE($2, position_x), \
                 position_y = COALESCE($3, position_y), \
                 data = CASE WHEN $4::jsonb IS NULL THEN data ELSE data || $4::jsonb END \
             WHERE id = $1 AND ($5::text IS NULL OR type = $5::text)",
        )
        .bind(element_id)
        .bind(patch.position.map(|p| p.x))
        .bind(patch.position.map(|p| p.y))
        .bind(data_patch)
        .bind(patch_kind)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_element(&self, element_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM board_elements WHERE id = $1")
            .bind(element_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_elements_not_authored_by(&self, board_id: Uuid, author: &str) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM board_elements WHERE board_id = $1 AND author <> $2")
            .bind(board_id)
            .bind(author)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn upsert_participant(&self, board_id: Uuid, nickname: &str) -> Result<Participant, StoreError> {
        let (nickname, joined_at, last_seen) = sqlx::query_as::<_, (String, i64, i64)>(
            "INSERT INTO board_participants (board_id, nickname, joined_at, last_seen) \
             VALUES ($1, $2, $3, $3) \
             ON CONFLICT (board_id, nickname) DO UPDATE SET last_seen = EXCLUDED.last_seen \
             RETURNING nickname, joined_at, last_seen",
        )
        .bind(board_id)
        .bind(nickname)
        .bind(now_ms())
        .fetch_one(&self.pool)
        .await?;
        Ok(Participant { nickname, joined_at, last_seen })
    }

    async fn list_participants(&self, board_id: Uuid) -> Result<Vec<Participant>, StoreError> {
        let rows = sqlx::query_as::<_, (String, i64, i64)>(
            "SELECT nickname, joined_at, last_seen FROM board_participants \
             WHERE board_id = $1 ORDER BY joined_at ASC",
        )
        .bind(board_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(nickname, joined_at, last_seen)| Participant { nickname, joined_at, last_seen })
            .collect())
    }
}

#[cfg(all(test, feature = "live-db-tests"))]
#[path = "postgres_test.rs"]
mod tests;
