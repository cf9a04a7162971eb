// Copyright (C) 2025 Holdfast Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pending-work index.
//!
//! A sorted `(engine, entity, due_at)` index so pollers can ask
//! "which entities have work due" without scanning the owning table.
//! The crafting engine keys it by node; an entry always points at the
//! next completion time of that node's queue head.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{EngineError, Result};

/// Engine name for crafting entries.
pub const ENGINE_CRAFTING: &str = "crafting";

/// Sorted per-engine due-time index over entities.
#[async_trait]
pub trait PendingWorkIndex: Send + Sync {
    /// Insert or move an entity's due timestamp.
    async fn set_due(&self, engine: &str, entity_id: Uuid, due_at: DateTime<Utc>) -> Result<()>;

    /// Remove an entity from the index. No-op if absent.
    async fn clear(&self, engine: &str, entity_id: Uuid) -> Result<()>;

    /// Entities whose due timestamp has passed, soonest first.
    async fn due_entities(
        &self,
        engine: &str,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Uuid>>;

    /// The recorded due timestamp for an entity, if any.
    async fn next_due(&self, engine: &str, entity_id: Uuid) -> Result<Option<DateTime<Utc>>>;
}

/// SQLite-backed pending-work index over the `pending_work` table.
#[derive(Clone)]
pub struct SqlitePendingIndex {
    pool: SqlitePool,
}

impl SqlitePendingIndex {
    /// Create an index handle over an existing (migrated) pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PendingWorkIndex for SqlitePendingIndex {
    async fn set_due(&self, engine: &str, entity_id: Uuid, due_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pending_work (engine, entity_id, due_at)
            VALUES (?, ?, ?)
            ON CONFLICT (engine, entity_id) DO UPDATE SET due_at = excluded.due_at
            "#,
        )
        .bind(engine)
        .bind(entity_id.to_string())
        .bind(due_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear(&self, engine: &str, entity_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM pending_work WHERE engine = ? AND entity_id = ?")
            .bind(engine)
            .bind(entity_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn due_entities(
        &self,
        engine: &str,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Uuid>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT entity_id FROM pending_work
            WHERE engine = ? AND due_at <= ?
            ORDER BY due_at
            LIMIT ?
            "#,
        )
        .bind(engine)
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id,)| {
                Uuid::parse_str(&id).map_err(|e| EngineError::InvalidRecord {
                    entity: "pending_work".to_string(),
                    details: format!("bad entity_id '{}': {}", id, e),
                })
            })
            .collect()
    }

    async fn next_due(&self, engine: &str, entity_id: Uuid) -> Result<Option<DateTime<Utc>>> {
        let row: Option<(DateTime<Utc>,)> = sqlx::query_as(
            "SELECT due_at FROM pending_work WHERE engine = ? AND entity_id = ?",
        )
        .bind(engine)
        .bind(entity_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(due,)| due))
    }
}
