// Copyright (C) 2025 Holdfast Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed entity store implementation.

use std::path::Path;

use chrono::{DateTime, Utc};
use holdfast_protocol::ResourceMap;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::model::{
    BlueprintRecord, CraftingQueueItem, GameType, NodeRecord, NodeStatus, NodeType, PlayerRecord,
    Region, SessionRecord, SessionStatus, TransferRecord, TransferStatus, UpkeepStatus,
};

use super::{Store, TransferResolution, UpkeepSettlement};

/// SQLite-backed entity store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new store from an existing pool. Migrations must have
    /// been run by the caller.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite connection URL and run all migrations.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(|e| EngineError::DatabaseError {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at '{}': {}", url, e),
            })?;

        crate::migrations::run_sqlite(&pool)
            .await
            .map_err(|e| EngineError::DatabaseError {
                operation: "migrate".to_string(),
                details: format!("Failed to run migrations: {}", e),
            })?;

        Ok(Self { pool })
    }

    /// Create and initialize a store from a database file path.
    ///
    /// Creates parent directories and the database file if needed,
    /// connects with sensible defaults, and runs all migrations.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| EngineError::DatabaseError {
                    operation: "create_dir".to_string(),
                    details: format!("Failed to create directory {:?}: {}", parent, e),
                })?;
            }
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| EngineError::DatabaseError {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {:?}: {}", path, e),
            })?;

        crate::migrations::run_sqlite(&pool)
            .await
            .map_err(|e| EngineError::DatabaseError {
                operation: "migrate".to_string(),
                details: format!("Failed to run migrations: {}", e),
            })?;

        Ok(Self { pool })
    }

    /// Create a migrated in-memory store. A single connection keeps
    /// every query on the same in-memory database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| EngineError::DatabaseError {
                operation: "connect".to_string(),
                details: format!("Failed to open in-memory SQLite: {}", e),
            })?;

        crate::migrations::run_sqlite(&pool)
            .await
            .map_err(|e| EngineError::DatabaseError {
                operation: "migrate".to_string(),
                details: format!("Failed to run migrations: {}", e),
            })?;

        Ok(Self { pool })
    }

    /// The underlying connection pool (shared with the job queue and
    /// pending-work index).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

// Raw row shapes; converted (and validated) into domain records below.

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    name: String,
    status: String,
    game_type: String,
    crown_node_id: Option<String>,
    crown_holder_id: Option<String>,
    crown_held_since: Option<DateTime<Utc>>,
    winner_id: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct PlayerRow {
    id: String,
    session_id: String,
    name: String,
    credits: i64,
    hq_node_id: Option<String>,
    eliminated: bool,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct NodeRow {
    id: String,
    session_id: String,
    owner_id: Option<String>,
    node_type: String,
    tier: i64,
    region: String,
    status: String,
    health: f64,
    storage: String,
    crafting_queue: String,
    links: String,
    upkeep_paid: Option<DateTime<Utc>>,
    upkeep_due: Option<DateTime<Utc>>,
    upkeep_status: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct BlueprintRow {
    id: String,
    name: String,
    inputs: String,
    outputs: String,
    time_per_run_ms: i64,
}

#[derive(sqlx::FromRow)]
struct TransferRow {
    id: String,
    session_id: String,
    player_id: String,
    source_node_id: String,
    dest_node_id: String,
    resources: String,
    status: String,
    created_at: DateTime<Utc>,
    completes_at: DateTime<Utc>,
}

fn parse_uuid(value: &str, entity: &'static str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| EngineError::InvalidRecord {
        entity: entity.to_string(),
        details: format!("bad uuid '{}': {}", value, e),
    })
}

fn parse_opt_uuid(value: &Option<String>, entity: &'static str) -> Result<Option<Uuid>> {
    value.as_deref().map(|v| parse_uuid(v, entity)).transpose()
}

fn invalid(entity: &'static str, details: impl Into<String>) -> EngineError {
    EngineError::InvalidRecord {
        entity: entity.to_string(),
        details: details.into(),
    }
}

impl TryFrom<SessionRow> for SessionRecord {
    type Error = EngineError;

    fn try_from(row: SessionRow) -> Result<Self> {
        Ok(SessionRecord {
            id: parse_uuid(&row.id, "sessions")?,
            status: SessionStatus::parse(&row.status)
                .ok_or_else(|| invalid("sessions", format!("bad status '{}'", row.status)))?,
            game_type: GameType::parse(&row.game_type)
                .ok_or_else(|| invalid("sessions", format!("bad game_type '{}'", row.game_type)))?,
            crown_node_id: parse_opt_uuid(&row.crown_node_id, "sessions")?,
            crown_holder_id: parse_opt_uuid(&row.crown_holder_id, "sessions")?,
            crown_held_since: row.crown_held_since,
            winner_id: parse_opt_uuid(&row.winner_id, "sessions")?,
            name: row.name,
            created_at: row.created_at,
        })
    }
}

impl TryFrom<PlayerRow> for PlayerRecord {
    type Error = EngineError;

    fn try_from(row: PlayerRow) -> Result<Self> {
        Ok(PlayerRecord {
            id: parse_uuid(&row.id, "players")?,
            session_id: parse_uuid(&row.session_id, "players")?,
            hq_node_id: parse_opt_uuid(&row.hq_node_id, "players")?,
            name: row.name,
            credits: row.credits,
            eliminated: row.eliminated,
            created_at: row.created_at,
        })
    }
}

impl TryFrom<NodeRow> for NodeRecord {
    type Error = EngineError;

    fn try_from(row: NodeRow) -> Result<Self> {
        let storage: ResourceMap = serde_json::from_str(&row.storage)
            .map_err(|e| invalid("nodes", format!("bad storage json: {}", e)))?;
        let crafting_queue: Vec<CraftingQueueItem> = serde_json::from_str(&row.crafting_queue)
            .map_err(|e| invalid("nodes", format!("bad crafting_queue json: {}", e)))?;
        let links: Vec<Uuid> = serde_json::from_str(&row.links)
            .map_err(|e| invalid("nodes", format!("bad links json: {}", e)))?;

        Ok(NodeRecord {
            id: parse_uuid(&row.id, "nodes")?,
            session_id: parse_uuid(&row.session_id, "nodes")?,
            owner_id: parse_opt_uuid(&row.owner_id, "nodes")?,
            node_type: NodeType::parse(&row.node_type)
                .ok_or_else(|| invalid("nodes", format!("bad node_type '{}'", row.node_type)))?,
            tier: row.tier as i32,
            region: Region::parse(&row.region)
                .ok_or_else(|| invalid("nodes", format!("bad region '{}'", row.region)))?,
            status: NodeStatus::parse(&row.status)
                .ok_or_else(|| invalid("nodes", format!("bad status '{}'", row.status)))?,
            health: row.health,
            storage,
            crafting_queue,
            links,
            upkeep_paid: row.upkeep_paid,
            upkeep_due: row.upkeep_due,
            upkeep_status: row
                .upkeep_status
                .as_deref()
                .map(|s| {
                    UpkeepStatus::parse(s)
                        .ok_or_else(|| invalid("nodes", format!("bad upkeep_status '{}'", s)))
                })
                .transpose()?,
            created_at: row.created_at,
        })
    }
}

impl TryFrom<BlueprintRow> for BlueprintRecord {
    type Error = EngineError;

    fn try_from(row: BlueprintRow) -> Result<Self> {
        let inputs: ResourceMap = serde_json::from_str(&row.inputs)
            .map_err(|e| invalid("blueprints", format!("bad inputs json: {}", e)))?;
        let outputs: ResourceMap = serde_json::from_str(&row.outputs)
            .map_err(|e| invalid("blueprints", format!("bad outputs json: {}", e)))?;
        Ok(BlueprintRecord {
            id: parse_uuid(&row.id, "blueprints")?,
            name: row.name,
            inputs,
            outputs,
            time_per_run_ms: row.time_per_run_ms,
        })
    }
}

impl TryFrom<TransferRow> for TransferRecord {
    type Error = EngineError;

    fn try_from(row: TransferRow) -> Result<Self> {
        let resources: ResourceMap = serde_json::from_str(&row.resources)
            .map_err(|e| invalid("transfers", format!("bad resources json: {}", e)))?;
        Ok(TransferRecord {
            id: parse_uuid(&row.id, "transfers")?,
            session_id: parse_uuid(&row.session_id, "transfers")?,
            player_id: parse_uuid(&row.player_id, "transfers")?,
            source_node_id: parse_uuid(&row.source_node_id, "transfers")?,
            dest_node_id: parse_uuid(&row.dest_node_id, "transfers")?,
            resources,
            status: TransferStatus::parse(&row.status)
                .ok_or_else(|| invalid("transfers", format!("bad status '{}'", row.status)))?,
            created_at: row.created_at,
            completes_at: row.completes_at,
        })
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn in_placeholders(count: usize) -> String {
    std::iter::repeat("?")
        .take(count)
        .collect::<Vec<_>>()
        .join(", ")
}

#[async_trait::async_trait]
impl Store for SqliteStore {
    async fn insert_session(&self, session: &SessionRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (id, name, status, game_type, crown_node_id,
                                  crown_holder_id, crown_held_since, winner_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(session.id.to_string())
        .bind(&session.name)
        .bind(session.status.as_str())
        .bind(session.game_type.as_str())
        .bind(session.crown_node_id.map(|id| id.to_string()))
        .bind(session.crown_holder_id.map(|id| id.to_string()))
        .bind(session.crown_held_since)
        .bind(session.winner_id.map(|id| id.to_string()))
        .bind(session.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_session(&self, session_id: Uuid) -> Result<Option<SessionRecord>> {
        let row = sqlx::query_as::<_, SessionRow>(
            "SELECT * FROM sessions WHERE id = ?",
        )
        .bind(session_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(SessionRecord::try_from).transpose()
    }

    async fn list_active_sessions(&self) -> Result<Vec<SessionRecord>> {
        let rows = sqlx::query_as::<_, SessionRow>(
            "SELECT * FROM sessions WHERE status = 'active' ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(SessionRecord::try_from).collect()
    }

    async fn set_crown_holder(
        &self,
        session_id: Uuid,
        holder_id: Option<Uuid>,
        held_since: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE sessions SET crown_holder_id = ?, crown_held_since = ? WHERE id = ?",
        )
        .bind(holder_id.map(|id| id.to_string()))
        .bind(held_since)
        .bind(session_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete_session_if_active(&self, session_id: Uuid, winner_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET status = 'completed', winner_id = ?
            WHERE id = ? AND status = 'active'
            "#,
        )
        .bind(winner_id.to_string())
        .bind(session_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_player(&self, player: &PlayerRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO players (id, session_id, name, credits, hq_node_id, eliminated, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(player.id.to_string())
        .bind(player.session_id.to_string())
        .bind(&player.name)
        .bind(player.credits)
        .bind(player.hq_node_id.map(|id| id.to_string()))
        .bind(player.eliminated)
        .bind(player.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_player(&self, player_id: Uuid) -> Result<Option<PlayerRecord>> {
        let row = sqlx::query_as::<_, PlayerRow>("SELECT * FROM players WHERE id = ?")
            .bind(player_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(PlayerRecord::try_from).transpose()
    }

    async fn list_players(&self, session_id: Uuid) -> Result<Vec<PlayerRecord>> {
        let rows = sqlx::query_as::<_, PlayerRow>(
            "SELECT * FROM players WHERE session_id = ? ORDER BY created_at",
        )
        .bind(session_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(PlayerRecord::try_from).collect()
    }

    async fn mark_player_eliminated(&self, player_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE players SET eliminated = 1 WHERE id = ?")
            .bind(player_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_node(&self, node: &NodeRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO nodes (id, session_id, owner_id, node_type, tier, region, status,
                               health, storage, crafting_queue, links,
                               upkeep_paid, upkeep_due, upkeep_status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(node.id.to_string())
        .bind(node.session_id.to_string())
        .bind(node.owner_id.map(|id| id.to_string()))
        .bind(node.node_type.as_str())
        .bind(node.tier)
        .bind(node.region.as_str())
        .bind(node.status.as_str())
        .bind(node.health)
        .bind(to_json(&node.storage)?)
        .bind(to_json(&node.crafting_queue)?)
        .bind(to_json(&node.links)?)
        .bind(node.upkeep_paid)
        .bind(node.upkeep_due)
        .bind(node.upkeep_status.map(|s| s.as_str()))
        .bind(node.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_node(&self, node_id: Uuid) -> Result<Option<NodeRecord>> {
        let row = sqlx::query_as::<_, NodeRow>("SELECT * FROM nodes WHERE id = ?")
            .bind(node_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(NodeRecord::try_from).transpose()
    }

    async fn get_nodes(&self, node_ids: &[Uuid]) -> Result<Vec<NodeRecord>> {
        if node_ids.is_empty() {
            return Ok(vec![]);
        }
        let sql = format!(
            "SELECT * FROM nodes WHERE id IN ({})",
            in_placeholders(node_ids.len())
        );
        let mut query = sqlx::query_as::<_, NodeRow>(&sql);
        for id in node_ids {
            query = query.bind(id.to_string());
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(NodeRecord::try_from).collect()
    }

    async fn list_owned_nodes(&self, session_id: Uuid) -> Result<Vec<NodeRecord>> {
        let rows = sqlx::query_as::<_, NodeRow>(
            "SELECT * FROM nodes WHERE session_id = ? AND owner_id IS NOT NULL ORDER BY created_at",
        )
        .bind(session_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(NodeRecord::try_from).collect()
    }

    async fn list_unpaid_owned_nodes(&self) -> Result<Vec<NodeRecord>> {
        let rows = sqlx::query_as::<_, NodeRow>(
            r#"
            SELECT n.* FROM nodes n
            JOIN sessions s ON s.id = n.session_id
            WHERE s.status = 'active'
              AND n.owner_id IS NOT NULL
              AND n.upkeep_status IS NOT NULL
              AND n.upkeep_status != 'paid'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(NodeRecord::try_from).collect()
    }

    async fn update_node_craft_state(
        &self,
        node_id: Uuid,
        storage: &ResourceMap,
        queue: &[CraftingQueueItem],
    ) -> Result<()> {
        sqlx::query("UPDATE nodes SET storage = ?, crafting_queue = ? WHERE id = ?")
            .bind(to_json(storage)?)
            .bind(to_json(&queue)?)
            .bind(node_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_node_health_status(
        &self,
        node_id: Uuid,
        health: f64,
        status: UpkeepStatus,
    ) -> Result<()> {
        sqlx::query("UPDATE nodes SET health = ?, upkeep_status = ? WHERE id = ?")
            .bind(health)
            .bind(status.as_str())
            .bind(node_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn abandon_node(&self, node_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE nodes
            SET owner_id = NULL, status = 'neutral',
                upkeep_paid = NULL, upkeep_due = NULL, upkeep_status = NULL
            WHERE id = ?
            "#,
        )
        .bind(node_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn commit_upkeep_settlement(&self, settlement: &UpkeepSettlement) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE players SET credits = ? WHERE id = ?")
            .bind(settlement.credits_after)
            .bind(settlement.player_id.to_string())
            .execute(&mut *tx)
            .await?;

        for (node_id, storage) in &settlement.storage_writes {
            sqlx::query("UPDATE nodes SET storage = ? WHERE id = ?")
                .bind(to_json(storage)?)
                .bind(node_id.to_string())
                .execute(&mut *tx)
                .await?;
        }

        for group in &settlement.status_groups {
            if group.node_ids.is_empty() {
                continue;
            }
            // Payment timestamps are only ever advanced, never erased:
            // an unpaid group keeps its upkeep_paid so the elapsed-hours
            // status computation stays anchored to the last real payment.
            let sql = if group.upkeep_paid.is_some() {
                format!(
                    "UPDATE nodes SET upkeep_paid = ?, upkeep_due = ?, upkeep_status = ? WHERE id IN ({})",
                    in_placeholders(group.node_ids.len())
                )
            } else {
                format!(
                    "UPDATE nodes SET upkeep_status = ? WHERE id IN ({})",
                    in_placeholders(group.node_ids.len())
                )
            };
            let mut query = sqlx::query(&sql);
            if group.upkeep_paid.is_some() {
                query = query.bind(group.upkeep_paid).bind(group.upkeep_due);
            }
            query = query.bind(group.status.as_str());
            for id in &group.node_ids {
                query = query.bind(id.to_string());
            }
            query.execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn insert_blueprint(&self, blueprint: &BlueprintRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO blueprints (id, name, inputs, outputs, time_per_run_ms)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(blueprint.id.to_string())
        .bind(&blueprint.name)
        .bind(to_json(&blueprint.inputs)?)
        .bind(to_json(&blueprint.outputs)?)
        .bind(blueprint.time_per_run_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_blueprint(&self, blueprint_id: Uuid) -> Result<Option<BlueprintRecord>> {
        let row = sqlx::query_as::<_, BlueprintRow>("SELECT * FROM blueprints WHERE id = ?")
            .bind(blueprint_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(BlueprintRecord::try_from).transpose()
    }

    async fn insert_transfer(&self, transfer: &TransferRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO transfers (id, session_id, player_id, source_node_id, dest_node_id,
                                   resources, status, created_at, completes_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(transfer.id.to_string())
        .bind(transfer.session_id.to_string())
        .bind(transfer.player_id.to_string())
        .bind(transfer.source_node_id.to_string())
        .bind(transfer.dest_node_id.to_string())
        .bind(to_json(&transfer.resources)?)
        .bind(transfer.status.as_str())
        .bind(transfer.created_at)
        .bind(transfer.completes_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_transfer(&self, transfer_id: Uuid) -> Result<Option<TransferRecord>> {
        let row = sqlx::query_as::<_, TransferRow>("SELECT * FROM transfers WHERE id = ?")
            .bind(transfer_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(TransferRecord::try_from).transpose()
    }

    async fn due_transfers(&self, now: DateTime<Utc>) -> Result<Vec<TransferRecord>> {
        let rows = sqlx::query_as::<_, TransferRow>(
            r#"
            SELECT * FROM transfers
            WHERE status = 'pending' AND completes_at <= ?
            ORDER BY completes_at
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TransferRecord::try_from).collect()
    }

    async fn resolve_transfers(&self, resolutions: &[TransferResolution]) -> Result<Vec<Uuid>> {
        if resolutions.is_empty() {
            return Ok(vec![]);
        }
        let mut tx = self.pool.begin().await?;
        let mut applied_ids = Vec::new();

        for resolution in resolutions {
            // Terminal transition: only applies while still pending. A
            // transfer that already resolved keeps its storage effects.
            let applied =
                sqlx::query("UPDATE transfers SET status = ? WHERE id = ? AND status = 'pending'")
                    .bind(resolution.status.as_str())
                    .bind(resolution.transfer_id.to_string())
                    .execute(&mut *tx)
                    .await?;
            if applied.rows_affected() == 0 {
                continue;
            }
            applied_ids.push(resolution.transfer_id);

            for (node_id, storage) in &resolution.storage_writes {
                sqlx::query("UPDATE nodes SET storage = ? WHERE id = ?")
                    .bind(to_json(storage)?)
                    .bind(node_id.to_string())
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(applied_ids)
    }
}
