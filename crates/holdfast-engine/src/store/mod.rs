// Copyright (C) 2025 Holdfast Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Entity store interface and backends.
//!
//! The store is the single source of truth for all engine state.
//! Mutation is always read-compute-write inside one transaction; the
//! batch commit methods on [`Store`] are the atomic effect boundary of
//! each engine invocation.

pub mod sqlite;

pub use self::sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use holdfast_protocol::ResourceMap;
use uuid::Uuid;

use crate::error::Result;
use crate::model::{
    BlueprintRecord, CraftingQueueItem, NodeRecord, PlayerRecord, SessionRecord, TransferRecord,
    TransferStatus, UpkeepStatus,
};

/// One group of nodes that end an upkeep cycle in the same status,
/// updated with a single statement to bound write amplification.
#[derive(Debug, Clone)]
pub struct UpkeepStatusGroup {
    /// Nodes in this group.
    pub node_ids: Vec<Uuid>,
    /// New last-payment timestamp, set only when the group was paid.
    /// `None` leaves the stored timestamp untouched so elapsed-hours
    /// status computation stays anchored to the last real payment.
    pub upkeep_paid: Option<DateTime<Utc>>,
    /// New due timestamp; `None` leaves the stored value untouched.
    pub upkeep_due: Option<DateTime<Utc>>,
    /// Resulting upkeep status.
    pub status: UpkeepStatus,
}

/// Everything one player's upkeep settlement writes, committed in one
/// transaction.
#[derive(Debug, Clone)]
pub struct UpkeepSettlement {
    /// Player being settled.
    pub player_id: Uuid,
    /// Credit balance after settlement.
    pub credits_after: i64,
    /// Per-node storage snapshots to persist (resource production).
    pub storage_writes: Vec<(Uuid, ResourceMap)>,
    /// Status transitions, one group per resulting status value.
    pub status_groups: Vec<UpkeepStatusGroup>,
}

/// Resolution of one due transfer: terminal status plus the storage
/// snapshots it produced. All resolutions of a batch commit together.
#[derive(Debug, Clone)]
pub struct TransferResolution {
    /// Transfer being resolved.
    pub transfer_id: Uuid,
    /// Terminal status (`Completed` or `Cancelled`).
    pub status: TransferStatus,
    /// Node storage snapshots to persist with the transition.
    pub storage_writes: Vec<(Uuid, ResourceMap)>,
}

/// Entity store interface used by the engines.
///
/// Backends must make every multi-row method transactional: either
/// all rows change or none do, and a transfer status transition is
/// only applied if the row is still `pending` (terminal transitions
/// are idempotent).
#[async_trait]
pub trait Store: Send + Sync {
    // Sessions

    /// Insert a session row.
    async fn insert_session(&self, session: &SessionRecord) -> Result<()>;

    /// Fetch a session by id.
    async fn get_session(&self, session_id: Uuid) -> Result<Option<SessionRecord>>;

    /// All sessions whose status is `active`.
    async fn list_active_sessions(&self) -> Result<Vec<SessionRecord>>;

    /// Record (or clear) the crown holder for a session.
    async fn set_crown_holder(
        &self,
        session_id: Uuid,
        holder_id: Option<Uuid>,
        held_since: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Terminal victory transition: set status to `completed` and
    /// record the winner, but only if the session is still `active`.
    /// Returns whether the update was applied.
    async fn complete_session_if_active(&self, session_id: Uuid, winner_id: Uuid) -> Result<bool>;

    // Players

    /// Insert a player row.
    async fn insert_player(&self, player: &PlayerRecord) -> Result<()>;

    /// Fetch a player by id.
    async fn get_player(&self, player_id: Uuid) -> Result<Option<PlayerRecord>>;

    /// All players in a session.
    async fn list_players(&self, session_id: Uuid) -> Result<Vec<PlayerRecord>>;

    /// Mark a player eliminated.
    async fn mark_player_eliminated(&self, player_id: Uuid) -> Result<()>;

    // Nodes

    /// Insert a node row.
    async fn insert_node(&self, node: &NodeRecord) -> Result<()>;

    /// Fetch a node by id.
    async fn get_node(&self, node_id: Uuid) -> Result<Option<NodeRecord>>;

    /// Batch-fetch nodes by id. Missing ids are silently absent from
    /// the result.
    async fn get_nodes(&self, node_ids: &[Uuid]) -> Result<Vec<NodeRecord>>;

    /// All player-owned nodes in a session.
    async fn list_owned_nodes(&self, session_id: Uuid) -> Result<Vec<NodeRecord>>;

    /// Owned nodes in active sessions whose upkeep status is anything
    /// other than `paid`. Input to the decay-consequences pass.
    async fn list_unpaid_owned_nodes(&self) -> Result<Vec<NodeRecord>>;

    /// Atomically persist a node's storage and crafting queue (the
    /// crafting engine's commit boundary).
    async fn update_node_craft_state(
        &self,
        node_id: Uuid,
        storage: &ResourceMap,
        queue: &[CraftingQueueItem],
    ) -> Result<()>;

    /// Persist a node's health and upkeep status (decay damage).
    async fn set_node_health_status(
        &self,
        node_id: Uuid,
        health: f64,
        status: UpkeepStatus,
    ) -> Result<()>;

    /// Revert a node to neutral: clear owner and upkeep state. Safe to
    /// call on an already-neutral node.
    async fn abandon_node(&self, node_id: Uuid) -> Result<()>;

    /// Commit one player's upkeep settlement in a single transaction.
    async fn commit_upkeep_settlement(&self, settlement: &UpkeepSettlement) -> Result<()>;

    // Blueprints

    /// Insert a blueprint row.
    async fn insert_blueprint(&self, blueprint: &BlueprintRecord) -> Result<()>;

    /// Fetch a blueprint by id.
    async fn get_blueprint(&self, blueprint_id: Uuid) -> Result<Option<BlueprintRecord>>;

    // Transfers

    /// Insert a transfer row (escrow already deducted by the caller).
    async fn insert_transfer(&self, transfer: &TransferRecord) -> Result<()>;

    /// Fetch a transfer by id.
    async fn get_transfer(&self, transfer_id: Uuid) -> Result<Option<TransferRecord>>;

    /// Pending transfers with `completes_at <= now`, oldest first.
    async fn due_transfers(&self, now: DateTime<Utc>) -> Result<Vec<TransferRecord>>;

    /// Commit a batch of transfer resolutions in one transaction.
    /// Status transitions only apply to rows still `pending`; the
    /// returned ids are the transfers this call actually resolved, so
    /// callers can skip side effects for rows another writer already
    /// terminalized.
    async fn resolve_transfers(&self, resolutions: &[TransferResolution]) -> Result<Vec<Uuid>>;
}
