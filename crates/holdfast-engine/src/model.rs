// Copyright (C) 2025 Holdfast Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Domain records and enums for the production & decay engine.
//!
//! These are the validated in-memory shapes of the persisted rows.
//! JSON-text columns (`storage`, `crafting_queue`, `links`, blueprint
//! `inputs`/`outputs`, transfer `resources`) are parsed into these
//! types at the store boundary; a row that fails to parse surfaces as
//! [`crate::error::EngineError::InvalidRecord`].

use chrono::{DateTime, Utc};
use holdfast_protocol::{QueueItemSnapshot, ResourceMap};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Upkeep lifecycle of an owned node. Worsens monotonically with
/// hours since last payment until payment resets it to `Paid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UpkeepStatus {
    /// Upkeep covered; no penalties.
    Paid,
    /// Unpaid for less than 12 hours.
    Warning,
    /// Unpaid 12-36 hours; buildings take damage.
    Decay,
    /// Unpaid 36-48 hours; heavy damage.
    Collapse,
    /// Unpaid 48+ hours; the node reverts to neutral.
    Abandoned,
}

impl UpkeepStatus {
    /// Stable string used in the database and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paid => "paid",
            Self::Warning => "warning",
            Self::Decay => "decay",
            Self::Collapse => "collapse",
            Self::Abandoned => "abandoned",
        }
    }

    /// Parse the database representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "paid" => Some(Self::Paid),
            "warning" => Some(Self::Warning),
            "decay" => Some(Self::Decay),
            "collapse" => Some(Self::Collapse),
            "abandoned" => Some(Self::Abandoned),
            _ => None,
        }
    }
}

/// Terminal state machine of a scheduled resource transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// Escrowed and waiting for `completes_at`.
    Pending,
    /// Resources delivered to the destination.
    Completed,
    /// Resources returned to the source (or lost with it).
    Cancelled,
}

impl TransferStatus {
    /// Stable string used in the database and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse the database representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Lifecycle of a game session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Game in progress.
    Active,
    /// A winner was declared; terminal.
    Completed,
}

impl SessionStatus {
    /// Stable string used in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }

    /// Parse the database representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// Win condition a session is played under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameType {
    /// Hold the crown node continuously for the configured duration.
    CrownHold,
    /// Last player still controlling their own headquarters wins.
    Elimination,
}

impl GameType {
    /// Stable string used in the database and in `game:victory` events.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CrownHold => "crownHold",
            Self::Elimination => "elimination",
        }
    }

    /// Parse the database representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "crownHold" => Some(Self::CrownHold),
            "elimination" => Some(Self::Elimination),
            _ => None,
        }
    }
}

/// Ownership status of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// Controlled by a player.
    Owned,
    /// Unowned, claimable.
    Neutral,
}

impl NodeStatus {
    /// Stable string used in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owned => "owned",
            Self::Neutral => "neutral",
        }
    }

    /// Parse the database representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "owned" => Some(Self::Owned),
            "neutral" => Some(Self::Neutral),
            _ => None,
        }
    }
}

/// Closed set of node types. Per-type behavior (upkeep base cost,
/// hourly production) lives in the [`crate::rules`] lookup table, not
/// in per-type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    /// Player headquarters; exempt from the upkeep state machine.
    Headquarters,
    /// Produces metal ore.
    Mine,
    /// Produces timber.
    Lumberyard,
    /// Produces grain.
    Farm,
    /// Produces stone.
    Quarry,
    /// Refines ore; crafting hub.
    Foundry,
    /// Cheap territorial claim.
    Outpost,
    /// Defensive strongpoint; expensive to keep.
    Fortress,
}

impl NodeType {
    /// Stable string used in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Headquarters => "headquarters",
            Self::Mine => "mine",
            Self::Lumberyard => "lumberyard",
            Self::Farm => "farm",
            Self::Quarry => "quarry",
            Self::Foundry => "foundry",
            Self::Outpost => "outpost",
            Self::Fortress => "fortress",
        }
    }

    /// Parse the database representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "headquarters" => Some(Self::Headquarters),
            "mine" => Some(Self::Mine),
            "lumberyard" => Some(Self::Lumberyard),
            "farm" => Some(Self::Farm),
            "quarry" => Some(Self::Quarry),
            "foundry" => Some(Self::Foundry),
            "outpost" => Some(Self::Outpost),
            "fortress" => Some(Self::Fortress),
            _ => None,
        }
    }
}

/// Map region a node sits in; modifies its upkeep cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    /// Heartland, cheapest to hold.
    Core,
    /// Contested borderland.
    Frontier,
    /// Deep wilderness, most expensive to hold.
    Wilds,
}

impl Region {
    /// Stable string used in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Frontier => "frontier",
            Self::Wilds => "wilds",
        }
    }

    /// Parse the database representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "core" => Some(Self::Core),
            "frontier" => Some(Self::Frontier),
            "wilds" => Some(Self::Wilds),
            _ => None,
        }
    }
}

/// One entry in a node's crafting queue.
///
/// Persisted inside the node's `crafting_queue` JSON column, camelCase
/// on disk so snapshots can be forwarded to the event bus unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CraftingQueueItem {
    /// Queue item identifier.
    pub id: Uuid,
    /// Blueprint being crafted.
    pub blueprint_id: Uuid,
    /// Primary output resource, when the blueprint has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_item_id: Option<String>,
    /// Total runs requested. Invariant: `completed_runs <= quantity`.
    pub quantity: u32,
    /// Runs finished so far; monotonically non-decreasing.
    pub completed_runs: u32,
    /// Duration of a single run in milliseconds.
    pub time_per_run_ms: i64,
    /// When the current run started.
    pub started_at: DateTime<Utc>,
    /// When the current run completes. Invariant: `completes_at >= started_at`.
    pub completes_at: DateTime<Utc>,
}

impl From<&CraftingQueueItem> for QueueItemSnapshot {
    fn from(item: &CraftingQueueItem) -> Self {
        QueueItemSnapshot {
            id: item.id,
            blueprint_id: item.blueprint_id,
            output_item_id: item.output_item_id.clone(),
            quantity: item.quantity,
            completed_runs: item.completed_runs,
            time_per_run_ms: item.time_per_run_ms,
            started_at: item.started_at,
            completes_at: item.completes_at,
        }
    }
}

/// A game session row.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    /// Session identifier.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Session lifecycle status.
    pub status: SessionStatus,
    /// Win condition in play.
    pub game_type: GameType,
    /// The crown objective node, for crown-hold sessions.
    pub crown_node_id: Option<Uuid>,
    /// Player currently credited with holding the crown.
    pub crown_holder_id: Option<Uuid>,
    /// When the current holder took the crown.
    pub crown_held_since: Option<DateTime<Utc>>,
    /// Winner, once declared.
    pub winner_id: Option<Uuid>,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
}

/// A player row.
#[derive(Debug, Clone)]
pub struct PlayerRecord {
    /// Player identifier.
    pub id: Uuid,
    /// Session the player belongs to.
    pub session_id: Uuid,
    /// Display name.
    pub name: String,
    /// Credit balance; never negative.
    pub credits: i64,
    /// The player's designated stronghold for elimination play.
    pub hq_node_id: Option<Uuid>,
    /// Whether the player has been eliminated.
    pub eliminated: bool,
    /// When the player joined.
    pub created_at: DateTime<Utc>,
}

/// A map node row.
#[derive(Debug, Clone)]
pub struct NodeRecord {
    /// Node identifier.
    pub id: Uuid,
    /// Session the node belongs to.
    pub session_id: Uuid,
    /// Controlling player, if any.
    pub owner_id: Option<Uuid>,
    /// Node type; behavior comes from the [`crate::rules`] table.
    pub node_type: NodeType,
    /// Upgrade tier, 1-based.
    pub tier: i32,
    /// Map region.
    pub region: Region,
    /// Ownership status.
    pub status: NodeStatus,
    /// Building health percentage, 0-100.
    pub health: f64,
    /// Stored resources.
    pub storage: ResourceMap,
    /// Ordered crafting queue; the engine only touches the head.
    pub crafting_queue: Vec<CraftingQueueItem>,
    /// Adjacent node ids (map graph edges).
    pub links: Vec<Uuid>,
    /// Last time upkeep was paid.
    pub upkeep_paid: Option<DateTime<Utc>>,
    /// When the next payment falls due.
    pub upkeep_due: Option<DateTime<Utc>>,
    /// Current upkeep lifecycle status; `None` for neutral nodes.
    pub upkeep_status: Option<UpkeepStatus>,
    /// When the node was created.
    pub created_at: DateTime<Utc>,
}

impl NodeRecord {
    /// Whether this node is a headquarters (exempt from upkeep decay).
    pub fn is_hq(&self) -> bool {
        self.node_type == NodeType::Headquarters
    }

    /// Hours elapsed since the last upkeep payment, zero if never paid.
    pub fn hours_since_payment(&self, now: DateTime<Utc>) -> f64 {
        match self.upkeep_paid {
            Some(paid) => (now - paid).num_milliseconds() as f64 / 3_600_000.0,
            None => 0.0,
        }
    }
}

/// A blueprint row: fixed input and output lists plus run duration.
#[derive(Debug, Clone)]
pub struct BlueprintRecord {
    /// Blueprint identifier.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Resources consumed per run.
    pub inputs: ResourceMap,
    /// Resources produced per run.
    pub outputs: ResourceMap,
    /// Duration of one run in milliseconds.
    pub time_per_run_ms: i64,
}

/// A scheduled point-to-point resource transfer row.
///
/// Resources are escrowed from the source at creation time; resolution
/// either delivers them (`Completed`) or returns them (`Cancelled`),
/// exactly once.
#[derive(Debug, Clone)]
pub struct TransferRecord {
    /// Transfer identifier.
    pub id: Uuid,
    /// Session the transfer belongs to.
    pub session_id: Uuid,
    /// Player who created the transfer.
    pub player_id: Uuid,
    /// Node resources were escrowed from.
    pub source_node_id: Uuid,
    /// Destination node.
    pub dest_node_id: Uuid,
    /// Escrowed resources.
    pub resources: ResourceMap,
    /// Resolution state.
    pub status: TransferStatus,
    /// When the transfer was created (escrow time).
    pub created_at: DateTime<Utc>,
    /// When the transfer arrives.
    pub completes_at: DateTime<Utc>,
}

/// Add `amount` of `resource` to a storage map, removing the entry if
/// it drops to zero or below.
pub fn credit_resource(storage: &mut ResourceMap, resource: &str, amount: i64) {
    let entry = storage.entry(resource.to_string()).or_insert(0);
    *entry += amount;
    if *entry <= 0 {
        storage.remove(resource);
    }
}

/// Whether `storage` can fully pay `cost`.
pub fn can_afford(storage: &ResourceMap, cost: &ResourceMap) -> bool {
    cost.iter()
        .all(|(resource, qty)| storage.get(resource).copied().unwrap_or(0) >= *qty)
}

/// Deduct `cost` from `storage`. Caller must have checked
/// [`can_afford`] first; entries that reach zero are removed.
pub fn deduct_resources(storage: &mut ResourceMap, cost: &ResourceMap) {
    for (resource, qty) in cost {
        credit_resource(storage, resource, -qty);
    }
}

/// Merge `addition` into `storage`.
pub fn credit_resources(storage: &mut ResourceMap, addition: &ResourceMap) {
    for (resource, qty) in addition {
        credit_resource(storage, resource, *qty);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_round_trips() {
        for status in [
            UpkeepStatus::Paid,
            UpkeepStatus::Warning,
            UpkeepStatus::Decay,
            UpkeepStatus::Collapse,
            UpkeepStatus::Abandoned,
        ] {
            assert_eq!(UpkeepStatus::parse(status.as_str()), Some(status));
        }
        for status in [
            TransferStatus::Pending,
            TransferStatus::Completed,
            TransferStatus::Cancelled,
        ] {
            assert_eq!(TransferStatus::parse(status.as_str()), Some(status));
        }
        for ty in [
            NodeType::Headquarters,
            NodeType::Mine,
            NodeType::Lumberyard,
            NodeType::Farm,
            NodeType::Quarry,
            NodeType::Foundry,
            NodeType::Outpost,
            NodeType::Fortress,
        ] {
            assert_eq!(NodeType::parse(ty.as_str()), Some(ty));
        }
        assert_eq!(UpkeepStatus::parse("bogus"), None);
        assert_eq!(GameType::parse("crownHold"), Some(GameType::CrownHold));
    }

    #[test]
    fn test_upkeep_status_ordering_worsens() {
        assert!(UpkeepStatus::Paid < UpkeepStatus::Warning);
        assert!(UpkeepStatus::Warning < UpkeepStatus::Decay);
        assert!(UpkeepStatus::Decay < UpkeepStatus::Collapse);
        assert!(UpkeepStatus::Collapse < UpkeepStatus::Abandoned);
    }

    #[test]
    fn test_storage_helpers() {
        let mut storage = ResourceMap::from([("ore".to_string(), 5)]);

        let cost = ResourceMap::from([("ore".to_string(), 3)]);
        assert!(can_afford(&storage, &cost));
        deduct_resources(&mut storage, &cost);
        assert_eq!(storage.get("ore"), Some(&2));

        assert!(!can_afford(&storage, &ResourceMap::from([("ore".to_string(), 3)])));

        // Zero entries are dropped entirely
        deduct_resources(&mut storage, &ResourceMap::from([("ore".to_string(), 2)]));
        assert!(storage.get("ore").is_none());

        credit_resources(
            &mut storage,
            &ResourceMap::from([("timber".to_string(), 4)]),
        );
        assert_eq!(storage.get("timber"), Some(&4));
    }

    #[test]
    fn test_queue_item_json_is_camel_case() {
        let item = CraftingQueueItem {
            id: Uuid::nil(),
            blueprint_id: Uuid::nil(),
            output_item_id: None,
            quantity: 3,
            completed_runs: 1,
            time_per_run_ms: 60_000,
            started_at: Utc::now(),
            completes_at: Utc::now(),
        };
        let value = serde_json::to_value(&item).unwrap();
        assert!(value.get("completedRuns").is_some());
        assert!(value.get("timePerRunMs").is_some());
        assert!(value.get("outputItemId").is_none());

        let back: CraftingQueueItem = serde_json::from_value(value).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn test_hours_since_payment() {
        let now = Utc::now();
        let node = NodeRecord {
            id: Uuid::nil(),
            session_id: Uuid::nil(),
            owner_id: None,
            node_type: NodeType::Mine,
            tier: 1,
            region: Region::Core,
            status: NodeStatus::Neutral,
            health: 100.0,
            storage: ResourceMap::new(),
            crafting_queue: vec![],
            links: vec![],
            upkeep_paid: Some(now - chrono::Duration::hours(20)),
            upkeep_due: None,
            upkeep_status: Some(UpkeepStatus::Decay),
            created_at: now,
        };
        let hours = node.hours_since_payment(now);
        assert!((hours - 20.0).abs() < 0.01);
    }
}
