// Copyright (C) 2025 Holdfast Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Holdfast Protocol - event bus contract
//!
//! This crate defines the pub/sub contract between the production &
//! decay engine and its external listeners (presentation clients,
//! API-side schedulers). Payloads are JSON-serializable and use
//! camelCase field names on the wire; channel names are the stable
//! strings in [`channel`].
//!
//! The engine only ever *produces* on the `crafting:completed`,
//! `resources:update`, `upkeep:tick`, `economy:processed`,
//! `transfer:completed`, `node:abandoned` and `game:victory` channels,
//! and *consumes* `crown:changed`, `hq:captured` and
//! `crafting:schedule` notifications from the outside.

#![deny(missing_docs)]

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable channel names for the event bus.
pub mod channel {
    /// One crafting run finished on a node.
    pub const CRAFTING_COMPLETED: &str = "crafting:completed";
    /// Batched per-node storage updates from the upkeep cycle.
    pub const RESOURCES_UPDATE: &str = "resources:update";
    /// An hourly upkeep cycle ran for a session.
    pub const UPKEEP_TICK: &str = "upkeep:tick";
    /// Per-player economy settlement summary.
    pub const ECONOMY_PROCESSED: &str = "economy:processed";
    /// A scheduled resource transfer resolved.
    pub const TRANSFER_COMPLETED: &str = "transfer:completed";
    /// A node decayed to abandonment and reverted to neutral.
    pub const NODE_ABANDONED: &str = "node:abandoned";
    /// A session ended with a winner.
    pub const GAME_VICTORY: &str = "game:victory";

    /// Consumed: ownership of the crown node changed.
    pub const CROWN_CHANGED: &str = "crown:changed";
    /// Consumed: a player's headquarters was captured.
    pub const HQ_CAPTURED: &str = "hq:captured";
    /// Consumed: request a one-off delayed crafting job for a node.
    pub const CRAFTING_SCHEDULE: &str = "crafting:schedule";
}

/// Per-resource quantities, keyed by resource identifier.
pub type ResourceMap = BTreeMap<String, i64>;

/// Wire shape of one crafting queue entry, as carried in event snapshots.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueueItemSnapshot {
    /// Queue item identifier.
    pub id: Uuid,
    /// Blueprint being crafted.
    pub blueprint_id: Uuid,
    /// Primary output resource, when the blueprint has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_item_id: Option<String>,
    /// Total runs requested.
    pub quantity: u32,
    /// Runs finished so far.
    pub completed_runs: u32,
    /// Duration of a single run in milliseconds.
    pub time_per_run_ms: i64,
    /// When the current run started.
    pub started_at: DateTime<Utc>,
    /// When the current run completes.
    pub completes_at: DateTime<Utc>,
}

/// Payload for [`channel::CRAFTING_COMPLETED`] - one event per finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CraftingCompleted {
    /// Node the run finished on.
    pub node_id: Uuid,
    /// Queue item the run belonged to.
    pub queue_item_id: Uuid,
    /// Blueprint that was crafted.
    pub blueprint_id: Uuid,
    /// Total runs requested on the item.
    pub quantity: u32,
    /// Outputs credited by this run.
    pub outputs: ResourceMap,
    /// Node storage after the run.
    pub storage: ResourceMap,
    /// Remaining crafting queue after the run.
    pub queue: Vec<QueueItemSnapshot>,
    /// Session the node belongs to.
    pub session_id: Uuid,
    /// Owner of the node, if any.
    pub player_id: Option<Uuid>,
}

/// One node's storage snapshot inside a [`ResourcesUpdate`] batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStorageDelta {
    /// Node whose storage changed.
    pub node_id: Uuid,
    /// Storage after the change.
    pub storage: ResourceMap,
}

/// Payload for [`channel::RESOURCES_UPDATE`] - batched storage changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcesUpdate {
    /// Session the nodes belong to.
    pub session_id: Uuid,
    /// Per-node storage snapshots after settlement.
    pub nodes: Vec<NodeStorageDelta>,
}

/// Payload for [`channel::ECONOMY_PROCESSED`] - per-player settlement summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EconomyProcessed {
    /// Session the settlement ran in.
    pub session_id: Uuid,
    /// Player whose economy was settled.
    pub player_id: Uuid,
    /// Total upkeep charged this cycle.
    pub total_upkeep: i64,
    /// Total credit income generated this cycle.
    pub total_income: i64,
    /// Credit balance before settlement.
    pub credits_before: i64,
    /// Credit balance after settlement (never negative).
    pub credits_after: i64,
    /// Whether the full upkeep bill was covered.
    pub upkeep_paid: bool,
    /// Number of owned nodes touched by the cycle.
    pub nodes_processed: usize,
}

/// Payload for [`channel::UPKEEP_TICK`] - one cycle ran for a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpkeepTick {
    /// Session the cycle ran for.
    pub session_id: Uuid,
    /// Players settled in this cycle.
    pub players_processed: usize,
    /// When the cycle ran.
    pub timestamp: DateTime<Utc>,
}

/// Payload for [`channel::TRANSFER_COMPLETED`] - a transfer resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferCompleted {
    /// Transfer that resolved.
    pub transfer_id: Uuid,
    /// Player who created the transfer.
    pub player_id: Uuid,
    /// Source node resources were escrowed from.
    pub source_node_id: Uuid,
    /// Destination node.
    pub dest_node_id: Uuid,
    /// Terminal status, `"completed"` or `"cancelled"`.
    pub status: String,
    /// Session the transfer belongs to.
    pub session_id: Uuid,
    /// Source storage after resolution, when the source was touched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_storage: Option<ResourceMap>,
    /// Destination storage after resolution, when the destination was credited.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest_storage: Option<ResourceMap>,
}

/// Payload for [`channel::NODE_ABANDONED`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeAbandoned {
    /// Node that reverted to neutral.
    pub node_id: Uuid,
    /// Why the node was abandoned (e.g. `"upkeep"`).
    pub reason: String,
    /// When the abandonment was applied.
    pub timestamp: DateTime<Utc>,
}

/// Payload for [`channel::GAME_VICTORY`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameVictory {
    /// Session that ended.
    pub session_id: Uuid,
    /// Winning player.
    pub winner_id: Uuid,
    /// Winning player's display name.
    pub winner_name: String,
    /// Game mode that produced the win, `"crownHold"` or `"elimination"`.
    pub game_type: String,
    /// Human-readable reason for the win.
    pub reason: String,
}

/// Consumed payload for [`channel::CROWN_CHANGED`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrownChanged {
    /// Session whose crown node changed hands.
    pub session_id: Uuid,
    /// The crown node.
    pub crown_node_id: Uuid,
}

/// Consumed payload for [`channel::HQ_CAPTURED`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HqCaptured {
    /// Session the capture happened in.
    pub session_id: Uuid,
    /// The headquarters node that was captured.
    pub captured_hq_node_id: Uuid,
    /// Player who lost the headquarters.
    pub previous_owner_id: Uuid,
    /// Player who took it.
    pub new_owner_id: Uuid,
}

/// Consumed payload for [`channel::CRAFTING_SCHEDULE`].
///
/// Used for instant first-run scheduling when a player starts a craft:
/// the API side asks the engine to process the node after `delay_ms`
/// instead of waiting for the periodic poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CraftingSchedule {
    /// Node whose crafting queue should be processed.
    pub node_id: Uuid,
    /// Delay before processing, in milliseconds.
    pub delay_ms: i64,
    /// When the run completes (informational, for the pending index).
    pub completes_at: DateTime<Utc>,
}

/// A channel name paired with its serialized payload, as handed to
/// the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Channel the payload is published on.
    pub channel: String,
    /// JSON payload.
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    /// Build an envelope from a typed payload.
    ///
    /// Serialization of the payload types in this crate cannot fail,
    /// so this is infallible for the engine's own events.
    pub fn new<T: Serialize>(channel: &str, payload: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            channel: channel.to_string(),
            payload: serde_json::to_value(payload)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crafting_completed_wire_shape() {
        let payload = CraftingCompleted {
            node_id: Uuid::nil(),
            queue_item_id: Uuid::nil(),
            blueprint_id: Uuid::nil(),
            quantity: 5,
            outputs: ResourceMap::from([("iron_ingot".to_string(), 2)]),
            storage: ResourceMap::from([("iron_ingot".to_string(), 10)]),
            queue: vec![],
            session_id: Uuid::nil(),
            player_id: None,
        };

        let value = serde_json::to_value(&payload).unwrap();
        assert!(value.get("nodeId").is_some());
        assert!(value.get("queueItemId").is_some());
        assert!(value.get("completedRuns").is_none());
        assert_eq!(value["outputs"]["iron_ingot"], 2);
    }

    #[test]
    fn test_transfer_completed_omits_untouched_storage() {
        let payload = TransferCompleted {
            transfer_id: Uuid::nil(),
            player_id: Uuid::nil(),
            source_node_id: Uuid::nil(),
            dest_node_id: Uuid::nil(),
            status: "completed".to_string(),
            session_id: Uuid::nil(),
            source_storage: None,
            dest_storage: Some(ResourceMap::new()),
        };

        let value = serde_json::to_value(&payload).unwrap();
        assert!(value.get("sourceStorage").is_none());
        assert!(value.get("destStorage").is_some());
    }

    #[test]
    fn test_consumed_payloads_roundtrip_camel_case() {
        let raw = serde_json::json!({
            "sessionId": "7f8de1f0-7d9c-4a04-9a2c-55a4f0a3f3b1",
            "crownNodeId": "1d9c2f51-9c2e-4b7e-8a8e-2f1a3b4c5d6e",
        });
        let parsed: CrownChanged = serde_json::from_value(raw).unwrap();
        assert_eq!(
            parsed.session_id.to_string(),
            "7f8de1f0-7d9c-4a04-9a2c-55a4f0a3f3b1"
        );

        let raw = serde_json::json!({
            "nodeId": "1d9c2f51-9c2e-4b7e-8a8e-2f1a3b4c5d6e",
            "delayMs": 1500,
            "completesAt": "2025-01-01T00:00:00Z",
        });
        let parsed: CraftingSchedule = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.delay_ms, 1500);
    }

    #[test]
    fn test_envelope_carries_channel_name() {
        let payload = NodeAbandoned {
            node_id: Uuid::nil(),
            reason: "upkeep".to_string(),
            timestamp: Utc::now(),
        };
        let envelope = EventEnvelope::new(channel::NODE_ABANDONED, &payload).unwrap();
        assert_eq!(envelope.channel, "node:abandoned");
        assert_eq!(envelope.payload["reason"], "upkeep");
    }
}
