// Copyright (C) 2025 Holdfast Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Transfer engine: completion of scheduled point-to-point resource
//! movements.
//!
//! Resources are already escrowed from the source when a transfer row
//! is created; this engine only resolves due transfers. Delivery
//! requires the destination to still belong to the sending player at
//! arrival time; otherwise the escrow is returned to the source, or
//! lost with it if the source changed hands too. Every resolution is
//! terminal and applied at most once: the status transition only
//! matches rows still pending.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use holdfast_protocol::{channel, ResourceMap, TransferCompleted};

use crate::error::Result;
use crate::events::{publish, EventPublisher};
use crate::model::{credit_resources, NodeRecord, TransferRecord, TransferStatus};
use crate::store::{Store, TransferResolution};

/// Job name for the periodic due-transfers poll.
pub const JOB_TRANSFER_POLL: &str = "poll_transfers";

/// Transfer engine handle.
pub struct TransferEngine {
    store: Arc<dyn Store>,
    publisher: Arc<dyn EventPublisher>,
}

impl TransferEngine {
    /// Create an engine over the given handles.
    pub fn new(store: Arc<dyn Store>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self { store, publisher }
    }

    /// Resolve every pending transfer whose arrival time has passed.
    /// Returns the number of transfers delivered to their destination
    /// (cancellations terminate the transfer but do not count).
    pub async fn process_due_transfers(&self) -> Result<usize> {
        let now = Utc::now();
        let due = self.store.due_transfers(now).await?;
        if due.is_empty() {
            return Ok(0);
        }

        // One batch load for every node the batch touches; later
        // transfers in the batch see the storage produced by earlier
        // ones via the working copies.
        let mut node_ids: Vec<Uuid> = due
            .iter()
            .flat_map(|t| [t.source_node_id, t.dest_node_id])
            .collect();
        node_ids.sort();
        node_ids.dedup();

        let nodes: HashMap<Uuid, NodeRecord> = self
            .store
            .get_nodes(&node_ids)
            .await?
            .into_iter()
            .map(|n| (n.id, n))
            .collect();
        let mut working_storage: HashMap<Uuid, ResourceMap> = nodes
            .iter()
            .map(|(id, n)| (*id, n.storage.clone()))
            .collect();

        let mut resolutions = Vec::with_capacity(due.len());
        for transfer in &due {
            resolutions.push(classify(transfer, &nodes, &mut working_storage));
        }

        // All storage mutations and status transitions commit together;
        // already-resolved rows are skipped inside the transaction and
        // excluded from the returned ids.
        let applied: HashSet<Uuid> = self
            .store
            .resolve_transfers(&resolutions)
            .await?
            .into_iter()
            .collect();

        // Publish from fresh post-commit storage, not the working
        // copies, in case a concurrent writer touched the same nodes.
        let fresh: HashMap<Uuid, NodeRecord> = self
            .store
            .get_nodes(&node_ids)
            .await?
            .into_iter()
            .map(|n| (n.id, n))
            .collect();

        let mut completed = 0;
        for (transfer, resolution) in due.iter().zip(&resolutions) {
            if !applied.contains(&transfer.id) {
                // A concurrent writer terminalized the row first; its
                // effects won, so no event is owed for this resolution.
                continue;
            }
            if resolution.status == TransferStatus::Completed {
                completed += 1;
            }

            let touched_source = resolution
                .storage_writes
                .iter()
                .any(|(id, _)| *id == transfer.source_node_id);
            let touched_dest = resolution
                .storage_writes
                .iter()
                .any(|(id, _)| *id == transfer.dest_node_id);

            publish(
                &self.publisher,
                channel::TRANSFER_COMPLETED,
                &TransferCompleted {
                    transfer_id: transfer.id,
                    player_id: transfer.player_id,
                    source_node_id: transfer.source_node_id,
                    dest_node_id: transfer.dest_node_id,
                    status: resolution.status.as_str().to_string(),
                    session_id: transfer.session_id,
                    source_storage: touched_source
                        .then(|| fresh.get(&transfer.source_node_id).map(|n| n.storage.clone()))
                        .flatten(),
                    dest_storage: touched_dest
                        .then(|| fresh.get(&transfer.dest_node_id).map(|n| n.storage.clone()))
                        .flatten(),
                },
            )?;

            if resolution.status == TransferStatus::Cancelled {
                info!(
                    transfer_id = %transfer.id,
                    player_id = %transfer.player_id,
                    "Transfer cancelled, ownership changed before arrival"
                );
            }
        }

        debug!(resolved = applied.len(), completed, "Transfers resolved");
        Ok(completed)
    }
}

/// Decide one transfer's terminal state and the storage writes it
/// produces, accumulating into the batch's working storage copies.
fn classify(
    transfer: &TransferRecord,
    nodes: &HashMap<Uuid, NodeRecord>,
    working_storage: &mut HashMap<Uuid, ResourceMap>,
) -> TransferResolution {
    let dest_owned = nodes
        .get(&transfer.dest_node_id)
        .map(|n| n.owner_id == Some(transfer.player_id))
        .unwrap_or(false);

    if dest_owned {
        let storage = working_storage
            .entry(transfer.dest_node_id)
            .or_default();
        credit_resources(storage, &transfer.resources);
        return TransferResolution {
            transfer_id: transfer.id,
            status: TransferStatus::Completed,
            storage_writes: vec![(transfer.dest_node_id, storage.clone())],
        };
    }

    // Destination missing or lost: refund the escrow to the source,
    // but only if the player still holds the source. Otherwise the
    // escrow is lost with the node.
    let source_owned = nodes
        .get(&transfer.source_node_id)
        .map(|n| n.owner_id == Some(transfer.player_id))
        .unwrap_or(false);

    let storage_writes = if source_owned {
        let storage = working_storage
            .entry(transfer.source_node_id)
            .or_default();
        credit_resources(storage, &transfer.resources);
        vec![(transfer.source_node_id, storage.clone())]
    } else {
        Vec::new()
    };

    TransferResolution {
        transfer_id: transfer.id,
        status: TransferStatus::Cancelled,
        storage_writes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NodeStatus, NodeType, Region};

    fn node(id: Uuid, owner: Option<Uuid>) -> NodeRecord {
        NodeRecord {
            id,
            session_id: Uuid::nil(),
            owner_id: owner,
            node_type: NodeType::Outpost,
            tier: 1,
            region: Region::Core,
            status: if owner.is_some() {
                NodeStatus::Owned
            } else {
                NodeStatus::Neutral
            },
            health: 100.0,
            storage: ResourceMap::from([("stone".to_string(), 3)]),
            crafting_queue: vec![],
            links: vec![],
            upkeep_paid: None,
            upkeep_due: None,
            upkeep_status: None,
            created_at: Utc::now(),
        }
    }

    fn transfer(player: Uuid, source: Uuid, dest: Uuid) -> TransferRecord {
        TransferRecord {
            id: Uuid::new_v4(),
            session_id: Uuid::nil(),
            player_id: player,
            source_node_id: source,
            dest_node_id: dest,
            resources: ResourceMap::from([("stone".to_string(), 5)]),
            status: TransferStatus::Pending,
            created_at: Utc::now(),
            completes_at: Utc::now(),
        }
    }

    #[test]
    fn test_intact_destination_completes() {
        let player = Uuid::new_v4();
        let (source, dest) = (Uuid::new_v4(), Uuid::new_v4());
        let nodes = HashMap::from([(source, node(source, Some(player))), (dest, node(dest, Some(player)))]);
        let mut working: HashMap<Uuid, ResourceMap> =
            nodes.iter().map(|(id, n)| (*id, n.storage.clone())).collect();

        let resolution = classify(&transfer(player, source, dest), &nodes, &mut working);
        assert_eq!(resolution.status, TransferStatus::Completed);
        assert_eq!(resolution.storage_writes.len(), 1);
        assert_eq!(resolution.storage_writes[0].1.get("stone"), Some(&8));
    }

    #[test]
    fn test_lost_destination_refunds_source() {
        let player = Uuid::new_v4();
        let rival = Uuid::new_v4();
        let (source, dest) = (Uuid::new_v4(), Uuid::new_v4());
        let nodes = HashMap::from([(source, node(source, Some(player))), (dest, node(dest, Some(rival)))]);
        let mut working: HashMap<Uuid, ResourceMap> =
            nodes.iter().map(|(id, n)| (*id, n.storage.clone())).collect();

        let resolution = classify(&transfer(player, source, dest), &nodes, &mut working);
        assert_eq!(resolution.status, TransferStatus::Cancelled);
        assert_eq!(resolution.storage_writes[0].0, source);
        assert_eq!(resolution.storage_writes[0].1.get("stone"), Some(&8));
    }

    #[test]
    fn test_both_nodes_lost_forfeits_escrow() {
        let player = Uuid::new_v4();
        let rival = Uuid::new_v4();
        let (source, dest) = (Uuid::new_v4(), Uuid::new_v4());
        let nodes = HashMap::from([(source, node(source, Some(rival))), (dest, node(dest, None))]);
        let mut working: HashMap<Uuid, ResourceMap> =
            nodes.iter().map(|(id, n)| (*id, n.storage.clone())).collect();

        let resolution = classify(&transfer(player, source, dest), &nodes, &mut working);
        assert_eq!(resolution.status, TransferStatus::Cancelled);
        assert!(resolution.storage_writes.is_empty());
    }

    #[test]
    fn test_missing_destination_cancels() {
        let player = Uuid::new_v4();
        let (source, dest) = (Uuid::new_v4(), Uuid::new_v4());
        let nodes = HashMap::from([(source, node(source, Some(player)))]);
        let mut working: HashMap<Uuid, ResourceMap> =
            nodes.iter().map(|(id, n)| (*id, n.storage.clone())).collect();

        let resolution = classify(&transfer(player, source, dest), &nodes, &mut working);
        assert_eq!(resolution.status, TransferStatus::Cancelled);
        assert_eq!(resolution.storage_writes[0].0, source);
    }

    #[test]
    fn test_batch_accumulates_into_shared_destination() {
        let player = Uuid::new_v4();
        let (source, dest) = (Uuid::new_v4(), Uuid::new_v4());
        let nodes = HashMap::from([(source, node(source, Some(player))), (dest, node(dest, Some(player)))]);
        let mut working: HashMap<Uuid, ResourceMap> =
            nodes.iter().map(|(id, n)| (*id, n.storage.clone())).collect();

        let first = classify(&transfer(player, source, dest), &nodes, &mut working);
        let second = classify(&transfer(player, source, dest), &nodes, &mut working);
        assert_eq!(first.storage_writes[0].1.get("stone"), Some(&8));
        assert_eq!(second.storage_writes[0].1.get("stone"), Some(&13));
    }
}
