// Copyright (C) 2025 Holdfast Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Crafting engine: the per-node crafting queue state machine.
//!
//! Only the queue head is ever processed, one run per invocation, so
//! every published event corresponds to exactly one unit of production
//! and a node with a deep queue cannot starve its neighbors. After a
//! run the engine re-schedules itself with a delayed job for the next
//! completion time; the periodic poll is only a safety net.
//!
//! Insufficient materials is not an error: the item is dropped and its
//! remaining runs are forfeited, with no refund of inputs already
//! consumed by earlier runs.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use holdfast_protocol::{channel, CraftingCompleted, QueueItemSnapshot};

use crate::error::Result;
use crate::events::{publish, EventPublisher};
use crate::model::{can_afford, credit_resources, deduct_resources, NodeRecord};
use crate::pending::{PendingWorkIndex, ENGINE_CRAFTING};
use crate::queue::{JobQueue, QUEUE_CRAFTING};
use crate::store::Store;

/// Job name for a single-node fast-path invocation.
pub const JOB_PROCESS_NODE: &str = "process_node";
/// Job name for the periodic all-nodes poll.
pub const JOB_CRAFTING_POLL: &str = "poll_crafting";

/// Nodes examined per poll invocation.
const POLL_BATCH: i64 = 100;

/// Crafting engine handle.
pub struct CraftingEngine {
    store: Arc<dyn Store>,
    pending: Arc<dyn PendingWorkIndex>,
    queue: Arc<dyn JobQueue>,
    publisher: Arc<dyn EventPublisher>,
}

impl CraftingEngine {
    /// Create an engine over the given handles.
    pub fn new(
        store: Arc<dyn Store>,
        pending: Arc<dyn PendingWorkIndex>,
        queue: Arc<dyn JobQueue>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            store,
            pending,
            queue,
            publisher,
        }
    }

    /// Process due crafting work. With a node filter this is the fast
    /// path for a self-rescheduled delayed job; without one it polls
    /// the pending-work index. Returns the number of runs completed.
    pub async fn process_due_crafts(&self, node_filter: Option<Uuid>) -> Result<usize> {
        let node_ids = match node_filter {
            Some(node_id) => vec![node_id],
            None => {
                self.pending
                    .due_entities(ENGINE_CRAFTING, Utc::now(), POLL_BATCH)
                    .await?
            }
        };

        let mut runs_completed = 0;
        for node_id in node_ids {
            // Per-entity isolation: one bad node never blocks the batch.
            match self.process_node(node_id).await {
                Ok(true) => runs_completed += 1,
                Ok(false) => {}
                Err(e) if e.is_retryable() => return Err(e),
                Err(e) => {
                    error!(node_id = %node_id, error = %e, "Crafting failed for node, skipping");
                    self.pending.clear(ENGINE_CRAFTING, node_id).await?;
                }
            }
        }

        if runs_completed > 0 {
            debug!(runs = runs_completed, "Crafting runs completed");
        }
        Ok(runs_completed)
    }

    /// Process the queue head of one node. Returns whether a run
    /// completed.
    async fn process_node(&self, node_id: Uuid) -> Result<bool> {
        let now = Utc::now();

        let Some(mut node) = self.store.get_node(node_id).await? else {
            // Node deleted since it was indexed.
            warn!(node_id = %node_id, "Indexed node no longer exists");
            self.pending.clear(ENGINE_CRAFTING, node_id).await?;
            return Ok(false);
        };

        let Some(head) = node.crafting_queue.first().cloned() else {
            self.pending.clear(ENGINE_CRAFTING, node_id).await?;
            return Ok(false);
        };

        if head.completes_at > now {
            // Not due yet; keep the index pointed at the real time.
            self.pending
                .set_due(ENGINE_CRAFTING, node_id, head.completes_at)
                .await?;
            return Ok(false);
        }

        let Some(blueprint) = self.store.get_blueprint(head.blueprint_id).await? else {
            // Data problem: drop the item rather than wedging the node.
            error!(
                node_id = %node_id,
                blueprint_id = %head.blueprint_id,
                "Queue item references unknown blueprint, dropping"
            );
            node.crafting_queue.remove(0);
            self.commit_and_reindex(&node).await?;
            return Ok(false);
        };

        // Outputs of the finished run are credited before the next
        // run's input check, so run N can fund run N+1.
        credit_resources(&mut node.storage, &blueprint.outputs);
        let mut item = head;
        item.completed_runs += 1;

        if item.completed_runs < item.quantity {
            if can_afford(&node.storage, &blueprint.inputs) {
                deduct_resources(&mut node.storage, &blueprint.inputs);
                item.started_at = now;
                item.completes_at = now + ChronoDuration::milliseconds(item.time_per_run_ms);
                node.crafting_queue[0] = item.clone();
            } else {
                info!(
                    node_id = %node_id,
                    queue_item_id = %item.id,
                    completed = item.completed_runs,
                    requested = item.quantity,
                    "Insufficient materials, forfeiting remaining runs"
                );
                node.crafting_queue.remove(0);
            }
        } else {
            node.crafting_queue.remove(0);
        }

        // Commit is the effect boundary; index updates, follow-up
        // scheduling and the event all happen strictly after it.
        self.commit_and_reindex(&node).await?;

        let queue_snapshot: Vec<QueueItemSnapshot> =
            node.crafting_queue.iter().map(Into::into).collect();
        publish(
            &self.publisher,
            channel::CRAFTING_COMPLETED,
            &CraftingCompleted {
                node_id: node.id,
                queue_item_id: item.id,
                blueprint_id: item.blueprint_id,
                quantity: item.quantity,
                outputs: blueprint.outputs.clone(),
                storage: node.storage.clone(),
                queue: queue_snapshot,
                session_id: node.session_id,
                player_id: node.owner_id,
            },
        )?;

        Ok(true)
    }

    /// Persist storage + queue atomically, repoint the pending index at
    /// the (possibly new) head, and schedule the follow-up job.
    async fn commit_and_reindex(&self, node: &NodeRecord) -> Result<()> {
        self.store
            .update_node_craft_state(node.id, &node.storage, &node.crafting_queue)
            .await?;

        match node.crafting_queue.first() {
            Some(head) => {
                self.pending
                    .set_due(ENGINE_CRAFTING, node.id, head.completes_at)
                    .await?;
                let delay = (head.completes_at - Utc::now())
                    .to_std()
                    .unwrap_or_default();
                self.queue
                    .enqueue_delayed(
                        QUEUE_CRAFTING,
                        JOB_PROCESS_NODE,
                        json!({ "nodeId": node.id }),
                        Some(&craft_job_key(node.id)),
                        delay,
                    )
                    .await?;
            }
            None => {
                self.pending.clear(ENGINE_CRAFTING, node.id).await?;
                self.queue.cancel_by_key(&craft_job_key(node.id)).await?;
            }
        }
        Ok(())
    }

    /// Handle an external `crafting:schedule` request: arm a one-off
    /// delayed job for the node and point the index at the expected
    /// completion time.
    pub async fn schedule_node(
        &self,
        node_id: Uuid,
        delay_ms: i64,
        completes_at: chrono::DateTime<Utc>,
    ) -> Result<()> {
        self.pending
            .set_due(ENGINE_CRAFTING, node_id, completes_at)
            .await?;
        self.queue
            .enqueue_delayed(
                QUEUE_CRAFTING,
                JOB_PROCESS_NODE,
                json!({ "nodeId": node_id }),
                Some(&craft_job_key(node_id)),
                std::time::Duration::from_millis(delay_ms.max(0) as u64),
            )
            .await?;
        Ok(())
    }
}

/// Unique key for a node's self-rescheduled crafting job, so a newer
/// schedule supersedes an older one.
fn craft_job_key(node_id: Uuid) -> String {
    format!("craft:{}", node_id)
}
