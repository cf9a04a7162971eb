// Copyright (C) 2025 Holdfast Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Upkeep/decay engine: the per-node lifecycle state machine driven by
//! time since last payment.
//!
//! The hourly cycle settles each player's economy (income, upkeep
//! bill, resource production) and writes per-node upkeep state in one
//! transaction per player. A second, independent pass applies the
//! consequences of non-payment between cycles: building damage while
//! decaying, and reversion to neutral once the abandonment threshold
//! is crossed.
//!
//! Payment is all-or-nothing per player; a shortfall clamps credits at
//! zero and leaves every non-HQ node unpaid. HQ nodes never enter the
//! decay state machine.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{debug, error, info};
use uuid::Uuid;

use holdfast_protocol::{
    channel, EconomyProcessed, NodeAbandoned, NodeStorageDelta, ResourcesUpdate, UpkeepTick,
};

use crate::error::Result;
use crate::events::{publish, EventPublisher};
use crate::model::{
    credit_resources, NodeRecord, PlayerRecord, SessionRecord, UpkeepStatus,
};
use crate::rules;
use crate::store::{Store, UpkeepSettlement, UpkeepStatusGroup};

/// Job name for the hourly upkeep cycle.
pub const JOB_UPKEEP_CYCLE: &str = "upkeep_cycle";
/// Job name for the standalone decay-consequences pass, which runs on
/// a shorter interval so decay stays visible between upkeep cycles.
pub const JOB_DECAY_PASS: &str = "decay_pass";

/// Upkeep/decay engine handle.
pub struct UpkeepEngine {
    store: Arc<dyn Store>,
    publisher: Arc<dyn EventPublisher>,
}

impl UpkeepEngine {
    /// Create an engine over the given handles.
    pub fn new(store: Arc<dyn Store>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self { store, publisher }
    }

    /// Run one full upkeep cycle over every active session, then the
    /// decay-consequences pass.
    pub async fn process_upkeep_cycle(&self) -> Result<()> {
        let now = Utc::now();
        let sessions = self.store.list_active_sessions().await?;

        for session in &sessions {
            if let Err(e) = self.process_session(session, now).await {
                if e.is_retryable() {
                    return Err(e);
                }
                error!(session_id = %session.id, error = %e, "Upkeep cycle failed for session");
            }
        }

        self.process_failure_consequences().await?;
        Ok(())
    }

    /// Settle every node-owning player in one session.
    async fn process_session(&self, session: &SessionRecord, now: DateTime<Utc>) -> Result<()> {
        let players = self.store.list_players(session.id).await?;
        let owned = self.store.list_owned_nodes(session.id).await?;

        let mut by_owner: HashMap<Uuid, Vec<NodeRecord>> = HashMap::new();
        for node in owned {
            if let Some(owner_id) = node.owner_id {
                by_owner.entry(owner_id).or_default().push(node);
            }
        }

        let mut players_processed = 0;
        for player in &players {
            let Some(nodes) = by_owner.get(&player.id) else {
                continue;
            };
            // Per-player isolation: a failed settlement never blocks
            // the other players in the cycle.
            match self.settle_player(session, player, nodes, now).await {
                Ok(()) => players_processed += 1,
                Err(e) if e.is_retryable() => return Err(e),
                Err(e) => {
                    error!(
                        session_id = %session.id,
                        player_id = %player.id,
                        error = %e,
                        "Economy settlement failed for player"
                    );
                }
            }
        }

        publish(
            &self.publisher,
            channel::UPKEEP_TICK,
            &UpkeepTick {
                session_id: session.id,
                players_processed,
                timestamp: now,
            },
        )?;
        debug!(session_id = %session.id, players = players_processed, "Upkeep cycle ran");
        Ok(())
    }

    /// Settle one player's economy: income, production, the upkeep
    /// bill, and per-node upkeep state, committed in one transaction.
    async fn settle_player(
        &self,
        session: &SessionRecord,
        player: &PlayerRecord,
        nodes: &[NodeRecord],
        now: DateTime<Utc>,
    ) -> Result<()> {
        let hq_id = player
            .hq_node_id
            .or_else(|| nodes.iter().find(|n| n.is_hq()).map(|n| n.id));
        let distances = match hq_id {
            Some(hq) => rules::hq_distances(nodes, hq),
            None => HashMap::new(),
        };

        let mut total_upkeep: i64 = 0;
        let mut total_income: i64 = 0;
        let mut storage_writes: Vec<(Uuid, holdfast_protocol::ResourceMap)> = Vec::new();

        for node in nodes {
            let hops = distances.get(&node.id).copied().unwrap_or(0);
            total_upkeep += rules::node_upkeep_cost(node, hops);
            total_income += rules::hourly_credit_income(node.node_type);

            // Non-credit production lands in node storage even on an
            // unpaid cycle.
            let produced = rules::hourly_resource_production(node.node_type);
            if !produced.is_empty() {
                let mut storage = node.storage.clone();
                credit_resources(&mut storage, &produced);
                storage_writes.push((node.id, storage));
            }
        }

        let credits_before = player.credits;
        let balance = credits_before + total_income;
        let paid = balance >= total_upkeep;
        let credits_after = (balance - total_upkeep).max(0);

        let status_groups = if paid {
            vec![UpkeepStatusGroup {
                node_ids: nodes.iter().map(|n| n.id).collect(),
                upkeep_paid: Some(now),
                upkeep_due: Some(now + ChronoDuration::hours(1)),
                status: UpkeepStatus::Paid,
            }]
        } else {
            // HQ is never penalized; everything else keeps its payment
            // timestamp and gets its status recomputed from elapsed
            // hours, one batched update per resulting status.
            let mut groups: HashMap<UpkeepStatus, Vec<Uuid>> = HashMap::new();
            let mut hq_nodes = Vec::new();
            for node in nodes {
                if node.is_hq() {
                    hq_nodes.push(node.id);
                } else {
                    let status =
                        rules::upkeep_status_for_hours(node.hours_since_payment(now));
                    groups.entry(status).or_default().push(node.id);
                }
            }

            let mut status_groups: Vec<UpkeepStatusGroup> = groups
                .into_iter()
                .map(|(status, node_ids)| UpkeepStatusGroup {
                    node_ids,
                    upkeep_paid: None,
                    upkeep_due: None,
                    status,
                })
                .collect();
            if !hq_nodes.is_empty() {
                status_groups.push(UpkeepStatusGroup {
                    node_ids: hq_nodes,
                    upkeep_paid: Some(now),
                    upkeep_due: Some(now + ChronoDuration::hours(1)),
                    status: UpkeepStatus::Paid,
                });
            }
            status_groups
        };

        let settlement = UpkeepSettlement {
            player_id: player.id,
            credits_after,
            storage_writes: storage_writes.clone(),
            status_groups,
        };
        self.store.commit_upkeep_settlement(&settlement).await?;

        if !paid {
            info!(
                player_id = %player.id,
                credits = balance,
                upkeep = total_upkeep,
                "Upkeep shortfall, nodes left unpaid"
            );
        }

        publish(
            &self.publisher,
            channel::ECONOMY_PROCESSED,
            &EconomyProcessed {
                session_id: session.id,
                player_id: player.id,
                total_upkeep,
                total_income,
                credits_before,
                credits_after,
                upkeep_paid: paid,
                nodes_processed: nodes.len(),
            },
        )?;

        if !storage_writes.is_empty() {
            publish(
                &self.publisher,
                channel::RESOURCES_UPDATE,
                &ResourcesUpdate {
                    session_id: session.id,
                    nodes: storage_writes
                        .into_iter()
                        .map(|(node_id, storage)| NodeStorageDelta { node_id, storage })
                        .collect(),
                },
            )?;
        }

        Ok(())
    }

    /// Decay-consequences pass: re-scan every unpaid owned node,
    /// recompute its status from elapsed hours, and apply damage or
    /// abandonment. Runs independently of the hourly settlement so
    /// decay stays visible between cycles.
    pub async fn process_failure_consequences(&self) -> Result<()> {
        let now = Utc::now();
        let unpaid = self.store.list_unpaid_owned_nodes().await?;

        for node in unpaid {
            match self.apply_consequences(&node, now).await {
                Ok(()) => {}
                Err(e) if e.is_retryable() => return Err(e),
                Err(e) => {
                    error!(node_id = %node.id, error = %e, "Decay pass failed for node");
                }
            }
        }
        Ok(())
    }

    async fn apply_consequences(&self, node: &NodeRecord, now: DateTime<Utc>) -> Result<()> {
        if node.is_hq() {
            return Ok(());
        }

        let hours = node.hours_since_payment(now);
        let status = rules::upkeep_status_for_hours(hours);

        if status == UpkeepStatus::Abandoned {
            // Terminal for this ownership episode. abandon_node is a
            // no-op on an already-neutral node, so re-processing after
            // a crash is safe.
            self.store.abandon_node(node.id).await?;
            info!(node_id = %node.id, hours_unpaid = hours, "Node abandoned");
            publish(
                &self.publisher,
                channel::NODE_ABANDONED,
                &NodeAbandoned {
                    node_id: node.id,
                    reason: "upkeep".to_string(),
                    timestamp: now,
                },
            )?;
            return Ok(());
        }

        let damage = rules::decay_damage_percent(hours);
        let health = (node.health - damage).max(0.0);
        self.store
            .set_node_health_status(node.id, health, status)
            .await?;
        Ok(())
    }
}
