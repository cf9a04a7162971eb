// Copyright (C) 2025 Holdfast Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Engine runtime: wires the engines to the job queue and the event
//! bus and drives the periodic ticks.
//!
//! On start the runtime re-arms one repeating job per periodic engine
//! (idempotent on restart thanks to the repeating jobs' unique keys),
//! runs an immediate upkeep cycle to catch up after downtime, and
//! spawns one single-consumer loop per named queue. Inbound
//! notifications (`crown:changed`, `hq:captured`, `crafting:schedule`)
//! are dispatched straight to the owning engine.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use holdfast_protocol::{channel, CraftingSchedule, CrownChanged, EventEnvelope, HqCaptured};

use crate::config::Config;
use crate::engines::crafting::{CraftingEngine, JOB_CRAFTING_POLL, JOB_PROCESS_NODE};
use crate::engines::transfer::{TransferEngine, JOB_TRANSFER_POLL};
use crate::engines::upkeep::{UpkeepEngine, JOB_DECAY_PASS, JOB_UPKEEP_CYCLE};
use crate::engines::victory::{VictoryEngine, JOB_CROWN_CHECK};
use crate::error::{EngineError, Result};
use crate::events::EventPublisher;
use crate::pending::PendingWorkIndex;
use crate::queue::{
    ConsumerConfig, JobHandler, JobQueue, JobRecord, QueueConsumer, QUEUE_CRAFTING,
    QUEUE_TRANSFERS, QUEUE_UPKEEP, QUEUE_VICTORY,
};
use crate::store::Store;

/// The assembled engine runtime.
pub struct EngineRuntime {
    config: Config,
    queue: Arc<dyn JobQueue>,
    crafting: Arc<CraftingEngine>,
    upkeep: Arc<UpkeepEngine>,
    transfer: Arc<TransferEngine>,
    victory: Arc<VictoryEngine>,
}

/// Handle to the running consumer tasks.
pub struct RuntimeHandle {
    shutdown_handles: Vec<Arc<tokio::sync::Notify>>,
    tasks: Vec<JoinHandle<()>>,
}

impl RuntimeHandle {
    /// Signal every consumer to stop and wait for them to finish.
    pub async fn shutdown(self) {
        for handle in &self.shutdown_handles {
            handle.notify_one();
        }
        for task in self.tasks {
            let _ = task.await;
        }
        info!("Engine runtime stopped");
    }
}

impl EngineRuntime {
    /// Assemble the engines over injected store, queue, index and
    /// publisher handles.
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        pending: Arc<dyn PendingWorkIndex>,
        queue: Arc<dyn JobQueue>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        let crafting = Arc::new(CraftingEngine::new(
            store.clone(),
            pending,
            queue.clone(),
            publisher.clone(),
        ));
        let upkeep = Arc::new(UpkeepEngine::new(store.clone(), publisher.clone()));
        let transfer = Arc::new(TransferEngine::new(store.clone(), publisher.clone()));
        let victory = Arc::new(VictoryEngine::new(
            store,
            queue.clone(),
            publisher,
            config.crown_hold,
        ));

        Self {
            config,
            queue,
            crafting,
            upkeep,
            transfer,
            victory,
        }
    }

    /// Arm the periodic jobs, run the startup catch-up, and spawn the
    /// queue consumers.
    pub async fn start(&self) -> Result<RuntimeHandle> {
        self.queue
            .enqueue_repeating(
                QUEUE_CRAFTING,
                JOB_CRAFTING_POLL,
                json!({}),
                self.config.crafting_poll,
            )
            .await?;
        self.queue
            .enqueue_repeating(
                QUEUE_TRANSFERS,
                JOB_TRANSFER_POLL,
                json!({}),
                self.config.transfer_poll,
            )
            .await?;
        self.queue
            .enqueue_repeating(
                QUEUE_UPKEEP,
                JOB_UPKEEP_CYCLE,
                json!({}),
                self.config.upkeep_interval,
            )
            .await?;
        // The consequences pass also runs between cycles, so a node
        // that crosses a decay threshold mid-hour is penalized promptly.
        self.queue
            .enqueue_repeating(QUEUE_UPKEEP, JOB_DECAY_PASS, json!({}), self.config.decay_poll)
            .await?;

        // Catch up on upkeep missed while the process was down.
        if let Err(e) = self.upkeep.process_upkeep_cycle().await {
            error!(error = %e, "Startup upkeep catch-up failed");
        }

        let consumer_config = ConsumerConfig {
            poll_interval: self.config.queue_poll,
            ..ConsumerConfig::default()
        };

        let mut shutdown_handles = Vec::new();
        let mut tasks = Vec::new();
        let consumers: Vec<(&str, Arc<dyn JobHandler>)> = vec![
            (
                QUEUE_CRAFTING,
                Arc::new(CraftingHandler {
                    engine: self.crafting.clone(),
                }),
            ),
            (
                QUEUE_UPKEEP,
                Arc::new(UpkeepHandler {
                    engine: self.upkeep.clone(),
                }),
            ),
            (
                QUEUE_TRANSFERS,
                Arc::new(TransferHandler {
                    engine: self.transfer.clone(),
                }),
            ),
            (
                QUEUE_VICTORY,
                Arc::new(VictoryHandler {
                    engine: self.victory.clone(),
                }),
            ),
        ];

        for (queue_name, handler) in consumers {
            let consumer = QueueConsumer::new(
                queue_name,
                self.queue.clone(),
                handler,
                consumer_config.clone(),
            );
            shutdown_handles.push(consumer.shutdown_handle());
            tasks.push(tokio::spawn(consumer.run()));
        }

        info!("Engine runtime started");
        Ok(RuntimeHandle {
            shutdown_handles,
            tasks,
        })
    }

    /// Dispatch one inbound notification to the engine that owns it.
    /// Unknown channels are ignored.
    pub async fn handle_inbound(&self, envelope: &EventEnvelope) -> Result<()> {
        match envelope.channel.as_str() {
            channel::CROWN_CHANGED => {
                let event: CrownChanged = serde_json::from_value(envelope.payload.clone())?;
                self.victory.handle_crown_changed(&event).await
            }
            channel::HQ_CAPTURED => {
                let event: HqCaptured = serde_json::from_value(envelope.payload.clone())?;
                self.victory.handle_hq_captured(&event).await
            }
            channel::CRAFTING_SCHEDULE => {
                let event: CraftingSchedule = serde_json::from_value(envelope.payload.clone())?;
                self.crafting
                    .schedule_node(event.node_id, event.delay_ms, event.completes_at)
                    .await
            }
            _ => Ok(()),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodePayload {
    node_id: Uuid,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionPayload {
    session_id: Uuid,
}

struct CraftingHandler {
    engine: Arc<CraftingEngine>,
}

#[async_trait]
impl JobHandler for CraftingHandler {
    async fn handle(&self, job: &JobRecord) -> Result<()> {
        match job.job_name.as_str() {
            JOB_CRAFTING_POLL => {
                self.engine.process_due_crafts(None).await?;
                Ok(())
            }
            JOB_PROCESS_NODE => {
                let payload: NodePayload = serde_json::from_value(job.payload.clone())?;
                self.engine.process_due_crafts(Some(payload.node_id)).await?;
                Ok(())
            }
            other => Err(unknown_job(QUEUE_CRAFTING, other)),
        }
    }
}

struct UpkeepHandler {
    engine: Arc<UpkeepEngine>,
}

#[async_trait]
impl JobHandler for UpkeepHandler {
    async fn handle(&self, job: &JobRecord) -> Result<()> {
        match job.job_name.as_str() {
            JOB_UPKEEP_CYCLE => self.engine.process_upkeep_cycle().await,
            JOB_DECAY_PASS => self.engine.process_failure_consequences().await,
            other => Err(unknown_job(QUEUE_UPKEEP, other)),
        }
    }
}

struct TransferHandler {
    engine: Arc<TransferEngine>,
}

#[async_trait]
impl JobHandler for TransferHandler {
    async fn handle(&self, job: &JobRecord) -> Result<()> {
        match job.job_name.as_str() {
            JOB_TRANSFER_POLL => {
                self.engine.process_due_transfers().await?;
                Ok(())
            }
            other => Err(unknown_job(QUEUE_TRANSFERS, other)),
        }
    }
}

struct VictoryHandler {
    engine: Arc<VictoryEngine>,
}

#[async_trait]
impl JobHandler for VictoryHandler {
    async fn handle(&self, job: &JobRecord) -> Result<()> {
        match job.job_name.as_str() {
            JOB_CROWN_CHECK => {
                let payload: SessionPayload = serde_json::from_value(job.payload.clone())?;
                self.engine.check_crown_victory(payload.session_id).await
            }
            other => Err(unknown_job(QUEUE_VICTORY, other)),
        }
    }
}

fn unknown_job(queue: &str, job_name: &str) -> EngineError {
    warn!(queue = queue, job = job_name, "Unknown job name");
    EngineError::InvalidRecord {
        entity: "jobs".to_string(),
        details: format!("unknown job '{}' on queue '{}'", job_name, queue),
    }
}
