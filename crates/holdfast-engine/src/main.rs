// Copyright (C) 2025 Holdfast Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Holdfast Engine - Production & Decay Engine
//!
//! The engine process is responsible for:
//! - Crafting queues (per-run consumption/production, self-pacing)
//! - Node upkeep, decay and abandonment
//! - Scheduled resource transfers
//! - Win-condition timers and checks
//!
//! Note: HTTP routing, authentication, the combat simulator and the
//! presentation layer are separate processes; they talk to this one
//! only through the entity store and the event bus.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use holdfast_engine::config::Config;
use holdfast_engine::events::BroadcastPublisher;
use holdfast_engine::pending::SqlitePendingIndex;
use holdfast_engine::queue::SqliteJobQueue;
use holdfast_engine::scheduler::EngineRuntime;
use holdfast_engine::store::SqliteStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("holdfast_engine=info".parse().unwrap()),
        )
        .init();

    info!("Starting Holdfast Engine");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        crafting_poll_ms = config.crafting_poll.as_millis() as u64,
        transfer_poll_ms = config.transfer_poll.as_millis() as u64,
        upkeep_interval_ms = config.upkeep_interval.as_millis() as u64,
        crown_hold_hours = config.crown_hold.as_secs() / 3600,
        "Configuration loaded"
    );

    // Connect to database and run migrations
    info!("Connecting to database...");
    let store = SqliteStore::connect(&config.database_url).await?;
    let pool = store.pool().clone();
    info!("Database connection established, migrations applied");

    // Assemble the runtime over shared handles
    let store = Arc::new(store);
    let pending = Arc::new(SqlitePendingIndex::new(pool.clone()));
    let queue = Arc::new(SqliteJobQueue::new(pool.clone(), config.job_max_attempts));
    let publisher = Arc::new(BroadcastPublisher::default());
    let mut inbound = publisher.subscribe();

    let runtime = Arc::new(EngineRuntime::new(
        config,
        store,
        pending,
        queue,
        publisher,
    ));
    let handle = runtime.start().await?;

    // Dispatch inbound notifications from the event bus to the engines
    let inbound_runtime = runtime.clone();
    let inbound_task = tokio::spawn(async move {
        loop {
            match inbound.recv().await {
                Ok(envelope) => {
                    if let Err(e) = inbound_runtime.handle_inbound(&envelope).await {
                        error!(channel = %envelope.channel, error = %e, "Inbound event failed");
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "Inbound event stream lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    info!("Holdfast Engine initialized successfully");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    inbound_task.abort();
    handle.shutdown().await;

    pool.close().await;
    info!("Shutdown complete");

    Ok(())
}
