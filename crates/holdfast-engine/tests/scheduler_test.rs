// Copyright (C) 2025 Holdfast Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for the runtime wiring: periodic job arming and
//! graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use holdfast_engine::config::Config;
use holdfast_engine::events::BroadcastPublisher;
use holdfast_engine::pending::SqlitePendingIndex;
use holdfast_engine::queue::{
    JobQueue, SqliteJobQueue, QUEUE_CRAFTING, QUEUE_TRANSFERS, QUEUE_UPKEEP,
};
use holdfast_engine::scheduler::EngineRuntime;
use holdfast_engine::store::SqliteStore;

fn test_config() -> Config {
    Config {
        database_url: "sqlite::memory:".to_string(),
        crafting_poll: Duration::from_secs(5),
        transfer_poll: Duration::from_secs(10),
        upkeep_interval: Duration::from_secs(3600),
        decay_poll: Duration::from_secs(300),
        crown_hold: Duration::from_secs(48 * 3600),
        // Keep the consumers asleep for the duration of the test.
        queue_poll: Duration::from_secs(3600),
        job_max_attempts: 3,
    }
}

#[tokio::test]
async fn test_start_arms_periodic_jobs_including_decay_pass() {
    let store = Arc::new(SqliteStore::in_memory().await.expect("in-memory store"));
    let pool = store.pool().clone();
    let queue = Arc::new(SqliteJobQueue::new(pool.clone(), 3));
    let pending = Arc::new(SqlitePendingIndex::new(pool));
    let publisher = Arc::new(BroadcastPublisher::new(64));

    let runtime = EngineRuntime::new(test_config(), store, pending, queue.clone(), publisher);
    let handle = runtime.start().await.unwrap();

    // The decay pass repeats on its own shorter schedule than the
    // hourly cycle, so decay is applied between upkeep cycles too.
    let soon = Utc::now() + chrono::Duration::seconds(301);
    let jobs = queue.claim_due(QUEUE_UPKEEP, soon, 10).await.unwrap();
    assert!(jobs.iter().any(|j| j.job_name == "decay_pass"));

    let later = Utc::now() + chrono::Duration::seconds(3601);
    let jobs = queue.claim_due(QUEUE_UPKEEP, later, 10).await.unwrap();
    assert!(jobs.iter().any(|j| j.job_name == "upkeep_cycle"));

    // Crafting and transfer safety-net polls are armed as well.
    let crafting = queue
        .claim_due(QUEUE_CRAFTING, Utc::now() + chrono::Duration::seconds(6), 10)
        .await
        .unwrap();
    assert!(crafting.iter().any(|j| j.job_name == "poll_crafting"));
    let transfers = queue
        .claim_due(QUEUE_TRANSFERS, Utc::now() + chrono::Duration::seconds(11), 10)
        .await
        .unwrap();
    assert!(transfers.iter().any(|j| j.job_name == "poll_transfers"));

    handle.shutdown().await;
}
