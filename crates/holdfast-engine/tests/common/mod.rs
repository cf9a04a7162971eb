// Copyright (C) 2025 Holdfast Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for holdfast-engine integration tests.
//!
//! Provides a TestContext over an in-memory SQLite store, assembled
//! engines, and fixture builders for sessions, players, nodes and
//! blueprints.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use uuid::Uuid;

use holdfast_engine::engines::{CraftingEngine, TransferEngine, UpkeepEngine, VictoryEngine};
use holdfast_engine::events::BroadcastPublisher;
use holdfast_engine::model::{
    BlueprintRecord, CraftingQueueItem, GameType, NodeRecord, NodeStatus, NodeType, PlayerRecord,
    Region, SessionRecord, SessionStatus, TransferRecord, TransferStatus, UpkeepStatus,
};
use holdfast_engine::pending::SqlitePendingIndex;
use holdfast_engine::queue::SqliteJobQueue;
use holdfast_engine::store::{SqliteStore, Store};
use holdfast_protocol::{EventEnvelope, ResourceMap};

/// Test context over an in-memory store and assembled engines.
pub struct TestContext {
    pub store: Arc<SqliteStore>,
    pub pending: Arc<SqlitePendingIndex>,
    pub queue: Arc<SqliteJobQueue>,
    pub publisher: Arc<BroadcastPublisher>,
    pub crafting: CraftingEngine,
    pub upkeep: UpkeepEngine,
    pub transfer: TransferEngine,
    pub victory: VictoryEngine,
}

impl TestContext {
    /// Create a context with the default 48-hour crown hold.
    pub async fn new() -> Self {
        Self::with_crown_hold(Duration::from_secs(48 * 3600)).await
    }

    /// Create a context with a custom crown hold duration.
    pub async fn with_crown_hold(crown_hold: Duration) -> Self {
        let store = Arc::new(SqliteStore::in_memory().await.expect("in-memory store"));
        let pool = store.pool().clone();
        let pending = Arc::new(SqlitePendingIndex::new(pool.clone()));
        let queue = Arc::new(SqliteJobQueue::new(pool, 3));
        let publisher = Arc::new(BroadcastPublisher::new(256));

        let crafting = CraftingEngine::new(
            store.clone(),
            pending.clone(),
            queue.clone(),
            publisher.clone(),
        );
        let upkeep = UpkeepEngine::new(store.clone(), publisher.clone());
        let transfer = TransferEngine::new(store.clone(), publisher.clone());
        let victory = VictoryEngine::new(
            store.clone(),
            queue.clone(),
            publisher.clone(),
            crown_hold,
        );

        Self {
            store,
            pending,
            queue,
            publisher,
            crafting,
            upkeep,
            transfer,
            victory,
        }
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.publisher.subscribe()
    }

    /// Insert a fresh active session.
    pub async fn create_session(&self, game_type: GameType) -> SessionRecord {
        let session = session_fixture(game_type);
        self.store.insert_session(&session).await.unwrap();
        session
    }

    /// Insert a player with the given credits.
    pub async fn create_player(&self, session_id: Uuid, credits: i64) -> PlayerRecord {
        let player = PlayerRecord {
            id: Uuid::new_v4(),
            session_id,
            name: format!("player-{}", &Uuid::new_v4().to_string()[..8]),
            credits,
            hq_node_id: None,
            eliminated: false,
            created_at: Utc::now(),
        };
        self.store.insert_player(&player).await.unwrap();
        player
    }

    /// Insert a node owned by `owner`.
    pub async fn create_owned_node(
        &self,
        session_id: Uuid,
        owner: Uuid,
        node_type: NodeType,
    ) -> NodeRecord {
        let mut node = node_fixture(session_id);
        node.owner_id = Some(owner);
        node.status = NodeStatus::Owned;
        node.node_type = node_type;
        node.upkeep_paid = Some(Utc::now());
        node.upkeep_status = Some(UpkeepStatus::Paid);
        self.store.insert_node(&node).await.unwrap();
        node
    }

    /// Insert a blueprint.
    pub async fn create_blueprint(
        &self,
        inputs: ResourceMap,
        outputs: ResourceMap,
        time_per_run_ms: i64,
    ) -> BlueprintRecord {
        let blueprint = BlueprintRecord {
            id: Uuid::new_v4(),
            name: "test blueprint".to_string(),
            inputs,
            outputs,
            time_per_run_ms,
        };
        self.store.insert_blueprint(&blueprint).await.unwrap();
        blueprint
    }

    /// Insert a pending transfer that is already due.
    pub async fn create_due_transfer(
        &self,
        session_id: Uuid,
        player_id: Uuid,
        source: Uuid,
        dest: Uuid,
        resources: ResourceMap,
    ) -> TransferRecord {
        let transfer = TransferRecord {
            id: Uuid::new_v4(),
            session_id,
            player_id,
            source_node_id: source,
            dest_node_id: dest,
            resources,
            status: TransferStatus::Pending,
            created_at: Utc::now() - chrono::Duration::minutes(5),
            completes_at: Utc::now() - chrono::Duration::seconds(1),
        };
        self.store.insert_transfer(&transfer).await.unwrap();
        transfer
    }
}

/// A fresh active session record, not yet persisted.
pub fn session_fixture(game_type: GameType) -> SessionRecord {
    SessionRecord {
        id: Uuid::new_v4(),
        name: "test session".to_string(),
        status: SessionStatus::Active,
        game_type,
        crown_node_id: None,
        crown_holder_id: None,
        crown_held_since: None,
        winner_id: None,
        created_at: Utc::now(),
    }
}

/// A fresh neutral outpost record, not yet persisted.
pub fn node_fixture(session_id: Uuid) -> NodeRecord {
    NodeRecord {
        id: Uuid::new_v4(),
        session_id,
        owner_id: None,
        node_type: NodeType::Outpost,
        tier: 1,
        region: Region::Core,
        status: NodeStatus::Neutral,
        health: 100.0,
        storage: ResourceMap::new(),
        crafting_queue: vec![],
        links: vec![],
        upkeep_paid: None,
        upkeep_due: None,
        upkeep_status: None,
        created_at: Utc::now(),
    }
}

/// A queue item for `blueprint` whose current run is already due,
/// regardless of how long a run takes.
pub fn due_queue_item(blueprint: &BlueprintRecord, quantity: u32) -> CraftingQueueItem {
    let completes = Utc::now() - chrono::Duration::seconds(1);
    CraftingQueueItem {
        id: Uuid::new_v4(),
        blueprint_id: blueprint.id,
        output_item_id: blueprint.outputs.keys().next().cloned(),
        quantity,
        completed_runs: 0,
        time_per_run_ms: blueprint.time_per_run_ms,
        started_at: completes - chrono::Duration::milliseconds(blueprint.time_per_run_ms),
        completes_at: completes,
    }
}

/// Wait for the next event on a specific channel, skipping others.
/// Returns `None` on timeout.
pub async fn recv_on(
    rx: &mut broadcast::Receiver<EventEnvelope>,
    channel: &str,
) -> Option<EventEnvelope> {
    loop {
        match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
            Ok(Ok(envelope)) if envelope.channel == channel => return Some(envelope),
            Ok(Ok(_)) => continue,
            _ => return None,
        }
    }
}

/// Count the already-buffered events on a specific channel.
pub fn drain_count(rx: &mut broadcast::Receiver<EventEnvelope>, channel: &str) -> usize {
    let mut count = 0;
    while let Ok(envelope) = rx.try_recv() {
        if envelope.channel == channel {
            count += 1;
        }
    }
    count
}

/// A timestamp `hours` hours in the past.
pub fn hours_ago(hours: i64) -> DateTime<Utc> {
    Utc::now() - chrono::Duration::hours(hours)
}
