// Copyright (C) 2025 Holdfast Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for the upkeep/decay engine: settlement,
//! shortfall handling, decay damage and abandonment.

mod common;

use chrono::Utc;
use holdfast_engine::model::{GameType, NodeStatus, NodeType, Region, UpkeepStatus};
use holdfast_engine::store::Store;
use holdfast_protocol::channel;

use common::{hours_ago, node_fixture, recv_on, TestContext};

#[tokio::test]
async fn test_paid_cycle_resets_nodes_and_settles_credits() {
    let ctx = TestContext::new().await;
    let session = ctx.create_session(GameType::CrownHold).await;
    let player = ctx.create_player(session.id, 100).await;

    // HQ and mine, adjacent, so BFS prices the mine at one hop.
    let mut hq = node_fixture(session.id);
    hq.owner_id = Some(player.id);
    hq.status = NodeStatus::Owned;
    hq.node_type = NodeType::Headquarters;
    hq.upkeep_paid = Some(hours_ago(1));
    hq.upkeep_status = Some(UpkeepStatus::Paid);

    let mut mine = node_fixture(session.id);
    mine.owner_id = Some(player.id);
    mine.status = NodeStatus::Owned;
    mine.node_type = NodeType::Mine;
    mine.links = vec![hq.id];
    mine.upkeep_paid = Some(hours_ago(1));
    mine.upkeep_status = Some(UpkeepStatus::Paid);

    hq.links = vec![mine.id];
    ctx.store.insert_node(&hq).await.unwrap();
    ctx.store.insert_node(&mine).await.unwrap();

    let mut rx = ctx.subscribe();

    ctx.upkeep.process_upkeep_cycle().await.unwrap();

    // Income: HQ 25 + mine 10. Upkeep: mine at 1 hop = 20 * 1.1 = 22.
    let economy = recv_on(&mut rx, channel::ECONOMY_PROCESSED)
        .await
        .expect("economy event");
    assert_eq!(economy.payload["playerId"], player.id.to_string());
    assert_eq!(economy.payload["totalIncome"], 35);
    assert_eq!(economy.payload["creditsBefore"], 100);
    assert_eq!(economy.payload["upkeepPaid"], true);
    assert_eq!(economy.payload["nodesProcessed"], 2);

    let player_after = ctx.store.get_player(player.id).await.unwrap().unwrap();
    assert_eq!(
        player_after.credits,
        100 + 35 - economy.payload["totalUpkeep"].as_i64().unwrap()
    );

    // Every owned node resets to PAID with a fresh due timestamp.
    for node_id in [hq.id, mine.id] {
        let node = ctx.store.get_node(node_id).await.unwrap().unwrap();
        assert_eq!(node.upkeep_status, Some(UpkeepStatus::Paid));
        assert!(node.upkeep_paid.unwrap() > hours_ago(1));
        assert!(node.upkeep_due.unwrap() > Utc::now());
    }

    // The mine produced ore into its own storage.
    let mine_after = ctx.store.get_node(mine.id).await.unwrap().unwrap();
    assert_eq!(mine_after.storage.get("iron_ore"), Some(&5));
    assert!(recv_on(&mut rx, channel::RESOURCES_UPDATE).await.is_some());
    assert!(recv_on(&mut rx, channel::UPKEEP_TICK).await.is_some());
}

#[tokio::test]
async fn test_shortfall_clamps_credits_and_leaves_nodes_unpaid() {
    let ctx = TestContext::new().await;
    let session = ctx.create_session(GameType::CrownHold).await;
    let player = ctx.create_player(session.id, 0).await;

    let hq = ctx
        .create_owned_node(session.id, player.id, NodeType::Headquarters)
        .await;
    let mut fortress = node_fixture(session.id);
    fortress.owner_id = Some(player.id);
    fortress.status = NodeStatus::Owned;
    fortress.node_type = NodeType::Fortress;
    fortress.tier = 3;
    fortress.region = Region::Wilds;
    fortress.upkeep_paid = Some(hours_ago(20));
    fortress.upkeep_status = Some(UpkeepStatus::Warning);
    ctx.store.insert_node(&fortress).await.unwrap();

    let mut rx = ctx.subscribe();
    ctx.upkeep.process_upkeep_cycle().await.unwrap();

    let economy = recv_on(&mut rx, channel::ECONOMY_PROCESSED)
        .await
        .expect("economy event");
    assert_eq!(economy.payload["upkeepPaid"], false);
    // Balance clamps at zero, never negative.
    assert_eq!(economy.payload["creditsAfter"], 0);
    let player_after = ctx.store.get_player(player.id).await.unwrap().unwrap();
    assert_eq!(player_after.credits, 0);

    // HQ is never penalized.
    let hq_after = ctx.store.get_node(hq.id).await.unwrap().unwrap();
    assert_eq!(hq_after.upkeep_status, Some(UpkeepStatus::Paid));

    // The fortress keeps its payment timestamp and its status is
    // recomputed from elapsed hours (20h -> DECAY).
    let fortress_after = ctx.store.get_node(fortress.id).await.unwrap().unwrap();
    assert_eq!(fortress_after.upkeep_status, Some(UpkeepStatus::Decay));
    assert!(fortress_after.upkeep_paid.unwrap() < hours_ago(19));
}

#[tokio::test]
async fn test_unpaid_settlement_keeps_payment_clock_running() {
    let ctx = TestContext::new().await;
    let session = ctx.create_session(GameType::CrownHold).await;
    let player = ctx.create_player(session.id, 0).await;
    ctx.create_owned_node(session.id, player.id, NodeType::Headquarters)
        .await;

    let mut fortress = node_fixture(session.id);
    fortress.owner_id = Some(player.id);
    fortress.status = NodeStatus::Owned;
    fortress.node_type = NodeType::Fortress;
    fortress.tier = 3;
    fortress.region = Region::Wilds;
    fortress.upkeep_paid = Some(hours_ago(20));
    fortress.upkeep_status = Some(UpkeepStatus::Warning);
    ctx.store.insert_node(&fortress).await.unwrap();

    ctx.upkeep.process_upkeep_cycle().await.unwrap();

    // The unpaid settlement must not touch the payment timestamp;
    // status stays a function of time since the last real payment.
    let after_cycle = ctx.store.get_node(fortress.id).await.unwrap().unwrap();
    assert_eq!(after_cycle.upkeep_status, Some(UpkeepStatus::Decay));
    assert!(after_cycle.upkeep_paid.unwrap() < hours_ago(19));
    assert!(after_cycle.health < 100.0);

    // A later decay pass keeps damaging the node; it cannot launder
    // itself back to paid.
    ctx.upkeep.process_failure_consequences().await.unwrap();
    let after_pass = ctx.store.get_node(fortress.id).await.unwrap().unwrap();
    assert_eq!(after_pass.upkeep_status, Some(UpkeepStatus::Decay));
    assert!(after_pass.health < after_cycle.health);
    assert!(after_pass.upkeep_paid.unwrap() < hours_ago(19));
}

#[tokio::test]
async fn test_decay_pass_applies_building_damage() {
    let ctx = TestContext::new().await;
    let session = ctx.create_session(GameType::CrownHold).await;
    let player = ctx.create_player(session.id, 0).await;

    let mut mine = node_fixture(session.id);
    mine.owner_id = Some(player.id);
    mine.status = NodeStatus::Owned;
    mine.node_type = NodeType::Mine;
    mine.upkeep_paid = Some(hours_ago(20));
    mine.upkeep_status = Some(UpkeepStatus::Warning);
    ctx.store.insert_node(&mine).await.unwrap();

    ctx.upkeep.process_failure_consequences().await.unwrap();

    let mine_after = ctx.store.get_node(mine.id).await.unwrap().unwrap();
    assert_eq!(mine_after.upkeep_status, Some(UpkeepStatus::Decay));
    // 20 hours unpaid sits in the 2%-damage band.
    assert!((mine_after.health - 98.0).abs() < 0.001);
    assert_eq!(mine_after.owner_id, Some(player.id));
}

#[tokio::test]
async fn test_abandonment_reverts_node_to_neutral_idempotently() {
    let ctx = TestContext::new().await;
    let session = ctx.create_session(GameType::CrownHold).await;
    let player = ctx.create_player(session.id, 0).await;

    let mut outpost = node_fixture(session.id);
    outpost.owner_id = Some(player.id);
    outpost.status = NodeStatus::Owned;
    outpost.upkeep_paid = Some(hours_ago(50));
    outpost.upkeep_status = Some(UpkeepStatus::Collapse);
    ctx.store.insert_node(&outpost).await.unwrap();

    let mut rx = ctx.subscribe();
    ctx.upkeep.process_failure_consequences().await.unwrap();

    let node = ctx.store.get_node(outpost.id).await.unwrap().unwrap();
    assert_eq!(node.owner_id, None);
    assert_eq!(node.status, NodeStatus::Neutral);
    assert_eq!(node.upkeep_paid, None);
    assert_eq!(node.upkeep_due, None);
    assert_eq!(node.upkeep_status, None);

    let event = recv_on(&mut rx, channel::NODE_ABANDONED)
        .await
        .expect("abandonment event");
    assert_eq!(event.payload["nodeId"], outpost.id.to_string());
    assert_eq!(event.payload["reason"], "upkeep");

    // A second pass finds no unpaid owned node; no duplicate event.
    ctx.upkeep.process_failure_consequences().await.unwrap();
    assert_eq!(common::drain_count(&mut rx, channel::NODE_ABANDONED), 0);
}

#[tokio::test]
async fn test_completed_sessions_are_not_settled() {
    let ctx = TestContext::new().await;
    let session = ctx.create_session(GameType::CrownHold).await;
    let player = ctx.create_player(session.id, 10).await;
    ctx.create_owned_node(session.id, player.id, NodeType::Mine)
        .await;

    // End the session before the cycle runs.
    ctx.store
        .complete_session_if_active(session.id, player.id)
        .await
        .unwrap();

    let mut rx = ctx.subscribe();
    ctx.upkeep.process_upkeep_cycle().await.unwrap();

    assert_eq!(common::drain_count(&mut rx, channel::ECONOMY_PROCESSED), 0);
    let player_after = ctx.store.get_player(player.id).await.unwrap().unwrap();
    assert_eq!(player_after.credits, 10);
}
