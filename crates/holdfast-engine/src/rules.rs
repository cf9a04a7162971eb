// Copyright (C) 2025 Holdfast Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Game policy tables and pure helper functions.
//!
//! Per-node-type behavior is a lookup table keyed by the closed
//! [`NodeType`] enum, consulted by the engines; there is no per-type
//! dispatch anywhere else. The upkeep threshold bands are a fixed
//! compatibility policy; the numeric cost/production values are
//! tunables.

use std::collections::{HashMap, HashSet, VecDeque};

use holdfast_protocol::ResourceMap;
use uuid::Uuid;

use crate::model::{NodeRecord, NodeType, Region, UpkeepStatus};

/// Hours of non-payment after which a node enters DECAY.
pub const DECAY_THRESHOLD_HOURS: f64 = 12.0;
/// Hours of non-payment after which a node enters COLLAPSE.
pub const COLLAPSE_THRESHOLD_HOURS: f64 = 36.0;
/// Hours of non-payment after which a node is ABANDONED.
pub const ABANDON_THRESHOLD_HOURS: f64 = 48.0;

/// BFS distance used for owned nodes that cannot reach their HQ.
const DISCONNECTED_HOPS: u32 = 10;

/// Hourly credit income for a node type.
pub fn hourly_credit_income(node_type: NodeType) -> i64 {
    match node_type {
        NodeType::Headquarters => 25,
        NodeType::Mine => 10,
        NodeType::Lumberyard => 8,
        NodeType::Farm => 6,
        NodeType::Quarry => 8,
        NodeType::Foundry => 12,
        NodeType::Outpost => 0,
        NodeType::Fortress => 0,
    }
}

/// Hourly non-credit resource production for a node type, credited to
/// the node's own storage unconditionally (even on an unpaid cycle).
pub fn hourly_resource_production(node_type: NodeType) -> ResourceMap {
    let mut out = ResourceMap::new();
    match node_type {
        NodeType::Mine => {
            out.insert("iron_ore".to_string(), 5);
        }
        NodeType::Lumberyard => {
            out.insert("timber".to_string(), 5);
        }
        NodeType::Farm => {
            out.insert("grain".to_string(), 6);
        }
        NodeType::Quarry => {
            out.insert("stone".to_string(), 4);
        }
        NodeType::Headquarters
        | NodeType::Foundry
        | NodeType::Outpost
        | NodeType::Fortress => {}
    }
    out
}

/// Base hourly upkeep cost for a node type, before modifiers.
pub fn upkeep_base_cost(node_type: NodeType) -> i64 {
    match node_type {
        NodeType::Headquarters => 0,
        NodeType::Mine => 20,
        NodeType::Lumberyard => 15,
        NodeType::Farm => 10,
        NodeType::Quarry => 15,
        NodeType::Foundry => 30,
        NodeType::Outpost => 5,
        NodeType::Fortress => 50,
    }
}

/// Upkeep multiplier for a node's upgrade tier (1-based).
pub fn tier_multiplier(tier: i32) -> f64 {
    1.0 + 0.5 * (tier.max(1) - 1) as f64
}

/// Upkeep multiplier for a node's map region.
pub fn region_modifier(region: Region) -> f64 {
    match region {
        Region::Core => 1.0,
        Region::Frontier => 1.25,
        Region::Wilds => 1.5,
    }
}

/// Upkeep multiplier for graph distance from the owner's HQ.
pub fn distance_factor(hops: u32) -> f64 {
    1.0 + 0.1 * hops.min(DISCONNECTED_HOPS) as f64
}

/// Full hourly upkeep cost for one node. HQ nodes cost nothing.
pub fn node_upkeep_cost(node: &NodeRecord, hops_from_hq: u32) -> i64 {
    if node.is_hq() {
        return 0;
    }
    let cost = upkeep_base_cost(node.node_type) as f64
        * tier_multiplier(node.tier)
        * region_modifier(node.region)
        * distance_factor(hops_from_hq);
    cost.round() as i64
}

/// Upkeep status as a pure function of hours since last payment.
///
/// Fixed policy bands: 0-12h WARNING, 12-36h DECAY, 36-48h COLLAPSE,
/// 48h+ ABANDONED. Exactly zero hours means the payment just happened.
pub fn upkeep_status_for_hours(hours: f64) -> UpkeepStatus {
    if hours <= 0.0 {
        UpkeepStatus::Paid
    } else if hours < DECAY_THRESHOLD_HOURS {
        UpkeepStatus::Warning
    } else if hours < COLLAPSE_THRESHOLD_HOURS {
        UpkeepStatus::Decay
    } else if hours < ABANDON_THRESHOLD_HOURS {
        UpkeepStatus::Collapse
    } else {
        UpkeepStatus::Abandoned
    }
}

/// Building-health damage percent applied by one decay-consequences
/// pass, as a monotonic step function of hours unpaid. Zero while the
/// node is only in WARNING.
pub fn decay_damage_percent(hours: f64) -> f64 {
    if hours < DECAY_THRESHOLD_HOURS {
        0.0
    } else if hours < 24.0 {
        2.0
    } else if hours < COLLAPSE_THRESHOLD_HOURS {
        4.0
    } else if hours < ABANDON_THRESHOLD_HOURS {
        8.0
    } else {
        10.0
    }
}

/// BFS distances (in hops) from the HQ over the owned-node adjacency
/// graph. Only edges between nodes in `owned` are traversed; owned
/// nodes that cannot reach the HQ get [`DISCONNECTED_HOPS`].
pub fn hq_distances(owned: &[NodeRecord], hq_id: Uuid) -> HashMap<Uuid, u32> {
    let owned_ids: HashSet<Uuid> = owned.iter().map(|n| n.id).collect();
    let links: HashMap<Uuid, &Vec<Uuid>> = owned.iter().map(|n| (n.id, &n.links)).collect();

    let mut distances: HashMap<Uuid, u32> = HashMap::new();
    if owned_ids.contains(&hq_id) {
        let mut queue = VecDeque::new();
        distances.insert(hq_id, 0);
        queue.push_back(hq_id);

        while let Some(current) = queue.pop_front() {
            let hops = distances[&current];
            if let Some(neighbors) = links.get(&current) {
                for neighbor in neighbors.iter() {
                    if owned_ids.contains(neighbor) && !distances.contains_key(neighbor) {
                        distances.insert(*neighbor, hops + 1);
                        queue.push_back(*neighbor);
                    }
                }
            }
        }
    }

    for node in owned {
        distances.entry(node.id).or_insert(DISCONNECTED_HOPS);
    }
    distances
}
