// Copyright (C) 2025 Holdfast Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Holdfast Engine - Production & Decay Engine
//!
//! This crate advances persistent per-entity game state over time,
//! independently of any user request: crafting queues, node
//! upkeep/decay/abandonment, scheduled resource transfers, and
//! win-condition detection. All state lives in SQLite for crash
//! resilience; every tick is a read-compute-commit sequence that can
//! be safely re-executed.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  API / Presentation Layer                    │
//! │        (HTTP routes, combat simulator, game clients)         │
//! └─────────────────────────────────────────────────────────────┘
//!         │  crown:changed / hq:captured /          ▲
//!         │  crafting:schedule                      │ crafting:completed,
//!         ▼                                         │ upkeep:tick, ...
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     holdfast-engine                          │
//! │                                                              │
//! │  ┌───────────┐ ┌───────────┐ ┌───────────┐ ┌───────────┐    │
//! │  │ Crafting  │ │  Upkeep   │ │ Transfer  │ │  Victory  │    │
//! │  │  Engine   │ │  /Decay   │ │  Engine   │ │  Engine   │    │
//! │  └─────┬─────┘ └─────┬─────┘ └─────┬─────┘ └─────┬─────┘    │
//! │        └─────────────┴──────┬──────┴─────────────┘          │
//! │                             ▼                               │
//! │   Durable Job Queue  ·  Pending-Work Index  ·  Store        │
//! └─────────────────────────────┬───────────────────────────────┘
//!                               ▼
//!                     ┌──────────────────┐
//!                     │      SQLite      │
//!                     │ (Durable Storage)│
//!                     └──────────────────┘
//! ```
//!
//! # Scheduling Model
//!
//! One named queue per engine (`crafting`, `upkeep`, `transfers`,
//! `victory`), each drained by a single consumer, so no engine ever
//! runs concurrently with itself. Periodic polls are epoch-aligned:
//! `next = now + (interval - now mod interval)` over wall-clock
//! milliseconds, so independently started processes agree on tick
//! boundaries without coordination. Sub-poll responsiveness comes from
//! delayed jobs an engine enqueues for itself (a crafting run
//! finishing schedules the node's next run exactly when it is due).
//!
//! # Upkeep State Machine
//!
//! ```text
//!            payment resets to PAID from any non-terminal state
//!   ┌─────┐      ┌─────────┐      ┌───────┐      ┌──────────┐      ┌───────────┐
//!   │PAID │─────▶│ WARNING │─────▶│ DECAY │─────▶│ COLLAPSE │─────▶│ ABANDONED │
//!   └─────┘ 0h+  └─────────┘ 12h  └───────┘ 36h  └──────────┘ 48h  └───────────┘
//!                                  building damage accrues          node reverts
//!                                                                   to neutral
//! ```
//!
//! Status is a pure function of hours since the last payment. HQ nodes
//! never enter the machine.
//!
//! # Configuration
//!
//! Loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `HOLDFAST_DATABASE_URL` | Yes | - | SQLite connection string |
//! | `HOLDFAST_CRAFTING_POLL_MS` | No | `5000` | Crafting safety-net poll |
//! | `HOLDFAST_TRANSFER_POLL_MS` | No | `10000` | Transfer resolution poll |
//! | `HOLDFAST_UPKEEP_INTERVAL_MS` | No | `3600000` | Upkeep cycle period |
//! | `HOLDFAST_DECAY_POLL_MS` | No | `300000` | Decay-consequences pass period |
//! | `HOLDFAST_CROWN_HOLD_HOURS` | No | `48` | Crown-hold victory duration |
//! | `HOLDFAST_QUEUE_POLL_MS` | No | `1000` | Queue consumer poll |
//! | `HOLDFAST_JOB_MAX_ATTEMPTS` | No | `3` | Job retry limit |
//!
//! # Modules
//!
//! - [`config`]: Engine configuration from environment variables
//! - [`engines`]: The four tick engines (crafting, upkeep, transfer, victory)
//! - [`error`]: Error types with retryability classification
//! - [`events`]: Event publisher fan-out to external listeners
//! - [`migrations`]: Embedded SQLite migrations
//! - [`model`]: Validated domain records and enums
//! - [`pending`]: Pending-work index (per-entity due timestamps)
//! - [`queue`]: Durable job queue and queue consumers
//! - [`rules`]: Policy tables (upkeep costs, production, decay bands)
//! - [`scheduler`]: Runtime wiring of engines, queues, and inbound events
//! - [`store`]: Entity store interface and the SQLite backend

#![deny(missing_docs)]

/// Engine configuration loaded from environment variables.
pub mod config;

/// The four tick engines.
pub mod engines;

/// Error types for engine operations.
pub mod error;

/// Event publisher fan-out.
pub mod events;

/// Embedded SQLite migrations.
pub mod migrations;

/// Domain records and enums.
pub mod model;

/// Pending-work index.
pub mod pending;

/// Durable job queue.
pub mod queue;

/// Game policy tables and pure helpers.
pub mod rules;

/// Engine runtime wiring.
pub mod scheduler;

/// Entity store interface and backends.
pub mod store;
