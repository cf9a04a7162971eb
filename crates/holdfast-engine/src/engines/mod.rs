// Copyright (C) 2025 Holdfast Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The tick engines.
//!
//! Each engine is a stateless handle over a store, a queue, a
//! pending-work index and an event publisher; all state lives in the
//! store. Engines never run concurrently with themselves (one consumer
//! per queue) but run freely concurrently with each other, so no two
//! engines mutate overlapping entity fields.

pub mod crafting;
pub mod transfer;
pub mod upkeep;
pub mod victory;

pub use crafting::CraftingEngine;
pub use transfer::TransferEngine;
pub use upkeep::UpkeepEngine;
pub use victory::VictoryEngine;
