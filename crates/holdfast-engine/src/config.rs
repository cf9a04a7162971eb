// Copyright (C) 2025 Holdfast Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::time::Duration;

/// Holdfast engine configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite connection URL or database file path
    pub database_url: String,
    /// Crafting engine poll interval
    pub crafting_poll: Duration,
    /// Transfer engine poll interval
    pub transfer_poll: Duration,
    /// Upkeep cycle interval
    pub upkeep_interval: Duration,
    /// Decay-consequences pass interval (runs between upkeep cycles)
    pub decay_poll: Duration,
    /// How long the crown must be held continuously to win
    pub crown_hold: Duration,
    /// Queue consumer poll interval
    pub queue_poll: Duration,
    /// Maximum job handler attempts before a job is dropped
    pub job_max_attempts: i32,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `HOLDFAST_DATABASE_URL`: SQLite connection string (e.g. `sqlite:.data/holdfast.db?mode=rwc`)
    ///
    /// Optional (with defaults):
    /// - `HOLDFAST_CRAFTING_POLL_MS`: crafting poll interval (default: 5000)
    /// - `HOLDFAST_TRANSFER_POLL_MS`: transfer poll interval (default: 10000)
    /// - `HOLDFAST_UPKEEP_INTERVAL_MS`: upkeep cycle interval (default: 3600000)
    /// - `HOLDFAST_DECAY_POLL_MS`: decay-consequences pass interval (default: 300000)
    /// - `HOLDFAST_CROWN_HOLD_HOURS`: crown hold duration for victory (default: 48)
    /// - `HOLDFAST_QUEUE_POLL_MS`: queue consumer poll interval (default: 1000)
    /// - `HOLDFAST_JOB_MAX_ATTEMPTS`: job retry limit (default: 3)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("HOLDFAST_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("HOLDFAST_DATABASE_URL"))?;

        let crafting_poll = millis_var("HOLDFAST_CRAFTING_POLL_MS", 5_000)?;
        let transfer_poll = millis_var("HOLDFAST_TRANSFER_POLL_MS", 10_000)?;
        let upkeep_interval = millis_var("HOLDFAST_UPKEEP_INTERVAL_MS", 3_600_000)?;
        let decay_poll = millis_var("HOLDFAST_DECAY_POLL_MS", 300_000)?;
        let queue_poll = millis_var("HOLDFAST_QUEUE_POLL_MS", 1_000)?;

        let crown_hold_hours: u64 = std::env::var("HOLDFAST_CROWN_HOLD_HOURS")
            .unwrap_or_else(|_| "48".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("HOLDFAST_CROWN_HOLD_HOURS", "must be a positive integer")
            })?;

        let job_max_attempts: i32 = std::env::var("HOLDFAST_JOB_MAX_ATTEMPTS")
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("HOLDFAST_JOB_MAX_ATTEMPTS", "must be a positive integer")
            })?;
        if job_max_attempts < 1 {
            return Err(ConfigError::Invalid(
                "HOLDFAST_JOB_MAX_ATTEMPTS",
                "must be at least 1",
            ));
        }

        Ok(Self {
            database_url,
            crafting_poll,
            transfer_poll,
            upkeep_interval,
            decay_poll,
            crown_hold: Duration::from_secs(crown_hold_hours * 3600),
            queue_poll,
            job_max_attempts,
        })
    }
}

fn millis_var(name: &'static str, default_ms: u64) -> Result<Duration, ConfigError> {
    let ms: u64 = std::env::var(name)
        .unwrap_or_else(|_| default_ms.to_string())
        .parse()
        .map_err(|_| ConfigError::Invalid(name, "must be a duration in milliseconds"))?;
    if ms == 0 {
        return Err(ConfigError::Invalid(name, "must be greater than zero"));
    }
    Ok(Duration::from_millis(ms))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
