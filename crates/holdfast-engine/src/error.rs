// Copyright (C) 2025 Holdfast Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the production & decay engine.
//!
//! Expected game outcomes (insufficient materials, unpaid upkeep,
//! ownership lost before a transfer resolves) are modeled as data on
//! the records themselves, never as errors. These types cover the rest:
//! missing entities, malformed persisted state, and store failures.

use std::fmt;

/// Result type using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Engine errors that can occur while processing a tick.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum EngineError {
    /// Node was not found in the store.
    NodeNotFound {
        /// The node ID that was not found.
        node_id: String,
    },

    /// Session was not found in the store.
    SessionNotFound {
        /// The session ID that was not found.
        session_id: String,
    },

    /// Player was not found in the store.
    PlayerNotFound {
        /// The player ID that was not found.
        player_id: String,
    },

    /// A persisted record failed validation at the store boundary.
    InvalidRecord {
        /// The entity the record belongs to.
        entity: String,
        /// What was wrong with it.
        details: String,
    },

    /// Database operation failed.
    DatabaseError {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },

    /// Job queue operation failed.
    QueueError {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl EngineError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NodeNotFound { .. } => "NODE_NOT_FOUND",
            Self::SessionNotFound { .. } => "SESSION_NOT_FOUND",
            Self::PlayerNotFound { .. } => "PLAYER_NOT_FOUND",
            Self::InvalidRecord { .. } => "INVALID_RECORD",
            Self::DatabaseError { .. } => "DATABASE_ERROR",
            Self::QueueError { .. } => "QUEUE_ERROR",
        }
    }

    /// Whether the job queue should retry the invocation that hit this error.
    ///
    /// Store and queue failures are transient infrastructure failures;
    /// everything else is a data problem retries cannot fix.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DatabaseError { .. } | Self::QueueError { .. }
        )
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NodeNotFound { node_id } => {
                write!(f, "Node '{}' not found", node_id)
            }
            Self::SessionNotFound { session_id } => {
                write!(f, "Session '{}' not found", session_id)
            }
            Self::PlayerNotFound { player_id } => {
                write!(f, "Player '{}' not found", player_id)
            }
            Self::InvalidRecord { entity, details } => {
                write!(f, "Invalid persisted record for '{}': {}", entity, details)
            }
            Self::DatabaseError { operation, details } => {
                write!(f, "Database error during '{}': {}", operation, details)
            }
            Self::QueueError { operation, details } => {
                write!(f, "Queue error during '{}': {}", operation, details)
            }
        }
    }
}

impl std::error::Error for EngineError {}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::DatabaseError {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::InvalidRecord {
            entity: "json".to_string(),
            details: err.to_string(),
        }
    }
}
