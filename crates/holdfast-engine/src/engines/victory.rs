// Copyright (C) 2025 Holdfast Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Victory engine: long-horizon win-condition timers and instantaneous
//! win checks.
//!
//! Crown-hold mode arms one uniquely-keyed delayed check per session;
//! re-claiming the crown re-arms the key, which implicitly cancels the
//! stale timer. When the check fires it re-reads current state and
//! only declares victory if the same holder still holds the crown and
//! has held it for the full duration, guarding against a check that
//! raced past an intervening re-schedule.
//!
//! Elimination mode reacts to headquarters captures: the dispossessed
//! player is marked eliminated, and the last player still controlling
//! their own headquarters wins.
//!
//! Declaring victory is a single idempotent transition; a session
//! already completed is left untouched.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use holdfast_protocol::{channel, CrownChanged, GameVictory, HqCaptured};

use crate::error::{EngineError, Result};
use crate::events::{publish, EventPublisher};
use crate::model::{GameType, SessionStatus};
use crate::queue::{JobQueue, QUEUE_VICTORY};
use crate::store::Store;

/// Job name for the delayed crown-hold check.
pub const JOB_CROWN_CHECK: &str = "crown_check";

/// Victory engine handle.
pub struct VictoryEngine {
    store: Arc<dyn Store>,
    queue: Arc<dyn JobQueue>,
    publisher: Arc<dyn EventPublisher>,
    crown_hold: Duration,
}

impl VictoryEngine {
    /// Create an engine over the given handles. `crown_hold` is the
    /// continuous hold duration required to win a crown-hold session.
    pub fn new(
        store: Arc<dyn Store>,
        queue: Arc<dyn JobQueue>,
        publisher: Arc<dyn EventPublisher>,
        crown_hold: Duration,
    ) -> Self {
        Self {
            store,
            queue,
            publisher,
            crown_hold,
        }
    }

    /// React to a crown ownership change: cancel the session's pending
    /// check and, if the crown now has an owner, record the new hold
    /// and arm a fresh check for the full hold duration.
    pub async fn handle_crown_changed(&self, event: &CrownChanged) -> Result<()> {
        let session_id = event.session_id;
        let key = crown_check_key(session_id);

        // Cancelling a key with no job is a no-op.
        self.queue.cancel_by_key(&key).await?;

        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| EngineError::SessionNotFound {
                session_id: session_id.to_string(),
            })?;
        if session.status != SessionStatus::Active {
            return Ok(());
        }

        let crown = self.store.get_node(event.crown_node_id).await?;
        let holder = crown.and_then(|n| n.owner_id);

        match holder {
            Some(holder_id) => {
                let now = Utc::now();
                self.store
                    .set_crown_holder(session_id, Some(holder_id), Some(now))
                    .await?;
                self.queue
                    .enqueue_delayed(
                        QUEUE_VICTORY,
                        JOB_CROWN_CHECK,
                        json!({ "sessionId": session_id }),
                        Some(&key),
                        self.crown_hold,
                    )
                    .await?;
                info!(
                    session_id = %session_id,
                    holder_id = %holder_id,
                    hold_hours = self.crown_hold.as_secs() / 3600,
                    "Crown claimed, victory check armed"
                );
            }
            None => {
                self.store.set_crown_holder(session_id, None, None).await?;
                debug!(session_id = %session_id, "Crown released, victory check cancelled");
            }
        }
        Ok(())
    }

    /// The delayed crown check. Re-reads current state: the recorded
    /// holder must still own the crown and the hold must span the full
    /// duration, otherwise the check is a no-op.
    pub async fn check_crown_victory(&self, session_id: Uuid) -> Result<()> {
        let Some(session) = self.store.get_session(session_id).await? else {
            warn!(session_id = %session_id, "Crown check fired for unknown session");
            return Ok(());
        };
        if session.status != SessionStatus::Active {
            return Ok(());
        }

        let (Some(crown_node_id), Some(holder_id), Some(held_since)) = (
            session.crown_node_id,
            session.crown_holder_id,
            session.crown_held_since,
        ) else {
            debug!(session_id = %session_id, "Crown check fired with no recorded hold");
            return Ok(());
        };

        let Some(crown) = self.store.get_node(crown_node_id).await? else {
            return Ok(());
        };
        if crown.owner_id != Some(holder_id) {
            debug!(session_id = %session_id, "Crown changed hands before the check fired");
            return Ok(());
        }

        let held_for = Utc::now() - held_since;
        let required = ChronoDuration::from_std(self.crown_hold)
            .unwrap_or_else(|_| ChronoDuration::zero());
        if held_for < required {
            // A re-schedule raced past this check; the live timer wins.
            debug!(session_id = %session_id, "Hold duration not yet met, ignoring stale check");
            return Ok(());
        }

        self.declare_victory(session_id, holder_id, GameType::CrownHold, "crown held")
            .await
    }

    /// React to a headquarters capture: eliminate the dispossessed
    /// player, then declare victory if exactly one player still
    /// controls their own headquarters.
    pub async fn handle_hq_captured(&self, event: &HqCaptured) -> Result<()> {
        let session_id = event.session_id;
        let Some(session) = self.store.get_session(session_id).await? else {
            return Ok(());
        };
        if session.status != SessionStatus::Active {
            return Ok(());
        }

        let players = self.store.list_players(session_id).await?;

        // Recompute who still controls their stronghold from current
        // node state rather than trusting the notification alone.
        let mut standing = Vec::new();
        for player in &players {
            if player.eliminated {
                continue;
            }
            let Some(hq_id) = player.hq_node_id else {
                continue;
            };
            let controls = self
                .store
                .get_node(hq_id)
                .await?
                .map(|n| n.owner_id == Some(player.id))
                .unwrap_or(false);
            if controls {
                standing.push(player.id);
            } else {
                self.store.mark_player_eliminated(player.id).await?;
                info!(session_id = %session_id, player_id = %player.id, "Player eliminated");
            }
        }

        if session.game_type == GameType::Elimination {
            if let [winner_id] = standing.as_slice() {
                return self
                    .declare_victory(session_id, *winner_id, GameType::Elimination, "last standing")
                    .await;
            }
        }
        Ok(())
    }

    /// Idempotent terminal transition: completes the session, records
    /// the winner and publishes `game:victory` exactly once.
    async fn declare_victory(
        &self,
        session_id: Uuid,
        winner_id: Uuid,
        game_type: GameType,
        reason: &str,
    ) -> Result<()> {
        let applied = self
            .store
            .complete_session_if_active(session_id, winner_id)
            .await?;
        if !applied {
            debug!(session_id = %session_id, "Session already completed, victory not re-declared");
            return Ok(());
        }

        let winner_name = self
            .store
            .get_player(winner_id)
            .await?
            .map(|p| p.name)
            .unwrap_or_default();

        info!(
            session_id = %session_id,
            winner_id = %winner_id,
            game_type = game_type.as_str(),
            "Victory declared"
        );
        publish(
            &self.publisher,
            channel::GAME_VICTORY,
            &GameVictory {
                session_id,
                winner_id,
                winner_name,
                game_type: game_type.as_str().to_string(),
                reason: reason.to_string(),
            },
        )
    }
}

/// Unique key for a session's delayed crown check, so a newer claim
/// supersedes the previous timer.
pub fn crown_check_key(session_id: Uuid) -> String {
    format!("victory:crown:{}", session_id)
}
