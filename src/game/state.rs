//! Authoritative in-memory match state and delta application

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::ws::protocol::{ParticipantBlock, Phase, StateDelta, StateSnapshot};

/// Why a delta was rejected or failed
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("invalid action: {0}")]
    InvalidAction(&'static str),

    #[error("internal error applying delta: {0}")]
    Internal(String),
}

/// One participant's live state block. The resource pool is opaque to
/// the orchestration core; rules layers interpret it.
#[derive(Debug, Clone)]
pub struct ParticipantState {
    pub player_id: Uuid,
    pub team: u8,
    pub elo: i32,
    pub resources: Value,
}

/// Authoritative live state of one active match. Owned exclusively by
/// that match's session task; never persisted until terminal, and
/// dropped outright at termination.
pub struct MatchState {
    pub match_id: Uuid,
    pub seed: u64,
    pub turn: u32,
    pub phase: Phase,
    pub active_team: u8,
    pub remaining_ms: u64,
    /// Monotonic counter bumped on every applied delta; snapshots carry
    /// it so clients can discard already-applied deltas
    pub seq: u64,
    pub participants: Vec<ParticipantState>,
    phase_duration_ms: u64,
}

impl MatchState {
    pub fn new(
        match_id: Uuid,
        seed: u64,
        phase_seconds: u64,
        participants: Vec<ParticipantState>,
    ) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let active_team = rng.gen_range(0..2) as u8;

        Self {
            match_id,
            seed,
            turn: 1,
            phase: Phase::Start,
            active_team,
            remaining_ms: phase_seconds * 1000,
            seq: 0,
            participants,
            phase_duration_ms: phase_seconds * 1000,
        }
    }

    /// Advance to the next phase, resetting the clock. An `end -> start`
    /// wrap increments the turn and flips the active team.
    pub fn advance_phase(&mut self) {
        if self.phase.wraps() {
            self.turn += 1;
            self.active_team = 1 - self.active_team;
        }
        self.phase = self.phase.next();
        self.remaining_ms = self.phase_duration_ms;
    }

    /// One second of clock. Returns true when the phase auto-advanced.
    pub fn tick_second(&mut self) -> bool {
        self.remaining_ms = self.remaining_ms.saturating_sub(1000);
        if self.remaining_ms == 0 {
            self.advance_phase();
            true
        } else {
            false
        }
    }

    fn actor(&self, player_id: Uuid) -> Option<&ParticipantState> {
        self.participants.iter().find(|p| p.player_id == player_id)
    }

    /// Validate a delta against the current phase/turn/owner and apply
    /// it. Returns the new sequence number on success.
    pub fn apply_delta(&mut self, player_id: Uuid, delta: &StateDelta) -> Result<u64, ApplyError> {
        let actor = self
            .actor(player_id)
            .ok_or(ApplyError::InvalidAction("not a participant"))?;

        // Every current delta kind requires the actor to hold the turn
        if actor.team != self.active_team {
            return Err(ApplyError::InvalidAction("not your turn"));
        }

        match delta {
            StateDelta::PlayCard { patch, .. } => {
                if !matches!(self.phase, Phase::Main | Phase::Attack) {
                    return Err(ApplyError::InvalidAction("cards cannot be played this phase"));
                }
                self.merge_into_actor(player_id, patch)?;
            }
            StateDelta::UpdateResources { patch } => {
                self.merge_into_actor(player_id, patch)?;
            }
            StateDelta::EndPhase => {
                self.advance_phase();
            }
        }

        self.seq += 1;
        Ok(self.seq)
    }

    fn merge_into_actor(&mut self, player_id: Uuid, patch: &Value) -> Result<(), ApplyError> {
        if !patch.is_object() {
            return Err(ApplyError::InvalidAction("patch must be an object"));
        }
        let actor = self
            .participants
            .iter_mut()
            .find(|p| p.player_id == player_id)
            .ok_or(ApplyError::InvalidAction("not a participant"))?;
        merge_patch(&mut actor.resources, patch);
        Ok(())
    }

    /// Full state for client re-sync
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            turn: self.turn,
            phase: self.phase,
            active_team: self.active_team,
            remaining_ms: self.remaining_ms,
            participants: self
                .participants
                .iter()
                .map(|p| ParticipantBlock {
                    player_id: p.player_id,
                    team: p.team,
                    resources: p.resources.clone(),
                })
                .collect(),
        }
    }
}

/// RFC 7386-style merge: object keys merge recursively, null removes,
/// anything else replaces.
fn merge_patch(target: &mut Value, patch: &Value) {
    match patch {
        Value::Object(entries) => {
            if !target.is_object() {
                *target = Value::Object(serde_json::Map::new());
            }
            let map = target.as_object_mut().expect("target coerced to object");
            for (key, value) in entries {
                if value.is_null() {
                    map.remove(key);
                } else {
                    merge_patch(map.entry(key.clone()).or_insert(Value::Null), value);
                }
            }
        }
        other => *target = other.clone(),
    }
}
