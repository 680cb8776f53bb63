//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default game mode when the client omits one
pub const DEFAULT_MODE: &str = "1v1";

fn default_mode() -> String {
    DEFAULT_MODE.to_string()
}

/// Phases of a single turn, in cycle order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Start,
    Main,
    Attack,
    End,
}

impl Phase {
    /// The phase that follows this one. `End` wraps back to `Start`,
    /// which is also the point where the turn counter advances.
    pub fn next(self) -> Phase {
        match self {
            Phase::Start => Phase::Main,
            Phase::Main => Phase::Attack,
            Phase::Attack => Phase::End,
            Phase::End => Phase::Start,
        }
    }

    /// True when advancing from this phase begins a new turn
    pub fn wraps(self) -> bool {
        matches!(self, Phase::End)
    }
}

impl Default for Phase {
    fn default() -> Self {
        Self::Start
    }
}

/// A client-initiated mutation of match state.
///
/// The payload of each variant is opaque to the orchestration core; only
/// the variant itself decides which phase/turn checks apply. Game rules
/// interpret the patches downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StateDelta {
    /// Play a card from hand; only legal in main/attack on the actor's turn
    PlayCard {
        card_id: Uuid,
        patch: serde_json::Value,
    },

    /// Adjust the actor's own resource pools; actor's turn only
    UpdateResources { patch: serde_json::Value },

    /// Explicitly complete the current phase; actor's turn only
    EndPhase,
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Enter the matchmaking queue for a mode
    QueueJoin {
        #[serde(default = "default_mode")]
        mode: String,
        /// Preferred console for the session, if the player has one paired
        #[serde(default)]
        console_id: Option<Uuid>,
    },

    /// Leave the matchmaking queue
    QueueLeave {
        #[serde(default = "default_mode")]
        mode: String,
    },

    /// Signal readiness for a found match
    MatchReady { match_id: Uuid },

    /// Apply a state delta to an active match
    StateUpdate { match_id: Uuid, delta: StateDelta },

    /// Request a full-state snapshot for re-sync
    SyncRequest { match_id: Uuid },
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome { player_id: Uuid, server_time: u64 },

    /// Queue join accepted
    QueueAck {
        mode: String,
        estimated_wait_seconds: u64,
    },

    /// Queue leave accepted
    QueueLeft { mode: String },

    /// A match has been found for this player
    MatchFound {
        match_id: Uuid,
        mode: String,
        your_team: u8,
        opponent: OpponentSummary,
    },

    /// Ready signal acknowledged; match starts when everyone is ready
    ReadyAck {
        match_id: Uuid,
        ready_players: usize,
        total_players: usize,
    },

    /// All participants ready, authoritative state initialized
    MatchStart {
        match_id: Uuid,
        seed: u64,
        rules: MatchRules,
        arena: String,
        players: Vec<ParticipantSummary>,
    },

    /// Once-per-second phase clock broadcast
    TimerTick {
        match_id: Uuid,
        server_timestamp: u64,
        turn: u32,
        phase: Phase,
        remaining_ms: u64,
    },

    /// A validated delta was applied to the match
    StateApply {
        match_id: Uuid,
        seq: u64,
        from_player: Uuid,
        patch: StateDelta,
    },

    /// Full-state snapshot for client re-sync
    SyncSnapshot {
        match_id: Uuid,
        seq: u64,
        full_state: StateSnapshot,
    },

    /// Match reached a terminal state
    MatchEnd {
        match_id: Uuid,
        result: MatchResultMsg,
        timestamp: u64,
    },

    /// Error message
    Error { code: String, message: String },
}

/// Opponent details shared when a match is found
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpponentSummary {
    pub player_id: Uuid,
    pub elo: i32,
    pub team: u8,
}

/// One participant in a started match
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantSummary {
    pub player_id: Uuid,
    pub team: u8,
}

/// Session parameters fixed at match start
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRules {
    pub mode: String,
    pub phase_seconds: u64,
    pub max_turns: u32,
}

/// Authoritative state as sent in a snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub turn: u32,
    pub phase: Phase,
    pub active_team: u8,
    pub remaining_ms: u64,
    pub participants: Vec<ParticipantBlock>,
}

/// Per-participant state block (resource pools opaque to the core)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantBlock {
    pub player_id: Uuid,
    pub team: u8,
    pub resources: serde_json::Value,
}

/// Terminal match result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResultMsg {
    pub winner: Option<Uuid>,
    /// "reported", "turn_limit" or "forced"
    pub reason: String,
    pub rating_changes: Vec<RatingChange>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingChange {
    pub player_id: Uuid,
    pub delta: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_cycle_wraps_after_end() {
        let mut phase = Phase::Start;
        let mut wraps = 0;
        for _ in 0..8 {
            if phase.wraps() {
                wraps += 1;
            }
            phase = phase.next();
        }
        assert_eq!(phase, Phase::Start);
        assert_eq!(wraps, 2);
    }

    #[test]
    fn client_msg_decodes_tagged_type() {
        let msg: ClientMsg =
            serde_json::from_str(r#"{"type":"queue_join","mode":"1v1"}"#).unwrap();
        assert!(matches!(msg, ClientMsg::QueueJoin { ref mode, .. } if mode == "1v1"));
    }

    #[test]
    fn queue_join_defaults_mode() {
        let msg: ClientMsg = serde_json::from_str(r#"{"type":"queue_join"}"#).unwrap();
        assert!(matches!(msg, ClientMsg::QueueJoin { ref mode, .. } if mode == DEFAULT_MODE));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let result = serde_json::from_str::<ClientMsg>(r#"{"type":"warp_drive"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn state_delta_round_trips_inside_update() {
        let raw = r#"{"type":"state_update","match_id":"7f8a1c2e-0000-4000-8000-000000000001","delta":{"kind":"end_phase"}}"#;
        let msg: ClientMsg = serde_json::from_str(raw).unwrap();
        match msg {
            ClientMsg::StateUpdate { delta, .. } => {
                assert!(matches!(delta, StateDelta::EndPhase))
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
