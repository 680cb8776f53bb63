//! Persistence gateway: player records, durable queue, match rows.
//!
//! The gateway is a trait so the matchmaking service and the session
//! engine can be exercised against an in-memory fake. The live
//! implementation talks PostgREST; the cross-table writes that must be
//! atomic (pairing, terminal results) are stored procedures on the
//! database side.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::postgrest::{PostgrestClient, PostgrestError};

/// A player waiting in the durable matchmaking queue.
/// Unique per (player_id, mode) - enforced by the queue table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub player_id: Uuid,
    pub mode: String,
    pub elo: i32,
    pub enqueued_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub console_id: Option<Uuid>,
}

/// Match lifecycle status. Transitions are one-directional:
/// queued -> active -> finished | cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Queued,
    Active,
    Finished,
    Cancelled,
}

/// Persisted match row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: Uuid,
    pub mode: String,
    pub status: MatchStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

/// Per-participant final result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantResult {
    None,
    Win,
    Loss,
    Draw,
}

/// Persisted match participant row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub match_id: Uuid,
    pub player_id: Uuid,
    pub team: u8,
    pub result: ParticipantResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating_delta: Option<i32>,
}

/// Everything a successful pairing commits in one transaction:
/// the new match, its participants, and the queue entries to remove.
#[derive(Debug, Clone, Serialize)]
pub struct PairingCommit {
    pub match_record: MatchRecord,
    pub participants: Vec<ParticipantRecord>,
}

/// Terminal outcome for one participant
#[derive(Debug, Clone, Serialize)]
pub struct ParticipantOutcome {
    pub player_id: Uuid,
    pub result: ParticipantResult,
    pub rating_delta: i32,
}

/// Gateway errors
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("duplicate row")]
    Duplicate,

    #[error("gateway request failed: {0}")]
    Backend(String),
}

impl From<PostgrestError> for GatewayError {
    fn from(err: PostgrestError) -> Self {
        match err {
            PostgrestError::Conflict => GatewayError::Duplicate,
            other => GatewayError::Backend(other.to_string()),
        }
    }
}

/// The relational store behind the orchestration core
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Current ELO rating of a player (0 for unrated players)
    async fn player_elo(&self, player_id: Uuid) -> Result<i32, GatewayError>;

    /// Insert a queue entry; `Duplicate` if (player_id, mode) already waits
    async fn insert_queue_entry(&self, entry: &QueueEntry) -> Result<(), GatewayError>;

    /// Remove a queue entry; returns false when none existed
    async fn delete_queue_entry(&self, player_id: Uuid, mode: &str) -> Result<bool, GatewayError>;

    /// All waiting entries for a mode, oldest first
    async fn waiting_entries(&self, mode: &str) -> Result<Vec<QueueEntry>, GatewayError>;

    /// Remove the paired queue entries and create the match plus its
    /// participants. Must commit as a single transaction: a failure
    /// leaves both queue entries in place.
    async fn commit_pairing(&self, commit: &PairingCommit) -> Result<(), GatewayError>;

    /// Transition a match to active and set its start time
    async fn mark_started(
        &self,
        match_id: Uuid,
        started_at: DateTime<Utc>,
    ) -> Result<(), GatewayError>;

    /// Write the terminal status, end time and per-participant results
    /// in one transaction
    async fn finish_match(
        &self,
        match_id: Uuid,
        status: MatchStatus,
        ended_at: DateTime<Utc>,
        outcomes: &[ParticipantOutcome],
    ) -> Result<(), GatewayError>;
}

/// Live gateway backed by PostgREST
#[derive(Clone)]
pub struct PostgrestGateway {
    client: PostgrestClient,
}

#[derive(Debug, Deserialize)]
struct PlayerRow {
    elo: i32,
}

impl PostgrestGateway {
    pub fn new(client: PostgrestClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PersistenceGateway for PostgrestGateway {
    async fn player_elo(&self, player_id: Uuid) -> Result<i32, GatewayError> {
        let query = format!("select=elo&id=eq.{}", player_id);
        let rows: Vec<PlayerRow> = self.client.get("players", &query).await?;
        Ok(rows.first().map(|r| r.elo).unwrap_or(0))
    }

    async fn insert_queue_entry(&self, entry: &QueueEntry) -> Result<(), GatewayError> {
        self.client.insert("match_queue", entry).await?;
        Ok(())
    }

    async fn delete_queue_entry(&self, player_id: Uuid, mode: &str) -> Result<bool, GatewayError> {
        let query = format!("player_id=eq.{}&mode=eq.{}", player_id, mode);
        Ok(self.client.delete("match_queue", &query).await?)
    }

    async fn waiting_entries(&self, mode: &str) -> Result<Vec<QueueEntry>, GatewayError> {
        let query = format!("mode=eq.{}&order=enqueued_at.asc", mode);
        Ok(self.client.get("match_queue", &query).await?)
    }

    async fn commit_pairing(&self, commit: &PairingCommit) -> Result<(), GatewayError> {
        self.client.rpc("pair_players", commit).await?;
        Ok(())
    }

    async fn mark_started(
        &self,
        match_id: Uuid,
        started_at: DateTime<Utc>,
    ) -> Result<(), GatewayError> {
        let query = format!("id=eq.{}", match_id);
        let patch = serde_json::json!({
            "status": MatchStatus::Active,
            "started_at": started_at,
        });
        self.client.update("matches", &query, &patch).await?;
        Ok(())
    }

    async fn finish_match(
        &self,
        match_id: Uuid,
        status: MatchStatus,
        ended_at: DateTime<Utc>,
        outcomes: &[ParticipantOutcome],
    ) -> Result<(), GatewayError> {
        let args = serde_json::json!({
            "match_id": match_id,
            "status": status,
            "ended_at": ended_at,
            "outcomes": outcomes,
        });
        self.client.rpc("finish_match", &args).await?;
        Ok(())
    }
}
