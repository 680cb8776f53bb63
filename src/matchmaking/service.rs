//! Matchmaking service - durable queue operations and the pairing sweep

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::game::{MatchEngine, SessionParticipant};
use crate::registry::ConnectionRegistry;
use crate::store::gateway::{
    GatewayError, MatchRecord, MatchStatus, PairingCommit, ParticipantRecord, ParticipantResult,
    PersistenceGateway, QueueEntry,
};
use crate::ws::protocol::{OpponentSummary, ServerMsg, DEFAULT_MODE};

use super::strategy::PairingStrategy;

/// Cost model for the wait estimate returned on queue join
const PER_PLAYER_PAIRING_COST_SECS: u64 = 5;
const MAX_ESTIMATED_WAIT_SECS: u64 = 120;

/// Queue operation errors, returned to the requesting client only
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("already queued for this mode")]
    AlreadyQueued,

    #[error("not queued for this mode")]
    NotQueued,

    #[error("queue backend unavailable: {0}")]
    Gateway(#[from] GatewayError),
}

impl QueueError {
    /// Stable wire code for the error message
    pub fn code(&self) -> &'static str {
        match self {
            QueueError::AlreadyQueued => "already_queued",
            QueueError::NotQueued => "not_queued",
            QueueError::Gateway(_) => "queue_unavailable",
        }
    }
}

/// Matchmaking service: owns queue joins/leaves and the recurring
/// pairing sweep shared across all modes
pub struct MatchmakingService {
    gateway: Arc<dyn PersistenceGateway>,
    registry: Arc<ConnectionRegistry>,
    engine: Arc<MatchEngine>,
    strategy: Box<dyn PairingStrategy>,
    sweep_interval: Duration,
    /// Modes covered by the sweep
    modes: Vec<String>,
}

impl MatchmakingService {
    pub fn new(
        gateway: Arc<dyn PersistenceGateway>,
        registry: Arc<ConnectionRegistry>,
        engine: Arc<MatchEngine>,
        strategy: Box<dyn PairingStrategy>,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            gateway,
            registry,
            engine,
            strategy,
            sweep_interval,
            modes: vec![DEFAULT_MODE.to_string()],
        }
    }

    /// Join the queue for a mode. Returns the estimated wait in seconds.
    pub async fn join(
        &self,
        player_id: Uuid,
        mode: &str,
        console_id: Option<Uuid>,
    ) -> Result<u64, QueueError> {
        let elo = self.gateway.player_elo(player_id).await?;

        let entry = QueueEntry {
            player_id,
            mode: mode.to_string(),
            elo,
            enqueued_at: Utc::now(),
            console_id,
        };

        match self.gateway.insert_queue_entry(&entry).await {
            Ok(()) => {}
            Err(GatewayError::Duplicate) => return Err(QueueError::AlreadyQueued),
            Err(other) => return Err(other.into()),
        }

        let depth = self.gateway.waiting_entries(mode).await?.len() as u64;
        let estimate = (depth * PER_PLAYER_PAIRING_COST_SECS).min(MAX_ESTIMATED_WAIT_SECS);

        info!(player_id = %player_id, mode = mode, queue_depth = depth, "player joined queue");
        Ok(estimate)
    }

    /// Leave the queue for a mode
    pub async fn leave(&self, player_id: Uuid, mode: &str) -> Result<(), QueueError> {
        if !self.gateway.delete_queue_entry(player_id, mode).await? {
            return Err(QueueError::NotQueued);
        }
        info!(player_id = %player_id, mode = mode, "player left queue");
        Ok(())
    }

    /// Current queue depth for a mode (health/metrics)
    pub async fn queue_depth(&self, mode: &str) -> usize {
        self.gateway
            .waiting_entries(mode)
            .await
            .map(|entries| entries.len())
            .unwrap_or(0)
    }

    /// One pairing pass across all modes. Every successful pair commits
    /// queue removal plus match creation in a single gateway transaction,
    /// so a crash mid-pairing strands neither player.
    pub async fn pairing_sweep(&self) -> Result<usize, QueueError> {
        let mut paired = 0;

        for mode in &self.modes {
            let waiting = self.gateway.waiting_entries(mode).await?;
            let pairs = self.strategy.select_pairs(&waiting);

            for (a, b) in pairs {
                match self.commit_pair(mode, &a, &b).await {
                    Ok(()) => paired += 1,
                    Err(err) => {
                        // Both entries stay queued; the next sweep retries
                        warn!(
                            mode = mode,
                            player_a = %a.player_id,
                            player_b = %b.player_id,
                            error = %err,
                            "pairing commit failed"
                        );
                    }
                }
            }
        }

        Ok(paired)
    }

    async fn commit_pair(
        &self,
        mode: &str,
        a: &QueueEntry,
        b: &QueueEntry,
    ) -> Result<(), GatewayError> {
        let match_id = Uuid::new_v4();
        let record = MatchRecord {
            id: match_id,
            mode: mode.to_string(),
            status: MatchStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        };
        let participants = vec![
            ParticipantRecord {
                match_id,
                player_id: a.player_id,
                team: 0,
                result: ParticipantResult::None,
                rating_delta: None,
            },
            ParticipantRecord {
                match_id,
                player_id: b.player_id,
                team: 1,
                result: ParticipantResult::None,
                rating_delta: None,
            },
        ];

        self.gateway
            .commit_pairing(&PairingCommit {
                match_record: record.clone(),
                participants,
            })
            .await?;

        info!(
            match_id = %match_id,
            mode = mode,
            player_a = %a.player_id,
            player_b = %b.player_id,
            "players paired"
        );

        // Spawn the session task first so ready signals have a target
        self.engine.create_session(
            &record,
            vec![
                SessionParticipant {
                    player_id: a.player_id,
                    team: 0,
                    elo: a.elo,
                },
                SessionParticipant {
                    player_id: b.player_id,
                    team: 1,
                    elo: b.elo,
                },
            ],
        );

        self.notify_found(&record, a, b, 0);
        self.notify_found(&record, b, a, 1);
        Ok(())
    }

    fn notify_found(
        &self,
        record: &MatchRecord,
        player: &QueueEntry,
        opponent: &QueueEntry,
        team: u8,
    ) {
        self.registry.send_to_player(
            player.player_id,
            ServerMsg::MatchFound {
                match_id: record.id,
                mode: record.mode.clone(),
                your_team: team,
                opponent: OpponentSummary {
                    player_id: opponent.player_id,
                    elo: opponent.elo,
                    team: 1 - team,
                },
            },
        );
    }

    /// Run the recurring pairing sweep. A failed iteration is logged and
    /// retried on the next interval; the scheduler never exits.
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(self.sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            if let Err(err) = self.pairing_sweep().await {
                error!(error = %err, "pairing sweep failed, retrying next interval");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::MatchEngine;
    use crate::matchmaking::strategy::AdjacentPairStrategy;
    use crate::store::gateway::testing::InMemoryGateway;
    use crate::ws::protocol::MatchRules;
    use tokio::sync::mpsc;

    fn service_with(gateway: Arc<InMemoryGateway>) -> (MatchmakingService, Arc<ConnectionRegistry>) {
        let registry = Arc::new(ConnectionRegistry::new());
        let engine = Arc::new(MatchEngine::new(
            registry.clone(),
            gateway.clone() as Arc<dyn PersistenceGateway>,
            MatchRules {
                mode: DEFAULT_MODE.to_string(),
                phase_seconds: 60,
                max_turns: 30,
            },
        ));
        let service = MatchmakingService::new(
            gateway,
            registry.clone(),
            engine,
            Box::new(AdjacentPairStrategy::new(200)),
            Duration::from_secs(2),
        );
        (service, registry)
    }

    #[tokio::test]
    async fn join_twice_same_mode_is_rejected() {
        let player = Uuid::new_v4();
        let gateway = Arc::new(InMemoryGateway::new().with_elo(player, 1000));
        let (service, _registry) = service_with(gateway.clone());

        service.join(player, "1v1", None).await.unwrap();
        let second = service.join(player, "1v1", None).await;

        assert!(matches!(second, Err(QueueError::AlreadyQueued)));
        assert_eq!(gateway.queued_modes(player), vec!["1v1".to_string()]);
    }

    #[tokio::test]
    async fn leave_without_join_is_rejected() {
        let gateway = Arc::new(InMemoryGateway::new());
        let (service, _registry) = service_with(gateway);

        let result = service.leave(Uuid::new_v4(), "1v1").await;

        assert!(matches!(result, Err(QueueError::NotQueued)));
    }

    #[tokio::test]
    async fn wait_estimate_scales_with_depth_and_caps() {
        let gateway = Arc::new(InMemoryGateway::new());
        let (service, _registry) = service_with(gateway);

        let first = service.join(Uuid::new_v4(), "1v1", None).await.unwrap();
        assert_eq!(first, PER_PLAYER_PAIRING_COST_SECS);

        for _ in 0..40 {
            service.join(Uuid::new_v4(), "1v1", None).await.unwrap();
        }
        let capped = service.join(Uuid::new_v4(), "1v1", None).await.unwrap();
        assert_eq!(capped, MAX_ESTIMATED_WAIT_SECS);
    }

    #[tokio::test]
    async fn sweep_pairs_close_elo_players() {
        let p1 = Uuid::new_v4();
        let p2 = Uuid::new_v4();
        let gateway = Arc::new(
            InMemoryGateway::new()
                .with_elo(p1, 1000)
                .with_elo(p2, 1050),
        );
        let (service, registry) = service_with(gateway.clone());

        // attach connections so both players receive match.found
        let conn1 = Uuid::new_v4();
        let conn2 = Uuid::new_v4();
        let (tx1, mut found1) = mpsc::unbounded_channel();
        let (tx2, mut found2) = mpsc::unbounded_channel();
        registry.insert(conn1, tx1);
        registry.insert(conn2, tx2);
        registry.register(conn1, p1).unwrap();
        registry.register(conn2, p2).unwrap();

        service.join(p1, "1v1", None).await.unwrap();
        service.join(p2, "1v1", None).await.unwrap();

        let paired = service.pairing_sweep().await.unwrap();
        assert_eq!(paired, 1);

        // both entries consumed, one match with two participants
        assert!(gateway.queue.lock().unwrap().is_empty());
        assert_eq!(gateway.matches.lock().unwrap().len(), 1);
        assert_eq!(gateway.participants.lock().unwrap().len(), 2);

        let msg1 = found1.try_recv().unwrap();
        let msg2 = found2.try_recv().unwrap();
        match (msg1, msg2) {
            (
                ServerMsg::MatchFound {
                    your_team: t1,
                    opponent: o1,
                    ..
                },
                ServerMsg::MatchFound {
                    your_team: t2,
                    opponent: o2,
                    ..
                },
            ) => {
                assert_eq!((t1, t2), (0, 1));
                assert_eq!(o1.player_id, p2);
                assert_eq!(o2.player_id, p1);
            }
            other => panic!("expected match.found for both players: {other:?}"),
        }
    }

    #[tokio::test]
    async fn sweep_leaves_far_elo_players_queued() {
        let p1 = Uuid::new_v4();
        let p2 = Uuid::new_v4();
        let gateway = Arc::new(
            InMemoryGateway::new()
                .with_elo(p1, 1000)
                .with_elo(p2, 1900),
        );
        let (service, _registry) = service_with(gateway.clone());

        service.join(p1, "1v1", None).await.unwrap();
        service.join(p2, "1v1", None).await.unwrap();

        let paired = service.pairing_sweep().await.unwrap();

        assert_eq!(paired, 0);
        assert_eq!(gateway.queue.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failed_pairing_commit_strands_neither_player() {
        let p1 = Uuid::new_v4();
        let p2 = Uuid::new_v4();
        let gateway = Arc::new(
            InMemoryGateway::new()
                .with_elo(p1, 1000)
                .with_elo(p2, 1010),
        );
        let (service, _registry) = service_with(gateway.clone());

        service.join(p1, "1v1", None).await.unwrap();
        service.join(p2, "1v1", None).await.unwrap();

        gateway
            .fail_pairing
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let paired = service.pairing_sweep().await.unwrap();
        assert_eq!(paired, 0);
        // neither effect applied: entries intact, no match row
        assert_eq!(gateway.queue.lock().unwrap().len(), 2);
        assert!(gateway.matches.lock().unwrap().is_empty());

        // next interval succeeds
        gateway
            .fail_pairing
            .store(false, std::sync::atomic::Ordering::SeqCst);
        let paired = service.pairing_sweep().await.unwrap();
        assert_eq!(paired, 1);
        assert!(gateway.queue.lock().unwrap().is_empty());
        assert_eq!(gateway.matches.lock().unwrap().len(), 1);
    }
}
