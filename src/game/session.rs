//! Match session actor and the registry of running sessions

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::registry::ConnectionRegistry;
use crate::store::gateway::{
    MatchRecord, MatchStatus, ParticipantOutcome, ParticipantResult, PersistenceGateway,
};
use crate::util::time::{unix_millis, CLOCK_TICK};
use crate::ws::protocol::{
    MatchResultMsg, MatchRules, ParticipantSummary, RatingChange, ServerMsg, StateDelta,
};

use super::rating::rating_delta;
use super::state::{ApplyError, MatchState, ParticipantState};

/// Arena identifier for the MVP tier (single board layout)
const ARENA: &str = "standard";

/// Session-level errors surfaced to the offending client only
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("match not found")]
    MatchNotFound,

    #[error("connection is not part of this match")]
    NotInMatch,

    #[error("invalid action: {0}")]
    InvalidAction(&'static str),

    #[error("internal match error")]
    MatchError,
}

impl SessionError {
    /// Stable wire code for the error message
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::MatchNotFound => "match_not_found",
            SessionError::NotInMatch => "not_in_match",
            SessionError::InvalidAction(_) => "invalid_action",
            SessionError::MatchError => "match_error",
        }
    }
}

/// Why a match terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// Result reported by the rules layer
    Reported,
    /// Turn limit exceeded
    TurnLimit,
    /// Admin or operational termination
    Forced,
}

impl EndReason {
    pub fn as_str(self) -> &'static str {
        match self {
            EndReason::Reported => "reported",
            EndReason::TurnLimit => "turn_limit",
            EndReason::Forced => "forced",
        }
    }
}

/// One player's seat in a session
#[derive(Debug, Clone)]
pub struct SessionParticipant {
    pub player_id: Uuid,
    pub team: u8,
    pub elo: i32,
}

/// Commands routed into a match session task
#[derive(Debug)]
pub enum SessionCommand {
    Ready {
        connection_id: Uuid,
        player_id: Uuid,
    },
    Apply {
        connection_id: Uuid,
        player_id: Uuid,
        delta: StateDelta,
    },
    Sync {
        connection_id: Uuid,
        player_id: Uuid,
    },
    Terminate {
        winner: Option<Uuid>,
        reason: EndReason,
    },
}

/// Handle to a running match session
#[derive(Clone)]
pub struct SessionHandle {
    pub match_id: Uuid,
    cmd_tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    /// Route a command to the session; false when the session is gone
    pub async fn send(&self, cmd: SessionCommand) -> bool {
        self.cmd_tx.send(cmd).await.is_ok()
    }
}

enum Flow {
    Continue,
    Stop,
}

/// The per-match actor. Owns the authoritative [`MatchState`] outright:
/// every mutation goes through this task's command channel, so no lock
/// is ever held across a gateway await.
struct MatchSession {
    match_id: Uuid,
    rules: MatchRules,
    participants: Vec<SessionParticipant>,
    ready: HashSet<Uuid>,
    state: Option<MatchState>,
    cmd_rx: mpsc::Receiver<SessionCommand>,
    registry: Arc<ConnectionRegistry>,
    gateway: Arc<dyn PersistenceGateway>,
}

impl MatchSession {
    async fn run(mut self) {
        info!(match_id = %self.match_id, "match session started");

        let mut clock = tokio::time::interval(CLOCK_TICK);
        clock.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                maybe_cmd = self.cmd_rx.recv() => {
                    let Some(cmd) = maybe_cmd else { break };
                    let was_gated = self.state.is_none();
                    if let Flow::Stop = self.handle_command(cmd).await {
                        break;
                    }
                    if was_gated && self.state.is_some() {
                        // First full phase starts now, not at task spawn
                        clock.reset();
                    }
                }
                _ = clock.tick(), if self.state.is_some() => {
                    if let Flow::Stop = self.handle_tick().await {
                        break;
                    }
                }
            }
        }

        info!(match_id = %self.match_id, "match session closed");
    }

    fn participant(&self, player_id: Uuid) -> Option<&SessionParticipant> {
        self.participants.iter().find(|p| p.player_id == player_id)
    }

    fn reject(&self, connection_id: Uuid, err: &SessionError) {
        self.registry.send_to_connection(
            connection_id,
            ServerMsg::Error {
                code: err.code().to_string(),
                message: err.to_string(),
            },
        );
    }

    async fn handle_command(&mut self, cmd: SessionCommand) -> Flow {
        match cmd {
            SessionCommand::Ready {
                connection_id,
                player_id,
            } => self.handle_ready(connection_id, player_id).await,
            SessionCommand::Apply {
                connection_id,
                player_id,
                delta,
            } => self.handle_apply(connection_id, player_id, delta).await,
            SessionCommand::Sync {
                connection_id,
                player_id,
            } => {
                self.handle_sync(connection_id, player_id);
                Flow::Continue
            }
            SessionCommand::Terminate { winner, reason } => {
                self.terminate(winner, reason).await;
                Flow::Stop
            }
        }
    }

    async fn handle_ready(&mut self, connection_id: Uuid, player_id: Uuid) -> Flow {
        if self.participant(player_id).is_none() {
            self.reject(connection_id, &SessionError::NotInMatch);
            return Flow::Continue;
        }

        self.ready.insert(player_id);
        self.registry.subscribe(connection_id, self.match_id);

        self.registry.broadcast_to_match(
            self.match_id,
            &ServerMsg::ReadyAck {
                match_id: self.match_id,
                ready_players: self.ready.len(),
                total_players: self.participants.len(),
            },
        );

        if self.state.is_none() && self.ready.len() == self.participants.len() {
            self.activate().await;
        }
        Flow::Continue
    }

    /// All participants ready: materialize authoritative state, persist
    /// the queued -> active transition and announce the start.
    async fn activate(&mut self) {
        let seed = rand::random::<u64>();
        let participants = self
            .participants
            .iter()
            .map(|p| ParticipantState {
                player_id: p.player_id,
                team: p.team,
                elo: p.elo,
                resources: serde_json::Value::Object(serde_json::Map::new()),
            })
            .collect();

        self.state = Some(MatchState::new(
            self.match_id,
            seed,
            self.rules.phase_seconds,
            participants,
        ));

        if let Err(err) = self.gateway.mark_started(self.match_id, Utc::now()).await {
            error!(match_id = %self.match_id, error = %err, "failed to persist match start");
        }

        self.registry.broadcast_to_match(
            self.match_id,
            &ServerMsg::MatchStart {
                match_id: self.match_id,
                seed,
                rules: self.rules.clone(),
                arena: ARENA.to_string(),
                players: self
                    .participants
                    .iter()
                    .map(|p| ParticipantSummary {
                        player_id: p.player_id,
                        team: p.team,
                    })
                    .collect(),
            },
        );

        info!(match_id = %self.match_id, seed = seed, "match activated");
    }

    async fn handle_apply(
        &mut self,
        connection_id: Uuid,
        player_id: Uuid,
        delta: StateDelta,
    ) -> Flow {
        if self.participant(player_id).is_none() {
            self.reject(connection_id, &SessionError::NotInMatch);
            return Flow::Continue;
        }

        let Some(state) = self.state.as_mut() else {
            self.reject(
                connection_id,
                &SessionError::InvalidAction("match has not started"),
            );
            return Flow::Continue;
        };

        match state.apply_delta(player_id, &delta) {
            Ok(seq) => {
                self.registry.broadcast_to_match(
                    self.match_id,
                    &ServerMsg::StateApply {
                        match_id: self.match_id,
                        seq,
                        from_player: player_id,
                        patch: delta,
                    },
                );

                // An explicit end-phase can wrap past the turn limit
                if state.turn > self.rules.max_turns {
                    self.terminate(None, EndReason::TurnLimit).await;
                    return Flow::Stop;
                }
            }
            Err(ApplyError::InvalidAction(reason)) => {
                self.reject(connection_id, &SessionError::InvalidAction(reason));
            }
            Err(ApplyError::Internal(detail)) => {
                // Never let a bad delta take down the session task
                error!(
                    match_id = %self.match_id,
                    player_id = %player_id,
                    error = %detail,
                    "internal error applying delta"
                );
                self.reject(connection_id, &SessionError::MatchError);
            }
        }
        Flow::Continue
    }

    fn handle_sync(&self, connection_id: Uuid, player_id: Uuid) {
        if self.participant(player_id).is_none() {
            self.reject(connection_id, &SessionError::NotInMatch);
            return;
        }
        let Some(state) = self.state.as_ref() else {
            self.reject(
                connection_id,
                &SessionError::InvalidAction("match has not started"),
            );
            return;
        };
        self.registry.send_to_connection(
            connection_id,
            ServerMsg::SyncSnapshot {
                match_id: self.match_id,
                seq: state.seq,
                full_state: state.snapshot(),
            },
        );
    }

    async fn handle_tick(&mut self) -> Flow {
        let Some(state) = self.state.as_mut() else {
            return Flow::Continue;
        };

        // A timeout advances the phase exactly like an explicit completion,
        // so a stalled player can never block progression.
        state.tick_second();

        self.registry.broadcast_to_match(
            self.match_id,
            &ServerMsg::TimerTick {
                match_id: self.match_id,
                server_timestamp: unix_millis(),
                turn: state.turn,
                phase: state.phase,
                remaining_ms: state.remaining_ms,
            },
        );

        if state.turn > self.rules.max_turns {
            self.terminate(None, EndReason::TurnLimit).await;
            return Flow::Stop;
        }
        Flow::Continue
    }

    /// Terminal transition: persist results, notify subscribers, release
    /// the match channel and drop the state. Runs once; the caller breaks
    /// the run loop right after, which also stops the clock.
    async fn terminate(&mut self, winner: Option<Uuid>, reason: EndReason) {
        let (status, outcomes) = self.final_outcomes(winner, reason);

        if let Err(err) = self
            .gateway
            .finish_match(self.match_id, status, Utc::now(), &outcomes)
            .await
        {
            error!(match_id = %self.match_id, error = %err, "failed to persist match result");
        }

        self.registry.broadcast_to_match(
            self.match_id,
            &ServerMsg::MatchEnd {
                match_id: self.match_id,
                result: MatchResultMsg {
                    winner,
                    reason: reason.as_str().to_string(),
                    rating_changes: outcomes
                        .iter()
                        .map(|o| RatingChange {
                            player_id: o.player_id,
                            delta: o.rating_delta,
                        })
                        .collect(),
                },
                timestamp: unix_millis(),
            },
        );

        self.registry.release_match(self.match_id);
        self.state = None;

        info!(
            match_id = %self.match_id,
            reason = reason.as_str(),
            "match terminated"
        );
    }

    fn final_outcomes(
        &self,
        winner: Option<Uuid>,
        reason: EndReason,
    ) -> (MatchStatus, Vec<ParticipantOutcome>) {
        if reason == EndReason::Forced {
            let outcomes = self
                .participants
                .iter()
                .map(|p| ParticipantOutcome {
                    player_id: p.player_id,
                    result: ParticipantResult::None,
                    rating_delta: 0,
                })
                .collect();
            return (MatchStatus::Cancelled, outcomes);
        }

        let outcomes = self
            .participants
            .iter()
            .map(|p| {
                let opponent_elo = self
                    .participants
                    .iter()
                    .find(|o| o.player_id != p.player_id)
                    .map(|o| o.elo)
                    .unwrap_or(p.elo);
                let (result, score) = match winner {
                    Some(w) if w == p.player_id => (ParticipantResult::Win, 1.0),
                    Some(_) => (ParticipantResult::Loss, 0.0),
                    None => (ParticipantResult::Draw, 0.5),
                };
                ParticipantOutcome {
                    player_id: p.player_id,
                    result,
                    rating_delta: rating_delta(p.elo, opponent_elo, score),
                }
            })
            .collect();
        (MatchStatus::Finished, outcomes)
    }
}

/// Owns every running session: spawns the per-match task at pairing time
/// and routes commands to it by match id.
pub struct MatchEngine {
    registry: Arc<ConnectionRegistry>,
    gateway: Arc<dyn PersistenceGateway>,
    sessions: Arc<DashMap<Uuid, SessionHandle>>,
    rules: MatchRules,
}

impl MatchEngine {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        gateway: Arc<dyn PersistenceGateway>,
        rules: MatchRules,
    ) -> Self {
        Self {
            registry,
            gateway,
            sessions: Arc::new(DashMap::new()),
            rules,
        }
    }

    /// Spawn the session task for a freshly paired match
    pub fn create_session(
        &self,
        record: &MatchRecord,
        participants: Vec<SessionParticipant>,
    ) -> SessionHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let handle = SessionHandle {
            match_id: record.id,
            cmd_tx,
        };

        let session = MatchSession {
            match_id: record.id,
            rules: MatchRules {
                mode: record.mode.clone(),
                phase_seconds: self.rules.phase_seconds,
                max_turns: self.rules.max_turns,
            },
            participants,
            ready: HashSet::new(),
            state: None,
            cmd_rx,
            registry: self.registry.clone(),
            gateway: self.gateway.clone(),
        };

        self.sessions.insert(record.id, handle.clone());

        let sessions = self.sessions.clone();
        let match_id = record.id;
        tokio::spawn(async move {
            session.run().await;
            sessions.remove(&match_id);
            info!(match_id = %match_id, "session removed from engine");
        });

        handle
    }

    /// Handle for a running session, if the match is live
    pub fn session(&self, match_id: Uuid) -> Option<SessionHandle> {
        self.sessions.get(&match_id).map(|h| h.clone())
    }

    /// Force or report a match end (rules layer, admin tooling)
    pub async fn end_match(
        &self,
        match_id: Uuid,
        winner: Option<Uuid>,
        reason: EndReason,
    ) -> Result<(), SessionError> {
        let handle = self.session(match_id).ok_or(SessionError::MatchNotFound)?;
        if !handle
            .send(SessionCommand::Terminate { winner, reason })
            .await
        {
            warn!(match_id = %match_id, "terminate raced with session shutdown");
        }
        Ok(())
    }

    pub fn active_matches(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::gateway::testing::InMemoryGateway;
    use crate::ws::protocol::{Phase, DEFAULT_MODE};
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Fixture {
        engine: MatchEngine,
        gateway: Arc<InMemoryGateway>,
        registry: Arc<ConnectionRegistry>,
        record: MatchRecord,
        players: [(Uuid, Uuid); 2], // (player_id, connection_id)
        rxs: [UnboundedReceiver<ServerMsg>; 2],
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(ConnectionRegistry::new());
        let gateway = Arc::new(InMemoryGateway::new());
        let engine = MatchEngine::new(
            registry.clone(),
            gateway.clone() as Arc<dyn PersistenceGateway>,
            MatchRules {
                mode: DEFAULT_MODE.to_string(),
                phase_seconds: 60,
                max_turns: 30,
            },
        );

        let record = MatchRecord {
            id: Uuid::new_v4(),
            mode: DEFAULT_MODE.to_string(),
            status: MatchStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        };
        gateway
            .matches
            .lock()
            .unwrap()
            .insert(record.id, record.clone());

        let mut players = [(Uuid::nil(), Uuid::nil()); 2];
        let mut rxs = Vec::new();
        for (team, slot) in players.iter_mut().enumerate() {
            let player_id = Uuid::new_v4();
            let connection_id = Uuid::new_v4();
            let (tx, rx) = mpsc::unbounded_channel();
            registry.insert(connection_id, tx);
            registry.register(connection_id, player_id).unwrap();
            gateway
                .participants
                .lock()
                .unwrap()
                .push(crate::store::gateway::ParticipantRecord {
                    match_id: record.id,
                    player_id,
                    team: team as u8,
                    result: ParticipantResult::None,
                    rating_delta: None,
                });
            *slot = (player_id, connection_id);
            rxs.push(rx);
        }
        let rxs: [UnboundedReceiver<ServerMsg>; 2] =
            rxs.try_into().map_err(|_| ()).expect("two receivers");

        Fixture {
            engine,
            gateway,
            registry,
            record,
            players,
            rxs,
        }
    }

    fn spawn_session(fx: &Fixture) -> SessionHandle {
        fx.engine.create_session(
            &fx.record,
            vec![
                SessionParticipant {
                    player_id: fx.players[0].0,
                    team: 0,
                    elo: 1000,
                },
                SessionParticipant {
                    player_id: fx.players[1].0,
                    team: 1,
                    elo: 1050,
                },
            ],
        )
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    fn drain(rx: &mut UnboundedReceiver<ServerMsg>) -> Vec<ServerMsg> {
        let mut messages = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            messages.push(msg);
        }
        messages
    }

    async fn ready_both(fx: &mut Fixture, handle: &SessionHandle) {
        for (player_id, connection_id) in fx.players {
            handle
                .send(SessionCommand::Ready {
                    connection_id,
                    player_id,
                })
                .await;
        }
        settle().await;
    }

    /// The player whose team the seeded state opened with, read from a snapshot
    fn active_player_of(fx: &Fixture, messages: &[ServerMsg]) -> (Uuid, Uuid, u8) {
        let team = messages
            .iter()
            .find_map(|m| match m {
                ServerMsg::SyncSnapshot { full_state, .. } => Some(full_state.active_team),
                _ => None,
            })
            .expect("snapshot with active team");
        let (player_id, connection_id) = fx.players[team as usize];
        (player_id, connection_id, team)
    }

    #[tokio::test(start_paused = true)]
    async fn match_starts_only_when_all_players_ready() {
        let mut fx = fixture();
        let handle = spawn_session(&fx);

        let (p0, c0) = fx.players[0];
        handle
            .send(SessionCommand::Ready {
                connection_id: c0,
                player_id: p0,
            })
            .await;
        settle().await;

        let first = drain(&mut fx.rxs[0]);
        assert!(first
            .iter()
            .any(|m| matches!(m, ServerMsg::ReadyAck { ready_players: 1, total_players: 2, .. })));
        assert!(
            !first.iter().any(|m| matches!(m, ServerMsg::MatchStart { .. })),
            "match must not start with one ready player"
        );

        let (p1, c1) = fx.players[1];
        handle
            .send(SessionCommand::Ready {
                connection_id: c1,
                player_id: p1,
            })
            .await;
        settle().await;

        for rx in fx.rxs.iter_mut() {
            let messages = drain(rx);
            assert!(
                messages
                    .iter()
                    .any(|m| matches!(m, ServerMsg::MatchStart { .. })),
                "both players receive match.start"
            );
        }
        let stored = fx.gateway.matches.lock().unwrap();
        assert_eq!(stored.get(&fx.record.id).unwrap().status, MatchStatus::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn ready_from_stranger_is_rejected_without_broadcast() {
        let mut fx = fixture();
        let handle = spawn_session(&fx);

        let stranger_conn = Uuid::new_v4();
        let (tx, mut stranger_rx) = mpsc::unbounded_channel();
        fx.registry.insert(stranger_conn, tx);
        handle
            .send(SessionCommand::Ready {
                connection_id: stranger_conn,
                player_id: Uuid::new_v4(),
            })
            .await;
        settle().await;

        match stranger_rx.try_recv().unwrap() {
            ServerMsg::Error { code, .. } => assert_eq!(code, "not_in_match"),
            other => panic!("expected error, got {other:?}"),
        }
        assert!(drain(&mut fx.rxs[0]).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn applied_delta_broadcasts_and_rejection_stays_private() {
        let mut fx = fixture();
        let handle = spawn_session(&fx);
        ready_both(&mut fx, &handle).await;

        // discover the active team via snapshot
        let (p0, c0) = fx.players[0];
        handle
            .send(SessionCommand::Sync {
                connection_id: c0,
                player_id: p0,
            })
            .await;
        settle().await;
        let messages = drain(&mut fx.rxs[0]);
        let (acting, acting_conn, team) = active_player_of(&fx, &messages);
        drain(&mut fx.rxs[1]);

        handle
            .send(SessionCommand::Apply {
                connection_id: acting_conn,
                player_id: acting,
                delta: StateDelta::UpdateResources {
                    patch: json!({"mana": 2}),
                },
            })
            .await;
        settle().await;

        for rx in fx.rxs.iter_mut() {
            let messages = drain(rx);
            assert!(
                messages.iter().any(
                    |m| matches!(m, ServerMsg::StateApply { seq: 1, from_player, .. } if *from_player == acting)
                ),
                "delta is broadcast to every subscriber"
            );
        }

        // the waiting player acts out of turn: error to them alone
        let waiting_idx = 1 - team as usize;
        let (waiting, waiting_conn) = fx.players[waiting_idx];
        handle
            .send(SessionCommand::Apply {
                connection_id: waiting_conn,
                player_id: waiting,
                delta: StateDelta::EndPhase,
            })
            .await;
        settle().await;

        let waiting_msgs = drain(&mut fx.rxs[waiting_idx]);
        assert!(waiting_msgs
            .iter()
            .any(|m| matches!(m, ServerMsg::Error { code, .. } if code == "invalid_action")));
        let acting_msgs = drain(&mut fx.rxs[team as usize]);
        assert!(
            !acting_msgs
                .iter()
                .any(|m| matches!(m, ServerMsg::Error { .. })),
            "rejection must not be broadcast"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_reflects_applied_deltas_with_seq() {
        let mut fx = fixture();
        let handle = spawn_session(&fx);
        ready_both(&mut fx, &handle).await;

        let (p0, c0) = fx.players[0];
        handle
            .send(SessionCommand::Sync {
                connection_id: c0,
                player_id: p0,
            })
            .await;
        settle().await;
        let messages = drain(&mut fx.rxs[0]);
        let (acting, acting_conn, _) = active_player_of(&fx, &messages);

        for round in 1..=3u64 {
            handle
                .send(SessionCommand::Apply {
                    connection_id: acting_conn,
                    player_id: acting,
                    delta: StateDelta::UpdateResources {
                        patch: json!({ "mana": round }),
                    },
                })
                .await;
        }
        handle
            .send(SessionCommand::Sync {
                connection_id: c0,
                player_id: p0,
            })
            .await;
        settle().await;

        let messages = drain(&mut fx.rxs[0]);
        let (seq, state) = messages
            .iter()
            .rev()
            .find_map(|m| match m {
                ServerMsg::SyncSnapshot {
                    seq, full_state, ..
                } => Some((*seq, full_state.clone())),
                _ => None,
            })
            .expect("snapshot after deltas");
        assert!(seq >= 3);
        let block = state
            .participants
            .iter()
            .find(|b| b.player_id == acting)
            .unwrap();
        assert_eq!(block.resources, json!({"mana": 3}));
    }

    #[tokio::test(start_paused = true)]
    async fn phase_timer_advances_without_input() {
        let mut fx = fixture();
        let handle = spawn_session(&fx);
        ready_both(&mut fx, &handle).await;
        drain(&mut fx.rxs[0]);

        tokio::time::sleep(Duration::from_secs(61)).await;

        let messages = drain(&mut fx.rxs[0]);
        let ticks: Vec<(u32, Phase)> = messages
            .iter()
            .filter_map(|m| match m {
                ServerMsg::TimerTick { turn, phase, .. } => Some((*turn, *phase)),
                _ => None,
            })
            .collect();
        assert!(ticks.len() >= 60, "one tick per second");
        assert!(
            ticks.iter().any(|(_, phase)| *phase == Phase::Main),
            "phase auto-advanced after the 60s timeout"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn termination_persists_results_and_stops_the_clock() {
        let mut fx = fixture();
        let handle = spawn_session(&fx);
        ready_both(&mut fx, &handle).await;
        drain(&mut fx.rxs[0]);
        drain(&mut fx.rxs[1]);

        let winner = fx.players[0].0;
        fx.engine
            .end_match(fx.record.id, Some(winner), EndReason::Reported)
            .await
            .unwrap();
        settle().await;

        for rx in fx.rxs.iter_mut() {
            let messages = drain(rx);
            assert!(messages.iter().any(|m| matches!(
                m,
                ServerMsg::MatchEnd { result, .. } if result.winner == Some(winner)
            )));
        }

        let stored = fx.gateway.matches.lock().unwrap();
        let record = stored.get(&fx.record.id).unwrap();
        assert_eq!(record.status, MatchStatus::Finished);
        assert!(record.ended_at.is_some());
        drop(stored);

        let participants = fx.gateway.participants.lock().unwrap();
        let winner_row = participants
            .iter()
            .find(|p| p.player_id == winner)
            .unwrap();
        assert_eq!(winner_row.result, ParticipantResult::Win);
        assert!(winner_row.rating_delta.unwrap() > 0);
        drop(participants);

        // the session is gone and no ticks arrive after termination
        settle().await;
        assert!(fx.engine.session(fx.record.id).is_none());
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(
            drain(&mut fx.rxs[0]).is_empty(),
            "no timer ticks after match end"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn ending_unknown_match_is_match_not_found() {
        let fx = fixture();
        let result = fx
            .engine
            .end_match(Uuid::new_v4(), None, EndReason::Forced)
            .await;
        assert!(matches!(result, Err(SessionError::MatchNotFound)));
    }

    #[tokio::test(start_paused = true)]
    async fn forced_end_cancels_without_rating_changes() {
        let mut fx = fixture();
        let handle = spawn_session(&fx);
        ready_both(&mut fx, &handle).await;

        fx.engine
            .end_match(fx.record.id, None, EndReason::Forced)
            .await
            .unwrap();
        settle().await;

        let stored = fx.gateway.matches.lock().unwrap();
        assert_eq!(
            stored.get(&fx.record.id).unwrap().status,
            MatchStatus::Cancelled
        );
        drop(stored);

        let messages = drain(&mut fx.rxs[0]);
        let result = messages
            .iter()
            .find_map(|m| match m {
                ServerMsg::MatchEnd { result, .. } => Some(result.clone()),
                _ => None,
            })
            .expect("match.end broadcast");
        assert_eq!(result.reason, "forced");
        assert!(result.rating_changes.iter().all(|c| c.delta == 0));
    }
}
