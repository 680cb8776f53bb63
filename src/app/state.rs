//! Application state shared across routes

use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::game::MatchEngine;
use crate::matchmaking::{AdjacentPairStrategy, MatchmakingService};
use crate::registry::ConnectionRegistry;
use crate::store::{PersistenceGateway, PostgrestClient, PostgrestGateway};
use crate::ws::protocol::{MatchRules, DEFAULT_MODE};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<ConnectionRegistry>,
    pub engine: Arc<MatchEngine>,
    pub matchmaking: Arc<MatchmakingService>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);

        let registry = Arc::new(ConnectionRegistry::new());

        let gateway: Arc<dyn PersistenceGateway> =
            Arc::new(PostgrestGateway::new(PostgrestClient::new(&config)));

        let engine = Arc::new(MatchEngine::new(
            registry.clone(),
            gateway.clone(),
            MatchRules {
                mode: DEFAULT_MODE.to_string(),
                phase_seconds: config.phase_seconds,
                max_turns: config.max_turns,
            },
        ));

        let matchmaking = Arc::new(MatchmakingService::new(
            gateway,
            registry.clone(),
            engine.clone(),
            Box::new(AdjacentPairStrategy::new(config.elo_threshold)),
            Duration::from_secs(config.pairing_interval_secs),
        ));

        Self {
            config,
            registry,
            engine,
            matchmaking,
        }
    }
}
