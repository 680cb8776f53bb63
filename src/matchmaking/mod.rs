//! Matchmaking: durable queue operations and the pairing sweep

pub mod service;
pub mod strategy;

pub use service::{MatchmakingService, QueueError};
pub use strategy::{AdjacentPairStrategy, PairingStrategy};
