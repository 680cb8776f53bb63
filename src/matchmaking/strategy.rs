//! Pairing strategies for the matchmaking sweep.
//!
//! The sweep feeds a strategy the waiting entries for one mode, oldest
//! first, and commits whatever pairs come back. Keeping selection behind
//! a trait means the transaction logic in the service never changes when
//! the pairing policy does.

use crate::store::gateway::QueueEntry;

/// Selects pairs from the waiting entries of a single mode.
/// Entries arrive ordered by enqueue time, oldest first.
pub trait PairingStrategy: Send + Sync {
    fn select_pairs(&self, waiting: &[QueueEntry]) -> Vec<(QueueEntry, QueueEntry)>;
}

/// Adjacent-pair scan over the queue in enqueue order: two neighbours
/// pair when their ELO gap is within a fixed threshold. An odd or
/// out-of-range player stays queued for the next sweep.
///
/// The threshold does not widen with wait time; whether and how it
/// should is a product decision, which is why this lives behind
/// [`PairingStrategy`].
pub struct AdjacentPairStrategy {
    pub elo_threshold: i32,
}

impl AdjacentPairStrategy {
    pub fn new(elo_threshold: i32) -> Self {
        Self { elo_threshold }
    }
}

impl PairingStrategy for AdjacentPairStrategy {
    fn select_pairs(&self, waiting: &[QueueEntry]) -> Vec<(QueueEntry, QueueEntry)> {
        let mut pairs = Vec::new();
        let mut i = 0;
        while i + 1 < waiting.len() {
            let a = &waiting[i];
            let b = &waiting[i + 1];
            if (a.elo - b.elo).abs() <= self.elo_threshold {
                pairs.push((a.clone(), b.clone()));
                i += 2;
            } else {
                i += 1;
            }
        }
        pairs
    }
}
