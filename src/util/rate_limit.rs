//! Rate limiting utilities

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiter type alias
pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Create a rate limiter with the specified requests per second
pub fn create_limiter(requests_per_second: u32) -> Arc<Limiter> {
    let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));
    Arc::new(RateLimiter::direct(quota))
}

/// Inbound message limit for WebSocket connections (per connection)
pub const MESSAGE_RATE_LIMIT: u32 = 20; // Max 20 messages per second

/// Per-connection rate limiter state
#[derive(Clone)]
pub struct ConnectionRateLimiter {
    message_limiter: Arc<Limiter>,
}

impl ConnectionRateLimiter {
    pub fn new() -> Self {
        Self {
            message_limiter: create_limiter(MESSAGE_RATE_LIMIT),
        }
    }

    /// Check if an inbound message is allowed (returns true if allowed)
    pub fn check_message(&self) -> bool {
        self.message_limiter.check().is_ok()
    }
}

impl Default for ConnectionRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
