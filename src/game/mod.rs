//! Authoritative match logic: rating math, per-match state and the
//! session engine that owns the running match tasks.

pub mod rating;
pub mod session;
pub mod state;

pub use session::{EndReason, MatchEngine, SessionCommand, SessionError, SessionParticipant};
