//! HTTP surface: health endpoint, WebSocket upgrade and JWT verification

pub mod middleware;
pub mod routes;

pub use routes::build_router;
