//! Persistence gateway modules

pub mod gateway;
pub mod postgrest;

pub use gateway::{PersistenceGateway, PostgrestGateway};
pub use postgrest::PostgrestClient;
