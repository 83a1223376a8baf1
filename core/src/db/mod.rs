pub mod memory;
pub mod postgres;

pub use memory::MemoryRelayStore;
pub use postgres::{PostgresRelayStore, create_pool};
