pub mod access;
pub mod cache;
pub mod error;
pub mod http;
pub mod metrics;
pub mod persist;
pub mod presence;
pub mod registry;
pub mod room;
pub mod router;
pub mod socket;
pub mod state;
pub mod sweeper;
pub mod testing;

pub use error::RelayError;
pub use state::{AppState, build_state};
