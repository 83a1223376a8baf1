pub mod config;
pub mod db;
pub mod ids;
pub mod store;
pub mod token;

pub use config::RelayConfig;
pub use store::{
    DocumentRecord, Permission, RelayStore, ShareLinkRecord, ShareRecord, VersionRecord,
};
pub use token::{SessionClaims, TokenVerifier};
