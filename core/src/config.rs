use std::{
    env,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use anyhow::{Context, Result, bail};

/// Relay configuration, resolved once at startup from the process
/// environment. `JWT_SECRET` is the only hard requirement; everything
/// else has a default or is optional.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind_address: SocketAddr,
    pub jwt_secret: String,
    pub redis_url: Option<String>,
    pub database_url: Option<String>,
    pub timings: RelayTimings,
}

/// Timing knobs for the sweeper and the persistence tier. Defaults match
/// production behavior; integration tests shrink them.
#[derive(Debug, Clone, Copy)]
pub struct RelayTimings {
    /// Cadence of the heartbeat/sweeper task.
    pub heartbeat_interval: Duration,
    /// Presence entries older than this are evicted by the sweeper.
    pub heartbeat_timeout: Duration,
    /// Debounced persist delay while the cache tier is ready.
    pub persist_debounce_cache: Duration,
    /// Debounced persist delay when only durable writes remain.
    pub persist_debounce_durable: Duration,
    /// Minimum spacing between durable auto-saves per document.
    pub durable_write_floor: Duration,
}

impl Default for RelayTimings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(10),
            persist_debounce_cache: Duration::from_secs(1),
            persist_debounce_durable: Duration::from_secs(5),
            durable_write_floor: Duration::from_secs(5),
        }
    }
}

impl RelayConfig {
    const PORT_ENV: &'static str = "REALTIME_PORT";
    const JWT_SECRET_ENV: &'static str = "JWT_SECRET";
    const REDIS_URL_ENV: &'static str = "REDIS_URL";
    const DATABASE_URL_ENV: &'static str = "DATABASE_URL";

    const DEFAULT_PORT: u16 = 4001;

    pub fn load() -> Result<Self> {
        let port = match env::var(Self::PORT_ENV) {
            Ok(value) => value
                .trim()
                .parse::<u16>()
                .with_context(|| format!("invalid {name}", name = Self::PORT_ENV))?,
            Err(_) => Self::DEFAULT_PORT,
        };

        let Some(jwt_secret) = read_non_empty(Self::JWT_SECRET_ENV) else {
            bail!("{} must be set", Self::JWT_SECRET_ENV);
        };

        Ok(Self {
            bind_address: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
            jwt_secret,
            redis_url: read_non_empty(Self::REDIS_URL_ENV),
            database_url: read_non_empty(Self::DATABASE_URL_ENV),
            timings: RelayTimings::default(),
        })
    }
}

fn read_non_empty(var: &str) -> Option<String> {
    let value = env::var(var).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timings_match_contract() {
        let timings = RelayTimings::default();
        assert_eq!(timings.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(timings.heartbeat_timeout, Duration::from_secs(10));
        assert_eq!(timings.persist_debounce_cache, Duration::from_secs(1));
        assert_eq!(timings.persist_debounce_durable, Duration::from_secs(5));
        assert_eq!(timings.durable_write_floor, Duration::from_secs(5));
    }
}
