//! Process configuration read from the environment.

use std::net::SocketAddr;
use std::str::FromStr;

use crate::dispatch::DispatchConfig;

/// Default listen address.
pub const DEFAULT_ADDR: &str = "127.0.0.1:3000";

/// Longest accepted time window, ten years. Keeps `now - window` and
/// interval deadlines inside the clock's range.
pub const MAX_WINDOW_SECS: i64 = 10 * 365 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// A variable is set but does not parse
    #[error("{var}={value:?} is not a valid {expected}")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Everything `main` needs to start serving.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub dispatch: DispatchConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            dispatch: DispatchConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Read `DISPATCH_*` variables, falling back to defaults for unset ones.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let dispatch = &mut config.dispatch;

        if let Some(addr) = parse(&lookup, "DISPATCH_ADDR", "socket address")? {
            config.addr = addr;
        }
        if let Some(secs) = parse_secs(&lookup, "DISPATCH_STALENESS_SECS")? {
            dispatch.staleness_secs = secs;
        }
        if let Some(secs) = parse_secs(&lookup, "DISPATCH_REQUEST_TTL_SECS")? {
            dispatch.request_ttl_secs = secs;
        }
        if let Some(km) = parse::<f64>(&lookup, "DISPATCH_MATCH_RADIUS_KM", "positive distance")? {
            if !(km > 0.0 && km.is_finite()) {
                return Err(invalid("DISPATCH_MATCH_RADIUS_KM", km, "positive distance"));
            }
            dispatch.match_radius_km = km;
            dispatch.max_match_radius_km = dispatch.max_match_radius_km.max(km);
        }
        if let Some(secs) = parse_secs(&lookup, "DISPATCH_PRUNE_INTERVAL_SECS")? {
            dispatch.prune_interval_secs = secs.unsigned_abs();
        }
        if let Some(secs) = parse_secs(&lookup, "DISPATCH_RIDE_RETENTION_SECS")? {
            dispatch.ride_retention_secs = secs;
        }
        if let Some(value) = lookup("DISPATCH_BROADCAST_FLEET") {
            dispatch.broadcast_fleet_positions = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => return Err(invalid("DISPATCH_BROADCAST_FLEET", value, "boolean")),
            };
        }
        Ok(config)
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    expected: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| invalid(var, value, expected)),
    }
}

/// A time window in whole seconds, `0..=MAX_WINDOW_SECS`.
fn parse_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<i64>, ConfigError> {
    const EXPECTED: &str = "number of seconds";
    match parse::<i64>(lookup, var, EXPECTED)? {
        Some(secs) if !(0..=MAX_WINDOW_SECS).contains(&secs) => Err(invalid(var, secs, EXPECTED)),
        secs => Ok(secs),
    }
}

fn invalid(var: &'static str, value: impl ToString, expected: &'static str) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        expected,
    }
}
