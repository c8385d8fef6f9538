//! Dispatch engine configuration.

use chrono::Duration;

/// Tunable thresholds for matching and staleness.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchConfig {
    /// Driver locations older than this are ignored (seconds).
    pub staleness_secs: i64,

    /// Ride requests older than this are no longer matched (seconds).
    pub request_ttl_secs: i64,

    /// Search radius used when a request does not name one (km).
    pub match_radius_km: f64,

    /// Largest radius a request may ask for (km).
    pub max_match_radius_km: f64,

    /// Movement since the previous update that re-runs matching (km).
    pub rematch_distance_km: f64,

    /// Period of the background sweep of stale locations (seconds).
    pub prune_interval_secs: u64,

    /// How long a completed or cancelled ride stays queryable (seconds).
    pub ride_retention_secs: i64,

    /// Broadcast every fresh driver position to every connection on each
    /// location update. Only sensible for a small fleet.
    pub broadcast_fleet_positions: bool,
}

impl DispatchConfig {
    /// Driver location staleness threshold.
    pub fn staleness(&self) -> Duration {
        Duration::seconds(self.staleness_secs)
    }

    /// Ride request matching eligibility window.
    pub fn request_ttl(&self) -> Duration {
        Duration::seconds(self.request_ttl_secs)
    }

    /// How long finished rides are kept.
    pub fn ride_retention(&self) -> Duration {
        Duration::seconds(self.ride_retention_secs)
    }

    /// Background prune period.
    pub fn prune_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.prune_interval_secs.max(1))
    }

    /// Clamp a requested radius into `(0, max_match_radius_km]`, falling
    /// back to the default when absent.
    pub fn radius_for(&self, requested: Option<f64>) -> f64 {
        match requested {
            Some(r) if r > 0.0 => r.min(self.max_match_radius_km),
            _ => self.match_radius_km,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            staleness_secs: 300, // 5 minutes
            request_ttl_secs: 300,
            match_radius_km: 5.0,
            max_match_radius_km: 50.0,
            rematch_distance_km: 0.1,
            prune_interval_secs: 60,
            ride_retention_secs: 3600,
            broadcast_fleet_positions: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = DispatchConfig::default();

        assert_eq!(config.staleness_secs, 300);
        assert_eq!(config.request_ttl_secs, 300);
        assert_eq!(config.match_radius_km, 5.0);
        assert_eq!(config.max_match_radius_km, 50.0);
        assert_eq!(config.rematch_distance_km, 0.1);
        assert_eq!(config.prune_interval_secs, 60);
        assert_eq!(config.ride_retention_secs, 3600);
        assert!(!config.broadcast_fleet_positions);
    }

    #[test]
    fn duration_methods() {
        let config = DispatchConfig::default();

        assert_eq!(config.staleness(), Duration::minutes(5));
        assert_eq!(config.request_ttl(), Duration::minutes(5));
        assert_eq!(config.ride_retention(), Duration::hours(1));
        assert_eq!(config.prune_interval(), std::time::Duration::from_secs(60));
    }

    #[test]
    fn radius_clamping() {
        let config = DispatchConfig::default();

        assert_eq!(config.radius_for(None), 5.0);
        assert_eq!(config.radius_for(Some(2.0)), 2.0);
        assert_eq!(config.radius_for(Some(500.0)), 50.0);
        assert_eq!(config.radius_for(Some(0.0)), 5.0);
        assert_eq!(config.radius_for(Some(-1.0)), 5.0);
    }
}
