//! Engine tunables.
//!
//! Every knob has a default, so an empty TOML file (or no file at all)
//! yields a working engine.

use std::path::Path;

use chrono::Duration;
use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Longest segment the normalizer emits; longer provider steps are subdivided.
    pub max_segment_meters: f64,
    /// Used to derive durations when the provider omits them.
    pub walking_speed_kmh: f64,

    /// Slack added to zone radii when looking for zones near a segment (GPS/path error).
    pub hazard_buffer_meters: f64,
    /// Upper bound on zones considered for a single segment (nearest first).
    pub max_zones_per_segment: usize,

    pub crowd_sensing_radius_meters: f64,
    pub crowd_decay_minutes: i64,
    /// Share of a segment's hazard removed per fully-weighted crowd signal.
    pub crowd_discount_fraction: f64,
    pub max_reporter_distance_meters: f64,

    /// Zones older than this are excluded from queries. `None` keeps them forever.
    pub zone_max_age_hours: Option<i64>,
    pub min_user_radius_meters: f64,
    pub max_user_radius_meters: f64,

    /// Strict-safety ceiling as a multiple of the median safety score.
    pub strict_ceiling_factor: f64,
    /// Fixed strict-safety ceiling; overrides the median-based one when set.
    pub strict_ceiling_absolute: Option<f64>,

    pub provider_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_segment_meters: 50.0,
            walking_speed_kmh: 5.0,
            hazard_buffer_meters: 10.0,
            max_zones_per_segment: 50,
            crowd_sensing_radius_meters: 100.0,
            crowd_decay_minutes: 120,
            crowd_discount_fraction: 0.10,
            max_reporter_distance_meters: 100.0,
            zone_max_age_hours: None,
            min_user_radius_meters: 25.0,
            max_user_radius_meters: 150.0,
            strict_ceiling_factor: 1.5,
            strict_ceiling_absolute: None,
            provider_timeout_secs: 10,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    pub fn crowd_decay(&self) -> Duration {
        Duration::minutes(self.crowd_decay_minutes)
    }

    pub fn zone_max_age(&self) -> Option<Duration> {
        self.zone_max_age_hours.map(Duration::hours)
    }

    /// Meters per second at the configured walking speed.
    pub fn walking_speed_mps(&self) -> f64 {
        self.walking_speed_kmh * 1000.0 / 3600.0
    }

    /// Rejects tunables the engine cannot run with. Called on every load and by `HazardModel`.
    pub fn validate(&self) -> Result<()> {
        if !(self.max_segment_meters.is_finite() && self.max_segment_meters > 0.0) {
            return Err(Error::Config("max_segment_meters must be positive".into()));
        }
        if !(self.walking_speed_kmh.is_finite() && self.walking_speed_kmh > 0.0) {
            return Err(Error::Config("walking_speed_kmh must be positive".into()));
        }
        if self.crowd_decay_minutes <= 0 {
            return Err(Error::Config("crowd_decay_minutes must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.crowd_discount_fraction) {
            return Err(Error::Config(
                "crowd_discount_fraction must be within [0, 1]".into(),
            ));
        }
        if self.min_user_radius_meters > self.max_user_radius_meters {
            return Err(Error::Config(
                "min_user_radius_meters exceeds max_user_radius_meters".into(),
            ));
        }
        if self.max_zones_per_segment == 0 {
            return Err(Error::Config("max_zones_per_segment must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        assert_eq!(EngineConfig::from_toml_str("").unwrap(), EngineConfig::default());
    }

    #[test]
    fn partial_toml_overrides_only_named_keys() {
        let config = EngineConfig::from_toml_str(
            "max_segment_meters = 20.0\nzone_max_age_hours = 48\n",
        )
        .unwrap();
        assert_eq!(config.max_segment_meters, 20.0);
        assert_eq!(config.zone_max_age(), Some(Duration::hours(48)));
        assert_eq!(config.crowd_decay(), Duration::minutes(120));
    }

    #[test]
    fn rejects_nonsense_values() {
        assert!(EngineConfig::from_toml_str("max_segment_meters = 0.0").is_err());
        assert!(EngineConfig::from_toml_str("crowd_discount_fraction = 1.5").is_err());
        assert!(EngineConfig::from_toml_str("max_segment_meters = \"far\"").is_err());
    }

    #[test]
    fn in_code_configs_are_validated_too() {
        let zero_speed = EngineConfig {
            walking_speed_kmh: 0.0,
            ..EngineConfig::default()
        };
        assert!(matches!(zero_speed.validate(), Err(Error::Config(_))));
        let infinite_segments = EngineConfig {
            max_segment_meters: f64::INFINITY,
            ..EngineConfig::default()
        };
        assert!(infinite_segments.validate().is_err());
        assert!(EngineConfig::default().validate().is_ok());
    }
}
