//! Engine configuration.
//!
//! Every option can be set on its own; [`WindConfig::validate`] checks the
//! allowed ranges. Configurations round-trip through JSON with camelCase keys:
//!
//! ```json
//! {
//!   "fadeOpacity": 0.996,
//!   "speedFactor": 0.25,
//!   "dropRate": 0.003,
//!   "dropRateBump": 0.01,
//!   "particleCount": 65536,
//!   "colorRamp": { "0.0": "#3288bd", "1.0": "#d53e4f" }
//! }
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::ramp::{ColorRamp, Rgba};

pub const DEFAULT_FADE_OPACITY: f32 = 0.996;
pub const DEFAULT_SPEED_FACTOR: f32 = 0.25;
pub const DEFAULT_DROP_RATE: f32 = 0.003;
pub const DEFAULT_DROP_RATE_BUMP: f32 = 0.01;
pub const DEFAULT_PARTICLE_COUNT: u32 = 16_384;

/// Tunable parameters of the simulation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct WindConfig {
    /// How much of the previous frame survives each frame, in `(0, 1)`.
    pub fade_opacity: f32,
    /// Multiplier on particle velocity, `> 0`.
    pub speed_factor: f32,
    /// Base per-pass probability of resetting a particle, in `[0, 1]`.
    pub drop_rate: f32,
    /// Extra reset probability proportional to normalized speed, `>= 0`.
    pub drop_rate_bump: f32,
    /// Requested number of particles, `> 0`. Rounded up to a square.
    pub particle_count: u32,
    pub color_ramp: ColorRamp,
    /// Seed for particle placement; random when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Clear color of the visible surface; transparent when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background: Option<Rgba>,
}

impl Default for WindConfig {
    fn default() -> Self {
        Self {
            fade_opacity: DEFAULT_FADE_OPACITY,
            speed_factor: DEFAULT_SPEED_FACTOR,
            drop_rate: DEFAULT_DROP_RATE,
            drop_rate_bump: DEFAULT_DROP_RATE_BUMP,
            particle_count: DEFAULT_PARTICLE_COUNT,
            color_ramp: ColorRamp::default(),
            seed: None,
            background: None,
        }
    }
}

pub(crate) fn check_fade_opacity(value: f32) -> Result<f32, ConfigError> {
    if value > 0.0 && value < 1.0 {
        Ok(value)
    } else {
        Err(out_of_range("fadeOpacity", value, "0 < x < 1"))
    }
}

pub(crate) fn check_speed_factor(value: f32) -> Result<f32, ConfigError> {
    if value > 0.0 && value.is_finite() {
        Ok(value)
    } else {
        Err(out_of_range("speedFactor", value, "x > 0"))
    }
}

pub(crate) fn check_drop_rate(value: f32) -> Result<f32, ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(out_of_range("dropRate", value, "0 <= x <= 1"))
    }
}

pub(crate) fn check_drop_rate_bump(value: f32) -> Result<f32, ConfigError> {
    if value >= 0.0 && value.is_finite() {
        Ok(value)
    } else {
        Err(out_of_range("dropRateBump", value, "x >= 0"))
    }
}

pub(crate) fn check_particle_count(value: u32) -> Result<u32, ConfigError> {
    if value > 0 {
        Ok(value)
    } else {
        Err(out_of_range("particleCount", value as f32, "x > 0"))
    }
}

fn out_of_range(option: &'static str, value: f32, expected: &'static str) -> ConfigError {
    ConfigError::OutOfRange {
        option,
        value: value as f64,
        expected,
    }
}

impl WindConfig {
    /// Check every option against its allowed range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_fade_opacity(self.fade_opacity)?;
        check_speed_factor(self.speed_factor)?;
        check_drop_rate(self.drop_rate)?;
        check_drop_rate_bump(self.drop_rate_bump)?;
        check_particle_count(self.particle_count)?;
        Ok(())
    }

    /// Parse and validate a JSON document. Missing keys take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: WindConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn with_fade_opacity(mut self, value: f32) -> Self {
        self.fade_opacity = value;
        self
    }

    pub fn with_speed_factor(mut self, value: f32) -> Self {
        self.speed_factor = value;
        self
    }

    pub fn with_drop_rate(mut self, value: f32) -> Self {
        self.drop_rate = value;
        self
    }

    pub fn with_drop_rate_bump(mut self, value: f32) -> Self {
        self.drop_rate_bump = value;
        self
    }

    pub fn with_particle_count(mut self, count: u32) -> Self {
        self.particle_count = count;
        self
    }

    pub fn with_color_ramp(mut self, ramp: ColorRamp) -> Self {
        self.color_ramp = ramp;
        self
    }

    /// Fix the RNG seed so particle placement is reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_background(mut self, color: Rgba) -> Self {
        self.background = Some(color);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = WindConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.fade_opacity, 0.996);
        assert_eq!(config.speed_factor, 0.25);
        assert_eq!(config.drop_rate, 0.003);
        assert_eq!(config.drop_rate_bump, 0.01);
    }

    #[test]
    fn test_validate_ranges() {
        let bad = [
            WindConfig::default().with_fade_opacity(1.0),
            WindConfig::default().with_fade_opacity(0.0),
            WindConfig::default().with_speed_factor(0.0),
            WindConfig::default().with_drop_rate(1.5),
            WindConfig::default().with_drop_rate_bump(-0.1),
            WindConfig::default().with_particle_count(0),
        ];
        for config in bad {
            assert!(
                matches!(config.validate(), Err(ConfigError::OutOfRange { .. })),
                "{:?} should be rejected",
                config
            );
        }
        assert!(WindConfig::default().with_drop_rate(1.0).validate().is_ok());
        assert!(WindConfig::default().with_drop_rate_bump(0.0).validate().is_ok());
    }

    #[test]
    fn test_json_partial_document() {
        let config = WindConfig::from_json_str(r#"{"speedFactor": 0.5, "seed": 9}"#).unwrap();
        assert_eq!(config.speed_factor, 0.5);
        assert_eq!(config.seed, Some(9));
        assert_eq!(config.fade_opacity, DEFAULT_FADE_OPACITY);
        assert_eq!(config.particle_count, DEFAULT_PARTICLE_COUNT);
    }

    #[test]
    fn test_json_rejects_out_of_range() {
        let err = WindConfig::from_json_str(r#"{"fadeOpacity": 2.0}"#).unwrap_err();
        match err {
            ConfigError::OutOfRange { option, .. } => assert_eq!(option, "fadeOpacity"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_json_round_trip() {
        let config = WindConfig::default()
            .with_particle_count(1024)
            .with_background(Rgba::BLACK);
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"particleCount\":1024"));
        assert!(json.contains("\"colorRamp\""));
        let back = WindConfig::from_json_str(&json).unwrap();
        assert_eq!(back.particle_count, 1024);
        assert_eq!(back.background, Some(Rgba::BLACK));
        assert_eq!(back.color_ramp.rasterize(), config.color_ramp.rasterize());
    }
}
