//! Voting configuration
//!
//! Values come from built-in defaults overridden by `FOODSY_`-prefixed
//! environment variables, with `__` separating nested keys:
//!
//! ```text
//! FOODSY_ROUND_MINUTES__MAX=10
//! FOODSY_TOP_K__MODE=fixed
//! FOODSY_TOP_K__K=3
//! FOODSY_INACTIVE_TIMEOUT_MINUTES=45
//! ```

use config::{Config, ConfigError, Environment};
use serde::Deserialize;
use std::time::Duration;

use crate::error::{VotingError, VotingResult};

pub const ENV_PREFIX: &str = "FOODSY";

/// Inclusive bounds and default for a session creation parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Bounds {
    pub min: u32,
    pub max: u32,
    pub default: u32,
}

impl Bounds {
    pub const fn new(min: u32, max: u32, default: u32) -> Self {
        Self { min, max, default }
    }

    /// Apply the default to a missing value and check the bounds
    pub fn resolve(&self, name: &str, value: Option<u32>) -> VotingResult<u32> {
        let value = value.unwrap_or(self.default);
        if value < self.min || value > self.max {
            return Err(VotingError::InvalidConfig(format!(
                "{} must be between {} and {}, got {}",
                name, self.min, self.max, value
            )));
        }

        Ok(value)
    }

    fn validate(&self, name: &str) -> Result<(), String> {
        if self.min == 0 || self.min > self.max {
            return Err(format!("{} bounds {}..={} are invalid", name, self.min, self.max));
        }
        if self.default < self.min || self.default > self.max {
            return Err(format!(
                "{} default {} lies outside {}..={}",
                name, self.default, self.min, self.max
            ));
        }
        Ok(())
    }
}

/// How many round-one restaurants advance to round two
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TopKPolicy {
    /// Always advance `k` restaurants
    Fixed { k: u32 },
    /// Advance `min(cap, participants + bonus)` restaurants
    GroupScaled { cap: u32, bonus: u32 },
}

impl Default for TopKPolicy {
    fn default() -> Self {
        TopKPolicy::GroupScaled { cap: 5, bonus: 2 }
    }
}

impl TopKPolicy {
    /// Finalist count for a session, never more than the available candidates
    pub fn finalist_count(&self, participants: usize, candidates: usize) -> usize {
        let k = match *self {
            TopKPolicy::Fixed { k } => k as usize,
            TopKPolicy::GroupScaled { cap, bonus } => (cap as usize).min(participants + bonus as usize),
        };
        k.min(candidates)
    }
}

/// Deployment-wide voting settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VotingConfig {
    pub pool_size: Bounds,
    pub round_minutes: Bounds,
    pub likes_per_user: Bounds,
    pub top_k: TopKPolicy,
    /// Interval between `timerUpdate` events
    pub timer_tick_ms: u64,
    pub inactive_timeout_minutes: u64,
    pub max_duration_minutes: u64,
    /// Per-session broadcast buffer; slower subscribers skip older events
    pub channel_capacity: usize,
}

impl Default for VotingConfig {
    fn default() -> Self {
        Self {
            pool_size: Bounds::new(2, 20, 10),
            round_minutes: Bounds::new(1, 30, 5),
            likes_per_user: Bounds::new(1, 10, 3),
            top_k: TopKPolicy::default(),
            timer_tick_ms: 1000,
            inactive_timeout_minutes: 30,
            max_duration_minutes: 60,
            channel_capacity: 64,
        }
    }
}

impl VotingConfig {
    /// Load from defaults and `FOODSY_*` environment variables
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_prefix(ENV_PREFIX)
    }

    pub fn load_with_prefix(prefix: &str) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config: Self = Config::builder()
            .set_default("pool_size.min", defaults.pool_size.min)?
            .set_default("pool_size.max", defaults.pool_size.max)?
            .set_default("pool_size.default", defaults.pool_size.default)?
            .set_default("round_minutes.min", defaults.round_minutes.min)?
            .set_default("round_minutes.max", defaults.round_minutes.max)?
            .set_default("round_minutes.default", defaults.round_minutes.default)?
            .set_default("likes_per_user.min", defaults.likes_per_user.min)?
            .set_default("likes_per_user.max", defaults.likes_per_user.max)?
            .set_default("likes_per_user.default", defaults.likes_per_user.default)?
            .set_default("top_k.mode", "group_scaled")?
            .set_default("top_k.cap", 5)?
            .set_default("top_k.bonus", 2)?
            .set_default("top_k.k", 5)?
            .set_default("timer_tick_ms", defaults.timer_tick_ms)?
            .set_default("inactive_timeout_minutes", defaults.inactive_timeout_minutes)?
            .set_default("max_duration_minutes", defaults.max_duration_minutes)?
            .set_default("channel_capacity", defaults.channel_capacity as u64)?
            .add_source(
                Environment::with_prefix(prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate().map_err(ConfigError::Message)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        self.pool_size.validate("pool_size")?;
        self.round_minutes.validate("round_minutes")?;
        self.likes_per_user.validate("likes_per_user")?;

        match self.top_k {
            TopKPolicy::Fixed { k: 0 } => return Err("top_k.k must be at least 1".to_string()),
            TopKPolicy::GroupScaled { cap: 0, .. } => {
                return Err("top_k.cap must be at least 1".to_string());
            }
            _ => {}
        }
        if self.timer_tick_ms == 0 {
            return Err("timer_tick_ms must be greater than 0".to_string());
        }
        if self.inactive_timeout_minutes == 0 || self.max_duration_minutes == 0 {
            return Err("expiry timeouts must be greater than 0".to_string());
        }
        if self.channel_capacity == 0 {
            return Err("channel_capacity must be greater than 0".to_string());
        }

        Ok(())
    }

    pub fn timer_tick(&self) -> Duration {
        Duration::from_millis(self.timer_tick_ms)
    }
}
