//! Configuration for playback and the queue

use serde::{Deserialize, Serialize};

/// Playback configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Rate applied to the first session
    pub default_rate: f64,

    /// Slowest accepted playback rate
    pub min_rate: f64,

    /// Fastest accepted playback rate
    pub max_rate: f64,

    /// Clock resolution of the simulated audio output in milliseconds
    pub tick_interval_ms: u64,

    /// Word highlight lookahead at rate 1.0, in seconds
    pub base_lookahead_secs: f64,

    /// Upper bound for the rate-scaled lookahead, in seconds
    pub max_lookahead_secs: f64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            default_rate: 1.0,
            min_rate: 0.5,
            max_rate: 3.0,
            tick_interval_ms: 50,
            base_lookahead_secs: 0.06,
            max_lookahead_secs: 0.2,
        }
    }
}

impl PlaybackConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !self.min_rate.is_finite() || self.min_rate <= 0.0 {
            return Err("min_rate must be positive".to_string());
        }

        if !self.max_rate.is_finite() || self.max_rate < self.min_rate {
            return Err("max_rate must be at least min_rate".to_string());
        }

        if !(self.min_rate..=self.max_rate).contains(&self.default_rate) {
            return Err(format!(
                "default_rate must be between {} and {}",
                self.min_rate, self.max_rate
            ));
        }

        if self.tick_interval_ms == 0 || self.tick_interval_ms > 1000 {
            return Err("tick_interval_ms must be between 1 and 1000".to_string());
        }

        if !self.base_lookahead_secs.is_finite() || self.base_lookahead_secs < 0.0 {
            return Err("base_lookahead_secs cannot be negative".to_string());
        }

        if !self.max_lookahead_secs.is_finite() || self.max_lookahead_secs < self.base_lookahead_secs {
            return Err("max_lookahead_secs must be at least base_lookahead_secs".to_string());
        }

        Ok(())
    }

    /// Clamp a requested rate into the accepted range. Non-finite input gives the default.
    pub fn clamp_rate(&self, rate: f64) -> f64 {
        if rate.is_finite() {
            rate.clamp(self.min_rate, self.max_rate)
        } else {
            self.default_rate
        }
    }
}

/// Queue behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Generate the following item's speech in the background once an item starts
    pub prefetch_next: bool,

    /// Start playing when an item is added to an idle queue
    pub autoplay_on_add: bool,

    /// `previous` restarts the current item when it is further in than this (seconds)
    pub restart_threshold_secs: f64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            prefetch_next: true,
            autoplay_on_add: false,
            restart_threshold_secs: 3.0,
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !self.restart_threshold_secs.is_finite() || self.restart_threshold_secs < 0.0 {
            return Err("restart_threshold_secs cannot be negative".to_string());
        }
        Ok(())
    }
}
