use crate::error::ConfigError;
use crate::midi::MAX_MIDI_EVENTS;
use serde::{Deserialize, Serialize};

pub const RT_PRIORITY_ENV: &str = "PATCHBAY_RT_PRIORITY";
pub const PROFILE_ENV: &str = "PATCHBAY_PROFILE";

pub fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| {
            let s = v.trim().to_ascii_lowercase();
            s == "1" || s == "true" || s == "yes" || s == "on"
        })
        .unwrap_or(false)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sample_rate: u32,
    /// Frames per cycle.
    pub block_length: usize,
    /// 0 uses one thread per CPU. The render thread counts as one.
    pub render_threads: usize,
    pub realtime_priority: bool,
    /// Capacity of each hardware ring, in blocks.
    pub ring_capacity_blocks: usize,
    pub hw_inputs: usize,
    pub hw_outputs: usize,
    pub profile: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            block_length: 256,
            render_threads: 0,
            realtime_priority: false,
            ring_capacity_blocks: 8,
            hw_inputs: 2,
            hw_outputs: 2,
            profile: false,
        }
    }
}

impl EngineConfig {
    /// Applies `PATCHBAY_*` environment switches on top of the loaded values.
    pub fn with_env_overrides(mut self) -> Self {
        if env_flag(RT_PRIORITY_ENV) {
            self.realtime_priority = true;
        }
        if env_flag(PROFILE_ENV) {
            self.profile = true;
        }
        self
    }

    pub fn threads(&self) -> usize {
        if self.render_threads == 0 {
            num_cpus::get().max(1)
        } else {
            self.render_threads
        }
    }

    pub fn ring_capacity(&self) -> usize {
        self.block_length * self.ring_capacity_blocks.max(2)
    }

    pub fn midi_capacity(&self) -> usize {
        MAX_MIDI_EVENTS
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::Invalid {
                field: "sample_rate",
                reason: "must be positive".to_string(),
            });
        }
        if self.block_length == 0 || self.block_length > 8192 {
            return Err(ConfigError::Invalid {
                field: "block_length",
                reason: format!("{} is not in 1..=8192", self.block_length),
            });
        }
        if self.ring_capacity_blocks == 0 {
            return Err(ConfigError::Invalid {
                field: "ring_capacity_blocks",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}
