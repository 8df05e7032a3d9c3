use serde::{Deserialize, Serialize};

/// Errors raised by [`EnvConfig::validate`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("agent view size must be odd and at least 3, got {0}")]
    InvalidViewSize(usize),
    #[error("max_steps must be positive")]
    ZeroMaxSteps,
    #[error("communication radius must be a positive finite number, got {0}")]
    InvalidCommRadius(f64),
}

/// Static configuration for an episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvConfig {
    /// Side of the square observation window.
    pub agent_view_size: usize,
    /// Episodes end unconditionally after this many ticks.
    pub max_steps: u32,
    /// Skip occlusion and report the whole window as visible.
    pub see_through_walls: bool,
    /// Enables signals, full-grid observations and the sharing overlay.
    pub communication: bool,
    /// Senders must stand strictly closer than this to share.
    pub comm_radius: f64,
    /// Seed for layout generation.
    pub seed: u64,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            agent_view_size: 7,
            max_steps: 100,
            see_through_walls: false,
            communication: false,
            comm_radius: 3.0,
            seed: 1337,
        }
    }
}

impl EnvConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent_view_size < 3 || self.agent_view_size % 2 == 0 {
            return Err(ConfigError::InvalidViewSize(self.agent_view_size));
        }
        if self.max_steps == 0 {
            return Err(ConfigError::ZeroMaxSteps);
        }
        if !self.comm_radius.is_finite() || self.comm_radius <= 0.0 {
            return Err(ConfigError::InvalidCommRadius(self.comm_radius));
        }
        Ok(())
    }
}
