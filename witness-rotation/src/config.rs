//! Epoch timing for witness rotation.

/// Controls when elections and switches happen.
///
/// A rotation is due once the chain reaches
/// `last_cycle_block_num + epoch_length`. The election for the next
/// witness set runs `election_distance` blocks before that boundary so the
/// candidate pool has settled by the time the switch executes.
#[derive(Debug, Clone)]
pub struct RotationConfig {
    /// Number of blocks in one epoch.
    /// Default: 250.
    pub epoch_length: u64,

    /// How many blocks before the epoch boundary the election runs.
    /// Must be smaller than `epoch_length`.
    /// Default: 20.
    pub election_distance: u64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            epoch_length: 250,
            election_distance: 20,
        }
    }
}

impl RotationConfig {
    /// Block height at which the epoch that started at `last_cycle` ends.
    pub fn switch_height(&self, last_cycle: u64) -> u64 {
        last_cycle.saturating_add(self.epoch_length)
    }

    /// Block height at which the election for the next epoch runs.
    pub fn election_height(&self, last_cycle: u64) -> u64 {
        self.switch_height(last_cycle)
            .saturating_sub(self.election_distance)
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.epoch_length == 0 {
            return Err(ConfigError::InvalidEpochLength);
        }
        if self.election_distance == 0 || self.election_distance >= self.epoch_length {
            return Err(ConfigError::InvalidElectionDistance {
                distance: self.election_distance,
                epoch_length: self.epoch_length,
            });
        }
        Ok(())
    }
}

/// Errors in rotation configuration.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("epoch_length must be > 0")]
    InvalidEpochLength,
    #[error("election_distance must be in [1, {epoch_length}), got {distance}")]
    InvalidElectionDistance { distance: u64, epoch_length: u64 },
}
