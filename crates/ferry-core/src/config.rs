//! Transfer layer configuration

use serde::{Deserialize, Serialize};

use crate::error::{Result, TransferError};
use crate::{DEFAULT_MAX_TRANSFERS_PER_PEER, MAX_CHUNK_SIZE};

/// Upper bound for `max_transfers_per_peer`; handles encode the slot in 16 bits
const MAX_SLOTS: usize = 0xFFFF;

/// Upper bound for `max_chunk_size`
const CHUNK_SIZE_CEILING: usize = 16 * 1024 * 1024;

/// Transfer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Maximum concurrent transfers per friend and direction
    #[serde(default = "default_max_transfers_per_peer")]
    pub max_transfers_per_peer: usize,

    /// Largest chunk a peer may request or deliver
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,

    /// Capacity of the bounded observer channel
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,
}

fn default_max_transfers_per_peer() -> usize {
    DEFAULT_MAX_TRANSFERS_PER_PEER
}

fn default_max_chunk_size() -> usize {
    MAX_CHUNK_SIZE
}

fn default_event_queue_capacity() -> usize {
    1024
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_transfers_per_peer: default_max_transfers_per_peer(),
            max_chunk_size: default_max_chunk_size(),
            event_queue_capacity: default_event_queue_capacity(),
        }
    }
}

impl TransferConfig {
    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidConfig`] if a limit is zero or out of range.
    pub fn validate(&self) -> Result<()> {
        if self.max_transfers_per_peer == 0 || self.max_transfers_per_peer > MAX_SLOTS {
            return Err(TransferError::invalid_config(
                "max_transfers_per_peer must be between 1 and 65535",
            ));
        }

        if self.max_chunk_size == 0 || self.max_chunk_size > CHUNK_SIZE_CEILING {
            return Err(TransferError::invalid_config(
                "max_chunk_size must be between 1 byte and 16MB",
            ));
        }

        if self.event_queue_capacity == 0 {
            return Err(TransferError::invalid_config(
                "event_queue_capacity must be at least 1",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = TransferConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_transfers_per_peer, 256);
        assert_eq!(config.max_chunk_size, MAX_CHUNK_SIZE);
    }

    #[test]
    fn test_invalid_limits() {
        let config = TransferConfig {
            max_transfers_per_peer: 0,
            ..TransferConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TransferError::InvalidConfig(_))
        ));

        let config = TransferConfig {
            max_transfers_per_peer: 70_000,
            ..TransferConfig::default()
        };
        assert!(config.validate().is_err());

        let config = TransferConfig {
            max_chunk_size: 0,
            ..TransferConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: TransferConfig = serde_json::from_str(r#"{"max_chunk_size": 4096}"#).unwrap();
        assert_eq!(config.max_chunk_size, 4096);
        assert_eq!(config.max_transfers_per_peer, 256);
        assert_eq!(config.event_queue_capacity, 1024);
    }
}
