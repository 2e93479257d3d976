//! Engine configuration.

use anyhow::{Context, Result};
use std::time::Duration;
use uuid::Uuid;

/// Configuration for one protocol instance.
///
/// Every field has a default; [`SyncConfig::validate`] runs once at
/// construction and rejects values the engine cannot operate with.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// This node's identifier.
    pub node_id: Uuid,

    /// How often the gossip driver starts a round.
    pub gossip_interval: Duration,

    /// Peers contacted per gossip round.
    pub gossip_fanout: usize,

    /// Inactivity window after which a session times out.
    pub session_timeout: Duration,

    /// Upper bound on concurrently active sessions.
    pub max_concurrent_sessions: usize,

    /// Number of contiguous key ranges in a state digest.
    pub digest_range_count: usize,

    /// Compute a Merkle root over range hashes; a flat hash of their
    /// concatenation when disabled.
    pub enable_merkle_tree: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            node_id: Uuid::new_v4(),
            gossip_interval: Duration::from_secs(5),
            gossip_fanout: 3,
            session_timeout: Duration::from_secs(30),
            max_concurrent_sessions: 5,
            digest_range_count: 16,
            enable_merkle_tree: true,
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A field that must be positive was zero.
    #[error("{field} must be greater than zero")]
    ZeroField {
        /// The offending field name.
        field: &'static str,
    },
}

impl SyncConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroField`] if fanout, session limit, range
    /// count, or an interval is zero.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.gossip_fanout == 0 {
            return Err(ConfigError::ZeroField {
                field: "gossip_fanout",
            });
        }
        if self.max_concurrent_sessions == 0 {
            return Err(ConfigError::ZeroField {
                field: "max_concurrent_sessions",
            });
        }
        if self.digest_range_count == 0 {
            return Err(ConfigError::ZeroField {
                field: "digest_range_count",
            });
        }
        if self.gossip_interval.is_zero() {
            return Err(ConfigError::ZeroField {
                field: "gossip_interval",
            });
        }
        if self.session_timeout.is_zero() {
            return Err(ConfigError::ZeroField {
                field: "session_timeout",
            });
        }
        Ok(())
    }

    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `PEERSYNC_NODE_ID`: node UUID
    /// - `PEERSYNC_GOSSIP_INTERVAL_MS`: gossip round interval
    /// - `PEERSYNC_GOSSIP_FANOUT`: peers per round
    /// - `PEERSYNC_SESSION_TIMEOUT_MS`: session inactivity window
    /// - `PEERSYNC_MAX_SESSIONS`: concurrent session cap
    /// - `PEERSYNC_DIGEST_RANGES`: digest range count
    /// - `PEERSYNC_MERKLE`: "true"/"false"
    ///
    /// # Errors
    ///
    /// Returns error if a variable is malformed or validation fails.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(id) = std::env::var("PEERSYNC_NODE_ID") {
            config.node_id = Uuid::parse_str(&id).context("Invalid PEERSYNC_NODE_ID")?;
        }

        if let Ok(ms) = std::env::var("PEERSYNC_GOSSIP_INTERVAL_MS") {
            let ms: u64 = ms.parse().context("Invalid PEERSYNC_GOSSIP_INTERVAL_MS")?;
            config.gossip_interval = Duration::from_millis(ms);
        }

        if let Ok(fanout) = std::env::var("PEERSYNC_GOSSIP_FANOUT") {
            config.gossip_fanout = fanout.parse().context("Invalid PEERSYNC_GOSSIP_FANOUT")?;
        }

        if let Ok(ms) = std::env::var("PEERSYNC_SESSION_TIMEOUT_MS") {
            let ms: u64 = ms.parse().context("Invalid PEERSYNC_SESSION_TIMEOUT_MS")?;
            config.session_timeout = Duration::from_millis(ms);
        }

        if let Ok(max) = std::env::var("PEERSYNC_MAX_SESSIONS") {
            config.max_concurrent_sessions =
                max.parse().context("Invalid PEERSYNC_MAX_SESSIONS")?;
        }

        if let Ok(ranges) = std::env::var("PEERSYNC_DIGEST_RANGES") {
            config.digest_range_count = ranges.parse().context("Invalid PEERSYNC_DIGEST_RANGES")?;
        }

        if let Ok(merkle) = std::env::var("PEERSYNC_MERKLE") {
            config.enable_merkle_tree = merkle.parse().context("Invalid PEERSYNC_MERKLE")?;
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(SyncConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_fanout_is_rejected() {
        let config = SyncConfig {
            gossip_fanout: 0,
            ..SyncConfig::default()
        };
        assert_eq!(
            config.validate().unwrap_err(),
            ConfigError::ZeroField {
                field: "gossip_fanout"
            }
        );
    }

    #[test]
    fn zero_range_count_is_rejected() {
        let config = SyncConfig {
            digest_range_count: 0,
            ..SyncConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
