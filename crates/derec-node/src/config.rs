//! Node configuration

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{NodeError, Result};

/// Which rule a helper applies before answering a recovery request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecoveryPolicyKind {
    /// Any stored share is returned on request; trust was granted at pairing
    #[default]
    TrustAtPairing,
    /// Shares are returned only while paired with the owner that stored them
    RequirePairedOwner,
}

/// Node configuration
///
/// All durations are milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Name the owner presents in pairing requests
    pub owner_name: String,

    /// Owner re-announce period
    pub announce_interval_ms: u64,

    /// Silence after which a peer is considered offline
    pub offline_threshold_ms: u64,

    /// How often liveness is swept
    pub liveness_check_interval_ms: u64,

    /// Delay before the first verification round
    pub verification_initial_delay_ms: u64,

    /// Period between verification rounds
    pub verification_interval_ms: u64,

    /// Pairing gives up on silent helpers after this long
    pub pairing_timeout_ms: u64,

    /// Protection gives up on missing ACKs after this long
    pub protect_timeout_ms: u64,

    /// Recovery is abandoned after this long
    pub recovery_timeout_ms: u64,

    /// Delay before a helper acknowledges a share
    pub share_ack_delay_ms: u64,

    /// Runtime tick period driving all timers
    pub tick_interval_ms: u64,

    /// Helper-side recovery authorization rule
    pub recovery_policy: RecoveryPolicyKind,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            owner_name: "Owner".to_string(),
            announce_interval_ms: derec_core::ANNOUNCE_INTERVAL_MS,
            offline_threshold_ms: derec_core::OFFLINE_THRESHOLD_MS,
            liveness_check_interval_ms: derec_core::LIVENESS_CHECK_INTERVAL_MS,
            verification_initial_delay_ms: derec_core::VERIFICATION_INITIAL_DELAY_MS,
            verification_interval_ms: derec_core::VERIFICATION_INTERVAL_MS,
            pairing_timeout_ms: derec_core::PAIRING_TIMEOUT_MS,
            protect_timeout_ms: derec_core::PROTECT_TIMEOUT_MS,
            recovery_timeout_ms: derec_core::RECOVERY_TIMEOUT_MS,
            share_ack_delay_ms: derec_core::SHARE_ACK_DELAY_MS,
            tick_interval_ms: 100,
            recovery_policy: RecoveryPolicyKind::default(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject configurations whose timers could never fire
    pub fn validate(&self) -> Result<()> {
        if self.owner_name.trim().is_empty() {
            return Err(NodeError::Config("owner_name must not be empty".to_string()));
        }
        let periods = [
            ("announce_interval_ms", self.announce_interval_ms),
            ("offline_threshold_ms", self.offline_threshold_ms),
            ("liveness_check_interval_ms", self.liveness_check_interval_ms),
            ("verification_interval_ms", self.verification_interval_ms),
            ("tick_interval_ms", self.tick_interval_ms),
        ];
        for (name, value) in periods {
            if value == 0 {
                return Err(NodeError::Config(format!("{} must be greater than zero", name)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_protocol_constants() {
        let config = NodeConfig::default();
        assert_eq!(config.offline_threshold_ms, 15_000);
        assert_eq!(config.announce_interval_ms, 10_000);
        assert_eq!(config.recovery_policy, RecoveryPolicyKind::TrustAtPairing);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("node.json");

        let config = NodeConfig {
            owner_name: "Alice".to_string(),
            recovery_policy: RecoveryPolicyKind::RequirePairedOwner,
            ..NodeConfig::default()
        };
        config.save(&path).unwrap();

        let loaded = NodeConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("node.json");
        std::fs::write(&path, r#"{"owner_name":"Bob","recovery_policy":"require-paired-owner"}"#)
            .unwrap();

        let loaded = NodeConfig::load(&path).unwrap();
        assert_eq!(loaded.owner_name, "Bob");
        assert_eq!(loaded.recovery_policy, RecoveryPolicyKind::RequirePairedOwner);
        assert_eq!(loaded.tick_interval_ms, 100);
    }

    #[test]
    fn test_zero_period_rejected() {
        let config = NodeConfig {
            tick_interval_ms: 0,
            ..NodeConfig::default()
        };
        assert!(matches!(config.validate(), Err(NodeError::Config(_))));
    }
}
