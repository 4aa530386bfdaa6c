//! Configuration for the restaking node

use crate::{Error, Result};
use delegation::ClientChainInfo;
use restaking_ledger::{OperatorAddress, StoreBackend, StoreConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Longest client-chain address accepted, in bytes
pub const MAX_ADDRESS_LENGTH: u32 = 4096;

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Store configuration
    pub store: StoreConfig,

    /// Unbonding period in blocks
    pub unbonding_blocks: u64,

    /// Known client chains
    pub client_chains: Vec<ClientChainInfo>,

    /// Operators registered at start-up
    pub operators: Vec<OperatorAddress>,

    /// JSON file of blocks to replay
    pub blocks_file: Option<PathBuf>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            service_name: "restaking-node".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            store: StoreConfig::default(),
            unbonding_blocks: 10,
            client_chains: vec![ClientChainInfo {
                name: "ethereum".to_string(),
                chain_id: 101,
                address_length: 20,
            }],
            operators: vec![],
            blocks_file: None,
        }
    }
}

impl NodeConfig {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: NodeConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = NodeConfig::default();

        if let Ok(data_dir) = std::env::var("RESTAKING_DATA_DIR") {
            config.store.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(backend) = std::env::var("RESTAKING_STORE_BACKEND") {
            config.store.backend = backend
                .parse::<StoreBackend>()
                .map_err(|e| Error::Config(e.to_string()))?;
        }

        if let Ok(blocks) = std::env::var("RESTAKING_UNBONDING_BLOCKS") {
            config.unbonding_blocks = blocks.parse().map_err(|e| {
                Error::Config(format!("Invalid RESTAKING_UNBONDING_BLOCKS '{}': {}", blocks, e))
            })?;
        }

        if let Ok(path) = std::env::var("RESTAKING_BLOCKS_FILE") {
            config.blocks_file = Some(PathBuf::from(path));
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the scheduler cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.unbonding_blocks == 0 {
            return Err(Error::Config(
                "unbonding_blocks must be at least 1".to_string(),
            ));
        }
        if let Some(chain) = self.client_chains.iter().find(|c| c.address_length == 0) {
            return Err(Error::Config(format!(
                "client chain {} has zero address length",
                chain.chain_id
            )));
        }
        // Staker and asset ids hex-encode the address into one key segment
        if let Some(chain) = self
            .client_chains
            .iter()
            .find(|c| c.address_length > MAX_ADDRESS_LENGTH)
        {
            return Err(Error::Config(format!(
                "client chain {} address length {} exceeds {}",
                chain.chain_id, chain.address_length, MAX_ADDRESS_LENGTH
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.service_name, "restaking-node");
        assert_eq!(config.unbonding_blocks, 10);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        config.validate().unwrap();
    }

    #[test]
    fn test_from_file() {
        let operator = OperatorAddress::from_bytes("stake", &[1u8; 20]).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.toml");
        std::fs::write(
            &path,
            format!(
                r#"
                unbonding_blocks = 7
                operators = ["{}"]

                [store]
                backend = "rocksdb"
                data_dir = "/tmp/restaking"

                [[client_chains]]
                name = "sepolia"
                chain_id = 40161
                address_length = 20
                "#,
                operator
            ),
        )
        .unwrap();

        let config = NodeConfig::from_file(&path).unwrap();
        assert_eq!(config.unbonding_blocks, 7);
        assert_eq!(config.operators, vec![operator]);
        assert_eq!(config.store.backend, StoreBackend::RocksDb);
        assert_eq!(config.client_chains[0].chain_id, 40161);
    }

    #[test]
    fn test_rejects_invalid_operator_and_period() {
        let bad_operator: std::result::Result<NodeConfig, _> =
            toml::from_str(r#"operators = ["not-bech32"]"#);
        assert!(bad_operator.is_err());

        let config: NodeConfig = toml::from_str("unbonding_blocks = 0").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_oversized_address_length() {
        let mut config = NodeConfig::default();
        config.client_chains[0].address_length = MAX_ADDRESS_LENGTH;
        config.validate().unwrap();

        config.client_chains[0].address_length = MAX_ADDRESS_LENGTH + 1;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
