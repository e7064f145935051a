//! Chain and token configuration
//!
//! A deployment is described by a [`ChainConfig`], built in code or read from
//! `CIPHER_*` environment variables. Token metadata lives in [`TokenConfig`];
//! the zero address denotes the chain's native token.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default block window per chain-scan request
pub const DEFAULT_SYNC_BATCH_SIZE: u64 = 1000;

pub const GOERLI: u64 = 5;
pub const ARBITRUM_GOERLI: u64 = 421613;
pub const SCROLL_SEPOLIA: u64 = 534351;
pub const MANTLE_TESTNET: u64 = 5001;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing environment variable {0}")]
    MissingVar(&'static str),
    #[error("Invalid value for {0}")]
    InvalidVar(&'static str),
    #[error("Cipher contract address is not configured")]
    MissingContractAddress,
    #[error("Sync batch size must be non-zero")]
    ZeroBatchSize,
    #[error("Chain id {0} is not supported")]
    UnsupportedChain(u64),
}

/// Per-chain deployment parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    /// Pool contract emitting NewCommitment events
    pub cipher_contract_address: Address,
    /// Block the pool was deployed at; scans never start earlier
    pub start_block: u64,
    /// Indexer endpoint for the fast sync path, if one is deployed
    pub indexer_url: Option<String>,
    /// Block window per chain-scan request
    pub sync_block_batch_size: u64,
    /// Send legacy (pre-EIP-1559) transactions on this chain
    pub legacy_tx: bool,
}

impl ChainConfig {
    pub fn new(chain_id: u64, cipher_contract_address: Address, start_block: u64) -> Self {
        Self {
            chain_id,
            cipher_contract_address,
            start_block,
            indexer_url: None,
            sync_block_batch_size: DEFAULT_SYNC_BATCH_SIZE,
            legacy_tx: false,
        }
    }

    pub fn with_indexer(mut self, url: impl Into<String>) -> Self {
        self.indexer_url = Some(url.into());
        self
    }

    pub fn with_batch_size(mut self, batch_size: u64) -> Self {
        self.sync_block_batch_size = batch_size;
        self
    }

    pub fn with_legacy_tx(mut self) -> Self {
        self.legacy_tx = true;
        self
    }

    /// Preset for a chain the protocol is deployed on. The contract address
    /// and start block are deployment facts the caller supplies; the preset
    /// contributes the chain's transport quirks.
    pub fn for_chain(
        chain_id: u64,
        cipher_contract_address: Address,
        start_block: u64,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::new(chain_id, cipher_contract_address, start_block);
        match chain_id {
            GOERLI | ARBITRUM_GOERLI | MANTLE_TESTNET => {}
            // Scroll Sepolia rejects EIP-1559 transactions
            SCROLL_SEPOLIA => config.legacy_tx = true,
            other => return Err(ConfigError::UnsupportedChain(other)),
        }
        config.validate()?;
        Ok(config)
    }

    /// Read the deployment from `CIPHER_*` environment variables.
    ///
    /// `CIPHER_CHAIN_ID` and `CIPHER_CONTRACT_ADDRESS` are required.
    /// `CIPHER_START_BLOCK`, `CIPHER_INDEXER_URL`, `CIPHER_SYNC_BATCH_SIZE`
    /// and `CIPHER_LEGACY_TX` override their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let chain_id = require_var("CIPHER_CHAIN_ID")?
            .parse()
            .map_err(|_| ConfigError::InvalidVar("CIPHER_CHAIN_ID"))?;
        let contract = require_var("CIPHER_CONTRACT_ADDRESS")?
            .parse()
            .map_err(|_| ConfigError::InvalidVar("CIPHER_CONTRACT_ADDRESS"))?;
        let mut config = Self::new(chain_id, contract, 0);

        if let Ok(value) = std::env::var("CIPHER_START_BLOCK") {
            config.start_block = value
                .parse()
                .map_err(|_| ConfigError::InvalidVar("CIPHER_START_BLOCK"))?;
        }
        if let Ok(value) = std::env::var("CIPHER_INDEXER_URL") {
            if !value.is_empty() {
                config.indexer_url = Some(value);
            }
        }
        if let Ok(value) = std::env::var("CIPHER_SYNC_BATCH_SIZE") {
            config.sync_block_batch_size = value
                .parse()
                .map_err(|_| ConfigError::InvalidVar("CIPHER_SYNC_BATCH_SIZE"))?;
        }
        if let Ok(value) = std::env::var("CIPHER_LEGACY_TX") {
            config.legacy_tx = value == "1" || value.eq_ignore_ascii_case("true");
        }
        config.validate()?;
        Ok(config)
    }

    /// A usable deployment names a real contract and a non-empty scan window.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cipher_contract_address == Address::ZERO {
            return Err(ConfigError::MissingContractAddress);
        }
        if self.sync_block_batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        Ok(())
    }
}

fn require_var(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingVar(name))
}

/// Display and denomination data for a pool token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenConfig {
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
    /// Preset amounts clients offer, in base units
    pub amount_table: Vec<U256>,
}

impl TokenConfig {
    pub fn new(address: Address, symbol: impl Into<String>, decimals: u8) -> Self {
        Self {
            address,
            symbol: symbol.into(),
            decimals,
            amount_table: Vec::new(),
        }
    }

    /// The chain's native token (zero address).
    pub fn native(symbol: impl Into<String>, decimals: u8) -> Self {
        Self::new(Address::ZERO, symbol, decimals)
    }

    pub fn with_amounts(mut self, amounts: impl IntoIterator<Item = U256>) -> Self {
        self.amount_table = amounts.into_iter().collect();
        self
    }

    pub fn is_native(&self) -> bool {
        self.address == Address::ZERO
    }

    /// Scale a whole-token amount into base units.
    pub fn to_base_units(&self, whole: u64) -> U256 {
        U256::from(whole) * U256::from(10u64).pow(U256::from(self.decimals))
    }
}

/// Tokens the pool supports on `chain_id`. Every current deployment pools
/// the chain's native token; amount presets are layered on by the client.
pub fn tokens_for_chain(chain_id: u64) -> Result<Vec<TokenConfig>, ConfigError> {
    match chain_id {
        GOERLI | ARBITRUM_GOERLI | SCROLL_SEPOLIA => Ok(vec![TokenConfig::native("ETH", 18)]),
        MANTLE_TESTNET => Ok(vec![TokenConfig::native("MNT", 18)]),
        other => Err(ConfigError::UnsupportedChain(other)),
    }
}
