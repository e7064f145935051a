//! JSON-RPC chain access
//!
//! [`ChainReader`] is the sync engine's window onto the chain: the current
//! block height, NewCommitment logs for one token in a block range, and the
//! on-chain tree root that serves as the consistency oracle.
//!
//! [`RpcClient`] implements it over plain `eth_*` calls. Log fetches go
//! through `eth_newFilter` + `eth_getFilterLogs` first and fall back to raw
//! `eth_getLogs` when the node answers "method not found" (-32601), which is
//! how most hosted RPC providers behave.

use alloy_primitives::{hex, Address, B256, U256};
use alloy_sol_types::{sol, SolCall, SolEvent};
use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

sol! {
    /// Commitment appended to a token's tree
    event NewCommitment(address indexed token, uint256 newRoot, uint256 commitment, uint256 leafIndex);

    /// Current on-chain root of a token's tree
    function getTreeRoot(address token) external view returns (uint256);
}

/// JSON-RPC "method not found"
const METHOD_NOT_FOUND: i64 = -32601;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl RpcError {
    pub fn is_method_not_found(&self) -> bool {
        matches!(
            self,
            RpcError::Rpc {
                code: METHOD_NOT_FOUND,
                ..
            }
        )
    }
}

/// One decoded NewCommitment emission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitmentEvent {
    pub token: Address,
    pub new_root: U256,
    pub commitment: U256,
    pub leaf_index: u64,
    pub block_number: u64,
}

/// Chain access as the sync engine sees it.
#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn block_number(&self) -> Result<u64, RpcError>;

    /// NewCommitment logs for `token` in `[from_block, to_block]`, ordered as
    /// the node returns them.
    async fn fetch_commitment_logs(
        &self,
        token: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<CommitmentEvent>, RpcError>;

    /// The contract's current root for `token`.
    async fn tree_root(&self, token: Address) -> Result<U256, RpcError>;
}

/// Log object as nodes return it.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: String,
    pub transaction_hash: Option<String>,
    pub log_index: Option<String>,
}

/// [`ChainReader`] over a plain HTTP JSON-RPC endpoint.
pub struct RpcClient {
    rpc_url: String,
    contract: Address,
    http: reqwest::Client,
}

impl RpcClient {
    pub fn new(rpc_url: impl Into<String>, contract: Address) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            contract,
            http: reqwest::Client::new(),
        }
    }

    async fn request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, RpcError> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RpcError::RequestFailed(e.to_string()))?;

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RpcError::RequestFailed(e.to_string()))?;

        if let Some(error) = json.get("error") {
            return Err(RpcError::Rpc {
                code: error.get("code").and_then(|c| c.as_i64()).unwrap_or(0),
                message: error
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown")
                    .to_string(),
            });
        }

        json.get("result")
            .cloned()
            .ok_or_else(|| RpcError::InvalidResponse("missing result".into()))
    }

    fn log_filter(&self, token: Address, from_block: u64, to_block: u64) -> serde_json::Value {
        serde_json::json!({
            "address": format!("{:?}", self.contract),
            "topics": [
                format!("{:?}", NewCommitment::SIGNATURE_HASH),
                format!("{:?}", token.into_word()),
            ],
            "fromBlock": format!("0x{:x}", from_block),
            "toBlock": format!("0x{:x}", to_block),
        })
    }

    async fn filter_logs(
        &self,
        token: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<CommitmentEvent>, RpcError> {
        let filter = self.log_filter(token, from_block, to_block);
        let filter_id = self
            .request("eth_newFilter", serde_json::json!([filter]))
            .await?;
        let filter_id = filter_id
            .as_str()
            .ok_or_else(|| RpcError::InvalidResponse("filter id is not a string".into()))?
            .to_string();

        let result = self
            .request("eth_getFilterLogs", serde_json::json!([filter_id]))
            .await?;
        parse_logs(result)
    }

    async fn raw_logs(
        &self,
        token: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<CommitmentEvent>, RpcError> {
        let filter = self.log_filter(token, from_block, to_block);
        let result = self
            .request("eth_getLogs", serde_json::json!([filter]))
            .await?;
        parse_logs(result)
    }
}

#[async_trait]
impl ChainReader for RpcClient {
    async fn block_number(&self) -> Result<u64, RpcError> {
        let result = self
            .request("eth_blockNumber", serde_json::json!([]))
            .await?;
        let text = result
            .as_str()
            .ok_or_else(|| RpcError::InvalidResponse("block number is not a string".into()))?;
        parse_hex_u64(text)
    }

    async fn fetch_commitment_logs(
        &self,
        token: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<CommitmentEvent>, RpcError> {
        match self.filter_logs(token, from_block, to_block).await {
            Err(err) if err.is_method_not_found() => {
                tracing::warn!("eth_newFilter not supported, falling back to eth_getLogs");
                self.raw_logs(token, from_block, to_block).await
            }
            other => other,
        }
    }

    async fn tree_root(&self, token: Address) -> Result<U256, RpcError> {
        let call = getTreeRootCall { token };
        let params = serde_json::json!([
            {
                "to": format!("{:?}", self.contract),
                "data": format!("0x{}", hex::encode(call.abi_encode())),
            },
            "latest",
        ]);
        let result = self.request("eth_call", params).await?;
        let text = result
            .as_str()
            .ok_or_else(|| RpcError::InvalidResponse("eth_call result is not a string".into()))?;
        let bytes = hex::decode(text.trim_start_matches("0x"))
            .map_err(|_| RpcError::InvalidResponse("eth_call returned invalid hex".into()))?;
        getTreeRootCall::abi_decode_returns(&bytes)
            .map_err(|e| RpcError::InvalidResponse(format!("getTreeRoot return: {e}")))
    }
}

fn parse_logs(result: serde_json::Value) -> Result<Vec<CommitmentEvent>, RpcError> {
    let raw: Vec<RawLog> = serde_json::from_value(result)
        .map_err(|e| RpcError::InvalidResponse(format!("log array: {e}")))?;
    raw.iter().map(parse_commitment_log).collect()
}

fn parse_commitment_log(raw: &RawLog) -> Result<CommitmentEvent, RpcError> {
    let signature: B256 = raw
        .topics
        .first()
        .ok_or_else(|| RpcError::InvalidResponse("log has no topics".into()))?
        .parse()
        .map_err(|_| RpcError::InvalidResponse("bad event signature topic".into()))?;
    if signature != NewCommitment::SIGNATURE_HASH {
        return Err(RpcError::InvalidResponse(
            "unexpected event signature".into(),
        ));
    }

    let token_topic: B256 = raw
        .topics
        .get(1)
        .ok_or_else(|| RpcError::InvalidResponse("missing token topic".into()))?
        .parse()
        .map_err(|_| RpcError::InvalidResponse("bad token topic".into()))?;
    let token = Address::from_slice(&token_topic[12..]);

    let data = hex::decode(raw.data.trim_start_matches("0x"))
        .map_err(|_| RpcError::InvalidResponse("log data is not hex".into()))?;
    if data.len() < 96 {
        return Err(RpcError::InvalidResponse(format!(
            "log data too short: {} bytes",
            data.len()
        )));
    }

    let new_root = U256::from_be_slice(&data[0..32]);
    let commitment = U256::from_be_slice(&data[32..64]);
    let leaf_index = u64::try_from(U256::from_be_slice(&data[64..96]))
        .map_err(|_| RpcError::InvalidResponse("leaf index overflows u64".into()))?;
    let block_number = parse_hex_u64(&raw.block_number)?;

    Ok(CommitmentEvent {
        token,
        new_root,
        commitment,
        leaf_index,
        block_number,
    })
}

fn parse_hex_u64(text: &str) -> Result<u64, RpcError> {
    u64::from_str_radix(text.trim_start_matches("0x"), 16)
        .map_err(|_| RpcError::InvalidResponse(format!("bad hex quantity: {text}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_log(leaf_index: u64) -> RawLog {
        let token = Address::repeat_byte(0x42);
        let mut data = [0u8; 96];
        data[31] = 7; // newRoot
        data[63] = 9; // commitment
        data[88..96].copy_from_slice(&leaf_index.to_be_bytes());
        RawLog {
            address: format!("{:?}", Address::repeat_byte(0x01)),
            topics: vec![
                format!("{:?}", NewCommitment::SIGNATURE_HASH),
                format!("{:?}", token.into_word()),
            ],
            data: format!("0x{}", hex::encode(data)),
            block_number: "0x64".into(),
            transaction_hash: None,
            log_index: Some("0x0".into()),
        }
    }

    #[test]
    fn test_parse_commitment_log() {
        let event = parse_commitment_log(&sample_log(3)).unwrap();
        assert_eq!(event.token, Address::repeat_byte(0x42));
        assert_eq!(event.new_root, U256::from(7u64));
        assert_eq!(event.commitment, U256::from(9u64));
        assert_eq!(event.leaf_index, 3);
        assert_eq!(event.block_number, 100);
    }

    #[test]
    fn test_parse_rejects_foreign_event() {
        let mut log = sample_log(0);
        log.topics[0] = format!("{:?}", B256::repeat_byte(0xff));
        assert!(parse_commitment_log(&log).is_err());
    }

    #[test]
    fn test_parse_rejects_short_data() {
        let mut log = sample_log(0);
        log.data = "0x0011".into();
        assert!(parse_commitment_log(&log).is_err());
    }

    #[test]
    fn test_parse_rejects_bad_block_number() {
        let mut log = sample_log(0);
        log.block_number = "not-hex".into();
        assert!(parse_commitment_log(&log).is_err());
    }

    #[test]
    fn test_method_not_found_detection() {
        let err = RpcError::Rpc {
            code: METHOD_NOT_FOUND,
            message: "the method eth_newFilter does not exist".into(),
        };
        assert!(err.is_method_not_found());

        let other = RpcError::Rpc {
            code: -32000,
            message: "header not found".into(),
        };
        assert!(!other.is_method_not_found());
        assert!(!RpcError::RequestFailed("timeout".into()).is_method_not_found());
    }

    #[test]
    fn test_log_filter_shape() {
        let client = RpcClient::new("http://localhost:8545", Address::repeat_byte(0xcc));
        let filter = client.log_filter(Address::repeat_byte(0x42), 16, 255);

        assert_eq!(filter["fromBlock"], "0x10");
        assert_eq!(filter["toBlock"], "0xff");
        assert_eq!(
            filter["address"],
            format!("{:?}", Address::repeat_byte(0xcc))
        );
        let topics = filter["topics"].as_array().unwrap();
        assert_eq!(topics.len(), 2);
        assert_eq!(topics[0], format!("{:?}", NewCommitment::SIGNATURE_HASH));
    }
}
