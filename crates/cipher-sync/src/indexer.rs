//! Indexer fast path
//!
//! When a deployment runs a subgraph, the engine asks it for every
//! commitment event in one query instead of scanning the chain window by
//! window. The answer is never trusted on its own: the engine compares the
//! resulting local root against the contract before accepting it, so a
//! stale or corrupt indexer can cost time but not correctness.

use crate::rpc::CommitmentEvent;
use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),
    #[error("GraphQL error: {0}")]
    GraphQl(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// The indexer as the sync engine sees it.
#[async_trait]
pub trait IndexerClient: Send + Sync {
    /// Commitment events for `token` from `from_block` on, ordered by leaf
    /// index.
    async fn fetch_commitment_events(
        &self,
        token: Address,
        from_block: u64,
    ) -> Result<Vec<CommitmentEvent>, IndexerError>;
}

/// Subgraph page size cap
const PAGE_SIZE: usize = 1000;

const NEW_COMMITMENTS_QUERY: &str = r#"
query NewCommitments($token: Bytes!, $fromBlock: BigInt!, $skip: Int!, $first: Int!) {
  newCommitments(
    where: { token: $token, blockNumber_gte: $fromBlock }
    orderBy: leafIndex
    orderDirection: asc
    skip: $skip
    first: $first
  ) {
    token
    newRoot
    commitment
    leafIndex
    blockNumber
  }
}
"#;

/// [`IndexerClient`] over a Graph-protocol subgraph endpoint.
pub struct SubgraphClient {
    url: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<NewCommitmentsData>,
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewCommitmentsData {
    new_commitments: Vec<CommitmentEntity>,
}

/// Subgraphs serialize BigInt fields as decimal strings.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitmentEntity {
    token: String,
    new_root: String,
    commitment: String,
    leaf_index: String,
    block_number: String,
}

impl SubgraphClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            http: reqwest::Client::new(),
        }
    }

    async fn fetch_page(
        &self,
        token: Address,
        from_block: u64,
        skip: usize,
    ) -> Result<Vec<CommitmentEvent>, IndexerError> {
        let body = serde_json::json!({
            "query": NEW_COMMITMENTS_QUERY,
            "variables": {
                "token": format!("{:?}", token),
                "fromBlock": from_block.to_string(),
                "skip": skip,
                "first": PAGE_SIZE,
            },
        });

        let response = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| IndexerError::RequestFailed(e.to_string()))?;
        let parsed: GraphQlResponse = response
            .json()
            .await
            .map_err(|e| IndexerError::RequestFailed(e.to_string()))?;

        if let Some(errors) = parsed.errors {
            let joined = errors
                .into_iter()
                .map(|e| e.message)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(IndexerError::GraphQl(joined));
        }
        let data = parsed
            .data
            .ok_or_else(|| IndexerError::InvalidResponse("missing data".into()))?;
        data.new_commitments.iter().map(convert_entity).collect()
    }
}

#[async_trait]
impl IndexerClient for SubgraphClient {
    async fn fetch_commitment_events(
        &self,
        token: Address,
        from_block: u64,
    ) -> Result<Vec<CommitmentEvent>, IndexerError> {
        let mut events = Vec::new();
        let mut skip = 0;
        loop {
            let page = self.fetch_page(token, from_block, skip).await?;
            let page_len = page.len();
            events.extend(page);
            if page_len < PAGE_SIZE {
                break;
            }
            skip += page_len;
        }
        Ok(events)
    }
}

fn convert_entity(entity: &CommitmentEntity) -> Result<CommitmentEvent, IndexerError> {
    let token = entity
        .token
        .parse::<Address>()
        .map_err(|_| IndexerError::InvalidResponse(format!("bad token address: {}", entity.token)))?;
    Ok(CommitmentEvent {
        token,
        new_root: parse_u256(&entity.new_root)?,
        commitment: parse_u256(&entity.commitment)?,
        leaf_index: entity.leaf_index.parse().map_err(|_| {
            IndexerError::InvalidResponse(format!("bad leaf index: {}", entity.leaf_index))
        })?,
        block_number: entity.block_number.parse().map_err(|_| {
            IndexerError::InvalidResponse(format!("bad block number: {}", entity.block_number))
        })?,
    })
}

fn parse_u256(text: &str) -> Result<U256, IndexerError> {
    text.parse::<U256>()
        .map_err(|_| IndexerError::InvalidResponse(format!("bad uint256: {text}")))
}
