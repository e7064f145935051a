//! Cipher Sync Engine
//!
//! Chain-facing half of the cipher client: keeps a local commitment tree in
//! step with the on-chain pool contract and assembles prover inputs for
//! transactions. The pure cryptography (tree, coins, codes) lives in
//! `cipher-core`; this crate adds transports, retries and state.
//!
//! # Architecture
//!
//! ```text
//! SyncEngine::sync_tree(token)
//!    |
//!    | per-token mutex (at most one sync at a time)
//!    v
//! +----------------------+
//! | Indexer fast path    |  <-- GraphQL subgraph, paginated event query
//! |   merge + root check |  <-- accepted only if local root == contract root
//! +----------------------+
//!    | stale / failed
//!    v
//! +----------------------+
//! | Chain scan           |  <-- NewCommitment logs, batch_size block windows
//! |   retry + jitter     |  <-- 5 attempts per window, 300-800 ms between
//! +----------------------+
//!    |
//!    v
//! merge by leaf index (contiguity checked) -> tree insert -> snapshot
//! ```
//!
//! # Sync Flow
//!
//! 1. Caller asks for a token's tree (`SyncEngine::sync_tree`)
//! 2. Engine locks the token's entry and asks the indexer for every event
//!    since the last synced block
//! 3. The contract's `getTreeRoot` accepts or rejects the indexer result
//! 4. On rejection (or no indexer) the engine scans the chain window by
//!    window under a retry budget
//! 5. Merged events feed the tree; a snapshot goes back to the caller

pub mod config;
pub mod engine;
pub mod indexer;
pub mod retry;
pub mod rpc;
pub mod store;
pub mod tx;

pub use config::{tokens_for_chain, ChainConfig, ConfigError, TokenConfig, DEFAULT_SYNC_BATCH_SIZE};
pub use engine::{CancelFlag, SyncEngine, SyncError};
pub use indexer::{IndexerClient, IndexerError, SubgraphClient};
pub use retry::{retry, RetryPolicy};
pub use rpc::{ChainReader, CommitmentEvent, RpcClient, RpcError};
pub use store::{SyncSource, SyncStatus, TreeCacheItem, TreeSnapshot, TreeStore};
pub use tx::{
    export_cipher_codes, export_filename, generate_cipher_tx, CipherTxPayload, CipherTxRequest,
    ProverPrivateInputs, ProverPublicInputs, PublicInfo, TxError,
};
