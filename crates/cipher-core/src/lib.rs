//! Shielded coin primitives for the Cipher protocol
//!
//! Everything here is client-side: values move on chain as Poseidon
//! commitments inside per-token Merkle trees, and the secrets that make a
//! commitment spendable travel off chain as cipher codes.
//!
//! ```text
//! sender                                   receiver
//!   |                                         |
//!   | OutputCoin::to_cipher_code()            |
//!   +-------------- cipher code ------------->|
//!   |                                         | decode_cipher_code
//!   v                                         | + coin_from_code
//! pool contract --- NewCommitment events ---> CipherTree (per token)
//!                                             |
//!                                             | merkle path + salt
//!                                             v
//!                                         nullifier (spend)
//! ```
//!
//! # Key Components
//!
//! - [`poseidon`]: circom-compatible Poseidon, the only hash in the protocol
//! - [`algebra`]: commitment and nullifier derivations over BN254
//! - [`tree`]: append-only commitment tree with authentication paths
//! - [`coin`]: transferable / ownership / output coin variants
//! - [`codec`]: the fixed-width hex cipher-code transport string
//! - [`account`]: seed and user id derivation from a wallet signature

pub mod account;
pub mod algebra;
pub mod codec;
pub mod coin;
pub mod poseidon;
pub mod tree;

pub use account::{CipherAccount, AUTH_MESSAGE};
pub use algebra::{
    commitment, hashed_identity, nullifier, pack_path_indices, AlgebraError, CommitmentKey,
};
pub use codec::{
    assert_cipher_code, decode_cipher_code, encode_cipher_code, CipherCodeData, CodecError,
    CIPHER_CODE_LENGTH,
};
pub use coin::{
    coin_from_code, CipherCoin, CoinError, CoinInfo, CoinKey, OutputCoin, OutputCoinInfo,
    OutputOwner, OwnershipCoin, TransferableCoin,
};
pub use poseidon::{poseidon1, poseidon2, poseidon3, PoseidonError};
pub use tree::{
    CipherTree, MerklePath, TreeError, DEFAULT_TREE_DEPTH, MAX_TREE_DEPTH, ZERO_HASHES, ZERO_VALUE,
};

/// BN254 scalar field element, the protocol's number type
pub type Field = ark_bn254::Fr;
