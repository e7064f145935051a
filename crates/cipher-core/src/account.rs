//! Account derivation from a wallet signature
//!
//! There is no second key pair to manage: the account seed is derived from
//! an EIP-191 signature over a fixed message, so the same wallet always
//! reproduces the same shielded account. The user id is the seed's hashed
//! identity and is what senders embed in identity-bound cipher codes.

use crate::algebra::hashed_identity;
use crate::poseidon::poseidon1;
use crate::Field;
use ark_ff::PrimeField;

/// Message the wallet signs to derive the account
pub const AUTH_MESSAGE: &str =
    "Authentication on Cipher Protocol, sign this message to generate the unique user ID.";

/// Shielded account: the private seed plus its public user id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CipherAccount {
    pub seed: Field,
    pub user_id: Field,
}

impl CipherAccount {
    /// Derive the account from the signature bytes over [`AUTH_MESSAGE`].
    ///
    /// The signature is folded into the field and hashed once more, so the
    /// seed never leaves the field even though signatures are 65 bytes.
    pub fn from_signature(signature: &[u8]) -> Self {
        let seed = poseidon1(Field::from_be_bytes_mod_order(signature));
        Self::from_seed(seed)
    }

    pub fn from_seed(seed: Field) -> Self {
        Self {
            seed,
            user_id: hashed_identity(seed),
        }
    }
}
