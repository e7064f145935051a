//! Commitment and nullifier algebra
//!
//! Pure field math shared by coins, the codec and the sync engine:
//! - `hashed_identity`: poseidon(x), hashes a private salt into a hashed salt
//!   and an account seed into a user id (same map on purpose)
//! - `commitment`: poseidon(amount, identity, random), the tree leaf
//! - `nullifier`: poseidon(commitment, packed path indices, salt)
//! - `pack_path_indices`: the bit packing fed into `nullifier`; frozen, since
//!   changing it would change every nullifier derived from an existing coin

use crate::poseidon::{poseidon1, poseidon3};
use crate::Field;
use alloy_primitives::U256;
use ark_ff::{BigInteger, PrimeField};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AlgebraError {
    #[error("Secret does not hash to the stated identity")]
    KeyMismatch,
    #[error("No secret or identity available")]
    MissingSecret,
}

/// Hash a private value into its public identity.
///
/// Applied to a coin salt this yields the hashed salt stored in commitments;
/// applied to an account seed it yields the user id. Both sides of the
/// protocol rely on these being the same map, so there is one function.
pub fn hashed_identity(secret: Field) -> Field {
    poseidon1(secret)
}

/// Ownership material for a coin.
///
/// A key carries an optional private secret (coin salt or account seed) and
/// an optional public identity (hashed salt or user id). Holding the secret
/// is what makes a coin spendable; holding only the identity still allows
/// re-deriving the commitment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommitmentKey {
    pub secret: Option<Field>,
    pub identity: Option<Field>,
}

impl CommitmentKey {
    pub fn new(secret: Option<Field>, identity: Option<Field>) -> Self {
        Self { secret, identity }
    }

    pub fn from_secret(secret: Field) -> Self {
        Self { secret: Some(secret), identity: None }
    }

    pub fn from_identity(identity: Field) -> Self {
        Self { secret: None, identity: Some(identity) }
    }

    /// Resolve the public identity this key commits under.
    ///
    /// When both halves are present the secret must hash to the stated
    /// identity, otherwise the key is lying about ownership.
    pub fn resolve(&self) -> Result<Field, AlgebraError> {
        match (self.secret, self.identity) {
            (Some(secret), Some(identity)) => {
                if hashed_identity(secret) != identity {
                    return Err(AlgebraError::KeyMismatch);
                }
                Ok(identity)
            }
            (Some(secret), None) => Ok(hashed_identity(secret)),
            (None, Some(identity)) => Ok(identity),
            (None, None) => Err(AlgebraError::MissingSecret),
        }
    }

    /// The private secret, required for nullifier derivation.
    pub fn secret(&self) -> Result<Field, AlgebraError> {
        self.secret.ok_or(AlgebraError::MissingSecret)
    }
}

/// Coin commitment: poseidon(amount, identity, random).
///
/// This is the leaf value inserted into the commitment tree and the value
/// emitted on chain, so the argument order can never change.
pub fn commitment(amount: Field, key: &CommitmentKey, random: Field) -> Result<Field, AlgebraError> {
    Ok(poseidon3(amount, key.resolve()?, random))
}

/// Nullifier: poseidon(commitment, packed path indices, salt).
///
/// Published when a coin is spent. Binding the leaf position in makes the
/// nullifier unique per inserted coin even if two coins share a commitment.
pub fn nullifier(commitment: Field, packed_path_indices: Field, salt: Field) -> Field {
    poseidon3(commitment, packed_path_indices, salt)
}

/// Pack Merkle path directions into a single field element.
///
/// Bit `i` (LSB first) is the direction at level `i`, `true` meaning the
/// running node is the right child. For an append-only tree this equals the
/// leaf index in binary.
pub fn pack_path_indices(indices: &[bool]) -> Field {
    let mut packed = U256::ZERO;
    for (level, bit) in indices.iter().enumerate() {
        if *bit {
            packed |= U256::from(1u8) << level;
        }
    }
    u256_to_field(packed)
}

/// Field element to U256 via big-endian bytes
pub fn field_to_u256(f: Field) -> U256 {
    U256::from_be_slice(&f.into_bigint().to_bytes_be())
}

/// U256 to field element, reducing mod the BN254 prime
pub fn u256_to_field(u: U256) -> Field {
    Field::from_be_bytes_mod_order(&u.to_be_bytes::<32>())
}

/// Field element as exactly 32 big-endian bytes
pub fn field_to_bytes32(f: Field) -> [u8; 32] {
    let bytes = f.into_bigint().to_bytes_be();
    let mut out = [0u8; 32];
    out[32 - bytes.len()..].copy_from_slice(&bytes);
    out
}

/// Uniformly random field element (fresh salts and coin randomness)
pub fn random_field() -> Field {
    use ark_ff::UniformRand;
    Field::rand(&mut rand::thread_rng())
}
