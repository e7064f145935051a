//! Coin variants
//!
//! A coin is (amount, ownership, random) committed into the tree. Three
//! shapes exist, and the secrets each one holds decide what it can do:
//!
//! - [`TransferableCoin`]: salt in hand and attached to a tree leaf, can
//!   derive its nullifier and be spent
//! - [`OwnershipCoin`]: knows only the hashed identity; proves a commitment
//!   is addressed to an account but cannot spend. There is no nullifier
//!   method on this type at all.
//! - [`OutputCoin`]: a coin being created by a transaction, not yet in any
//!   tree
//!
//! [`CipherCoin`] is the union for call sites that take any variant.

use crate::algebra::{self, u256_to_field, AlgebraError, CommitmentKey};
use crate::codec::{encode_cipher_code, CipherCodeData};
use crate::poseidon::poseidon3;
use crate::tree::{CipherTree, MerklePath, TreeError};
use crate::Field;
use alloy_primitives::{Address, U256};
use ark_ff::Zero;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoinError {
    #[error("Secret does not hash to the stated identity")]
    KeyMismatch,
    #[error("Spending secret is missing")]
    MissingSecret,
    #[error("Invalid coin key: {0}")]
    InvalidCoinKey(&'static str),
    #[error("Leaf {index} is stale: {reason}")]
    StaleReference { index: u64, reason: &'static str },
    #[error("Coin is for token {expected}, tree is for {actual}")]
    WrongTree { expected: Address, actual: Address },
    #[error("Commitment not present in the tree")]
    UnknownCommitment,
    #[error(transparent)]
    Tree(#[from] TreeError),
}

impl From<AlgebraError> for CoinError {
    fn from(err: AlgebraError) -> Self {
        match err {
            AlgebraError::KeyMismatch => CoinError::KeyMismatch,
            AlgebraError::MissingSecret => CoinError::MissingSecret,
        }
    }
}

/// Raw ownership material as entered or decoded, before validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CoinKey {
    /// Coin salt or account seed, when we hold it
    pub secret: Option<Field>,
    /// Hashed salt or user id
    pub identity: Field,
    pub random: Field,
}

impl CoinKey {
    pub fn from_secret(secret: Field, random: Field) -> Self {
        Self {
            secret: Some(secret),
            identity: algebra::hashed_identity(secret),
            random,
        }
    }

    pub fn from_identity(identity: Field, random: Field) -> Self {
        Self {
            secret: None,
            identity,
            random,
        }
    }
}

/// Key plus value: everything that determines a commitment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CoinInfo {
    pub key: CoinKey,
    pub amount: U256,
}

impl CoinInfo {
    /// Derive the commitment, cross-checking secret against identity.
    pub fn commitment(&self) -> Result<Field, CoinError> {
        let key = CommitmentKey::new(self.key.secret, Some(self.key.identity));
        Ok(algebra::commitment(
            u256_to_field(self.amount),
            &key,
            self.key.random,
        )?)
    }
}

/// The leaf a coin claims must exist and still hold its commitment.
fn verify_leaf(
    tree: &CipherTree,
    token: Address,
    leaf_index: u64,
    commitment: Field,
) -> Result<(), CoinError> {
    if tree.token() != token {
        return Err(CoinError::WrongTree {
            expected: token,
            actual: tree.token(),
        });
    }
    match tree.leaves().get(leaf_index as usize) {
        Some(leaf) if *leaf == commitment => Ok(()),
        Some(_) => Err(CoinError::StaleReference {
            index: leaf_index,
            reason: "leaf no longer holds this commitment",
        }),
        None => Err(CoinError::StaleReference {
            index: leaf_index,
            reason: "leaf index beyond the tree",
        }),
    }
}

/// A spendable coin: salt in hand, attached to a specific tree leaf.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferableCoin {
    token: Address,
    amount: U256,
    salt: Field,
    identity: Field,
    random: Field,
    leaf_index: u64,
}

impl TransferableCoin {
    /// Attach a spendable coin to its leaf in `tree`.
    ///
    /// The salt must be present, hash to the stated identity, and the leaf at
    /// `leaf_index` must hold exactly this coin's commitment.
    pub fn new(info: CoinInfo, tree: &CipherTree, leaf_index: u64) -> Result<Self, CoinError> {
        let salt = match info.key.secret {
            Some(s) if !s.is_zero() => s,
            _ => return Err(CoinError::MissingSecret),
        };
        if algebra::hashed_identity(salt) != info.key.identity {
            return Err(CoinError::KeyMismatch);
        }
        let coin = Self {
            token: tree.token(),
            amount: info.amount,
            salt,
            identity: info.key.identity,
            random: info.key.random,
            leaf_index,
        };
        verify_leaf(tree, coin.token, coin.leaf_index, coin.commitment())?;
        Ok(coin)
    }

    pub fn commitment(&self) -> Field {
        poseidon3(u256_to_field(self.amount), self.identity, self.random)
    }

    /// Authentication path for this coin's leaf, re-checked against the tree
    /// so a reset or diverged tree surfaces as a stale reference instead of a
    /// wrong proof.
    pub fn merkle_path(&self, tree: &CipherTree) -> Result<MerklePath, CoinError> {
        verify_leaf(tree, self.token, self.leaf_index, self.commitment())?;
        Ok(tree.gen_merkle_path(self.leaf_index)?)
    }

    /// Nullifier published when this coin is spent.
    ///
    /// Depends only on the commitment, the leaf position and the salt, so it
    /// stays the same as the tree grows.
    pub fn nullifier(&self, tree: &CipherTree) -> Result<Field, CoinError> {
        let path = self.merkle_path(tree)?;
        Ok(algebra::nullifier(
            self.commitment(),
            path.packed_indices(),
            self.salt,
        ))
    }

    /// Re-export as a salt code (user id slot zero).
    pub fn to_cipher_code(&self) -> String {
        encode_cipher_code(&CipherCodeData {
            token: self.token,
            amount: self.amount,
            salt: self.salt,
            random: self.random,
            user_id: Field::from(0u64),
        })
    }

    pub fn token(&self) -> Address {
        self.token
    }

    pub fn amount(&self) -> U256 {
        self.amount
    }

    pub fn salt(&self) -> Field {
        self.salt
    }

    pub fn random(&self) -> Field {
        self.random
    }

    pub fn leaf_index(&self) -> u64 {
        self.leaf_index
    }
}

/// A receive-only view of a coin addressed to an account.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OwnershipCoin {
    token: Address,
    amount: U256,
    identity: Field,
    random: Field,
    leaf_index: u64,
}

impl OwnershipCoin {
    pub fn new(info: CoinInfo, tree: &CipherTree, leaf_index: u64) -> Result<Self, CoinError> {
        if info.key.identity.is_zero() {
            return Err(CoinError::InvalidCoinKey("identity must be non-zero"));
        }
        if let Some(secret) = info.key.secret {
            if !secret.is_zero() && algebra::hashed_identity(secret) != info.key.identity {
                return Err(CoinError::KeyMismatch);
            }
        }
        let coin = Self {
            token: tree.token(),
            amount: info.amount,
            identity: info.key.identity,
            random: info.key.random,
            leaf_index,
        };
        verify_leaf(tree, coin.token, coin.leaf_index, coin.commitment())?;
        Ok(coin)
    }

    pub fn commitment(&self) -> Field {
        poseidon3(u256_to_field(self.amount), self.identity, self.random)
    }

    pub fn merkle_path(&self, tree: &CipherTree) -> Result<MerklePath, CoinError> {
        verify_leaf(tree, self.token, self.leaf_index, self.commitment())?;
        Ok(tree.gen_merkle_path(self.leaf_index)?)
    }

    /// Re-export as an identity-bound code (salt slot zero).
    pub fn to_cipher_code(&self) -> String {
        encode_cipher_code(&CipherCodeData {
            token: self.token,
            amount: self.amount,
            salt: Field::from(0u64),
            random: self.random,
            user_id: self.identity,
        })
    }

    pub fn token(&self) -> Address {
        self.token
    }

    pub fn amount(&self) -> U256 {
        self.amount
    }

    pub fn identity(&self) -> Field {
        self.identity
    }

    pub fn leaf_index(&self) -> u64 {
        self.leaf_index
    }
}

/// Who can claim an output coin.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputOwner {
    /// Whoever receives the code
    Salt(Field),
    /// Only the account with this user id
    UserId(Field),
}

/// Raw output material as entered or decoded, before validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputCoinInfo {
    pub salt: Field,
    pub user_id: Field,
    pub random: Field,
    pub amount: U256,
}

impl OutputCoinInfo {
    /// Fresh anonymous output with generated salt and randomness.
    pub fn anonymous(amount: U256) -> Self {
        Self {
            salt: algebra::random_field(),
            user_id: Field::from(0u64),
            random: algebra::random_field(),
            amount,
        }
    }

    /// Fresh output bound to `user_id`.
    pub fn bound(amount: U256, user_id: Field) -> Self {
        Self {
            salt: Field::from(0u64),
            user_id,
            random: algebra::random_field(),
            amount,
        }
    }
}

/// A coin being created by a transaction; exists only off chain until the
/// pool appends its commitment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputCoin {
    token: Address,
    amount: U256,
    owner: OutputOwner,
    random: Field,
}

impl OutputCoin {
    /// Validate raw output material: exactly one of salt and user id set,
    /// non-zero randomness.
    pub fn new(info: OutputCoinInfo, token: Address) -> Result<Self, CoinError> {
        if info.random.is_zero() {
            return Err(CoinError::InvalidCoinKey("random must be non-zero"));
        }
        let owner = match (info.salt.is_zero(), info.user_id.is_zero()) {
            (false, true) => OutputOwner::Salt(info.salt),
            (true, false) => OutputOwner::UserId(info.user_id),
            (false, false) => {
                return Err(CoinError::InvalidCoinKey(
                    "salt and user id are mutually exclusive",
                ))
            }
            (true, true) => {
                return Err(CoinError::InvalidCoinKey(
                    "neither salt nor user id is set",
                ))
            }
        };
        Ok(Self {
            token,
            amount: info.amount,
            owner,
            random: info.random,
        })
    }

    /// The identity this output commits under.
    pub fn identity(&self) -> Field {
        match self.owner {
            OutputOwner::Salt(salt) => algebra::hashed_identity(salt),
            OutputOwner::UserId(user_id) => user_id,
        }
    }

    pub fn commitment(&self) -> Field {
        poseidon3(u256_to_field(self.amount), self.identity(), self.random)
    }

    /// The code handed to the receiver.
    pub fn to_cipher_code(&self) -> String {
        let (salt, user_id) = match self.owner {
            OutputOwner::Salt(salt) => (salt, Field::from(0u64)),
            OutputOwner::UserId(user_id) => (Field::from(0u64), user_id),
        };
        encode_cipher_code(&CipherCodeData {
            token: self.token,
            amount: self.amount,
            salt,
            random: self.random,
            user_id,
        })
    }

    pub fn token(&self) -> Address {
        self.token
    }

    pub fn amount(&self) -> U256 {
        self.amount
    }

    pub fn owner(&self) -> OutputOwner {
        self.owner
    }

    pub fn random(&self) -> Field {
        self.random
    }
}

/// Any coin variant, for call sites that only need the shared surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CipherCoin {
    Transferable(TransferableCoin),
    Ownership(OwnershipCoin),
    Output(OutputCoin),
}

impl CipherCoin {
    pub fn commitment(&self) -> Field {
        match self {
            CipherCoin::Transferable(coin) => coin.commitment(),
            CipherCoin::Ownership(coin) => coin.commitment(),
            CipherCoin::Output(coin) => coin.commitment(),
        }
    }

    pub fn amount(&self) -> U256 {
        match self {
            CipherCoin::Transferable(coin) => coin.amount(),
            CipherCoin::Ownership(coin) => coin.amount(),
            CipherCoin::Output(coin) => coin.amount(),
        }
    }

    pub fn token(&self) -> Address {
        match self {
            CipherCoin::Transferable(coin) => coin.token(),
            CipherCoin::Ownership(coin) => coin.token(),
            CipherCoin::Output(coin) => coin.token(),
        }
    }

    pub fn to_cipher_code(&self) -> String {
        match self {
            CipherCoin::Transferable(coin) => coin.to_cipher_code(),
            CipherCoin::Ownership(coin) => coin.to_cipher_code(),
            CipherCoin::Output(coin) => coin.to_cipher_code(),
        }
    }

    pub fn as_transferable(&self) -> Option<&TransferableCoin> {
        match self {
            CipherCoin::Transferable(coin) => Some(coin),
            _ => None,
        }
    }
}

/// Rebuild a coin from a decoded cipher code against a synced tree.
///
/// Salt codes come back [`CipherCoin::Transferable`]. Identity-bound codes
/// come back Transferable when `seed` belongs to the bound account, and
/// [`CipherCoin::Ownership`] when no seed is supplied. A wrong seed fails as
/// a key mismatch rather than producing an unspendable coin.
pub fn coin_from_code(
    data: &CipherCodeData,
    tree: &CipherTree,
    seed: Option<Field>,
) -> Result<CipherCoin, CoinError> {
    if data.token != tree.token() {
        return Err(CoinError::WrongTree {
            expected: data.token,
            actual: tree.token(),
        });
    }
    let key = if !data.salt.is_zero() {
        CoinKey::from_secret(data.salt, data.random)
    } else {
        match seed {
            Some(seed) => CoinKey {
                secret: Some(seed),
                identity: data.user_id,
                random: data.random,
            },
            None => CoinKey::from_identity(data.user_id, data.random),
        }
    };
    let info = CoinInfo {
        key,
        amount: data.amount,
    };
    let commitment = info.commitment()?;
    let leaf_index = tree
        .index_of(&commitment)
        .ok_or(CoinError::UnknownCommitment)?;
    match key.secret {
        Some(_) => Ok(CipherCoin::Transferable(TransferableCoin::new(
            info, tree, leaf_index,
        )?)),
        None => Ok(CipherCoin::Ownership(OwnershipCoin::new(
            info, tree, leaf_index,
        )?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode_cipher_code;

    fn test_token() -> Address {
        Address::repeat_byte(0x42)
    }

    fn spendable_fixture() -> (CipherTree, CoinInfo, u64) {
        let mut tree = CipherTree::new(test_token(), 5).unwrap();
        // unrelated neighbours around the coin under test
        tree.insert(Field::from(111u64)).unwrap();

        let info = CoinInfo {
            key: CoinKey::from_secret(Field::from(7u64), Field::from(13u64)),
            amount: U256::from(500u64),
        };
        let leaf_index = tree.insert(info.commitment().unwrap()).unwrap();
        tree.insert(Field::from(222u64)).unwrap();
        (tree, info, leaf_index)
    }

    #[test]
    fn test_transferable_requires_salt() {
        let (tree, info, leaf_index) = spendable_fixture();

        let mut missing = info;
        missing.key.secret = None;
        assert_eq!(
            TransferableCoin::new(missing, &tree, leaf_index).unwrap_err(),
            CoinError::MissingSecret
        );

        let mut zero = info;
        zero.key.secret = Some(Field::from(0u64));
        assert_eq!(
            TransferableCoin::new(zero, &tree, leaf_index).unwrap_err(),
            CoinError::MissingSecret
        );
    }

    #[test]
    fn test_transferable_detects_key_mismatch() {
        let (tree, info, leaf_index) = spendable_fixture();
        let mut lying = info;
        lying.key.identity = Field::from(12345u64);
        assert_eq!(
            TransferableCoin::new(lying, &tree, leaf_index).unwrap_err(),
            CoinError::KeyMismatch
        );
    }

    #[test]
    fn test_transferable_bound_to_its_leaf() {
        let (tree, info, leaf_index) = spendable_fixture();

        let coin = TransferableCoin::new(info, &tree, leaf_index).unwrap();
        assert_eq!(coin.leaf_index(), leaf_index);
        assert_eq!(coin.commitment(), info.commitment().unwrap());

        // a neighbouring leaf holds a different commitment
        assert!(matches!(
            TransferableCoin::new(info, &tree, 0).unwrap_err(),
            CoinError::StaleReference { .. }
        ));
        // beyond the tree
        assert!(matches!(
            TransferableCoin::new(info, &tree, 99).unwrap_err(),
            CoinError::StaleReference { .. }
        ));
    }

    #[test]
    fn test_stale_reference_after_tree_reset() {
        let (tree, info, leaf_index) = spendable_fixture();
        let coin = TransferableCoin::new(info, &tree, leaf_index).unwrap();

        let fresh = CipherTree::new(test_token(), 5).unwrap();
        assert!(matches!(
            coin.merkle_path(&fresh).unwrap_err(),
            CoinError::StaleReference { .. }
        ));

        let other_token = CipherTree::new(Address::repeat_byte(0x99), 5).unwrap();
        assert!(matches!(
            coin.merkle_path(&other_token).unwrap_err(),
            CoinError::WrongTree { .. }
        ));
    }

    #[test]
    fn test_merkle_path_verifies() {
        let (tree, info, leaf_index) = spendable_fixture();
        let coin = TransferableCoin::new(info, &tree, leaf_index).unwrap();
        let path = coin.merkle_path(&tree).unwrap();
        assert_eq!(path.compute_root(coin.commitment()), tree.root());
    }

    #[test]
    fn test_nullifier_matches_algebra_and_survives_growth() {
        let (mut tree, info, leaf_index) = spendable_fixture();
        let coin = TransferableCoin::new(info, &tree, leaf_index).unwrap();

        let n = coin.nullifier(&tree).unwrap();
        let expected = algebra::nullifier(
            coin.commitment(),
            Field::from(leaf_index),
            coin.salt(),
        );
        assert_eq!(n, expected);

        // appended leaves change the path but not the nullifier
        for i in 0..6u64 {
            tree.insert(Field::from(900 + i)).unwrap();
        }
        assert_eq!(coin.nullifier(&tree).unwrap(), n);
    }

    #[test]
    fn test_ownership_coin_has_no_secret_surface() {
        let mut tree = CipherTree::new(test_token(), 5).unwrap();
        let info = CoinInfo {
            key: CoinKey::from_identity(algebra::hashed_identity(Field::from(9u64)), Field::from(3u64)),
            amount: U256::from(70u64),
        };
        let leaf_index = tree.insert(info.commitment().unwrap()).unwrap();

        let coin = OwnershipCoin::new(info, &tree, leaf_index).unwrap();
        assert_eq!(coin.commitment(), info.commitment().unwrap());

        let path = coin.merkle_path(&tree).unwrap();
        assert_eq!(path.compute_root(coin.commitment()), tree.root());

        // its code is identity-bound
        let decoded = decode_cipher_code(&coin.to_cipher_code()).unwrap();
        assert_eq!(decoded.user_id, coin.identity());
        assert_eq!(decoded.salt, Field::from(0u64));
    }

    #[test]
    fn test_ownership_rejects_zero_identity() {
        let tree = CipherTree::new(test_token(), 5).unwrap();
        let info = CoinInfo {
            key: CoinKey::from_identity(Field::from(0u64), Field::from(3u64)),
            amount: U256::from(70u64),
        };
        assert!(matches!(
            OwnershipCoin::new(info, &tree, 0).unwrap_err(),
            CoinError::InvalidCoinKey(_)
        ));
    }

    #[test]
    fn test_output_coin_validation() {
        let both = OutputCoinInfo {
            salt: Field::from(1u64),
            user_id: Field::from(2u64),
            random: Field::from(3u64),
            amount: U256::from(10u64),
        };
        assert!(matches!(
            OutputCoin::new(both, test_token()).unwrap_err(),
            CoinError::InvalidCoinKey(_)
        ));

        let neither = OutputCoinInfo {
            salt: Field::from(0u64),
            user_id: Field::from(0u64),
            random: Field::from(3u64),
            amount: U256::from(10u64),
        };
        assert!(matches!(
            OutputCoin::new(neither, test_token()).unwrap_err(),
            CoinError::InvalidCoinKey(_)
        ));

        let zero_random = OutputCoinInfo {
            salt: Field::from(1u64),
            user_id: Field::from(0u64),
            random: Field::from(0u64),
            amount: U256::from(10u64),
        };
        assert!(matches!(
            OutputCoin::new(zero_random, test_token()).unwrap_err(),
            CoinError::InvalidCoinKey(_)
        ));

        assert!(OutputCoin::new(OutputCoinInfo::anonymous(U256::from(10u64)), test_token()).is_ok());
        assert!(OutputCoin::new(
            OutputCoinInfo::bound(U256::from(10u64), Field::from(5u64)),
            test_token()
        )
        .is_ok());
    }

    #[test]
    fn test_anonymous_output_round_trips_to_transferable() {
        let output = OutputCoin::new(OutputCoinInfo::anonymous(U256::from(250u64)), test_token())
            .unwrap();

        let mut tree = CipherTree::new(test_token(), 5).unwrap();
        tree.insert(output.commitment()).unwrap();

        let decoded = decode_cipher_code(&output.to_cipher_code()).unwrap();
        let coin = coin_from_code(&decoded, &tree, None).unwrap();

        let transferable = coin.as_transferable().expect("salt code is spendable");
        assert_eq!(transferable.commitment(), output.commitment());
        assert_eq!(transferable.amount(), U256::from(250u64));
        assert_eq!(transferable.leaf_index(), 0);
    }

    #[test]
    fn test_bound_output_recovery_depends_on_seed() {
        let seed = Field::from(77u64);
        let user_id = algebra::hashed_identity(seed);
        let output = OutputCoin::new(
            OutputCoinInfo::bound(U256::from(40u64), user_id),
            test_token(),
        )
        .unwrap();

        let mut tree = CipherTree::new(test_token(), 5).unwrap();
        tree.insert(output.commitment()).unwrap();
        let decoded = decode_cipher_code(&output.to_cipher_code()).unwrap();

        // no seed: receive-only view
        let view = coin_from_code(&decoded, &tree, None).unwrap();
        assert!(matches!(view, CipherCoin::Ownership(_)));
        assert_eq!(view.commitment(), output.commitment());

        // right seed: spendable, salt is the seed
        let spendable = coin_from_code(&decoded, &tree, Some(seed)).unwrap();
        let coin = spendable.as_transferable().unwrap();
        assert_eq!(coin.salt(), seed);
        assert_eq!(coin.commitment(), output.commitment());

        // wrong seed: refuse outright
        assert_eq!(
            coin_from_code(&decoded, &tree, Some(Field::from(78u64))).unwrap_err(),
            CoinError::KeyMismatch
        );
    }

    #[test]
    fn test_recovery_rejects_foreign_token_and_unknown_commitment() {
        let output = OutputCoin::new(OutputCoinInfo::anonymous(U256::from(1u64)), test_token())
            .unwrap();
        let decoded = decode_cipher_code(&output.to_cipher_code()).unwrap();

        let other = CipherTree::new(Address::repeat_byte(0x01), 5).unwrap();
        assert!(matches!(
            coin_from_code(&decoded, &other, None).unwrap_err(),
            CoinError::WrongTree { .. }
        ));

        // right token but the commitment was never synced
        let empty = CipherTree::new(test_token(), 5).unwrap();
        assert_eq!(
            coin_from_code(&decoded, &empty, None).unwrap_err(),
            CoinError::UnknownCommitment
        );
    }

    #[test]
    fn test_union_surface() {
        let output = OutputCoin::new(OutputCoinInfo::anonymous(U256::from(9u64)), test_token())
            .unwrap();
        let coin = CipherCoin::Output(output);
        assert_eq!(coin.amount(), U256::from(9u64));
        assert_eq!(coin.token(), test_token());
        assert_eq!(coin.commitment(), output.commitment());
        assert_eq!(coin.to_cipher_code(), output.to_cipher_code());
        assert!(coin.as_transferable().is_none());
    }
}
