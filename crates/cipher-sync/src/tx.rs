//! Transaction assembly
//!
//! Shapes a set of input coins and desired outputs into the structured
//! inputs the prover and the contract call consume: the statement half
//! (root, public amounts, nullifiers, output commitments) and the witness
//! half (amounts, salts, randomness, Merkle paths). Proof generation itself
//! happens behind this boundary.

use alloy_primitives::{Address, U256};
use cipher_core::{CipherTree, CoinError, Field, OutputCoin, TransferableCoin};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TxError {
    #[error("Transaction moves no private value")]
    EmptyTransaction,
    #[error("Balance mismatch: total in {total_in}, total out {total_out}")]
    BalanceMismatch { total_in: U256, total_out: U256 },
    #[error("Coin belongs to a different token (expected {expected})")]
    TokenMismatch { expected: Address },
    #[error(transparent)]
    Coin(#[from] CoinError),
}

/// Contract-call parameters, carried through assembly untouched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PublicInfo {
    pub max_allowable_fee_rate: U256,
    pub recipient: Address,
    pub token: Address,
    pub deadline: u64,
}

/// What the caller wants to move.
#[derive(Clone, Debug)]
pub struct CipherTxRequest {
    pub public_in_amt: U256,
    pub public_out_amt: U256,
    pub private_in_coins: Vec<TransferableCoin>,
    pub private_out_coins: Vec<OutputCoin>,
}

impl CipherTxRequest {
    pub fn total_private_in(&self) -> U256 {
        self.private_in_coins
            .iter()
            .fold(U256::ZERO, |acc, coin| acc + coin.amount())
    }

    pub fn total_private_out(&self) -> U256 {
        self.private_out_coins
            .iter()
            .fold(U256::ZERO, |acc, coin| acc + coin.amount())
    }

    /// Conservation law: public in plus private in equals public out plus
    /// private out. A request touching no private coins is not a cipher
    /// transaction at all.
    pub fn validate(&self) -> Result<(), TxError> {
        if self.private_in_coins.is_empty() && self.private_out_coins.is_empty() {
            return Err(TxError::EmptyTransaction);
        }
        let total_in = self.public_in_amt + self.total_private_in();
        let total_out = self.public_out_amt + self.total_private_out();
        if total_in != total_out {
            return Err(TxError::BalanceMismatch {
                total_in,
                total_out,
            });
        }
        Ok(())
    }
}

/// Statement half: everything the verifier sees.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProverPublicInputs {
    pub root: Field,
    pub public_in_amt: U256,
    pub public_out_amt: U256,
    pub input_nullifiers: Vec<Field>,
    pub output_commitments: Vec<Field>,
}

/// Witness half: never leaves the client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProverPrivateInputs {
    pub in_amounts: Vec<U256>,
    pub in_salts: Vec<Field>,
    pub in_randoms: Vec<Field>,
    pub in_path_elements: Vec<Vec<Field>>,
    pub in_path_indices: Vec<Field>,
    pub out_amounts: Vec<U256>,
    pub out_identities: Vec<Field>,
    pub out_randoms: Vec<Field>,
}

#[derive(Clone, Debug)]
pub struct CipherTxPayload {
    pub public_inputs: ProverPublicInputs,
    pub private_inputs: ProverPrivateInputs,
    pub public_info: PublicInfo,
}

/// Assemble prover inputs for a transaction against the current tree.
///
/// Every input coin is re-verified against its leaf while deriving its path
/// and nullifier, so a tree that moved underneath surfaces as a stale
/// reference here rather than as an invalid proof later.
pub fn generate_cipher_tx(
    tree: &CipherTree,
    request: &CipherTxRequest,
    public_info: PublicInfo,
) -> Result<CipherTxPayload, TxError> {
    request.validate()?;

    let expected = public_info.token;
    if tree.token() != expected {
        return Err(TxError::TokenMismatch { expected });
    }

    let inputs = request.private_in_coins.len();
    let mut input_nullifiers = Vec::with_capacity(inputs);
    let mut in_amounts = Vec::with_capacity(inputs);
    let mut in_salts = Vec::with_capacity(inputs);
    let mut in_randoms = Vec::with_capacity(inputs);
    let mut in_path_elements = Vec::with_capacity(inputs);
    let mut in_path_indices = Vec::with_capacity(inputs);
    for coin in &request.private_in_coins {
        if coin.token() != expected {
            return Err(TxError::TokenMismatch { expected });
        }
        let path = coin.merkle_path(tree)?;
        input_nullifiers.push(coin.nullifier(tree)?);
        in_amounts.push(coin.amount());
        in_salts.push(coin.salt());
        in_randoms.push(coin.random());
        in_path_indices.push(path.packed_indices());
        in_path_elements.push(path.elements);
    }

    let outputs = request.private_out_coins.len();
    let mut output_commitments = Vec::with_capacity(outputs);
    let mut out_amounts = Vec::with_capacity(outputs);
    let mut out_identities = Vec::with_capacity(outputs);
    let mut out_randoms = Vec::with_capacity(outputs);
    for coin in &request.private_out_coins {
        if coin.token() != expected {
            return Err(TxError::TokenMismatch { expected });
        }
        output_commitments.push(coin.commitment());
        out_amounts.push(coin.amount());
        out_identities.push(coin.identity());
        out_randoms.push(coin.random());
    }

    Ok(CipherTxPayload {
        public_inputs: ProverPublicInputs {
            root: tree.root(),
            public_in_amt: request.public_in_amt,
            public_out_amt: request.public_out_amt,
            input_nullifiers,
            output_commitments,
        },
        private_inputs: ProverPrivateInputs {
            in_amounts,
            in_salts,
            in_randoms,
            in_path_elements,
            in_path_indices,
            out_amounts,
            out_identities,
            out_randoms,
        },
        public_info,
    })
}

/// Cipher codes to hand to the receivers, one per private output.
pub fn export_cipher_codes(request: &CipherTxRequest) -> Vec<String> {
    request
        .private_out_coins
        .iter()
        .map(|coin| coin.to_cipher_code())
        .collect()
}

/// File name for a cipher-code export:
/// `cipher-{chain_id}-{symbol}-{salt}-{unix_secs}.txt`. The six-character
/// salt keeps repeated exports within one second distinct.
pub fn export_filename(chain_id: u64, token_symbol: &str) -> String {
    let salt: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect();
    let unix_secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    format!("cipher-{chain_id}-{token_symbol}-{salt}-{unix_secs}.txt")
}

#[cfg(test)]
mod tests {
    use super::*;
    use cipher_core::algebra::random_field;
    use cipher_core::{decode_cipher_code, CoinInfo, CoinKey, OutputCoinInfo};

    fn test_token() -> Address {
        Address::repeat_byte(0x42)
    }

    fn mint_coin(tree: &mut CipherTree, amount: u64) -> TransferableCoin {
        let info = CoinInfo {
            key: CoinKey::from_secret(random_field(), random_field()),
            amount: U256::from(amount),
        };
        let leaf_index = tree.next_index();
        tree.insert(info.commitment().unwrap()).unwrap();
        TransferableCoin::new(info, tree, leaf_index).unwrap()
    }

    fn output_coin(token: Address, amount: u64) -> OutputCoin {
        OutputCoin::new(OutputCoinInfo::anonymous(U256::from(amount)), token).unwrap()
    }

    fn test_public_info(token: Address) -> PublicInfo {
        PublicInfo {
            max_allowable_fee_rate: U256::from(100u64),
            recipient: Address::repeat_byte(0x99),
            token,
            deadline: 1_900_000_000,
        }
    }

    #[test]
    fn test_validate_enforces_balance_law() {
        let mut tree = CipherTree::new(test_token(), 8).unwrap();
        let coin_in = mint_coin(&mut tree, 100);

        let balanced = CipherTxRequest {
            public_in_amt: U256::from(20u64),
            public_out_amt: U256::from(50u64),
            private_in_coins: vec![coin_in],
            private_out_coins: vec![output_coin(test_token(), 70)],
        };
        balanced.validate().unwrap();

        let lopsided = CipherTxRequest {
            public_out_amt: U256::from(51u64),
            ..balanced
        };
        let err = lopsided.validate().unwrap_err();
        match err {
            TxError::BalanceMismatch {
                total_in,
                total_out,
            } => {
                assert_eq!(total_in, U256::from(120u64));
                assert_eq!(total_out, U256::from(121u64));
            }
            other => panic!("expected balance mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_rejects_coinless_request() {
        let request = CipherTxRequest {
            public_in_amt: U256::from(5u64),
            public_out_amt: U256::from(5u64),
            private_in_coins: vec![],
            private_out_coins: vec![],
        };
        assert!(matches!(
            request.validate(),
            Err(TxError::EmptyTransaction)
        ));
    }

    #[test]
    fn test_generate_assembles_both_halves() {
        let mut tree = CipherTree::new(test_token(), 8).unwrap();
        let coin_a = mint_coin(&mut tree, 60);
        let coin_b = mint_coin(&mut tree, 40);
        let out = output_coin(test_token(), 70);

        let request = CipherTxRequest {
            public_in_amt: U256::ZERO,
            public_out_amt: U256::from(30u64),
            private_in_coins: vec![coin_a, coin_b],
            private_out_coins: vec![out],
        };
        let payload =
            generate_cipher_tx(&tree, &request, test_public_info(test_token())).unwrap();

        assert_eq!(payload.public_inputs.root, tree.root());
        assert_eq!(payload.public_inputs.input_nullifiers.len(), 2);
        assert_eq!(
            payload.public_inputs.input_nullifiers[0],
            coin_a.nullifier(&tree).unwrap()
        );
        assert_eq!(
            payload.public_inputs.output_commitments,
            vec![out.commitment()]
        );

        let private = &payload.private_inputs;
        assert_eq!(private.in_amounts, vec![U256::from(60u64), U256::from(40u64)]);
        assert_eq!(private.in_salts, vec![coin_a.salt(), coin_b.salt()]);
        assert_eq!(private.in_path_elements.len(), 2);
        assert_eq!(private.in_path_elements[0].len(), tree.depth());
        assert_eq!(private.out_identities, vec![out.identity()]);

        // witness paths must recombine to the published root; coin_a sits at
        // leaf 0, every direction is left
        let recombined = cipher_core::MerklePath {
            elements: private.in_path_elements[0].clone(),
            indices: vec![false; tree.depth()],
        }
        .compute_root(coin_a.commitment());
        assert_eq!(recombined, payload.public_inputs.root);
    }

    #[test]
    fn test_generate_rejects_foreign_token() {
        let mut tree = CipherTree::new(test_token(), 8).unwrap();
        let coin = mint_coin(&mut tree, 10);
        let request = CipherTxRequest {
            public_in_amt: U256::ZERO,
            public_out_amt: U256::from(10u64),
            private_in_coins: vec![coin],
            private_out_coins: vec![],
        };

        let other = Address::repeat_byte(0x01);
        let err = generate_cipher_tx(&tree, &request, test_public_info(other)).unwrap_err();
        assert!(matches!(err, TxError::TokenMismatch { expected } if expected == other));
    }

    #[test]
    fn test_export_codes_decode_to_outputs() {
        let out_a = output_coin(test_token(), 5);
        let out_b = output_coin(test_token(), 7);
        let request = CipherTxRequest {
            public_in_amt: U256::from(12u64),
            public_out_amt: U256::ZERO,
            private_in_coins: vec![],
            private_out_coins: vec![out_a, out_b],
        };

        let codes = export_cipher_codes(&request);
        assert_eq!(codes.len(), 2);
        let decoded = decode_cipher_code(&codes[1]).unwrap();
        assert_eq!(decoded.token, test_token());
        assert_eq!(decoded.amount, U256::from(7u64));
        assert_eq!(decoded.random, out_b.random());
    }

    #[test]
    fn test_export_filename_shape() {
        let name = export_filename(137, "usdc");
        assert!(name.starts_with("cipher-137-usdc-"));
        assert!(name.ends_with(".txt"));

        let stem = name.strip_suffix(".txt").unwrap();
        let parts: Vec<&str> = stem.split('-').collect();
        assert_eq!(parts.len(), 5);
        assert_eq!(parts[3].len(), 6);
        assert!(parts[3]
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        assert!(parts[4].parse::<u64>().unwrap() > 1_700_000_000);
    }
}
