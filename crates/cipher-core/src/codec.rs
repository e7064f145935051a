//! Cipher code transport format
//!
//! A cipher code is the string a sender hands to a receiver off-chain. It
//! carries the full coin preimage in fixed-width hex:
//!
//! ```text
//! "0x" | token (20 bytes) | amount (32) | salt or 0 (32) | random (32) | user id or 0 (32)
//! ```
//!
//! 148 bytes, 298 characters, lowercase, big-endian, zero-padded. Exactly one
//! of salt and user id is set: a salt code is claimable by whoever holds the
//! string, a user-id code only by the account whose id matches.

use crate::algebra::field_to_bytes32;
use crate::Field;
use alloy_primitives::{hex, Address, U256};
use ark_ff::{PrimeField, Zero};
use thiserror::Error;

/// Total string length including the `0x` prefix
pub const CIPHER_CODE_LENGTH: usize = 2 + (20 + 32 * 4) * 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Malformed cipher code: {0}")]
    MalformedCode(&'static str),
}

/// The five fields a cipher code transports.
///
/// Produced by [`decode_cipher_code`] (already validated) and consumed by
/// [`encode_cipher_code`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CipherCodeData {
    pub token: Address,
    pub amount: U256,
    pub salt: Field,
    pub random: Field,
    pub user_id: Field,
}

pub fn encode_cipher_code(data: &CipherCodeData) -> String {
    let mut out = String::with_capacity(CIPHER_CODE_LENGTH);
    out.push_str("0x");
    out.push_str(&hex::encode(data.token.as_slice()));
    out.push_str(&hex::encode(data.amount.to_be_bytes::<32>()));
    out.push_str(&hex::encode(field_to_bytes32(data.salt)));
    out.push_str(&hex::encode(field_to_bytes32(data.random)));
    out.push_str(&hex::encode(field_to_bytes32(data.user_id)));
    out
}

pub fn decode_cipher_code(code: &str) -> Result<CipherCodeData, CodecError> {
    let body = code
        .strip_prefix("0x")
        .ok_or(CodecError::MalformedCode("missing 0x prefix"))?;
    if code.len() != CIPHER_CODE_LENGTH {
        return Err(CodecError::MalformedCode("wrong length"));
    }
    let bytes = hex::decode(body).map_err(|_| CodecError::MalformedCode("invalid hex"))?;

    let token = Address::from_slice(&bytes[0..20]);
    let amount = U256::from_be_slice(&bytes[20..52]);
    let salt = Field::from_be_bytes_mod_order(&bytes[52..84]);
    let random = Field::from_be_bytes_mod_order(&bytes[84..116]);
    let user_id = Field::from_be_bytes_mod_order(&bytes[116..148]);

    if random.is_zero() {
        return Err(CodecError::MalformedCode("zero random"));
    }
    match (salt.is_zero(), user_id.is_zero()) {
        (false, false) => return Err(CodecError::MalformedCode("both salt and user id set")),
        (true, true) => return Err(CodecError::MalformedCode("neither salt nor user id set")),
        _ => {}
    }

    Ok(CipherCodeData {
        token,
        amount,
        salt,
        random,
        user_id,
    })
}

/// Check a decoded code against the receiving context.
///
/// Returns false for a well-formed code that belongs elsewhere: wrong token,
/// or bound to a different user id. Salt codes carry their own secret and
/// skip the identity comparison.
pub fn assert_cipher_code(data: &CipherCodeData, token: Address, user_id: Field) -> bool {
    if data.token != token {
        return false;
    }
    if !data.user_id.is_zero() {
        return data.user_id == user_id;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algebra::hashed_identity;

    fn salt_code() -> CipherCodeData {
        CipherCodeData {
            token: Address::repeat_byte(0xab),
            amount: U256::from(1_000_000u64),
            salt: Field::from(77u64),
            random: Field::from(12345u64),
            user_id: Field::from(0u64),
        }
    }

    fn user_id_code() -> CipherCodeData {
        CipherCodeData {
            token: Address::repeat_byte(0xab),
            amount: U256::from(42u64),
            salt: Field::from(0u64),
            random: Field::from(999u64),
            user_id: hashed_identity(Field::from(5u64)),
        }
    }

    #[test]
    fn test_code_length() {
        assert_eq!(CIPHER_CODE_LENGTH, 298);
        let code = encode_cipher_code(&salt_code());
        assert_eq!(code.len(), CIPHER_CODE_LENGTH);
        assert!(code.starts_with("0x"));
        assert_eq!(code, code.to_lowercase());
    }

    #[test]
    fn test_encoding_layout() {
        let code = encode_cipher_code(&salt_code());
        // token occupies the first 40 hex chars after the prefix
        assert_eq!(&code[2..42], "ab".repeat(20));
        // salt 77 = 0x4d, right-aligned in its 64-char slot
        assert_eq!(&code[106..170], format!("{:0>64}", "4d"));
    }

    #[test]
    fn test_round_trip_salt_code() {
        let data = salt_code();
        let decoded = decode_cipher_code(&encode_cipher_code(&data)).unwrap();
        assert_eq!(decoded, data);
        assert_eq!(encode_cipher_code(&decoded), encode_cipher_code(&data));
    }

    #[test]
    fn test_round_trip_user_id_code() {
        let data = user_id_code();
        let decoded = decode_cipher_code(&encode_cipher_code(&data)).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_decode_rejects_missing_prefix() {
        let code = encode_cipher_code(&salt_code());
        assert!(decode_cipher_code(&code[2..]).is_err());
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        let code = encode_cipher_code(&salt_code());
        assert!(decode_cipher_code(&code[..code.len() - 2]).is_err());
        assert!(decode_cipher_code(&format!("{code}00")).is_err());
    }

    #[test]
    fn test_decode_rejects_non_hex() {
        let mut code = encode_cipher_code(&salt_code());
        code.replace_range(10..12, "zz");
        assert_eq!(
            decode_cipher_code(&code),
            Err(CodecError::MalformedCode("invalid hex"))
        );
    }

    #[test]
    fn test_decode_rejects_zero_random() {
        let mut data = salt_code();
        data.random = Field::from(0u64);
        assert_eq!(
            decode_cipher_code(&encode_cipher_code(&data)),
            Err(CodecError::MalformedCode("zero random"))
        );
    }

    #[test]
    fn test_decode_rejects_ambiguous_ownership() {
        let mut both = salt_code();
        both.user_id = Field::from(8u64);
        assert_eq!(
            decode_cipher_code(&encode_cipher_code(&both)),
            Err(CodecError::MalformedCode("both salt and user id set"))
        );

        let mut neither = salt_code();
        neither.salt = Field::from(0u64);
        assert_eq!(
            decode_cipher_code(&encode_cipher_code(&neither)),
            Err(CodecError::MalformedCode("neither salt nor user id set"))
        );
    }

    #[test]
    fn test_assert_checks_token() {
        let data = salt_code();
        assert!(assert_cipher_code(&data, data.token, Field::from(0u64)));
        assert!(!assert_cipher_code(
            &data,
            Address::repeat_byte(0xcd),
            Field::from(0u64)
        ));
    }

    #[test]
    fn test_assert_checks_user_id_only_for_bound_codes() {
        let data = user_id_code();
        assert!(assert_cipher_code(&data, data.token, data.user_id));
        assert!(!assert_cipher_code(&data, data.token, Field::from(1u64)));

        // salt codes pass regardless of the receiver's id
        let anon = salt_code();
        assert!(assert_cipher_code(&anon, anon.token, Field::from(123u64)));
    }
}
