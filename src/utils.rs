//! Field conversions, Poseidon hashing and hex validation helpers.

use anyhow::Result;
use halo2_gadgets::poseidon::primitives::{
    self as poseidon, ConstantLength, P128Pow5T3 as PoseidonSpec,
};
use pasta_curves::group::ff::PrimeField;
use pasta_curves::pallas;
use sha3::{Digest, Keccak256, Sha3_256};

fn is_valid_hex_string(s: &str) -> bool {
    s.chars().all(|c| c.is_ascii_hexdigit())
}

fn strip_hex_prefix(input: &str) -> &str {
    input
        .trim()
        .strip_prefix("0x")
        .or_else(|| input.trim().strip_prefix("0X"))
        .unwrap_or_else(|| input.trim())
}

/// Validates and strips hex prefix from a string.
///
/// # Errors
/// Returns an error if:
/// - The hex string has incorrect length
/// - The hex string contains non-hex characters
///
/// # Examples
///
/// ```
/// use zkp_claim_rollup::utils::validate_and_strip_hex;
///
/// let result = validate_and_strip_hex("0x1234abcd", 8).unwrap();
/// assert_eq!(result, "1234abcd");
/// ```
pub fn validate_and_strip_hex(input: &str, expected_len: usize) -> Result<String> {
    let stripped = strip_hex_prefix(input);

    if stripped.len() != expected_len {
        return Err(anyhow::anyhow!(
            "Invalid hex string: must be {} characters (got {})",
            expected_len,
            stripped.len()
        ));
    }

    if !is_valid_hex_string(stripped) {
        return Err(anyhow::anyhow!(
            "Invalid hex string: contains non-hex characters"
        ));
    }

    Ok(stripped.to_string())
}

const BASE_U64: u64 = 256;

/// Converts 32 big-endian bytes to a Pallas base field element.
///
/// The bytes are read as a base-256 number and reduced modulo the field
/// order, so any 32-byte string maps to some element.
#[inline]
#[must_use]
pub fn bytes_to_field(bytes: &[u8; 32]) -> pallas::Base {
    let mut value = pallas::Base::zero();
    let base = pallas::Base::from(BASE_U64);

    for &byte in bytes.iter() {
        value = value * base + pallas::Base::from(byte as u64);
    }

    value
}

/// Converts a field element to its canonical 32-byte big-endian encoding.
///
/// Inverse of [`bytes_to_field`] for canonical inputs.
#[inline]
#[must_use]
pub fn field_to_bytes(field: pallas::Base) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    let repr = field.to_repr();
    bytes.copy_from_slice(repr.as_ref());
    bytes.reverse();
    bytes
}

/// Parses canonical big-endian bytes, rejecting values at or above the
/// field modulus.
#[must_use]
pub fn canonical_field(bytes: &[u8; 32]) -> Option<pallas::Base> {
    let mut repr = *bytes;
    repr.reverse();
    Option::from(pallas::Base::from_repr(repr))
}

/// Poseidon hash of two field elements using the `P128Pow5T3` parameters.
///
/// # Example
///
/// ```
/// use zkp_claim_rollup::utils::poseidon_hash;
/// use pasta_curves::pallas;
///
/// let left = pallas::Base::from(1);
/// let right = pallas::Base::from(2);
/// assert_ne!(poseidon_hash(left, right), poseidon_hash(right, left));
/// ```
#[inline]
#[must_use]
pub fn poseidon_hash(left: pallas::Base, right: pallas::Base) -> pallas::Base {
    poseidon_hash_n([left, right])
}

/// Poseidon hash over a fixed-length array of field elements.
#[inline]
#[must_use]
pub fn poseidon_hash_n<const L: usize>(inputs: [pallas::Base; L]) -> pallas::Base {
    poseidon::Hash::<_, PoseidonSpec, ConstantLength<L>, 3, 2>::init().hash(inputs)
}

/// Maps an arbitrary string identifier (claim id, group id) into the field.
///
/// SHA3-256 of the UTF-8 bytes, reduced into the field.
#[must_use]
pub fn id_to_field(id: &str) -> pallas::Base {
    let digest: [u8; 32] = Sha3_256::digest(id.as_bytes()).into();
    bytes_to_field(&digest)
}

/// Keccak-256 over the concatenated canonical encodings of `fields`.
///
/// This is the message digest signed by electors and by the aggregator.
#[must_use]
pub fn keccak_fields(fields: &[pallas::Base]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    for field in fields {
        hasher.update(field_to_bytes(*field));
    }
    hasher.finalize().into()
}
