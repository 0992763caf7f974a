//! secp256k1 key and signature helpers.
//!
//! Electors and the aggregator hold Ethereum-style keys. A public key is
//! identified by its 20-byte address; signatures are recoverable ECDSA over
//! 32-byte digests.

use anyhow::{Context, Result};
use ethers::signers::LocalWallet;
use ethers::types::{Address, Signature, H256};
use pasta_curves::pallas;

use crate::utils::{bytes_to_field, validate_and_strip_hex};

/// Ethereum addresses are 20 bytes = 40 hex characters.
pub const ADDRESS_HEX_LENGTH: usize = 40;

/// Private keys are 32 bytes = 64 hex characters.
pub const PRIVATE_KEY_HEX_LENGTH: usize = 64;

/// Validates and normalizes an address to lowercase hex without `0x`.
///
/// # Examples
///
/// ```
/// use zkp_claim_rollup::ethereum::normalize_address;
///
/// let normalized = normalize_address("0x742d35Cc6634C0532925a3b844Bc454e4438f44e").unwrap();
/// assert_eq!(normalized, "742d35cc6634c0532925a3b844bc454e4438f44e");
/// ```
pub fn normalize_address(address: &str) -> Result<String> {
    validate_and_strip_hex(address, ADDRESS_HEX_LENGTH).map(|s| s.to_lowercase())
}

/// Parses an address string into an [`Address`].
pub fn parse_address(address: &str) -> Result<Address> {
    let normalized = normalize_address(address)?;
    let bytes = hex::decode(&normalized).context("Failed to decode address from hex")?;
    Ok(Address::from_slice(&bytes))
}

/// Validates a private key.
///
/// # Errors
///
/// Returns an error if the key is not 64 hex characters (excluding `0x`) or
/// is all zeros.
pub fn validate_private_key(private_key: &str) -> Result<()> {
    let stripped = validate_and_strip_hex(private_key, PRIVATE_KEY_HEX_LENGTH)?;

    if stripped.chars().all(|c| c == '0') {
        return Err(anyhow::anyhow!(
            "Private key cannot be all zeros. Please provide a valid private key."
        ));
    }

    Ok(())
}

/// Builds a wallet from a hex private key, validating it first.
pub fn wallet_from_hex(private_key: &str) -> Result<LocalWallet> {
    validate_private_key(private_key)?;
    let stripped = validate_and_strip_hex(private_key, PRIVATE_KEY_HEX_LENGTH)?;
    stripped
        .parse::<LocalWallet>()
        .context("Failed to parse private key")
}

/// Maps an address into the field, left-padded to 32 bytes.
#[must_use]
pub fn address_to_field(address: &Address) -> pallas::Base {
    let mut full_bytes = [0u8; 32];
    full_bytes[12..].copy_from_slice(address.as_bytes());
    bytes_to_field(&full_bytes)
}

/// Maps the wallet's secret scalar into the field.
#[must_use]
pub fn secret_to_field(wallet: &LocalWallet) -> pallas::Base {
    let secret: [u8; 32] = wallet.signer().to_bytes().into();
    bytes_to_field(&secret)
}

/// Signs a raw 32-byte digest (no EIP-191 prefix).
pub fn sign_digest(wallet: &LocalWallet, digest: [u8; 32]) -> Result<Signature> {
    wallet
        .sign_hash(H256::from(digest))
        .context("Failed to sign digest")
}

/// True when `signature` over `digest` recovers to `address`.
#[must_use]
pub fn verify_digest(signature: &Signature, digest: [u8; 32], address: Address) -> bool {
    signature.verify(H256::from(digest), address).is_ok()
}
