//! Pluggable proving backend and the shared, lazily prepared prover.
//!
//! A backend attests *statements* (field digests of ownership claims and
//! rollup steps). The shipped [`SignerBackend`] is an aggregator-signed hash
//! chain: every statement is signed with the aggregator's secp256k1 key, and
//! the verification key is the aggregator address plus the protocol
//! parameters. Any backend that can attest and check statements (a SNARK
//! prover, a folding scheme) can be substituted.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Signature};
use log::{debug, info, warn};
use pasta_curves::pallas;
use serde::{Deserialize, Serialize};

use crate::config::AggregatorConfig;
use crate::error::{RollupError, RollupResult};
use crate::ethereum::{sign_digest, verify_digest, wallet_from_hex};
use crate::types::FieldBytes;
use crate::utils::{id_to_field, keccak_fields, poseidon_hash_n};
use crate::MAP_HEIGHT;

/// Domain tag mixed into the parameter digest.
pub const PROTOCOL_DOMAIN: &str = "zkp-claim-rollup/v1";

/// Public parameters needed to check attestations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationKey {
    /// Address whose signatures make up the attestations.
    pub attester: Address,
    /// Digest of the protocol domain and map height.
    pub params_digest: FieldBytes,
    pub map_height: usize,
}

impl VerificationKey {
    #[must_use]
    pub fn params_digest() -> FieldBytes {
        FieldBytes::from_field(poseidon_hash_n([
            id_to_field(PROTOCOL_DOMAIN),
            pallas::Base::from(MAP_HEIGHT as u64),
        ]))
    }
}

/// Checks attestations. Needs only public data.
pub trait AttestationVerifier: Send + Sync {
    fn check(&self, vk: &VerificationKey, statement: &FieldBytes, attestation: &[u8]) -> bool;
}

/// Produces attestations. `setup` may be expensive and is memoized by
/// [`RollupProver`].
pub trait ProvingBackend: AttestationVerifier {
    fn setup(&self) -> RollupResult<VerificationKey>;

    fn attest(&self, vk: &VerificationKey, statement: &FieldBytes) -> RollupResult<Vec<u8>>;
}

fn signing_digest(vk: &VerificationKey, statement: &FieldBytes) -> [u8; 32] {
    keccak_fields(&[vk.params_digest.to_field(), statement.to_field()])
}

/// Verifies signatures produced by [`SignerBackend`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SignatureVerifier;

impl AttestationVerifier for SignatureVerifier {
    fn check(&self, vk: &VerificationKey, statement: &FieldBytes, attestation: &[u8]) -> bool {
        if vk.params_digest != VerificationKey::params_digest() || vk.map_height != MAP_HEIGHT {
            return false;
        }
        match Signature::try_from(attestation) {
            Ok(signature) => verify_digest(&signature, signing_digest(vk, statement), vk.attester),
            Err(_) => false,
        }
    }
}

/// Aggregator-signed attestations.
pub struct SignerBackend {
    wallet: LocalWallet,
}

impl SignerBackend {
    pub fn new(wallet: LocalWallet) -> Self {
        Self { wallet }
    }

    /// Uses the configured aggregator key, or a fresh random key when none
    /// is configured.
    pub fn from_config(config: &AggregatorConfig) -> anyhow::Result<Self> {
        match config.resolve_private_key() {
            Some(key) => Ok(Self::new(wallet_from_hex(&key)?)),
            None => {
                warn!("No aggregator key configured, using an ephemeral key");
                Ok(Self::new(LocalWallet::new(&mut rand::thread_rng())))
            }
        }
    }

    pub fn address(&self) -> Address {
        self.wallet.address()
    }
}

impl AttestationVerifier for SignerBackend {
    fn check(&self, vk: &VerificationKey, statement: &FieldBytes, attestation: &[u8]) -> bool {
        SignatureVerifier.check(vk, statement, attestation)
    }
}

impl ProvingBackend for SignerBackend {
    fn setup(&self) -> RollupResult<VerificationKey> {
        Ok(VerificationKey {
            attester: self.wallet.address(),
            params_digest: VerificationKey::params_digest(),
            map_height: MAP_HEIGHT,
        })
    }

    fn attest(&self, vk: &VerificationKey, statement: &FieldBytes) -> RollupResult<Vec<u8>> {
        let signature = sign_digest(&self.wallet, signing_digest(vk, statement))
            .map_err(|e| RollupError::Backend(e.to_string()))?;
        Ok(signature.to_vec())
    }
}

/// Backend plus its cached verification key.
///
/// Share one instance (behind an `Arc`) across concurrent rollups. Setup runs
/// at most once on success; a failed setup is not cached, so the next call
/// retries.
pub struct RollupProver {
    backend: Arc<dyn ProvingBackend>,
    vk: Mutex<Option<Arc<VerificationKey>>>,
}

impl RollupProver {
    pub fn new(backend: Arc<dyn ProvingBackend>) -> Self {
        Self {
            backend,
            vk: Mutex::new(None),
        }
    }

    /// Returns the verification key, running backend setup on first use.
    pub fn verification_key(&self) -> RollupResult<Arc<VerificationKey>> {
        let mut cached = self
            .vk
            .lock()
            .map_err(|_| RollupError::SetupFailure("setup lock poisoned".to_string()))?;
        if let Some(vk) = cached.as_ref() {
            return Ok(vk.clone());
        }

        let started = Instant::now();
        let vk = match self.backend.setup() {
            Ok(vk) => Arc::new(vk),
            Err(RollupError::SetupFailure(reason)) => return Err(RollupError::SetupFailure(reason)),
            Err(other) => return Err(RollupError::SetupFailure(other.to_string())),
        };
        info!(
            "Rollup setup completed in {:.2}s, attester {:?}",
            started.elapsed().as_secs_f64(),
            vk.attester
        );
        *cached = Some(vk.clone());
        Ok(vk)
    }

    pub fn is_ready(&self) -> bool {
        self.vk.lock().map(|vk| vk.is_some()).unwrap_or(false)
    }

    pub fn attest(&self, statement: &FieldBytes) -> RollupResult<Vec<u8>> {
        let vk = self.verification_key()?;
        debug!("Attesting statement {statement}");
        self.backend.attest(&vk, statement)
    }

    pub fn check(&self, statement: &FieldBytes, attestation: &[u8]) -> RollupResult<bool> {
        let vk = self.verification_key()?;
        Ok(self.backend.check(&vk, statement, attestation))
    }
}
