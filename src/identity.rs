//! Identity commitments, ownership proofs and the elector-side helpers.
//!
//! A commitment is `Poseidon(address, pin)`. The identity secret used for
//! nullifiers is `Poseidon(privateKey, pin)`, which never leaves the holder.

use anyhow::Result;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Signature};
use log::debug;
use pasta_curves::pallas;
use serde::{Deserialize, Serialize};

use crate::backend::RollupProver;
use crate::error::{RollupError, RollupResult};
use crate::ethereum::{address_to_field, secret_to_field, sign_digest, verify_digest};
use crate::types::{claim_signal, vote_digest, Commitment, CollectedVote, FieldBytes, Nullifier};
use crate::utils::{id_to_field, keccak_fields, poseidon_hash, poseidon_hash_n};

const OWNERSHIP_DOMAIN: &str = "ownership";

/// `Poseidon(address(publicKey), pin)`.
#[must_use]
pub fn commit(public_key: &Address, pin: u64) -> Commitment {
    FieldBytes::from_field(poseidon_hash(
        address_to_field(public_key),
        pallas::Base::from(pin),
    ))
}

/// Digest signed over a commitment when proving control of it.
#[must_use]
pub fn commitment_digest(commitment: &Commitment) -> [u8; 32] {
    keccak_fields(&[commitment.to_field()])
}

/// Publicly shareable proof that the holder of a key controls the secret
/// behind `commitment`. Carries no pin and no key; checking it needs the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipProof {
    pub commitment: Commitment,
    pub attestation: Vec<u8>,
}

fn ownership_statement(commitment: &Commitment, public_key: &Address) -> FieldBytes {
    FieldBytes::from_field(poseidon_hash_n([
        id_to_field(OWNERSHIP_DOMAIN),
        commitment.to_field(),
        address_to_field(public_key),
    ]))
}

/// Proves ownership of `commitment`.
///
/// # Errors
///
/// - [`RollupError::OwnershipMismatch`] if `commit(public_key, pin)` differs
/// - [`RollupError::SignatureInvalid`] if `signature` is not a signature of
///   `commitment` by `public_key`
pub fn prove_ownership(
    prover: &RollupProver,
    commitment: &Commitment,
    public_key: &Address,
    pin: u64,
    signature: &Signature,
) -> RollupResult<OwnershipProof> {
    if commit(public_key, pin) != *commitment {
        return Err(RollupError::OwnershipMismatch);
    }
    if !verify_digest(signature, commitment_digest(commitment), *public_key) {
        return Err(RollupError::SignatureInvalid);
    }

    let attestation = prover.attest(&ownership_statement(commitment, public_key))?;
    debug!("Ownership proven for commitment {commitment}");
    Ok(OwnershipProof {
        commitment: *commitment,
        attestation,
    })
}

/// Third-party check of an ownership proof plus a fresh signature over the
/// commitment. The proof only verifies for the key it was produced with.
pub fn verify_identity(
    prover: &RollupProver,
    commitment: &Commitment,
    proof: &OwnershipProof,
    public_key: &Address,
    signature: &Signature,
) -> RollupResult<()> {
    if proof.commitment != *commitment
        || !prover.check(&ownership_statement(commitment, public_key), &proof.attestation)?
    {
        return Err(RollupError::OwnershipMismatch);
    }
    if !verify_digest(signature, commitment_digest(commitment), *public_key) {
        return Err(RollupError::SignatureInvalid);
    }
    Ok(())
}

/// Application for group membership: an ownership proof, the key it is
/// bound to and a fresh signature over the commitment by that key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollee {
    pub ownership: OwnershipProof,
    pub public_key: Address,
    pub signature: Signature,
}

impl Enrollee {
    pub fn commitment(&self) -> Commitment {
        self.ownership.commitment
    }

    /// Runs [`verify_identity`] on the application.
    pub fn verify(&self, prover: &RollupProver) -> RollupResult<()> {
        verify_identity(
            prover,
            &self.ownership.commitment,
            &self.ownership,
            &self.public_key,
            &self.signature,
        )
    }
}

/// Secret material of an elector.
pub struct Identity {
    wallet: LocalWallet,
    pin: u64,
}

impl Identity {
    pub fn new(wallet: LocalWallet, pin: u64) -> Self {
        Self { wallet, pin }
    }

    pub fn random(pin: u64) -> Self {
        Self::new(LocalWallet::new(&mut rand::thread_rng()), pin)
    }

    pub fn public_key(&self) -> Address {
        self.wallet.address()
    }

    pub fn pin(&self) -> u64 {
        self.pin
    }

    pub fn commitment(&self) -> Commitment {
        commit(&self.public_key(), self.pin)
    }

    pub fn sign_commitment(&self) -> Result<Signature> {
        sign_digest(&self.wallet, commitment_digest(&self.commitment()))
    }

    fn commitment_signature(&self) -> RollupResult<Signature> {
        self.sign_commitment()
            .map_err(|e| RollupError::Backend(format!("{e:#}")))
    }

    /// Proves ownership of this identity's commitment through `prover`.
    pub fn ownership_proof(&self, prover: &RollupProver) -> RollupResult<OwnershipProof> {
        let signature = self.commitment_signature()?;
        prove_ownership(
            prover,
            &self.commitment(),
            &self.public_key(),
            self.pin,
            &signature,
        )
    }

    /// Builds a membership application with a fresh commitment signature.
    pub fn enrollee(&self, prover: &RollupProver) -> RollupResult<Enrollee> {
        Ok(Enrollee {
            ownership: self.ownership_proof(prover)?,
            public_key: self.public_key(),
            signature: self.commitment_signature()?,
        })
    }

    fn secret(&self) -> pallas::Base {
        poseidon_hash(secret_to_field(&self.wallet), pallas::Base::from(self.pin))
    }

    /// Deterministic per-claim nullifier, unlinkable across claims.
    pub fn nullifier(&self, claim_id: &str) -> Nullifier {
        FieldBytes::from_field(poseidon_hash_n([self.secret(), id_to_field(claim_id)]))
    }

    /// Builds a signed vote for round 0 of `claim_id`.
    pub fn cast_vote(&self, claim_id: &str, value: FieldBytes) -> Result<CollectedVote> {
        self.cast_vote_in_round(claim_id, 0, value)
    }

    pub fn cast_vote_in_round(
        &self,
        claim_id: &str,
        round: u64,
        value: FieldBytes,
    ) -> Result<CollectedVote> {
        let signal = claim_signal(claim_id, round);
        let nullifier = self.nullifier(claim_id);
        let elector = self.commitment();
        let signature = sign_digest(
            &self.wallet,
            vote_digest(&signal, &value, &nullifier, &elector),
        )?;
        Ok(CollectedVote {
            elector,
            elector_public_key: self.public_key(),
            signal,
            nullifier,
            signature,
            value,
        })
    }

    /// Signs `vote` as it stands, replacing its signature and key.
    pub fn sign_vote(&self, vote: &mut CollectedVote) -> Result<()> {
        vote.elector_public_key = self.public_key();
        vote.signature = sign_digest(&self.wallet, vote.signing_digest())?;
        Ok(())
    }
}
