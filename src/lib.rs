//! Privacy-preserving claim voting with a verifiable tally rollup.
//!
//! Electors are registered as identity commitments in authenticated groups.
//! They vote with a per-claim nullifier and a signature, and an aggregator
//! folds the collected votes into a running tally. Every fold step is attested,
//! so the final tally can be checked without seeing who voted.
//!
//! # Components
//!
//! - [`identity`]: commitments, ownership proofs, elector-side vote casting
//! - [`MerkleMap`] / [`Group`]: authenticated key-value map and the membership
//!   groups built on it, with each member's commitment bound to its key
//! - [`NullifierSet`]: spent nullifiers per claim
//! - [`rollup`]: the fold and the step proof chain
//! - [`TallyService`]: registration and the `rollup_claim` driver
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use zkp_claim_rollup::{MemoryStore, RollupProver, SignerBackend, TallyService};
//! use ethers::signers::LocalWallet;
//!
//! let backend = SignerBackend::new(LocalWallet::new(&mut rand::thread_rng()));
//! let prover = Arc::new(RollupProver::new(Arc::new(backend)));
//! let service = TallyService::new(Arc::new(MemoryStore::new()), prover);
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod ethereum;
pub mod group;
pub mod identity;
pub mod merkle;
pub mod rollup;
pub mod service;
pub mod store;
pub mod types;
pub mod utils;


pub use backend::{
    AttestationVerifier, ProvingBackend, RollupProver, SignatureVerifier, SignerBackend,
    VerificationKey,
};
pub use error::{MalformedReason, RollupError, RollupResult, VoteRejection};
pub use group::{Enrollment, Group, NullifierSet};
pub use identity::{
    commit, prove_ownership, verify_identity, Enrollee, Identity, OwnershipProof,
};
pub use merkle::{MembershipWitness, MerkleMap};
pub use rollup::{fold, ClaimRollupProof, GroupRoots, StepProof, VoteOutcome};
pub use service::{community_digest, TallyService};
pub use store::{FileStore, KvStore, MemoryStore, TypedStore};
pub use types::{Claim, ClaimResult, ClaimState, CollectedVote, FieldBytes, Plan, VoteValue};
pub use utils::{bytes_to_field, field_to_bytes, poseidon_hash};

/// Height of every authenticated map.
///
/// A height of 12 gives 2^12 = 4096 slots, so a group holds at most 4096
/// members and a claim at most 4096 spent nullifiers.
///
/// Witnesses always carry exactly `MAP_HEIGHT` siblings. Changing the value
/// changes every root and every verification key, so stored groups and proofs
/// produced under another height no longer verify.
pub const MAP_HEIGHT: usize = 12;
