//! Error taxonomy for the tally engine.
//!
//! [`RollupError`] covers failures that abort an operation and surface to the
//! caller. [`VoteRejection`] covers per-vote integrity problems, which never
//! abort a rollup and are counted as `ignored` instead.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RollupError {
    /// Backend setup (verification key derivation) failed. Retry by calling
    /// the rollup again; the failed attempt is not cached.
    #[error("rollup setup failed: {0}")]
    SetupFailure(String),

    #[error("group '{0}' not found")]
    GroupNotFound(String),

    #[error("claim '{0}' not found")]
    ClaimNotFound(String),

    #[error("'{0}' already exists")]
    AlreadyExists(String),

    #[error("group '{id}' is full ({capacity} members)")]
    GroupFull { id: String, capacity: usize },

    #[error("claim '{0}' is already being rolled up")]
    ClaimBusy(String),

    #[error("identity commitment does not match the ownership data")]
    OwnershipMismatch,

    #[error("signature does not verify against the given public key")]
    SignatureInvalid,

    #[error("proving backend error: {0}")]
    Backend(String),

    #[error("invalid rollup proof: {0}")]
    InvalidProof(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Why a vote was counted as `ignored`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoteRejection {
    /// Bad signature, foreign signal, value outside `{0, 1}` or no valid
    /// membership witness.
    MalformedVote(MalformedReason),
    /// The nullifier was already spent on this claim, or the elector already
    /// had a vote counted under another nullifier.
    DuplicateNullifier,
    /// The claim left `VOTING` before this vote arrived.
    AlreadyFinalized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MalformedReason {
    Signature,
    Signal,
    Value,
    Membership,
}

impl fmt::Display for VoteRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoteRejection::MalformedVote(reason) => write!(f, "malformed vote ({reason:?})"),
            VoteRejection::DuplicateNullifier => write!(f, "duplicate nullifier"),
            VoteRejection::AlreadyFinalized => write!(f, "claim already finalized"),
        }
    }
}

pub type RollupResult<T> = std::result::Result<T, RollupError>;
