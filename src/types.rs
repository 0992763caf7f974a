//! Shared data model: field encodings, votes, claims and the tally state.

use std::fmt;

use ethers::types::{Address, Signature};
use pasta_curves::pallas;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::utils::{canonical_field, field_to_bytes, id_to_field, keccak_fields, poseidon_hash_n};

pub const HASH_SIZE: usize = 32;

/// Canonical big-endian encoding of a Pallas base field element.
///
/// Serialized as a 64-character lowercase hex string so that large values
/// survive JSON without loss of precision. Ordering is numeric order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FieldBytes([u8; HASH_SIZE]);

/// Public identifier of a member, `Poseidon(address, pin)`.
pub type Commitment = FieldBytes;
/// Per-claim, per-member spend tag.
pub type Nullifier = FieldBytes;
/// Context value binding a vote to a claim.
pub type Signal = FieldBytes;

impl FieldBytes {
    pub const ZERO: FieldBytes = FieldBytes([0u8; HASH_SIZE]);

    #[must_use]
    pub fn from_field(field: pallas::Base) -> Self {
        Self(field_to_bytes(field))
    }

    /// Accepts only canonical encodings (value below the field modulus).
    #[must_use]
    pub fn from_bytes(bytes: [u8; HASH_SIZE]) -> Option<Self> {
        canonical_field(&bytes).map(|_| Self(bytes))
    }

    #[must_use]
    pub fn to_field(&self) -> pallas::Base {
        // Construction guarantees the bytes are canonical.
        canonical_field(&self.0).unwrap_or_else(pallas::Base::zero)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(input: &str) -> anyhow::Result<Self> {
        let stripped = crate::utils::validate_and_strip_hex(input, HASH_SIZE * 2)?;
        let mut bytes = [0u8; HASH_SIZE];
        hex::decode_to_slice(&stripped, &mut bytes)?;
        Self::from_bytes(bytes)
            .ok_or_else(|| anyhow::anyhow!("Value {stripped} is not a canonical field element"))
    }
}

impl From<pallas::Base> for FieldBytes {
    fn from(field: pallas::Base) -> Self {
        Self::from_field(field)
    }
}

impl From<u64> for FieldBytes {
    fn from(value: u64) -> Self {
        Self::from_field(pallas::Base::from(value))
    }
}

impl fmt::Display for FieldBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for FieldBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldBytes({})", self.to_hex())
    }
}

impl Serialize for FieldBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for FieldBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        FieldBytes::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Encoded vote value. `1` is affirmative, `0` negative; any other value is
/// malformed and the vote is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoteValue {
    Negative,
    Positive,
}

impl VoteValue {
    #[must_use]
    pub fn decode(value: &FieldBytes) -> Option<Self> {
        if *value == FieldBytes::from(1u64) {
            Some(VoteValue::Positive)
        } else if *value == FieldBytes::ZERO {
            Some(VoteValue::Negative)
        } else {
            None
        }
    }

    #[must_use]
    pub fn encode(self) -> FieldBytes {
        match self {
            VoteValue::Negative => FieldBytes::ZERO,
            VoteValue::Positive => FieldBytes::from(1u64),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimResult {
    Voting,
    Approved,
    Rejected,
}

impl ClaimResult {
    fn code(self) -> u64 {
        match self {
            ClaimResult::Voting => 1,
            ClaimResult::Approved => 20,
            ClaimResult::Rejected => 21,
        }
    }

    #[must_use]
    pub fn is_final(self) -> bool {
        self != ClaimResult::Voting
    }
}

/// Registered claim configuration. Thresholds do not change once voting
/// starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub id: String,
    pub community_id: String,
    pub plan_id: String,
    pub required_positives: u64,
    pub required_votes: u64,
}

/// The fold accumulator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimState {
    pub claim_id: String,
    pub required_positives: u64,
    pub required_votes: u64,
    pub positives: u64,
    pub negatives: u64,
    pub ignored: u64,
    pub total: u64,
    pub result: ClaimResult,
}

impl ClaimState {
    #[must_use]
    pub fn new(claim_id: &str, required_positives: u64, required_votes: u64) -> Self {
        Self {
            claim_id: claim_id.to_string(),
            required_positives,
            required_votes,
            positives: 0,
            negatives: 0,
            ignored: 0,
            total: 0,
            result: ClaimResult::Voting,
        }
    }

    /// `total == positives + negatives + ignored`.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.positives
            .checked_add(self.negatives)
            .and_then(|sum| sum.checked_add(self.ignored))
            == Some(self.total)
    }

    /// Poseidon commitment to the whole state, used in step statements.
    #[must_use]
    pub fn hash(&self) -> FieldBytes {
        FieldBytes::from_field(poseidon_hash_n([
            id_to_field(&self.claim_id),
            pallas::Base::from(self.required_positives),
            pallas::Base::from(self.required_votes),
            pallas::Base::from(self.positives),
            pallas::Base::from(self.negatives),
            pallas::Base::from(self.ignored),
            pallas::Base::from(self.total),
            pallas::Base::from(self.result.code()),
        ]))
    }
}

/// A vote as collected from an elector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectedVote {
    pub elector: Commitment,
    pub elector_public_key: Address,
    pub signal: Signal,
    pub nullifier: Nullifier,
    pub signature: Signature,
    pub value: FieldBytes,
}

impl CollectedVote {
    /// Digest the elector signs, covering every field but the key and the
    /// signature itself.
    #[must_use]
    pub fn signing_digest(&self) -> [u8; HASH_SIZE] {
        vote_digest(&self.signal, &self.value, &self.nullifier, &self.elector)
    }
}

/// `Keccak256(signal || value || nullifier || elector)`.
#[must_use]
pub fn vote_digest(
    signal: &Signal,
    value: &FieldBytes,
    nullifier: &Nullifier,
    elector: &Commitment,
) -> [u8; HASH_SIZE] {
    keccak_fields(&[
        signal.to_field(),
        value.to_field(),
        nullifier.to_field(),
        elector.to_field(),
    ])
}

/// A plan groups the claims of a community.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub community_id: String,
}

/// Signal for `round` of the claim `claim_id`.
#[must_use]
pub fn claim_signal(claim_id: &str, round: u64) -> Signal {
    FieldBytes::from_field(poseidon_hash_n([
        id_to_field(claim_id),
        pallas::Base::from(round),
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_bytes_hex_serde() {
        let value = FieldBytes::from(42u64);
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json.len(), 66);
        let back: FieldBytes = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_field_bytes_rejects_non_canonical() {
        let json = format!("\"{}\"", "ff".repeat(32));
        assert!(serde_json::from_str::<FieldBytes>(&json).is_err());
    }

    #[test]
    fn test_field_bytes_numeric_order() {
        assert!(FieldBytes::from(2u64) < FieldBytes::from(256u64));
        assert!(FieldBytes::ZERO < FieldBytes::from(1u64));
    }

    #[test]
    fn test_vote_value_encoding() {
        assert_eq!(VoteValue::decode(&FieldBytes::from(1u64)), Some(VoteValue::Positive));
        assert_eq!(VoteValue::decode(&FieldBytes::ZERO), Some(VoteValue::Negative));
        assert_eq!(VoteValue::decode(&FieldBytes::from(2u64)), None);
        assert_eq!(VoteValue::Positive.encode(), FieldBytes::from(1u64));
    }

    #[test]
    fn test_claim_state_hash_changes_with_counters() {
        let state = ClaimState::new("claim-1", 2, 3);
        let mut next = state.clone();
        next.positives += 1;
        next.total += 1;
        assert!(state.is_consistent());
        assert!(next.is_consistent());
        assert_ne!(state.hash(), next.hash());
    }

    #[test]
    fn test_claim_result_serializes_upper_case() {
        let json = serde_json::to_string(&ClaimResult::Approved).unwrap();
        assert_eq!(json, "\"APPROVED\"");
    }

    #[test]
    fn test_vote_digest_covers_nullifier_and_elector() {
        let (signal, value) = (claim_signal("c1", 0), FieldBytes::from(1u64));
        let base = vote_digest(&signal, &value, &FieldBytes::from(5u64), &FieldBytes::from(6u64));

        assert_ne!(
            base,
            vote_digest(&signal, &value, &FieldBytes::from(9u64), &FieldBytes::from(6u64))
        );
        assert_ne!(
            base,
            vote_digest(&signal, &value, &FieldBytes::from(5u64), &FieldBytes::from(9u64))
        );
    }

    #[test]
    fn test_claim_signal_binds_claim_and_round() {
        assert_eq!(claim_signal("c1", 0), claim_signal("c1", 0));
        assert_ne!(claim_signal("c1", 0), claim_signal("c2", 0));
        assert_ne!(claim_signal("c1", 0), claim_signal("c1", 1));
    }
}
