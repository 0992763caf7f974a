//! Recursive tally rollup.
//!
//! [`fold`] applies one vote to a [`ClaimState`]. [`rollup_votes`] threads the
//! state and the nullifier set through a vote sequence and produces one
//! attested [`StepProof`] per fold. Each step statement commits to the digest
//! of the previous step, so the last step certifies the whole chain.
//!
//! Votes that fail any check are counted as `ignored`; they never abort the
//! sequence.

use log::{debug, info, warn};
use pasta_curves::pallas;
use serde::{Deserialize, Serialize};

use crate::backend::{AttestationVerifier, RollupProver, VerificationKey};
use crate::error::{MalformedReason, RollupError, RollupResult, VoteRejection};
use crate::ethereum::verify_digest;
use crate::group::{Enrollment, Group, NullifierSet};
use crate::types::{
    claim_signal, ClaimResult, ClaimState, CollectedVote, FieldBytes, Nullifier, Signal,
    VoteValue,
};
use crate::utils::{id_to_field, poseidon_hash_n};

const INIT_DOMAIN: &str = "rollup/init";
const STEP_DOMAIN: &str = "rollup/step";

/// Roots of the groups a claim is tallied against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRoots {
    pub validators: FieldBytes,
    pub auditors: FieldBytes,
    pub electors: FieldBytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoteOutcome {
    Positive,
    Negative,
    Ignored(VoteRejection),
}

impl VoteOutcome {
    fn code(&self) -> u64 {
        match self {
            VoteOutcome::Positive => 1,
            VoteOutcome::Negative => 2,
            VoteOutcome::Ignored(VoteRejection::MalformedVote(_)) => 3,
            VoteOutcome::Ignored(VoteRejection::DuplicateNullifier) => 4,
            VoteOutcome::Ignored(VoteRejection::AlreadyFinalized) => 5,
        }
    }

    #[must_use]
    pub fn is_counted(&self) -> bool {
        !matches!(self, VoteOutcome::Ignored(_))
    }
}

/// Classification once enough votes arrived.
#[must_use]
pub fn classify(state: &ClaimState) -> ClaimResult {
    if state.total < state.required_votes {
        ClaimResult::Voting
    } else if state.positives >= state.required_positives {
        ClaimResult::Approved
    } else {
        ClaimResult::Rejected
    }
}

fn check_vote(
    claim_signal: &Signal,
    electors_root: &FieldBytes,
    enrollment: Option<&Enrollment>,
    nullifiers: &NullifierSet,
    vote: &CollectedVote,
) -> Result<VoteValue, VoteRejection> {
    let malformed = VoteRejection::MalformedVote;

    if !verify_digest(&vote.signature, vote.signing_digest(), vote.elector_public_key) {
        return Err(malformed(MalformedReason::Signature));
    }
    if vote.signal != *claim_signal {
        return Err(malformed(MalformedReason::Signal));
    }
    let value = VoteValue::decode(&vote.value).ok_or(malformed(MalformedReason::Value))?;

    // The signing key must be the one the commitment was enrolled with.
    let is_member = enrollment.is_some_and(|e| {
        let w = &e.witness;
        e.public_key == vote.elector_public_key
            && w.key == vote.elector
            && w.value == FieldBytes::from(1u64)
            && w.verify(electors_root)
    });
    if !is_member {
        return Err(malformed(MalformedReason::Membership));
    }

    if nullifiers.contains(&vote.nullifier) || nullifiers.has_voted(&vote.elector) {
        return Err(VoteRejection::DuplicateNullifier);
    }
    Ok(value)
}

/// Applies one vote to `previous`.
///
/// `enrollment` is the elector's membership witness in the electors group and
/// the key bound to it, if one exists. The nullifier and elector are recorded
/// in `nullifiers` only when the vote is counted.
pub fn fold(
    previous: &ClaimState,
    roots: &GroupRoots,
    enrollment: Option<&Enrollment>,
    nullifiers: &mut NullifierSet,
    vote: &CollectedVote,
) -> RollupResult<(ClaimState, VoteOutcome)> {
    let mut next = previous.clone();
    next.total += 1;

    if previous.result.is_final() {
        next.ignored += 1;
        return Ok((next, VoteOutcome::Ignored(VoteRejection::AlreadyFinalized)));
    }

    let signal = claim_signal(&previous.claim_id, 0);
    let outcome = match check_vote(&signal, &roots.electors, enrollment, nullifiers, vote) {
        Ok(value) => {
            nullifiers.spend(vote.nullifier, vote.elector)?;
            match value {
                VoteValue::Positive => {
                    next.positives += 1;
                    VoteOutcome::Positive
                }
                VoteValue::Negative => {
                    next.negatives += 1;
                    VoteOutcome::Negative
                }
            }
        }
        Err(rejection) => {
            next.ignored += 1;
            VoteOutcome::Ignored(rejection)
        }
    };

    next.result = classify(&next);
    Ok((next, outcome))
}

/// Public parts of a folded vote. The elector is never included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicVote {
    pub signal: Signal,
    pub nullifier: Nullifier,
    pub value: FieldBytes,
    pub outcome: VoteOutcome,
}

/// One link of the proof chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepProof {
    pub index: u64,
    /// Digest of the previous step, zero for the init step.
    pub previous: FieldBytes,
    pub previous_state: FieldBytes,
    pub state: ClaimState,
    pub roots: GroupRoots,
    pub nullifiers_before: FieldBytes,
    pub nullifiers_after: FieldBytes,
    pub vote: Option<PublicVote>,
    pub attestation: Vec<u8>,
}

impl StepProof {
    /// Statement attested by the backend.
    #[must_use]
    pub fn digest(&self) -> FieldBytes {
        let (domain, signal, nullifier, value, outcome) = match &self.vote {
            Some(vote) => (
                STEP_DOMAIN,
                vote.signal.to_field(),
                vote.nullifier.to_field(),
                vote.value.to_field(),
                vote.outcome.code(),
            ),
            None => (
                INIT_DOMAIN,
                pallas::Base::zero(),
                pallas::Base::zero(),
                pallas::Base::zero(),
                0,
            ),
        };
        FieldBytes::from_field(poseidon_hash_n([
            id_to_field(domain),
            self.previous.to_field(),
            pallas::Base::from(self.index),
            self.previous_state.to_field(),
            self.state.hash().to_field(),
            self.roots.validators.to_field(),
            self.roots.auditors.to_field(),
            self.roots.electors.to_field(),
            self.nullifiers_before.to_field(),
            self.nullifiers_after.to_field(),
            signal,
            nullifier,
            value,
            pallas::Base::from(outcome),
        ]))
    }
}

/// Final tally plus the chain of step proofs that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRollupProof {
    pub community_id: String,
    pub claim_id: String,
    pub verification_key: VerificationKey,
    pub steps: Vec<StepProof>,
}

fn invalid(reason: impl Into<String>) -> RollupError {
    RollupError::InvalidProof(reason.into())
}

impl ClaimRollupProof {
    /// The final claim state.
    pub fn public_output(&self) -> Option<&ClaimState> {
        self.steps.last().map(|step| &step.state)
    }

    pub fn votes_folded(&self) -> usize {
        self.steps.len().saturating_sub(1)
    }

    /// Checks the last step against `vk`. Because each attested statement
    /// embeds the previous step digest, this certifies the chain for anyone
    /// trusting the attester.
    pub fn verify<V>(&self, verifier: &V, vk: &VerificationKey) -> RollupResult<()>
    where
        V: AttestationVerifier + ?Sized,
    {
        if self.verification_key != *vk {
            return Err(invalid("proof was produced under a different verification key"));
        }
        let last = self.steps.last().ok_or_else(|| invalid("empty proof chain"))?;
        if last.index as usize != self.votes_folded() {
            return Err(invalid("last step index does not match chain length"));
        }
        if last.state.claim_id != self.claim_id || !last.state.is_consistent() {
            return Err(invalid("final state is inconsistent"));
        }
        if !verifier.check(vk, &last.digest(), &last.attestation) {
            return Err(invalid("attestation of the last step does not verify"));
        }
        Ok(())
    }

    /// Rechecks every link, attestation and counter transition.
    pub fn verify_chain<V>(&self, verifier: &V, vk: &VerificationKey) -> RollupResult<()>
    where
        V: AttestationVerifier + ?Sized,
    {
        self.verify(verifier, vk)?;

        let first = &self.steps[0];
        let initial = ClaimState::new(
            &self.claim_id,
            first.state.required_positives,
            first.state.required_votes,
        );
        if first.index != 0
            || first.previous != FieldBytes::ZERO
            || first.vote.is_some()
            || first.state != initial
            || first.previous_state != initial.hash()
            || first.nullifiers_before != first.nullifiers_after
        {
            return Err(invalid("init step is malformed"));
        }

        for (position, pair) in self.steps.windows(2).enumerate() {
            let (prev, step) = (&pair[0], &pair[1]);
            let expected_index = position as u64 + 1;
            if step.index != expected_index {
                return Err(invalid(format!("step {expected_index} has index {}", step.index)));
            }
            if step.previous != prev.digest() || step.previous_state != prev.state.hash() {
                return Err(invalid(format!("step {expected_index} is not linked to its predecessor")));
            }
            if step.roots != prev.roots || step.nullifiers_before != prev.nullifiers_after {
                return Err(invalid(format!("step {expected_index} changed the group or nullifier roots")));
            }
            let vote = step
                .vote
                .as_ref()
                .ok_or_else(|| invalid(format!("step {expected_index} carries no vote")))?;
            check_transition(&prev.state, &step.state, vote)
                .map_err(|reason| invalid(format!("step {expected_index}: {reason}")))?;
            if vote.outcome.is_counted() == (step.nullifiers_before == step.nullifiers_after) {
                return Err(invalid(format!("step {expected_index}: nullifier set update does not match outcome")));
            }
        }

        for step in &self.steps {
            if !verifier.check(vk, &step.digest(), &step.attestation) {
                return Err(invalid(format!("attestation of step {} does not verify", step.index)));
            }
        }
        Ok(())
    }
}

fn check_transition(prev: &ClaimState, next: &ClaimState, vote: &PublicVote) -> Result<(), String> {
    if next.claim_id != prev.claim_id
        || next.required_positives != prev.required_positives
        || next.required_votes != prev.required_votes
    {
        return Err("claim configuration changed".to_string());
    }
    if !next.is_consistent() || next.total != prev.total + 1 {
        return Err("counters are inconsistent".to_string());
    }

    let (dp, dn, di) = (
        next.positives.checked_sub(prev.positives),
        next.negatives.checked_sub(prev.negatives),
        next.ignored.checked_sub(prev.ignored),
    );
    let expected = match vote.outcome {
        VoteOutcome::Positive => (Some(1), Some(0), Some(0)),
        VoteOutcome::Negative => (Some(0), Some(1), Some(0)),
        VoteOutcome::Ignored(_) => (Some(0), Some(0), Some(1)),
    };
    if (dp, dn, di) != expected {
        return Err("counter delta does not match outcome".to_string());
    }

    let own_signal = vote.signal == claim_signal(&prev.claim_id, 0);
    let value = VoteValue::decode(&vote.value);
    let consistent = match &vote.outcome {
        VoteOutcome::Positive => own_signal && value == Some(VoteValue::Positive),
        VoteOutcome::Negative => own_signal && value == Some(VoteValue::Negative),
        VoteOutcome::Ignored(VoteRejection::MalformedVote(MalformedReason::Signal)) => !own_signal,
        VoteOutcome::Ignored(VoteRejection::MalformedVote(MalformedReason::Value)) => {
            own_signal && value.is_none()
        }
        VoteOutcome::Ignored(_) => true,
    };
    if !consistent {
        return Err("outcome does not match the vote signal or value".to_string());
    }

    if prev.result.is_final() {
        if vote.outcome != VoteOutcome::Ignored(VoteRejection::AlreadyFinalized)
            || next.result != prev.result
        {
            return Err("finalized claim changed".to_string());
        }
    } else if next.result != classify(next) {
        return Err("result classification is wrong".to_string());
    }
    Ok(())
}

/// Folds `votes` in order, starting from `initial`, and returns the proof
/// chain. `nullifiers` is updated in place; callers persist it only after this
/// returns successfully.
pub fn rollup_votes(
    prover: &RollupProver,
    community_id: &str,
    initial: ClaimState,
    roots: GroupRoots,
    electors: &Group,
    nullifiers: &mut NullifierSet,
    votes: &[CollectedVote],
) -> RollupResult<ClaimRollupProof> {
    let vk = prover.verification_key()?;
    if electors.root() != roots.electors {
        return Err(RollupError::InvalidProof(format!(
            "electors group '{}' does not match the electors root",
            electors.id()
        )));
    }

    let mut init = StepProof {
        index: 0,
        previous: FieldBytes::ZERO,
        previous_state: initial.hash(),
        state: initial,
        roots,
        nullifiers_before: nullifiers.root(),
        nullifiers_after: nullifiers.root(),
        vote: None,
        attestation: Vec::new(),
    };
    init.attestation = prover.attest(&init.digest())?;
    let mut steps = vec![init];

    for (j, vote) in votes.iter().enumerate() {
        let prev = &steps[steps.len() - 1];
        let nullifiers_before = nullifiers.root();
        let enrollment = electors.enrollment(&vote.elector);

        let (state, outcome) = fold(&prev.state, &roots, enrollment.as_ref(), nullifiers, vote)?;
        match &outcome {
            VoteOutcome::Ignored(rejection) => {
                warn!("Vote #{j} on claim '{}' ignored: {rejection}", state.claim_id)
            }
            counted => debug!("Vote #{j} on claim '{}' counted as {counted:?}", state.claim_id),
        }

        let mut step = StepProof {
            index: j as u64 + 1,
            previous: prev.digest(),
            previous_state: prev.state.hash(),
            state,
            roots,
            nullifiers_before,
            nullifiers_after: nullifiers.root(),
            vote: Some(PublicVote {
                signal: vote.signal,
                nullifier: vote.nullifier,
                value: vote.value,
                outcome,
            }),
            attestation: Vec::new(),
        };
        step.attestation = prover.attest(&step.digest())?;
        debug!(
            "Rolled #{j}: positives={} negatives={} ignored={}",
            step.state.positives, step.state.negatives, step.state.ignored
        );
        steps.push(step);
    }

    let proof = ClaimRollupProof {
        community_id: community_id.to_string(),
        claim_id: steps[0].state.claim_id.clone(),
        verification_key: vk.as_ref().clone(),
        steps,
    };
    if let Some(state) = proof.public_output() {
        info!(
            "Claim '{}' rolled up {} votes: positives={} negatives={} ignored={} result={:?}",
            state.claim_id,
            votes.len(),
            state.positives,
            state.negatives,
            state.ignored,
            state.result
        );
    }
    Ok(proof)
}
