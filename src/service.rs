//! Registration bookkeeping and the `rollup_claim` driver.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use ethers::types::{Address, Signature};
use log::{debug, info, warn};
use pasta_curves::pallas;
use serde::{Deserialize, Serialize};

use crate::backend::RollupProver;
use crate::error::{RollupError, RollupResult};
use crate::ethereum::verify_digest;
use crate::group::Group;
use crate::identity::Enrollee;
use crate::rollup::{rollup_votes, ClaimRollupProof, GroupRoots};
use crate::store::{community_key, KvStore, TypedStore};
use crate::types::{Claim, ClaimState, CollectedVote, Commitment, FieldBytes, Plan};
use crate::utils::{id_to_field, keccak_fields};

pub fn validators_group(community_id: &str) -> String {
    format!("communities.{community_id}.validators")
}

pub fn auditors_group(community_id: &str) -> String {
    format!("communities.{community_id}.auditors")
}

pub fn members_group(community_id: &str) -> String {
    format!("communities.{community_id}.members")
}

pub fn electors_group(claim_id: &str) -> String {
    format!("claims.{claim_id}.electors")
}

pub fn plan_claims_group(plan_id: &str) -> String {
    format!("plans.{plan_id}.claims")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Community {
    pub id: String,
    pub owner: Address,
}

/// Digest the owner signs to register `community_id` at unix time `timestamp`.
#[must_use]
pub fn community_digest(community_id: &str, timestamp: u64) -> [u8; 32] {
    keccak_fields(&[id_to_field(community_id), pallas::Base::from(timestamp)])
}

/// Marks a claim as being rolled up for as long as it lives.
struct ClaimGuard<'a> {
    active: &'a Mutex<HashSet<String>>,
    claim_id: String,
}

impl<'a> ClaimGuard<'a> {
    fn acquire(active: &'a Mutex<HashSet<String>>, claim_id: &str) -> RollupResult<Self> {
        let mut claims = active
            .lock()
            .map_err(|_| RollupError::ClaimBusy(claim_id.to_string()))?;
        if !claims.insert(claim_id.to_string()) {
            return Err(RollupError::ClaimBusy(claim_id.to_string()));
        }
        Ok(Self {
            active,
            claim_id: claim_id.to_string(),
        })
    }
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut claims) = self.active.lock() {
            claims.remove(&self.claim_id);
        }
    }
}

/// Entry point for registering groups and claims and rolling up votes.
pub struct TallyService {
    store: Arc<dyn KvStore>,
    prover: Arc<RollupProver>,
    active: Mutex<HashSet<String>>,
}

impl TallyService {
    pub fn new(store: Arc<dyn KvStore>, prover: Arc<RollupProver>) -> Self {
        Self {
            store,
            prover,
            active: Mutex::new(HashSet::new()),
        }
    }

    pub fn prover(&self) -> &RollupProver {
        &self.prover
    }

    pub fn store(&self) -> &dyn KvStore {
        self.store.as_ref()
    }

    /// Creates an empty group.
    pub fn register_group(&self, group_id: &str) -> RollupResult<Group> {
        if self.store.get_group(group_id)?.is_some() {
            return Err(RollupError::AlreadyExists(group_id.to_string()));
        }
        let group = Group::create(group_id);
        self.store.put_group(&group)?;
        info!("Group '{group_id}' has been registered");
        Ok(group)
    }

    pub fn group(&self, group_id: &str) -> RollupResult<Group> {
        self.store
            .get_group(group_id)?
            .ok_or_else(|| RollupError::GroupNotFound(group_id.to_string()))
    }

    /// Adds a member after checking its ownership proof, binding the
    /// commitment to the applicant's key. Returns `false` if it was already
    /// enrolled.
    pub fn add_member(&self, group_id: &str, enrollee: &Enrollee) -> RollupResult<bool> {
        Ok(self.add_members(group_id, std::slice::from_ref(enrollee))? == 1)
    }

    /// Adds many members with a single store write. Every application is
    /// checked before any is applied. Returns how many were new.
    pub fn add_members(&self, group_id: &str, enrollees: &[Enrollee]) -> RollupResult<usize> {
        let mut group = self.group(group_id)?;
        for enrollee in enrollees {
            if let Err(err) = enrollee.verify(&self.prover) {
                warn!(
                    "Rejected enrollment of {} in '{group_id}': {err}",
                    enrollee.commitment()
                );
                return Err(err);
            }
        }

        let mut added = 0;
        for enrollee in enrollees {
            if group.enroll(enrollee.commitment(), enrollee.public_key)? {
                added += 1;
            }
        }
        if added > 0 {
            self.store.put_group(&group)?;
            debug!("Enrolled {added} members in '{group_id}'");
        }
        Ok(added)
    }

    /// Members sorted by commitment value.
    pub fn group_members(&self, group_id: &str) -> RollupResult<Vec<Commitment>> {
        Ok(self.group(group_id)?.members())
    }

    /// Registers a community and its groups. `signature` must be the owner's
    /// signature over [`community_digest`].
    pub fn register_community(
        &self,
        community_id: &str,
        owner: Address,
        timestamp: u64,
        signature: &Signature,
    ) -> RollupResult<Community> {
        if !verify_digest(signature, community_digest(community_id, timestamp), owner) {
            return Err(RollupError::SignatureInvalid);
        }
        let key = community_key(community_id);
        if self.store.get_as::<Community>(&key)?.is_some() {
            return Err(RollupError::AlreadyExists(key));
        }

        let groups = [
            format!("communities.{community_id}.plans"),
            format!("communities.{community_id}.claims"),
            members_group(community_id),
            validators_group(community_id),
            auditors_group(community_id),
        ];
        for group_id in &groups {
            self.register_group(group_id)?;
        }

        let community = Community {
            id: community_id.to_string(),
            owner,
        };
        self.store.put_as(&key, &community)?;
        info!("Community '{community_id}' has been registered");
        Ok(community)
    }

    pub fn register_plan(&self, plan: Plan) -> RollupResult<Plan> {
        if self.store.get_plan(&plan.id)?.is_some() {
            return Err(RollupError::AlreadyExists(plan.id.clone()));
        }
        self.store.put_plan(&plan)?;
        info!(
            "Plan '{}' registered in community '{}'",
            plan.id, plan.community_id
        );
        Ok(plan)
    }

    pub fn plan(&self, plan_id: &str) -> RollupResult<Option<Plan>> {
        Ok(self.store.get_plan(plan_id)?)
    }

    /// Stores the claim configuration and creates its electors group.
    pub fn register_claim(&self, claim: Claim) -> RollupResult<Claim> {
        if self.store.get_claim(&claim.id)?.is_some() {
            return Err(RollupError::AlreadyExists(claim.id.clone()));
        }
        self.register_group(&electors_group(&claim.id))?;

        let plan_group = plan_claims_group(&claim.plan_id);
        let mut plan_claims = match self.store.get_group(&plan_group)? {
            Some(group) => group,
            None => Group::create(&plan_group),
        };
        plan_claims.insert(FieldBytes::from_field(id_to_field(&claim.id)))?;
        self.store.put_group(&plan_claims)?;

        self.store.put_claim(&claim)?;
        info!(
            "Claim '{}' registered in community '{}' (requires {} votes, {} positives)",
            claim.id, claim.community_id, claim.required_votes, claim.required_positives
        );
        Ok(claim)
    }

    pub fn claim(&self, claim_id: &str) -> RollupResult<Claim> {
        self.store
            .get_claim(claim_id)?
            .ok_or_else(|| RollupError::ClaimNotFound(claim_id.to_string()))
    }

    /// Folds `votes` into a fresh tally for `claim_id`.
    ///
    /// Groups are resolved before any folding; a missing group aborts with
    /// [`RollupError::GroupNotFound`]. The nullifier set and the proof are
    /// persisted together, and only after every vote has been folded.
    pub fn rollup_claim(
        &self,
        community_id: &str,
        claim_id: &str,
        required_positives: u64,
        required_votes: u64,
        votes: &[CollectedVote],
    ) -> RollupResult<ClaimRollupProof> {
        let _guard = ClaimGuard::acquire(&self.active, claim_id)?;

        self.prover.verification_key()?;

        let validators = self.group(&validators_group(community_id))?;
        let auditors = self.group(&auditors_group(community_id))?;
        let electors = self.group(&electors_group(claim_id))?;
        let mut nullifiers = self.store.get_nullifiers(claim_id)?;
        debug!(
            "Rolling claim '{claim_id}': {} electors, {} spent nullifiers, {} votes",
            electors.size(),
            nullifiers.len(),
            votes.len()
        );

        let roots = GroupRoots {
            validators: validators.root(),
            auditors: auditors.root(),
            electors: electors.root(),
        };
        let initial = ClaimState::new(claim_id, required_positives, required_votes);
        let proof = rollup_votes(
            &self.prover,
            community_id,
            initial,
            roots,
            &electors,
            &mut nullifiers,
            votes,
        )?;

        self.store.commit_rollup(claim_id, &nullifiers, &proof)?;
        Ok(proof)
    }

    /// Rolls up a registered claim using its stored thresholds.
    pub fn rollup_registered_claim(
        &self,
        claim_id: &str,
        votes: &[CollectedVote],
    ) -> RollupResult<ClaimRollupProof> {
        let claim = self.claim(claim_id)?;
        self.rollup_claim(
            &claim.community_id,
            &claim.id,
            claim.required_positives,
            claim.required_votes,
            votes,
        )
    }

    /// Latest persisted rollup proof for `claim_id`.
    pub fn finalized(&self, claim_id: &str) -> RollupResult<Option<ClaimRollupProof>> {
        Ok(self.store.get_rollup(claim_id)?)
    }

    pub fn finalized_state(&self, claim_id: &str) -> RollupResult<Option<ClaimState>> {
        Ok(self
            .finalized(claim_id)?
            .and_then(|proof| proof.public_output().cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SignerBackend;
    use crate::ethereum::sign_digest;
    use crate::identity::Identity;
    use crate::store::MemoryStore;
    use crate::types::{ClaimResult, VoteValue};
    use ethers::signers::{LocalWallet, Signer};
    use serde_json::Value;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn service_over(store: Arc<dyn KvStore>) -> TallyService {
        let backend = SignerBackend::new(LocalWallet::new(&mut rand::thread_rng()));
        TallyService::new(store, Arc::new(RollupProver::new(Arc::new(backend))))
    }

    fn service() -> TallyService {
        service_over(Arc::new(MemoryStore::new()))
    }

    fn register_community(service: &TallyService, community_id: &str) -> RollupResult<Community> {
        let owner = LocalWallet::new(&mut rand::thread_rng());
        let signature = sign_digest(&owner, community_digest(community_id, 1_700_000_000)).unwrap();
        service.register_community(community_id, owner.address(), 1_700_000_000, &signature)
    }

    fn claim(id: &str) -> Claim {
        Claim {
            id: id.to_string(),
            community_id: "c1".to_string(),
            plan_id: "p1".to_string(),
            required_positives: 1,
            required_votes: 1,
        }
    }

    #[test]
    fn test_register_group_twice() {
        let service = service();
        service.register_group("g").unwrap();
        assert!(matches!(
            service.register_group("g"),
            Err(RollupError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_add_member_is_idempotent() {
        let service = service();
        service.register_group("g").unwrap();
        let member = Identity::random(9);
        let enrollee = member.enrollee(service.prover()).unwrap();

        assert!(service.add_member("g", &enrollee).unwrap());
        let root = service.group("g").unwrap().root();
        assert!(!service.add_member("g", &enrollee).unwrap());
        assert_eq!(service.group("g").unwrap().root(), root);
        assert_eq!(service.group_members("g").unwrap(), vec![member.commitment()]);
        assert_eq!(
            service.group("g").unwrap().public_key(&member.commitment()),
            Some(member.public_key())
        );
    }

    #[test]
    fn test_add_member_unknown_group() {
        let service = service();
        let enrollee = Identity::random(1).enrollee(service.prover()).unwrap();
        assert!(matches!(
            service.add_member("nope", &enrollee),
            Err(RollupError::GroupNotFound(_))
        ));
    }

    #[test]
    fn test_add_member_requires_ownership() {
        let service = service();
        service.register_group("g").unwrap();
        let alice = Identity::random(1);
        let mallory = Identity::random(1);

        let mut claimed = alice.enrollee(service.prover()).unwrap();
        claimed.public_key = mallory.public_key();
        claimed.signature = mallory.sign_commitment().unwrap();
        assert!(matches!(
            service.add_member("g", &claimed),
            Err(RollupError::OwnershipMismatch)
        ));

        let mut unsigned = alice.enrollee(service.prover()).unwrap();
        unsigned.signature = mallory.sign_commitment().unwrap();
        assert!(matches!(
            service.add_member("g", &unsigned),
            Err(RollupError::SignatureInvalid)
        ));

        let mut unproven = mallory.enrollee(service.prover()).unwrap();
        unproven.ownership.attestation = vec![0; 65];
        assert!(matches!(
            service.add_member("g", &unproven),
            Err(RollupError::OwnershipMismatch)
        ));
        assert_eq!(service.group("g").unwrap().size(), 0);
    }

    #[test]
    fn test_add_members_checks_whole_batch_first() {
        let service = service();
        service.register_group("g").unwrap();
        let good = Identity::random(1).enrollee(service.prover()).unwrap();
        let mut bad = Identity::random(2).enrollee(service.prover()).unwrap();
        bad.signature = good.signature;

        assert!(service.add_members("g", &[good.clone(), bad]).is_err());
        assert_eq!(service.group("g").unwrap().size(), 0);
        assert_eq!(service.add_members("g", &[good]).unwrap(), 1);
    }

    #[test]
    fn test_register_community_creates_groups() {
        let service = service();
        register_community(&service, "c1").unwrap();
        for group in [validators_group("c1"), auditors_group("c1"), members_group("c1")] {
            assert_eq!(service.group(&group).unwrap().size(), 0);
        }
        assert!(matches!(
            register_community(&service, "c1"),
            Err(RollupError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_register_community_requires_owner_signature() {
        let service = service();
        let owner = LocalWallet::new(&mut rand::thread_rng());
        let signature = sign_digest(&owner, community_digest("c1", 5)).unwrap();

        for (community, owner_address, timestamp) in [
            ("c2", owner.address(), 5),
            ("c1", owner.address(), 6),
            ("c1", Address::zero(), 5),
        ] {
            assert!(matches!(
                service.register_community(community, owner_address, timestamp, &signature),
                Err(RollupError::SignatureInvalid)
            ));
        }
        assert!(service.group(&validators_group("c1")).is_err());

        let community = service
            .register_community("c1", owner.address(), 5, &signature)
            .unwrap();
        assert_eq!(community.owner, owner.address());
    }

    #[test]
    fn test_register_plan() {
        let service = service();
        let plan = Plan {
            id: "p1".to_string(),
            community_id: "c1".to_string(),
        };
        service.register_plan(plan.clone()).unwrap();

        assert_eq!(service.plan("p1").unwrap(), Some(plan.clone()));
        assert!(service.plan("p2").unwrap().is_none());
        assert!(matches!(
            service.register_plan(plan),
            Err(RollupError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_register_claim_links_plan() {
        let service = service();
        service.register_claim(claim("k1")).unwrap();
        service.register_claim(claim("k2")).unwrap();

        assert_eq!(service.group(&electors_group("k1")).unwrap().size(), 0);
        assert_eq!(service.group(&plan_claims_group("p1")).unwrap().size(), 2);
        assert!(matches!(
            service.register_claim(claim("k1")),
            Err(RollupError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_rollup_registered_claim_persists_result() {
        let service = service();
        register_community(&service, "c1").unwrap();
        service.register_claim(claim("k1")).unwrap();
        let alice = Identity::random(3);
        service
            .add_member(&electors_group("k1"), &alice.enrollee(service.prover()).unwrap())
            .unwrap();

        assert!(service.finalized("k1").unwrap().is_none());
        let vote = alice.cast_vote("k1", VoteValue::Positive.encode()).unwrap();
        service.rollup_registered_claim("k1", &[vote]).unwrap();

        let state = service.finalized_state("k1").unwrap().unwrap();
        assert_eq!(state.result, ClaimResult::Approved);
        assert!(service
            .store()
            .get_nullifiers("k1")
            .unwrap()
            .contains(&alice.nullifier("k1")));
    }

    /// Memory store whose rollup writes can be made to fail.
    #[derive(Default)]
    struct FlakyRollupStore {
        inner: MemoryStore,
        refuse_rollups: AtomicBool,
    }

    impl KvStore for FlakyRollupStore {
        fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
            self.inner.get(key)
        }

        fn put(&self, key: &str, value: Value) -> anyhow::Result<()> {
            if key.starts_with("rollups.") && self.refuse_rollups.load(Ordering::SeqCst) {
                return Err(anyhow::anyhow!("rollup write refused"));
            }
            self.inner.put(key, value)
        }

        fn remove(&self, key: &str) -> anyhow::Result<()> {
            self.inner.remove(key)
        }
    }

    #[test]
    fn test_failed_rollup_write_keeps_nullifiers_unspent() {
        let store = Arc::new(FlakyRollupStore::default());
        let service = service_over(store.clone());
        register_community(&service, "c1").unwrap();
        let mut config = claim("k1");
        config.required_votes = 3;
        service.register_claim(config).unwrap();
        let (alice, bob) = (Identity::random(1), Identity::random(2));
        service
            .add_members(
                &electors_group("k1"),
                &[
                    alice.enrollee(service.prover()).unwrap(),
                    bob.enrollee(service.prover()).unwrap(),
                ],
            )
            .unwrap();
        let alice_vote = alice.cast_vote("k1", VoteValue::Positive.encode()).unwrap();
        let bob_vote = bob.cast_vote("k1", VoteValue::Positive.encode()).unwrap();

        service.rollup_registered_claim("k1", &[alice_vote]).unwrap();
        let spent = service.store().get_nullifiers("k1").unwrap();

        store.refuse_rollups.store(true, Ordering::SeqCst);
        assert!(matches!(
            service.rollup_registered_claim("k1", &[bob_vote.clone()]),
            Err(RollupError::Store(_))
        ));
        assert_eq!(service.store().get_nullifiers("k1").unwrap(), spent);
        assert_eq!(service.finalized_state("k1").unwrap().unwrap().positives, 1);

        store.refuse_rollups.store(false, Ordering::SeqCst);
        let proof = service.rollup_registered_claim("k1", &[bob_vote]).unwrap();
        assert_eq!(proof.public_output().unwrap().positives, 1);
        assert_eq!(service.store().get_nullifiers("k1").unwrap().len(), 2);
    }

    #[test]
    fn test_rollup_unknown_claim() {
        let service = service();
        assert!(matches!(
            service.rollup_registered_claim("missing", &[]),
            Err(RollupError::ClaimNotFound(_))
        ));
    }

    #[test]
    fn test_claim_guard_blocks_reentry() {
        let active = Mutex::new(HashSet::new());
        let guard = ClaimGuard::acquire(&active, "k1").unwrap();
        assert!(matches!(
            ClaimGuard::acquire(&active, "k1"),
            Err(RollupError::ClaimBusy(_))
        ));
        assert!(ClaimGuard::acquire(&active, "k2").is_ok());
        drop(guard);
        assert!(ClaimGuard::acquire(&active, "k1").is_ok());
    }
}
