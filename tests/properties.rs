use proptest::prelude::*;
use std::sync::OnceLock;
use zkp_claim_rollup::rollup::{fold, GroupRoots};
use zkp_claim_rollup::{
    ClaimState, CollectedVote, FieldBytes, Group, Identity, NullifierSet, VoteOutcome,
};

const CLAIM: &str = "k";
const MEMBERS: usize = 4;
const OUTSIDERS: usize = 2;

struct Fixture {
    electors: Group,
    roots: GroupRoots,
    /// `ballots[elector][value]` for values 0, 1 and the out-of-domain 2.
    ballots: Vec<Vec<CollectedVote>>,
}

fn fixture() -> &'static Fixture {
    static FIXTURE: OnceLock<Fixture> = OnceLock::new();
    FIXTURE.get_or_init(|| {
        let identities: Vec<Identity> = (0..MEMBERS + OUTSIDERS)
            .map(|i| Identity::random(i as u64))
            .collect();
        let mut electors = Group::create("claims.k.electors");
        for identity in identities.iter().take(MEMBERS) {
            electors
                .enroll(identity.commitment(), identity.public_key())
                .unwrap();
        }
        let roots = GroupRoots {
            validators: Group::create("v").root(),
            auditors: Group::create("a").root(),
            electors: electors.root(),
        };
        let ballots = identities
            .iter()
            .map(|identity| {
                (0..3u64)
                    .map(|value| identity.cast_vote(CLAIM, FieldBytes::from(value)).unwrap())
                    .collect()
            })
            .collect();
        Fixture {
            electors,
            roots,
            ballots,
        }
    })
}

fn ballot() -> impl Strategy<Value = (usize, usize)> {
    (0..MEMBERS + OUTSIDERS, 0..3usize)
}

fn run(
    fixture: &Fixture,
    required: (u64, u64),
    picks: &[(usize, usize)],
) -> Vec<(ClaimState, VoteOutcome)> {
    let mut nullifiers = NullifierSet::new();
    let mut state = ClaimState::new(CLAIM, required.0, required.1);
    let mut trace = Vec::with_capacity(picks.len());
    for &(elector, value) in picks {
        let vote = &fixture.ballots[elector][value];
        let enrollment = fixture.electors.enrollment(&vote.elector);
        let (next, outcome) =
            fold(&state, &fixture.roots, enrollment.as_ref(), &mut nullifiers, vote).unwrap();
        state = next.clone();
        trace.push((next, outcome));
    }
    trace
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn counters_stay_consistent_and_monotonic(
        required_positives in 0u64..4,
        required_votes in 0u64..6,
        picks in prop::collection::vec(ballot(), 0..12),
    ) {
        let fixture = fixture();
        let mut previous = ClaimState::new(CLAIM, required_positives, required_votes);
        for (state, _) in run(fixture, (required_positives, required_votes), &picks) {
            prop_assert!(state.is_consistent());
            prop_assert_eq!(state.total, previous.total + 1);
            prop_assert!(state.positives >= previous.positives);
            prop_assert!(state.negatives >= previous.negatives);
            prop_assert!(state.ignored >= previous.ignored);
            previous = state;
        }
    }

    #[test]
    fn terminal_result_is_frozen(
        required_positives in 0u64..3,
        required_votes in 1u64..4,
        picks in prop::collection::vec(ballot(), 1..12),
    ) {
        let fixture = fixture();
        let trace = run(fixture, (required_positives, required_votes), &picks);
        if let Some(first_final) = trace.iter().position(|(s, _)| s.result.is_final()) {
            let frozen = &trace[first_final].0;
            for (state, outcome) in &trace[first_final + 1..] {
                prop_assert_eq!(state.positives, frozen.positives);
                prop_assert_eq!(state.negatives, frozen.negatives);
                prop_assert_eq!(state.result, frozen.result);
                prop_assert!(!outcome.is_counted());
            }
        }
    }

    #[test]
    fn replayed_vote_only_adds_ignored(
        elector in 0..MEMBERS,
        value in 0..2usize,
    ) {
        let fixture = fixture();
        let trace = run(fixture, (10, 10), &[(elector, value), (elector, value)]);
        let (first, second) = (&trace[0].0, &trace[1].0);
        prop_assert_eq!(second.positives, first.positives);
        prop_assert_eq!(second.negatives, first.negatives);
        prop_assert_eq!(second.ignored, first.ignored + 1);
    }

    #[test]
    fn outsider_votes_are_never_counted(
        outsider in MEMBERS..MEMBERS + OUTSIDERS,
        value in 0..3usize,
    ) {
        let fixture = fixture();
        let trace = run(fixture, (1, 1), &[(outsider, value)]);
        prop_assert!(!trace[0].1.is_counted());
        prop_assert_eq!(trace[0].0.ignored, 1);
    }
}
