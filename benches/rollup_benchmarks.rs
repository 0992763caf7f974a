use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ethers::signers::LocalWallet;
use pasta_curves::pallas;
use std::sync::Arc;
use zkp_claim_rollup::rollup::{fold, rollup_votes, GroupRoots};
use zkp_claim_rollup::{
    ClaimState, CollectedVote, FieldBytes, Group, Identity, MerkleMap, NullifierSet,
    RollupProver, SignerBackend, VoteValue,
};

fn entries(count: u64) -> Vec<(FieldBytes, FieldBytes)> {
    (0..count)
        .map(|i| (FieldBytes::from(i + 1), FieldBytes::from(1u64)))
        .collect()
}

fn electorate(count: usize) -> (Group, GroupRoots, Vec<CollectedVote>) {
    let identities: Vec<Identity> = (0..count).map(|i| Identity::random(i as u64)).collect();
    let mut electors = Group::create("claims.bench.electors");
    for identity in &identities {
        electors
            .enroll(identity.commitment(), identity.public_key())
            .unwrap();
    }
    let roots = GroupRoots {
        validators: Group::create("v").root(),
        auditors: Group::create("a").root(),
        electors: electors.root(),
    };
    let votes = identities
        .iter()
        .map(|identity| {
            identity
                .cast_vote("bench", VoteValue::Positive.encode())
                .unwrap()
        })
        .collect();
    (electors, roots, votes)
}

fn bench_map_construction(c: &mut Criterion) {
    let mut group = c.benchmark_group("map_construction");

    for count in [16u64, 256, 1024, 4096].iter() {
        let entries = entries(*count);
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, _| {
            b.iter(|| black_box(MerkleMap::from_entries(black_box(entries.clone())).unwrap()))
        });
    }

    group.finish();
}

fn bench_map_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("map_insert");

    for count in [16u64, 256, 1024].iter() {
        let map = MerkleMap::from_entries(entries(*count)).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, _| {
            b.iter(|| {
                let mut map = map.clone();
                black_box(map.insert(FieldBytes::from(u64::MAX), FieldBytes::from(1u64)))
            })
        });
    }

    group.finish();
}

fn bench_map_fill(c: &mut Criterion) {
    let mut group = c.benchmark_group("map_fill_one_by_one");
    group.sample_size(10);

    for count in [256u64, 1024, 4096].iter() {
        let entries = entries(*count);
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, _| {
            b.iter(|| {
                let mut map = MerkleMap::new();
                for (key, value) in &entries {
                    map.insert(*key, *value).unwrap();
                }
                black_box(map.root())
            })
        });
    }

    group.finish();
}

fn bench_witness(c: &mut Criterion) {
    let map = MerkleMap::from_entries(entries(1024)).unwrap();
    let key = FieldBytes::from(512u64);
    let witness = map.witness(&key).unwrap();
    let root = map.root();

    c.bench_function("witness_generation", |b| {
        b.iter(|| black_box(map.witness(black_box(&key))))
    });
    c.bench_function("witness_verification", |b| {
        b.iter(|| black_box(witness.verify(black_box(&root))))
    });
}

fn bench_fold(c: &mut Criterion) {
    let (electors, roots, votes) = electorate(1);
    let enrollment = electors.enrollment(&votes[0].elector);
    let state = ClaimState::new("bench", 1, 10);

    c.bench_function("fold_single_vote", |b| {
        b.iter(|| {
            let mut nullifiers = NullifierSet::new();
            black_box(
                fold(
                    &state,
                    &roots,
                    enrollment.as_ref(),
                    &mut nullifiers,
                    black_box(&votes[0]),
                )
                .unwrap(),
            )
        })
    });
}

fn bench_rollup(c: &mut Criterion) {
    let prover = RollupProver::new(Arc::new(SignerBackend::new(LocalWallet::new(
        &mut rand::thread_rng(),
    ))));
    prover.verification_key().unwrap();

    let mut group = c.benchmark_group("rollup_votes");
    group.sample_size(10);

    for count in [4usize, 64, 1024].iter() {
        let (electors, roots, votes) = electorate(*count);
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, _| {
            b.iter(|| {
                let mut nullifiers = NullifierSet::new();
                black_box(
                    rollup_votes(
                        &prover,
                        "bench",
                        ClaimState::new("bench", *count as u64, *count as u64),
                        roots,
                        &electors,
                        &mut nullifiers,
                        &votes,
                    )
                    .unwrap(),
                )
            })
        });
    }

    group.finish();
}

fn bench_poseidon_hash(c: &mut Criterion) {
    c.bench_function("poseidon_hash", |b| {
        b.iter(|| {
            black_box(zkp_claim_rollup::utils::poseidon_hash(
                black_box(pallas::Base::from(42)),
                black_box(pallas::Base::from(99)),
            ))
        })
    });
}

criterion_group!(
    benches,
    bench_map_construction,
    bench_map_insert,
    bench_map_fill,
    bench_witness,
    bench_fold,
    bench_rollup,
    bench_poseidon_hash
);
criterion_main!(benches);
