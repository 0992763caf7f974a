use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use ethers::signers::{LocalWallet, Signer};
use zkp_claim_rollup::{
    community_digest, config::Config, ethereum::sign_digest, service::electors_group, Claim,
    FileStore, Identity, Plan, RollupProver, SignerBackend, TallyService, VoteValue,
};

/// Registers a community and a claim, enrolls random electors and writes their
/// votes to a file for the `rollup` binary.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "rollup.toml")]
    config: PathBuf,

    #[arg(long)]
    store_dir: Option<PathBuf>,

    #[arg(long, default_value = "community-1")]
    community_id: String,

    #[arg(long, default_value = "plan-1")]
    plan_id: String,

    #[arg(long, default_value = "claim-1")]
    claim_id: String,

    #[arg(short = 'n', long, default_value_t = 5)]
    count: usize,

    /// How many of the electors vote positive; the rest vote negative.
    #[arg(long, default_value_t = 3)]
    positives: usize,

    #[arg(long, default_value_t = 3)]
    required_positives: u64,

    #[arg(long, default_value_t = 5)]
    required_votes: u64,

    #[arg(short, long, default_value = "votes.json")]
    output: PathBuf,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if args.positives > args.count {
        return Err(anyhow::anyhow!(
            "Cannot have {} positive votes with only {} electors",
            args.positives,
            args.count
        ));
    }

    let mut config = Config::load_from_file_or_default(&args.config);
    if let Some(dir) = &args.store_dir {
        config.store.dir = dir.clone();
    }

    let store = Arc::new(FileStore::open(&config.store.dir)?);
    let backend = SignerBackend::from_config(&config.aggregator)?;
    let service = TallyService::new(store, Arc::new(RollupProver::new(Arc::new(backend))));

    let owner = LocalWallet::new(&mut rand::thread_rng());
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("System clock is before the unix epoch")?
        .as_secs();
    let signature = sign_digest(&owner, community_digest(&args.community_id, timestamp))?;
    service.register_community(&args.community_id, owner.address(), timestamp, &signature)?;
    info!(
        "Community '{}' owned by {:?}",
        args.community_id,
        owner.address()
    );
    service.register_plan(Plan {
        id: args.plan_id.clone(),
        community_id: args.community_id.clone(),
    })?;
    service.register_claim(Claim {
        id: args.claim_id.clone(),
        community_id: args.community_id.clone(),
        plan_id: args.plan_id.clone(),
        required_positives: args.required_positives,
        required_votes: args.required_votes,
    })?;

    println!("Generating {} electors...", args.count);
    let electors_group = electors_group(&args.claim_id);
    let mut votes = Vec::with_capacity(args.count);
    let mut enrollees = Vec::with_capacity(args.count);
    for i in 0..args.count {
        let identity = Identity::random(rand::random::<u32>() as u64);
        enrollees.push(
            identity
                .enrollee(service.prover())
                .context("Failed to prove elector ownership")?,
        );

        let value = if i < args.positives {
            VoteValue::Positive
        } else {
            VoteValue::Negative
        };
        votes.push(
            identity
                .cast_vote(&args.claim_id, value.encode())
                .context("Failed to sign vote")?,
        );
    }
    service.add_members(&electors_group, &enrollees)?;
    info!(
        "Enrolled {} electors in '{}', root {}",
        args.count,
        electors_group,
        service.group(&electors_group)?.root()
    );

    let json = serde_json::to_string_pretty(&votes).context("Failed to serialize votes")?;
    fs::write(&args.output, json)
        .with_context(|| format!("Failed to write votes file: {}", args.output.display()))?;

    println!("Wrote {} votes to {}", votes.len(), args.output.display());
    Ok(())
}
