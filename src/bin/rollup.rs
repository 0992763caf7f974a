use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use zkp_claim_rollup::{
    config::Config, CollectedVote, FileStore, KvStore, MemoryStore, RollupProver, SignerBackend,
    TallyService,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Tally collected votes for a claim", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "rollup.toml")]
    config: PathBuf,

    /// Overrides `[store] dir` from the config file.
    #[arg(long)]
    store_dir: Option<PathBuf>,

    #[arg(long)]
    claim_id: String,

    /// JSON array of collected votes.
    #[arg(short, long)]
    votes_file: PathBuf,

    #[arg(short, long, default_value = "rollup.json")]
    output: PathBuf,

    /// Tally an unregistered claim in this community. Requires both
    /// thresholds as well.
    #[arg(long, requires_all = ["required_positives", "required_votes"])]
    community_id: Option<String>,

    #[arg(long)]
    required_positives: Option<u64>,

    #[arg(long)]
    required_votes: Option<u64>,
}

fn load_votes(path: &PathBuf, config: &Config) -> Result<Vec<CollectedVote>> {
    let metadata = fs::metadata(path)
        .with_context(|| format!("Failed to read votes file metadata: {}", path.display()))?;
    let max_size = config.limits.max_votes_file_size;
    if metadata.len() > max_size {
        return Err(anyhow::anyhow!(
            "Votes file too large: {} bytes (max {} bytes)",
            metadata.len(),
            max_size
        ));
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read votes file: {}", path.display()))?;
    let votes: Vec<CollectedVote> =
        serde_json::from_str(&content).context("Failed to parse votes JSON")?;

    if votes.len() > config.limits.max_votes_per_rollup {
        return Err(anyhow::anyhow!(
            "Too many votes: {} (max {} per rollup)",
            votes.len(),
            config.limits.max_votes_per_rollup
        ));
    }
    Ok(votes)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = Config::load_from_file_or_default(&args.config);
    if let Some(dir) = &args.store_dir {
        config.store.dir = dir.clone();
    }
    debug!("Using configuration: {config:?}");

    let store: Arc<dyn KvStore> = if config.store.enable_persistence {
        info!("Opening store at {}", config.store.dir.display());
        Arc::new(FileStore::open(&config.store.dir)?)
    } else {
        info!("Persistence disabled, using an in-memory store");
        Arc::new(MemoryStore::new())
    };

    let backend = SignerBackend::from_config(&config.aggregator)
        .context("Failed to load aggregator key")?;
    println!("Aggregator address: {:?}", backend.address());
    let prover = Arc::new(RollupProver::new(Arc::new(backend)));
    let service = TallyService::new(store, prover);

    println!("Loading votes from: {}", args.votes_file.display());
    let votes = load_votes(&args.votes_file, &config)?;
    println!("Loaded {} votes", votes.len());

    let proof = match (&args.community_id, args.required_positives, args.required_votes) {
        (Some(community_id), Some(positives), Some(required)) => {
            service.rollup_claim(community_id, &args.claim_id, positives, required, &votes)?
        }
        _ => service.rollup_registered_claim(&args.claim_id, &votes)?,
    };

    let json = serde_json::to_string_pretty(&proof).context("Failed to serialize rollup proof")?;
    fs::write(&args.output, json)
        .with_context(|| format!("Failed to write proof file: {}", args.output.display()))?;

    let state = proof
        .public_output()
        .context("Rollup produced an empty proof chain")?;
    println!("Claim: {}", state.claim_id);
    println!("  Positives: {}", state.positives);
    println!("  Negatives: {}", state.negatives);
    println!("  Ignored:   {}", state.ignored);
    println!("  Total:     {}", state.total);
    println!("  Result:    {:?}", state.result);
    println!("Proof written to: {}", args.output.display());

    Ok(())
}
