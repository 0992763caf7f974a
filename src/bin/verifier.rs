use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, error, info, warn};
use std::fs;
use std::path::PathBuf;
use zkp_claim_rollup::{
    config::Config, ethereum::parse_address, ClaimRollupProof, SignatureVerifier,
    VerificationKey, MAP_HEIGHT,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Verify a claim rollup proof", long_about = None)]
struct Args {
    #[arg(short, long)]
    proof_file: PathBuf,

    /// Trusted aggregator address. Without it the proof is only checked for
    /// internal consistency against the key it carries.
    #[arg(short, long)]
    aggregator: Option<String>,

    #[arg(short, long, default_value = "rollup.toml")]
    config: PathBuf,

    /// Only check the last step instead of the whole chain.
    #[arg(long)]
    last_step_only: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = Config::load_from_file_or_default(&args.config);

    if !args.proof_file.exists() {
        return Err(anyhow::anyhow!(
            "Proof file does not exist: {}",
            args.proof_file.display()
        ));
    }

    info!("Loading proof from: {}", args.proof_file.display());
    println!("Loading proof from: {}", args.proof_file.display());

    let metadata =
        fs::metadata(&args.proof_file).context("Failed to read proof file metadata")?;
    debug!("Proof file size: {} bytes", metadata.len());

    let max_proof_file_size = config.limits.effective_max_proof_file_size();
    if metadata.len() > max_proof_file_size {
        return Err(anyhow::anyhow!(
            "Proof file too large: {} bytes (max {} bytes). Set ROLLUP_MAX_PROOF_FILE_SIZE to raise the limit",
            metadata.len(),
            max_proof_file_size
        ));
    }

    let content = fs::read_to_string(&args.proof_file).context("Failed to read proof file")?;
    let proof: ClaimRollupProof =
        serde_json::from_str(&content).context("Failed to parse proof JSON")?;

    let vk = match &args.aggregator {
        Some(address) => VerificationKey {
            attester: parse_address(address)?,
            params_digest: VerificationKey::params_digest(),
            map_height: MAP_HEIGHT,
        },
        None => {
            warn!("No trusted aggregator given, checking against the key embedded in the proof");
            proof.verification_key.clone()
        }
    };

    println!("Proof details:");
    println!("  Community: {}", proof.community_id);
    println!("  Claim: {}", proof.claim_id);
    println!("  Attester: {:?}", proof.verification_key.attester);
    println!("  Votes folded: {}", proof.votes_folded());

    let result = if args.last_step_only {
        proof.verify(&SignatureVerifier, &vk)
    } else {
        proof.verify_chain(&SignatureVerifier, &vk)
    };

    match result {
        Ok(()) => {
            let state = proof
                .public_output()
                .context("Verified proof has no output")?;
            info!("Proof verification PASSED");
            println!("\n✓ Proof verification PASSED!");
            println!("  Positives: {}", state.positives);
            println!("  Negatives: {}", state.negatives);
            println!("  Ignored:   {}", state.ignored);
            println!("  Total:     {}", state.total);
            println!("  Result:    {:?}", state.result);
            Ok(())
        }
        Err(e) => {
            error!("Proof verification FAILED: {e}");
            println!("\n✗ Proof verification FAILED!");
            println!("Error: {e}");
            Err(anyhow::anyhow!("Proof verification failed"))
        }
    }
}
