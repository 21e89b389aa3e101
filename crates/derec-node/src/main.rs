//! DeRec Node - Command-line entry point
//!
//! Runs an owner and three helpers in one process over the local bus.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::time::Instant;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use derec_core::{HelperId, SecretId};
use derec_engine::{SecretSharingEngine, ShamirEngine};
use derec_node::{
    spawn_node, Helper, LocalBus, NodeConfig, NodeHandle, Owner, Participant, VerificationStatus,
};

/// How long any single simulation step may take
const STEP_TIMEOUT: Duration = Duration::from_secs(20);

/// Poll period while waiting on a node
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(name = "derec-node")]
#[command(about = "Decentralized secret recovery between one owner and three helpers", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (falls back to $DEREC_CONFIG, then defaults)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run pairing, protection, verification and recovery in-process
    Simulate {
        /// Name of the secret to protect
        #[arg(short, long, default_value = "pw")]
        name: String,

        /// Secret value to protect
        #[arg(short, long, default_value = "s3cret")]
        secret: String,

        /// Seed for a deterministic engine
        #[arg(long)]
        seed: Option<u64>,

        /// Also recover through discovery with a fresh owner
        #[arg(long)]
        discover: bool,

        /// Print the final owner state as JSON
        #[arg(long)]
        json: bool,
    },

    /// Write a default configuration file
    InitConfig {
        /// Output path
        #[arg(short, long, default_value = "derec.json")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "derec_node=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::InitConfig { output, force } => init_config(&output, force),
        Commands::Simulate {
            name,
            secret,
            seed,
            discover,
            json,
        } => {
            let config = load_config(cli.config)?;
            let engine: Arc<dyn SecretSharingEngine> = match seed {
                Some(seed) => Arc::new(ShamirEngine::from_seed(seed)),
                None => Arc::new(ShamirEngine::new()),
            };
            simulate(config, engine, &name, &secret, discover, json).await
        }
    }
}

fn load_config(path: Option<PathBuf>) -> Result<NodeConfig> {
    let path = path.or_else(|| std::env::var_os("DEREC_CONFIG").map(PathBuf::from));
    match path {
        Some(path) => {
            let config = NodeConfig::load(&path)
                .with_context(|| format!("loading config from {:?}", path))?;
            info!("Loaded config from {:?}", path);
            Ok(config)
        }
        None => Ok(NodeConfig::default()),
    }
}

fn init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        bail!("{:?} already exists (use --force to overwrite)", output);
    }
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    NodeConfig::default().save(output)?;
    println!("Wrote default configuration to {}", output.display());
    Ok(())
}

/// Poll `node` until `check` holds
async fn wait_for<P, F>(node: &NodeHandle<P>, what: &str, check: F) -> Result<()>
where
    P: Participant,
    F: Fn(&P) -> bool + Clone + Send + 'static,
{
    let started = Instant::now();
    loop {
        if node.inspect(check.clone()).await? {
            return Ok(());
        }
        if started.elapsed() > STEP_TIMEOUT {
            bail!("timed out waiting for {}", what);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Approve the pending request from `owner_name` on every helper
async fn approve_all(helpers: &[NodeHandle<Helper>], owner_name: &str) -> Result<()> {
    for helper in helpers {
        let name = owner_name.to_string();
        let wanted = name.clone();
        wait_for(helper, "pairing request", move |h: &Helper| {
            h.pending_requests().any(|r| r.owner_name == wanted)
        })
        .await?;
        helper
            .act(move |h, now| h.approve_pairing(&name, now))
            .await?;
    }
    Ok(())
}

async fn simulate(
    config: NodeConfig,
    engine: Arc<dyn SecretSharingEngine>,
    name: &str,
    secret: &str,
    discover: bool,
    json: bool,
) -> Result<()> {
    config.validate()?;
    let bus = LocalBus::new();
    let tick = Duration::from_millis(config.tick_interval_ms);

    let helpers: Vec<NodeHandle<Helper>> = HelperId::all()
        .map(|id| {
            spawn_node(
                Helper::new(id, config.clone(), Arc::clone(&engine)),
                bus.clone(),
                tick,
            )
        })
        .collect();
    let owner = spawn_node(
        Owner::new(config.clone(), Arc::clone(&engine)),
        bus.clone(),
        tick,
    );

    // Pairing
    wait_for(&owner, "helpers to come online", |o: &Owner| o.online_helpers().len() == 3).await?;
    owner.act(|o, now| o.pair_with_helpers(now)).await?;
    approve_all(&helpers, &config.owner_name).await?;
    wait_for(&owner, "pairing", |o: &Owner| o.paired_count() == 3).await?;

    // Protection
    let (secret_name, secret_value) = (name.to_string(), secret.to_string());
    owner
        .act(move |o, now| o.protect_secret(&secret_name, &secret_value, now))
        .await?;
    wait_for(&owner, "share acknowledgements", |o: &Owner| {
        o.helpers().with_share().count() == 3
    })
    .await?;

    // Verification
    wait_for(&owner, "verification", |o: &Owner| {
        o.helpers()
            .paired()
            .all(|h| h.verification_status == VerificationStatus::Valid)
    })
    .await?;

    // Recovery of the known secret
    let secret_id: SecretId = owner
        .inspect(|o| o.secrets().first().map(|s| s.id.clone()))
        .await?
        .context("owner has no secret")?;
    let target = secret_id.clone();
    owner.act(move |o, now| o.recover_secret(&target, now)).await?;
    wait_for(&owner, "recovery", |o: &Owner| o.recovered().is_some()).await?;
    let recovered = owner
        .inspect(|o| o.recovered().map(|r| (r.name.clone(), r.value.clone())))
        .await?
        .context("recovery produced no value")?;
    println!("Recovered \"{}\": {}", recovered.0, recovered.1);

    let mut owner = owner;
    if discover {
        owner.shutdown().await?;
        info!("Starting a fresh owner in recovery mode");

        owner = spawn_node(
            Owner::new(config.clone(), Arc::clone(&engine)),
            bus.clone(),
            tick,
        );
        wait_for(&owner, "helpers to come online", |o: &Owner| o.online_helpers().len() == 3)
            .await?;
        owner
            .act(|o, now| {
                o.set_recovery_mode(true);
                o.pair_with_helpers(now)
            })
            .await?;
        approve_all(&helpers, &config.owner_name).await?;
        wait_for(&owner, "pairing", |o: &Owner| o.paired_count() == 3).await?;

        owner.act(|o, now| o.discover_secrets(now)).await?;
        let wanted = secret_id.clone();
        wait_for(&owner, "discovery", move |o: &Owner| {
            o.discovered(&wanted).map_or(false, |d| d.is_recoverable())
        })
        .await?;

        let target = secret_id.clone();
        owner
            .act(move |o, now| o.recover_discovered(&target, now))
            .await?;
        wait_for(&owner, "discovered recovery", |o: &Owner| o.recovered().is_some()).await?;
        let recovered = owner
            .inspect(|o| o.recovered().map(|r| (r.name.clone(), r.value.clone())))
            .await?
            .context("recovery produced no value")?;
        println!("Recovered \"{}\" through discovery: {}", recovered.0, recovered.1);
    }

    if json {
        let snapshot = owner.inspect(|o| o.snapshot()).await?;
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    }

    owner.shutdown().await?;
    for helper in helpers {
        helper.shutdown().await?;
    }
    Ok(())
}
