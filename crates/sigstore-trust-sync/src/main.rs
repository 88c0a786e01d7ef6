//! Sigstore trust cache synchronizer
//!
//! Prepares the local trust cache from a pinned anchor bundle, keeps it in
//! step with the trust repository, and reports on cached trust material.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sigstore_trust_cache::config::default_cache_dir;
use sigstore_trust_cache::{
    is_created, needs_refresh, DelegationGraph, Error, LocalCache, Result, TrustConfig, Usage,
    PUBLIC_GOOD_ROOT_DIGEST,
};

/// Keep a verified local cache of Sigstore trust material
#[derive(Parser, Debug)]
#[command(name = "sigstore-trust-sync", version, about, long_about = None)]
struct Cli {
    /// Enable verbose output. Repeat for more verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,

    /// Cache root (defaults to ~/.sigstore/root)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Prepare the cache if needed and synchronize it with the repository
    Sync(SyncArgs),

    /// Report cache freshness without touching the network
    Status,

    /// List cached targets for a usage category
    Targets(TargetsArgs),
}

#[derive(Args, Debug)]
struct SyncArgs {
    /// Directory holding the bundled root.json and targets/
    #[arg(long)]
    anchor_dir: PathBuf,

    /// Expected SHA-256 of the bundled root.json
    #[arg(long, default_value = PUBLIC_GOOD_ROOT_DIGEST)]
    root_digest: String,

    /// Use the staging repository
    #[arg(long, conflicts_with = "metadata_url")]
    staging: bool,

    /// Base URL of the repository metadata
    #[arg(long)]
    metadata_url: Option<String>,

    /// Base URL of the repository targets
    #[arg(long)]
    targets_url: Option<String>,

    /// Bound on each network operation, in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Usage categories to materialize (default: all recognized)
    #[arg(long = "usage")]
    usages: Vec<String>,

    /// Refresh even if the cached timestamp is still valid
    #[arg(long)]
    force: bool,
}

#[derive(Args, Debug)]
struct TargetsArgs {
    /// Usage category, e.g. signing-ca or transparency-log
    #[arg(long)]
    usage: String,
}

impl SyncArgs {
    fn config(&self, cache_dir: PathBuf) -> TrustConfig {
        let mut config = match (&self.metadata_url, self.staging) {
            (Some(url), _) => TrustConfig::for_repository(url),
            (None, true) => TrustConfig::staging(),
            (None, false) => TrustConfig::production(),
        }
        .with_cache_dir(cache_dir);

        if let Some(ref url) = self.targets_url {
            config = config.with_targets_url(url.clone());
        }
        if let Some(secs) = self.timeout_secs {
            config = config.with_timeout(Duration::from_secs(secs));
        }
        if !self.usages.is_empty() {
            config = config.with_usages(self.usages.iter().map(|u| Usage::parse(u)).collect());
        }
        config
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json);

    let cache_dir = match cli.cache_dir.clone().map(Ok).unwrap_or_else(default_cache_dir) {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(1);
        }
    };
    tracing::debug!(cache_dir = %cache_dir.display(), "resolved cache root");

    let result = match cli.command {
        Commands::Sync(args) => run_sync(&args, cache_dir).await,
        Commands::Status => run_status(cache_dir),
        Commands::Targets(args) => run_targets(&args, cache_dir),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(Error::BootstrapIntegrity { .. }) => {
            eprintln!("Trusted root metadata does not match expected file digest!");
            ExitCode::from(1)
        }
        Err(e) => {
            tracing::error!(retryable = e.is_retryable(), "{}", e);
            ExitCode::from(1)
        }
    }
}

fn init_tracing(verbose: u8, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match verbose {
        0 => EnvFilter::new("info"),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[cfg(feature = "tuf")]
async fn run_sync(args: &SyncArgs, cache_dir: PathBuf) -> Result<()> {
    use sigstore_trust_cache::{TrustAnchorBundle, TrustUpdater, TufMetadataClient};

    let config = args.config(cache_dir);
    let bundle = TrustAnchorBundle::from_dir(&args.anchor_dir, args.root_digest.as_str())?;
    let client = TufMetadataClient::new(&config)?;
    let updater = TrustUpdater::prepare(&config, &bundle, client).await?;

    let report = if args.force {
        updater.force_sync().await?
    } else {
        updater.sync().await?
    };

    if report.refreshed || !report.fetched.is_empty() {
        println!(
            "synchronized: {} resolved, {} fetched, {} already cached",
            report.resolved,
            report.fetched.len(),
            report.already_cached
        );
    } else {
        println!("trust metadata is fresh; nothing to do");
    }
    Ok(())
}

#[cfg(not(feature = "tuf"))]
async fn run_sync(_args: &SyncArgs, _cache_dir: PathBuf) -> Result<()> {
    Err(Error::Config(
        "sync requires the `tuf` feature of sigstore-trust-sync".into(),
    ))
}

fn run_status(cache_dir: PathBuf) -> Result<()> {
    let cache = LocalCache::open(&cache_dir);
    println!("cache:           {}", cache_dir.display());
    println!("bootstrapped:    {}", cache.is_bootstrapped());
    println!("ever refreshed:  {}", is_created(&cache_dir));
    println!("needs refresh:   {}", needs_refresh(&cache));
    Ok(())
}

fn run_targets(args: &TargetsArgs, cache_dir: PathBuf) -> Result<()> {
    let cache = LocalCache::open(&cache_dir);
    let Some(graph) = DelegationGraph::load(&cache)? else {
        tracing::warn!("no targets metadata cached yet; run `sync` first");
        return Ok(());
    };

    for record in graph.resolve_usage(&args.usage)? {
        let cached = cache.target_path(&record.name)?.is_file();
        println!(
            "{}\t{}\t{}",
            record.name,
            record.sha256,
            if cached { "cached" } else { "missing" }
        );
    }
    Ok(())
}
