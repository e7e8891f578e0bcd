//! `handle-restore`: resolve YouTube handles and channel ids to display
//! names from the command line.
//!
//! Keys come from the arguments, or one per line on stdin when none are
//! given. Each result is printed as `key<TAB>name`, with `-` for keys that
//! could not be resolved.

mod demo;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use futures_util::future::join_all;
use name_resolver::{FileStorage, ResolveKey, ResolverConfig, ResolverService, YouTubeSource};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "handle-restore", version, about)]
struct Args {
    /// `@handle`, `UC…` channel id, or the `h:` / `cid:` cache form.
    keys: Vec<String>,

    /// Keep resolved names in memory only.
    #[arg(long)]
    no_persist: bool,

    /// Location of the persisted name cache.
    #[arg(long, env = "HANDLE_RESTORE_CACHE")]
    cache: Option<PathBuf>,

    /// Render the keys as chat rows in an in-memory page and restore them.
    #[arg(long)]
    demo: bool,

    /// Print resolver counters as JSON to stderr when done.
    #[arg(long)]
    stats: bool,
}

/// Load .env from the working directory or its parents.
fn load_dotenv() {
    for path in [".env", "../.env"] {
        if dotenvy::from_filename(path).is_ok() {
            tracing::debug!("Loaded .env from: {path}");
            return;
        }
    }
}

/// `<data_dir>/handle-restore/names.json`, falling back to the working
/// directory when the platform has no data dir.
fn default_cache_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("handle-restore")
        .join("names.json")
}

async fn read_inputs(args: &[String]) -> anyhow::Result<Vec<String>> {
    if !args.is_empty() {
        return Ok(args.to_vec());
    }
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut inputs = Vec::new();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if !line.is_empty() {
            inputs.push(line.to_string());
        }
    }
    Ok(inputs)
}

fn parse_keys(inputs: &[String]) -> Vec<ResolveKey> {
    inputs
        .iter()
        .filter_map(|input| match input.parse::<ResolveKey>() {
            Ok(key) => Some(key),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping input");
                None
            }
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    load_dotenv();
    let args = Args::parse();
    let config = ResolverConfig::from_env()?;

    let source = YouTubeSource::new(config.placeholder_names.clone());
    let mut builder = ResolverService::builder(config, source);
    if !args.no_persist {
        let path = args.cache.clone().unwrap_or_else(default_cache_path);
        tracing::debug!("Using name cache at {}", path.display());
        builder = builder.storage(Arc::new(FileStorage::new(path)));
    }
    let resolver = builder.build();

    let keys = parse_keys(&read_inputs(&args.keys).await?);
    if keys.is_empty() {
        tracing::info!("Nothing to resolve");
    } else if args.demo {
        demo::run(resolver.clone(), &keys).await;
    } else {
        let names = join_all(keys.iter().map(|key| resolver.resolve(key))).await;
        for (key, name) in keys.iter().zip(names) {
            println!("{}\t{}", key.as_str(), name.as_deref().unwrap_or("-"));
        }
    }

    if args.stats {
        eprintln!("{}", serde_json::to_string_pretty(&resolver.stats())?);
    }
    resolver.shutdown();
    Ok(())
}
