use anyhow::Result;
use clap::{Parser, Subcommand};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use atelier::config::Config;
use atelier::orchestrator::Atelier;
use atelier::series::{Series, SeriesStore};

#[derive(Parser)]
#[command(name = "atelier")]
#[command(version, about = "Deterministic address-derived art generation")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate the annotated image for an address
    Generate {
        series: String,
        address: String,
        /// Produce prompts only; mark the provider phases skipped
        #[arg(long)]
        skip_image: bool,
        /// Lock TTL in seconds (defaults to 5 minutes)
        #[arg(long)]
        lock_ttl: Option<u64>,
    },
    /// Synthesize the narration audio for an address
    Speak {
        series: String,
        address: String,
        /// Lock TTL in seconds (defaults to 2 minutes)
        #[arg(long)]
        lock_ttl: Option<u64>,
    },
    /// Manage series definitions
    Series {
        #[command(subcommand)]
        command: SeriesCommands,
    },
    /// Manage the word-pack cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Subcommand)]
pub enum SeriesCommands {
    List,
    Create {
        suffix: String,
        #[arg(long, default_value = "")]
        purpose: String,
    },
    /// Change the purpose or add word-pack filters
    Update {
        suffix: String,
        #[arg(long)]
        purpose: Option<String>,
        /// Add a filter, repeatable: --filter colors=crimson
        #[arg(long = "filter", value_name = "PACK=WORD")]
        filters: Vec<String>,
    },
    /// Soft-delete: keeps the definition, parks the output tree
    Delete { suffix: String },
    Undelete { suffix: String },
    /// Hard-delete the definition and every output tree
    Remove { suffix: String },
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Ensure a cache matching the embedded data exists
    Rebuild,
    /// Drop the cache from memory and disk
    Invalidate,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    config.ensure_directories()?;

    // Ctrl-C aborts any in-flight generation through the cancellation token.
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_cancel.cancel();
        }
    });

    match cli.command {
        Commands::Generate {
            series,
            address,
            skip_image,
            lock_ttl,
        } => {
            let atelier = Atelier::new(config);
            let path = atelier
                .generate_image(
                    &series,
                    &address,
                    skip_image,
                    lock_ttl.map(Duration::from_secs),
                    &cancel,
                )
                .await?;
            println!(
                "{} {}",
                console::style("Annotated:").green().bold(),
                path.display()
            );
        }
        Commands::Speak {
            series,
            address,
            lock_ttl,
        } => {
            let atelier = Atelier::new(config);
            let path = atelier
                .generate_speech(&series, &address, lock_ttl.map(Duration::from_secs), &cancel)
                .await?;
            println!(
                "{} {}",
                console::style("Narration:").green().bold(),
                path.display()
            );
        }
        Commands::Series { command } => run_series_command(config, command)?,
        Commands::Cache { command } => run_cache_command(config, command)?,
    }
    Ok(())
}

fn run_series_command(config: Config, command: SeriesCommands) -> Result<()> {
    let store = SeriesStore::new(std::sync::Arc::new(config));
    match command {
        SeriesCommands::List => {
            let all = store.list()?;
            if all.is_empty() {
                println!("No series defined yet.");
            }
            for series in all {
                let marker = if series.deleted {
                    console::style("deleted").red().to_string()
                } else {
                    console::style("active").green().to_string()
                };
                println!("{:<24} {} used {} times", series.suffix, marker, series.last_used);
            }
        }
        SeriesCommands::Create { suffix, purpose } => {
            let mut series = Series::new(&suffix);
            series.purpose = purpose;
            store.create(&series)?;
            println!("Created series {suffix}");
        }
        SeriesCommands::Update {
            suffix,
            purpose,
            filters,
        } => {
            let mut series = store
                .load(&suffix)?
                .ok_or_else(|| anyhow::anyhow!("Series {suffix} not found"))?;
            if let Some(purpose) = purpose {
                series.purpose = purpose;
            }
            for spec in filters {
                let (pack, word) = spec
                    .split_once('=')
                    .ok_or_else(|| anyhow::anyhow!("Filter {spec:?} is not PACK=WORD"))?;
                series
                    .filters
                    .entry(pack.to_string())
                    .or_default()
                    .push(word.to_string());
            }
            store.update(&mut series)?;
            println!("Updated series {suffix}");
        }
        SeriesCommands::Delete { suffix } => {
            store.delete(&suffix)?;
            println!("Soft-deleted series {suffix}");
        }
        SeriesCommands::Undelete { suffix } => {
            store.undelete(&suffix)?;
            println!("Restored series {suffix}");
        }
        SeriesCommands::Remove { suffix } => {
            store.remove(&suffix)?;
            println!("Removed series {suffix} and its outputs");
        }
    }
    Ok(())
}

fn run_cache_command(config: Config, command: CacheCommands) -> Result<()> {
    let cache = atelier::wordbank::WordbankCache::new(config.cache_dir());
    match command {
        CacheCommands::Rebuild => {
            cache.load_or_build()?;
            println!(
                "Cache ready (data version {})",
                atelier::wordbank::embedded_version()?
            );
        }
        CacheCommands::Invalidate => {
            cache.invalidate()?;
            println!("Cache invalidated");
        }
    }
    Ok(())
}
