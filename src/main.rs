mod config;
mod models;
mod pipeline;
mod scraper;
mod storage;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::AppConfig;
use crate::pipeline::Pipeline;
use crate::scraper::browser::RenderingEngine;
use crate::scraper::{LetterboxdSite, RatingSite};
use crate::storage::Repository;

#[derive(Parser)]
#[command(
    name = "mkdb-harvester",
    about = "Community film ratings harvester",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full pipeline: directory sync → rating harvest → enrichment
    Run,

    /// Harvest a single member's rated films
    Harvest {
        /// Username on the remote site
        username: String,
    },

    /// Show database statistics
    Stats,

    /// List tracked member usernames
    Members,

    /// Apply schema migrations without harvesting
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "mkdb_harvester=info,warn",
        1 => "mkdb_harvester=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let config = AppConfig::load()?;

    match cli.command {
        Command::Run => {
            let _t = utils::Timer::start("Full harvest");
            let stats = run_pipeline(config).await?;
            info!(
                "Done: {} members, {} ratings, {} films enriched, {} errors",
                stats.members_harvested, stats.ratings_upserted, stats.films_enriched, stats.errors
            );
        }

        Command::Harvest { username } => {
            let _t = utils::Timer::start(format!("Harvest {username}"));
            let repo = open_repo(&config)?;
            let site = connect_site(&config).await?;

            let result = pipeline::harvest_member(&*site, &repo, &config.site, &username).await;
            site.shutdown().await;

            let harvest = result?;
            info!(
                "{}: {} ratings over {} pages",
                username, harvest.ratings, harvest.pages
            );
        }

        Command::Stats => {
            let repo = Repository::open(&config.storage.db_path)?;
            let members = repo.member_count()?;
            let films = repo.film_count()?;
            let ratings = repo.rating_count()?;
            let last = repo.last_run()?;
            println!("─────────────────────────────────");
            println!("  MKDb Harvester — Store Stats");
            println!("─────────────────────────────────");
            println!("  Members  : {}", utils::fmt_number(members));
            println!("  Films    : {}", utils::fmt_number(films));
            println!("  Ratings  : {}", utils::fmt_number(ratings));
            match last {
                Some(run) => println!("  Last run : {} ({})", run.started_at, run.status),
                None => println!("  Last run : —"),
            }
            println!("─────────────────────────────────");
        }

        Command::Members => {
            let repo = Repository::open(&config.storage.db_path)?;
            let members = repo.list_members()?;
            if members.is_empty() {
                println!("No members — run `mkdb-harvester run` first.");
            } else {
                println!("{} members:", members.len());
                for m in &members {
                    println!("  {}", m);
                }
            }
        }

        Command::Migrate => {
            Repository::open(&config.storage.db_path)?.run_migrations()?;
            println!("Migrations applied.");
        }
    }

    Ok(())
}

/// Store connect failure is fatal to the whole run.
fn open_repo(config: &AppConfig) -> Result<Arc<Repository>> {
    let repo =
        Arc::new(Repository::open(&config.storage.db_path).context("Failed to open store")?);
    if config.storage.run_migrations {
        repo.run_migrations()?;
    }
    Ok(repo)
}

/// Engine launch failure is fatal to the whole run.
async fn connect_site(config: &AppConfig) -> Result<Arc<LetterboxdSite>> {
    let engine = RenderingEngine::launch(
        &config.engine,
        Duration::from_secs(config.site.navigation_timeout_secs),
    )
    .await
    .context("Failed to launch rendering engine")?;
    Ok(Arc::new(LetterboxdSite::new(engine, &config.site)?))
}

async fn run_pipeline(config: AppConfig) -> Result<pipeline::PipelineStats> {
    let repo = open_repo(&config)?;
    let site = connect_site(&config).await?;

    let result = Pipeline::new(
        config,
        Arc::clone(&site) as Arc<dyn RatingSite>,
        Arc::clone(&repo),
    )
    .run()
    .await;

    // Engine teardown happens whether the run succeeded or not.
    site.shutdown().await;
    result
}
