use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use linkstat::analytics::{geo_lookup_from_config, TimeRange, VisitRecorder, WootheeParser};
use linkstat::config::{Config, DatabaseBackend};
use linkstat::service::LinkService;
use linkstat::shortcode::SlugGenerator;
use linkstat::storage::{LinkStore, PostgresStorage, SqliteStorage};
use linkstat::title::title_extractor_from_config;
use serde::Serialize;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "linkstat-admin")]
#[command(about = "linkstat link management CLI", long_about = None)]
struct Cli {
    /// Owner the command acts on behalf of
    #[arg(long, global = true, default_value_t = 1)]
    owner: i64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a short link
    Shorten {
        url: String,
        #[arg(long)]
        title: Option<String>,
    },
    /// Print the statistics report of a link as JSON
    Stats { slug: String },
    /// Print the click chart of a link as JSON
    Clicks {
        slug: String,
        #[arg(long, value_enum, default_value_t = Range::Day)]
        range: Range,
    },
    /// Stop redirecting a link (answers 410)
    Deactivate { slug: String },
    /// Resume redirecting a link
    Reactivate { slug: String },
    /// List links, newest first
    List {
        /// Only links whose title, destination or slug contains this
        #[arg(long)]
        search: Option<String>,
    },
    /// Print visit totals across all links as JSON
    Overview,
    /// Delete a link and its visits
    Delete { slug: String },
    /// List the recorded visits of a link
    Visits { slug: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum Range {
    Day,
    Week,
    Month,
}

impl From<Range> for TimeRange {
    fn from(range: Range) -> Self {
        match range {
            Range::Day => TimeRange::Day,
            Range::Week => TimeRange::Week,
            Range::Month => TimeRange::Month,
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{json}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let storage: Arc<dyn LinkStore> = match config.database.backend {
        DatabaseBackend::Sqlite => Arc::new(
            SqliteStorage::new(&config.database.url, config.database.max_connections).await?,
        ),
        DatabaseBackend::Postgres => Arc::new(
            PostgresStorage::new(&config.database.url, config.database.max_connections).await?,
        ),
    };

    // Ensure database is initialized
    storage.init().await?;

    let recorder = Arc::new(VisitRecorder::new(
        Arc::clone(&storage),
        geo_lookup_from_config(&config.analytics),
        Arc::new(WootheeParser::new()),
    ));
    let mut service = LinkService::new(
        Arc::clone(&storage),
        recorder,
        SlugGenerator::new(config.links.slug_length),
        config.links.short_domain.clone(),
    );
    if let Some(titles) = title_extractor_from_config(&config.links) {
        service = service.with_title_extractor(titles);
    }

    let owner = cli.owner;
    match cli.command {
        Commands::Shorten { url, title } => {
            let created = service.shorten(owner, &url, title.as_deref()).await?;
            println!("✓ {} -> {}", created.short_url, created.link.destination);
        }
        Commands::Stats { slug } => {
            let report = service
                .statistics_detail(owner, &slug)
                .await
                .with_context(|| format!("Failed to build statistics for '{slug}'"))?;
            print_json(&report)?;
        }
        Commands::Clicks { slug, range } => {
            let points = service.click_over_time(owner, &slug, range.into()).await?;
            print_json(&points)?;
        }
        Commands::Deactivate { slug } => {
            service.set_active(owner, &slug, false).await?;
            println!("✓ Deactivated '{slug}'");
        }
        Commands::Reactivate { slug } => {
            service.set_active(owner, &slug, true).await?;
            println!("✓ Reactivated '{slug}'");
        }
        Commands::List { search } => {
            let links = service.list(owner, search.as_deref()).await?;
            if links.is_empty() {
                println!("No links found");
            }
            for entry in links {
                let status = if entry.link.is_active { "active" } else { "inactive" };
                println!(
                    "  {:<32}  {:>6} visits  {:<8}  {}",
                    entry.short_url, entry.link.visit_count, status, entry.link.title
                );
            }
        }
        Commands::Overview => {
            let overview = service.owner_statistics(owner).await?;
            print_json(&overview)?;
        }
        Commands::Delete { slug } => {
            service
                .delete(owner, &slug)
                .await
                .with_context(|| format!("Failed to delete '{slug}'"))?;
            println!("✓ Deleted '{slug}'");
        }
        Commands::Visits { slug } => {
            let link = service.get_owned(owner, &slug).await?;
            let visits = storage.visits_for_link(link.id).await?;

            if visits.is_empty() {
                println!("No visits recorded for '{slug}'");
            } else {
                println!("Visits for '{}' ({} total):", slug, visits.len());
                for visit in visits {
                    let country = storage
                        .visit_location(visit.id)
                        .await?
                        .map(|location| location.country_name)
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "  {}  {:<39}  {:<16}  {}",
                        visit.created_at,
                        visit.ip_address,
                        country,
                        visit.referer.as_deref().unwrap_or("Direct")
                    );
                }
            }
        }
    }

    Ok(())
}
