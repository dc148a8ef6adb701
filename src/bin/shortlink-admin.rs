use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shortlink::analytics::{AnalyticsAggregator, ExportFormat, Period};
use shortlink::auth::AuthService;
use shortlink::config::{Config, DatabaseBackend};
use shortlink::links::{CodeGenerator, LinkRegistry, ListOptions};
use shortlink::storage::{PostgresStorage, SqliteStorage, Storage};
use std::io::Write;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "shortlink-admin")]
#[command(about = "Shortlink admin management CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mint a bearer token for a user (AUTH_MODE=jwt)
    Token {
        /// User ID placed in the `sub` claim
        user_id: String,
    },
    /// List a user's links, newest first
    Links {
        /// Owner user ID
        owner_id: String,
        #[arg(long, default_value_t = 20)]
        limit: i64,
        #[arg(long)]
        search: Option<String>,
    },
    /// Print the analytics report for a link as JSON
    Report {
        link_id: i64,
        owner_id: String,
        /// day, week, month or year
        #[arg(long, default_value = "week")]
        period: String,
    },
    /// Write the raw clicks of a link to stdout
    Export {
        link_id: i64,
        owner_id: String,
        #[arg(long, default_value = "week")]
        period: String,
        /// csv or json
        #[arg(long, default_value = "csv")]
        format: String,
    },
}

async fn connect(config: &Config) -> Result<Arc<dyn Storage>> {
    let storage: Arc<dyn Storage> = match config.database.backend {
        DatabaseBackend::Sqlite => Arc::new(
            SqliteStorage::new(&config.database.url, config.database.max_connections).await?,
        ),
        DatabaseBackend::Postgres => Arc::new(
            PostgresStorage::new(&config.database.url, config.database.max_connections).await?,
        ),
    };

    // Ensure database is initialized
    storage.init().await?;
    Ok(storage)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Token { user_id } => {
            let auth = AuthService::new(&config.auth)?;
            println!("{}", auth.issue_token(&user_id)?);
        }
        Commands::Links {
            owner_id,
            limit,
            search,
        } => {
            let registry = LinkRegistry::new(
                connect(&config).await?,
                CodeGenerator::new(config.short_code.length, config.short_code.max_attempts),
            );
            let page = registry
                .list(
                    &owner_id,
                    ListOptions {
                        search,
                        limit,
                        ..Default::default()
                    },
                )
                .await?;

            if page.items.is_empty() {
                println!("No links found for '{}'.", owner_id);
            } else {
                println!("{:<8} {:<22} {:<8} {:<7} {}", "ID", "Code", "Clicks", "Active", "URL");
                println!("{}", "-".repeat(80));
                for link in &page.items {
                    println!(
                        "{:<8} {:<22} {:<8} {:<7} {}",
                        link.id, link.short_code, link.click_count, link.is_active, link.original_url
                    );
                }
                println!("{} of {} links", page.items.len(), page.total);
            }
        }
        Commands::Report {
            link_id,
            owner_id,
            period,
        } => {
            let period: Period = period.parse()?;
            let report = AnalyticsAggregator::new(connect(&config).await?)
                .report(link_id, &owner_id, period)
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Export {
            link_id,
            owner_id,
            period,
            format,
        } => {
            let period: Period = period.parse()?;
            let format: ExportFormat = format.parse()?;
            let file = AnalyticsAggregator::new(connect(&config).await?)
                .export(link_id, &owner_id, period, format)
                .await?;

            std::io::stdout()
                .write_all(&file.body)
                .context("failed to write export")?;
            eprintln!("Exported {}", file.filename);
        }
    }

    Ok(())
}
