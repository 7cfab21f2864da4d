use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use docchat::{config, index, migrate, query, server};

#[derive(Parser)]
#[command(name = "docchat")]
#[command(about = "Chat with a local PDF collection", version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = "./config/docchat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema and storage directories
    Init,
    /// Index every PDF in the documents directory
    Ingest,
    /// Retrieve chunks for a query without answering it
    Search {
        /// Query text
        query: String,
        /// Search mode: keyword, semantic, or hybrid
        #[arg(long, default_value = "keyword")]
        mode: String,
        /// Restrict results to one file
        #[arg(long)]
        source: Option<String>,
        /// Maximum number of results
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Ask a question and print the answer with its sources
    Ask {
        /// Question text
        question: String,
        /// Restrict retrieval to one file
        #[arg(long)]
        source: Option<String>,
    },
    /// Start the chat web UI
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("docchat=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            config.ensure_dirs()?;
            migrate::run_migrations(&config).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest => {
            let report = index::reindex_corpus(&config).await?;
            println!(
                "Files: {} discovered, {} indexed, {} skipped, {} removed",
                report.files_discovered,
                report.files_indexed,
                report.files_skipped,
                report.files_removed
            );
            println!(
                "Chunks: {} written, {} unchanged, {} deleted",
                report.chunks_written, report.chunks_unchanged, report.chunks_deleted
            );
            if config.embedding.is_enabled() {
                println!(
                    "Embeddings: {} written, {} unchanged, {} pending",
                    report.embeddings_written,
                    report.embeddings_unchanged,
                    report.embeddings_pending
                );
            }
            println!("ok");
        }
        Commands::Search {
            query,
            mode,
            source,
            limit,
        } => {
            query::run_search(&config, &query, &mode, source, limit).await?;
        }
        Commands::Ask { question, source } => {
            query::run_ask(&config, &question, source).await?;
        }
        Commands::Serve => {
            server::run_server(config).await?;
        }
    }

    Ok(())
}
