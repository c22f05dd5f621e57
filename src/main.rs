/// Solana Slot Event Indexer
///
/// Follows the chain, decodes program events and stores them in PostgreSQL.
mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use slot_event_indexer::{
    Database, EventDecoder, EventRepository, InMemoryRepository, LedgerClient, SolanaRpcClient, Supervisor,
};
use std::env;
use std::sync::Arc;
use std::time::Duration;

use cli::Cli;

/// How long to wait for the run loop to return once shutdown has completed
const RUNNER_EXIT_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    cli.validate()?;

    println!("🚀 Starting Solana Slot Event Indexer...");

    // RPC URL: CLI flag first, then environment
    let rpc_url = match cli.rpc_url.clone() {
        Some(url) => url,
        None => env::var("SOLANA_RPC_URL")
            .context("SOLANA_RPC_URL not found in environment. Please check your .env file")?,
    };

    let rpc_client = SolanaRpcClient::new(rpc_url);
    let conn_info = rpc_client.get_connection_info().await.context("Failed to connect to Solana RPC")?;

    println!("✅ Connected to: {}", conn_info.endpoint);
    println!("🧩 Node version: {}", conn_info.version);
    println!("🎯 Current Slot: {}", format_number(conn_info.slot));

    let repository: Arc<dyn EventRepository> = if cli.memory {
        println!("\n🧪 Using in-memory storage, nothing will be persisted");
        Arc::new(InMemoryRepository::new())
    } else {
        let database_url = match cli.database_url.clone() {
            Some(url) => url,
            None => env::var("DATABASE_URL")
                .context("DATABASE_URL not found in environment. Please check your .env file")?,
        };

        println!("\n💾 Connecting to PostgreSQL database...");
        let database = Database::new(&database_url, (cli.max_concurrency as u32).saturating_add(2))
            .await
            .context("Failed to connect to PostgreSQL database")?;
        database.test_connection().await.context("Database connection test failed")?;
        println!("✅ Database connected successfully!");

        println!("📋 Running database migrations...");
        database.migrate().await.context("Failed to run database migrations")?;
        println!("✅ Database schema is up to date!");

        Arc::new(database)
    };

    let decoder = EventDecoder::with_builtin_decoders().context("Failed to build event decoders")?;
    println!(
        "📚 Registered {} instruction decoders and {} log patterns",
        decoder.instruction_decoder_count(),
        decoder.log_pattern_count()
    );

    // Resumes from the persisted cursor; --start-slot (or the chain head) only seeds a new indexer id
    let config = cli.into_config();
    let ledger: Arc<dyn LedgerClient> = Arc::new(rpc_client);
    let supervisor = Arc::new(Supervisor::new(config, ledger, repository, decoder));

    tracing::info!("Solana Slot Event Indexer initialized successfully");
    println!("\n🔍 Indexing (Ctrl+C to stop)...");

    let mut runner = tokio::spawn({
        let supervisor = supervisor.clone();
        async move { supervisor.start().await }
    });

    tokio::select! {
        joined = &mut runner => {
            joined.context("Indexer task panicked")?.context("Indexer stopped")?;
            return Ok(());
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl+C")?;
            println!("\n🛑 Shutting down, waiting for in-flight blocks...");
        }
    }

    supervisor.shutdown().await?;

    match tokio::time::timeout(RUNNER_EXIT_GRACE, &mut runner).await {
        Ok(joined) => joined.context("Indexer task panicked")?.context("Indexer stopped")?,
        Err(_) => {
            runner.abort();
            tracing::warn!("Indexer did not stop in time, abandoning in-flight blocks");
        }
    }

    let health = supervisor.health();
    println!(
        "\n✨ Stopped at slot {} ({} blocks indexed, {} events stored)",
        format_number(health.next_height),
        format_number(health.stats.heights_indexed),
        format_number(health.stats.events_inserted)
    );

    Ok(())
}

/// Format a number with thousand separators
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();

    for (count, c) in s.chars().rev().enumerate() {
        if count > 0 && count % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }

    result.chars().rev().collect()
}
