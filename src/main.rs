//! BabyShield chat core server.
//!
//! Usage:
//!   babyshield-chat              # same as `serve`
//!   babyshield-chat serve
//!   babyshield-chat classify "is this safe in second trimester?"

use std::sync::Arc;

use anyhow::Result;
use babyshield_chat::chat::intent::heuristic_intent;
use babyshield_chat::clients::{LlmClient, OpenAiCompatClient};
use babyshield_chat::config::{self, Config};
use babyshield_chat::{build_orchestrator, build_scan_store, http};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "babyshield-chat")]
#[command(about = "BabyShield product-safety chat service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Serve,
    /// Print the keyword-heuristic intent for a query (no network)
    Classify { query: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve().await,
        Commands::Classify { query } => {
            match heuristic_intent(&query) {
                Some(intent) => println!("{}", intent),
                None => println!("no keyword match (would ask the language model)"),
            }
            Ok(())
        }
    }
}

async fn serve() -> Result<()> {
    // Subscriber first so config loading can log
    config::load_env_files();
    let rust_log = std::env::var("RUST_LOG").ok();
    tracing_subscriber::fmt()
        .with_env_filter(config::log_filter(rust_log.as_deref()))
        .init();

    let config = Arc::new(Config::load()?);

    info!("Starting BabyShield chat core");
    if config.llm.api_key.is_none() {
        warn!("OPENAI_API_KEY is not set; LLM calls will likely fail and degrade to fallbacks");
    }

    let llm: Arc<dyn LlmClient> = Arc::new(OpenAiCompatClient::from_config(&config.llm));
    let scans = build_scan_store(&config)?;
    let orchestrator = Arc::new(build_orchestrator(&config, llm, scans));

    http::start_http_server(config, orchestrator).await?;
    Ok(())
}
