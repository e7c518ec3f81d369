//! Server binary entry point.
//!
//! Wires the live back-ends (Brave search, OpenAI-compatible LLM) into the
//! pipeline and serves the HTTP/SSE surface. Requires `SEARCH_API_KEY` and
//! `LLM_API_KEY` in the environment; see `--help` for the flags layered on
//! top.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cited_search::config::AppConfig;
use cited_search::extract::PageExtractor;
use cited_search::llm::openai::OpenAiClient;
use cited_search::llm::LlmClient;
use cited_search::pipeline::Pipeline;
use cited_search::planner::QueryPlanner;
use cited_search::search::brave::BraveSearch;
use cited_search::search::parallel::{ParallelSearcher, SearcherConfig};
use cited_search::search::SearchProvider;
use cited_search::server::{serve, AppState};
use cited_search::store::sqlite::SqliteEventLog;
use cited_search::store::EventStore;
use cited_search::synthesis::Synthesizer;
use cited_search::tagger::FeatureTagger;

/// Citation-backed answer engine server
#[derive(Parser, Debug)]
#[command(
    name = "server",
    version,
    about = "Serve the citation-backed answer engine over HTTP/SSE",
    long_about = "Runs the full answer pipeline behind the HTTP surface: \
                  query planning, parallel search, extraction, ranking, \
                  per-user personalization, and streamed synthesis.

ENVIRONMENT:
  SEARCH_API_KEY   Brave Search subscription token (required)
  LLM_API_KEY      OpenAI-compatible API key (required)
  LISTEN_PORT      Listen port (default 3001)
  WEB_ORIGIN       CORS allow-origin (default http://localhost:5173)"
)]
struct Args {
    /// Listen port (overrides LISTEN_PORT)
    #[arg(long, value_name = "PORT")]
    port: Option<u16>,

    /// CORS allow-origin (overrides WEB_ORIGIN)
    #[arg(long, value_name = "ORIGIN")]
    web_origin: Option<String>,

    /// Persist the event log to this SQLite database (default: in-memory)
    #[arg(long, value_name = "PATH")]
    db_path: Option<PathBuf>,

    /// Logging verbosity level
    #[arg(long, default_value = "info", value_name = "LEVEL")]
    log_level: String,
}

/// Setup logging with the specified level
fn setup_logging(log_level: &str) {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(&args.log_level);

    let config = AppConfig::from_env().context("Failed to read configuration")?;
    let (search_key, llm_key) = config
        .require_keys()
        .context("Both SEARCH_API_KEY and LLM_API_KEY must be set")?;

    let port = args.port.unwrap_or(config.listen_port);
    let web_origin = args.web_origin.unwrap_or(config.web_origin);

    let store = match &args.db_path {
        Some(path) => {
            info!("persisting events to {}", path.display());
            let log = SqliteEventLog::open(path)
                .with_context(|| format!("Failed to open event log at {}", path.display()))?;
            EventStore::new(Box::new(log))
        }
        None => EventStore::in_memory(),
    };

    let llm: Arc<dyn LlmClient> = Arc::new(OpenAiClient::new(llm_key, None));
    let provider: Arc<dyn SearchProvider> = Arc::new(BraveSearch::new(search_key));

    let pipeline = Pipeline::new(
        QueryPlanner::new(llm.clone()),
        ParallelSearcher::new(provider, SearcherConfig::default()),
        Arc::new(PageExtractor::new()),
        FeatureTagger::new(llm.clone()),
        Synthesizer::new(llm),
        Arc::new(store),
    );

    serve(AppState::new(Arc::new(pipeline)), port, &web_origin)
        .await
        .context("Server error")?;
    Ok(())
}
