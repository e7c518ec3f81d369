//! Ask binary entry point.
//!
//! Command-line front-end over the same pipeline the server runs: ask one
//! question (or start an interactive session), watch the answer stream in,
//! and get the cited source table afterwards.
//!
//! # Examples
//!
//! One-shot question:
//! ```bash
//! ask --query "How does photosynthesis work?"
//! ```
//!
//! JSON output with a stable user id for personalization:
//! ```bash
//! ask --query "rust async runtimes" --user me --format json
//! ```
//!
//! Interactive mode:
//! ```bash
//! ask --interactive --user me
//! ```

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, ContentArrangement, Table};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cited_search::config::AppConfig;
use cited_search::extract::PageExtractor;
use cited_search::llm::openai::OpenAiClient;
use cited_search::llm::LlmClient;
use cited_search::models::AnswerPacket;
use cited_search::pipeline::{Pipeline, PipelineEvent};
use cited_search::planner::QueryPlanner;
use cited_search::search::brave::BraveSearch;
use cited_search::search::parallel::{ParallelSearcher, SearcherConfig};
use cited_search::search::SearchProvider;
use cited_search::store::EventStore;
use cited_search::synthesis::Synthesizer;
use cited_search::tagger::FeatureTagger;

/// Output format for answers
#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    /// Streamed answer text plus a source table
    Table,
    /// Machine-readable JSON answer packet
    Json,
}

/// Ask the citation-backed answer engine from the command line
#[derive(Parser, Debug)]
#[command(
    name = "ask",
    version,
    about = "Ask a question and get a cited, synthesized answer",
    long_about = "Runs the full answer pipeline for one question (or \
                  interactively), streaming the answer to stdout and \
                  printing the cited sources afterwards.

EXAMPLES:
  One-shot question:
    ask --query \"How does photosynthesis work?\"

  JSON output:
    ask --query \"rust async runtimes\" --format json

  Interactive mode with personalization:
    ask --interactive --user me"
)]
struct Args {
    /// Question to ask (omitted in interactive mode)
    #[arg(long, value_name = "TEXT", conflicts_with = "interactive")]
    query: Option<String>,

    /// Stable user id for personalization
    #[arg(long, value_name = "ID")]
    user: Option<String>,

    /// Output format
    #[arg(long, value_enum, default_value = "table")]
    format: OutputFormat,

    /// Enable interactive REPL mode
    #[arg(long, short = 'i')]
    interactive: bool,

    /// Logging verbosity level
    #[arg(long, default_value = "warn", value_name = "LEVEL")]
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

fn build_pipeline() -> Result<Arc<Pipeline>> {
    let config = AppConfig::from_env().context("Failed to read configuration")?;
    let (search_key, llm_key) = config
        .require_keys()
        .context("Both SEARCH_API_KEY and LLM_API_KEY must be set")?;

    let llm: Arc<dyn LlmClient> = Arc::new(OpenAiClient::new(llm_key, None));
    let provider: Arc<dyn SearchProvider> = Arc::new(BraveSearch::new(search_key));

    Ok(Arc::new(Pipeline::new(
        QueryPlanner::new(llm.clone()),
        ParallelSearcher::new(provider, SearcherConfig::default()),
        Arc::new(PageExtractor::new()),
        FeatureTagger::new(llm.clone()),
        Synthesizer::new(llm),
        Arc::new(EventStore::in_memory()),
    )))
}

/// Run one question through the pipeline, streaming chunks to stdout in
/// table mode. Returns the final packet, or None when the request failed.
async fn run_query(
    pipeline: &Arc<Pipeline>,
    query: &str,
    user: Option<&str>,
    stream_to_stdout: bool,
) -> Result<Option<AnswerPacket>> {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let task = {
        let pipeline = pipeline.clone();
        let query = query.to_string();
        let user = user.map(str::to_string);
        tokio::spawn(async move {
            pipeline.run(&query, user.as_deref(), None, tx).await;
        })
    };

    let mut packet = None;
    while let Some(event) = rx.recv().await {
        match event {
            PipelineEvent::Progress { stage, message } => {
                if stream_to_stdout {
                    match message {
                        Some(message) => eprintln!("[{:?}] {}", stage, message),
                        None => eprintln!("[{:?}]", stage),
                    }
                }
            }
            PipelineEvent::Chunk(chunk) => {
                if stream_to_stdout {
                    print!("{}", chunk);
                    std::io::stdout().flush().ok();
                }
            }
            PipelineEvent::Complete(answer) => {
                packet = Some(answer);
            }
            PipelineEvent::Error { error, message } => {
                eprintln!("error ({}): {}", error, message);
            }
        }
    }
    task.await.ok();
    if stream_to_stdout {
        println!();
    }
    Ok(packet)
}

/// Format the cited sources as a pretty table
fn format_sources_table(packet: &AnswerPacket) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("#").add_attribute(Attribute::Bold),
            Cell::new("Title").add_attribute(Attribute::Bold),
            Cell::new("Domain").add_attribute(Attribute::Bold),
            Cell::new("Score").add_attribute(Attribute::Bold),
            Cell::new("Why").add_attribute(Attribute::Bold),
        ]);

    for (i, source) in packet.sources.iter().enumerate() {
        let cited = packet.citations.iter().any(|c| c.index == i + 1);
        let index_cell = if cited {
            Cell::new(format!("[{}]", i + 1)).fg(Color::Green)
        } else {
            Cell::new(format!("[{}]", i + 1))
        };
        table.add_row(vec![
            index_cell,
            Cell::new(&source.title),
            Cell::new(&source.domain),
            Cell::new(format!("{:.3}", source.score)),
            Cell::new(&source.ranking_reason),
        ]);
    }
    table.to_string()
}

async fn answer_once(
    pipeline: &Arc<Pipeline>,
    query: &str,
    user: Option<&str>,
    format: &OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Table => {
            let packet = run_query(pipeline, query, user, true).await?;
            if let Some(packet) = packet {
                println!("\nSources:");
                println!("{}", format_sources_table(&packet));
            }
        }
        OutputFormat::Json => {
            let packet = run_query(pipeline, query, user, false).await?;
            if let Some(packet) = packet {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&packet)
                        .context("Failed to serialize answer")?
                );
            }
        }
    }
    Ok(())
}

async fn interactive_loop(
    pipeline: Arc<Pipeline>,
    user: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let mut editor = DefaultEditor::new().context("Failed to start line editor")?;
    println!("cited-search interactive mode. Empty line or Ctrl-D to exit.");

    loop {
        match editor.readline("ask> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    break;
                }
                editor.add_history_entry(line).ok();
                answer_once(&pipeline, line, user.as_deref(), &format).await?;
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err).context("Readline error"),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(&args.log_level);

    let pipeline = build_pipeline()?;

    if args.interactive {
        interactive_loop(pipeline, args.user, args.format).await
    } else {
        let query = args
            .query
            .context("Either --query or --interactive is required")?;
        answer_once(&pipeline, &query, args.user.as_deref(), &args.format).await
    }
}
