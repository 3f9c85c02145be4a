//! Tradewatch CLI — run a trade-data exposure investigation from the shell.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tradewatch_core::{
    GoogleSearchProvider, ResearchEngine, SessionStatus, SqliteStore, create_provider, load_config,
};

/// Tradewatch: detect leaked trade data about a company on public platforms
#[derive(Parser, Debug)]
#[command(name = "tradewatch", version, about, long_about = None)]
struct Cli {
    /// Company to investigate
    target: String,

    /// Identifier recorded as the session requester
    #[arg(short, long, default_value = "cli")]
    requester: String,

    /// Workspace directory (location of .tradewatch/config.toml)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// SQLite database path (overrides config)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Print the full outcome as JSON
    #[arg(long)]
    json: bool,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbose: u8) {
    let default_filter = match verbose {
        0 => "tradewatch_core=info,tradewatch_cli=info",
        1 => "tradewatch_core=debug,tradewatch_cli=debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Local .env is convenient for the two API keys; absence is fine.
    let _ = dotenvy::dotenv();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut config =
        load_config(Some(&cli.workspace), None).context("failed to load configuration")?;
    if let Some(db) = &cli.db {
        config.storage.db_path = db.clone();
    }
    config.validate().context("invalid configuration")?;

    let store = Arc::new(
        SqliteStore::open(&config.storage.db_path).context("failed to open database")?,
    );
    let search = Arc::new(
        GoogleSearchProvider::from_config(&config.search)
            .context("failed to build search provider")?,
    );
    let provider = create_provider(&config.llm).context("failed to build LLM provider")?;

    let engine = ResearchEngine::new(provider, search, store, config);

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling at the next round boundary");
            ctrl_c_cancel.cancel();
        }
    });

    info!(target = %cli.target, "starting investigation");
    let outcome = engine
        .run_with_cancellation(&cli.requester, &cli.target, cancel)
        .await?;

    if cli.json {
        let rendered = serde_json::json!({
            "session": outcome.session,
            "leaks": outcome.leaks,
            "summary": outcome.summary,
        });
        println!("{}", serde_json::to_string_pretty(&rendered)?);
    } else {
        print_summary(&outcome);
    }

    Ok(match outcome.session.status {
        SessionStatus::Completed => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}

fn print_summary(outcome: &tradewatch_core::ResearchOutcome) {
    let session = &outcome.session;
    println!("session:  {}", session.id);
    println!("target:   {}", session.target_company);
    println!("status:   {}", session.status);
    if let Some(message) = &session.error_message {
        println!("reason:   {}", message);
    }
    println!(
        "queries:  {} ({} result URLs examined)",
        session.total_queries, outcome.summary.urls_analyzed
    );
    println!(
        "findings: {} verified, {} potential",
        session.verified_leaks_found, session.potential_leaks_found
    );
    for leak in &outcome.leaks {
        println!(
            "  [{}|{}] {} ({})",
            leak.status.as_str(),
            leak.risk_assessment.as_str(),
            leak.source_url,
            leak.leak_type.as_str()
        );
    }
}
