/*!
newstriage-server: the Source Adapter Runner daemon (C7). Spawns one
loop per configured adapter and runs until interrupted. Grounded on the
teacher's single-binary `main.rs`, generalized from one Rocket+worker
process into a worker-only daemon (the terminal client is its own binary).
*/

use anyhow::{Context, Result};
use clap::Parser;
use common::Config;
use newstriage::adapters::hn::HackerNewsAdapter;
use newstriage::adapters::rss::RssAdapter;
use newstriage::adapters::{run_adapter_loop, Adapter};
use newstriage::filters::Stage;
use newstriage::llm::remote::RemoteLlmProvider;
use newstriage::llm::LlmProvider;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "newstriage-server", about = "Ingests, filters and enriches candidate articles")]
struct Args {
    /// Path to adapters.toml
    #[arg(long, value_name = "FILE", default_value = "adapters.toml")]
    adapters: PathBuf,

    /// Path to topics.txt (loaded for validation at startup only; used by the client)
    #[arg(long, value_name = "FILE", default_value = "topics.txt")]
    topics: PathBuf,

    /// Path to filters.txt (keyword importance boosters)
    #[arg(long, value_name = "FILE", default_value = "filters.txt")]
    filters: PathBuf,
}

/// The fixed six-stage pipeline (spec §4.6), plus any keyword importance
/// boosters loaded from `filters.txt` appended at the end so they can
/// override a false LLM importance judgement (spec §4.6's "importance
/// boosters" are adapter-agnostic, unlike HN's prefilters).
fn standard_stages(boosters: &[Stage]) -> Vec<Stage> {
    let mut stages = vec![
        Stage::Freshness,
        Stage::Dedup,
        Stage::HostAllowlist,
        Stage::TitleClean,
        Stage::ExtractAndSummarize,
        Stage::ImportanceCheck,
    ];
    stages.extend(boosters.iter().cloned());
    stages
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    fmt().with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))).init();

    let args = Args::parse();

    let config = Config::from_env(Some(&args.adapters)).context("failed to load configuration")?;
    info!(adapters = ?args.adapters, "configuration loaded");

    if args.topics.exists() {
        let text = std::fs::read_to_string(&args.topics).context("failed to read topics.txt")?;
        if let Err(e) = newstriage::topics::load_topics(&text) {
            error!(%e, "topics.txt failed to parse at startup");
        }
    }

    let boosters = if args.filters.exists() {
        let text = std::fs::read_to_string(&args.filters).context("failed to read filters.txt")?;
        newstriage::filters::load_filters(&text).context("filters.txt failed to parse")?
    } else {
        Vec::new()
    };

    let pool = common::init_db_pool(&config.database_url).await.context("failed to connect to postgres")?;
    common::run_migrations(&pool).await.context("failed to run migrations")?;

    let llm: Arc<dyn LlmProvider> = Arc::new(RemoteLlmProvider::new(
        "https://api.openai.com/v1/chat/completions",
        config.openai_key.clone(),
        "gpt-4o-mini",
    ));

    let shutdown = Arc::new(Notify::new());
    let mut handles = Vec::new();

    for entry in &config.adapters.adapter {
        let adapter: Arc<dyn Adapter> = match entry.kind.as_str() {
            "hn" => Arc::new(HackerNewsAdapter::new(standard_stages(&boosters))),
            "rss" => {
                let Some(feed_url) = entry.feed_url.clone() else {
                    error!(name = %entry.name, "rss adapter entry missing feed_url, skipping");
                    continue;
                };
                Arc::new(RssAdapter::new(entry.name.clone(), feed_url, standard_stages(&boosters)))
            }
            other => {
                error!(name = %entry.name, kind = other, "unknown adapter kind, skipping");
                continue;
            }
        };

        let pool = pool.clone();
        let llm = llm.clone();
        let readability_base = config.readability_base.clone();
        let postmark_key = config.postmark_key.clone();
        let tick = Duration::from_secs(entry.tick_minutes * 60);
        let shutdown = shutdown.clone();

        info!(name = %entry.name, tick_minutes = entry.tick_minutes, "starting adapter loop");
        handles.push(tokio::spawn(run_adapter_loop(
            adapter,
            pool,
            llm,
            readability_base,
            postmark_key,
            tick,
            shutdown,
        )));
    }

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("shutdown requested, notifying adapter loops");
    shutdown.notify_waiters();

    for handle in handles {
        let _ = handle.await;
    }
    info!("shutdown complete");
    Ok(())
}
