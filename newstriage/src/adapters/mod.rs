/*!
Source Adapter Runner (C7). Each adapter runs an independent periodic loop:
fetch candidates, run the configured pipeline per candidate, upsert
survivors. A failing adapter must never affect its peers (spec §4.7, §5).

The adaptive backoff (double the tick interval on fetch failure, halve it
with a 15-minute floor after a run that persisted at least one article,
cap at 24h) is the ambient scheduling policy added in SPEC_FULL.md §10,
generalizing the teacher's `run_worker` interval-doubling uniformly across
adapters rather than per-source.
*/

pub mod hn;
pub mod rss;

use crate::filters::{apply_filters, PipelineContext, Stage};
use crate::flags::{self, OPENAI_REFILL_FLAG};
use crate::llm::LlmProvider;
use crate::store;
use crate::types::{Candidate, PipelineError};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{error, info, warn};

#[async_trait::async_trait]
pub trait Adapter: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch(&self) -> Result<Vec<Candidate>, PipelineError>;
    fn stages(&self) -> &[Stage];
}

const MIN_TICK: Duration = Duration::from_secs(15 * 60);
const MAX_TICK: Duration = Duration::from_secs(24 * 60 * 60);

/// Run one adapter's loop until `shutdown` fires. Per-candidate failures
/// are logged and the loop continues; a fetch failure backs the adapter
/// off without touching any other adapter's schedule.
pub async fn run_adapter_loop(
    adapter: Arc<dyn Adapter>,
    pool: PgPool,
    llm: Arc<dyn LlmProvider>,
    readability_base: String,
    postmark_key: String,
    initial_tick: Duration,
    shutdown: Arc<Notify>,
) {
    let mut tick = initial_tick.clamp(MIN_TICK, MAX_TICK);

    loop {
        tokio::select! {
            _ = tokio::time::sleep(tick) => {}
            _ = shutdown.notified() => {
                info!(adapter = adapter.name(), "adapter loop shutting down");
                return;
            }
        }

        match run_once(adapter.as_ref(), &pool, llm.as_ref(), &readability_base, &postmark_key).await {
            Ok(persisted) => {
                if persisted > 0 {
                    tick = (tick / 2).max(MIN_TICK);
                } else {
                    tick = (tick + tick / 2).min(MAX_TICK);
                }
            }
            Err(e) => {
                warn!(adapter = adapter.name(), error = %e, "adapter tick failed, backing off");
                tick = (tick * 2).min(MAX_TICK);
            }
        }
    }
}

async fn run_once(
    adapter: &dyn Adapter,
    pool: &PgPool,
    llm: &dyn LlmProvider,
    readability_base: &str,
    postmark_key: &str,
) -> Result<usize, PipelineError> {
    if flags::is_set(pool, OPENAI_REFILL_FLAG).await {
        info!(adapter = adapter.name(), "openai_refill flag set, skipping this tick entirely");
        return Ok(0);
    }

    let candidates = adapter.fetch().await?;
    info!(adapter = adapter.name(), count = candidates.len(), "fetched candidates");

    let ctx = PipelineContext { pool, readability_base, llm };
    let mut persisted = 0usize;

    for candidate in candidates {
        let expanded = candidate.into();
        let (expanded, accepted, rejection) = apply_filters(expanded, adapter.stages(), &ctx).await;

        if let Some(PipelineError::QuotaExhausted) = rejection {
            warn!(adapter = adapter.name(), "LLM provider quota exhausted, tripping operational flag");
            flags::trip_quota_exhausted(pool, postmark_key).await;
            break; // remaining candidates this tick would hit the same quota wall
        }

        if !accepted {
            continue;
        }
        match store::upsert(pool, &expanded).await {
            Ok(()) => persisted += 1,
            Err(e) => error!(adapter = adapter.name(), link = %expanded.link, error = %e, "failed to persist candidate"),
        }
    }

    Ok(persisted)
}
