/*!
Article Store (C1). Link-unique upsert, processed/relevance mutation, and
the unread-survivor load the client pulls at startup.

Two logical tables exist: `sources`, the main store, and `"sources-ai"`, an
archival mirror. `save_conditional` always writes the mirror and writes the
main table only when the caller says the candidate passed filters — the
pgx source this is grounded on treats the two as independent sinks, never
a transaction.
*/

use crate::types::{Article, ExpandedCandidate, RelevantPerHumanCheck};
use sqlx::PgPool;
use tracing::{info, warn};

/// Insert on (title, link, date, summary, importance flag/reasoning); no-op
/// on link conflict. The caller never sees a conflict as an error (spec §4.1).
pub async fn upsert(pool: &PgPool, c: &ExpandedCandidate) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO sources (title, link, date, summary, importance_bool, importance_reasoning)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (link) DO NOTHING
        "#,
    )
    .bind(&c.title)
    .bind(&c.link)
    .bind(c.date)
    .bind(&c.summary)
    .bind(c.importance_bool)
    .bind(&c.importance_reasoning)
    .execute(pool)
    .await?;
    Ok(())
}

async fn upsert_ai_mirror(pool: &PgPool, c: &ExpandedCandidate) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO "sources-ai" (title, link, date, summary, importance_bool, importance_reasoning)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (link) DO NOTHING
        "#,
    )
    .bind(&c.title)
    .bind(&c.link)
    .bind(c.date)
    .bind(&c.summary)
    .bind(c.importance_bool)
    .bind(&c.importance_reasoning)
    .execute(pool)
    .await?;
    Ok(())
}

/// Always archives to the ai-mirror; writes the main store only when
/// `passes_filters` is true.
pub async fn save_conditional(
    pool: &PgPool,
    c: &ExpandedCandidate,
    passes_filters: bool,
) -> Result<(), sqlx::Error> {
    upsert_ai_mirror(pool, c).await?;
    if passes_filters {
        upsert(pool, c).await?;
    }
    Ok(())
}

/// Unconditional update; a missing id is logged and swallowed (spec §4.1).
pub async fn set_processed(pool: &PgPool, id: i64, processed: bool) -> Result<(), sqlx::Error> {
    let result = sqlx::query("UPDATE sources SET processed = $1 WHERE id = $2")
        .bind(processed)
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        warn!(id, "set_processed: no row with this id");
    }
    Ok(())
}

pub async fn set_relevant_per_human_check(
    pool: &PgPool,
    id: i64,
    value: RelevantPerHumanCheck,
) -> Result<(), sqlx::Error> {
    let result = sqlx::query("UPDATE sources SET relevant_per_human_check = $1 WHERE id = $2")
        .bind(value.as_str())
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        warn!(id, "set_relevant_per_human_check: no row with this id");
    }
    Ok(())
}

/// Unread survivors, ordered by date ascending then id ascending
/// (spec §4.1's "currently" load predicate).
pub async fn load_unprocessed(pool: &PgPool) -> Result<Vec<Article>, sqlx::Error> {
    let rows = sqlx::query_as::<_, Article>(
        "SELECT id, title, link, date, summary, importance_bool, importance_reasoning, \
         created_at, processed, relevant_per_human_check \
         FROM sources WHERE processed = false ORDER BY date ASC, id ASC",
    )
    .fetch_all(pool)
    .await?;
    info!(count = rows.len(), "loaded unprocessed articles");
    Ok(rows)
}
