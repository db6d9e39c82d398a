/*!
Operational Flag (spec §3). Gates ingestion when the LLM provider returns
insufficient-funds; also fires a best-effort Postmark alert, supplementing
the spec from `original_source/server/lib/outbound/outbound.go` (see
SPEC_FULL.md §10).
*/

use chrono::Utc;
use sqlx::PgPool;
use tracing::{error, info, warn};

pub const OPENAI_REFILL_FLAG: &str = "openai_refill";

pub async fn set_flag(pool: &PgPool, name: &str, code: i32, msg: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO flags (name, code, msg, updated_at)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (name) DO UPDATE SET code = $2, msg = $3, updated_at = $4
        "#,
    )
    .bind(name)
    .bind(code)
    .bind(msg)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn is_set(pool: &PgPool, name: &str) -> bool {
    match sqlx::query_scalar::<_, i32>("SELECT code FROM flags WHERE name = $1")
        .bind(name)
        .fetch_optional(pool)
        .await
    {
        Ok(Some(code)) => code != 0,
        Ok(None) => false,
        Err(e) => {
            warn!(%e, name, "failed to read operational flag, assuming unset");
            false
        }
    }
}

/// Trip the quota-exhausted flag and fire an operator alert email
/// (fire-and-forget: a failed send is logged, never propagated).
pub async fn trip_quota_exhausted(pool: &PgPool, postmark_key: &str) {
    if let Err(e) = set_flag(pool, OPENAI_REFILL_FLAG, 1, "LLM provider reports quota exhausted").await {
        error!(%e, "failed to persist quota-exhausted flag");
    }
    notify_operator(postmark_key, "LLM provider quota exhausted; ingestion is backing off.").await;
}

pub async fn clear_quota_exhausted(pool: &PgPool) -> Result<(), sqlx::Error> {
    set_flag(pool, OPENAI_REFILL_FLAG, 0, "cleared").await
}

/// Best-effort Postmark notification. Never returns an error to the
/// caller; a transport or auth failure is logged and dropped.
pub async fn notify_operator(postmark_key: &str, html_body: &str) {
    let client = reqwest::Client::new();
    let payload = serde_json::json!({
        "From": "server@newstriage.example",
        "To": "operator@newstriage.example",
        "Subject": "Warning",
        "TextBody": "",
        "HtmlBody": html_body,
        "TrackLinks": "None",
        "MessageStream": "outbound",
    });

    match client
        .post("https://api.postmarkapp.com/email")
        .header("X-Postmark-Server-Token", postmark_key)
        .json(&payload)
        .send()
        .await
    {
        Ok(resp) if resp.status().is_success() => info!("operator alert email sent"),
        Ok(resp) => warn!(status = %resp.status(), "operator alert email rejected by postmark"),
        Err(e) => warn!(%e, "failed to send operator alert email"),
    }
}
