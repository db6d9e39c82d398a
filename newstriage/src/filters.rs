/*!
Filter Pipeline (C6). A filter is a pure transform-plus-decide function;
the pipeline applies an ordered sequence and short-circuits at the first
rejection (spec §4.6). Per design note §9, composition is an explicit
vector of tagged variants rather than a trait hierarchy.

Grounded on `original_source/server/lib/filters/{filters.go,pipeline.go}`.
*/

use crate::llm::LlmProvider;
use crate::types::{ExpandedCandidate, PipelineError};
use crate::{dedup, extract};
use chrono::{Duration as ChronoDuration, Utc};
use regex::Regex;
use sqlx::PgPool;
use tracing::info;

const BAD_HOSTS: &[&str] = &[
    "www.washingtonpost.com",
    "www.youtube.com",
    "www.naturalnews.com",
    "facebook.com",
    "m.facebook.com",
    "www.bignewsnetwork.com",
];

/// One stage of a pipeline. Adapter-specific prefilters (`ExcludeTitlePrefixes`,
/// `MinEngagement`) and importance boosters (`KeywordImportanceBoost`) are
/// composed in per-adapter by `crate::adapters`.
#[derive(Clone)]
pub enum Stage {
    Freshness,
    Dedup,
    HostAllowlist,
    TitleClean,
    ExtractAndSummarize,
    ImportanceCheck,
    ExcludeTitlePrefixes(Vec<String>),
    MinEngagement { min_points: i64, min_comments: i64 },
    KeywordImportanceBoost { pattern: Regex, reasoning: String },
}

/// Shared, read-only context a stage may need: the store connection, the
/// content extractor's readability endpoint, and the LLM provider.
pub struct PipelineContext<'a> {
    pub pool: &'a PgPool,
    pub readability_base: &'a str,
    pub llm: &'a (dyn LlmProvider + Sync),
}

/// Applies `stages` in order, stopping at the first rejection (spec §4.6's
/// short-circuit requirement; testable property 2). The third element is
/// the stage error that caused rejection, if any — callers use it to tell
/// a transient/quota failure apart from an ordinary content rejection
/// (spec §9 S6: a quota-exhausted summarise must trip the operational
/// flag, not just silently drop the candidate).
pub async fn apply_filters(
    mut candidate: ExpandedCandidate,
    stages: &[Stage],
    ctx: &PipelineContext<'_>,
) -> (ExpandedCandidate, bool, Option<PipelineError>) {
    for stage in stages {
        match apply_stage(&mut candidate, stage, ctx).await {
            Ok(true) => continue,
            Ok(false) => return (candidate, false, None),
            Err(e) => {
                info!(link = %candidate.link, error = %e, "filtered because stage errored");
                return (candidate, false, Some(e));
            }
        }
    }
    (candidate, true, None)
}

async fn apply_stage(
    candidate: &mut ExpandedCandidate,
    stage: &Stage,
    ctx: &PipelineContext<'_>,
) -> Result<bool, PipelineError> {
    match stage {
        Stage::Freshness => Ok(is_fresh(candidate.date)),
        Stage::Dedup => {
            let upper_title = candidate.title.to_uppercase();
            Ok(!dedup::is_dupe(ctx.pool, &upper_title, &candidate.link).await)
        }
        Stage::HostAllowlist => Ok(is_good_host(&candidate.link)),
        Stage::TitleClean => {
            candidate.title = clean_title(&candidate.title);
            Ok(true)
        }
        Stage::ExtractAndSummarize => {
            let content = extract::fetch_article_content(ctx.readability_base, &candidate.link).await?;
            let summary = ctx.llm.summarize(&content).await?;
            candidate.summary = summary;
            Ok(!candidate.summary.is_empty())
        }
        Stage::ImportanceCheck => {
            let snippet = format!("# {}\n\n{}", candidate.title, candidate.summary);
            let judgement = ctx.llm.judge_importance(&snippet).await?;
            candidate.importance_bool = judgement.existential_importance_bool;
            candidate.importance_reasoning = judgement.existential_importance_reasoning;
            Ok(candidate.importance_bool)
        }
        Stage::ExcludeTitlePrefixes(prefixes) => {
            let lower = candidate.title.to_lowercase();
            Ok(!prefixes.iter().any(|p| lower.starts_with(&p.to_lowercase())))
        }
        Stage::MinEngagement { min_points, min_comments } => {
            let points = candidate.points.unwrap_or(0);
            let comments = candidate.comments.unwrap_or(0);
            Ok(points >= *min_points || comments >= *min_comments)
        }
        Stage::KeywordImportanceBoost { pattern, reasoning } => {
            if pattern.is_match(&candidate.title) || pattern.is_match(&candidate.summary) {
                candidate.importance_bool = true;
                candidate.importance_reasoning = reasoning.clone();
            }
            Ok(true)
        }
    }
}

/// `filters.txt`: one regex per line, `#` comments, blank lines ignored
/// (spec §6). Each line becomes its own `KeywordImportanceBoost` stage
/// with a canned reasoning naming the matched keyword, mirroring how
/// `topics::load_topics` turns `topics.txt` lines into `Topic`s. A
/// malformed regex is `ConfigInvalid` — fatal at load (spec §7).
pub fn load_filters(text: &str) -> Result<Vec<Stage>, PipelineError> {
    let mut stages = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let pattern = format!("(?i){line}");
        let re = Regex::new(&pattern)
            .map_err(|e| PipelineError::ConfigInvalid(format!("invalid filter regex '{line}': {e}")))?;
        stages.push(Stage::KeywordImportanceBoost {
            pattern: re,
            reasoning: format!("matched configured importance keyword: {line}"),
        });
    }
    Ok(stages)
}

pub fn load_filters_or_log(text: &str) -> Vec<Stage> {
    match load_filters(text) {
        Ok(stages) => stages,
        Err(e) => {
            info!(error = %e, "failed to load filters.txt, no keyword boosters will run");
            Vec::new()
        }
    }
}

/// Accept iff `|now - date| <= 15 days`, symmetric to tolerate mild date
/// skew in upstream feeds (spec §4.6.1, open question resolved in
/// SPEC_FULL.md §11.1).
fn is_fresh(date: chrono::DateTime<Utc>) -> bool {
    let now = Utc::now();
    let window = ChronoDuration::days(15);
    date > now - window && date < now + window
}

fn is_good_host(link: &str) -> bool {
    match url::Url::parse(link) {
        Ok(url) => match url.host_str() {
            Some(host) => !BAD_HOSTS.contains(&host),
            None => false,
        },
        Err(_) => false,
    }
}

fn clean_title_once(s: &str, ending_marker: &str) -> String {
    if s.len() <= 25 {
        return s.to_string();
    }
    let (head, tail) = s.split_at(25);
    match tail.rfind(ending_marker) {
        Some(pos) => head.to_string() + &tail[..pos],
        None => s.to_string(),
    }
}

/// Strip inline HTML-like markers, decode a couple of common entities, and
/// truncate a trailing publication-name segment (spec §4.6.4).
pub fn clean_title(s: &str) -> String {
    let s2 = clean_title_once(s, " – ");
    let s3 = clean_title_once(&s2, " - ");
    let s4 = clean_title_once(&s3, "|");
    let s5 = s4.replace("<b>", "");
    let s6 = s5.replace("</b>", "");
    let s7 = s6.replace("&#39;", "'");
    s7.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn freshness_window_is_symmetric_fifteen_days() {
        assert!(is_fresh(Utc::now() - Duration::days(2)));
        assert!(is_fresh(Utc::now() + Duration::days(2)));
        assert!(!is_fresh(Utc::now() - Duration::days(20)));
        assert!(!is_fresh(Utc::now() + Duration::days(20)));
    }

    #[test]
    fn host_allowlist_rejects_bad_hosts_regardless_of_other_fields() {
        assert!(!is_good_host("https://www.youtube.com/watch?v=abc"));
        assert!(!is_good_host("https://m.facebook.com/x"));
        assert!(is_good_host("https://a.example/ok"));
    }

    #[test]
    fn clean_title_strips_markers_and_truncates() {
        let input = " <b>Nuclear</b> test site reopens - Some Publication ";
        assert_eq!(clean_title(input), "Nuclear test site reopens");
    }

    #[test]
    fn clean_title_leaves_short_titles_alone() {
        assert_eq!(clean_title("Short | Title"), "Short | Title");
    }

    #[test]
    fn clean_title_decodes_apostrophe_entity() {
        assert_eq!(clean_title("Editor&#39;s note"), "Editor's note");
    }

    #[test]
    fn load_filters_parses_one_regex_per_line() {
        let text = "# comment\nnuclear (weapon|test|strike)\n\npandemic outbreak\n";
        let stages = load_filters(text).unwrap();
        assert_eq!(stages.len(), 2);
        assert!(matches!(&stages[0], Stage::KeywordImportanceBoost { reasoning, .. } if reasoning.contains("nuclear")));
    }

    #[test]
    fn load_filters_rejects_invalid_regex() {
        assert!(matches!(load_filters("(unterminated"), Err(PipelineError::ConfigInvalid(_))));
    }
}
