/*!
Core data model (spec §3): `Article`, `Candidate`, `ExpandedCandidate`,
`EmbeddingVector`, `Cluster`, `Topic`, `Flag`, and the pipeline error kinds
(spec §7).
*/

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Human triage verdict on an `Article`. `Unset` until a person decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelevantPerHumanCheck {
    Unset,
    Yes,
    No,
    Maybe,
}

impl RelevantPerHumanCheck {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelevantPerHumanCheck::Unset => "unset",
            RelevantPerHumanCheck::Yes => "yes",
            RelevantPerHumanCheck::No => "no",
            RelevantPerHumanCheck::Maybe => "maybe",
        }
    }

    pub fn parse(s: Option<&str>) -> Self {
        match s {
            Some("yes") => RelevantPerHumanCheck::Yes,
            Some("no") => RelevantPerHumanCheck::No,
            Some("maybe") => RelevantPerHumanCheck::Maybe,
            _ => RelevantPerHumanCheck::Unset,
        }
    }
}

/// A persisted article row (`sources` / `"sources-ai"`). Mutated only by the
/// client, past the point C7 inserts it.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,
    pub title: String,
    pub link: String,
    pub date: DateTime<Utc>,
    pub summary: String,
    pub importance_bool: bool,
    pub importance_reasoning: String,
    pub created_at: DateTime<Utc>,
    pub processed: bool,
    pub relevant_per_human_check: Option<String>,
}

impl Article {
    pub fn relevance(&self) -> RelevantPerHumanCheck {
        RelevantPerHumanCheck::parse(self.relevant_per_human_check.as_deref())
    }
}

/// In-memory candidate from an adapter fetch, before the pipeline runs.
/// `points`/`comments` are populated by adapters that have an engagement
/// signal (e.g. Hacker News) and ignored by those that don't.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub title: String,
    pub link: String,
    pub date: DateTime<Utc>,
    pub origin: String,
    pub points: Option<i64>,
    pub comments: Option<i64>,
}

/// A `Candidate` enriched by filter/enrichment stages. Invariant: `summary`
/// is non-empty before the importance stage runs.
#[derive(Debug, Clone)]
pub struct ExpandedCandidate {
    pub title: String,
    pub link: String,
    pub date: DateTime<Utc>,
    pub origin: String,
    pub points: Option<i64>,
    pub comments: Option<i64>,
    pub summary: String,
    pub importance_bool: bool,
    pub importance_reasoning: String,
}

impl From<Candidate> for ExpandedCandidate {
    fn from(c: Candidate) -> Self {
        ExpandedCandidate {
            title: c.title,
            link: c.link,
            date: c.date,
            origin: c.origin,
            points: c.points,
            comments: c.comments,
            summary: String::new(),
            importance_bool: false,
            importance_reasoning: String::new(),
        }
    }
}

/// Fixed-dimension embedding vector. All vectors in one batch share a
/// dimensionality, determined by the provider's model.
pub type EmbeddingVector = Vec<f64>;

/// Output of the clusterer (C8): central/outlier index partitions plus the
/// centroid of the central points.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub id: usize,
    pub central: Vec<usize>,
    pub outliers: Vec<usize>,
    pub centroid: EmbeddingVector,
}

/// A named set of case-insensitive regexes used to rank cluster groups
/// (C9), loaded from `topics.txt`.
#[derive(Debug, Clone)]
pub struct Topic {
    pub name: String,
    pub patterns: Vec<regex::Regex>,
}

/// Operational flag row, gates ingestion on provider quota exhaustion.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Flag {
    pub name: String,
    pub code: i32,
    pub msg: String,
    pub updated_at: DateTime<Utc>,
}

/// Pipeline error kinds (spec §7). Every candidate-level rejection is one of
/// these; logging happens exactly once, at the point the error is swallowed
/// into a rejection.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PipelineError {
    #[error("transient upstream failure: {0}")]
    TransientUpstream(String),

    #[error("LLM provider quota exhausted")]
    QuotaExhausted,

    #[error("input too large for a single embedding request: {0}")]
    InputTooLarge(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("provider returned inconsistent output: {0}")]
    ProviderInconsistent(String),
}
