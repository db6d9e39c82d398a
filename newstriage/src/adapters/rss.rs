/*!
RSS/Atom source adapter, grounded on the teacher's `ingestion.rs`
(`fetch_and_parse_feed`) and `feed-rs` crate usage, generalized from a
single-feed fetch into the `Adapter` trait.
*/

use super::Adapter;
use crate::filters::Stage;
use crate::types::{Candidate, PipelineError};
use chrono::Utc;
use std::time::Duration;

pub struct RssAdapter {
    name: String,
    feed_url: String,
    stages: Vec<Stage>,
    timeout: Duration,
}

impl RssAdapter {
    pub fn new(name: impl Into<String>, feed_url: impl Into<String>, stages: Vec<Stage>) -> Self {
        Self {
            name: name.into(),
            feed_url: feed_url.into(),
            stages,
            timeout: Duration::from_secs(15),
        }
    }
}

#[async_trait::async_trait]
impl Adapter for RssAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn stages(&self) -> &[Stage] {
        &self.stages
    }

    async fn fetch(&self) -> Result<Vec<Candidate>, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| PipelineError::TransientUpstream(format!("failed to build http client: {e}")))?;

        let bytes = client
            .get(&self.feed_url)
            .send()
            .await
            .map_err(|e| PipelineError::TransientUpstream(format!("failed to fetch feed {}: {e}", self.feed_url)))?
            .bytes()
            .await
            .map_err(|e| PipelineError::TransientUpstream(format!("failed to read feed body: {e}")))?;

        let feed = feed_rs::parser::parse(&bytes[..])
            .map_err(|e| PipelineError::TransientUpstream(format!("failed to parse feed {}: {e}", self.feed_url)))?;

        let candidates = feed
            .entries
            .into_iter()
            .filter_map(|entry| {
                let title = entry.title.map(|t| t.content)?;
                let link = entry.links.first().map(|l| l.href.clone())?;
                let date = entry
                    .published
                    .or(entry.updated)
                    .unwrap_or_else(Utc::now);
                Some(Candidate {
                    title,
                    link,
                    date,
                    origin: self.name.clone(),
                    points: None,
                    comments: None,
                })
            })
            .collect();

        Ok(candidates)
    }
}
