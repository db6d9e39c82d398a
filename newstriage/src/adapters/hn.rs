/*!
Hacker News source adapter. Grounded on spec §4.6's example adapter-specific
composition: excludes "Ask HN:"/"Show HN:"/"Launch HN:" prefixes and
requires `points >= 2` or `comments >= 2`, layered on top of the standard
filter stages via the `Stage` vector the adapter hands to the pipeline.
*/

use super::Adapter;
use crate::filters::Stage;
use crate::types::{Candidate, PipelineError};
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use std::time::Duration;

const TOP_STORIES_URL: &str = "https://hacker-news.firebaseio.com/v0/topstories.json";
const ITEM_URL_TEMPLATE: &str = "https://hacker-news.firebaseio.com/v0/item";
const FETCH_LIMIT: usize = 60;

pub struct HackerNewsAdapter {
    stages: Vec<Stage>,
    timeout: Duration,
}

impl HackerNewsAdapter {
    pub fn new(mut extra_stages: Vec<Stage>) -> Self {
        let mut stages = vec![
            Stage::ExcludeTitlePrefixes(vec![
                "Ask HN:".to_string(),
                "Show HN:".to_string(),
                "Launch HN:".to_string(),
            ]),
            Stage::MinEngagement { min_points: 2, min_comments: 2 },
        ];
        stages.append(&mut extra_stages);
        Self {
            stages,
            timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Deserialize)]
struct HnItem {
    title: Option<String>,
    url: Option<String>,
    time: Option<i64>,
    score: Option<i64>,
    descendants: Option<i64>,
    #[serde(default)]
    dead: bool,
    #[serde(default)]
    deleted: bool,
}

#[async_trait::async_trait]
impl Adapter for HackerNewsAdapter {
    fn name(&self) -> &str {
        "hn"
    }

    fn stages(&self) -> &[Stage] {
        &self.stages
    }

    async fn fetch(&self) -> Result<Vec<Candidate>, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| PipelineError::TransientUpstream(format!("failed to build http client: {e}")))?;

        let ids: Vec<i64> = client
            .get(TOP_STORIES_URL)
            .send()
            .await
            .map_err(|e| PipelineError::TransientUpstream(format!("failed to fetch top stories: {e}")))?
            .json()
            .await
            .map_err(|e| PipelineError::TransientUpstream(format!("failed to parse top stories: {e}")))?;

        let mut candidates = Vec::new();
        for id in ids.into_iter().take(FETCH_LIMIT) {
            let response = match client.get(format!("{ITEM_URL_TEMPLATE}/{id}.json")).send().await {
                Ok(resp) => resp,
                Err(_) => continue,
            };
            let item: HnItem = match response.json().await {
                Ok(item) => item,
                Err(_) => continue,
            };

            if item.dead || item.deleted {
                continue;
            }
            let (Some(title), Some(time)) = (item.title, item.time) else {
                continue;
            };
            let link = item
                .url
                .unwrap_or_else(|| format!("https://news.ycombinator.com/item?id={id}"));
            let date = Utc
                .timestamp_opt(time, 0)
                .single()
                .unwrap_or_else(Utc::now);

            candidates.push(Candidate {
                title,
                link,
                date,
                origin: "hn".to_string(),
                points: item.score,
                comments: item.descendants,
            });
        }

        Ok(candidates)
    }
}
