/*!
`RemoteLlmProvider`: an OpenAI-compatible chat-completions client.
Grounded on the teacher's `llm/remote.rs`, generalized from the teacher's
`Summary{headline,bullets,details}` response shape to the spec's two flat
operations, and on `original_source/server/lib/filters/pipeline.go`'s
`ExtractContentAndSummarize`/`CheckImportance` for prompt wording.
*/

use super::{extract_json_from_text, ImportanceJudgement, LlmProvider};
use crate::types::PipelineError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub struct RemoteLlmProvider {
    base_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl RemoteLlmProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            timeout: Duration::from_secs(30),
            client: reqwest::Client::new(),
        }
    }

    async fn chat(&self, prompt: String, max_tokens: usize, temperature: f32) -> Result<String, PipelineError> {
        let body = OpenAiRequest {
            model: self.model.clone(),
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt,
            }],
            max_tokens: Some(max_tokens),
            temperature: Some(temperature),
        };

        let response = tokio::time::timeout(
            self.timeout,
            self.client
                .post(&self.base_url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send(),
        )
        .await
        .map_err(|_| PipelineError::TransientUpstream("LLM request timed out".into()))?
        .map_err(|e| PipelineError::TransientUpstream(format!("LLM HTTP request failed: {e}")))?;

        let status = response.status();
        if status.as_u16() == 402 {
            return Err(PipelineError::QuotaExhausted);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(PipelineError::TransientUpstream(format!("LLM API error {status}: {text}")));
        }

        let parsed: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::TransientUpstream(format!("failed to parse LLM response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| PipelineError::TransientUpstream("LLM response has no choices".into()))
    }
}

#[async_trait::async_trait]
impl LlmProvider for RemoteLlmProvider {
    async fn summarize(&self, text: &str) -> Result<String, PipelineError> {
        let prompt = format!(
            "Summarize the following article in a short, informative paragraph. \
             Keep the original language; do not translate.\n\nARTICLE:\n{text}"
        );
        let content = self.chat(prompt, 400, 0.5).await?;
        Ok(content.trim().to_string())
    }

    async fn judge_importance(&self, title_and_summary: &str) -> Result<ImportanceJudgement, PipelineError> {
        let prompt = format!(
            "Judge whether the following news item is existentially or geopolitically important. \
             Respond with strict JSON only:\n\
             {{\"existential_importance_bool\": true|false, \"existential_importance_reasoning\": \"...\"}}\n\n\
             {title_and_summary}"
        );
        let content = self.chat(prompt, 300, 0.2).await?;
        let cleaned = extract_json_from_text(&content)
            .ok_or_else(|| PipelineError::TransientUpstream("no JSON found in importance response".into()))?;
        let parsed: ImportanceJson = serde_json::from_str(&cleaned)
            .map_err(|e| PipelineError::TransientUpstream(format!("failed to parse importance JSON: {e}")))?;
        Ok(ImportanceJudgement {
            existential_importance_bool: parsed.existential_importance_bool,
            existential_importance_reasoning: parsed.existential_importance_reasoning,
        })
    }
}

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct ImportanceJson {
    existential_importance_bool: bool,
    existential_importance_reasoning: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn summarize_trims_and_returns_content() {
        let mut server = mockito::Server::new_async().await;
        let body = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "  A short paragraph.  "}}]
        });
        let mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await;

        let provider = RemoteLlmProvider::new(server.url(), "key", "gpt-4o-mini");
        let result = provider.summarize("some article text").await.unwrap();
        assert_eq!(result, "A short paragraph.");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn quota_exhausted_maps_from_http_402() {
        let mut server = mockito::Server::new_async().await;
        let mock = server.mock("POST", "/").with_status(402).create_async().await;

        let provider = RemoteLlmProvider::new(server.url(), "key", "gpt-4o-mini");
        let err = provider.summarize("text").await.unwrap_err();
        assert!(matches!(err, PipelineError::QuotaExhausted));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn judge_importance_parses_flat_json() {
        let mut server = mockito::Server::new_async().await;
        let inner = serde_json::json!({
            "existential_importance_bool": true,
            "existential_importance_reasoning": "reason"
        });
        let body = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": inner.to_string()}}]
        });
        let mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_body(body.to_string())
            .create_async()
            .await;

        let provider = RemoteLlmProvider::new(server.url(), "key", "gpt-4o-mini");
        let judgement = provider.judge_importance("title\nsummary").await.unwrap();
        assert!(judgement.existential_importance_bool);
        assert_eq!(judgement.existential_importance_reasoning, "reason");
        mock.assert_async().await;
    }
}
