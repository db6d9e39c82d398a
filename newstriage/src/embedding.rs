/*!
Embedding Client (C5): the single hardest subsystem after the pipeline
(spec §4.5). `embed_batch` is a pure function over input lengths and a
provided send-batch operation — no shared state — so the adaptive-split
retry composes cleanly with whatever transport-level retry the provider
trait implementation does on its own.
*/

use crate::types::{EmbeddingVector, PipelineError};
use serde::{Deserialize, Serialize};
use tiktoken_rs::CoreBPE;

/// Soft per-request token budget. The provider's hard cap is 300,000;
/// staying well under it keeps the happy path cheap while split-on-overflow
/// guarantees progress on pathological batches.
const SOFT_BATCH_TOKENS: usize = 150_000;

/// Raised by a provider implementation when a submitted batch exceeds the
/// server-side token-per-request cap, distinct from any other transport
/// failure so `embed_batch` knows to bisect and retry.
#[derive(Debug)]
pub enum EmbedError {
    TokenCapExceeded,
    Other(PipelineError),
}

#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Submit exactly one batch; never called with an empty slice.
    async fn embed_raw(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, EmbedError>;
}

fn tokenizer() -> Option<CoreBPE> {
    tiktoken_rs::cl100k_base().ok()
}

/// Token count via the shared BPE tokenizer, falling back to
/// `ceil(len(bytes) / 4)` when the tokenizer is unavailable (spec §4.5.1).
fn count_tokens(bpe: &Option<CoreBPE>, text: &str) -> usize {
    match bpe {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => (text.len() + 3) / 4,
    }
}

/// Greedily accumulate texts into batches while the running token sum
/// stays within `SOFT_BATCH_TOKENS`; flush and start a new batch rather
/// than exceed it. A batch of size zero is never produced.
fn budget_batches(texts: &[String], bpe: &Option<CoreBPE>) -> Vec<Vec<usize>> {
    let mut batches = Vec::new();
    let mut current: Vec<usize> = Vec::new();
    let mut current_tokens = 0usize;

    for (i, text) in texts.iter().enumerate() {
        let tokens = count_tokens(bpe, text);
        if !current.is_empty() && current_tokens + tokens > SOFT_BATCH_TOKENS {
            batches.push(std::mem::take(&mut current));
            current_tokens = 0;
        }
        current.push(i);
        current_tokens += tokens;
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// Submit one batch (by index), bisecting recursively on a provider-side
/// token-cap overflow. A singleton batch that still overflows surfaces
/// `InputTooLarge` (spec §4.5.3).
#[async_recursion::async_recursion]
async fn submit_with_split(
    provider: &(dyn EmbeddingProvider + Sync),
    texts: &[String],
    indices: &[usize],
) -> Result<Vec<(usize, EmbeddingVector)>, PipelineError> {
    let batch: Vec<String> = indices.iter().map(|&i| texts[i].clone()).collect();

    match provider.embed_raw(&batch).await {
        Ok(vectors) => {
            if vectors.len() != indices.len() {
                return Err(PipelineError::ProviderInconsistent(format!(
                    "provider returned {} vectors for {} inputs",
                    vectors.len(),
                    indices.len()
                )));
            }
            Ok(indices.iter().copied().zip(vectors).collect())
        }
        Err(EmbedError::TokenCapExceeded) => {
            if indices.len() == 1 {
                return Err(PipelineError::InputTooLarge(format!(
                    "single text at index {} exceeds the provider's token cap",
                    indices[0]
                )));
            }
            let mid = indices.len() / 2;
            let (left, right) = indices.split_at(mid);
            let mut left_results = submit_with_split(provider, texts, left).await?;
            let right_results = submit_with_split(provider, texts, right).await?;
            left_results.extend(right_results);
            Ok(left_results)
        }
        Err(EmbedError::Other(e)) => Err(e),
    }
}

/// `embed([text]) -> [[float]]`: output length equals input length, element
/// i is the embedding of input i, in submission order (spec §4.5.4).
pub async fn embed_batch(
    provider: &(dyn EmbeddingProvider + Sync),
    texts: &[String],
) -> Result<Vec<EmbeddingVector>, PipelineError> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let bpe = tokenizer();
    let batches = budget_batches(texts, &bpe);

    let mut ordered: Vec<Option<EmbeddingVector>> = vec![None; texts.len()];
    for batch_indices in batches {
        let results = submit_with_split(provider, texts, &batch_indices).await?;
        for (idx, vector) in results {
            ordered[idx] = Some(vector);
        }
    }

    let total = ordered.len();
    let collected: Vec<EmbeddingVector> = ordered.into_iter().flatten().collect();
    if collected.len() != total {
        return Err(PipelineError::ProviderInconsistent(
            "not all inputs received an embedding".to_string(),
        ));
    }
    Ok(collected)
}

/// OpenAI-compatible embeddings endpoint. Mirrors `RemoteLlmProvider`'s
/// HTTP conventions (bearer auth, 402 maps to quota exhaustion) but speaks
/// the embeddings request/response shape instead of chat completions.
pub struct RemoteEmbeddingProvider {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl RemoteEmbeddingProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: EmbeddingVector,
    index: usize,
}

#[async_trait::async_trait]
impl EmbeddingProvider for RemoteEmbeddingProvider {
    async fn embed_raw(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, EmbedError> {
        let body = EmbeddingsRequest { model: &self.model, input: texts };

        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbedError::Other(PipelineError::TransientUpstream(format!("embeddings request failed: {e}"))))?;

        let status = response.status();
        if status.as_u16() == 413 {
            return Err(EmbedError::TokenCapExceeded);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.as_u16() == 402 {
                return Err(EmbedError::Other(PipelineError::QuotaExhausted));
            }
            return Err(EmbedError::Other(PipelineError::TransientUpstream(format!(
                "embeddings request returned {status}: {body}"
            ))));
        }

        let mut parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| EmbedError::Other(PipelineError::ProviderInconsistent(format!("bad embeddings response: {e}"))))?;
        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn fake_vector(seed: usize) -> EmbeddingVector {
        vec![seed as f64; 4]
    }

    struct RecordingProvider {
        calls: AtomicUsize,
        overflow_on_first_call_over: Option<usize>,
        seen_batches: Mutex<Vec<usize>>,
    }

    #[async_trait::async_trait]
    impl EmbeddingProvider for RecordingProvider {
        async fn embed_raw(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, EmbedError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_batches.lock().unwrap().push(texts.len());
            if let Some(threshold) = self.overflow_on_first_call_over {
                if texts.len() > threshold {
                    return Err(EmbedError::TokenCapExceeded);
                }
            }
            Ok(texts
                .iter()
                .map(|t| fake_vector(t.parse::<usize>().unwrap()))
                .collect())
        }
    }

    #[tokio::test]
    async fn batch_completeness_preserves_order() {
        let texts: Vec<String> = (0..50).map(|i| i.to_string()).collect();
        let provider = RecordingProvider {
            calls: AtomicUsize::new(0),
            overflow_on_first_call_over: None,
            seen_batches: Mutex::new(Vec::new()),
        };
        let result = embed_batch(&provider, &texts).await.unwrap();
        assert_eq!(result.len(), 50);
        for (i, vector) in result.iter().enumerate() {
            assert_eq!(vector, &fake_vector(i));
        }
    }

    #[tokio::test]
    async fn split_on_overflow_matches_direct_bisection() {
        let texts: Vec<String> = (0..16).map(|i| i.to_string()).collect();
        let provider = RecordingProvider {
            calls: AtomicUsize::new(0),
            overflow_on_first_call_over: Some(4),
            seen_batches: Mutex::new(Vec::new()),
        };
        let result = embed_batch(&provider, &texts).await.unwrap();
        assert_eq!(result.len(), 16);
        for (i, vector) in result.iter().enumerate() {
            assert_eq!(vector, &fake_vector(i));
        }
        // Every accepted batch must be at or below the threshold that no
        // longer triggers the provider's overflow.
        let seen = provider.seen_batches.lock().unwrap();
        assert!(seen.iter().all(|&n| n <= 4 || n == 16));
    }

    #[tokio::test]
    async fn singleton_overflow_surfaces_input_too_large() {
        let texts: Vec<String> = vec!["0".to_string()];
        let provider = RecordingProvider {
            calls: AtomicUsize::new(0),
            overflow_on_first_call_over: Some(0),
            seen_batches: Mutex::new(Vec::new()),
        };
        let err = embed_batch(&provider, &texts).await.unwrap_err();
        assert!(matches!(err, PipelineError::InputTooLarge(_)));
    }

    #[tokio::test]
    async fn empty_input_yields_empty_output_without_a_call() {
        let provider = RecordingProvider {
            calls: AtomicUsize::new(0),
            overflow_on_first_call_over: None,
            seen_batches: Mutex::new(Vec::new()),
        };
        let result = embed_batch(&provider, &[]).await.unwrap();
        assert!(result.is_empty());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn budget_batches_never_produces_an_empty_batch() {
        let bpe = tokenizer();
        let texts: Vec<String> = vec!["hello".to_string(); 3];
        let batches = budget_batches(&texts, &bpe);
        assert!(batches.iter().all(|b| !b.is_empty()));
    }
}
