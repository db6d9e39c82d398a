/*!
LLM Client (C4): summarisation and existential-importance judgement.
Wire format is OpenAI-compatible JSON chat completions (spec §6); the
provider is reached through the `LlmProvider` trait so tests can substitute
a stub without touching the pipeline.
*/

use crate::types::PipelineError;

pub mod remote;

/// Result of the importance rubric: both fields are always present on
/// success (spec §4.4).
#[derive(Debug, Clone)]
pub struct ImportanceJudgement {
    pub existential_importance_bool: bool,
    pub existential_importance_reasoning: String,
}

#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// A short paragraph describing `text`.
    async fn summarize(&self, text: &str) -> Result<String, PipelineError>;

    /// Existential/geopolitical importance judgement over `title_and_summary`.
    async fn judge_importance(&self, title_and_summary: &str) -> Result<ImportanceJudgement, PipelineError>;
}

/// Robust JSON extraction from a chat completion's content: handles
/// markdown code fences and leading preamble the model sometimes emits
/// despite being asked for strict JSON.
pub fn extract_json_from_text(text: &str) -> Option<String> {
    let trimmed = text.trim();
    let fenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|s| s.trim())
        .and_then(|s| s.strip_suffix("```"))
        .map(|s| s.trim());
    if let Some(inner) = fenced {
        return Some(inner.to_string());
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end < start {
        return None;
    }
    Some(trimmed[start..=end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_json_from_fenced_block() {
        let text = "```json\n{\"a\": 1}\n```";
        assert_eq!(extract_json_from_text(text).unwrap(), "{\"a\": 1}");
    }

    #[test]
    fn extracts_json_with_preamble() {
        let text = "Sure, here you go:\n{\"a\": 1}\nHope that helps!";
        assert_eq!(extract_json_from_text(text).unwrap(), "{\"a\": 1}");
    }
}
