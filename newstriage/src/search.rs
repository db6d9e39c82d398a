/*!
Side Search (C11): an independent lookup against the Brave Search API,
grounded on `original_source/client/articles/src/search/search.go`.
*/

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
}

#[derive(Debug, Deserialize)]
struct BraveResponse {
    web: Option<BraveWeb>,
}

#[derive(Debug, Deserialize)]
struct BraveWeb {
    #[serde(default)]
    results: Vec<BraveResult>,
}

#[derive(Debug, Deserialize)]
struct BraveResult {
    title: String,
    url: String,
}

/// GET the Brave Search endpoint with the bearer-token header and gzip
/// encoding, returning a flat, selectable result list (spec §4.11, §6).
pub async fn search(brave_key: &str, query: &str) -> anyhow::Result<Vec<SearchResult>> {
    let client = reqwest::Client::builder().gzip(true).build()?;
    let resp = client
        .get("https://api.search.brave.com/res/v1/web/search")
        .header("X-Subscription-Token", brave_key)
        .header("Accept", "application/json")
        .query(&[("q", query)])
        .send()
        .await?;

    if !resp.status().is_success() {
        anyhow::bail!("brave search returned status {}", resp.status());
    }

    let parsed: BraveResponse = resp.json().await?;
    let results = parsed
        .web
        .map(|w| w.results)
        .unwrap_or_default()
        .into_iter()
        .map(|r| SearchResult { title: r.title, url: r.url })
        .collect();
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_web_results_title_and_url() {
        let body = serde_json::json!({
            "web": { "results": [
                {"title": "A", "url": "https://a.example", "description": "d"},
                {"title": "B", "url": "https://b.example", "description": "d"}
            ]}
        });

        // search() targets the real Brave endpoint by design; this test
        // exercises the response-parsing logic directly against a sample body.
        let parsed: BraveResponse = serde_json::from_str(&body.to_string()).unwrap();
        let results: Vec<SearchResult> = parsed
            .web
            .map(|w| w.results)
            .unwrap_or_default()
            .into_iter()
            .map(|r| SearchResult { title: r.title, url: r.url })
            .collect();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0], SearchResult { title: "A".into(), url: "https://a.example".into() });
    }

    #[test]
    fn missing_web_field_yields_empty_results() {
        let parsed: BraveResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.web.is_none());
    }
}
