/*!
Content Extractor (C3). Fetch a URL down to plain text, falling through a
chain of fallbacks: mirror substitution, a readability microservice, the
`lynx` text-mode browser, and finally a direct GET with the HTML tags
stripped and whitespace collapsed. Grounded on
`original_source/server/lib/readability/readability.go`'s `GetArticleContent`:
on readability-service failure it falls back to `web.Get` + `web.CompressHtml`,
never a second smart extractor — there is no content-quality judgement in
the last resort, only a network call that either succeeds or doesn't.
*/

use crate::types::PipelineError;
use regex::Regex;
use reqwest::Client;
use std::process::Command;
use std::time::Duration;
use tracing::{info, warn};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const MIN_READABILITY_BYTES: usize = 200;
const MIN_LYNX_BYTES: usize = 50;

fn browser_client() -> Client {
    Client::builder()
        .timeout(HTTP_TIMEOUT)
        .default_headers({
            let mut headers = reqwest::header::HeaderMap::new();
            headers.insert(
                reqwest::header::USER_AGENT,
                "Mozilla/5.0 (X11; Linux x86_64; rv:109.0) Gecko/20100101 Firefox/115.0"
                    .parse()
                    .unwrap(),
            );
            headers.insert(
                reqwest::header::ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"
                    .parse()
                    .unwrap(),
            );
            headers.insert(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.5".parse().unwrap());
            headers.insert(reqwest::header::CONNECTION, "keep-alive".parse().unwrap());
            headers.insert("Upgrade-Insecure-Requests", "1".parse().unwrap());
            headers
        })
        .build()
        .expect("failed to build browser-like reqwest client")
}

/// Rewrite known hosts to a mirror that is more reliable to scrape from.
fn substitute_mirror(link: &str) -> String {
    let Ok(mut url) = url::Url::parse(link) else {
        return link.to_string();
    };
    let rewritten_host = match url.host_str() {
        Some("reuters.com") | Some("www.reuters.com") => Some("neuters.de"),
        Some("x.com") | Some("www.x.com") => Some("nitter.net"),
        _ => None,
    };
    if let Some(host) = rewritten_host {
        let _ = url.set_host(Some(host));
        return url.to_string();
    }
    link.to_string()
}

/// GET `{readability_base}?url={rewritten}`, accept if the body is at
/// least `MIN_READABILITY_BYTES` long.
async fn via_readability_service(readability_base: &str, rewritten: &str) -> anyhow::Result<String> {
    let client = browser_client();
    let resp = client
        .get(readability_base)
        .query(&[("url", rewritten)])
        .send()
        .await?;
    if !resp.status().is_success() {
        anyhow::bail!("readability service returned status {}", resp.status());
    }
    let body = resp.text().await?;
    if body.len() < MIN_READABILITY_BYTES {
        anyhow::bail!("readability service returned only {} bytes", body.len());
    }
    Ok(body)
}

/// Invoke the local `lynx` text-mode browser (`-dump -nolist`) and accept
/// the dump if it is at least `MIN_LYNX_BYTES` long.
fn via_lynx(url: &str) -> anyhow::Result<String> {
    let output = Command::new("lynx").arg("-dump").arg("-nolist").arg(url).output()?;
    if !output.status.success() {
        anyhow::bail!("lynx exited with status {}", output.status);
    }
    let text = String::from_utf8_lossy(&output.stdout).into_owned();
    if text.len() < MIN_LYNX_BYTES {
        anyhow::bail!("lynx produced only {} bytes", text.len());
    }
    Ok(text)
}

/// Strip HTML tags and collapse runs of whitespace to a single space. No
/// judgement about content quality — whatever the page returns, this
/// returns a text rendering of it.
fn strip_tags_and_compress(html: &str) -> String {
    let tag = Regex::new(r"(?s)<[^>]*>").unwrap();
    let stripped = tag.replace_all(html, " ");
    let decoded = stripped
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ");
    let whitespace = Regex::new(r"\s+").unwrap();
    whitespace.replace_all(decoded.trim(), " ").into_owned()
}

/// Last-resort fallback: GET the URL directly and return its tag-stripped,
/// whitespace-compressed HTML. Fails only on a transport error or a
/// non-success status, mirroring the original's `web.Get` +
/// `web.CompressHtml` pairing.
async fn via_raw_html(url: &str) -> anyhow::Result<String> {
    let client = browser_client();
    let resp = client.get(url).send().await?;
    if !resp.status().is_success() {
        anyhow::bail!("raw fetch returned status {}", resp.status());
    }
    let body = resp.text().await?;
    Ok(strip_tags_and_compress(&body))
}

/// Run the full fallback chain for one URL. Errors from intermediate steps
/// are joined so both causes are surfaced if every strategy fails.
pub async fn fetch_article_content(readability_base: &str, link: &str) -> Result<String, PipelineError> {
    let rewritten = substitute_mirror(link);

    let mut errors = Vec::new();

    match via_readability_service(readability_base, &rewritten).await {
        Ok(text) => {
            info!(link, "extracted via readability service");
            return Ok(text);
        }
        Err(e) => errors.push(format!("readability: {e}")),
    }

    match via_lynx(&rewritten) {
        Ok(text) => {
            info!(link, "extracted via lynx fallback");
            return Ok(text);
        }
        Err(e) => errors.push(format!("lynx: {e}")),
    }

    match via_raw_html(&rewritten).await {
        Ok(text) => {
            info!(link, "extracted via raw HTML fallback");
            return Ok(text);
        }
        Err(e) => errors.push(format!("raw-html: {e}")),
    }

    warn!(link, errors = ?errors, "content extraction exhausted all fallbacks");
    Err(PipelineError::TransientUpstream(errors.join("; ")))
}

/// Best-effort `<title>` fetch, used by the client to refresh a stale title
/// before saving to minutes. Never propagates an error — empty string means
/// "no improvement available" (spec §4.3).
pub async fn fetch_title(link: &str) -> String {
    let client = browser_client();
    let Ok(resp) = client.get(link).send().await else {
        return String::new();
    };
    let Ok(body) = resp.text().await else {
        return String::new();
    };
    let document = scraper::Html::parse_document(&body);
    let Ok(selector) = scraper::Selector::parse("title") else {
        return String::new();
    };
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mirror_substitution_rewrites_known_hosts() {
        assert_eq!(substitute_mirror("https://www.reuters.com/world/article"), "https://neuters.de/world/article");
        assert_eq!(substitute_mirror("https://x.com/someone/status/1"), "https://nitter.net/someone/status/1");
        assert_eq!(substitute_mirror("https://example.com/a"), "https://example.com/a");
    }

    #[test]
    fn strip_tags_compresses_whitespace() {
        let html = "<html>\n<body>  <p>Hello   <b>world</b></p>\n\n<p>Second &amp; para</p></body></html>";
        assert_eq!(strip_tags_and_compress(html), "Hello world Second & para");
    }
}
