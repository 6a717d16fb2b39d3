//! HTTP page fetcher — the browsing agent's real network backend.
//!
//! Pages are reduced to readable text before they reach a prompt: title
//! from `<title>`, content preferring `<article>` over `<main>` over
//! `<body>`, whitespace normalized, length capped.

use async_trait::async_trait;
use futures::StreamExt;
use kindred_core::error::FetchError;
use kindred_core::fetch::{FetchedPage, PageFetcher};
use tracing::debug;

/// Wire cap on fetched bodies.
const DEFAULT_MAX_BYTES: usize = 512 * 1024;

/// Cap on extracted text, in characters. Page text feeds summarize
/// prompts, so anything past this only burns context budget.
const DEFAULT_MAX_TEXT_CHARS: usize = 8_000;

/// A `PageFetcher` backed by reqwest.
pub struct HttpPageFetcher {
    client: reqwest::Client,
    max_bytes: usize,
    max_text_chars: usize,
}

impl HttpPageFetcher {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_BYTES, DEFAULT_MAX_TEXT_CHARS)
    }

    pub fn with_limits(max_bytes: usize, max_text_chars: usize) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("kindred/0.1")
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            max_bytes,
            max_text_chars,
        }
    }
}

impl Default for HttpPageFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> std::result::Result<FetchedPage, FetchError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(url.to_string())
            } else {
                FetchError::Network {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status().as_u16();
        if status != 200 {
            return Err(FetchError::Http {
                status_code: status,
                url: url.to_string(),
            });
        }

        if let Some(length) = response.content_length()
            && length > self.max_bytes as u64
        {
            return Err(FetchError::TooLarge {
                url: url.to_string(),
                limit: self.max_bytes,
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        // Read incrementally; bodies with no Content-Length are truncated
        // at the cap instead of rejected.
        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(|e| FetchError::Network {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
            let remaining = self.max_bytes - body.len();
            body.extend_from_slice(&bytes[..bytes.len().min(remaining)]);
            if body.len() >= self.max_bytes {
                break;
            }
        }

        let raw = String::from_utf8_lossy(&body);
        let page = reduce_page(url, content_type.as_deref(), &raw, self.max_text_chars);

        debug!(url, bytes = body.len(), chars = page.text.len(), "Fetched page");

        Ok(page)
    }
}

/// Reduce a response body to a `FetchedPage`.
fn reduce_page(url: &str, content_type: Option<&str>, raw: &str, max_chars: usize) -> FetchedPage {
    let is_html = match content_type {
        Some(ct) => ct.contains("text/html"),
        None => raw.trim_start().starts_with('<'),
    };

    if is_html {
        extract_html(url, raw, max_chars)
    } else {
        FetchedPage {
            url: url.to_string(),
            title: None,
            text: truncate_chars(raw, max_chars),
        }
    }
}

fn extract_html(url: &str, html: &str, max_chars: usize) -> FetchedPage {
    use scraper::{Html, Selector};

    let document = Html::parse_document(html);

    let title = Selector::parse("title")
        .ok()
        .and_then(|sel| document.select(&sel).next())
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty());

    // Prefer the semantically narrowest container that has any text.
    let content = element_text(&document, "article")
        .or_else(|| element_text(&document, "main"))
        .or_else(|| element_text(&document, "body"))
        .unwrap_or_default();

    FetchedPage {
        url: url.to_string(),
        title,
        text: truncate_chars(&content, max_chars),
    }
}

fn element_text(document: &scraper::Html, selector: &str) -> Option<String> {
    let sel = scraper::Selector::parse(selector).ok()?;
    let element = document.select(&sel).next()?;
    let text = element.text().collect::<Vec<_>>().join(" ");
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_chars).collect();
        format!("{truncated}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_within_limit() {
        assert_eq!(truncate_chars("hello", 10), "hello");
    }

    #[test]
    fn truncate_exceeds_limit() {
        assert_eq!(truncate_chars("hello world", 5), "hello...");
    }

    #[test]
    fn truncate_counts_chars_not_bytes() {
        assert_eq!(truncate_chars("héllo wörld", 5), "héllo...");
    }

    #[test]
    fn extract_title_and_body() {
        let html =
            r#"<html><head><title>Test Page</title></head><body><p>Hello world</p></body></html>"#;
        let page = extract_html("https://example.com", html, 2000);
        assert_eq!(page.title.as_deref(), Some("Test Page"));
        assert!(page.text.contains("Hello world"));
    }

    #[test]
    fn extract_prefers_article_over_body() {
        let html = r#"<html><body><nav>Nav stuff</nav><article><p>Article content</p></article></body></html>"#;
        let page = extract_html("https://example.com", html, 2000);
        assert_eq!(page.text, "Article content");
    }

    #[test]
    fn extract_falls_back_to_body() {
        let html = r#"<html><body><p>Body content here</p></body></html>"#;
        let page = extract_html("https://example.com", html, 2000);
        assert!(page.text.contains("Body content here"));
    }

    #[test]
    fn extract_drops_empty_title() {
        let html = r#"<html><head><title>  </title></head><body>text</body></html>"#;
        let page = extract_html("https://example.com", html, 2000);
        assert!(page.title.is_none());
    }

    #[test]
    fn extract_normalizes_whitespace() {
        let html = "<html><body><p>spaced    \n   out</p></body></html>";
        let page = extract_html("https://example.com", html, 2000);
        assert_eq!(page.text, "spaced out");
    }

    #[test]
    fn extract_caps_text_length() {
        let html = r#"<html><body><p>A long paragraph of text</p></body></html>"#;
        let page = extract_html("https://example.com", html, 10);
        assert!(page.text.ends_with("..."));
        assert!(page.text.chars().count() <= 13);
    }

    #[test]
    fn plain_text_passes_through_untitled() {
        let page = reduce_page(
            "https://example.com/notes.txt",
            Some("text/plain"),
            "line one\nline two",
            2000,
        );
        assert!(page.title.is_none());
        assert_eq!(page.text, "line one\nline two");
    }

    #[test]
    fn missing_content_type_sniffs_html() {
        let page = reduce_page(
            "https://example.com",
            None,
            "<html><head><title>Sniffed</title></head><body>hi</body></html>",
            2000,
        );
        assert_eq!(page.title.as_deref(), Some("Sniffed"));
    }
}
