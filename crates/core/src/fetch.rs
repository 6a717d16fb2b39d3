//! Page fetcher — the browsing agent's only window onto the network.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::FetchError;

/// A fetched web page, reduced to text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchedPage {
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Markup-stripped body text, capped by the fetcher
    pub text: String,
}

/// The page fetcher boundary.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> std::result::Result<FetchedPage, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetched_page_serialization() {
        let page = FetchedPage {
            url: "https://example.com/article".into(),
            title: Some("An Article".into()),
            text: "Body text.".into(),
        };
        let json = serde_json::to_string(&page).unwrap();
        assert!(json.contains("An Article"));
    }
}
