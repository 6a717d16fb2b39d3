//! Document domain types and the document store boundary.
//!
//! Documents are the artifacts the editing agent works on. Every save
//! appends an immutable version with a strictly increasing version number;
//! reverting produces a new version rather than rewriting history.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Who produced a document version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionAuthor {
    User,
    Agent,
    /// A merge of user and agent edits
    Collaborative,
}

/// A document's current state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,

    pub title: String,

    /// MIME-ish type ("text/markdown", "text/plain", "text/code")
    pub content_type: String,

    /// Language hint for code documents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// The latest content
    pub content: String,

    /// The latest version number
    pub version: u64,
}

/// One immutable version in a document's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentVersion {
    pub id: String,

    pub document_id: String,

    /// Strictly increasing per document; the store enforces this
    pub version: u64,

    pub content: String,

    pub created_by: VersionAuthor,

    /// Short human description ("tightened the intro")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub created_at: DateTime<Utc>,
}

/// The document store boundary.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create a document at version 1. The caller supplies the ID so
    /// client-minted IDs survive the round trip.
    async fn create(
        &self,
        document_id: &str,
        title: &str,
        content_type: &str,
        language: Option<&str>,
        content: &str,
    ) -> std::result::Result<Document, StoreError>;

    /// The document's current state.
    async fn get(&self, document_id: &str) -> std::result::Result<Document, StoreError>;

    /// Append a new version.
    ///
    /// When `based_on` is set and does not match the stored latest version,
    /// the store refuses with [`StoreError::VersionConflict`] and writes
    /// nothing. `based_on: None` skips the check (used by revert and by the
    /// merge path, which has already reconciled).
    async fn append_version(
        &self,
        document_id: &str,
        content: &str,
        created_by: VersionAuthor,
        description: Option<String>,
        based_on: Option<u64>,
    ) -> std::result::Result<DocumentVersion, StoreError>;

    /// All versions, oldest first.
    async fn versions(
        &self,
        document_id: &str,
    ) -> std::result::Result<Vec<DocumentVersion>, StoreError>;

    /// One specific version.
    async fn version(
        &self,
        document_id: &str,
        version: u64,
    ) -> std::result::Result<DocumentVersion, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_author_serializes_snake_case() {
        let json = serde_json::to_string(&VersionAuthor::Collaborative).unwrap();
        assert_eq!(json, r#""collaborative""#);
    }

    #[test]
    fn document_version_serialization() {
        let version = DocumentVersion {
            id: "ver_1".into(),
            document_id: "doc_1".into(),
            version: 3,
            content: "Draft three.".into(),
            created_by: VersionAuthor::Agent,
            description: Some("tightened the intro".into()),
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&version).unwrap();
        assert!(json.contains(r#""version":3"#));
        assert!(json.contains("tightened"));
    }
}
