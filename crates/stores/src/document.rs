//! In-memory document store with append-only version history.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use kindred_core::document::{Document, DocumentStore, DocumentVersion, VersionAuthor};
use kindred_core::error::StoreError;

struct DocumentState {
    document: Document,
    versions: Vec<DocumentVersion>,
}

/// A document store that keeps current state plus full version history
/// in process memory.
pub struct InMemoryDocuments {
    documents: RwLock<HashMap<String, DocumentState>>,
}

impl InMemoryDocuments {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryDocuments {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocuments {
    async fn create(
        &self,
        document_id: &str,
        title: &str,
        content_type: &str,
        language: Option<&str>,
        content: &str,
    ) -> std::result::Result<Document, StoreError> {
        let mut documents = self.documents.write().await;

        if documents.contains_key(document_id) {
            return Err(StoreError::Storage(format!(
                "document already exists: {document_id}"
            )));
        }

        let document = Document {
            id: document_id.to_string(),
            title: title.to_string(),
            content_type: content_type.to_string(),
            language: language.map(String::from),
            content: content.to_string(),
            version: 1,
        };

        let initial = DocumentVersion {
            id: Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            version: 1,
            content: content.to_string(),
            created_by: VersionAuthor::User,
            description: None,
            created_at: Utc::now(),
        };

        documents.insert(
            document_id.to_string(),
            DocumentState {
                document: document.clone(),
                versions: vec![initial],
            },
        );

        Ok(document)
    }

    async fn get(&self, document_id: &str) -> std::result::Result<Document, StoreError> {
        let documents = self.documents.read().await;
        documents
            .get(document_id)
            .map(|state| state.document.clone())
            .ok_or_else(|| StoreError::NotFound {
                kind: "document",
                id: document_id.to_string(),
            })
    }

    async fn append_version(
        &self,
        document_id: &str,
        content: &str,
        created_by: VersionAuthor,
        description: Option<String>,
        based_on: Option<u64>,
    ) -> std::result::Result<DocumentVersion, StoreError> {
        let mut documents = self.documents.write().await;
        let state = documents
            .get_mut(document_id)
            .ok_or_else(|| StoreError::NotFound {
                kind: "document",
                id: document_id.to_string(),
            })?;

        if let Some(expected) = based_on
            && expected != state.document.version
        {
            return Err(StoreError::VersionConflict {
                document_id: document_id.to_string(),
                expected,
                stored: state.document.version,
            });
        }

        let version = DocumentVersion {
            id: Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            version: state.document.version + 1,
            content: content.to_string(),
            created_by,
            description,
            created_at: Utc::now(),
        };

        state.document.content = content.to_string();
        state.document.version = version.version;
        state.versions.push(version.clone());

        Ok(version)
    }

    async fn versions(
        &self,
        document_id: &str,
    ) -> std::result::Result<Vec<DocumentVersion>, StoreError> {
        let documents = self.documents.read().await;
        documents
            .get(document_id)
            .map(|state| state.versions.clone())
            .ok_or_else(|| StoreError::NotFound {
                kind: "document",
                id: document_id.to_string(),
            })
    }

    async fn version(
        &self,
        document_id: &str,
        version: u64,
    ) -> std::result::Result<DocumentVersion, StoreError> {
        let documents = self.documents.read().await;
        let state = documents
            .get(document_id)
            .ok_or_else(|| StoreError::NotFound {
                kind: "document",
                id: document_id.to_string(),
            })?;

        state
            .versions
            .iter()
            .find(|v| v.version == version)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: "version",
                id: format!("{document_id}@v{version}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_doc() -> InMemoryDocuments {
        let store = InMemoryDocuments::new();
        store
            .create("doc_1", "Draft", "text/markdown", None, "First line.")
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn create_starts_at_version_one() {
        let store = store_with_doc().await;

        let doc = store.get("doc_1").await.unwrap();
        assert_eq!(doc.version, 1);
        assert_eq!(doc.content, "First line.");

        let versions = store.versions("doc_1").await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].version, 1);
    }

    #[tokio::test]
    async fn create_duplicate_id_is_refused() {
        let store = store_with_doc().await;
        let err = store
            .create("doc_1", "Again", "text/plain", None, "")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Storage(_)));
    }

    #[tokio::test]
    async fn append_version_increments_and_updates_current() {
        let store = store_with_doc().await;

        let v2 = store
            .append_version(
                "doc_1",
                "Second draft.",
                VersionAuthor::Agent,
                Some("rewrote".into()),
                Some(1),
            )
            .await
            .unwrap();
        assert_eq!(v2.version, 2);

        let doc = store.get("doc_1").await.unwrap();
        assert_eq!(doc.version, 2);
        assert_eq!(doc.content, "Second draft.");
    }

    #[tokio::test]
    async fn stale_based_on_is_refused_and_writes_nothing() {
        let store = store_with_doc().await;
        store
            .append_version("doc_1", "v2", VersionAuthor::User, None, Some(1))
            .await
            .unwrap();

        let err = store
            .append_version("doc_1", "stale", VersionAuthor::User, None, Some(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::VersionConflict {
                expected: 1,
                stored: 2,
                ..
            }
        ));

        let doc = store.get("doc_1").await.unwrap();
        assert_eq!(doc.version, 2);
        assert_eq!(doc.content, "v2");
        assert_eq!(store.versions("doc_1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn missing_based_on_skips_the_check() {
        let store = store_with_doc().await;
        store
            .append_version("doc_1", "v2", VersionAuthor::User, None, Some(1))
            .await
            .unwrap();

        // Revert-style write: no based_on, lands as v3 regardless.
        let v3 = store
            .append_version(
                "doc_1",
                "First line.",
                VersionAuthor::User,
                Some("revert to v1".into()),
                None,
            )
            .await
            .unwrap();
        assert_eq!(v3.version, 3);
    }

    #[tokio::test]
    async fn versions_are_ordered_oldest_first() {
        let store = store_with_doc().await;
        for i in 2..=4 {
            store
                .append_version("doc_1", &format!("v{i}"), VersionAuthor::Agent, None, None)
                .await
                .unwrap();
        }

        let versions = store.versions("doc_1").await.unwrap();
        let numbers: Vec<u64> = versions.iter().map(|v| v.version).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn specific_version_lookup() {
        let store = store_with_doc().await;
        store
            .append_version("doc_1", "v2", VersionAuthor::Agent, None, None)
            .await
            .unwrap();

        let v1 = store.version("doc_1", 1).await.unwrap();
        assert_eq!(v1.content, "First line.");

        let err = store.version("doc_1", 9).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: "version", .. }));
    }

    #[tokio::test]
    async fn unknown_document_is_not_found() {
        let store = InMemoryDocuments::new();
        let err = store.get("missing").await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::NotFound {
                kind: "document",
                ..
            }
        ));
    }
}
