//! The version save path.
//!
//! Every content write — user save, agent edit, merge finalization — goes
//! through [`VersionGate::save`], which performs the last-write-wins check:
//! a save based on a version that is no longer current never overwrites,
//! it comes back as a conflict carrying the three-way merge against the
//! stored side.

use std::sync::Arc;

use kindred_core::document::{DocumentStore, DocumentVersion, VersionAuthor};
use kindred_core::error::StoreError;

use crate::merge::{MergeResult, merge_three};

/// What a gated save produced.
#[derive(Debug)]
pub enum SaveOutcome {
    Saved(DocumentVersion),

    /// The store moved on while the client edited. `merge` is stored
    /// ("left") against incoming ("right") over the client's base.
    Conflict {
        base_version: u64,
        stored_version: u64,
        stored_content: String,
        merge: MergeResult,
    },
}

/// Gatekeeper for document writes.
pub struct VersionGate {
    store: Arc<dyn DocumentStore>,
}

impl VersionGate {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Save `content` as a new version.
    ///
    /// `base_version` is the version the writer started from; `None`
    /// skips the conflict check (fresh creates, merge finalizations that
    /// already reconciled).
    pub async fn save(
        &self,
        document_id: &str,
        content: &str,
        base_version: Option<u64>,
        created_by: VersionAuthor,
        description: Option<String>,
    ) -> Result<SaveOutcome, StoreError> {
        let current = self.store.get(document_id).await?;

        if let Some(base) = base_version.filter(|&base| base != current.version) {
            tracing::info!(
                document_id,
                base,
                stored = current.version,
                "concurrent save detected, surfacing conflict"
            );
            let base_content = self.store.version(document_id, base).await?.content;
            let merge = merge_three(&base_content, &current.content, content);
            return Ok(SaveOutcome::Conflict {
                base_version: base,
                stored_version: current.version,
                stored_content: current.content,
                merge,
            });
        }

        let version = self
            .store
            .append_version(document_id, content, created_by, description, base_version)
            .await?;
        Ok(SaveOutcome::Saved(version))
    }

    /// Revert to a historical version by appending a new version with its
    /// content. History stays intact; version numbers keep climbing.
    pub async fn revert(
        &self,
        document_id: &str,
        to_version: u64,
    ) -> Result<DocumentVersion, StoreError> {
        let target = self.store.version(document_id, to_version).await?;
        self.store
            .append_version(
                document_id,
                &target.content,
                VersionAuthor::User,
                Some(format!("revert to v{to_version}")),
                None,
            )
            .await
    }
}
