//! Session registries.
//!
//! The gateway tracks browsing sessions (pending approval or running)
//! and the single active editing task per document. Entries stay
//! addressable for a short grace period after their terminal event, so
//! a cancel that races completion still finds its target token instead
//! of surfacing a spurious miss.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use kindred_agentic::BrowsingSession;

/// How long a finished session stays addressable.
pub const REGISTRY_GRACE: Duration = Duration::from_secs(5);

enum BrowseEntry {
    /// Approval not given yet; the whole session is parked here.
    Pending(Box<BrowsingSession>),

    /// Running, or recently finished; cancel goes through the token.
    Active(CancellationToken),
}

struct EditEntry {
    task_id: String,
    token: CancellationToken,
}

/// What a browse cancel found.
pub enum BrowseCancel {
    /// The session never started; the caller finishes it.
    Pending(Box<BrowsingSession>),

    /// A running session was signalled; it stops at its next safe point.
    Signalled,

    Unknown,
}

/// Shared registries for every in-flight agentic session.
#[derive(Clone, Default)]
pub struct Sessions {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    browse: Mutex<HashMap<String, BrowseEntry>>,
    edits: Mutex<HashMap<String, EditEntry>>,
}

impl Sessions {
    /// Park a session awaiting approval.
    pub async fn park_pending(&self, session: BrowsingSession) {
        let session_id = session.session_id().to_string();
        self.inner
            .browse
            .lock()
            .await
            .insert(session_id, BrowseEntry::Pending(Box::new(session)));
    }

    /// Claim a pending session for approval. `None` when the id is
    /// unknown or the session already runs.
    pub async fn take_pending(&self, session_id: &str) -> Option<Box<BrowsingSession>> {
        let mut browse = self.inner.browse.lock().await;
        match browse.remove(session_id) {
            Some(BrowseEntry::Pending(session)) => Some(session),
            Some(active @ BrowseEntry::Active(_)) => {
                browse.insert(session_id.to_string(), active);
                None
            }
            None => None,
        }
    }

    /// Record a running session so a later cancel can reach it.
    pub async fn mark_active(&self, session_id: &str, token: CancellationToken) {
        self.inner
            .browse
            .lock()
            .await
            .insert(session_id.to_string(), BrowseEntry::Active(token));
    }

    /// Cancel a browsing session, pending or running.
    pub async fn cancel_browse(&self, session_id: &str) -> BrowseCancel {
        let mut browse = self.inner.browse.lock().await;
        match browse.remove(session_id) {
            Some(BrowseEntry::Pending(session)) => BrowseCancel::Pending(session),
            Some(BrowseEntry::Active(token)) => {
                token.cancel();
                browse.insert(session_id.to_string(), BrowseEntry::Active(token));
                BrowseCancel::Signalled
            }
            None => BrowseCancel::Unknown,
        }
    }

    /// Remove a browsing session once its grace period passes.
    pub async fn release_browse(&self, session_id: &str) {
        tokio::time::sleep(REGISTRY_GRACE).await;
        self.inner.browse.lock().await.remove(session_id);
        debug!(session_id, "browsing session released");
    }

    /// Claim the single editing slot for a document. `false` when another
    /// task already holds it.
    pub async fn claim_edit(&self, document_id: &str, task_id: &str, token: CancellationToken) -> bool {
        let mut edits = self.inner.edits.lock().await;
        if edits.contains_key(document_id) {
            return false;
        }
        edits.insert(
            document_id.to_string(),
            EditEntry {
                task_id: task_id.to_string(),
                token,
            },
        );
        true
    }

    /// Cancel the active editing task for a document. Returns its task id,
    /// or `None` when nothing holds the slot.
    pub async fn cancel_edit(&self, document_id: &str) -> Option<String> {
        let edits = self.inner.edits.lock().await;
        edits.get(document_id).map(|entry| {
            entry.token.cancel();
            entry.task_id.clone()
        })
    }

    /// Free a document's editing slot once its grace period passes.
    pub async fn release_edit(&self, document_id: &str) {
        tokio::time::sleep(REGISTRY_GRACE).await;
        self.inner.edits.lock().await.remove(document_id);
        debug!(document_id, "editing slot released");
    }
}
