//! Outbound send deduplication.
//!
//! Guards against accidental double-submit: an identical payload arriving
//! twice inside a short window is dropped with a warning. The window is
//! measured from the last admitted send, so a retry after the window
//! passes normally.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Drops identical payloads that arrive within the dedup window.
pub struct SendDeduper {
    window: Duration,
    last: Mutex<Option<(String, Instant)>>,
}

impl Default for SendDeduper {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl SendDeduper {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: Mutex::new(None),
        }
    }

    /// Whether this payload should be processed. `false` means it is an
    /// identical repeat inside the window and must be dropped.
    pub fn admit(&self, payload: &str) -> bool {
        let now = Instant::now();
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());

        if let Some((previous, at)) = last.as_ref()
            && previous == payload
            && now.duration_since(*at) < self.window
        {
            tracing::warn!(
                elapsed_ms = now.duration_since(*at).as_millis() as u64,
                "duplicate send dropped inside dedup window"
            );
            return false;
        }

        *last = Some((payload.to_string(), now));
        true
    }
}
