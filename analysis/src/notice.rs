//! Deduplicated user-visible notices.

use std::collections::HashSet;
use std::sync::Mutex;

use tokio::sync::mpsc;

/// A message the host should show to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub key: String,
    pub message: String,
}

/// Forwards each distinct notice to the host once.
#[derive(Debug)]
pub struct Notices {
    seen: Mutex<HashSet<String>>,
    tx: mpsc::UnboundedSender<Notice>,
}

impl Notices {
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                seen: Mutex::new(HashSet::new()),
                tx,
            },
            rx,
        )
    }

    /// Report `message` under `key`. Returns whether it was new.
    pub fn report(&self, key: impl Into<String>, message: impl Into<String>) -> bool {
        let key = key.into();
        let message = message.into();
        let fresh = match self.seen.lock() {
            Ok(mut seen) => seen.insert(key.clone()),
            Err(poisoned) => poisoned.into_inner().insert(key.clone()),
        };
        if !fresh {
            tracing::debug!(%key, "Suppressed repeated notice: {message}");
            return false;
        }
        tracing::error!("{message}");
        // The host may have stopped listening; the log line above still records it.
        let _ = self.tx.send(Notice { key, message });
        true
    }
}
