//! Advisory notices pushed to whoever is watching (the viewer's event
//! stream). Delivery is best-effort: callers log and ignore failures.

use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warning,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub bucket_id: Uuid,
    pub level: NoticeLevel,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("no listeners connected")]
    NoListeners,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice) -> Result<(), NotifyError>;
}

/// Fans notices out to every subscriber of a broadcast channel.
#[derive(Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<Notice>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(64)
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, notice: Notice) -> Result<(), NotifyError> {
        self.tx
            .send(notice)
            .map(|_| ())
            .map_err(|_| NotifyError::NoListeners)
    }
}
