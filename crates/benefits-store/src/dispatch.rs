use std::sync::Arc;

use async_trait::async_trait;
use benefits_core::{Notification, NotificationDispatcher};
use tokio::sync::RwLock;

/// Keeps every notification it is asked to deliver.
#[derive(Clone, Default)]
pub struct RecordingDispatcher {
    sent: Arc<RwLock<Vec<Notification>>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.read().await.clone()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn dispatch(&self, notification: &Notification) -> anyhow::Result<()> {
        self.sent.write().await.push(notification.clone());
        Ok(())
    }
}

/// Rejects every delivery, standing in for an unreachable mail relay or bus.
#[derive(Clone, Copy, Default)]
pub struct FailingDispatcher;

#[async_trait]
impl NotificationDispatcher for FailingDispatcher {
    async fn dispatch(&self, _notification: &Notification) -> anyhow::Result<()> {
        anyhow::bail!("notification transport unavailable")
    }
}
