use anyhow::Result;
use async_trait::async_trait;
use benefits_core::{NOTIFICATION_CHANNEL, Notification, NotificationDispatcher};
use redis::{AsyncCommands, Client};
use serde::Serialize;
use tracing::debug;

#[derive(Clone)]
pub struct RedisBus {
    client: Client,
}

impl RedisBus {
    pub fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        Ok(Self { client })
    }

    pub async fn publish_json<T: Serialize>(&self, channel: &str, payload: &T) -> Result<()> {
        let mut connection = self.client.get_multiplexed_async_connection().await?;
        let serialized = serde_json::to_string(payload)?;
        let receivers: i64 = connection.publish(channel, serialized).await?;
        debug!("published to {} ({} subscribers)", channel, receivers);
        Ok(())
    }
}

/// Notifications fan out over pub/sub; delivery to inboxes or email is downstream.
#[async_trait]
impl NotificationDispatcher for RedisBus {
    async fn dispatch(&self, notification: &Notification) -> Result<()> {
        self.publish_json(NOTIFICATION_CHANNEL, notification).await
    }
}
