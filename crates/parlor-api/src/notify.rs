//! Push notifications for new messages. Delivery is best-effort: callers
//! log a failed send and carry on.

use futures_util::future::BoxFuture;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    Chat,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    /// The channel the notification points at
    pub relation_id: Uuid,
    pub recipients: Vec<Uuid>,
}

pub trait Notifier: Send + Sync {
    fn send(&self, notification: Notification) -> BoxFuture<'_, anyhow::Result<()>>;
}

/// Posts notifications as JSON to an external notification service.
pub struct HttpNotifier {
    client: reqwest::Client,
    url: String,
}

impl HttpNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

impl Notifier for HttpNotifier {
    fn send(&self, notification: Notification) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            self.client
                .post(&self.url)
                .json(&notification)
                .send()
                .await?
                .error_for_status()?;
            Ok(())
        })
    }
}

/// Used when no notification service is configured.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, notification: Notification) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            info!(
                "Notify {} recipients about channel {}: {}",
                notification.recipients.len(),
                notification.relation_id,
                notification.title
            );
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_type_tag() {
        let n = Notification {
            title: "general".into(),
            message: "hi".into(),
            kind: NotificationKind::Chat,
            relation_id: Uuid::nil(),
            recipients: vec![],
        };
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["type"], "CHAT");
        assert_eq!(json["relation_id"], Uuid::nil().to_string());
    }

    #[tokio::test]
    async fn log_notifier_never_fails() {
        let n = Notification {
            title: "t".into(),
            message: "m".into(),
            kind: NotificationKind::Chat,
            relation_id: Uuid::new_v4(),
            recipients: vec![Uuid::new_v4()],
        };
        assert!(LogNotifier.send(n).await.is_ok());
    }
}
