//! Notification sink
//!
//! Delivery channels live outside this service; notifications are emitted as
//! structured events for the delivery pipeline to pick up from the log stream.

use async_trait::async_trait;
use cardvault_core::error::AppError;
use cardvault_core::models::Notification;
use cardvault_core::traits::Notifier;
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), AppError> {
        info!(
            target: "notifications",
            user_id = %notification.user_id,
            title = %notification.title,
            body = %notification.body,
            "Notification"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_notify_never_fails() {
        let notifier = TracingNotifier;
        let result = notifier
            .notify(&Notification::new(Uuid::new_v4(), "Card funded", "10.00 USD"))
            .await;
        assert!(result.is_ok());
    }
}
