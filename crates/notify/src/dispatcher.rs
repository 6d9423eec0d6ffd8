use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

/// A fully rendered alert, ready for an outbound channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub subject: String,
    pub body_html: String,
    /// Plain-text fallback for clients that do not render HTML.
    pub body_text: String,
    pub recipient: String,
}

/// Channel acknowledgement for a delivered alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReceipt {
    /// Channel-assigned message id, when the channel reports one.
    pub message_id: Option<String>,
}

/// Error type for alert dispatch.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("notification channel not configured: {0}")]
    Config(String),
    #[error("rate limited")]
    RateLimited,
    #[error("request failed: {0}")]
    RequestFailed(String),
}

/// Outbound alert channel (e-mail, pager, chat webhook, ...).
pub trait AlertDispatcher: Send + Sync {
    fn name(&self) -> &str;

    fn send(
        &self,
        alert: Alert,
    ) -> Pin<Box<dyn Future<Output = Result<DispatchReceipt, DispatchError>> + Send + '_>>;
}

/// Mock dispatcher for tests. Records every alert; can be told to fail.
#[derive(Debug, Clone, Default)]
pub struct MockDispatcher {
    sent: Arc<Mutex<Vec<Alert>>>,
    fail_with: Option<String>,
}

impl MockDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A dispatcher whose every send fails with `RequestFailed(reason)`.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            sent: Arc::default(),
            fail_with: Some(reason.into()),
        }
    }

    /// Alerts that were accepted (failed sends are not recorded).
    pub fn sent(&self) -> Vec<Alert> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl AlertDispatcher for MockDispatcher {
    fn name(&self) -> &str {
        "mock"
    }

    fn send(
        &self,
        alert: Alert,
    ) -> Pin<Box<dyn Future<Output = Result<DispatchReceipt, DispatchError>> + Send + '_>> {
        let result = match &self.fail_with {
            Some(reason) => Err(DispatchError::RequestFailed(reason.clone())),
            None => match self.sent.lock() {
                Ok(mut sent) => {
                    sent.push(alert);
                    Ok(DispatchReceipt {
                        message_id: Some(format!("mock-{}", sent.len())),
                    })
                }
                Err(_) => Err(DispatchError::RequestFailed("mock state poisoned".into())),
            },
        };
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert() -> Alert {
        Alert {
            subject: "subject".into(),
            body_html: "<p>body</p>".into(),
            body_text: "body".into(),
            recipient: "safety@example.org".into(),
        }
    }

    #[tokio::test]
    async fn mock_records_alerts() {
        let mock = MockDispatcher::new();
        let receipt = mock.send(alert()).await.unwrap();
        assert_eq!(receipt.message_id.as_deref(), Some("mock-1"));
        assert_eq!(mock.sent_count(), 1);
        assert_eq!(mock.sent()[0].recipient, "safety@example.org");
    }

    #[tokio::test]
    async fn failing_mock_records_nothing() {
        let mock = MockDispatcher::failing("smtp down");
        let err = mock.send(alert()).await.unwrap_err();
        assert!(matches!(err, DispatchError::RequestFailed(ref r) if r == "smtp down"));
        assert_eq!(mock.sent_count(), 0);
    }

    #[tokio::test]
    async fn clones_share_the_outbox() {
        let mock = MockDispatcher::new();
        let handle = mock.clone();
        mock.send(alert()).await.unwrap();
        assert_eq!(handle.sent_count(), 1);
    }
}
