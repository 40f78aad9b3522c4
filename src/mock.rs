//! In-memory `Notifier` for tests of code that sends notifications.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::notifier::Notifier;
use crate::token::{Error, Result};

/// One recorded `notify` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentNotification {
    pub recipients: Vec<String>,
    pub message: String,
}

/// Records every call; answers with success or a fixed provider error.
#[derive(Debug, Default)]
pub struct MockNotifier {
    sent: Mutex<Vec<SentNotification>>,
    failure: Option<(i64, String)>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call fails with `Error::Provider { code, message }`.
    pub fn failing(code: i64, message: impl Into<String>) -> Self {
        Self {
            sent: Mutex::default(),
            failure: Some((code, message.into())),
        }
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn notify(&self, recipients: &[String], message: &str) -> Result<()> {
        let call = SentNotification {
            recipients: recipients.to_vec(),
            message: message.to_string(),
        };
        match self.sent.lock() {
            Ok(mut sent) => sent.push(call),
            Err(poisoned) => poisoned.into_inner().push(call),
        }

        match &self.failure {
            Some((code, message)) => Err(Error::Provider {
                code: *code,
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn alert(notifier: &dyn Notifier, on_call: &[String]) -> Result<()> {
        notifier.notify(on_call, "disk almost full").await
    }

    #[tokio::test]
    async fn records_calls_through_trait_object() {
        let mock = MockNotifier::new();
        let users = vec!["alice".to_string(), "bob".to_string()];

        alert(&mock, &users).await.expect("notify");

        assert_eq!(
            mock.sent(),
            vec![SentNotification {
                recipients: users,
                message: "disk almost full".into(),
            }]
        );
    }

    #[tokio::test]
    async fn failing_mock_returns_provider_error() {
        let mock = MockNotifier::failing(81013, "user & party & tag all invalid");
        let err = mock
            .notify(&["ghost".to_string()], "hi")
            .await
            .unwrap_err();

        assert_eq!(err.provider_code(), Some(81013));
        assert_eq!(mock.sent().len(), 1);
    }
}
