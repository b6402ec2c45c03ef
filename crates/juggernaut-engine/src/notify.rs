use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, instrument};

use juggernaut_core::ids::SessionId;
use juggernaut_core::stop::StopReason;

use crate::error::EngineError;

/// Payload posted when a session stops abnormally.
#[derive(Clone, Debug, Serialize)]
pub struct StopNotification {
    pub text: String,
    pub session_id: SessionId,
    pub stop_reason: StopReason,
}

impl StopNotification {
    pub fn new(session_id: SessionId, stop_reason: StopReason) -> Self {
        let text = match &stop_reason {
            StopReason::GuardrailTriggered { detail, .. } => format!(
                "Juggernaut session {session_id} stopped ({}): {detail}",
                stop_reason.label()
            ),
            other => format!("Juggernaut session {session_id} stopped ({})", other.label()),
        };
        Self {
            text,
            session_id,
            stop_reason,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &StopNotification) -> Result<(), EngineError>;
}

pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("juggernaut/0.1")
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    #[instrument(skip(self, notification), fields(session_id = %notification.session_id))]
    async fn notify(&self, notification: &StopNotification) -> Result<(), EngineError> {
        let resp = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .map_err(|e| EngineError::Notify(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(EngineError::Notify(format!("webhook returned {status}")));
        }
        debug!("stop notification delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use juggernaut_core::stop::GuardrailReason;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn notification() -> StopNotification {
        StopNotification::new(
            SessionId::from_raw("sess_1"),
            StopReason::GuardrailTriggered {
                reason: GuardrailReason::RepeatedFailure,
                detail: "sql_query failed 3 times with the same arguments".into(),
            },
        )
    }

    #[test]
    fn text_names_session_and_reason() {
        let n = notification();
        assert!(n.text.contains("sess_1"));
        assert!(n.text.contains("repeated_failure"));
        assert!(n.text.contains("sql_query failed 3 times"));
    }

    #[tokio::test]
    async fn posts_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_partial_json(serde_json::json!({
                "session_id": "sess_1",
                "stop_reason": {"code": "GUARDRAIL_TRIGGERED"}
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(format!("{}/hook", server.uri()));
        notifier.notify(&notification()).await.unwrap();
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(server.uri());
        let err = notifier.notify(&notification()).await.unwrap_err();
        assert!(matches!(err, EngineError::Notify(msg) if msg.contains("500")));
    }
}
