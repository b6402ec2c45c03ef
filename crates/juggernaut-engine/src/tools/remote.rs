//! Client for the remote tool executor.
//!
//! Wire contract: POST `{tool_name, arguments}`, response `{success: true, result}`
//! or `{error}`. Transport problems are [`ToolError`]s; an `{error}` body is an
//! ordinary failed outcome.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use juggernaut_core::requests::ToolRequest;
use juggernaut_core::tools::{ToolContext, ToolError, ToolOutcome};

/// Anything that can run a typed tool request.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, request: &ToolRequest) -> Result<ToolOutcome, ToolError>;
}

pub struct RemoteToolExecutor {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl RemoteToolExecutor {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("juggernaut/0.1")
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: url.into(),
            timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ToolExecutor for RemoteToolExecutor {
    #[instrument(skip(self, request), fields(tool_name = request.name()))]
    async fn execute(&self, request: &ToolRequest) -> Result<ToolOutcome, ToolError> {
        let body = json!({
            "tool_name": request.name(),
            "arguments": request.to_arguments(),
        });
        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ToolError::Timeout(self.timeout)
                } else {
                    ToolError::Unavailable(e.to_string())
                }
            })?;

        let status = resp.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(ToolError::Unavailable(format!("executor returned {status}")));
        }
        let text = resp.text().await.map_err(|e| {
            if e.is_timeout() {
                ToolError::Timeout(self.timeout)
            } else {
                ToolError::Unavailable(e.to_string())
            }
        })?;
        debug!(%status, bytes = text.len(), "executor responded");

        match serde_json::from_str::<Value>(&text) {
            Ok(value) => Ok(ToolOutcome::from_wire(&value)),
            Err(_) if !status.is_success() => {
                Ok(ToolOutcome::failure(format!("executor returned {status}: {text}")))
            }
            Err(e) => Ok(ToolOutcome::failure(format!("malformed executor response: {e}"))),
        }
    }
}

/// Run a request against the executor unless the session is cancelled first.
pub(crate) async fn forward(
    executor: &dyn ToolExecutor,
    request: ToolRequest,
    ctx: &ToolContext,
) -> Result<ToolOutcome, ToolError> {
    tokio::select! {
        biased;
        _ = ctx.abort_signal.cancelled() => Err(ToolError::Cancelled),
        result = executor.execute(&request) => result,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;

    use parking_lot::Mutex;

    use super::*;

    /// Scripted executor: pops one response per call and records requests.
    #[derive(Default)]
    pub struct ScriptedExecutor {
        responses: Mutex<VecDeque<Result<ToolOutcome, ToolError>>>,
        pub requests: Mutex<Vec<ToolRequest>>,
    }

    impl ScriptedExecutor {
        pub fn new(responses: Vec<Result<ToolOutcome, ToolError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ToolExecutor for ScriptedExecutor {
        async fn execute(&self, request: &ToolRequest) -> Result<ToolOutcome, ToolError> {
            self.requests.lock().push(request.clone());
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(ToolOutcome::success("ok")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use juggernaut_core::requests::{SlackPostArgs, SqlQueryArgs};
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sql(query: &str) -> ToolRequest {
        ToolRequest::SqlQuery(SqlQueryArgs {
            query: query.into(),
            max_rows: None,
        })
    }

    async fn executor_for(server: &MockServer) -> RemoteToolExecutor {
        RemoteToolExecutor::new(format!("{}/execute", server.uri()), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn posts_name_and_arguments() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/execute"))
            .and(body_json(json!({
                "tool_name": "slack_post",
                "arguments": {"channel": "#ops", "text": "deployed"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true, "result": {"ts": "1.2"}})))
            .expect(1)
            .mount(&server)
            .await;

        let request = ToolRequest::SlackPost(SlackPostArgs {
            channel: "#ops".into(),
            text: "deployed".into(),
        });
        let outcome = executor_for(&server).await.execute(&request).await.unwrap();
        assert_eq!(outcome, ToolOutcome::success(json!({"ts": "1.2"})));
    }

    #[tokio::test]
    async fn error_body_is_a_failed_outcome() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "relation \"orderz\" does not exist"})))
            .mount(&server)
            .await;

        let outcome = executor_for(&server).await.execute(&sql("select * from orderz")).await.unwrap();
        assert!(!outcome.is_success());
        assert!(outcome.error().unwrap().contains("orderz"));
    }

    #[tokio::test]
    async fn client_error_with_error_body_is_a_failed_outcome() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "bad query"})))
            .mount(&server)
            .await;

        let outcome = executor_for(&server).await.execute(&sql("select")).await.unwrap();
        assert_eq!(outcome, ToolOutcome::failure("bad query"));
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = executor_for(&server).await.execute(&sql("select 1")).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn slow_executor_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"success": true, "result": 1}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let executor = RemoteToolExecutor::new(server.uri(), Duration::from_millis(100));
        let err = executor.execute(&sql("select 1")).await.unwrap_err();
        assert!(matches!(err, ToolError::Timeout(_)));
    }

    #[tokio::test]
    async fn unreachable_executor_is_unavailable() {
        let executor = RemoteToolExecutor::new("http://127.0.0.1:9/execute", Duration::from_secs(2));
        let err = executor.execute(&sql("select 1")).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn non_json_body_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let outcome = executor_for(&server).await.execute(&sql("select 1")).await.unwrap();
        assert!(outcome.error().unwrap().contains("malformed"));
    }
}
