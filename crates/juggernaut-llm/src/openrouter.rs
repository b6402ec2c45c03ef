use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::{Future, Stream};
use reqwest::header::RETRY_AFTER;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, instrument};

use juggernaut_core::context::LlmContext;
use juggernaut_core::errors::LlmError;
use juggernaut_core::messages::{AssistantMessage, FinishReason};
use juggernaut_core::provider::{EventStream, LlmProvider, StreamOptions};
use juggernaut_core::stream::StreamEvent;

use crate::converter;
use crate::models::{self, DEFAULT_CONTEXT_WINDOW};
use crate::sse::{self, ChatStreamParser};

const USER_AGENT: &str = concat!("juggernaut/", env!("CARGO_PKG_VERSION"));

#[derive(Clone, Debug)]
pub struct OpenRouterConfig {
    /// e.g. `https://openrouter.ai/api/v1`; `/chat/completions` is appended.
    pub base_url: String,
    pub api_key: SecretString,
    pub model: String,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
}

impl OpenRouterConfig {
    pub fn new(base_url: impl Into<String>, api_key: SecretString, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
            model: model.into(),
            request_timeout: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(60),
        }
    }
}

/// Chat-completions client for OpenRouter and other OpenAI-compatible gateways.
pub struct OpenRouterProvider {
    client: Client,
    config: OpenRouterConfig,
}

impl OpenRouterProvider {
    pub fn new(config: OpenRouterConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| LlmError::NetworkError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    async fn send(&self, body: &serde_json::Value) -> Result<reqwest::Response, LlmError> {
        let resp = self
            .client
            .post(self.endpoint())
            .bearer_auth(self.config.api_key.expose_secret())
            .header("X-Title", "juggernaut")
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let retry_after = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::from_status(status, body, retry_after));
        }
        Ok(resp)
    }

    fn transport_error(&self, e: reqwest::Error) -> LlmError {
        if e.is_timeout() {
            LlmError::Timeout(self.config.request_timeout)
        } else {
            LlmError::NetworkError(e.to_string())
        }
    }

    /// Non-streaming call returning the whole message at once.
    #[instrument(skip_all, fields(model = options.model.as_deref().unwrap_or(&self.config.model)))]
    pub async fn complete(
        &self,
        context: &LlmContext,
        options: &StreamOptions,
    ) -> Result<(AssistantMessage, FinishReason), LlmError> {
        let model = options.model.as_deref().unwrap_or(&self.config.model);
        let body = converter::build_request_body(context, options, model, false);
        let resp = self.send(&body).await?;
        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| LlmError::MalformedResponse(e.to_string()))?;
        converter::parse_completion(&json)
    }
}

#[async_trait]
impl LlmProvider for OpenRouterProvider {
    fn name(&self) -> &str {
        "openrouter"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn context_window(&self) -> usize {
        models::find_model(&self.config.model)
            .map(|m| m.context_window)
            .unwrap_or(DEFAULT_CONTEXT_WINDOW)
    }

    fn supports_tools(&self) -> bool {
        models::find_model(&self.config.model)
            .map(|m| m.supports_tools)
            .unwrap_or(true)
    }

    fn cost_usd(&self, model: &str, prompt_tokens: u32, completion_tokens: u32) -> f64 {
        models::calculate_cost(model, prompt_tokens, completion_tokens)
    }

    #[instrument(skip_all, fields(model = options.model.as_deref().unwrap_or(&self.config.model)))]
    async fn stream(
        &self,
        context: &LlmContext,
        options: &StreamOptions,
    ) -> Result<EventStream, LlmError> {
        let model = options.model.as_deref().unwrap_or(&self.config.model);
        let body = converter::build_request_body(context, options, model, true);
        debug!(messages = context.messages.len(), tools = context.tools.len(), "sending chat request");

        let resp = self.send(&body).await?;
        Ok(Box::pin(SseStream::with_idle_timeout(
            resp.bytes_stream(),
            self.config.idle_timeout,
        )))
    }
}

/// Wraps a byte stream from reqwest and yields StreamEvents.
/// If no data arrives within `idle_duration`, emits an error and ends.
struct SseStream {
    inner: Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>,
    parser: ChatStreamParser,
    buffer: Vec<u8>,
    pending: std::collections::VecDeque<StreamEvent>,
    idle_deadline: Pin<Box<tokio::time::Sleep>>,
    idle_duration: Duration,
    ended: bool,
}

impl SseStream {
    fn with_idle_timeout(
        byte_stream: impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            inner: Box::pin(byte_stream),
            parser: ChatStreamParser::new(),
            buffer: Vec::new(),
            pending: std::collections::VecDeque::new(),
            idle_deadline: Box::pin(tokio::time::sleep(idle_timeout)),
            idle_duration: idle_timeout,
            ended: false,
        }
    }

    /// Feed every complete (blank-line terminated) SSE event in the buffer to the parser.
    fn drain_complete_events(&mut self) {
        while let Some(pos) = find_event_boundary(&self.buffer) {
            let chunk: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            let text = String::from_utf8_lossy(&chunk);
            for data in sse::parse_sse_lines(&text) {
                self.pending.extend(self.parser.parse_data(&data));
            }
        }
    }

    fn next_pending(&mut self) -> Option<StreamEvent> {
        let event = self.pending.pop_front()?;
        if event.is_terminal() {
            self.ended = true;
            self.pending.clear();
        }
        Some(event)
    }
}

fn find_event_boundary(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

impl Stream for SseStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(event) = self.next_pending() {
            return Poll::Ready(Some(event));
        }
        if self.ended {
            return Poll::Ready(None);
        }

        loop {
            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    let new_deadline = tokio::time::Instant::now() + self.idle_duration;
                    self.idle_deadline.as_mut().reset(new_deadline);

                    self.buffer.extend_from_slice(&bytes);
                    self.drain_complete_events();

                    if let Some(event) = self.next_pending() {
                        return Poll::Ready(Some(event));
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    self.ended = true;
                    return Poll::Ready(Some(StreamEvent::Error {
                        error: LlmError::StreamInterrupted(e.to_string()),
                    }));
                }
                Poll::Ready(None) => {
                    // Stream ended; flush a trailing event and close the message.
                    if !self.buffer.is_empty() {
                        let remaining = std::mem::take(&mut self.buffer);
                        let text = String::from_utf8_lossy(&remaining);
                        for data in sse::parse_sse_lines(&text) {
                            let events = self.parser.parse_data(&data);
                            self.pending.extend(events);
                        }
                    }
                    let closing = self.parser.finish();
                    self.pending.extend(closing);
                    let next = self.next_pending();
                    self.ended = true;
                    return Poll::Ready(next);
                }
                Poll::Pending => {
                    if self.idle_deadline.as_mut().poll(cx).is_ready() {
                        self.ended = true;
                        return Poll::Ready(Some(StreamEvent::Error {
                            error: LlmError::StreamInterrupted(format!(
                                "idle timeout after {}s",
                                self.idle_duration.as_secs()
                            )),
                        }));
                    }
                    return Poll::Pending;
                }
            }
        }
    }
}
