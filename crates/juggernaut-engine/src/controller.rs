//! The agentic loop: ask the model, run the tools it requests, feed results back,
//! and stop when it answers or a budget or guardrail says so.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::{FutureExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use juggernaut_core::context::LlmContext;
use juggernaut_core::errors::{ErrorCategory, LlmError};
use juggernaut_core::events::{LoopState, SessionEvent};
use juggernaut_core::ids::SessionId;
use juggernaut_core::messages::{AssistantMessage, Conversation, Message, ToolCallBlock};
use juggernaut_core::mode::AgentMode;
use juggernaut_core::provider::{LlmProvider, StreamOptions, ToolChoice};
use juggernaut_core::stop::{GuardrailReason, StopReason};
use juggernaut_core::stream::StreamEvent;
use juggernaut_core::tokens::AccumulatedTokens;
use juggernaut_core::tools::{ToolCallRecord, ToolContext, ToolDefinition, ToolOutcome};
use juggernaut_settings::JuggernautSettings;
use juggernaut_store::SessionFinish;

use crate::answer;
use crate::budget::{BudgetSnapshot, BudgetTracker};
use crate::error::EngineError;
use crate::evidence;
use crate::fallback::fallback_task_for;
use crate::fingerprint;
use crate::guardrails::{suggestion_for, GuardrailConfig, GuardrailSnapshot, GuardrailTracker};
use crate::modes::{self, ModeProfile, DEFAULT_MAX_ITERATIONS_CEILING};
use crate::notify::StopNotification;
use crate::recovery::{LlmPlan, RecoveryAction, RecoveryPolicy};
use crate::registry::ToolRegistry;
use crate::services::SessionServices;
use crate::truncate;

const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_TOKENS: u32 = 4096;
const DEFAULT_EVENT_BUFFER: usize = 256;

/// Process-wide controller settings.
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    pub default_mode: AgentMode,
    pub model: String,
    pub fallback_models: Vec<String>,
    pub max_tokens: u32,
    pub max_iterations_ceiling: u32,
    pub evidence_check: bool,
    pub guardrails: GuardrailConfig,
    pub recovery: RecoveryPolicy,
    pub tool_timeout: Duration,
    pub max_output_bytes: usize,
    pub event_buffer: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            default_mode: AgentMode::Normal,
            model: "openai/gpt-4o-mini".to_string(),
            fallback_models: Vec::new(),
            max_tokens: DEFAULT_MAX_TOKENS,
            max_iterations_ceiling: DEFAULT_MAX_ITERATIONS_CEILING,
            evidence_check: true,
            guardrails: GuardrailConfig::default(),
            recovery: RecoveryPolicy::default(),
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            max_output_bytes: truncate::DEFAULT_MAX_OUTPUT,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl ControllerConfig {
    pub fn from_settings(settings: &JuggernautSettings) -> Self {
        Self {
            default_mode: settings.agent.default_mode,
            model: settings.llm.model.clone(),
            fallback_models: settings.llm.fallback_models.clone(),
            max_tokens: settings.llm.max_tokens,
            max_iterations_ceiling: settings.agent.max_iterations_ceiling,
            evidence_check: settings.agent.evidence_check,
            guardrails: GuardrailConfig::from(&settings.agent.guardrails),
            recovery: RecoveryPolicy::default().with_max_attempts(settings.llm.max_attempts),
            tool_timeout: Duration::from_secs(settings.tools.timeout_secs),
            max_output_bytes: settings.tools.max_output_bytes,
            event_buffer: settings.server.event_buffer_size.max(1),
        }
    }
}

/// One prompt to run to completion.
#[derive(Clone, Debug, Default)]
pub struct SessionRequest {
    pub prompt: String,
    pub mode: Option<AgentMode>,
    pub model: Option<String>,
    /// Overrides the mode's step budget.
    pub max_steps: Option<u32>,
    /// Overrides the mode's wall-clock budget.
    pub max_seconds: Option<u64>,
    pub session_id: Option<SessionId>,
}

impl SessionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_mode(mut self, mode: AgentMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_steps(mut self, steps: u32) -> Self {
        self.max_steps = Some(steps);
        self
    }

    pub fn with_max_seconds(mut self, secs: u64) -> Self {
        self.max_seconds = Some(secs);
        self
    }
}

/// Producer side of a session's event channel.
///
/// Sends wait for capacity, so a slow consumer paces the loop. A closed
/// receiver cancels the session.
pub struct EventSink {
    tx: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<SessionEvent>, cancel: CancellationToken) -> Self {
        Self { tx, cancel }
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx, CancellationToken::new()), rx)
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn emit(&self, event: SessionEvent) {
        if self.tx.send(event).await.is_err() && !self.cancel.is_cancelled() {
            debug!("event receiver dropped, cancelling session");
            self.cancel.cancel();
        }
    }
}

/// A session running on its own task.
pub struct SessionHandle {
    pub session_id: SessionId,
    pub events: mpsc::Receiver<SessionEvent>,
    cancel: CancellationToken,
    join: JoinHandle<SessionOutcome>,
}

impl SessionHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn into_parts(
        self,
    ) -> (
        SessionId,
        mpsc::Receiver<SessionEvent>,
        CancellationToken,
        JoinHandle<SessionOutcome>,
    ) {
        (self.session_id, self.events, self.cancel, self.join)
    }

    /// Drain every event, then wait for the outcome.
    pub async fn collect(mut self) -> (Vec<SessionEvent>, Result<SessionOutcome, EngineError>) {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            events.push(event);
        }
        let outcome = self
            .join
            .await
            .map_err(|e| EngineError::Internal(e.to_string()));
        (events, outcome)
    }
}

/// Everything a finished session produced.
#[derive(Clone, Debug)]
pub struct SessionOutcome {
    pub session_id: SessionId,
    pub final_answer: Option<String>,
    pub stop_reason: Option<StopReason>,
    pub tool_log: Vec<ToolCallRecord>,
    pub usage: AccumulatedTokens,
    pub iterations: u32,
    pub budget: BudgetSnapshot,
    pub guardrails: GuardrailSnapshot,
}

struct SessionState {
    id: SessionId,
    sink: EventSink,
    tools: Vec<ToolDefinition>,
    conversation: Conversation,
    budget: BudgetTracker,
    guardrails: GuardrailTracker,
    plan: LlmPlan,
    tool_log: Vec<ToolCallRecord>,
    usage: AccumulatedTokens,
    iterations: u32,
    stop_reason: Option<StopReason>,
    llm_error: Option<LlmError>,
}

impl SessionState {
    fn stop(&mut self, reason: StopReason) {
        if self.stop_reason.is_none() {
            self.stop_reason = Some(reason);
        }
    }
}

#[derive(Clone)]
pub struct LoopController {
    provider: Arc<dyn LlmProvider>,
    registry: Arc<ToolRegistry>,
    services: SessionServices,
    config: Arc<ControllerConfig>,
}

impl LoopController {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        registry: Arc<ToolRegistry>,
        services: SessionServices,
        config: ControllerConfig,
    ) -> Self {
        Self {
            provider,
            registry,
            services,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn services(&self) -> &SessionServices {
        &self.services
    }

    /// Spawn a session. Events arrive on the handle's bounded receiver.
    pub fn start(&self, mut request: SessionRequest) -> SessionHandle {
        let session_id = request.session_id.get_or_insert_with(SessionId::new).clone();
        let (tx, events) = mpsc::channel(self.config.event_buffer.max(1));
        let cancel = CancellationToken::new();
        let sink = EventSink::new(tx, cancel.clone());

        let controller = self.clone();
        let join = tokio::spawn(async move { controller.run(request, sink).await });

        SessionHandle {
            session_id,
            events,
            cancel,
            join,
        }
    }

    /// Run a session inline. Always ends with a `done` event on `sink`.
    #[instrument(skip_all, fields(session_id))]
    pub async fn run(&self, request: SessionRequest, sink: EventSink) -> SessionOutcome {
        let id = request.session_id.clone().unwrap_or_default();
        tracing::Span::current().record("session_id", tracing::field::display(&id));

        let mode = request.mode.unwrap_or(self.config.default_mode);
        let profile = ModeProfile::resolve(mode, &request.prompt, self.config.max_iterations_ceiling);
        let mut budget_config = profile.budget.clone();
        if let Some(steps) = request.max_steps {
            budget_config.max_steps = steps;
        }
        if let Some(secs) = request.max_seconds {
            budget_config.wall_clock_max = Duration::from_secs(secs);
        }
        let primary = request.model.clone().unwrap_or_else(|| self.config.model.clone());

        let mut s = SessionState {
            id: id.clone(),
            sink,
            tools: self.registry.definitions(),
            conversation: Conversation::new(),
            budget: BudgetTracker::new(budget_config),
            guardrails: GuardrailTracker::new(self.config.guardrails.clone()),
            plan: LlmPlan::new(primary, &self.config.fallback_models, self.config.max_tokens),
            tool_log: Vec::new(),
            usage: AccumulatedTokens::default(),
            iterations: 0,
            stop_reason: None,
            llm_error: None,
        };

        info!(%mode, model = s.plan.model(), max_iterations = profile.max_iterations, "session started");
        if let Some(p) = &self.services.persistence {
            if let Err(e) = p.sessions.create(&id, mode, s.plan.model(), &request.prompt) {
                error!(error = %e, "failed to persist session");
            }
        }

        s.sink
            .emit(SessionEvent::Session {
                session_id: id.clone(),
                mode,
                model: s.plan.model().to_string(),
                max_iterations: profile.max_iterations,
            })
            .await;

        self.push_message(&mut s, Message::system(modes::system_prompt(mode)));
        self.push_message(&mut s, Message::user(request.prompt.clone()));

        let answer = self.run_loop(&mut s, profile.max_iterations).await;
        self.finish(s, answer).await
    }

    /// Iterate until the model answers or something stops the session.
    /// Returns the model's final text, if it produced one.
    async fn run_loop(&self, s: &mut SessionState, max_iterations: u32) -> Option<String> {
        for iteration in 1..=max_iterations {
            self.emit_budget(s).await;

            if s.stop_reason.is_some() {
                break;
            }
            if s.sink.is_cancelled() {
                s.stop(StopReason::Cancelled);
                break;
            }
            if let Some(reason) = s.budget.exceeded_reason() {
                warn!(reason = reason.as_str(), "budget exceeded");
                s.stop(StopReason::BudgetExceeded { reason });
                break;
            }

            s.iterations = iteration;
            s.budget.increment_step();
            s.sink.emit(SessionEvent::Status { state: LoopState::Thinking }).await;

            let message = match self.call_llm(s, ToolChoice::Auto).await {
                Ok(message) => message,
                Err(e) => {
                    if !matches!(e, LlmError::Cancelled) {
                        error!(error = %e, code = e.code(), "llm call failed");
                    }
                    s.stop(StopReason::from(&e));
                    s.llm_error = Some(e);
                    break;
                }
            };

            if !message.has_tool_calls() {
                let text = message.text.clone();
                self.push_message(s, Message::Assistant(message));
                return Some(text);
            }

            s.sink.emit(SessionEvent::Status { state: LoopState::Reasoning }).await;
            let calls = message.tool_calls.clone();
            self.push_message(s, Message::Assistant(message));
            self.run_tool_calls(s, &calls).await;

            if s.stop_reason.is_none() && iteration == max_iterations {
                warn!(iterations = iteration, "max iterations reached");
                s.stop(StopReason::MaxIterationsReached { iterations: iteration });
            }
        }
        None
    }

    /// Execute one assistant turn's tool calls in order.
    async fn run_tool_calls(&self, s: &mut SessionState, calls: &[ToolCallBlock]) {
        let mut observed: Vec<(String, String)> = Vec::new();
        let mut answered = 0;

        for call in calls {
            if s.stop_reason.is_some() {
                break;
            }
            if s.sink.is_cancelled() {
                s.stop(StopReason::Cancelled);
                break;
            }

            let call_key = fingerprint::call_key(&call.name, &call.arguments);
            if s.guardrails.was_attempted(&call_key) {
                s.guardrails.trigger(
                    GuardrailReason::RepeatedCall,
                    format!("{} was already called with these arguments", call.name),
                );
                self.stop_for_guardrail(s).await;
                break;
            }
            if s.guardrails.circuit_open(&call.name) {
                s.guardrails.trigger(
                    GuardrailReason::CircuitOpen,
                    format!(
                        "{} has failed {} times; circuit open",
                        call.name,
                        s.guardrails.tool_failures(&call.name)
                    ),
                );
                self.stop_for_guardrail(s).await;
                break;
            }

            let fp = fingerprint::fingerprint(&call.name, &call.arguments);
            if s.guardrails.failure_count(&fp) > 0 {
                s.budget.record_retry(&fp);
            }
            if let Some(reason) = s.budget.exceeded_within_step() {
                warn!(reason = reason.as_str(), "budget exceeded before tool call");
                s.stop(StopReason::BudgetExceeded { reason });
                break;
            }

            s.sink.emit(SessionEvent::Status { state: LoopState::ToolRunning }).await;
            s.sink
                .emit(SessionEvent::ToolStart {
                    tool_call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    arguments: call.arguments.clone(),
                })
                .await;

            let mut record = self.execute_tool(s, call, call_key).await;
            let fp = s
                .guardrails
                .record_tool_call(&call.name, &call.arguments, record.success);
            if record.success {
                s.guardrails.mark_attempted(&record.call_key);
            } else {
                record.failure_fingerprint = Some(fp);
                warn!(
                    tool = %call.name,
                    error = record.outcome.error().unwrap_or_default(),
                    "tool call failed"
                );
                if let Some(task) = fallback_task_for(&s.id, &record) {
                    if let Err(e) = self.services.fallback.record(task) {
                        error!(error = %e, tool = %call.name, "failed to record fallback task");
                    }
                }
            }

            let text = record.outcome.content_text();
            s.sink
                .emit(SessionEvent::ToolResult {
                    tool_call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    success: record.success,
                    preview: truncate::preview(&text),
                    duration_ms: record.duration.as_millis() as u64,
                })
                .await;

            let content = truncate::truncate_output(&text, self.config.max_output_bytes);
            let content = if record.success {
                content
            } else {
                format!("[error] {content}")
            };
            self.push_message(s, Message::tool_result(call.id.clone(), call.name.clone(), content));
            answered += 1;

            observed.push((record.call_key.clone(), text));
            s.tool_log.push(record);

            if s.guardrails.should_stop() {
                self.stop_for_guardrail(s).await;
                break;
            }
        }

        // Every requested call gets a result message, even ones never run.
        for call in &calls[answered..] {
            self.push_message(
                s,
                Message::tool_result(
                    call.id.clone(),
                    call.name.clone(),
                    "[skipped] session stopped before this call ran",
                ),
            );
        }

        if !observed.is_empty() {
            let hash = fingerprint::state_hash(observed.iter().map(|(k, o)| (k.as_str(), o.as_str())));
            s.budget.record_state(&hash);
            s.guardrails.record_state(&hash);
            if s.stop_reason.is_none() && s.guardrails.should_stop() {
                self.stop_for_guardrail(s).await;
            }
        }
    }

    async fn stop_for_guardrail(&self, s: &mut SessionState) {
        let Some(reason) = s.guardrails.stop_reason() else {
            return;
        };
        let detail = s.guardrails.stop_detail().unwrap_or_default().to_string();
        warn!(reason = reason.as_str(), %detail, "guardrail triggered");
        s.stop(StopReason::GuardrailTriggered {
            reason,
            detail: detail.clone(),
        });
        s.sink
            .emit(SessionEvent::Guardrails {
                reason,
                detail,
                suggestion: suggestion_for(reason).to_string(),
            })
            .await;
    }

    /// Run one tool with a timeout and panic isolation. Transient errors get one
    /// immediate retry.
    #[instrument(skip(self, s, call, call_key), fields(tool = %call.name))]
    async fn execute_tool(
        &self,
        s: &SessionState,
        call: &ToolCallBlock,
        call_key: String,
    ) -> ToolCallRecord {
        let timestamp = Utc::now();
        let start = Instant::now();
        let timeout = self.config.tool_timeout;

        let outcome = match self.registry.get(&call.name) {
            None => ToolOutcome::failure(format!("unknown tool: {}", call.name)),
            Some(tool) => {
                let mut attempt = 0;
                loop {
                    attempt += 1;
                    let ctx = ToolContext {
                        session_id: s.id.clone(),
                        tool_call_id: call.id.clone(),
                        abort_signal: s.sink.cancel_token().clone(),
                    };
                    let result = tokio::time::timeout(
                        timeout,
                        AssertUnwindSafe(tool.execute(call.arguments.clone(), &ctx)).catch_unwind(),
                    )
                    .await;

                    let transient = match result {
                        Ok(Ok(Ok(outcome))) => break outcome,
                        Ok(Ok(Err(e))) if e.is_transient() => e.to_string(),
                        Ok(Ok(Err(e))) => break ToolOutcome::failure(e.to_string()),
                        Ok(Err(panic)) => {
                            error!(panic = %panic_message(&panic), "tool panicked during execution");
                            break ToolOutcome::failure("internal error: tool crashed");
                        }
                        Err(_) => {
                            warn!(timeout_secs = timeout.as_secs_f64(), "tool timed out");
                            format!("tool timed out after {:.1}s", timeout.as_secs_f64())
                        }
                    };

                    match self
                        .config
                        .recovery
                        .next_action(ErrorCategory::ToolError, attempt, None)
                    {
                        RecoveryAction::Retry { delay } if !s.sink.is_cancelled() => {
                            warn!(attempt, error = %transient, "retrying tool call");
                            if !delay.is_zero() {
                                tokio::time::sleep(delay).await;
                            }
                        }
                        _ => break ToolOutcome::failure(transient),
                    }
                }
            }
        };

        ToolCallRecord {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            arguments: call.arguments.clone(),
            success: outcome.is_success(),
            outcome,
            call_key,
            failure_fingerprint: None,
            duration: start.elapsed(),
            timestamp,
        }
    }

    /// One logical LLM request, with the recovery table applied to failures.
    async fn call_llm(
        &self,
        s: &mut SessionState,
        tool_choice: ToolChoice,
    ) -> Result<AssistantMessage, LlmError> {
        let mut attempt = 0;
        loop {
            if s.sink.is_cancelled() {
                return Err(LlmError::Cancelled);
            }
            let context = LlmContext::new(s.conversation.messages().to_vec(), s.tools.clone());
            let options = s.plan.options(tool_choice.clone());

            let error = match self.stream_once(s, &context, &options).await {
                Ok(message) => return Ok(message),
                Err(LlmError::Cancelled) => return Err(LlmError::Cancelled),
                Err(e) => e,
            };

            attempt += 1;
            let category = error.category();
            let action = self
                .config
                .recovery
                .next_action(category, attempt, error.suggested_delay());
            warn!(
                attempt,
                category = category.as_str(),
                action = action.as_str(),
                model = s.plan.model(),
                error = %error,
                "llm call failed"
            );
            s.sink
                .emit(SessionEvent::Recovery {
                    category,
                    action: action.as_str().to_string(),
                    attempt,
                    model: s.plan.model().to_string(),
                    message: error.to_string(),
                })
                .await;

            match action {
                RecoveryAction::Retry { delay } => {
                    tokio::select! {
                        biased;
                        _ = s.sink.cancel_token().cancelled() => return Err(LlmError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                RecoveryAction::SwitchModel => {
                    if !s.plan.switch_model() {
                        return Err(error);
                    }
                    info!(model = s.plan.model(), "switched to fallback model");
                }
                RecoveryAction::Degrade => {
                    if !s.plan.degrade() {
                        return Err(error);
                    }
                    info!(
                        model = s.plan.model(),
                        max_tokens = s.plan.max_tokens(),
                        "degraded llm request"
                    );
                }
                RecoveryAction::Skip | RecoveryAction::Abort => return Err(error),
            }
        }
    }

    /// Stream a single completion, forwarding text deltas as `token` events.
    async fn stream_once(
        &self,
        s: &mut SessionState,
        context: &LlmContext,
        options: &StreamOptions,
    ) -> Result<AssistantMessage, LlmError> {
        let cancel = s.sink.cancel_token().clone();
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            opened = AssertUnwindSafe(self.provider.stream(context, options)).catch_unwind() => opened,
        };
        let mut stream = opened.map_err(provider_panicked)??;

        let mut message = None;
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(LlmError::Cancelled),
                event = AssertUnwindSafe(stream.next()).catch_unwind() => event.map_err(provider_panicked)?,
            };
            match event {
                Some(StreamEvent::TextDelta { delta }) => {
                    s.sink.emit(SessionEvent::Token { delta }).await;
                }
                Some(StreamEvent::Done { message: done, .. }) => {
                    message = Some(done);
                    break;
                }
                Some(StreamEvent::Error { error }) => return Err(error),
                Some(_) => {}
                None => break,
            }
        }

        let message = message.ok_or_else(|| {
            LlmError::StreamInterrupted("stream ended without a completion".into())
        })?;
        let usage = message.usage.clone().unwrap_or_default();
        let model = options.model.as_deref().unwrap_or_else(|| self.provider.model());
        let cost = self
            .provider
            .cost_usd(model, usage.prompt_tokens, usage.completion_tokens);
        s.usage.accumulate(&usage, cost);
        Ok(message)
    }

    /// Settle the final answer, persist, notify, and emit the closing events.
    async fn finish(&self, mut s: SessionState, answer: Option<String>) -> SessionOutcome {
        let usable = answer.filter(|text| !answer::is_refusal(text));
        let mut final_answer = usable.clone();
        let mut from_model = usable.is_some();

        let synthesis_allowed = !matches!(
            s.stop_reason,
            Some(StopReason::Cancelled) | Some(StopReason::LlmAuth { .. })
        ) && !s.sink.is_cancelled();

        let needs_synthesis = final_answer.is_none() && !s.tool_log.is_empty() && synthesis_allowed;
        if needs_synthesis || s.stop_reason.is_none() {
            s.sink.emit(SessionEvent::Status { state: LoopState::Summarizing }).await;
        }
        if needs_synthesis {
            self.push_message(&mut s, Message::user(answer::SYNTHESIS_PROMPT));
            match self.call_llm(&mut s, ToolChoice::None).await {
                Ok(message) if !answer::is_refusal(&message.text) => {
                    final_answer = Some(message.text.clone());
                    from_model = true;
                    self.push_message(&mut s, Message::Assistant(AssistantMessage::text(message.text)));
                }
                Ok(_) => {
                    debug!("synthesis produced no usable answer");
                }
                Err(e) => {
                    warn!(error = %e, "synthesis call failed");
                }
            }
            if final_answer.is_none() {
                final_answer = answer::deterministic_summary(&s.tool_log);
                from_model = false;
            }
        }

        if self.config.evidence_check && from_model && !s.tool_log.is_empty() {
            if let Some(text) = &final_answer {
                let evidence: Vec<String> =
                    s.tool_log.iter().map(|r| r.outcome.content_text()).collect();
                let missing = evidence::unsupported_facts(text, &evidence.join("\n"));
                if !missing.is_empty() {
                    warn!(
                        unsupported = ?missing.iter().map(|f| f.text.as_str()).collect::<Vec<_>>(),
                        "final answer cites facts absent from tool results"
                    );
                    final_answer = Some(evidence::EVIDENCE_REFUSAL.to_string());
                }
            }
        }

        if let Some(reason) = &s.stop_reason {
            info!(stop_reason = %reason.label(), iterations = s.iterations, "session stopped");
            s.sink.emit(SessionEvent::Status { state: LoopState::Stopped }).await;
        } else {
            info!(iterations = s.iterations, "session completed");
            s.sink.emit(SessionEvent::Status { state: LoopState::Idle }).await;
        }
        if let Some(e) = &s.llm_error {
            if !matches!(e, LlmError::Cancelled) {
                s.sink
                    .emit(SessionEvent::Error {
                        code: e.code().to_string(),
                        message: e.to_string(),
                    })
                    .await;
            }
        }
        self.emit_budget(&s).await;

        let budget = s.budget.snapshot();
        let guardrails = s.guardrails.snapshot();
        self.persist_outcome(&s, final_answer.as_deref(), &budget, &guardrails);

        if let (Some(reason), Some(notifier)) = (&s.stop_reason, &self.services.notifier) {
            if reason.is_abnormal() {
                let notification = StopNotification::new(s.id.clone(), reason.clone());
                if let Err(e) = notifier.notify(&notification).await {
                    warn!(error = %e, "failed to deliver stop notification");
                }
            }
        }

        s.sink
            .emit(SessionEvent::Done {
                final_answer: final_answer.clone(),
                usage: s.usage.clone(),
                tool_log: s.tool_log.clone(),
                stop_reason: s.stop_reason.clone(),
                iterations: s.iterations,
            })
            .await;

        SessionOutcome {
            session_id: s.id,
            final_answer,
            stop_reason: s.stop_reason,
            tool_log: s.tool_log,
            usage: s.usage,
            iterations: s.iterations,
            budget,
            guardrails,
        }
    }

    fn persist_outcome(
        &self,
        s: &SessionState,
        final_answer: Option<&str>,
        budget: &BudgetSnapshot,
        guardrails: &GuardrailSnapshot,
    ) {
        let Some(p) = &self.services.persistence else {
            return;
        };
        let finish = SessionFinish {
            final_answer,
            stop_reason: s.stop_reason.as_ref(),
            iterations: s.iterations,
            usage: &s.usage,
        };
        if let Err(e) = p.sessions.finish(&s.id, finish) {
            error!(error = %e, "failed to persist session outcome");
        }
        if let Err(e) = p.snapshots.save(&s.id, budget, guardrails) {
            error!(error = %e, "failed to persist session snapshot");
        }
    }

    fn push_message(&self, s: &mut SessionState, message: Message) {
        if let Some(p) = &self.services.persistence {
            if let Err(e) = p.messages.append(&s.id, &message) {
                error!(error = %e, role = message.role(), "failed to persist message");
            }
        }
        s.conversation.push(message);
    }

    async fn emit_budget(&self, s: &SessionState) {
        let config = s.budget.config();
        s.sink
            .emit(SessionEvent::Budget {
                steps_used: s.budget.steps_used(),
                steps_max: config.max_steps,
                elapsed_ms: s.budget.elapsed().as_millis() as u64,
                wall_clock_max_ms: config.wall_clock_max.as_millis() as u64,
                exceeded: s.budget.exceeded_reason(),
            })
            .await;
    }
}

/// A provider panic ends the call like any other LLM failure, so the session still
/// reaches `done`.
fn provider_panicked(panic: Box<dyn std::any::Any + Send>) -> LlmError {
    let message = panic_message(&panic);
    error!(panic = %message, "llm provider panicked");
    LlmError::ProviderPanicked(message)
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<String>()
        .map(|s| s.as_str())
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}
