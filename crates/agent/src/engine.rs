//! The agent engine: a phase-aware ReAct loop over one session.
//!
//! Verbs exposed to the host:
//! - [`AgentEngine::run`] spawns the loop and returns the event stream
//! - [`AgentEngine::confirm`] executes or rejects a parked tool call
//! - [`AgentEngine::confirm_plan`] approves a draft plan between runs
//! - [`AgentEngine::cancel`] clears any pending action and fails the session
//!
//! Each step asks the model for a thought, executes at most one tool, and
//! records the exchange on the session. Tools that need approval park the
//! run; the task exits and [`AgentEngine::confirm`] finishes the call later.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use weaver_config::AppConfig;
use weaver_core::error::{Error, ProviderError, Result, ToolError};
use weaver_core::message::{meta, Message, MessageEntry, MessageToolCall, Role};
use weaver_core::provider::{LlmConfig, Provider, ToolDefinition};
use weaver_core::session::{
    ComplexityHint, PendingAction, Plan, Session, SessionPhase, SessionStatus, ToolCallRecord,
};
use weaver_core::tool::{ToolContext, ToolRegistry, ToolResult};
use weaver_memory::SessionStore;
use weaver_providers::{LlmAdapter, Thought, ToolAction};

use crate::classifier::classify_request;
use crate::compactor::Compactor;
use crate::event::{AffectedResource, AgentEvent};
use crate::persona::{Persona, PersonaRegistry};
use crate::prompt::persona_system_prompt;
use crate::skill::SkillRegistry;

/// Tools the model may see while a plan is still being discussed.
pub const PLANNING_TOOLS: &[&str] = &["get_workspace_info", "get_ui_schema", "create_plan", "query_data"];

/// Runtime settings of the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on loop iterations per run
    pub max_steps: u32,
    /// Deadline for each LLM call and each tool execution
    pub step_timeout: Duration,
    pub compaction_threshold: usize,
    pub keep_recent: usize,
    /// Event channel capacity
    pub event_buffer: usize,
    /// Engine-level credentials, used when a run brings none
    pub llm: LlmConfig,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps: 20,
            step_timeout: Duration::from_secs(60),
            compaction_threshold: 40,
            keep_recent: 10,
            event_buffer: 32,
            llm: LlmConfig::default(),
            temperature: 0.2,
            max_tokens: 8192,
        }
    }
}

impl EngineConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            max_steps: config.engine.max_steps,
            step_timeout: Duration::from_secs(config.engine.step_timeout_secs),
            compaction_threshold: config.engine.compaction_threshold,
            keep_recent: config.engine.keep_recent,
            event_buffer: config.engine.event_buffer,
            llm: config.llm.to_llm_config(),
            temperature: config.llm.temperature,
            max_tokens: config.llm.max_tokens,
        }
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    pub fn with_compaction(mut self, threshold: usize, keep_recent: usize) -> Self {
        self.compaction_threshold = threshold;
        self.keep_recent = keep_recent;
        self
    }
}

/// One user turn handed to [`AgentEngine::run`].
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub session_id: String,
    pub workspace_id: String,
    pub user_id: String,
    pub message: String,
    /// Persona for a session created by this run; ignored afterwards.
    pub persona_id: Option<String>,
    /// Credentials overriding the engine's for this run only.
    pub llm: Option<LlmConfig>,
}

impl RunRequest {
    pub fn new(
        session_id: impl Into<String>,
        workspace_id: impl Into<String>,
        user_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            workspace_id: workspace_id.into(),
            user_id: user_id.into(),
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_persona(mut self, persona_id: impl Into<String>) -> Self {
        self.persona_id = Some(persona_id.into());
        self
    }

    pub fn with_llm(mut self, llm: LlmConfig) -> Self {
        self.llm = Some(llm);
        self
    }
}

/// What [`AgentEngine::confirm`] did with the pending action.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmOutcome {
    Executed(ToolResult),
    Rejected,
}

enum StepOutcome {
    Continue,
    Finished,
}

/// Sends events without outliving the run's cancellation.
struct EventSink {
    tx: mpsc::Sender<AgentEvent>,
    cancel: CancellationToken,
}

impl EventSink {
    /// A full channel blocks until the consumer drains it or the run is
    /// cancelled; a closed channel drops the event.
    async fn emit(&self, event: AgentEvent) {
        tokio::select! {
            biased;
            res = self.tx.send(event) => {
                if res.is_err() {
                    debug!("Event consumer closed the stream");
                }
            }
            _ = self.cancel.cancelled() => {
                debug!("Dropping event: channel full and run cancelled");
            }
        }
    }
}

/// The ReAct engine. Cheap to clone; every clone shares the same stores.
#[derive(Clone)]
pub struct AgentEngine {
    config: Arc<EngineConfig>,
    tools: Arc<ToolRegistry>,
    sessions: Arc<SessionStore>,
    adapter: Arc<LlmAdapter>,
    personas: Arc<PersonaRegistry>,
    skills: Arc<SkillRegistry>,
    compactor: Compactor,
}

impl AgentEngine {
    pub fn new(config: EngineConfig, tools: Arc<ToolRegistry>, sessions: Arc<SessionStore>) -> Self {
        let adapter = Arc::new(build_adapter(&config, None));
        let compactor = Compactor::new(config.compaction_threshold, config.keep_recent);
        Self {
            config: Arc::new(config),
            tools,
            sessions,
            adapter,
            personas: Arc::new(PersonaRegistry::new()),
            skills: Arc::new(SkillRegistry::new()),
            compactor,
        }
    }

    /// Serve runs without their own credentials from `provider`.
    pub fn with_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.adapter = Arc::new(build_adapter(&self.config, Some(provider)));
        self
    }

    pub fn with_personas(mut self, personas: Arc<PersonaRegistry>) -> Self {
        self.personas = personas;
        self
    }

    pub fn with_skills(mut self, skills: Arc<SkillRegistry>) -> Self {
        self.skills = skills;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn personas(&self) -> &Arc<PersonaRegistry> {
        &self.personas
    }

    pub fn skills(&self) -> &Arc<SkillRegistry> {
        &self.skills
    }

    pub fn adapter(&self) -> &LlmAdapter {
        &self.adapter
    }

    /// Start a run in the background and return its event stream.
    ///
    /// The stream ends after a terminal event (`done`, `error` or
    /// `confirmation_required`). Must be called inside a tokio runtime.
    pub fn run(&self, request: RunRequest, cancel: CancellationToken) -> mpsc::Receiver<AgentEvent> {
        let (tx, rx) = mpsc::channel(self.config.event_buffer.max(1));
        let engine = self.clone();
        tokio::spawn(async move {
            let sink = EventSink {
                tx,
                cancel: cancel.clone(),
            };
            engine.drive(request, &cancel, &sink).await;
        });
        rx
    }

    /// Resolve the pending action of a paused session.
    ///
    /// Approval executes the parked tool inline under `cancel`; rejection
    /// records the refusal for the model. Either way the session completes.
    /// A missing session or a stale action id is an error and changes nothing.
    pub async fn confirm(
        &self,
        session_id: &str,
        action_id: &str,
        approved: bool,
        cancel: &CancellationToken,
    ) -> Result<ConfirmOutcome> {
        let session = self
            .sessions
            .get(session_id)
            .await
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
        let pending = session
            .take_pending_action(action_id)
            .ok_or_else(|| Error::NoPendingAction(action_id.to_string()))?;

        if !approved {
            info!(session_id, action_id, tool = %pending.tool_name, "Action rejected");
            session.add_message(
                MessageEntry::tool(format!("User rejected the \"{}\" operation.", pending.tool_name))
                    .with_meta(meta::TOOL, pending.tool_name.as_str())
                    .with_meta(meta::REJECTED, true)
                    .with_meta(meta::SUCCESS, false)
                    .with_meta(meta::STEP, pending.step)
                    .with_meta(meta::TOOL_CALL_ID, pending.tool_call_id.as_str()),
            );
            session.set_status(SessionStatus::Completed);
            self.sessions.persist(session_id).await;
            return Ok(ConfirmOutcome::Rejected);
        }

        info!(session_id, action_id, tool = %pending.tool_name, "Action approved");
        let persona = self.personas.resolve(session.persona_id());
        let ctx = tool_context(&session, &pending.tool_call_id, persona.as_ref(), cancel.child_token());
        let result = self
            .execute_tool(&ctx, &pending.tool_name, &pending.tool_args)
            .await;
        self.record_execution(
            &session,
            pending.step,
            &ToolAction {
                id: pending.tool_call_id.clone(),
                name: pending.tool_name.clone(),
                arguments: pending.tool_args.clone(),
            },
            &result,
            true,
        );
        session.set_status(SessionStatus::Completed);
        self.sessions.persist(session_id).await;
        Ok(ConfirmOutcome::Executed(result))
    }

    /// Approve the session's draft plan: the plan and the phase both become
    /// `confirmed`, and the next run starts executing it.
    pub async fn confirm_plan(&self, session_id: &str) -> Result<Plan> {
        let session = self
            .sessions
            .get(session_id)
            .await
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
        let Some(plan) = session.plan() else {
            return Err(Error::NotFound(format!("no plan on session {session_id}")));
        };
        if !session.confirm_plan() {
            return Err(Error::Validation(format!(
                "plan \"{}\" is {}, only a draft can be confirmed",
                plan.title, plan.status
            )));
        }
        self.sessions.persist(session_id).await;
        info!(session_id, plan = %plan.title, steps = plan.steps.len(), "Plan confirmed");
        session
            .plan()
            .ok_or_else(|| Error::NotFound(format!("no plan on session {session_id}")))
    }

    /// Mark a session failed and drop its pending action.
    ///
    /// Does not abort a run that is mid-call; cancel the run's token for that.
    pub async fn cancel(&self, session_id: &str) -> Result<()> {
        let session = self
            .sessions
            .get(session_id)
            .await
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
        if let Some(pending) = session.clear_pending_action() {
            debug!(session_id, action_id = %pending.action_id, "Cleared pending action");
        }
        session.set_status(SessionStatus::Failed);
        self.sessions.persist(session_id).await;
        info!(session_id, "Session cancelled");
        Ok(())
    }

    /// Tool definitions the model may see on this step.
    pub fn visible_tools(&self, session: &Session, persona: Option<&Persona>) -> Vec<ToolDefinition> {
        let hidden = self.skills.hidden_tool_names();
        let planning = session.phase() == SessionPhase::Planning;
        self.tools
            .list_all()
            .into_iter()
            .filter(|t| !hidden.contains(t.name()))
            .filter(|t| persona.is_none_or(|p| p.allows(t.name())))
            .filter(|t| !planning || PLANNING_TOOLS.contains(&t.name()))
            .map(|t| t.to_definition())
            .collect()
    }

    async fn drive(&self, request: RunRequest, cancel: &CancellationToken, sink: &EventSink) {
        let session = self
            .sessions
            .get_or_create(
                &request.session_id,
                &request.workspace_id,
                &request.user_id,
                request.persona_id.as_deref(),
            )
            .await;
        let sid = session.id().to_string();

        if let Some(pending) = session.pending_action() {
            warn!(session_id = %sid, action_id = %pending.action_id, "Run refused, session is paused");
            sink.emit(AgentEvent::Error {
                session_id: sid,
                error: format!(
                    "session is awaiting confirmation of action {}",
                    pending.action_id
                ),
            })
            .await;
            return;
        }

        if cancel.is_cancelled() {
            self.fail(&session, sink, "cancelled").await;
            return;
        }

        session.set_status(SessionStatus::Running);
        if session.phase() == SessionPhase::Confirmed && session.begin_execution() {
            info!(session_id = %sid, "Plan confirmed, entering execution phase");
        }
        if session.phase() == SessionPhase::Planning
            && session.complexity_hint() == ComplexityHint::Unset
        {
            let hint = classify_request(&request.message);
            session.set_complexity_hint(hint);
            info!(session_id = %sid, hint = %hint, "Classified planning request");
        }
        session.add_message(MessageEntry::user(request.message.as_str()));
        self.sessions.persist(&sid).await;

        let persona = self.personas.resolve(session.persona_id());
        info!(
            session_id = %sid,
            phase = %session.phase(),
            persona = persona.as_ref().map_or("default", |p| p.id.as_str()),
            max_steps = self.config.max_steps,
            "Run started"
        );

        for step in 1..=self.config.max_steps {
            if cancel.is_cancelled() {
                self.fail(&session, sink, "cancelled").await;
                return;
            }
            let outcome = self
                .step(&session, step, persona.as_ref(), &request, cancel, sink)
                .await;
            if let StepOutcome::Finished = outcome {
                return;
            }
            if self.compactor.compact_session(&session) {
                self.sessions.persist(&sid).await;
            }
        }

        let error = format!(
            "Agent reached maximum steps ({}) without completing",
            self.config.max_steps
        );
        self.fail(&session, sink, &error).await;
    }

    async fn step(
        &self,
        session: &Arc<Session>,
        step: u32,
        persona: Option<&Persona>,
        request: &RunRequest,
        cancel: &CancellationToken,
        sink: &EventSink,
    ) -> StepOutcome {
        let sid = session.id().to_string();
        let tools = self.visible_tools(session, persona);
        let system_prompt =
            persona_system_prompt(persona, &tools, session, &self.skills.build_system_prompt());
        let messages = provider_messages(system_prompt, &session.messages());
        debug!(
            session_id = %sid,
            step,
            tools = tools.len(),
            messages = messages.len(),
            "Agent loop iteration"
        );

        let timeout = self.config.step_timeout;
        let thought = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.fail(session, sink, "cancelled").await;
                return StepOutcome::Finished;
            }
            res = tokio::time::timeout(timeout, self.adapter.think(request.llm.as_ref(), messages, tools)) => match res {
                Ok(Ok(thought)) => thought,
                Ok(Err(e)) => {
                    self.fail(session, sink, &e.to_string()).await;
                    return StepOutcome::Finished;
                }
                Err(_) => {
                    let e = ProviderError::Timeout(format!("no response within {}s", timeout.as_secs()));
                    self.fail(session, sink, &e.to_string()).await;
                    return StepOutcome::Finished;
                }
            },
        };

        let Thought { text, action } = thought;
        sink.emit(AgentEvent::Thought {
            session_id: sid.clone(),
            step,
            content: text.clone(),
        })
        .await;

        let action = action.map(|mut a| {
            if a.id.is_empty() {
                a.id = fallback_call_id(&sid, step);
            }
            a
        });

        let mut entry = MessageEntry::assistant(text.as_str())
            .with_meta(meta::STEP, step)
            .with_meta(meta::TYPE, "thought");
        if let Some(a) = &action {
            entry = entry
                .with_meta(meta::TOOL_CALL_ID, a.id.as_str())
                .with_meta(meta::TOOL_CALL_NAME, a.name.as_str())
                .with_meta(meta::TOOL_CALL_ARGS, a.arguments.as_str());
        }
        session.add_message(entry);
        self.sessions.persist(&sid).await;

        let Some(action) = action else {
            sink.emit(AgentEvent::Message {
                session_id: sid.clone(),
                content: text,
            })
            .await;
            session.set_status(SessionStatus::Completed);
            self.sessions.persist(&sid).await;
            info!(session_id = %sid, steps = step, "Run completed");
            sink.emit(AgentEvent::Done { session_id: sid }).await;
            return StepOutcome::Finished;
        };

        sink.emit(AgentEvent::ToolCall {
            session_id: sid.clone(),
            step,
            tool_name: action.name.clone(),
            tool_args: action.arguments.clone(),
        })
        .await;

        if let Some(p) = persona.filter(|p| !p.allows(&action.name)) {
            warn!(session_id = %sid, step, tool = %action.name, persona = %p.id, "Tool outside persona allowlist");
            let result = ToolResult::failure(format!(
                "Tool \"{}\" is not available for the {} persona",
                action.name, p.name
            ));
            self.refuse_call(session, sink, step, &action, result, Some("persona_filter"))
                .await;
            return StepOutcome::Continue;
        }

        let Some(tool) = self.tools.get(&action.name) else {
            warn!(session_id = %sid, step, tool = %action.name, "Model called an unknown tool");
            let result = ToolResult::from_error(&ToolError::NotFound(action.name.clone()));
            self.refuse_call(session, sink, step, &action, result, None).await;
            return StepOutcome::Continue;
        };

        if tool.requires_confirmation() {
            let pending = PendingAction {
                action_id: format!("action_{sid}_{step}"),
                tool_name: action.name.clone(),
                tool_args: action.arguments.clone(),
                step,
                tool_call_id: action.id.clone(),
            };
            if let Err(e) = session.set_pending_action(pending.clone()) {
                self.fail(session, sink, &e.to_string()).await;
                return StepOutcome::Finished;
            }
            self.sessions.persist(&sid).await;
            info!(session_id = %sid, step, tool = %action.name, action_id = %pending.action_id, "Awaiting confirmation");
            sink.emit(AgentEvent::ConfirmationRequired {
                session_id: sid,
                step,
                tool_name: action.name.clone(),
                tool_args: action.arguments,
                action_id: pending.action_id,
                content: format!(
                    "The agent wants to execute \"{}\". Please approve or reject.",
                    action.name
                ),
            })
            .await;
            return StepOutcome::Finished;
        }

        let ctx = tool_context(session, &action.id, persona, cancel.child_token());
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.fail(session, sink, "cancelled").await;
                return StepOutcome::Finished;
            }
            result = self.execute_tool(&ctx, &action.name, &action.arguments) => result,
        };

        sink.emit(AgentEvent::ToolResult {
            session_id: sid.clone(),
            step,
            tool_name: action.name.clone(),
            tool_result: result.clone(),
            affected_resource: AffectedResource::resolve(&action.name),
        })
        .await;
        self.record_execution(session, step, &action, &result, false);
        self.sessions.persist(&sid).await;
        StepOutcome::Continue
    }

    async fn execute_tool(&self, ctx: &ToolContext, name: &str, raw_args: &str) -> ToolResult {
        let timeout = self.config.step_timeout;
        let arguments = parse_arguments(raw_args);
        let started = std::time::Instant::now();
        let result = match tokio::time::timeout(timeout, self.tools.execute(ctx, name, arguments)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(session_id = %ctx.session_id, tool = name, error = %e, "Tool execution failed");
                ToolResult::from_error(&e)
            }
            Err(_) => {
                ctx.cancellation.cancel();
                warn!(session_id = %ctx.session_id, tool = name, "Tool timed out");
                ToolResult::from_error(&ToolError::Timeout {
                    tool_name: name.to_string(),
                    timeout_secs: timeout.as_secs(),
                })
            }
        };
        debug!(
            session_id = %ctx.session_id,
            tool = name,
            success = result.success,
            duration_ms = started.elapsed().as_millis() as u64,
            "Tool executed"
        );
        result
    }

    /// Append the tool message and the tool-call record for an executed call.
    fn record_execution(
        &self,
        session: &Session,
        step: u32,
        action: &ToolAction,
        result: &ToolResult,
        confirmed: bool,
    ) {
        let mut entry = MessageEntry::tool(result.observation())
            .with_meta(meta::TOOL, action.name.as_str())
            .with_meta(meta::SUCCESS, result.success)
            .with_meta(meta::STEP, step)
            .with_meta(meta::TOOL_CALL_ID, action.id.as_str());
        if confirmed {
            entry = entry.with_meta(meta::CONFIRMED, true);
        }
        session.add_message(entry);
        session.add_tool_call(ToolCallRecord {
            step,
            tool_name: action.name.clone(),
            tool_call_id: action.id.clone(),
            args: action.arguments.clone(),
            result: result.clone(),
            timestamp: Utc::now(),
        });
    }

    /// Answer a call that was never executed. No tool-call record is kept.
    async fn refuse_call(
        &self,
        session: &Session,
        sink: &EventSink,
        step: u32,
        action: &ToolAction,
        result: ToolResult,
        reason: Option<&str>,
    ) {
        let mut entry = MessageEntry::tool(result.observation())
            .with_meta(meta::TOOL, action.name.as_str())
            .with_meta(meta::ERROR, true)
            .with_meta(meta::STEP, step)
            .with_meta(meta::TOOL_CALL_ID, action.id.as_str());
        if let Some(reason) = reason {
            entry = entry.with_meta(meta::REASON, reason);
        }
        session.add_message(entry);
        self.sessions.persist(session.id()).await;
        sink.emit(AgentEvent::ToolResult {
            session_id: session.id().to_string(),
            step,
            tool_name: action.name.clone(),
            tool_result: result,
            affected_resource: None,
        })
        .await;
    }

    async fn fail(&self, session: &Session, sink: &EventSink, error: &str) {
        warn!(session_id = %session.id(), error, "Run failed");
        session.set_status(SessionStatus::Failed);
        self.sessions.persist(session.id()).await;
        sink.emit(AgentEvent::Error {
            session_id: session.id().to_string(),
            error: error.to_string(),
        })
        .await;
    }
}

impl std::fmt::Debug for AgentEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentEngine")
            .field("config", &self.config)
            .field("tools", &self.tools.names())
            .field("adapter", &self.adapter)
            .finish()
    }
}

fn build_adapter(config: &EngineConfig, provider: Option<Arc<dyn Provider>>) -> LlmAdapter {
    let adapter =
        LlmAdapter::new(config.llm.clone()).with_sampling(config.temperature, config.max_tokens);
    match provider {
        Some(provider) => adapter.with_provider(provider),
        None => adapter,
    }
}

fn tool_context(
    session: &Session,
    tool_call_id: &str,
    persona: Option<&Persona>,
    cancellation: CancellationToken,
) -> ToolContext {
    ToolContext::new(session.id(), session.workspace_id(), session.user_id())
        .with_tool_call_id(tool_call_id)
        .with_tool_filter(persona.map(|p| p.tool_filter.clone()).unwrap_or_default())
        .with_cancellation(cancellation)
}

/// Id for a tool call the model left unnamed: `call_<sid[:8]>_<step>_0`.
fn fallback_call_id(session_id: &str, step: u32) -> String {
    let prefix: String = session_id.chars().take(8).collect();
    format!("call_{prefix}_{step}_0")
}

/// Model arguments as JSON; text that does not parse is passed through as a string.
fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(serde_json::Map::new());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Shape the session log into the provider conversation.
///
/// Assistant entries regain their tool call from metadata, but only when a
/// tool entry answers it; tool entries without a call id are dropped.
pub fn provider_messages(system_prompt: String, history: &[MessageEntry]) -> Vec<Message> {
    let answered: HashSet<&str> = history
        .iter()
        .filter(|e| e.role == Role::Tool)
        .filter_map(MessageEntry::tool_call_id)
        .collect();

    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(Message::system(system_prompt));
    for entry in history {
        match entry.role {
            Role::User => messages.push(Message::user(entry.content.as_str())),
            Role::System => messages.push(Message::system(entry.content.as_str())),
            Role::Assistant => {
                let mut msg = Message::assistant(entry.content.as_str());
                if let Some(id) = entry.tool_call_id().filter(|id| answered.contains(id)) {
                    msg.tool_calls.push(MessageToolCall {
                        id: id.to_string(),
                        name: entry.tool_call_name().unwrap_or_default().to_string(),
                        arguments: entry.tool_call_args().unwrap_or("{}").to_string(),
                    });
                }
                messages.push(msg);
            }
            Role::Tool => match entry.tool_call_id() {
                Some(id) => messages.push(Message::tool_result(id, entry.content.as_str())),
                None => debug!("Dropping tool entry without a call id"),
            },
        }
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use serde_json::json;
    use weaver_core::session::{Plan, PlanStatus, PlanStep, StepStatus};

    struct Harness {
        engine: AgentEngine,
        provider: Arc<SequentialMockProvider>,
        sessions: Arc<SessionStore>,
    }

    fn harness(provider: SequentialMockProvider, tools: Vec<Arc<dyn weaver_core::Tool>>) -> Harness {
        harness_with(provider, tools, EngineConfig::default())
    }

    fn harness_with(
        provider: SequentialMockProvider,
        tools: Vec<Arc<dyn weaver_core::Tool>>,
        config: EngineConfig,
    ) -> Harness {
        let sessions = Arc::new(SessionStore::new());
        let registry = ToolRegistry::new();
        for tool in tools {
            registry.register(tool).unwrap();
        }
        let provider = Arc::new(provider);
        let engine = AgentEngine::new(config, Arc::new(registry), sessions.clone())
            .with_provider(provider.clone());
        Harness {
            engine,
            provider,
            sessions,
        }
    }

    async fn collect(mut rx: mpsc::Receiver<AgentEvent>) -> Vec<AgentEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    fn types(events: &[AgentEvent]) -> Vec<&'static str> {
        events.iter().map(AgentEvent::event_type).collect()
    }

    fn request(message: &str) -> RunRequest {
        RunRequest::new("sess-12345678", "ws-1", "user-1", message)
    }

    async fn executing_session(sessions: &SessionStore, sid: &str) -> Arc<Session> {
        let session = sessions.get_or_create(sid, "ws-1", "user-1", None).await;
        session.set_plan(Plan {
            title: "Staff".into(),
            status: PlanStatus::Draft,
            summary: None,
            groups: vec![],
            steps: vec![PlanStep {
                id: "s1".into(),
                description: "make table".into(),
                tool: None,
                status: StepStatus::Pending,
                note: None,
                group_id: None,
            }],
        });
        assert!(session.confirm_plan());
        session
    }

    #[tokio::test]
    async fn final_answer_completes_run() {
        let h = harness(SequentialMockProvider::single_text("Hello there"), vec![]);
        let events = collect(h.engine.run(request("hi"), CancellationToken::new())).await;

        assert_eq!(types(&events), vec!["thought", "message", "done"]);
        let session = h.sessions.get("sess-12345678").await.unwrap();
        assert_eq!(session.status(), SessionStatus::Completed);
        let log = session.messages();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].role, Role::User);
        assert_eq!(log[1].content, "Hello there");
        assert_eq!(log[1].metadata.get(meta::TYPE), Some(&json!("thought")));
    }

    #[tokio::test]
    async fn tool_step_feeds_observation_back() {
        let tool = Arc::new(RecordingTool::new("get_workspace_info", "2 tables"));
        let provider = SequentialMockProvider::tool_then_answer(
            make_tool_call("get_workspace_info", json!({"verbose": true})),
            "Let me look.",
            "You have 2 tables.",
        );
        let h = harness(provider, vec![tool.clone()]);
        let events = collect(h.engine.run(request("what tables do I have?"), CancellationToken::new())).await;

        assert_eq!(
            types(&events),
            vec!["thought", "tool_call", "tool_result", "thought", "message", "done"]
        );
        let calls = tool.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, json!({"verbose": true}));
        assert_eq!(calls[0].0.tool_call_id, "call_get_workspace_info");
        assert_eq!(calls[0].0.workspace_id, "ws-1");

        let session = h.sessions.get("sess-12345678").await.unwrap();
        let records = session.tool_calls();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].step, 1);
        assert!(records[0].result.success);

        let requests = h.provider.requests();
        let second = &requests[1].messages;
        let tool_msg = second.iter().find(|m| m.role == Role::Tool).unwrap();
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call_get_workspace_info"));
        assert_eq!(tool_msg.content, "2 tables");
        let asst = second.iter().find(|m| !m.tool_calls.is_empty()).unwrap();
        assert_eq!(asst.tool_calls[0].name, "get_workspace_info");
    }

    #[tokio::test]
    async fn unknown_tool_is_an_observation_not_a_failure() {
        let provider = SequentialMockProvider::tool_then_answer(
            make_tool_call("no_such_tool", json!({})),
            "",
            "Sorry.",
        );
        let h = harness(provider, vec![]);
        let events = collect(h.engine.run(request("do it"), CancellationToken::new())).await;

        assert_eq!(
            types(&events),
            vec!["thought", "tool_call", "tool_result", "thought", "message", "done"]
        );
        match &events[2] {
            AgentEvent::ToolResult { tool_result, .. } => {
                assert!(!tool_result.success);
                assert_eq!(tool_result.error, "unknown tool: no_such_tool");
            }
            other => panic!("unexpected event {other:?}"),
        }
        let session = h.sessions.get("sess-12345678").await.unwrap();
        assert!(session.tool_calls().is_empty());
        let tool_entry = session.messages().into_iter().find(|m| m.role == Role::Tool).unwrap();
        assert!(tool_entry.flag(meta::ERROR));
        assert_eq!(tool_entry.tool_call_id(), Some("call_no_such_tool"));
    }

    #[tokio::test]
    async fn zero_max_steps_emits_single_error() {
        let h = harness_with(
            SequentialMockProvider::new(vec![]),
            vec![],
            EngineConfig::default().with_max_steps(0),
        );
        let events = collect(h.engine.run(request("hi"), CancellationToken::new())).await;

        assert_eq!(types(&events), vec!["error"]);
        assert_eq!(h.provider.call_count(), 0);
        let session = h.sessions.get("sess-12345678").await.unwrap();
        assert_eq!(session.status(), SessionStatus::Failed);
    }

    #[tokio::test]
    async fn exhausting_steps_fails_the_session() {
        let tool = Arc::new(RecordingTool::new("get_workspace_info", "ok"));
        let provider = SequentialMockProvider::new(vec![
            make_tool_call_response(make_tool_call("get_workspace_info", json!({})), "one"),
            make_tool_call_response(make_tool_call("get_workspace_info", json!({})), "two"),
        ]);
        let h = harness_with(provider, vec![tool], EngineConfig::default().with_max_steps(2));
        let events = collect(h.engine.run(request("loop"), CancellationToken::new())).await;

        let thoughts = events.iter().filter(|e| e.event_type() == "thought").count();
        assert_eq!(thoughts, 2);
        match events.last().unwrap() {
            AgentEvent::Error { error, .. } => {
                assert_eq!(error, "Agent reached maximum steps (2) without completing");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn provider_error_fails_the_run() {
        let provider = SequentialMockProvider::failing(ProviderError::ApiError {
            status_code: 500,
            message: "boom".into(),
        });
        let h = harness(provider, vec![]);
        let events = collect(h.engine.run(request("hi"), CancellationToken::new())).await;

        assert_eq!(types(&events), vec!["error"]);
        match &events[0] {
            AgentEvent::Error { error, .. } => assert!(error.contains("boom")),
            other => panic!("unexpected event {other:?}"),
        }
        let session = h.sessions.get("sess-12345678").await.unwrap();
        assert_eq!(session.status(), SessionStatus::Failed);
    }

    #[tokio::test]
    async fn slow_provider_hits_step_timeout() {
        let provider =
            SequentialMockProvider::single_text("late").with_delay(Duration::from_millis(200));
        let h = harness_with(
            provider,
            vec![],
            EngineConfig::default().with_step_timeout(Duration::from_millis(20)),
        );
        let events = collect(h.engine.run(request("hi"), CancellationToken::new())).await;

        assert_eq!(types(&events), vec!["error"]);
        match &events[0] {
            AgentEvent::Error { error, .. } => assert!(error.contains("timed out")),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn pre_cancelled_run_reports_cancelled() {
        let h = harness(SequentialMockProvider::single_text("never"), vec![]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let events = collect(h.engine.run(request("hi"), cancel)).await;

        assert_eq!(
            events,
            vec![AgentEvent::Error {
                session_id: "sess-12345678".into(),
                error: "cancelled".into(),
            }]
        );
        assert_eq!(h.provider.call_count(), 0);
    }

    #[tokio::test]
    async fn cancelling_during_a_tool_call_ends_the_run() {
        let provider = SequentialMockProvider::new(vec![make_tool_call_response(
            make_tool_call("wait_forever", json!({})),
            "waiting",
        )]);
        let h = harness(provider, vec![Arc::new(BlockingTool)]);
        let sid = "sess-blocking";
        executing_session(&h.sessions, sid).await;
        let cancel = CancellationToken::new();
        let mut rx = h
            .engine
            .run(RunRequest::new(sid, "ws-1", "user-1", "go"), cancel.clone());

        let mut seen = Vec::new();
        while let Some(event) = rx.recv().await {
            let is_call = event.event_type() == "tool_call";
            seen.push(event);
            if is_call {
                cancel.cancel();
            }
        }

        assert_eq!(types(&seen), vec!["thought", "tool_call", "error"]);
        let session = h.sessions.get(sid).await.unwrap();
        assert_eq!(session.status(), SessionStatus::Failed);
        assert!(session.tool_calls().is_empty());
    }

    #[tokio::test]
    async fn cancelled_run_leaves_confirmed_plan_untouched() {
        let h = harness(SequentialMockProvider::single_text("never"), vec![]);
        let sid = "sess-precancel";
        let session = executing_session(&h.sessions, sid).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let events = collect(h.engine.run(RunRequest::new(sid, "ws-1", "user-1", "go"), cancel)).await;

        assert_eq!(types(&events), vec!["error"]);
        assert_eq!(session.phase(), SessionPhase::Confirmed);
        assert_eq!(session.plan().unwrap().status, PlanStatus::Confirmed);
        assert!(session.messages().is_empty());
        assert_eq!(session.status(), SessionStatus::Failed);

        let token = CancellationToken::new();
        token.cancel();
        let fresh = collect(h.engine.run(request("build a crm"), token)).await;
        assert_eq!(types(&fresh), vec!["error"]);
        let planning = h.sessions.get("sess-12345678").await.unwrap();
        assert_eq!(planning.complexity_hint(), ComplexityHint::Unset);
        assert!(planning.messages().is_empty());
    }

    #[tokio::test]
    async fn slow_tool_times_out_and_the_run_continues() {
        let provider = SequentialMockProvider::tool_then_answer(
            make_tool_call("wait_forever", json!({})),
            "waiting",
            "The tool did not answer in time.",
        );
        let h = harness_with(
            provider,
            vec![Arc::new(BlockingTool)],
            EngineConfig::default().with_step_timeout(Duration::from_millis(50)),
        );
        let sid = "sess-slow-tool";
        executing_session(&h.sessions, sid).await;

        let events = collect(
            h.engine
                .run(RunRequest::new(sid, "ws-1", "user-1", "go"), CancellationToken::new()),
        )
        .await;

        assert_eq!(
            types(&events),
            vec!["thought", "tool_call", "tool_result", "thought", "message", "done"]
        );
        match &events[2] {
            AgentEvent::ToolResult { tool_name, tool_result, .. } => {
                assert_eq!(tool_name, "wait_forever");
                assert!(!tool_result.success);
                assert!(tool_result.error.contains("timed out"), "{}", tool_result.error);
            }
            other => panic!("unexpected event {other:?}"),
        }

        let session = h.sessions.get(sid).await.unwrap();
        assert_eq!(session.status(), SessionStatus::Completed);
        let records = session.tool_calls();
        assert_eq!(records.len(), 1);
        assert!(!records[0].result.success);
        assert_eq!(records[0].tool_call_id, "call_wait_forever");

        let requests = h.provider.requests();
        let observation = requests[1]
            .messages
            .iter()
            .find(|m| m.role == Role::Tool)
            .unwrap();
        assert!(observation.content.contains("timed out"));
    }

    #[tokio::test]
    async fn confirm_during_an_active_run_is_refused() {
        let provider = SequentialMockProvider::new(vec![make_tool_call_response(
            make_tool_call("wait_forever", json!({})),
            "waiting",
        )]);
        let h = harness(provider, vec![Arc::new(BlockingTool)]);
        let sid = "sess-busy";
        executing_session(&h.sessions, sid).await;
        let cancel = CancellationToken::new();
        let mut rx = h
            .engine
            .run(RunRequest::new(sid, "ws-1", "user-1", "go"), cancel.clone());

        while let Some(event) = rx.recv().await {
            if event.event_type() == "tool_call" {
                break;
            }
        }
        let session = h.sessions.get(sid).await.unwrap();
        assert_eq!(session.status(), SessionStatus::Running);

        let err = h
            .engine
            .confirm(sid, &format!("action_{sid}_1"), true, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoPendingAction(_)));
        assert_eq!(session.status(), SessionStatus::Running);
        assert!(session.tool_calls().is_empty());

        cancel.cancel();
        let rest = collect(rx).await;
        assert_eq!(types(&rest), vec!["error"]);
        assert_eq!(session.status(), SessionStatus::Failed);
    }

    #[tokio::test]
    async fn confirm_plan_promotes_a_draft_only_once() {
        let h = harness(SequentialMockProvider::single_text("Executing."), vec![]);
        let sid = "sess-plan";
        assert!(matches!(
            h.engine.confirm_plan(sid).await,
            Err(Error::SessionNotFound(_))
        ));

        let session = h.sessions.get_or_create(sid, "ws-1", "user-1", None).await;
        assert!(matches!(h.engine.confirm_plan(sid).await, Err(Error::NotFound(_))));

        session.set_plan(Plan {
            title: "Staff".into(),
            status: PlanStatus::Draft,
            summary: None,
            groups: vec![],
            steps: vec![PlanStep {
                id: "s1".into(),
                description: "make table".into(),
                tool: None,
                status: StepStatus::Pending,
                note: None,
                group_id: None,
            }],
        });
        let plan = h.engine.confirm_plan(sid).await.unwrap();
        assert_eq!(plan.status, PlanStatus::Confirmed);
        assert_eq!(session.phase(), SessionPhase::Confirmed);

        let err = h.engine.confirm_plan(sid).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "validation failed: plan \"Staff\" is confirmed, only a draft can be confirmed"
        );

        collect(
            h.engine
                .run(RunRequest::new(sid, "ws-1", "user-1", "go"), CancellationToken::new()),
        )
        .await;
        assert_eq!(session.phase(), SessionPhase::Executing);
        assert_eq!(session.plan().unwrap().status, PlanStatus::InProgress);
    }

    #[tokio::test]
    async fn confirmation_gate_parks_the_call() {
        let tool = Arc::new(RecordingTool::new("delete_table", "dropped").requiring_confirmation());
        let provider = SequentialMockProvider::new(vec![make_tool_call_response(
            make_tool_call("delete_table", json!({"table": "staff"})),
            "Removing the table.",
        )]);
        let h = harness(provider, vec![tool.clone()]);
        let sid = "sess-confirm";
        executing_session(&h.sessions, sid).await;

        let events = collect(
            h.engine
                .run(RunRequest::new(sid, "ws-1", "user-1", "drop staff"), CancellationToken::new()),
        )
        .await;

        assert_eq!(types(&events), vec!["thought", "tool_call", "confirmation_required"]);
        match &events[2] {
            AgentEvent::ConfirmationRequired { action_id, content, .. } => {
                assert_eq!(action_id, "action_sess-confirm_1");
                assert_eq!(
                    content,
                    "The agent wants to execute \"delete_table\". Please approve or reject."
                );
            }
            other => panic!("unexpected event {other:?}"),
        }
        let session = h.sessions.get(sid).await.unwrap();
        assert_eq!(session.status(), SessionStatus::Paused);
        assert!(session.tool_calls().is_empty());
        assert!(tool.calls().is_empty());

        // a second run is refused while the action is pending
        let events = collect(
            h.engine
                .run(RunRequest::new(sid, "ws-1", "user-1", "again"), CancellationToken::new()),
        )
        .await;
        assert_eq!(
            events,
            vec![AgentEvent::Error {
                session_id: sid.into(),
                error: "session is awaiting confirmation of action action_sess-confirm_1".into(),
            }]
        );
        assert_eq!(session.status(), SessionStatus::Paused);

        let outcome = h
            .engine
            .confirm(sid, "action_sess-confirm_1", true, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, ConfirmOutcome::Executed(ToolResult::ok("dropped")));
        assert_eq!(tool.calls()[0].1, json!({"table": "staff"}));
        assert_eq!(session.status(), SessionStatus::Completed);
        assert!(session.pending_action().is_none());
        let last = session.messages().pop().unwrap();
        assert_eq!(last.role, Role::Tool);
        assert!(last.flag(meta::CONFIRMED));
        assert!(last.flag(meta::SUCCESS));
        assert_eq!(last.tool_call_id(), Some("call_delete_table"));
        assert_eq!(session.tool_calls()[0].step, 1);
    }

    #[tokio::test]
    async fn rejection_records_refusal_without_executing() {
        let tool = Arc::new(RecordingTool::new("delete_table", "dropped").requiring_confirmation());
        let provider = SequentialMockProvider::new(vec![make_tool_call_response(
            make_tool_call("delete_table", json!({})),
            "",
        )]);
        let h = harness(provider, vec![tool.clone()]);
        let sid = "sess-reject";
        executing_session(&h.sessions, sid).await;
        collect(
            h.engine
                .run(RunRequest::new(sid, "ws-1", "user-1", "drop"), CancellationToken::new()),
        )
        .await;

        let outcome = h
            .engine
            .confirm(sid, "action_sess-reject_1", false, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, ConfirmOutcome::Rejected);
        assert!(tool.calls().is_empty());

        let session = h.sessions.get(sid).await.unwrap();
        assert_eq!(session.status(), SessionStatus::Completed);
        assert!(session.tool_calls().is_empty());
        let last = session.messages().pop().unwrap();
        assert_eq!(last.content, "User rejected the \"delete_table\" operation.");
        assert!(last.flag(meta::REJECTED));
        assert!(!last.flag(meta::SUCCESS));
    }

    #[tokio::test]
    async fn confirm_errors_leave_state_untouched() {
        let tool = Arc::new(RecordingTool::new("delete_table", "dropped").requiring_confirmation());
        let provider = SequentialMockProvider::new(vec![make_tool_call_response(
            make_tool_call("delete_table", json!({})),
            "",
        )]);
        let h = harness(provider, vec![tool]);
        let sid = "sess-stale";
        executing_session(&h.sessions, sid).await;
        collect(
            h.engine
                .run(RunRequest::new(sid, "ws-1", "user-1", "drop"), CancellationToken::new()),
        )
        .await;
        let token = CancellationToken::new();

        let err = h.engine.confirm("missing", "x", true, &token).await.unwrap_err();
        assert!(matches!(err, Error::SessionNotFound(_)));

        let err = h.engine.confirm(sid, "action_other", true, &token).await.unwrap_err();
        assert_eq!(err.to_string(), "no pending action with ID action_other");

        let session = h.sessions.get(sid).await.unwrap();
        assert_eq!(session.status(), SessionStatus::Paused);
        assert!(session.pending_action().is_some());
    }

    #[tokio::test]
    async fn cancel_clears_pending_and_fails() {
        let tool = Arc::new(RecordingTool::new("delete_table", "dropped").requiring_confirmation());
        let provider = SequentialMockProvider::new(vec![
            make_tool_call_response(make_tool_call("delete_table", json!({})), ""),
            make_text_response("Starting over."),
        ]);
        let h = harness(provider, vec![tool]);
        let sid = "sess-cancel";
        executing_session(&h.sessions, sid).await;
        collect(
            h.engine
                .run(RunRequest::new(sid, "ws-1", "user-1", "drop"), CancellationToken::new()),
        )
        .await;

        h.engine.cancel(sid).await.unwrap();
        let session = h.sessions.get(sid).await.unwrap();
        assert_eq!(session.status(), SessionStatus::Failed);
        assert!(session.pending_action().is_none());

        assert!(matches!(
            h.engine.cancel("missing").await,
            Err(Error::SessionNotFound(_))
        ));

        // the unanswered call is not replayed to the provider
        let events = collect(
            h.engine
                .run(RunRequest::new(sid, "ws-1", "user-1", "never mind"), CancellationToken::new()),
        )
        .await;
        assert_eq!(types(&events), vec!["thought", "message", "done"]);
        let last = h.provider.requests().pop().unwrap();
        assert!(last.messages.iter().all(|m| m.tool_calls.is_empty()));
    }

    #[tokio::test]
    async fn persona_allowlist_is_enforced_at_execution() {
        let tool = Arc::new(RecordingTool::new("create_table", "created"));
        let provider = SequentialMockProvider::tool_then_answer(
            make_tool_call("create_table", json!({"table_name": "x"})),
            "",
            "Cannot do that.",
        );
        let h = harness(provider, vec![tool.clone()]);
        let personas = Arc::new(PersonaRegistry::new());
        personas
            .register(Persona::new("reader", "Reader", "Reads data").with_tools(&["query_data"]))
            .unwrap();
        let engine = h.engine.clone().with_personas(personas);

        let sid = "sess-persona";
        h.sessions.get_or_create(sid, "ws-1", "user-1", Some("reader")).await;
        let events = collect(
            engine.run(RunRequest::new(sid, "ws-1", "user-1", "make a table"), CancellationToken::new()),
        )
        .await;

        match &events[2] {
            AgentEvent::ToolResult { tool_result, .. } => {
                assert_eq!(
                    tool_result.error,
                    "Tool \"create_table\" is not available for the Reader persona"
                );
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(tool.calls().is_empty());
        let session = h.sessions.get(sid).await.unwrap();
        assert!(session.tool_calls().is_empty());
        let refusal = session.messages().into_iter().find(|m| m.role == Role::Tool).unwrap();
        assert_eq!(refusal.metadata.get(meta::REASON), Some(&json!("persona_filter")));
        assert!(h.provider.requests()[0].tools.is_empty());
    }

    #[tokio::test]
    async fn planning_phase_limits_visible_tools() {
        let tools: Vec<Arc<dyn weaver_core::Tool>> = vec![
            Arc::new(RecordingTool::new("create_plan", "ok")),
            Arc::new(RecordingTool::new("create_table", "ok")),
            Arc::new(RecordingTool::new("query_data", "ok")),
        ];
        let h = harness(SequentialMockProvider::single_text("Let's plan."), tools);
        collect(h.engine.run(request("build me a CRM"), CancellationToken::new())).await;

        let names: Vec<String> = h.provider.requests()[0]
            .tools
            .iter()
            .map(|t| t.name.clone())
            .collect();
        assert_eq!(names, vec!["create_plan", "query_data"]);

        let session = h.sessions.get("sess-12345678").await.unwrap();
        assert!(!h.engine.visible_tools(&session, None).iter().any(|t| t.name == "create_table"));
        session.advance_phase(SessionPhase::Executing);
        assert_eq!(h.engine.visible_tools(&session, None).len(), 3);
    }

    #[tokio::test]
    async fn missing_call_id_is_fabricated() {
        let mut call = make_tool_call("get_workspace_info", json!({}));
        call.id = String::new();
        let provider = SequentialMockProvider::tool_then_answer(call, "", "done");
        let h = harness(provider, vec![Arc::new(RecordingTool::new("get_workspace_info", "ok"))]);
        collect(h.engine.run(request("info"), CancellationToken::new())).await;

        let session = h.sessions.get("sess-12345678").await.unwrap();
        let ids: Vec<String> = session
            .messages()
            .iter()
            .filter_map(|m| m.tool_call_id().map(str::to_string))
            .collect();
        assert_eq!(ids, vec!["call_sess-123_1_0", "call_sess-123_1_0"]);
    }

    #[tokio::test]
    async fn long_runs_are_compacted_between_steps() {
        let provider = SequentialMockProvider::tool_then_answer(
            make_tool_call("get_workspace_info", json!({})),
            "checking",
            "done",
        );
        let h = harness_with(
            provider,
            vec![Arc::new(RecordingTool::new("get_workspace_info", "ok"))],
            EngineConfig::default().with_compaction(6, 3),
        );
        let session = h
            .sessions
            .get_or_create("sess-12345678", "ws-1", "user-1", None)
            .await;
        for i in 0..5 {
            session.add_message(MessageEntry::user(format!("question {i}")));
            session.add_message(MessageEntry::assistant(format!("answer {i}")));
        }

        let events = collect(h.engine.run(request("more"), CancellationToken::new())).await;
        assert_eq!(types(&events).last(), Some(&"done"));

        let log = session.messages();
        assert!(log[0].is_compaction_summary());
        assert_eq!(log.len(), 6);
        let requests = h.provider.requests();
        assert!(requests[1].messages[1].content.starts_with("[Conversation summary:"));
    }

    #[tokio::test]
    async fn confirmed_plan_enters_execution_before_llm_call() {
        let h = harness(SequentialMockProvider::single_text("Executing."), vec![]);
        let sid = "sess-exec";
        executing_session(&h.sessions, sid).await;
        collect(
            h.engine
                .run(RunRequest::new(sid, "ws-1", "user-1", "go"), CancellationToken::new()),
        )
        .await;

        let session = h.sessions.get(sid).await.unwrap();
        assert_eq!(session.phase(), SessionPhase::Executing);
        assert_eq!(session.plan().unwrap().status, PlanStatus::InProgress);
        assert_eq!(session.complexity_hint(), ComplexityHint::Unset);
        let requests = h.provider.requests();
        assert!(!requests[0].messages[0].content.contains("Step 2 — Ask Clarifying Questions"));
    }

    #[test]
    fn unanswered_tool_calls_are_not_replayed() {
        let history = vec![
            MessageEntry::user("go"),
            MessageEntry::assistant("calling")
                .with_meta(meta::TOOL_CALL_ID, "c1")
                .with_meta(meta::TOOL_CALL_NAME, "t")
                .with_meta(meta::TOOL_CALL_ARGS, "{}"),
            MessageEntry::tool("ok").with_meta(meta::TOOL_CALL_ID, "c1"),
            MessageEntry::assistant("again").with_meta(meta::TOOL_CALL_ID, "c2"),
            MessageEntry::tool("orphan"),
        ];
        let messages = provider_messages("sys".into(), &history);

        assert_eq!(messages.len(), 5);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[2].tool_calls.len(), 1);
        assert_eq!(messages[3].tool_call_id.as_deref(), Some("c1"));
        assert!(messages[4].tool_calls.is_empty());
    }

    #[test]
    fn arguments_fall_back_to_raw_string() {
        assert_eq!(parse_arguments(r#"{"a":1}"#), json!({"a": 1}));
        assert_eq!(parse_arguments("  "), json!({}));
        assert_eq!(parse_arguments("not json"), json!("not json"));
    }

    #[test]
    fn engine_config_follows_app_config() {
        let mut app = AppConfig::default();
        app.engine.max_steps = 5;
        app.engine.step_timeout_secs = 7;
        let config = EngineConfig::from_app_config(&app);
        assert_eq!(config.max_steps, 5);
        assert_eq!(config.step_timeout, Duration::from_secs(7));
        assert_eq!(config.event_buffer, 32);
    }
}
