//! Session domain model.
//!
//! A [`Session`] is the unit of agent state: lifecycle status, coarse phase,
//! the one-shot complexity hint, the message log, tool-call records, an
//! optional pending action, and an optional plan. Identity fields are
//! immutable; everything else sits behind the session's own reader/writer
//! lock. Readers always receive owned copies, so nothing handed out can be
//! used to mutate the live session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Error, Result};
use crate::message::MessageEntry;
use crate::tool::ToolResult;

/// Fine-grained runtime state of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Running,
    Paused,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Coarse agent lifecycle. Only ever moves forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    Planning,
    Confirmed,
    Executing,
    Completed,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Confirmed => "confirmed",
            Self::Executing => "executing",
            Self::Completed => "completed",
        }
    }
}

/// One-shot classification of the first planning message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityHint {
    #[default]
    Unset,
    Complex,
    Simple,
    Question,
}

impl ComplexityHint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unset => "",
            Self::Complex => "complex",
            Self::Simple => "simple",
            Self::Question => "question",
        }
    }
}

macro_rules! display_via_as_str {
    ($($ty:ty),*) => {
        $(impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        })*
    };
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    #[default]
    Draft,
    Confirmed,
    InProgress,
    Completed,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Confirmed => "confirmed",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Completed and failed steps both count as finished for auto-completion.
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::str::FromStr for StepStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(Error::Validation(format!(
                "invalid step status \"{other}\" (expected pending, in_progress, completed or failed)"
            ))),
        }
    }
}

display_via_as_str!(SessionStatus, SessionPhase, ComplexityHint, PlanStatus, StepStatus);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanGroup {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub description: String,
    /// Tool the agent expects to use for this step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default)]
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
}

/// A structured list of steps shown to the user as a to-do list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub title: String,
    #[serde(default)]
    pub status: PlanStatus,
    /// Requirements summary gathered during planning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub groups: Vec<PlanGroup>,
    #[serde(default)]
    pub steps: Vec<PlanStep>,
}

/// Step counts used by the prompt context section.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanProgress {
    pub completed: usize,
    pub in_progress: usize,
    pub failed: usize,
    pub total: usize,
}

impl Plan {
    pub fn progress(&self) -> PlanProgress {
        let mut p = PlanProgress {
            total: self.steps.len(),
            ..PlanProgress::default()
        };
        for step in &self.steps {
            match step.status {
                StepStatus::Completed => p.completed += 1,
                StepStatus::InProgress => p.in_progress += 1,
                StepStatus::Failed => p.failed += 1,
                StepStatus::Pending => {}
            }
        }
        p
    }

    pub fn all_steps_finished(&self) -> bool {
        !self.steps.is_empty() && self.steps.iter().all(|s| s.status.is_finished())
    }
}

/// A serialized, not-yet-executed tool call awaiting human approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    pub action_id: String,
    pub tool_name: String,
    /// Raw JSON arguments as produced by the model.
    pub tool_args: String,
    pub step: u32,
    /// Id of the assistant tool call this action answers.
    #[serde(default)]
    pub tool_call_id: String,
}

/// One executed tool call. Append-only within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub step: u32,
    pub tool_name: String,
    #[serde(default)]
    pub tool_call_id: String,
    pub args: String,
    pub result: ToolResult,
    pub timestamp: DateTime<Utc>,
}

/// A point-in-time copy of a whole session, used for persistence and
/// for handing state to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub workspace_id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona_id: Option<String>,
    pub status: SessionStatus,
    pub phase: SessionPhase,
    #[serde(default)]
    pub complexity_hint: ComplexityHint,
    #[serde(default)]
    pub messages: Vec<MessageEntry>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_action: Option<PendingAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug)]
struct SessionState {
    status: SessionStatus,
    phase: SessionPhase,
    complexity_hint: ComplexityHint,
    messages: Vec<MessageEntry>,
    tool_calls: Vec<ToolCallRecord>,
    pending_action: Option<PendingAction>,
    plan: Option<Plan>,
    updated_at: DateTime<Utc>,
}

impl SessionState {
    fn touch(&mut self) {
        self.updated_at = Utc::now().max(self.updated_at);
    }
}

/// A live agent session. Shared as `Arc<Session>` by the session store.
#[derive(Debug)]
pub struct Session {
    id: String,
    workspace_id: String,
    user_id: String,
    persona_id: Option<String>,
    created_at: DateTime<Utc>,
    state: RwLock<SessionState>,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        workspace_id: impl Into<String>,
        user_id: impl Into<String>,
        persona_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            workspace_id: workspace_id.into(),
            user_id: user_id.into(),
            persona_id: persona_id.filter(|p| !p.is_empty()),
            created_at: now,
            state: RwLock::new(SessionState {
                status: SessionStatus::Running,
                phase: SessionPhase::Planning,
                complexity_hint: ComplexityHint::Unset,
                messages: Vec::new(),
                tool_calls: Vec::new(),
                pending_action: None,
                plan: None,
                updated_at: now,
            }),
        }
    }

    /// Rebuild a live session from a persisted snapshot.
    pub fn from_snapshot(snapshot: SessionSnapshot) -> Self {
        Self {
            id: snapshot.id,
            workspace_id: snapshot.workspace_id,
            user_id: snapshot.user_id,
            persona_id: snapshot.persona_id,
            created_at: snapshot.created_at,
            state: RwLock::new(SessionState {
                status: snapshot.status,
                phase: snapshot.phase,
                complexity_hint: snapshot.complexity_hint,
                messages: snapshot.messages,
                tool_calls: snapshot.tool_calls,
                pending_action: snapshot.pending_action,
                plan: snapshot.plan,
                updated_at: snapshot.updated_at,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    // --- identity ---

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn persona_id(&self) -> Option<&str> {
        self.persona_id.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    // --- readers (owned copies) ---

    pub fn status(&self) -> SessionStatus {
        self.read().status
    }

    pub fn phase(&self) -> SessionPhase {
        self.read().phase
    }

    pub fn complexity_hint(&self) -> ComplexityHint {
        self.read().complexity_hint
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.read().updated_at
    }

    pub fn messages(&self) -> Vec<MessageEntry> {
        self.read().messages.clone()
    }

    pub fn message_count(&self) -> usize {
        self.read().messages.len()
    }

    pub fn tool_calls(&self) -> Vec<ToolCallRecord> {
        self.read().tool_calls.clone()
    }

    pub fn pending_action(&self) -> Option<PendingAction> {
        self.read().pending_action.clone()
    }

    pub fn plan(&self) -> Option<Plan> {
        self.read().plan.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.read();
        SessionSnapshot {
            id: self.id.clone(),
            workspace_id: self.workspace_id.clone(),
            user_id: self.user_id.clone(),
            persona_id: self.persona_id.clone(),
            status: state.status,
            phase: state.phase,
            complexity_hint: state.complexity_hint,
            messages: state.messages.clone(),
            tool_calls: state.tool_calls.clone(),
            pending_action: state.pending_action.clone(),
            plan: state.plan.clone(),
            created_at: self.created_at,
            updated_at: state.updated_at,
        }
    }

    // --- writers ---

    /// Set the lifecycle status.
    ///
    /// While a pending action exists the session stays paused; returns
    /// `false` when the change was refused for that reason.
    pub fn set_status(&self, status: SessionStatus) -> bool {
        let mut state = self.write();
        if state.pending_action.is_some() && status != SessionStatus::Paused {
            return false;
        }
        state.status = status;
        state.touch();
        true
    }

    /// Move the phase forward. Backward or same-phase moves are ignored.
    pub fn advance_phase(&self, phase: SessionPhase) -> bool {
        let mut state = self.write();
        if phase <= state.phase {
            return false;
        }
        state.phase = phase;
        state.touch();
        true
    }

    /// Store the complexity hint if none has been set yet.
    pub fn set_complexity_hint(&self, hint: ComplexityHint) -> bool {
        let mut state = self.write();
        if state.complexity_hint != ComplexityHint::Unset || hint == ComplexityHint::Unset {
            return false;
        }
        state.complexity_hint = hint;
        state.touch();
        true
    }

    pub fn add_message(&self, entry: MessageEntry) {
        let mut state = self.write();
        state.messages.push(entry);
        state.touch();
    }

    /// Swap the whole message log (used by compaction).
    pub fn replace_messages(&self, messages: Vec<MessageEntry>) {
        let mut state = self.write();
        state.messages = messages;
        state.touch();
    }

    pub fn add_tool_call(&self, record: ToolCallRecord) {
        let mut state = self.write();
        state.tool_calls.push(record);
        state.touch();
    }

    /// Park a tool call for confirmation and pause the session.
    pub fn set_pending_action(&self, action: PendingAction) -> Result<()> {
        let mut state = self.write();
        if let Some(existing) = &state.pending_action {
            return Err(Error::Validation(format!(
                "session {} already has pending action {}",
                self.id, existing.action_id
            )));
        }
        state.pending_action = Some(action);
        state.status = SessionStatus::Paused;
        state.touch();
        Ok(())
    }

    /// Remove and return the pending action if its id matches.
    /// Leaves the session untouched on mismatch.
    pub fn take_pending_action(&self, action_id: &str) -> Option<PendingAction> {
        let mut state = self.write();
        if state.pending_action.as_ref()?.action_id != action_id {
            return None;
        }
        state.touch();
        state.pending_action.take()
    }

    pub fn clear_pending_action(&self) -> Option<PendingAction> {
        let mut state = self.write();
        let taken = state.pending_action.take();
        if taken.is_some() {
            state.touch();
        }
        taken
    }

    pub fn set_plan(&self, plan: Plan) {
        let mut state = self.write();
        state.plan = Some(plan);
        state.touch();
    }

    /// Draft → confirmed, moving the phase to confirmed in the same write.
    pub fn confirm_plan(&self) -> bool {
        let mut guard = self.write();
        let state = &mut *guard;
        match state.plan.as_mut() {
            Some(plan) if plan.status == PlanStatus::Draft => {
                plan.status = PlanStatus::Confirmed;
                if state.phase < SessionPhase::Confirmed {
                    state.phase = SessionPhase::Confirmed;
                }
                state.touch();
                true
            }
            _ => false,
        }
    }

    /// Confirmed → executing, flipping the plan to in-progress.
    pub fn begin_execution(&self) -> bool {
        let mut state = self.write();
        if state.phase != SessionPhase::Confirmed {
            return false;
        }
        state.phase = SessionPhase::Executing;
        if let Some(plan) = state.plan.as_mut() {
            plan.status = PlanStatus::InProgress;
        }
        state.touch();
        true
    }

    /// Update one plan step. An empty note never overwrites an existing one.
    ///
    /// When the plan is in progress and every step has finished, the plan
    /// and the session phase both become completed.
    pub fn update_plan_step(&self, step_id: &str, status: StepStatus, note: &str) -> Result<Plan> {
        let mut guard = self.write();
        let state = &mut *guard;
        let plan = state
            .plan
            .as_mut()
            .ok_or_else(|| Error::NotFound(format!("no plan on session {}", self.id)))?;
        let step = plan
            .steps
            .iter_mut()
            .find(|s| s.id == step_id)
            .ok_or_else(|| Error::NotFound(format!("step \"{step_id}\" not found in plan")))?;

        step.status = status;
        if !note.is_empty() {
            step.note = Some(note.to_string());
        }

        let finished = plan.status == PlanStatus::InProgress && plan.all_steps_finished();
        if finished {
            plan.status = PlanStatus::Completed;
        }
        let updated = plan.clone();
        if finished && state.phase < SessionPhase::Completed {
            state.phase = SessionPhase::Completed;
        }
        state.touch();
        Ok(updated)
    }
}
