//! Planning tools: `create_plan` and `update_plan`.
//!
//! The plan lives on the session. `create_plan` stores a draft that the
//! user must confirm; `update_plan` tracks step progress during execution
//! and completes the plan once every step has finished.
//!
//! Bad input is reported as a failed `ToolResult`, never as `Err`, so the
//! model sees the reason as its observation and can retry.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};
use weaver_core::error::ToolError;
use weaver_core::session::{Plan, PlanGroup, PlanStatus, PlanStep, StepStatus};
use weaver_core::tool::{Tool, ToolContext, ToolResult};
use weaver_memory::SessionStore;

#[derive(Debug, Deserialize)]
struct CreatePlanArgs {
    #[serde(default)]
    title: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    groups: Vec<GroupArg>,
    #[serde(default)]
    steps: Vec<StepArg>,
}

#[derive(Debug, Deserialize)]
struct GroupArg {
    #[serde(default)]
    id: String,
    #[serde(default)]
    label: String,
    #[serde(default)]
    icon: String,
}

#[derive(Debug, Deserialize)]
struct StepArg {
    #[serde(default)]
    id: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    tool: String,
    #[serde(default)]
    group_id: String,
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

pub struct CreatePlanTool {
    sessions: Arc<SessionStore>,
}

impl CreatePlanTool {
    pub fn new(sessions: Arc<SessionStore>) -> Self {
        Self { sessions }
    }

    fn build_plan(args: CreatePlanArgs) -> Result<Plan, String> {
        let title = args.title.trim().to_string();
        if title.is_empty() {
            return Err("title is required".into());
        }
        if args.steps.is_empty() {
            return Err("at least one step is required".into());
        }

        let groups: Vec<PlanGroup> = args
            .groups
            .into_iter()
            .filter(|g| !g.id.trim().is_empty())
            .map(|g| PlanGroup {
                id: g.id.trim().to_string(),
                label: g.label,
                icon: non_empty(g.icon),
            })
            .collect();
        let known_groups: HashSet<&str> = groups.iter().map(|g| g.id.as_str()).collect();

        let steps = args
            .steps
            .into_iter()
            .enumerate()
            .map(|(i, s)| PlanStep {
                id: non_empty(s.id).unwrap_or_else(|| format!("step_{}", i + 1)),
                description: s.description,
                tool: non_empty(s.tool),
                status: StepStatus::Pending,
                note: None,
                group_id: non_empty(s.group_id).filter(|g| known_groups.contains(g.as_str())),
            })
            .collect();

        Ok(Plan {
            title,
            status: PlanStatus::Draft,
            summary: non_empty(args.summary),
            groups,
            steps,
        })
    }
}

#[async_trait]
impl Tool for CreatePlanTool {
    fn name(&self) -> &str {
        "create_plan"
    }

    fn description(&self) -> &str {
        "Create a structured execution plan once requirements are clear. The plan is shown to the user as a to-do list and must be confirmed before any construction begins."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": {
                    "type": "string",
                    "description": "Short plan title, e.g. 'Employee Management App'"
                },
                "summary": {
                    "type": "string",
                    "description": "Requirements summary gathered during the conversation"
                },
                "groups": {
                    "type": "array",
                    "description": "Optional step groups, e.g. data_layer, ui_layer, verification",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "string" },
                            "label": { "type": "string" },
                            "icon": { "type": "string" }
                        },
                        "required": ["id", "label"]
                    }
                },
                "steps": {
                    "type": "array",
                    "description": "Ordered plan steps",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "string" },
                            "description": { "type": "string" },
                            "tool": { "type": "string", "description": "Tool expected to perform this step" },
                            "group_id": { "type": "string" }
                        },
                        "required": ["description"]
                    }
                }
            },
            "required": ["title", "steps"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, arguments: Value) -> Result<ToolResult, ToolError> {
        let args: CreatePlanArgs = match serde_json::from_value(arguments) {
            Ok(args) => args,
            Err(e) => return Ok(ToolResult::failure(format!("invalid arguments: {e}"))),
        };
        let plan = match Self::build_plan(args) {
            Ok(plan) => plan,
            Err(reason) => return Ok(ToolResult::failure(reason)),
        };

        if !ctx.session_id.is_empty() {
            match self.sessions.get(&ctx.session_id).await {
                Some(session) => {
                    session.set_plan(plan.clone());
                    info!(session_id = %ctx.session_id, steps = plan.steps.len(), "Plan drafted");
                }
                None => debug!(session_id = %ctx.session_id, "Plan not stored: unknown session"),
            }
        }

        let output = format!(
            "Plan \"{}\" created with {} steps. Waiting for the user to confirm it.",
            plan.title,
            plan.steps.len()
        );
        Ok(ToolResult::ok(output).with_data(json!({
            "type": "plan",
            "status": plan.status.as_str(),
            "plan": plan,
        })))
    }
}

#[derive(Debug, Deserialize)]
struct UpdatePlanArgs {
    #[serde(default)]
    step_id: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    note: String,
}

pub struct UpdatePlanTool {
    sessions: Arc<SessionStore>,
}

impl UpdatePlanTool {
    pub fn new(sessions: Arc<SessionStore>) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl Tool for UpdatePlanTool {
    fn name(&self) -> &str {
        "update_plan"
    }

    fn description(&self) -> &str {
        "Update the status of a plan step during execution. Call it when a step starts, completes, or fails."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "step_id": { "type": "string", "description": "Id of the plan step" },
                "status": {
                    "type": "string",
                    "enum": ["pending", "in_progress", "completed", "failed"]
                },
                "note": { "type": "string", "description": "Optional progress note" }
            },
            "required": ["step_id", "status"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, arguments: Value) -> Result<ToolResult, ToolError> {
        let args: UpdatePlanArgs = match serde_json::from_value(arguments) {
            Ok(args) => args,
            Err(e) => return Ok(ToolResult::failure(format!("invalid arguments: {e}"))),
        };
        let step_id = args.step_id.trim();
        if step_id.is_empty() {
            return Ok(ToolResult::failure("step_id is required"));
        }
        let status: StepStatus = match args.status.trim().parse() {
            Ok(status) => status,
            Err(e) => return Ok(ToolResult::failure(e.to_string())),
        };

        let Some(session) = self.sessions.get(&ctx.session_id).await else {
            return Ok(ToolResult::failure("no active session for plan update"));
        };

        let plan = match session.update_plan_step(step_id, status, args.note.trim()) {
            Ok(plan) => plan,
            Err(e) => return Ok(ToolResult::failure(e.to_string())),
        };

        let mut output = format!("Step {step_id} marked {status}.");
        if plan.status == PlanStatus::Completed {
            output.push_str(" All plan steps are finished; the plan is complete.");
            info!(session_id = %ctx.session_id, "Plan completed");
        }
        Ok(ToolResult::ok(output).with_data(json!({
            "type": "plan_update",
            "plan": plan,
        })))
    }
}
