//! The autonomous document-editing task.
//!
//! An [`EditingAgent`] works on exactly one document through a bounded
//! tool surface: `read` and `search` inspect the in-memory working copy,
//! `write` commits a new version through the [`VersionGate`] so the
//! last-write-wins check applies to agent edits exactly as it does to
//! user saves. Every write is preceded by a checkpoint and followed by a
//! `task.diff` event; a concurrent user edit that merges cleanly is
//! folded in, one that overlaps fails the call and refreshes the working
//! copy to the stored side.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use kindred_core::document::VersionAuthor;
use kindred_core::error::TaskError;
use kindred_core::message::Message;
use kindred_core::model::{CompletionRequest, ModelClient, extract_json};
use kindred_core::task::{
    AgenticIteration, Checkpoint, GoalStatus, SubGoal, TaskBounds, TaskSummary, ToolInvocation,
    ToolOutcome,
};
use kindred_merge::{LineDiff, SaveOutcome, VersionGate, diff_lines};
use kindred_protocol::{EventSink, ServerEvent};

use crate::engine::{
    DEFAULT_BLOCKED_THRESHOLD, DEFAULT_HEARTBEAT_EVERY, TaskBehavior, TaskContext, TaskEngine,
    ThinkOutcome,
};
use crate::plan::{EditPlan, decompose};

const EDIT_SYSTEM: &str = "You are the document-editing assistant inside an AI \
companion. You edit exactly one document, one action per turn, and you stop as \
soon as the instruction is satisfied. Reply with JSON only:\n\
{\"action\": \"read\", \"start_line\": 1, \"end_line\": 40} to view lines,\n\
{\"action\": \"search\", \"pattern\": \"...\"} to find text,\n\
{\"action\": \"write\", \"find\": \"...\", \"replace\": \"...\", \"description\": \"...\"} \
to change the first occurrence of find,\n\
{\"action\": \"write\", \"content\": \"...\", \"description\": \"...\"} to replace the \
whole document,\n\
{\"action\": \"done\", \"summary\": \"...\"} when the instruction is satisfied.";

/// Lines of the document shown in every think prompt.
const EXCERPT_LINES: usize = 60;

/// Most lines one `read` returns.
const READ_WINDOW: usize = 120;

/// Most matches one `search` returns.
const SEARCH_CAP: usize = 8;

/// Iterations echoed back to the model as recent history.
const HISTORY_SHOWN: usize = 4;

const ESTIMATED_STEPS: u32 = 4;

/// One editing task over one document, driven to a terminal state by
/// [`run`](Self::run).
pub struct EditingAgent {
    task_id: String,
    document_id: String,
    instruction: String,
    content: String,
    base_version: u64,
    content_type: String,
    language: Option<String>,
    planning: bool,
    bounds: TaskBounds,
    blocked_threshold: u32,
    heartbeat_every: Duration,
    model: Arc<dyn ModelClient>,
    model_name: String,
    gate: Arc<VersionGate>,
    sink: EventSink,
    cancel: CancellationToken,
}

impl EditingAgent {
    /// `content` is the client's working copy and `base_version` the
    /// stored version it was loaded from; the first write is checked
    /// against that base like any other save.
    pub fn new(
        task_id: impl Into<String>,
        document_id: impl Into<String>,
        instruction: impl Into<String>,
        content: impl Into<String>,
        base_version: u64,
        model: Arc<dyn ModelClient>,
        model_name: impl Into<String>,
        gate: Arc<VersionGate>,
        sink: EventSink,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            document_id: document_id.into(),
            instruction: instruction.into(),
            content: content.into(),
            base_version,
            content_type: "text/plain".into(),
            language: None,
            planning: false,
            bounds: TaskBounds::default(),
            blocked_threshold: DEFAULT_BLOCKED_THRESHOLD,
            heartbeat_every: DEFAULT_HEARTBEAT_EVERY,
            model,
            model_name: model_name.into(),
            gate,
            sink,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_content_type(
        mut self,
        content_type: impl Into<String>,
        language: Option<String>,
    ) -> Self {
        self.content_type = content_type.into();
        self.language = language;
        self
    }

    /// Turn on the decomposition pre-phase.
    pub fn with_planning(mut self, planning: bool) -> Self {
        self.planning = planning;
        self
    }

    pub fn with_bounds(mut self, bounds: TaskBounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn with_blocked_threshold(mut self, threshold: u32) -> Self {
        self.blocked_threshold = threshold;
        self
    }

    pub fn with_heartbeat_every(mut self, every: Duration) -> Self {
        self.heartbeat_every = every;
        self
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Handle for cancelling the task from outside.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the editing loop to a terminal state.
    pub async fn run(self) -> TaskSummary {
        let EditingAgent {
            task_id,
            document_id,
            instruction,
            content,
            base_version,
            content_type,
            language,
            planning,
            bounds,
            blocked_threshold,
            heartbeat_every,
            model,
            model_name,
            gate,
            sink,
            cancel,
        } = self;

        info!(
            task_id = %task_id,
            document_id = %document_id,
            planning,
            "editing task starting"
        );

        let mut behavior = EditBehavior {
            task_id: task_id.clone(),
            document_id,
            instruction: instruction.clone(),
            content_type,
            language,
            original: content.clone(),
            working: content,
            base_version,
            initial_version: base_version,
            model,
            model_name,
            gate,
            sink: sink.clone(),
            plan: None,
            planning,
            writes: 0,
            changes: 0,
            done_summary: None,
        };

        TaskEngine::new(task_id, instruction, sink)
            .with_bounds(bounds)
            .with_blocked_threshold(blocked_threshold)
            .with_heartbeat_every(heartbeat_every)
            .with_cancellation(cancel)
            .run(&mut behavior)
            .await
    }
}

/// What the model decided to do next.
#[derive(Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum EditVerdict {
    Read {
        #[serde(default)]
        start_line: Option<u32>,
        #[serde(default)]
        end_line: Option<u32>,
    },
    Search {
        pattern: String,
    },
    Write {
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        find: Option<String>,
        #[serde(default)]
        replace: Option<String>,
        #[serde(default)]
        description: Option<String>,
    },
    Done {
        summary: String,
    },
}

/// The editing tool surface and its working state.
struct EditBehavior {
    task_id: String,
    document_id: String,
    instruction: String,
    content_type: String,
    language: Option<String>,
    /// Content at task start; `changes` is always diffed against this.
    original: String,
    working: String,
    base_version: u64,
    initial_version: u64,
    model: Arc<dyn ModelClient>,
    model_name: String,
    gate: Arc<VersionGate>,
    sink: EventSink,
    plan: Option<EditPlan>,
    planning: bool,
    writes: u32,
    changes: u32,
    done_summary: Option<String>,
}

impl EditBehavior {
    fn think_prompt(&self, ctx: &TaskContext<'_>) -> String {
        let mut prompt = format!("Instruction: {}\n", self.instruction);
        if let Some(plan) = &self.plan
            && let Some(goal) = plan.current()
        {
            prompt.push_str(&format!("Current sub-goal: {}\n", goal.description));
        }
        prompt.push('\n');

        let lines: Vec<&str> = self.working.lines().collect();
        let total = lines.len();
        let label = match &self.language {
            Some(lang) => format!("{}; {lang}", self.content_type),
            None => self.content_type.clone(),
        };
        prompt.push_str(&format!(
            "Document {} ({label}), {total} lines:\n",
            self.document_id
        ));
        for (i, line) in lines.iter().take(EXCERPT_LINES).enumerate() {
            prompt.push_str(&format!("{}: {line}\n", i + 1));
        }
        if total > EXCERPT_LINES {
            prompt.push_str(&format!(
                "... {} more lines; use read to view them.\n",
                total - EXCERPT_LINES
            ));
        }

        if !ctx.history.is_empty() {
            prompt.push_str("\nRecent steps:\n");
            prompt.push_str(&recent_steps(ctx.history));
            prompt.push('\n');
        }

        prompt.push_str("\nWhat is your next action?");
        prompt
    }

    fn read_range(&self, params: &Value) -> ToolOutcome {
        let lines: Vec<&str> = self.working.lines().collect();
        let total = lines.len();
        if total == 0 {
            return ToolOutcome::ok("the document is empty");
        }
        let start = params
            .get("start_line")
            .and_then(Value::as_u64)
            .map(|v| v as usize)
            .unwrap_or(1)
            .max(1);
        let end = params
            .get("end_line")
            .and_then(Value::as_u64)
            .map(|v| v as usize)
            .unwrap_or(total)
            .min(total);
        if start > end {
            return ToolOutcome::ok(format!(
                "the document has {total} lines; the requested range is out of bounds"
            ));
        }
        let end = end.min(start + READ_WINDOW - 1);
        let excerpt: Vec<String> = lines[start - 1..end]
            .iter()
            .enumerate()
            .map(|(i, line)| format!("{}: {line}", start + i))
            .collect();
        ToolOutcome::ok(excerpt.join("\n"))
    }

    fn search_lines(&self, params: &Value) -> ToolOutcome {
        let Some(pattern) = params.get("pattern").and_then(Value::as_str) else {
            return ToolOutcome::failed("search needs a pattern parameter");
        };
        let hits: Vec<String> = self
            .working
            .lines()
            .enumerate()
            .filter(|(_, line)| line.contains(pattern))
            .take(SEARCH_CAP)
            .map(|(i, line)| format!("line {}: {}", i + 1, line.trim()))
            .collect();
        if hits.is_empty() {
            ToolOutcome::ok(format!("no lines contain \"{pattern}\""))
        } else {
            ToolOutcome::ok(hits.join("\n"))
        }
    }

    async fn write(&mut self, params: &Value) -> ToolOutcome {
        let description = params
            .get("description")
            .and_then(Value::as_str)
            .map(String::from);

        let new_content = if let Some(find) = params.get("find").and_then(Value::as_str) {
            let replace = params.get("replace").and_then(Value::as_str).unwrap_or("");
            if !self.working.contains(find) {
                return ToolOutcome::failed(
                    "find text is not in the document; read or search before writing",
                );
            }
            self.working.replacen(find, replace, 1)
        } else if let Some(content) = params.get("content").and_then(Value::as_str) {
            content.to_string()
        } else {
            return ToolOutcome::failed("write needs either content or a find/replace pair");
        };

        let saved = self
            .gate
            .save(
                &self.document_id,
                &new_content,
                Some(self.base_version),
                VersionAuthor::Agent,
                description,
            )
            .await;

        match saved {
            Ok(SaveOutcome::Saved(version)) => {
                let diff = self.commit(new_content, version.version).await;
                ToolOutcome::ok(format!(
                    "wrote v{} (+{} -{})",
                    self.base_version, diff.additions, diff.deletions
                ))
            }
            Ok(SaveOutcome::Conflict {
                stored_version,
                stored_content,
                merge,
                ..
            }) => {
                if let Some(merged) = merge.auto_merge() {
                    info!(
                        document_id = %self.document_id,
                        stored_version,
                        "concurrent edit merged cleanly"
                    );
                    self.commit_merged(merged, stored_version).await
                } else {
                    warn!(
                        document_id = %self.document_id,
                        stored_version,
                        "concurrent edit conflicts with the change"
                    );
                    self.refresh(stored_version, stored_content);
                    if let Some(plan) = &mut self.plan {
                        plan.block_current();
                        plan.start_next();
                    }
                    ToolOutcome::failed(format!(
                        "a concurrent edit conflicts with this change; working copy refreshed to v{stored_version}"
                    ))
                }
            }
            Err(e) => ToolOutcome::failed(format!("save failed: {e}")),
        }
    }

    /// Commit a cleanly merged write against the stored side.
    async fn commit_merged(&mut self, merged: String, stored_version: u64) -> ToolOutcome {
        let saved = self
            .gate
            .save(
                &self.document_id,
                &merged,
                Some(stored_version),
                VersionAuthor::Collaborative,
                Some("merge concurrent edit".into()),
            )
            .await;
        match saved {
            Ok(SaveOutcome::Saved(version)) => {
                let diff = self.commit(merged, version.version).await;
                ToolOutcome::ok(format!(
                    "merged with a concurrent edit; wrote v{} (+{} -{})",
                    self.base_version, diff.additions, diff.deletions
                ))
            }
            Ok(SaveOutcome::Conflict {
                stored_version,
                stored_content,
                ..
            }) => {
                self.refresh(stored_version, stored_content);
                ToolOutcome::failed(format!(
                    "the document changed again while merging; working copy refreshed to v{stored_version}"
                ))
            }
            Err(e) => ToolOutcome::failed(format!("save failed: {e}")),
        }
    }

    /// A version landed: emit the diff, advance the working state, and
    /// move the plan along.
    async fn commit(&mut self, new_content: String, version: u64) -> LineDiff {
        let diff = diff_lines(&self.working, &new_content);
        self.sink
            .emit(ServerEvent::TaskDiff {
                task_id: self.task_id.clone(),
                lines_added: diff.additions,
                lines_removed: diff.deletions,
            })
            .await;
        self.working = new_content;
        self.base_version = version;
        self.writes += 1;
        self.changes = line_changes(&self.original, &self.working);
        if let Some(plan) = &mut self.plan {
            plan.complete_current();
            plan.start_next();
        }
        diff
    }

    /// The store moved on without us; continue from stored reality.
    /// `changes` keeps its last committed value — nothing was applied.
    fn refresh(&mut self, stored_version: u64, stored_content: String) {
        self.working = stored_content;
        self.base_version = stored_version;
    }
}

#[async_trait]
impl TaskBehavior for EditBehavior {
    async fn think(&mut self, ctx: &TaskContext<'_>) -> Result<ThinkOutcome, TaskError> {
        let request = CompletionRequest::new(
            &self.model_name,
            vec![
                Message::system(EDIT_SYSTEM),
                Message::user(self.think_prompt(ctx)),
            ],
        )
        .with_temperature(0.2);
        let reply = self.model.complete(request).await?;

        let Some(raw) = extract_json(&reply) else {
            return Ok(ThinkOutcome {
                narration: Some(reply.trim().to_string()),
                proposed: None,
                declared_done: false,
            });
        };

        match serde_json::from_str::<EditVerdict>(raw) {
            Ok(EditVerdict::Read {
                start_line,
                end_line,
            }) => Ok(ThinkOutcome {
                narration: Some(match (start_line, end_line) {
                    (Some(s), Some(e)) => format!("Reading lines {s}-{e}"),
                    _ => "Reading the document".into(),
                }),
                proposed: Some(ToolInvocation::new(
                    "read",
                    json!({ "start_line": start_line, "end_line": end_line }),
                )),
                declared_done: false,
            }),
            Ok(EditVerdict::Search { pattern }) => Ok(ThinkOutcome {
                narration: Some(format!("Searching for \"{pattern}\"")),
                proposed: Some(ToolInvocation::new("search", json!({ "pattern": pattern }))),
                declared_done: false,
            }),
            Ok(EditVerdict::Write {
                content,
                find,
                replace,
                description,
            }) => Ok(ThinkOutcome {
                narration: description
                    .clone()
                    .or_else(|| Some("Applying an edit".into())),
                proposed: Some(ToolInvocation::new(
                    "write",
                    json!({
                        "content": content,
                        "find": find,
                        "replace": replace,
                        "description": description,
                    }),
                )),
                declared_done: false,
            }),
            Ok(EditVerdict::Done { summary }) => {
                self.done_summary = Some(summary.clone());
                Ok(ThinkOutcome {
                    narration: Some(summary),
                    proposed: None,
                    declared_done: true,
                })
            }
            Err(e) => {
                debug!(task_id = %self.task_id, error = %e, "unparseable edit action, continuing");
                Ok(ThinkOutcome {
                    narration: Some(reply.trim().to_string()),
                    proposed: None,
                    declared_done: false,
                })
            }
        }
    }

    async fn execute(&mut self, call: &ToolInvocation) -> ToolOutcome {
        match call.tool.as_str() {
            "read" => self.read_range(&call.params),
            "search" => self.search_lines(&call.params),
            "write" => self.write(&call.params).await,
            other => ToolOutcome::failed(format!("unknown tool: {other}")),
        }
    }

    async fn evaluate(&mut self, _ctx: &TaskContext<'_>) -> GoalStatus {
        if self.done_summary.is_some() {
            GoalStatus::Achieved
        } else {
            GoalStatus::InProgress
        }
    }

    fn has_plan_phase(&self) -> bool {
        self.planning
    }

    async fn plan(&mut self, _ctx: &TaskContext<'_>) -> Result<Vec<SubGoal>, TaskError> {
        let goals = decompose(
            self.model.as_ref(),
            &self.model_name,
            &self.instruction,
            &self.working,
        )
        .await?;
        let mut plan = EditPlan::new(goals.clone());
        plan.start_next();
        self.plan = Some(plan);
        Ok(goals)
    }

    fn needs_checkpoint(&self, call: &ToolInvocation) -> bool {
        call.tool == "write"
    }

    fn take_checkpoint(&self) -> Option<Checkpoint> {
        Some(Checkpoint::new(
            format!("before write {}", self.writes + 1),
            self.working.clone(),
        ))
    }

    async fn restore_checkpoint(&mut self, checkpoint: &Checkpoint) -> Result<(), TaskError> {
        // Nothing persisted yet means the stored document is already at
        // the checkpoint; only the working copy needs the rollback.
        if self.base_version > self.initial_version {
            let saved = self
                .gate
                .save(
                    &self.document_id,
                    &checkpoint.content,
                    Some(self.base_version),
                    VersionAuthor::Agent,
                    Some(format!("restore: {}", checkpoint.label)),
                )
                .await?;
            match saved {
                SaveOutcome::Saved(version) => self.base_version = version.version,
                SaveOutcome::Conflict { stored_version, .. } => {
                    // The user wrote meanwhile; their version wins.
                    warn!(
                        document_id = %self.document_id,
                        stored_version,
                        "restore skipped, a newer version landed"
                    );
                }
            }
        }
        self.working = checkpoint.content.clone();
        self.changes = line_changes(&self.original, &self.working);
        Ok(())
    }

    fn changes_applied(&self) -> u32 {
        self.changes
    }

    fn estimated_steps(&self) -> u32 {
        ESTIMATED_STEPS
    }

    fn outcome_summary(&self) -> String {
        match &self.done_summary {
            Some(summary) => summary.clone(),
            None if self.writes > 0 => format!(
                "{} writes applied; document is at v{}.",
                self.writes, self.base_version
            ),
            None => "No changes were applied.".into(),
        }
    }
}

fn line_changes(old: &str, new: &str) -> u32 {
    let diff = diff_lines(old, new);
    diff.additions + diff.deletions
}

fn recent_steps(history: &[AgenticIteration]) -> String {
    let shown = history.len().saturating_sub(HISTORY_SHOWN);
    history[shown..]
        .iter()
        .map(|it| {
            let think = it.think.as_deref().map(first_line).unwrap_or("(no narration)");
            match &it.tool_result {
                Some(r) if r.success => {
                    format!("- step {}: {think} -> {}", it.step, truncate(&r.summary, 200))
                }
                Some(r) => format!(
                    "- step {}: {think} -> FAILED: {}",
                    it.step,
                    truncate(&r.summary, 200)
                ),
                None => format!("- step {}: {think}", it.step),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or(text).trim()
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{cut}...")
    }
}
