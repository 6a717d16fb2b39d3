//! The shared agentic loop.
//!
//! Browsing and editing run the same state machine: think, maybe run a
//! tool, record the outcome, evaluate the goal. [`TaskEngine`] owns the
//! machine — phases, the append-only iteration log, the checkpoint stack,
//! bounds, heartbeats, cancellation — while a [`TaskBehavior`] supplies
//! only what differs between the two: the bounded tool surface and the
//! goal check.
//!
//! Every pass through the loop either ends the task (goal achieved,
//! blocked threshold, error, cancellation) or counts against
//! [`TaskBounds`], so the loop always terminates. Exhausting a bound is
//! not an error: the task finishes `complete` with partial results.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use kindred_core::error::TaskError;
use kindred_core::task::{
    AgenticIteration, Checkpoint, GoalStatus, SubGoal, TaskBounds, TaskFailure, TaskPhase,
    TaskSummary, ToolInvocation, ToolOutcome,
};
use kindred_protocol::{EventSink, ServerEvent};

/// Consecutive blocked iterations tolerated before the task errors out.
pub const DEFAULT_BLOCKED_THRESHOLD: u32 = 3;

/// How often `task.heartbeat` ticks during a long think or tool call.
pub const DEFAULT_HEARTBEAT_EVERY: Duration = Duration::from_secs(5);

/// What the engine shows a behavior each step.
pub struct TaskContext<'a> {
    /// The instruction or query driving the task.
    pub goal: &'a str,

    /// Current 1-based iteration.
    pub step: u32,

    /// Every earlier iteration, oldest first.
    pub history: &'a [AgenticIteration],
}

/// One reasoning step's output.
#[derive(Debug, Clone, Default)]
pub struct ThinkOutcome {
    /// Narration worth showing the user (`task.thinking`).
    pub narration: Option<String>,

    /// Tool call to run this step, if any.
    pub proposed: Option<ToolInvocation>,

    /// The behavior believes no more tool work is needed. The engine
    /// moves to `verifying` and lets `evaluate` confirm.
    pub declared_done: bool,
}

/// The capabilities an agentic task is parameterized by.
///
/// The engine drives the loop; the behavior decides what a step means.
/// `execute` reports failures as outcomes rather than errors — a failed
/// call blocks the iteration and the next think sees it in the history.
#[async_trait]
pub trait TaskBehavior: Send + Sync {
    /// Decide the next step given the goal and iteration history.
    async fn think(&mut self, ctx: &TaskContext<'_>) -> Result<ThinkOutcome, TaskError>;

    /// Run a proposed call against the bounded tool surface.
    async fn execute(&mut self, call: &ToolInvocation) -> ToolOutcome;

    /// Classify progress after the step.
    async fn evaluate(&mut self, ctx: &TaskContext<'_>) -> GoalStatus;

    /// Whether the task opens with a planning phase.
    fn has_plan_phase(&self) -> bool {
        false
    }

    /// Decompose the goal before the loop starts. Called once, and only
    /// when [`has_plan_phase`](Self::has_plan_phase) is true.
    async fn plan(&mut self, _ctx: &TaskContext<'_>) -> Result<Vec<SubGoal>, TaskError> {
        Ok(Vec::new())
    }

    /// Whether `call` destroys state worth snapshotting first.
    fn needs_checkpoint(&self, _call: &ToolInvocation) -> bool {
        false
    }

    /// Snapshot restorable state. `None` when there is nothing to protect.
    fn take_checkpoint(&self) -> Option<Checkpoint> {
        None
    }

    /// Roll state back to `checkpoint` after a fatal error.
    async fn restore_checkpoint(&mut self, _checkpoint: &Checkpoint) -> Result<(), TaskError> {
        Ok(())
    }

    /// Domain progress count for the summary: pages visited, lines changed.
    fn changes_applied(&self) -> u32;

    /// Step estimate announced in `task.start`.
    fn estimated_steps(&self) -> u32;

    /// One line describing what the task accomplished so far.
    fn outcome_summary(&self) -> String;
}

/// Which bound ended the loop.
enum BoundHit {
    Iterations,
    Duration,
    Pages,
}

impl BoundHit {
    fn describe(&self) -> &'static str {
        match self {
            Self::Iterations => "iteration limit",
            Self::Duration => "time limit",
            Self::Pages => "page limit",
        }
    }
}

/// Runs one agentic session to a terminal state.
///
/// Emits `task.*` progress events in causal order (think → tool call →
/// tool result → goal evaluation) and exactly one terminal event —
/// `task.complete` or `task.error` — then returns the [`TaskSummary`].
pub struct TaskEngine {
    task_id: String,
    goal: String,
    bounds: TaskBounds,
    blocked_threshold: u32,
    heartbeat_every: Duration,
    sink: EventSink,
    cancel: CancellationToken,
    phase: TaskPhase,
    history: Vec<AgenticIteration>,
    checkpoints: Vec<Checkpoint>,
}

impl TaskEngine {
    pub fn new(task_id: impl Into<String>, goal: impl Into<String>, sink: EventSink) -> Self {
        Self {
            task_id: task_id.into(),
            goal: goal.into(),
            bounds: TaskBounds::default(),
            blocked_threshold: DEFAULT_BLOCKED_THRESHOLD,
            heartbeat_every: DEFAULT_HEARTBEAT_EVERY,
            sink,
            cancel: CancellationToken::new(),
            phase: TaskPhase::Idle,
            history: Vec::new(),
            checkpoints: Vec::new(),
        }
    }

    pub fn with_bounds(mut self, bounds: TaskBounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn with_blocked_threshold(mut self, threshold: u32) -> Self {
        self.blocked_threshold = threshold.max(1);
        self
    }

    pub fn with_heartbeat_every(mut self, every: Duration) -> Self {
        self.heartbeat_every = every;
        self
    }

    /// Use an externally held token so the session can be cancelled from
    /// outside [`run`](Self::run).
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drive `behavior` until the task reaches a terminal state.
    ///
    /// Cancellation is honored at safe points only — between iterations,
    /// after a think returns, and after a tool call's result is recorded —
    /// never by aborting an in-flight call.
    pub async fn run(mut self, behavior: &mut dyn TaskBehavior) -> TaskSummary {
        let started = Instant::now();

        info!(
            task_id = %self.task_id,
            goal = %self.goal,
            max_iterations = self.bounds.max_iterations,
            "agentic task starting"
        );

        self.sink
            .emit(ServerEvent::TaskStart {
                task_id: self.task_id.clone(),
                goal: self.goal.clone(),
                estimated_steps: behavior.estimated_steps(),
            })
            .await;

        // ── Optional planning pre-phase ──
        if behavior.has_plan_phase() {
            self.transition(TaskPhase::Planning).await;
            let planned = self.plan_with_retry(behavior, started).await;
            match planned {
                Ok(goals) if !goals.is_empty() => {
                    let outline: Vec<String> = goals
                        .iter()
                        .map(|g| format!("{}. {}", g.id + 1, g.description))
                        .collect();
                    self.sink
                        .emit(ServerEvent::TaskThinking {
                            task_id: self.task_id.clone(),
                            text: format!("Plan:\n{}", outline.join("\n")),
                        })
                        .await;
                    debug!(task_id = %self.task_id, sub_goals = goals.len(), "plan ready");
                }
                Ok(_) => debug!(task_id = %self.task_id, "planning produced no sub-goals"),
                Err(e) => return self.fail(behavior, started, e).await,
            }
        }

        self.transition(TaskPhase::Executing).await;

        let mut consecutive_blocked = 0u32;
        let mut step = 0u32;

        loop {
            // Safe point: between iterations.
            if self.cancel.is_cancelled() {
                return self.cancelled(&*behavior, started).await;
            }

            if let Some(bound) = self.bound_hit(step, started.elapsed(), behavior.changes_applied())
            {
                info!(
                    task_id = %self.task_id,
                    bound = bound.describe(),
                    iterations = step,
                    "bound exhausted, finishing with partial results"
                );
                let text = format!(
                    "Stopped at the {}. {}",
                    bound.describe(),
                    behavior.outcome_summary()
                );
                return self.complete_with(&*behavior, started, text).await;
            }

            step += 1;
            debug!(task_id = %self.task_id, step, "iteration");

            // ── Think ──
            let thought = self.think_with_retry(behavior, started, step).await;
            let thought = match thought {
                Ok(t) => t,
                Err(e) => return self.fail(behavior, started, e).await,
            };
            let ThinkOutcome {
                narration,
                proposed,
                declared_done,
            } = thought;

            if let Some(text) = &narration {
                self.sink
                    .emit(ServerEvent::TaskThinking {
                        task_id: self.task_id.clone(),
                        text: text.clone(),
                    })
                    .await;
            }

            // Safe point: a cancel seen here issues no tool call.
            if self.cancel.is_cancelled() {
                self.history.push(AgenticIteration {
                    step,
                    think: narration,
                    tool_call: None,
                    tool_result: None,
                    goal: GoalStatus::InProgress,
                });
                return self.cancelled(&*behavior, started).await;
            }

            // ── Tool call ──
            let mut tool_call = None;
            let mut tool_result = None;
            if let Some(call) = proposed {
                if behavior.needs_checkpoint(&call)
                    && let Some(checkpoint) = behavior.take_checkpoint()
                {
                    self.sink
                        .emit(ServerEvent::TaskCheckpoint {
                            task_id: self.task_id.clone(),
                            description: checkpoint.label.clone(),
                        })
                        .await;
                    self.checkpoints.push(checkpoint);
                }

                self.sink
                    .emit(ServerEvent::TaskToolCall {
                        task_id: self.task_id.clone(),
                        tool: call.tool.clone(),
                        params: call.params.clone(),
                    })
                    .await;

                let outcome = self
                    .heartbeat_guarded(started, behavior.execute(&call))
                    .await;

                self.sink
                    .emit(ServerEvent::TaskToolResult {
                        task_id: self.task_id.clone(),
                        success: outcome.success,
                        summary: outcome.summary.clone(),
                    })
                    .await;

                tool_call = Some(call);
                tool_result = Some(outcome);
            }

            // ── Goal evaluation ──
            let failed_tool = tool_result.as_ref().is_some_and(|r| !r.success);
            let goal = if failed_tool {
                // A failed call blocks the iteration; the next think sees
                // the failure in the history and adapts.
                GoalStatus::Blocked
            } else {
                if declared_done {
                    self.transition(TaskPhase::Verifying).await;
                }
                let ctx = TaskContext {
                    goal: &self.goal,
                    step,
                    history: &self.history,
                };
                behavior.evaluate(&ctx).await
            };

            self.history.push(AgenticIteration {
                step,
                think: narration,
                tool_call,
                tool_result,
                goal,
            });

            match goal {
                GoalStatus::Achieved => {
                    // Goal wins a same-iteration tie against any bound;
                    // bounds are rechecked only at the top of the next pass.
                    if self.phase != TaskPhase::Verifying {
                        self.transition(TaskPhase::Verifying).await;
                    }
                    let text = behavior.outcome_summary();
                    return self.complete_with(&*behavior, started, text).await;
                }
                GoalStatus::Blocked => {
                    if self.phase == TaskPhase::Verifying {
                        self.transition(TaskPhase::Executing).await;
                    }
                    consecutive_blocked += 1;
                    if consecutive_blocked >= self.blocked_threshold {
                        let err = TaskError::Blocked {
                            consecutive: consecutive_blocked,
                        };
                        return self.fail(behavior, started, err).await;
                    }
                }
                GoalStatus::InProgress => {
                    if self.phase == TaskPhase::Verifying {
                        self.transition(TaskPhase::Executing).await;
                    }
                    consecutive_blocked = 0;
                }
            }

            // Safe point: after the call's result is recorded.
            if self.cancel.is_cancelled() {
                return self.cancelled(&*behavior, started).await;
            }
        }
    }

    fn bound_hit(&self, completed: u32, elapsed: Duration, changes: u32) -> Option<BoundHit> {
        if completed >= self.bounds.max_iterations {
            return Some(BoundHit::Iterations);
        }
        if elapsed >= self.bounds.max_duration {
            return Some(BoundHit::Duration);
        }
        if let Some(max) = self.bounds.max_pages
            && changes >= max
        {
            return Some(BoundHit::Pages);
        }
        None
    }

    async fn think_with_retry(
        &self,
        behavior: &mut dyn TaskBehavior,
        started: Instant,
        step: u32,
    ) -> Result<ThinkOutcome, TaskError> {
        let ctx = TaskContext {
            goal: &self.goal,
            step,
            history: &self.history,
        };
        let first = self.heartbeat_guarded(started, behavior.think(&ctx)).await;
        match first {
            Err(e) if is_transient(&e) => {
                warn!(task_id = %self.task_id, error = %e, "transient failure, retrying step once");
                self.heartbeat_guarded(started, behavior.think(&ctx)).await
            }
            other => other,
        }
    }

    async fn plan_with_retry(
        &self,
        behavior: &mut dyn TaskBehavior,
        started: Instant,
    ) -> Result<Vec<SubGoal>, TaskError> {
        let ctx = TaskContext {
            goal: &self.goal,
            step: 0,
            history: &self.history,
        };
        let first = self.heartbeat_guarded(started, behavior.plan(&ctx)).await;
        match first {
            Err(e) if is_transient(&e) => {
                warn!(task_id = %self.task_id, error = %e, "transient failure, retrying plan once");
                self.heartbeat_guarded(started, behavior.plan(&ctx)).await
            }
            other => other,
        }
    }

    /// Await `fut` while ticking `task.heartbeat` so clients can tell a
    /// slow call from a dead session. The ticker lives only as long as
    /// this await; it cannot outlive the engine or leak past an exit path.
    async fn heartbeat_guarded<T>(&self, started: Instant, fut: impl Future<Output = T>) -> T {
        tokio::pin!(fut);
        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.heartbeat_every, self.heartbeat_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                out = &mut fut => return out,
                _ = ticker.tick() => {
                    self.sink
                        .emit(ServerEvent::TaskHeartbeat {
                            task_id: self.task_id.clone(),
                            elapsed_ms: started.elapsed().as_millis() as u64,
                        })
                        .await;
                }
            }
        }
    }

    async fn transition(&mut self, next: TaskPhase) {
        if !self.phase.can_transition_to(next) {
            warn!(task_id = %self.task_id, from = %self.phase, to = %next, "refused phase transition");
            return;
        }
        debug!(task_id = %self.task_id, from = %self.phase, to = %next, "phase");
        self.phase = next;
        self.sink
            .emit(ServerEvent::TaskPhaseChanged {
                task_id: self.task_id.clone(),
                phase: next,
            })
            .await;
    }

    async fn complete_with(
        mut self,
        behavior: &dyn TaskBehavior,
        started: Instant,
        summary_text: String,
    ) -> TaskSummary {
        self.transition(TaskPhase::Complete).await;
        let summary = TaskSummary {
            success: true,
            summary: summary_text,
            changes_applied: behavior.changes_applied(),
            iterations: self.history.len() as u32,
            duration_ms: started.elapsed().as_millis() as u64,
            failure: None,
        };
        self.sink
            .emit(ServerEvent::task_complete(&self.task_id, &summary))
            .await;
        info!(
            task_id = %self.task_id,
            iterations = summary.iterations,
            changes = summary.changes_applied,
            "agentic task complete"
        );
        summary
    }

    async fn fail(
        mut self,
        behavior: &mut dyn TaskBehavior,
        started: Instant,
        err: TaskError,
    ) -> TaskSummary {
        warn!(task_id = %self.task_id, error = %err, "agentic task failed");
        let mut failure = TaskFailure {
            message: err.to_string(),
            recoverable: err.is_recoverable(),
            suggestion: suggestion_for(&err),
            cancelled: false,
        };

        // Leave the resource at the last known-good state rather than
        // half-edited.
        if let Some(checkpoint) = self.checkpoints.pop() {
            match behavior.restore_checkpoint(&checkpoint).await {
                Ok(()) => {
                    info!(
                        task_id = %self.task_id,
                        label = %checkpoint.label,
                        "restored last checkpoint"
                    );
                    failure.suggestion = Some(format!(
                        "Restored \"{}\"; work up to that point is kept.",
                        checkpoint.label
                    ));
                }
                Err(e) => {
                    warn!(task_id = %self.task_id, error = %e, "checkpoint restore failed");
                }
            }
        }

        self.transition(TaskPhase::Error).await;
        self.sink
            .emit(ServerEvent::task_error(&self.task_id, &failure))
            .await;

        TaskSummary {
            success: false,
            summary: failure.message.clone(),
            changes_applied: behavior.changes_applied(),
            iterations: self.history.len() as u32,
            duration_ms: started.elapsed().as_millis() as u64,
            failure: Some(failure),
        }
    }

    async fn cancelled(mut self, behavior: &dyn TaskBehavior, started: Instant) -> TaskSummary {
        info!(task_id = %self.task_id, iterations = self.history.len(), "agentic task cancelled");
        self.transition(TaskPhase::Error).await;
        let failure = TaskFailure::cancelled();
        self.sink
            .emit(ServerEvent::task_error(&self.task_id, &failure))
            .await;
        TaskSummary {
            success: false,
            summary: failure.message.clone(),
            changes_applied: behavior.changes_applied(),
            iterations: self.history.len() as u32,
            duration_ms: started.elapsed().as_millis() as u64,
            failure: Some(failure),
        }
    }
}

fn is_transient(err: &TaskError) -> bool {
    matches!(err, TaskError::Model(e) if e.is_transient())
}

fn suggestion_for(err: &TaskError) -> Option<String> {
    match err {
        TaskError::Model(e) if e.is_transient() => {
            Some("The model backend was briefly unavailable; try again.".into())
        }
        TaskError::Blocked { .. } => {
            Some("Rephrase the instruction or break it into smaller steps.".into())
        }
        TaskError::Tool { .. } => Some("Check the tool's input and retry.".into()),
        _ => None,
    }
}
