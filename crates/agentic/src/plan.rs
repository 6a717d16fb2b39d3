//! Instruction decomposition for the editing pre-phase.
//!
//! The model splits an instruction into ordered sub-goals with declared
//! dependencies; [`EditPlan`] then hands them out in dependency order as
//! the loop works through them. Planning is advisory — a reply that
//! cannot be parsed degrades to a single sub-goal carrying the whole
//! instruction instead of failing the task.

use serde::Deserialize;
use tracing::debug;

use kindred_core::error::TaskError;
use kindred_core::message::Message;
use kindred_core::model::{CompletionRequest, ModelClient, extract_json};
use kindred_core::task::{SubGoal, SubGoalStatus};

const DECOMPOSE_SYSTEM: &str = "You split a document-editing instruction into \
small ordered sub-goals. Reply with JSON only, in the form \
{\"sub_goals\": [{\"description\": \"...\", \"depends_on\": [0]}]} where \
depends_on lists the zero-based indices of earlier sub-goals that must \
finish first. Two to six sub-goals; use an empty depends_on when a sub-goal \
stands alone.";

/// How much of the document the decomposition prompt gets to see.
const PLAN_EXCERPT_CHARS: usize = 2_000;

#[derive(Deserialize)]
struct DecomposeReply {
    sub_goals: Vec<RawSubGoal>,
}

#[derive(Deserialize)]
struct RawSubGoal {
    description: String,
    #[serde(default)]
    depends_on: Vec<u32>,
}

/// Ask the model to decompose `instruction` against a document excerpt.
///
/// Sub-goal ids are assigned by position; a dependency pointing at the
/// goal itself or at a later goal is dropped.
pub async fn decompose(
    model: &dyn ModelClient,
    model_name: &str,
    instruction: &str,
    document: &str,
) -> Result<Vec<SubGoal>, TaskError> {
    let excerpt: String = document.chars().take(PLAN_EXCERPT_CHARS).collect();
    let prompt = format!(
        "Instruction: {instruction}\n\nDocument (excerpt):\n{excerpt}\n\n\
         Split the instruction into sub-goals."
    );
    let request = CompletionRequest::new(
        model_name,
        vec![Message::system(DECOMPOSE_SYSTEM), Message::user(prompt)],
    )
    .with_temperature(0.2);
    let reply = model.complete(request).await?;

    let parsed = extract_json(&reply)
        .and_then(|raw| serde_json::from_str::<DecomposeReply>(raw).ok())
        .filter(|r| !r.sub_goals.is_empty());

    let goals = match parsed {
        Some(reply) => reply
            .sub_goals
            .into_iter()
            .enumerate()
            .map(|(i, raw)| {
                let deps = raw
                    .depends_on
                    .into_iter()
                    .filter(|&d| (d as usize) < i)
                    .collect();
                SubGoal::new(i as u32, raw.description, deps)
            })
            .collect(),
        None => {
            debug!("decomposition reply unparseable, planning a single sub-goal");
            vec![SubGoal::new(0, instruction, Vec::new())]
        }
    };
    Ok(goals)
}

/// Sub-goal statuses tracked across the editing loop.
///
/// `start_next` is the only way a goal leaves `pending`: it picks the
/// first goal whose dependencies all completed, after marking goals with
/// a blocked dependency as blocked themselves so they are never handed
/// out.
pub struct EditPlan {
    goals: Vec<SubGoal>,
    current: Option<u32>,
}

impl EditPlan {
    pub fn new(goals: Vec<SubGoal>) -> Self {
        Self {
            goals,
            current: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.goals.is_empty()
    }

    pub fn goals(&self) -> &[SubGoal] {
        &self.goals
    }

    pub fn current(&self) -> Option<&SubGoal> {
        let id = self.current?;
        self.goals.iter().find(|g| g.id == id)
    }

    pub fn completed(&self) -> usize {
        self.goals
            .iter()
            .filter(|g| g.status == SubGoalStatus::Completed)
            .count()
    }

    /// Mark the next actionable sub-goal `in_progress` and return it.
    ///
    /// `None` means the plan is exhausted: everything is completed,
    /// blocked, or waiting on a dependency that can no longer complete.
    pub fn start_next(&mut self) -> Option<&SubGoal> {
        self.cascade_blocked();

        let idx = self.goals.iter().position(|g| {
            g.status == SubGoalStatus::Pending
                && g.depends_on
                    .iter()
                    .all(|&d| self.status_of(d) == Some(SubGoalStatus::Completed))
        })?;

        self.current = Some(self.goals[idx].id);
        self.goals[idx].status = SubGoalStatus::InProgress;
        Some(&self.goals[idx])
    }

    /// The in-progress sub-goal finished.
    pub fn complete_current(&mut self) {
        self.set_current(SubGoalStatus::Completed);
    }

    /// The in-progress sub-goal cannot be finished.
    pub fn block_current(&mut self) {
        self.set_current(SubGoalStatus::Blocked);
    }

    fn set_current(&mut self, status: SubGoalStatus) {
        if let Some(id) = self.current.take()
            && let Some(goal) = self.goals.iter_mut().find(|g| g.id == id)
        {
            goal.status = status;
        }
    }

    fn status_of(&self, id: u32) -> Option<SubGoalStatus> {
        self.goals.iter().find(|g| g.id == id).map(|g| g.status)
    }

    /// Propagate `blocked` onto goals that depend on a blocked or missing
    /// goal, repeating until nothing changes.
    fn cascade_blocked(&mut self) {
        loop {
            let newly_blocked: Vec<u32> = self
                .goals
                .iter()
                .filter(|g| {
                    g.status == SubGoalStatus::Pending
                        && g.depends_on.iter().any(|&d| {
                            matches!(self.status_of(d), Some(SubGoalStatus::Blocked) | None)
                        })
                })
                .map(|g| g.id)
                .collect();
            if newly_blocked.is_empty() {
                return;
            }
            for goal in &mut self.goals {
                if newly_blocked.contains(&goal.id) {
                    goal.status = SubGoalStatus::Blocked;
                }
            }
        }
    }
}
