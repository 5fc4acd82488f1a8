//! Qualification workflow state machine.
//!
//! A workspace defines an ordered, versioned template of steps. Each chat
//! records per-step progress; transitions are monotonic and qualification
//! is a derived read over that progress, never a stored workflow state.

use std::collections::HashMap;

use tracing::debug;
use ulid::Ulid;

use convoq_core::{
    now_millis, CompletionPredicate, Direction, Message, ProgressRecord, QualificationStatus,
    StepState, WorkflowStep,
};

/// Completion predicate that checks for keyword presence in incoming
/// messages, case-insensitively. A step with no keywords never completes
/// on its own.
pub struct KeywordPredicate;

impl CompletionPredicate for KeywordPredicate {
    fn satisfied(&self, step: &WorkflowStep, conversation: &[Message]) -> bool {
        if step.keywords.is_empty() {
            return false;
        }
        let needles: Vec<String> = step.keywords.iter().map(|k| k.to_lowercase()).collect();
        conversation
            .iter()
            .filter(|m| m.direction == Direction::Incoming)
            .any(|m| {
                let haystack = m.content.to_lowercase();
                needles.iter().any(|n| haystack.contains(n.as_str()))
            })
    }
}

/// Evaluates one chat's progress against a pinned template version.
///
/// Steps are held in position order. Terminal steps are never re-evaluated,
/// so repeated evaluation over the same conversation is idempotent.
pub struct WorkflowMachine {
    steps: Vec<WorkflowStep>,
    predicate: Box<dyn CompletionPredicate>,
}

impl WorkflowMachine {
    pub fn new(mut steps: Vec<WorkflowStep>, predicate: Box<dyn CompletionPredicate>) -> Self {
        steps.sort_by_key(|s| s.position);
        Self { steps, predicate }
    }

    pub fn steps(&self) -> &[WorkflowStep] {
        &self.steps
    }

    fn state_of(&self, progress: &[ProgressRecord], step_id: Ulid) -> StepState {
        progress
            .iter()
            .find(|p| p.step_id == step_id)
            .map(|p| p.state)
            .unwrap_or(StepState::NotStarted)
    }

    /// The step currently in progress: the first one, by position, that has
    /// not reached a terminal state.
    pub fn active_step(&self, progress: &[ProgressRecord]) -> Option<&WorkflowStep> {
        self.steps
            .iter()
            .find(|s| !self.state_of(progress, s.id).is_terminal())
    }

    /// Evaluate the conversation and return the transitions to record.
    ///
    /// Only non-terminal steps are inspected. When a step completes, any
    /// optional step before it that is still untouched is marked skipped;
    /// required steps are left open since they gate qualification.
    pub fn evaluate(
        &self,
        progress: &[ProgressRecord],
        conversation: &[Message],
        trigger: Option<Ulid>,
    ) -> Vec<ProgressRecord> {
        let now = now_millis();
        let mut states: HashMap<Ulid, StepState> = self
            .steps
            .iter()
            .map(|s| (s.id, self.state_of(progress, s.id)))
            .collect();

        let mut transitions = Vec::new();
        for step in &self.steps {
            if states[&step.id].is_terminal() {
                continue;
            }
            if self.predicate.satisfied(step, conversation) {
                states.insert(step.id, StepState::Completed);
                transitions.push(ProgressRecord {
                    step_id: step.id,
                    state: StepState::Completed,
                    message_id: trigger,
                    updated_at: now,
                });
                debug!(step = %step.id, position = step.position, "step completed");
            }
        }

        // Bypass untouched optional steps that a later completion jumped over.
        let frontier = self
            .steps
            .iter()
            .filter(|s| states[&s.id].is_terminal())
            .map(|s| s.position)
            .max();
        if let Some(frontier) = frontier {
            for step in &self.steps {
                if step.position < frontier
                    && !step.required
                    && states[&step.id] == StepState::NotStarted
                {
                    transitions.push(ProgressRecord {
                        step_id: step.id,
                        state: StepState::Skipped,
                        message_id: trigger,
                        updated_at: now,
                    });
                    debug!(step = %step.id, position = step.position, "step skipped");
                }
            }
        }

        transitions
    }

    /// Derived qualification: qualified iff every required step is
    /// completed.
    pub fn qualification(&self, progress: &[ProgressRecord]) -> QualificationStatus {
        let all_required_done = self
            .steps
            .iter()
            .filter(|s| s.required)
            .all(|s| self.state_of(progress, s.id) == StepState::Completed);
        if all_required_done {
            QualificationStatus::Qualified
        } else {
            QualificationStatus::InProgress
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(
        workspace_id: Ulid,
        position: u32,
        required: bool,
        keywords: &[&str],
    ) -> WorkflowStep {
        WorkflowStep::new(
            workspace_id,
            1,
            position,
            &format!("step {}", position),
            required,
            keywords.iter().map(|s| s.to_string()).collect(),
        )
    }

    fn incoming(text: &str) -> Message {
        Message::incoming(Ulid::new(), text, now_millis())
    }

    fn machine(steps: Vec<WorkflowStep>) -> WorkflowMachine {
        WorkflowMachine::new(steps, Box::new(KeywordPredicate))
    }

    #[test]
    fn keyword_match_is_case_insensitive_and_incoming_only() {
        let ws = Ulid::new();
        let s = step(ws, 0, true, &["budget"]);

        let pred = KeywordPredicate;
        assert!(pred.satisfied(&s, &[incoming("My BUDGET is 5k")]));
        assert!(!pred.satisfied(&s, &[incoming("hello there")]));

        // The bot mentioning the keyword does not complete the step
        let outgoing = Message::outgoing(Ulid::new(), "what is your budget?", None);
        assert!(!pred.satisfied(&s, &[outgoing]));
    }

    #[test]
    fn completes_matching_steps_in_order() {
        let ws = Ulid::new();
        let steps = vec![step(ws, 0, true, &["name"]), step(ws, 1, true, &["budget"])];
        let m = machine(steps.clone());

        let conversation = vec![incoming("my name is Ana")];
        let transitions = m.evaluate(&[], &conversation, Some(conversation[0].id));

        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].step_id, steps[0].id);
        assert_eq!(transitions[0].state, StepState::Completed);
        assert_eq!(transitions[0].message_id, Some(conversation[0].id));
    }

    #[test]
    fn completed_steps_are_not_reevaluated() {
        let ws = Ulid::new();
        let steps = vec![step(ws, 0, true, &["name"])];
        let m = machine(steps.clone());

        let progress = vec![ProgressRecord {
            step_id: steps[0].id,
            state: StepState::Completed,
            message_id: None,
            updated_at: now_millis(),
        }];
        let transitions = m.evaluate(&progress, &[incoming("my name is Ana")], None);
        assert!(transitions.is_empty());
    }

    #[test]
    fn later_completion_skips_untouched_optional_step() {
        let ws = Ulid::new();
        let steps = vec![
            step(ws, 0, true, &["name"]),
            step(ws, 1, false, &["company"]),
            step(ws, 2, true, &["budget"]),
        ];
        let m = machine(steps.clone());

        let conversation = vec![incoming("name: Ana, budget: 10k")];
        let transitions = m.evaluate(&[], &conversation, None);

        let by_step: HashMap<Ulid, StepState> =
            transitions.iter().map(|t| (t.step_id, t.state)).collect();
        assert_eq!(by_step[&steps[0].id], StepState::Completed);
        assert_eq!(by_step[&steps[1].id], StepState::Skipped);
        assert_eq!(by_step[&steps[2].id], StepState::Completed);
    }

    #[test]
    fn required_steps_are_never_skipped() {
        let ws = Ulid::new();
        let steps = vec![step(ws, 0, true, &["name"]), step(ws, 1, true, &["budget"])];
        let m = machine(steps.clone());

        // Only the second step matches
        let transitions = m.evaluate(&[], &[incoming("budget is 10k")], None);
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].step_id, steps[1].id);
        assert_eq!(transitions[0].state, StepState::Completed);
    }

    #[test]
    fn active_step_is_first_open_position() {
        let ws = Ulid::new();
        let steps = vec![step(ws, 0, true, &["name"]), step(ws, 1, true, &["budget"])];
        let m = machine(steps.clone());

        assert_eq!(m.active_step(&[]).unwrap().id, steps[0].id);

        let progress = vec![ProgressRecord {
            step_id: steps[0].id,
            state: StepState::Completed,
            message_id: None,
            updated_at: now_millis(),
        }];
        assert_eq!(m.active_step(&progress).unwrap().id, steps[1].id);
    }

    #[test]
    fn qualification_requires_every_required_step() {
        let ws = Ulid::new();
        let steps = vec![
            step(ws, 0, true, &["name"]),
            step(ws, 1, false, &["company"]),
            step(ws, 2, true, &["budget"]),
        ];
        let m = machine(steps.clone());

        assert_eq!(m.qualification(&[]), QualificationStatus::InProgress);

        let mut progress = vec![ProgressRecord {
            step_id: steps[0].id,
            state: StepState::Completed,
            message_id: None,
            updated_at: now_millis(),
        }];
        assert_eq!(m.qualification(&progress), QualificationStatus::InProgress);

        // Optional step skipped, both required completed: qualified
        progress.push(ProgressRecord {
            step_id: steps[1].id,
            state: StepState::Skipped,
            message_id: None,
            updated_at: now_millis(),
        });
        progress.push(ProgressRecord {
            step_id: steps[2].id,
            state: StepState::Completed,
            message_id: None,
            updated_at: now_millis(),
        });
        assert_eq!(m.qualification(&progress), QualificationStatus::Qualified);
    }

    #[test]
    fn empty_template_is_trivially_qualified() {
        let m = machine(Vec::new());
        assert_eq!(m.qualification(&[]), QualificationStatus::Qualified);
        assert!(m.active_step(&[]).is_none());
    }
}
