//! Two-phase deferred template resolution
//!
//! Task arguments are stored unresolved at assembly. At execution, only the
//! task's hook configuration (its `if` gate) is rendered first; argument
//! templates are rendered just-in-time once the gate has decided the task
//! will run on that host. This keeps argument templates referencing
//! variables absent on skipped hosts from failing spuriously.
//!
//! The ordering is enforced by an explicit state machine per (task, host)
//! pair rather than call-order convention:
//!
//! ```text
//! Pending -> HookEvaluated { skipped } -> ArgsResolved
//! ```
//!
//! Argument rendering is only legal in `HookEvaluated { skipped: false }`,
//! and result storage (`set_to`) only in `ArgsResolved`.

use crate::error::TemplateError;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionPhase {
    Pending,
    HookEvaluated { skipped: bool },
    ArgsResolved,
}

impl ResolutionPhase {
    fn name(&self) -> &'static str {
        match self {
            ResolutionPhase::Pending => "Pending",
            ResolutionPhase::HookEvaluated { .. } => "HookEvaluated",
            ResolutionPhase::ArgsResolved => "ArgsResolved",
        }
    }
}

/// Tracks the resolution phase of every (task, host) pair in a run.
#[derive(Debug, Default)]
pub struct ResolutionTracker {
    states: Mutex<HashMap<(usize, String), ResolutionPhase>>,
}

impl ResolutionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self, task_id: usize, host: &str) -> ResolutionPhase {
        self.states
            .lock()
            .unwrap()
            .get(&(task_id, host.to_string()))
            .copied()
            .unwrap_or(ResolutionPhase::Pending)
    }

    /// Records the gate verdict. Legal only from `Pending`.
    pub fn mark_gate_evaluated(
        &self,
        task_id: usize,
        task: &str,
        host: &str,
        skipped: bool,
    ) -> Result<(), TemplateError> {
        self.transition(
            task_id,
            task,
            host,
            ResolutionPhase::Pending,
            ResolutionPhase::HookEvaluated { skipped },
        )
    }

    /// Records that the deferred argument templates were rendered. Legal
    /// only from `HookEvaluated { skipped: false }`.
    pub fn mark_args_resolved(
        &self,
        task_id: usize,
        task: &str,
        host: &str,
    ) -> Result<(), TemplateError> {
        self.transition(
            task_id,
            task,
            host,
            ResolutionPhase::HookEvaluated { skipped: false },
            ResolutionPhase::ArgsResolved,
        )
    }

    /// Result storage requires fully resolved arguments: a task's stored
    /// result is never observable by the task that produced it.
    pub fn check_can_store(
        &self,
        task_id: usize,
        task: &str,
        host: &str,
    ) -> Result<(), TemplateError> {
        let current = self.phase(task_id, host);
        if current != ResolutionPhase::ArgsResolved {
            return Err(TemplateError::ResolutionOrder {
                task: task.to_string(),
                host: host.to_string(),
                state: current.name().to_string(),
                expected: "ArgsResolved".to_string(),
            });
        }
        Ok(())
    }

    fn transition(
        &self,
        task_id: usize,
        task: &str,
        host: &str,
        expected: ResolutionPhase,
        next: ResolutionPhase,
    ) -> Result<(), TemplateError> {
        let mut states = self.states.lock().unwrap();
        let key = (task_id, host.to_string());
        let current = states.get(&key).copied().unwrap_or(ResolutionPhase::Pending);
        if current != expected {
            return Err(TemplateError::ResolutionOrder {
                task: task.to_string(),
                host: host.to_string(),
                state: current.name().to_string(),
                expected: expected.name().to_string(),
            });
        }
        states.insert(key, next);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        let tracker = ResolutionTracker::new();
        assert_eq!(tracker.phase(1, "sw01"), ResolutionPhase::Pending);

        tracker.mark_gate_evaluated(1, "deploy", "sw01", false).unwrap();
        assert_eq!(
            tracker.phase(1, "sw01"),
            ResolutionPhase::HookEvaluated { skipped: false }
        );

        tracker.mark_args_resolved(1, "deploy", "sw01").unwrap();
        assert_eq!(tracker.phase(1, "sw01"), ResolutionPhase::ArgsResolved);
        tracker.check_can_store(1, "deploy", "sw01").unwrap();
    }

    #[test]
    fn args_cannot_resolve_before_gate() {
        let tracker = ResolutionTracker::new();
        let err = tracker.mark_args_resolved(1, "deploy", "sw01").unwrap_err();
        assert!(matches!(err, TemplateError::ResolutionOrder { .. }));
    }

    #[test]
    fn skipped_host_cannot_resolve_args() {
        let tracker = ResolutionTracker::new();
        tracker.mark_gate_evaluated(1, "deploy", "sw01", true).unwrap();
        assert!(tracker.mark_args_resolved(1, "deploy", "sw01").is_err());
    }

    #[test]
    fn store_requires_resolved_args() {
        let tracker = ResolutionTracker::new();
        tracker.mark_gate_evaluated(1, "deploy", "sw01", false).unwrap();
        assert!(tracker.check_can_store(1, "deploy", "sw01").is_err());
        tracker.mark_args_resolved(1, "deploy", "sw01").unwrap();
        assert!(tracker.check_can_store(1, "deploy", "sw01").is_ok());
    }

    #[test]
    fn pairs_are_independent_across_hosts_and_tasks() {
        let tracker = ResolutionTracker::new();
        tracker.mark_gate_evaluated(1, "deploy", "sw01", false).unwrap();
        assert_eq!(tracker.phase(1, "sw02"), ResolutionPhase::Pending);
        assert_eq!(tracker.phase(2, "sw01"), ResolutionPhase::Pending);
    }
}
