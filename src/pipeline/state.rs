//! Pipeline states and the transitions allowed between them.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    IntentCheck,
    Generate,
    Validate,
    DdlGate,
    Execute,
    Regenerate,
    Summarize,
    Rejected,
    Blocked,
    Failed,
    Done,
}

impl StageKind {
    pub fn is_terminal(self) -> bool {
        matches!(self, StageKind::Rejected | StageKind::Blocked | StageKind::Failed | StageKind::Done)
    }

    /// Transition table. Regenerate is only reachable from Execute, and the
    /// orchestrator additionally bounds it to once per run.
    pub fn can_transition_to(self, next: StageKind) -> bool {
        use StageKind::*;
        matches!(
            (self, next),
            (IntentCheck, Generate)
                | (IntentCheck, Rejected)
                | (Generate, Validate)
                | (Validate, DdlGate)
                | (DdlGate, Execute)
                | (DdlGate, Blocked)
                | (Execute, Summarize)
                | (Execute, Regenerate)
                | (Execute, Failed)
                | (Regenerate, Execute)
                | (Regenerate, Blocked)
                | (Summarize, Done)
        )
    }
}

/// Checks a recorded trace: starts at IntentCheck, every step is allowed,
/// it ends in a terminal state and Regenerate appears at most once.
pub fn is_valid_trace(trace: &[StageKind]) -> bool {
    let starts_right = trace.first() == Some(&StageKind::IntentCheck);
    let ends_terminal = trace.last().map(|s| s.is_terminal()).unwrap_or(false);
    let steps_allowed = trace.windows(2).all(|w| w[0].can_transition_to(w[1]));
    let regenerations = trace.iter().filter(|s| **s == StageKind::Regenerate).count();
    starts_right && ends_terminal && steps_allowed && regenerations <= 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use StageKind::*;

    #[test]
    fn test_terminal_states_have_no_exits() {
        let all = [
            IntentCheck, Generate, Validate, DdlGate, Execute, Regenerate, Summarize, Rejected, Blocked, Failed, Done,
        ];
        for from in all.iter().filter(|s| s.is_terminal()) {
            assert!(all.iter().all(|to| !from.can_transition_to(*to)), "{:?} has an exit", from);
        }
    }

    #[test]
    fn test_happy_path_trace() {
        assert!(is_valid_trace(&[IntentCheck, Generate, Validate, DdlGate, Execute, Summarize, Done]));
    }

    #[test]
    fn test_single_regeneration_trace() {
        assert!(is_valid_trace(&[
            IntentCheck, Generate, Validate, DdlGate, Execute, Regenerate, Execute, Failed
        ]));
        assert!(!is_valid_trace(&[
            IntentCheck, Generate, Validate, DdlGate, Execute, Regenerate, Execute, Regenerate, Execute, Done
        ]));
    }

    #[test]
    fn test_gates_cannot_be_skipped() {
        assert!(!Generate.can_transition_to(Execute));
        assert!(!Validate.can_transition_to(Execute));
        assert!(!IntentCheck.can_transition_to(Blocked));
        assert!(!is_valid_trace(&[IntentCheck, Generate, Validate, DdlGate, Execute]));
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(serde_json::to_string(&DdlGate).unwrap(), "\"ddl_gate\"");
    }
}
