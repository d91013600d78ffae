use std::fmt;

/// Why a call ended in [`CallState::Failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureReason {
    /// The tool is not on the whitelist.
    AccessDenied,
    /// The caller's bucket was empty.
    RateLimited,
    /// The tool returned an error.
    ExecutionFailed,
    /// The caller dropped the call while the tool was running.
    Cancelled,
}

/// States of a single guarded call.
///
/// `Received -> AccessChecked -> RateChecked -> Executing -> Sanitizing ->
/// Completed`, with `Failed` reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallState {
    /// Call accepted, no gate consulted yet.
    Received,
    /// The access gate admitted the tool.
    AccessChecked,
    /// A token was taken, or no limiter is configured.
    RateChecked,
    /// The tool is running.
    Executing,
    /// The result is going through the pipeline.
    Sanitizing,
    /// The result was returned to the caller.
    Completed,
    /// The call ended early.
    Failed(FailureReason),
}

impl CallState {
    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, CallState::Completed | CallState::Failed(_))
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: CallState) -> bool {
        use CallState::*;
        match (self, next) {
            (Received, AccessChecked)
            | (AccessChecked, RateChecked)
            | (RateChecked, Executing)
            | (Executing, Sanitizing)
            | (Sanitizing, Completed) => true,
            (current, Failed(_)) => !current.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallState::Received => f.write_str("received"),
            CallState::AccessChecked => f.write_str("access_checked"),
            CallState::RateChecked => f.write_str("rate_checked"),
            CallState::Executing => f.write_str("executing"),
            CallState::Sanitizing => f.write_str("sanitizing"),
            CallState::Completed => f.write_str("completed"),
            CallState::Failed(reason) => write!(f, "failed({reason:?})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HAPPY_PATH: [CallState; 6] = [
        CallState::Received,
        CallState::AccessChecked,
        CallState::RateChecked,
        CallState::Executing,
        CallState::Sanitizing,
        CallState::Completed,
    ];

    #[test]
    fn test_happy_path_is_legal() {
        for pair in HAPPY_PATH.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_no_skipping_gates() {
        assert!(!CallState::Received.can_transition_to(CallState::RateChecked));
        assert!(!CallState::AccessChecked.can_transition_to(CallState::Executing));
        assert!(!CallState::Executing.can_transition_to(CallState::Completed));
    }

    #[test]
    fn test_failure_from_any_live_state() {
        let failed = CallState::Failed(FailureReason::ExecutionFailed);
        for state in &HAPPY_PATH[..5] {
            assert!(state.can_transition_to(failed));
        }
        assert!(!CallState::Completed.can_transition_to(failed));
        assert!(!failed.can_transition_to(CallState::Failed(FailureReason::Cancelled)));
    }

    #[test]
    fn test_display() {
        assert_eq!(CallState::RateChecked.to_string(), "rate_checked");
        assert_eq!(
            CallState::Failed(FailureReason::AccessDenied).to_string(),
            "failed(AccessDenied)"
        );
    }
}
