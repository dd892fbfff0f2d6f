//! Outcome of a single promotion step.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What a promotion step did.
///
/// Hard failures are `Err(MaestroError)`; a step that decided not to act
/// (disabled by config, tool absent, nothing to do) is `Skipped`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    Done { detail: String },
    Skipped { reason: String },
}

impl StepOutcome {
    pub fn done(detail: impl Into<String>) -> Self {
        StepOutcome::Done {
            detail: detail.into(),
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        StepOutcome::Skipped {
            reason: reason.into(),
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, StepOutcome::Skipped { .. })
    }

    /// The detail of a `Done` outcome.
    pub fn detail(&self) -> Option<&str> {
        match self {
            StepOutcome::Done { detail } => Some(detail),
            StepOutcome::Skipped { .. } => None,
        }
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutcome::Done { detail } => write!(f, "done: {detail}"),
            StepOutcome::Skipped { reason } => write!(f, "skipped: {reason}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_accessors() {
        let done = StepOutcome::done("abc123");
        assert_eq!(done.detail(), Some("abc123"));
        assert!(!done.is_skipped());

        let skipped = StepOutcome::skipped("gh not available");
        assert!(skipped.is_skipped());
        assert_eq!(skipped.detail(), None);
        assert_eq!(skipped.to_string(), "skipped: gh not available");
    }

    #[test]
    fn test_outcome_serializes_tagged() {
        let value = serde_json::to_value(StepOutcome::skipped("disabled")).unwrap();
        assert_eq!(value["outcome"], "skipped");
        assert_eq!(value["reason"], "disabled");
    }
}
