// Phase domain entity
//
// One execution attempt of a named step inside a workflow. Retries create
// new rows with the same name and a bumped attempt; `(workflow_id, name,
// attempt)` is the identity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default number of attempts a phase gets before it fails for good
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// The closed set of phase names
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseName {
    Plan,
    Build,
    Test,
    Review,
    Deploy,
    GenerateTests,
    VerifyRed,
    VerifyGreen,
    Refactor,
}

impl PhaseName {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseName::Plan => "plan",
            PhaseName::Build => "build",
            PhaseName::Test => "test",
            PhaseName::Review => "review",
            PhaseName::Deploy => "deploy",
            PhaseName::GenerateTests => "generate_tests",
            PhaseName::VerifyRed => "verify_red",
            PhaseName::VerifyGreen => "verify_green",
            PhaseName::Refactor => "refactor",
        }
    }

    /// Phases that execute the project test suite rather than asking a
    /// provider to write something.
    pub fn runs_tests(&self) -> bool {
        matches!(
            self,
            PhaseName::Test | PhaseName::VerifyRed | PhaseName::VerifyGreen
        )
    }

    /// Optional phases are skipped, not failed, when retries are exhausted.
    pub fn is_optional(&self) -> bool {
        matches!(self, PhaseName::Refactor)
    }
}

impl std::fmt::Display for PhaseName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PhaseName {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "plan" => Ok(PhaseName::Plan),
            "build" => Ok(PhaseName::Build),
            "test" => Ok(PhaseName::Test),
            "review" => Ok(PhaseName::Review),
            "deploy" => Ok(PhaseName::Deploy),
            "generate_tests" => Ok(PhaseName::GenerateTests),
            "verify_red" => Ok(PhaseName::VerifyRed),
            "verify_green" => Ok(PhaseName::VerifyGreen),
            "refactor" => Ok(PhaseName::Refactor),
            _ => Err(format!("unknown phase name: {}", s)),
        }
    }
}

/// Lifecycle states of a phase attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseState {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl PhaseState {
    /// Phases only move forward.
    pub fn can_transition_to(&self, next: PhaseState) -> bool {
        use PhaseState::*;
        match (*self, next) {
            (Pending, Running) | (Pending, Skipped) => true,
            (Running, Completed) | (Running, Failed) => true,
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PhaseState::Completed | PhaseState::Failed | PhaseState::Skipped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseState::Pending => "pending",
            PhaseState::Running => "running",
            PhaseState::Completed => "completed",
            PhaseState::Failed => "failed",
            PhaseState::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for PhaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PhaseState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PhaseState::Pending),
            "running" => Ok(PhaseState::Running),
            "completed" => Ok(PhaseState::Completed),
            "failed" => Ok(PhaseState::Failed),
            "skipped" => Ok(PhaseState::Skipped),
            _ => Err(format!("unknown phase state: {}", s)),
        }
    }
}

/// One execution attempt of a named step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    pub workflow_id: String,
    pub name: PhaseName,
    /// 1-based attempt counter; retries bump it by one
    pub attempt: u32,
    /// 0-based position in the workflow plan
    pub index: u32,
    pub state: PhaseState,

    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,

    pub exit_code: Option<i32>,
    pub error_message: Option<String>,
    pub max_attempts: u32,

    pub llm_requests: u32,
    pub llm_tokens_in: u64,
    pub llm_tokens_out: u64,
    pub cost_usd: f64,
}

impl Phase {
    /// A fresh pending attempt.
    pub fn pending(
        workflow_id: impl Into<String>,
        name: PhaseName,
        index: u32,
        attempt: u32,
        max_attempts: u32,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            name,
            attempt,
            index,
            state: PhaseState::Pending,
            started_at: None,
            completed_at: None,
            duration_seconds: None,
            exit_code: None,
            error_message: None,
            max_attempts,
            llm_requests: 0,
            llm_tokens_in: 0,
            llm_tokens_out: 0,
            cost_usd: 0.0,
        }
    }

    /// Whether another attempt may follow this one.
    pub fn has_attempts_remaining(&self) -> bool {
        self.attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_forward_only() {
        use PhaseState::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));
        assert!(Pending.can_transition_to(Skipped));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Failed.can_transition_to(Pending));
        assert!(!Skipped.can_transition_to(Running));
    }

    #[test]
    fn test_name_round_trip() {
        for s in [
            "plan",
            "build",
            "test",
            "review",
            "deploy",
            "generate_tests",
            "verify_red",
            "verify_green",
            "refactor",
        ] {
            let name: PhaseName = s.parse().unwrap();
            assert_eq!(name.to_string(), s);
        }
    }

    #[test]
    fn test_attempts_remaining() {
        let mut phase = Phase::pending("wf", PhaseName::Build, 1, 1, 3);
        assert!(phase.has_attempts_remaining());
        phase.attempt = 3;
        assert!(!phase.has_attempts_remaining());
    }

    #[test]
    fn test_test_running_phases() {
        assert!(PhaseName::VerifyRed.runs_tests());
        assert!(PhaseName::VerifyGreen.runs_tests());
        assert!(PhaseName::Test.runs_tests());
        assert!(!PhaseName::Build.runs_tests());
        assert!(PhaseName::Refactor.is_optional());
        assert!(!PhaseName::Review.is_optional());
    }
}
