// Workflow domain entity and state machine
//
// The workflow is the top-level unit of execution. Its state machine is the
// explicit transition table in `WorkflowState::can_transition_to`; every
// transition anywhere in the system goes through that table.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ForemanError, Result};
use crate::phase::PhaseName;

/// Default base branch for new workflows
pub const DEFAULT_BASE_BRANCH: &str = "main";

/// Lifecycle states of a workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum WorkflowState {
    Created,
    Initialized,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
    Stuck,
    Archived,
}

impl WorkflowState {
    /// Terminal states: the workflow will make no further progress.
    /// Archival is a separate, post-terminal step.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowState::Completed | WorkflowState::Failed | WorkflowState::Cancelled
        )
    }

    /// The legal transition table. Anything not listed here is rejected
    /// with `InvalidTransition`.
    pub fn can_transition_to(&self, next: WorkflowState) -> bool {
        use WorkflowState::*;
        match (*self, next) {
            (Created, Initialized) => true,
            (Created, Running) | (Initialized, Running) => true,
            (Running, Completed)
            | (Running, Failed)
            | (Running, Cancelled)
            | (Running, Paused)
            | (Running, Stuck) => true,
            (Paused, Running) | (Paused, Cancelled) => true,
            (Stuck, Running) | (Stuck, Failed) | (Stuck, Cancelled) => true,
            (Completed, Archived) | (Failed, Archived) | (Cancelled, Archived) => true,
            _ => false,
        }
    }

    /// Validate a transition, producing the error the caller surfaces.
    pub fn check_transition(&self, next: WorkflowState) -> Result<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(ForemanError::InvalidTransition {
                from: *self,
                to: next,
            })
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowState::Created => "created",
            WorkflowState::Initialized => "initialized",
            WorkflowState::Running => "running",
            WorkflowState::Paused => "paused",
            WorkflowState::Completed => "completed",
            WorkflowState::Failed => "failed",
            WorkflowState::Cancelled => "cancelled",
            WorkflowState::Stuck => "stuck",
            WorkflowState::Archived => "archived",
        }
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkflowState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "created" => Ok(WorkflowState::Created),
            "initialized" => Ok(WorkflowState::Initialized),
            "running" => Ok(WorkflowState::Running),
            "paused" => Ok(WorkflowState::Paused),
            "completed" => Ok(WorkflowState::Completed),
            "failed" => Ok(WorkflowState::Failed),
            "cancelled" => Ok(WorkflowState::Cancelled),
            "stuck" => Ok(WorkflowState::Stuck),
            "archived" => Ok(WorkflowState::Archived),
            _ => Err(format!("unknown workflow state: {}", s)),
        }
    }
}

/// Workflow kinds differ only in their phase plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum WorkflowKind {
    Standard,
    Tdd,
    PlanOnly,
    TestOnly,
    ReviewOnly,
}

impl WorkflowKind {
    /// The ordered phase plan for this kind.
    pub fn phase_plan(&self) -> &'static [PhaseName] {
        use PhaseName::*;
        match self {
            WorkflowKind::Standard => &[Plan, Build, Test, Review],
            WorkflowKind::Tdd => &[
                Plan,
                GenerateTests,
                VerifyRed,
                Build,
                VerifyGreen,
                Refactor,
                Review,
            ],
            WorkflowKind::PlanOnly => &[Plan],
            WorkflowKind::TestOnly => &[Test],
            WorkflowKind::ReviewOnly => &[Review],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowKind::Standard => "standard",
            WorkflowKind::Tdd => "tdd",
            WorkflowKind::PlanOnly => "plan_only",
            WorkflowKind::TestOnly => "test_only",
            WorkflowKind::ReviewOnly => "review_only",
        }
    }
}

impl std::fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkflowKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "standard" => Ok(WorkflowKind::Standard),
            "tdd" => Ok(WorkflowKind::Tdd),
            "plan_only" => Ok(WorkflowKind::PlanOnly),
            "test_only" => Ok(WorkflowKind::TestOnly),
            "review_only" => Ok(WorkflowKind::ReviewOnly),
            _ => Err(format!("unknown workflow kind: {}", s)),
        }
    }
}

/// Which tier of models the router should prefer for this workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum ModelSet {
    #[default]
    Base,
    Fast,
    Powerful,
}

impl ModelSet {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelSet::Base => "base",
            ModelSet::Fast => "fast",
            ModelSet::Powerful => "powerful",
        }
    }
}

impl std::fmt::Display for ModelSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ModelSet {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "base" => Ok(ModelSet::Base),
            "fast" => Ok(ModelSet::Fast),
            "powerful" => Ok(ModelSet::Powerful),
            _ => Err(format!("unknown model set: {}", s)),
        }
    }
}

/// Classification of the issue that sourced this workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum IssueClass {
    Feature,
    Bug,
    Test,
    Refactor,
    Docs,
    Chore,
}

impl IssueClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueClass::Feature => "feature",
            IssueClass::Bug => "bug",
            IssueClass::Test => "test",
            IssueClass::Refactor => "refactor",
            IssueClass::Docs => "docs",
            IssueClass::Chore => "chore",
        }
    }
}

impl std::fmt::Display for IssueClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for IssueClass {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "feature" => Ok(IssueClass::Feature),
            "bug" => Ok(IssueClass::Bug),
            "test" => Ok(IssueClass::Test),
            "refactor" => Ok(IssueClass::Refactor),
            "docs" => Ok(IssueClass::Docs),
            "chore" => Ok(IssueClass::Chore),
            _ => Err(format!("unknown issue class: {}", s)),
        }
    }
}

/// The top-level unit of orchestration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Opaque globally-unique id, assigned at creation
    pub id: String,
    pub name: String,
    pub kind: WorkflowKind,
    pub state: WorkflowState,
    /// The task the workflow is carrying out, as given by the caller
    pub task: String,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_activity_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,

    pub issue_ref: Option<String>,
    pub branch: Option<String>,
    pub base_branch: String,
    pub worktree_path: Option<String>,

    pub tags: Vec<String>,
    pub metadata: BTreeMap<String, serde_json::Value>,

    pub exit_code: Option<i32>,
    pub error_message: Option<String>,
    pub retry_count: u32,

    pub cost_usd: f64,
    pub total_tokens: u64,
    pub phase_count: u32,

    pub backend_port: Option<u16>,
    pub frontend_port: Option<u16>,
    pub issue_class: Option<IssueClass>,
    pub model_set: ModelSet,

    /// Optional hard ceiling on provider spend
    pub budget_usd: Option<f64>,
}

impl Workflow {
    /// Create a new workflow in `created` from a caller spec.
    pub fn new(spec: WorkflowSpec) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7().to_string(),
            name: spec.name,
            kind: spec.kind,
            state: WorkflowState::Created,
            task: spec.task,
            created_at: now,
            started_at: None,
            last_activity_at: now,
            completed_at: None,
            archived_at: None,
            issue_ref: spec.issue_ref,
            branch: spec.branch,
            base_branch: spec
                .base_branch
                .unwrap_or_else(|| DEFAULT_BASE_BRANCH.to_string()),
            worktree_path: None,
            tags: spec.tags,
            metadata: spec.metadata,
            exit_code: None,
            error_message: None,
            retry_count: 0,
            cost_usd: 0.0,
            total_tokens: 0,
            phase_count: 0,
            backend_port: None,
            frontend_port: None,
            issue_class: spec.issue_class,
            model_set: spec.model_set,
            budget_usd: spec.budget_usd,
        }
    }
}

/// Caller-supplied description of a workflow to create
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub name: String,
    pub kind: WorkflowKind,
    /// Task description, typically the issue body
    pub task: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub model_set: ModelSet,
    #[serde(default)]
    pub budget_usd: Option<f64>,
    #[serde(default)]
    pub issue_ref: Option<String>,
    #[serde(default)]
    pub issue_class: Option<IssueClass>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub base_branch: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl WorkflowSpec {
    pub fn new(name: impl Into<String>, kind: WorkflowKind, task: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            task: task.into(),
            tags: Vec::new(),
            model_set: ModelSet::default(),
            budget_usd: None,
            issue_ref: None,
            issue_class: None,
            branch: None,
            base_branch: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Validate caller input before a row is created.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ForemanError::validation("workflow name must not be empty"));
        }
        if self.task.trim().is_empty() {
            return Err(ForemanError::validation("task description must not be empty"));
        }
        if let Some(budget) = self.budget_usd {
            if budget <= 0.0 {
                return Err(ForemanError::validation("budget_usd must be positive"));
            }
        }
        Ok(())
    }
}

/// Filter for workflow listings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListFilter {
    pub state: Option<WorkflowState>,
    pub kind: Option<WorkflowKind>,
    pub issue_class: Option<IssueClass>,
    pub tag: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table_happy_path() {
        use WorkflowState::*;
        assert!(Created.can_transition_to(Initialized));
        assert!(Initialized.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Running));
        assert!(Stuck.can_transition_to(Failed));
        assert!(Completed.can_transition_to(Archived));
    }

    #[test]
    fn test_transition_table_rejections() {
        use WorkflowState::*;
        assert!(!Created.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Archived.can_transition_to(Running));
        assert!(!Paused.can_transition_to(Completed));
        assert!(!Running.can_transition_to(Archived));
    }

    #[test]
    fn test_check_transition_error() {
        let err = WorkflowState::Created
            .check_transition(WorkflowState::Archived)
            .unwrap_err();
        assert!(matches!(
            err,
            ForemanError::InvalidTransition {
                from: WorkflowState::Created,
                to: WorkflowState::Archived,
            }
        ));
    }

    #[test]
    fn test_phase_plans() {
        assert_eq!(WorkflowKind::Standard.phase_plan().len(), 4);
        assert_eq!(WorkflowKind::Tdd.phase_plan().len(), 7);
        assert_eq!(WorkflowKind::PlanOnly.phase_plan(), &[PhaseName::Plan]);
    }

    #[test]
    fn test_new_workflow_defaults() {
        let wf = Workflow::new(WorkflowSpec::new("x", WorkflowKind::Standard, "do it"));
        assert_eq!(wf.state, WorkflowState::Created);
        assert_eq!(wf.base_branch, "main");
        assert_eq!(wf.model_set, ModelSet::Base);
        assert!(wf.started_at.is_none());
        assert!(!wf.id.is_empty());
    }

    #[test]
    fn test_spec_validation() {
        assert!(WorkflowSpec::new("", WorkflowKind::Standard, "t")
            .validate()
            .is_err());
        assert!(WorkflowSpec::new("n", WorkflowKind::Standard, " ")
            .validate()
            .is_err());
        let mut spec = WorkflowSpec::new("n", WorkflowKind::Standard, "t");
        spec.budget_usd = Some(-1.0);
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_state_round_trip() {
        for s in [
            "created",
            "initialized",
            "running",
            "paused",
            "completed",
            "failed",
            "cancelled",
            "stuck",
            "archived",
        ] {
            let state: WorkflowState = s.parse().unwrap();
            assert_eq!(state.to_string(), s);
        }
    }
}
