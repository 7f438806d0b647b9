// Orchestrator events
//
// Events are the immutable audit trail: every workflow and phase transition
// produces one, they are persisted append-only, and the bus fans them out to
// in-process subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::phase::PhaseName;
use crate::workflow::WorkflowState;

/// The closed vocabulary of event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    WorkflowCreated,
    WorkflowStateChanged,
    PhaseStarted,
    PhaseCompleted,
    PhaseFailed,
    WorkflowPaused,
    WorkflowResumed,
    WorkflowCancelled,
    WorkflowArchived,
    ResourceAllocated,
    ResourceReleased,
    ResumeRequired,
    ErrorOccurred,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::WorkflowCreated => "workflow_created",
            EventType::WorkflowStateChanged => "workflow_state_changed",
            EventType::PhaseStarted => "phase_started",
            EventType::PhaseCompleted => "phase_completed",
            EventType::PhaseFailed => "phase_failed",
            EventType::WorkflowPaused => "workflow_paused",
            EventType::WorkflowResumed => "workflow_resumed",
            EventType::WorkflowCancelled => "workflow_cancelled",
            EventType::WorkflowArchived => "workflow_archived",
            EventType::ResourceAllocated => "resource_allocated",
            EventType::ResourceReleased => "resource_released",
            EventType::ResumeRequired => "resume_required",
            EventType::ErrorOccurred => "error_occurred",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "workflow_created" => Ok(EventType::WorkflowCreated),
            "workflow_state_changed" => Ok(EventType::WorkflowStateChanged),
            "phase_started" => Ok(EventType::PhaseStarted),
            "phase_completed" => Ok(EventType::PhaseCompleted),
            "phase_failed" => Ok(EventType::PhaseFailed),
            "workflow_paused" => Ok(EventType::WorkflowPaused),
            "workflow_resumed" => Ok(EventType::WorkflowResumed),
            "workflow_cancelled" => Ok(EventType::WorkflowCancelled),
            "workflow_archived" => Ok(EventType::WorkflowArchived),
            "resource_allocated" => Ok(EventType::ResourceAllocated),
            "resource_released" => Ok(EventType::ResourceReleased),
            "resume_required" => Ok(EventType::ResumeRequired),
            "error_occurred" => Ok(EventType::ErrorOccurred),
            _ => Err(format!("unknown event type: {}", s)),
        }
    }
}

/// Event severity, used for subscriber filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    #[default]
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => f.write_str("INFO"),
            Severity::Warn => f.write_str("WARN"),
            Severity::Error => f.write_str("ERROR"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "INFO" => Ok(Severity::Info),
            "WARN" => Ok(Severity::Warn),
            "ERROR" => Ok(Severity::Error),
            _ => Err(format!("unknown severity: {}", s)),
        }
    }
}

/// Immutable audit entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic per-store sequence; 0 until persisted
    #[serde(default)]
    pub seq: i64,
    pub workflow_id: String,
    pub event_type: EventType,
    #[serde(default)]
    pub severity: Severity,
    pub phase_name: Option<PhaseName>,
    pub from_state: Option<WorkflowState>,
    pub to_state: Option<WorkflowState>,
    pub message: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl Event {
    fn base(workflow_id: impl Into<String>, event_type: EventType) -> Self {
        Self {
            seq: 0,
            workflow_id: workflow_id.into(),
            event_type,
            severity: Severity::Info,
            phase_name: None,
            from_state: None,
            to_state: None,
            message: None,
            metadata: None,
            created_at: Utc::now(),
        }
    }

    pub fn workflow_created(workflow_id: impl Into<String>) -> Self {
        Self::base(workflow_id, EventType::WorkflowCreated)
    }

    pub fn state_changed(
        workflow_id: impl Into<String>,
        from: WorkflowState,
        to: WorkflowState,
    ) -> Self {
        let mut event = Self::base(workflow_id, EventType::WorkflowStateChanged);
        event.from_state = Some(from);
        event.to_state = Some(to);
        event
    }

    pub fn phase_started(workflow_id: impl Into<String>, phase: PhaseName) -> Self {
        let mut event = Self::base(workflow_id, EventType::PhaseStarted);
        event.phase_name = Some(phase);
        event
    }

    pub fn phase_completed(workflow_id: impl Into<String>, phase: PhaseName) -> Self {
        let mut event = Self::base(workflow_id, EventType::PhaseCompleted);
        event.phase_name = Some(phase);
        event
    }

    pub fn phase_failed(
        workflow_id: impl Into<String>,
        phase: PhaseName,
        message: impl Into<String>,
    ) -> Self {
        let mut event = Self::base(workflow_id, EventType::PhaseFailed);
        event.phase_name = Some(phase);
        event.severity = Severity::Warn;
        event.message = Some(message.into());
        event
    }

    pub fn workflow_paused(workflow_id: impl Into<String>) -> Self {
        Self::base(workflow_id, EventType::WorkflowPaused)
    }

    pub fn workflow_resumed(workflow_id: impl Into<String>) -> Self {
        Self::base(workflow_id, EventType::WorkflowResumed)
    }

    pub fn workflow_cancelled(workflow_id: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut event = Self::base(workflow_id, EventType::WorkflowCancelled);
        event.message = Some(reason.into());
        event
    }

    pub fn workflow_archived(workflow_id: impl Into<String>) -> Self {
        Self::base(workflow_id, EventType::WorkflowArchived)
    }

    pub fn resource_allocated(
        workflow_id: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        let mut event = Self::base(workflow_id, EventType::ResourceAllocated);
        event.message = Some(resource.into());
        event
    }

    pub fn resource_released(workflow_id: impl Into<String>, resource: impl Into<String>) -> Self {
        let mut event = Self::base(workflow_id, EventType::ResourceReleased);
        event.message = Some(resource.into());
        event
    }

    pub fn resume_required(workflow_id: impl Into<String>, message: impl Into<String>) -> Self {
        let mut event = Self::base(workflow_id, EventType::ResumeRequired);
        event.severity = Severity::Warn;
        event.message = Some(message.into());
        event
    }

    pub fn error_occurred(workflow_id: impl Into<String>, message: impl Into<String>) -> Self {
        let mut event = Self::base(workflow_id, EventType::ErrorOccurred);
        event.severity = Severity::Error;
        event.message = Some(message.into());
        event
    }

    /// Attach structured metadata.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_round_trip() {
        for s in [
            "workflow_created",
            "workflow_state_changed",
            "phase_started",
            "phase_completed",
            "phase_failed",
            "workflow_paused",
            "workflow_resumed",
            "workflow_cancelled",
            "workflow_archived",
            "resource_allocated",
            "resource_released",
            "resume_required",
            "error_occurred",
        ] {
            let et: EventType = s.parse().unwrap();
            assert_eq!(et.to_string(), s);
        }
    }

    #[test]
    fn test_constructors_set_fields() {
        let event = Event::state_changed("wf-1", WorkflowState::Created, WorkflowState::Running);
        assert_eq!(event.event_type, EventType::WorkflowStateChanged);
        assert_eq!(event.from_state, Some(WorkflowState::Created));
        assert_eq!(event.to_state, Some(WorkflowState::Running));
        assert_eq!(event.seq, 0);

        let event = Event::phase_failed("wf-1", PhaseName::Build, "boom");
        assert_eq!(event.severity, Severity::Warn);
        assert_eq!(event.message.as_deref(), Some("boom"));

        let event = Event::error_occurred("wf-1", "invariant");
        assert_eq!(event.severity, Severity::Error);
    }

    #[test]
    fn test_serde_snake_case() {
        let event = Event::workflow_created("wf-1");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "workflow_created");
        assert_eq!(json["severity"], "INFO");
    }
}
