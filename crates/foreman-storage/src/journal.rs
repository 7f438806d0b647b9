// Event journal
//
// Append-only newline-delimited JSON records, one per event, written by a
// bus subscriber. The journal is the canonical feed for external
// subscribers, and replaying it reconstructs workflow and phase states.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::error;

use foreman_core::{Event, EventHandler, EventType, PhaseName, PhaseState, WorkflowState};

use crate::store::StoreError;

/// Append-only ndjson sink for events
pub struct EventJournal {
    path: PathBuf,
    file: Mutex<File>,
}

impl EventJournal {
    /// Open (creating parents and the file if missing) in append mode.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Serialization(format!("cannot create journal dir: {}", e))
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| StoreError::Serialization(format!("cannot open journal: {}", e)))?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event as a single JSON line.
    pub fn append(&self, event: &Event) -> Result<(), StoreError> {
        let line = serde_json::to_string(event)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let mut file = self.file.lock();
        writeln!(file, "{}", line)
            .and_then(|_| file.flush())
            .map_err(|e| StoreError::Serialization(format!("journal write failed: {}", e)))
    }

    /// A sync bus handler that appends every delivered event. Failures are
    /// logged and swallowed so one bad write never disturbs other
    /// subscribers.
    pub fn handler(self: &Arc<Self>) -> EventHandler {
        let journal = self.clone();
        EventHandler::sync(move |event| {
            if let Err(err) = journal.append(event) {
                error!(error = %err, event_type = %event.event_type, "journal append failed");
            }
        })
    }

    /// Read the whole journal back in order. Lines that fail to parse are
    /// skipped with an error log rather than poisoning the replay.
    pub fn read_all(path: &Path) -> Result<Vec<Event>, StoreError> {
        let file = File::open(path)
            .map_err(|e| StoreError::Serialization(format!("cannot read journal: {}", e)))?;
        let mut events = Vec::new();
        for line in BufReader::new(file).lines() {
            let line =
                line.map_err(|e| StoreError::Serialization(format!("journal read: {}", e)))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Event>(&line) {
                Ok(event) => events.push(event),
                Err(err) => error!(error = %err, "skipping malformed journal line"),
            }
        }
        Ok(events)
    }
}

/// Workflow and phase states rebuilt from an event sequence
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReplayedState {
    pub workflows: BTreeMap<String, WorkflowState>,
    pub phases: BTreeMap<(String, PhaseName), PhaseState>,
}

/// Fold an ordered event sequence into the states the store would hold.
/// Timestamps are not part of the reconstruction (they are monotonic,
/// not replayable).
pub fn replay(events: &[Event]) -> ReplayedState {
    let mut state = ReplayedState::default();

    for event in events {
        match event.event_type {
            EventType::WorkflowCreated => {
                state
                    .workflows
                    .insert(event.workflow_id.clone(), WorkflowState::Created);
            }
            EventType::WorkflowStateChanged => {
                if let Some(to) = event.to_state {
                    state.workflows.insert(event.workflow_id.clone(), to);
                }
            }
            EventType::WorkflowPaused => {
                state
                    .workflows
                    .insert(event.workflow_id.clone(), WorkflowState::Paused);
            }
            EventType::WorkflowResumed => {
                state
                    .workflows
                    .insert(event.workflow_id.clone(), WorkflowState::Running);
            }
            EventType::WorkflowCancelled => {
                state
                    .workflows
                    .insert(event.workflow_id.clone(), WorkflowState::Cancelled);
            }
            EventType::WorkflowArchived => {
                state
                    .workflows
                    .insert(event.workflow_id.clone(), WorkflowState::Archived);
                state
                    .phases
                    .retain(|(workflow_id, _), _| workflow_id != &event.workflow_id);
            }
            EventType::PhaseStarted => {
                if let Some(name) = event.phase_name {
                    state
                        .phases
                        .insert((event.workflow_id.clone(), name), PhaseState::Running);
                }
            }
            EventType::PhaseCompleted => {
                if let Some(name) = event.phase_name {
                    state
                        .phases
                        .insert((event.workflow_id.clone(), name), PhaseState::Completed);
                }
            }
            EventType::PhaseFailed => {
                if let Some(name) = event.phase_name {
                    state
                        .phases
                        .insert((event.workflow_id.clone(), name), PhaseState::Failed);
                }
            }
            EventType::ResourceAllocated
            | EventType::ResourceReleased
            | EventType::ResumeRequired
            | EventType::ErrorOccurred => {}
        }
    }

    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_append_and_read_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events").join("events.ndjson");
        let journal = EventJournal::open(&path).unwrap();

        journal.append(&Event::workflow_created("wf-1")).unwrap();
        journal
            .append(&Event::phase_started("wf-1", PhaseName::Plan))
            .unwrap();

        let events = EventJournal::read_all(&path).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EventType::WorkflowCreated);
        assert_eq!(events[1].phase_name, Some(PhaseName::Plan));
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.ndjson");
        let journal = EventJournal::open(&path).unwrap();
        journal.append(&Event::workflow_created("wf-1")).unwrap();
        std::fs::write(
            &path,
            format!(
                "{}\nnot json\n",
                serde_json::to_string(&Event::workflow_created("wf-1")).unwrap()
            ),
        )
        .unwrap();

        let events = EventJournal::read_all(&path).unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_replay_reconstructs_states() {
        let events = vec![
            Event::workflow_created("wf-1"),
            Event::state_changed("wf-1", WorkflowState::Created, WorkflowState::Running),
            Event::phase_started("wf-1", PhaseName::Plan),
            Event::phase_completed("wf-1", PhaseName::Plan),
            Event::phase_started("wf-1", PhaseName::Build),
            Event::phase_failed("wf-1", PhaseName::Build, "boom"),
            Event::state_changed("wf-1", WorkflowState::Running, WorkflowState::Failed),
        ];

        let state = replay(&events);
        assert_eq!(state.workflows["wf-1"], WorkflowState::Failed);
        assert_eq!(
            state.phases[&("wf-1".to_string(), PhaseName::Plan)],
            PhaseState::Completed
        );
        assert_eq!(
            state.phases[&("wf-1".to_string(), PhaseName::Build)],
            PhaseState::Failed
        );
    }

    #[test]
    fn test_replay_archive_drops_phases() {
        let events = vec![
            Event::workflow_created("wf-1"),
            Event::phase_started("wf-1", PhaseName::Plan),
            Event::phase_completed("wf-1", PhaseName::Plan),
            Event::workflow_archived("wf-1"),
        ];
        let state = replay(&events);
        assert_eq!(state.workflows["wf-1"], WorkflowState::Archived);
        assert!(state.phases.is_empty());
    }
}
