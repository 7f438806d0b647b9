// Crash recovery
//
// Run once at process start, before the API accepts traffic. Workflows
// left `running` by a previous process cannot have a live supervising
// task: their running phases are marked failed ("interrupted"), the
// workflow moves to `paused`, and a `resume_required` event invites an
// operator or auto-resume policy to re-drive them. Port bindings of live
// workflows are reconciled into the allocator so crashes never leak ports.

use tracing::{info, warn};

use foreman_core::{Event, ListFilter, PhaseState, Result, WorkflowState};
use foreman_storage::TransitionChanges;

use crate::engine::Engine;

impl Engine {
    /// Reconcile state after a restart. Returns the number of workflows
    /// parked for resumption.
    pub async fn recover(&self) -> Result<usize> {
        self.reconcile_ports().await?;

        let running = self
            .inner
            .store
            .workflows_in_state(WorkflowState::Running)
            .await?;
        let mut parked = 0;

        for workflow in running {
            for phase in self.inner.store.running_phases(&workflow.id).await? {
                self.inner
                    .store
                    .finish_phase(
                        &workflow.id,
                        phase.name,
                        phase.attempt,
                        PhaseState::Failed,
                        None,
                        Some("interrupted"),
                    )
                    .await?;
                self.persist_and_publish(Event::phase_failed(
                    &workflow.id,
                    phase.name,
                    "interrupted",
                ))
                .await?;
            }

            self.transition(
                &workflow.id,
                WorkflowState::Running,
                WorkflowState::Paused,
                TransitionChanges::default(),
            )
            .await?;
            self.persist_and_publish(Event::resume_required(
                &workflow.id,
                "process restarted while workflow was running",
            ))
            .await?;

            info!(workflow_id = %workflow.id, "workflow parked for resume after restart");
            parked += 1;
        }

        Ok(parked)
    }

    /// Rebuild the port allocator from persisted bindings of live
    /// workflows; bindings of terminal workflows are cleared.
    async fn reconcile_ports(&self) -> Result<()> {
        let all = self
            .inner
            .store
            .list_workflows(&ListFilter::default())
            .await?;
        let mut live = Vec::new();
        for workflow in &all {
            let bound = workflow.backend_port.is_some() || workflow.frontend_port.is_some();
            if !bound {
                continue;
            }
            if workflow.state.is_terminal() || workflow.state == WorkflowState::Archived {
                // a crash between termination and release leaked these
                warn!(workflow_id = %workflow.id, "clearing leaked port binding");
                self.inner
                    .store
                    .set_workflow_ports(&workflow.id, None, None)
                    .await?;
            } else {
                live.push((
                    workflow.id.clone(),
                    workflow.backend_port,
                    workflow.frontend_port,
                ));
            }
        }
        self.inner.ports.reconcile(&live);
        Ok(())
    }
}
