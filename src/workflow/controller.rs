use std::sync::Arc;
use std::time::Duration;

use crate::cache::ResultCache;
use crate::error::InvokeError;
use crate::formats::{StageKind, StageResults, WorkflowConfig};
use crate::invoker::{
    AutomationBackend, AutomationMode, ControlBackend, LogSource, RemoteInvoker, StageBackend,
};
use crate::workflow::control::RunControl;
use crate::workflow::reporter::{PollerHandle, ProgressReporter};
use crate::workflow::sequencer::{RunOutcome, StagePlan, StageSequencer};
use crate::workflow::state::{RunHandle, RunPhase};

/// Everything the controller talks to on the backend side.
#[derive(Clone)]
pub struct Collaborators {
    pub stages: Arc<dyn StageBackend>,
    pub logs: Arc<dyn LogSource>,
    pub control: Arc<dyn ControlBackend>,
    pub automation: Arc<dyn AutomationBackend>,
}

impl Collaborators {
    pub fn remote(invoker: Arc<RemoteInvoker>) -> Self {
        Self {
            stages: invoker.clone(),
            logs: invoker.clone(),
            control: invoker.clone(),
            automation: invoker,
        }
    }
}

/// Owns the run state and wires the sequencer, the log poller and run
/// control together. At most one run is active at a time.
pub struct WorkflowController {
    collab: Collaborators,
    cache: Arc<dyn ResultCache>,
    run: RunHandle,
    poll_interval: Duration,
}

impl WorkflowController {
    pub fn new(
        collab: Collaborators,
        cache: Arc<dyn ResultCache>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            collab,
            cache,
            run: RunHandle::new(),
            poll_interval,
        }
    }

    pub fn run_handle(&self) -> RunHandle {
        self.run.clone()
    }

    pub fn run_control(&self) -> RunControl {
        RunControl::new(self.collab.control.clone(), self.run.clone())
    }

    /// Results persisted by earlier runs.
    pub fn cached_results(&self) -> Result<StageResults, InvokeError> {
        StageResults::rehydrate(self.cache.as_ref()).map_err(|err| InvokeError::storage(&err))
    }

    pub async fn clear_logs(&self) -> Result<(), InvokeError> {
        self.collab.logs.clear_logs().await
    }

    /// Runs `plan` stage by stage on top of `seed`.
    pub async fn run(
        &self,
        config: &WorkflowConfig,
        plan: StagePlan,
        seed: StageResults,
    ) -> Result<RunOutcome, InvokeError> {
        config.validate()?;
        let first_label = plan
            .stages()
            .first()
            .map_or("starting", |stage| stage.label());
        self.start(plan.len(), first_label)?;
        tracing::info!(channel = config.channel(), stages = plan.len(), "workflow started");

        let poller = self.spawn_poller();
        let sequencer = StageSequencer::new(
            plan,
            self.collab.stages.clone(),
            self.cache.clone(),
            self.run.clone(),
        );
        let outcome = sequencer.run(config, seed).await;
        poller.stop().await;

        log_outcome(&outcome);
        Ok(outcome)
    }

    /// Hands the whole pipeline to the backend in one call and persists
    /// every stage it reports.
    pub async fn run_remote(
        &self,
        config: &WorkflowConfig,
        mode: AutomationMode,
    ) -> Result<RunOutcome, InvokeError> {
        config.validate()?;
        let generation = self.start(StageKind::ALL.len(), "running backend automation")?;
        tracing::info!(channel = config.channel(), ?mode, "backend automation started");

        let poller = self.spawn_poller();
        let reply = self.collab.automation.run_automation(config, mode).await;
        let outcome = if !self.run.is_current(generation) {
            RunOutcome::Cancelled {
                results: StageResults::default(),
            }
        } else {
            match reply.and_then(|results| self.persist_bundle(results)) {
                Ok(results) => {
                    let completed: Vec<StageKind> = StageKind::ALL
                        .into_iter()
                        .filter(|kind| results.has(*kind))
                        .collect();
                    self.run.update_current(generation, |s| {
                        s.completed = completed;
                        s.finish(RunPhase::Completed, "completed");
                    });
                    RunOutcome::Completed(results)
                }
                Err(error) => {
                    self.run.update_current(generation, |s| {
                        s.finish(RunPhase::Halted, format!("automation failed: {error}"));
                    });
                    RunOutcome::Halted {
                        stage: None,
                        error,
                        results: StageResults::default(),
                    }
                }
            }
        };
        poller.stop().await;

        log_outcome(&outcome);
        Ok(outcome)
    }

    fn persist_bundle(&self, results: StageResults) -> Result<StageResults, InvokeError> {
        for kind in StageKind::ALL {
            if let Some(result) = results.get(kind) {
                self.cache
                    .save(&result)
                    .map_err(|err| InvokeError::storage(&err))?;
            }
        }
        self.cache
            .save_bundle(&results)
            .map_err(|err| InvokeError::storage(&err))?;
        Ok(results)
    }

    fn start(&self, total_stages: usize, label: &str) -> Result<u64, InvokeError> {
        self.run.begin(total_stages, label).ok_or_else(|| {
            InvokeError::configuration(
                "a workflow run is already active; pause, resume or cancel it first",
            )
        })
    }

    fn spawn_poller(&self) -> PollerHandle {
        ProgressReporter::new(self.collab.logs.clone(), self.run.clone(), self.poll_interval)
            .spawn()
    }
}

fn log_outcome(outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Completed(_) => tracing::info!("workflow completed"),
        RunOutcome::Halted { stage, error, .. } => {
            tracing::error!(stage = ?stage, %error, "workflow halted");
        }
        RunOutcome::Blocked { blocked, .. } => tracing::warn!(%blocked, "workflow blocked"),
        RunOutcome::Cancelled { .. } => tracing::info!("workflow cancelled"),
    }
}
