use std::sync::Arc;

use crate::error::InvokeError;
use crate::invoker::{ControlBackend, ControlSignal};
use crate::workflow::state::{CANCELLED_LABEL, RunHandle, RunPhase};

/// Pause, resume and cancel for the active run. Local state changes only
/// after the backend acknowledged the signal.
#[derive(Clone)]
pub struct RunControl {
    backend: Arc<dyn ControlBackend>,
    run: RunHandle,
}

impl RunControl {
    pub fn new(backend: Arc<dyn ControlBackend>, run: RunHandle) -> Self {
        Self { backend, run }
    }

    pub async fn pause(&self) -> Result<(), InvokeError> {
        let generation = self.send(ControlSignal::Pause).await?;
        self.run.update_current(generation, |s| s.paused = true);
        tracing::info!("run paused");
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), InvokeError> {
        let generation = self.send(ControlSignal::Resume).await?;
        self.run.update_current(generation, |s| s.paused = false);
        tracing::info!("run resumed");
        Ok(())
    }

    pub async fn cancel(&self) -> Result<(), InvokeError> {
        let generation = self.send(ControlSignal::Cancel).await?;
        self.run.update_current(generation, |s| {
            s.finish(RunPhase::Cancelled, CANCELLED_LABEL);
        });
        tracing::info!("run cancelled");
        Ok(())
    }

    /// Sends `signal` for the active run and returns that run's generation.
    async fn send(&self, signal: ControlSignal) -> Result<u64, InvokeError> {
        let generation = self.run.generation();
        if !self.run.is_current(generation) {
            return Err(InvokeError::configuration("no workflow run is active"));
        }
        self.backend.signal(signal).await.inspect_err(|err| {
            tracing::warn!(signal = signal.as_str(), %err, "control signal rejected");
        })?;
        Ok(generation)
    }
}
