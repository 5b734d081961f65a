use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::InvokeError;
use crate::invoker::LogSource;
use crate::workflow::state::{RunHandle, RunPhase};

/// Polls the backend log while a run is active and appends what is new to
/// the run state. Bound to the run most recently begun on its handle.
pub struct ProgressReporter {
    source: Arc<dyn LogSource>,
    run: RunHandle,
    generation: u64,
    interval: Duration,
}

/// A running poller. Dropping it leaves the task running until the run
/// stops; `stop` ends it right away.
pub struct PollerHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl PollerHandle {
    pub async fn stop(self) {
        self.token.cancel();
        self.join().await;
    }

    /// Waits for the poller to end on its own.
    pub async fn join(self) {
        if let Err(err) = self.task.await {
            tracing::warn!(%err, "log poller task failed");
        }
    }
}

impl ProgressReporter {
    pub fn new(source: Arc<dyn LogSource>, run: RunHandle, interval: Duration) -> Self {
        let generation = run.generation();
        Self {
            source,
            run,
            generation,
            interval,
        }
    }

    /// Fetches entries after the current cursor. Returns how many were new.
    pub async fn poll_once(&self) -> Result<usize, InvokeError> {
        let cursor = self.run.log_cursor();
        let entries = self.source.fetch_logs(cursor.as_deref()).await?;
        let mut appended = 0;
        self.run.update(|s| {
            if s.generation == self.generation {
                appended = s.append_logs(entries);
            }
        });
        Ok(appended)
    }

    pub fn spawn(self) -> PollerHandle {
        let token = CancellationToken::new();
        let task = tokio::spawn(self.poll_loop(token.clone()));
        PollerHandle { token, task }
    }

    async fn poll_loop(self, token: CancellationToken) {
        let mut state_rx = self.run.subscribe();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let over = {
                        let state = state_rx.borrow_and_update();
                        !state.running || state.generation != self.generation
                    };
                    if over {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.poll_once().await {
                        tracing::warn!(%err, "log poll failed");
                    }
                }
            }
        }

        // Pick up whatever the backend logged while the last stage finished.
        // A cancelled run gets no further requests.
        if self.ended_on_its_own()
            && let Err(err) = self.poll_once().await
        {
            tracing::debug!(%err, "final log poll failed");
        }
        tracing::debug!("log poller stopped");
    }

    fn ended_on_its_own(&self) -> bool {
        let state = self.run.snapshot();
        state.generation == self.generation
            && matches!(
                state.phase,
                RunPhase::Completed | RunPhase::Halted | RunPhase::Blocked
            )
    }
}
