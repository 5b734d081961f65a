use std::sync::Arc;

use crate::cache::ResultCache;
use crate::error::InvokeError;
use crate::formats::{StageKind, StageResult, StageResults, WorkflowConfig};
use crate::invoker::StageBackend;
use crate::workflow::request::{StageBlocked, StageRequest};
use crate::workflow::state::{RunHandle, RunPhase};

/// Ordered stages of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePlan {
    stages: Vec<StageKind>,
}

impl StagePlan {
    /// extraction → titles → premises → scripts
    pub fn complete() -> Self {
        Self {
            stages: vec![
                StageKind::Extraction,
                StageKind::Titles,
                StageKind::Premises,
                StageKind::Scripts,
            ],
        }
    }

    /// The complete plan followed by narration and images.
    pub fn extended() -> Self {
        let mut plan = Self::complete();
        plan.stages.extend([StageKind::Tts, StageKind::Images]);
        plan
    }

    pub fn single(stage: StageKind) -> Self {
        Self {
            stages: vec![stage],
        }
    }

    pub fn stages(&self) -> &[StageKind] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    Next { index: usize, stage: StageKind },
    Blocked(StageBlocked),
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageFailure {
    Blocked(StageBlocked),
    Failed(InvokeError),
    /// The run stopped while the call was in flight; its result was dropped.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(StageResults),
    Halted {
        stage: Option<StageKind>,
        error: InvokeError,
        results: StageResults,
    },
    Blocked {
        blocked: StageBlocked,
        results: StageResults,
    },
    Cancelled {
        results: StageResults,
    },
}

impl RunOutcome {
    pub fn results(&self) -> &StageResults {
        match self {
            RunOutcome::Completed(results)
            | RunOutcome::Halted { results, .. }
            | RunOutcome::Blocked { results, .. }
            | RunOutcome::Cancelled { results } => results,
        }
    }
}

pub struct StageSequencer {
    plan: StagePlan,
    backend: Arc<dyn StageBackend>,
    cache: Arc<dyn ResultCache>,
    run: RunHandle,
    generation: u64,
}

impl StageSequencer {
    /// Binds to the run most recently begun on `run`. Once that run stops,
    /// nothing this sequencer does touches the state again, even after a
    /// new run has begun on the same handle.
    pub fn new(
        plan: StagePlan,
        backend: Arc<dyn StageBackend>,
        cache: Arc<dyn ResultCache>,
        run: RunHandle,
    ) -> Self {
        let generation = run.generation();
        Self {
            plan,
            backend,
            cache,
            run,
            generation,
        }
    }

    pub fn plan(&self) -> &StagePlan {
        &self.plan
    }

    /// Picks the stage after `current` (the first one when `None`) if its
    /// prerequisites are met.
    pub fn advance(
        &self,
        current: Option<usize>,
        config: &WorkflowConfig,
        results: &StageResults,
    ) -> Advance {
        let index = current.map_or(0, |i| i + 1);
        let Some(&stage) = self.plan.stages().get(index) else {
            return Advance::Done;
        };
        match StageRequest::build(stage, config, results) {
            Ok(_) => Advance::Next { index, stage },
            Err(blocked) => Advance::Blocked(blocked),
        }
    }

    /// Runs one stage. On success the result is persisted, merged into
    /// `results` and marked completed before this returns.
    pub async fn run_stage(
        &self,
        stage: StageKind,
        config: &WorkflowConfig,
        results: &mut StageResults,
    ) -> Result<StageResult, StageFailure> {
        let request = StageRequest::build(stage, config, results).map_err(StageFailure::Blocked)?;

        tracing::info!(%stage, "stage started");
        let outcome = self.backend.invoke(&request).await;

        if !self.run.is_current(self.generation) {
            tracing::info!(%stage, "run stopped while the stage was in flight; discarding its result");
            return Err(StageFailure::Cancelled);
        }

        let result = outcome.map_err(StageFailure::Failed)?;
        if result.kind() != stage {
            return Err(StageFailure::Failed(InvokeError::application(format!(
                "backend answered the {stage} stage with a {} result",
                result.kind()
            ))));
        }

        self.cache
            .save(&result)
            .map_err(|err| StageFailure::Failed(InvokeError::storage(&err)))?;
        results.insert(result.clone());
        self.cache
            .save_bundle(results)
            .map_err(|err| StageFailure::Failed(InvokeError::storage(&err)))?;

        self.run.update_current(self.generation, |s| {
            if !s.completed.contains(&stage) {
                s.completed.push(stage);
            }
        });
        tracing::info!(%stage, "stage completed");
        Ok(result)
    }

    /// Walks the plan until it completes, halts, blocks or is cancelled.
    pub async fn run(&self, config: &WorkflowConfig, mut results: StageResults) -> RunOutcome {
        let mut current = None;
        loop {
            if !self.run.wait_until_unpaused(self.generation).await {
                return RunOutcome::Cancelled { results };
            }

            let (index, stage) = match self.advance(current, config, &results) {
                Advance::Next { index, stage } => (index, stage),
                Advance::Done => {
                    if !self.finish(RunPhase::Completed, "completed".to_owned()) {
                        return RunOutcome::Cancelled { results };
                    }
                    return RunOutcome::Completed(results);
                }
                Advance::Blocked(blocked) => return self.blocked(blocked, results),
            };

            if !self.run.update_current(self.generation, |s| {
                s.current_stage_index = index;
                s.stage_label = stage.label().to_owned();
            }) {
                return RunOutcome::Cancelled { results };
            }

            match self.run_stage(stage, config, &mut results).await {
                Ok(_) => current = Some(index),
                Err(StageFailure::Cancelled) => return RunOutcome::Cancelled { results },
                Err(StageFailure::Blocked(blocked)) => return self.blocked(blocked, results),
                Err(StageFailure::Failed(error)) => {
                    tracing::error!(%stage, %error, "stage failed");
                    if !self.finish(RunPhase::Halted, format!("failed at {stage}: {error}")) {
                        return RunOutcome::Cancelled { results };
                    }
                    return RunOutcome::Halted {
                        stage: Some(stage),
                        error,
                        results,
                    };
                }
            }
        }
    }

    fn blocked(&self, blocked: StageBlocked, results: StageResults) -> RunOutcome {
        tracing::warn!(stage = %blocked.stage, warning = %blocked.warning, "stage blocked");
        if !self.finish(RunPhase::Blocked, blocked.to_string()) {
            return RunOutcome::Cancelled { results };
        }
        RunOutcome::Blocked { blocked, results }
    }

    /// Moves a still-running run into a terminal phase. False when someone
    /// else (cancel) got there first.
    fn finish(&self, phase: RunPhase, label: String) -> bool {
        self.run
            .update_current(self.generation, |s| s.finish(phase, label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::workflow::state::CANCELLED_LABEL;
    use crate::workflow::testing::{self, FakeStages, MemoryCache};

    fn sequencer(
        plan: StagePlan,
        backend: Arc<FakeStages>,
        cache: Arc<MemoryCache>,
    ) -> (StageSequencer, RunHandle) {
        let run = RunHandle::new();
        run.begin(plan.len(), "starting");
        (
            StageSequencer::new(plan, backend, cache, run.clone()),
            run,
        )
    }

    #[tokio::test]
    async fn complete_plan_runs_every_stage_in_order() {
        let backend = FakeStages::answering(vec![
            testing::extraction(5),
            testing::titles(5),
            testing::premises(),
            testing::scripts(8),
        ]);
        let cache = Arc::new(MemoryCache::default());
        let (seq, run) = sequencer(StagePlan::complete(), backend.clone(), cache.clone());

        let outcome = seq.run(&testing::config(), StageResults::default()).await;

        assert!(matches!(outcome, RunOutcome::Completed(ref r) if r.scripts.is_some()));
        assert_eq!(backend.called(), StagePlan::complete().stages().to_vec());
        let state = run.snapshot();
        assert_eq!(state.phase, RunPhase::Completed);
        assert!(!state.running);
        assert_eq!(state.percent(), 100);
        for kind in StagePlan::complete().stages() {
            assert!(cache.load(*kind).unwrap().is_some(), "{kind} not cached");
        }
        assert!(cache.load_bundle().unwrap().is_some_and(|b| b.premises.is_some()));
    }

    #[tokio::test]
    async fn failure_halts_without_advancing() {
        let backend = FakeStages::answering(vec![testing::extraction(5), testing::premises()]);
        backend.fail(StageKind::Titles, InvokeError::application("quota exceeded"));
        let cache = Arc::new(MemoryCache::default());
        let (seq, run) = sequencer(StagePlan::complete(), backend.clone(), cache.clone());

        let outcome = seq.run(&testing::config(), StageResults::default()).await;

        let RunOutcome::Halted { stage, error, .. } = outcome else {
            panic!("expected halt, got {outcome:?}");
        };
        assert_eq!(stage, Some(StageKind::Titles));
        assert_eq!(error.message, "quota exceeded");
        assert_eq!(backend.called(), vec![StageKind::Extraction, StageKind::Titles]);

        let state = run.snapshot();
        assert!(!state.running);
        assert_eq!(state.phase, RunPhase::Halted);
        assert_eq!(state.completed, vec![StageKind::Extraction]);
        assert_eq!(state.current_stage_index, 1);
        assert!(cache.load(StageKind::Titles).unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_extraction_blocks_titles_without_error() {
        let backend = FakeStages::answering(vec![testing::extraction(0), testing::titles(5)]);
        let cache = Arc::new(MemoryCache::default());
        let (seq, run) = sequencer(StagePlan::complete(), backend.clone(), cache.clone());

        let outcome = seq.run(&testing::config(), StageResults::default()).await;

        let RunOutcome::Blocked { blocked, results } = outcome else {
            panic!("expected blocked, got {outcome:?}");
        };
        assert_eq!(blocked.stage, StageKind::Titles);
        assert!(blocked.warning.contains("no videos found, adjust filters"));
        assert!(results.extraction.is_some());
        assert_eq!(backend.called(), vec![StageKind::Extraction]);

        let state = run.snapshot();
        assert_eq!(state.phase, RunPhase::Blocked);
        assert_eq!(state.completed, vec![StageKind::Extraction]);
        assert!(cache.load(StageKind::Extraction).unwrap().is_some());
    }

    #[tokio::test]
    async fn single_stage_runs_on_seeded_results() {
        let backend = FakeStages::answering(vec![testing::scripts(3)]);
        let cache = Arc::new(MemoryCache::default());
        let (seq, _run) = sequencer(
            StagePlan::single(StageKind::Scripts),
            backend.clone(),
            cache.clone(),
        );
        let mut seed = StageResults::default();
        seed.insert(testing::premises());

        let outcome = seq.run(&testing::config(), seed).await;

        assert!(matches!(outcome, RunOutcome::Completed(_)));
        assert_eq!(backend.called(), vec![StageKind::Scripts]);
    }

    #[tokio::test]
    async fn storage_failure_halts_before_next_stage() {
        let backend = FakeStages::answering(vec![testing::extraction(5), testing::titles(5)]);
        let cache = Arc::new(MemoryCache::default());
        *cache.fail_saves.lock().unwrap() = true;
        let (seq, _run) = sequencer(StagePlan::complete(), backend.clone(), cache);

        let outcome = seq.run(&testing::config(), StageResults::default()).await;

        assert!(matches!(
            outcome,
            RunOutcome::Halted { ref error, .. } if error.kind == ErrorKind::Storage
        ));
        assert_eq!(backend.called(), vec![StageKind::Extraction]);
    }

    #[tokio::test]
    async fn cancelled_in_flight_stage_is_discarded() {
        let backend = FakeStages::answering(vec![
            testing::extraction(5),
            testing::titles(5),
            testing::premises(),
        ]);
        backend.gate(StageKind::Titles);
        let cache = Arc::new(MemoryCache::default());
        let (seq, run) = sequencer(StagePlan::complete(), backend.clone(), cache.clone());

        let task = tokio::spawn(async move {
            seq.run(&testing::config(), StageResults::default()).await
        });
        backend.entered.notified().await;
        run.update(|s| s.finish(RunPhase::Cancelled, CANCELLED_LABEL));
        backend.release.notify_one();

        let outcome = task.await.unwrap();
        assert!(matches!(outcome, RunOutcome::Cancelled { ref results } if results.titles.is_none()));
        assert_eq!(backend.called(), vec![StageKind::Extraction, StageKind::Titles]);
        assert!(cache.load(StageKind::Titles).unwrap().is_none());
        assert_eq!(run.snapshot().stage_label, CANCELLED_LABEL);
    }

    async fn wait_for_completed(run: &RunHandle, stage: StageKind) {
        let mut rx = run.subscribe();
        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            rx.wait_for(|s| s.completed.contains(&stage)),
        )
        .await
        .expect("stage completes")
        .unwrap();
    }

    #[tokio::test]
    async fn pause_holds_the_next_stage_until_resumed() {
        let backend = FakeStages::answering(vec![
            testing::extraction(5),
            testing::titles(5),
            testing::premises(),
            testing::scripts(2),
        ]);
        backend.gate(StageKind::Extraction);
        let cache = Arc::new(MemoryCache::default());
        let (seq, run) = sequencer(StagePlan::complete(), backend.clone(), cache);

        let task = tokio::spawn(async move {
            seq.run(&testing::config(), StageResults::default()).await
        });
        backend.entered.notified().await;
        run.update(|s| s.paused = true);
        backend.release.notify_one();

        wait_for_completed(&run, StageKind::Extraction).await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(backend.called(), vec![StageKind::Extraction]);
        assert!(run.snapshot().paused);

        run.update(|s| s.paused = false);
        let outcome = task.await.unwrap();
        assert!(matches!(outcome, RunOutcome::Completed(_)));
        assert_eq!(backend.called(), StagePlan::complete().stages().to_vec());
    }

    #[tokio::test]
    async fn cancel_while_paused_starts_no_further_stage() {
        let backend = FakeStages::answering(vec![testing::extraction(5), testing::titles(5)]);
        backend.gate(StageKind::Extraction);
        let cache = Arc::new(MemoryCache::default());
        let (seq, run) = sequencer(StagePlan::complete(), backend.clone(), cache.clone());

        let task = tokio::spawn(async move {
            seq.run(&testing::config(), StageResults::default()).await
        });
        backend.entered.notified().await;
        run.update(|s| s.paused = true);
        backend.release.notify_one();
        wait_for_completed(&run, StageKind::Extraction).await;

        run.update(|s| s.finish(RunPhase::Cancelled, CANCELLED_LABEL));
        let outcome = task.await.unwrap();

        assert!(matches!(outcome, RunOutcome::Cancelled { ref results } if results.extraction.is_some()));
        assert_eq!(backend.called(), vec![StageKind::Extraction]);
        assert!(cache.load(StageKind::Titles).unwrap().is_none());
        let state = run.snapshot();
        assert_eq!(state.phase, RunPhase::Cancelled);
        assert_eq!(state.completed, vec![StageKind::Extraction]);
    }

    #[tokio::test]
    async fn stale_stage_result_does_not_touch_the_next_run() {
        let backend = FakeStages::answering(vec![testing::extraction(5), testing::titles(5)]);
        backend.gate(StageKind::Titles);
        let cache = Arc::new(MemoryCache::default());
        let (seq, run) = sequencer(StagePlan::complete(), backend.clone(), cache.clone());

        let task = tokio::spawn(async move {
            seq.run(&testing::config(), StageResults::default()).await
        });
        backend.entered.notified().await;
        run.update(|s| s.finish(RunPhase::Cancelled, CANCELLED_LABEL));
        run.begin(4, "next run").unwrap();
        backend.release.notify_one();

        let outcome = task.await.unwrap();
        assert!(matches!(outcome, RunOutcome::Cancelled { .. }));
        assert_eq!(backend.called(), vec![StageKind::Extraction, StageKind::Titles]);
        assert!(cache.load(StageKind::Titles).unwrap().is_none());
        let state = run.snapshot();
        assert!(state.running);
        assert_eq!(state.phase, RunPhase::Running);
        assert!(state.completed.is_empty());
        assert_eq!(state.stage_label, "next run");
    }

    #[test]
    fn advance_walks_the_plan_and_reports_done() {
        let backend = FakeStages::answering(Vec::new());
        let (seq, _run) = sequencer(
            StagePlan::complete(),
            backend,
            Arc::new(MemoryCache::default()),
        );
        let config = testing::config();
        let mut results = StageResults::default();

        assert_eq!(
            seq.advance(None, &config, &results),
            Advance::Next {
                index: 0,
                stage: StageKind::Extraction
            }
        );
        assert!(matches!(
            seq.advance(Some(0), &config, &results),
            Advance::Blocked(ref b) if b.stage == StageKind::Titles
        ));

        results.insert(testing::extraction(2));
        assert_eq!(
            seq.advance(Some(0), &config, &results),
            Advance::Next {
                index: 1,
                stage: StageKind::Titles
            }
        );
        assert_eq!(seq.advance(Some(3), &config, &results), Advance::Done);
    }
}
