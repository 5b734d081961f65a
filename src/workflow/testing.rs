//! In-memory collaborators for driving the workflow without a backend.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::cache::ResultCache;
use crate::error::InvokeError;
use crate::formats::{
    Chapter, ExtractionResult, GeneratedTitle, LogEntry, LogLevel, Premise, PremisesResult,
    ScriptsResult, StageKind, StageResult, StageResults, TitlesResult, Video, WorkflowConfig,
};
use crate::invoker::{
    AutomationBackend, AutomationMode, ControlBackend, ControlSignal, LogSource, StageBackend,
};
use crate::workflow::request::StageRequest;

pub fn extraction(count: usize) -> StageResult {
    StageResult::Extraction(ExtractionResult {
        channel_id: Some("UCfake".to_owned()),
        channel_name: "Fake Channel".to_owned(),
        total_videos: count as u64,
        total_views: 5000 * count as u64,
        total_likes: 0,
        videos: (0..count)
            .map(|i| Video {
                title: format!("Video {i}"),
                views: 5000,
                duration: Some("10:00".to_owned()),
                published_at: Some("2 days ago".to_owned()),
            })
            .collect(),
    })
}

pub fn titles(count: usize) -> StageResult {
    StageResult::Titles(TitlesResult {
        generated_titles: (0..count)
            .map(|i| GeneratedTitle {
                title: format!("Title {i}"),
                score: None,
                reasoning: None,
            })
            .collect(),
        ai_provider_used: Some("gemini".to_owned()),
        source_titles_count: 5,
        patterns_analysis: None,
        custom_prompt_used: None,
    })
}

pub fn premises() -> StageResult {
    StageResult::Premises(PremisesResult {
        premises: vec![Premise {
            title: "Title 0".to_owned(),
            premise: "Something knocks at night.".to_owned(),
        }],
    })
}

pub fn scripts(chapters: usize) -> StageResult {
    StageResult::Scripts(ScriptsResult {
        title: "Title 0".to_owned(),
        premise: Some("Something knocks at night.".to_owned()),
        chapters: (0..chapters)
            .map(|i| Chapter {
                title: format!("Chapter {}", i + 1),
                content: format!("Content of chapter {}", i + 1),
                duration: None,
            })
            .collect(),
        total_words: None,
    })
}

pub fn config() -> WorkflowConfig {
    WorkflowConfig::new("@fakechannel")
}

pub fn log(ts: &str, message: &str) -> LogEntry {
    LogEntry {
        timestamp: ts.to_owned(),
        level: LogLevel::Info,
        message: message.to_owned(),
        data: None,
    }
}

/// Scripted stage backend. Stages without a scripted answer fail with an
/// application error. The first call to a gated stage waits for `release`
/// before answering.
#[derive(Default)]
pub struct FakeStages {
    answers: Mutex<HashMap<StageKind, Result<StageResult, InvokeError>>>,
    pub calls: Mutex<Vec<StageRequest>>,
    gated: Mutex<Option<StageKind>>,
    pub entered: Notify,
    pub release: Notify,
}

impl FakeStages {
    pub fn answering(results: Vec<StageResult>) -> Arc<Self> {
        let fake = Self::default();
        fake.answers
            .lock()
            .unwrap()
            .extend(results.into_iter().map(|r| (r.kind(), Ok(r))));
        Arc::new(fake)
    }

    pub fn fail(self: &Arc<Self>, kind: StageKind, err: InvokeError) {
        self.answers.lock().unwrap().insert(kind, Err(err));
    }

    pub fn gate(self: &Arc<Self>, kind: StageKind) {
        *self.gated.lock().unwrap() = Some(kind);
    }

    pub fn called(&self) -> Vec<StageKind> {
        self.calls.lock().unwrap().iter().map(StageRequest::kind).collect()
    }
}

#[async_trait]
impl StageBackend for FakeStages {
    async fn invoke(&self, request: &StageRequest) -> Result<StageResult, InvokeError> {
        let kind = request.kind();
        self.calls.lock().unwrap().push(request.clone());
        let gated = {
            let mut gated = self.gated.lock().unwrap();
            *gated == Some(kind) && gated.take().is_some()
        };
        if gated {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.answers
            .lock()
            .unwrap()
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| Err(InvokeError::application(format!("no answer for {kind}"))))
    }
}

/// Serves queued log batches; an empty queue answers with no entries.
#[derive(Default)]
pub struct FakeLogs {
    batches: Mutex<VecDeque<Vec<LogEntry>>>,
    pub cursors: Mutex<Vec<Option<String>>>,
}

impl FakeLogs {
    pub fn with_batches(batches: Vec<Vec<LogEntry>>) -> Arc<Self> {
        Arc::new(Self {
            batches: Mutex::new(batches.into()),
            cursors: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl LogSource for FakeLogs {
    async fn fetch_logs(&self, since: Option<&str>) -> Result<Vec<LogEntry>, InvokeError> {
        self.cursors.lock().unwrap().push(since.map(str::to_owned));
        Ok(self.batches.lock().unwrap().pop_front().unwrap_or_default())
    }

    async fn clear_logs(&self) -> Result<(), InvokeError> {
        self.batches.lock().unwrap().clear();
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeControl {
    pub signals: Mutex<Vec<ControlSignal>>,
    pub fail_with: Mutex<Option<InvokeError>>,
}

#[async_trait]
impl ControlBackend for FakeControl {
    async fn signal(&self, signal: ControlSignal) -> Result<(), InvokeError> {
        if let Some(err) = self.fail_with.lock().unwrap().clone() {
            return Err(err);
        }
        self.signals.lock().unwrap().push(signal);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeAutomation {
    pub answer: Mutex<Option<Result<StageResults, InvokeError>>>,
    pub modes: Mutex<Vec<AutomationMode>>,
}

#[async_trait]
impl AutomationBackend for FakeAutomation {
    async fn run_automation(
        &self,
        _config: &WorkflowConfig,
        mode: AutomationMode,
    ) -> Result<StageResults, InvokeError> {
        self.modes.lock().unwrap().push(mode);
        self.answer
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| Err(InvokeError::application("no automation answer")))
    }
}

#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<StageKind, StageResult>>,
    bundle: Mutex<Option<StageResults>>,
    pub fail_saves: Mutex<bool>,
}

impl ResultCache for MemoryCache {
    fn save(&self, result: &StageResult) -> anyhow::Result<()> {
        if *self.fail_saves.lock().unwrap() {
            anyhow::bail!("disk full");
        }
        self.entries
            .lock()
            .unwrap()
            .insert(result.kind(), result.clone());
        Ok(())
    }

    fn load(&self, kind: StageKind) -> anyhow::Result<Option<StageResult>> {
        Ok(self.entries.lock().unwrap().get(&kind).cloned())
    }

    fn save_bundle(&self, results: &StageResults) -> anyhow::Result<()> {
        *self.bundle.lock().unwrap() = Some(results.clone());
        Ok(())
    }

    fn load_bundle(&self) -> anyhow::Result<Option<StageResults>> {
        Ok(self.bundle.lock().unwrap().clone())
    }

    fn clear(&self) -> anyhow::Result<()> {
        self.entries.lock().unwrap().clear();
        *self.bundle.lock().unwrap() = None;
        Ok(())
    }
}
