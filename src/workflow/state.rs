use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::formats::{LogEntry, StageKind};

pub const CANCELLED_LABEL: &str = "cancelled by user";

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    #[default]
    Idle,
    Running,
    Completed,
    Halted,
    Blocked,
    Cancelled,
}

impl RunPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunPhase::Completed | RunPhase::Halted | RunPhase::Blocked | RunPhase::Cancelled
        )
    }
}

/// Mutable state of one workflow execution, shared by the sequencer, the
/// progress reporter and run control.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct RunState {
    /// Bumped by every `begin`; tells one run's tasks apart from the next.
    pub generation: u64,
    pub phase: RunPhase,
    pub current_stage_index: usize,
    pub total_stages: usize,
    pub stage_label: String,
    pub completed: Vec<StageKind>,
    pub running: bool,
    pub paused: bool,
    pub log: Vec<LogEntry>,
    /// Timestamp of the newest log entry received; the `since` cursor.
    pub log_cursor: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunState {
    pub fn started(total_stages: usize, label: impl Into<String>) -> Self {
        Self {
            phase: RunPhase::Running,
            total_stages,
            stage_label: label.into(),
            running: true,
            started_at: Some(Utc::now()),
            ..Self::default()
        }
    }

    /// Coarse progress from completed stages.
    pub fn percent(&self) -> u32 {
        if self.phase == RunPhase::Completed {
            return 100;
        }
        if self.total_stages == 0 {
            return 0;
        }
        let done = self.completed.len().min(self.total_stages);
        (done * 100 / self.total_stages) as u32
    }

    pub(crate) fn finish(&mut self, phase: RunPhase, label: impl Into<String>) {
        self.phase = phase;
        self.stage_label = label.into();
        self.running = false;
        self.paused = false;
        self.finished_at = Some(Utc::now());
    }

    /// Appends entries not seen yet and moves the cursor forward. Entries
    /// older than the cursor are skipped; entries stamped exactly at the
    /// cursor are skipped only when an identical entry was already logged at
    /// that timestamp. Returns how many entries were appended.
    pub(crate) fn append_logs(&mut self, entries: Vec<LogEntry>) -> usize {
        let mut appended = 0;
        for entry in entries {
            if let Some(cursor) = &self.log_cursor {
                match entry.timestamp.as_str().cmp(cursor.as_str()) {
                    Ordering::Less => continue,
                    Ordering::Equal if self.logged_at_cursor(&entry) => continue,
                    _ => {}
                }
            }
            self.log_cursor = Some(entry.timestamp.clone());
            self.log.push(entry);
            appended += 1;
        }
        appended
    }

    fn logged_at_cursor(&self, entry: &LogEntry) -> bool {
        self.log
            .iter()
            .rev()
            .take_while(|seen| seen.timestamp == entry.timestamp)
            .any(|seen| seen.level == entry.level && seen.message == entry.message)
    }
}

/// Shared handle over the current `RunState`. Every update is applied under
/// the channel's write lock, so readers never observe a half-applied change.
#[derive(Debug, Clone)]
pub struct RunHandle {
    tx: Arc<watch::Sender<RunState>>,
}

impl Default for RunHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl RunHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(RunState::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> RunState {
        self.tx.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        self.tx.borrow().running
    }

    /// Generation of the run most recently begun.
    pub fn generation(&self) -> u64 {
        self.tx.borrow().generation
    }

    /// Whether run `generation` is still the active run.
    pub fn is_current(&self, generation: u64) -> bool {
        let state = self.tx.borrow();
        state.running && state.generation == generation
    }

    pub fn log_cursor(&self) -> Option<String> {
        self.tx.borrow().log_cursor.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.tx.subscribe()
    }

    pub(crate) fn update(&self, f: impl FnOnce(&mut RunState)) {
        self.tx.send_modify(f);
    }

    /// Applies `f` only while run `generation` is still active. Returns
    /// whether it was applied.
    pub(crate) fn update_current(
        &self,
        generation: u64,
        f: impl FnOnce(&mut RunState),
    ) -> bool {
        self.tx.send_if_modified(|s| {
            if !s.running || s.generation != generation {
                return false;
            }
            f(s);
            true
        })
    }

    /// Replaces whatever ran before with a fresh running state, unless a run
    /// is still active. Returns the new run's generation.
    pub(crate) fn begin(&self, total_stages: usize, label: impl Into<String>) -> Option<u64> {
        let label = label.into();
        let mut begun = None;
        self.tx.send_if_modified(|s| {
            if s.running {
                return false;
            }
            let generation = s.generation + 1;
            *s = RunState {
                generation,
                ..RunState::started(total_stages, label)
            };
            begun = Some(generation);
            true
        });
        begun
    }

    /// Waits until run `generation` is unpaused or no longer the active run.
    /// Returns whether it is still active at that point.
    pub(crate) async fn wait_until_unpaused(&self, generation: u64) -> bool {
        let mut rx = self.subscribe();
        match rx
            .wait_for(|s| !s.paused || !s.running || s.generation != generation)
            .await
        {
            Ok(state) => state.running && state.generation == generation,
            Err(_) => false,
        }
    }
}
