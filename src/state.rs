//! Process-wide progress state with subscriber fan-out.
//!
//! Every mutation is one lock acquisition that patches the state and
//! broadcasts the resulting snapshot, so subscribers never see a torn state.
//! Broadcasting never blocks; a subscriber that falls behind the channel
//! capacity loses the oldest snapshots.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 64;

/// Generation pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    #[default]
    Idle,
    Fetching,
    Filtering,
    Scoring,
    Summarizing,
    Highlights,
    Done,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GenerationState {
    pub running: bool,
    pub step: Step,
    /// Human-readable progress or error message.
    pub progress: String,
    pub started_at: Option<DateTime<Utc>>,
}

/// Returned by [`GenerationTracker::try_begin`] while a run is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("a digest generation is already running")]
pub struct AlreadyRunning;

/// Owner of the single [`GenerationState`].
#[derive(Debug)]
pub struct GenerationTracker {
    state: Mutex<GenerationState>,
    tx: broadcast::Sender<GenerationState>,
}

impl Default for GenerationTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl GenerationTracker {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(GenerationState::default()),
            tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, GenerationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn patch(&self, f: impl FnOnce(&mut GenerationState)) {
        let mut state = self.lock();
        f(&mut state);
        // no receivers is fine
        let _ = self.tx.send(state.clone());
    }

    /// Claim the single run slot, or fail without touching the state.
    pub fn try_begin(&self, now: DateTime<Utc>, message: &str) -> Result<(), AlreadyRunning> {
        let mut state = self.lock();
        if state.running {
            return Err(AlreadyRunning);
        }
        *state = GenerationState {
            running: true,
            step: Step::Fetching,
            progress: message.to_string(),
            started_at: Some(now),
        };
        let _ = self.tx.send(state.clone());
        Ok(())
    }

    pub fn advance(&self, step: Step, message: impl Into<String>) {
        let message = message.into();
        self.patch(|s| {
            s.step = step;
            s.progress = message;
        });
    }

    pub fn progress(&self, message: impl Into<String>) {
        let message = message.into();
        self.patch(|s| s.progress = message);
    }

    /// Release the run slot with a terminal step.
    pub fn finish(&self, step: Step, message: impl Into<String>) {
        let message = message.into();
        self.patch(|s| {
            s.running = false;
            s.step = step;
            s.progress = message;
            s.started_at = None;
        });
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    pub fn snapshot(&self) -> GenerationState {
        self.lock().clone()
    }

    /// Current state plus a receiver for every later mutation.
    ///
    /// Both are taken under the lock so no mutation falls between them.
    pub fn subscribe(&self) -> (GenerationState, broadcast::Receiver<GenerationState>) {
        let state = self.lock();
        (state.clone(), self.tx.subscribe())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TranslateState {
    pub running: bool,
    pub total: usize,
    pub done: usize,
    pub current: String,
}

/// Owner of the single [`TranslateState`].
#[derive(Debug, Default)]
pub struct TranslateTracker {
    state: Mutex<TranslateState>,
}

impl TranslateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TranslateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn start(&self, total: usize) {
        *self.lock() = TranslateState {
            running: true,
            total,
            done: 0,
            current: String::new(),
        };
    }

    pub fn update(&self, done: usize, current: &str) {
        let mut state = self.lock();
        state.done = done;
        state.current = current.to_string();
    }

    pub fn finish(&self) {
        let mut state = self.lock();
        let total = state.total;
        *state = TranslateState {
            running: false,
            total,
            done: total,
            current: String::new(),
        };
    }

    pub fn snapshot(&self) -> TranslateState {
        self.lock().clone()
    }
}
