use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use regex::Regex;
use tideline_jetstream::PostEvent;
use tokio::sync::mpsc;

/// Callback invoked once per matching post. Returning `Err` is logged and
/// never retried or propagated to other jobs (spec §4.4: "a callback
/// failure is logged and the next job is still processed").
pub type OnData = Arc<dyn Fn(JobMatchEvent) -> Result<(), String> + Send + Sync>;

/// Callback invoked exactly once, on the job's terminal transition.
pub type OnComplete = Arc<dyn Fn(JobOutcome) + Send + Sync>;

/// What a job registration needs to come alive.
pub struct JobConfig {
    pub job_id: String,
    pub prompt: String,
    pub correlation_id: String,
    pub deadline: DateTime<Utc>,
    pub on_data: OnData,
    pub on_complete: OnComplete,
}

/// A single match, handed to a job's [`OnData`] callback.
#[derive(Debug, Clone)]
pub struct JobMatchEvent {
    pub job_id: String,
    pub post: PostEvent,
    pub matched_count: u64,
}

/// The terminal outcome a job's [`OnComplete`] callback observes.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Completed { matched_count: u64 },
    Cancelled { matched_count: u64 },
    Failed { error: String, matched_count: u64 },
}

/// A job's lifecycle state, per spec §4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Active,
    Completing,
    Completed,
    Cancelled,
}

pub(crate) const STATE_ACTIVE: u8 = 0;
pub(crate) const STATE_COMPLETING: u8 = 1;
pub(crate) const STATE_COMPLETED: u8 = 2;
pub(crate) const STATE_CANCELLED: u8 = 3;

fn decode_state(raw: u8) -> JobState {
    match raw {
        STATE_COMPLETING => JobState::Completing,
        STATE_COMPLETED => JobState::Completed,
        STATE_CANCELLED => JobState::Cancelled,
        _ => JobState::Active,
    }
}

/// Bound on the per-job dispatch channel. A job whose callback can't keep
/// up starts dropping matches and counting them as `slow_consumer_drops`
/// rather than ever blocking the shared ingest loop.
pub(crate) const DISPATCH_CAPACITY: usize = 256;

/// The registry's internal record for one active job. The compiled regex
/// and callbacks are immutable for the job's lifetime; `matched_count` and
/// `state` are the only fields mutated after construction.
pub struct JobEntry {
    pub job_id: String,
    pub prompt: String,
    pub keywords: Vec<String>,
    pub correlation_id: String,
    pub deadline: DateTime<Utc>,
    /// `None` means keyword extraction yielded nothing; the job never
    /// matches (spec §4.4: "build the never-matches regex and log a
    /// warning at registration").
    regex: Option<Regex>,
    matched_count: AtomicU64,
    slow_consumer_drops: AtomicU64,
    state: AtomicU8,
    pub(crate) dispatch_tx: mpsc::Sender<JobMatchEvent>,
    pub(crate) on_complete: OnComplete,
}

impl JobEntry {
    pub fn new(
        job_id: String,
        prompt: String,
        keywords: Vec<String>,
        regex: Option<Regex>,
        correlation_id: String,
        deadline: DateTime<Utc>,
        on_complete: OnComplete,
    ) -> (Arc<Self>, mpsc::Receiver<JobMatchEvent>) {
        let (dispatch_tx, dispatch_rx) = mpsc::channel(DISPATCH_CAPACITY);
        let entry = Arc::new(Self {
            job_id,
            prompt,
            keywords,
            correlation_id,
            deadline,
            regex,
            matched_count: AtomicU64::new(0),
            slow_consumer_drops: AtomicU64::new(0),
            state: AtomicU8::new(STATE_ACTIVE),
            dispatch_tx,
            on_complete,
        });
        (entry, dispatch_rx)
    }

    pub fn matches(&self, text: &str) -> bool {
        self.regex.as_ref().is_some_and(|re| re.is_match(text))
    }

    pub fn matched_count(&self) -> u64 {
        self.matched_count.load(Ordering::Relaxed)
    }

    pub fn increment_matched(&self) -> u64 {
        self.matched_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn slow_consumer_drops(&self) -> u64 {
        self.slow_consumer_drops.load(Ordering::Relaxed)
    }

    pub fn record_slow_consumer_drop(&self) {
        self.slow_consumer_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn state(&self) -> JobState {
        decode_state(self.state.load(Ordering::Acquire))
    }

    pub fn is_active(&self) -> bool {
        self.state() == JobState::Active
    }

    /// Attempt to move the job from `Active` to `Completing`. Returns
    /// `true` only for the caller that wins the race, guaranteeing the
    /// terminal callback fires at most once.
    pub(crate) fn begin_terminal_transition(&self) -> bool {
        self.state
            .compare_exchange(
                STATE_ACTIVE,
                STATE_COMPLETING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub(crate) fn finish_terminal_transition(&self, terminal: u8) {
        self.state.store(terminal, Ordering::Release);
    }
}
