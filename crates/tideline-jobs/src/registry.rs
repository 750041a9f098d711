use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tideline_jetstream::PostEvent;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::RegistryError;
use crate::job::{
    JobConfig, JobEntry, JobMatchEvent, JobOutcome, JobState, STATE_CANCELLED, STATE_COMPLETED,
};
use crate::keywords::{compile_match_regex, extract_keywords};

/// Point-in-time view of one job, for status/stats endpoints.
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    pub job_id: String,
    pub correlation_id: String,
    pub keywords: Vec<String>,
    pub matched_count: u64,
    pub slow_consumer_drops: u64,
    pub state: JobState,
}

/// Holds every active job and routes inbound posts to the jobs whose
/// keyword regex matches. Single exclusive mutation domain for job state
/// (spec §5): the registry is the only writer of its `DashMap`.
#[derive(Default)]
pub struct JobRegistry {
    jobs: DashMap<String, Arc<JobEntry>>,
}

impl JobRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            jobs: DashMap::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn is_registered(&self, job_id: &str) -> bool {
        self.jobs.contains_key(job_id)
    }

    pub fn snapshot(&self, job_id: &str) -> Option<JobSnapshot> {
        self.jobs.get(job_id).map(|entry| JobSnapshot {
            job_id: entry.job_id.clone(),
            correlation_id: entry.correlation_id.clone(),
            keywords: entry.keywords.clone(),
            matched_count: entry.matched_count(),
            slow_consumer_drops: entry.slow_consumer_drops(),
            state: entry.state(),
        })
    }

    pub fn snapshots(&self) -> Vec<JobSnapshot> {
        self.jobs
            .iter()
            .map(|entry| JobSnapshot {
                job_id: entry.job_id.clone(),
                correlation_id: entry.correlation_id.clone(),
                keywords: entry.keywords.clone(),
                matched_count: entry.matched_count(),
                slow_consumer_drops: entry.slow_consumer_drops(),
                state: entry.state(),
            })
            .collect()
    }

    /// Register a new job: validates the prompt, compiles its regex,
    /// stores it `active`, and arms its deadline timer. Returns
    /// `DuplicateJob` if `job_id` is already registered — callers are
    /// expected to cancel the predecessor first.
    pub fn register(self: &Arc<Self>, config: JobConfig) -> Result<(), RegistryError> {
        if config.job_id.is_empty() || config.prompt.is_empty() {
            return Err(RegistryError::InvalidJob);
        }
        if self.jobs.contains_key(&config.job_id) {
            return Err(RegistryError::DuplicateJob(config.job_id));
        }

        let keywords = extract_keywords(&config.prompt);
        let regex = compile_match_regex(&keywords);
        if regex.is_none() {
            warn!(
                job_id = %config.job_id,
                prompt = %config.prompt,
                "keyword extraction yielded no terms; job will never match"
            );
        }

        let (entry, mut dispatch_rx) = JobEntry::new(
            config.job_id.clone(),
            config.prompt,
            keywords,
            regex,
            config.correlation_id,
            config.deadline,
            config.on_complete,
        );

        let on_data = config.on_data;
        let job_id_for_worker = entry.job_id.clone();
        tokio::spawn(async move {
            while let Some(event) = dispatch_rx.recv().await {
                if let Err(e) = on_data(event) {
                    warn!(job_id = %job_id_for_worker, error = %e, "job callback failed");
                }
            }
        });

        let deadline = entry.deadline;
        let registry = Arc::clone(self);
        let job_id_for_deadline = entry.job_id.clone();
        let deadline_task: JoinHandle<()> = tokio::spawn(async move {
            let now = Utc::now();
            if let Ok(remaining) = (deadline - now).to_std() {
                tokio::time::sleep(remaining).await;
            }
            debug!(job_id = %job_id_for_deadline, "job deadline reached");
            registry.complete(&job_id_for_deadline);
        });
        // The deadline task outlives this call; if the job completes or is
        // cancelled first, `complete`/`cancel` win the state race and the
        // deadline firing later becomes a no-op.
        drop(deadline_task);

        info!(job_id = %config.job_id, keywords = ?entry.keywords, "job registered");
        self.jobs.insert(config.job_id, entry);
        Ok(())
    }

    /// For each active job whose regex matches `post.text`, increments its
    /// counter and best-effort dispatches the match. A full per-job
    /// dispatch channel counts as a slow-consumer drop rather than
    /// blocking this call or any other job's delivery.
    pub fn route_post(&self, post: &PostEvent) {
        for entry in self.jobs.iter() {
            let entry = entry.value();
            if !entry.is_active() || !entry.matches(&post.text) {
                continue;
            }

            let matched_count = entry.increment_matched();
            let event = JobMatchEvent {
                job_id: entry.job_id.clone(),
                post: post.clone(),
                matched_count,
            };

            match entry.dispatch_tx.try_send(event) {
                Ok(()) => {}
                Err(tokio::sync::mpsc::error::TrySendError::Full(_)) => {
                    entry.record_slow_consumer_drop();
                    warn!(job_id = %entry.job_id, "dropping match: slow consumer");
                }
                Err(tokio::sync::mpsc::error::TrySendError::Closed(_)) => {
                    // Worker already shut down (job is completing); ignore.
                }
            }
        }
    }

    /// Move a job to `completed`, invoking its terminal callback with the
    /// final match count exactly once, then remove it from the registry.
    pub fn complete(&self, job_id: &str) {
        self.terminate(job_id, STATE_COMPLETED, |matched_count| {
            JobOutcome::Completed { matched_count }
        });
    }

    /// Move a job to `cancelled`. Idempotent: cancelling an already
    /// terminal job is a no-op.
    pub fn cancel(&self, job_id: &str) {
        self.terminate(job_id, STATE_CANCELLED, |matched_count| {
            JobOutcome::Cancelled { matched_count }
        });
    }

    /// Fail a job (e.g. on reconnect exhaustion), invoking its terminal
    /// callback with the given error.
    pub fn fail(&self, job_id: &str, error: String) {
        self.terminate(job_id, STATE_CANCELLED, move |matched_count| {
            JobOutcome::Failed {
                error: error.clone(),
                matched_count,
            }
        });
    }

    fn terminate(
        &self,
        job_id: &str,
        terminal_state: u8,
        outcome: impl FnOnce(u64) -> JobOutcome,
    ) {
        let Some((_, entry)) = self.jobs.remove(job_id) else {
            return;
        };

        if !entry.begin_terminal_transition() {
            // Another caller already won the terminal race; put it back
            // only if it's somehow still active (never happens in
            // practice, but avoids silently dropping a live job).
            return;
        }

        entry.finish_terminal_transition(terminal_state);
        (entry.on_complete)(outcome(entry.matched_count()));
    }
}
