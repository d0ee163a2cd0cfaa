//! Rolling list of jobs pushed over the socket.

use std::sync::{Mutex, PoisonError};

use matching::{MatchScore, SkillMatcher};
use serde_json::Value;
use shared::{
    domain::JobItem,
    protocol::WsMessage,
};
use tokio::sync::watch;
use tracing::debug;

use crate::ws::{HandlerRegistration, WsClient};

/// Oldest jobs fall off past this many entries.
pub const FEED_CAPACITY: usize = 100;
pub const NEW_JOBS_TAG: &str = "new_jobs";

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredJob {
    pub job: JobItem,
    pub score: MatchScore,
}

pub struct JobFeed {
    jobs: watch::Sender<Vec<JobItem>>,
    registration: Mutex<Option<(WsClient, HandlerRegistration)>>,
}

impl Default for JobFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl JobFeed {
    pub fn new() -> Self {
        let (jobs, _) = watch::channel(Vec::new());
        Self {
            jobs,
            registration: Mutex::new(None),
        }
    }

    pub fn jobs(&self) -> Vec<JobItem> {
        self.jobs.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<JobItem>> {
        self.jobs.subscribe()
    }

    /// Newest batch goes first, in the order the batch arrived.
    pub fn push_batch(&self, batch: Vec<JobItem>) {
        push_batch(&self.jobs, batch);
    }

    pub fn clear(&self) {
        self.jobs.send_if_modified(|jobs| {
            let changed = !jobs.is_empty();
            jobs.clear();
            changed
        });
    }

    /// Starts following `new_jobs` frames on `ws`, replacing any earlier attachment.
    pub fn attach(&self, ws: &WsClient) {
        let sender = self.jobs.clone();
        let registration = ws.on(NEW_JOBS_TAG, move |message| {
            let batch: Vec<JobItem> = message
                .get("jobs")
                .and_then(Value::as_array)
                .map(|raw| raw.iter().map(|job| JobItem::from_raw(job, None)).collect())
                .unwrap_or_default();
            debug!(count = batch.len(), "feed: new jobs");
            push_batch(&sender, batch);
        });

        let previous = lock(&self.registration).replace((ws.clone(), registration));
        if let Some((_, previous)) = previous {
            previous.unregister();
        }
    }

    pub fn detach(&self) {
        if let Some((_, registration)) = lock(&self.registration).take() {
            registration.unregister();
        }
    }

    /// Asks the backend to narrow what it pushes. Queued until the socket opens.
    pub fn subscribe_filters(&self, filters: Value) -> bool {
        match &*lock(&self.registration) {
            Some((ws, _)) => {
                ws.send(WsMessage::subscribe(filters));
                true
            }
            None => false,
        }
    }

    /// Current jobs scored against `cv_skills`, best match first.
    pub fn scored(&self, matcher: &SkillMatcher, cv_skills: &[String]) -> Vec<ScoredJob> {
        let mut scored: Vec<ScoredJob> = self
            .jobs
            .borrow()
            .iter()
            .map(|job| ScoredJob {
                score: matcher.score(cv_skills, &job.skills),
                job: job.clone(),
            })
            .collect();
        scored.sort_by(|a, b| b.score.percentage.cmp(&a.score.percentage));
        scored
    }
}

fn push_batch(sender: &watch::Sender<Vec<JobItem>>, batch: Vec<JobItem>) {
    if batch.is_empty() {
        return;
    }
    sender.send_modify(|jobs| {
        let mut next = batch;
        next.extend(jobs.drain(..));
        next.truncate(FEED_CAPACITY);
        *jobs = next;
    });
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[path = "tests/feed_tests.rs"]
mod tests;
