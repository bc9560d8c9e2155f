//! Parallel search execution with adaptive concurrency
//!
//! The executor tracks a rolling success rate; when it drops below 0.5 the
//! worker count is halved for the next dispatch (minimum 1). The overall
//! timeout synthesizes failures for tasks that never completed.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use signalstore::{DocumentRef, Page, SearchTask};

use super::source::Source;

const SUCCESS_RATE_WINDOW: usize = 20;
const LOW_SUCCESS_RATE_THRESHOLD: f64 = 0.5;

/// Rolling window of recent task outcomes
#[derive(Debug)]
pub struct SuccessRateTracker {
    window: usize,
    history: VecDeque<bool>,
}

impl SuccessRateTracker {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            history: VecDeque::with_capacity(window),
        }
    }

    pub fn record(&mut self, success: bool) {
        if self.history.len() == self.window {
            self.history.pop_front();
        }
        self.history.push_back(success);
    }

    /// 1.0 until any outcome has been recorded
    pub fn rate(&self) -> f64 {
        if self.history.is_empty() {
            return 1.0;
        }
        let successes = self.history.iter().filter(|s| **s).count();
        successes as f64 / self.history.len() as f64
    }
}

impl Default for SuccessRateTracker {
    fn default() -> Self {
        Self::new(SUCCESS_RATE_WINDOW)
    }
}

/// Outcome of one dispatched search task
#[derive(Debug)]
pub struct TaskOutcome {
    pub task: SearchTask,
    pub page: Page<DocumentRef>,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: Option<u64>,
}

/// Bounded parallel dispatcher for source searches
pub struct ParallelExecutor {
    max_workers: usize,
    overall_timeout: Duration,
    task_timeout: Duration,
    max_retries: u32,
    retry_delay: Duration,
    adaptive_scaling: bool,
    tracker: SuccessRateTracker,
}

impl ParallelExecutor {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers,
            overall_timeout: Duration::from_secs(60),
            task_timeout: Duration::from_secs(30),
            max_retries: 0,
            retry_delay: Duration::from_secs(1),
            adaptive_scaling: true,
            tracker: SuccessRateTracker::default(),
        }
    }

    pub fn with_timeouts(mut self, overall: Duration, per_task: Duration) -> Self {
        self.overall_timeout = overall;
        self.task_timeout = per_task;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    /// Record an outcome into the rolling window (used by tests and by
    /// `execute_searches` itself)
    pub fn record_outcome(&mut self, success: bool) {
        self.tracker.record(success);
    }

    /// Worker count for this dispatch, halved when the success rate is low
    pub fn effective_workers(&self, task_count: usize) -> usize {
        let base = self.max_workers.min(task_count).max(1);
        if !self.adaptive_scaling {
            return base;
        }
        let rate = self.tracker.rate();
        if rate < LOW_SUCCESS_RATE_THRESHOLD {
            let scaled = (base / 2).max(1);
            info!(base, scaled, rate, "effective_workers: scaling down");
            return scaled;
        }
        base
    }

    /// Run every task against the source, bounded and timed out.
    ///
    /// Tasks that neither complete nor fail before the overall timeout get
    /// an "Overall timeout" failure; nothing is re-raised.
    pub async fn execute_searches(&mut self, tasks: Vec<SearchTask>, source: Arc<dyn Source>) -> Vec<TaskOutcome> {
        if tasks.is_empty() {
            return Vec::new();
        }
        let workers = self.effective_workers(tasks.len());
        info!(task_count = tasks.len(), workers, "execute_searches: dispatching");

        let semaphore = Arc::new(Semaphore::new(workers));
        let mut join_set = JoinSet::new();
        for task in tasks.iter().cloned() {
            let source = source.clone();
            let semaphore = semaphore.clone();
            let task_timeout = self.task_timeout;
            let max_retries = self.max_retries;
            let retry_delay = self.retry_delay;
            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let started = Instant::now();
                let result = safe_search(source, &task, task_timeout, max_retries, retry_delay).await;
                let duration_ms = started.elapsed().as_millis() as u64;
                match result {
                    Ok(page) => TaskOutcome {
                        task,
                        page,
                        success: true,
                        error: None,
                        duration_ms: Some(duration_ms),
                    },
                    Err(e) => TaskOutcome {
                        task,
                        page: Page::empty(),
                        success: false,
                        error: Some(e),
                        duration_ms: Some(duration_ms),
                    },
                }
            });
        }

        let deadline = Instant::now() + self.overall_timeout;
        let mut outcomes: Vec<TaskOutcome> = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, join_set.join_next()).await {
                Ok(Some(Ok(outcome))) => {
                    self.tracker.record(outcome.success);
                    outcomes.push(outcome);
                }
                Ok(Some(Err(e))) => warn!(error = %e, "execute_searches: join error"),
                Ok(None) => break,
                Err(_) => {
                    warn!("execute_searches: overall timeout");
                    join_set.abort_all();
                    break;
                }
            }
        }

        let done: std::collections::BTreeSet<String> = outcomes.iter().map(|o| o.task.task_id.clone()).collect();
        for task in tasks.into_iter().filter(|t| !done.contains(&t.task_id)) {
            self.tracker.record(false);
            outcomes.push(TaskOutcome {
                task,
                page: Page::empty(),
                success: false,
                error: Some("Overall timeout".to_string()),
                duration_ms: None,
            });
        }

        debug!(
            refs = outcomes.iter().map(|o| o.page.items.len()).sum::<usize>(),
            successes = outcomes.iter().filter(|o| o.success).count(),
            "execute_searches: complete"
        );
        outcomes
    }
}

async fn safe_search(
    source: Arc<dyn Source>,
    task: &SearchTask,
    task_timeout: Duration,
    max_retries: u32,
    retry_delay: Duration,
) -> Result<Page<DocumentRef>, String> {
    let mut last_error = "Search failed".to_string();
    for attempt in 0..=max_retries {
        if attempt > 0 {
            tokio::time::sleep(retry_delay).await;
        }
        match tokio::time::timeout(task_timeout, source.search(task)).await {
            Ok(Ok(page)) => return Ok(page),
            Ok(Err(e)) => last_error = e.to_string(),
            Err(_) => last_error = "Timeout".to_string(),
        }
    }
    Err(last_error)
}
