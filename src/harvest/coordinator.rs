//! Harvest coordinator - runs the configured targets through the control loop
//!
//! This module contains the run loop that ties everything together:
//! - Seeding a shared queue with the configured targets
//! - Spawning a fixed pool of worker tasks that pull from it
//! - Serving fresh results from the cache and fetching the rest through
//!   [`AdaptiveController::attempt`]
//! - Pausing, rotating identities and backing off as the controller advises
//! - Handling interrupts and producing the final summary

use crate::cache::{item_count, CacheKey, ResultCache};
use crate::config::{Config, TargetEntry};
use crate::control::{AdaptiveController, AttemptError};
use crate::harvest::fetcher::{build_http_client, fetch_page};
use crate::harvest::progress::RunProgress;
use crate::output::{
    recommendations, write_markdown_summary, RunSummary, TargetOutcome, TargetStatus,
};
use crate::HarvestError;
use chrono::Utc;
use reqwest::Client;
use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

const FALLBACK_USER_AGENT: &str = concat!("prompt-harvest/", env!("CARGO_PKG_VERSION"));

type TargetQueue = Arc<Mutex<VecDeque<(usize, TargetEntry)>>>;

/// Main harvest coordinator
pub struct Harvester {
    config: Arc<Config>,
    controller: Arc<AdaptiveController>,
    client: Client,
    config_hash: Option<String>,
}

impl Harvester {
    /// Creates a harvester with its own controller and cache
    ///
    /// # Arguments
    ///
    /// * `config` - Validated configuration
    /// * `fresh` - Ignore the persisted cache; the first flush overwrites it
    ///
    /// # Returns
    ///
    /// * `Ok(Harvester)` - Ready to run
    /// * `Err(HarvestError)` - The HTTP client could not be built
    pub fn new(config: Config, fresh: bool) -> Result<Self, HarvestError> {
        let cache = if fresh {
            ResultCache::open_fresh(&config.cache)
        } else {
            ResultCache::open(&config.cache)
        };
        let controller = AdaptiveController::new(&config, cache);
        Self::with_controller(config, Arc::new(controller))
    }

    /// Creates a harvester around an existing controller
    pub fn with_controller(
        config: Config,
        controller: Arc<AdaptiveController>,
    ) -> Result<Self, HarvestError> {
        let user_agent = config
            .policy
            .user_agents
            .first()
            .map(String::as_str)
            .unwrap_or(FALLBACK_USER_AGENT);
        let client = build_http_client(&config.run, user_agent)?;

        Ok(Self {
            config: Arc::new(config),
            controller,
            client,
            config_hash: None,
        })
    }

    /// Records the configuration hash in the run summary
    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = Some(hash.into());
        self
    }

    pub fn controller(&self) -> &Arc<AdaptiveController> {
        &self.controller
    }

    /// Runs every target until done or until Ctrl-C is pressed
    pub async fn run(&self) -> RunSummary {
        self.run_until(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::warn!("Interrupt received, finishing in-flight requests");
                }
                Err(e) => {
                    tracing::warn!("Cannot listen for Ctrl-C: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        })
        .await
    }

    /// Runs every target until done or until `shutdown` completes
    ///
    /// Once `shutdown` resolves, in-flight requests finish, workers stop
    /// taking targets and whatever is left in the queue is reported as
    /// skipped. The cache is flushed, the monitor stopped and the Markdown
    /// summary written before the summary is returned.
    pub async fn run_until<S>(&self, shutdown: S) -> RunSummary
    where
        S: Future<Output = ()> + Send + 'static,
    {
        let started_at = Utc::now();
        let clock = Instant::now();

        let targets: VecDeque<_> = self.config.targets.iter().cloned().enumerate().collect();
        let total = targets.len();
        let queue: TargetQueue = Arc::new(Mutex::new(targets));
        let progress = Arc::new(RunProgress::new(total, self.config.run.workers as usize));

        let (stop_tx, stop_rx) = watch::channel(false);
        let signal = tokio::spawn(async move {
            shutdown.await;
            let _ = stop_tx.send(true);
            // Keep the sender alive so receivers never see a closed channel
            std::future::pending::<()>().await;
        });

        tracing::info!(
            "Harvesting {} targets with {} workers",
            total,
            self.config.run.workers
        );
        self.controller.start_monitor();

        let mut handles = Vec::new();
        for id in 0..self.config.run.workers {
            let worker = Worker {
                id,
                config: self.config.clone(),
                controller: self.controller.clone(),
                client: self.client.clone(),
                queue: queue.clone(),
                progress: progress.clone(),
                stop: stop_rx.clone(),
            };
            handles.push(tokio::spawn(worker.run()));
        }

        let worker_error = join_workers(handles).await;

        let interrupted = *stop_rx.borrow();
        signal.abort();

        let leftovers: Vec<_> = queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        let outcomes = assemble_outcomes(
            &self.config.targets,
            progress.take_outcomes(),
            leftovers,
            worker_error,
        );

        self.controller.flush_cache();
        self.controller.stop_monitor().await;

        let control = self.controller.summary();
        let summary = RunSummary {
            started_at,
            duration_secs: clock.elapsed().as_secs_f64(),
            interrupted,
            config_hash: self.config_hash.clone(),
            targets: outcomes,
            recommendations: recommendations(&control.metrics, &self.config.health),
            control,
        };

        let summary_path = Path::new(&self.config.run.summary_path);
        match write_markdown_summary(&summary, summary_path) {
            Ok(()) => tracing::info!("Summary written to {}", summary_path.display()),
            Err(e) => tracing::warn!(
                "Failed to write summary to {}: {}",
                summary_path.display(),
                e
            ),
        }

        summary
    }
}

struct Worker {
    id: u32,
    config: Arc<Config>,
    controller: Arc<AdaptiveController>,
    client: Client,
    queue: TargetQueue,
    progress: Arc<RunProgress>,
    stop: watch::Receiver<bool>,
}

impl Worker {
    async fn run(mut self) {
        let mut done = 0;

        while !stopped(&self.stop) {
            let next = self
                .queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front();
            let Some((index, target)) = next else {
                break;
            };
            let outcome = self.harvest(index, &target).await;
            self.progress.record(outcome);
            done += 1;
        }

        tracing::debug!("Worker {} finished after {} targets", self.id, done);
    }

    /// Processes one target: cache, pause check, then bounded attempts
    async fn harvest(&mut self, index: usize, target: &TargetEntry) -> TargetOutcome {
        let started = Instant::now();
        let mut outcome = TargetOutcome {
            index,
            category: target.category.clone(),
            url: target.url.clone(),
            status: TargetStatus::Failed,
            attempts: 0,
            items: 0,
            error: None,
            elapsed_secs: 0.0,
        };

        let key = match CacheKey::new(&target.category, &target.url) {
            Ok(key) => key,
            Err(e) => {
                tracing::error!("[{}] invalid target {}: {}", target.category, target.url, e);
                outcome.error = Some(e.to_string());
                return outcome;
            }
        };

        if let Some(payload) = self.controller.cached(&key) {
            tracing::info!("[{}] served from cache", target.category);
            outcome.status = TargetStatus::Cached;
            outcome.items = item_count(&payload);
            outcome.elapsed_secs = started.elapsed().as_secs_f64();
            return outcome;
        }

        let max_attempts = self.config.run.max_retries.max(1);
        while outcome.attempts < max_attempts && !stopped(&self.stop) {
            if self.controller.should_pause() {
                let pause = self.config.run.pause();
                tracing::warn!(
                    "Worker {} pausing {:.0}s, health is {}",
                    self.id,
                    pause.as_secs_f64(),
                    self.controller.health()
                );
                if sleep_or_stop(pause, &mut self.stop).await {
                    break;
                }
            }

            let agent = self.controller.rotate_identity_hint();
            if let Some(agent) = &agent {
                tracing::debug!("Worker {} switching user agent to {}", self.id, agent);
            }

            let client = &self.client;
            let keywords = &self.config.health.block_keywords;
            let result = self
                .controller
                .attempt(|| fetch_page(client, &target.url, agent.as_deref(), keywords))
                .await;

            match result {
                Ok(page) => {
                    outcome.attempts += 1;
                    let payload = page.to_payload();
                    outcome.items = item_count(&payload);
                    outcome.status = TargetStatus::Harvested;
                    outcome.error = None;
                    tracing::info!(
                        "[{}] harvested {} ({} bytes)",
                        target.category,
                        page.final_url,
                        page.body.len()
                    );
                    self.controller.cache_put(key, payload);
                    self.controller.flush_cache();
                    break;
                }
                Err(AttemptError::CircuitOpen { retry_in, failures }) => {
                    let wait = retry_in.max(self.config.delay.min_delay());
                    tracing::warn!(
                        "Circuit open after {} failures, worker {} waiting {:.1}s",
                        failures,
                        self.id,
                        wait.as_secs_f64()
                    );
                    if sleep_or_stop(wait, &mut self.stop).await {
                        break;
                    }
                }
                Err(AttemptError::Operation(e)) => {
                    outcome.attempts += 1;
                    tracing::warn!(
                        "[{}] attempt {}/{} failed: {}",
                        target.category,
                        outcome.attempts,
                        max_attempts,
                        e
                    );
                    outcome.error = Some(e.to_string());
                }
            }
        }

        if outcome.status == TargetStatus::Failed && outcome.attempts == 0 && stopped(&self.stop)
        {
            outcome.status = TargetStatus::Skipped;
        }
        outcome.elapsed_secs = started.elapsed().as_secs_f64();
        outcome
    }
}

/// Waits for every worker, returning the first panic message if any failed
async fn join_workers(handles: Vec<JoinHandle<()>>) -> Option<String> {
    let mut worker_error = None;
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!("Worker task failed: {}", e);
            worker_error.get_or_insert_with(|| e.to_string());
        }
    }
    worker_error
}

/// Builds one outcome per configured target, ordered by index
///
/// # Arguments
///
/// * `targets` - The configured targets
/// * `finished` - Outcomes recorded by the workers
/// * `leftovers` - Targets still queued when the run stopped; reported as skipped
/// * `worker_error` - Failure reported for targets no worker finished
fn assemble_outcomes(
    targets: &[TargetEntry],
    finished: Vec<TargetOutcome>,
    leftovers: Vec<(usize, TargetEntry)>,
    worker_error: Option<String>,
) -> Vec<TargetOutcome> {
    let mut outcomes = finished;
    for (index, target) in leftovers {
        outcomes.push(TargetOutcome::skipped(index, &target.category, &target.url));
    }

    // Targets lost with a panicked worker
    let seen: HashSet<usize> = outcomes.iter().map(|o| o.index).collect();
    for (index, target) in targets.iter().enumerate() {
        if !seen.contains(&index) {
            let mut lost = TargetOutcome::skipped(index, &target.category, &target.url);
            lost.status = TargetStatus::Failed;
            lost.error = worker_error.clone();
            outcomes.push(lost);
        }
    }
    outcomes.sort_by_key(|o| o.index);
    outcomes
}

fn stopped(stop: &watch::Receiver<bool>) -> bool {
    *stop.borrow()
}

/// Sleeps for `duration` unless the stop flag is raised first
///
/// Returns `true` if the run is stopping.
async fn sleep_or_stop(duration: Duration, stop: &mut watch::Receiver<bool>) -> bool {
    if stopped(stop) {
        return true;
    }

    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        changed = stop.changed() => changed.is_ok() && stopped(stop),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.run.workers = 2;
        config.run.summary_path = dir.path().join("summary.md").display().to_string();
        config.cache.enabled = false;
        config.delay.min_delay_secs = 0.001;
        config.delay.max_delay_secs = 0.01;
        config.delay.error_backoff_base_secs = 0.002;
        config.health.monitor_interval_secs = 0.02;
        config
    }

    #[tokio::test]
    async fn test_sleep_or_stop_wakes_on_stop() {
        let (tx, mut rx) = watch::channel(false);
        let started = Instant::now();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = tx.send(true);
            std::future::pending::<()>().await;
        });

        assert!(sleep_or_stop(Duration::from_secs(30), &mut rx).await);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_sleep_or_stop_runs_out() {
        let (_tx, mut rx) = watch::channel(false);
        assert!(!sleep_or_stop(Duration::from_millis(5), &mut rx).await);
    }

    fn entry(category: &str) -> TargetEntry {
        TargetEntry {
            category: category.to_string(),
            url: format!("https://example.com/{}", category.to_lowercase()),
        }
    }

    #[tokio::test]
    async fn test_panicked_worker_keeps_recorded_outcomes() {
        let targets = vec![entry("Marketing"), entry("Sales"), entry("Legal")];
        let progress = Arc::new(RunProgress::new(targets.len(), 1));

        // Finishes the first target, then dies on the second
        let recorder = progress.clone();
        let first = targets[0].clone();
        let handle = tokio::spawn(async move {
            let mut outcome = TargetOutcome::skipped(0, &first.category, &first.url);
            outcome.status = TargetStatus::Harvested;
            outcome.attempts = 1;
            recorder.record(outcome);
            panic!("worker crashed");
        });

        let worker_error = join_workers(vec![handle]).await;
        assert!(worker_error.is_some());

        let leftovers = vec![(2, targets[2].clone())];
        let outcomes =
            assemble_outcomes(&targets, progress.take_outcomes(), leftovers, worker_error);

        let statuses: Vec<_> = outcomes.iter().map(|o| o.status).collect();
        assert_eq!(
            statuses,
            vec![TargetStatus::Harvested, TargetStatus::Failed, TargetStatus::Skipped]
        );
        assert_eq!(outcomes[0].attempts, 1);
        assert!(outcomes[0].error.is_none());
        assert!(outcomes[1].error.as_deref().unwrap().contains("panic"));
    }

    #[tokio::test]
    async fn test_empty_run_writes_summary() {
        let dir = TempDir::new().unwrap();
        let config = create_test_config(&dir);
        let harvester = Harvester::new(config, false).unwrap().with_config_hash("abc");

        let summary = harvester.run_until(std::future::pending()).await;

        assert!(summary.targets.is_empty());
        assert!(!summary.interrupted);
        assert_eq!(summary.config_hash.as_deref(), Some("abc"));
        assert!(dir.path().join("summary.md").exists());
    }

    #[tokio::test]
    async fn test_invalid_target_fails_without_requests() {
        let dir = TempDir::new().unwrap();
        let mut config = create_test_config(&dir);
        config.targets.push(TargetEntry {
            category: "Broken".to_string(),
            url: "not a url".to_string(),
        });
        let harvester = Harvester::new(config, false).unwrap();

        let summary = harvester.run_until(std::future::pending()).await;

        assert_eq!(summary.targets.len(), 1);
        assert_eq!(summary.targets[0].status, TargetStatus::Failed);
        assert_eq!(summary.targets[0].attempts, 0);
        assert!(summary.targets[0].error.is_some());
        assert_eq!(summary.control.metrics.total_requests, 0);
    }

    #[tokio::test]
    async fn test_immediate_shutdown_skips_everything() {
        let dir = TempDir::new().unwrap();
        let mut config = create_test_config(&dir);
        for i in 0..3 {
            config.targets.push(TargetEntry {
                category: format!("Cat{}", i),
                url: format!("http://127.0.0.1:9/{}", i),
            });
        }
        let harvester = Harvester::new(config, false).unwrap();

        // The stop flag is raised before any worker is polled
        let summary = harvester.run_until(async {}).await;

        assert!(summary.interrupted);
        assert_eq!(summary.targets.len(), 3);
        let indices: Vec<_> = summary.targets.iter().map(|t| t.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }
}
