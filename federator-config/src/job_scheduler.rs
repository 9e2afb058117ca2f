//! Job Scheduler (spec.md section 4.10): a durable periodic-task runner.
//! Registers one recurring job per (server, topic) pair on the consumer
//! side, with retry caps, immediate-trigger, and graceful shutdown.
//!
//! Job definitions themselves are reconstructed from the Configuration
//! Resolver's snapshot at each startup rather than persisted separately —
//! since offsets are already durable in the Offset Store Adapter, replaying
//! `register_job` for every (server, topic) pair in the snapshot on startup
//! gives the same at-least-once guarantee spec.md asks for without a second
//! durable job store (see DESIGN.md).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Clone, Debug)]
pub struct JobParams {
    pub job_id: String,
    pub job_name: String,
    pub interval: Duration,
    pub max_retries: u32,
    pub require_immediate_trigger: bool,
}

/// A unit of recurring work; `run` surfaces its own errors so the scheduler
/// can apply the retry-decision policy without knowing the job's internals.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self) -> Result<(), anyhow::Error>;
}

struct JobEntry {
    trigger_tx: mpsc::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

/// At-most-one-concurrent-run-per-job scheduler. One instance per consumer
/// process; the Configuration Resolver puller and every per-(server, topic)
/// Streaming Conductor are registered against it.
pub struct JobScheduler {
    jobs: Mutex<HashMap<String, JobEntry>>,
    shutdown: CancellationToken,
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl JobScheduler {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Registers and immediately starts a recurring job. Re-registering the
    /// same `job_id` is a no-op on an already-running job (the conductor's
    /// own start/stop lifecycle, not the scheduler, handles topology
    /// changes that remove a (server, topic) pair).
    pub async fn register_job(&self, params: JobParams, handler: Arc<dyn JobHandler>) {
        let mut jobs = self.jobs.lock().await;
        if jobs.contains_key(&params.job_id) {
            return;
        }

        let (trigger_tx, mut trigger_rx) = mpsc::channel::<()>(1);
        let shutdown = self.shutdown.clone();
        let job_id = params.job_id.clone();
        let job_name = params.job_name.clone();
        let interval = params.interval;
        let max_retries = params.max_retries;
        let immediate = params.require_immediate_trigger;

        let task = tokio::spawn(async move {
            let mut consecutive_failures = 0u32;
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            if immediate {
                run_once(&*handler, &job_name, &mut consecutive_failures, max_retries).await;
            }

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!(job = %job_name, "job scheduler stopping job");
                        return;
                    }
                    _ = trigger_rx.recv() => {
                        run_once(&*handler, &job_name, &mut consecutive_failures, max_retries).await;
                    }
                    _ = ticker.tick() => {
                        run_once(&*handler, &job_name, &mut consecutive_failures, max_retries).await;
                    }
                }
            }
        });

        jobs.insert(job_id, JobEntry { trigger_tx, task });
    }

    /// Forces an out-of-cycle run of a registered job.
    pub async fn trigger_now(&self, job_id: &str) {
        let jobs = self.jobs.lock().await;
        if let Some(entry) = jobs.get(job_id) {
            let _ = entry.trigger_tx.try_send(());
        }
    }

    pub async fn is_registered(&self, job_id: &str) -> bool {
        self.jobs.lock().await.contains_key(job_id)
    }

    /// Stops every job and waits for its task to exit.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let mut jobs = self.jobs.lock().await;
        for (job_id, entry) in jobs.drain() {
            if let Err(e) = entry.task.await {
                warn!(job_id = %job_id, error = %e, "job task panicked during shutdown");
            }
        }
    }
}

async fn run_once(
    handler: &dyn JobHandler,
    job_name: &str,
    consecutive_failures: &mut u32,
    max_retries: u32,
) {
    match handler.run().await {
        Ok(()) => {
            *consecutive_failures = 0;
        }
        Err(e) => {
            *consecutive_failures += 1;
            if *consecutive_failures > max_retries {
                error!(job = %job_name, error = %e, failures = *consecutive_failures, "job exceeded max retries, will still retry on next tick");
            } else {
                warn!(job = %job_name, error = %e, attempt = *consecutive_failures, "job run failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingJob {
        calls: Arc<AtomicU32>,
        fail_first_n: u32,
    }

    #[async_trait]
    impl JobHandler for CountingJob {
        async fn run(&self) -> Result<(), anyhow::Error> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first_n {
                anyhow::bail!("synthetic failure {n}");
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_trigger_runs_before_first_tick() {
        let scheduler = JobScheduler::new();
        let calls = Arc::new(AtomicU32::new(0));
        scheduler
            .register_job(
                JobParams {
                    job_id: "j1".to_string(),
                    job_name: "test-job".to_string(),
                    interval: Duration::from_secs(60),
                    max_retries: 3,
                    require_immediate_trigger: true,
                },
                Arc::new(CountingJob { calls: calls.clone(), fail_first_n: 0 }),
            )
            .await;
        tokio::task::yield_now().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn duplicate_registration_is_a_no_op() {
        let scheduler = JobScheduler::new();
        let calls = Arc::new(AtomicU32::new(0));
        let params = JobParams {
            job_id: "dup".to_string(),
            job_name: "dup-job".to_string(),
            interval: Duration::from_secs(60),
            max_retries: 1,
            require_immediate_trigger: true,
        };
        scheduler
            .register_job(params.clone(), Arc::new(CountingJob { calls: calls.clone(), fail_first_n: 0 }))
            .await;
        scheduler
            .register_job(params, Arc::new(CountingJob { calls: calls.clone(), fail_first_n: 0 }))
            .await;
        tokio::task::yield_now().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn trigger_now_forces_out_of_cycle_run() {
        let scheduler = JobScheduler::new();
        let calls = Arc::new(AtomicU32::new(0));
        scheduler
            .register_job(
                JobParams {
                    job_id: "manual".to_string(),
                    job_name: "manual-job".to_string(),
                    interval: Duration::from_secs(3600),
                    max_retries: 1,
                    require_immediate_trigger: false,
                },
                Arc::new(CountingJob { calls: calls.clone(), fail_first_n: 0 }),
            )
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        scheduler.trigger_now("manual").await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn stop_halts_all_jobs() {
        let scheduler = JobScheduler::new();
        let calls = Arc::new(AtomicU32::new(0));
        scheduler
            .register_job(
                JobParams {
                    job_id: "stoppable".to_string(),
                    job_name: "stoppable-job".to_string(),
                    interval: Duration::from_millis(5),
                    max_retries: 1,
                    require_immediate_trigger: false,
                },
                Arc::new(CountingJob { calls: calls.clone(), fail_first_n: 0 }),
            )
            .await;
        scheduler.stop().await;
        assert!(!scheduler.is_registered("stoppable").await);
    }
}
