use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use futures_util::future::BoxFuture;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long shutdown waits for in-flight jobs.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

pub type JobFn =
    Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// The cron crate expects a seconds field; the configuration surface speaks
/// classic 5-field cron.
pub fn normalize_cron(expression: &str) -> String {
    if expression.split_whitespace().count() == 5 {
        format!("0 {expression}")
    } else {
        expression.to_string()
    }
}

struct Job {
    name: String,
    description: String,
    expression: String,
    schedule: Schedule,
    singleton: bool,
    running: AtomicBool,
    last_run: Mutex<Option<(DateTime<Utc>, bool)>>,
    run: JobFn,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub name: String,
    pub description: String,
    pub schedule: String,
    pub running: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_run_ok: Option<bool>,
    pub next_at: Option<DateTime<Utc>>,
}

/// Cron-driven runner of named jobs. Singleton jobs skip overlapping fires
/// instead of queueing them.
pub struct Scheduler {
    jobs: Vec<Arc<Job>>,
    token: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            jobs: Vec::new(),
            token,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn register(
        &mut self,
        name: &str,
        description: &str,
        expression: &str,
        singleton: bool,
        run: JobFn,
    ) -> anyhow::Result<()> {
        let normalized = normalize_cron(expression);
        let schedule = Schedule::from_str(&normalized)
            .map_err(|e| anyhow::anyhow!("job '{name}': invalid cron '{expression}': {e}"))?;
        self.jobs.push(Arc::new(Job {
            name: name.to_string(),
            description: description.to_string(),
            expression: expression.to_string(),
            schedule,
            singleton,
            running: AtomicBool::new(false),
            last_run: Mutex::new(None),
            run,
        }));
        Ok(())
    }

    /// Spawns one timer loop per job. Loops end when the root token cancels.
    pub fn start(&self) {
        for job in &self.jobs {
            let job = Arc::clone(job);
            let token = self.token.clone();
            let handle = tokio::spawn(async move {
                loop {
                    let Some(next) = job.schedule.upcoming(Utc).next() else {
                        warn!("job '{}' has no future fire time, stopping", job.name);
                        break;
                    };
                    let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {
                            Self::execute(Arc::clone(&job), token.child_token()).await;
                        }
                        _ = token.cancelled() => break,
                    }
                }
            });
            self.handles.lock().unwrap().push(handle);
        }
    }

    /// On-demand trigger. Returns false when a singleton instance is already
    /// running and the fire was skipped.
    pub fn run_now(&self, name: &str) -> anyhow::Result<bool> {
        let job = self
            .jobs
            .iter()
            .find(|j| j.name == name)
            .ok_or_else(|| anyhow::anyhow!("unknown job '{name}'"))?;
        if job.singleton && job.running.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let job = Arc::clone(job);
        let token = self.token.child_token();
        let handle = tokio::spawn(async move {
            Self::execute(job, token).await;
        });
        self.handles.lock().unwrap().push(handle);
        Ok(true)
    }

    async fn execute(job: Arc<Job>, token: CancellationToken) {
        if job.singleton {
            if job
                .running
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                info!("job '{}' still running, fire skipped", job.name);
                return;
            }
        } else {
            job.running.store(true, Ordering::SeqCst);
        }

        let started = Utc::now();
        info!("job '{}' starting", job.name);
        let result = (job.run)(token).await;
        let ok = match result {
            Ok(()) => {
                info!("job '{}' finished", job.name);
                true
            }
            Err(e) => {
                warn!("job '{}' failed: {e:#}", job.name);
                false
            }
        };
        *job.last_run.lock().unwrap() = Some((started, ok));
        job.running.store(false, Ordering::SeqCst);
    }

    pub fn inventory(&self) -> Vec<JobInfo> {
        self.jobs
            .iter()
            .map(|job| {
                let last = *job.last_run.lock().unwrap();
                JobInfo {
                    name: job.name.clone(),
                    description: job.description.clone(),
                    schedule: job.expression.clone(),
                    running: job.running.load(Ordering::SeqCst),
                    last_run_at: last.map(|(at, _)| at),
                    last_run_ok: last.map(|(_, ok)| ok),
                    next_at: job.schedule.upcoming(Utc).next(),
                }
            })
            .collect()
    }

    /// Cancels in-flight job contexts and waits a bounded period.
    pub async fn shutdown(&self) {
        self.token.cancel();
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock().unwrap());
        let drain = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            warn!("scheduler shutdown grace period elapsed, abandoning jobs");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn five_field_expressions_gain_a_seconds_field() {
        assert_eq!(normalize_cron("0 3 * * *"), "0 0 3 * * *");
        assert_eq!(normalize_cron("0 0 3 * * *"), "0 0 3 * * *");
        assert!(Schedule::from_str(&normalize_cron("30 4 * * 1")).is_ok());
    }

    fn counting_job(counter: Arc<AtomicUsize>, delay: Duration) -> JobFn {
        Arc::new(move |_token| {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn singleton_skips_overlapping_fires() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new(CancellationToken::new());
        scheduler
            .register(
                "cleanup",
                "test job",
                "0 3 * * *",
                true,
                counting_job(Arc::clone(&counter), Duration::from_millis(200)),
            )
            .unwrap();

        assert!(scheduler.run_now("cleanup").unwrap());
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Second fire while the first is still running: skipped, not queued.
        assert!(!scheduler.run_now("cleanup").unwrap());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // Once idle the job fires again.
        assert!(scheduler.run_now("cleanup").unwrap());
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn inventory_reports_schedule_and_outcome() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new(CancellationToken::new());
        scheduler
            .register(
                "cleanup",
                "test job",
                "0 3 * * *",
                true,
                counting_job(counter, Duration::ZERO),
            )
            .unwrap();

        let info = &scheduler.inventory()[0];
        assert_eq!(info.name, "cleanup");
        assert_eq!(info.schedule, "0 3 * * *");
        assert!(info.next_at.is_some());
        assert!(info.last_run_at.is_none());

        scheduler.run_now("cleanup").unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let info = &scheduler.inventory()[0];
        assert_eq!(info.last_run_ok, Some(true));
    }

    #[tokio::test]
    async fn unknown_job_is_an_error() {
        let scheduler = Scheduler::new(CancellationToken::new());
        assert!(scheduler.run_now("nope").is_err());
    }

    #[tokio::test]
    async fn shutdown_cancels_job_contexts() {
        let mut scheduler = Scheduler::new(CancellationToken::new());
        scheduler
            .register(
                "waiter",
                "waits for cancellation",
                "0 3 * * *",
                true,
                Arc::new(|token: CancellationToken| {
                    Box::pin(async move {
                        token.cancelled().await;
                        Ok(())
                    })
                }),
            )
            .unwrap();

        scheduler.run_now("waiter").unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let start = std::time::Instant::now();
        scheduler.shutdown().await;
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
