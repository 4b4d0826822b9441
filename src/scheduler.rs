//! Cron-driven scheduling: one timer task per registered job.
//!
//! The scheduler owns the in-memory timer table; the store owns the
//! durable records. Every registered job has exactly one timer entry
//! and a one-permit gate enforcing at most one run in flight per job.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Local;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::executor::Executor;
use crate::job::Job;
use crate::schedule::{JobSchedule, ScheduleError};
use crate::store::{JobStore, StoreError};

struct JobTimer {
    schedule: String,
    handle: JoinHandle<()>,
}

struct SchedulerInner {
    executor: Arc<Executor>,
    timers: Mutex<HashMap<String, JobTimer>>,
    // Gates outlive their timer entries so an update cannot defeat
    // the one-run-per-job rule while the old run is still going.
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    runs: Mutex<Vec<JoinHandle<()>>>,
    run_slots: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
    accepting: AtomicBool,
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub fn new(executor: Arc<Executor>, pool_size: usize, shutdown: watch::Sender<bool>) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                executor,
                timers: Mutex::new(HashMap::new()),
                gates: Mutex::new(HashMap::new()),
                runs: Mutex::new(Vec::new()),
                run_slots: Arc::new(Semaphore::new(pool_size)),
                shutdown,
                accepting: AtomicBool::new(true),
            }),
        }
    }

    /// Register a job's timer, replacing any prior entry of the same
    /// name.
    pub fn register(&self, job: &Job) -> Result<(), ScheduleError> {
        let schedule = JobSchedule::parse(&job.schedule_time)?;
        let name = job.job_name.clone();

        if let Some(next) = schedule.upcoming() {
            info!(job = %name, "scheduled, next run at {next}");
        }

        let handle = tokio::spawn(timer_loop(self.inner.clone(), name.clone(), schedule));

        let mut timers = self.inner.timers.lock().unwrap();
        if let Some(previous) = timers.insert(
            name.clone(),
            JobTimer {
                schedule: job.schedule_time.clone(),
                handle,
            },
        ) {
            previous.handle.abort();
            debug!(job = %name, "replaced existing timer entry");
        }
        Ok(())
    }

    /// Remove a job's timer. Idempotent; an in-flight run finishes
    /// against its snapshot.
    pub fn unregister(&self, name: &str) {
        let removed = self.inner.timers.lock().unwrap().remove(name);
        if let Some(timer) = removed {
            timer.handle.abort();
            info!(job = %name, "unscheduled");
        }

        // Drop the gate only when nothing holds its permit.
        let mut gates = self.inner.gates.lock().unwrap();
        if let Some(gate) = gates.get(name).cloned() {
            if gate.try_acquire_owned().is_ok() {
                gates.remove(name);
            }
        }
    }

    /// Names with a live timer entry, in no particular order.
    pub fn list(&self) -> Vec<String> {
        self.inner.timers.lock().unwrap().keys().cloned().collect()
    }

    /// The registered cron expression for a name, if any.
    pub fn schedule_of(&self, name: &str) -> Option<String> {
        self.inner
            .timers
            .lock()
            .unwrap()
            .get(name)
            .map(|t| t.schedule.clone())
    }

    /// The per-job concurrency gate, for callers that run a job
    /// outside the timer path (the `test` endpoint).
    pub fn run_gate(&self, name: &str) -> Arc<Semaphore> {
        gate_for(&self.inner, name)
    }

    /// Register every job the store knows about. Individual failures
    /// are logged and skipped so one bad record cannot block boot.
    pub async fn load_all(&self, store: &JobStore) -> Result<usize, StoreError> {
        let jobs = store.list().await?;
        let total = jobs.len();
        let mut registered = 0;
        for job in jobs {
            match self.register(&job) {
                Ok(()) => registered += 1,
                Err(e) => error!(job = %job.job_name, "failed to schedule persisted job: {e}"),
            }
        }
        info!("scheduled {registered}/{total} persisted job(s)");
        Ok(registered)
    }

    /// Stop scheduling and drain. New fires cease immediately; runs
    /// still active after `timeout` are abandoned without committing.
    pub async fn stop(&self, timeout: Duration) {
        info!("stopping scheduler, draining in-flight runs");
        self.inner.accepting.store(false, Ordering::SeqCst);

        for (_, timer) in self.inner.timers.lock().unwrap().drain() {
            timer.handle.abort();
        }
        let _ = self.inner.shutdown.send(true);

        let handles: Vec<JoinHandle<()>> = self.inner.runs.lock().unwrap().drain(..).collect();
        let deadline = tokio::time::Instant::now() + timeout;
        for mut handle in handles {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if tokio::time::timeout(remaining, &mut handle).await.is_err() {
                warn!("run did not finish within the drain timeout, abandoning it");
                handle.abort();
            }
        }
        info!("scheduler stopped");
    }
}

fn gate_for(inner: &Arc<SchedulerInner>, name: &str) -> Arc<Semaphore> {
    inner
        .gates
        .lock()
        .unwrap()
        .entry(name.to_string())
        .or_insert_with(|| Arc::new(Semaphore::new(1)))
        .clone()
}

/// Sleep until each fire instant and submit the job. Fires landing
/// while a prior run is active are dropped.
async fn timer_loop(inner: Arc<SchedulerInner>, name: String, schedule: JobSchedule) {
    debug!(job = %name, "timer task started");
    loop {
        let now = Local::now();
        let Some(next) = schedule.next_after(now) else {
            warn!(job = %name, "schedule has no future fire instants, timer exiting");
            return;
        };

        let wait = (next - now).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;

        if !inner.accepting.load(Ordering::SeqCst) {
            return;
        }

        let gate = gate_for(&inner, &name);
        match gate.try_acquire_owned() {
            Ok(permit) => {
                let run_inner = inner.clone();
                let run_name = name.clone();
                let handle = tokio::spawn(async move {
                    let _permit = permit;
                    let Ok(_slot) = run_inner.run_slots.clone().acquire_owned().await else {
                        return;
                    };
                    if let Err(e) = run_inner.executor.run(&run_name).await {
                        debug!(job = %run_name, "run ended with error: {e}");
                    }
                });

                let mut runs = inner.runs.lock().unwrap();
                runs.retain(|h| !h.is_finished());
                runs.push(handle);
            }
            Err(_) => {
                info!(job = %name, "previous run still active, dropping this fire");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::fetch::Fetcher;
    use crate::job::{DataSource, SourceType};
    use crate::mailer::Mailer;
    use chrono::Utc;
    use tempfile::TempDir;

    fn scheduler(dir: &TempDir) -> (Scheduler, JobStore) {
        let config = test_config(
            dir.path().join("jobs.json"),
            dir.path().join("uploads"),
        );
        let store = JobStore::new(&config.job_storage_path);
        let (tx, rx) = watch::channel(false);
        let executor = Arc::new(Executor::new(
            store.clone(),
            Fetcher::new(config.fetch_timeout()),
            Mailer::mock(),
            config.sender(),
            config.script_deadline(),
            rx,
        ));
        (Scheduler::new(executor, config.run_pool_size(), tx), store)
    }

    fn job(name: &str, schedule: &str) -> Job {
        Job {
            job_name: name.to_string(),
            schedule_time: schedule.to_string(),
            data_source: DataSource {
                source_type: SourceType::Api,
                location: "https://example.test/data".to_string(),
                file_type: None,
            },
            processing_script: "result = data".to_string(),
            consumer_emails: vec!["x@example.com".to_string()],
            created_at: Utc::now(),
            last_run: None,
        }
    }

    #[tokio::test]
    async fn test_register_and_list() {
        let dir = TempDir::new().unwrap();
        let (scheduler, _store) = scheduler(&dir);

        scheduler.register(&job("j1", "* * * * *")).unwrap();
        scheduler.register(&job("j2", "0 * * * *")).unwrap();

        let mut names = scheduler.list();
        names.sort();
        assert_eq!(names, ["j1", "j2"]);
    }

    #[tokio::test]
    async fn test_register_replaces_same_name() {
        let dir = TempDir::new().unwrap();
        let (scheduler, _store) = scheduler(&dir);

        scheduler.register(&job("j1", "* * * * *")).unwrap();
        scheduler.register(&job("j1", "0 12 * * *")).unwrap();

        assert_eq!(scheduler.list(), ["j1"]);
        assert_eq!(scheduler.schedule_of("j1").unwrap(), "0 12 * * *");
    }

    #[tokio::test]
    async fn test_register_rejects_bad_cron() {
        let dir = TempDir::new().unwrap();
        let (scheduler, _store) = scheduler(&dir);

        assert!(scheduler.register(&job("j1", "*/0 * * * *")).is_err());
        assert!(scheduler.list().is_empty());
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let (scheduler, _store) = scheduler(&dir);

        scheduler.register(&job("j1", "* * * * *")).unwrap();
        scheduler.unregister("j1");
        scheduler.unregister("j1");
        scheduler.unregister("never-existed");
        assert!(scheduler.list().is_empty());
    }

    #[tokio::test]
    async fn test_load_all_matches_store_names() {
        let dir = TempDir::new().unwrap();
        let (scheduler, store) = scheduler(&dir);

        store.put(&job("j1", "* * * * *")).await.unwrap();
        store.put(&job("j2", "30 6 * * *")).await.unwrap();

        let registered = scheduler.load_all(&store).await.unwrap();
        assert_eq!(registered, 2);

        let mut store_names: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.job_name)
            .collect();
        let mut scheduler_names = scheduler.list();
        store_names.sort();
        scheduler_names.sort();
        assert_eq!(store_names, scheduler_names);
    }

    #[tokio::test]
    async fn test_gate_blocks_second_run() {
        let dir = TempDir::new().unwrap();
        let (scheduler, _store) = scheduler(&dir);

        scheduler.register(&job("j1", "* * * * *")).unwrap();

        let gate = scheduler.run_gate("j1");
        let permit = gate.clone().try_acquire_owned().unwrap();
        assert!(scheduler.run_gate("j1").try_acquire_owned().is_err());

        drop(permit);
        assert!(scheduler.run_gate("j1").try_acquire_owned().is_ok());
    }

    #[tokio::test]
    async fn test_gate_survives_reregistration() {
        let dir = TempDir::new().unwrap();
        let (scheduler, _store) = scheduler(&dir);

        scheduler.register(&job("j1", "* * * * *")).unwrap();
        let _permit = scheduler.run_gate("j1").try_acquire_owned().unwrap();

        // An update re-registers the timer but must keep the gate.
        scheduler.register(&job("j1", "0 * * * *")).unwrap();
        assert!(scheduler.run_gate("j1").try_acquire_owned().is_err());
    }

    #[tokio::test]
    async fn test_stop_with_nothing_in_flight() {
        let dir = TempDir::new().unwrap();
        let (scheduler, _store) = scheduler(&dir);

        scheduler.register(&job("j1", "* * * * *")).unwrap();
        scheduler.stop(Duration::from_secs(1)).await;
        assert!(scheduler.list().is_empty());
    }
}
