//! One run of one job: snapshot, fetch, transform, deliver, record.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use lettre::message::Mailbox;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::delivery::{self, MailError};
use crate::fetch::{FetchError, Fetcher};
use crate::job::Job;
use crate::mailer::Mailer;
use crate::sandbox::{self, SandboxError};
use crate::store::{JobStore, StoreError};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("Data fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("{0}")]
    Sandbox(#[from] SandboxError),
    #[error("Email delivery failed: {0}")]
    Mail(#[from] MailError),
    #[error("storage failure: {0}")]
    Store(#[from] StoreError),
    #[error("run failed: {0}")]
    Internal(String),
    #[error("run cancelled by shutdown")]
    Cancelled,
}

/// Executes job runs. Holds read-only handles to the other
/// subsystems; per-run state is a snapshot taken from the store.
pub struct Executor {
    store: JobStore,
    fetcher: Fetcher,
    mailer: Mailer,
    sender: Mailbox,
    script_deadline: Duration,
    shutdown: watch::Receiver<bool>,
}

impl Executor {
    pub fn new(
        store: JobStore,
        fetcher: Fetcher,
        mailer: Mailer,
        sender: Mailbox,
        script_deadline: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            fetcher,
            mailer,
            sender,
            script_deadline,
            shutdown,
        }
    }

    /// Run one job by name. `last_run` advances only when the results
    /// email was accepted; every failure path sends a best-effort
    /// failure notice instead.
    pub async fn run(&self, name: &str) -> Result<(), RunError> {
        let job = match self.store.get(name).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                // Deletion raced execution.
                debug!(job = %name, "job disappeared before execution, skipping run");
                return Ok(());
            }
            Err(e) => {
                error!(job = %name, "could not snapshot job: {e}");
                return Err(RunError::Store(e));
            }
        };

        let run_time = Utc::now();
        info!(job = %name, source = %job.data_source.location, "starting job run");

        let input = match self
            .with_cancellation(async {
                self.fetcher
                    .fetch(&job.data_source)
                    .await
                    .map_err(RunError::from)
            })
            .await
        {
            Ok(table) => table,
            Err(e @ RunError::Cancelled) => return Err(e),
            Err(e) => {
                error!(job = %name, "{e}");
                self.send_failure_notice(&job, &e.to_string()).await;
                return Err(e);
            }
        };

        let output = match sandbox::run(&job.processing_script, input, self.script_deadline).await
        {
            Ok(table) => table,
            Err(e) => {
                let e = RunError::Sandbox(e);
                error!(job = %name, "{e}");
                self.send_failure_notice(&job, &e.to_string()).await;
                return Err(e);
            }
        };

        info!(job = %name, rows = output.row_count(), "transform complete, delivering results");

        match self
            .with_cancellation(async {
                delivery::deliver_success(
                    &self.mailer,
                    &self.sender,
                    &job.job_name,
                    &job.consumer_emails,
                    &output,
                    run_time,
                )
                .await
                .map_err(RunError::from)
            })
            .await
        {
            Ok(()) => {}
            Err(e @ RunError::Cancelled) => return Err(e),
            Err(e) => {
                error!(job = %name, "{e}");
                return Err(e);
            }
        }

        if let Err(e) = self.store.touch_last_run(name, Utc::now()).await {
            // The run itself succeeded; only the bookkeeping is lost.
            error!(job = %name, "failed to update last_run: {e}");
        }
        info!(job = %name, "job run completed successfully");
        Ok(())
    }

    /// One-shot run for the `test` endpoint: fetch and transform only,
    /// returning the CSV text. No email, no `last_run`.
    pub async fn test_run(&self, job: &Job) -> Result<String, RunError> {
        let input = self.fetcher.fetch(&job.data_source).await?;
        let output = sandbox::run(&job.processing_script, input, self.script_deadline).await?;
        output
            .to_csv()
            .map_err(|e| RunError::Internal(format!("CSV conversion failed: {e}")))
    }

    /// A failure notice that itself fails is logged and abandoned.
    async fn send_failure_notice(&self, job: &Job, summary: &str) {
        let result = self
            .with_cancellation(async {
                delivery::deliver_failure(
                    &self.mailer,
                    &self.sender,
                    &job.job_name,
                    &job.consumer_emails,
                    summary,
                    Utc::now(),
                )
                .await
                .map_err(RunError::from)
            })
            .await;
        if let Err(e) = result {
            warn!(job = %job.job_name, "failed to deliver failure notice: {e}");
        }
    }

    /// Race a stage against the shutdown signal; the stage unwinds at
    /// its next suspension point.
    async fn with_cancellation<F, T>(&self, stage: F) -> Result<T, RunError>
    where
        F: Future<Output = Result<T, RunError>>,
    {
        let mut shutdown = self.shutdown.clone();
        if *shutdown.borrow() {
            return Err(RunError::Cancelled);
        }
        tokio::select! {
            result = stage => result,
            _ = shutdown.changed() => Err(RunError::Cancelled),
        }
    }
}
