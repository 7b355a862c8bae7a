use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tracing::{error, info, warn};
use uuid::Uuid;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::job::{BackoffPolicy, Job, JobKind},
    },
    utils::config::AppConfig,
};

use crate::graph_upsert::{process_graph_job, GraphUpsertPayload};
use crate::pipeline::ExtractionPipeline;

/// Lease renewal cadence while a job is held.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);
/// Per-operation deadline for one job; a breach nacks the job.
const JOB_DEADLINE: Duration = Duration::from_secs(300);
/// Closed dispatch table: the kinds this worker claims.
const CLAIMED_KINDS: &[JobKind] = &[JobKind::ExtractEvents, JobKind::GraphUpsert];

/// How a dispatched job finished on the success path.
enum JobOutcome {
    /// The pipeline committed the job's success inside its own transaction.
    Committed,
    /// The worker still owes the queue an ack.
    NeedsAck,
}

/// Single claim-dispatch-settle loop. Sequential within one instance;
/// scale-out is more instances.
pub struct ExtractionWorker {
    db: Arc<SurrealDbClient>,
    pipeline: Arc<ExtractionPipeline>,
    config: AppConfig,
    worker_id: String,
}

impl ExtractionWorker {
    pub fn new(
        db: Arc<SurrealDbClient>,
        pipeline: Arc<ExtractionPipeline>,
        config: AppConfig,
    ) -> Self {
        let worker_id = config
            .worker_id
            .clone()
            .unwrap_or_else(|| format!("extraction-worker-{}", Uuid::new_v4()));
        Self {
            db,
            pipeline,
            config,
            worker_id,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Run until shutdown flips: stop claiming, finish the job in hand,
    /// release early.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), AppError> {
        let lease = Duration::from_secs(self.config.job_lease_seconds);
        let poll = Duration::from_millis(self.config.worker_poll_interval_ms);
        let backoff = BackoffPolicy {
            base: Duration::from_secs(self.config.retry_backoff_base),
            cap: Duration::from_secs(self.config.retry_backoff_cap),
        };

        info!(
            worker_id = %self.worker_id,
            lease_seconds = self.config.job_lease_seconds,
            poll_interval_ms = self.config.worker_poll_interval_ms,
            "worker loop started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            match Job::claim_next_ready(&self.db, &self.worker_id, CLAIMED_KINDS, Utc::now(), lease)
                .await
            {
                Ok(Some(job)) => {
                    info!(
                        worker_id = %self.worker_id,
                        job_id = %job.id,
                        kind = ?job.kind,
                        attempt = job.attempts,
                        "claimed job"
                    );
                    self.run_job(&job, lease, &backoff).await;
                }
                Ok(None) => {
                    if let Err(err) = Job::requeue_expired(&self.db, Utc::now()).await {
                        warn!(error = %err, "janitor pass failed");
                    }
                    tokio::select! {
                        () = sleep(poll) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Err(err) => {
                    error!(worker_id = %self.worker_id, error = %err, "failed to claim job");
                    sleep(Duration::from_secs(1)).await;
                }
            }
        }

        info!(worker_id = %self.worker_id, "worker loop stopped");
        Ok(())
    }

    /// Dispatch one job while renewing its lease every heartbeat tick.
    async fn run_job(&self, job: &Job, lease: Duration, backoff: &BackoffPolicy) {
        let mut process = Box::pin(timeout(JOB_DEADLINE, self.dispatch(job)));
        let mut heartbeat = interval(HEARTBEAT_INTERVAL);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.tick().await; // immediate first tick

        let result = loop {
            tokio::select! {
                result = &mut process => break result,
                _ = heartbeat.tick() => {
                    if let Err(err) =
                        Job::heartbeat(&job.id, &self.worker_id, lease, &self.db).await
                    {
                        warn!(job_id = %job.id, error = %err, "heartbeat failed");
                    }
                }
            }
        };

        let settle = match result {
            Ok(Ok(JobOutcome::Committed)) => Ok(()),
            Ok(Ok(JobOutcome::NeedsAck)) => Job::ack(&job.id, &self.db).await.map(|_| ()),
            Ok(Err(err)) => {
                error!(job_id = %job.id, error = %err, "job failed");
                Job::nack(&job.id, &err.to_string(), backoff, &self.db)
                    .await
                    .map(|_| ())
            }
            Err(_elapsed) => {
                error!(job_id = %job.id, "job exceeded its deadline");
                Job::nack(&job.id, "operation deadline exceeded", backoff, &self.db)
                    .await
                    .map(|_| ())
            }
        };
        if let Err(err) = settle {
            error!(job_id = %job.id, error = %err, "failed to settle job state");
        }
    }

    async fn dispatch(&self, job: &Job) -> Result<JobOutcome, AppError> {
        match job.kind {
            JobKind::ExtractEvents => {
                self.pipeline.process_extract_job(job).await?;
                Ok(JobOutcome::Committed)
            }
            JobKind::GraphUpsert => {
                let payload: GraphUpsertPayload = serde_json::from_value(job.payload.clone())
                    .map_err(|e| AppError::Extraction(format!("malformed graph payload: {e}")))?;
                process_graph_job(&self.db, payload).await?;
                Ok(JobOutcome::NeedsAck)
            }
        }
    }
}
