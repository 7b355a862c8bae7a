use std::collections::HashMap;
use std::time::Duration;

use rand::Rng;
use uuid::Uuid;

use crate::storage::types::job_event::JobEvent;
use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    ExtractEvents,
    GraphUpsert,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    InFlight,
    Succeeded,
    /// Momentary state recorded in the audit trail on nack; queue rows move
    /// straight on to `pending` or `dead`.
    Failed,
    Dead,
}

impl JobState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Dead => "dead",
        }
    }
}

/// Retry schedule: `min(cap, base * 2^(attempts-1))` with full jitter.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(5),
            cap: Duration::from_secs(300),
        }
    }
}

impl BackoffPolicy {
    pub fn delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(20);
        let uncapped = self
            .base
            .saturating_mul(2u32.saturating_pow(exponent));
        let ceiling = uncapped.min(self.cap);
        if ceiling.is_zero() {
            return Duration::ZERO;
        }
        let millis = rand::rng().random_range(0..=ceiling.as_millis() as u64);
        Duration::from_millis(millis)
    }
}

stored_object!(Job, "job", {
    kind: JobKind,
    payload: serde_json::Value,
    state: JobState,
    attempts: u32,
    max_attempts: u32,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime", default)]
    not_before: DateTime<Utc>,
    #[serde(serialize_with = "serialize_option_datetime", deserialize_with = "deserialize_option_datetime", default)]
    lease_until: Option<DateTime<Utc>>,
    #[serde(default)]
    worker_id: Option<String>,
    #[serde(default)]
    last_error: Option<String>
});

impl Job {
    pub fn new(kind: JobKind, payload: serde_json::Value, max_attempts: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            kind,
            payload,
            state: JobState::Pending,
            attempts: 0,
            max_attempts,
            not_before: now,
            lease_until: None,
            worker_id: None,
            last_error: None,
        }
    }

    pub async fn enqueue(job: Self, db: &SurrealDbClient) -> Result<String, AppError> {
        let job_id = job.id.clone();
        db.store_item(job).await?;
        JobEvent::record(&job_id, None, JobState::Pending, Some("enqueued"), db).await?;
        Ok(job_id)
    }

    /// Atomically claim one ready job: the oldest `pending` row whose
    /// `not_before` has passed, restricted to the given kinds. The claim
    /// flips it to `in_flight`, stamps the worker and lease, and counts the
    /// attempt.
    pub async fn claim_next_ready(
        db: &SurrealDbClient,
        worker_id: &str,
        kinds: &[JobKind],
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Option<Self>, AppError> {
        let lease_until = now
            + chrono::Duration::from_std(lease)
                .map_err(|e| AppError::Configuration(format!("lease out of range: {e}")))?;

        let mut response = db
            .client
            .query(
                "LET $candidates = (SELECT id, not_before FROM type::table($table)
                    WHERE state = 'pending' AND kind IN $kinds AND not_before <= $now
                    ORDER BY not_before ASC LIMIT 1);
                 UPDATE $candidates.id SET
                    state = 'in_flight',
                    worker_id = $worker_id,
                    lease_until = $lease_until,
                    attempts += 1,
                    updated_at = $now
                 WHERE state = 'pending'
                 RETURN AFTER;",
            )
            .bind(("table", Self::table_name()))
            .bind(("kinds", kinds.to_vec()))
            .bind(("now", surrealdb::sql::Datetime::from(now)))
            .bind(("worker_id", worker_id.to_owned()))
            .bind(("lease_until", surrealdb::sql::Datetime::from(lease_until)))
            .await?;

        let claimed: Vec<Self> = response.take(1)?;
        let job = claimed.into_iter().next();

        if let Some(job) = &job {
            JobEvent::record(
                &job.id,
                Some(JobState::Pending),
                JobState::InFlight,
                Some(&format!("claimed by {worker_id}")),
                db,
            )
            .await?;
        }

        Ok(job)
    }

    /// Mark the job succeeded. Returns false when the row was no longer
    /// `in_flight` (e.g. the pipeline committed success itself); terminal
    /// rows are left untouched.
    pub async fn ack(job_id: &str, db: &SurrealDbClient) -> Result<bool, AppError> {
        let updated: Vec<Self> = db
            .client
            .query(
                "UPDATE type::thing($table, $id) SET
                    state = 'succeeded',
                    lease_until = NONE,
                    updated_at = time::now()
                 WHERE state = 'in_flight'
                 RETURN AFTER;",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", job_id.to_owned()))
            .await?
            .take(0)?;

        let transitioned = !updated.is_empty();
        if transitioned {
            JobEvent::record(job_id, Some(JobState::InFlight), JobState::Succeeded, None, db)
                .await?;
        }

        Ok(transitioned)
    }

    /// Record a failure. Retries with backoff until `max_attempts`, then the
    /// job dead-letters.
    pub async fn nack(
        job_id: &str,
        error: &str,
        backoff: &BackoffPolicy,
        db: &SurrealDbClient,
    ) -> Result<JobState, AppError> {
        let job = db.require_item::<Self>(job_id).await?;

        JobEvent::record(job_id, Some(JobState::InFlight), JobState::Failed, Some(error), db)
            .await?;

        let next_state = if job.attempts >= job.max_attempts {
            JobState::Dead
        } else {
            JobState::Pending
        };

        let now = Utc::now();
        let not_before = match next_state {
            JobState::Pending => {
                now + chrono::Duration::from_std(backoff.delay(job.attempts))
                    .unwrap_or_else(|_| chrono::Duration::seconds(0))
            }
            _ => now,
        };

        db.client
            .query(
                "UPDATE type::thing($table, $id) SET
                    state = $state,
                    last_error = $error,
                    not_before = $not_before,
                    lease_until = NONE,
                    worker_id = NONE,
                    updated_at = $now;",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", job_id.to_owned()))
            .bind(("state", next_state))
            .bind(("error", error.to_owned()))
            .bind(("not_before", surrealdb::sql::Datetime::from(not_before)))
            .bind(("now", surrealdb::sql::Datetime::from(now)))
            .await?
            .check()?;

        let note = match next_state {
            JobState::Pending => format!("retry scheduled, attempt {}", job.attempts),
            _ => "max attempts exhausted".to_string(),
        };
        JobEvent::record(job_id, Some(JobState::Failed), next_state, Some(&note), db).await?;

        Ok(next_state)
    }

    /// Renew the lease of a held job. A no-op when the worker lost the claim.
    pub async fn heartbeat(
        job_id: &str,
        worker_id: &str,
        lease: Duration,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let now = Utc::now();
        let lease_until = now
            + chrono::Duration::from_std(lease)
                .map_err(|e| AppError::Configuration(format!("lease out of range: {e}")))?;

        db.client
            .query(
                "UPDATE type::thing($table, $id) SET
                    lease_until = $lease_until,
                    updated_at = $now
                 WHERE state = 'in_flight' AND worker_id = $worker_id;",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", job_id.to_owned()))
            .bind(("worker_id", worker_id.to_owned()))
            .bind(("lease_until", surrealdb::sql::Datetime::from(lease_until)))
            .bind(("now", surrealdb::sql::Datetime::from(now)))
            .await?
            .check()?;

        Ok(())
    }

    /// Janitor pass: put expired `in_flight` rows back on the queue.
    pub async fn requeue_expired(
        db: &SurrealDbClient,
        now: DateTime<Utc>,
    ) -> Result<usize, AppError> {
        let requeued: Vec<Self> = db
            .client
            .query(
                "UPDATE type::table($table) SET
                    state = 'pending',
                    worker_id = NONE,
                    lease_until = NONE,
                    updated_at = $now
                 WHERE state = 'in_flight' AND lease_until != NONE AND lease_until < $now
                 RETURN AFTER;",
            )
            .bind(("table", Self::table_name()))
            .bind(("now", surrealdb::sql::Datetime::from(now)))
            .await?
            .take(0)?;

        for job in &requeued {
            JobEvent::record(
                &job.id,
                Some(JobState::InFlight),
                JobState::Pending,
                Some("lease expired, requeued"),
                db,
            )
            .await?;
        }

        Ok(requeued.len())
    }

    pub async fn counts_by_state(db: &SurrealDbClient) -> Result<HashMap<String, usize>, AppError> {
        #[derive(Deserialize)]
        struct Row {
            state: JobState,
            count: usize,
        }

        let mut response = db
            .client
            .query("SELECT state, count() AS count FROM type::table($table) GROUP BY state")
            .bind(("table", Self::table_name()))
            .await?;
        let rows: Vec<Row> = response.take(0)?;

        Ok(rows
            .into_iter()
            .map(|r| (r.state.as_str().to_string(), r.count))
            .collect())
    }

    pub async fn delete_pending_for_revisions(
        revision_ids: &[String],
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        if revision_ids.is_empty() {
            return Ok(());
        }

        db.client
            .query(
                "DELETE FROM type::table($table)
                 WHERE state = 'pending' AND payload.revision_id IN $revision_ids",
            )
            .bind(("table", Self::table_name()))
            .bind(("revision_ids", revision_ids.to_vec()))
            .await?
            .check()?;

        Ok(())
    }
}
