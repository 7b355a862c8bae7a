use crate::storage::types::job::JobState;
use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use uuid::Uuid;

// Append-only audit trail of queue transitions.
stored_object!(JobEvent, "job_event", {
    job_id: String,
    #[serde(default)]
    from_state: Option<JobState>,
    to_state: JobState,
    #[serde(default)]
    note: Option<String>
});

impl JobEvent {
    pub async fn record(
        job_id: &str,
        from_state: Option<JobState>,
        to_state: JobState,
        note: Option<&str>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let now = Utc::now();
        let event = Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            job_id: job_id.to_owned(),
            from_state,
            to_state,
            note: note.map(str::to_owned),
        };

        db.store_item(event).await?;
        Ok(())
    }

    pub async fn list_for_job(job_id: &str, db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let events: Vec<Self> = db
            .query(
                "SELECT * FROM type::table($table) WHERE job_id = $job_id ORDER BY created_at ASC",
            )
            .bind(("table", Self::table_name()))
            .bind(("job_id", job_id.to_owned()))
            .await?
            .take(0)?;

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn audit_rows_accumulate_in_order() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        JobEvent::record("job-1", None, JobState::Pending, Some("enqueued"), &db)
            .await
            .expect("record enqueue");
        JobEvent::record(
            "job-1",
            Some(JobState::Pending),
            JobState::InFlight,
            None,
            &db,
        )
        .await
        .expect("record claim");
        JobEvent::record("job-2", None, JobState::Pending, None, &db)
            .await
            .expect("record other job");

        let events = JobEvent::list_for_job("job-1", &db)
            .await
            .expect("list audit rows");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].to_state, JobState::Pending);
        assert_eq!(events[1].to_state, JobState::InFlight);
        assert_eq!(events[1].from_state, Some(JobState::Pending));
    }
}
