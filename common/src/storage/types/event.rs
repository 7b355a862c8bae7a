use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use uuid::Uuid;

/// Closed category set for extracted events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Decision,
    Commitment,
    Question,
    Answer,
    Observation,
    Plan,
    Risk,
    Reference,
}

impl EventCategory {
    pub fn variants() -> &'static [&'static str] {
        &[
            "decision",
            "commitment",
            "question",
            "answer",
            "observation",
            "plan",
            "risk",
            "reference",
        ]
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "decision" => Some(Self::Decision),
            "commitment" => Some(Self::Commitment),
            "question" => Some(Self::Question),
            "answer" => Some(Self::Answer),
            "observation" => Some(Self::Observation),
            "plan" => Some(Self::Plan),
            "risk" => Some(Self::Risk),
            "reference" => Some(Self::Reference),
            _ => None,
        }
    }
}

/// One verbatim quote from the revision, with its half-open char span.
/// Stored as an ordered array on the event row; the array position is the
/// evidence index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventEvidence {
    pub quote: String,
    pub offset_start: usize,
    pub offset_end: usize,
}

stored_object!(Event, "event", {
    revision_id: String,
    category: EventCategory,
    summary: String,
    evidence: Vec<EventEvidence>,
    actors: Vec<String>,
    subjects: Vec<String>,
    #[serde(default)]
    occurred_at: Option<String>,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime", default)]
    extracted_at: DateTime<Utc>,
    model: String,
    confidence: f32
});

impl Event {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        revision_id: String,
        category: EventCategory,
        summary: String,
        evidence: Vec<EventEvidence>,
        actors: Vec<String>,
        subjects: Vec<String>,
        occurred_at: Option<String>,
        model: String,
        confidence: f32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: format!("evt_{}", Uuid::new_v4()),
            created_at: now,
            updated_at: now,
            revision_id,
            category,
            summary,
            evidence,
            actors,
            subjects,
            occurred_at,
            extracted_at: now,
            model,
            confidence,
        }
    }

    /// Position of the first evidence quote; events within a revision are
    /// ordered by it.
    pub fn first_evidence_offset(&self) -> usize {
        self.evidence
            .iter()
            .map(|e| e.offset_start)
            .min()
            .unwrap_or(usize::MAX)
    }

    pub async fn list_for_revision(
        revision_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let mut events: Vec<Self> = db
            .query("SELECT * FROM type::table($table) WHERE revision_id = $revision_id")
            .bind(("table", Self::table_name()))
            .bind(("revision_id", revision_id.to_owned()))
            .await?
            .take(0)?;

        events.sort_by_key(Self::first_evidence_offset);

        Ok(events)
    }

    pub async fn list_for_revisions(
        revision_ids: Vec<String>,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        if revision_ids.is_empty() {
            return Ok(Vec::new());
        }

        let events: Vec<Self> = db
            .query("SELECT * FROM type::table($table) WHERE revision_id IN $revision_ids")
            .bind(("table", Self::table_name()))
            .bind(("revision_ids", revision_ids))
            .await?
            .take(0)?;

        Ok(events)
    }

    /// Case-insensitive substring search over event summaries.
    pub async fn search(
        query: &str,
        limit: usize,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let events: Vec<Self> = db
            .query(
                "SELECT * FROM type::table($table)
                 WHERE string::contains(string::lowercase(summary), string::lowercase($query))
                 ORDER BY extracted_at DESC
                 LIMIT $limit",
            )
            .bind(("table", Self::table_name()))
            .bind(("query", query.to_owned()))
            .bind(("limit", limit))
            .await?
            .take(0)?;

        Ok(events)
    }

    pub async fn delete_by_revision_ids(
        revision_ids: Vec<String>,
        db: &SurrealDbClient,
    ) -> Result<Vec<String>, AppError> {
        if revision_ids.is_empty() {
            return Ok(Vec::new());
        }

        let removed: Vec<Self> = db
            .query(
                "DELETE FROM type::table($table) WHERE revision_id IN $revision_ids RETURN BEFORE",
            )
            .bind(("table", Self::table_name()))
            .bind(("revision_ids", revision_ids))
            .await?
            .take(0)?;

        Ok(removed.into_iter().map(|e| e.id).collect())
    }
}
