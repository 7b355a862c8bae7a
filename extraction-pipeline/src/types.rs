use serde::{Deserialize, Serialize};

/// Role an entity mention plays in its event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MentionRole {
    Actor,
    Subject,
}

impl Default for MentionRole {
    fn default() -> Self {
        Self::Subject
    }
}

/// Entity mention as the extraction prompt reports it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MentionDraft {
    pub surface_form: String,
    pub offset: usize,
    /// Free-form guess from the closed entity type list.
    pub entity_type: String,
    #[serde(default)]
    pub role: MentionRole,
    #[serde(default)]
    pub context_clues: Vec<String>,
}

/// Candidate event between prompt A (extract) and the validation gate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventDraft {
    pub summary: String,
    /// Validated against the closed category set at the gate.
    pub category: String,
    /// Verbatim quotes; each must be a literal substring of the revision.
    pub evidence: Vec<String>,
    pub mentions: Vec<MentionDraft>,
    #[serde(default)]
    pub occurred_at: Option<String>,
    pub confidence: f32,
}

/// Wire shape of both extraction prompts' responses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractionBatch {
    pub events: Vec<EventDraft>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmVerdict {
    Same,
    Different,
    Uncertain,
}

/// Wire shape of the entity confirm prompt's response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfirmOutcome {
    pub verdict: ConfirmVerdict,
    pub score: f32,
}
