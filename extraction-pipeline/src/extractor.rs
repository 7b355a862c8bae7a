use tracing::warn;

use common::{
    error::AppError,
    storage::types::event::{EventCategory, EventEvidence},
};

use crate::services::ExtractionServices;
use crate::types::{EventDraft, MentionDraft};

/// Event that survived the validation gate, with evidence offsets resolved
/// against the revision content.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedEvent {
    pub category: EventCategory,
    pub summary: String,
    pub evidence: Vec<EventEvidence>,
    pub mentions: Vec<MentionDraft>,
    pub occurred_at: Option<String>,
    pub confidence: f32,
}

/// Two-prompt extraction: candidates from prompt A, canonicalization in
/// prompt B, then the validation gate. A provider error fails the whole
/// call; validation failures only drop their event.
pub async fn extract_events(
    services: &dyn ExtractionServices,
    content: &str,
) -> Result<Vec<ValidatedEvent>, AppError> {
    let candidates = services.extract_candidates(content).await?;
    let canonical = services.canonicalize_events(candidates).await?;
    Ok(validate_events(canonical, content))
}

/// Gate after prompt B: evidence must quote the revision verbatim, the
/// category must come from the closed set, confidence must be in [0,1], and
/// at least one mention must be present. Rejected events are dropped with
/// the reason logged; they never reach the store.
pub fn validate_events(drafts: Vec<EventDraft>, content: &str) -> Vec<ValidatedEvent> {
    let mut validated = Vec::with_capacity(drafts.len());

    'drafts: for draft in drafts {
        let Some(category) = EventCategory::parse(&draft.category) else {
            warn!(summary = %draft.summary, category = %draft.category, "event dropped: unknown category");
            continue;
        };
        if !(0.0..=1.0).contains(&draft.confidence) {
            warn!(summary = %draft.summary, confidence = draft.confidence, "event dropped: confidence out of range");
            continue;
        }
        if draft.mentions.is_empty() {
            warn!(summary = %draft.summary, "event dropped: no actors or subjects");
            continue;
        }
        if draft.evidence.is_empty() {
            warn!(summary = %draft.summary, "event dropped: no evidence quotes");
            continue;
        }

        let mut evidence = Vec::with_capacity(draft.evidence.len());
        for quote in &draft.evidence {
            let Some(offset) = content.find(quote.as_str()) else {
                warn!(summary = %draft.summary, quote = %quote, "event dropped: evidence is not a literal substring");
                continue 'drafts;
            };
            evidence.push(EventEvidence {
                quote: quote.clone(),
                offset_start: offset,
                offset_end: offset + quote.len(),
            });
        }

        validated.push(ValidatedEvent {
            category,
            summary: draft.summary,
            evidence,
            mentions: draft.mentions,
            occurred_at: draft.occurred_at,
            confidence: draft.confidence,
        });
    }

    validated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MentionRole;

    const CONTENT: &str = "Alice decided to ship v2 on 2025-03-01. Bob disagreed loudly.";

    fn mention(surface: &str) -> MentionDraft {
        MentionDraft {
            surface_form: surface.to_string(),
            offset: 0,
            entity_type: "person".to_string(),
            role: MentionRole::Actor,
            context_clues: vec![],
        }
    }

    fn draft(summary: &str, category: &str, evidence: &[&str]) -> EventDraft {
        EventDraft {
            summary: summary.to_string(),
            category: category.to_string(),
            evidence: evidence.iter().map(|e| (*e).to_string()).collect(),
            mentions: vec![mention("Alice")],
            occurred_at: Some("2025-03-01".to_string()),
            confidence: 0.9,
        }
    }

    #[test]
    fn valid_events_pass_with_resolved_offsets() {
        let validated = validate_events(
            vec![draft(
                "Alice decided to ship v2.",
                "decision",
                &["Alice decided to ship v2 on 2025-03-01."],
            )],
            CONTENT,
        );

        assert_eq!(validated.len(), 1);
        let event = &validated[0];
        assert_eq!(event.category, EventCategory::Decision);
        assert_eq!(event.evidence.len(), 1);
        assert_eq!(event.evidence[0].offset_start, 0);
        assert_eq!(
            &CONTENT[event.evidence[0].offset_start..event.evidence[0].offset_end],
            event.evidence[0].quote
        );
        assert_eq!(event.occurred_at.as_deref(), Some("2025-03-01"));
    }

    #[test]
    fn fabricated_evidence_drops_the_event() {
        let validated = validate_events(
            vec![
                draft(
                    "Alice decided to ship v2.",
                    "decision",
                    &["Alice decided to ship v3 next year."],
                ),
                draft("Bob disagreed.", "observation", &["Bob disagreed loudly."]),
            ],
            CONTENT,
        );

        assert_eq!(validated.len(), 1);
        assert_eq!(validated[0].summary, "Bob disagreed.");
    }

    #[test]
    fn unknown_category_drops_the_event() {
        let validated = validate_events(
            vec![draft("Something odd.", "speculation", &["Bob disagreed loudly."])],
            CONTENT,
        );
        assert!(validated.is_empty());
    }

    #[test]
    fn out_of_range_confidence_drops_the_event() {
        let mut bad = draft("Alice decided.", "decision", &["Alice decided to ship v2"]);
        bad.confidence = 1.4;
        assert!(validate_events(vec![bad], CONTENT).is_empty());
    }

    #[test]
    fn events_without_mentions_are_dropped() {
        let mut bad = draft("Alice decided.", "decision", &["Alice decided to ship v2"]);
        bad.mentions.clear();
        assert!(validate_events(vec![bad], CONTENT).is_empty());
    }
}
