use common::storage::types::{entity::EntityType, event::EventCategory};
use serde_json::json;

pub static EVENT_EXTRACTION_SYSTEM_MESSAGE: &str = "\
You extract salient events from a single text revision. Report every event \
with a one-sentence summary, a category from the closed list you are given, \
verbatim evidence quotes copied character-for-character from the text, and \
the entity mentions involved (surface form exactly as written, character \
offset, role, a type guess from the closed list, and nearby context clues \
such as roles, affiliations or dates). Dates mentioned for an event go into \
occurred_at as ISO-8601. Report confidence between 0 and 1. Only report \
events grounded in the text.";

pub static EVENT_CANONICALIZE_SYSTEM_MESSAGE: &str = "\
You receive candidate events extracted from one text revision. Normalize \
each summary into a single declarative sentence, merge near-duplicate \
events, and return the final list. Keep evidence quotes untouched: they \
must remain verbatim substrings of the original text. Never invent events.";

pub static ENTITY_CONFIRM_SYSTEM_MESSAGE: &str = "\
You decide whether an entity mention refers to the same real-world entity \
as a stored candidate. Compare the mention and its context clues against \
the candidate's canonical name, aliases and clues. Answer strictly with a \
verdict of same, different or uncertain, and a score between 0 and 1 for \
your confidence in the identity.";

pub fn extraction_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "events": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "summary": { "type": "string" },
                        "category": { "type": "string", "enum": EventCategory::variants() },
                        "evidence": {
                            "type": "array",
                            "items": { "type": "string" }
                        },
                        "mentions": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "surface_form": { "type": "string" },
                                    "offset": { "type": "integer" },
                                    "entity_type": { "type": "string", "enum": EntityType::variants() },
                                    "role": { "type": "string", "enum": ["actor", "subject"] },
                                    "context_clues": {
                                        "type": "array",
                                        "items": { "type": "string" }
                                    }
                                },
                                "required": ["surface_form", "offset", "entity_type", "role", "context_clues"],
                                "additionalProperties": false
                            }
                        },
                        "occurred_at": { "type": ["string", "null"] },
                        "confidence": { "type": "number" }
                    },
                    "required": ["summary", "category", "evidence", "mentions", "occurred_at", "confidence"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["events"],
        "additionalProperties": false
    })
}

pub fn confirm_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "verdict": { "type": "string", "enum": ["same", "different", "uncertain"] },
            "score": { "type": "number" }
        },
        "required": ["verdict", "score"],
        "additionalProperties": false
    })
}
