use sha2::{Digest, Sha256};

use crate::stored_object;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactType {
    Document,
    Message,
    Note,
    DecisionRecord,
}

impl Default for ArtifactType {
    fn default() -> Self {
        Self::Note
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    Normal,
    Sensitive,
    HighlySensitive,
}

impl Default for Sensitivity {
    fn default() -> Self {
        Self::Normal
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VisibilityScope {
    Me,
    Team,
    Org,
}

impl Default for VisibilityScope {
    fn default() -> Self {
        Self::Me
    }
}

stored_object!(Artifact, "artifact", {
    artifact_type: ArtifactType,
    source_system: String,
    #[serde(default)]
    source_id: Option<String>,
    #[serde(default)]
    source_url: Option<String>,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime", default)]
    timestamp: DateTime<Utc>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    participants: Vec<String>,
    content_hash: String,
    token_count: usize,
    is_chunked: bool,
    num_chunks: usize,
    sensitivity: Sensitivity,
    visibility_scope: VisibilityScope,
    retention_policy: String,
    embedding_provider: String,
    embedding_model: String,
    embedding_dimensions: usize,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime", default)]
    ingested_at: DateTime<Utc>
});

impl Artifact {
    /// Canonical form over which the content address is computed: line
    /// endings normalized to `\n`, trailing whitespace stripped per line,
    /// a single trailing newline kept iff the input ended with one.
    pub fn canonicalize_content(content: &str) -> String {
        let normalized = content.replace("\r\n", "\n").replace('\r', "\n");
        let had_trailing_newline = normalized.ends_with('\n');

        let mut canonical = normalized
            .split('\n')
            .map(str::trim_end)
            .collect::<Vec<_>>()
            .join("\n");

        while canonical.ends_with('\n') {
            canonical.pop();
        }
        if had_trailing_newline && !canonical.is_empty() {
            canonical.push('\n');
        }

        canonical
    }

    /// `art_` + first 12 hex characters of SHA-256 over the canonical content.
    pub fn content_address(canonical_content: &str) -> String {
        let digest = Sha256::digest(canonical_content.as_bytes());
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        format!("art_{}", &hex[..12])
    }

    /// Full SHA-256 hex digest, stored on the row for dedup verification.
    pub fn content_hash(canonical_content: &str) -> String {
        let digest = Sha256::digest(canonical_content.as_bytes());
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalization_normalizes_line_endings_and_trailing_space() {
        let canonical = Artifact::canonicalize_content("hello \r\nworld\t\r\n");
        assert_eq!(canonical, "hello\nworld\n");

        let canonical = Artifact::canonicalize_content("no newline at end  ");
        assert_eq!(canonical, "no newline at end");
    }

    #[test]
    fn content_address_is_stable_and_prefixed() {
        let a = Artifact::content_address("Hello world.\n");
        let b = Artifact::content_address("Hello world.\n");
        assert_eq!(a, b);
        assert!(a.starts_with("art_"));
        assert_eq!(a.len(), "art_".len() + 12);

        let c = Artifact::content_address("Hello world!\n");
        assert_ne!(a, c);
    }

    #[test]
    fn canonically_equal_inputs_share_an_address() {
        let left = Artifact::canonicalize_content("Hello world.  \r\n");
        let right = Artifact::canonicalize_content("Hello world.\n");
        assert_eq!(
            Artifact::content_address(&left),
            Artifact::content_address(&right)
        );
    }
}
