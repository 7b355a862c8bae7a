use serde::{Deserialize, Serialize};
use surrealdb::{method::Query, Connection};

use crate::storage::types::artifact::{ArtifactType, Sensitivity};

/// Window multiplier for filtered nearest-neighbor queries: the HNSW window
/// is computed before the filter prunes it, so a filtered search fetches a
/// wider window to still fill the requested result count.
pub const FILTER_OVERFETCH: usize = 8;

/// Conjunction of equality and `IN` predicates over the metadata carried by
/// the vector-collection rows. Applied inside the collection query itself,
/// alongside the HNSW operator, so the k-nearest window only ever holds
/// matching rows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionFilter {
    #[serde(default)]
    pub sensitivity: Option<Sensitivity>,
    #[serde(default)]
    pub artifact_type: Option<ArtifactType>,
    #[serde(default)]
    pub source_system: Option<String>,
    #[serde(default)]
    pub artifact_ids: Option<Vec<String>>,
}

impl CollectionFilter {
    pub fn is_empty(&self) -> bool {
        self.sensitivity.is_none()
            && self.artifact_type.is_none()
            && self.source_system.is_none()
            && self.artifact_ids.is_none()
    }

    /// `AND …` fragment appended to a collection query's `WHERE` clause; the
    /// placeholders match the binds applied by [`Self::bind_params`].
    pub fn sql_clauses(&self) -> String {
        let mut clauses = String::new();
        if self.sensitivity.is_some() {
            clauses.push_str(" AND sensitivity = $filter_sensitivity");
        }
        if self.artifact_type.is_some() {
            clauses.push_str(" AND artifact_type = $filter_artifact_type");
        }
        if self.source_system.is_some() {
            clauses.push_str(" AND source_system = $filter_source_system");
        }
        if self.artifact_ids.is_some() {
            clauses.push_str(" AND artifact_id IN $filter_artifact_ids");
        }
        clauses
    }

    pub fn bind_params<'r, C>(&self, mut query: Query<'r, C>) -> Query<'r, C>
    where
        C: Connection,
    {
        if let Some(sensitivity) = self.sensitivity {
            query = query.bind(("filter_sensitivity", sensitivity));
        }
        if let Some(artifact_type) = self.artifact_type {
            query = query.bind(("filter_artifact_type", artifact_type));
        }
        if let Some(source_system) = self.source_system.clone() {
            query = query.bind(("filter_source_system", source_system));
        }
        if let Some(artifact_ids) = self.artifact_ids.clone() {
            query = query.bind(("filter_artifact_ids", artifact_ids));
        }
        query
    }
}
