use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            artifact::Artifact, artifact_embedding::ArtifactEmbedding, chunk::Chunk,
            entity_mention::EntityMention, event::Event, graph_edge::GraphEdge, job::Job,
            revision::Revision,
        },
    },
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CascadeCounts {
    pub chunks: usize,
    pub events: usize,
    pub mentions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForgetOutcome {
    pub deleted: bool,
    pub cascade_counts: CascadeCounts,
}

/// Cascading delete of one artifact: its chunks, the events of all its
/// revisions, their mentions and graph edges, pending extraction jobs, and
/// finally the revision and artifact rows. Entities are never touched.
#[instrument(skip(db))]
pub async fn forget_artifact(
    artifact_id: &str,
    db: &SurrealDbClient,
) -> Result<ForgetOutcome, AppError> {
    let Some(_artifact) = db.get_item::<Artifact>(artifact_id).await? else {
        return Ok(ForgetOutcome {
            deleted: false,
            cascade_counts: CascadeCounts::default(),
        });
    };

    let revisions = Revision::list_for_artifact(artifact_id, db).await?;
    let revision_ids: Vec<String> = revisions.iter().map(|r| r.id.clone()).collect();

    let chunks = Chunk::delete_by_artifact_id(artifact_id, db).await?;
    let deleted_event_ids = Event::delete_by_revision_ids(revision_ids.clone(), db).await?;
    GraphEdge::delete_for_events(deleted_event_ids.clone(), db).await?;
    let mentions = EntityMention::delete_by_revision_ids(revision_ids.clone(), db).await?;
    Job::delete_pending_for_revisions(&revision_ids, db).await?;
    ArtifactEmbedding::delete_by_artifact_id(artifact_id, db).await?;

    for revision_id in &revision_ids {
        let _removed: Option<Revision> = db.delete_item(revision_id).await?;
    }
    let _removed: Option<Artifact> = db.delete_item(artifact_id).await?;

    let cascade_counts = CascadeCounts {
        chunks,
        events: deleted_event_ids.len(),
        mentions,
    };
    info!(%artifact_id, ?cascade_counts, "artifact forgotten");

    Ok(ForgetOutcome {
        deleted: true,
        cascade_counts,
    })
}
