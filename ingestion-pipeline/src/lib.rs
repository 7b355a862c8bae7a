#![allow(clippy::missing_docs_in_private_items)]

pub mod forget;
pub mod ingestor;

pub use forget::ForgetOutcome;
pub use ingestor::{ArtifactIngestor, IngestInput, IngestReceipt};
