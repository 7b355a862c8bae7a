use tracing::debug;

use crate::RecallResult;

/// Privacy filter placeholder: the current contract is a pass-through that
/// allows every result. Sensitivity and visibility metadata already travel
/// with each result for the eventual enforcement layer.
pub fn filter_results(results: Vec<RecallResult>) -> Vec<RecallResult> {
    debug!(count = results.len(), "privacy filter allowing all results");
    results
}
