use std::collections::HashMap;

/// One ranked id list from a vector collection. Chunk hits must already be
/// folded to their parent artifact id (best chunk rank wins) before fusion.
#[derive(Debug, Clone)]
pub struct RankedList {
    pub collection: &'static str,
    pub ids: Vec<String>,
}

/// Drop repeated ids, keeping the first (= best ranked) occurrence. Used to
/// fold multiple chunks of one artifact into the parent's best rank.
pub fn dedupe_keep_best_rank(ids: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

/// Reciprocal Rank Fusion: `score(d) = sum over lists of 1/(c + rank_d)`,
/// ranks 1-based. Returns ids with their fused score, best first; ties break
/// on lexicographic id so the ordering is deterministic before the caller
/// applies recency.
pub fn rrf_fuse(lists: &[RankedList], c: f32) -> Vec<(String, f32)> {
    let mut scores: HashMap<String, f32> = HashMap::new();

    for list in lists {
        for (position, id) in list.ids.iter().enumerate() {
            let rank = position as f32 + 1.0;
            *scores.entry(id.clone()).or_insert(0.0) += 1.0 / (c + rank);
        }
    }

    let mut fused: Vec<(String, f32)> = scores.into_iter().collect();
    fused.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });

    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    const C: f32 = 60.0;

    fn list(collection: &'static str, ids: &[&str]) -> RankedList {
        RankedList {
            collection,
            ids: ids.iter().map(|id| (*id).to_string()).collect(),
        }
    }

    #[test]
    fn rank_one_in_a_single_collection_scores_one_over_c_plus_one() {
        let fused = rrf_fuse(
            &[list("content", &["art_a"]), list("chunks", &[])],
            C,
        );

        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].0, "art_a");
        assert!((fused[0].1 - 1.0 / (C + 1.0)).abs() < 1e-6);
    }

    #[test]
    fn appearing_in_both_collections_sums_the_contributions() {
        let fused = rrf_fuse(
            &[
                list("content", &["art_a", "art_b"]),
                list("chunks", &["art_b", "art_a"]),
            ],
            C,
        );

        // Both share rank 1 + rank 2; the tie breaks lexicographically.
        let expected = 1.0 / (C + 1.0) + 1.0 / (C + 2.0);
        assert_eq!(fused[0].0, "art_a");
        assert!((fused[0].1 - expected).abs() < 1e-6);
        assert!((fused[1].1 - expected).abs() < 1e-6);
    }

    #[test]
    fn cross_collection_presence_beats_single_collection_top_rank() {
        let fused = rrf_fuse(
            &[
                list("content", &["art_only_content", "art_both"]),
                list("chunks", &["art_both"]),
            ],
            C,
        );

        assert_eq!(fused[0].0, "art_both");
        assert!(fused[0].1 > fused[1].1);
    }

    #[test]
    fn dedupe_keeps_the_first_occurrence() {
        let folded = dedupe_keep_best_rank(vec![
            "art_a".to_string(),
            "art_b".to_string(),
            "art_a".to_string(),
            "art_c".to_string(),
            "art_b".to_string(),
        ]);

        assert_eq!(folded, vec!["art_a", "art_b", "art_c"]);
    }
}
