use std::{
    cmp::Ordering,
    collections::{hash_map::Entry, HashMap},
};

use common::storage::types::chunk::{Chunk, ChunkMetadata};
use serde::Serialize;

use crate::index::RetrievalCandidate;

pub const DEFAULT_RRF_K: f64 = 60.0;

/// Configuration for reciprocal rank fusion.
#[derive(Debug, Clone, Copy)]
pub struct RrfConfig {
    /// Larger values flatten the advantage of top ranks.
    pub k: f64,
}

impl Default for RrfConfig {
    fn default() -> Self {
        Self { k: DEFAULT_RRF_K }
    }
}

impl RrfConfig {
    pub const fn new(k: f64) -> Self {
        Self { k }
    }

    fn effective_k(self) -> f64 {
        if self.k.is_finite() && self.k >= 0.0 {
            self.k
        } else {
            DEFAULT_RRF_K
        }
    }
}

/// A chunk after fusion. Exactly one per distinct id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedChunk {
    pub chunk: Chunk,
    /// Raw source scores, informational only; ordering never reads them.
    pub vector_score: f32,
    pub bm25_score: f32,
    pub hybrid_score: f64,
    pub vector_rank: Option<usize>,
    pub bm25_rank: Option<usize>,
}

pub const fn clamp_unit(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

pub fn distance_to_similarity(distance: f32) -> f32 {
    if !distance.is_finite() {
        return 0.0;
    }
    clamp_unit(1.0 / (1.0 + distance.max(0.0)))
}

/// Contribution of a 1-based rank.
pub fn rank_contribution(rank: usize, k: f64) -> f64 {
    1.0 / (k + rank as f64)
}

#[derive(Debug)]
struct Fused {
    id: String,
    document_id: String,
    content: Option<String>,
    metadata: ChunkMetadata,
    vector_rank: Option<usize>,
    bm25_rank: Option<usize>,
    vector_score: f32,
    bm25_score: f32,
}

impl Fused {
    fn from_candidate(candidate: &RetrievalCandidate) -> Self {
        Self {
            id: candidate.id.clone(),
            document_id: candidate.document_id.clone(),
            content: candidate.content.clone().filter(|text| !text.is_empty()),
            metadata: candidate.metadata.clone(),
            vector_rank: None,
            bm25_rank: None,
            vector_score: 0.0,
            bm25_score: 0.0,
        }
    }

    /// Keeps the richer of the two records field by field.
    fn absorb(&mut self, candidate: &RetrievalCandidate) {
        if let Some(incoming) = candidate.content.as_deref().filter(|text| !text.is_empty()) {
            let longer = self
                .content
                .as_deref()
                .map_or(true, |existing| incoming.len() > existing.len());
            if longer {
                self.content = Some(incoming.to_string());
            }
        }
        if candidate.metadata.richness() > self.metadata.richness() {
            self.metadata = candidate.metadata.clone();
        }
        if self.document_id.is_empty() {
            self.document_id.clone_from(&candidate.document_id);
        }
    }

    fn into_merged(self, k: f64) -> MergedChunk {
        let hybrid_score = self.vector_rank.map_or(0.0, |rank| rank_contribution(rank, k))
            + self.bm25_rank.map_or(0.0, |rank| rank_contribution(rank, k));
        MergedChunk {
            chunk: Chunk {
                id: self.id,
                document_id: self.document_id,
                content: self.content.unwrap_or_default(),
                metadata: self.metadata,
            },
            vector_score: self.vector_score,
            bm25_score: self.bm25_score,
            hybrid_score,
            vector_rank: self.vector_rank,
            bm25_rank: self.bm25_rank,
        }
    }
}

#[derive(Clone, Copy)]
enum Source {
    Vector,
    Keyword,
}

fn accumulate(
    merged: &mut HashMap<String, Fused>,
    ranked: &[RetrievalCandidate],
    source: Source,
) {
    for (index, candidate) in ranked.iter().enumerate() {
        let rank = index.saturating_add(1);
        let entry = match merged.entry(candidate.id.clone()) {
            Entry::Occupied(occupied) => {
                let existing = occupied.into_mut();
                existing.absorb(candidate);
                existing
            }
            Entry::Vacant(vacant) => vacant.insert(Fused::from_candidate(candidate)),
        };

        // Repeated ids within one list keep their best (first) rank.
        match source {
            Source::Vector if entry.vector_rank.is_none() => {
                entry.vector_rank = Some(rank);
                entry.vector_score = candidate.score;
            }
            Source::Keyword if entry.bm25_rank.is_none() => {
                entry.bm25_rank = Some(rank);
                entry.bm25_score = candidate.score;
            }
            _ => {}
        }
    }
}

fn by_vector_rank(a: Option<usize>, b: Option<usize>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Reciprocal Rank Fusion of a vector-ranked and a keyword-ranked list.
///
/// Each list contributes `1 / (k + rank)` for the 1-based position of a chunk
/// in it. Ordering is by fused score, then vector rank, then id, so identical
/// inputs always produce identical output.
pub fn reciprocal_rank_fusion(
    vector_ranked: &[RetrievalCandidate],
    keyword_ranked: &[RetrievalCandidate],
    config: RrfConfig,
) -> Vec<MergedChunk> {
    let k = config.effective_k();
    let mut merged: HashMap<String, Fused> =
        HashMap::with_capacity(vector_ranked.len().saturating_add(keyword_ranked.len()));

    accumulate(&mut merged, vector_ranked, Source::Vector);
    accumulate(&mut merged, keyword_ranked, Source::Keyword);

    let mut fused: Vec<MergedChunk> = merged
        .into_values()
        .map(|entry| entry.into_merged(k))
        .collect();
    fused.sort_by(|a, b| {
        b.hybrid_score
            .total_cmp(&a.hybrid_score)
            .then_with(|| by_vector_rank(a.vector_rank, b.vector_rank))
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
    fused
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::chunk::ChunkKind;

    fn candidate(id: &str, score: f32, content: Option<&str>) -> RetrievalCandidate {
        RetrievalCandidate {
            id: id.to_string(),
            score,
            document_id: "doc".to_string(),
            metadata: ChunkMetadata::text("doc.pdf"),
            content: content.map(str::to_string),
        }
    }

    fn ids(merged: &[MergedChunk]) -> Vec<&str> {
        merged.iter().map(|m| m.chunk.id.as_str()).collect()
    }

    fn score_of(merged: &[MergedChunk], id: &str) -> f64 {
        merged
            .iter()
            .find(|m| m.chunk.id == id)
            .map(|m| m.hybrid_score)
            .expect("id present")
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn fuses_by_rank_position() {
        let vector = vec![
            candidate("a", 0.9, None),
            candidate("b", 0.8, None),
            candidate("c", 0.7, None),
        ];
        let keyword = vec![
            candidate("b", 12.0, Some("b text")),
            candidate("d", 8.0, Some("d text")),
            candidate("a", 3.0, Some("a text")),
        ];

        let merged = reciprocal_rank_fusion(&vector, &keyword, RrfConfig::default());

        assert!(approx(score_of(&merged, "a"), 1.0 / 61.0 + 1.0 / 63.0));
        assert!(approx(score_of(&merged, "b"), 1.0 / 62.0 + 1.0 / 61.0));
        assert!(approx(score_of(&merged, "c"), 1.0 / 63.0));
        assert!(approx(score_of(&merged, "d"), 1.0 / 62.0));
        assert_eq!(ids(&merged), vec!["b", "a", "d", "c"]);
    }

    #[test]
    fn identical_inputs_give_identical_output() {
        let vector = vec![candidate("x", 0.5, None), candidate("y", 0.4, None)];
        let keyword = vec![candidate("y", 2.0, Some("y")), candidate("z", 1.0, Some("z"))];

        let first = reciprocal_rank_fusion(&vector, &keyword, RrfConfig::default());
        let second = reciprocal_rank_fusion(&vector, &keyword, RrfConfig::default());
        assert_eq!(first, second);
    }

    #[test]
    fn ids_in_both_lists_appear_once() {
        let vector = vec![candidate("a", 0.9, None), candidate("b", 0.5, None)];
        let keyword = vec![candidate("a", 4.0, Some("a")), candidate("b", 2.0, Some("b"))];

        let merged = reciprocal_rank_fusion(&vector, &keyword, RrfConfig::default());
        assert_eq!(merged.len(), 2);
        assert!(merged
            .iter()
            .all(|m| m.vector_rank.is_some() && m.bm25_rank.is_some()));
    }

    #[test]
    fn raw_scores_do_not_affect_fusion() {
        let low = reciprocal_rank_fusion(
            &[candidate("a", 0.1, None), candidate("b", 0.05, None)],
            &[candidate("b", 1.0, Some("b"))],
            RrfConfig::default(),
        );
        let high = reciprocal_rank_fusion(
            &[candidate("a", 0.99, None), candidate("b", 0.98, None)],
            &[candidate("b", 500.0, Some("b"))],
            RrfConfig::default(),
        );

        let low_scores: Vec<f64> = low.iter().map(|m| m.hybrid_score).collect();
        let high_scores: Vec<f64> = high.iter().map(|m| m.hybrid_score).collect();
        assert_eq!(low_scores, high_scores);
        assert_eq!(ids(&low), ids(&high));
    }

    #[test]
    fn better_rank_contributes_more() {
        for k in [0.0, 1.0, 60.0, 1000.0] {
            assert!(rank_contribution(1, k) > rank_contribution(2, k));
        }
    }

    #[test]
    fn ties_break_on_vector_rank_then_id() {
        let merged = reciprocal_rank_fusion(
            &[candidate("a", 0.9, None), candidate("b", 0.8, None)],
            &[candidate("b", 2.0, Some("b")), candidate("a", 1.0, Some("a"))],
            RrfConfig::default(),
        );
        assert!(approx(merged[0].hybrid_score, merged[1].hybrid_score));
        assert_eq!(ids(&merged), vec!["a", "b"]);

        let keyword_only = reciprocal_rank_fusion(
            &[candidate("m", 0.9, None)],
            &[candidate("n", 2.0, Some("n"))],
            RrfConfig::default(),
        );
        assert_eq!(ids(&keyword_only), vec!["m", "n"]);
    }

    #[test]
    fn prefers_richer_record_for_content_and_metadata() {
        let mut vector_hit = candidate("a", 0.9, None);
        vector_hit.metadata = ChunkMetadata::text("report.xlsx")
            .with_section("Revenue")
            .with_kind(ChunkKind::Table {
                columns: vec!["year".into(), "total".into()],
                row_count: Some(4),
            });
        let keyword_hit = candidate("a", 3.0, Some("full table text"));

        let merged = reciprocal_rank_fusion(&[vector_hit], &[keyword_hit], RrfConfig::default());
        let only = &merged[0];
        assert_eq!(only.chunk.content, "full table text");
        assert_eq!(only.chunk.metadata.section.as_deref(), Some("Revenue"));
        assert!(only.chunk.metadata.kind.is_tabular());
    }

    #[test]
    fn repeated_ids_keep_first_rank() {
        let merged = reciprocal_rank_fusion(
            &[candidate("a", 0.9, None), candidate("a", 0.1, None)],
            &[],
            RrfConfig::default(),
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].vector_rank, Some(1));
        assert!(approx(merged[0].hybrid_score, 1.0 / 61.0));
    }

    #[test]
    fn invalid_k_falls_back_to_default() {
        let merged = reciprocal_rank_fusion(
            &[candidate("a", 0.9, None)],
            &[],
            RrfConfig::new(f64::NAN),
        );
        assert!(approx(merged[0].hybrid_score, 1.0 / 61.0));
    }

    #[test]
    fn empty_inputs_yield_empty_output() {
        assert!(reciprocal_rank_fusion(&[], &[], RrfConfig::default()).is_empty());
    }

    #[test]
    fn similarity_is_bounded() {
        assert!((distance_to_similarity(0.0) - 1.0).abs() < f32::EPSILON);
        assert!(distance_to_similarity(f32::NAN).abs() < f32::EPSILON);
        assert!(distance_to_similarity(3.0) < distance_to_similarity(1.0));
    }
}
