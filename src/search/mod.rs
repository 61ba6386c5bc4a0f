// Fuzzy search over the catalog. Ranking favors contiguous runs and
// word-boundary hits; ties fall back to catalog insertion order so results
// stay stable while the user types.

use std::sync::Arc;

use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use tracing::trace;

use crate::catalog::{Catalog, Track, TrackId};

/// Which text the winning score came from; highlight positions index into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchField {
    Title,
    Path,
}

#[derive(Debug, Clone)]
pub struct MatchResult {
    pub track_id: TrackId,
    pub score: i64,
    /// Character positions of the matched query characters, ascending.
    pub matched_positions: Vec<usize>,
    pub field: MatchField,
}

/// Per-session state carried between successive queries. Growing the query by
/// appended characters rescans only the previous survivors: a title that does
/// not contain Q as a subsequence cannot contain any extension of Q, so the
/// narrowed candidate set is exact, not a heuristic. Any other edit, or a
/// catalog swap, falls back to a full rescan.
#[derive(Default)]
pub struct QueryScratch {
    last_query: String,
    snapshot: Option<Arc<Catalog>>,
    /// Catalog positions that matched `last_query`, in insertion order.
    survivors: Vec<usize>,
}

impl QueryScratch {
    pub fn new() -> Self {
        Self::default()
    }
}

pub struct FuzzyIndex {
    matcher: SkimMatcherV2,
}

impl FuzzyIndex {
    pub fn new() -> Self {
        Self {
            matcher: SkimMatcherV2::default(),
        }
    }

    /// Rank `catalog` against `text`, highest score first, ties in insertion
    /// order. The empty query returns the whole catalog at score 0.
    pub fn query(
        &self,
        catalog: &Arc<Catalog>,
        scratch: &mut QueryScratch,
        text: &str,
    ) -> Vec<MatchResult> {
        if text.is_empty() {
            scratch.last_query.clear();
            scratch.snapshot = Some(catalog.clone());
            scratch.survivors = (0..catalog.len()).collect();
            return catalog
                .all()
                .map(|track| MatchResult {
                    track_id: track.id,
                    score: 0,
                    matched_positions: Vec::new(),
                    field: MatchField::Title,
                })
                .collect();
        }

        let same_generation = scratch
            .snapshot
            .as_ref()
            .map_or(false, |s| Arc::ptr_eq(s, catalog));
        let incremental = same_generation
            && !scratch.last_query.is_empty()
            && text.starts_with(scratch.last_query.as_str());

        let candidates: Vec<usize> = if incremental {
            scratch.survivors.clone()
        } else {
            (0..catalog.len()).collect()
        };
        trace!(
            query = text,
            candidates = candidates.len(),
            incremental,
            "fuzzy query"
        );

        // Candidates arrive in ascending catalog position, so both the
        // survivor list and the tie-break order fall out for free.
        let mut scored: Vec<(usize, MatchResult)> = Vec::new();
        for position in candidates {
            let Some(track) = catalog.track_at(position) else {
                continue;
            };
            if let Some(result) = self.score_track(track, text) {
                scored.push((position, result));
            }
        }

        scratch.last_query = text.to_string();
        scratch.snapshot = Some(catalog.clone());
        scratch.survivors = scored.iter().map(|(position, _)| *position).collect();

        scored.sort_by(|a, b| b.1.score.cmp(&a.1.score).then(a.0.cmp(&b.0)));
        scored.into_iter().map(|(_, result)| result).collect()
    }

    /// Best of title and file name; the title wins ties so highlights prefer
    /// the text the list actually shows.
    fn score_track(&self, track: &Track, query: &str) -> Option<MatchResult> {
        let title = self.matcher.fuzzy_indices(&track.title, query);
        let file_name = track.file_name();
        let path = self.matcher.fuzzy_indices(&file_name, query);

        match (title, path) {
            (Some((title_score, positions)), Some((path_score, _))) if title_score >= path_score => {
                Some(MatchResult {
                    track_id: track.id,
                    score: title_score,
                    matched_positions: positions,
                    field: MatchField::Title,
                })
            }
            (Some((score, positions)), None) => Some(MatchResult {
                track_id: track.id,
                score,
                matched_positions: positions,
                field: MatchField::Title,
            }),
            (_, Some((score, positions))) => Some(MatchResult {
                track_id: track.id,
                score,
                matched_positions: positions,
                field: MatchField::Path,
            }),
            (None, None) => None,
        }
    }
}

impl Default for FuzzyIndex {
    fn default() -> Self {
        Self::new()
    }
}
