use std::{collections::BTreeSet, sync::LazyLock};

use regex::Regex;
use serde::Serialize;

use crate::context::Source;

static CITATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(\d{1,3}(?:\s*,\s*\d{1,3})*)\]").expect("citation regex is valid")
});

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnswerQuality {
    /// Sources were supplied and every citation points at one of them.
    pub is_grounded: bool,
    pub source_count: usize,
    pub cited_sources: Vec<usize>,
    pub invalid_citations: Vec<usize>,
    pub fallback: bool,
    pub finish_reason: Option<String>,
}

impl AnswerQuality {
    pub fn fallback() -> Self {
        Self {
            fallback: true,
            ..Self::default()
        }
    }

    /// Validates `[n]` markers in the answer against the sources placed in the context.
    pub fn assess(content: &str, sources: &[Source], finish_reason: Option<String>) -> Self {
        let known: BTreeSet<usize> = sources.iter().map(|source| source.index).collect();
        let mut cited = BTreeSet::new();
        let mut invalid = BTreeSet::new();

        for capture in CITATION_RE.captures_iter(content) {
            let Some(group) = capture.get(1) else {
                continue;
            };
            for marker in group.as_str().split(',') {
                let Ok(index) = marker.trim().parse::<usize>() else {
                    continue;
                };
                if known.contains(&index) {
                    cited.insert(index);
                } else {
                    invalid.insert(index);
                }
            }
        }

        Self {
            is_grounded: !sources.is_empty() && invalid.is_empty(),
            source_count: sources.len(),
            cited_sources: cited.into_iter().collect(),
            invalid_citations: invalid.into_iter().collect(),
            fallback: false,
            finish_reason,
        }
    }
}
