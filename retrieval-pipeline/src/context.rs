use std::collections::HashSet;

use serde::Serialize;

use crate::{pipeline::config::TierConfig, scoring::MergedChunk};

const CHARS_PER_TOKEN: usize = 4;
const SEPARATOR: &str = "\n\n";
/// Snippets shorter than this are not worth shortening into the remaining budget.
const MIN_SNIPPET_CHARS: usize = 80;
const ELLIPSIS: char = '…';

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "what", "which", "who", "when", "where", "how", "does", "did",
    "are", "was", "this", "that", "from", "about", "into", "have", "has", "uma", "que", "qual",
    "quais", "para", "com", "dos", "das", "nos", "nas", "por", "como", "sobre", "quando", "onde",
    "meu", "meus", "minha", "minhas",
];

/// Approximate token count: one token per four characters, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// A chunk that made it into the context, addressable by its `[index]` marker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Source {
    pub index: usize,
    pub chunk_id: String,
    pub document_id: String,
    pub filename: String,
    pub section: Option<String>,
    pub page_number: Option<u32>,
    pub chunk_type: &'static str,
    pub hybrid_score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CompressedContext {
    pub content: String,
    pub token_count: usize,
    pub sources: Vec<Source>,
}

impl CompressedContext {
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty()
    }

    /// True when any included chunk is a table or financial statement.
    pub fn has_tabular_sources(&self) -> bool {
        self.sources
            .iter()
            .any(|source| matches!(source.chunk_type, "table" | "financial"))
    }
}

/// Compresses fused chunks into a budgeted, attributed context string.
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    max_snippet_chars: usize,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new(600)
    }
}

impl ContextBuilder {
    pub fn new(max_snippet_chars: usize) -> Self {
        Self {
            max_snippet_chars: max_snippet_chars.max(MIN_SNIPPET_CHARS),
        }
    }

    /// `token_count` never exceeds `tier.context_budget`.
    pub fn build(
        &self,
        chunks: &[MergedChunk],
        query: &str,
        tier: &TierConfig,
    ) -> CompressedContext {
        let char_budget = tier.context_budget.saturating_mul(CHARS_PER_TOKEN);
        if char_budget == 0 || tier.top_k == 0 {
            return CompressedContext::default();
        }

        let terms = query_terms(query);
        let mut content = String::new();
        let mut used_chars = 0usize;
        let mut sources = Vec::new();

        for merged in chunks.iter().take(tier.top_k) {
            let Some(snippet) = self.snippet(merged, &terms) else {
                continue;
            };

            let index = sources.len().saturating_add(1);
            let header = header(index, merged);
            let separator_chars = if content.is_empty() { 0 } else { SEPARATOR.len() };
            let fixed_chars = separator_chars
                .saturating_add(header.chars().count())
                .saturating_add(1);
            let remaining = char_budget.saturating_sub(used_chars);

            let snippet_chars = snippet.chars().count();
            let snippet = if fixed_chars.saturating_add(snippet_chars) <= remaining {
                snippet
            } else {
                let room = remaining.saturating_sub(fixed_chars);
                if room < MIN_SNIPPET_CHARS.min(snippet_chars) {
                    break;
                }
                truncate_chars(&snippet, room)
            };

            if separator_chars > 0 {
                content.push_str(SEPARATOR);
            }
            content.push_str(&header);
            content.push('\n');
            content.push_str(&snippet);
            used_chars = used_chars
                .saturating_add(fixed_chars)
                .saturating_add(snippet.chars().count());

            sources.push(Source {
                index,
                chunk_id: merged.chunk.id.clone(),
                document_id: merged.chunk.document_id.clone(),
                filename: merged.chunk.metadata.filename.clone(),
                section: merged.chunk.metadata.section.clone(),
                page_number: merged.chunk.metadata.page_number,
                chunk_type: merged.chunk.metadata.kind.label(),
                hybrid_score: merged.hybrid_score,
            });

            if used_chars >= char_budget {
                break;
            }
        }

        CompressedContext {
            token_count: estimate_tokens(&content),
            content,
            sources,
        }
    }

    /// Most query-relevant sentence of the chunk, falling back to its micro summary.
    fn snippet(&self, merged: &MergedChunk, terms: &HashSet<String>) -> Option<String> {
        let micro_summary = merged
            .chunk
            .metadata
            .micro_summary
            .as_deref()
            .map(str::trim)
            .filter(|summary| !summary.is_empty());

        let best = best_sentence(&merged.chunk.content, terms);
        let chosen = match best {
            Some((sentence, overlap)) if overlap > 0 => Some(sentence),
            Some((sentence, _)) => micro_summary.or(Some(sentence)),
            None => micro_summary,
        }?;

        Some(truncate_chars(chosen, self.max_snippet_chars))
    }
}

fn header(index: usize, merged: &MergedChunk) -> String {
    let metadata = &merged.chunk.metadata;
    let filename = if metadata.filename.is_empty() {
        merged.chunk.document_id.as_str()
    } else {
        metadata.filename.as_str()
    };
    let mut header = format!("[{index}] {filename}");
    if let Some(section) = metadata.section.as_deref().filter(|s| !s.is_empty()) {
        header.push_str(" — ");
        header.push_str(section);
    }
    if let Some(page) = metadata.page_number {
        header.push_str(&format!(" (p. {page})"));
    }
    header
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
}

fn query_terms(query: &str) -> HashSet<String> {
    tokenize(query)
        .filter(|token| token.chars().count() >= 3 || token.chars().all(|c| c.is_ascii_digit()))
        .filter(|token| !STOPWORDS.contains(&token.as_str()))
        .collect()
}

/// Splits on terminal punctuation followed by whitespace, so decimals like `4.2` stay intact.
fn sentences(text: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0usize;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        let boundary = match c {
            '\n' => true,
            '.' | '!' | '?' => chars.peek().map_or(true, |(_, next)| next.is_whitespace()),
            _ => false,
        };
        if boundary {
            let end = idx.saturating_add(c.len_utf8());
            pieces.extend(text.get(start..end));
            start = end;
        }
    }
    pieces.extend(text.get(start..));

    pieces
        .into_iter()
        .map(str::trim)
        .filter(|sentence| sentence.chars().any(char::is_alphanumeric))
        .collect()
}

/// Sentence with the most distinct query terms; earliest wins ties.
fn best_sentence<'a>(content: &'a str, terms: &HashSet<String>) -> Option<(&'a str, usize)> {
    let mut best: Option<(&str, usize)> = None;
    for sentence in sentences(content) {
        let overlap = tokenize(sentence)
            .filter(|token| terms.contains(token))
            .collect::<HashSet<_>>()
            .len();
        if best.map_or(true, |(_, current)| overlap > current) {
            best = Some((sentence, overlap));
        }
    }
    best
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    if max_chars == 0 {
        return String::new();
    }
    let mut truncated: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    truncated.push(ELLIPSIS);
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Tier;
    use crate::pipeline::config::TierTable;
    use common::storage::types::chunk::{Chunk, ChunkKind, ChunkMetadata};

    fn merged(id: &str, content: &str, metadata: ChunkMetadata) -> MergedChunk {
        MergedChunk {
            chunk: Chunk {
                id: id.into(),
                document_id: format!("doc-{id}"),
                content: content.into(),
                metadata,
            },
            vector_score: 0.0,
            bm25_score: 0.0,
            hybrid_score: 0.03,
            vector_rank: Some(1),
            bm25_rank: None,
        }
    }

    #[test]
    fn picks_the_most_relevant_sentence_with_attribution() {
        let chunk = merged(
            "c1",
            "The company was founded in 1999. Net revenue reached 4.2 million in 2023. Offices are in Lisbon.",
            ChunkMetadata::text("annual-report.pdf").with_section("Financials").with_page(7),
        );
        let tiers = TierTable::default();

        let context = ContextBuilder::default().build(
            &[chunk],
            "What was the net revenue in 2023?",
            tiers.get(Tier::Medium),
        );

        assert_eq!(
            context.content,
            "[1] annual-report.pdf — Financials (p. 7)\nNet revenue reached 4.2 million in 2023."
        );
        assert_eq!(context.sources.len(), 1);
        assert_eq!(context.sources[0].chunk_id, "c1");
        assert_eq!(context.token_count, estimate_tokens(&context.content));
    }

    #[test]
    fn falls_back_to_micro_summary_without_overlap() {
        let chunk = merged(
            "c1",
            "Lorem ipsum dolor sit amet.",
            ChunkMetadata::text("notes.md").with_micro_summary("Meeting notes about hiring plans."),
        );
        let tiers = TierTable::default();

        let context =
            ContextBuilder::default().build(&[chunk], "hiring budget", tiers.get(Tier::Medium));
        assert!(context.content.ends_with("Meeting notes about hiring plans."));
    }

    #[test]
    fn never_exceeds_the_tier_budget() {
        let long_sentence = format!("Revenue {}.", "grew steadily across every region ".repeat(40));
        let chunks: Vec<MergedChunk> = (0..10)
            .map(|i| merged(&format!("c{i}"), &long_sentence, ChunkMetadata::text("big.pdf")))
            .collect();
        let tiers = TierTable::default();

        for tier in [Tier::Simple, Tier::Medium, Tier::Complex] {
            let config = tiers.get(tier);
            let mut tight = config.clone();
            tight.context_budget = 150;
            for cfg in [config, &tight] {
                let context = ContextBuilder::new(2_000).build(&chunks, "revenue", cfg);
                assert!(
                    context.token_count <= cfg.context_budget,
                    "{tier}: {}",
                    context.token_count
                );
                assert!(context.sources.len() <= cfg.top_k);
                assert!(!context.sources.is_empty());
            }
        }
    }

    #[test]
    fn respects_top_k_and_skips_empty_chunks() {
        let tiers = TierTable::default();
        let chunks = vec![
            merged("empty", "", ChunkMetadata::text("a.pdf")),
            merged("c1", "Alpha revenue.", ChunkMetadata::text("a.pdf")),
            merged("c2", "Beta revenue.", ChunkMetadata::text("b.pdf")),
            merged("c3", "Gamma revenue.", ChunkMetadata::text("c.pdf")),
            merged("c4", "Delta revenue.", ChunkMetadata::text("d.pdf")),
        ];

        let context =
            ContextBuilder::default().build(&chunks, "revenue", tiers.get(Tier::Simple));
        let ids: Vec<&str> = context.sources.iter().map(|s| s.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2"]);
        assert_eq!(context.sources[1].index, 2);
    }

    #[test]
    fn trivial_tier_gets_no_context() {
        let tiers = TierTable::default();
        let chunk = merged("c1", "Anything at all.", ChunkMetadata::text("a.pdf"));
        let context =
            ContextBuilder::default().build(&[chunk], "anything", tiers.get(Tier::Trivial));
        assert!(context.is_empty());
        assert_eq!(context.token_count, 0);
    }

    #[test]
    fn tabular_sources_are_flagged() {
        let tiers = TierTable::default();
        let chunk = merged(
            "t1",
            "Year 2023 total 5.4.",
            ChunkMetadata::text("sheet.xlsx").with_kind(ChunkKind::Table {
                columns: vec!["year".into(), "total".into()],
                row_count: Some(2),
            }),
        );
        let context =
            ContextBuilder::default().build(&[chunk], "total 2023", tiers.get(Tier::Medium));
        assert!(context.has_tabular_sources());
    }

    #[test]
    fn truncation_is_char_safe() {
        assert_eq!(truncate_chars("ação rápida", 5), "ação…");
        assert_eq!(truncate_chars("short", 10), "short");
    }
}
