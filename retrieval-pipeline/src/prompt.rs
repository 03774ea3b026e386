use serde::Serialize;

use crate::{
    analysis::{Language, Tier},
    context::CompressedContext,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Prompt {
    pub system: String,
    pub user: String,
    pub full_prompt: String,
}

#[derive(Debug, Clone, Copy)]
pub struct PromptRequest<'a> {
    pub query: &'a str,
    pub context: &'a CompressedContext,
    pub tier: Tier,
    pub language: Language,
    pub include_intent_detection: bool,
    pub include_light_qa: bool,
}

const TRIVIAL_SYSTEM: &str = "You are a friendly assistant for a personal document library. \
Reply briefly and naturally. If the user asks what you can do, explain that you answer \
questions about the documents they have uploaded.";

const SIMPLE_SYSTEM: &str = "You answer questions about the user's documents. \
Answer using ONLY the context below. Be concise: one or two sentences.";

const MEDIUM_SYSTEM: &str = "You answer questions about the user's documents using ONLY the \
context below. Cite the supporting passage after each claim with its marker, e.g. [1] or [2]. \
If the context does not contain the answer, say that it is not specified in the document \
instead of guessing.";

const COMPLEX_SYSTEM: &str = "You are an analyst answering questions that span several of the \
user's documents. Use ONLY the context below. Synthesize across sources: group related facts, \
point out agreements and differences between documents, and cite every claim with its marker, \
e.g. [1] or [3]. If something is not in the context, say that it is not specified in the \
documents.";

const VERIFICATION_BLOCK: &str = "Before answering, verify:\n\
- every fact comes from the context\n\
- every citation marker refers to a passage that exists above\n\
- nothing has been invented or extrapolated";

const INTENT_DETECTION: &str = "First work out what the user actually wants (a single fact, a \
summary, a comparison or a calculation) and shape the answer to match.";

const LIGHT_QA: &str = "Re-read your answer once and make sure it directly addresses the question.";

const TABULAR_GUIDANCE: &str = "Some passages come from spreadsheets or financial statements. \
Read rows and columns carefully, keep units and currencies, show the arithmetic when you \
aggregate or compare figures, and do not mix values from different periods.";

/// Builds deterministic, tier-specific prompts.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptBuilder;

impl PromptBuilder {
    pub fn build(request: &PromptRequest<'_>) -> Prompt {
        let system = Self::system(request);
        let user = Self::user(request);
        let full_prompt = format!("{system}\n\n{user}");
        Prompt {
            system,
            user,
            full_prompt,
        }
    }

    fn system(request: &PromptRequest<'_>) -> String {
        let base = match request.tier {
            Tier::Trivial => TRIVIAL_SYSTEM,
            Tier::Simple => SIMPLE_SYSTEM,
            Tier::Medium => MEDIUM_SYSTEM,
            Tier::Complex => COMPLEX_SYSTEM,
        };

        let mut blocks = vec![base.to_string()];
        if request.tier != Tier::Trivial {
            if request.include_intent_detection {
                blocks.push(INTENT_DETECTION.to_string());
            }
            if request.context.has_tabular_sources() {
                blocks.push(TABULAR_GUIDANCE.to_string());
            }
            if request.include_light_qa && request.tier != Tier::Complex {
                blocks.push(LIGHT_QA.to_string());
            }
        }
        blocks.push(language_line(request.language).to_string());
        if request.tier == Tier::Complex {
            blocks.push(VERIFICATION_BLOCK.to_string());
        }

        blocks.join("\n\n")
    }

    fn user(request: &PromptRequest<'_>) -> String {
        if request.tier == Tier::Trivial || request.context.is_empty() {
            return request.query.to_string();
        }
        format!(
            "Context:\n{context}\n\nQuestion: {query}",
            context = request.context.content,
            query = request.query
        )
    }
}

const fn language_line(language: Language) -> &'static str {
    match language {
        Language::Pt => "Answer in Brazilian Portuguese.",
        Language::En => "Answer in English.",
    }
}
