use std::time::Duration;

use common::utils::config::AppConfig;
use serde::{Deserialize, Serialize};

use crate::{analysis::Tier, scoring::DEFAULT_RRF_K};

/// Per-tier processing parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierConfig {
    pub use_rag: bool,
    pub top_k: usize,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Upper bound, in approximate tokens, for the compressed context.
    pub context_budget: usize,
}

/// Static tier table, built once at startup and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierTable {
    pub trivial: TierConfig,
    pub simple: TierConfig,
    pub medium: TierConfig,
    pub complex: TierConfig,
}

impl TierTable {
    pub fn new(fast_model: &str, quality_model: &str) -> Self {
        let tier = |use_rag, top_k, model: &str, max_tokens, temperature, context_budget| {
            TierConfig {
                use_rag,
                top_k,
                model: model.to_string(),
                max_tokens,
                temperature,
                context_budget,
            }
        };

        Self {
            trivial: tier(false, 0, fast_model, 300, 0.7, 0),
            simple: tier(true, 3, fast_model, 600, 0.2, 1_200),
            medium: tier(true, 5, fast_model, 1_200, 0.3, 2_500),
            complex: tier(true, 10, quality_model, 2_500, 0.3, 5_000),
        }
    }

    pub const fn get(&self, tier: Tier) -> &TierConfig {
        match tier {
            Tier::Trivial => &self.trivial,
            Tier::Simple => &self.simple,
            Tier::Medium => &self.medium,
            Tier::Complex => &self.complex,
        }
    }
}

impl Default for TierTable {
    fn default() -> Self {
        Self::new("gpt-4o-mini", "gpt-4o")
    }
}

/// Tunables for one `AnswerPipeline`.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub tiers: TierTable,
    pub rrf_k: f64,
    /// Each retriever is asked for `top_k * overfetch_factor` candidates.
    pub overfetch_factor: usize,
    /// Bound for embedding, index and classifier calls.
    pub external_timeout: Duration,
    pub generation_timeout: Duration,
    /// Longest snippet taken from a single chunk, in characters.
    pub max_snippet_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tiers: TierTable::default(),
            rrf_k: DEFAULT_RRF_K,
            overfetch_factor: 2,
            external_timeout: Duration::from_secs(5),
            generation_timeout: Duration::from_secs(60),
            max_snippet_chars: 600,
        }
    }
}

impl PipelineConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            tiers: TierTable::new(&config.fast_model, &config.quality_model),
            rrf_k: config.rrf_k,
            external_timeout: Duration::from_millis(config.external_timeout_ms),
            generation_timeout: Duration::from_millis(config.generation_timeout_ms),
            ..Self::default()
        }
    }
}
