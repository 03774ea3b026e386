pub mod heuristics;
pub mod intent;

use std::{fmt, sync::Arc, time::Duration};

use common::{cache::CacheManager, utils::deadline::with_deadline};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

pub use heuristics::classify_tier;
pub use intent::{
    HeuristicIntentClassifier, IntentClassifier, OpenAiIntentClassifier, UNKNOWN_INTENT,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Trivial,
    Simple,
    #[default]
    Medium,
    Complex,
}

impl Tier {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trivial => "trivial",
            Self::Simple => "simple",
            Self::Medium => "medium",
            Self::Complex => "complex",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Pt,
    #[default]
    En,
}

impl Language {
    pub const fn code(self) -> &'static str {
        match self {
            Self::Pt => "pt",
            Self::En => "en",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub tier: Tier,
    pub intent: String,
    pub entities: Vec<String>,
    pub language: Language,
    pub has_attached_documents: bool,
}

impl QueryAnalysis {
    /// Safe default used whenever analysis cannot complete.
    pub fn fallback(has_attached_documents: bool) -> Self {
        Self {
            tier: Tier::Medium,
            intent: UNKNOWN_INTENT.to_string(),
            entities: Vec::new(),
            language: Language::default(),
            has_attached_documents,
        }
    }
}

/// Classifies queries into a tier and intent. Never fails.
pub struct QueryAnalyzer {
    classifiers: Vec<Arc<dyn IntentClassifier>>,
    cache: Option<Arc<CacheManager>>,
    cache_ttl: Duration,
    classifier_timeout: Duration,
}

impl QueryAnalyzer {
    /// `classifiers` are consulted in order until one has an opinion.
    pub fn new(
        classifiers: Vec<Arc<dyn IntentClassifier>>,
        cache: Option<Arc<CacheManager>>,
        cache_ttl: Duration,
        classifier_timeout: Duration,
    ) -> Self {
        Self {
            classifiers,
            cache,
            cache_ttl,
            classifier_timeout,
        }
    }

    /// Heuristic intent only, no cache.
    pub fn heuristic() -> Self {
        Self::new(
            vec![Arc::new(HeuristicIntentClassifier)],
            None,
            Duration::ZERO,
            Duration::from_secs(1),
        )
    }

    fn cache_key(query: &str, attached_documents: usize) -> String {
        format!("query_analysis:{attached_documents}:{query}")
    }

    #[instrument(level = "trace", skip_all, fields(attached = attached_document_ids.len()))]
    pub async fn analyze(
        &self,
        query: &str,
        attached_document_ids: &[String],
        cancel: &CancellationToken,
    ) -> QueryAnalysis {
        let attached = attached_document_ids.len();
        let key = Self::cache_key(query, attached);

        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get::<QueryAnalysis>(&key).await {
                debug!(tier = %hit.tier, "query analysis cache hit");
                return hit;
            }
        }

        let analysis = QueryAnalysis {
            tier: classify_tier(query, attached),
            intent: self.detect_intent(query, cancel).await,
            entities: heuristics::extract_entities(query),
            language: heuristics::detect_language(query),
            has_attached_documents: attached > 0,
        };

        if let Some(cache) = &self.cache {
            cache.set(&key, &analysis, self.cache_ttl).await;
        }

        analysis
    }

    async fn detect_intent(&self, query: &str, cancel: &CancellationToken) -> String {
        for classifier in &self.classifiers {
            let outcome = with_deadline(
                "intent_classification",
                self.classifier_timeout,
                cancel,
                classifier.classify(query),
            )
            .await;

            match outcome {
                Ok(Some(intent)) => return intent,
                Ok(None) => {}
                Err(err) => {
                    warn!(classifier = classifier.name(), error = %err, "intent classifier failed");
                }
            }
        }
        UNKNOWN_INTENT.to_string()
    }
}
