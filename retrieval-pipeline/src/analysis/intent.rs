use std::sync::Arc;

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use common::error::AppError;
use tracing::debug;

use super::heuristics;

pub const UNKNOWN_INTENT: &str = "unknown";

/// Labels the external classifier may answer with; anything else maps to `unknown`.
pub const INTENT_LABELS: &[&str] = &[
    "greeting",
    "meta",
    "summary",
    "comparison",
    "factual",
    "analysis",
    "extraction",
    "other",
];

/// One strategy in the intent detection chain.
///
/// `Ok(None)` means "no opinion"; the analyzer then asks the next strategy.
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn classify(&self, query: &str) -> Result<Option<String>, AppError>;
}

/// Regex match for greeting, meta and summary requests.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicIntentClassifier;

impl HeuristicIntentClassifier {
    pub fn detect(query: &str) -> Option<&'static str> {
        if heuristics::is_greeting(query) {
            Some("greeting")
        } else if heuristics::is_meta(query) {
            Some("meta")
        } else if heuristics::is_summary_request(query) {
            Some("summary")
        } else {
            None
        }
    }
}

#[async_trait]
impl IntentClassifier for HeuristicIntentClassifier {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    async fn classify(&self, query: &str) -> Result<Option<String>, AppError> {
        Ok(Self::detect(query).map(str::to_string))
    }
}

/// Chat-model classifier, consulted only when the heuristics have no answer.
pub struct OpenAiIntentClassifier {
    client: Arc<Client<OpenAIConfig>>,
    model: String,
}

impl OpenAiIntentClassifier {
    pub fn new(client: Arc<Client<OpenAIConfig>>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    fn system_prompt() -> String {
        format!(
            "Classify the intent of the user's question about their documents. \
             Reply with exactly one word from this list: {}.",
            INTENT_LABELS.join(", ")
        )
    }
}

pub fn normalize_label(raw: &str) -> String {
    let label = raw
        .trim()
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase();
    if INTENT_LABELS.contains(&label.as_str()) {
        label
    } else {
        UNKNOWN_INTENT.to_string()
    }
}

#[async_trait]
impl IntentClassifier for OpenAiIntentClassifier {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn classify(&self, query: &str) -> Result<Option<String>, AppError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages([
                ChatCompletionRequestSystemMessage::from(Self::system_prompt()).into(),
                ChatCompletionRequestUserMessage::from(query.to_string()).into(),
            ])
            .max_completion_tokens(5_u32)
            .temperature(0.0)
            .build()?;

        let response = self.client.chat().create(request).await?;
        let raw = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
            .ok_or_else(|| AppError::Analysis("intent classifier returned no content".into()))?;

        let label = normalize_label(raw);
        debug!(raw, label = %label, "external intent classification");
        Ok(Some(label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn heuristic_recognises_greeting_meta_and_summary() {
        let classifier = HeuristicIntentClassifier;
        assert_eq!(
            classifier.classify("olá!").await.expect("classify"),
            Some("greeting".to_string())
        );
        assert_eq!(
            classifier.classify("list my documents").await.expect("classify"),
            Some("meta".to_string())
        );
        assert_eq!(
            classifier
                .classify("summarize the lease agreement")
                .await
                .expect("classify"),
            Some("summary".to_string())
        );
        assert_eq!(
            classifier
                .classify("what is the termination fee?")
                .await
                .expect("classify"),
            None
        );
    }

    #[test]
    fn labels_outside_the_set_become_unknown() {
        assert_eq!(normalize_label(" Comparison. "), "comparison");
        assert_eq!(normalize_label("poetry"), UNKNOWN_INTENT);
    }
}
