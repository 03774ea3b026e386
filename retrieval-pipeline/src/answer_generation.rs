use std::{sync::Arc, time::Duration};

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs, FinishReason,
    },
    Client,
};
use async_trait::async_trait;
use common::{error::AppError, utils::deadline::with_deadline};
use futures::StreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::{pipeline::config::TierConfig, prompt::Prompt};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationConfig {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl From<&TierConfig> for GenerationConfig {
    fn from(tier: &TierConfig) -> Self {
        Self {
            model: tier.model.clone(),
            max_tokens: tier.max_tokens,
            temperature: tier.temperature,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Generation {
    pub content: String,
    pub model_used: String,
    pub finish_reason: Option<String>,
}

/// Text generation backend.
#[async_trait]
pub trait GenerationModel: Send + Sync {
    async fn generate(
        &self,
        prompt: &Prompt,
        config: &GenerationConfig,
    ) -> Result<Generation, AppError>;

    /// Emits text increments through `on_chunk` and returns the accumulated result.
    ///
    /// Backends without native streaming emit the whole completion as one chunk.
    async fn generate_streaming(
        &self,
        prompt: &Prompt,
        config: &GenerationConfig,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<Generation, AppError> {
        let generation = self.generate(prompt, config).await?;
        on_chunk(&generation.content);
        Ok(generation)
    }
}

pub struct OpenAiGenerationModel {
    client: Arc<Client<OpenAIConfig>>,
}

impl OpenAiGenerationModel {
    pub const fn new(client: Arc<Client<OpenAIConfig>>) -> Self {
        Self { client }
    }

    fn request(
        prompt: &Prompt,
        config: &GenerationConfig,
    ) -> Result<CreateChatCompletionRequest, AppError> {
        Ok(CreateChatCompletionRequestArgs::default()
            .model(&config.model)
            .messages([
                ChatCompletionRequestSystemMessage::from(prompt.system.clone()).into(),
                ChatCompletionRequestUserMessage::from(prompt.user.clone()).into(),
            ])
            .max_completion_tokens(config.max_tokens)
            .temperature(config.temperature)
            .build()?)
    }
}

fn finish_reason_label(reason: FinishReason) -> Option<String> {
    serde_json::to_value(reason)
        .ok()
        .and_then(|value| value.as_str().map(str::to_owned))
}

#[async_trait]
impl GenerationModel for OpenAiGenerationModel {
    async fn generate(
        &self,
        prompt: &Prompt,
        config: &GenerationConfig,
    ) -> Result<Generation, AppError> {
        let request = Self::request(prompt, config)?;
        let response = self.client.chat().create(request).await?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Generation("model returned no choices".into()))?;

        Ok(Generation {
            content: choice.message.content.unwrap_or_default(),
            model_used: response.model,
            finish_reason: choice.finish_reason.and_then(finish_reason_label),
        })
    }

    async fn generate_streaming(
        &self,
        prompt: &Prompt,
        config: &GenerationConfig,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<Generation, AppError> {
        let mut request = Self::request(prompt, config)?;
        request.stream = Some(true);
        let mut stream = self.client.chat().create_stream(request).await?;

        let mut content = String::new();
        let mut model_used = config.model.clone();
        let mut finish_reason = None;

        while let Some(event) = stream.next().await {
            let response = event?;
            model_used = response.model;
            for choice in response.choices {
                if let Some(delta) = choice.delta.content.filter(|delta| !delta.is_empty()) {
                    on_chunk(&delta);
                    content.push_str(&delta);
                }
                if let Some(reason) = choice.finish_reason {
                    finish_reason = finish_reason_label(reason);
                }
            }
        }

        Ok(Generation {
            content,
            model_used,
            finish_reason,
        })
    }
}

/// Bounds generation calls with the request deadline and cancellation token.
///
/// This is the one stage whose failure propagates to the orchestrator.
pub struct AnswerGenerator {
    model: Arc<dyn GenerationModel>,
    timeout: Duration,
}

impl AnswerGenerator {
    pub fn new(model: Arc<dyn GenerationModel>, timeout: Duration) -> Self {
        Self { model, timeout }
    }

    #[instrument(level = "trace", skip_all, fields(model = %config.model))]
    pub async fn generate(
        &self,
        prompt: &Prompt,
        config: &GenerationConfig,
        cancel: &CancellationToken,
    ) -> Result<Generation, AppError> {
        let generation = with_deadline(
            "generation",
            self.timeout,
            cancel,
            self.model.generate(prompt, config),
        )
        .await
        .map_err(AppError::into_generation)?;
        Self::validated(generation)
    }

    #[instrument(level = "trace", skip_all, fields(model = %config.model))]
    pub async fn generate_streaming(
        &self,
        prompt: &Prompt,
        config: &GenerationConfig,
        cancel: &CancellationToken,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<Generation, AppError> {
        let generation = with_deadline(
            "generation",
            self.timeout,
            cancel,
            self.model.generate_streaming(prompt, config, on_chunk),
        )
        .await
        .map_err(AppError::into_generation)?;
        Self::validated(generation)
    }

    fn validated(generation: Generation) -> Result<Generation, AppError> {
        if generation.content.trim().is_empty() {
            return Err(AppError::Generation("model returned an empty completion".into()));
        }
        debug!(
            model = %generation.model_used,
            finish_reason = ?generation.finish_reason,
            chars = generation.content.len(),
            "generation completed"
        );
        Ok(generation)
    }
}
