use common::error::AppError;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::{
    analysis::{Language, QueryAnalysis},
    answer_generation::Generation,
    context::CompressedContext,
    hybrid::HybridRetrieval,
    performance::PerformanceTracker,
    prompt::Prompt,
    quality::AnswerQuality,
};

use super::{config::TierConfig, Answer, AnswerRequest};

/// Mutable state carried through one request.
pub struct PipelineContext<'a> {
    pub request: &'a AnswerRequest,
    pub cancel: &'a CancellationToken,
    pub tracker: PerformanceTracker,
    pub analysis: Option<QueryAnalysis>,
    pub tier_config: Option<TierConfig>,
    pub embedding: Vec<f32>,
    pub retrieval: HybridRetrieval,
    pub context: CompressedContext,
    pub prompt: Option<Prompt>,
    pub generation: Option<Generation>,
}

impl<'a> PipelineContext<'a> {
    pub fn new(request: &'a AnswerRequest, cancel: &'a CancellationToken) -> Self {
        Self {
            request,
            cancel,
            tracker: PerformanceTracker::new(),
            analysis: None,
            tier_config: None,
            embedding: Vec::new(),
            retrieval: HybridRetrieval::default(),
            context: CompressedContext::default(),
            prompt: None,
            generation: None,
        }
    }

    pub fn analysis(&self) -> Result<&QueryAnalysis, AppError> {
        self.analysis
            .as_ref()
            .ok_or_else(|| AppError::InternalError("query analysis expected to be available".into()))
    }

    pub fn tier_config(&self) -> Result<&TierConfig, AppError> {
        self.tier_config
            .as_ref()
            .ok_or_else(|| AppError::InternalError("tier config expected to be available".into()))
    }

    pub fn prompt(&self) -> Result<&Prompt, AppError> {
        self.prompt
            .as_ref()
            .ok_or_else(|| AppError::InternalError("prompt expected to be available".into()))
    }

    fn language(&self) -> Language {
        self.analysis
            .as_ref()
            .map(|analysis| analysis.language)
            .unwrap_or_default()
    }

    fn take_analysis(&mut self) -> QueryAnalysis {
        self.analysis.take().unwrap_or_else(|| {
            QueryAnalysis::fallback(!self.request.attached_document_ids.is_empty())
        })
    }

    pub fn abort(&mut self, err: AppError) -> AppError {
        error!(
            user_id = %self.request.user_id,
            tier = ?self.analysis.as_ref().map(|analysis| analysis.tier),
            error = %err,
            "answer pipeline aborted"
        );
        err
    }

    /// Successful terminal answer built from the generation result.
    pub fn answer(&mut self) -> Result<Answer, AppError> {
        let generation = self.generation.take().ok_or_else(|| {
            AppError::InternalError("generation expected to be available".into())
        })?;
        let sources = std::mem::take(&mut self.context.sources);
        let quality =
            AnswerQuality::assess(&generation.content, &sources, generation.finish_reason);

        Ok(Answer {
            content: generation.content,
            sources,
            query_analysis: self.take_analysis(),
            performance: self.tracker.get_metrics(),
            quality,
        })
    }

    /// Terminal answer for a request whose retrieval produced nothing usable.
    pub fn no_relevant_content(&mut self) -> Answer {
        let content = match self.language() {
            Language::Pt => NO_CONTENT_PT,
            Language::En => NO_CONTENT_EN,
        };
        self.fallback_answer(content)
    }

    /// Terminal answer for a request that failed at any stage.
    pub fn apology(&mut self) -> Answer {
        let content = match self.language() {
            Language::Pt => APOLOGY_PT,
            Language::En => APOLOGY_EN,
        };
        self.fallback_answer(content)
    }

    fn fallback_answer(&mut self, content: &str) -> Answer {
        Answer {
            content: content.to_string(),
            sources: Vec::new(),
            query_analysis: self.take_analysis(),
            performance: self.tracker.get_metrics(),
            quality: AnswerQuality::fallback(),
        }
    }
}

const APOLOGY_EN: &str =
    "Sorry, I couldn't process your question right now. Please try again in a moment.";
const APOLOGY_PT: &str =
    "Desculpe, não consegui processar sua pergunta agora. Tente novamente em instantes.";
const NO_CONTENT_EN: &str =
    "I couldn't find relevant information in your documents to answer this question.";
const NO_CONTENT_PT: &str =
    "Não encontrei informações relevantes nos seus documentos para responder a esta pergunta.";
