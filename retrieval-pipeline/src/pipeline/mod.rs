pub mod config;
mod context;
mod stages;
mod state;

pub use config::{PipelineConfig, TierConfig, TierTable};

use std::sync::Arc;

use common::{error::AppError, utils::embedding::EmbeddingService};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::{
    analysis::{QueryAnalysis, QueryAnalyzer},
    answer_generation::AnswerGenerator,
    context::{ContextBuilder, Source},
    hybrid::HybridRetriever,
    performance::PerformanceReport,
    quality::AnswerQuality,
};

use self::{
    context::PipelineContext,
    stages::{
        analyze, build_context, build_prompt, embed, generate, retrieve, AnalysisRoute,
        ContextRoute,
    },
    state::analyzing,
};

/// One question from one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerRequest {
    pub user_id: String,
    pub query: String,
    #[serde(default)]
    pub attached_document_ids: Vec<String>,
}

impl AnswerRequest {
    pub fn new(user_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            query: query.into(),
            attached_document_ids: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_attachments(mut self, document_ids: Vec<String>) -> Self {
        self.attached_document_ids = document_ids;
        self
    }
}

/// Terminal artifact of a request: either a full answer or a full fallback answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub content: String,
    pub sources: Vec<Source>,
    pub query_analysis: QueryAnalysis,
    pub performance: PerformanceReport,
    pub quality: AnswerQuality,
}

/// Collaborators injected into an [`AnswerPipeline`], constructed once at startup.
pub struct PipelineDependencies {
    pub analyzer: QueryAnalyzer,
    pub embedder: Arc<dyn EmbeddingService>,
    pub retriever: HybridRetriever,
    pub generator: AnswerGenerator,
    pub config: PipelineConfig,
}

/// Sequences analysis, retrieval, context building, prompting and generation
/// for a single request and owns the fallback policy.
pub struct AnswerPipeline {
    analyzer: QueryAnalyzer,
    embedder: Arc<dyn EmbeddingService>,
    retriever: HybridRetriever,
    context_builder: ContextBuilder,
    generator: AnswerGenerator,
    config: PipelineConfig,
}

enum Outcome {
    Answered,
    NoRelevantContent,
}

impl AnswerPipeline {
    pub fn new(dependencies: PipelineDependencies) -> Self {
        let PipelineDependencies {
            analyzer,
            embedder,
            retriever,
            generator,
            config,
        } = dependencies;

        Self {
            analyzer,
            embedder,
            retriever,
            context_builder: ContextBuilder::new(config.max_snippet_chars),
            generator,
            config,
        }
    }

    /// Never fails: every error is turned into a fallback [`Answer`].
    pub async fn answer(&self, request: &AnswerRequest, cancel: &CancellationToken) -> Answer {
        self.run(request, cancel, None).await
    }

    /// Like [`Self::answer`], forwarding generated text to `on_chunk` as it arrives.
    /// The returned answer is only produced once the stream has completed.
    pub async fn answer_streaming(
        &self,
        request: &AnswerRequest,
        cancel: &CancellationToken,
        on_chunk: &mut (dyn FnMut(&str) + Send),
    ) -> Answer {
        self.run(request, cancel, Some(on_chunk)).await
    }

    #[instrument(
        skip_all,
        fields(user_id = %request.user_id, attached = request.attached_document_ids.len())
    )]
    async fn run(
        &self,
        request: &AnswerRequest,
        cancel: &CancellationToken,
        on_chunk: Option<&mut (dyn FnMut(&str) + Send)>,
    ) -> Answer {
        let query_chars = request.query.chars().count();
        let preview: String = request.query.chars().take(120).collect();
        info!(
            user_id = %request.user_id,
            query_chars,
            preview = %preview.replace('\n', " "),
            "answer pipeline started"
        );

        let mut ctx = PipelineContext::new(request, cancel);

        let answer = match self
            .drive(&mut ctx, on_chunk)
            .await
            .and_then(|outcome| match outcome {
                Outcome::Answered => ctx.answer(),
                Outcome::NoRelevantContent => Ok(ctx.no_relevant_content()),
            }) {
            Ok(answer) => answer,
            Err(err) => {
                if err.is_cancelled() {
                    warn!(user_id = %request.user_id, "answer pipeline cancelled");
                }
                ctx.apology()
            }
        };

        info!(
            user_id = %request.user_id,
            tier = %answer.query_analysis.tier,
            sources = answer.sources.len(),
            grounded = answer.quality.is_grounded,
            fallback = answer.quality.fallback,
            total_ms = answer.performance.total_ms,
            "answer pipeline finished"
        );
        answer
    }

    async fn drive(
        &self,
        ctx: &mut PipelineContext<'_>,
        on_chunk: Option<&mut (dyn FnMut(&str) + Send)>,
    ) -> Result<Outcome, AppError> {
        let machine = analyzing();

        let machine = match analyze(machine, ctx, self).await.map_err(|err| ctx.abort(err))? {
            AnalysisRoute::Direct(machine) => machine,
            AnalysisRoute::Retrieve(machine) => {
                let machine = embed(machine, ctx, self)
                    .await
                    .map_err(|err| ctx.abort(err))?;
                let machine = retrieve(machine, ctx, self)
                    .await
                    .map_err(|err| ctx.abort(err))?;
                match build_context(machine, ctx, self).map_err(|err| ctx.abort(err))? {
                    ContextRoute::Empty(_done) => return Ok(Outcome::NoRelevantContent),
                    ContextRoute::Prompt(machine) => {
                        build_prompt(machine, ctx).map_err(|err| ctx.abort(err))?
                    }
                }
            }
        };

        let _done = generate(machine, ctx, self, on_chunk)
            .await
            .map_err(|err| ctx.abort(err))?;

        Ok(Outcome::Answered)
    }
}
