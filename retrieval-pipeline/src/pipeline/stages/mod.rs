use common::{error::AppError, utils::deadline::with_deadline};
use state_machines::core::GuardError;
use tracing::{debug, info, instrument};

use crate::{
    analysis::{Tier, UNKNOWN_INTENT},
    answer_generation::GenerationConfig,
    hybrid::RetrievalOptions,
    index::RetrievalFilter,
    performance::StageKind,
    prompt::{PromptBuilder, PromptRequest},
};

use super::{
    context::PipelineContext,
    state::{
        AnswerMachine, Analyzing, ContextBuilding, Done, Embedding, Generating, Prompting,
        Retrieving,
    },
    AnswerPipeline,
};

/// Where the request goes once it has been classified.
pub enum AnalysisRoute {
    Retrieve(AnswerMachine<(), Embedding>),
    Direct(AnswerMachine<(), Generating>),
}

/// Whether the compressed context left anything to ground an answer on.
pub enum ContextRoute {
    Prompt(AnswerMachine<(), Prompting>),
    Empty(AnswerMachine<(), Done>),
}

#[instrument(level = "trace", skip_all, fields(user_id = %ctx.request.user_id))]
pub async fn analyze(
    machine: AnswerMachine<(), Analyzing>,
    ctx: &mut PipelineContext<'_>,
    pipeline: &AnswerPipeline,
) -> Result<AnalysisRoute, AppError> {
    ctx.tracker.start(StageKind::Analysis);
    let analysis = pipeline
        .analyzer
        .analyze(
            &ctx.request.query,
            &ctx.request.attached_document_ids,
            ctx.cancel,
        )
        .await;
    ctx.tracker.end(StageKind::Analysis);

    let tier_config = pipeline.config.tiers.get(analysis.tier).clone();
    info!(
        user_id = %ctx.request.user_id,
        tier = %analysis.tier,
        intent = %analysis.intent,
        language = analysis.language.code(),
        entities = analysis.entities.len(),
        attached = ctx.request.attached_document_ids.len(),
        use_rag = tier_config.use_rag,
        "query analysed"
    );

    let use_rag = tier_config.use_rag;
    ctx.analysis = Some(analysis);
    ctx.tier_config = Some(tier_config);

    if use_rag {
        return machine
            .embed()
            .map(AnalysisRoute::Retrieve)
            .map_err(|(_, guard)| map_guard_error("embed", &guard));
    }

    assemble_prompt(ctx)?;
    machine
        .generate()
        .map(AnalysisRoute::Direct)
        .map_err(|(_, guard)| map_guard_error("generate", &guard))
}

#[instrument(level = "trace", skip_all, fields(user_id = %ctx.request.user_id))]
pub async fn embed(
    machine: AnswerMachine<(), Embedding>,
    ctx: &mut PipelineContext<'_>,
    pipeline: &AnswerPipeline,
) -> Result<AnswerMachine<(), Retrieving>, AppError> {
    ctx.tracker.start(StageKind::Embedding);
    let outcome = with_deadline(
        "embedding",
        pipeline.config.external_timeout,
        ctx.cancel,
        pipeline.embedder.generate(&ctx.request.query),
    )
    .await
    .map_err(AppError::into_embedding);
    ctx.tracker.end(StageKind::Embedding);

    ctx.embedding = outcome?;
    debug!(dimension = ctx.embedding.len(), "query embedded");

    machine
        .retrieve()
        .map_err(|(_, guard)| map_guard_error("retrieve", &guard))
}

#[instrument(level = "trace", skip_all, fields(user_id = %ctx.request.user_id))]
pub async fn retrieve(
    machine: AnswerMachine<(), Retrieving>,
    ctx: &mut PipelineContext<'_>,
    pipeline: &AnswerPipeline,
) -> Result<AnswerMachine<(), ContextBuilding>, AppError> {
    let options = RetrievalOptions {
        top_k: ctx.tier_config()?.top_k,
        filter: RetrievalFilter::for_tenant(ctx.request.user_id.clone())
            .with_documents(ctx.request.attached_document_ids.clone()),
    };

    ctx.tracker.start(StageKind::Retrieval);
    let retrieval = pipeline
        .retriever
        .retrieve(&ctx.request.query, &ctx.embedding, &options, ctx.cancel)
        .await;
    ctx.tracker.end(StageKind::Retrieval);

    if ctx.cancel.is_cancelled() {
        return Err(AppError::Cancelled {
            operation: "retrieval".into(),
        });
    }

    info!(
        user_id = %ctx.request.user_id,
        vector_count = retrieval.stats.vector_count,
        bm25_count = retrieval.stats.bm25_count,
        merged_count = retrieval.stats.merged_count,
        elapsed_ms = retrieval.stats.execution_time_ms,
        "hybrid retrieval finished"
    );
    ctx.retrieval = retrieval;

    machine
        .build_context()
        .map_err(|(_, guard)| map_guard_error("build_context", &guard))
}

#[instrument(level = "trace", skip_all, fields(user_id = %ctx.request.user_id))]
pub fn build_context(
    machine: AnswerMachine<(), ContextBuilding>,
    ctx: &mut PipelineContext<'_>,
    pipeline: &AnswerPipeline,
) -> Result<ContextRoute, AppError> {
    ctx.tracker.start(StageKind::ContextBuilding);
    let context = pipeline.context_builder.build(
        &ctx.retrieval.chunks,
        &ctx.request.query,
        ctx.tier_config()?,
    );
    ctx.tracker.end(StageKind::ContextBuilding);

    debug!(
        sources = context.sources.len(),
        token_count = context.token_count,
        "context compressed"
    );
    let empty = context.is_empty();
    ctx.context = context;

    if empty {
        return machine
            .finish()
            .map(ContextRoute::Empty)
            .map_err(|(_, guard)| map_guard_error("finish", &guard));
    }

    machine
        .build_prompt()
        .map(ContextRoute::Prompt)
        .map_err(|(_, guard)| map_guard_error("build_prompt", &guard))
}

#[instrument(level = "trace", skip_all)]
pub fn build_prompt(
    machine: AnswerMachine<(), Prompting>,
    ctx: &mut PipelineContext<'_>,
) -> Result<AnswerMachine<(), Generating>, AppError> {
    assemble_prompt(ctx)?;
    machine
        .generate()
        .map_err(|(_, guard)| map_guard_error("generate", &guard))
}

#[instrument(level = "trace", skip_all, fields(user_id = %ctx.request.user_id))]
pub async fn generate(
    machine: AnswerMachine<(), Generating>,
    ctx: &mut PipelineContext<'_>,
    pipeline: &AnswerPipeline,
    on_chunk: Option<&mut (dyn FnMut(&str) + Send)>,
) -> Result<AnswerMachine<(), Done>, AppError> {
    let config = GenerationConfig::from(ctx.tier_config()?);
    let prompt = ctx.prompt()?.clone();

    ctx.tracker.start(StageKind::Generation);
    let outcome = match on_chunk {
        Some(on_chunk) => {
            pipeline
                .generator
                .generate_streaming(&prompt, &config, ctx.cancel, on_chunk)
                .await
        }
        None => pipeline.generator.generate(&prompt, &config, ctx.cancel).await,
    };
    ctx.tracker.end(StageKind::Generation);

    let generation = outcome?;
    info!(
        user_id = %ctx.request.user_id,
        model = %generation.model_used,
        finish_reason = ?generation.finish_reason,
        chars = generation.content.len(),
        "answer generated"
    );
    ctx.generation = Some(generation);

    machine
        .finish()
        .map_err(|(_, guard)| map_guard_error("finish", &guard))
}

fn assemble_prompt(ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
    ctx.tracker.start(StageKind::Prompting);
    let analysis = ctx.analysis()?;
    let tier = analysis.tier;
    let prompt = PromptBuilder::build(&PromptRequest {
        query: &ctx.request.query,
        context: &ctx.context,
        tier,
        language: analysis.language,
        include_intent_detection: tier != Tier::Trivial && analysis.intent == UNKNOWN_INTENT,
        include_light_qa: tier == Tier::Medium,
    });
    ctx.prompt = Some(prompt);
    ctx.tracker.end(StageKind::Prompting);
    Ok(())
}

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::InternalError(format!(
        "invalid answer pipeline transition during {event}: {guard:?}"
    ))
}
