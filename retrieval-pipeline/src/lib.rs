pub mod analysis;
pub mod answer_generation;
pub mod context;
pub mod fts;
pub mod hybrid;
pub mod index;
pub mod performance;
pub mod pipeline;
pub mod prompt;
pub mod quality;
pub mod scoring;
pub mod store;
pub mod vector;

pub use analysis::{QueryAnalysis, QueryAnalyzer, Tier};
pub use answer_generation::{AnswerGenerator, OpenAiGenerationModel};
pub use hybrid::HybridRetriever;
pub use pipeline::{
    Answer, AnswerPipeline, AnswerRequest, PipelineConfig, PipelineDependencies, TierTable,
};
