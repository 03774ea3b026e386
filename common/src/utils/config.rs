use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackendKind {
    OpenAI,
    #[default]
    FastEmbed,
    Hashed,
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub openai_api_key: String,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Networked cache primary. The pipeline runs on the in-process cache when absent.
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default)]
    pub embedding_backend: EmbeddingBackendKind,
    #[serde(default)]
    pub embedding_model: Option<String>,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,
    #[serde(default = "default_fts_language")]
    pub fts_language: String,
    #[serde(default = "default_fast_model")]
    pub fast_model: String,
    #[serde(default = "default_quality_model")]
    pub quality_model: String,
    /// Enables the model-backed intent classifier behind the heuristic one.
    #[serde(default)]
    pub intent_model: Option<String>,
    #[serde(default = "default_external_timeout_ms")]
    pub external_timeout_ms: u64,
    #[serde(default = "default_generation_timeout_ms")]
    pub generation_timeout_ms: u64,
    #[serde(default = "default_analysis_cache_ttl_secs")]
    pub analysis_cache_ttl_secs: u64,
    #[serde(default = "default_cache_sweep_interval_secs")]
    pub cache_sweep_interval_secs: u64,
    /// Deadline for a single cache primary call; a miss bypasses the primary for a while.
    #[serde(default = "default_cache_timeout_ms")]
    pub cache_timeout_ms: u64,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

const fn default_http_port() -> u16 {
    3000
}

const fn default_embedding_dimensions() -> u32 {
    384
}

fn default_fts_language() -> String {
    "english".to_string()
}

fn default_fast_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_quality_model() -> String {
    "gpt-4o".to_string()
}

const fn default_external_timeout_ms() -> u64 {
    5_000
}

const fn default_generation_timeout_ms() -> u64 {
    60_000
}

const fn default_analysis_cache_ttl_secs() -> u64 {
    300
}

const fn default_cache_sweep_interval_secs() -> u64 {
    60
}

const fn default_cache_timeout_ms() -> u64 {
    500
}

const fn default_rrf_k() -> f64 {
    60.0
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_optional_settings() {
        let config = Config::builder()
            .set_override("openai_api_key", "sk-test")
            .and_then(|b| b.set_override("surrealdb_address", "mem://"))
            .and_then(|b| b.set_override("surrealdb_username", "root"))
            .and_then(|b| b.set_override("surrealdb_password", "root"))
            .and_then(|b| b.set_override("surrealdb_namespace", "ns"))
            .and_then(|b| b.set_override("surrealdb_database", "db"))
            .expect("overrides")
            .build()
            .expect("build config");

        let app: AppConfig = config.try_deserialize().expect("deserialize config");
        assert_eq!(app.http_port, 3000);
        assert!(app.redis_url.is_none());
        assert_eq!(app.embedding_backend, EmbeddingBackendKind::FastEmbed);
        assert_eq!(app.analysis_cache_ttl_secs, 300);
        assert_eq!(app.cache_timeout_ms, 500);
        assert!((app.rrf_k - 60.0).abs() < f64::EPSILON);
    }
}
