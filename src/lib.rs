pub mod catalog;
pub mod chat;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod llm;
pub mod session;
pub mod throttle;

use std::sync::Arc;
use std::time::Duration;

use crate::catalog::{CatalogSource, DigestCache, DigestLimits, GithubContentSource, LocalManifestSource};
use crate::chat::{
    ChatService, ChatSettings, ClassifierRules, ContextExtractor, IntentClassifier, OutputValidator,
    PromptBuilder,
};
use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::llm::GeminiClient;
use crate::session::InMemorySessionStore;
use crate::throttle::RequestThrottle;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub chat: Arc<ChatService>,
    pub throttle: Arc<RequestThrottle>,
}

/// Wires the full pipeline from configuration.
pub fn build_state(config: AppConfig) -> Result<AppState, ServiceError> {
    let primary: Option<Box<dyn CatalogSource>> = match (&config.catalog_repo, &config.catalog_token)
    {
        (Some(repo), Some(token)) => Some(Box::new(GithubContentSource::new(
            repo.clone(),
            config.catalog_branch.clone(),
            config.catalog_path.clone(),
            token.clone(),
        )?)),
        _ => None,
    };
    let fallback: Box<dyn CatalogSource> =
        Box::new(LocalManifestSource::new(config.catalog_local_path.clone()));
    let digest_cache = Arc::new(DigestCache::new(
        primary,
        fallback,
        DigestLimits {
            max_items_per_section: config.digest_max_items_per_section,
            description_chars: config.digest_description_chars,
        },
        Duration::from_secs(config.catalog_ttl_secs),
    ));

    let rules = match &config.classifier_rules_path {
        Some(path) => ClassifierRules::from_file(path)?,
        None => ClassifierRules::default(),
    };

    let sessions: Arc<dyn session::SessionStore> = Arc::new(InMemorySessionStore::new(
        config.session_capacity,
        Duration::from_secs(config.session_idle_secs),
    ));
    let throttle = Arc::new(RequestThrottle::new());
    let llm = Arc::new(GeminiClient::new(
        config.completion_endpoint.clone(),
        config.completion_model.clone(),
        config.completion_api_key.clone(),
        Duration::from_secs(config.completion_timeout_secs),
    )?);

    let chat = Arc::new(ChatService::new(
        digest_cache,
        throttle.clone(),
        sessions.clone(),
        llm,
        ContextExtractor::new(sessions, Arc::new(rules.clone())),
        IntentClassifier::new(rules),
        PromptBuilder::new(config.assistant_persona.clone(), config.max_suggestions),
        OutputValidator::new(config.reply_max_chars, config.max_suggestions),
        ChatSettings {
            throttle_min_interval: Duration::from_millis(config.throttle_min_interval_ms),
            reply_temperature: 0.6,
            reply_max_output_tokens: config.completion_max_output_tokens,
        },
    ));

    Ok(AppState {
        config: Arc::new(config),
        chat,
        throttle,
    })
}

/// Builds the application router with middleware applied.
pub fn app(state: AppState) -> axum::Router {
    use tower_http::compression::CompressionLayer;
    use tower_http::trace::TraceLayer;

    handlers::routes()
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .with_state(state)
}
