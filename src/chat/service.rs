use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::catalog::DigestCache;
use crate::errors::ServiceError;
use crate::llm::{CompletionClient, CompletionParams};
use crate::session::SessionStore;
use crate::throttle::{throttle_key, RequestThrottle};

use super::context::{ContextExtractor, ConversationContext};
use super::intent::{Intent, IntentClassifier, IntentResult};
use super::prompt::PromptBuilder;
use super::validate::OutputValidator;
use super::{ChatMessage, ChatResponse};

/// Tunables the pipeline reads per request.
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub throttle_min_interval: Duration,
    pub reply_temperature: f32,
    pub reply_max_output_tokens: u32,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            throttle_min_interval: Duration::from_millis(1200),
            reply_temperature: 0.6,
            reply_max_output_tokens: 300,
        }
    }
}

/// The conversation pipeline: throttle, context extraction, classification,
/// grounded generation, validation, session bookkeeping.
pub struct ChatService {
    digest_cache: Arc<DigestCache>,
    throttle: Arc<RequestThrottle>,
    sessions: Arc<dyn SessionStore>,
    llm: Arc<dyn CompletionClient>,
    extractor: ContextExtractor,
    classifier: IntentClassifier,
    prompts: PromptBuilder,
    validator: OutputValidator,
    settings: ChatSettings,
}

impl ChatService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        digest_cache: Arc<DigestCache>,
        throttle: Arc<RequestThrottle>,
        sessions: Arc<dyn SessionStore>,
        llm: Arc<dyn CompletionClient>,
        extractor: ContextExtractor,
        classifier: IntentClassifier,
        prompts: PromptBuilder,
        validator: OutputValidator,
        settings: ChatSettings,
    ) -> Self {
        Self {
            digest_cache,
            throttle,
            sessions,
            llm,
            extractor,
            classifier,
            prompts,
            validator,
            settings,
        }
    }

    pub fn digest_cache(&self) -> &DigestCache {
        &self.digest_cache
    }

    /// Runs one conversation turn. Upstream completion failures degrade to a
    /// fallback reply; only throttling surfaces as an error.
    #[instrument(skip(self, messages), fields(session = %session_id))]
    pub async fn handle(
        &self,
        session_id: &str,
        client_ip: &str,
        messages: &[ChatMessage],
    ) -> Result<ChatResponse, ServiceError> {
        let key = throttle_key(session_id, client_ip);
        if !self.throttle.allow(&key, self.settings.throttle_min_interval) {
            return Err(ServiceError::RateLimitExceeded(
                "slow down a little before the next message".to_string(),
            ));
        }

        let context = self.extractor.extract(session_id, messages);
        let digest = self.digest_cache.get_digest().await;

        let result = self
            .classifier
            .classify(&context, &digest, self.llm.as_ref())
            .await;
        counter!("chat_turns_total", 1);
        info!(
            intent = ?result.intent,
            mood = ?result.mood,
            confidence = result.confidence,
            "classified turn"
        );

        let prompt = self.build_prompt(&context, &result, &digest);
        let raw = match self
            .llm
            .complete(
                &prompt,
                CompletionParams {
                    temperature: self.settings.reply_temperature,
                    max_output_tokens: self.settings.reply_max_output_tokens,
                },
            )
            .await
        {
            Ok(text) => Some(text),
            Err(err) => {
                warn!("completion failed, serving fallback reply: {}", err);
                counter!("chat_completion_failures_total", 1);
                None
            }
        };

        let outcome =
            self.validator
                .validate(raw.as_deref(), &digest, result.intent, &context.suggested);

        if !outcome.approved_names.is_empty() {
            // Reload before writing: the extractor stored its own updates,
            // and another turn may have landed in between.
            let mut state = self.sessions.load(session_id);
            state.last_suggested = outcome.approved_names.clone();
            state.add_suggested(outcome.approved_names.iter().cloned());
            self.sessions.store(session_id, state);
            counter!(
                "chat_suggestions_total",
                outcome.approved_names.len() as u64
            );
        }

        Ok(outcome.response)
    }

    fn build_prompt(
        &self,
        context: &ConversationContext,
        result: &IntentResult,
        digest: &crate::catalog::CatalogDigest,
    ) -> String {
        match result.intent {
            Intent::MenuRecommendation => self.prompts.menu_recommendation(context, result, digest),
            Intent::ItemFollowup => {
                let resolved = result
                    .item
                    .as_deref()
                    .and_then(|name| digest.find_by_name(name));
                match resolved {
                    Some((section, item)) => self.prompts.item_followup(context, section, item),
                    // Classification said followup but the item is gone from
                    // the catalog; recommend instead of answering blind.
                    None => self.prompts.menu_recommendation(context, result, digest),
                }
            }
            Intent::CasualChat => self.prompts.casual_chat(context),
            Intent::Rejection => self.prompts.rejection(context),
        }
    }
}
