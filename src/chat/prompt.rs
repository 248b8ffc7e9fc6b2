use crate::catalog::{CatalogDigest, DigestItem};

use super::context::ConversationContext;
use super::intent::IntentResult;
use super::Role;

/// Builds the per-intent completion prompts.
///
/// Recommendation prompts embed a catalog excerpt filtered by mood and
/// already-suggested items; chat and rejection prompts deliberately carry no
/// catalog at all, so the model cannot invent menu talk on those turns.
pub struct PromptBuilder {
    persona: String,
    max_suggestions: usize,
}

impl PromptBuilder {
    pub fn new(persona: String, max_suggestions: usize) -> Self {
        Self {
            persona,
            max_suggestions: max_suggestions.max(1),
        }
    }

    pub fn menu_recommendation(
        &self,
        context: &ConversationContext,
        result: &IntentResult,
        digest: &CatalogDigest,
    ) -> String {
        let section_keys = result.mood.and_then(|mood| mood.section_keys());
        let mut excerpt = digest.excerpt(section_keys, &context.suggested);
        // Mood filtering can empty the excerpt when everything relevant was
        // already suggested; fall back to the whole remaining catalog.
        if excerpt.is_empty() {
            excerpt = digest.excerpt(None, &context.suggested);
        }
        let catalog_json =
            serde_json::to_string_pretty(&excerpt).unwrap_or_else(|_| "{}".to_string());

        let mood_line = match result.mood {
            Some(mood) => format!("Detected customer mood: {:?}.", mood),
            None => "Customer mood: unknown.".to_string(),
        };

        format!(
            "{persona}\n\n\
             {mood}\n\
             Catalog (the ONLY items that exist; never invent others):\n{catalog}\n\n\
             Conversation:\n{conversation}\n\n\
             Recommend at most {max} items from the catalog above, matched to the customer's mood.\n\
             Write the reply in the customer's language, warm and brief, and bold each \
             recommended item name like **name** with its visible price.\n\
             Answer with STRICT JSON only, no prose outside it:\n\
             {{\"reply\":\"...\",\"suggestions\":[{{\"id\":\"...\",\"section\":\"...\"}}]}}\n\
             Use the exact id and section keys from the catalog.",
            persona = self.persona,
            mood = mood_line,
            catalog = catalog_json,
            conversation = transcript(context),
            max = self.max_suggestions,
        )
    }

    pub fn item_followup(
        &self,
        context: &ConversationContext,
        section: &str,
        item: &DigestItem,
    ) -> String {
        let item_json = serde_json::to_string_pretty(item).unwrap_or_else(|_| "{}".to_string());
        format!(
            "{persona}\n\n\
             The customer is asking about this item (section \"{section}\"):\n{item}\n\n\
             Conversation:\n{conversation}\n\n\
             Answer their question about this item only, from the record above. If the record \
             does not say, admit it briefly instead of guessing.\n\
             Answer with STRICT JSON only:\n\
             {{\"reply\":\"...\",\"suggestions\":[]}}",
            persona = self.persona,
            section = section,
            item = item_json,
            conversation = transcript(context),
        )
    }

    pub fn casual_chat(&self, context: &ConversationContext) -> String {
        format!(
            "{persona}\n\n\
             Conversation:\n{conversation}\n\n\
             The customer wants to chat, not to order. Reply warmly in their language and do \
             NOT mention or recommend any menu items.\n\
             Answer with STRICT JSON only:\n\
             {{\"reply\":\"...\",\"suggestions\":[]}}",
            persona = self.persona,
            conversation = transcript(context),
        )
    }

    pub fn rejection(&self, context: &ConversationContext) -> String {
        format!(
            "{persona}\n\n\
             Conversation:\n{conversation}\n\n\
             The customer declined food and drink. Acknowledge that graciously, keep the door \
             open, and do NOT push any menu items.\n\
             Answer with STRICT JSON only:\n\
             {{\"reply\":\"...\",\"suggestions\":[]}}",
            persona = self.persona,
            conversation = transcript(context),
        )
    }
}

fn transcript(context: &ConversationContext) -> String {
    context
        .recent
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::User => "customer",
                Role::Assistant => "assistant",
            };
            format!("{}: {}", role, m.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
