use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::session::SessionStore;

use super::intent::{ClassifierRules, Mood};
use super::{ChatMessage, Role};

/// How many trailing messages the pipeline looks at.
const RECENT_WINDOW: usize = 8;

/// How many trailing assistant messages are scanned for suggested names.
const EMPHASIS_SCAN: usize = 5;

/// Assistant replies mark recommended items with markdown bold.
static EMPHASIS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*(.+?)\*\*").unwrap());

/// Everything downstream stages need to know about the conversation so far.
#[derive(Debug, Clone)]
pub struct ConversationContext {
    pub session_id: String,
    /// Trailing window of the transcript, chronological order
    pub recent: Vec<ChatMessage>,
    /// Latest user message, empty string when the transcript has none
    pub last_user: String,
    pub last_assistant: Option<String>,
    /// Whether the latest assistant message carried an emphasized item name
    pub last_assistant_suggested: bool,
    /// Names suggested to this session, merged from persisted state and the
    /// transcript itself
    pub suggested: HashSet<String>,
    /// Names from the most recent recommendation turn
    pub last_suggested: Vec<String>,
    pub mood: Option<Mood>,
}

/// Builds a [`ConversationContext`] from the raw transcript plus persisted
/// session state, and keeps that state current.
pub struct ContextExtractor {
    store: Arc<dyn SessionStore>,
    rules: Arc<ClassifierRules>,
}

impl ContextExtractor {
    pub fn new(store: Arc<dyn SessionStore>, rules: Arc<ClassifierRules>) -> Self {
        Self { store, rules }
    }

    pub fn extract(&self, session_id: &str, messages: &[ChatMessage]) -> ConversationContext {
        let mut state = self.store.load(session_id);

        let recent: Vec<ChatMessage> = messages
            .iter()
            .skip(messages.len().saturating_sub(RECENT_WINDOW))
            .cloned()
            .collect();

        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();

        let last_assistant = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.content.clone());

        let last_assistant_suggested = last_assistant
            .as_deref()
            .map(|text| text.contains("**"))
            .unwrap_or(false);

        // The transcript is the source of truth for already-suggested names;
        // the persisted set survives clients that trim their history.
        for name in transcript_suggestions(messages) {
            state.suggested.insert(name);
        }

        // Latest mood signal anywhere in the recent user turns wins.
        let window_mood = recent
            .iter()
            .rev()
            .filter(|m| m.role == Role::User)
            .find_map(|m| self.rules.detect_mood(&m.content));
        if let Some(mood) = window_mood {
            state.note_mood(mood);
        }
        let mood = state.current_mood();

        let context = ConversationContext {
            session_id: session_id.to_string(),
            recent,
            last_user,
            last_assistant,
            last_assistant_suggested,
            suggested: state.suggested.clone(),
            last_suggested: state.last_suggested.clone(),
            mood,
        };

        debug!(
            session = %session_id,
            suggested = context.suggested.len(),
            mood = ?context.mood,
            "extracted conversation context"
        );
        self.store.store(session_id, state);
        context
    }
}

/// Emphasized names in the trailing assistant messages. Short fragments and
/// bare numbers are bolded prices, not item names.
fn transcript_suggestions(messages: &[ChatMessage]) -> Vec<String> {
    let mut names = Vec::new();
    for message in messages
        .iter()
        .rev()
        .filter(|m| m.role == Role::Assistant)
        .take(EMPHASIS_SCAN)
    {
        for capture in EMPHASIS.captures_iter(&message.content) {
            let name = capture[1].trim().to_string();
            if name.chars().count() > 3 && !name.chars().all(|c| c.is_ascii_digit()) {
                names.push(name);
            }
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::InMemorySessionStore;
    use std::time::Duration;

    fn extractor() -> ContextExtractor {
        ContextExtractor::new(
            Arc::new(InMemorySessionStore::new(100, Duration::from_secs(600))),
            Arc::new(ClassifierRules::default()),
        )
    }

    fn user(content: &str) -> ChatMessage {
        ChatMessage {
            role: Role::User,
            content: content.into(),
        }
    }

    fn assistant(content: &str) -> ChatMessage {
        ChatMessage {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    #[test]
    fn picks_last_user_and_assistant_messages() {
        let ctx = extractor().extract(
            "s1",
            &[
                user("hello"),
                assistant("hi there"),
                user("what do you have?"),
            ],
        );
        assert_eq!(ctx.last_user, "what do you have?");
        assert_eq!(ctx.last_assistant.as_deref(), Some("hi there"));
        assert!(!ctx.last_assistant_suggested);
    }

    #[test]
    fn harvests_emphasized_names_from_assistant_turns() {
        let ctx = extractor().extract(
            "s1",
            &[
                user("something cold please"),
                assistant("جرب **ايسد لاتيه** بسعر **25** ليرة، أو **كولد برو**."),
                user("anything else?"),
            ],
        );
        assert!(ctx.suggested.contains("ايسد لاتيه"));
        assert!(ctx.suggested.contains("كولد برو"));
        // Bare price must not register as an item.
        assert!(!ctx.suggested.contains("25"));
        assert!(ctx.last_assistant_suggested);
    }

    #[test]
    fn suggestions_persist_across_requests() {
        let extractor = extractor();
        extractor.extract(
            "s1",
            &[user("hi"), assistant("جرب **ايسد لاتيه** اليوم!")],
        );
        // Client trimmed its history; the store still remembers.
        let ctx = extractor.extract("s1", &[user("shukran")]);
        assert!(ctx.suggested.contains("ايسد لاتيه"));
    }

    #[test]
    fn mood_carries_over_when_latest_message_is_neutral() {
        let extractor = extractor();
        let first = extractor.extract("s1", &[user("I'm so tired today")]);
        assert_eq!(first.mood, Some(Mood::Tired));

        let second = extractor.extract("s1", &[user("ok then")]);
        assert_eq!(second.mood, Some(Mood::Tired));
    }

    #[test]
    fn recent_window_is_bounded() {
        let messages: Vec<ChatMessage> = (0..20).map(|i| user(&format!("msg {}", i))).collect();
        let ctx = extractor().extract("s1", &messages);
        assert_eq!(ctx.recent.len(), 8);
        assert_eq!(ctx.last_user, "msg 19");
    }

    #[test]
    fn empty_transcript_yields_empty_context() {
        let ctx = extractor().extract("s1", &[]);
        assert!(ctx.last_user.is_empty());
        assert!(ctx.last_assistant.is_none());
        assert!(ctx.suggested.is_empty());
    }
}
