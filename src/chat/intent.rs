use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::catalog::CatalogDigest;
use crate::errors::ServiceError;
use crate::llm::{CompletionClient, CompletionParams};

use super::context::ConversationContext;
use super::validate::extract_json_object;

/// Output token budget for the classification call; the structured answer is
/// tiny, so keep the upstream bill tiny too.
const CLASSIFY_MAX_OUTPUT_TOKENS: u32 = 64;

/// Closed set of conversational intents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Intent {
    MenuRecommendation,
    ItemFollowup,
    CasualChat,
    Rejection,
}

/// Coarse inferred user state used to bias recommendations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mood {
    WantingCold,
    WantingHot,
    Hungry,
    Thirsty,
    Tired,
    Happy,
    Sad,
    Stressed,
    Neutral,
}

impl Mood {
    /// Catalog section keys this mood biases towards. `None` means no
    /// filtering, the whole digest goes into the prompt.
    pub fn section_keys(self) -> Option<&'static [&'static str]> {
        match self {
            Mood::WantingCold => Some(&["cold_drinks", "ice_cream"]),
            Mood::WantingHot => Some(&["hot_drinks"]),
            Mood::Hungry => Some(&["sweets", "ice_cream"]),
            Mood::Thirsty => Some(&["cold_drinks", "hot_drinks"]),
            Mood::Tired => Some(&["hot_drinks", "sweets"]),
            Mood::Happy | Mood::Sad | Mood::Stressed | Mood::Neutral => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IntentResult {
    pub intent: Intent,
    pub confidence: f32,
    pub mood: Option<Mood>,
    /// Resolved catalog item name, set for item-followup only
    pub item: Option<String>,
}

/// One mood-detection rule: any keyword hit maps to the mood.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoodRule {
    pub mood: Mood,
    pub keywords: Vec<String>,
}

/// Prioritized, data-driven classification vocabulary.
///
/// The built-in table covers the original Arabic idiom set plus English
/// equivalents; a deployment can replace it wholesale from a JSON file
/// without code changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierRules {
    /// Explicit catalog requests: temperature, hunger/thirst, category names
    pub menu_request: Vec<String>,
    /// Explicit menu rejections
    pub rejection: Vec<String>,
    /// Chat-only signals (greetings, "let's talk", feelings)
    pub chat_only: Vec<String>,
    /// Continuation phrases after an assistant recommendation
    pub continuation: Vec<String>,
    /// Demonstrative phrases pointing back at the latest recommendation
    #[serde(default)]
    pub followup_demonstrative: Vec<String>,
    /// Mood vocabulary, in rule order
    pub moods: Vec<MoodRule>,
}

impl Default for ClassifierRules {
    fn default() -> Self {
        Self {
            menu_request: [
                "شو عندكم", "شو عندك", "ايش عندكم", "ايش عندك", "بدي ", "عبالي", "حابب",
                "اقتراح", "بوظة", "آيس كريم", "قهوة", "شاي", "كابتشينو", "حلويات", "شوكولا",
                "بارد", "ساخن", "دافئ", "منعش", "اركيل", "أركيلة", "نرجيلة", "اشرب", "مشروب",
                "جوعان", "عطشان",
                "what do you have", "recommend", "suggest", "suggestion", "menu", "ice cream",
                "coffee", "tea", "dessert", "sweet", "something cold", "something hot",
                "cold", "hot", "hungry", "thirsty", "shisha", "hookah", "drink",
            ]
            .map(String::from)
            .to_vec(),
            rejection: [
                "مابدي", "ما بدي", "لا بدي", "مو عايز", "ما عبالي", "مش جوعان", "مش عطشان",
                "don't want food", "dont want food", "don't want anything", "not hungry",
                "not thirsty", "nothing to eat", "no food",
            ]
            .map(String::from)
            .to_vec(),
            chat_only: [
                "نحكي", "احكي", "دردش", "كيفك", "شلونك", "اخبارك", "حكيلي", "خبرني", "مرحبا",
                "هلا", "السلام", "أهلين", "عن الحب", "فيلم", "لعبة", "كتاب",
                "just want to talk", "just chat", "let's talk", "lets talk", "how are you",
                "tell me about", "a movie", "a book",
            ]
            .map(String::from)
            .to_vec(),
            continuation: [
                "شو كمان", "في غيرو", "غيرو", "كمان شي", "شي تاني",
                "anything else", "what else", "another one", "something else", "more options",
            ]
            .map(String::from)
            .to_vec(),
            followup_demonstrative: [
                "شو هاد", "شو هيدا", "حدثني عنه", "شو فيه", "هاد شو",
                "tell me more", "more about that", "more about it", "about this one",
                "what is it", "what's in it", "whats in it",
            ]
            .map(String::from)
            .to_vec(),
            moods: vec![
                MoodRule {
                    mood: Mood::WantingCold,
                    keywords: ["بارد", "منعش", "مثلج", "cold", "iced", "frozen", "refreshing"]
                        .map(String::from)
                        .to_vec(),
                },
                MoodRule {
                    mood: Mood::WantingHot,
                    keywords: ["ساخن", "دافئ", "شوب", "hot", "warm"].map(String::from).to_vec(),
                },
                MoodRule {
                    mood: Mood::Hungry,
                    keywords: ["جوعان", "جعان", "حلو", "اكل", "hungry", "starving", "sweet tooth"]
                        .map(String::from)
                        .to_vec(),
                },
                MoodRule {
                    mood: Mood::Thirsty,
                    keywords: ["عطشان", "اشرب", "thirsty"].map(String::from).to_vec(),
                },
                MoodRule {
                    mood: Mood::Tired,
                    keywords: ["تعبان", "مرهق", "نعسان", "tired", "exhausted", "sleepy"]
                        .map(String::from)
                        .to_vec(),
                },
                MoodRule {
                    mood: Mood::Happy,
                    keywords: ["مبسوط", "فرحان", "happy", "great day"].map(String::from).to_vec(),
                },
                MoodRule {
                    mood: Mood::Sad,
                    keywords: ["حزين", "زعلان", "sad", "down"].map(String::from).to_vec(),
                },
                MoodRule {
                    mood: Mood::Stressed,
                    keywords: ["متوتر", "مضغوط", "زهقان", "stressed", "anxious"]
                        .map(String::from)
                        .to_vec(),
                },
            ],
        }
    }
}

impl ClassifierRules {
    /// Loads a replacement rule table from a JSON file.
    pub fn from_file(path: &str) -> Result<Self, ServiceError> {
        let bytes = std::fs::read(path)
            .map_err(|e| ServiceError::InternalError(format!("classifier rules read: {}", e)))?;
        let rules = serde_json::from_slice(&bytes)?;
        Ok(rules)
    }

    fn matches(list: &[String], text: &str) -> bool {
        list.iter().any(|kw| text.contains(kw.as_str()))
    }

    /// Masks rejection phrases out of lowercased text, so the keywords they
    /// embed ("not hungry" contains "hungry") cannot match positively.
    fn without_negations(&self, lowered: &str) -> String {
        let mut masked = lowered.to_string();
        for phrase in &self.rejection {
            if masked.contains(phrase.as_str()) {
                masked = masked.replace(phrase.as_str(), " ");
            }
        }
        masked
    }

    /// Rightmost mood keyword in the text wins, so "it's so hot, what do you
    /// have that's cold" lands on wanting-cold. Negated phrases never carry
    /// a mood.
    pub fn detect_mood(&self, text: &str) -> Option<Mood> {
        let lowered = self.without_negations(&text.to_lowercase());
        let mut best: Option<(usize, Mood)> = None;
        for rule in &self.moods {
            for kw in &rule.keywords {
                if let Some(pos) = lowered.rfind(kw.as_str()) {
                    if best.map_or(true, |(p, _)| pos >= p) {
                        best = Some((pos, rule.mood));
                    }
                }
            }
        }
        best.map(|(_, mood)| mood)
    }
}

/// Shape of the model tier's structured answer; every field defaulted.
#[derive(Debug, Default, Deserialize)]
struct ModelClassification {
    #[serde(default)]
    intent: Option<Intent>,
    #[serde(default)]
    mood: Option<Mood>,
    #[serde(default)]
    item: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
}

/// Two-tier intent classifier: deterministic keyword rules first, one
/// low-temperature completion call only for ambiguous input.
pub struct IntentClassifier {
    rules: ClassifierRules,
}

impl IntentClassifier {
    pub fn new(rules: ClassifierRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &ClassifierRules {
        &self.rules
    }

    pub async fn classify(
        &self,
        context: &ConversationContext,
        digest: &CatalogDigest,
        llm: &dyn CompletionClient,
    ) -> IntentResult {
        if let Some(result) = self.deterministic(context, digest) {
            debug!(intent = ?result.intent, mood = ?result.mood, "deterministic rule fired");
            return result;
        }
        self.model_tier(context, llm).await
    }

    /// Fixed-priority rule cascade. First matching rule decides.
    fn deterministic(
        &self,
        context: &ConversationContext,
        digest: &CatalogDigest,
    ) -> Option<IntentResult> {
        let message = context.last_user.to_lowercase();
        if message.trim().is_empty() {
            return None;
        }

        // Menu keywords outrank rejections, but negated phrases must not
        // feed the menu vocabulary they embed ("not hungry" contains
        // "hungry"): mask them out before the menu match.
        let positive = self.rules.without_negations(&message);

        if ClassifierRules::matches(&self.rules.menu_request, &positive) {
            let mood = self
                .rules
                .detect_mood(&context.last_user)
                .or(context.mood)
                .or(Some(Mood::Neutral));
            return Some(IntentResult {
                intent: Intent::MenuRecommendation,
                confidence: 0.9,
                mood,
                item: None,
            });
        }

        if ClassifierRules::matches(&self.rules.rejection, &message) {
            return Some(IntentResult {
                intent: Intent::Rejection,
                confidence: 0.9,
                mood: self.rules.detect_mood(&context.last_user),
                item: None,
            });
        }

        if ClassifierRules::matches(&self.rules.chat_only, &message) {
            return Some(IntentResult {
                intent: Intent::CasualChat,
                confidence: 0.8,
                mood: self.rules.detect_mood(&context.last_user),
                item: None,
            });
        }

        if context.last_assistant_suggested
            && ClassifierRules::matches(&self.rules.continuation, &message)
        {
            return Some(IntentResult {
                intent: Intent::MenuRecommendation,
                confidence: 0.8,
                mood: context.mood.or(Some(Mood::Neutral)),
                item: None,
            });
        }

        if let Some(name) = self.referenced_suggestion(context) {
            // A follow-up must resolve to a live catalog item; otherwise it
            // degrades to a plain recommendation turn.
            if digest.find_by_name(&name).is_some() {
                return Some(IntentResult {
                    intent: Intent::ItemFollowup,
                    confidence: 0.8,
                    mood: context.mood,
                    item: Some(name),
                });
            }
            return Some(IntentResult {
                intent: Intent::MenuRecommendation,
                confidence: 0.6,
                mood: context.mood.or(Some(Mood::Neutral)),
                item: None,
            });
        }

        // "Tell me more about that" right after a single recommendation
        // points at that item without naming it. Two or more recent
        // suggestions are ambiguous and stay with the model tier.
        if context.last_suggested.len() == 1
            && ClassifierRules::matches(&self.rules.followup_demonstrative, &message)
        {
            let name = context.last_suggested[0].clone();
            if digest.find_by_name(&name).is_some() {
                return Some(IntentResult {
                    intent: Intent::ItemFollowup,
                    confidence: 0.7,
                    mood: context.mood,
                    item: Some(name),
                });
            }
            return Some(IntentResult {
                intent: Intent::MenuRecommendation,
                confidence: 0.6,
                mood: context.mood.or(Some(Mood::Neutral)),
                item: None,
            });
        }

        None
    }

    /// A direct mention of an item the assistant already suggested.
    fn referenced_suggestion(&self, context: &ConversationContext) -> Option<String> {
        context
            .suggested
            .iter()
            .find(|name| context.last_user.contains(name.as_str()))
            .cloned()
    }

    /// Classification prompt + single near-deterministic completion call.
    /// Any failure (transport, timeout, unparseable answer) defaults to
    /// casual-chat with low confidence rather than failing the request.
    async fn model_tier(
        &self,
        context: &ConversationContext,
        llm: &dyn CompletionClient,
    ) -> IntentResult {
        let prompt = self.classification_prompt(context);
        let raw = match llm
            .complete(
                &prompt,
                CompletionParams {
                    temperature: 0.0,
                    max_output_tokens: CLASSIFY_MAX_OUTPUT_TOKENS,
                },
            )
            .await
        {
            Ok(text) => text,
            Err(err) => {
                warn!("classification call failed, defaulting to casual-chat: {}", err);
                return Self::fallback();
            }
        };

        let parsed: ModelClassification = match extract_json_object(&raw)
            .and_then(|json| serde_json::from_str(json).ok())
        {
            Some(parsed) => parsed,
            None => {
                warn!("classification answer unparseable, defaulting to casual-chat");
                return Self::fallback();
            }
        };

        let intent = parsed.intent.unwrap_or(Intent::CasualChat);
        let item = match intent {
            Intent::ItemFollowup => parsed.item.filter(|i| !i.is_empty()),
            _ => None,
        };
        // The closed taxonomy requires followups to name an item.
        let intent = if intent == Intent::ItemFollowup && item.is_none() {
            Intent::MenuRecommendation
        } else {
            intent
        };

        IntentResult {
            intent,
            confidence: parsed.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
            mood: parsed.mood.or(context.mood),
            item,
        }
    }

    fn fallback() -> IntentResult {
        IntentResult {
            intent: Intent::CasualChat,
            confidence: 0.2,
            mood: None,
            item: None,
        }
    }

    fn classification_prompt(&self, context: &ConversationContext) -> String {
        let transcript: Vec<String> = context
            .recent
            .iter()
            .map(|m| {
                let role = match m.role {
                    super::Role::User => "user",
                    super::Role::Assistant => "assistant",
                };
                format!("{}: {}", role, m.content)
            })
            .collect();
        let suggested: Vec<&str> = context.suggested.iter().map(String::as_str).collect();

        format!(
            "Classify the user's latest message in a cafe assistant conversation.\n\
             Categories: menu-recommendation, item-followup, casual-chat, rejection.\n\
             Moods (optional): wanting-cold, wanting-hot, hungry, thirsty, tired, happy, sad, stressed, neutral.\n\
             Items already suggested this conversation: [{}]\n\
             Conversation:\n{}\n\n\
             Answer with STRICT JSON only:\n\
             {{\"intent\":\"...\",\"mood\":\"...\",\"item\":\"...\",\"confidence\":0.0}}\n\
             Use \"item\" only for item-followup, naming one already-suggested item.",
            suggested.join(", "),
            transcript.join("\n"),
        )
    }
}
