use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::catalog::CatalogDigest;

use super::intent::Intent;
use super::ChatResponse;

/// Shown when a catalog item carries no price.
const PRICE_PLACEHOLDER: &str = "السعر غير محدد";

/// Grounded suggestion returned to the client, enriched from the catalog
/// digest rather than trusted from model output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub id: String,
    pub section: String,
    pub display_name: String,
    pub price: String,
    pub badge: String,
    pub images: Vec<String>,
}

/// Model output as claimed; every field defaulted so a partially well-formed
/// answer still yields whatever it did contain.
#[derive(Debug, Default, Deserialize)]
struct RawReply {
    #[serde(default)]
    reply: String,
    #[serde(default)]
    suggestions: Vec<RawSuggestion>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSuggestion {
    #[serde(default)]
    id: String,
    #[serde(default)]
    section: String,
}

#[derive(Debug)]
pub struct ValidationOutcome {
    pub response: ChatResponse,
    /// Display names of the suggestions that survived validation, for the
    /// session's dedup set.
    pub approved_names: Vec<String>,
}

/// Validates raw completion output against the catalog digest and the
/// classified intent, producing a response that is always safe to return.
pub struct OutputValidator {
    reply_max_chars: usize,
    max_suggestions: usize,
}

impl OutputValidator {
    pub fn new(reply_max_chars: usize, max_suggestions: usize) -> Self {
        Self {
            reply_max_chars: reply_max_chars.max(1),
            max_suggestions: max_suggestions.max(1),
        }
    }

    pub fn validate(
        &self,
        raw: Option<&str>,
        digest: &CatalogDigest,
        intent: Intent,
        already_suggested: &HashSet<String>,
    ) -> ValidationOutcome {
        let parsed = raw.and_then(|text| self.parse(text));
        let parsed = match parsed {
            Some(parsed) => parsed,
            None => {
                if raw.is_some() {
                    warn!(?intent, "unusable completion output, serving fallback reply");
                }
                return self.fallback(intent);
            }
        };

        // Only a recommendation turn may carry suggestions. A mismatch means
        // the model ignored its instructions, so nothing it said is trusted.
        if intent != Intent::MenuRecommendation && !parsed.suggestions.is_empty() {
            warn!(?intent, "suggestions on a non-recommendation turn, serving fallback");
            return self.fallback(intent);
        }

        let mut suggestions = Vec::new();
        let mut approved_names = Vec::new();
        let mut seen_ids: HashSet<String> = HashSet::new();
        for raw_suggestion in parsed.suggestions {
            if suggestions.len() >= self.max_suggestions {
                break;
            }
            if raw_suggestion.id.is_empty() || !seen_ids.insert(raw_suggestion.id.clone()) {
                continue;
            }
            // Claimed section first, then a cross-section search; the model
            // sometimes misfiles an item it otherwise got right.
            let found = digest
                .lookup(&raw_suggestion.section, &raw_suggestion.id)
                .map(|item| (raw_suggestion.section.as_str(), item))
                .or_else(|| digest.find_item(&raw_suggestion.id));
            let (section, item) = match found {
                Some(found) => found,
                None => {
                    debug!(id = %raw_suggestion.id, "dropped suggestion not in catalog");
                    continue;
                }
            };
            if already_suggested.contains(&item.ar_name) {
                debug!(id = %item.id, "dropped repeat suggestion");
                continue;
            }
            approved_names.push(item.ar_name.clone());
            suggestions.push(Suggestion {
                id: item.id.clone(),
                section: section.to_string(),
                display_name: item.ar_name.clone(),
                price: if item.price.is_empty() {
                    PRICE_PLACEHOLDER.to_string()
                } else {
                    item.price.clone()
                },
                badge: item.badge.clone(),
                images: item.images.clone(),
            });
        }

        let mut reply = parsed.reply.trim().to_string();
        if reply.chars().count() > self.reply_max_chars {
            reply = reply.chars().take(self.reply_max_chars).collect();
        }
        if reply.is_empty() {
            reply = fallback_reply(intent).to_string();
        }

        ValidationOutcome {
            response: ChatResponse {
                reply,
                suggestions,
            },
            approved_names,
        }
    }

    fn parse(&self, text: &str) -> Option<RawReply> {
        let stripped = strip_fences(text);
        let json = extract_json_object(stripped)?;
        serde_json::from_str(json).ok()
    }

    fn fallback(&self, intent: Intent) -> ValidationOutcome {
        ValidationOutcome {
            response: ChatResponse {
                reply: fallback_reply(intent).to_string(),
                suggestions: Vec::new(),
            },
            approved_names: Vec::new(),
        }
    }
}

fn fallback_reply(intent: Intent) -> &'static str {
    match intent {
        Intent::MenuRecommendation => "عندي كتير خيارات حلوة، شو رأيك تحكيلي أكتر شو عبالك؟",
        Intent::ItemFollowup => "سؤال حلو! احكيلي أكتر شو حابب تعرف عنه.",
        Intent::Rejection => "ولا يهمك، خدني براحتك! أنا هون إذا غيرت رأيك.",
        Intent::CasualChat => "أهلين فيك! احكيلي شو صاير معك اليوم.",
    }
}

/// Markdown code fences around the JSON body, with or without a language tag.
fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Extracts the first balanced top-level JSON object from free text.
///
/// Brace counting is string-literal aware so braces inside reply text do not
/// terminate the scan early.
pub(crate) fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match byte {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
