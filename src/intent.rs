//! Contact-intent detection and contact-detail extraction.
//!
//! Everything here is local text inspection: no I/O, no allocation beyond the
//! lowercased copy of the input.

use std::sync::LazyLock;

use regex::Regex;

/// Phrases that mean the visitor wants a human to read their message.
pub const CONTACT_TRIGGERS: &[&str] = &[
    "contact you",
    "reach out",
    "send message",
    "talk to developer",
    "speak to admin",
    "feedback",
    "report issue",
    "report an issue",
    "suggestion",
    "contact admin",
    "contact the admin",
    "contact support",
    "talk to admin",
    "talk to the admin",
    "talk to a human",
    "speak to a person",
    "message you",
    "get in touch",
    "talk to you",
    "want to tell you",
    "need to contact",
    "reach admin",
];

/// Markers after which the rest of the text is the message meant for the admin.
const MESSAGE_INDICATORS: &[&str] =
    &["tell you", "message:", "say:", "feedback:", "report:", "contact you about"];

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\w.+-]+@[\w-]+(?:\.[\w-]+)+").expect("valid email regex"));

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:my name is|i am|this is)\s+([A-Za-z]+(?:\s[A-Za-z]+)?)")
        .expect("valid name regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub is_contact_intent: bool,
}

/// Decides whether a message asks for human escalation.
pub trait IntentClassifier: Send + Sync {
    fn classify(&self, message: &str) -> Classification;
}

/// Case-insensitive substring match against a fixed trigger list.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    triggers: Vec<String>,
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new(CONTACT_TRIGGERS.iter().copied())
    }
}

impl KeywordClassifier {
    pub fn new<'a>(triggers: impl IntoIterator<Item = &'a str>) -> Self {
        Self { triggers: triggers.into_iter().map(str::to_lowercase).collect() }
    }

    /// The first trigger found in `message`, if any.
    pub fn matched_trigger(&self, message: &str) -> Option<&str> {
        let lower = message.to_lowercase();
        self.triggers.iter().find(|t| lower.contains(t.as_str())).map(String::as_str)
    }
}

impl IntentClassifier for KeywordClassifier {
    fn classify(&self, message: &str) -> Classification {
        Classification { is_contact_intent: self.matched_trigger(message).is_some() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactInfo {
    pub email: Option<String>,
    pub name: Option<String>,
}

pub fn extract_contact_info(message: &str) -> ContactInfo {
    ContactInfo {
        email: EMAIL_RE.find(message).map(|m| m.as_str().to_string()),
        name: NAME_RE
            .captures(message)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string()),
    }
}

/// Text following the first message indicator, or the whole message.
pub fn extract_contact_message(message: &str) -> String {
    let lower = message.to_lowercase();
    for indicator in MESSAGE_INDICATORS {
        if let Some(pos) = lower.find(indicator) {
            let start = pos + indicator.len();
            // Lowercasing can shift byte offsets for non-ASCII input.
            if lower.len() == message.len() && message.is_char_boundary(start) {
                let rest = message[start..].trim();
                if !rest.is_empty() {
                    return rest.to_string();
                }
            }
        }
    }
    message.to_string()
}
