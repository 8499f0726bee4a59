use serde::{Deserialize, Serialize};

/// The router's guess at which declared choice the player meant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterHint {
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub confidence: f64,
}

impl RouterHint {
    pub fn new(value: &str, confidence: f64) -> Self {
        Self {
            value: Some(value.to_string()),
            confidence,
        }
    }
}

/// The router's intent label for the turn. Carried for diagnostics only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterIntent {
    pub label: String,
    #[serde(default)]
    pub confidence: f64,
}

/// The guardrail's verdict on the raw user message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuardrailVerdict {
    #[serde(default)]
    pub allowed: bool,
    #[serde(default)]
    pub sanitized_user_msg: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentMessage {
    pub role: String,
    pub content: String,
}

/// Everything the upstream router and guardrail hand the engine for a turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextEnvelope {
    pub session_id: Option<String>,
    pub turn: u32,
    pub language: Option<String>,
    pub user_msg_raw: String,
    pub recent_messages: Vec<RecentMessage>,
    pub rolling_summary: String,
    pub router_choice_hint: Option<RouterHint>,
    pub router_intent: Option<RouterIntent>,
    pub guardrail: Option<GuardrailVerdict>,
}

impl ContextEnvelope {
    pub fn with_message(user_msg: &str) -> Self {
        Self {
            user_msg_raw: user_msg.to_string(),
            ..Self::default()
        }
    }

    pub fn hint(mut self, value: &str, confidence: f64) -> Self {
        self.router_choice_hint = Some(RouterHint::new(value, confidence));
        self
    }

    /// The guardrail's sanitized message when it supplied a non-empty one,
    /// otherwise the raw message.
    pub fn effective_user_msg(&self) -> &str {
        self.guardrail
            .as_ref()
            .and_then(|g| g.sanitized_user_msg.as_deref())
            .filter(|msg| !msg.is_empty())
            .unwrap_or(self.user_msg_raw.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitized_message_wins_when_present() {
        let mut envelope = ContextEnvelope::with_message("raw text");
        envelope.guardrail = Some(GuardrailVerdict {
            allowed: true,
            sanitized_user_msg: Some("clean text".to_string()),
            reason: Some("OK".to_string()),
        });
        assert_eq!(envelope.effective_user_msg(), "clean text");
    }

    #[test]
    fn empty_sanitized_message_falls_back_to_raw() {
        let mut envelope = ContextEnvelope::with_message("raw text");
        envelope.guardrail = Some(GuardrailVerdict {
            sanitized_user_msg: Some(String::new()),
            ..GuardrailVerdict::default()
        });
        assert_eq!(envelope.effective_user_msg(), "raw text");
    }

    #[test]
    fn hint_defaults_confidence_to_zero() {
        let hint: RouterHint = serde_json::from_str(r#"{"value": "rush"}"#).unwrap();
        assert_eq!(hint.confidence, 0.0);
    }
}
