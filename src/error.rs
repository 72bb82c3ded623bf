//! Error taxonomy for the routing core.
//!
//! Every variant ultimately becomes a plain text reply on the normal outbound
//! channel; the webhook transport never sees a protocol-level error.

use std::fmt;

use crate::bot::BotType;

#[derive(Debug)]
pub enum BotError {
    /// Unauthenticated user attempted a restricted action.
    AuthRequired,
    /// The active backend cannot process the given message kind.
    Unsupported { bot: BotType },
    /// Network/quota/auth failure from an upstream API, after any retries.
    Upstream(String),
    /// History/cache backing store unreachable.
    Store(String),
}

impl fmt::Display for BotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BotError::AuthRequired => write!(f, "authentication required"),
            BotError::Unsupported { bot } => write!(f, "unsupported input for the {bot} backend"),
            BotError::Upstream(e) => write!(f, "upstream error: {e}"),
            BotError::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for BotError {}

/// Fixed reply for users who have not authenticated yet.
pub const FEATURE_IN_DEVELOPMENT: &str = "This feature is still under development.";

impl BotError {
    /// The text the user sees. Short and descriptive; never a stack trace.
    pub fn user_reply(&self) -> String {
        match self {
            BotError::AuthRequired => FEATURE_IN_DEVELOPMENT.to_string(),
            BotError::Unsupported { bot } => format!(
                "Your current {bot} backend only accepts text input. \
                 Switch with {} for image or voice understanding.",
                BotType::Gemini.switch_command(),
            ),
            BotError::Upstream(e) => format!("The request to the model failed: {e}"),
            BotError::Store(_) => "Storage is temporarily unavailable, please try again.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_names_active_backend_and_switch_command() {
        let reply = BotError::Unsupported { bot: BotType::Gpt }.user_reply();
        assert!(reply.contains("gpt"));
        assert!(reply.contains("/gemini"));
    }

    #[test]
    fn test_auth_required_is_fixed_text() {
        assert_eq!(BotError::AuthRequired.user_reply(), FEATURE_IN_DEVELOPMENT);
    }
}
