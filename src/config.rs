//! Environment configuration, read once at startup and treated as immutable.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::bot::BotType;

/// Default conversation history TTL when MSG_TTL_MINUTES is absent or invalid.
const DEFAULT_TTL_MINUTES: u64 = 30;

/// Default freshness window for text/image fragment merging.
const DEFAULT_MERGE_WINDOW_SECS: u64 = 15;

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// A value failed validation.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(msg) => write!(f, "config validation error: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// How the keyword backend matches rules against input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// Input must equal the keyword exactly.
    Full,
    /// Input contains the keyword.
    Partial,
}

/// What the keyword backend does when no rule matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeywordFallback {
    /// Reply with a fixed message.
    Fixed(String),
    /// Treat the input as a movie title and run a live lookup.
    MovieSearch,
}

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
}

#[derive(Debug)]
pub struct Config {
    /// Backend used when a user has no (valid) stored selection.
    pub default_bot: BotType,
    /// Shared secret for /addme. None disables the authentication gate.
    pub auth_password: Option<String>,
    /// User IDs allowed to manage keyword rules.
    pub admin_users: Vec<String>,
    /// Conversation history TTL. None = never expire (MSG_TTL_MINUTES=0).
    pub history_ttl: Option<Duration>,
    /// Maximum age of a pending fragment for text/image merging.
    pub merge_window: Duration,
    /// Record pending text fragments even for non-multimodal backends.
    pub correlate_all_text: bool,
    pub keyword_match_mode: MatchMode,
    pub keyword_fallback: KeywordFallback,
    pub default_system_prompt: Option<String>,
    /// Max output tokens for model calls. None = provider default.
    pub max_output_tokens: Option<u32>,
    pub openai: Option<OpenAiConfig>,
    pub anthropic: Option<AnthropicConfig>,
    pub gemini: Option<GeminiConfig>,
    pub tmdb_api_key: Option<String>,
    /// Platform app credentials for the media download API.
    pub app_id: Option<String>,
    pub app_secret: Option<String>,
    /// Path to the sqlite store. None = in-memory store.
    pub store_path: Option<PathBuf>,
    pub listen_addr: SocketAddr,
    /// Directory for state files (logs).
    pub data_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable lookup (injectable for tests).
    pub fn from_lookup<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get_nonempty = |key: &str| get(key).filter(|v| !v.is_empty());

        // Unknown or absent BOT_TYPE falls back to echo rather than failing.
        let default_bot = get_nonempty("BOT_TYPE")
            .and_then(|v| BotType::parse(&v))
            .unwrap_or(BotType::Echo);

        let admin_users = get_nonempty("ADMIN_USERS")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        // 0 means "never expire"; negative or unparsable values fall back to
        // the default rather than disabling expiry.
        let history_ttl = match get_nonempty("MSG_TTL_MINUTES").map(|v| v.parse::<i64>()) {
            Some(Ok(0)) => None,
            Some(Ok(m)) if m > 0 => Some(Duration::from_secs(m as u64 * 60)),
            _ => Some(Duration::from_secs(DEFAULT_TTL_MINUTES * 60)),
        };

        let merge_window = get_nonempty("MERGE_WINDOW_SECS")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|&s| s > 0)
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_MERGE_WINDOW_SECS));

        let correlate_all_text = matches!(
            get_nonempty("CORRELATE_ALL_TEXT").as_deref(),
            Some("1") | Some("true")
        );

        let keyword_match_mode = match get_nonempty("KEYWORD_MATCH_MODE").as_deref() {
            Some("full") => MatchMode::Full,
            _ => MatchMode::Partial,
        };

        let keyword_fallback = match get_nonempty("KEYWORD_FALLBACK") {
            Some(msg) => KeywordFallback::Fixed(msg),
            None => KeywordFallback::MovieSearch,
        };

        let max_output_tokens = get_nonempty("MAX_OUTPUT_TOKENS").and_then(|v| v.parse().ok());

        let openai = get_nonempty("OPENAI_API_KEY").map(|api_key| OpenAiConfig {
            api_key,
            base_url: get_nonempty("OPENAI_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model: get_nonempty("OPENAI_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
        });

        let anthropic = get_nonempty("ANTHROPIC_API_KEY").map(|api_key| AnthropicConfig {
            api_key,
            model: get_nonempty("ANTHROPIC_MODEL")
                .unwrap_or_else(|| "claude-haiku-4-5-20251001".to_string()),
        });

        let gemini = get_nonempty("GEMINI_API_KEY").map(|api_key| GeminiConfig {
            api_key,
            model: get_nonempty("GEMINI_MODEL").unwrap_or_else(|| "gemini-2.0-flash".to_string()),
        });

        let listen_addr = get_nonempty("LISTEN_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8080".to_string())
            .parse::<SocketAddr>()
            .map_err(|e| {
                ConfigError::Validation(format!("LISTEN_ADDR is not a socket address: {e}"))
            })?;

        let app_id = get_nonempty("APP_ID");
        let app_secret = get_nonempty("APP_SECRET");
        if app_id.is_some() != app_secret.is_some() {
            return Err(ConfigError::Validation(
                "APP_ID and APP_SECRET must be set together".into(),
            ));
        }

        Ok(Self {
            default_bot,
            auth_password: get_nonempty("AUTH_PASSWORD"),
            admin_users,
            history_ttl,
            merge_window,
            correlate_all_text,
            keyword_match_mode,
            keyword_fallback,
            default_system_prompt: get_nonempty("DEFAULT_SYSTEM_PROMPT"),
            max_output_tokens,
            openai,
            anthropic,
            gemini,
            tmdb_api_key: get_nonempty("TMDB_API_KEY"),
            app_id,
            app_secret,
            store_path: get_nonempty("STORE_PATH").map(PathBuf::from),
            listen_addr,
            data_dir: get_nonempty("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
        })
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admin_users.iter().any(|u| u == user_id)
    }
}
