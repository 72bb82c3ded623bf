//! Keyword backend: static auto-replies over an ordered rule list.
//!
//! First matching rule wins. A reply equal to a dynamic marker triggers a
//! live movie category fetch; no match falls through to the configured
//! fallback (fixed message, or movie title lookup).

use async_trait::async_trait;
use tracing::warn;

use crate::bot::{BotType, ChatBackend, ChatRequest};
use crate::client::{MovieCategory, MovieClient};
use crate::config::{KeywordFallback, MatchMode};
use crate::error::BotError;
use crate::message::{Inbound, MsgKind};
use crate::store::UserStore;

pub struct KeywordBot {
    store: UserStore,
    mode: MatchMode,
    fallback: KeywordFallback,
    movie: Option<MovieClient>,
}

impl KeywordBot {
    pub fn new(
        store: UserStore,
        mode: MatchMode,
        fallback: KeywordFallback,
        movie: Option<MovieClient>,
    ) -> Self {
        Self {
            store,
            mode,
            fallback,
            movie,
        }
    }

    fn matches(&self, input: &str, keyword: &str) -> bool {
        match self.mode {
            MatchMode::Full => input == keyword,
            MatchMode::Partial => input.contains(keyword),
        }
    }

    /// Resolve a matched reply: dynamic markers become live lookups, anything
    /// else is returned verbatim. Lookup failures degrade to an inline error
    /// string rather than aborting the reply.
    async fn process_reply(&self, reply: &str) -> String {
        let Some(category) = MovieCategory::from_marker(reply) else {
            return reply.to_string();
        };
        let Some(movie) = &self.movie else {
            return "Movie lookups are not configured.".to_string();
        };
        match movie.by_category(category).await {
            Ok(listing) => listing,
            Err(e) => format!("Failed to fetch the movie listing: {e}"),
        }
    }

    async fn fallback_reply(&self, input: &str) -> String {
        match &self.fallback {
            KeywordFallback::Fixed(msg) => msg.clone(),
            KeywordFallback::MovieSearch => {
                let Some(movie) = &self.movie else {
                    return "Movie lookups are not configured.".to_string();
                };
                // Release check first; on error fall back to the plain search.
                match movie.has_regional_release(input).await {
                    Ok(true) => {
                        return format!(
                            "\"{input}\" is in theatrical release, please watch it through official channels."
                        );
                    }
                    Ok(false) => {}
                    Err(e) => warn!("release check failed: {e}"),
                }
                match movie.search(input).await {
                    Ok(listing) => listing,
                    Err(e) => format!("Movie search failed: {e}"),
                }
            }
        }
    }
}

#[async_trait]
impl ChatBackend for KeywordBot {
    fn bot_type(&self) -> BotType {
        BotType::Keyword
    }

    async fn chat(&self, req: ChatRequest<'_>) -> Result<String, BotError> {
        // A broken rule store degrades to the fallback, not to a dead reply.
        let rules = self.store.keyword_rules().unwrap_or_else(|e| {
            warn!("keyword rules unavailable: {e}");
            Vec::new()
        });

        for rule in &rules {
            if self.matches(req.text, &rule.keyword) {
                return Ok(self.process_reply(&rule.reply).await);
            }
        }
        Ok(self.fallback_reply(req.text).await)
    }

    async fn handle_media(&self, msg: &Inbound) -> Result<String, BotError> {
        match (msg.kind, msg.pic_url.as_deref()) {
            // Keyword mode replies to images with the raw hosted URL.
            (MsgKind::Image, Some(url)) => Ok(url.to_string()),
            _ => Ok("Keyword mode can't handle this message type.".to_string()),
        }
    }
}
