//! Message router: the per-message state machine.
//!
//! Evaluation order is strict: auth gate, command dispatch, backend
//! resolution, per-kind handling. History is appended only after the reply is
//! computed, and persistence failures never block delivery.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::bot::{BotType, ChatBackend, ChatRequest, Registry};
use crate::command::CommandDispatcher;
use crate::config::Config;
use crate::correlate::{Correlator, FragmentKind, Merge};
use crate::error::{BotError, FEATURE_IN_DEVELOPMENT};
use crate::message::{ContentPart, Inbound, MsgKind, Turn};
use crate::store::{HistoryStore, UserStore};

const SUBSCRIBE_WELCOME: &str = "Thanks for subscribing! Send /help to see what I can do.";

pub struct Router {
    auth_password: Option<String>,
    correlate_all_text: bool,
    default_system_prompt: Option<String>,
    registry: Arc<Registry>,
    store: UserStore,
    history: HistoryStore,
    correlator: Correlator,
    commands: CommandDispatcher,
    /// Per-user mutexes serializing pending-fragment operations. Never held
    /// across a backend network call.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Router {
    pub fn new(
        config: &Config,
        registry: Arc<Registry>,
        store: UserStore,
        history: HistoryStore,
        correlator: Correlator,
        commands: CommandDispatcher,
    ) -> Self {
        Self {
            auth_password: config.auth_password.clone(),
            correlate_all_text: config.correlate_all_text,
            default_system_prompt: config.default_system_prompt.clone(),
            registry,
            store,
            history,
            correlator,
            commands,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Route one inbound message to a text reply.
    pub async fn handle(&self, msg: Inbound) -> String {
        let user = msg.sender_id.clone();

        // 1. Auth gate: with a shared secret configured, unauthenticated
        //    users may only run the authentication command.
        if self.auth_password.is_some() && !self.store.is_authenticated(&user) {
            if msg.kind == MsgKind::Text
                && (msg.content == "/addme" || msg.content.starts_with("/addme "))
            {
                if let Some(reply) = self.commands.dispatch(&user, &msg.content) {
                    return reply;
                }
            }
            info!("refusing unauthenticated message from {user}");
            return FEATURE_IN_DEVELOPMENT.to_string();
        }

        // 2. Commands short-circuit everything else.
        if msg.kind == MsgKind::Text {
            if let Some(reply) = self.commands.dispatch(&user, &msg.content) {
                return reply;
            }
        }

        // 3. Backend resolution: stored selection, else default, else echo.
        let Some((bot_type, backend)) = self.registry.resolve(self.store.bot_type(&user)) else {
            return "No chat backend is available.".to_string();
        };

        // 4. Per-kind handling.
        match msg.kind {
            MsgKind::Text => self.handle_text(bot_type, backend.as_ref(), &user, &msg).await,
            MsgKind::Image => self.handle_image(bot_type, backend.as_ref(), &user, &msg).await,
            MsgKind::Voice => {
                if backend.media_capable() {
                    match backend.handle_media(&msg).await {
                        Ok(reply) => format!("Voice interpretation:\n{reply}"),
                        Err(e) => {
                            warn!("voice handling failed for {user}: {e}");
                            e.user_reply()
                        }
                    }
                } else {
                    BotError::Unsupported { bot: bot_type }.user_reply()
                }
            }
            MsgKind::Event => match msg.content.as_str() {
                "subscribe" => SUBSCRIBE_WELCOME.to_string(),
                _ => String::new(),
            },
            MsgKind::Other => match backend.handle_media(&msg).await {
                Ok(reply) => reply,
                Err(e) => e.user_reply(),
            },
        }
    }

    async fn handle_text(
        &self,
        bot_type: BotType,
        backend: &dyn ChatBackend,
        user: &str,
        msg: &Inbound,
    ) -> String {
        let (text, image) = if backend.multimodal() {
            let lock = self.user_lock(user).await;
            let _guard = lock.lock().await;
            match self.correlator.try_merge(user, FragmentKind::Text, &msg.content) {
                Ok(Merge::Merged { text, image }) => {
                    info!("merged pending image for {user}");
                    (text, Some(image))
                }
                Ok(Merge::Pending) => (msg.content.clone(), None),
                Err(e) => {
                    warn!("correlator unavailable for {user}: {e}");
                    (msg.content.clone(), None)
                }
            }
        } else {
            // A fragment no backend will consume is not cached, unless the
            // knob says otherwise.
            if self.correlate_all_text {
                let lock = self.user_lock(user).await;
                let _guard = lock.lock().await;
                if let Err(e) = self.correlator.record(user, FragmentKind::Text, &msg.content) {
                    warn!("fragment record failed for {user}: {e}");
                }
            }
            (msg.content.clone(), None)
        };

        self.invoke_chat(bot_type, backend, user, &text, image.as_deref())
            .await
    }

    async fn handle_image(
        &self,
        bot_type: BotType,
        backend: &dyn ChatBackend,
        user: &str,
        msg: &Inbound,
    ) -> String {
        let Some(pic_url) = msg.pic_url.clone() else {
            return "Couldn't read the image message.".to_string();
        };

        if backend.multimodal() {
            let merged = {
                let lock = self.user_lock(user).await;
                let _guard = lock.lock().await;
                match self.correlator.try_merge(user, FragmentKind::Image, &pic_url) {
                    Ok(merge) => merge,
                    Err(e) => {
                        warn!("correlator unavailable for {user}: {e}");
                        Merge::Pending
                    }
                }
            };
            return match merged {
                Merge::Merged { text, image } => {
                    info!("merged pending text for {user}");
                    self.invoke_chat(bot_type, backend, user, &text, Some(&image))
                        .await
                }
                Merge::Pending => {
                    let reply = self
                        .invoke_chat(bot_type, backend, user, "", Some(&pic_url))
                        .await;
                    format!("Image interpretation:\n{reply}")
                }
            };
        }

        // Keyword and image modes answer images directly; every other
        // non-multimodal backend refuses without touching the correlator.
        if matches!(bot_type, BotType::Keyword | BotType::Image) {
            return match backend.handle_media(msg).await {
                Ok(reply) => reply,
                Err(e) => e.user_reply(),
            };
        }
        BotError::Unsupported { bot: bot_type }.user_reply()
    }

    /// Load context, call the backend, convert errors to reply text, and
    /// persist the new turns after the reply is computed.
    async fn invoke_chat(
        &self,
        bot_type: BotType,
        backend: &dyn ChatBackend,
        user: &str,
        text: &str,
        image_url: Option<&str>,
    ) -> String {
        let history = if backend.keeps_history() {
            self.history.load(bot_type, user).unwrap_or_else(|e| {
                warn!("history unavailable for {bot_type}:{user}: {e}");
                Vec::new()
            })
        } else {
            Vec::new()
        };

        let system_prompt = if bot_type.supports_prompt() {
            self.store
                .prompt(user, bot_type)
                .or_else(|| self.default_system_prompt.clone())
        } else {
            None
        };
        let model_override = self.store.model(user, bot_type);

        let req = ChatRequest {
            user_id: user,
            text,
            image_url,
            history: &history,
            system_prompt: system_prompt.as_deref(),
            model_override: model_override.as_deref(),
        };

        match backend.chat(req).await {
            Ok(reply) => {
                if backend.keeps_history() {
                    self.persist_turns(bot_type, user, history, text, image_url, &reply);
                }
                reply
            }
            Err(e) => {
                warn!("backend {bot_type} failed for {user}: {e}");
                e.user_reply()
            }
        }
    }

    /// Fire-and-forget history append; failures are logged, never surfaced.
    fn persist_turns(
        &self,
        bot_type: BotType,
        user: &str,
        mut turns: Vec<Turn>,
        text: &str,
        image_url: Option<&str>,
        reply: &str,
    ) {
        let mut parts = Vec::new();
        if let Some(url) = image_url {
            parts.push(ContentPart::image(url, None));
        }
        if !text.is_empty() {
            parts.push(ContentPart::text(text));
        }
        if parts.is_empty() {
            return;
        }
        turns.push(Turn::user(parts));
        turns.push(Turn::assistant_text(reply));

        let history = self.history.clone();
        let user = user.to_string();
        tokio::spawn(async move {
            if let Err(e) = history.save(bot_type, &user, &turns) {
                warn!("history save failed for {bot_type}:{user}: {e}");
            }
        });
    }

    async fn user_lock(&self, user: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(user.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::EchoBot;
    use crate::correlate::Correlator;
    use crate::store::MemoryStore;
    use std::collections::HashMap as Vars;

    fn build_router(vars: &[(&str, &str)]) -> Router {
        let map: Vars<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let config = Config::from_lookup(|key| map.get(key).cloned()).unwrap();

        let kv = Arc::new(MemoryStore::new());
        let store = UserStore::new(kv.clone());
        let history = HistoryStore::new(kv.clone(), config.history_ttl);
        let correlator = Correlator::new(kv, config.merge_window);

        let mut registry = Registry::new(config.default_bot);
        registry.register(Arc::new(EchoBot));
        let registry = Arc::new(registry);

        let commands = CommandDispatcher::new(
            &config,
            store.clone(),
            history.clone(),
            registry.clone(),
        );
        Router::new(&config, registry, store, history, correlator, commands)
    }

    #[tokio::test]
    async fn test_echo_round_trip() {
        let router = build_router(&[]);
        let reply = router.handle(Inbound::text("u1", "hello")).await;
        assert_eq!(reply, "hello");
    }

    #[tokio::test]
    async fn test_auth_gate_blocks_until_addme() {
        let router = build_router(&[("AUTH_PASSWORD", "sesame")]);

        assert_eq!(
            router.handle(Inbound::text("u1", "hello")).await,
            FEATURE_IN_DEVELOPMENT
        );
        // Non-text input is refused the same way.
        assert_eq!(
            router.handle(Inbound::image("u1", "http://cdn/p.jpg")).await,
            FEATURE_IN_DEVELOPMENT
        );
        // Wrong password replies from the auth command, not the gate text.
        assert_eq!(
            router.handle(Inbound::text("u1", "/addme nope")).await,
            "Wrong password."
        );
        assert!(
            router
                .handle(Inbound::text("u1", "/addme sesame"))
                .await
                .contains("Welcome")
        );
        // Subsequent messages skip the refusal branch.
        assert_eq!(router.handle(Inbound::text("u1", "hello")).await, "hello");
    }

    #[tokio::test]
    async fn test_command_short_circuits_backend() {
        let router = build_router(&[]);
        let reply = router.handle(Inbound::text("u1", "/help")).await;
        // Echo would have repeated the input verbatim.
        assert_ne!(reply, "/help");
        assert!(reply.contains("Commands:"));
    }

    #[tokio::test]
    async fn test_image_on_non_multimodal_backend_refused_without_caching() {
        let router = build_router(&[]);
        let reply = router.handle(Inbound::image("u1", "http://cdn/p.jpg")).await;
        assert!(reply.contains("echo"));
        assert!(reply.contains("/gemini"));
        // The correlator saw nothing: a later text cannot merge.
        assert_eq!(router.correlator.pending_kind("u1").unwrap(), None);
    }

    #[tokio::test]
    async fn test_voice_on_non_media_backend_refused() {
        let router = build_router(&[]);
        let reply = router.handle(Inbound::voice("u1", "media-1")).await;
        assert!(reply.contains("/gemini"));
    }

    #[tokio::test]
    async fn test_subscribe_event_gets_welcome() {
        let router = build_router(&[]);
        let mut msg = Inbound::text("u1", "subscribe");
        msg.kind = MsgKind::Event;
        assert_eq!(router.handle(msg).await, SUBSCRIBE_WELCOME);
    }
}
