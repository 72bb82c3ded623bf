//! Slash command dispatcher.
//!
//! Matching is case-sensitive: a slash token is a command only when it equals
//! a known name exactly, or is a known name followed by a space and an
//! argument. Anything else falls through to normal chat.

use std::sync::Arc;

use tracing::{info, warn};

use crate::bot::{BotType, Registry};
use crate::config::Config;
use crate::store::{HistoryStore, UserStore};

const HELP_TEXT: &str = "\
Commands:
/echo /gpt /claude /gemini /keyword /image - switch backend
/setPrompt <text> | /getPrompt | /clearPrompt - system prompt
/setModel <name> | /getModel | /clearModel - model override
/addTodo <item> | /todoList | /delTodo <number> - todo list
/clearMsg - clear conversation history
/setKeyword <keyword>|<reply> | /delKeyword <keyword> - keyword rules (admin)
/addme <password> - authenticate
/help - this message";

const STORE_UNAVAILABLE: &str = "Storage is temporarily unavailable, please try again.";

pub struct CommandDispatcher {
    store: UserStore,
    history: HistoryStore,
    registry: Arc<Registry>,
    auth_password: Option<String>,
    admin_users: Vec<String>,
}

impl CommandDispatcher {
    pub fn new(
        config: &Config,
        store: UserStore,
        history: HistoryStore,
        registry: Arc<Registry>,
    ) -> Self {
        Self {
            store,
            history,
            registry,
            auth_password: config.auth_password.clone(),
            admin_users: config.admin_users.clone(),
        }
    }

    /// The backend the user's settings commands apply to; same resolution as
    /// the router's.
    fn active_bot(&self, user_id: &str) -> BotType {
        self.registry
            .resolve(self.store.bot_type(user_id))
            .map(|(bot, _)| bot)
            .unwrap_or(BotType::Echo)
    }

    /// Execute `text` as a command. `None` means "not a command": route the
    /// message as normal chat. All side effects complete before returning.
    pub fn dispatch(&self, user_id: &str, text: &str) -> Option<String> {
        if !text.starts_with('/') {
            return None;
        }
        let (name, arg) = match text.split_once(' ') {
            Some((name, rest)) => (name, Some(rest.trim())),
            None => (text, None),
        };

        // Backend switch commands carry the backend name itself.
        if let Some(bot) = BotType::parse(&name[1..]) {
            return Some(self.switch_backend(user_id, bot));
        }

        // A bare known name is still a command; argument-taking ones answer
        // with usage instead of falling through to chat.
        let arg = arg.filter(|a| !a.is_empty());
        let reply = match name {
            "/setPrompt" => match arg {
                Some(a) => self.set_prompt(user_id, a),
                None => "Usage: /setPrompt <text>".to_string(),
            },
            "/getPrompt" => self.get_prompt(user_id),
            "/clearPrompt" => self.clear_prompt(user_id),
            "/setModel" => match arg {
                Some(a) => self.set_model(user_id, a),
                None => "Usage: /setModel <name>".to_string(),
            },
            "/getModel" => self.get_model(user_id),
            "/clearModel" => self.clear_model(user_id),
            "/todoList" => self.todo_list(user_id),
            "/addTodo" => match arg {
                Some(a) => self.add_todo(user_id, a),
                None => "Usage: /addTodo <item>".to_string(),
            },
            "/delTodo" => self.del_todo(user_id, arg.unwrap_or("")),
            "/clearMsg" => self.clear_history(user_id),
            "/addme" => self.authenticate(user_id, arg.unwrap_or("")),
            "/setKeyword" => match arg {
                Some(a) => self.set_keyword(user_id, a),
                None => "Usage: /setKeyword <keyword>|<reply>".to_string(),
            },
            "/delKeyword" => match arg {
                Some(a) => self.del_keyword(user_id, a),
                None => "Usage: /delKeyword <keyword>".to_string(),
            },
            "/help" => HELP_TEXT.to_string(),
            _ => return None,
        };
        Some(reply)
    }

    fn switch_backend(&self, user_id: &str, bot: BotType) -> String {
        if !self.registry.contains(bot) {
            return format!("The {bot} backend is not configured on this server.");
        }
        match self.store.set_bot_type(user_id, bot) {
            Ok(()) => {
                info!("{user_id} switched to {bot}");
                format!("Switched to the {bot} backend.")
            }
            Err(e) => {
                warn!("backend switch save failed for {user_id}: {e}");
                STORE_UNAVAILABLE.to_string()
            }
        }
    }

    fn set_prompt(&self, user_id: &str, prompt: &str) -> String {
        let bot = self.active_bot(user_id);
        if !bot.supports_prompt() {
            return format!("The {bot} backend does not support custom prompts.");
        }
        match self.store.set_prompt(user_id, bot, prompt) {
            Ok(()) => format!("Prompt saved for the {bot} backend."),
            Err(e) => {
                warn!("prompt save failed for {user_id}: {e}");
                STORE_UNAVAILABLE.to_string()
            }
        }
    }

    fn get_prompt(&self, user_id: &str) -> String {
        let bot = self.active_bot(user_id);
        match self.store.prompt(user_id, bot) {
            Some(prompt) => prompt,
            None => "No prompt set.".to_string(),
        }
    }

    fn clear_prompt(&self, user_id: &str) -> String {
        let bot = self.active_bot(user_id);
        match self.store.clear_prompt(user_id, bot) {
            Ok(()) => "Prompt cleared.".to_string(),
            Err(e) => {
                warn!("prompt clear failed for {user_id}: {e}");
                STORE_UNAVAILABLE.to_string()
            }
        }
    }

    fn set_model(&self, user_id: &str, model: &str) -> String {
        let bot = self.active_bot(user_id);
        match self.store.set_model(user_id, bot, model) {
            Ok(()) => format!("Model for the {bot} backend set to {model}."),
            Err(e) => {
                warn!("model save failed for {user_id}: {e}");
                STORE_UNAVAILABLE.to_string()
            }
        }
    }

    fn get_model(&self, user_id: &str) -> String {
        let bot = self.active_bot(user_id);
        match self.store.model(user_id, bot) {
            Some(model) => model,
            None => "No model override set.".to_string(),
        }
    }

    fn clear_model(&self, user_id: &str) -> String {
        let bot = self.active_bot(user_id);
        match self.store.clear_model(user_id, bot) {
            Ok(()) => "Model override cleared.".to_string(),
            Err(e) => {
                warn!("model clear failed for {user_id}: {e}");
                STORE_UNAVAILABLE.to_string()
            }
        }
    }

    fn todo_list(&self, user_id: &str) -> String {
        let items = self.store.todo_list(user_id);
        if items.is_empty() {
            return "Your todo list is empty.".to_string();
        }
        items
            .iter()
            .enumerate()
            .map(|(i, item)| format!("{}. {item}", i + 1))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn add_todo(&self, user_id: &str, item: &str) -> String {
        match self.store.add_todo(user_id, item) {
            Ok(()) => format!("Added \"{item}\" to your todo list."),
            Err(e) => {
                warn!("todo save failed for {user_id}: {e}");
                STORE_UNAVAILABLE.to_string()
            }
        }
    }

    fn del_todo(&self, user_id: &str, arg: &str) -> String {
        let Ok(index) = arg.parse::<usize>() else {
            return "Usage: /delTodo <number>".to_string();
        };
        match self.store.del_todo(user_id, index) {
            Ok(removed) => format!("Removed \"{removed}\"."),
            Err(e) => format!("Couldn't remove item {index}: {e}"),
        }
    }

    fn clear_history(&self, user_id: &str) -> String {
        let bot = self.active_bot(user_id);
        match self.history.clear(bot, user_id) {
            Ok(()) => "Conversation history cleared.".to_string(),
            Err(e) => {
                warn!("history clear failed for {user_id}: {e}");
                STORE_UNAVAILABLE.to_string()
            }
        }
    }

    fn authenticate(&self, user_id: &str, password: &str) -> String {
        let Some(expected) = &self.auth_password else {
            return "Authentication is not enabled.".to_string();
        };
        if self.store.is_authenticated(user_id) {
            return "You're already authenticated.".to_string();
        }
        if password != expected {
            return "Wrong password.".to_string();
        }
        match self.store.set_authenticated(user_id) {
            Ok(()) => {
                info!("{user_id} authenticated");
                "Welcome! Send /help to see what I can do.".to_string()
            }
            Err(e) => {
                warn!("auth save failed for {user_id}: {e}");
                STORE_UNAVAILABLE.to_string()
            }
        }
    }

    fn set_keyword(&self, user_id: &str, arg: &str) -> String {
        if !self.is_admin(user_id) {
            return "Only admins can manage keyword replies.".to_string();
        }
        let Some((keyword, reply)) = arg.split_once('|') else {
            return "Usage: /setKeyword <keyword>|<reply>".to_string();
        };
        let (keyword, reply) = (keyword.trim(), reply.trim());
        if keyword.is_empty() || reply.is_empty() {
            return "Usage: /setKeyword <keyword>|<reply>".to_string();
        }
        match self.store.set_keyword(keyword, reply) {
            Ok(()) => format!("Keyword \"{keyword}\" saved."),
            Err(e) => {
                warn!("keyword save failed: {e}");
                STORE_UNAVAILABLE.to_string()
            }
        }
    }

    fn del_keyword(&self, user_id: &str, keyword: &str) -> String {
        if !self.is_admin(user_id) {
            return "Only admins can manage keyword replies.".to_string();
        }
        match self.store.del_keyword(keyword.trim()) {
            Ok(true) => format!("Keyword \"{}\" removed.", keyword.trim()),
            Ok(false) => format!("No such keyword \"{}\".", keyword.trim()),
            Err(e) => {
                warn!("keyword delete failed: {e}");
                STORE_UNAVAILABLE.to_string()
            }
        }
    }

    fn is_admin(&self, user_id: &str) -> bool {
        self.admin_users.iter().any(|u| u == user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::{EchoBot, ImageBot};
    use crate::store::MemoryStore;
    use std::collections::HashMap;

    fn dispatcher(vars: &[(&str, &str)]) -> CommandDispatcher {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let config = Config::from_lookup(|key| map.get(key).cloned()).unwrap();

        let kv = Arc::new(MemoryStore::new());
        let store = UserStore::new(kv.clone());
        let history = HistoryStore::new(kv, config.history_ttl);
        let mut registry = Registry::new(config.default_bot);
        registry.register(Arc::new(EchoBot));
        registry.register(Arc::new(ImageBot));
        CommandDispatcher::new(&config, store, history, Arc::new(registry))
    }

    #[test]
    fn test_non_slash_text_is_not_a_command() {
        let d = dispatcher(&[]);
        assert_eq!(d.dispatch("u1", "hello"), None);
        assert_eq!(d.dispatch("u1", "what does /help do?"), None);
    }

    #[test]
    fn test_unknown_slash_token_falls_through() {
        let d = dispatcher(&[]);
        assert_eq!(d.dispatch("u1", "/frobnicate"), None);
        // Prefix of a known command is not the command.
        assert_eq!(d.dispatch("u1", "/helpme"), None);
    }

    #[test]
    fn test_bare_argument_command_replies_with_usage() {
        let d = dispatcher(&[]);
        assert!(d.dispatch("u1", "/setPrompt").unwrap().contains("Usage"));
        assert!(d.dispatch("u1", "/addTodo").unwrap().contains("Usage"));
        assert!(d.dispatch("u1", "/setModel ").unwrap().contains("Usage"));
    }

    #[test]
    fn test_matching_is_case_sensitive() {
        let d = dispatcher(&[]);
        assert!(d.dispatch("u1", "/help").is_some());
        assert_eq!(d.dispatch("u1", "/Help"), None);
        assert_eq!(d.dispatch("u1", "/HELP"), None);
    }

    #[test]
    fn test_switch_to_registered_backend() {
        let d = dispatcher(&[]);
        let reply = d.dispatch("u1", "/image").unwrap();
        assert!(reply.contains("image"));
        assert_eq!(d.store.bot_type("u1"), Some(BotType::Image));
    }

    #[test]
    fn test_switch_to_unconfigured_backend() {
        let d = dispatcher(&[]);
        let reply = d.dispatch("u1", "/gemini").unwrap();
        assert!(reply.contains("not configured"));
        assert_eq!(d.store.bot_type("u1"), None);
    }

    #[test]
    fn test_todo_list_read_is_idempotent() {
        let d = dispatcher(&[]);
        d.dispatch("u1", "/addTodo buy milk").unwrap();
        let first = d.dispatch("u1", "/todoList").unwrap();
        let second = d.dispatch("u1", "/todoList").unwrap();
        assert_eq!(first, second);
        assert_eq!(first, "1. buy milk");
    }

    #[test]
    fn test_todo_add_then_remove_leaves_empty() {
        let d = dispatcher(&[]);
        d.dispatch("u1", "/addTodo buy milk").unwrap();
        let reply = d.dispatch("u1", "/delTodo 1").unwrap();
        assert!(reply.contains("buy milk"));
        assert_eq!(d.dispatch("u1", "/todoList").unwrap(), "Your todo list is empty.");
    }

    #[test]
    fn test_del_todo_usage_errors() {
        let d = dispatcher(&[]);
        assert!(d.dispatch("u1", "/delTodo abc").unwrap().contains("Usage"));
        assert!(d.dispatch("u1", "/delTodo 3").unwrap().contains("Couldn't remove"));
    }

    #[test]
    fn test_prompt_rejected_on_promptless_backend() {
        // Default backend is echo: prompts unsupported.
        let d = dispatcher(&[]);
        let reply = d.dispatch("u1", "/setPrompt be nice").unwrap();
        assert!(reply.contains("does not support"));
    }

    #[test]
    fn test_addme_flow() {
        let d = dispatcher(&[("AUTH_PASSWORD", "sesame")]);
        assert_eq!(d.dispatch("u1", "/addme wrong").unwrap(), "Wrong password.");
        assert!(!d.store.is_authenticated("u1"));
        assert!(d.dispatch("u1", "/addme sesame").unwrap().contains("Welcome"));
        assert!(d.store.is_authenticated("u1"));
        assert_eq!(
            d.dispatch("u1", "/addme sesame").unwrap(),
            "You're already authenticated."
        );
    }

    #[test]
    fn test_addme_when_auth_disabled() {
        let d = dispatcher(&[]);
        assert_eq!(
            d.dispatch("u1", "/addme anything").unwrap(),
            "Authentication is not enabled."
        );
    }

    #[test]
    fn test_keyword_commands_are_admin_only() {
        let d = dispatcher(&[("ADMIN_USERS", "root")]);
        assert!(
            d.dispatch("u1", "/setKeyword hi|hello!")
                .unwrap()
                .contains("Only admins")
        );
        assert!(d.dispatch("root", "/setKeyword hi|hello!").unwrap().contains("saved"));
        assert_eq!(d.store.keyword_rules().unwrap().len(), 1);
        assert!(d.dispatch("root", "/delKeyword hi").unwrap().contains("removed"));
        assert!(d.dispatch("root", "/delKeyword hi").unwrap().contains("No such"));
    }

    #[test]
    fn test_set_keyword_usage() {
        let d = dispatcher(&[("ADMIN_USERS", "root")]);
        assert!(d.dispatch("root", "/setKeyword nodivider").unwrap().contains("Usage"));
    }

    #[test]
    fn test_clear_msg_reports_success() {
        let d = dispatcher(&[]);
        assert_eq!(
            d.dispatch("u1", "/clearMsg").unwrap(),
            "Conversation history cleared."
        );
    }
}
