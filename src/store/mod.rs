//! Keyed string storage and the typed stores built on top of it.
//!
//! Everything user-visible persists through the `KvStore` trait: per-user
//! settings, conversation histories, keyword rules, and pending fragments.
//! Keys are namespaced with a fixed prefix per record family.

pub mod memory;
pub mod sqlite;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::bot::BotType;
use crate::message::Turn;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

const BOT_TYPE_KEY: &str = "botType";
const AUTH_KEY: &str = "auth";
const PROMPT_KEY: &str = "prompt";
const MODEL_KEY: &str = "model";
const TODO_KEY: &str = "todo";
const KEYWORD_KEY: &str = "keyword";
const MSG_KEY: &str = "msg";

/// Minimal key-value contract every backing store implements.
///
/// `set` with a TTL hands expiry to the store; expired entries read as absent.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, String>;
    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), String>;
    fn delete(&self, key: &str) -> Result<(), String>;
}

/// One keyword auto-reply rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordRule {
    pub keyword: String,
    pub reply: String,
}

/// Per-user settings: backend selection, auth flag, prompts, models, todos,
/// and the global keyword rule list.
#[derive(Clone)]
pub struct UserStore {
    kv: Arc<dyn KvStore>,
}

impl UserStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// The user's stored backend selection, if any and still a known type.
    pub fn bot_type(&self, user_id: &str) -> Option<BotType> {
        match self.kv.get(&format!("{BOT_TYPE_KEY}:{user_id}")) {
            Ok(v) => v.and_then(|s| BotType::parse(&s)),
            Err(e) => {
                warn!("bot type read failed for {user_id}: {e}");
                None
            }
        }
    }

    pub fn set_bot_type(&self, user_id: &str, bot: BotType) -> Result<(), String> {
        self.kv
            .set(&format!("{BOT_TYPE_KEY}:{user_id}"), bot.as_str(), None)
    }

    pub fn is_authenticated(&self, user_id: &str) -> bool {
        matches!(
            self.kv.get(&format!("{AUTH_KEY}:{user_id}")),
            Ok(Some(ref v)) if v == "1"
        )
    }

    pub fn set_authenticated(&self, user_id: &str) -> Result<(), String> {
        self.kv.set(&format!("{AUTH_KEY}:{user_id}"), "1", None)
    }

    pub fn prompt(&self, user_id: &str, bot: BotType) -> Option<String> {
        self.kv
            .get(&format!("{PROMPT_KEY}:{user_id}:{bot}"))
            .ok()
            .flatten()
    }

    pub fn set_prompt(&self, user_id: &str, bot: BotType, prompt: &str) -> Result<(), String> {
        self.kv
            .set(&format!("{PROMPT_KEY}:{user_id}:{bot}"), prompt, None)
    }

    pub fn clear_prompt(&self, user_id: &str, bot: BotType) -> Result<(), String> {
        self.kv.delete(&format!("{PROMPT_KEY}:{user_id}:{bot}"))
    }

    pub fn model(&self, user_id: &str, bot: BotType) -> Option<String> {
        self.kv
            .get(&format!("{MODEL_KEY}:{user_id}:{bot}"))
            .ok()
            .flatten()
    }

    pub fn set_model(&self, user_id: &str, bot: BotType, model: &str) -> Result<(), String> {
        self.kv
            .set(&format!("{MODEL_KEY}:{user_id}:{bot}"), model, None)
    }

    pub fn clear_model(&self, user_id: &str, bot: BotType) -> Result<(), String> {
        self.kv.delete(&format!("{MODEL_KEY}:{user_id}:{bot}"))
    }

    /// Todo entries, stored as a `|`-joined list.
    pub fn todo_list(&self, user_id: &str) -> Vec<String> {
        match self.kv.get(&format!("{TODO_KEY}:{user_id}")) {
            Ok(Some(raw)) if !raw.is_empty() => raw.split('|').map(str::to_string).collect(),
            _ => Vec::new(),
        }
    }

    pub fn add_todo(&self, user_id: &str, item: &str) -> Result<(), String> {
        let mut items = self.todo_list(user_id);
        items.push(item.to_string());
        self.kv
            .set(&format!("{TODO_KEY}:{user_id}"), &items.join("|"), None)
    }

    /// Remove the entry at `index` (1-based). Returns the removed item.
    pub fn del_todo(&self, user_id: &str, index: usize) -> Result<String, String> {
        let mut items = self.todo_list(user_id);
        if index == 0 || index > items.len() {
            return Err(format!("no todo item {index}"));
        }
        let removed = items.remove(index - 1);
        let key = format!("{TODO_KEY}:{user_id}");
        if items.is_empty() {
            self.kv.delete(&key)?;
        } else {
            self.kv.set(&key, &items.join("|"), None)?;
        }
        Ok(removed)
    }

    /// The global keyword rule list, in insertion order.
    pub fn keyword_rules(&self) -> Result<Vec<KeywordRule>, String> {
        match self.kv.get(KEYWORD_KEY)? {
            Some(raw) if !raw.is_empty() => {
                serde_json::from_str(&raw).map_err(|e| format!("bad keyword rules record: {e}"))
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Add a rule, or update the reply of an existing keyword.
    pub fn set_keyword(&self, keyword: &str, reply: &str) -> Result<(), String> {
        let mut rules = self.keyword_rules()?;
        match rules.iter_mut().find(|r| r.keyword == keyword) {
            Some(rule) => rule.reply = reply.to_string(),
            None => rules.push(KeywordRule {
                keyword: keyword.to_string(),
                reply: reply.to_string(),
            }),
        }
        let raw = serde_json::to_string(&rules).map_err(|e| e.to_string())?;
        self.kv.set(KEYWORD_KEY, &raw, None)
    }

    /// Remove a rule. Returns whether the keyword existed.
    pub fn del_keyword(&self, keyword: &str) -> Result<bool, String> {
        let mut rules = self.keyword_rules()?;
        let before = rules.len();
        rules.retain(|r| r.keyword != keyword);
        if rules.len() == before {
            return Ok(false);
        }
        if rules.is_empty() {
            self.kv.delete(KEYWORD_KEY)?;
        } else {
            let raw = serde_json::to_string(&rules).map_err(|e| e.to_string())?;
            self.kv.set(KEYWORD_KEY, &raw, None)?;
        }
        Ok(true)
    }
}

/// Conversation histories, keyed by (backend type, user), expiring on the
/// configured TTL. Each save atomically overwrites the whole sequence.
#[derive(Clone)]
pub struct HistoryStore {
    kv: Arc<dyn KvStore>,
    /// None = never expire.
    ttl: Option<Duration>,
}

impl HistoryStore {
    pub fn new(kv: Arc<dyn KvStore>, ttl: Option<Duration>) -> Self {
        Self { kv, ttl }
    }

    fn key(bot: BotType, user_id: &str) -> String {
        format!("{MSG_KEY}:{bot}:{user_id}")
    }

    /// Stored turns, or empty when absent/expired. A corrupt record reads as
    /// empty rather than poisoning the conversation.
    pub fn load(&self, bot: BotType, user_id: &str) -> Result<Vec<Turn>, String> {
        match self.kv.get(&Self::key(bot, user_id))? {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(turns) => Ok(turns),
                Err(e) => {
                    warn!("discarding corrupt history for {bot}:{user_id}: {e}");
                    Ok(Vec::new())
                }
            },
            None => Ok(Vec::new()),
        }
    }

    pub fn save(&self, bot: BotType, user_id: &str, turns: &[Turn]) -> Result<(), String> {
        let raw = serde_json::to_string(turns).map_err(|e| e.to_string())?;
        self.kv.set(&Self::key(bot, user_id), &raw, self.ttl)
    }

    pub fn clear(&self, bot: BotType, user_id: &str) -> Result<(), String> {
        self.kv.delete(&Self::key(bot, user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ContentPart, Turn};

    fn user_store() -> UserStore {
        UserStore::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_bot_type_round_trip() {
        let store = user_store();
        assert_eq!(store.bot_type("u1"), None);
        store.set_bot_type("u1", BotType::Gemini).unwrap();
        assert_eq!(store.bot_type("u1"), Some(BotType::Gemini));
    }

    #[test]
    fn test_auth_flag() {
        let store = user_store();
        assert!(!store.is_authenticated("u1"));
        store.set_authenticated("u1").unwrap();
        assert!(store.is_authenticated("u1"));
        assert!(!store.is_authenticated("u2"));
    }

    #[test]
    fn test_prompt_is_per_user_and_backend() {
        let store = user_store();
        store.set_prompt("u1", BotType::Gpt, "be terse").unwrap();
        assert_eq!(store.prompt("u1", BotType::Gpt).as_deref(), Some("be terse"));
        assert_eq!(store.prompt("u1", BotType::Claude), None);
        assert_eq!(store.prompt("u2", BotType::Gpt), None);
        store.clear_prompt("u1", BotType::Gpt).unwrap();
        assert_eq!(store.prompt("u1", BotType::Gpt), None);
    }

    #[test]
    fn test_todo_add_then_remove_leaves_empty() {
        let store = user_store();
        store.add_todo("u1", "buy milk").unwrap();
        assert_eq!(store.todo_list("u1"), vec!["buy milk"]);
        let removed = store.del_todo("u1", 1).unwrap();
        assert_eq!(removed, "buy milk");
        assert!(store.todo_list("u1").is_empty());
    }

    #[test]
    fn test_todo_remove_middle_keeps_others() {
        let store = user_store();
        store.add_todo("u1", "a").unwrap();
        store.add_todo("u1", "b").unwrap();
        store.add_todo("u1", "c").unwrap();
        store.del_todo("u1", 2).unwrap();
        assert_eq!(store.todo_list("u1"), vec!["a", "c"]);
    }

    #[test]
    fn test_todo_out_of_range() {
        let store = user_store();
        store.add_todo("u1", "a").unwrap();
        assert!(store.del_todo("u1", 0).is_err());
        assert!(store.del_todo("u1", 2).is_err());
    }

    #[test]
    fn test_keyword_rules_ordered_and_updatable() {
        let store = user_store();
        store.set_keyword("hi", "hello!").unwrap();
        store.set_keyword("movies", "__NOW_PLAYING__").unwrap();
        store.set_keyword("hi", "hey there").unwrap();

        let rules = store.keyword_rules().unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].keyword, "hi");
        assert_eq!(rules[0].reply, "hey there");
        assert_eq!(rules[1].reply, "__NOW_PLAYING__");
    }

    #[test]
    fn test_keyword_delete() {
        let store = user_store();
        store.set_keyword("hi", "hello!").unwrap();
        assert!(store.del_keyword("hi").unwrap());
        assert!(!store.del_keyword("hi").unwrap());
        assert!(store.keyword_rules().unwrap().is_empty());
    }

    #[test]
    fn test_history_round_trip() {
        let history = HistoryStore::new(Arc::new(MemoryStore::new()), None);
        let turns = vec![
            Turn::user(vec![
                ContentPart::image("http://cdn/pic.jpg", None),
                ContentPart::text("what is this?"),
            ]),
            Turn::assistant_text("a cat"),
        ];
        history.save(BotType::Gemini, "u1", &turns).unwrap();
        assert_eq!(history.load(BotType::Gemini, "u1").unwrap(), turns);
        // Other keys unaffected.
        assert!(history.load(BotType::Gpt, "u1").unwrap().is_empty());
        assert!(history.load(BotType::Gemini, "u2").unwrap().is_empty());
    }

    #[test]
    fn test_history_clear_is_idempotent() {
        let history = HistoryStore::new(Arc::new(MemoryStore::new()), None);
        history
            .save(BotType::Gpt, "u1", &[Turn::user_text("hi")])
            .unwrap();
        history.clear(BotType::Gpt, "u1").unwrap();
        assert!(history.load(BotType::Gpt, "u1").unwrap().is_empty());
        history.clear(BotType::Gpt, "u1").unwrap();
    }

    #[test]
    fn test_history_ttl_expiry() {
        let history = HistoryStore::new(
            Arc::new(MemoryStore::new()),
            Some(Duration::from_millis(20)),
        );
        history
            .save(BotType::Gpt, "u1", &[Turn::user_text("hi")])
            .unwrap();
        assert_eq!(history.load(BotType::Gpt, "u1").unwrap().len(), 1);
        std::thread::sleep(Duration::from_millis(40));
        assert!(history.load(BotType::Gpt, "u1").unwrap().is_empty());
    }

    #[test]
    fn test_history_corrupt_record_reads_empty() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        kv.set("msg:gpt:u1", "not json", None).unwrap();
        let history = HistoryStore::new(kv, None);
        assert!(history.load(BotType::Gpt, "u1").unwrap().is_empty());
    }
}
