//! Context correlator: pairs a user's text and image messages sent close
//! together in time into one multimodal request.
//!
//! At most one pending fragment exists per user. A fragment is consumed the
//! moment a complementary fragment arrives within the freshness window;
//! anything older reads as absent and is replaced.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::store::KvStore;

const PENDING_KEY: &str = "pending";

/// One unit of pending, not-yet-merged user input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FragmentKind {
    Text,
    Image,
}

#[derive(Debug, Serialize, Deserialize)]
struct PendingFragment {
    kind: FragmentKind,
    payload: String,
    recorded_at_ms: i64,
}

/// Outcome of offering a new fragment to the correlator.
#[derive(Debug, PartialEq)]
pub enum Merge {
    /// A fresh complementary fragment was waiting; both are combined and the
    /// pending entry is consumed.
    Merged { text: String, image: String },
    /// No merge; the new fragment is now the user's pending fragment.
    Pending,
}

pub struct Correlator {
    kv: Arc<dyn KvStore>,
    window: Duration,
}

impl Correlator {
    pub fn new(kv: Arc<dyn KvStore>, window: Duration) -> Self {
        Self { kv, window }
    }

    fn key(user_id: &str) -> String {
        format!("{PENDING_KEY}:{user_id}")
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Store a fragment as the user's pending fragment, replacing whatever
    /// was there. The store's TTL doubles as a safety net for lazy pruning.
    pub fn record(&self, user_id: &str, kind: FragmentKind, payload: &str) -> Result<(), String> {
        let fragment = PendingFragment {
            kind,
            payload: payload.to_string(),
            recorded_at_ms: Self::now_ms(),
        };
        let raw = serde_json::to_string(&fragment).map_err(|e| e.to_string())?;
        self.kv.set(&Self::key(user_id), &raw, Some(self.window))
    }

    /// Merge with a fresh complementary pending fragment, or record the new
    /// fragment as pending.
    pub fn try_merge(
        &self,
        user_id: &str,
        kind: FragmentKind,
        payload: &str,
    ) -> Result<Merge, String> {
        let key = Self::key(user_id);
        if let Some(raw) = self.kv.get(&key)? {
            if let Ok(pending) = serde_json::from_str::<PendingFragment>(&raw) {
                let age_ms = Self::now_ms() - pending.recorded_at_ms;
                let fresh = age_ms >= 0 && age_ms <= self.window.as_millis() as i64;
                if fresh && pending.kind != kind {
                    self.kv.delete(&key)?;
                    let (text, image) = match kind {
                        FragmentKind::Text => (payload.to_string(), pending.payload),
                        FragmentKind::Image => (pending.payload, payload.to_string()),
                    };
                    return Ok(Merge::Merged { text, image });
                }
            }
        }
        self.record(user_id, kind, payload)?;
        Ok(Merge::Pending)
    }

    /// Kind of the user's current pending fragment, if fresh. Test hook for
    /// the one-fragment-per-user invariant.
    pub fn pending_kind(&self, user_id: &str) -> Result<Option<FragmentKind>, String> {
        match self.kv.get(&Self::key(user_id))? {
            Some(raw) => {
                let pending: PendingFragment =
                    serde_json::from_str(&raw).map_err(|e| e.to_string())?;
                let age_ms = Self::now_ms() - pending.recorded_at_ms;
                if age_ms >= 0 && age_ms <= self.window.as_millis() as i64 {
                    Ok(Some(pending.kind))
                } else {
                    Ok(None)
                }
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn correlator(window: Duration) -> Correlator {
        Correlator::new(Arc::new(MemoryStore::new()), window)
    }

    #[test]
    fn test_text_then_image_merges_within_window() {
        let c = correlator(Duration::from_secs(15));
        assert_eq!(
            c.try_merge("u1", FragmentKind::Text, "what is this?").unwrap(),
            Merge::Pending
        );
        let merge = c
            .try_merge("u1", FragmentKind::Image, "http://cdn/pic.jpg")
            .unwrap();
        assert_eq!(
            merge,
            Merge::Merged {
                text: "what is this?".to_string(),
                image: "http://cdn/pic.jpg".to_string(),
            }
        );
        // Consumed: nothing pending afterwards.
        assert_eq!(c.pending_kind("u1").unwrap(), None);
    }

    #[test]
    fn test_image_then_text_merges_symmetrically() {
        let c = correlator(Duration::from_secs(15));
        c.try_merge("u1", FragmentKind::Image, "http://cdn/pic.jpg")
            .unwrap();
        let merge = c.try_merge("u1", FragmentKind::Text, "describe it").unwrap();
        assert_eq!(
            merge,
            Merge::Merged {
                text: "describe it".to_string(),
                image: "http://cdn/pic.jpg".to_string(),
            }
        );
    }

    #[test]
    fn test_stale_fragment_does_not_merge() {
        let c = correlator(Duration::from_millis(30));
        c.try_merge("u1", FragmentKind::Text, "what is this?").unwrap();
        std::thread::sleep(Duration::from_millis(50));
        // Too old: the image becomes the new pending fragment instead.
        assert_eq!(
            c.try_merge("u1", FragmentKind::Image, "http://cdn/pic.jpg").unwrap(),
            Merge::Pending
        );
        assert_eq!(c.pending_kind("u1").unwrap(), Some(FragmentKind::Image));
    }

    #[test]
    fn test_same_kind_replaces_pending() {
        let c = correlator(Duration::from_secs(15));
        c.try_merge("u1", FragmentKind::Text, "first").unwrap();
        assert_eq!(
            c.try_merge("u1", FragmentKind::Text, "second").unwrap(),
            Merge::Pending
        );
        // The second text is now the one that merges.
        let merge = c
            .try_merge("u1", FragmentKind::Image, "http://cdn/pic.jpg")
            .unwrap();
        assert_eq!(
            merge,
            Merge::Merged {
                text: "second".to_string(),
                image: "http://cdn/pic.jpg".to_string(),
            }
        );
    }

    #[test]
    fn test_users_are_independent() {
        let c = correlator(Duration::from_secs(15));
        c.try_merge("u1", FragmentKind::Text, "mine").unwrap();
        assert_eq!(
            c.try_merge("u2", FragmentKind::Image, "http://cdn/pic.jpg").unwrap(),
            Merge::Pending
        );
        assert_eq!(c.pending_kind("u1").unwrap(), Some(FragmentKind::Text));
        assert_eq!(c.pending_kind("u2").unwrap(), Some(FragmentKind::Image));
    }

    #[test]
    fn test_at_most_one_pending_fragment() {
        let c = correlator(Duration::from_secs(15));
        for i in 0..5 {
            c.try_merge("u1", FragmentKind::Text, &format!("t{i}")).unwrap();
        }
        // Only the latest survives; one image consumes it and leaves nothing.
        let merge = c.try_merge("u1", FragmentKind::Image, "pic").unwrap();
        assert_eq!(
            merge,
            Merge::Merged { text: "t4".to_string(), image: "pic".to_string() }
        );
        assert_eq!(c.pending_kind("u1").unwrap(), None);
    }
}
