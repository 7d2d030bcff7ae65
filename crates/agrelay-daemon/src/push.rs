use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Mutex;

/// One Web Push subscription as handed over by the browser
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushSubscription {
    pub endpoint: String,
    /// Browser-provided crypto material, kept opaque
    pub keys: Value,
    pub created_at: DateTime<Utc>,
}

/// File-backed store of push subscriptions. Delivery is out of the
/// daemon's scope; this only keeps the endpoints clients registered.
pub struct PushStore {
    path: PathBuf,
    subscriptions: Mutex<Vec<PushSubscription>>,
}

impl PushStore {
    pub fn open(data_dir: &std::path::Path) -> Result<Self> {
        let path = data_dir.join("push-subscriptions.json");
        let subscriptions = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_default(),
            Err(_) => Vec::new(),
        };
        Ok(Self {
            path,
            subscriptions: Mutex::new(subscriptions),
        })
    }

    pub fn list(&self) -> Vec<PushSubscription> {
        self.subscriptions.lock().unwrap().clone()
    }

    /// Add or refresh a subscription; dedup is by endpoint
    pub fn add(&self, endpoint: String, keys: Value) -> Result<()> {
        let mut subs = self.subscriptions.lock().unwrap();
        subs.retain(|s| s.endpoint != endpoint);
        subs.push(PushSubscription {
            endpoint,
            keys,
            created_at: Utc::now(),
        });
        self.persist(&subs)
    }

    /// Remove by endpoint; unknown endpoints are a no-op
    pub fn remove(&self, endpoint: &str) -> Result<bool> {
        let mut subs = self.subscriptions.lock().unwrap();
        let before = subs.len();
        subs.retain(|s| s.endpoint != endpoint);
        let removed = subs.len() != before;
        self.persist(&subs)?;
        Ok(removed)
    }

    fn persist(&self, subs: &[PushSubscription]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(subs)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn add_list_remove_round_trip() {
        let tmp = TempDir::new().unwrap();
        let store = PushStore::open(tmp.path()).unwrap();

        store
            .add(
                "https://push.example/one".to_string(),
                serde_json::json!({"p256dh": "k", "auth": "a"}),
            )
            .unwrap();
        assert_eq!(store.list().len(), 1);

        // Re-adding the same endpoint replaces rather than duplicates
        store
            .add(
                "https://push.example/one".to_string(),
                serde_json::json!({"p256dh": "k2", "auth": "a2"}),
            )
            .unwrap();
        assert_eq!(store.list().len(), 1);

        assert!(store.remove("https://push.example/one").unwrap());
        assert!(!store.remove("https://push.example/one").unwrap());
        assert!(store.list().is_empty());
    }

    #[test]
    fn store_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let store = PushStore::open(tmp.path()).unwrap();
            store
                .add("https://push.example/two".to_string(), serde_json::json!({}))
                .unwrap();
        }
        let store = PushStore::open(tmp.path()).unwrap();
        assert_eq!(store.list().len(), 1);
    }
}
