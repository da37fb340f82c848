use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use tokio::sync::RwLock;

/// Per-user trading configuration.
///
/// All fields except `last_signal_time` are owned by the settings path;
/// the scan path only ever touches the cooldown timestamps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UserProfile {
    pub trading_enabled: bool,
    pub testnet: bool,
    pub api_key: String,
    pub api_secret: String,
    pub leverage: u32,
    pub margin_usdt: f64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub trailing_enabled: bool,
    pub trailing_activation_pct: f64,
    pub trailing_rate_pct: f64,
    pub last_signal_time: HashMap<String, DateTime<Utc>>,
    pub volume_filter_enabled: bool,
    pub volume_multiplier: f64,
    pub blacklist: HashSet<String>,
}

impl Default for UserProfile {
    fn default() -> Self {
        Self {
            trading_enabled: false,
            testnet: false,
            api_key: String::new(),
            api_secret: String::new(),
            leverage: 10,
            margin_usdt: 50.0,
            stop_loss_pct: 2.0,
            take_profit_pct: 4.0,
            trailing_enabled: false,
            trailing_activation_pct: 1.5,
            trailing_rate_pct: 0.5,
            last_signal_time: HashMap::new(),
            volume_filter_enabled: false,
            volume_multiplier: 2.0,
            blacklist: HashSet::new(),
        }
    }
}

/// Whole-document JSON store for user profiles.
///
/// Both schedules (scan loop and settings loop) mutate profiles through
/// this accessor; every mutation rewrites the document while holding the
/// write lock, so concurrent writers cannot lose updates.
pub struct ProfileStore {
    path: PathBuf,
    profiles: RwLock<HashMap<i64, UserProfile>>,
}

impl ProfileStore {
    /// Load the document from disk; a missing file starts empty.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let profiles = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str(&raw)?
        } else {
            HashMap::new()
        };

        tracing::info!(
            "Loaded {} user profiles from {}",
            profiles.len(),
            path.display()
        );

        Ok(Self {
            path,
            profiles: RwLock::new(profiles),
        })
    }

    pub async fn get(&self, chat_id: i64) -> Option<UserProfile> {
        self.profiles.read().await.get(&chat_id).cloned()
    }

    /// Snapshot of every (chat, profile) pair for one scan pass
    pub async fn all(&self) -> Vec<(i64, UserProfile)> {
        self.profiles
            .read()
            .await
            .iter()
            .map(|(&id, p)| (id, p.clone()))
            .collect()
    }

    pub async fn contains(&self, chat_id: i64) -> bool {
        self.profiles.read().await.contains_key(&chat_id)
    }

    /// Create a profile with defaults if none exists yet
    pub async fn insert_default(&self, chat_id: i64) -> Result<UserProfile> {
        let mut profiles = self.profiles.write().await;
        let profile = profiles.entry(chat_id).or_default().clone();
        self.save_locked(&profiles)?;
        Ok(profile)
    }

    pub async fn remove(&self, chat_id: i64) -> Result<()> {
        let mut profiles = self.profiles.write().await;
        profiles.remove(&chat_id);
        self.save_locked(&profiles)
    }

    /// Mutate one profile and persist the whole document atomically with
    /// respect to other writers. No-op when the profile does not exist.
    pub async fn update<F>(&self, chat_id: i64, mutate: F) -> Result<bool>
    where
        F: FnOnce(&mut UserProfile),
    {
        let mut profiles = self.profiles.write().await;
        let Some(profile) = profiles.get_mut(&chat_id) else {
            return Ok(false);
        };
        mutate(profile);
        self.save_locked(&profiles)?;
        Ok(true)
    }

    /// Record a dispatched signal for (user, symbol).
    ///
    /// Timestamps only ever move forward; an older `now` (clock skew
    /// between schedules) never rewinds the cooldown.
    pub async fn record_signal(
        &self,
        chat_id: i64,
        symbol: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.update(chat_id, |profile| {
            let entry = profile
                .last_signal_time
                .entry(symbol.to_string())
                .or_insert(now);
            if *entry < now {
                *entry = now;
            }
        })
        .await
    }

    fn save_locked(&self, profiles: &HashMap<i64, UserProfile>) -> Result<()> {
        let raw = serde_json::to_string_pretty(profiles)?;
        std::fs::write(&self.path, raw)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> ProfileStore {
        let path = std::env::temp_dir().join(format!(
            "oibot-profiles-{}-{}.json",
            std::process::id(),
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0)
        ));
        let _ = std::fs::remove_file(&path);
        ProfileStore::load(path).unwrap()
    }

    #[tokio::test]
    async fn test_missing_file_starts_empty() {
        let store = temp_store();
        assert!(store.all().await.is_empty());
    }

    #[tokio::test]
    async fn test_insert_default_and_get() {
        let store = temp_store();
        store.insert_default(42).await.unwrap();

        let profile = store.get(42).await.unwrap();
        assert!(!profile.trading_enabled);
        assert_eq!(profile.leverage, 10);
        assert_eq!(profile.margin_usdt, 50.0);
        assert_eq!(profile.stop_loss_pct, 2.0);
        assert_eq!(profile.take_profit_pct, 4.0);
        assert_eq!(profile.volume_multiplier, 2.0);
        let _ = std::fs::remove_file(&store.path);
    }

    #[tokio::test]
    async fn test_roundtrip_through_disk() {
        let store = temp_store();
        store.insert_default(42).await.unwrap();
        store
            .update(42, |p| {
                p.trading_enabled = true;
                p.leverage = 25;
                p.blacklist.insert("DOGEUSDT".to_string());
            })
            .await
            .unwrap();
        let path = store.path.clone();
        drop(store);

        let reloaded = ProfileStore::load(&path).unwrap();
        let profile = reloaded.get(42).await.unwrap();
        assert!(profile.trading_enabled);
        assert_eq!(profile.leverage, 25);
        assert!(profile.blacklist.contains("DOGEUSDT"));
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_update_unknown_user_is_noop() {
        let store = temp_store();
        let touched = store.update(7, |p| p.leverage = 99).await.unwrap();
        assert!(!touched);
        let _ = std::fs::remove_file(&store.path);
    }

    #[tokio::test]
    async fn test_record_signal_is_monotonic() {
        let store = temp_store();
        store.insert_default(42).await.unwrap();

        let later = Utc::now();
        let earlier = later - chrono::Duration::hours(1);

        store.record_signal(42, "BTCUSDT", later).await.unwrap();
        store.record_signal(42, "BTCUSDT", earlier).await.unwrap();

        let profile = store.get(42).await.unwrap();
        assert_eq!(profile.last_signal_time["BTCUSDT"], later);
        let _ = std::fs::remove_file(&store.path);
    }

    #[tokio::test]
    async fn test_remove_user() {
        let store = temp_store();
        store.insert_default(42).await.unwrap();
        store.remove(42).await.unwrap();
        assert!(!store.contains(42).await);
        let _ = std::fs::remove_file(&store.path);
    }

    #[tokio::test]
    async fn test_legacy_document_fills_missing_fields() {
        // Documents written before the volume filter existed still load
        let path = std::env::temp_dir().join(format!(
            "oibot-legacy-{}.json",
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0)
        ));
        std::fs::write(
            &path,
            r#"{"42": {"trading_enabled": true, "leverage": 5}}"#,
        )
        .unwrap();

        let store = ProfileStore::load(&path).unwrap();
        let profile = store.get(42).await.unwrap();
        assert!(profile.trading_enabled);
        assert_eq!(profile.leverage, 5);
        assert_eq!(profile.volume_multiplier, 2.0);
        assert!(profile.blacklist.is_empty());
        let _ = std::fs::remove_file(&path);
    }
}
