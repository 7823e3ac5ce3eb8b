//! Persisted feature flags and statistics with change notifications.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

/// Upper bound kept on the blocked-element counter.
pub const MAX_BLOCKED_COUNT: u64 = 10_000;
/// Upper bound kept on the session counter.
pub const MAX_SESSION_COUNT: u64 = 1_000;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

/// The full settings bag: feature flags plus bounded statistics counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub shorts_blocker_enabled: bool,
    pub shorts_only_mode: bool,
    pub sponsor_block_enabled: bool,
    pub auto_repeat_enabled: bool,
    pub ad_blocker_enabled: bool,
    pub hide_end_screen_enabled: bool,
    pub hide_info_card_enabled: bool,
    pub hide_watermark_enabled: bool,
    pub hide_stories_enabled: bool,
    pub blocked_shorts_count: u64,
    pub session_count: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            shorts_blocker_enabled: true,
            shorts_only_mode: true,
            sponsor_block_enabled: false,
            auto_repeat_enabled: false,
            ad_blocker_enabled: true,
            hide_end_screen_enabled: false,
            hide_info_card_enabled: false,
            hide_watermark_enabled: false,
            hide_stories_enabled: false,
            blocked_shorts_count: 0,
            session_count: 1,
        }
    }
}

impl Settings {
    /// True when any short-form blocking mode is on.
    pub fn blocking_active(&self) -> bool {
        self.shorts_blocker_enabled || self.shorts_only_mode
    }

    /// True when any pass of the classifier has work to do.
    pub fn any_hiding_active(&self) -> bool {
        self.blocking_active()
            || self.ad_blocker_enabled
            || self.hide_end_screen_enabled
            || self.hide_info_card_enabled
            || self.hide_watermark_enabled
            || self.hide_stories_enabled
    }

    pub fn clamp_counters(&mut self) {
        self.blocked_shorts_count = self.blocked_shorts_count.min(MAX_BLOCKED_COUNT);
        self.session_count = self.session_count.min(MAX_SESSION_COUNT);
    }
}

/// Keys changed by a `set`, plus the resulting settings.
#[derive(Debug, Clone)]
pub struct SettingsDelta {
    pub changed: Vec<String>,
    pub settings: Settings,
}

pub type ChangeListener = Box<dyn Fn(&SettingsDelta) + Send + Sync>;

/// Key/value access to the settings bag. `get` and `set` speak JSON records
/// so callers can address individual camelCase keys the way the settings
/// panel does.
pub trait SettingsStore: Send + Sync {
    /// Returns the requested keys as a JSON record, or the whole bag when
    /// `keys` is `None`.
    fn get(&self, keys: Option<&[String]>) -> Value;

    /// Merges a partial JSON record into the bag. Unknown keys are ignored;
    /// type mismatches fail the whole call. Counters are clamped.
    fn set(&self, partial: &Value) -> Result<Settings, StorageError>;

    /// The current settings as a typed snapshot.
    fn snapshot(&self) -> Settings;

    /// Registers a listener invoked after every effective `set`.
    fn subscribe(&self, listener: ChangeListener);

    /// Adds to the blocked counter, clamped; returns the stored value.
    fn add_blocked(&self, count: u64) -> u64 {
        let current = self.snapshot().blocked_shorts_count;
        let next = current.saturating_add(count).min(MAX_BLOCKED_COUNT);
        let _ = self.set(&serde_json::json!({ "blockedShortsCount": next }));
        next
    }

    /// Bumps the session counter, clamped; returns the stored value.
    fn bump_session(&self) -> u64 {
        let next = (self.snapshot().session_count + 1).min(MAX_SESSION_COUNT);
        let _ = self.set(&serde_json::json!({ "sessionCount": next }));
        next
    }
}

fn merge_partial(
    current: &Settings,
    partial: &Value,
) -> Result<(Settings, Vec<String>), StorageError> {
    let Value::Object(incoming) = partial else {
        return Err(StorageError::InvalidValue(
            "settings update must be an object".to_string(),
        ));
    };

    let mut bag = serde_json::to_value(current)
        .map_err(|e| StorageError::InvalidValue(e.to_string()))?;
    let Value::Object(ref mut fields) = bag else {
        return Err(StorageError::InvalidValue(
            "settings did not serialize to an object".to_string(),
        ));
    };

    let mut changed = Vec::new();
    for (key, value) in incoming {
        match fields.get(key) {
            Some(existing) => {
                if existing != value {
                    changed.push(key.clone());
                }
                fields.insert(key.clone(), value.clone());
            }
            None => debug!(key = key.as_str(), "ignoring unrecognized settings key"),
        }
    }

    let mut next: Settings = serde_json::from_value(bag)
        .map_err(|e| StorageError::InvalidValue(e.to_string()))?;
    next.clamp_counters();
    Ok((next, changed))
}

fn keyed_record(settings: &Settings, keys: Option<&[String]>) -> Value {
    let bag = serde_json::to_value(settings).unwrap_or(Value::Null);
    match keys {
        None => bag,
        Some(keys) => {
            let mut record = serde_json::Map::new();
            if let Value::Object(fields) = bag {
                for key in keys {
                    if let Some(value) = fields.get(key) {
                        record.insert(key.clone(), value.clone());
                    }
                }
            }
            Value::Object(record)
        }
    }
}

/// In-memory store. The default for tests and for embeddings that manage
/// persistence themselves.
#[derive(Default)]
pub struct MemorySettingsStore {
    state: Mutex<Settings>,
    listeners: Mutex<Vec<ChangeListener>>,
}

impl MemorySettingsStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            state: Mutex::new(settings),
            listeners: Mutex::new(Vec::new()),
        }
    }

    fn notify(&self, delta: &SettingsDelta) {
        if delta.changed.is_empty() {
            return;
        }
        if let Ok(listeners) = self.listeners.lock() {
            for listener in listeners.iter() {
                listener(delta);
            }
        }
    }
}

impl SettingsStore for MemorySettingsStore {
    fn get(&self, keys: Option<&[String]>) -> Value {
        keyed_record(&self.snapshot(), keys)
    }

    fn set(&self, partial: &Value) -> Result<Settings, StorageError> {
        let delta = {
            let mut state = self
                .state
                .lock()
                .map_err(|e| StorageError::Unavailable(e.to_string()))?;
            let (next, changed) = merge_partial(&state, partial)?;
            *state = next.clone();
            SettingsDelta {
                changed,
                settings: next,
            }
        };
        self.notify(&delta);
        Ok(delta.settings)
    }

    fn snapshot(&self) -> Settings {
        self.state
            .lock()
            .map(|state| state.clone())
            .unwrap_or_default()
    }

    fn subscribe(&self, listener: ChangeListener) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push(listener);
        }
    }
}

/// JSON-file-backed store. Load failures fall back to defaults and persist
/// failures are logged; neither surfaces to callers.
pub struct JsonSettingsStore {
    path: PathBuf,
    inner: MemorySettingsStore,
}

impl JsonSettingsStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let settings = Self::load(&path);
        Self {
            path,
            inner: MemorySettingsStore::new(settings),
        }
    }

    fn load(path: &Path) -> Settings {
        if !path.exists() {
            return Settings::default();
        }
        match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<Settings>(&content) {
                Ok(mut settings) => {
                    settings.clamp_counters();
                    settings
                }
                Err(e) => {
                    warn!("settings file is malformed, using defaults: {}", e);
                    Settings::default()
                }
            },
            Err(e) => {
                warn!("settings file unreadable, using defaults: {}", e);
                Settings::default()
            }
        }
    }

    fn persist(&self, settings: &Settings) {
        if let Some(parent) = self.path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                warn!("could not create settings directory: {}", e);
                return;
            }
        }
        match serde_json::to_string_pretty(settings) {
            Ok(json) => {
                if let Err(e) = fs::write(&self.path, json) {
                    warn!("could not persist settings: {}", e);
                }
            }
            Err(e) => warn!("could not serialize settings: {}", e),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for JsonSettingsStore {
    fn get(&self, keys: Option<&[String]>) -> Value {
        self.inner.get(keys)
    }

    fn set(&self, partial: &Value) -> Result<Settings, StorageError> {
        let settings = self.inner.set(partial)?;
        self.persist(&settings);
        Ok(settings)
    }

    fn snapshot(&self) -> Settings {
        self.inner.snapshot()
    }

    fn subscribe(&self, listener: ChangeListener) {
        self.inner.subscribe(listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert!(settings.shorts_blocker_enabled);
        assert!(settings.shorts_only_mode);
        assert!(settings.ad_blocker_enabled);
        assert!(!settings.sponsor_block_enabled);
        assert!(!settings.auto_repeat_enabled);
        assert_eq!(settings.blocked_shorts_count, 0);
        assert_eq!(settings.session_count, 1);
    }

    #[test]
    fn test_set_merges_known_keys_and_ignores_unknown() {
        let store = MemorySettingsStore::default();
        let settings = store
            .set(&json!({ "sponsorBlockEnabled": true, "noSuchKey": 42 }))
            .unwrap();
        assert!(settings.sponsor_block_enabled);
        // the rest of the bag is untouched
        assert!(settings.shorts_blocker_enabled);
    }

    #[test]
    fn test_set_rejects_wrong_types() {
        let store = MemorySettingsStore::default();
        assert!(store.set(&json!({ "shortsBlockerEnabled": "yes" })).is_err());
        assert!(store.set(&json!("not an object")).is_err());
    }

    #[test]
    fn test_counter_clamps() {
        let store = MemorySettingsStore::default();
        let settings = store
            .set(&json!({ "blockedShortsCount": 999_999, "sessionCount": 5_000 }))
            .unwrap();
        assert_eq!(settings.blocked_shorts_count, MAX_BLOCKED_COUNT);
        assert_eq!(settings.session_count, MAX_SESSION_COUNT);

        // incremental adds clamp too
        let stored = store.add_blocked(50);
        assert_eq!(stored, MAX_BLOCKED_COUNT);
    }

    #[test]
    fn test_get_selected_keys() {
        let store = MemorySettingsStore::default();
        let record = store.get(Some(&["sessionCount".to_string()]));
        assert_eq!(record, json!({ "sessionCount": 1 }));

        let all = store.get(None);
        assert!(all.get("shortsBlockerEnabled").is_some());
    }

    #[test]
    fn test_listener_sees_changed_keys() {
        let store = MemorySettingsStore::default();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        store.subscribe(Box::new(move |delta| {
            assert_eq!(delta.changed, vec!["autoRepeatEnabled".to_string()]);
            seen_clone.fetch_add(1, Ordering::SeqCst);
        }));

        store.set(&json!({ "autoRepeatEnabled": true })).unwrap();
        // a no-op write does not notify
        store.set(&json!({ "autoRepeatEnabled": true })).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_json_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let store = JsonSettingsStore::open(&path);
        store.set(&json!({ "hideWatermarkEnabled": true })).unwrap();

        let reopened = JsonSettingsStore::open(&path);
        assert!(reopened.snapshot().hide_watermark_enabled);
    }

    #[test]
    fn test_json_store_malformed_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();

        let store = JsonSettingsStore::open(&path);
        assert_eq!(store.snapshot(), Settings::default());
    }
}
