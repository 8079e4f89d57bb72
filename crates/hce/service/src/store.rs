//! Persisted settings: payment defaults and dynamic AID groups.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use hce_types::{AidGroup, HandlerRef, UserId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ServiceError, ServiceResult};

/// Dynamic AID groups registered at runtime by one handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicAids {
    pub handler: HandlerRef,
    pub groups: Vec<AidGroup>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub payment_defaults: BTreeMap<UserId, HandlerRef>,
    #[serde(default)]
    pub dynamic_aids: Vec<DynamicAids>,
}

impl Settings {
    pub fn dynamic_groups(&self, handler: &HandlerRef) -> Option<&[AidGroup]> {
        self.dynamic_aids
            .iter()
            .find(|d| &d.handler == handler)
            .map(|d| d.groups.as_slice())
    }

    /// Replace the dynamic groups of `handler`; an empty list removes them.
    pub fn set_dynamic_groups(&mut self, handler: HandlerRef, groups: Vec<AidGroup>) {
        self.dynamic_aids.retain(|d| d.handler != handler);
        if !groups.is_empty() {
            self.dynamic_aids.push(DynamicAids { handler, groups });
        }
    }
}

/// Key-value persistence for [`Settings`].
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn load(&self) -> ServiceResult<Settings>;

    async fn save(&self, settings: &Settings) -> ServiceResult<()>;
}

/// In-memory store for development and testing
#[derive(Debug, Default)]
pub struct InMemoryStore {
    settings: Mutex<Settings>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettingsStore for InMemoryStore {
    async fn load(&self) -> ServiceResult<Settings> {
        Ok(self.settings.lock().clone())
    }

    async fn save(&self, settings: &Settings) -> ServiceResult<()> {
        *self.settings.lock() = settings.clone();
        Ok(())
    }
}

/// Settings kept in a JSON file, replaced atomically on save.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl SettingsStore for JsonFileStore {
    async fn load(&self) -> ServiceResult<Settings> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No settings file, using defaults");
                Ok(Settings::default())
            }
            Err(e) => Err(ServiceError::Store(format!(
                "failed to read {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    async fn save(&self, settings: &Settings) -> ServiceResult<()> {
        let bytes = serde_json::to_vec_pretty(settings)?;
        let temp = self.temp_path();
        tokio::fs::write(&temp, &bytes).await?;
        tokio::fs::rename(&temp, &self.path).await?;
        info!(path = %self.path.display(), "Settings saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hce_types::{Category, HandlerId};

    fn settings() -> Settings {
        let handler = HandlerRef::new(HandlerId::new("com.pay", "Pay"), UserId(0));
        let mut settings = Settings::default();
        settings.payment_defaults.insert(UserId(0), handler.clone());
        settings.set_dynamic_groups(
            handler,
            vec![AidGroup::new(Category::Other, ["F0010203040506"])],
        );
        settings
    }

    #[tokio::test]
    async fn test_in_memory_roundtrip() {
        let store = InMemoryStore::new();
        assert_eq!(store.load().await.unwrap(), Settings::default());
        store.save(&settings()).await.unwrap();
        assert_eq!(store.load().await.unwrap(), settings());
    }

    #[tokio::test]
    async fn test_json_store_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("settings.json"));
        assert_eq!(store.load().await.unwrap(), Settings::default());
    }

    #[tokio::test]
    async fn test_json_store_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = JsonFileStore::new(&path);
        store.save(&settings()).await.unwrap();
        assert!(!dir.path().join("settings.json.tmp").exists());

        let reopened = JsonFileStore::new(&path);
        assert_eq!(reopened.load().await.unwrap(), settings());
    }

    #[test]
    fn test_empty_groups_remove_entry() {
        let mut settings = settings();
        let handler = settings.dynamic_aids[0].handler.clone();
        settings.set_dynamic_groups(handler.clone(), Vec::new());
        assert!(settings.dynamic_groups(&handler).is_none());
    }
}
