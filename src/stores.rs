use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::info;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::helpers::atomic_write;

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub(super) struct UserSettings {
    #[serde(default)]
    pub(super) expiry: Option<String>,
    #[serde(default)]
    pub(super) compression: Option<String>,
}

impl UserSettings {
    pub(super) fn normalized(expiry: Option<&str>, compression: Option<&str>) -> Self {
        UserSettings {
            expiry: normalize_field(expiry),
            compression: normalize_field(compression),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum SettingsField {
    Expiry,
    Compression,
}

pub(super) fn normalize_field(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
}

/// A user-keyed map mirrored to a JSON file. Every mutation is flushed before
/// the call returns; the in-memory copy only changes once the write succeeded.
struct JsonMapFile<V> {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, V>>,
}

impl<V> JsonMapFile<V>
where
    V: Serialize + DeserializeOwned + Clone,
{
    fn open(path: &Path, label: &str) -> Result<Self> {
        let entries = if path.exists() {
            let data = fs::read_to_string(path)
                .with_context(|| format!("read {} {}", label, path.display()))?;
            if data.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&data).with_context(|| format!("parse {}", label))?
            }
        } else {
            let empty = BTreeMap::new();
            save_map(path, &empty).with_context(|| format!("initialize {}", label))?;
            info!("created empty {} at {}", label, path.display());
            empty
        };
        Ok(JsonMapFile {
            path: path.to_path_buf(),
            entries: Mutex::new(entries),
        })
    }

    async fn get(&self, key: &str) -> Option<V> {
        self.entries.lock().await.get(key).cloned()
    }

    async fn upsert(&self, key: &str, value: V) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let mut next = entries.clone();
        next.insert(key.to_string(), value);
        save_map(&self.path, &next)?;
        *entries = next;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        if !entries.contains_key(key) {
            return Ok(false);
        }
        let mut next = entries.clone();
        next.remove(key);
        save_map(&self.path, &next)?;
        *entries = next;
        Ok(true)
    }
}

fn save_map<V: Serialize>(path: &Path, entries: &BTreeMap<String, V>) -> Result<()> {
    let data = serde_json::to_vec_pretty(entries).context("serialize store")?;
    atomic_write(path, &data)
}

fn user_key(user_id: u64) -> String {
    user_id.to_string()
}

pub(super) struct CredentialStore {
    inner: JsonMapFile<String>,
}

impl CredentialStore {
    pub(super) fn open(path: &Path) -> Result<Self> {
        Ok(CredentialStore {
            inner: JsonMapFile::open(path, "credentials")?,
        })
    }

    pub(super) async fn get(&self, user_id: u64) -> Option<String> {
        self.inner.get(&user_key(user_id)).await
    }

    pub(super) async fn set(&self, user_id: u64, token: &str) -> Result<()> {
        self.inner.upsert(&user_key(user_id), token.to_string()).await
    }

    pub(super) async fn delete(&self, user_id: u64) -> Result<bool> {
        self.inner.remove(&user_key(user_id)).await
    }
}

pub(super) struct SettingsStore {
    inner: JsonMapFile<UserSettings>,
}

impl SettingsStore {
    pub(super) fn open(path: &Path) -> Result<Self> {
        Ok(SettingsStore {
            inner: JsonMapFile::open(path, "settings")?,
        })
    }

    pub(super) async fn get(&self, user_id: u64) -> UserSettings {
        self.inner
            .get(&user_key(user_id))
            .await
            .unwrap_or_default()
    }

    pub(super) async fn set(
        &self,
        user_id: u64,
        expiry: Option<&str>,
        compression: Option<&str>,
    ) -> Result<UserSettings> {
        let settings = UserSettings::normalized(expiry, compression);
        self.inner.upsert(&user_key(user_id), settings.clone()).await?;
        Ok(settings)
    }

    pub(super) async fn update(
        &self,
        user_id: u64,
        field: SettingsField,
        value: Option<&str>,
    ) -> Result<UserSettings> {
        let current = self.get(user_id).await;
        let (expiry, compression) = match field {
            SettingsField::Expiry => (value, current.compression.as_deref()),
            SettingsField::Compression => (current.expiry.as_deref(), value),
        };
        self.set(user_id, expiry, compression).await
    }

    pub(super) async fn clear(&self, user_id: u64) -> Result<()> {
        self.inner.remove(&user_key(user_id)).await?;
        Ok(())
    }
}
