//! Durable storage for the session's credential record.
//!
//! The record is kept under four keys (`username`, `accessToken`,
//! `refreshToken`, `roles`) inside a pluggable [`CredentialBackend`].
//! All four are written and removed together; a record missing any of
//! them is reported as absent.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Namespace for the keyring service name and the credentials directory
pub const NAMESPACE: &str = "tokenwarden";

/// Credentials file name in the cache directory
const CREDENTIALS_FILE: &str = "credentials.json";

/// The four persisted fields of a credential record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialField {
    Username,
    AccessToken,
    RefreshToken,
    Roles,
}

impl CredentialField {
    pub const ALL: [CredentialField; 4] = [
        CredentialField::Username,
        CredentialField::AccessToken,
        CredentialField::RefreshToken,
        CredentialField::Roles,
    ];

    /// Storage key for this field
    pub fn key(self) -> &'static str {
        match self {
            CredentialField::Username => "username",
            CredentialField::AccessToken => "accessToken",
            CredentialField::RefreshToken => "refreshToken",
            CredentialField::Roles => "roles",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub username: String,
    pub access_token: String,
    pub refresh_token: String,
    pub roles: Vec<String>,
}

impl CredentialRecord {
    /// Build a record, keeping the first occurrence of each role.
    pub fn new<I, S>(
        username: impl Into<String>,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        roles: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for role in roles {
            let role = role.into();
            if !unique.contains(&role) {
                unique.push(role);
            }
        }
        Self {
            username: username.into(),
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            roles: unique,
        }
    }
}

/// Key/value persistence used by [`CredentialStore`].
pub trait CredentialBackend: Send + Sync {
    /// Read a single key, `None` when it was never written or was removed
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write every entry; implementations should make this a single write where possible
    fn set_many(&self, entries: &[(&str, String)]) -> Result<()>;

    /// Remove every key, ignoring keys that do not exist
    fn remove_many(&self, keys: &[&str]) -> Result<()>;
}

/// Process-local backend. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set_many(&self, new_entries: &[(&str, String)]) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        for (key, value) in new_entries {
            entries.insert((*key).to_string(), value.clone());
        }
        Ok(())
    }

    fn remove_many(&self, keys: &[&str]) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        for key in keys {
            entries.remove(*key);
        }
        Ok(())
    }
}

/// Stores all keys as one JSON object on disk.
///
/// Writes go to a sibling temp file which is then renamed over the
/// original, so readers never see a half-written file.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backend rooted in the per-user cache directory
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(CREDENTIALS_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = std::fs::read_to_string(&self.path)
            .context("Failed to read credentials file")?;
        match serde_json::from_str(&contents) {
            Ok(map) => Ok(map),
            Err(e) => {
                // A corrupt file means "not authenticated", not a hard failure
                warn!(error = %e, path = %self.path.display(), "Ignoring unreadable credentials file");
                Ok(BTreeMap::new())
            }
        }
    }

    fn write_map(&self, map: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create credentials directory")?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let contents = serde_json::to_string_pretty(map)?;
        std::fs::write(&tmp, contents).context("Failed to write credentials file")?;
        std::fs::rename(&tmp, &self.path).context("Failed to replace credentials file")?;
        Ok(())
    }
}

impl CredentialBackend for FileBackend {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_map()?.remove(key))
    }

    fn set_many(&self, entries: &[(&str, String)]) -> Result<()> {
        let mut map = self.read_map()?;
        for (key, value) in entries {
            map.insert((*key).to_string(), value.clone());
        }
        self.write_map(&map)
    }

    fn remove_many(&self, keys: &[&str]) -> Result<()> {
        let mut map = self.read_map()?;
        let before = map.len();
        for key in keys {
            map.remove(*key);
        }
        if map.is_empty() {
            if self.path.exists() {
                std::fs::remove_file(&self.path).context("Failed to remove credentials file")?;
            }
            return Ok(());
        }
        if map.len() != before {
            self.write_map(&map)?;
        }
        Ok(())
    }
}

/// One OS keychain entry per field, grouped under a service name.
///
/// The keychain has no multi-key transaction, so a write that fails part
/// way removes every field again rather than leave a mixed record behind.
pub struct KeyringBackend {
    entries: Vec<(&'static str, Entry)>,
}

impl KeyringBackend {
    pub fn new(service: &str) -> Result<Self> {
        let entries = CredentialField::ALL
            .iter()
            .map(|field| {
                Entry::new(service, field.key())
                    .map(|entry| (field.key(), entry))
                    .context("Failed to create keyring entry")
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { entries })
    }

    fn entry(&self, key: &str) -> Result<&Entry> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, entry)| entry)
            .ok_or_else(|| anyhow::anyhow!("Unknown credential key: {}", key))
    }

    fn write_all(&self, entries: &[(&str, String)]) -> Result<()> {
        for (key, value) in entries {
            self.entry(key)?
                .set_password(value)
                .context("Failed to store credential in keychain")?;
        }
        Ok(())
    }
}

impl CredentialBackend for KeyringBackend {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve credential from keychain"),
        }
    }

    fn set_many(&self, entries: &[(&str, String)]) -> Result<()> {
        let Err(e) = self.write_all(entries) else {
            return Ok(());
        };
        let keys: Vec<&str> = entries.iter().map(|(key, _)| *key).collect();
        if let Err(cleanup) = self.remove_many(&keys) {
            warn!(error = %cleanup, "Failed to roll back partial keychain write");
        }
        Err(e)
    }

    fn remove_many(&self, keys: &[&str]) -> Result<()> {
        for key in keys {
            match self.entry(key)?.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => {}
                Err(e) => {
                    return Err(e).context("Failed to delete credential from keychain");
                }
            }
        }
        Ok(())
    }
}

/// Typed access to the persisted credential record.
pub struct CredentialStore {
    backend: Box<dyn CredentialBackend>,
    // Serializes whole-record reads against writes
    lock: Mutex<()>,
}

impl CredentialStore {
    pub fn new(backend: impl CredentialBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            lock: Mutex::new(()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }

    /// Persist all four fields of the record
    pub fn save(&self, record: &CredentialRecord) -> Result<()> {
        let roles = serde_json::to_string(&record.roles).context("Failed to encode roles")?;
        let entries = [
            (CredentialField::Username.key(), record.username.clone()),
            (CredentialField::AccessToken.key(), record.access_token.clone()),
            (CredentialField::RefreshToken.key(), record.refresh_token.clone()),
            (CredentialField::Roles.key(), roles),
        ];
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.backend.set_many(&entries)
    }

    /// Read one stored field; backend failures read as absent
    pub fn get(&self, field: CredentialField) -> Option<String> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.read(field)
    }

    /// Stored roles, empty when missing or not a JSON string list
    pub fn roles(&self) -> Vec<String> {
        self.get(CredentialField::Roles)
            .and_then(|raw| parse_roles(&raw))
            .unwrap_or_default()
    }

    /// The complete record, or `None` if any field is missing
    pub fn load(&self) -> Option<CredentialRecord> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let username = self.read(CredentialField::Username)?;
        let access_token = self.read(CredentialField::AccessToken)?;
        let refresh_token = self.read(CredentialField::RefreshToken)?;
        let roles = self.read(CredentialField::Roles)?;

        let Some(roles) = parse_roles(&roles) else {
            debug!("Stored roles are not a string list, treating record as absent");
            return None;
        };

        Some(CredentialRecord {
            username,
            access_token,
            refresh_token,
            roles,
        })
    }

    /// Remove all four fields
    pub fn clear(&self) -> Result<()> {
        let keys = CredentialField::ALL.map(CredentialField::key);
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.backend.remove_many(&keys)
    }

    /// True when none of the four fields is stored
    pub fn is_empty(&self) -> bool {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        CredentialField::ALL.iter().all(|f| self.read(*f).is_none())
    }

    fn read(&self, field: CredentialField) -> Option<String> {
        match self.backend.get(field.key()) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, key = field.key(), "Failed to read stored credential");
                None
            }
        }
    }
}

fn parse_roles(raw: &str) -> Option<Vec<String>> {
    serde_json::from_str(raw).ok()
}
