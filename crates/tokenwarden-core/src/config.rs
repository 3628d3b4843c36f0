//! Application configuration management.
//!
//! This module handles loading and saving the configuration: the backend
//! base URL, the login and unauthorized redirect routes, the role granted
//! when a renewal reports none, the credential store to use, and the
//! table of protected routes.
//!
//! Configuration is stored at `~/.config/tokenwarden/config.json`.
//! `TOKENWARDEN_BASE_URL` and `TOKENWARDEN_STORE` override the file.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::auth::credentials::{
    CredentialStore, FileBackend, KeyringBackend, MemoryBackend, NAMESPACE,
};

/// Application name used for config/cache directory paths
const APP_NAME: &str = NAMESPACE;

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_BASE_URL: &str = "http://localhost:8080";

/// HTTP request timeout in seconds. Also bounds a renewal exchange.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

pub const ENV_BASE_URL: &str = "TOKENWARDEN_BASE_URL";
pub const ENV_STORE: &str = "TOKENWARDEN_STORE";

/// Where credentials are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    File,
    Keyring,
    Memory,
}

impl FromStr for StoreKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(StoreKind::File),
            "keyring" => Ok(StoreKind::Keyring),
            "memory" => Ok(StoreKind::Memory),
            other => Err(anyhow::anyhow!("Unknown credential store: {}", other)),
        }
    }
}

/// Access rule for one protected route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RouteAccess {
    /// `None` admits any authenticated session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_roles: Option<Vec<String>>,
}

impl RouteAccess {
    pub fn authenticated() -> Self {
        Self { allowed_roles: None }
    }

    pub fn roles(roles: &[&str]) -> Self {
        Self {
            allowed_roles: Some(roles.iter().map(|r| r.to_string()).collect()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub login_route: String,
    pub unauthorized_route: String,
    pub default_role: String,
    pub request_timeout_secs: u64,
    pub store: StoreKind,
    pub last_username: Option<String>,
    pub routes: BTreeMap<String, RouteAccess>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            login_route: "/login".to_string(),
            unauthorized_route: "/unauthorized".to_string(),
            default_role: "ROLE_GUEST".to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            store: StoreKind::default(),
            last_username: None,
            routes: default_routes(),
        }
    }
}

fn default_routes() -> BTreeMap<String, RouteAccess> {
    let mut routes = BTreeMap::new();
    for path in ["/dashboard", "/tokenInfo", "/activeContracts", "/logout"] {
        routes.insert(path.to_string(), RouteAccess::authenticated());
    }
    routes.insert("/super-admin".to_string(), RouteAccess::roles(&["ROLE_SUPERADMIN"]));
    routes.insert("/admin".to_string(), RouteAccess::roles(&["ROLE_ADMIN"]));
    routes.insert("/user".to_string(), RouteAccess::roles(&["ROLE_GUEST"]));
    routes
}

impl Config {
    /// Load from disk (defaults if missing), then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path).context("Failed to read config file")?;
            serde_json::from_str(&contents).context("Failed to parse config file")?
        } else {
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply overrides from a variable lookup (the process environment in `load`).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_BASE_URL).filter(|v| !v.trim().is_empty()) {
            self.base_url = url.trim().to_string();
        }
        if let Some(store) = lookup(ENV_STORE).filter(|v| !v.trim().is_empty()) {
            self.store = store.parse()?;
        }
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Join a path onto the base URL
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Open the configured credential store
    pub fn open_store(&self) -> Result<CredentialStore> {
        Ok(match self.store {
            StoreKind::File => CredentialStore::new(FileBackend::in_dir(&self.cache_dir()?)),
            StoreKind::Keyring => CredentialStore::new(KeyringBackend::new(NAMESPACE)?),
            StoreKind::Memory => CredentialStore::new(MemoryBackend::new()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_match_application_routes() {
        let config = Config::default();
        assert_eq!(config.login_route, "/login");
        assert_eq!(config.unauthorized_route, "/unauthorized");
        assert_eq!(config.default_role, "ROLE_GUEST");
        assert_eq!(
            config.routes.get("/admin"),
            Some(&RouteAccess::roles(&["ROLE_ADMIN"]))
        );
        assert_eq!(
            config.routes.get("/dashboard"),
            Some(&RouteAccess::authenticated())
        );
        assert!(!config.routes.contains_key("/login"));
    }

    #[test]
    fn test_partial_file_fills_in_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"base_url": "https://api.example.com", "store": "keyring"}"#)
                .unwrap();
        assert_eq!(config.base_url, "https://api.example.com");
        assert_eq!(config.store, StoreKind::Keyring);
        assert_eq!(config.request_timeout_secs, DEFAULT_REQUEST_TIMEOUT_SECS);
        assert_eq!(config.routes, default_routes());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_BASE_URL, "https://override.example.com/"),
            (ENV_STORE, "Memory"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.base_url, "https://override.example.com/");
        assert_eq!(config.store, StoreKind::Memory);
        assert_eq!(config.url("/api/auth/login"), "https://override.example.com/api/auth/login");
    }

    #[test]
    fn test_unknown_store_override_is_rejected() {
        let mut config = Config::default();
        let result = config.apply_overrides(|key| (key == ENV_STORE).then(|| "floppy".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_url_joining() {
        let config = Config::default();
        assert_eq!(config.url("branches"), "http://localhost:8080/branches");
        assert_eq!(config.url("/branches/1"), "http://localhost:8080/branches/1");
    }

    #[test]
    fn test_route_access_serialization_omits_missing_roles() {
        let json = serde_json::to_string(&RouteAccess::authenticated()).unwrap();
        assert_eq!(json, "{}");
        let parsed: RouteAccess = serde_json::from_str(r#"{"allowed_roles":["ROLE_ADMIN"]}"#).unwrap();
        assert_eq!(parsed, RouteAccess::roles(&["ROLE_ADMIN"]));
    }
}
