//! Connection settings and saved connection profiles
//!
//! Profiles live in ~/.config/sqlsession/config.json

use crate::db::DatabaseBackend;
use crate::error::{Result, SessionError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Credentials and target of a single database connection
#[derive(Serialize, Deserialize, Clone, PartialEq)]
pub struct ConnectionConfig {
    /// Profile label; empty for ad-hoc connections
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub backend: DatabaseBackend,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("name", &self.name)
            .field("backend", &self.backend)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("database", &self.database)
            .finish()
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            backend: DatabaseBackend::SqlServer,
            host: String::new(),
            port: 1433,
            user: String::new(),
            password: String::new(),
            database: "master".to_string(),
        }
    }
}

impl ConnectionConfig {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        database: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            name: String::new(),
            backend: DatabaseBackend::default(),
            host: host.into(),
            port,
            user: user.into(),
            password: password.into(),
            database: database.into(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_backend(mut self, backend: DatabaseBackend) -> Self {
        self.backend = backend;
        self
    }

    /// Read `<PREFIX>_HOST`, `_PORT`, `_DATABASE`, `_USER` and `_PASSWORD`,
    /// loading a `.env` file first when one exists
    pub fn from_env(prefix: &str, backend: DatabaseBackend) -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(prefix, backend, |key| std::env::var(key).ok())
    }

    fn from_lookup<F>(prefix: &str, backend: DatabaseBackend, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |suffix: &str| {
            let key = format!("{prefix}_{suffix}");
            lookup(&key).ok_or_else(|| SessionError::Config(format!("{key} must be set")))
        };
        let port = match lookup(&format!("{prefix}_PORT")) {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| SessionError::Config(format!("{prefix}_PORT is not a port: {raw:?}")))?,
            None => backend.default_port(),
        };

        Ok(Self {
            name: String::new(),
            backend,
            host: required("HOST")?,
            port,
            user: required("USER")?,
            password: lookup(&format!("{prefix}_PASSWORD")).unwrap_or_default(),
            database: required("DATABASE")?,
        })
    }

    /// Check if all required fields are filled
    pub fn is_valid(&self) -> bool {
        !self.host.trim().is_empty()
            && self.port > 0
            && !self.user.trim().is_empty()
            // password can be empty for trusted logins
            && !self.database.trim().is_empty()
    }
}

/// Saved connection profiles
#[derive(Serialize, Deserialize, Default, Clone, Debug)]
pub struct AppConfig {
    /// List of saved connections
    pub connections: Vec<ConnectionConfig>,
    /// Name of the last used connection
    pub last_connection: Option<String>,
}

impl AppConfig {
    /// Get the config file path (~/.config/sqlsession/config.json)
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| SessionError::Config("could not find config directory".to_string()))?
            .join("sqlsession");

        Ok(config_dir.join("config.json"))
    }

    /// Load configuration from the default path; a missing file is empty
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to the default path
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Add or update a connection (updates if name already exists)
    pub fn add_connection(&mut self, conn: ConnectionConfig) {
        if let Some(existing) = self.connections.iter_mut().find(|c| c.name == conn.name) {
            *existing = conn;
        } else {
            self.connections.push(conn);
        }
    }

    /// Remove a connection by name
    pub fn remove_connection(&mut self, name: &str) {
        self.connections.retain(|c| c.name != name);

        // Clear last_connection if it was the removed one
        if self.last_connection.as_deref() == Some(name) {
            self.last_connection = None;
        }
    }

    /// Get a connection by name
    pub fn get_connection(&self, name: &str) -> Option<&ConnectionConfig> {
        self.connections.iter().find(|c| c.name == name)
    }

    /// Set the last used connection
    pub fn set_last_connection(&mut self, name: &str) {
        self.last_connection = Some(name.to_string());
    }
}
