//! Server configuration loaded from a JSON file at startup

use crate::error::ChatError;
use serde::Deserialize;
use std::path::Path;

/// Settings read from the config file.
///
/// Every field is optional in the file; missing ones fall back to the
/// defaults below.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Mixed into every trip hash
    pub salt: String,
    /// Nickname reserved for the administrator, empty disables it
    pub admin: String,
    /// Password required to join under the admin nickname
    pub password: Option<String>,
    /// Trip hashes granted moderator rights
    pub mods: Vec<String>,
    /// Take the client address from the `X-Forwarded-For` header
    pub x_forwarded_for: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6060,
            salt: String::new(),
            admin: String::new(),
            password: None,
            mods: Vec::new(),
            x_forwarded_for: false,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ChatError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|source| ChatError::Io {
            target: path.display().to_string(),
            source,
        })?;
        Self::from_json(&data)
    }

    pub fn from_json(data: &str) -> Result<Self, ChatError> {
        serde_json::from_str(data).map_err(ChatError::Config)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
