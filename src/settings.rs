//! Runtime settings, read from `settings.json` next to the binary.

use serde::Deserialize;
use std::{fmt, fs, io, path::Path};

pub const SETTINGS_FILENAME: &str = "settings.json";

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub bind_address: String,
    pub port: u16,
    /// redb save file holding every document.
    pub save_file: String,
    /// Directory that backs the blob store.
    pub blob_dir: String,
    /// Prefix for blob download URLs. Blobs are served from `/files`.
    pub public_base_url: String,
    /// Stamped on every shared resource.
    pub college: String,
    /// Identity used when a request carries no `x-user` header.
    pub demo_user: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            bind_address: "0.0.0.0".to_string(),
            port: 3000,
            save_file: "skillswap.redb".to_string(),
            blob_dir: "uploads".to_string(),
            public_base_url: "http://localhost:3000/files".to_string(),
            college: "Chandigarh University".to_string(),
            demo_user: "Alex Johnson".to_string(),
        }
    }
}

impl Settings {
    pub fn load() -> Result<Settings, SettingsError> {
        Self::load_from(SETTINGS_FILENAME)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Settings, SettingsError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Settings, SettingsError> {
        serde_json::from_str(content).map_err(SettingsError::Parse)
    }

    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

// ── Errors ─────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SettingsError {
    Read(io::Error),
    Parse(serde_json::Error),
}

impl From<io::Error> for SettingsError {
    fn from(e: io::Error) -> Self {
        SettingsError::Read(e)
    }
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsError::Read(e) => write!(f, "cannot read {SETTINGS_FILENAME}: {e}"),
            SettingsError::Parse(e) => write!(f, "cannot parse {SETTINGS_FILENAME}: {e}"),
        }
    }
}

impl std::error::Error for SettingsError {}

// ── Tests ──────────────────────────────────────────────────────
