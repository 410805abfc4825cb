use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ArchiveError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub labels: LabelConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

/// The two mailbox labels that drive the message state machine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelConfig {
    #[serde(default = "default_pending_label")]
    pub pending: String,
    #[serde(default = "default_processed_label")]
    pub processed: String,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            pending: default_pending_label(),
            processed: default_processed_label(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Optional Drive folder the year hierarchy lives under. When set, year
    /// folders are created directly beneath it; no intermediate root folder
    /// is ever created.
    #[serde(default)]
    pub root_folder_id: Option<String>,
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            root_folder_id: None,
            ledger_path: default_ledger_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Upper bound on messages handled per invocation; keeps one run inside
    /// the external execution-time ceiling
    #[serde(default = "default_max_messages")]
    pub max_messages_per_run: u32,
    /// Attachments larger than this are skipped, never downloaded
    #[serde(default = "default_max_attachment_bytes")]
    pub max_attachment_bytes: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_messages_per_run: default_max_messages(),
            max_attachment_bytes: default_max_attachment_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_credentials_path")]
    pub credentials_path: PathBuf,
    #[serde(default = "default_token_path")]
    pub token_path: PathBuf,
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            credentials_path: default_credentials_path(),
            token_path: default_token_path(),
            redirect_uri: default_redirect_uri(),
        }
    }
}

fn default_pending_label() -> String {
    "claims/todo".to_string()
}

fn default_processed_label() -> String {
    "claims/processed".to_string()
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from(".mailvault/ledger.json")
}

fn default_max_messages() -> u32 {
    50
}

fn default_max_attachment_bytes() -> u64 {
    // Gmail's own attachment ceiling
    25 * 1024 * 1024
}

fn default_credentials_path() -> PathBuf {
    PathBuf::from("credentials.json")
}

fn default_token_path() -> PathBuf {
    PathBuf::from(".mailvault/token.json")
}

fn default_redirect_uri() -> String {
    "http://localhost:8080".to_string()
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        // If file doesn't exist, return default config with warning
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ArchiveError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| ArchiveError::Config(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                ArchiveError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| ArchiveError::Config(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| ArchiveError::Config(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.labels.pending.trim().is_empty() {
            return Err(ArchiveError::Config(
                "labels.pending must not be empty".to_string(),
            ));
        }

        if self.labels.processed.trim().is_empty() {
            return Err(ArchiveError::Config(
                "labels.processed must not be empty".to_string(),
            ));
        }

        if self.labels.pending == self.labels.processed {
            return Err(ArchiveError::Config(
                "labels.pending and labels.processed must differ".to_string(),
            ));
        }

        if self.run.max_messages_per_run == 0 {
            return Err(ArchiveError::Config(
                "run.max_messages_per_run must be at least 1".to_string(),
            ));
        }

        if self.run.max_attachment_bytes == 0 {
            return Err(ArchiveError::Config(
                "run.max_attachment_bytes must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
