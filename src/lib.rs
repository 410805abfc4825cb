//! Mailvault
//!
//! A batch pipeline that scans a Gmail mailbox for messages carrying a
//! pending label, extracts their file attachments, archives them into a
//! Google Drive year hierarchy under a normalized filename, records what
//! has already been archived, and relabels each message as processed once
//! its attachments are handled.
//!
//! # Overview
//!
//! - **Authentication**: explicit OAuth2 token lifecycle with on-disk
//!   credential persistence and a refresh buffer
//! - **Message source**: label resolution, search, attachment extraction
//!   and download, label updates over the Gmail API
//! - **Archive store**: find-or-create year folders and single-shot
//!   uploads over the Drive API
//! - **Dedup ledger**: durable `"year/filename"` key set plus run reports
//!   and a trimmed error log
//! - **Pipeline**: the batch orchestrator with a continue-on-error policy
//!
//! # Example Usage
//!
//! ```no_run
//! use mailvault::auth::{self, SharedTokenProvider, TokenProvider};
//! use mailvault::config::Config;
//! use mailvault::drive::DriveArchiveStore;
//! use mailvault::gmail::GmailMessageSource;
//! use mailvault::hubs;
//! use mailvault::ledger::ArchiveLedger;
//! use mailvault::pipeline::ArchivePipeline;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("mailvault.toml".as_ref()).await?;
//!
//!     let secret = auth::load_application_secret(&config.auth.credentials_path).await?;
//!     let provider = Arc::new(TokenProvider::new(secret, &config.auth.token_path).await?);
//!     let (gmail, drive) = hubs::build(SharedTokenProvider(provider))?;
//!
//!     let ledger = ArchiveLedger::load(&config.archive.ledger_path).await?;
//!     let mut pipeline = ArchivePipeline::new(
//!         config,
//!         GmailMessageSource::new(gmail),
//!         DriveArchiveStore::new(drive),
//!         ledger,
//!     );
//!
//!     let report = pipeline.run_batch().await?;
//!     println!("{}", serde_json::to_string_pretty(&report)?);
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod drive;
pub mod error;
pub mod gmail;
pub mod hubs;
pub mod ledger;
pub mod models;
pub mod naming;
pub mod pipeline;

// Re-export commonly used types for convenience
pub use error::{ArchiveError, Result};

// Core data models
pub use models::{
    AttachmentRef, ErrorLogEntry, FolderRef, Message, Part, PipelineStatus, RunReport, RunStatus,
    UploadRecord,
};

// Service traits and production implementations
pub use drive::{ArchiveStore, DriveArchiveStore};
pub use gmail::{GmailMessageSource, MessageSource};

// Auth types
pub use auth::{SharedTokenProvider, StoredCredential, TokenProvider, TokenStatus};

// Config types
pub use config::{ArchiveConfig, AuthConfig, Config, LabelConfig, RunConfig};

// Ledger and pipeline
pub use ledger::ArchiveLedger;
pub use pipeline::ArchivePipeline;
