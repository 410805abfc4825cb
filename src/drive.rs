//! Archive-side API client
//!
//! Find-or-create folder resolution and single-shot multipart uploads over
//! the Drive API. There is no resumable upload support: attachments above
//! the configured size ceiling are never downloaded in the first place, so
//! upload size is bounded by that ceiling.

use async_trait::async_trait;
use google_drive3::api::File;
use google_drive3::DriveHub;
use std::io::Cursor;
use tracing::{debug, info};

use crate::error::{ArchiveError, Result};
use crate::models::FolderRef;

const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";
const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// Type alias for the Drive hub to simplify signatures
pub type ArchiveHub = DriveHub<
    google_drive3::hyper_rustls::HttpsConnector<
        google_drive3::hyper_util::client::legacy::connect::HttpConnector,
    >,
>;

/// File-storage operations the pipeline depends on
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Search-then-create, name-exact, scoped to an optional parent
    async fn find_or_create_folder(
        &self,
        name: &str,
        parent_id: Option<&str>,
    ) -> Result<FolderRef>;

    /// Exact-name existence check inside one folder
    async fn file_exists(&self, name: &str, parent_id: &str) -> Result<bool>;

    /// Single-shot multipart upload; returns the archive file id
    async fn upload(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        mime_type: &str,
        parent_id: &str,
    ) -> Result<String>;
}

#[async_trait]
impl<T: ArchiveStore + ?Sized> ArchiveStore for std::sync::Arc<T> {
    async fn find_or_create_folder(
        &self,
        name: &str,
        parent_id: Option<&str>,
    ) -> Result<FolderRef> {
        (**self).find_or_create_folder(name, parent_id).await
    }

    async fn file_exists(&self, name: &str, parent_id: &str) -> Result<bool> {
        (**self).file_exists(name, parent_id).await
    }

    async fn upload(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        mime_type: &str,
        parent_id: &str,
    ) -> Result<String> {
        (**self).upload(bytes, filename, mime_type, parent_id).await
    }
}

/// Production archive store over the Drive API
pub struct DriveArchiveStore {
    hub: ArchiveHub,
}

impl DriveArchiveStore {
    pub fn new(hub: ArchiveHub) -> Self {
        Self { hub }
    }

    async fn find_by_query(&self, query: &str) -> Result<Option<File>> {
        let (_, list) = self
            .hub
            .files()
            .list()
            .q(query)
            .spaces("drive")
            .param("fields", "files(id,name,parents)")
            .add_scope(DRIVE_SCOPE)
            .doit()
            .await
            .map_err(ArchiveError::from_drive)?;

        Ok(list.files.unwrap_or_default().into_iter().next())
    }
}

#[async_trait]
impl ArchiveStore for DriveArchiveStore {
    async fn find_or_create_folder(
        &self,
        name: &str,
        parent_id: Option<&str>,
    ) -> Result<FolderRef> {
        let query = folder_query(name, parent_id);
        if let Some(existing) = self.find_by_query(&query).await? {
            let id = existing
                .id
                .ok_or_else(|| ArchiveError::Api("folder listed without id".to_string()))?;
            debug!("Found existing folder {:?} ({})", name, id);
            return Ok(FolderRef {
                id,
                name: name.to_string(),
                parent_id: parent_id.map(String::from),
            });
        }

        let folder = File {
            name: Some(name.to_string()),
            mime_type: Some(FOLDER_MIME_TYPE.to_string()),
            parents: parent_id.map(|p| vec![p.to_string()]),
            ..Default::default()
        };

        let (_, created) = self
            .hub
            .files()
            .create(folder)
            .add_scope(DRIVE_SCOPE)
            .upload(Cursor::new(Vec::new()), parse_mime(FOLDER_MIME_TYPE))
            .await
            .map_err(ArchiveError::from_drive)?;

        let id = created
            .id
            .ok_or_else(|| ArchiveError::Api("created folder has no id".to_string()))?;
        info!("Created archive folder {:?} ({})", name, id);

        Ok(FolderRef {
            id,
            name: name.to_string(),
            parent_id: parent_id.map(String::from),
        })
    }

    async fn file_exists(&self, name: &str, parent_id: &str) -> Result<bool> {
        let query = file_query(name, parent_id);
        Ok(self.find_by_query(&query).await?.is_some())
    }

    async fn upload(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        mime_type: &str,
        parent_id: &str,
    ) -> Result<String> {
        let size = bytes.len();
        let metadata = File {
            name: Some(filename.to_string()),
            parents: Some(vec![parent_id.to_string()]),
            ..Default::default()
        };

        let (_, created) = self
            .hub
            .files()
            .create(metadata)
            .add_scope(DRIVE_SCOPE)
            .upload(Cursor::new(bytes), parse_mime(mime_type))
            .await
            .map_err(ArchiveError::from_drive)?;

        let id = created
            .id
            .ok_or_else(|| ArchiveError::Api("uploaded file has no id".to_string()))?;
        info!("Uploaded {:?} ({} bytes) as {}", filename, size, id);
        Ok(id)
    }
}

/// Query for a non-trashed folder by exact name, optionally under a parent
fn folder_query(name: &str, parent_id: Option<&str>) -> String {
    let mut query = format!(
        "name = '{}' and mimeType = '{}' and trashed = false",
        escape_query_term(name),
        FOLDER_MIME_TYPE
    );
    if let Some(parent) = parent_id {
        query.push_str(&format!(" and '{}' in parents", escape_query_term(parent)));
    }
    query
}

/// Query for a non-trashed file by exact name inside one folder
fn file_query(name: &str, parent_id: &str) -> String {
    format!(
        "name = '{}' and '{}' in parents and trashed = false",
        escape_query_term(name),
        escape_query_term(parent_id)
    )
}

/// Escape backslashes and single quotes for Drive query strings
fn escape_query_term(term: &str) -> String {
    term.replace('\\', "\\\\").replace('\'', "\\'")
}

fn parse_mime(mime_type: &str) -> mime::Mime {
    mime_type
        .parse()
        .unwrap_or(mime::APPLICATION_OCTET_STREAM)
}
