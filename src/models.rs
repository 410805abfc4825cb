use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Read-only snapshot of a mail message, fetched once per processing attempt
#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub thread_id: String,
    pub label_ids: Vec<String>,
    /// Header order as delivered by the API
    pub headers: Vec<(String, String)>,
    pub payload: Option<Part>,
}

impl Message {
    /// First header with the given name, case-insensitive
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A node in a message's MIME part tree
///
/// Multipart containers are walked but never themselves counted as
/// attachments; a leaf is an attachment iff it carries both a non-empty
/// filename and a body reference.
#[derive(Debug, Clone)]
pub enum Part {
    Leaf {
        filename: Option<String>,
        mime_type: String,
        attachment_id: Option<String>,
        size_bytes: u64,
    },
    Container {
        children: Vec<Part>,
    },
}

impl Part {
    /// Structural fold collecting every attachment leaf under this part
    pub fn collect_attachments(&self, message_id: &str, out: &mut Vec<AttachmentRef>) {
        match self {
            Part::Leaf {
                filename: Some(filename),
                mime_type,
                attachment_id: Some(attachment_id),
                size_bytes,
            } if !filename.is_empty() => {
                out.push(AttachmentRef {
                    message_id: message_id.to_string(),
                    attachment_id: attachment_id.clone(),
                    filename: filename.clone(),
                    mime_type: mime_type.clone(),
                    size_bytes: *size_bytes,
                });
            }
            Part::Leaf { .. } => {}
            Part::Container { children } => {
                for child in children {
                    child.collect_attachments(message_id, out);
                }
            }
        }
    }
}

/// Descriptor for a downloadable attachment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRef {
    pub message_id: String,
    pub attachment_id: String,
    pub filename: String,
    pub mime_type: String,
    pub size_bytes: u64,
}

/// A folder in the archive store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderRef {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
}

/// Write-once record of an archived attachment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadRecord {
    pub email_id: String,
    pub filename: String,
    pub archive_file_id: String,
    pub upload_time: DateTime<Utc>,
    pub size: u64,
}

/// Aggregate outcome of one batch invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: String,
    pub status: RunStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub total_emails: u32,
    pub successful_emails: u32,
    pub failed_emails: u32,
    pub total_files_uploaded: u32,
    /// Wall-clock duration of the run in milliseconds
    #[serde(rename = "totalProcessingTime")]
    pub total_processing_ms: u64,
    pub errors: Vec<RunErrorEntry>,
}

/// Per-message failure recorded in a run report
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunErrorEntry {
    pub email_id: String,
    pub error: String,
}

/// Primary signal consumed by external monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Zero failed messages
    Success,
    /// Some succeeded, some failed
    Partial,
    /// Zero messages succeeded
    Failed,
}

impl RunStatus {
    /// `failed` if zero messages succeeded, `success` if zero failed,
    /// else `partial`. An empty batch counts as success.
    pub fn classify(successful: u32, failed: u32) -> Self {
        if failed == 0 {
            RunStatus::Success
        } else if successful == 0 {
            RunStatus::Failed
        } else {
            RunStatus::Partial
        }
    }
}

/// One line in the trimmed error log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub timestamp: DateTime<Utc>,
    pub error: String,
    pub context: String,
    pub service: String,
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

/// Status surface read by monitoring collaborators
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStatus {
    pub last_run: Option<DateTime<Utc>>,
    pub last_report: Option<RunReport>,
    pub recent_error_count: usize,
}
