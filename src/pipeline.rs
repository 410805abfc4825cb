//! Batch attachment-archival orchestrator
//!
//! Drives the end-to-end flow per message: extract attachments, derive the
//! canonical filename and year folder, dedup against the archive and the
//! ledger, download, upload, record, and finally swap the message's label
//! from pending to processed. A single bad message never aborts the run;
//! failures are caught at the per-message boundary and recorded in the run
//! report, and the loop continues.
//!
//! Messages and attachments are processed strictly one at a time. This keeps
//! the label-update-after-upload ordering trivially correct without any
//! locking. There is no cross-invocation locking either: at-most-once upload
//! is NOT guaranteed under concurrent invocations - two overlapping runs can
//! both pass the duplicate checks before either uploads. A terminated run is
//! safe to resume because resumption re-runs the same dedup checks.

use chrono::Utc;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::drive::ArchiveStore;
use crate::error::{ArchiveError, Result};
use crate::gmail::{extract_attachments, label_query, MessageSource};
use crate::ledger::{ArchiveLedger, MAX_ERROR_LOG_ENTRIES};
use crate::models::{
    ErrorLogEntry, FolderRef, Message, PipelineStatus, RunErrorEntry, RunReport, RunStatus,
    UploadRecord,
};
use crate::naming;

/// Outcome of one fully-processed message
#[derive(Debug, Default, Clone, Copy)]
struct MessageOutcome {
    uploaded: u32,
    skipped_duplicate: u32,
    skipped_size: u32,
}

/// The batch controller
///
/// Constructed once per invocation from an explicit config plus the three
/// injected collaborators; holds no process-wide state.
pub struct ArchivePipeline<S, A> {
    config: Config,
    source: S,
    store: A,
    ledger: ArchiveLedger,
}

impl<S: MessageSource, A: ArchiveStore> ArchivePipeline<S, A> {
    pub fn new(config: Config, source: S, store: A, ledger: ArchiveLedger) -> Self {
        Self {
            config,
            source,
            store,
            ledger,
        }
    }

    /// Run one bounded batch and persist its aggregate report
    pub async fn run_batch(&mut self) -> Result<RunReport> {
        let start_time = Utc::now();
        let started = Instant::now();
        let run_id = Uuid::new_v4().to_string();
        info!(run_id = %run_id, "Starting archival batch");

        // Batch prerequisites: both labels must resolve before any message
        // is touched
        let (pending_id, processed_id) = match self.resolve_labels().await {
            Ok(ids) => ids,
            Err(e) => {
                self.log_batch_error(&e, "resolve_labels").await;
                return Err(e);
            }
        };

        let query = label_query(&self.config.labels.pending);
        let messages = match self
            .source
            .search(&query, self.config.run.max_messages_per_run)
            .await
        {
            Ok(messages) => messages,
            Err(e) => {
                self.log_batch_error(&e, "search").await;
                return Err(e);
            }
        };
        info!("Found {} pending message(s)", messages.len());

        let mut successful = 0u32;
        let mut failed = 0u32;
        let mut files_uploaded = 0u32;
        let mut errors = Vec::new();
        // Year folders are resolved lazily and cached only for this run
        let mut year_folders: HashMap<i32, FolderRef> = HashMap::new();

        for message in &messages {
            match self
                .process_message(message, &pending_id, &processed_id, &mut year_folders)
                .await
            {
                Ok(outcome) => {
                    successful += 1;
                    files_uploaded += outcome.uploaded;
                    debug!(
                        "Message {}: {} uploaded, {} duplicate, {} over size",
                        message.id,
                        outcome.uploaded,
                        outcome.skipped_duplicate,
                        outcome.skipped_size
                    );
                }
                Err(e) if e.is_fatal() => {
                    // Auth/refresh failures rarely recover mid-run; persist
                    // what we have and abort
                    self.log_message_error(&message.id, &e).await;
                    let report = self.build_report(
                        run_id,
                        start_time,
                        started,
                        messages.len() as u32,
                        successful,
                        failed + 1,
                        files_uploaded,
                        errors,
                    );
                    self.persist_report(report).await;
                    return Err(e);
                }
                Err(e) => {
                    warn!("Message {} failed: {}", message.id, e);
                    failed += 1;
                    errors.push(RunErrorEntry {
                        email_id: message.id.clone(),
                        error: e.to_string(),
                    });
                    self.log_message_error(&message.id, &e).await;
                }
            }
        }

        let report = self.build_report(
            run_id,
            start_time,
            started,
            messages.len() as u32,
            successful,
            failed,
            files_uploaded,
            errors,
        );
        info!(
            "Batch finished: {:?}, {}/{} messages, {} file(s) uploaded",
            report.status, report.successful_emails, report.total_emails, files_uploaded
        );
        self.persist_report(report.clone()).await;
        Ok(report)
    }

    /// Status surface for monitoring collaborators
    pub fn get_status(&self) -> PipelineStatus {
        PipelineStatus {
            last_run: self.ledger.last_run(),
            last_report: self.ledger.last_report().cloned(),
            recent_error_count: self.ledger.get_recent_errors(MAX_ERROR_LOG_ENTRIES).len(),
        }
    }

    pub fn ledger(&self) -> &ArchiveLedger {
        &self.ledger
    }

    async fn resolve_labels(&self) -> Result<(String, String)> {
        let pending = self
            .source
            .resolve_label_id(&self.config.labels.pending)
            .await?
            .ok_or_else(|| {
                ArchiveError::Label(format!(
                    "pending label {:?} not found",
                    self.config.labels.pending
                ))
            })?;

        let processed = self
            .source
            .resolve_label_id(&self.config.labels.processed)
            .await?
            .ok_or_else(|| {
                ArchiveError::Label(format!(
                    "processed label {:?} not found",
                    self.config.labels.processed
                ))
            })?;

        Ok((pending, processed))
    }

    /// Steps (a)-(f) of the per-message state machine
    async fn process_message(
        &mut self,
        message: &Message,
        pending_id: &str,
        processed_id: &str,
        year_folders: &mut HashMap<i32, FolderRef>,
    ) -> Result<MessageOutcome> {
        let attachments = extract_attachments(message);
        if attachments.is_empty() {
            // An attachment-less match is not an error; it had nothing to do
            debug!("Message {} has no attachments", message.id);
            return Ok(MessageOutcome::default());
        }

        let from = message
            .header("From")
            .ok_or_else(|| ArchiveError::Validation("missing From header".to_string()))?;
        let date = message
            .header("Date")
            .ok_or_else(|| ArchiveError::Validation("missing Date header".to_string()))?;

        let last_name = naming::sender_last_name(from);
        let (year, month) = naming::parse_message_date(date)?;

        // Resolve the year folder once per message, reused across its
        // attachments
        let folder = match year_folders.get(&year) {
            Some(folder) => folder.clone(),
            None => {
                let folder = self
                    .store
                    .find_or_create_folder(
                        &format!("{:04}", year),
                        self.config.archive.root_folder_id.as_deref(),
                    )
                    .await?;
                year_folders.insert(year, folder.clone());
                folder
            }
        };

        let mut outcome = MessageOutcome::default();
        for attachment in &attachments {
            if attachment.size_bytes > self.config.run.max_attachment_bytes {
                debug!(
                    "Skipping {:?} ({} bytes over ceiling)",
                    attachment.filename, attachment.size_bytes
                );
                outcome.skipped_size += 1;
                continue;
            }

            let filename = naming::canonical_filename(month, &last_name, &attachment.filename);
            let key = naming::ledger_key(year, &filename);

            // Dual duplicate check; the archive takes precedence and
            // short-circuits the ledger lookup
            if self.store.file_exists(&filename, &folder.id).await? {
                debug!("Archive already holds {:?}, skipping", filename);
                outcome.skipped_duplicate += 1;
                continue;
            }
            if self.ledger.is_recorded(&key) {
                debug!("Ledger already records {:?}, skipping", key);
                outcome.skipped_duplicate += 1;
                continue;
            }

            let bytes = self
                .source
                .download(&attachment.message_id, &attachment.attachment_id)
                .await?;
            let size = bytes.len() as u64;
            let file_id = self
                .store
                .upload(bytes, &filename, &attachment.mime_type, &folder.id)
                .await?;

            let record = UploadRecord {
                email_id: message.id.to_string(),
                filename: filename.clone(),
                archive_file_id: file_id,
                upload_time: Utc::now(),
                size,
            };
            // A ledger write failure is logged but does not undo the upload
            // that already happened; the archive check covers the next run
            if let Err(e) = self.ledger.record_upload(&key, record).await {
                warn!("Failed to record ledger key {:?}: {}", key, e);
                self.log_message_error(&message.id, &e).await;
            }
            outcome.uploaded += 1;
        }

        // Swap the label only when the message produced at least one upload
        if outcome.uploaded > 0 {
            self.source
                .update_labels(
                    &message.id,
                    &[processed_id.to_string()],
                    &[pending_id.to_string()],
                )
                .await?;
            debug!("Message {} relabeled as processed", message.id);
        }

        Ok(outcome)
    }

    #[allow(clippy::too_many_arguments)]
    fn build_report(
        &self,
        run_id: String,
        start_time: chrono::DateTime<Utc>,
        started: Instant,
        total: u32,
        successful: u32,
        failed: u32,
        files_uploaded: u32,
        errors: Vec<RunErrorEntry>,
    ) -> RunReport {
        RunReport {
            run_id,
            status: RunStatus::classify(successful, failed),
            start_time,
            end_time: Utc::now(),
            total_emails: total,
            successful_emails: successful,
            failed_emails: failed,
            total_files_uploaded: files_uploaded,
            total_processing_ms: started.elapsed().as_millis() as u64,
            errors,
        }
    }

    /// Report persistence failure must not fail an otherwise-finished batch
    async fn persist_report(&mut self, report: RunReport) {
        if let Err(e) = self.ledger.save_run_report(report).await {
            warn!("Failed to persist run report: {}", e);
        }
    }

    async fn log_batch_error(&mut self, error: &ArchiveError, operation: &str) {
        let entry = ErrorLogEntry {
            timestamp: Utc::now(),
            error: error.to_string(),
            context: "batch prerequisite".to_string(),
            service: "orchestrator".to_string(),
            operation: operation.to_string(),
            stack: None,
        };
        if let Err(e) = self.ledger.append_error(entry).await {
            warn!("Failed to append error log entry: {}", e);
        }
    }

    async fn log_message_error(&mut self, message_id: &str, error: &ArchiveError) {
        let entry = ErrorLogEntry {
            timestamp: Utc::now(),
            error: error.to_string(),
            context: format!("message {}", message_id),
            service: "orchestrator".to_string(),
            operation: "process_message".to_string(),
            stack: None,
        };
        if let Err(e) = self.ledger.append_error(entry).await {
            warn!("Failed to append error log entry: {}", e);
        }
    }
}
