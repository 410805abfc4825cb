//! End-to-end pipeline tests against in-memory mail and archive mocks

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use mailvault::config::Config;
use mailvault::drive::ArchiveStore;
use mailvault::error::{ArchiveError, Result};
use mailvault::gmail::MessageSource;
use mailvault::ledger::ArchiveLedger;
use mailvault::models::{FolderRef, Message, Part, RunStatus};
use mailvault::pipeline::ArchivePipeline;

const PENDING_ID: &str = "Label_pending";
const PROCESSED_ID: &str = "Label_processed";

struct MockSource {
    labels: HashMap<String, String>,
    messages: Mutex<Vec<Message>>,
    payloads: HashMap<(String, String), Vec<u8>>,
    downloads: Mutex<Vec<(String, String)>>,
    label_updates: Mutex<Vec<(String, Vec<String>, Vec<String>)>>,
    fail_downloads_fatally: bool,
}

impl MockSource {
    fn new(messages: Vec<Message>) -> Arc<Self> {
        let mut labels = HashMap::new();
        labels.insert("claims/todo".to_string(), PENDING_ID.to_string());
        labels.insert("claims/processed".to_string(), PROCESSED_ID.to_string());

        let mut payloads = HashMap::new();
        for message in &messages {
            if let Some(payload) = &message.payload {
                let mut atts = Vec::new();
                payload.collect_attachments(&message.id, &mut atts);
                for att in atts {
                    payloads.insert(
                        (att.message_id.clone(), att.attachment_id.clone()),
                        vec![0u8; att.size_bytes as usize],
                    );
                }
            }
        }

        Arc::new(Self {
            labels,
            messages: Mutex::new(messages),
            payloads,
            downloads: Mutex::new(Vec::new()),
            label_updates: Mutex::new(Vec::new()),
            fail_downloads_fatally: false,
        })
    }

    fn without_label(mut self: Arc<Self>, name: &str) -> Arc<Self> {
        Arc::get_mut(&mut self).unwrap().labels.remove(name);
        self
    }

    fn failing_downloads(mut self: Arc<Self>) -> Arc<Self> {
        Arc::get_mut(&mut self).unwrap().fail_downloads_fatally = true;
        self
    }

    fn download_count(&self) -> usize {
        self.downloads.lock().unwrap().len()
    }

    fn updates_for(&self, message_id: &str) -> Vec<(String, Vec<String>, Vec<String>)> {
        self.label_updates
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _, _)| id == message_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MessageSource for MockSource {
    async fn resolve_label_id(&self, name: &str) -> Result<Option<String>> {
        Ok(self.labels.get(name).cloned())
    }

    async fn search(&self, _query: &str, max_results: u32) -> Result<Vec<Message>> {
        let messages = self.messages.lock().unwrap();
        Ok(messages
            .iter()
            .filter(|m| m.label_ids.iter().any(|l| l == PENDING_ID))
            .take(max_results as usize)
            .cloned()
            .collect())
    }

    async fn download(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>> {
        if self.fail_downloads_fatally {
            return Err(ArchiveError::TokenRefresh("refresh rejected".to_string()));
        }
        self.downloads
            .lock()
            .unwrap()
            .push((message_id.to_string(), attachment_id.to_string()));
        self.payloads
            .get(&(message_id.to_string(), attachment_id.to_string()))
            .cloned()
            .ok_or_else(|| ArchiveError::NotFound(format!("{}/{}", message_id, attachment_id)))
    }

    async fn update_labels(
        &self,
        message_id: &str,
        add: &[String],
        remove: &[String],
    ) -> Result<()> {
        self.label_updates.lock().unwrap().push((
            message_id.to_string(),
            add.to_vec(),
            remove.to_vec(),
        ));

        let mut messages = self.messages.lock().unwrap();
        if let Some(message) = messages.iter_mut().find(|m| m.id == message_id) {
            message.label_ids.retain(|l| !remove.contains(l));
            for label in add {
                if !message.label_ids.contains(label) {
                    message.label_ids.push(label.clone());
                }
            }
        }
        Ok(())
    }
}

struct MockStore {
    folders: Mutex<HashMap<(String, Option<String>), FolderRef>>,
    files: Mutex<HashSet<(String, String)>>,
    uploads: Mutex<Vec<(String, String)>>,
    counter: AtomicUsize,
}

impl MockStore {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            folders: Mutex::new(HashMap::new()),
            files: Mutex::new(HashSet::new()),
            uploads: Mutex::new(Vec::new()),
            counter: AtomicUsize::new(0),
        })
    }

    /// Pre-seed an existing archive file, bypassing the ledger
    fn seed_file(self: &Arc<Self>, folder_name: &str, filename: &str) {
        let folder_id = format!("folder-{}", folder_name);
        self.folders.lock().unwrap().insert(
            (folder_name.to_string(), None),
            FolderRef {
                id: folder_id.clone(),
                name: folder_name.to_string(),
                parent_id: None,
            },
        );
        self.files
            .lock()
            .unwrap()
            .insert((folder_id, filename.to_string()));
    }

    fn uploaded_names(&self) -> Vec<String> {
        self.uploads
            .lock()
            .unwrap()
            .iter()
            .map(|(_, name)| name.clone())
            .collect()
    }
}

#[async_trait]
impl ArchiveStore for MockStore {
    async fn find_or_create_folder(
        &self,
        name: &str,
        parent_id: Option<&str>,
    ) -> Result<FolderRef> {
        let key = (name.to_string(), parent_id.map(String::from));
        let mut folders = self.folders.lock().unwrap();
        if let Some(folder) = folders.get(&key) {
            return Ok(folder.clone());
        }
        let folder = FolderRef {
            id: format!("folder-{}", name),
            name: name.to_string(),
            parent_id: parent_id.map(String::from),
        };
        folders.insert(key, folder.clone());
        Ok(folder)
    }

    async fn file_exists(&self, name: &str, parent_id: &str) -> Result<bool> {
        Ok(self
            .files
            .lock()
            .unwrap()
            .contains(&(parent_id.to_string(), name.to_string())))
    }

    async fn upload(
        &self,
        _bytes: Vec<u8>,
        filename: &str,
        _mime_type: &str,
        parent_id: &str,
    ) -> Result<String> {
        self.files
            .lock()
            .unwrap()
            .insert((parent_id.to_string(), filename.to_string()));
        self.uploads
            .lock()
            .unwrap()
            .push((parent_id.to_string(), filename.to_string()));
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(format!("file-{}", n))
    }
}

/// Message carrying the pending label with the given attachments
fn pending_message(id: &str, from: &str, date: &str, attachments: &[(&str, u64)]) -> Message {
    let children = attachments
        .iter()
        .enumerate()
        .map(|(i, (filename, size))| Part::Leaf {
            filename: Some(filename.to_string()),
            mime_type: "application/pdf".to_string(),
            attachment_id: Some(format!("att-{}-{}", id, i)),
            size_bytes: *size,
        })
        .collect();

    Message {
        id: id.to_string(),
        thread_id: format!("t-{}", id),
        label_ids: vec![PENDING_ID.to_string(), "INBOX".to_string()],
        headers: vec![
            ("From".to_string(), from.to_string()),
            ("Date".to_string(), date.to_string()),
        ],
        payload: Some(Part::Container { children }),
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.run.max_attachment_bytes = 10_000;
    config
}

async fn pipeline_with(
    dir: &tempfile::TempDir,
    source: Arc<MockSource>,
    store: Arc<MockStore>,
) -> ArchivePipeline<Arc<MockSource>, Arc<MockStore>> {
    let ledger = ArchiveLedger::load(&dir.path().join("ledger.json"))
        .await
        .unwrap();
    ArchivePipeline::new(test_config(), source, store, ledger)
}

#[tokio::test]
async fn uploads_attachment_and_swaps_label() {
    let dir = tempfile::tempdir().unwrap();
    let source = MockSource::new(vec![pending_message(
        "m1",
        "John Smith <john@example.com>",
        "Mon, 04 Mar 2024 10:30:00 +0000",
        &[("invoice.pdf", 2048)],
    )]);
    let store = MockStore::new();
    let mut pipeline = pipeline_with(&dir, Arc::clone(&source), Arc::clone(&store)).await;

    let report = pipeline.run_batch().await.unwrap();

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.total_emails, 1);
    assert_eq!(report.successful_emails, 1);
    assert_eq!(report.total_files_uploaded, 1);
    assert_eq!(store.uploaded_names(), vec!["03_Smith_invoice.pdf"]);

    // exactly one swap: processed added, pending removed
    let updates = source.updates_for("m1");
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].1, vec![PROCESSED_ID.to_string()]);
    assert_eq!(updates[0].2, vec![PENDING_ID.to_string()]);

    assert!(pipeline
        .ledger()
        .is_recorded("2024/03_Smith_invoice.pdf"));
}

#[tokio::test]
async fn second_run_uploads_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let source = MockSource::new(vec![pending_message(
        "m1",
        "Jane Roe <jane@example.com>",
        "Tue, 05 Mar 2024 09:00:00 +0000",
        &[("claim.pdf", 512)],
    )]);
    let store = MockStore::new();
    let mut pipeline = pipeline_with(&dir, Arc::clone(&source), Arc::clone(&store)).await;

    let first = pipeline.run_batch().await.unwrap();
    assert_eq!(first.total_files_uploaded, 1);

    let second = pipeline.run_batch().await.unwrap();
    assert_eq!(second.total_emails, 0);
    assert_eq!(second.total_files_uploaded, 0);
    assert_eq!(second.status, RunStatus::Success);
    assert_eq!(store.uploaded_names().len(), 1);
}

#[tokio::test]
async fn dedup_holds_even_when_message_stays_pending() {
    // Simulate a first run whose label swap never landed: the message is
    // found again, but both duplicate signals keep the upload count at zero
    let dir = tempfile::tempdir().unwrap();
    let message = pending_message(
        "m1",
        "Jane Roe <jane@example.com>",
        "Tue, 05 Mar 2024 09:00:00 +0000",
        &[("claim.pdf", 512)],
    );
    let source = MockSource::new(vec![message.clone()]);
    let store = MockStore::new();
    let mut pipeline = pipeline_with(&dir, Arc::clone(&source), Arc::clone(&store)).await;
    pipeline.run_batch().await.unwrap();

    // put the message back to pending behind the pipeline's back
    *source.messages.lock().unwrap() = vec![message];
    let report = pipeline.run_batch().await.unwrap();

    assert_eq!(report.total_emails, 1);
    assert_eq!(report.successful_emails, 1);
    assert_eq!(report.total_files_uploaded, 0);
    // zero uploads this run, so no second label swap
    assert_eq!(source.updates_for("m1").len(), 1);
}

#[tokio::test]
async fn partial_failure_is_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let source = MockSource::new(vec![
        pending_message(
            "m-bad",
            "A B <a@example.com>",
            "not a parseable date",
            &[("a.pdf", 100)],
        ),
        pending_message(
            "m-good",
            "C Dee <c@example.com>",
            "Wed, 06 Mar 2024 12:00:00 +0000",
            &[("b.pdf", 100)],
        ),
    ]);
    let store = MockStore::new();
    let mut pipeline = pipeline_with(&dir, Arc::clone(&source), Arc::clone(&store)).await;

    let report = pipeline.run_batch().await.unwrap();

    assert_eq!(report.total_emails, 2);
    assert_eq!(report.successful_emails, 1);
    assert_eq!(report.failed_emails, 1);
    assert_eq!(report.status, RunStatus::Partial);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].email_id, "m-bad");
    assert_eq!(store.uploaded_names(), vec!["03_Dee_b.pdf"]);

    // the failed message keeps its pending label
    assert!(source.updates_for("m-bad").is_empty());
    assert_eq!(source.updates_for("m-good").len(), 1);
}

#[tokio::test]
async fn missing_from_header_fails_only_that_message() {
    let dir = tempfile::tempdir().unwrap();
    let mut message = pending_message(
        "m1",
        "x",
        "Thu, 07 Mar 2024 12:00:00 +0000",
        &[("doc.pdf", 100)],
    );
    message.headers.retain(|(name, _)| name != "From");
    let source = MockSource::new(vec![message]);
    let store = MockStore::new();
    let mut pipeline = pipeline_with(&dir, Arc::clone(&source), Arc::clone(&store)).await;

    let report = pipeline.run_batch().await.unwrap();
    assert_eq!(report.failed_emails, 1);
    assert_eq!(report.status, RunStatus::Failed);
    assert!(report.errors[0].error.contains("From"));
}

#[tokio::test]
async fn attachment_less_message_is_successful_without_swap() {
    let dir = tempfile::tempdir().unwrap();
    let mut message = pending_message(
        "m1",
        "Jo King <jo@example.com>",
        "Fri, 08 Mar 2024 12:00:00 +0000",
        &[],
    );
    message.payload = Some(Part::Leaf {
        filename: None,
        mime_type: "text/plain".to_string(),
        attachment_id: None,
        size_bytes: 10,
    });
    let source = MockSource::new(vec![message]);
    let store = MockStore::new();
    let mut pipeline = pipeline_with(&dir, Arc::clone(&source), Arc::clone(&store)).await;

    let report = pipeline.run_batch().await.unwrap();

    assert_eq!(report.successful_emails, 1);
    assert_eq!(report.total_files_uploaded, 0);
    assert_eq!(report.status, RunStatus::Success);
    // zero uploads: label never swapped
    assert!(source.updates_for("m1").is_empty());
}

#[tokio::test]
async fn archive_check_alone_suppresses_upload() {
    // Archive already holds the file, ledger knows nothing about it
    let dir = tempfile::tempdir().unwrap();
    let source = MockSource::new(vec![pending_message(
        "m1",
        "Ann Smith <ann@example.com>",
        "Mon, 04 Mar 2024 10:30:00 +0000",
        &[("invoice.pdf", 2048)],
    )]);
    let store = MockStore::new();
    store.seed_file("2024", "03_Smith_invoice.pdf");
    let mut pipeline = pipeline_with(&dir, Arc::clone(&source), Arc::clone(&store)).await;

    let report = pipeline.run_batch().await.unwrap();

    assert_eq!(report.total_files_uploaded, 0);
    assert_eq!(report.successful_emails, 1);
    assert!(store.uploaded_names().is_empty());
    // duplicate was detected before any download
    assert_eq!(source.download_count(), 0);
    // archive check short-circuited; the ledger never learned the key
    assert!(!pipeline.ledger().is_recorded("2024/03_Smith_invoice.pdf"));
}

#[tokio::test]
async fn ledger_check_suppresses_upload_when_archive_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let ledger_path = dir.path().join("ledger.json");
    let mut ledger = ArchiveLedger::load(&ledger_path).await.unwrap();
    ledger.record("2024/03_Smith_invoice.pdf").await.unwrap();

    let source = MockSource::new(vec![pending_message(
        "m1",
        "Ann Smith <ann@example.com>",
        "Mon, 04 Mar 2024 10:30:00 +0000",
        &[("invoice.pdf", 2048)],
    )]);
    let store = MockStore::new();
    let ledger = ArchiveLedger::load(&ledger_path).await.unwrap();
    let mut pipeline =
        ArchivePipeline::new(test_config(), Arc::clone(&source), Arc::clone(&store), ledger);

    let report = pipeline.run_batch().await.unwrap();

    assert_eq!(report.total_files_uploaded, 0);
    assert_eq!(source.download_count(), 0);
    assert!(store.uploaded_names().is_empty());
}

#[tokio::test]
async fn oversized_attachment_never_downloaded() {
    let dir = tempfile::tempdir().unwrap();
    let source = MockSource::new(vec![pending_message(
        "m1",
        "Max Large <max@example.com>",
        "Mon, 04 Mar 2024 10:30:00 +0000",
        &[("huge.iso", 50_000), ("small.pdf", 100)],
    )]);
    let store = MockStore::new();
    let mut pipeline = pipeline_with(&dir, Arc::clone(&source), Arc::clone(&store)).await;

    let report = pipeline.run_batch().await.unwrap();

    // only the small attachment was fetched
    let downloads = source.downloads.lock().unwrap().clone();
    assert_eq!(downloads.len(), 1);
    assert_eq!(downloads[0].1, "att-m1-1");

    assert_eq!(report.successful_emails, 1);
    assert_eq!(report.total_files_uploaded, 1);
    assert_eq!(store.uploaded_names(), vec!["03_Large_small.pdf"]);
    assert_eq!(source.updates_for("m1").len(), 1);
}

#[tokio::test]
async fn missing_pending_label_aborts_batch() {
    let dir = tempfile::tempdir().unwrap();
    let source = MockSource::new(vec![]).without_label("claims/todo");
    let store = MockStore::new();
    let mut pipeline = pipeline_with(&dir, Arc::clone(&source), Arc::clone(&store)).await;

    let err = pipeline.run_batch().await.unwrap_err();
    assert!(matches!(err, ArchiveError::Label(_)));
    assert!(err.is_fatal());
    // the prerequisite failure lands in the error log
    assert_eq!(pipeline.ledger().get_recent_errors(10).len(), 1);
    assert_eq!(pipeline.ledger().get_recent_errors(10)[0].service, "orchestrator");
}

#[tokio::test]
async fn fatal_mid_run_error_aborts_and_persists_partial_report() {
    let dir = tempfile::tempdir().unwrap();
    let source = MockSource::new(vec![pending_message(
        "m1",
        "Eve Short <eve@example.com>",
        "Mon, 04 Mar 2024 10:30:00 +0000",
        &[("doc.pdf", 100)],
    )])
    .failing_downloads();
    let store = MockStore::new();
    let mut pipeline = pipeline_with(&dir, Arc::clone(&source), Arc::clone(&store)).await;

    let err = pipeline.run_batch().await.unwrap_err();
    assert!(matches!(err, ArchiveError::TokenRefresh(_)));

    let report = pipeline.ledger().last_report().unwrap();
    assert_eq!(report.failed_emails, 1);
    assert_eq!(report.status, RunStatus::Failed);
    assert!(source.updates_for("m1").is_empty());
}

#[tokio::test]
async fn year_folder_created_once_per_run() {
    let dir = tempfile::tempdir().unwrap();
    let source = MockSource::new(vec![
        pending_message(
            "m1",
            "A One <a@example.com>",
            "Mon, 04 Mar 2024 10:30:00 +0000",
            &[("x.pdf", 10)],
        ),
        pending_message(
            "m2",
            "B Two <b@example.com>",
            "Thu, 05 Sep 2024 10:30:00 +0000",
            &[("y.pdf", 10)],
        ),
    ]);
    let store = MockStore::new();
    let mut pipeline = pipeline_with(&dir, Arc::clone(&source), Arc::clone(&store)).await;

    pipeline.run_batch().await.unwrap();

    let folders = store.folders.lock().unwrap();
    assert_eq!(folders.len(), 1);
    assert!(folders.contains_key(&("2024".to_string(), None)));

    let names = store.uploaded_names();
    assert!(names.contains(&"03_One_x.pdf".to_string()));
    assert!(names.contains(&"09_Two_y.pdf".to_string()));
}

#[tokio::test]
async fn status_reflects_last_report_and_errors() {
    let dir = tempfile::tempdir().unwrap();
    let source = MockSource::new(vec![pending_message(
        "m-bad",
        "A B <a@example.com>",
        "garbage",
        &[("a.pdf", 100)],
    )]);
    let store = MockStore::new();
    let mut pipeline = pipeline_with(&dir, Arc::clone(&source), Arc::clone(&store)).await;

    let before = pipeline.get_status();
    assert!(before.last_run.is_none());
    assert_eq!(before.recent_error_count, 0);

    pipeline.run_batch().await.unwrap();

    let after = pipeline.get_status();
    assert!(after.last_run.is_some());
    assert_eq!(after.last_report.unwrap().failed_emails, 1);
    assert_eq!(after.recent_error_count, 1);
}

#[tokio::test]
async fn upload_record_survives_reload() {
    let dir = tempfile::tempdir().unwrap();
    let ledger_path = dir.path().join("ledger.json");
    let source = MockSource::new(vec![pending_message(
        "m1",
        "Sam Hill <sam@example.com>",
        "Mon, 04 Mar 2024 10:30:00 +0000",
        &[("form.pdf", 64)],
    )]);
    let store = MockStore::new();
    let ledger = ArchiveLedger::load(&ledger_path).await.unwrap();
    let mut pipeline = ArchivePipeline::new(test_config(), source, store, ledger);
    pipeline.run_batch().await.unwrap();
    drop(pipeline);

    let reloaded = ArchiveLedger::load(&ledger_path).await.unwrap();
    assert!(reloaded.is_recorded("2024/03_Hill_form.pdf"));
    assert!(reloaded.last_report().is_some());

    // timestamp sanity on the persisted report
    let report = reloaded.last_report().unwrap();
    assert!(report.end_time >= report.start_time);
    assert!(report.end_time <= Utc::now());
}
