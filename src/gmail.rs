//! Mail-side API client
//!
//! Wraps the Gmail hub behind a [`MessageSource`] trait so the pipeline can
//! be driven against a mock in tests. All calls are sequential; the batch is
//! bounded upstream by `max_messages_per_run`.

use async_trait::async_trait;
use google_gmail1::api::ModifyMessageRequest;
use google_gmail1::{hyper_rustls, hyper_util, Gmail};
use tracing::{debug, warn};

use crate::error::{ArchiveError, Result};
use crate::models::{AttachmentRef, Message, Part};

const GMAIL_SCOPE: &str = "https://www.googleapis.com/auth/gmail.modify";

/// Type alias for the Gmail hub to simplify signatures
pub type GmailHub =
    Gmail<hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>>;

/// Mail API operations the pipeline depends on
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Exact-match, case-sensitive label lookup; `None` when absent so the
    /// caller can produce a clear "label not found" error
    async fn resolve_label_id(&self, name: &str) -> Result<Option<String>>;

    /// Search for matching messages and fetch each in full detail
    async fn search(&self, query: &str, max_results: u32) -> Result<Vec<Message>>;

    /// Fetch and decode one attachment's payload
    async fn download(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>>;

    /// Atomic label-set modification
    async fn update_labels(
        &self,
        message_id: &str,
        add: &[String],
        remove: &[String],
    ) -> Result<()>;
}

#[async_trait]
impl<T: MessageSource + ?Sized> MessageSource for std::sync::Arc<T> {
    async fn resolve_label_id(&self, name: &str) -> Result<Option<String>> {
        (**self).resolve_label_id(name).await
    }

    async fn search(&self, query: &str, max_results: u32) -> Result<Vec<Message>> {
        (**self).search(query, max_results).await
    }

    async fn download(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>> {
        (**self).download(message_id, attachment_id).await
    }

    async fn update_labels(
        &self,
        message_id: &str,
        add: &[String],
        remove: &[String],
    ) -> Result<()> {
        (**self).update_labels(message_id, add, remove).await
    }
}

/// Walk the part tree and collect every leaf carrying both a filename and a
/// body reference; containers are walked but never counted
pub fn extract_attachments(message: &Message) -> Vec<AttachmentRef> {
    let mut out = Vec::new();
    if let Some(payload) = &message.payload {
        payload.collect_attachments(&message.id, &mut out);
    }
    out
}

/// Label-scoped search query, e.g. `label:"claims/todo"`
pub fn label_query(label_name: &str) -> String {
    format!("label:\"{}\"", label_name)
}

/// Production message source over the Gmail API
pub struct GmailMessageSource {
    hub: GmailHub,
}

impl GmailMessageSource {
    pub fn new(hub: GmailHub) -> Self {
        Self { hub }
    }

    /// Fetch one message in full detail (the search endpoint alone does not
    /// carry attachment structure)
    async fn fetch_full(&self, id: &str) -> Result<Message> {
        let (_, msg) = self
            .hub
            .users()
            .messages_get("me", id)
            .format("full")
            .add_scope(GMAIL_SCOPE)
            .doit()
            .await
            .map_err(ArchiveError::from_gmail)?;

        convert_message(msg)
    }
}

#[async_trait]
impl MessageSource for GmailMessageSource {
    async fn resolve_label_id(&self, name: &str) -> Result<Option<String>> {
        let (_, response) = self
            .hub
            .users()
            .labels_list("me")
            .add_scope(GMAIL_SCOPE)
            .doit()
            .await
            .map_err(ArchiveError::from_gmail)?;

        let id = response
            .labels
            .unwrap_or_default()
            .into_iter()
            .find(|label| label.name.as_deref() == Some(name))
            .and_then(|label| label.id);

        debug!("Resolved label {:?} to {:?}", name, id);
        Ok(id)
    }

    async fn search(&self, query: &str, max_results: u32) -> Result<Vec<Message>> {
        let mut ids: Vec<String> = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let remaining = max_results.saturating_sub(ids.len() as u32);
            if remaining == 0 {
                break;
            }

            let mut call = self
                .hub
                .users()
                .messages_list("me")
                .q(query)
                .max_results(remaining)
                .include_spam_trash(true);

            if let Some(token) = page_token.as_ref() {
                call = call.page_token(token);
            }

            let (_, response) = call
                .add_scope(GMAIL_SCOPE)
                .doit()
                .await
                .map_err(ArchiveError::from_gmail)?;

            for msg_ref in response.messages.unwrap_or_default() {
                if let Some(id) = msg_ref.id {
                    ids.push(id);
                    if ids.len() as u32 >= max_results {
                        break;
                    }
                }
            }

            page_token = response.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        // A message whose detailed fetch fails is dropped with a logged
        // error; partial results are preferable to none
        let mut messages = Vec::with_capacity(ids.len());
        for id in ids {
            match self.fetch_full(&id).await {
                Ok(message) => messages.push(message),
                Err(e) => warn!("Dropping message {} from search results: {}", id, e),
            }
        }

        Ok(messages)
    }

    async fn download(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>> {
        let (_, body) = self
            .hub
            .users()
            .messages_attachments_get("me", message_id, attachment_id)
            .add_scope(GMAIL_SCOPE)
            .doit()
            .await
            .map_err(ArchiveError::from_gmail)?;

        body.data.ok_or_else(|| {
            ArchiveError::Api(format!(
                "attachment {} of message {} has no payload",
                attachment_id, message_id
            ))
        })
    }

    async fn update_labels(
        &self,
        message_id: &str,
        add: &[String],
        remove: &[String],
    ) -> Result<()> {
        let request = ModifyMessageRequest {
            add_label_ids: if add.is_empty() {
                None
            } else {
                Some(add.to_vec())
            },
            remove_label_ids: if remove.is_empty() {
                None
            } else {
                Some(remove.to_vec())
            },
        };

        self.hub
            .users()
            .messages_modify(request, "me", message_id)
            .add_scope(GMAIL_SCOPE)
            .doit()
            .await
            .map_err(ArchiveError::from_gmail)?;

        debug!("Updated labels on message {}", message_id);
        Ok(())
    }
}

/// Convert the API message into our read-only snapshot
fn convert_message(msg: google_gmail1::api::Message) -> Result<Message> {
    let id = msg
        .id
        .ok_or_else(|| ArchiveError::Api("message without ID".to_string()))?;
    let thread_id = msg.thread_id.unwrap_or_else(|| id.clone());

    let headers = msg
        .payload
        .as_ref()
        .and_then(|p| p.headers.as_ref())
        .map(|headers| {
            headers
                .iter()
                .filter_map(|h| match (&h.name, &h.value) {
                    (Some(name), Some(value)) => Some((name.clone(), value.clone())),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(Message {
        id,
        thread_id,
        label_ids: msg.label_ids.unwrap_or_default(),
        headers,
        payload: msg.payload.map(convert_part),
    })
}

/// Map the API's loosely-typed part tree onto the recursive sum type
fn convert_part(part: google_gmail1::api::MessagePart) -> Part {
    match part.parts {
        Some(children) if !children.is_empty() => Part::Container {
            children: children.into_iter().map(convert_part).collect(),
        },
        _ => {
            let (attachment_id, size_bytes) = match part.body {
                Some(body) => (
                    body.attachment_id,
                    body.size.map(|s| s.max(0) as u64).unwrap_or(0),
                ),
                None => (None, 0),
            };
            Part::Leaf {
                filename: part.filename.filter(|f| !f.is_empty()),
                mime_type: part
                    .mime_type
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
                attachment_id,
                size_bytes,
            }
        }
    }
}
