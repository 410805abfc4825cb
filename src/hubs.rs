//! API hub construction
//!
//! Builds the Gmail and Drive hubs over a shared TLS stack, both drawing
//! bearer tokens from the same [`SharedTokenProvider`].

use google_gmail1::Gmail;

use crate::auth::SharedTokenProvider;
use crate::drive::ArchiveHub;
use crate::error::{ArchiveError, Result};
use crate::gmail::GmailHub;

/// Build both API hubs from one authenticated provider
pub fn build(auth: SharedTokenProvider) -> Result<(GmailHub, ArchiveHub)> {
    let connector = hyper_rustls::HttpsConnectorBuilder::new()
        .with_native_roots()
        .map_err(|e| ArchiveError::Auth(format!("Failed to load TLS roots: {}", e)))?
        .https_or_http()
        .enable_http1()
        .build();

    let gmail_client =
        hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
            .build(connector.clone());
    let drive_client =
        hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
            .build(connector);

    let gmail = Gmail::new(gmail_client, auth.clone());
    let drive = google_drive3::DriveHub::new(drive_client, auth);
    Ok((gmail, drive))
}
