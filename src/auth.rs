//! OAuth2 token lifecycle for the Gmail and Drive APIs
//!
//! Unlike a cached-authenticator setup, the token lifecycle is owned
//! explicitly here: the provider persists a single credential, refreshes it
//! through the token endpoint when its remaining lifetime drops below a
//! five-minute buffer, and performs the one-time authorization-code exchange
//! during bootstrap. Both API hubs draw bearer tokens from it through the
//! `GetToken` trait.

use chrono::{DateTime, Duration, Utc};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper_util::client::legacy::connect::HttpConnector;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use yup_oauth2::ApplicationSecret;

use crate::error::{ArchiveError, Result};

/// Scopes required by the pipeline: message read/label write on the mail
/// side, file creation on the archive side
pub const REQUIRED_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.modify",
    "https://www.googleapis.com/auth/drive.file",
];

/// Refresh when less than this many seconds of token lifetime remain
pub const REFRESH_BUFFER_SECS: i64 = 300;

type TokenHttpClient = hyper_util::client::legacy::Client<
    hyper_rustls::HttpsConnector<HttpConnector>,
    Full<Bytes>,
>;

/// The one credential this system holds, persisted to the token file
///
/// `expiry_time` always reflects the token actually in use; only the
/// refresh and exchange operations mutate it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCredential {
    pub access_token: String,
    pub refresh_token: String,
    pub expiry_time: DateTime<Utc>,
    pub token_type: String,
}

impl StoredCredential {
    /// Remaining lifetime in seconds (negative when expired)
    pub fn seconds_remaining(&self, now: DateTime<Utc>) -> i64 {
        (self.expiry_time - now).num_seconds()
    }

    /// True when the remaining lifetime is below the refresh buffer
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        self.seconds_remaining(now) < REFRESH_BUFFER_SECS
    }
}

/// Non-throwing status probe for health/status collaborators
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenStatus {
    pub has_credential: bool,
    pub is_expired: bool,
    pub seconds_remaining: i64,
}

/// Response shape of the Google OAuth2 token endpoint
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    /// Refresh tokens are not always reissued
    refresh_token: Option<String>,
    token_type: Option<String>,
}

/// Owns the access/refresh token pair and supplies bearer credentials to
/// every other component
pub struct TokenProvider {
    secret: ApplicationSecret,
    token_path: PathBuf,
    credential: Mutex<Option<StoredCredential>>,
    http: TokenHttpClient,
}

impl TokenProvider {
    /// Create a provider, loading any previously persisted credential
    pub async fn new(secret: ApplicationSecret, token_path: &Path) -> Result<Self> {
        let credential = load_credential(token_path).await?;
        if credential.is_some() {
            debug!("Loaded stored credential from {:?}", token_path);
        }

        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .map_err(|e| ArchiveError::Auth(format!("Failed to load TLS roots: {}", e)))?
            .https_only()
            .enable_http1()
            .build();
        let http =
            hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
                .build(connector);

        Ok(Self {
            secret,
            token_path: token_path.to_path_buf(),
            credential: Mutex::new(credential),
            http,
        })
    }

    /// Return a bearer token, refreshing first if the remaining lifetime is
    /// below the buffer
    ///
    /// Fails with an auth error when no credential is stored at all; that
    /// signals the caller that first-time authorization is required.
    pub async fn get_valid_token(&self) -> Result<String> {
        let mut guard = self.credential.lock().await;
        let credential = guard.as_mut().ok_or_else(|| {
            ArchiveError::Auth(
                "no credential stored; first-time authorization is required".to_string(),
            )
        })?;

        if !credential.needs_refresh(Utc::now()) {
            return Ok(credential.access_token.clone());
        }

        let refreshed = self.refresh(&credential.refresh_token).await?;
        *credential = refreshed.clone();
        drop(guard);

        self.persist(&refreshed).await?;
        Ok(refreshed.access_token)
    }

    /// Exchange the refresh token for a new access token
    ///
    /// The old refresh token is retained when the response omits a new one.
    /// Failure is fatal for the current run; refresh tokens rarely recover
    /// mid-run.
    pub async fn refresh(&self, refresh_token: &str) -> Result<StoredCredential> {
        debug!("Refreshing access token");
        let form = form_encode(&[
            ("client_id", &self.secret.client_id),
            ("client_secret", &self.secret.client_secret),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ]);

        let response = self
            .post_token_endpoint(form)
            .await
            .map_err(|e| match e {
                ArchiveError::Network(msg) => ArchiveError::TokenRefresh(msg),
                other => other,
            })?;

        let response = match response {
            Ok(token) => token,
            Err(body) => {
                return Err(ArchiveError::TokenRefresh(format!(
                    "token endpoint rejected refresh: {}",
                    body
                )))
            }
        };

        info!("Access token refreshed");
        Ok(StoredCredential {
            access_token: response.access_token,
            refresh_token: response
                .refresh_token
                .unwrap_or_else(|| refresh_token.to_string()),
            expiry_time: Utc::now() + Duration::seconds(response.expires_in),
            token_type: response.token_type.unwrap_or_else(|| "Bearer".to_string()),
        })
    }

    /// One-time bootstrap: exchange an authorization code for a credential
    ///
    /// Fails when the response lacks a refresh token, which happens when
    /// offline-access consent was not granted; the caller must re-request
    /// the consent screen.
    pub async fn exchange_authorization_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<StoredCredential> {
        let form = form_encode(&[
            ("client_id", &self.secret.client_id),
            ("client_secret", &self.secret.client_secret),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("grant_type", "authorization_code"),
        ]);

        let response = match self.post_token_endpoint(form).await? {
            Ok(token) => token,
            Err(body) => {
                return Err(ArchiveError::Auth(format!(
                    "authorization code exchange failed: {}",
                    body
                )))
            }
        };

        let refresh_token = response.refresh_token.ok_or_else(|| {
            ArchiveError::Auth(
                "no refresh token in response; re-request consent with offline access".to_string(),
            )
        })?;

        let credential = StoredCredential {
            access_token: response.access_token,
            refresh_token,
            expiry_time: Utc::now() + Duration::seconds(response.expires_in),
            token_type: response.token_type.unwrap_or_else(|| "Bearer".to_string()),
        };

        self.persist(&credential).await?;
        *self.credential.lock().await = Some(credential.clone());
        info!("Authorization complete, credential stored");
        Ok(credential)
    }

    /// Consent-screen URL for first-time authorization
    ///
    /// Requests offline access with a forced consent prompt so a refresh
    /// token is actually issued.
    pub fn authorization_url(&self, redirect_uri: &str) -> String {
        let scope = REQUIRED_SCOPES.join(" ");
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent",
            self.secret.auth_uri,
            utf8_percent_encode(&self.secret.client_id, NON_ALPHANUMERIC),
            utf8_percent_encode(redirect_uri, NON_ALPHANUMERIC),
            utf8_percent_encode(&scope, NON_ALPHANUMERIC),
        )
    }

    /// Non-throwing status probe
    pub async fn validate(&self) -> TokenStatus {
        let guard = self.credential.lock().await;
        match guard.as_ref() {
            Some(credential) => {
                let remaining = credential.seconds_remaining(Utc::now());
                TokenStatus {
                    has_credential: true,
                    is_expired: remaining <= 0,
                    seconds_remaining: remaining.max(0),
                }
            }
            None => TokenStatus {
                has_credential: false,
                is_expired: true,
                seconds_remaining: 0,
            },
        }
    }

    /// POST a form to the token endpoint; `Ok(Err(body))` is a non-2xx
    /// response with its body text
    async fn post_token_endpoint(
        &self,
        form: String,
    ) -> Result<std::result::Result<TokenResponse, String>> {
        let request = hyper::Request::builder()
            .method(hyper::Method::POST)
            .uri(&self.secret.token_uri)
            .header(
                hyper::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(Full::new(Bytes::from(form)))
            .map_err(|e| ArchiveError::Network(format!("Failed to build request: {}", e)))?;

        let response = self
            .http
            .request(request)
            .await
            .map_err(|e| ArchiveError::Network(format!("Token endpoint unreachable: {}", e)))?;

        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| ArchiveError::Network(format!("Failed to read response: {}", e)))?
            .to_bytes();

        if !status.is_success() {
            return Ok(Err(format!(
                "HTTP {}: {}",
                status.as_u16(),
                String::from_utf8_lossy(&body)
            )));
        }

        let token: TokenResponse = serde_json::from_slice(&body)?;
        Ok(Ok(token))
    }

    /// Persist the credential with owner-only permissions
    async fn persist(&self, credential: &StoredCredential) -> Result<()> {
        if let Some(parent) = self.token_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(credential)?;
        tokio::fs::write(&self.token_path, json).await?;
        secure_token_file(&self.token_path).await?;
        debug!("Persisted credential to {:?}", self.token_path);
        Ok(())
    }
}

/// Shareable handle both API hubs authenticate through
#[derive(Clone)]
pub struct SharedTokenProvider(pub Arc<TokenProvider>);

impl google_gmail1::common::GetToken for SharedTokenProvider {
    fn get_token(
        &self,
        _scopes: &[&str],
    ) -> Pin<
        Box<
            dyn Future<
                    Output = std::result::Result<
                        Option<String>,
                        Box<dyn std::error::Error + Send + Sync>,
                    >,
                > + Send,
        >,
    > {
        let provider = Arc::clone(&self.0);
        Box::pin(async move {
            let token = provider
                .get_valid_token()
                .await
                .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)?;
            Ok(Some(token))
        })
    }
}

async fn load_credential(path: &Path) -> Result<Option<StoredCredential>> {
    if !path.exists() {
        return Ok(None);
    }
    let json = tokio::fs::read_to_string(path).await?;
    let credential = serde_json::from_str(&json)?;
    Ok(Some(credential))
}

/// Load OAuth2 client credentials from the standard JSON file
pub async fn load_application_secret(path: &Path) -> Result<ApplicationSecret> {
    yup_oauth2::read_application_secret(path)
        .await
        .map_err(|e| ArchiveError::Auth(format!("Failed to read credentials: {}", e)))
}

fn form_encode(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| {
            format!(
                "{}={}",
                utf8_percent_encode(k, NON_ALPHANUMERIC),
                utf8_percent_encode(v, NON_ALPHANUMERIC)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Secure token file permissions on Unix systems (0600, owner only)
#[cfg(unix)]
async fn secure_token_file(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = tokio::fs::metadata(path).await?.permissions();
    perms.set_mode(0o600);
    tokio::fs::set_permissions(path, perms).await?;
    Ok(())
}

/// Windows uses ACLs instead of Unix permissions
#[cfg(windows)]
async fn secure_token_file(_path: &Path) -> Result<()> {
    Ok(())
}
