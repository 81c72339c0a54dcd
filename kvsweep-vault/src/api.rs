//! Vault HTTP API client for the KV v2 and AppRole endpoints.
//!
//! Every request goes to `{address}/v1/...` and carries `X-Vault-Token`
//! (after login) plus `X-Vault-Namespace` when a namespace is configured:
//!
//! 1. POST   `auth/{approle}/login`           → client token
//! 2. GET    `auth/token/lookup-self`         → is the token valid?
//! 3. GET    `{mount}/metadata/{path}?list=true` → child keys
//! 4. GET    `{mount}/metadata/{path}`        → updated_time, current_version
//! 5. GET    `{mount}/data/{path}?version=N`  → secret data
//! 6. POST   `{mount}/data/{path}`            → created_time of the new version
//! 7. DELETE `{mount}/metadata/{path}`        → status only
//! 8. POST   `auth/token/revoke-self`

use std::time::Duration;

use kvsweep_core::{SecretData, SweepError};
use reqwest::{Client as HttpClient, Method, RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

const TOKEN_HEADER: &str = "X-Vault-Token";
const NAMESPACE_HEADER: &str = "X-Vault-Namespace";

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

pub struct VaultApiClient {
    http: HttpClient,
    address: String,
    base: Url,
    namespace: Option<String>,
}

impl VaultApiClient {
    pub fn new(
        address: &str,
        namespace: Option<String>,
        timeout: Duration,
    ) -> Result<Self, VaultApiError> {
        let http = HttpClient::builder()
            .user_agent(format!("kvsweep/{}", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .build()
            .map_err(VaultApiError::Http)?;
        let address = address.trim_end_matches('/').to_string();
        let base = Url::parse(&format!("{address}/v1/"))
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| VaultApiError::InvalidAddress(address.clone()))?;
        Ok(Self {
            http,
            address,
            base,
            namespace,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// `{address}/v1/` plus `segments`, each percent-encoded on its own so
    /// `#`, `?` and `%` in a key never change which path is addressed.
    fn endpoint<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Url {
        let mut url = self.base.clone();
        // `new` rejected cannot-be-a-base addresses.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// `{mount}/{kind}/{path}`; a trailing `/` on `path` is kept for LIST.
    fn kv_url(&self, mount: &str, kind: &str, path: &str) -> Url {
        self.endpoint(
            mount_segments(mount)
                .chain([kind])
                .chain(path.trim_start_matches('/').split('/')),
        )
    }

    fn request(&self, method: Method, url: Url, token: Option<&str>) -> RequestBuilder {
        let mut req = self.http.request(method, url);
        if let Some(ns) = &self.namespace {
            req = req.header(NAMESPACE_HEADER, ns);
        }
        if let Some(token) = token {
            req = req.header(TOKEN_HEADER, token);
        }
        req
    }

    /// AppRole login.
    pub async fn login_approle(
        &self,
        approle_mount: &str,
        role_id: &str,
        secret_id: &str,
    ) -> Result<AuthData, VaultApiError> {
        let url = self.endpoint(
            ["auth"]
                .into_iter()
                .chain(mount_segments(approle_mount))
                .chain(["login"]),
        );
        debug!(%approle_mount, "vault approle login");

        let resp = self
            .request(Method::POST, url, None)
            .json(&AppRoleLogin { role_id, secret_id })
            .send()
            .await?;
        let login: LoginResponse = check(resp).await?.json().await?;
        let auth = login
            .auth
            .ok_or_else(|| VaultApiError::Decode("login response has no auth block".to_string()))?;
        debug!(lease_secs = auth.lease_duration, "vault login ok");
        Ok(auth)
    }

    /// `Ok(false)` when Vault rejects the token, `Err` for anything else.
    pub async fn lookup_self(&self, token: &str) -> Result<bool, VaultApiError> {
        let resp = self
            .request(
                Method::GET,
                self.endpoint(["auth", "token", "lookup-self"]),
                Some(token),
            )
            .send()
            .await?;
        match check(resp).await {
            Ok(_) => Ok(true),
            Err(VaultApiError::PermissionDenied(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn revoke_self(&self, token: &str) -> Result<(), VaultApiError> {
        let resp = self
            .request(
                Method::POST,
                self.endpoint(["auth", "token", "revoke-self"]),
                Some(token),
            )
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    pub async fn list(
        &self,
        token: &str,
        mount: &str,
        path: &str,
    ) -> Result<Vec<String>, VaultApiError> {
        debug!(mount, path, "vault list");
        let resp = self
            .request(Method::GET, self.kv_url(mount, "metadata", path), Some(token))
            .query(&[("list", "true")])
            .send()
            .await?;
        let list: Envelope<ListData> = check(resp).await?.json().await?;
        Ok(list.into_data()?.keys)
    }

    pub async fn read_metadata(
        &self,
        token: &str,
        mount: &str,
        path: &str,
    ) -> Result<MetadataData, VaultApiError> {
        let resp = self
            .request(Method::GET, self.kv_url(mount, "metadata", path), Some(token))
            .send()
            .await?;
        let meta: Envelope<MetadataData> = check(resp).await?.json().await?;
        meta.into_data()
    }

    pub async fn read_version(
        &self,
        token: &str,
        mount: &str,
        path: &str,
        version: u64,
    ) -> Result<SecretData, VaultApiError> {
        let resp = self
            .request(Method::GET, self.kv_url(mount, "data", path), Some(token))
            .query(&[("version", version)])
            .send()
            .await?;
        let read: Envelope<VersionData> = check(resp).await?.json().await?;
        read.into_data()?.data.ok_or_else(|| {
            VaultApiError::Decode(format!("version {version} has no data (deleted or destroyed)"))
        })
    }

    pub async fn write(
        &self,
        token: &str,
        mount: &str,
        path: &str,
        data: &SecretData,
    ) -> Result<WriteData, VaultApiError> {
        debug!(mount, path, keys = data.len(), "vault write");
        let resp = self
            .request(Method::POST, self.kv_url(mount, "data", path), Some(token))
            .json(&WriteRequest { data })
            .send()
            .await?;
        let written: Envelope<WriteData> = check(resp).await?.json().await?;
        // A missing data block is reported as an empty receipt; the caller
        // decides whether that is a failure.
        Ok(written.data.unwrap_or_default())
    }

    /// Delete metadata and all versions.  The status is returned as-is so the
    /// caller can judge it.
    pub async fn delete_metadata(
        &self,
        token: &str,
        mount: &str,
        path: &str,
    ) -> Result<StatusCode, VaultApiError> {
        debug!(mount, path, "vault delete metadata");
        let resp = self
            .request(Method::DELETE, self.kv_url(mount, "metadata", path), Some(token))
            .send()
            .await?;
        Ok(resp.status())
    }
}

/// Mounts may be nested (`team/kv`); each part is its own segment.
fn mount_segments(mount: &str) -> impl Iterator<Item = &str> {
    mount.trim_matches('/').split('/')
}

/// Turn a non-2xx response into an error, reading Vault's `errors` array.
async fn check(resp: Response) -> Result<Response, VaultApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&body)
        .ok()
        .filter(|e| !e.errors.is_empty())
        .map(|e| e.errors.join("; "))
        .unwrap_or(body);

    Err(match status {
        StatusCode::NOT_FOUND => VaultApiError::NotFound,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => VaultApiError::PermissionDenied(message),
        _ => VaultApiError::Api {
            status: status.as_u16(),
            message,
        },
    })
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct AppRoleLogin<'a> {
    role_id: &'a str,
    secret_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    auth: Option<AuthData>,
}

#[derive(Deserialize)]
pub struct AuthData {
    pub client_token: String,
    #[serde(default)]
    pub lease_duration: u64,
    #[serde(default)]
    pub policies: Vec<String>,
}

impl std::fmt::Debug for AuthData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthData")
            .field("client_token", &"[redacted]")
            .field("lease_duration", &self.lease_duration)
            .field("policies", &self.policies)
            .finish()
    }
}

/// Vault wraps every payload in a top-level `data` object.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
}

impl<T> Envelope<T> {
    fn into_data(self) -> Result<T, VaultApiError> {
        self.data
            .ok_or_else(|| VaultApiError::Decode("response has no data block".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct ListData {
    keys: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetadataData {
    pub updated_time: String,
    pub current_version: u64,
}

#[derive(Deserialize)]
struct VersionData {
    #[serde(default)]
    data: Option<SecretData>,
}

#[derive(Serialize)]
struct WriteRequest<'a> {
    data: &'a SecretData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WriteData {
    #[serde(default)]
    pub created_time: Option<String>,
    #[serde(default)]
    pub version: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    errors: Vec<String>,
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum VaultApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("not found")]
    NotFound,

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("invalid Vault address {0:?}")]
    InvalidAddress(String),
}

impl VaultApiError {
    /// Convert with the mount/path the failing call was about.
    pub fn at(self, mount: &str, path: &str) -> SweepError {
        match self {
            Self::NotFound => SweepError::not_found(mount, path),
            other => other.into(),
        }
    }
}

impl From<VaultApiError> for SweepError {
    fn from(e: VaultApiError) -> Self {
        match e {
            VaultApiError::Http(err) if err.is_decode() => {
                SweepError::Validation(format!("unexpected response body: {err}"))
            }
            VaultApiError::Http(err) => SweepError::Transport(err.to_string()),
            VaultApiError::NotFound => SweepError::Api {
                status: 404,
                message: "not found".to_string(),
            },
            VaultApiError::PermissionDenied(msg) => SweepError::Api {
                status: 403,
                message: msg,
            },
            VaultApiError::Api { status, message } => SweepError::Api { status, message },
            VaultApiError::Decode(msg) => SweepError::Validation(msg),
            VaultApiError::InvalidAddress(address) => {
                SweepError::Config(format!("invalid Vault address {address:?}"))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
