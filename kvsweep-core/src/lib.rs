//! Core of kvsweep: age-based maintenance for KV v2 secret stores.
//!
//! The crate is split leaf-first:
//!
//! - **`session`**: scoped login/logout around a single operation
//! - **`enumerate`**: one-level path listing under a mount
//! - **`age`**: last-update parsing and the whole-day age test
//! - **`transfer`**: copy the current version of a secret to another mount
//! - **`retire`**: delete a path's metadata and every version
//! - **`sweep`**: the copy / clean workflows and the full run driver
//!
//! Remote stores plug in through [`Connector`] and [`KvSession`].  The
//! Vault implementation lives in `kvsweep-vault`; [`memory::MemoryStore`] is
//! an in-process store with the same listing semantics.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub mod age;
pub mod config;
pub mod enumerate;
pub mod error;
pub mod logging;
pub mod memory;
pub mod retire;
pub mod session;
pub mod sweep;
pub mod transfer;

pub use error::{Result, SweepError};
pub use session::with_session;
pub use sweep::{Sweeper, SweepPlan};

/// Payload of one secret version.
///
/// Values are kept as JSON so structured entries survive a copy untouched.
/// `Debug` never prints values.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretData(serde_json::Map<String, serde_json::Value>);

impl SecretData {
    pub fn new(map: serde_json::Map<String, serde_json::Value>) -> Self {
        Self(map)
    }

    /// Build from plain string pairs.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
                .collect(),
        )
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.0
    }

    pub fn into_map(self) -> serde_json::Map<String, serde_json::Value> {
        self.0
    }
}

impl std::fmt::Debug for SecretData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretData")
            .field("keys", &self.0.keys().collect::<Vec<_>>())
            .field("values", &"[redacted]")
            .finish()
    }
}

/// The subset of per-path metadata the sweep needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretMetadata {
    /// Server timestamp, e.g. `2021-03-09T21:07:09.406443746Z`.
    pub updated_time: String,
    pub current_version: u64,
}

/// Response to a create-or-update call.
///
/// `created_time` is the success marker: a write without it is treated as
/// failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteReceipt {
    pub created_time: Option<String>,
    pub version: Option<u64>,
}

/// Raw outcome of a delete-metadata-and-all-versions call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteResponse {
    pub status: u16,
}

impl DeleteResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// An authenticated handle to the secret store.
///
/// Sessions are short-lived: [`with_session`] creates one per logical
/// operation and calls [`KvSession::logout`] when the operation ends.
#[async_trait::async_trait]
pub trait KvSession: Send + Sync {
    /// Ask the store whether the session's credentials are still valid.
    async fn is_authenticated(&self) -> Result<bool>;

    /// Immediate child keys under `path`.  Folders carry a trailing `/`.
    ///
    /// Returns [`SweepError::NotFound`] when nothing lives under `path`.
    async fn list_secrets(&self, mount: &str, path: &str) -> Result<Vec<String>>;

    async fn read_secret_metadata(&self, mount: &str, path: &str) -> Result<SecretMetadata>;

    async fn read_secret_version(
        &self,
        mount: &str,
        path: &str,
        version: u64,
    ) -> Result<SecretData>;

    /// Create the path or add a new version on top of it.
    async fn create_or_update_secret(
        &self,
        mount: &str,
        path: &str,
        data: &SecretData,
    ) -> Result<WriteReceipt>;

    /// Transport errors are returned as `Err`; HTTP-level failures are
    /// reported through [`DeleteResponse::status`] for the caller to judge.
    async fn delete_metadata_and_all_versions(
        &self,
        mount: &str,
        path: &str,
    ) -> Result<DeleteResponse>;

    async fn logout(&self) -> Result<()>;
}

/// Produces fresh sessions against one secret store.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    /// Human-readable location of the store, for log lines.
    fn address(&self) -> &str;

    async fn login(&self) -> Result<Arc<dyn KvSession>>;
}
