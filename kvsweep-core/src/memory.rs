//! In-process KV v2 store.
//!
//! Mirrors the listing and versioning behaviour of a Vault KV v2 mount closely
//! enough for the sweep workflows: folder keys carry a trailing `/`, an empty
//! listing answers NotFound, writes stack versions, and a metadata delete
//! drops every version at once.  Fault switches let callers simulate a
//! rejected login, a failed auth check, a bad delete status and so on.
//!
//! Every call is appended to a journal so callers can assert on exactly what
//! reached the store.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use crate::{
    Connector, DeleteResponse, KvSession, Result, SecretData, SecretMetadata, SweepError,
    WriteReceipt,
};

/// Timestamp layout Vault uses for `created_time` / `updated_time`.
pub const VAULT_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.9fZ";

/// Failure switches for [`MemoryStore`].
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// `login` fails with [`SweepError::Authentication`].
    pub reject_login: bool,
    /// `login` succeeds but `is_authenticated` answers `false`.
    pub report_unauthenticated: bool,
    /// `delete_metadata_and_all_versions` answers this status and keeps the data.
    pub delete_status: Option<u16>,
    /// Writes are dropped and answered without `created_time`.
    pub omit_created_time: bool,
    /// Listing this `(mount, path)` fails with a transport error.
    pub fail_listing: Option<(String, String)>,
}

#[derive(Debug, Clone)]
struct Entry {
    versions: BTreeMap<u64, SecretData>,
    current_version: u64,
    updated: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    mounts: HashMap<String, BTreeMap<String, Entry>>,
    faults: Faults,
    journal: Vec<String>,
    now: Option<DateTime<Utc>>,
}

impl State {
    fn now(&self) -> DateTime<Utc> {
        self.now.unwrap_or_else(Utc::now)
    }

    fn entry(&self, mount: &str, path: &str) -> Option<&Entry> {
        self.mounts.get(mount).and_then(|m| m.get(path))
    }
}

/// In-memory secret store; also its own [`Connector`].
#[derive(Debug, Clone)]
pub struct MemoryStore {
    address: String,
    state: Arc<Mutex<State>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            address: "memory://".to_string(),
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed a secret as a single version last updated at `updated`.
    pub fn insert(&self, mount: &str, path: &str, data: SecretData, updated: DateTime<Utc>) {
        let mut versions = BTreeMap::new();
        versions.insert(1, data);
        self.state().mounts.entry(mount.to_string()).or_default().insert(
            path.to_string(),
            Entry {
                versions,
                current_version: 1,
                updated,
            },
        );
    }

    /// Pin the clock used to stamp new writes.
    pub fn set_now(&self, now: DateTime<Utc>) {
        self.state().now = Some(now);
    }

    pub fn set_faults(&self, faults: Faults) {
        self.state().faults = faults;
    }

    /// Current-version data for a path, if it exists.
    pub fn current(&self, mount: &str, path: &str) -> Option<SecretData> {
        let state = self.state();
        let entry = state.entry(mount, path)?;
        entry.versions.get(&entry.current_version).cloned()
    }

    pub fn version_count(&self, mount: &str, path: &str) -> usize {
        self.state()
            .entry(mount, path)
            .map_or(0, |e| e.versions.len())
    }

    /// Every path stored under `mount`, sorted.
    pub fn paths(&self, mount: &str) -> Vec<String> {
        self.state()
            .mounts
            .get(mount)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Calls received so far, e.g. `login`, `list src/host1/`, `delete src/host1/db`.
    pub fn journal(&self) -> Vec<String> {
        self.state().journal.clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.state().journal.iter().filter(|j| *j == call).count()
    }
}

#[async_trait::async_trait]
impl Connector for MemoryStore {
    fn address(&self) -> &str {
        &self.address
    }

    async fn login(&self) -> Result<Arc<dyn KvSession>> {
        let mut state = self.state();
        if state.faults.reject_login {
            state.journal.push("login-rejected".to_string());
            return Err(SweepError::Authentication(
                "invalid role ID or secret ID".to_string(),
            ));
        }
        state.journal.push("login".to_string());
        Ok(Arc::new(MemorySession {
            state: Arc::clone(&self.state),
            active: AtomicBool::new(true),
        }))
    }
}

struct MemorySession {
    state: Arc<Mutex<State>>,
    active: AtomicBool,
}

impl MemorySession {
    /// Lock the store and record `call`, refusing once logged out.
    fn enter(&self, call: String) -> Result<MutexGuard<'_, State>> {
        if !self.active.load(Ordering::SeqCst) {
            return Err(SweepError::Authentication(
                "session already logged out".to_string(),
            ));
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.journal.push(call);
        Ok(state)
    }
}

/// Treat `host1` and `host1/` alike, as Vault does for LIST.
fn folder_prefix(path: &str) -> String {
    if path.is_empty() || path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    }
}

#[async_trait::async_trait]
impl KvSession for MemorySession {
    async fn is_authenticated(&self) -> Result<bool> {
        let state = self.enter("lookup-self".to_string())?;
        Ok(!state.faults.report_unauthenticated)
    }

    async fn list_secrets(&self, mount: &str, path: &str) -> Result<Vec<String>> {
        let state = self.enter(format!("list {mount}/{path}"))?;
        if let Some((m, p)) = &state.faults.fail_listing
            && m == mount
            && p == path
        {
            return Err(SweepError::Transport("connection reset by peer".to_string()));
        }

        let prefix = folder_prefix(path);
        let keys: BTreeSet<String> = state
            .mounts
            .get(mount)
            .into_iter()
            .flat_map(|m| m.keys())
            .filter_map(|key| key.strip_prefix(prefix.as_str()))
            .filter(|rest| !rest.is_empty())
            .map(|rest| match rest.find('/') {
                Some(i) => rest[..=i].to_string(),
                None => rest.to_string(),
            })
            .collect();

        if keys.is_empty() {
            return Err(SweepError::not_found(mount, path));
        }
        Ok(keys.into_iter().collect())
    }

    async fn read_secret_metadata(&self, mount: &str, path: &str) -> Result<SecretMetadata> {
        let state = self.enter(format!("metadata {mount}/{path}"))?;
        let entry = state
            .entry(mount, path)
            .ok_or_else(|| SweepError::not_found(mount, path))?;
        Ok(SecretMetadata {
            updated_time: entry.updated.format(VAULT_TIME_FORMAT).to_string(),
            current_version: entry.current_version,
        })
    }

    async fn read_secret_version(
        &self,
        mount: &str,
        path: &str,
        version: u64,
    ) -> Result<SecretData> {
        let state = self.enter(format!("read {mount}/{path}@{version}"))?;
        state
            .entry(mount, path)
            .and_then(|e| e.versions.get(&version))
            .cloned()
            .ok_or_else(|| SweepError::not_found(mount, path))
    }

    async fn create_or_update_secret(
        &self,
        mount: &str,
        path: &str,
        data: &SecretData,
    ) -> Result<WriteReceipt> {
        let mut state = self.enter(format!("write {mount}/{path}"))?;
        if state.faults.omit_created_time {
            return Ok(WriteReceipt::default());
        }

        let now = state.now();
        let entry = state
            .mounts
            .entry(mount.to_string())
            .or_default()
            .entry(path.to_string())
            .or_insert_with(|| Entry {
                versions: BTreeMap::new(),
                current_version: 0,
                updated: now,
            });
        entry.current_version += 1;
        entry.updated = now;
        entry.versions.insert(entry.current_version, data.clone());

        Ok(WriteReceipt {
            created_time: Some(now.format(VAULT_TIME_FORMAT).to_string()),
            version: Some(entry.current_version),
        })
    }

    async fn delete_metadata_and_all_versions(
        &self,
        mount: &str,
        path: &str,
    ) -> Result<DeleteResponse> {
        let mut state = self.enter(format!("delete {mount}/{path}"))?;
        if let Some(status) = state.faults.delete_status {
            return Ok(DeleteResponse { status });
        }
        if let Some(m) = state.mounts.get_mut(mount) {
            m.remove(path);
        }
        Ok(DeleteResponse { status: 204 })
    }

    async fn logout(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.journal.push("logout".to_string());
        self.active.store(false, Ordering::SeqCst);
        Ok(())
    }
}
