//! Layered configuration.
//!
//! [`Settings`] mirrors the TOML file; every field is optional so that the
//! same struct can be filled from the file, then overlaid with environment
//! variables, then validated into a [`SweepConfig`].
//!
//! ```toml
//! [vault]
//! address       = "https://vault.example.com:8200"
//! namespace     = "ops"         # optional, Vault Enterprise only
//! timeout_secs  = 60
//! approle_mount = "approle"
//!
//! [source]
//! mount        = "kv-live"
//! max_age_days = 30
//!
//! [destination]
//! mount        = "kv-archive"
//! max_age_days = 365
//!
//! [log]
//! level  = "info"
//! format = "key-value"
//! ```
//!
//! The AppRole `role_id` / `secret_id` may also live under `[vault]`, but are
//! normally supplied through `VAULT_ROLE_ID` / `VAULT_SECRET_ID`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::logging::LogConfig;
use crate::sweep::SweepPlan;
use crate::{Result, SweepError};

pub const ENV_ADDR: &str = "VAULT_ADDR";
pub const ENV_NAMESPACE: &str = "VAULT_NAMESPACE";
pub const ENV_ROLE_ID: &str = "VAULT_ROLE_ID";
pub const ENV_SECRET_ID: &str = "VAULT_SECRET_ID";
pub const ENV_SOURCE_MOUNT: &str = "VAULT_SOURCE_MOUNT";
pub const ENV_DESTINATION_MOUNT: &str = "VAULT_DESTINATION_MOUNT";
pub const ENV_SOURCE_AGE: &str = "VAULT_SOURCE_AGE";
pub const ENV_DESTINATION_AGE: &str = "VAULT_DESTINATION_AGE";
pub const ENV_LOG: &str = "KVSWEEP_LOG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub vault: VaultSection,
    #[serde(default)]
    pub source: MountSection,
    #[serde(default)]
    pub destination: MountSection,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct VaultSection {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_approle_mount")]
    pub approle_mount: String,
    #[serde(default)]
    pub role_id: Option<String>,
    #[serde(default)]
    pub secret_id: Option<String>,
    /// Revoke the session token on logout instead of letting it expire.
    #[serde(default = "default_revoke_on_logout")]
    pub revoke_on_logout: bool,
}

impl Default for VaultSection {
    fn default() -> Self {
        Self {
            address: None,
            namespace: None,
            timeout_secs: default_timeout_secs(),
            approle_mount: default_approle_mount(),
            role_id: None,
            secret_id: None,
            revoke_on_logout: default_revoke_on_logout(),
        }
    }
}

impl std::fmt::Debug for VaultSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultSection")
            .field("address", &self.address)
            .field("namespace", &self.namespace)
            .field("timeout_secs", &self.timeout_secs)
            .field("approle_mount", &self.approle_mount)
            .field("role_id", &self.role_id)
            .field("secret_id", &self.secret_id.as_ref().map(|_| "[redacted]"))
            .field("revoke_on_logout", &self.revoke_on_logout)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MountSection {
    #[serde(default)]
    pub mount: Option<String>,
    #[serde(default)]
    pub max_age_days: Option<u32>,
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_approle_mount() -> String {
    "approle".to_string()
}

fn default_revoke_on_logout() -> bool {
    true
}

/// Validated connection settings for the secret store.
#[derive(Clone)]
pub struct VaultConfig {
    pub address: String,
    pub namespace: Option<String>,
    pub timeout: Duration,
    pub approle_mount: String,
    pub role_id: String,
    pub secret_id: Zeroizing<String>,
    pub revoke_on_logout: bool,
}

impl std::fmt::Debug for VaultConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultConfig")
            .field("address", &self.address)
            .field("namespace", &self.namespace)
            .field("timeout", &self.timeout)
            .field("approle_mount", &self.approle_mount)
            .field("role_id", &self.role_id)
            .field("secret_id", &"[redacted]")
            .field("revoke_on_logout", &self.revoke_on_logout)
            .finish()
    }
}

/// Everything a run needs, fully validated.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub vault: VaultConfig,
    pub plan: SweepPlan,
    pub log: LogConfig,
}

impl Settings {
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| SweepError::Config(format!("invalid TOML: {e}")))
    }

    /// Overlay values from the environment.  `lookup` is normally
    /// `|k| std::env::var(k).ok()`.  Empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get(ENV_ADDR) {
            self.vault.address = Some(v);
        }
        if let Some(v) = get(ENV_NAMESPACE) {
            self.vault.namespace = Some(v);
        }
        if let Some(v) = get(ENV_ROLE_ID) {
            self.vault.role_id = Some(v);
        }
        if let Some(v) = get(ENV_SECRET_ID) {
            self.vault.secret_id = Some(v);
        }
        if let Some(v) = get(ENV_SOURCE_MOUNT) {
            self.source.mount = Some(v);
        }
        if let Some(v) = get(ENV_DESTINATION_MOUNT) {
            self.destination.mount = Some(v);
        }
        if let Some(v) = get(ENV_SOURCE_AGE) {
            self.source.max_age_days = Some(parse_days(ENV_SOURCE_AGE, &v)?);
        }
        if let Some(v) = get(ENV_DESTINATION_AGE) {
            self.destination.max_age_days = Some(parse_days(ENV_DESTINATION_AGE, &v)?);
        }
        if let Some(v) = get(ENV_LOG) {
            self.log.level = v;
        }
        Ok(())
    }

    /// Check that every required value is present; missing ones are reported
    /// together.
    pub fn resolve(self) -> Result<SweepConfig> {
        let mut missing = Vec::new();
        let mut require = |value: Option<String>, name: &'static str| {
            if value.is_none() {
                missing.push(name);
            }
            value.unwrap_or_default()
        };

        let address = require(self.vault.address, "vault.address / VAULT_ADDR");
        let role_id = require(self.vault.role_id, "vault.role_id / VAULT_ROLE_ID");
        let secret_id = require(self.vault.secret_id, "vault.secret_id / VAULT_SECRET_ID");
        let source_mount = require(self.source.mount, "source.mount / VAULT_SOURCE_MOUNT");
        let destination_mount = require(
            self.destination.mount,
            "destination.mount / VAULT_DESTINATION_MOUNT",
        );
        if self.source.max_age_days.is_none() {
            missing.push("source.max_age_days / VAULT_SOURCE_AGE");
        }
        if self.destination.max_age_days.is_none() {
            missing.push("destination.max_age_days / VAULT_DESTINATION_AGE");
        }

        if !missing.is_empty() {
            return Err(SweepError::Config(format!(
                "missing required settings: {}",
                missing.join(", ")
            )));
        }
        if source_mount == destination_mount {
            return Err(SweepError::Config(format!(
                "source and destination mount are both {source_mount:?}"
            )));
        }
        if self.vault.timeout_secs == 0 {
            return Err(SweepError::Config(
                "vault.timeout_secs must be greater than zero".to_string(),
            ));
        }

        Ok(SweepConfig {
            vault: VaultConfig {
                address: address.trim_end_matches('/').to_string(),
                namespace: self.vault.namespace,
                timeout: Duration::from_secs(self.vault.timeout_secs),
                approle_mount: self.vault.approle_mount,
                role_id,
                secret_id: Zeroizing::new(secret_id),
                revoke_on_logout: self.vault.revoke_on_logout,
            },
            plan: SweepPlan {
                source_mount,
                destination_mount,
                source_max_age_days: self.source.max_age_days.unwrap_or_default(),
                destination_max_age_days: self.destination.max_age_days.unwrap_or_default(),
            },
            log: self.log,
        })
    }
}

fn parse_days(key: &str, raw: &str) -> Result<u32> {
    raw.trim().parse::<u32>().map_err(|_| {
        SweepError::Config(format!(
            "{key} must be a non-negative whole number of days, got {raw:?}"
        ))
    })
}
