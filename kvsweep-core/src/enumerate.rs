//! Path enumeration.
//!
//! Secrets are expected at exactly one level below the mount root, e.g.
//! `{host}/{secret}`.  Listing the root yields `host1/`, listing that yields
//! `db`, and the emitted path is the plain concatenation `host1/db`.  A
//! top-level key with no children contributes nothing.

use tracing::{debug, info};

use crate::{KvSession, Result};

/// All `{key}{subkey}` paths under `mount`, in listing order.
///
/// A NotFound listing counts as empty; any other error aborts the whole call.
pub async fn list_paths(session: &dyn KvSession, mount: &str) -> Result<Vec<String>> {
    let mut paths = Vec::new();

    for key in list_or_empty(session, mount, "").await? {
        for subkey in list_or_empty(session, mount, &key).await? {
            paths.push(format!("{key}{subkey}"));
        }
    }

    info!(
        mount,
        count = paths.len(),
        "retrieved {} paths from mount {mount}",
        paths.len()
    );
    Ok(paths)
}

async fn list_or_empty(session: &dyn KvSession, mount: &str, path: &str) -> Result<Vec<String>> {
    match session.list_secrets(mount, path).await {
        Ok(keys) => Ok(keys),
        Err(e) if e.is_not_found() => {
            debug!(mount, path, "nothing listed");
            Ok(Vec::new())
        }
        Err(e) => Err(e),
    }
}
