//! Secret transfer: copy the current version of a path to another mount.
//!
//! The read and the write each run in their own session.  The source is only
//! read; the destination path is created or overwritten wholesale.

use tracing::{error, info};

use crate::{Connector, Result, SecretData, SweepError, with_session};

/// Current-version data of `mount`/`path`.
pub async fn read_current(connector: &dyn Connector, mount: &str, path: &str) -> Result<SecretData> {
    with_session(connector, |session| async move {
        let metadata = session.read_secret_metadata(mount, path).await?;
        let data = session
            .read_secret_version(mount, path, metadata.current_version)
            .await?;
        info!(
            mount,
            path,
            version = metadata.current_version,
            "retrieved secret from mount {mount}, path {path}"
        );
        Ok(data)
    })
    .await
    .inspect_err(|e| error!(mount, path, "reading secret from mount {mount}, path {path} failed: {e}"))
}

/// Write `data` to `mount`/`path`, requiring a `created_time` in the answer.
pub async fn write_secret(
    connector: &dyn Connector,
    mount: &str,
    path: &str,
    data: &SecretData,
) -> Result<()> {
    with_session(connector, |session| async move {
        let receipt = session.create_or_update_secret(mount, path, data).await?;
        if receipt.created_time.is_none() {
            return Err(SweepError::Validation(format!(
                "write to {mount}/{path} returned no created_time"
            )));
        }
        info!(
            mount,
            path,
            version = receipt.version,
            "secret written to mount {mount}, path {path}"
        );
        Ok(())
    })
    .await
    .inspect_err(|e| error!(mount, path, "writing secret to mount {mount}, path {path} failed: {e}"))
}

/// Copy the current version of `source`/`path` to `destination`/`path`.
pub async fn copy(
    connector: &dyn Connector,
    source: &str,
    destination: &str,
    path: &str,
) -> Result<()> {
    let data = read_current(connector, source, path).await?;
    write_secret(connector, destination, path, &data).await
}
