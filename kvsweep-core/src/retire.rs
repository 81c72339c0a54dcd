//! Path retirement: drop a path's metadata together with every version.

use tracing::{error, info};

use crate::{Connector, Result, SweepError, with_session};

/// Permanently delete `mount`/`path`.  Any non-2xx answer is a failure.
pub async fn delete(connector: &dyn Connector, mount: &str, path: &str) -> Result<()> {
    with_session(connector, |session| async move {
        let response = session.delete_metadata_and_all_versions(mount, path).await?;
        if !response.is_success() {
            return Err(SweepError::Validation(format!(
                "delete of {mount}/{path} returned status {}",
                response.status
            )));
        }
        info!(mount, path, "deleted path {path} at mount {mount}");
        Ok(())
    })
    .await
    .inspect_err(|e| error!(mount, path, "deleting path {path} on mount {mount} failed: {e}"))
}
