//! Scoped sessions.
//!
//! [`with_session`] is the only way the sweep talks to a store: log in,
//! confirm the session is authenticated, run one operation, log out.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::{Connector, KvSession, Result, SweepError};

/// Run `op` inside a freshly authenticated session.
///
/// Logout is attempted after `op` returns, whether it succeeded or not, and
/// also when the post-login authentication check fails.  An error from `op`
/// takes precedence over a logout error; the latter is then only logged.
pub async fn with_session<T, F, Fut>(connector: &dyn Connector, op: F) -> Result<T>
where
    F: FnOnce(Arc<dyn KvSession>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let session = connector.login().await?;
    debug!(address = connector.address(), "session opened");

    match session.is_authenticated().await {
        Ok(true) => {}
        Ok(false) => {
            release(session.as_ref()).await;
            return Err(SweepError::Authentication(
                "session is not authenticated after login".to_string(),
            ));
        }
        Err(e) => {
            release(session.as_ref()).await;
            return Err(e);
        }
    }

    let outcome = op(Arc::clone(&session)).await;

    match (outcome, session.logout().await) {
        (Ok(value), Ok(())) => {
            debug!(address = connector.address(), "session closed");
            Ok(value)
        }
        (Ok(_), Err(logout_err)) => Err(logout_err),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(logout_err)) => {
            warn!("logout after failed operation also failed: {logout_err}");
            Err(e)
        }
    }
}

/// Best-effort logout on a path that is already failing.
async fn release(session: &dyn KvSession) {
    if let Err(e) = session.logout().await {
        warn!("logout failed: {e}");
    }
}
