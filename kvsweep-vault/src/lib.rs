//! HashiCorp Vault connector: AppRole login and KV v2 operations over HTTP.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use kvsweep_core::config::VaultConfig;
use kvsweep_core::{
    Connector, DeleteResponse, KvSession, Result, SecretData, SecretMetadata, SweepError,
    WriteReceipt,
};
use tracing::{debug, info};
use zeroize::Zeroizing;

pub mod api;

#[cfg(test)]
mod test_server;

pub use api::{VaultApiClient, VaultApiError};

/// Logs in with AppRole credentials and hands out [`VaultSession`]s.
pub struct VaultConnector {
    client: Arc<VaultApiClient>,
    approle_mount: String,
    role_id: String,
    secret_id: Zeroizing<String>,
    revoke_on_logout: bool,
}

impl std::fmt::Debug for VaultConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultConnector")
            .field("address", &self.client.address())
            .field("approle_mount", &self.approle_mount)
            .field("role_id", &self.role_id)
            .field("secret_id", &"[redacted]")
            .field("revoke_on_logout", &self.revoke_on_logout)
            .finish()
    }
}

impl VaultConnector {
    pub fn new(config: &VaultConfig) -> Result<Self> {
        let client = VaultApiClient::new(&config.address, config.namespace.clone(), config.timeout)
            .map_err(|e| SweepError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client: Arc::new(client),
            approle_mount: config.approle_mount.clone(),
            role_id: config.role_id.clone(),
            secret_id: config.secret_id.clone(),
            revoke_on_logout: config.revoke_on_logout,
        })
    }
}

#[async_trait]
impl Connector for VaultConnector {
    fn address(&self) -> &str {
        self.client.address()
    }

    async fn login(&self) -> Result<Arc<dyn KvSession>> {
        let auth = self
            .client
            .login_approle(&self.approle_mount, &self.role_id, &self.secret_id)
            .await
            .map_err(|e| auth_failure("approle login", e))?;
        debug!(address = self.client.address(), "vault session opened");

        Ok(Arc::new(VaultSession {
            client: Arc::clone(&self.client),
            token: Mutex::new(Some(Zeroizing::new(auth.client_token))),
            revoke_on_logout: self.revoke_on_logout,
        }))
    }
}

/// Network and body-decoding failures keep their own class; any answer from
/// Vault itself is an authentication failure.
fn auth_failure(step: &str, e: VaultApiError) -> SweepError {
    match e {
        VaultApiError::Http(_) => e.into(),
        other => SweepError::Authentication(format!("{step} failed: {other}")),
    }
}

/// One logged-in token.  The token is dropped (and zeroed) on logout.
pub struct VaultSession {
    client: Arc<VaultApiClient>,
    token: Mutex<Option<Zeroizing<String>>>,
    revoke_on_logout: bool,
}

impl VaultSession {
    fn token(&self) -> Result<Zeroizing<String>> {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| SweepError::Authentication("session is logged out".to_string()))
    }
}

#[async_trait]
impl KvSession for VaultSession {
    async fn is_authenticated(&self) -> Result<bool> {
        let Ok(token) = self.token() else {
            return Ok(false);
        };
        self.client
            .lookup_self(&token)
            .await
            .map_err(|e| auth_failure("token lookup", e))
    }

    async fn list_secrets(&self, mount: &str, path: &str) -> Result<Vec<String>> {
        let token = self.token()?;
        self.client
            .list(&token, mount, path)
            .await
            .map_err(|e| e.at(mount, path))
    }

    async fn read_secret_metadata(&self, mount: &str, path: &str) -> Result<SecretMetadata> {
        let token = self.token()?;
        let meta = self
            .client
            .read_metadata(&token, mount, path)
            .await
            .map_err(|e| e.at(mount, path))?;
        Ok(SecretMetadata {
            updated_time: meta.updated_time,
            current_version: meta.current_version,
        })
    }

    async fn read_secret_version(
        &self,
        mount: &str,
        path: &str,
        version: u64,
    ) -> Result<SecretData> {
        let token = self.token()?;
        self.client
            .read_version(&token, mount, path, version)
            .await
            .map_err(|e| e.at(mount, path))
    }

    async fn create_or_update_secret(
        &self,
        mount: &str,
        path: &str,
        data: &SecretData,
    ) -> Result<WriteReceipt> {
        let token = self.token()?;
        let written = self
            .client
            .write(&token, mount, path, data)
            .await
            .map_err(|e| e.at(mount, path))?;
        Ok(WriteReceipt {
            created_time: written.created_time,
            version: written.version,
        })
    }

    async fn delete_metadata_and_all_versions(
        &self,
        mount: &str,
        path: &str,
    ) -> Result<DeleteResponse> {
        let token = self.token()?;
        let status = self
            .client
            .delete_metadata(&token, mount, path)
            .await
            .map_err(|e| e.at(mount, path))?;
        Ok(DeleteResponse {
            status: status.as_u16(),
        })
    }

    async fn logout(&self) -> Result<()> {
        let Some(token) = self
            .token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return Ok(());
        };
        if self.revoke_on_logout {
            self.client.revoke_self(&token).await?;
            info!("vault token revoked");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use kvsweep_core::{enumerate, retire, transfer, with_session};

    use super::*;
    use crate::test_server::{self, Reply};

    const LOGIN: &str = r#"{"auth":{"client_token":"hvs.abc","policies":["sweep"],"lease_duration":1200}}"#;
    const LOOKUP: &str = r#"{"data":{"id":"hvs.abc","ttl":1199}}"#;

    fn connector(base: &str, revoke: bool) -> VaultConnector {
        VaultConnector::new(&VaultConfig {
            address: base.to_string(),
            namespace: None,
            timeout: Duration::from_secs(5),
            approle_mount: "approle".to_string(),
            role_id: "role".to_string(),
            secret_id: Zeroizing::new("secret".to_string()),
            revoke_on_logout: revoke,
        })
        .unwrap()
    }

    #[test]
    fn debug_hides_secret_id() {
        let c = connector("http://127.0.0.1:8200", true);
        let debug = format!("{c:?}");
        assert!(!debug.contains("\"secret\""));
        assert!(debug.contains("[redacted]"));
    }

    #[tokio::test]
    async fn listing_session_logs_in_checks_and_revokes() {
        let server = test_server::spawn(vec![
            Reply::json(200, LOGIN),
            Reply::json(200, LOOKUP),
            Reply::json(200, r#"{"data":{"keys":["host1/"]}}"#),
            Reply::json(200, r#"{"data":{"keys":["db","api"]}}"#),
            Reply::empty(204),
        ])
        .await;
        let c = connector(&server.base, true);

        let paths = with_session(&c, |session| async move {
            enumerate::list_paths(session.as_ref(), "kv").await
        })
        .await
        .unwrap();
        assert_eq!(paths, vec!["host1/db", "host1/api"]);

        let targets: Vec<String> = server.requests().into_iter().map(|r| r.target).collect();
        assert_eq!(
            targets,
            vec![
                "/v1/auth/approle/login",
                "/v1/auth/token/lookup-self",
                "/v1/kv/metadata/?list=true",
                "/v1/kv/metadata/host1/?list=true",
                "/v1/auth/token/revoke-self",
            ]
        );
    }

    #[tokio::test]
    async fn rejected_token_never_reaches_data_endpoints() {
        let server = test_server::spawn(vec![
            Reply::json(200, LOGIN),
            Reply::json(403, r#"{"errors":["permission denied"]}"#),
            Reply::empty(204),
        ])
        .await;
        let c = connector(&server.base, true);

        let err = with_session(&c, |session| async move {
            session.list_secrets("kv", "").await
        })
        .await
        .unwrap_err();
        assert!(matches!(err, SweepError::Authentication(_)));
        assert!(!server.requests().iter().any(|r| r.target.contains("/kv/")));
    }

    #[tokio::test]
    async fn bad_credentials_are_an_authentication_error() {
        let server = test_server::spawn(vec![Reply::json(
            400,
            r#"{"errors":["invalid role or secret ID"]}"#,
        )])
        .await;
        let err = connector(&server.base, true).login().await.err().unwrap();
        match err {
            SweepError::Authentication(msg) => assert!(msg.contains("invalid role or secret ID")),
            other => panic!("expected authentication error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn sealed_vault_during_token_check_is_an_authentication_error() {
        let server = test_server::spawn(vec![
            Reply::json(200, LOGIN),
            Reply::json(503, r#"{"errors":["Vault is sealed"]}"#),
            Reply::empty(204),
        ])
        .await;
        let c = connector(&server.base, true);

        let err = with_session(&c, |session| async move {
            session.list_secrets("kv", "").await
        })
        .await
        .unwrap_err();
        match err {
            SweepError::Authentication(msg) => assert!(msg.contains("Vault is sealed")),
            other => panic!("expected authentication error, got {other:?}"),
        }
        assert!(!server.requests().iter().any(|r| r.target.contains("/kv/")));
    }

    #[tokio::test]
    async fn garbled_login_body_is_a_validation_error() {
        let server = test_server::spawn(vec![Reply::json(200, "<html>proxy error</html>")]).await;
        let err = connector(&server.base, true).login().await.err().unwrap();
        assert!(matches!(err, SweepError::Validation(_)));
    }

    #[tokio::test]
    async fn retire_deletes_exactly_the_named_key() {
        let server = test_server::spawn(vec![
            Reply::json(200, LOGIN),
            Reply::json(200, LOOKUP),
            Reply::empty(204),
        ])
        .await;
        retire::delete(&connector(&server.base, false), "kv", "host1/db#old")
            .await
            .unwrap();

        let reqs = server.requests();
        assert_eq!(reqs[2].method, "DELETE");
        assert_eq!(reqs[2].target, "/v1/kv/metadata/host1/db%23old");
    }

    #[tokio::test]
    async fn copy_reads_newest_version_and_writes_it_back() {
        let server = test_server::spawn(vec![
            // read session
            Reply::json(200, LOGIN),
            Reply::json(200, LOOKUP),
            Reply::json(
                200,
                r#"{"data":{"current_version":4,"updated_time":"2024-05-01T08:00:00.123456789Z"}}"#,
            ),
            Reply::json(200, r#"{"data":{"data":{"user":"a"},"metadata":{"version":4}}}"#),
            // write session
            Reply::json(200, LOGIN),
            Reply::json(200, LOOKUP),
            Reply::json(
                200,
                r#"{"data":{"created_time":"2024-05-10T12:00:00.000000001Z","version":1}}"#,
            ),
        ])
        .await;
        let c = connector(&server.base, false);

        transfer::copy(&c, "src", "dst", "host1/db").await.unwrap();

        let reqs = server.requests();
        assert_eq!(reqs[3].target, "/v1/src/data/host1/db?version=4");
        assert_eq!(reqs[6].method, "POST");
        assert_eq!(reqs[6].target, "/v1/dst/data/host1/db");
        assert_eq!(reqs[6].header("x-vault-token"), Some("hvs.abc"));
        let body: serde_json::Value = serde_json::from_str(&reqs[6].body).unwrap();
        assert_eq!(body, serde_json::json!({"data": {"user": "a"}}));
        assert!(!reqs.iter().any(|r| r.target.contains("revoke-self")));
    }

    #[tokio::test]
    async fn missing_metadata_maps_to_not_found() {
        let server = test_server::spawn(vec![
            Reply::json(200, LOGIN),
            Reply::json(200, LOOKUP),
            Reply::json(404, r#"{"errors":[]}"#),
        ])
        .await;
        let err = with_session(&connector(&server.base, false), |session| async move {
            session.read_secret_metadata("kv", "gone").await
        })
        .await
        .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn delete_failure_status_is_reported() {
        let server = test_server::spawn(vec![
            Reply::json(200, LOGIN),
            Reply::json(200, LOOKUP),
            Reply::json(500, r#"{"errors":["internal error"]}"#),
        ])
        .await;
        let err = retire::delete(&connector(&server.base, false), "kv", "host1/db")
            .await
            .unwrap_err();
        assert!(matches!(err, SweepError::Validation(msg) if msg.contains("500")));
    }

    #[tokio::test]
    async fn unreachable_server_is_a_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = connector(&format!("http://{addr}"), true)
            .login()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SweepError::Transport(_)));
    }

    #[tokio::test]
    async fn calls_after_logout_are_refused() {
        let server = test_server::spawn(vec![Reply::json(200, LOGIN)]).await;
        let session = connector(&server.base, false).login().await.unwrap();
        session.logout().await.unwrap();

        assert!(!session.is_authenticated().await.unwrap());
        assert!(matches!(
            session.list_secrets("kv", "").await,
            Err(SweepError::Authentication(_))
        ));
    }
}
