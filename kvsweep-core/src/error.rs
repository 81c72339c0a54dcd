//! Error taxonomy shared by every kvsweep component.

#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    /// Login was rejected, or the session did not report itself authenticated.
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("path not found: {mount}/{path}")]
    NotFound { mount: String, path: String },

    /// Network failure or timeout talking to the secret store.
    #[error("transport error: {0}")]
    Transport(String),

    /// The store answered, but without the marker that proves the write or
    /// delete took effect.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("invalid updated_time {value:?}: {reason}")]
    InvalidTimestamp { value: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl SweepError {
    pub fn not_found(mount: &str, path: &str) -> Self {
        Self::NotFound {
            mount: mount.to_string(),
            path: path.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type Result<T, E = SweepError> = std::result::Result<T, E>;
