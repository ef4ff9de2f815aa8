//! Error types used across the ybox runtime.

use thiserror::Error;

/// Result type for ybox operations.
pub type YboxResult<T> = Result<T, YboxError>;

#[derive(Debug, Error)]
pub enum YboxError {
    /// INI parse failure, include cycle, bad interpolation or an unknown
    /// section/key in a profile.
    #[error("configuration error: {0}")]
    Config(String),

    /// State database open/migration failure, or database newer than this
    /// version of the library.
    #[error("schema error: {0}")]
    Schema(String),

    /// Container engine binary missing, not executable, or an engine
    /// command exited non-zero.
    #[error("engine error: {0}")]
    Engine(String),

    /// A file lock could not be acquired within the caller's timeout.
    #[error("timed out acquiring lock on '{path}' after {waited_secs} seconds")]
    LockTimeout { path: String, waited_secs: u64 },

    /// Package install/uninstall failed even after the transient-failure
    /// retry.
    #[error("package operation failed: {0}")]
    PackageOp(String),

    /// The container status file never reached the expected state within
    /// the wait budget.
    #[error("container '{0}' not ready: {1}")]
    NotReady(String, String),

    /// Operation interrupted by SIGINT/SIGTERM.
    #[error("interrupted")]
    Interrupted,

    /// User declined a required confirmation.
    #[error("aborted: {0}")]
    UserAbort(String),

    /// Container or package not found where one was required.
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation not valid for the current container state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Host filesystem failure outside the state database.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl YboxError {
    /// Map the error kind to the documented CLI exit code.
    ///
    /// 1 = user error, 2 = I/O or engine error, 3 = lock timeout,
    /// 4 = schema/migration error, 5 = user cancelled.
    pub fn exit_code(&self) -> i32 {
        match self {
            YboxError::Config(_)
            | YboxError::NotFound(_)
            | YboxError::InvalidState(_)
            | YboxError::PackageOp(_) => 1,
            YboxError::Engine(_)
            | YboxError::Storage(_)
            | YboxError::NotReady(_, _)
            | YboxError::Internal(_) => 2,
            YboxError::LockTimeout { .. } => 3,
            YboxError::Schema(_) => 4,
            YboxError::Interrupted | YboxError::UserAbort(_) => 5,
        }
    }
}

impl From<std::io::Error> for YboxError {
    fn from(err: std::io::Error) -> Self {
        YboxError::Storage(format!("I/O error: {}", err))
    }
}

impl From<serde_json::Error> for YboxError {
    fn from(err: serde_json::Error) -> Self {
        YboxError::Internal(format!("JSON error: {}", err))
    }
}

impl From<String> for YboxError {
    fn from(err: String) -> Self {
        YboxError::Internal(err)
    }
}

impl From<&str> for YboxError {
    fn from(err: &str) -> Self {
        YboxError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(YboxError::NotFound("c1".into()).exit_code(), 1);
        assert_eq!(YboxError::Engine("boom".into()).exit_code(), 2);
        assert_eq!(
            YboxError::LockTimeout {
                path: "/tmp/x.lock".into(),
                waited_secs: 60
            }
            .exit_code(),
            3
        );
        assert_eq!(YboxError::Schema("too new".into()).exit_code(), 4);
        assert_eq!(YboxError::Interrupted.exit_code(), 5);
    }
}
