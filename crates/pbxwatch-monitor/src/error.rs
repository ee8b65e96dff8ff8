//! Error types for the monitoring core.

use pbxwatch_ami::AmiError;

/// Failure of the endpoint-ownership lookup store.
///
/// A missing row is not an error; this covers the store itself failing.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// The lookup query failed.
    #[error("endpoint directory query failed: {0}")]
    Query(#[from] rusqlite::Error),

    /// No pooled connection was available.
    #[error("endpoint directory unavailable: {0}")]
    Pool(#[from] r2d2::Error),
}

/// Outcome of a failed operator command.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// The request is missing a required argument.
    #[error("invalid command: {0}")]
    Invalid(String),

    /// The call or agent is not known.
    #[error("not found: {0}")]
    NotFound(String),

    /// The call is known but has no channel to act on.
    #[error("call {0} has no channel")]
    NoChannel(String),

    /// No manager connection is active.
    #[error("manager interface not connected")]
    NotConnected,

    /// Writing the command to the manager connection failed.
    #[error("manager transport failure: {0}")]
    Transport(String),

    /// The persisted flag could not be updated.
    #[error("database failure: {0}")]
    Database(String),
}

impl From<AmiError> for CommandError {
    fn from(err: AmiError) -> Self {
        match err {
            AmiError::NotConnected => Self::NotConnected,
            other => Self::Transport(other.to_string()),
        }
    }
}

