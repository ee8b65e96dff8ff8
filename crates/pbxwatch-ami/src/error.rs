//! Error types for the manager protocol client.

/// Errors surfaced by the manager connection.
#[derive(Debug, thiserror::Error)]
pub enum AmiError {
    /// The TCP connection could not be established.
    #[error("failed to connect to manager interface: {0}")]
    Connect(std::io::Error),

    /// The connection attempt did not complete in time.
    #[error("timed out connecting to manager interface")]
    Timeout,

    /// The PBX rejected the login credentials.
    #[error("manager login rejected: {0}")]
    Authentication(String),

    /// A read or write on an established connection failed.
    #[error("manager connection I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer sent a line longer than the reader accepts.
    #[error("manager line exceeds {0} bytes")]
    LineTooLong(usize),

    /// A command was issued while no connection is active.
    #[error("manager interface not connected")]
    NotConnected,
}
