//! Error types for connection setup, authentication, and command execution.

use thiserror::Error;
use tokio::sync::mpsc::error::SendError;

/// Errors that can occur while configuring, opening, or operating a
/// [`crate::session::Connection`].
#[derive(Error, Debug)]
pub enum ConnectError {
    /// A constructor argument failed validation.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// TCP connect did not complete within `connect_timeout`.
    #[error("setup timeout: {0}")]
    SetupTimeout(String),

    /// Every configured authentication method was exhausted without success.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// An operation's outer budget (`operation_timeout`) elapsed.
    #[error("operation timed out: {0}")]
    TimeoutError(String),

    /// The current prompt matched no entry in the active privilege table.
    #[error("unknown privilege level for prompt {0:?}")]
    UnknownPrivLevel(String),

    /// The privilege FSM exceeded its bounded step budget without reaching
    /// the requested level.
    #[error("could not acquire privilege level {0:?}")]
    CouldNotAcquirePrivLevel(String),

    /// The caller asked for a transport capability the selected backend
    /// does not provide.
    #[error("requirement not satisfied: {0}")]
    RequirementsNotSatisfied(String),

    /// The channel disconnected while an operation was waiting for a prompt.
    #[error("channel disconnected while waiting for prompt")]
    ChannelDisconnectError,

    /// The connection has already been closed.
    #[error("connection closed")]
    ConnectClosedError,

    /// An error surfaced by the `async-ssh2-tokio` primary transport.
    #[error("async ssh2 error: {0}")]
    Ssh2Error(#[from] async_ssh2_tokio::Error),

    /// An error surfaced by the `russh` transport library.
    #[error("russh error: {0}")]
    RusshError(#[from] russh::Error),

    /// An error surfaced by the `thrussh` fallback transport library.
    #[error("thrussh error: {0}")]
    ThrusshError(#[from] thrussh::Error),

    /// Failed to hand a write to the connection's IO task or keepalive task.
    #[error("failed to send data: {0}")]
    SendDataError(#[from] SendError<Vec<u8>>),

    /// Recorded replay data did not match the expected input/privilege-level
    /// flow.
    ///
    /// Only produced by the offline [`crate::session::SessionReplayer`] test
    /// harness, never by a live connection.
    #[error("replay mismatch: {0}")]
    ReplayMismatchError(String),

    /// An error that does not fit another category; carries context for
    /// diagnostics.
    #[error("internal error: {0}")]
    InternalError(String),
}
