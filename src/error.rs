//! Error types for the event socket client

use crate::constants::MAX_MESSAGE_SIZE;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the client.
///
/// `ProtocolViolation` and transport failures are fatal to the connection;
/// `CommandFailed`, `AuthFailed` and `MalformedRecord` resolve only the
/// request they belong to.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A non-blank line arrived with no request pending and no event block
    /// open. The client and switch have desynchronized; the connection is
    /// torn down.
    #[error("protocol violation: unsolicited line {line:?} with no request pending")]
    ProtocolViolation {
        /// The offending line.
        line: String,
    },

    /// The switch rejected a command. `detail` is the verbatim reply text
    /// (or response body) after the first colon.
    #[error("command failed:{detail}")]
    CommandFailed {
        /// Reply text or response body returned by the switch.
        detail: String,
    },

    /// The login request was rejected.
    #[error("login rejected ({detail}); likely a bad password")]
    AuthFailed {
        /// Verbatim reply text from the switch.
        detail: String,
    },

    /// The transport dropped while this request (and possibly others) was
    /// still unresolved. All pending requests receive this error.
    #[error("connection lost before the request resolved")]
    Disconnected,

    /// A response model could not parse a record from the response body.
    #[error("malformed record: {detail}")]
    MalformedRecord {
        /// What failed to parse.
        detail: String,
    },

    /// A `Content-Length` header announced a body larger than the sanity
    /// bound. Indicates protocol desync or corrupted data.
    #[error("announced body of {length} bytes exceeds the {MAX_MESSAGE_SIZE} byte limit")]
    OversizedBody {
        /// The announced length.
        length: usize,
    },

    /// A user-supplied command field would break line framing.
    #[error("invalid command: {message}")]
    InvalidCommand {
        /// Which field was rejected and why.
        message: String,
    },

    /// TCP connect or login did not complete in time.
    #[error("timed out after {timeout_ms}ms")]
    Timeout {
        /// The timeout that elapsed.
        timeout_ms: u64,
    },

    /// Transport-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The reconnect factory gave up after its bounded attempt count.
    #[error("gave up after {attempts} connection attempts: {last}")]
    RetriesExhausted {
        /// How many attempts were made.
        attempts: u32,
        /// The error from the final attempt.
        #[source]
        last: Box<Error>,
    },
}
