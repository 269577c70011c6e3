//! Protocol constants and configuration values

/// Default event socket port for inbound connections
pub const DEFAULT_PORT: u16 = 8021;

/// Socket buffer size for reading from the TCP stream (64KB)
pub const SOCKET_BUF_SIZE: usize = 65536;

/// Maximum single body size (8MB) - validates Content-Length header.
/// No legitimate response should exceed this (largest is a full
/// profile status dump, ~1-2MB).
pub const MAX_MESSAGE_SIZE: usize = 8 * 1024 * 1024;

/// Every command block sent to the switch ends with a blank line.
pub const BLOCK_TERMINATOR: &str = "\n\n";

/// Content-Type marker for the unsolicited login challenge.
pub const CT_AUTH_REQUEST: &str = "auth/request";
/// Content-Type marker for command replies.
pub const CT_COMMAND_REPLY: &str = "command/reply";
/// Content-Type marker for synchronous API responses.
pub const CT_API_RESPONSE: &str = "api/response";
/// Content-Type prefix shared by `text/event-plain` and `text/event-xml`.
pub const CT_EVENT_PREFIX: &str = "text/event";
/// Content-Type marker for a server-initiated disconnect notice.
pub const CT_DISCONNECT_NOTICE: &str = "text/disconnect-notice";

/// Header keyword: reply status line (matched case-insensitively).
pub const HDR_REPLY_TEXT: &str = "reply-text";
/// Header keyword: background job correlation id.
pub const HDR_JOB_UUID: &str = "job-uuid";
/// Header keyword: body byte count.
pub const HDR_CONTENT_LENGTH: &str = "content-length";

/// XML event documents open with this marker when not length-framed.
pub const EVENT_BEGIN_MARKER: &str = "<event";
/// XML event documents close with this marker when not length-framed.
pub const EVENT_END_MARKER: &str = "</event>";

/// TCP connect timeout in milliseconds
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 2000;

/// Login round-trip timeout in milliseconds
pub const DEFAULT_LOGIN_TIMEOUT_MS: u64 = 5000;
