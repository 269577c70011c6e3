//! Per-command protocol state machines.
//!
//! Each command sent to the switch gets one [`Request`]: a line-fed state
//! machine that classifies header lines, accumulates a `Content-Length`
//! framed body, and resolves a single-shot result exactly once when it
//! reports finished. The caller holds the matching [`PendingReply`] and
//! awaits it without ever touching the wire.

use crate::constants::{
    CT_API_RESPONSE, CT_AUTH_REQUEST, CT_COMMAND_REPLY, HDR_CONTENT_LENGTH, HDR_JOB_UUID,
    HDR_REPLY_TEXT, MAX_MESSAGE_SIZE,
};
use crate::error::{Error, Result};
use crate::models::ConferenceMember;
use tokio::sync::oneshot;
use tracing::{debug, trace};

/// Machine states. A request starts in `AwaitingHeader` and is fed every
/// line of its response block(s) until it reaches `Finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Nothing classified yet.
    AwaitingHeader,
    /// Saw the unprompted `auth/request` challenge; waiting for the real
    /// reply block.
    AuthRequest,
    /// Inside a `command/reply` block.
    CommandReply,
    /// Inside an `api/response` block.
    ApiResponse,
    /// Saw `Content-Length`; waiting for the blank separator before the
    /// body starts.
    ContentLength,
    /// Consuming body lines until the announced byte count is reached.
    AccumulatingBody,
    /// Result computed; the request must not be fed again.
    Finished,
}

/// Reply-text classification.
///
/// The switch answers `+OK …` on success and `-ERR …` on failure; a few
/// replies carry neither prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplyClass {
    Ok,
    Err,
    Other,
}

fn classify(content: &str) -> ReplyClass {
    let trimmed = content.trim_start();
    if trimmed.starts_with("+OK") {
        ReplyClass::Ok
    } else if trimmed.starts_with("-ERR") {
        ReplyClass::Err
    } else {
        ReplyClass::Other
    }
}

/// Compatibility heuristic for unprefixed replies: the original client
/// accepted any content containing "OK" anywhere, case-insensitively.
/// Only consulted when neither `+OK` nor `-ERR` is present.
fn loose_ok(content: &str) -> bool {
    content.to_ascii_lowercase().contains("ok")
}

/// Trailing integer of a `Content-Length: N` line, if it parses.
pub(crate) fn content_length_of(line: &str) -> Option<usize> {
    let value = line[line.find(':')? + 1..].trim();
    value.parse().ok()
}

/// Parse the trailing integer of a `Content-Length: N` line.
fn parse_content_length(line: &str) -> Result<usize> {
    content_length_of(line).ok_or_else(|| Error::ProtocolViolation {
        line: line.to_string(),
    })
}

/// Variant-specific payload and result slot.
///
/// A closed set of request shapes, not an inheritance hierarchy: the
/// transition table is shared and the variant only decides how a finished
/// request resolves (and, for listings, how body lines are consumed).
enum Variant {
    /// `auth <password>`; failure is reported as a credential problem.
    Login(oneshot::Sender<Result<String>>),
    /// Any `command/reply` consumer: `bgapi`, `event`, `exit`, …
    Command(oneshot::Sender<Result<String>>),
    /// Synchronous `api` call resolving to the response body.
    Api(oneshot::Sender<Result<String>>),
    /// `conference … list`: body lines parse into member records as they
    /// arrive.
    ConferenceList {
        members: Vec<ConferenceMember>,
        parse_error: Option<Error>,
        tx: oneshot::Sender<Result<Vec<ConferenceMember>>>,
    },
}

/// Awaitable handle for one issued command.
///
/// Issuing a command never blocks on the network round trip: the verb
/// returns this handle immediately and the connection's reader resolves
/// it when the matching response block completes. Dropping the handle
/// abandons interest in the result, but the request still drains its wire
/// response to keep FIFO alignment.
pub struct PendingReply<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> PendingReply<T> {
    fn new(rx: oneshot::Receiver<Result<T>>) -> Self {
        Self { rx }
    }

    /// Wait for the request to resolve.
    ///
    /// Yields the response body (or parsed records) on success and the
    /// failure detail otherwise. If the connection died before the
    /// request resolved, yields [`Error::Disconnected`].
    pub async fn result(self) -> Result<T> {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::Disconnected),
        }
    }
}

impl<T> std::fmt::Debug for PendingReply<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingReply").finish_non_exhaustive()
    }
}

/// One in-flight command: state machine plus single-resolution result slot.
pub(crate) struct Request {
    state: State,
    /// Accumulated reply text or response body.
    content: String,
    /// Byte count announced by `Content-Length`, once seen.
    expected_len: Option<usize>,
    /// Background job id, captured for correlation; never the result.
    job_uuid: Option<String>,
    reply_seen: bool,
    variant: Variant,
    label: &'static str,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("label", &self.label)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Request {
    fn base(label: &'static str, variant: Variant) -> Self {
        Self {
            state: State::AwaitingHeader,
            content: String::new(),
            expected_len: None,
            job_uuid: None,
            reply_seen: false,
            variant,
            label,
        }
    }

    /// Login request; must be enqueued before the switch's unprompted
    /// `auth/request` challenge is read.
    pub(crate) fn login() -> (Self, PendingReply<String>) {
        let (tx, rx) = oneshot::channel();
        (Self::base("login", Variant::Login(tx)), PendingReply::new(rx))
    }

    /// Generic `command/reply` consumer (`bgapi`, `event`, `exit`, …).
    pub(crate) fn command(label: &'static str) -> (Self, PendingReply<String>) {
        let (tx, rx) = oneshot::channel();
        (Self::base(label, Variant::Command(tx)), PendingReply::new(rx))
    }

    /// Synchronous `api` call.
    pub(crate) fn api() -> (Self, PendingReply<String>) {
        let (tx, rx) = oneshot::channel();
        (Self::base("api", Variant::Api(tx)), PendingReply::new(rx))
    }

    /// Conference listing with incremental record parsing.
    pub(crate) fn conference_list() -> (Self, PendingReply<Vec<ConferenceMember>>) {
        let (tx, rx) = oneshot::channel();
        let variant = Variant::ConferenceList {
            members: Vec::new(),
            parse_error: None,
            tx,
        };
        (Self::base("conference list", variant), PendingReply::new(rx))
    }

    pub(crate) fn label(&self) -> &'static str {
        self.label
    }

    /// Feed one received line. Returns `Ok(true)` once the request has
    /// finished and is ready to resolve. An `Err` means the stream is
    /// unrecoverable (corrupt framing) and the connection must abort.
    pub(crate) fn feed(&mut self, line: &str) -> Result<bool> {
        match self.state {
            State::Finished => Ok(true),
            State::AccumulatingBody => self.accumulate(line),
            _ => self.classify_line(line),
        }
    }

    /// Header classification, keyed by case-insensitive substring match in
    /// fixed precedence order.
    fn classify_line(&mut self, line: &str) -> Result<bool> {
        let lower = line.to_ascii_lowercase();

        if lower.contains(CT_AUTH_REQUEST) {
            // The switch sends this unprompted before the login reply;
            // tolerated as a no-op transition, not an error.
            trace!("{}: tolerating auth challenge", self.label);
            self.state = State::AuthRequest;
        } else if lower.contains(CT_COMMAND_REPLY) {
            self.state = State::CommandReply;
        } else if lower.contains(HDR_REPLY_TEXT) {
            // Verbatim text after the first colon, leading space included.
            if let Some(idx) = line.find(':') {
                self.content = line[idx + 1..].to_string();
            }
            self.reply_seen = true;
        } else if lower.contains(HDR_JOB_UUID) {
            // Correlation id only; Reply-Text wins as the resolved content.
            if let Some(idx) = line.find(':') {
                self.job_uuid = Some(line[idx + 1..].trim().to_string());
            }
        } else if lower.contains(CT_API_RESPONSE) {
            self.state = State::ApiResponse;
        } else if lower.contains(HDR_CONTENT_LENGTH) {
            let length = parse_content_length(line)?;
            if length > MAX_MESSAGE_SIZE {
                return Err(Error::OversizedBody { length });
            }
            self.expected_len = Some(length);
            self.state = State::ContentLength;
        } else if line.is_empty() {
            return Ok(self.end_of_block());
        } else {
            self.body_hook(line);
        }

        Ok(self.state == State::Finished)
    }

    /// Blank line: universal end-of-block signal. What it means depends on
    /// where the machine is.
    fn end_of_block(&mut self) -> bool {
        match self.state {
            // Separator after the auth challenge (or a stray keep-alive).
            State::AwaitingHeader | State::AuthRequest => false,
            State::CommandReply => {
                if self.reply_seen || !self.content.is_empty() {
                    self.state = State::Finished;
                    true
                } else {
                    false
                }
            }
            // An api/response with no Content-Length has no body.
            State::ApiResponse => {
                self.state = State::Finished;
                true
            }
            // Separator between headers and body.
            State::ContentLength => {
                self.state = State::AccumulatingBody;
                // A zero-length body is already complete.
                if self.expected_len == Some(0) {
                    self.state = State::Finished;
                    return true;
                }
                false
            }
            State::AccumulatingBody | State::Finished => false,
        }
    }

    /// Body accumulation: append the line plus its restored newline; done
    /// once the announced byte count is covered (over-run is trimmed so
    /// the body is exactly `Content-Length` bytes).
    fn accumulate(&mut self, line: &str) -> Result<bool> {
        self.body_hook(line);
        self.content.push_str(line);
        self.content.push('\n');

        let expected = self.expected_len.unwrap_or(0);
        if self.content.len() >= expected {
            self.content.truncate(expected);
            self.state = State::Finished;
            return Ok(true);
        }
        Ok(false)
    }

    /// Per-line body processing; no-op for simple requests.
    fn body_hook(&mut self, line: &str) {
        if let Variant::ConferenceList {
            members,
            parse_error,
            ..
        } = &mut self.variant
        {
            let trimmed = line.trim();
            // "Conference X not found!" and error lines are not records.
            if trimmed.is_empty()
                || trimmed.starts_with("-ERR")
                || trimmed.to_ascii_lowercase().contains("not found")
            {
                return;
            }
            match ConferenceMember::parse(trimmed) {
                Ok(member) => members.push(member),
                Err(e) => {
                    if parse_error.is_none() {
                        *parse_error = Some(e);
                    }
                }
            }
        }
    }

    /// Resolve the result slot. Must be called exactly once, only after
    /// [`feed`](Self::feed) reported finished; consuming `self` enforces
    /// single resolution.
    pub(crate) fn resolve(self) {
        debug_assert_eq!(self.state, State::Finished);
        let Request {
            content,
            variant,
            job_uuid,
            label,
            ..
        } = self;

        if let Some(uuid) = &job_uuid {
            debug!("{}: job accepted as {}", label, uuid);
        }

        match variant {
            Variant::Login(tx) => {
                let outcome = match classify(&content) {
                    ReplyClass::Ok => Ok(content),
                    ReplyClass::Err => Err(Error::AuthFailed {
                        detail: content.trim().to_string(),
                    }),
                    ReplyClass::Other => {
                        if loose_ok(&content) {
                            Ok(content)
                        } else {
                            Err(Error::AuthFailed {
                                detail: content.trim().to_string(),
                            })
                        }
                    }
                };
                let _ = tx.send(outcome);
            }
            Variant::Command(tx) => {
                let outcome = match classify(&content) {
                    ReplyClass::Ok => Ok(content),
                    ReplyClass::Err => Err(Error::CommandFailed { detail: content }),
                    ReplyClass::Other => {
                        if loose_ok(&content) {
                            Ok(content)
                        } else {
                            Err(Error::CommandFailed { detail: content })
                        }
                    }
                };
                let _ = tx.send(outcome);
            }
            Variant::Api(tx) => {
                // An api body is arbitrary command output; only an explicit
                // error marker counts as failure.
                let outcome = if content.trim_start().starts_with("-ERR") {
                    Err(Error::CommandFailed { detail: content })
                } else {
                    Ok(content)
                };
                let _ = tx.send(outcome);
            }
            Variant::ConferenceList {
                members,
                parse_error,
                tx,
            } => {
                let outcome = match parse_error {
                    Some(e) => Err(e),
                    None => {
                        if content.trim_start().starts_with("-ERR") {
                            Err(Error::CommandFailed { detail: content })
                        } else {
                            Ok(members)
                        }
                    }
                };
                let _ = tx.send(outcome);
            }
        }
    }

    /// Fail the result slot without a wire resolution (disconnects,
    /// protocol violations). Consuming `self` keeps the slot single-use.
    pub(crate) fn fail(self, err: Error) {
        match self.variant {
            Variant::Login(tx) | Variant::Command(tx) | Variant::Api(tx) => {
                let _ = tx.send(Err(err));
            }
            Variant::ConferenceList { tx, .. } => {
                let _ = tx.send(Err(err));
            }
        }
    }
}
