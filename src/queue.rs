//! Strict FIFO queue of unanswered requests.

use crate::error::{Error, Result};
use crate::request::Request;
use std::collections::VecDeque;
use tracing::{debug, trace};

/// Not-yet-answered requests, in the order their commands were sent.
///
/// The protocol guarantees the switch answers in send order, so no
/// request/response id exists on the wire — the head of this queue *is*
/// the correlation. At most one request is active (consuming lines) at a
/// time; the next is activated lazily when a response line arrives with
/// no active request. A request leaves the queue only by being fed to
/// completion or by the connection failing it on teardown.
#[derive(Debug, Default)]
pub(crate) struct RequestQueue {
    pending: VecDeque<Request>,
    active: Option<Request>,
}

impl RequestQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append a request; it resolves after everything queued before it.
    pub(crate) fn enqueue(&mut self, request: Request) {
        trace!("Enqueueing {} request", request.label());
        self.pending.push_back(request);
    }

    /// Whether a request is currently consuming lines.
    pub(crate) fn has_active(&self) -> bool {
        self.active.is_some()
    }

    /// Whether nothing is active and nothing is waiting.
    pub(crate) fn is_idle(&self) -> bool {
        self.active.is_none() && self.pending.is_empty()
    }

    /// Number of requests waiting behind the active one.
    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Promote the next pending request to active. Returns `false` when
    /// nothing is waiting.
    pub(crate) fn activate_next(&mut self) -> bool {
        debug_assert!(self.active.is_none(), "activated over a live request");
        match self.pending.pop_front() {
            Some(request) => {
                trace!("Activating {} request", request.label());
                self.active = Some(request);
                true
            }
            None => false,
        }
    }

    /// Feed a line to the active request; resolve and clear it when it
    /// finishes. Returns `Ok(true)` if the request completed on this line.
    ///
    /// A feed error means the stream is corrupt beyond recovery: the
    /// active request is failed and the error propagates so the caller
    /// can tear the connection down.
    pub(crate) fn feed_active(&mut self, line: &str) -> Result<bool> {
        let Some(mut active) = self.active.take() else {
            return Ok(false);
        };

        match active.feed(line) {
            Ok(true) => {
                debug!("{} request finished", active.label());
                active.resolve();
                Ok(true)
            }
            Ok(false) => {
                self.active = Some(active);
                Ok(false)
            }
            Err(e) => {
                active.fail(Error::Disconnected);
                Err(e)
            }
        }
    }

    /// Fail the active request and every pending one. Used on transport
    /// loss and protocol violations; afterwards the queue is empty.
    pub(crate) fn fail_all(&mut self, mut make_err: impl FnMut() -> Error) {
        let mut failed = 0usize;
        if let Some(request) = self.active.take() {
            request.fail(make_err());
            failed += 1;
        }
        while let Some(request) = self.pending.pop_front() {
            request.fail(make_err());
            failed += 1;
        }
        if failed > 0 {
            debug!("Failed {} unresolved request(s)", failed);
        }
    }
}
