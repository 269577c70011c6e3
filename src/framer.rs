//! Splits the raw byte stream into protocol lines.

/// Incremental line splitter over the inbound byte stream.
///
/// Bytes go in via [`feed`](Self::feed); complete lines come out of
/// [`next_line`](Self::next_line), which is lazy and restartable — call it
/// in a loop until it returns `None`, feed more bytes, and resume. A
/// trailing fragment with no delimiter yet stays buffered across feeds.
///
/// A line excludes its `\n` delimiter; a trailing `\r` is stripped so
/// CRLF peers do not leak carriage returns into header matching. This
/// layer imposes no line-length limit — body size is bounded upstream by
/// the `Content-Length` validation.
#[derive(Debug, Default)]
pub struct LineFramer {
    buf: Vec<u8>,
    /// Start of the first unconsumed byte in `buf`.
    pos: usize,
}

impl LineFramer {
    /// Create an empty framer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes from the transport.
    pub fn feed(&mut self, data: &[u8]) {
        // Drop consumed prefix before growing, so the buffer does not
        // creep upward across a long-lived connection.
        if self.pos > 0 && self.pos == self.buf.len() {
            self.buf.clear();
            self.pos = 0;
        } else if self.pos > self.buf.len() / 2 && self.buf.len() > 4096 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
        self.buf.extend_from_slice(data);
    }

    /// Pop the next complete line, if one is buffered.
    pub fn next_line(&mut self) -> Option<String> {
        let rest = &self.buf[self.pos..];
        let nl = rest.iter().position(|&b| b == b'\n')?;
        let mut end = nl;
        if end > 0 && rest[end - 1] == b'\r' {
            end -= 1;
        }
        let line = String::from_utf8_lossy(&rest[..end]).into_owned();
        self.pos += nl + 1;
        Some(line)
    }

    /// Bytes buffered but not yet framed into a line.
    pub fn pending(&self) -> usize {
        self.buf.len() - self.pos
    }
}
