//! Connection management and line dispatch.
//!
//! One [`Connection`] owns one socket. A background reader task drives the
//! [`LineFramer`] and routes every line to either the active request, the
//! event accumulator, or the keep-alive/violation handling. Verb methods
//! build the wire string, enqueue a matching request, write the command
//! block, and hand back a [`PendingReply`] — the caller never blocks on
//! the network round trip.

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::{
    command::Command,
    constants::{
        CT_DISCONNECT_NOTICE, CT_EVENT_PREFIX, DEFAULT_CONNECT_TIMEOUT_MS,
        DEFAULT_LOGIN_TIMEOUT_MS, EVENT_BEGIN_MARKER, EVENT_END_MARKER, HDR_CONTENT_LENGTH,
        MAX_MESSAGE_SIZE, SOCKET_BUF_SIZE,
    },
    document::EventDocument,
    error::{Error, Result},
    framer::LineFramer,
    models::ConferenceMember,
    queue::RequestQueue,
    registry::{EventListener, EventRegistry},
    request::{PendingReply, Request},
};

/// Connection status reported through [`Connection::status`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionStatus {
    /// Session is up and the reader task is running.
    Connected,
    /// Session ended.
    Disconnected(DisconnectReason),
}

/// Why the session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DisconnectReason {
    /// The switch sent a `text/disconnect-notice`.
    ServerNotice,
    /// Unsolicited data arrived outside any event block with no request
    /// pending — client and switch are desynchronized.
    ProtocolViolation,
    /// TCP I/O error (io::Error is not Clone, so we store the message).
    IoError(String),
    /// Clean EOF on the TCP connection.
    ConnectionClosed,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::ServerNotice => write!(f, "server sent disconnect notice"),
            DisconnectReason::ProtocolViolation => write!(f, "protocol violation"),
            DisconnectReason::IoError(msg) => write!(f, "I/O error: {}", msg),
            DisconnectReason::ConnectionClosed => write!(f, "connection closed"),
        }
    }
}

/// Options fixed at connection time.
///
/// The `trace_wire` flag is the explicit per-connection verbosity knob:
/// when set, every received line is logged at `trace` level.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// TCP connect timeout. Default: 2 seconds.
    pub connect_timeout: Duration,
    /// Login round-trip timeout. Default: 5 seconds.
    pub login_timeout: Duration,
    /// Log every received line at `trace` level. Default: off.
    pub trace_wire: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            login_timeout: Duration::from_millis(DEFAULT_LOGIN_TIMEOUT_MS),
            trace_wire: false,
        }
    }
}

/// Which call leg a broadcast plays to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastLeg {
    /// Play to the A-leg only.
    ALeg,
    /// Play to the B-leg only.
    BLeg,
    /// Play to both legs.
    Both,
}

impl BroadcastLeg {
    fn as_str(&self) -> &'static str {
        match self {
            BroadcastLeg::ALeg => "aleg",
            BroadcastLeg::BLeg => "bleg",
            BroadcastLeg::Both => "both",
        }
    }
}

/// State shared between the client handle and the reader task.
struct Shared {
    queue: Mutex<RequestQueue>,
    registry: EventRegistry,
}

/// Tracks an unsolicited event block being reassembled by the dispatcher.
///
/// Event frames put `Content-Length` first, then the `text/event-*`
/// content type, a blank separator, and the framed body. XML documents
/// may alternatively arrive between bare `<event>`/`</event>` markers.
#[derive(Debug)]
enum EventCapture {
    /// Not inside an event block.
    Idle,
    /// Saw `Content-Length` while idle; waiting for the content type that
    /// confirms this is an event envelope.
    Envelope { length: usize },
    /// Confirmed event envelope; waiting for the blank separator.
    Confirmed { length: usize },
    /// Accumulating a length-framed body.
    Body { length: usize, acc: String },
    /// Accumulating between begin/end markers.
    Marker { acc: String },
}

/// Parse a finished event block and hand it to the registry.
fn finish_event(raw: &str, registry: &EventRegistry) {
    match EventDocument::parse(raw) {
        Ok(document) => {
            let name = document.event_name().unwrap_or("").to_string();
            let notified = registry.dispatch(&name, &document);
            trace!("Dispatched event {:?} to {} listener(s)", name, notified);
        }
        Err(e) => warn!("Dropping unparseable event block: {}", e),
    }
}

/// Route one received line. Returns the teardown reason when the
/// connection can no longer continue.
fn handle_line(
    line: &str,
    queue: &mut RequestQueue,
    capture: &mut EventCapture,
    registry: &EventRegistry,
) -> std::result::Result<(), DisconnectReason> {
    // Continue an event block in progress before anything else — its body
    // lines must never reach the request queue.
    match capture {
        EventCapture::Body { length, acc } => {
            acc.push_str(line);
            acc.push('\n');
            if acc.len() >= *length {
                acc.truncate(*length);
                finish_event(acc, registry);
                *capture = EventCapture::Idle;
            }
            return Ok(());
        }
        EventCapture::Marker { acc } => {
            acc.push_str(line);
            acc.push('\n');
            if line.contains(EVENT_END_MARKER) {
                finish_event(acc, registry);
                *capture = EventCapture::Idle;
            }
            return Ok(());
        }
        EventCapture::Envelope { length } => {
            let length = *length;
            if line.to_ascii_lowercase().contains(CT_EVENT_PREFIX) {
                *capture = EventCapture::Confirmed { length };
                return Ok(());
            }
            // Not an event after all (e.g. a bare Content-Length: 0
            // keep-alive frame). Drop the stash and fall through so the
            // line gets normal treatment.
            *capture = EventCapture::Idle;
            if line.is_empty() {
                return Ok(());
            }
        }
        EventCapture::Confirmed { length } => {
            let length = *length;
            if line.is_empty() {
                if length == 0 {
                    *capture = EventCapture::Idle;
                } else {
                    *capture = EventCapture::Body {
                        length,
                        acc: String::new(),
                    };
                }
            }
            // Additional envelope headers are irrelevant here.
            return Ok(());
        }
        EventCapture::Idle => {}
    }

    if !queue.has_active() {
        let lower = line.to_ascii_lowercase();

        if lower.contains(CT_DISCONNECT_NOTICE) {
            info!("Received disconnect notice from switch");
            return Err(DisconnectReason::ServerNotice);
        }

        // Event envelopes lead with Content-Length; response blocks always
        // lead with Content-Type, so this cannot steal a reply header.
        if lower.starts_with(HDR_CONTENT_LENGTH) {
            match crate::request::content_length_of(line) {
                Some(length) if length <= MAX_MESSAGE_SIZE => {
                    *capture = EventCapture::Envelope { length };
                    return Ok(());
                }
                _ => {
                    warn!("Unparseable idle frame header {:?}", line);
                    return Err(DisconnectReason::ProtocolViolation);
                }
            }
        }

        if line.trim_start().starts_with(EVENT_BEGIN_MARKER) {
            let mut acc = String::with_capacity(line.len() + 1);
            acc.push_str(line);
            acc.push('\n');
            if line.contains(EVENT_END_MARKER) {
                finish_event(&acc, registry);
            } else {
                *capture = EventCapture::Marker { acc };
            }
            return Ok(());
        }

        if line.is_empty() && queue.is_idle() {
            // Idle keep-alive between blocks.
            return Ok(());
        }

        if !queue.activate_next() {
            warn!("Unsolicited line {:?} with empty request queue", line);
            return Err(DisconnectReason::ProtocolViolation);
        }
    }

    match queue.feed_active(line) {
        Ok(_finished) => Ok(()),
        Err(e) => {
            warn!("Corrupt response stream: {}", e);
            Err(DisconnectReason::ProtocolViolation)
        }
    }
}

/// Background reader loop; panics are contained so a listener bug cannot
/// silently wedge the process.
async fn reader_loop(
    reader: OwnedReadHalf,
    shared: Arc<Shared>,
    status_tx: watch::Sender<ConnectionStatus>,
    trace_wire: bool,
) {
    let inner = std::panic::AssertUnwindSafe(reader_loop_inner(
        reader,
        shared.clone(),
        status_tx.clone(),
        trace_wire,
    ));
    if futures_util::FutureExt::catch_unwind(inner).await.is_err() {
        tracing::error!("reader task panicked");
        let mut queue = shared.queue.lock().await;
        queue.fail_all(|| Error::Disconnected);
        let _ = status_tx.send(ConnectionStatus::Disconnected(DisconnectReason::IoError(
            "reader task panicked".to_string(),
        )));
    }
}

async fn reader_loop_inner(
    mut reader: OwnedReadHalf,
    shared: Arc<Shared>,
    status_tx: watch::Sender<ConnectionStatus>,
    trace_wire: bool,
) {
    let mut framer = LineFramer::new();
    let mut capture = EventCapture::Idle;
    let mut read_buffer = [0u8; SOCKET_BUF_SIZE];

    let tear_down = |shared: &Arc<Shared>, reason: DisconnectReason| {
        let shared = shared.clone();
        let status_tx = status_tx.clone();
        async move {
            let mut queue = shared.queue.lock().await;
            queue.fail_all(|| Error::Disconnected);
            let _ = status_tx.send(ConnectionStatus::Disconnected(reason));
        }
    };

    loop {
        while let Some(line) = framer.next_line() {
            if trace_wire {
                trace!("[RECV] {:?}", line);
            }
            let mut queue = shared.queue.lock().await;
            if let Err(reason) = handle_line(&line, &mut queue, &mut capture, &shared.registry) {
                drop(queue);
                tear_down(&shared, reason).await;
                return;
            }
        }

        match reader.read(&mut read_buffer).await {
            Ok(0) => {
                info!("Connection closed (EOF)");
                tear_down(&shared, DisconnectReason::ConnectionClosed).await;
                return;
            }
            Ok(n) => framer.feed(&read_buffer[..n]),
            Err(e) => {
                warn!("Read error: {}", e);
                tear_down(&shared, DisconnectReason::IoError(e.to_string())).await;
                return;
            }
        }
    }
}

/// Establish a TCP connection with a timeout.
async fn tcp_connect_with_timeout(
    host: &str,
    port: u16,
    connect_timeout: Duration,
) -> Result<TcpStream> {
    let timeout_ms = connect_timeout.as_millis() as u64;
    match timeout(connect_timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => {
            debug!("[CONNECT] TCP connection established");
            Ok(stream)
        }
        Ok(Err(e)) => {
            warn!("[CONNECT] TCP connect failed: {}", e);
            Err(Error::Io(e))
        }
        Err(_) => {
            warn!("[CONNECT] TCP connect timed out after {}ms", timeout_ms);
            Err(Error::Timeout { timeout_ms })
        }
    }
}

/// Client handle for one event socket session (Clone + Send).
///
/// Commands are serialized through the writer mutex, which also covers
/// the enqueue so queue order always matches wire order. The reader task
/// resolves requests strictly FIFO as their response blocks complete.
#[derive(Clone)]
pub struct Connection {
    writer: Arc<Mutex<OwnedWriteHalf>>,
    shared: Arc<Shared>,
    status_rx: watch::Receiver<ConnectionStatus>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Connection {
    /// Connect and log in with default options.
    pub async fn connect(host: &str, port: u16, password: &str) -> Result<Self> {
        Self::connect_with_options(host, port, password, ConnectOptions::default()).await
    }

    /// Connect and log in.
    ///
    /// The login command is written immediately after the transport comes
    /// up, without waiting for the switch's `auth/request` challenge —
    /// the challenge is tolerated by the login request as a no-op.
    pub async fn connect_with_options(
        host: &str,
        port: u16,
        password: &str,
        options: ConnectOptions,
    ) -> Result<Self> {
        // Validate the password before touching the network.
        let wire = Command::Auth {
            password: password.to_string(),
        }
        .to_wire_format()?;

        info!("Connecting to switch at {}:{}", host, port);
        let stream = tcp_connect_with_timeout(host, port, options.connect_timeout).await?;

        let shared = Arc::new(Shared {
            queue: Mutex::new(RequestQueue::new()),
            registry: EventRegistry::new(),
        });
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connected);

        // Enqueue the login request before the reader task starts, so the
        // unprompted auth challenge never observes an empty queue.
        let (request, handle) = Request::login();
        {
            let mut queue = shared.queue.lock().await;
            queue.enqueue(request);
        }

        let (read_half, write_half) = stream.into_split();
        tokio::spawn(reader_loop(
            read_half,
            shared.clone(),
            status_tx,
            options.trace_wire,
        ));

        let connection = Connection {
            writer: Arc::new(Mutex::new(write_half)),
            shared,
            status_rx,
        };

        debug!("Sending command: auth [REDACTED]");
        connection.write_wire(&wire).await?;

        let timeout_ms = options.login_timeout.as_millis() as u64;
        match timeout(options.login_timeout, handle.result()).await {
            Ok(Ok(_)) => {
                info!("Authenticated with switch");
                Ok(connection)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Timeout { timeout_ms }),
        }
    }

    async fn write_wire(&self, wire: &str) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(wire.as_bytes()).await.map_err(Error::Io)?;
        Ok(())
    }

    /// Enqueue a request and write its command block.
    ///
    /// The writer lock is held across both steps so concurrent senders
    /// cannot interleave an enqueue with another sender's write — FIFO
    /// queue order must match wire order exactly.
    async fn submit(&self, wire: String, request: Request) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::Disconnected);
        }

        let mut writer = self.writer.lock().await;
        {
            let mut queue = self.shared.queue.lock().await;
            queue.enqueue(request);
            trace!("{} request(s) now queued", queue.pending_len());
        }
        writer.write_all(wire.as_bytes()).await.map_err(Error::Io)?;
        Ok(())
    }

    /// Execute an API command synchronously on the switch.
    ///
    /// The returned handle resolves to the raw response body.
    ///
    /// ```rust,no_run
    /// # async fn example(conn: &eventsock::Connection) -> eventsock::Result<()> {
    /// let status = conn.api("status").await?.result().await?;
    /// println!("{}", status);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn api(&self, command: &str) -> Result<PendingReply<String>> {
        let wire = Command::Api {
            command: command.to_string(),
        }
        .to_wire_format()?;
        debug!("Sending command: {}", wire.trim_end());
        let (request, handle) = Request::api();
        self.submit(wire, request).await?;
        Ok(handle)
    }

    /// Execute an API command in the background.
    ///
    /// The handle resolves as soon as the switch acknowledges the job
    /// (`+OK Job-UUID: …`), not when the job completes. Subscribe to
    /// `BACKGROUND_JOB` events and correlate on
    /// [`EventDocument::job_uuid`] for the final result.
    pub async fn bgapi(&self, command: &str) -> Result<PendingReply<String>> {
        let wire = Command::BgApi {
            command: command.to_string(),
        }
        .to_wire_format()?;
        debug!("Sending command: {}", wire.trim_end());
        let (request, handle) = Request::command("bgapi");
        self.submit(wire, request).await?;
        Ok(handle)
    }

    /// Subscribe to event delivery, e.g. `subscribe_events("xml", "ALL")`.
    ///
    /// Without this the switch sends no events and the observer registry
    /// stays silent.
    pub async fn subscribe_events(&self, format: &str, spec: &str) -> Result<PendingReply<String>> {
        let wire = Command::Events {
            format: format.to_string(),
            spec: spec.to_string(),
        }
        .to_wire_format()?;
        debug!("Sending command: {}", wire.trim_end());
        let (request, handle) = Request::command("event subscribe");
        self.submit(wire, request).await?;
        Ok(handle)
    }

    /// Log out and let the switch close the session.
    pub async fn exit(&self) -> Result<PendingReply<String>> {
        let (request, handle) = Request::command("exit");
        self.submit(Command::Exit.to_wire_format()?, request).await?;
        Ok(handle)
    }

    /// Register a listener for an exact event name.
    pub fn on_event(&self, event_name: impl Into<String>, listener: Arc<dyn EventListener>) {
        self.shared.registry.register(event_name, listener);
    }

    /// The connection's observer registry.
    pub fn registry(&self) -> &EventRegistry {
        &self.shared.registry
    }

    // --- Convenience verbs: string templates over api/bgapi ---

    /// Originate a new call and hand it to `destination` (an extension or
    /// dialplan application) once it answers.
    pub async fn originate(&self, url: &str, destination: &str) -> Result<PendingReply<String>> {
        self.bgapi(&format!("originate {} {}", url, destination))
            .await
    }

    /// Dial `url` out from a conference.
    pub async fn conference_dial(
        &self,
        conference: &str,
        url: &str,
    ) -> Result<PendingReply<String>> {
        self.bgapi(&format!("conference {} dial {}", conference, url))
            .await
    }

    /// List conference members as parsed records.
    pub async fn conference_list(
        &self,
        conference: &str,
    ) -> Result<PendingReply<Vec<ConferenceMember>>> {
        let wire = Command::Api {
            command: format!("conference {} list", conference),
        }
        .to_wire_format()?;
        debug!("Sending command: {}", wire.trim_end());
        let (request, handle) = Request::conference_list();
        self.submit(wire, request).await?;
        Ok(handle)
    }

    /// Kick a member out of a conference.
    pub async fn conference_kick(
        &self,
        conference: &str,
        member_id: &str,
    ) -> Result<PendingReply<String>> {
        self.api(&format!("conference {} kick {}", conference, member_id))
            .await
    }

    /// Send DTMF digits to a conference member.
    pub async fn conference_dtmf(
        &self,
        conference: &str,
        member_id: &str,
        digits: &str,
    ) -> Result<PendingReply<String>> {
        self.api(&format!(
            "conference {} dtmf {} {}",
            conference, member_id, digits
        ))
        .await
    }

    /// Speak text into a conference via the configured TTS engine.
    pub async fn conference_say(
        &self,
        conference: &str,
        text: &str,
    ) -> Result<PendingReply<String>> {
        self.api(&format!("conference {} say {}", conference, text))
            .await
    }

    /// Play a file into a conference, or to one member if given.
    pub async fn conference_play(
        &self,
        conference: &str,
        file: &str,
        member_id: Option<&str>,
    ) -> Result<PendingReply<String>> {
        let command = match member_id {
            Some(id) => format!("conference {} play {} {}", conference, file, id),
            None => format!("conference {} play {}", conference, file),
        };
        self.api(&command).await
    }

    /// Stop playback in a conference.
    pub async fn conference_stop(&self, conference: &str) -> Result<PendingReply<String>> {
        self.api(&format!("conference {} stop", conference)).await
    }

    /// List active channels (raw listing body).
    pub async fn show_channels(&self) -> Result<PendingReply<String>> {
        self.api("show channels").await
    }

    /// Hang up a channel, optionally with a cause code.
    pub async fn kill_channel(
        &self,
        uuid: &str,
        cause: Option<&str>,
    ) -> Result<PendingReply<String>> {
        let command = match cause {
            Some(cause) => format!("uuid_kill {} {}", uuid, cause),
            None => format!("uuid_kill {}", uuid),
        };
        self.api(&command).await
    }

    /// Transfer a channel to a new dialplan destination.
    pub async fn transfer(&self, uuid: &str, destination: &str) -> Result<PendingReply<String>> {
        self.api(&format!("uuid_transfer {} {}", uuid, destination))
            .await
    }

    /// Play a file to one or both legs of a live call.
    pub async fn broadcast(
        &self,
        uuid: &str,
        path: &str,
        leg: BroadcastLeg,
    ) -> Result<PendingReply<String>> {
        self.api(&format!("uuid_broadcast {} {} {}", uuid, path, leg.as_str()))
            .await
    }

    /// Restart a SIP profile.
    pub async fn profile_restart(&self, profile: &str) -> Result<PendingReply<String>> {
        self.api(&format!("sofia profile {} restart", profile))
            .await
    }

    /// Fetch a SIP profile's status dump.
    pub async fn profile_status(&self, profile: &str) -> Result<PendingReply<String>> {
        self.api(&format!("sofia status profile {}", profile)).await
    }

    /// Whether the connection is alive (not yet disconnected).
    pub fn is_connected(&self) -> bool {
        matches!(*self.status_rx.borrow(), ConnectionStatus::Connected)
    }

    /// Current connection status snapshot.
    pub fn status(&self) -> ConnectionStatus {
        self.status_rx.borrow().clone()
    }

    /// Wait until the connection transitions to disconnected, returning
    /// the reason.
    pub async fn closed(&self) -> DisconnectReason {
        let mut rx = self.status_rx.clone();
        loop {
            if let ConnectionStatus::Disconnected(reason) = &*rx.borrow() {
                return reason.clone();
            }
            if rx.changed().await.is_err() {
                return DisconnectReason::ConnectionClosed;
            }
        }
    }

    /// Close the session by shutting down the write half. The reader task
    /// observes EOF and fails any still-unresolved requests.
    pub async fn close(&self) -> Result<()> {
        info!("Client requested disconnect");
        let mut writer = self.writer.lock().await;
        writer.shutdown().await.map_err(Error::Io)?;
        Ok(())
    }
}
