//! Async client for a telephony switch's event socket interface.
//!
//! One persistent TCP connection multiplexes unsolicited event
//! notifications and strictly ordered command/response exchanges. The
//! switch answers commands in send order — there is no request id on the
//! wire — so this crate keeps a FIFO of in-flight requests and resolves
//! each one as its response block completes, reassembling
//! `Content-Length` framed bodies along the way.
//!
//! # Architecture
//!
//! - [`Connection`] (Clone + Send) — send commands from any task; each
//!   verb returns a [`PendingReply`] resolved by the background reader.
//! - [`EventRegistry`] — register [`EventListener`]s per event name;
//!   unsolicited event blocks are parsed into [`EventDocument`]s and
//!   dispatched in registration order.
//!
//! # Examples
//!
//! ```rust,no_run
//! use eventsock::{Connection, Error};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let conn = Connection::connect("localhost", 8021, "ClueCon").await?;
//!
//!     let status = conn.api("status").await?.result().await?;
//!     println!("{}", status);
//!
//!     // Commands pipeline: issue several, await in order.
//!     let a = conn.bgapi("originate user/1000 9664").await?;
//!     let b = conn.conference_list("main").await?;
//!     println!("originate: {}", a.result().await?);
//!     for member in b.result().await? {
//!         println!("member {} = {}", member.id, member.short_uri());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Observing events
//!
//! ```rust,no_run
//! use eventsock::{Connection, EventDocument, Error};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let conn = Connection::connect("localhost", 8021, "ClueCon").await?;
//!     conn.on_event(
//!         "DETECTED_SPEECH",
//!         Arc::new(|_name: &str, doc: &EventDocument| {
//!             if doc.speech_type() == Some("detected-speech") {
//!                 println!("heard: {:?}", doc.xml_body_text("input"));
//!             }
//!         }),
//!     );
//!     conn.subscribe_events("xml", "ALL").await?.result().await?;
//!     conn.closed().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Reconnecting
//!
//! Transport loss fails every unresolved request with
//! [`Error::Disconnected`]; use [`connect_with_retry`] to re-establish
//! with capped backoff.

#[macro_use]
mod macros;

pub mod connection;
pub mod document;
pub mod error;
pub mod framer;
pub mod headers;
pub mod models;
pub mod reconnect;
pub mod registry;

pub(crate) mod command;
pub mod constants;
pub(crate) mod queue;
pub(crate) mod request;

pub use connection::{
    BroadcastLeg, ConnectOptions, Connection, ConnectionStatus, DisconnectReason,
};
pub use constants::DEFAULT_PORT;
pub use document::{xml_element_text, EventDocument};
pub use error::{Error, Result};
pub use framer::LineFramer;
pub use headers::HeaderName;
pub use models::{short_uri, ConferenceMember};
pub use reconnect::{connect_with_retry, RetryOptions};
pub use registry::{EventListener, EventRegistry};
pub use request::PendingReply;
