//! Bounded-retry connection factory.

use crate::connection::{ConnectOptions, Connection};
use crate::error::{Error, Result};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Retry policy for [`connect_with_retry`].
#[derive(Debug, Clone)]
pub struct RetryOptions {
    /// Total connection attempts before giving up. Default: 5.
    pub max_attempts: u32,
    /// Delay after the first failed attempt. Default: 500ms.
    pub initial_backoff: Duration,
    /// Backoff ceiling; doubling stops here. Default: 8s.
    pub max_backoff: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

/// Connect and log in, retrying transport failures with capped
/// exponential backoff.
///
/// Each attempt re-runs the full connect-and-login handshake. A rejected
/// password aborts immediately — retrying cannot fix credentials. Once
/// `max_attempts` is exhausted the last error is returned wrapped in
/// [`Error::RetriesExhausted`], so the wait always terminates.
///
/// Reconnection after a later disconnect is the caller's decision: watch
/// [`Connection::closed`] and call this again. Requests that were
/// in flight at disconnect time have already been failed with
/// [`Error::Disconnected`] — they are never replayed.
pub async fn connect_with_retry(
    host: &str,
    port: u16,
    password: &str,
    options: ConnectOptions,
    retry: RetryOptions,
) -> Result<Connection> {
    let attempts = retry.max_attempts.max(1);
    let mut backoff = retry.initial_backoff;
    let mut last: Option<Error> = None;

    for attempt in 1..=attempts {
        match Connection::connect_with_options(host, port, password, options.clone()).await {
            Ok(connection) => {
                if attempt > 1 {
                    info!("[CONNECT] established on attempt {}/{}", attempt, attempts);
                }
                return Ok(connection);
            }
            Err(e @ Error::AuthFailed { .. }) => return Err(e),
            Err(e) => {
                warn!(
                    "[CONNECT] attempt {}/{} failed: {}",
                    attempt, attempts, e
                );
                last = Some(e);
                if attempt < attempts {
                    sleep(backoff).await;
                    backoff = (backoff * 2).min(retry.max_backoff);
                }
            }
        }
    }

    Err(Error::RetriesExhausted {
        attempts,
        last: Box::new(last.unwrap_or(Error::Disconnected)),
    })
}
