//! TCP connection to the manager interface.

use crate::error::AmiError;
use crate::frame::{encode_action, EventRecord, RecordDecoder};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// Read-only queries issued right after login so the stores start from the
/// PBX's current view instead of an empty one.
pub const BOOTSTRAP_ACTIONS: &[&str] = &[
    "DeviceStateList",
    "QueueStatus",
    "PJSIPShowEndpoints",
    "PJSIPShowContacts",
    "PJSIPShowAors",
];

/// Longest line accepted from the PBX, terminator included.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Where and how to log in.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// `host:port` of the manager interface.
    pub addr: String,
    pub username: String,
    pub secret: String,
    pub connect_timeout: Duration,
}

/// Handle to the (possibly absent) manager connection.
///
/// Cloning is cheap; all clones share the same write half. The handle
/// outlives individual connections: [`ManagerClient::connect`] installs a new
/// write half and [`ManagerClient::disconnect`] clears it, after which every
/// [`ManagerClient::send_command`] fails fast with [`AmiError::NotConnected`].
#[derive(Debug, Clone, Default)]
pub struct ManagerClient {
    writer: Arc<Mutex<Option<OwnedWriteHalf>>>,
    action_seq: Arc<AtomicU64>,
}

impl ManagerClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dials the PBX, sends the login command, and returns the read side.
    ///
    /// # Errors
    ///
    /// Returns `AmiError::Timeout` or `AmiError::Connect` if the TCP
    /// connection cannot be established, and `AmiError::Io` if the login
    /// frame cannot be written.
    pub async fn connect(&self, options: &ConnectOptions) -> Result<EventStream, AmiError> {
        let stream = tokio::time::timeout(options.connect_timeout, TcpStream::connect(&options.addr))
            .await
            .map_err(|_| AmiError::Timeout)?
            .map_err(AmiError::Connect)?;
        let (read, mut write) = stream.into_split();

        let login = encode_action(
            "Login",
            &[
                ("Username", options.username.as_str()),
                ("Secret", options.secret.as_str()),
                ("Events", "on"),
            ],
        );
        write.write_all(login.as_bytes()).await?;

        *self.writer.lock().await = Some(write);
        tracing::info!(addr = %options.addr, "manager interface connected");

        Ok(EventStream::new(BufReader::new(read)))
    }

    /// Writes one command frame.
    ///
    /// Frames are written under a lock, so concurrent callers never
    /// interleave lines on the wire.
    ///
    /// # Errors
    ///
    /// Returns `AmiError::NotConnected` when there is no live connection and
    /// `AmiError::Io` when the write fails; a failed write also drops the
    /// connection handle.
    pub async fn send_command(&self, name: &str, fields: &[(&str, &str)]) -> Result<(), AmiError> {
        let frame = encode_action(name, fields);
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(AmiError::NotConnected)?;

        tracing::debug!(action = name, "sending manager command");
        if let Err(e) = writer.write_all(frame.as_bytes()).await {
            *guard = None;
            return Err(AmiError::Io(e));
        }
        Ok(())
    }

    /// Drops the write half; subsequent commands fail with `NotConnected`.
    pub async fn disconnect(&self) {
        if self.writer.lock().await.take().is_some() {
            tracing::info!("manager interface disconnected");
        }
    }

    /// Whether a connection is currently installed.
    pub async fn is_connected(&self) -> bool {
        self.writer.lock().await.is_some()
    }

    /// Returns a fresh `ActionID` value with the given prefix.
    pub fn next_action_id(&self, prefix: &str) -> String {
        let seq = self.action_seq.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{prefix}-{seq}")
    }
}

/// The read side of a manager connection, yielding event records in wire
/// order.
#[derive(Debug)]
pub struct EventStream<R = BufReader<OwnedReadHalf>> {
    reader: R,
    decoder: RecordDecoder,
    line: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> EventStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            decoder: RecordDecoder::new(),
            line: Vec::with_capacity(256),
        }
    }

    /// Reads until the next complete record carrying an `Event` tag.
    ///
    /// Records without one (command responses) are dropped. Returns
    /// `Ok(None)` at end of stream; a record still being received at that
    /// point is discarded.
    ///
    /// # Errors
    ///
    /// Returns `AmiError::Io` on a read failure,
    /// `AmiError::Authentication` if the PBX rejects the login and
    /// `AmiError::LineTooLong` once a line reaches [`MAX_LINE_BYTES`]
    /// without a terminator.
    pub async fn next_event(&mut self) -> Result<Option<EventRecord>, AmiError> {
        loop {
            self.line.clear();
            let read = (&mut self.reader)
                .take(MAX_LINE_BYTES as u64)
                .read_until(b'\n', &mut self.line)
                .await?;
            if read == 0 {
                if self.decoder.has_partial() {
                    tracing::debug!("discarding unterminated record at end of stream");
                }
                return Ok(None);
            }
            if read == MAX_LINE_BYTES && self.line.last() != Some(&b'\n') {
                return Err(AmiError::LineTooLong(MAX_LINE_BYTES));
            }

            let line = String::from_utf8_lossy(&self.line);
            let Some(record) = self.decoder.push_line(&line) else {
                continue;
            };

            if record.event_type().is_some() {
                return Ok(Some(record));
            }
            if record.get("Response") == "Error" && record.get("Message").contains("Authentication") {
                return Err(AmiError::Authentication(record.get("Message").to_string()));
            }
            tracing::trace!(response = record.get("Response"), "dropping non-event record");
        }
    }
}

/// Timing of the post-login bootstrap queries.
#[derive(Debug, Clone, Copy)]
pub struct BootstrapPlan {
    /// Delay before the first query, letting the login settle.
    pub initial_delay: Duration,
    /// Delay before re-requesting contacts for endpoints that registered late.
    pub contacts_retry_delay: Duration,
}

impl Default for BootstrapPlan {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            contacts_retry_delay: Duration::from_secs(2),
        }
    }
}

/// Issues [`BOOTSTRAP_ACTIONS`] followed by a delayed repeat of the contact
/// enumeration.
///
/// # Errors
///
/// Stops at and returns the first send failure.
pub async fn run_bootstrap(client: &ManagerClient, plan: BootstrapPlan) -> Result<(), AmiError> {
    tokio::time::sleep(plan.initial_delay).await;
    for action in BOOTSTRAP_ACTIONS {
        tracing::info!(action, "requesting bootstrap snapshot");
        client.send_command(action, &[]).await?;
    }

    tokio::time::sleep(plan.contacts_retry_delay).await;
    tracing::info!(action = "PJSIPShowContacts", "repeating contact enumeration");
    client.send_command("PJSIPShowContacts", &[]).await
}
