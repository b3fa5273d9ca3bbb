// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The AMI client (C1): a single managed TCP connection to Asterisk,
//! request/response correlation by `ActionID`, and event fan-out.
//!
//! Unlike the original's `sendPacket`, which blocks the calling thread on
//! `waitForReadyRead`, [`AmiClient::send`] completes a per-id oneshot
//! future when the reader task observes the matching `Response:` frame
//! (SPEC_FULL.md §4.1 supplement) — no suspension point holds up another
//! session's worker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ami::frame::AmiFrame;
use crate::error::{AmiErrorKind, CtiError};

/// Backoff between reconnection attempts (§4.1 "Failure modes").
const RECONNECT_BACKOFF: Duration = Duration::from_secs(15);

/// An AMI event, published to every subscriber.
#[derive(Debug, Clone)]
pub struct AmiEvent {
    pub name: String,
    pub headers: AmiFrame,
}

struct PendingTable {
    slots: Mutex<HashMap<String, oneshot::Sender<AmiFrame>>>,
}

impl PendingTable {
    fn new() -> Self {
        Self { slots: Mutex::new(HashMap::new()) }
    }

    async fn register(&self, action_id: String) -> oneshot::Receiver<AmiFrame> {
        let (tx, rx) = oneshot::channel();
        self.slots.lock().await.insert(action_id, tx);
        rx
    }

    async fn complete(&self, action_id: &str, frame: AmiFrame) {
        if let Some(tx) = self.slots.lock().await.remove(action_id) {
            let _ = tx.send(frame);
        }
    }

    async fn forget(&self, action_id: &str) {
        self.slots.lock().await.remove(action_id);
    }

    /// Drop every pending slot — their receivers observe a closed
    /// channel and the caller surfaces `AmiError::Disconnected`.
    async fn fail_all(&self) {
        self.slots.lock().await.clear();
    }
}

struct Connection {
    writer: tokio::net::tcp::OwnedWriteHalf,
}

/// Shared handle to the AMI link. Cloning is cheap; every clone talks to
/// the same underlying connection and correlation table.
#[derive(Clone)]
pub struct AmiClient {
    inner: Arc<Inner>,
}

struct Inner {
    host: String,
    port: u16,
    username: String,
    secret: String,
    pending: PendingTable,
    connection: Mutex<Option<Connection>>,
    events: broadcast::Sender<AmiEvent>,
}

impl AmiClient {
    /// Construct the client and spawn its connect/reconnect loop. The
    /// returned client can be cloned and shared across workers; actual
    /// I/O happens on the background task this spawns.
    pub fn spawn(
        host: String,
        port: u16,
        username: String,
        secret: String,
        shutdown: CancellationToken,
    ) -> Self {
        let (events, _rx) = broadcast::channel(256);
        let client = Self {
            inner: Arc::new(Inner {
                host,
                port,
                username,
                secret,
                pending: PendingTable::new(),
                connection: Mutex::new(None),
                events,
            }),
        };

        let task_client = client.clone();
        tokio::spawn(async move { task_client.run(shutdown).await });

        client
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AmiEvent> {
        self.inner.events.subscribe()
    }

    /// Send an action's headers, stamping `Action`/`ActionID`, and await
    /// its response. Fails with `AmiError(Disconnected)` if the link is
    /// down or drops mid-flight.
    pub async fn send(&self, action: &str, mut headers: AmiFrame) -> Result<AmiFrame, CtiError> {
        let action_id = Uuid::new_v4().to_string();
        headers.set("Action", action);
        headers.set("ActionID", action_id.clone());

        let rx = self.inner.pending.register(action_id.clone()).await;

        let mut guard = self.inner.connection.lock().await;
        let Some(conn) = guard.as_mut() else {
            drop(guard);
            self.inner.pending.forget(&action_id).await;
            return Err(CtiError::Ami(AmiErrorKind::Disconnected));
        };

        if conn.writer.write_all(headers.encode().as_bytes()).await.is_err() {
            drop(guard);
            self.inner.pending.forget(&action_id).await;
            return Err(CtiError::Ami(AmiErrorKind::Disconnected));
        }
        drop(guard);

        rx.await.map_err(|_| CtiError::Ami(AmiErrorKind::Unanswered))
    }

    async fn run(&self, shutdown: CancellationToken) {
        loop {
            if shutdown.is_cancelled() {
                return;
            }

            match self.connect_and_serve(&shutdown).await {
                Ok(()) => {
                    info!("ami link closed cleanly");
                }
                Err(e) => {
                    warn!(err = %e, "ami link failed");
                }
            }

            *self.inner.connection.lock().await = None;
            self.inner.pending.fail_all().await;

            if shutdown.is_cancelled() {
                return;
            }

            tokio::select! {
                _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
                _ = shutdown.cancelled() => return,
            }
        }
    }

    async fn connect_and_serve(&self, shutdown: &CancellationToken) -> anyhow::Result<()> {
        let stream = TcpStream::connect((self.inner.host.as_str(), self.inner.port)).await?;
        let (read_half, write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        // Discard the vendor banner line.
        let mut banner = String::new();
        reader.read_line(&mut banner).await?;
        debug!(banner = banner.trim(), "ami connected");

        *self.inner.connection.lock().await = Some(Connection { writer: write_half });

        // Written straight to the socket rather than through `send()`:
        // the pending-oneshot table is only ever fulfilled by `dispatch`
        // in the frame-reading loop below, which hasn't started yet —
        // awaiting a correlated reply here would deadlock the task
        // before it ever reaches that loop. The Login response doesn't
        // need correlation; it's discarded like any other frame with an
        // `ActionID` nobody registered.
        let mut login = AmiFrame::new();
        login.set("Action", "Login");
        login.set("Username", self.inner.username.clone());
        login.set("Secret", self.inner.secret.clone());
        {
            let mut guard = self.inner.connection.lock().await;
            if let Some(conn) = guard.as_mut() {
                conn.writer.write_all(login.encode().as_bytes()).await?;
            }
        }

        let mut buf = String::new();
        let mut accum = AmiFrame::new();

        loop {
            buf.clear();
            let read = tokio::select! {
                r = reader.read_line(&mut buf) => r?,
                _ = shutdown.cancelled() => return Ok(()),
            };
            if read == 0 {
                anyhow::bail!("ami peer closed connection");
            }

            let line = buf.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                self.dispatch(std::mem::take(&mut accum)).await;
                continue;
            }

            if let Some((key, value)) = line.split_once(':') {
                accum.push(key.trim(), crate::ami::frame::AmiValue::decode(value.trim()));
            }
        }
    }

    async fn dispatch(&self, mut frame: AmiFrame) {
        if let Some(response) = frame.get("Response").cloned() {
            let _ = response;
            if let Some(action_id) = frame.get("ActionID").map(|v| v.encode()) {
                self.inner.pending.complete(&action_id, frame).await;
            }
        } else if frame.contains("Event") {
            let name = frame.get("Event").map(|v| v.encode()).unwrap_or_default();
            let _ = self.inner.events.send(AmiEvent { name, headers: frame });
        } else {
            let _ = &mut frame;
            warn!("discarding unrecognized ami frame");
        }
    }
}
