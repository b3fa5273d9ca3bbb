// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end harness: binds a real CTI session listener backed by the
//! in-memory persistence adapter (no Postgres required) and, where a
//! scenario needs one, a minimal mock AMI server standing in for
//! Asterisk. Tests drive the protocol over a real `TcpStream`.

use std::net::SocketAddr;
use std::sync::Arc;

use cti::ami::{AmiClient, AmiFrame};
use cti::group::GroupBroker;
use cti::persistence::memory::MemoryAdapter;
use cti::persistence::{AgentRecord, Skill};
use cti::registry::Registry;
use cti::session::handler::{run_session, SessionContext};
use cti::session::protocol::QuoteStyle;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// The fixture password every test agent is seeded with, already hashed
/// the way `checkAuthentication` expects: `md5("s3cret")`.
pub const PASSWORD_HASH: &str = "33e1b232a4e6fa0028a6670753749a17";

pub struct TestServer {
    pub addr: SocketAddr,
    pub registry: Arc<Registry>,
    pub groups: Arc<GroupBroker>,
    shutdown: CancellationToken,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Build a [`MemoryAdapter`] seeded with a small agent roster, then bind
/// a listener and spawn one [`run_session`] task per accepted socket —
/// mirroring `cti::run`'s inner loop without requiring a live Postgres.
pub async fn start_server(agents: Vec<(AgentRecord, &str, Vec<String>, Vec<Skill>)>, ami_addr: SocketAddr) -> TestServer {
    let mut adapter = MemoryAdapter::default();
    for (agent, password_hash, groups, skills) in agents {
        adapter = adapter.with_agent(agent, password_hash, groups, skills);
    }
    // Every client in this harness dials in over loopback, so one fixed
    // extension binding stands in for the IP-to-extension map a real
    // desktop phone would populate.
    adapter = adapter.with_extension("127.0.0.1", 1, "1001");

    let shutdown = CancellationToken::new();
    let ami = AmiClient::spawn(
        ami_addr.ip().to_string(),
        ami_addr.port(),
        "test".to_owned(),
        "test".to_owned(),
        shutdown.clone(),
    );

    let ctx = Arc::new(SessionContext {
        registry: Arc::new(Registry::new()),
        groups: Arc::new(GroupBroker::new()),
        persistence: Arc::new(adapter),
        ami,
        quote: QuoteStyle::Double,
        shutdown: shutdown.clone(),
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");

    let accept_ctx = Arc::clone(&ctx);
    let accept_shutdown = shutdown.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let Ok((socket, peer)) = accepted else { continue };
                    let session_ctx = Arc::clone(&accept_ctx);
                    tokio::spawn(async move {
                        run_session(socket, peer, session_ctx).await;
                    });
                }
                _ = accept_shutdown.cancelled() => break,
            }
        }
    });

    TestServer { addr, registry: ctx.registry.clone(), groups: ctx.groups.clone(), shutdown }
}

/// Spin up a minimal AMI stand-in: sends a banner line, then answers
/// every request with `Response: Success` echoing the caller's
/// `ActionID` — enough to exercise [`cti::ami::client::AmiClient`]'s
/// request/response correlation without a real Asterisk. Every request
/// it receives, fully parsed, is forwarded on the returned channel so a
/// test can assert on what the session actually sent.
pub async fn mock_ami_server() -> (SocketAddr, mpsc::UnboundedReceiver<AmiFrame>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock ami");
    let addr = listener.local_addr().expect("local addr");
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else { return };
            let seen_tx = seen_tx.clone();
            tokio::spawn(async move {
                let (read_half, mut write_half) = socket.into_split();
                let mut reader = BufReader::new(read_half);
                let _ = write_half.write_all(b"Asterisk Call Manager/1.0\r\n").await;

                let mut accum = AmiFrame::new();
                let mut line = String::new();
                loop {
                    line.clear();
                    match reader.read_line(&mut line).await {
                        Ok(0) | Err(_) => return,
                        Ok(_) => {}
                    }
                    let trimmed = line.trim_end_matches(['\r', '\n']);
                    if trimmed.is_empty() {
                        let action_id = accum.get("ActionID").map(|v| v.encode()).unwrap_or_default();
                        let reply = format!(
                            "Response: Success\r\nActionID: {action_id}\r\nMessage: Originate successfully queued\r\n\r\n"
                        );
                        let sent = std::mem::replace(&mut accum, AmiFrame::new());
                        let _ = seen_tx.send(sent);
                        if write_half.write_all(reply.as_bytes()).await.is_err() {
                            return;
                        }
                        continue;
                    }
                    if let Some((key, value)) = trimmed.split_once(':') {
                        accum.push(key.trim(), cti::ami::AmiValue::decode(value.trim()));
                    }
                }
            });
        }
    });

    (addr, seen_rx)
}

pub async fn connect(addr: SocketAddr) -> (BufReader<tokio::net::tcp::OwnedReadHalf>, tokio::net::tcp::OwnedWriteHalf) {
    let stream = TcpStream::connect(addr).await.expect("connect to test server");
    let (read_half, write_half) = stream.into_split();
    (BufReader::new(read_half), write_half)
}

/// Read one `\n`-delimited frame, trimmed of its trailing line endings.
pub async fn read_frame(reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>) -> String {
    let mut line = String::new();
    reader.read_line(&mut line).await.expect("read frame");
    line.trim_end_matches(['\r', '\n']).to_owned()
}

pub async fn send_frame(writer: &mut tokio::net::tcp::OwnedWriteHalf, frame: &str) {
    writer.write_all(frame.as_bytes()).await.expect("write frame");
    writer.write_all(b"\n").await.expect("write newline");
    writer.flush().await.expect("flush");
}
