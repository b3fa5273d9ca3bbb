// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The per-connection task (C2): one spawned per accepted socket,
//! running the handshake, authentication, heartbeat watchdog, and
//! action dispatcher for the life of the session (§4.2).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ami::{actions, AmiClient};
use crate::error::CtiError;
use crate::group::{AgentSnapshotMsg, GroupBroker};
use crate::persistence::PersistenceAdapter;
use crate::registry::{Registry, SessionCommand, SessionHandle};
use crate::session::auth::check_authentication;
use crate::session::protocol::{read_frame, ActionFrame, ClientFrame, FrameWriter, QuoteStyle};
use crate::session::state::{AgentLevel, AgentStatus, AuthState, JournalIds, Phone};

/// Heartbeat watchdog period (§4.2 fixes 20s; §9 open question 3).
const HEARTBEAT: Duration = Duration::from_secs(20);

/// Shared collaborators every session needs; constructed once at startup
/// and cloned (cheaply, via `Arc`) into each spawned session task.
pub struct SessionContext<P: PersistenceAdapter> {
    pub registry: Arc<Registry>,
    pub groups: Arc<GroupBroker>,
    pub persistence: Arc<P>,
    pub ami: AmiClient,
    pub quote: QuoteStyle,
    pub shutdown: CancellationToken,
}

/// Run one client session to completion. Never returns an error to the
/// caller — all failures are handled internally per §7's propagation
/// policy (log, convert to a protocol-visible outcome, move on).
pub async fn run_session<P: PersistenceAdapter>(
    socket: TcpStream,
    addr: SocketAddr,
    ctx: Arc<SessionContext<P>>,
) {
    let _ = socket.set_nodelay(true);
    let (read_half, write_half) = socket.into_split();
    let mut reader = BufReader::new(read_half);
    let mut writer = FrameWriter::new(write_half, ctx.quote);

    if let Err(e) = writer.write_handshake().await {
        warn!(%addr, err = %e, "failed to write handshake");
        return;
    }

    let (commands_tx, mut commands_rx) = mpsc::channel(32);
    let placeholder = Arc::new(SessionHandle::new(
        addr,
        String::new(),
        AgentLevel::Agent,
        String::new(),
        Vec::new(),
        commands_tx.clone(),
    ));
    ctx.registry.insert(addr, placeholder).await;

    let mut auth_state = AuthState::PreAuth;
    let mut identity: Option<crate::session::state::AgentIdentity> = None;
    let mut extension = String::new();
    let mut groups: Vec<String> = Vec::new();
    let mut journal = JournalIds::default();
    let mut phone = Phone::default();
    let mut counters = crate::session::state::Counters::default();
    let mut deadline = tokio::time::Instant::now() + HEARTBEAT;

    loop {
        if auth_state == AuthState::Closing {
            break;
        }

        tokio::select! {
            line = read_frame(&mut reader) => {
                match line {
                    Ok(Some(line)) => {
                        if !handle_inbound_frame(
                            &line,
                            &ctx,
                            &mut writer,
                            addr,
                            &commands_tx,
                            &mut auth_state,
                            &mut identity,
                            &mut extension,
                            &mut groups,
                            &mut journal,
                            &mut phone,
                            &mut counters,
                            &mut deadline,
                        ).await {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!(%addr, "peer disconnected");
                        break;
                    }
                    Err(e) => {
                        warn!(%addr, err = %e, "socket read failed");
                        break;
                    }
                }
            }
            Some(command) = commands_rx.recv() => {
                if !handle_command(
                    command,
                    &ctx,
                    &mut writer,
                    &identity,
                    &mut auth_state,
                    &mut phone,
                    &mut counters,
                    &groups,
                    &mut journal,
                ).await {
                    break;
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                let _ = writer.write_heartbeat_timeout().await;
                info!(%addr, "heartbeat watchdog expired");
                break;
            }
            _ = ctx.shutdown.cancelled() => {
                let _ = writer.write_force_logout("server stop services").await;
                break;
            }
        }
    }

    finalize(&ctx, addr, identity.as_ref(), &extension, &groups, &journal).await;
}

#[allow(clippy::too_many_arguments)]
async fn handle_inbound_frame<P: PersistenceAdapter, W: tokio::io::AsyncWrite + Unpin>(
    line: &str,
    ctx: &SessionContext<P>,
    writer: &mut FrameWriter<W>,
    addr: SocketAddr,
    commands_tx: &mpsc::Sender<SessionCommand>,
    auth_state: &mut AuthState,
    identity: &mut Option<crate::session::state::AgentIdentity>,
    extension: &mut String,
    groups: &mut Vec<String>,
    journal: &mut JournalIds,
    phone: &mut Phone,
    counters: &mut crate::session::state::Counters,
    deadline: &mut tokio::time::Instant,
) -> bool {
    let frame = match crate::session::protocol::parse_frame(line) {
        Ok(frame) => frame,
        Err(CtiError::Protocol(msg)) => {
            warn!(%addr, msg, "dropping malformed frame");
            return true;
        }
        Err(_) => return true,
    };

    match frame {
        ClientFrame::Beat => {
            *deadline = tokio::time::Instant::now() + HEARTBEAT;
            true
        }
        ClientFrame::CloseStream => {
            *auth_state = AuthState::Closing;
            false
        }
        ClientFrame::Authentication { encrypted, payload } if *auth_state == AuthState::PreAuth => {
            authenticate(
                ctx,
                writer,
                addr,
                commands_tx,
                &payload,
                encrypted,
                auth_state,
                identity,
                extension,
                groups,
                journal,
            )
            .await
        }
        ClientFrame::Authentication { .. } => {
            warn!(%addr, "authentication frame after login ignored");
            true
        }
        ClientFrame::Action(action) if *auth_state == AuthState::Authenticated => {
            dispatch_action(
                ctx,
                writer,
                addr,
                action,
                identity,
                extension.as_str(),
                groups.as_slice(),
                journal,
                phone,
                counters,
            )
            .await;
            true
        }
        ClientFrame::Action(_) => {
            warn!(%addr, "action before authentication ignored");
            true
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn authenticate<P: PersistenceAdapter, W: tokio::io::AsyncWrite + Unpin>(
    ctx: &SessionContext<P>,
    writer: &mut FrameWriter<W>,
    addr: SocketAddr,
    commands_tx: &mpsc::Sender<SessionCommand>,
    payload: &str,
    encrypted: bool,
    auth_state: &mut AuthState,
    identity: &mut Option<crate::session::state::AgentIdentity>,
    extension: &mut String,
    groups: &mut Vec<String>,
    journal: &mut JournalIds,
) -> bool {
    let already_bound = if extension.is_empty() { None } else { Some(extension.as_str()) };

    match check_authentication(ctx.persistence.as_ref(), payload, encrypted, &addr.ip().to_string(), already_bound)
        .await
    {
        Ok(success) => {
            let login_time = Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
            if writer
                .write_auth_success(success.identity.level, &login_time, success.extension.as_deref(), &success.skills)
                .await
                .is_err()
            {
                return false;
            }

            *extension = success.extension.clone().unwrap_or_default();
            *groups = success.groups.clone();
            *journal = success.journal;

            let handle = Arc::new(SessionHandle::new(
                addr,
                success.identity.username.clone(),
                success.identity.level,
                extension.clone(),
                groups.clone(),
                commands_tx.clone(),
            ));
            ctx.registry.insert(addr, Arc::clone(&handle)).await;

            if ctx.registry.user_logged_in(&success.identity.username, addr, extension).await.is_err() {
                let _ = writer.write_force_logout("same user login").await;
                *auth_state = AuthState::Closing;
                *identity = Some(success.identity);
                return false;
            }

            let snapshot = AgentSnapshotMsg {
                username: success.identity.username.clone(),
                fullname: success.identity.fullname.clone(),
                group: None,
                handle: 0,
                abandoned: 0,
                time: login_time,
                phone: Phone::default(),
            };
            ctx.groups.join(groups, handle, &snapshot).await;

            info!(%addr, username = success.identity.username, "agent logged in");
            *identity = Some(success.identity);
            *auth_state = AuthState::Authenticated;
            true
        }
        Err(CtiError::AuthFailure(message)) => {
            let _ = writer.write_auth_failed(&message).await;
            true
        }
        Err(e) => {
            warn!(%addr, err = %e, "authentication failed");
            let _ = writer.write_auth_failed("Retrieve user query error").await;
            true
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn dispatch_action<P: PersistenceAdapter, W: tokio::io::AsyncWrite + Unpin>(
    ctx: &SessionContext<P>,
    writer: &mut FrameWriter<W>,
    addr: SocketAddr,
    action: ActionFrame,
    identity: &Option<crate::session::state::AgentIdentity>,
    extension: &str,
    groups: &[String],
    journal: &mut JournalIds,
    phone: &mut Phone,
    counters: &mut crate::session::state::Counters,
) {
    let Some(identity) = identity else { return };

    match action {
        ActionFrame::Ready { value, outbound, mode } => {
            let status = if value { AgentStatus::Ready } else { AgentStatus::from_mode(&mode) };
            let status_str = if value { "ready".to_owned() } else { mode };
            apply_status_change(ctx, identity, extension, groups, journal, phone, counters, status, &status_str, outbound)
                .await;
        }
        ActionFrame::AskDialAuthorization { destination, customer_id, campaign } => {
            debug!(%addr, destination, customer_id, campaign, "ask-dial-authorization");
            let _ = writer.write_dialer_response(&destination).await;
        }
        ActionFrame::Spy { agent } => {
            handle_spy(ctx, identity, groups, &agent).await;
        }
        ActionFrame::Status { ready, outbound, extension: target_extension, group } => {
            handle_forced_status(ctx, identity, groups, &target_extension, ready, outbound).await;
            let _ = group;
        }
        ActionFrame::Unrecognized => {
            warn!(%addr, "unrecognized action ignored");
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn apply_status_change<P: PersistenceAdapter>(
    ctx: &SessionContext<P>,
    identity: &crate::session::state::AgentIdentity,
    extension: &str,
    groups: &[String],
    journal: &mut JournalIds,
    phone: &mut Phone,
    counters: &mut crate::session::state::Counters,
    status: AgentStatus,
    status_text: &str,
    outbound: bool,
) {
    let now = Utc::now();

    if let Some(status_log_id) = journal.status_log_id {
        if let Err(cause) = ctx.persistence.close_status_log(status_log_id, now).await {
            warn!(cause, "closing status log failed");
        }
    }
    if let Some(session_log_id) = journal.session_log_id {
        match ctx.persistence.open_status_log(session_log_id, status.as_db(), now).await {
            Ok(id) => journal.status_log_id = Some(id),
            Err(cause) => warn!(cause, "opening status log failed"),
        }
    }

    phone.time = Some(now);
    phone.status = status_text.to_owned();
    phone.outbound = outbound;

    if let Some(handle) = ctx.registry.session_by_username(&identity.username).await {
        *handle.phone.write().await = phone.clone();
    }

    let snapshot = AgentSnapshotMsg {
        username: identity.username.clone(),
        fullname: identity.fullname.clone(),
        group: None,
        handle: counters.handle,
        abandoned: counters.abandoned,
        time: now.format("%Y-%m-%d %H:%M:%S").to_string(),
        phone: phone.clone(),
    };

    if let Some(handle) = ctx.registry.session_by_username(&identity.username).await {
        ctx.groups.broadcast_status(groups, &handle, &snapshot).await;
    }

    let _ = extension;
}

async fn handle_spy<P: PersistenceAdapter>(
    ctx: &SessionContext<P>,
    requester: &crate::session::state::AgentIdentity,
    requester_groups: &[String],
    target_username: &str,
) {
    if requester.level == AgentLevel::Agent {
        warn!(username = requester.username, target_username, "spy denied: agent-level requester");
        return;
    }

    let Some(target) = ctx.registry.session_by_username(target_username).await else {
        return;
    };

    if !GroupBroker::shares_a_group(requester_groups, &target.groups) {
        warn!(username = requester.username, target_username, "spy denied: no shared group");
        return;
    }

    let channel = target.phone.read().await.channel.clone();
    if channel.is_empty() {
        debug!(target_username, "spy requested with no active channel");
        return;
    }

    let mut variables = actions::OriginateVariables::new();
    variables = variables.insert("spy_channel", &channel);
    let request = actions::OriginateRequest {
        channel: channel.clone(),
        application: "ChanSpy".to_owned(),
        data: channel,
        variables,
        ..Default::default()
    };

    if let Err(e) = ctx.ami.send("Originate", actions::originate(request)).await {
        warn!(username = requester.username, target_username, err = %e, "spy originate failed");
    }
}

async fn handle_forced_status<P: PersistenceAdapter>(
    ctx: &SessionContext<P>,
    requester: &crate::session::state::AgentIdentity,
    requester_groups: &[String],
    target_extension: &str,
    ready: bool,
    outbound: bool,
) {
    let Some(target) = ctx.registry.session_by_extension(target_extension).await else {
        return;
    };

    if !GroupBroker::shares_a_group(requester_groups, &target.groups) {
        warn!(username = requester.username, target_extension, "forced status denied: no shared group");
        return;
    }

    target.send(SessionCommand::ForceStatus { ready, outbound }).await;
}

#[allow(clippy::too_many_arguments)]
async fn handle_command<P: PersistenceAdapter, W: tokio::io::AsyncWrite + Unpin>(
    command: SessionCommand,
    ctx: &SessionContext<P>,
    writer: &mut FrameWriter<W>,
    identity: &Option<crate::session::state::AgentIdentity>,
    auth_state: &mut AuthState,
    phone: &mut Phone,
    counters: &mut crate::session::state::Counters,
    groups: &[String],
    journal: &mut JournalIds,
) -> bool {
    match command {
        SessionCommand::ForceLogout(reason) => {
            let _ = writer.write_force_logout(&reason).await;
            *auth_state = AuthState::Closing;
            false
        }
        SessionCommand::AgentSnapshot(snapshot) => {
            let _ = writer
                .write_agent_snapshot(
                    &snapshot.username,
                    &snapshot.fullname,
                    snapshot.group.as_deref(),
                    snapshot.handle,
                    snapshot.abandoned,
                    &snapshot.time,
                    &snapshot.phone,
                )
                .await;
            true
        }
        SessionCommand::AgentLogout { username, extension, group } => {
            let _ = writer.write_agent_logout(&username, &extension, &group).await;
            true
        }
        SessionCommand::DialerResponse(formatted_number) => {
            let _ = writer.write_dialer_response(&formatted_number).await;
            true
        }
        SessionCommand::ForceStatus { ready, outbound } => {
            let Some(identity) = identity else { return true };
            let status = if ready { AgentStatus::Ready } else { AgentStatus::NotReady };
            let status_text = if ready { "ready" } else { "aux" };
            apply_status_change(ctx, identity, "", groups, journal, phone, counters, status, status_text, outbound)
                .await;
            true
        }
    }
}

/// §3 invariant 3 / §4.2 "Status journaling discipline": close the open
/// status row then the session row, remove every registry and group
/// reference, before the socket is considered finalized.
async fn finalize<P: PersistenceAdapter>(
    ctx: &SessionContext<P>,
    addr: SocketAddr,
    identity: Option<&crate::session::state::AgentIdentity>,
    extension: &str,
    groups: &[String],
    journal: &JournalIds,
) {
    let now = Utc::now();

    if let Some(status_log_id) = journal.status_log_id {
        if let Err(cause) = ctx.persistence.close_status_log(status_log_id, now).await {
            warn!(cause, "closing final status log failed");
        }
    }
    if let Some(session_log_id) = journal.session_log_id {
        if let Err(cause) = ctx.persistence.close_session_log(session_log_id, now).await {
            warn!(cause, "closing session log failed");
        }
    }

    if let Some(identity) = identity {
        if let Some(handle) = ctx.registry.session_by_username(&identity.username).await {
            ctx.groups.leave(groups, &handle).await;
        }
        ctx.registry.user_logged_out(&identity.username).await;
        let _ = extension;
    }

    ctx.registry.remove(&addr).await;
}
