// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end coverage for the six scenarios a desktop/Asterisk
//! integration actually exercises: login, duplicate login, heartbeat
//! loss, supervisor-forced status, the Asterisk `Originate` round trip
//! behind `spy`, and cross-agent visibility.

use std::net::SocketAddr;
use std::time::Duration;

use cti::persistence::{AgentRecord, Skill};
use cti::session::state::AgentLevel;
use cti_specs::{connect, mock_ami_server, read_frame, send_frame, start_server, PASSWORD_HASH};
use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

fn agent(id: i64, username: &str, fullname: &str, level: AgentLevel) -> AgentRecord {
    AgentRecord { agent_id: id, username: username.to_owned(), fullname: fullname.to_owned(), level }
}

async fn login(addr: SocketAddr, username: &str) -> (BufReader<OwnedReadHalf>, OwnedWriteHalf, String, String) {
    let (mut reader, mut writer) = connect(addr).await;
    let handshake = read_frame(&mut reader).await;
    send_frame(&mut writer, &format!("<authentication>{username}:s3cret</authentication>")).await;
    let success = read_frame(&mut reader).await;
    let transfer = read_frame(&mut reader).await;
    assert!(transfer.starts_with("<transfer>"), "expected a <transfer> frame, got {transfer}");
    (reader, writer, handshake, success)
}

async fn unused_ami_addr() -> SocketAddr {
    let (addr, _rx) = mock_ami_server().await;
    addr
}

#[tokio::test]
async fn happy_login_returns_status_and_skills() {
    let ami = unused_ami_addr().await;
    let server = start_server(
        vec![(agent(1, "alice", "Alice Agent", AgentLevel::Agent), PASSWORD_HASH, vec!["Q1".to_owned()], vec![
            Skill { name: "billing".to_owned(), id: 9 },
        ])],
        ami,
    )
    .await;

    let (_reader, _writer, handshake, success) = login(server.addr, "alice").await;

    assert!(handshake.contains("<welcome"), "handshake missing welcome: {handshake}");
    assert!(success.contains("<status>ok</status>"), "login did not succeed: {success}");
    assert!(success.contains("<level>0</level>"), "wrong agent level rendered: {success}");

    assert!(server.registry.session_by_username("alice").await.is_some());
}

#[tokio::test]
async fn duplicate_login_force_logs_out_the_second_connection() {
    let ami = unused_ami_addr().await;
    let server = start_server(
        vec![(agent(1, "alice", "Alice Agent", AgentLevel::Agent), PASSWORD_HASH, vec!["Q1".to_owned()], vec![])],
        ami,
    )
    .await;

    let (mut first_reader, _first_writer, ..) = login(server.addr, "alice").await;

    let (mut second_reader, mut second_writer) = connect(server.addr).await;
    let _handshake = read_frame(&mut second_reader).await;
    send_frame(&mut second_writer, "<authentication>alice:s3cret</authentication>").await;
    let success = read_frame(&mut second_reader).await;
    assert!(success.contains("<status>ok</status>"), "second login should still authenticate: {success}");
    let _transfer = read_frame(&mut second_reader).await;

    let force_logout = read_frame(&mut second_reader).await;
    assert!(force_logout.contains("force-logout"), "second connection should be force-logged-out: {force_logout}");

    // The first connection is undisturbed by the duplicate — nothing is
    // waiting for it on the wire.
    let undisturbed = tokio::time::timeout(Duration::from_millis(200), read_frame(&mut first_reader)).await;
    assert!(undisturbed.is_err(), "the original session should not receive a force-logout");
}

#[tokio::test(start_paused = true)]
async fn heartbeat_loss_closes_the_session_with_a_timeout_error() {
    let ami = unused_ami_addr().await;
    let server = start_server(
        vec![(agent(1, "alice", "Alice Agent", AgentLevel::Agent), PASSWORD_HASH, vec!["Q1".to_owned()], vec![])],
        ami,
    )
    .await;

    let (mut reader, _writer, ..) = login(server.addr, "alice").await;

    tokio::time::advance(Duration::from_secs(21)).await;

    let line = read_frame(&mut reader).await;
    assert_eq!(line, "-ERR Timeout", "heartbeat watchdog should close with a timeout error");
}

#[tokio::test]
async fn supervisor_forced_ready_broadcasts_to_the_supervisor() {
    let ami = unused_ami_addr().await;
    let server = start_server(
        vec![
            (agent(1, "bob", "Bob Supervisor", AgentLevel::Supervisor), PASSWORD_HASH, vec!["Q1".to_owned()], vec![]),
            (agent(2, "alice", "Alice Agent", AgentLevel::Agent), PASSWORD_HASH, vec!["Q1".to_owned()], vec![]),
        ],
        ami,
    )
    .await;

    // Both test agents dial in from the loopback address, so the
    // in-memory extension binding (keyed by peer IP) is shared; logging
    // bob in first and alice in second leaves extension "1001" pointing
    // at alice by the time bob targets it.
    let (mut bob_reader, mut bob_writer, ..) = login(server.addr, "bob").await;
    let (_alice_reader, _alice_writer, ..) = login(server.addr, "alice").await;

    // Drain the join-time snapshot bob received when alice joined Q1.
    let _ = read_frame(&mut bob_reader).await;

    send_frame(
        &mut bob_writer,
        r#"<action type="status"><status ready="true" outbound="false" extension="1001" group="Q1"/></action>"#,
    )
    .await;

    // alice applies the forced change on her own task and re-broadcasts
    // her snapshot; bob, a higher-level member of the same group, is the
    // one who sees it.
    let snapshot = read_frame(&mut bob_reader).await;
    assert!(snapshot.contains("<agent>"), "bob should see alice's forced-status broadcast: {snapshot}");
    assert!(snapshot.contains("alice"), "broadcast should name alice: {snapshot}");
}

#[tokio::test]
async fn spy_issues_an_originate_to_asterisk() {
    let (ami_addr, mut seen) = mock_ami_server().await;
    let server = start_server(
        vec![
            (agent(1, "bob", "Bob Supervisor", AgentLevel::Supervisor), PASSWORD_HASH, vec!["Q1".to_owned()], vec![]),
            (agent(2, "alice", "Alice Agent", AgentLevel::Agent), PASSWORD_HASH, vec!["Q1".to_owned()], vec![]),
        ],
        ami_addr,
    )
    .await;

    // The AMI client's own startup `Login` is always the first request
    // observed; draining it also guarantees the link is up before we
    // issue `spy`.
    let login_frame = seen.recv().await.expect("ami login observed");
    assert_eq!(login_frame.get("Action").expect("action header").encode(), "Login");

    let (_bob_reader, mut bob_writer, ..) = login(server.addr, "bob").await;
    let (_alice_reader, _alice_writer, ..) = login(server.addr, "alice").await;

    let target = server.registry.session_by_username("alice").await.expect("alice registered");
    target.phone.write().await.channel = "SIP/1002-00000001".to_owned();

    send_frame(&mut bob_writer, r#"<action type="spy"><spy agent="alice"/></action>"#).await;

    let originate = seen.recv().await.expect("originate observed");
    assert_eq!(originate.get("Action").expect("action header").encode(), "Originate");
    assert_eq!(originate.get("Application").expect("application header").encode(), "ChanSpy");
    assert_eq!(originate.get("Data").expect("data header").encode(), "SIP/1002-00000001");
}

#[tokio::test]
async fn agent_never_sees_a_peers_snapshot_but_a_supervisor_does() {
    let ami = unused_ami_addr().await;
    let server = start_server(
        vec![
            (agent(1, "carol", "Carol Agent", AgentLevel::Agent), PASSWORD_HASH, vec!["Q1".to_owned()], vec![]),
            (agent(2, "alice", "Alice Agent", AgentLevel::Agent), PASSWORD_HASH, vec!["Q1".to_owned()], vec![]),
            (agent(3, "bob", "Bob Supervisor", AgentLevel::Supervisor), PASSWORD_HASH, vec!["Q1".to_owned()], vec![]),
        ],
        ami,
    )
    .await;

    let (mut carol_reader, _carol_writer, ..) = login(server.addr, "carol").await;
    let (_alice_reader, mut alice_writer, ..) = login(server.addr, "alice").await;
    let (mut bob_reader, _bob_writer, ..) = login(server.addr, "bob").await;

    // Joining last, bob is replayed both carol's and alice's current
    // snapshots (§4.5 "On join" is bidirectional); drain both before
    // asserting on the status-change broadcast below.
    let _ = read_frame(&mut bob_reader).await;
    let _ = read_frame(&mut bob_reader).await;

    send_frame(&mut alice_writer, r#"<action type="ready"><ready value="true" outbound="false" mode=""/></action>"#)
        .await;

    let bob_saw = read_frame(&mut bob_reader).await;
    assert!(bob_saw.contains("alice"), "supervisor should see alice's status change: {bob_saw}");

    // Carol, a peer agent, never receives it — assert by racing the
    // socket read against a short timeout instead of blocking forever.
    let carol_saw = tokio::time::timeout(Duration::from_millis(200), read_frame(&mut carol_reader)).await;
    assert!(carol_saw.is_err(), "a peer agent must not see another agent's snapshot");
}
