// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn close_stream_matches_bare_closing_tag() {
    assert_eq!(parse_frame("</stream>").unwrap(), ClientFrame::CloseStream);
}

#[test]
fn beat_parses_with_no_payload() {
    assert_eq!(parse_frame("<beat/>").unwrap(), ClientFrame::Beat);
}

#[test]
fn plain_authentication_carries_username_colon_password() {
    let frame = parse_frame(r#"<authentication type="plain">alice:s3cret</authentication>"#).unwrap();
    assert_eq!(
        frame,
        ClientFrame::Authentication { encrypted: false, payload: "alice:s3cret".to_owned() }
    );
}

#[test]
fn encrypted_authentication_is_flagged() {
    let frame = parse_frame(r#"<authentication type="encrypted">YWxpY2U6czNjcmV0</authentication>"#).unwrap();
    assert_eq!(
        frame,
        ClientFrame::Authentication { encrypted: true, payload: "YWxpY2U6czNjcmV0".to_owned() }
    );
}

#[test]
fn ready_action_parses_attributes() {
    let frame =
        parse_frame(r#"<action type="ready"><ready value="true" outbound="false" mode="acw"/></action>"#)
            .unwrap();
    assert_eq!(
        frame,
        ClientFrame::Action(ActionFrame::Ready {
            value: true,
            outbound: false,
            mode: "acw".to_owned()
        })
    );
}

#[test]
fn status_action_parses_attributes() {
    let frame = parse_frame(
        r#"<action type="status"><status ready="true" outbound="false" extension="2001" group="Q1"/></action>"#,
    )
    .unwrap();
    assert_eq!(
        frame,
        ClientFrame::Action(ActionFrame::Status {
            ready: true,
            outbound: false,
            extension: "2001".to_owned(),
            group: "Q1".to_owned()
        })
    );
}

#[test]
fn action_child_name_mismatch_is_unrecognized() {
    let frame = parse_frame(r#"<action type="ready"><bogus value="true"/></action>"#).unwrap();
    assert_eq!(frame, ClientFrame::Action(ActionFrame::Unrecognized));
}

#[test]
fn unrecognized_root_element_is_a_protocol_error() {
    assert!(parse_frame("<quit/>").is_err());
}

#[test]
fn malformed_xml_is_a_protocol_error() {
    assert!(parse_frame("<action type=\"ready\"><ready").is_err());
}

#[tokio::test]
async fn handshake_uses_selected_quote_style() {
    let mut buf = Vec::new();
    {
        let mut writer = FrameWriter::new(&mut buf, QuoteStyle::Single);
        writer.write_handshake().await.unwrap();
    }
    let text = String::from_utf8(buf).unwrap();
    assert!(text.starts_with("<?xml version='1.0' encoding='UTF-8'?>"));
    assert!(text.contains("name='CTI Server v1.0'"));
    assert!(text.ends_with('\n'));
}

#[tokio::test]
async fn auth_success_lists_skills_in_transfer() {
    let mut buf = Vec::new();
    {
        let mut writer = FrameWriter::new(&mut buf, QuoteStyle::Double);
        writer
            .write_auth_success(
                AgentLevel::Agent,
                "2026-07-27 10:00:00",
                Some("2001"),
                &[("billing".to_owned(), 1), ("sales".to_owned(), 2)],
            )
            .await
            .unwrap();
    }
    let text = String::from_utf8(buf).unwrap();
    assert!(text.contains("<status>ok</status>"));
    assert!(text.contains("<extension>2001</extension>"));
    assert!(text.contains(r#"<skill name="billing" id="1"/>"#));
    assert!(text.contains(r#"<skill name="sales" id="2"/>"#));
}

#[tokio::test]
async fn agent_snapshot_renders_active_channel_and_callee() {
    let mut buf = Vec::new();
    let phone = Phone {
        time: None,
        status: "ready".to_owned(),
        channel: "SIP/2001-00000001".to_owned(),
        active: true,
        outbound: false,
        dnis: "5551234".to_owned(),
    };
    {
        let mut writer = FrameWriter::new(&mut buf, QuoteStyle::Double);
        writer
            .write_agent_snapshot("alice", "Alice Agent", Some("Q1"), 3, 1, "2026-07-27 10:00:00", &phone)
            .await
            .unwrap();
    }
    let text = String::from_utf8(buf).unwrap();
    assert!(text.contains("activechannel=\"SIP/2001-00000001\""));
    assert!(text.contains("<callee dnis=\"5551234\"/>"));
}

#[tokio::test]
async fn agent_snapshot_renders_passive_channel_and_caller() {
    let mut buf = Vec::new();
    let phone = Phone {
        time: None,
        status: "ready".to_owned(),
        channel: "SIP/2002-00000002".to_owned(),
        active: false,
        outbound: true,
        dnis: "5557890".to_owned(),
    };
    {
        let mut writer = FrameWriter::new(&mut buf, QuoteStyle::Double);
        writer.write_agent_snapshot("bob", "Bob Agent", None, 0, 0, "2026-07-27 10:00:00", &phone).await.unwrap();
    }
    let text = String::from_utf8(buf).unwrap();
    assert!(text.contains("passivechannel=\"SIP/2002-00000002\""));
    assert!(text.contains("<caller dnis=\"5557890\"/>"));
}

#[tokio::test]
async fn force_logout_carries_reason() {
    let mut buf = Vec::new();
    {
        let mut writer = FrameWriter::new(&mut buf, QuoteStyle::Double);
        writer.write_force_logout("same user login").await.unwrap();
    }
    let text = String::from_utf8(buf).unwrap();
    assert!(text.contains("id=\"force-logout\""));
    assert!(text.contains("<status>same user login</status>"));
}

#[tokio::test]
async fn heartbeat_timeout_writes_plain_text_error() {
    let mut buf = Vec::new();
    {
        let mut writer = FrameWriter::new(&mut buf, QuoteStyle::Double);
        writer.write_heartbeat_timeout().await.unwrap();
    }
    assert_eq!(buf, b"-ERR Timeout\n");
}

#[tokio::test]
async fn read_frame_strips_trailing_newline() {
    let input = b"<beat/>\n<authentication type=\"plain\">a:b</authentication>\n".to_vec();
    let mut reader = tokio::io::BufReader::new(&input[..]);
    let first = read_frame(&mut reader).await.unwrap().unwrap();
    assert_eq!(first, "<beat/>");
    let second = read_frame(&mut reader).await.unwrap().unwrap();
    assert_eq!(second, r#"<authentication type="plain">a:b</authentication>"#);
    assert!(read_frame(&mut reader).await.unwrap().is_none());
}
