// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire framing for the client session protocol (§4.2). The client wire
//! is a continuous XML stream rooted at `<stream>`; every top-level
//! subtree the server writes is followed by a bare `\n` the peer uses as
//! an application-level flush delimiter (not part of the XML grammar
//! itself — `</stream>` alone isn't well-formed XML either, so it gets
//! its own inbound frame kind rather than going through the parser).
//!
//! Outbound frames are hand-formatted: `xml-rs`'s emitter has no notion
//! of the single-vs-double attribute quote switch legacy clients need,
//! so only the *inbound* side goes through its `EventReader` (see
//! [`parse_frame`]).

use std::io;

use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use xml::reader::XmlEvent;
use xml::EventReader;

use crate::error::CtiError;
use crate::session::state::{AgentLevel, Phone};

/// Attribute quote style selected by `single_quote_handshake` (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteStyle {
    Single,
    Double,
}

impl QuoteStyle {
    fn ch(self) -> char {
        match self {
            Self::Single => '\'',
            Self::Double => '"',
        }
    }

    fn prologue(self) -> &'static str {
        match self {
            Self::Single => "<?xml version='1.0' encoding='UTF-8'?>",
            Self::Double => "<?xml version=\"1.0\" encoding=\"UTF-8\"?>",
        }
    }
}

/// Escape text content and attribute values per XML's five predefined
/// entities. Good enough for the fixed-shape frames this module emits.
fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn attr(quote: QuoteStyle, name: &str, value: &str) -> String {
    format!(" {name}={q}{v}{q}", q = quote.ch(), v = escape(value))
}

/// Writes server-originated frames onto an async sink, in the teacher's
/// append-then-flush style.
pub struct FrameWriter<W> {
    sink: W,
    quote: QuoteStyle,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(sink: W, quote: QuoteStyle) -> Self {
        Self { sink, quote }
    }

    async fn write_frame(&mut self, body: &str) -> io::Result<()> {
        self.sink.write_all(body.as_bytes()).await?;
        self.sink.write_all(b"\n").await?;
        self.sink.flush().await
    }

    /// The handshake prologue, sent once immediately after accept.
    /// `<stream>` is opened but never closed by the server — the client
    /// closes it with a bare `</stream>` when it hangs up.
    pub async fn write_handshake(&mut self) -> io::Result<()> {
        let mut body = String::new();
        body.push_str(self.quote.prologue());
        body.push_str("<stream>");
        body.push_str(&format!(
            "<welcome{}><note>Send &lt;quit /&gt; to close connection</note></welcome>",
            attr(self.quote, "name", "CTI Server v1.0")
        ));
        body.push_str(&format!(
            "<authentication{}>",
            attr(self.quote, "id", "prompt")
        ));
        body.push_str(&format!(
            "<type{}><note>send authentication using plain text</note></type>",
            attr(self.quote, "id", "plain")
        ));
        body.push_str(&format!(
            "<type{}><note>send authentication encrypted</note></type>",
            attr(self.quote, "id", "encrypted")
        ));
        body.push_str("</authentication>");
        self.write_frame(&body).await
    }

    /// Successful authentication: level/login/extension, `status`, then
    /// the `<transfer>` skill listing, as two frames (matching the
    /// original, which writes the `<authentication>` subtree and then a
    /// separate `<transfer>` subtree, each newline-terminated).
    pub async fn write_auth_success(
        &mut self,
        level: AgentLevel,
        login_time: &str,
        extension: Option<&str>,
        skills: &[(String, i64)],
    ) -> io::Result<()> {
        let mut body = format!("<authentication{}>", attr(self.quote, "id", "status"));
        body.push_str(&format!("<level>{}</level>", level.as_db()));
        body.push_str(&format!("<login>{}</login>", escape(login_time)));
        if let Some(extension) = extension {
            if !extension.is_empty() {
                body.push_str(&format!("<extension>{}</extension>", escape(extension)));
            }
        }
        body.push_str("<status>ok</status>");
        body.push_str("</authentication>");
        self.write_frame(&body).await?;

        let mut transfer = String::from("<transfer>");
        for (name, id) in skills {
            transfer.push_str("<skill");
            transfer.push_str(&attr(self.quote, "name", name));
            transfer.push_str(&attr(self.quote, "id", &id.to_string()));
            transfer.push_str("/>");
        }
        transfer.push_str("</transfer>");
        self.write_frame(&transfer).await
    }

    /// Failed authentication.
    pub async fn write_auth_failed(&mut self, message: &str) -> io::Result<()> {
        let body = format!(
            "<authentication{}><status>failed</status><message>{}</message></authentication>",
            attr(self.quote, "id", "status"),
            escape(message)
        );
        self.write_frame(&body).await
    }

    /// A force-logout: the last frame this session ever writes (P4).
    pub async fn write_force_logout(&mut self, reason: &str) -> io::Result<()> {
        let body = format!(
            "<authentication{}><status>{}</status></authentication>",
            attr(self.quote, "id", "force-logout"),
            escape(reason)
        );
        self.write_frame(&body).await
    }

    /// An `<agent>` status snapshot, visibility-filtered by the caller.
    #[allow(clippy::too_many_arguments)]
    pub async fn write_agent_snapshot(
        &mut self,
        username: &str,
        fullname: &str,
        group: Option<&str>,
        handle: u64,
        abandoned: u64,
        time: &str,
        phone: &Phone,
    ) -> io::Result<()> {
        let mut body = String::from("<agent>");
        body.push_str(&format!("<username>{}</username>", escape(username)));
        body.push_str(&format!("<fullname>{}</fullname>", escape(fullname)));
        if let Some(group) = group {
            body.push_str(&format!("<group>{}</group>", escape(group)));
        }
        body.push_str(&format!("<handle>{handle}</handle>"));
        body.push_str(&format!("<abandoned>{abandoned}</abandoned>"));
        body.push_str(&format!("<time>{}</time>", escape(time)));

        body.push_str("<phone");
        body.push_str(&attr(self.quote, "status", &phone.status));
        body.push_str(&attr(self.quote, "outbound", if phone.outbound { "true" } else { "false" }));
        if let Some(group) = group {
            body.push_str(&attr(self.quote, "group", group));
        }
        if !phone.channel.is_empty() {
            let key = if phone.active { "activechannel" } else { "passivechannel" };
            body.push_str(&attr(self.quote, key, &phone.channel));
        }
        body.push('>');

        if !phone.dnis.is_empty() {
            let tag = if phone.active { "callee" } else { "caller" };
            body.push_str(&format!("<{tag}"));
            body.push_str(&attr(self.quote, "dnis", &phone.dnis));
            body.push_str("/>");
        }
        body.push_str("</phone>");
        body.push_str("</agent>");

        self.write_frame(&body).await
    }

    /// A logout notice to higher-level group members (§4.5 "On logout").
    pub async fn write_agent_logout(
        &mut self,
        username: &str,
        extension: &str,
        group: &str,
    ) -> io::Result<()> {
        let mut body = String::from("<agent>");
        body.push_str(&format!("<username>{}</username>", escape(username)));
        if !extension.is_empty() {
            body.push_str(&format!("<extension>{}</extension>", escape(extension)));
        }
        body.push_str(&format!("<group>{}</group>", escape(group)));
        body.push_str("<logout/>");
        body.push_str("</agent>");
        self.write_frame(&body).await
    }

    pub async fn write_dialer_response(&mut self, formatted_number: &str) -> io::Result<()> {
        let body = format!("<dialer{}/>", attr(self.quote, "formatted-number", formatted_number));
        self.write_frame(&body).await
    }

    /// Heartbeat expiry: write the plain-text error and flush, no
    /// trailing newline re-added (the literal already ends in one).
    pub async fn write_heartbeat_timeout(&mut self) -> io::Result<()> {
        self.sink.write_all(b"-ERR Timeout\n").await?;
        self.sink.flush().await
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}

/// One parsed inbound frame (§4.2 "Post-auth client messages").
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    Beat,
    Authentication { encrypted: bool, payload: String },
    Action(ActionFrame),
    CloseStream,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActionFrame {
    Ready { value: bool, outbound: bool, mode: String },
    AskDialAuthorization { destination: String, customer_id: String, campaign: String },
    Spy { agent: String },
    Status { ready: bool, outbound: bool, extension: String, group: String },
    Unrecognized,
}

/// Read one frame delimited by the application-level `\n`. Returns
/// `Ok(None)` on clean EOF.
pub async fn read_frame<R: AsyncBufReadExt + Unpin>(reader: &mut R) -> io::Result<Option<String>> {
    let mut line = Vec::new();
    let read = reader.read_until(b'\n', &mut line).await?;
    if read == 0 {
        return Ok(None);
    }
    while line.last() == Some(&b'\n') || line.last() == Some(&b'\r') {
        line.pop();
    }
    Ok(Some(String::from_utf8_lossy(&line).into_owned()))
}

/// Parse one frame's text into a [`ClientFrame`]. `</stream>` is matched
/// directly since it is not, by itself, well-formed XML.
pub fn parse_frame(line: &str) -> Result<ClientFrame, CtiError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(CtiError::Protocol("empty frame".to_owned()));
    }
    if trimmed == "</stream>" {
        return Ok(ClientFrame::CloseStream);
    }

    let mut reader = EventReader::new(trimmed.as_bytes());
    let mut root: Option<(String, Vec<(String, String)>)> = None;
    let mut text = String::new();
    let mut child: Option<(String, Vec<(String, String)>)> = None;

    loop {
        match reader.next() {
            Ok(XmlEvent::StartElement { name, attributes, .. }) => {
                let attrs: Vec<(String, String)> =
                    attributes.into_iter().map(|a| (a.name.local_name, a.value)).collect();
                if root.is_none() {
                    root = Some((name.local_name, attrs));
                } else if child.is_none() {
                    child = Some((name.local_name, attrs));
                }
            }
            Ok(XmlEvent::Characters(chars)) => text.push_str(&chars),
            Ok(XmlEvent::EndDocument) => break,
            Ok(_) => {}
            Err(e) => return Err(CtiError::Protocol(format!("malformed xml: {e}"))),
        }
    }

    let Some((name, attrs)) = root else {
        return Err(CtiError::Protocol("no root element".to_owned()));
    };

    match name.as_str() {
        "beat" => Ok(ClientFrame::Beat),
        "authentication" => {
            let encrypted = attrs.iter().any(|(k, v)| k == "type" && v == "encrypted");
            Ok(ClientFrame::Authentication { encrypted, payload: text.trim().to_owned() })
        }
        "action" => {
            let action_type = attrs
                .iter()
                .find(|(k, _)| k == "type")
                .map(|(_, v)| v.clone())
                .unwrap_or_default();
            let Some((child_name, child_attrs)) = child else {
                return Ok(ClientFrame::Action(ActionFrame::Unrecognized));
            };
            if child_name != action_type {
                return Ok(ClientFrame::Action(ActionFrame::Unrecognized));
            }
            Ok(ClientFrame::Action(parse_action(&action_type, &child_attrs)))
        }
        other => Err(CtiError::Protocol(format!("unrecognized element: {other}"))),
    }
}

fn parse_action(action_type: &str, attrs: &[(String, String)]) -> ActionFrame {
    let get = |key: &str| attrs.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone()).unwrap_or_default();
    let is_true = |v: &str| v == "true";

    match action_type {
        "ready" => ActionFrame::Ready {
            value: is_true(&get("value")),
            outbound: is_true(&get("outbound")),
            mode: get("mode"),
        },
        "ask-dial-authorization" => ActionFrame::AskDialAuthorization {
            destination: get("destination"),
            customer_id: get("customerid"),
            campaign: get("campaign"),
        },
        "spy" => ActionFrame::Spy { agent: get("agent") },
        "status" => ActionFrame::Status {
            ready: is_true(&get("ready")),
            outbound: is_true(&get("outbound")),
            extension: get("extension"),
            group: get("group"),
        },
        _ => ActionFrame::Unrecognized,
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
