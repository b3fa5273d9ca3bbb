// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed builders for the AMI actions C4/C5 invoke (§4.1 "Supported
//! actions"). Each builder returns the header set `AmiClient::send` will
//! stamp with `Action`/`ActionID` before writing.

use crate::ami::frame::AmiFrame;

pub fn login(username: &str, secret: &str) -> AmiFrame {
    let mut frame = AmiFrame::new();
    frame.set("Username", username).set("Secret", secret);
    frame
}

pub fn logout() -> AmiFrame {
    AmiFrame::new()
}

pub fn core_show_channels() -> AmiFrame {
    AmiFrame::new()
}

pub fn sip_peers() -> AmiFrame {
    AmiFrame::new()
}

/// Variables to attach to an `Originate` as repeated `Variable: k=v`
/// headers, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct OriginateVariables(Vec<(String, String)>);

impl OriginateVariables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.push((key.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct OriginateRequest {
    pub channel: String,
    pub exten: String,
    pub context: String,
    pub priority: u32,
    pub application: String,
    pub data: String,
    pub timeout: u32,
    pub caller_id: String,
    pub variables: OriginateVariables,
    pub account: String,
    pub early_media: bool,
    pub r#async: bool,
    pub codecs: Vec<String>,
}

pub fn originate(req: OriginateRequest) -> AmiFrame {
    let mut frame = AmiFrame::new();
    frame.set("Channel", req.channel.clone());
    frame.set("EarlyMedia", req.early_media);
    frame.set("Async", req.r#async);

    frame.set_not_empty("Timeout", AmiNumber(req.timeout));
    frame.set_not_empty("CallerID", req.caller_id);
    frame.set_not_empty("Account", req.account);
    frame.set_not_empty("Codecs", req.codecs.join(","));

    if !req.exten.is_empty() && !req.context.is_empty() && req.priority > 0 {
        frame.set("Exten", req.exten);
        frame.set("Context", req.context);
        frame.set("Priority", req.priority.to_string());
    }

    if !req.application.is_empty() {
        frame.set("Application", req.application);
        frame.set_not_empty("Data", req.data);
    }

    for (key, value) in req.variables.0 {
        frame.push("Variable", format!("{key}={value}"));
    }

    frame
}

pub fn play_dtmf(channel: &str, digit: char) -> AmiFrame {
    let mut frame = AmiFrame::new();
    frame.set("Channel", channel).set("Digit", digit.to_string());
    frame
}

pub fn hangup(channel: &str, cause: Option<u32>) -> AmiFrame {
    let mut frame = AmiFrame::new();
    frame.set("Channel", channel);
    frame.set_not_empty("Cause", AmiNumber(cause.unwrap_or(0)));
    frame
}

#[derive(Debug, Clone, Default)]
pub struct RedirectRequest {
    pub channel: String,
    pub exten: String,
    pub context: String,
    pub priority: u32,
    pub extra_channel: String,
    pub extra_exten: String,
    pub extra_context: String,
    pub extra_priority: u32,
}

pub fn redirect(req: RedirectRequest) -> AmiFrame {
    let mut frame = AmiFrame::new();
    frame.set("Channel", req.channel);
    frame.set("Exten", req.exten);
    frame.set("Context", req.context);
    frame.set("Priority", req.priority.to_string());

    frame.set_not_empty("ExtraChannel", req.extra_channel);
    frame.set_not_empty("ExtraExten", req.extra_exten);
    frame.set_not_empty("ExtraContext", req.extra_context);
    frame.set_not_empty("ExtraPriority", AmiNumber(req.extra_priority));

    frame
}

/// Wraps a `u32` so `set_not_empty` can treat zero as "absent", matching
/// `insertNotEmpty`'s `QMetaType::UInt` special case.
struct AmiNumber(u32);

impl From<AmiNumber> for crate::ami::frame::AmiValue {
    fn from(n: AmiNumber) -> Self {
        if n.0 == 0 {
            crate::ami::frame::AmiValue::Text(String::new())
        } else {
            crate::ami::frame::AmiValue::Text(n.0.to_string())
        }
    }
}
