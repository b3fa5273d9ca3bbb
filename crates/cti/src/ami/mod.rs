// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Asterisk Manager Interface client (C1).

pub mod actions;
pub mod client;
pub mod frame;

pub use client::{AmiClient, AmiEvent};
pub use frame::{AmiFrame, AmiValue};
