// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Guildhall Protocol - supervisor <-> bot IPC
//!
//! Every tenant bot runs as its own OS process. The supervisor talks to it
//! over the child's standard streams:
//!
//! ```text
//! ┌──────────────────────┐   stdin:  {"type":"shutdown"}              ┌──────────────┐
//! │  guildhall supervisor │ ─────────────────────────────────────────► │  tenant bot  │
//! │                      │ ◄───────────────────────────────────────── │              │
//! └──────────────────────┘   stdout: {"type":"ready","data":{...}}    └──────────────┘
//!                              stderr: free-form logs (forwarded)
//! ```
//!
//! Each message is one JSON object terminated by `\n`. The channel is
//! ordered and reliable (it is a pipe), so no sequencing is layered on top.
//!
//! # Modules
//!
//! - [`message`]: Tagged message types for both directions
//! - [`codec`]: Line encoding and async line reader/writer helpers
//! - [`env`]: Environment variable contract for spawned bots

pub mod codec;
pub mod env;
pub mod message;

pub use codec::{LineReader, LineWriter, ProtocolError, decode_line, encode_line};
pub use message::{ChildMessage, SupervisorMessage};
