// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Launcher module - tenant process backends.

pub mod mock;
pub mod native;
mod traits;

pub use mock::{MockChild, MockLauncher};
pub use native::NativeLauncher;
pub use traits::*;
