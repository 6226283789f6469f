// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod clock;
pub mod connector;
pub mod session;

pub use clock::ClockPort;
pub use connector::SessionConnector;
pub use session::{ExecOutput, ExecRequest, RemoteReader, RemoteSession, RemoteWriter};
