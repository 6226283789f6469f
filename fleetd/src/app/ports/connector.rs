// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::errors::AppResult;
use crate::app::ports::RemoteSession;
use crate::app::types::HostRole;

/// Opens sessions to fleet members by role.
/// Fails with an authentication or connection error before any work happens.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(&self, role: HostRole) -> AppResult<Box<dyn RemoteSession>>;
}
