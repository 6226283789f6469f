// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;

use async_trait::async_trait;

use crate::adapters::local::LocalSession;
use crate::adapters::ssh::SshSession;
use crate::app::errors::AppResult;
use crate::app::ports::{RemoteSession, SessionConnector};
use crate::app::types::{Fleet, HostRole, Transport};

/// Connects to fleet roles according to each host's transport.
#[derive(Clone)]
pub struct FleetConnector {
    fleet: Arc<Fleet>,
}

impl FleetConnector {
    pub fn new(fleet: Arc<Fleet>) -> Self {
        Self { fleet }
    }
}

#[async_trait]
impl SessionConnector for FleetConnector {
    async fn connect(&self, role: HostRole) -> AppResult<Box<dyn RemoteSession>> {
        let profile = self.fleet.profile(role)?.clone();
        match profile.transport {
            Transport::Ssh => Ok(Box::new(
                SshSession::connect(profile, &self.fleet.settings).await?,
            )),
            Transport::Local => Ok(Box::new(LocalSession::new(profile, &self.fleet.settings))),
        }
    }
}
