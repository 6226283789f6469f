// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;

use crate::app::errors::{AppError, AppResult};
use crate::app::ports::{ClockPort, ExecOutput, ExecRequest, RemoteSession, SessionConnector};
use crate::app::services::layout::UserLayout;
use crate::app::services::pid_resolution::ResolveTiming;
use crate::app::services::run_id::RunIdGenerator;
use crate::app::types::{Fleet, HostRole};

pub mod envs;
pub mod logs;
pub mod multi_sync;
pub mod pipeline;
pub mod provisioning;
pub mod supervisor;
pub mod tracker;
pub mod tree_sync;

#[cfg(test)]
mod local_e2e;

#[derive(Clone)]
pub struct UseCases {
    pub(crate) fleet: Arc<Fleet>,
    pub(crate) connector: Arc<dyn SessionConnector>,
    pub(crate) run_ids: Arc<RunIdGenerator>,
    pub(crate) resolve_timing: ResolveTiming,
}

impl UseCases {
    pub fn new(
        fleet: Arc<Fleet>,
        connector: Arc<dyn SessionConnector>,
        clock: Arc<dyn ClockPort>,
    ) -> Self {
        Self {
            fleet,
            connector,
            run_ids: Arc::new(RunIdGenerator::new(clock)),
            resolve_timing: ResolveTiming::default(),
        }
    }

    pub fn with_resolve_timing(mut self, timing: ResolveTiming) -> Self {
        self.resolve_timing = timing;
        self
    }

    pub fn fleet(&self) -> &Fleet {
        &self.fleet
    }

    pub(crate) fn layout(&self, role: HostRole, username: &str) -> AppResult<UserLayout> {
        let profile = self.fleet.profile(role)?;
        Ok(UserLayout::new(&profile.home_root, username))
    }
}

/// Sessions opened while serving one request. Each role is connected at
/// most once and every opened session is closed exactly once.
pub(crate) struct SessionSet<'a> {
    connector: &'a dyn SessionConnector,
    open: Vec<Arc<dyn RemoteSession>>,
}

impl<'a> SessionSet<'a> {
    pub(crate) fn new(connector: &'a dyn SessionConnector) -> Self {
        Self {
            connector,
            open: Vec::new(),
        }
    }

    pub(crate) async fn open(&mut self, role: HostRole) -> AppResult<Arc<dyn RemoteSession>> {
        if let Some(session) = self.open.iter().find(|s| s.role() == role) {
            return Ok(session.clone());
        }
        let session: Arc<dyn RemoteSession> = Arc::from(self.connector.connect(role).await?);
        tracing::debug!("opened session {}", session.label());
        self.open.push(session.clone());
        Ok(session)
    }

    pub(crate) async fn close_all(self) {
        for session in self.open {
            session.close().await;
            tracing::debug!("closed session {}", session.label());
        }
    }
}

/// Runs `command` unprivileged and retries it elevated on a nonzero exit.
pub(crate) async fn exec_escalating(
    session: &dyn RemoteSession,
    command: &str,
) -> AppResult<ExecOutput> {
    let out = session.exec(ExecRequest::plain(command)).await?;
    if out.success() {
        return Ok(out);
    }
    tracing::debug!(
        "`{command}` failed on {} (exit {}), retrying elevated",
        session.label(),
        out.exit_code
    );
    let out = session.exec(ExecRequest::elevated(command)).await?;
    if out.success() {
        Ok(out)
    } else {
        let err = AppError::permission_denied(format!(
            "`{command}` failed on {}: {}",
            session.label(),
            out.stderr_lossy().trim()
        ));
        tracing::warn!("{err}");
        Err(err)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use crate::app::ports::SessionConnector;
    use crate::app::services::pid_resolution::ResolveTiming;
    use crate::app::testing::FixedClock;
    use crate::app::types::{
        EngineSettings, Fleet, HostProfile, HostRole, SudoMode, Transport,
    };

    use super::UseCases;

    pub fn profile(role: HostRole, home_root: &str) -> HostProfile {
        HostProfile {
            role,
            address: "127.0.0.1".to_string(),
            port: 22,
            username: "user".to_string(),
            credential: None,
            sudo: SudoMode::Disabled,
            transport: Transport::Local,
            home_root: home_root.to_string(),
        }
    }

    /// A fleet whose roles live under `<root>/<role>`.
    pub fn fleet(root: &str) -> Fleet {
        let hosts: BTreeMap<_, _> = HostRole::ALL
            .into_iter()
            .map(|role| (role, profile(role, &format!("{root}/{role}"))))
            .collect();
        Fleet::new(hosts, EngineSettings::default())
    }

    pub fn usecases(fleet: Fleet, connector: Arc<dyn SessionConnector>) -> UseCases {
        UseCases::new(Arc::new(fleet), connector, Arc::new(FixedClock::default()))
            .with_resolve_timing(ResolveTiming {
                scan_attempts: 3,
                scan_interval: std::time::Duration::from_millis(50),
                settle: std::time::Duration::from_millis(200),
            })
    }
}
