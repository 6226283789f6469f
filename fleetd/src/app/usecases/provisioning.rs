// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::app::errors::AppResult;
use crate::app::ports::RemoteSession;
use crate::app::services::layout::{self, UserLayout};
use crate::app::services::shell;
use crate::app::types::{HostProvisioning, HostRole, ProvisionReport};

use super::{SessionSet, UseCases, exec_escalating};

fn directories_for(role: HostRole, user_layout: &UserLayout) -> Vec<String> {
    let mut dirs = vec![user_layout.root().to_string()];
    match role {
        HostRole::Origin | HostRole::Relay => dirs.push(user_layout.projects_dir()),
        HostRole::Compute => {
            dirs.push(user_layout.projects_dir());
            dirs.push(user_layout.envs_dir());
        }
        HostRole::Archive => dirs.push(user_layout.outputs_dir()),
    }
    dirs
}

impl UseCases {
    /// Creates the per-user directory skeleton on every host. One failing
    /// host does not stop the others.
    #[tracing::instrument(name = "user_init", level = "info", skip(self))]
    pub async fn init_user(&self, username: &str) -> AppResult<ProvisionReport> {
        layout::validate_name("username", username)?;
        let mut hosts = Vec::new();
        for role in HostRole::ALL {
            let directories = directories_for(role, &self.layout(role, username)?);
            let mut sessions = SessionSet::new(self.connector.as_ref());
            let result = match sessions.open(role).await {
                Ok(session) => create_directories(session.as_ref(), &directories).await,
                Err(err) => Err(err),
            };
            sessions.close_all().await;
            if let Err(err) = &result {
                tracing::warn!("provisioning {username} on {role} failed: {err}");
            }
            hosts.push(HostProvisioning {
                role,
                success: result.is_ok(),
                directories,
                error: result.err(),
            });
        }
        Ok(ProvisionReport {
            username: username.to_string(),
            success: hosts.iter().all(|host| host.success),
            hosts,
        })
    }
}

async fn create_directories(session: &dyn RemoteSession, dirs: &[String]) -> AppResult<()> {
    for dir in dirs {
        let command = format!("{} && {}", shell::mkdir_p(dir), shell::chmod("755", dir));
        exec_escalating(session, &command).await?;
    }
    Ok(())
}
