// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::app::errors::{AppError, AppResult};
use crate::app::ports::ExecRequest;
use crate::app::services::layout;
use crate::app::services::shell;
use crate::app::types::{CommandReport, EntryKind, EnvInfo, HostRole};

use super::{SessionSet, UseCases, exec_escalating};

impl UseCases {
    /// Clones the shared base virtualenv into `envs/<name>` on the compute host.
    #[tracing::instrument(name = "env_create", level = "info", skip(self))]
    pub async fn create_env(&self, username: &str, name: &str) -> AppResult<EnvInfo> {
        layout::validate_name("username", username)?;
        layout::validate_name("environment", name)?;
        let user_layout = self.layout(HostRole::Compute, username)?;
        let env_path = user_layout.env_dir(name);
        let base = self.fleet.settings.base_venv.clone();

        let mut sessions = SessionSet::new(self.connector.as_ref());
        let result = async {
            let compute = sessions.open(HostRole::Compute).await?;
            exec_escalating(compute.as_ref(), &shell::mkdir_p(&user_layout.envs_dir())).await?;
            if compute.stat(&env_path).await?.is_some() {
                return Err(AppError::conflict(format!(
                    "environment '{name}' already exists on {}",
                    compute.label()
                ))
                .with_context(env_path.clone()));
            }
            if compute.stat(&base).await?.is_none() {
                return Err(AppError::not_found(format!(
                    "base environment {base} is missing on {}",
                    compute.label()
                )));
            }
            let command = format!(
                "{} && {}",
                shell::mkdir_p(&env_path),
                shell::copy_contents(&base, &env_path)
            );
            exec_escalating(compute.as_ref(), &command).await?;
            let is_venv = compute
                .stat(&layout::activate_script(&env_path))
                .await?
                .is_some();
            tracing::info!("created environment {env_path} (venv={is_venv})");
            Ok(EnvInfo {
                name: name.to_string(),
                path: env_path.clone(),
                is_venv,
            })
        }
        .await;
        sessions.close_all().await;
        result
    }

    /// Environments of `username`, sorted by name. A user without an
    /// `envs` directory has none.
    pub async fn list_envs(&self, username: &str) -> AppResult<Vec<EnvInfo>> {
        layout::validate_name("username", username)?;
        let user_layout = self.layout(HostRole::Compute, username)?;
        let mut sessions = SessionSet::new(self.connector.as_ref());
        let result = async {
            let compute = sessions.open(HostRole::Compute).await?;
            let entries = match compute.read_dir(&user_layout.envs_dir()).await {
                Ok(entries) => entries,
                Err(err) if err.is_not_found() => return Ok(Vec::new()),
                Err(err) => return Err(err),
            };
            let mut envs = Vec::new();
            for entry in entries
                .into_iter()
                .filter(|entry| entry.kind == EntryKind::Directory)
            {
                let path = user_layout.env_dir(&entry.name);
                let is_venv = compute
                    .stat(&layout::activate_script(&path))
                    .await?
                    .is_some();
                envs.push(EnvInfo {
                    name: entry.name,
                    path,
                    is_venv,
                });
            }
            envs.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(envs)
        }
        .await;
        sessions.close_all().await;
        result
    }

    #[tracing::instrument(name = "env_delete", level = "info", skip(self))]
    pub async fn delete_env(&self, username: &str, name: &str) -> AppResult<()> {
        layout::validate_name("username", username)?;
        layout::validate_name("environment", name)?;
        let env_path = self.layout(HostRole::Compute, username)?.env_dir(name);
        let mut sessions = SessionSet::new(self.connector.as_ref());
        let result = async {
            let compute = sessions.open(HostRole::Compute).await?;
            if compute.stat(&env_path).await?.is_none() {
                return Err(AppError::not_found(format!(
                    "environment '{name}' not found on {}",
                    compute.label()
                )));
            }
            exec_escalating(compute.as_ref(), &shell::remove_tree(&env_path)).await?;
            tracing::info!("deleted environment {env_path}");
            Ok(())
        }
        .await;
        sessions.close_all().await;
        result
    }

    /// Runs `command` on the compute host, inside `env` when one is given.
    /// A nonzero exit is reported, not raised.
    pub async fn exec_in_env(
        &self,
        username: &str,
        env: Option<&str>,
        command: &str,
    ) -> AppResult<CommandReport> {
        layout::validate_name("username", username)?;
        if command.trim().is_empty() {
            return Err(AppError::invalid_argument("command must not be empty"));
        }
        let activate = match env {
            Some(env) => {
                layout::validate_name("environment", env)?;
                Some(self.layout(HostRole::Compute, username)?.activate_script(env))
            }
            None => None,
        };
        let mut sessions = SessionSet::new(self.connector.as_ref());
        let result = async {
            let compute = sessions.open(HostRole::Compute).await?;
            if let Some(activate) = activate.as_deref() {
                if compute.stat(activate).await?.is_none() {
                    return Err(AppError::not_found(format!(
                        "environment '{}' not found on {}",
                        env.unwrap_or_default(),
                        compute.label()
                    )));
                }
            }
            let out = compute
                .exec(ExecRequest::plain(shell::activate_and_run(
                    activate.as_deref(),
                    command,
                )))
                .await?;
            Ok(CommandReport {
                success: out.success(),
                exit_code: out.exit_code,
                command: command.to_string(),
                stdout: out.stdout_lossy(),
                stderr: out.stderr_lossy(),
            })
        }
        .await;
        sessions.close_all().await;
        result
    }
}
