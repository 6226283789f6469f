// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::errors::{AppError, AppResult};
use crate::app::ports::{ExecRequest, RemoteSession};
use crate::app::services::layout::{self, SCRATCH_DIR};
use crate::app::services::pid_resolution::{
    IdentityProbe, LaunchHints, find_in_process_table, parse_echoed_pid, resolve_run_identity,
};
use crate::app::services::{random, shell};
use crate::app::types::{EntryKind, HostRole, ReconcileOutcome, RunRequest, TrackedProcess};

use super::pipeline::{check_sources, validate_request};
use super::tree_sync::{copy_tree, ensure_dir, read_text, stream_file, write_text};
use super::{SessionSet, UseCases};

/// Answers PID lookups with commands on the compute host.
struct SessionProbe<'a> {
    session: &'a dyn RemoteSession,
}

#[async_trait]
impl IdentityProbe for SessionProbe<'_> {
    async fn find_process(&self, needle: &str) -> AppResult<Option<u32>> {
        let out = self
            .session
            .exec(ExecRequest::plain(shell::process_table()))
            .await?;
        Ok(find_in_process_table(&out.stdout_lossy(), needle))
    }

    async fn read_sentinel(&self, path: &str) -> AppResult<Option<u32>> {
        if self.session.stat(path).await?.is_none() {
            return Ok(None);
        }
        Ok(parse_echoed_pid(&read_text(self.session, path).await?))
    }

    async fn file_exists(&self, path: &str) -> AppResult<bool> {
        Ok(self.session.stat(path).await?.is_some())
    }

    async fn newest_log(&self, project: &str) -> AppResult<Option<String>> {
        let prefix = format!("{project}_");
        let out = self
            .session
            .exec(ExecRequest::plain(shell::newest_log(SCRATCH_DIR, &prefix)))
            .await?;
        Ok(out
            .stdout_lossy()
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string))
    }
}

impl UseCases {
    /// Stages the project and starts the command on the compute host in the
    /// background. The returned handle carries the resolved PID and the
    /// path of the log the job writes.
    #[tracing::instrument(
        name = "launch",
        level = "info",
        skip(self, request),
        fields(user = %request.username, project = %request.project)
    )]
    pub async fn launch_detached(&self, request: RunRequest) -> AppResult<TrackedProcess> {
        validate_request(&request)?;
        let run_id = self.run_ids.next(&request.project);
        let paths = self.run_paths(&request, &run_id)?;
        let mut sessions = SessionSet::new(self.connector.as_ref());
        let result = async {
            let origin = sessions.open(HostRole::Origin).await?;
            let compute = sessions.open(HostRole::Compute).await?;
            check_sources(origin.as_ref(), compute.as_ref(), &request, &paths).await?;
            copy_tree(
                origin.as_ref(),
                &paths.project_src,
                compute.as_ref(),
                &paths.project_path,
            )
            .await?;

            let stem = format!(
                "{SCRATCH_DIR}/fleetd_{}_{}",
                request.project,
                random::token(8)
            );
            let script_path = format!("{stem}.sh");
            let sentinel_path = format!("{stem}.pid");
            let log_prefix = layout::detached_log_prefix(&request.project);
            let script = shell::DetachedScript {
                sentinel: &sentinel_path,
                log_prefix: &log_prefix,
                project_dir: &paths.project_path,
                activate: &paths.activate,
                package_index: self.fleet.settings.package_index.as_deref(),
                command: &request.command,
            }
            .render();
            write_text(compute.as_ref(), &script_path, &script).await?;

            let out = compute
                .exec(ExecRequest::plain(shell::launch_detached(&script_path)))
                .await?;
            if !out.success() {
                return Err(AppError::internal(format!(
                    "launching {script_path} on {} failed: {}",
                    compute.label(),
                    out.stderr_lossy().trim()
                )));
            }
            let stdout = out.stdout_lossy();
            let probe = SessionProbe {
                session: compute.as_ref(),
            };
            let hints = LaunchHints {
                launch_stdout: &stdout,
                script_path: &script_path,
                sentinel_path: &sentinel_path,
                project: &request.project,
            };
            let identity = resolve_run_identity(&probe, &hints, self.resolve_timing).await?;
            tracing::info!(
                "run {run_id} started as pid {} ({:?}), logging to {}",
                identity.pid,
                identity.source,
                identity.log_file
            );
            Ok(TrackedProcess {
                pid: identity.pid,
                pid_source: identity.source,
                run_id: run_id.clone(),
                username: request.username.clone(),
                project: request.project.clone(),
                log_file: identity.log_file,
                script_path,
            })
        }
        .await;
        sessions.close_all().await;
        result
    }

    /// Whether `pid` is a live, non-zombie process on the compute host.
    pub async fn is_alive(&self, pid: u32) -> AppResult<bool> {
        if pid == 0 {
            return Err(AppError::invalid_argument("pid must be positive"));
        }
        let mut sessions = SessionSet::new(self.connector.as_ref());
        let result = async {
            let compute = sessions.open(HostRole::Compute).await?;
            process_alive(compute.as_ref(), pid).await
        }
        .await;
        sessions.close_all().await;
        result
    }

    /// Archives the outputs of a finished detached job. Running jobs and
    /// jobs whose run directory already exists are left alone, so calling
    /// this repeatedly archives at most once.
    #[tracing::instrument(name = "reconcile", level = "info", skip(self))]
    pub async fn reconcile(
        &self,
        pid: u32,
        username: &str,
        project: &str,
        run_id: &str,
    ) -> AppResult<ReconcileOutcome> {
        if pid == 0 {
            return Err(AppError::invalid_argument("pid must be positive"));
        }
        layout::validate_name("username", username)?;
        layout::validate_name("project", project)?;
        layout::validate_name("run id", run_id)?;
        let compute_layout = self.layout(HostRole::Compute, username)?;
        let archive_layout = self.layout(HostRole::Archive, username)?;
        let project_path = compute_layout.project_dir(project);
        let run_dir = archive_layout.run_output_dir(project, run_id);

        let mut sessions = SessionSet::new(self.connector.as_ref());
        let result = async {
            let compute = sessions.open(HostRole::Compute).await?;
            if process_alive(compute.as_ref(), pid).await? {
                tracing::info!("pid {pid} is still running");
                return Ok(ReconcileOutcome::Running);
            }
            let archive = sessions.open(HostRole::Archive).await?;
            if archive.stat(&run_dir).await?.is_some() {
                tracing::info!("{run_dir} already archived");
                return Ok(ReconcileOutcome::AlreadyArchived { path: run_dir });
            }

            ensure_dir(
                archive.as_ref(),
                &archive_layout.output_dir(project),
                &mut Default::default(),
                &mut Vec::new(),
            )
            .await;
            copy_tree(compute.as_ref(), &project_path, archive.as_ref(), &run_dir).await?;

            let log_file = layout::detached_log(project, pid);
            let log_copied = match compute.stat(&log_file).await {
                Ok(Some(EntryKind::File)) => {
                    let dest = layout::join(&run_dir, layout::basename(&log_file));
                    match stream_file(compute.as_ref(), &log_file, archive.as_ref(), &dest).await {
                        Ok(_) => true,
                        Err(err) => {
                            tracing::warn!("copying {log_file} failed: {err}");
                            false
                        }
                    }
                }
                _ => false,
            };
            tracing::info!("archived pid {pid} to {run_dir} (log copied: {log_copied})");
            Ok(ReconcileOutcome::Archived {
                path: run_dir,
                log_copied,
            })
        }
        .await;
        sessions.close_all().await;
        result
    }
}

async fn process_alive(session: &dyn RemoteSession, pid: u32) -> AppResult<bool> {
    let out = session
        .exec(ExecRequest::plain(shell::process_state(pid)))
        .await?;
    let state = out.stdout_lossy();
    let state = state.trim();
    Ok(out.success() && !state.is_empty() && !state.starts_with('Z'))
}
