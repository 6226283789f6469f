// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashSet;

use crate::app::errors::{AppError, AppResult};
use crate::app::ports::{ExecRequest, RemoteSession};
use crate::app::services::layout::{self, SCRATCH_DIR};
use crate::app::services::{random, shell};
use crate::app::types::{EntryKind, HostRole, RunReport, RunRequest, RunStage, StageFailure};

use super::tree_sync::{copy_tree, ensure_dir, read_text, write_text};
use super::{SessionSet, UseCases};

/// Where one run reads from and writes to across the fleet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RunPaths {
    pub project_src: String,
    pub project_path: String,
    pub env_path: String,
    pub activate: String,
    pub output_path: String,
    pub run_output_path: String,
    pub log_file: String,
}

pub(crate) fn validate_request(request: &RunRequest) -> AppResult<()> {
    layout::validate_name("username", &request.username)?;
    layout::validate_name("project", &request.project)?;
    layout::validate_name("environment", &request.env)?;
    if request.command.trim().is_empty() {
        return Err(AppError::invalid_argument("command must not be empty"));
    }
    Ok(())
}

impl UseCases {
    pub(crate) fn run_paths(&self, request: &RunRequest, run_id: &str) -> AppResult<RunPaths> {
        let origin = self.layout(HostRole::Origin, &request.username)?;
        let compute = self.layout(HostRole::Compute, &request.username)?;
        let archive = self.layout(HostRole::Archive, &request.username)?;
        Ok(RunPaths {
            project_src: origin.project_dir(&request.project),
            project_path: compute.project_dir(&request.project),
            env_path: compute.env_dir(&request.env),
            activate: compute.activate_script(&request.env),
            output_path: archive.output_dir(&request.project),
            run_output_path: archive.run_output_dir(&request.project, run_id),
            log_file: archive.run_log(&request.project, run_id),
        })
    }

    /// Stages the project on the compute host, runs the command inside the
    /// environment and archives the log and the project tree.
    ///
    /// Validation problems are returned as errors. Once staging has begun the
    /// outcome, including any stage failure, is described by the report.
    pub async fn run_pipeline(&self, request: RunRequest) -> AppResult<RunReport> {
        validate_request(&request)?;
        let run_id = self.run_ids.next(&request.project);
        self.run_pipeline_as(request, run_id).await
    }

    #[tracing::instrument(
        name = "pipeline",
        level = "info",
        skip(self, request),
        fields(user = %request.username, project = %request.project, env = %request.env)
    )]
    pub(crate) async fn run_pipeline_as(
        &self,
        request: RunRequest,
        run_id: String,
    ) -> AppResult<RunReport> {
        validate_request(&request)?;
        let paths = self.run_paths(&request, &run_id)?;
        let mut sessions = SessionSet::new(self.connector.as_ref());
        let result = self
            .pipeline_stages(&mut sessions, request, run_id, paths)
            .await;
        sessions.close_all().await;
        result
    }

    async fn pipeline_stages(
        &self,
        sessions: &mut SessionSet<'_>,
        request: RunRequest,
        run_id: String,
        paths: RunPaths,
    ) -> AppResult<RunReport> {
        tracing::info!("run {run_id}: validating");
        let origin = sessions.open(HostRole::Origin).await?;
        let compute = sessions.open(HostRole::Compute).await?;
        check_sources(origin.as_ref(), compute.as_ref(), &request, &paths).await?;

        let mut report = RunReport {
            run_id: run_id.clone(),
            request: request.clone(),
            stage: RunStage::Staging,
            success: false,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            failure: None,
            project_path: paths.project_path.clone(),
            env_path: paths.env_path.clone(),
            output_path: paths.output_path.clone(),
            run_output_path: paths.run_output_path.clone(),
            log_file: paths.log_file.clone(),
            archived: false,
            log_archived: false,
            warnings: Vec::new(),
        };

        tracing::info!("run {run_id}: staging {}", paths.project_path);
        if let Err(err) = copy_tree(
            origin.as_ref(),
            &paths.project_src,
            compute.as_ref(),
            &paths.project_path,
        )
        .await
        {
            record_failure(&mut report, RunStage::Staging, err);
            report.stage = RunStage::Failed;
            return Ok(report);
        }

        report.stage = RunStage::Executing;
        tracing::info!("run {run_id}: executing");
        let owner = &self.fleet.profile(HostRole::Compute)?.username;
        match compute
            .exec(ExecRequest::elevated(shell::prepare_output_dir(
                &paths.project_path,
                owner,
            )))
            .await
        {
            Ok(out) if out.success() => {}
            Ok(out) => report.warnings.push(format!(
                "preparing output directory failed: {}",
                out.stderr_lossy().trim()
            )),
            Err(err) => report
                .warnings
                .push(format!("preparing output directory failed: {err}")),
        }

        let temp_log = format!("{SCRATCH_DIR}/{run_id}_{}.log", random::token(8));
        let script = shell::JobScript {
            project_dir: &paths.project_path,
            activate: &paths.activate,
            package_index: self.fleet.settings.package_index.as_deref(),
            command: &request.command,
            log_file: &temp_log,
        }
        .render();
        let fallback_log = match compute.exec(ExecRequest::plain(shell::bash(&script))).await {
            Ok(out) => {
                report.exit_code = Some(out.exit_code);
                report.success = out.success();
                report.stdout = out.stdout_lossy();
                report.stderr = out.stderr_lossy();
                tracing::info!("run {run_id}: command exited with {}", out.exit_code);
                format!("{}{}", report.stdout, report.stderr)
            }
            Err(err) => {
                let text = format!("+ {}\n{err}\n", request.command);
                record_failure(&mut report, RunStage::Executing, err);
                text
            }
        };

        report.stage = RunStage::Archiving;
        tracing::info!("run {run_id}: archiving to {}", paths.run_output_path);
        let log_text = match read_text(compute.as_ref(), &temp_log).await {
            Ok(text) if !text.is_empty() => text,
            Ok(_) => fallback_log,
            Err(err) => {
                tracing::debug!("temporary log {temp_log} unavailable: {err}");
                fallback_log
            }
        };
        match compute
            .exec(ExecRequest::plain(shell::remove_file(&temp_log)))
            .await
        {
            Ok(out) if out.success() => {}
            _ => tracing::debug!("could not remove {temp_log}"),
        }

        let archive = match sessions.open(HostRole::Archive).await {
            Ok(session) => session,
            Err(err) => {
                record_failure(&mut report, RunStage::Archiving, err);
                report.stage = RunStage::Failed;
                return Ok(report);
            }
        };
        self.archive_run(
            compute.as_ref(),
            archive.as_ref(),
            &paths,
            &log_text,
            &mut report,
        )
        .await;

        report.stage = if report.failure.is_some() {
            RunStage::Failed
        } else {
            RunStage::Done
        };
        tracing::info!(
            "run {run_id}: {} (success={}, archived={})",
            report.stage,
            report.success,
            report.archived
        );
        Ok(report)
    }

    async fn archive_run(
        &self,
        compute: &dyn RemoteSession,
        archive: &dyn RemoteSession,
        paths: &RunPaths,
        log_text: &str,
        report: &mut RunReport,
    ) {
        ensure_dir(
            archive,
            &paths.output_path,
            &mut HashSet::new(),
            &mut report.warnings,
        )
        .await;

        match write_text(archive, &paths.log_file, log_text).await {
            Ok(()) => report.log_archived = true,
            Err(err) => report
                .warnings
                .push(format!("writing {} failed: {err}", paths.log_file)),
        }

        match copy_tree(compute, &paths.project_path, archive, &paths.run_output_path).await {
            Ok(sync) => {
                report.archived = true;
                report.warnings.extend(sync.warnings);
            }
            Err(err) => record_failure(report, RunStage::Archiving, err),
        }

        if matches!(
            archive.stat(&paths.run_output_path).await,
            Ok(Some(EntryKind::Directory))
        ) {
            match write_text(archive, &paths.log_file, log_text).await {
                Ok(()) => report.log_archived = true,
                Err(err) => report
                    .warnings
                    .push(format!("rewriting {} failed: {err}", paths.log_file)),
            }
        }
    }
}

pub(crate) async fn check_sources(
    origin: &dyn RemoteSession,
    compute: &dyn RemoteSession,
    request: &RunRequest,
    paths: &RunPaths,
) -> AppResult<()> {
    match origin.stat(&paths.project_src).await? {
        Some(EntryKind::Directory) => {}
        _ => {
            return Err(AppError::not_found(format!(
                "project '{}' not found on {}",
                request.project,
                origin.label()
            ))
            .with_context(paths.project_src.clone()));
        }
    }
    match compute.stat(&paths.activate).await? {
        Some(EntryKind::File) | Some(EntryKind::Symlink) => Ok(()),
        _ => Err(AppError::not_found(format!(
            "environment '{}' not found on {}",
            request.env,
            compute.label()
        ))
        .with_context(paths.activate.clone())),
    }
}

fn record_failure(report: &mut RunReport, stage: RunStage, error: AppError) {
    tracing::warn!("run {} failed while {stage}: {error}", report.run_id);
    if report.failure.is_none() {
        report.failure = Some(StageFailure { stage, error });
    } else {
        report.warnings.push(format!("{stage}: {error}"));
    }
}
