// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::time::Duration;

use async_trait::async_trait;

use crate::app::errors::{AppError, AppResult};
use crate::app::services::layout;
use crate::app::types::PidSource;

/// Host-side lookups needed to pin down the PID of a detached job.
#[async_trait]
pub trait IdentityProbe: Send + Sync {
    /// PID of a process whose command line contains `needle`.
    async fn find_process(&self, needle: &str) -> AppResult<Option<u32>>;

    async fn read_sentinel(&self, path: &str) -> AppResult<Option<u32>>;

    async fn file_exists(&self, path: &str) -> AppResult<bool>;

    /// Newest `/tmp/<project>_*.log`.
    async fn newest_log(&self, project: &str) -> AppResult<Option<String>>;
}

#[derive(Debug, Clone, Copy)]
pub struct ResolveTiming {
    pub scan_attempts: u32,
    pub scan_interval: Duration,
    pub settle: Duration,
}

impl Default for ResolveTiming {
    fn default() -> Self {
        Self {
            scan_attempts: 5,
            scan_interval: Duration::from_millis(500),
            settle: Duration::from_secs(1),
        }
    }
}

pub struct LaunchHints<'a> {
    /// Raw stdout of the launch command.
    pub launch_stdout: &'a str,
    pub script_path: &'a str,
    pub sentinel_path: &'a str,
    pub project: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub pid: u32,
    pub source: PidSource,
    pub log_file: String,
}

/// Last numeric line of the launch output, i.e. what `echo $!` printed.
pub fn parse_echoed_pid(stdout: &str) -> Option<u32> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(|line| line.parse().ok())
        .filter(|pid| *pid > 0)
}

/// Parses `ps -eo pid=,args=` output.
pub fn find_in_process_table(table: &str, needle: &str) -> Option<u32> {
    table.lines().find_map(|line| {
        let line = line.trim_start();
        let (pid, args) = line.split_once(char::is_whitespace)?;
        if args.contains(needle) {
            pid.parse().ok()
        } else {
            None
        }
    })
}

/// Resolves the PID of a freshly launched detached job, trying in order:
/// the PID echoed by the launcher, a process-table scan for the script,
/// the sentinel the script writes about itself (preferred once it exists),
/// and finally the newest PID-named log of the project.
pub async fn resolve_run_identity(
    probe: &dyn IdentityProbe,
    hints: &LaunchHints<'_>,
    timing: ResolveTiming,
) -> AppResult<ResolvedIdentity> {
    let mut candidate = parse_echoed_pid(hints.launch_stdout).map(|pid| (pid, PidSource::Echoed));

    if candidate.is_none() {
        for attempt in 0..timing.scan_attempts {
            if attempt > 0 {
                tokio::time::sleep(timing.scan_interval).await;
            }
            match probe.find_process(hints.script_path).await {
                Ok(Some(pid)) => {
                    candidate = Some((pid, PidSource::ProcessTable));
                    break;
                }
                Ok(None) => {}
                Err(err) => tracing::debug!("process scan for {} failed: {err}", hints.script_path),
            }
        }
    }

    tokio::time::sleep(timing.settle).await;
    match probe.read_sentinel(hints.sentinel_path).await {
        Ok(Some(pid)) => {
            if let Some((previous, _)) = candidate.filter(|(previous, _)| *previous != pid) {
                tracing::debug!("sentinel pid {pid} replaces launcher pid {previous}");
            }
            candidate = Some((pid, PidSource::Sentinel));
        }
        Ok(None) => {}
        Err(err) => tracing::debug!("reading sentinel {} failed: {err}", hints.sentinel_path),
    }

    if let Some((pid, source)) = candidate {
        let log_file = layout::detached_log(hints.project, pid);
        if probe.file_exists(&log_file).await.unwrap_or(false) {
            return Ok(ResolvedIdentity {
                pid,
                source,
                log_file,
            });
        }
        tracing::debug!("expected log {log_file} is missing, scanning for the newest project log");
    }

    if let Some(path) = probe.newest_log(hints.project).await? {
        if let Some(pid) = layout::pid_from_detached_log(hints.project, &path) {
            return Ok(ResolvedIdentity {
                pid,
                source: PidSource::LogScan,
                log_file: path,
            });
        }
    }

    match candidate {
        Some((pid, source)) => Ok(ResolvedIdentity {
            pid,
            source,
            log_file: layout::detached_log(hints.project, pid),
        }),
        None => Err(AppError::not_found(format!(
            "could not determine the pid of {}",
            hints.script_path
        ))),
    }
}
