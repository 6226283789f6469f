// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! A fleet role served by the machine running fleetd.

use std::io::ErrorKind;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::{ExecOutput, ExecRequest, RemoteReader, RemoteSession, RemoteWriter};
use crate::app::services::shell;
use crate::app::types::{EngineSettings, EntryKind, HostProfile, HostRole, RemoteEntry};

pub struct LocalSession {
    profile: HostProfile,
    command_timeout: Duration,
    label: String,
}

impl LocalSession {
    pub fn new(profile: HostProfile, settings: &EngineSettings) -> Self {
        Self {
            label: profile.label(),
            command_timeout: settings.command_timeout,
            profile,
        }
    }
}

fn map_io_error(op: &str, path: &str, err: std::io::Error) -> AppError {
    let message = format!("{op} {path}: {err}");
    match err.kind() {
        ErrorKind::NotFound => AppError::not_found(message),
        ErrorKind::PermissionDenied => AppError::permission_denied(message),
        ErrorKind::AlreadyExists => AppError::conflict(message),
        _ => AppError::transfer(message),
    }
}

fn entry_kind(file_type: std::fs::FileType) -> EntryKind {
    if file_type.is_symlink() {
        EntryKind::Symlink
    } else if file_type.is_dir() {
        EntryKind::Directory
    } else if file_type.is_file() {
        EntryKind::File
    } else {
        EntryKind::Other
    }
}

#[async_trait]
impl RemoteSession for LocalSession {
    fn role(&self) -> HostRole {
        self.profile.role
    }

    fn label(&self) -> String {
        self.label.clone()
    }

    async fn exec(&self, request: ExecRequest) -> AppResult<ExecOutput> {
        let (command, mut stdin) = if request.elevate {
            let elevated = shell::elevate(
                &request.command,
                self.profile.sudo,
                self.profile.sudo_password(),
            );
            (elevated.command, elevated.stdin_prefix.unwrap_or_default())
        } else {
            (request.command, Vec::new())
        };
        if let Some(extra) = request.stdin {
            stdin.extend_from_slice(&extra);
        }
        tracing::debug!("executing `{command}` on {}", self.label);

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                AppError::with_message(
                    AppErrorKind::Internal,
                    codes::LOCAL_ERROR,
                    format!("spawning sh on {}: {err}", self.label),
                )
            })?;
        if let Some(mut pipe) = child.stdin.take() {
            tokio::spawn(async move {
                if let Err(err) = pipe.write_all(&stdin).await {
                    tracing::debug!("writing stdin failed: {err}");
                }
            });
        }
        let output = tokio::time::timeout(self.command_timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                AppError::timeout(format!(
                    "command on {} timed out after {}s",
                    self.label,
                    self.command_timeout.as_secs()
                ))
            })?
            .map_err(|err| {
                AppError::with_message(
                    AppErrorKind::Internal,
                    codes::LOCAL_ERROR,
                    format!("waiting for sh on {}: {err}", self.label),
                )
            })?;
        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    async fn stat(&self, path: &str) -> AppResult<Option<EntryKind>> {
        match tokio::fs::symlink_metadata(path).await {
            Ok(meta) => Ok(Some(entry_kind(meta.file_type()))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(map_io_error("stat", path, err)),
        }
    }

    async fn read_dir(&self, path: &str) -> AppResult<Vec<RemoteEntry>> {
        let mut dir = tokio::fs::read_dir(path)
            .await
            .map_err(|err| map_io_error("read_dir", path, err))?;
        let mut entries = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|err| map_io_error("read_dir", path, err))?
        {
            let kind = entry
                .file_type()
                .await
                .map(entry_kind)
                .unwrap_or(EntryKind::Other);
            entries.push(RemoteEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                kind,
            });
        }
        Ok(entries)
    }

    async fn create_dir(&self, path: &str) -> AppResult<()> {
        tokio::fs::create_dir(path)
            .await
            .map_err(|err| map_io_error("mkdir", path, err))
    }

    async fn remove_file(&self, path: &str) -> AppResult<()> {
        tokio::fs::remove_file(path)
            .await
            .map_err(|err| map_io_error("remove", path, err))
    }

    async fn remove_dir(&self, path: &str) -> AppResult<()> {
        tokio::fs::remove_dir(path)
            .await
            .map_err(|err| map_io_error("rmdir", path, err))
    }

    async fn open_read(&self, path: &str) -> AppResult<RemoteReader> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|err| map_io_error("open", path, err))?;
        Ok(Box::new(file))
    }

    async fn open_write(&self, path: &str) -> AppResult<RemoteWriter> {
        let file = tokio::fs::File::create(path)
            .await
            .map_err(|err| map_io_error("create", path, err))?;
        Ok(Box::new(file))
    }

    async fn close(&self) {}
}
