// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::app::errors::AppResult;
use crate::app::types::{EntryKind, HostRole, RemoteEntry};

pub type RemoteReader = Box<dyn AsyncRead + Send + Unpin>;
pub type RemoteWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub command: String,
    pub elevate: bool,
    pub stdin: Option<Vec<u8>>,
}

impl ExecRequest {
    pub fn plain(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            elevate: false,
            stdin: None,
        }
    }

    pub fn elevated(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            elevate: true,
            stdin: None,
        }
    }

    pub fn with_stdin(mut self, stdin: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }
}

impl std::fmt::Debug for ExecRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecRequest")
            .field("command", &self.command)
            .field("elevate", &self.elevate)
            .field("stdin_len", &self.stdin.as_ref().map(Vec::len))
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// An authenticated connection to one fleet member: a command channel plus a
/// lazily opened file channel. Sessions are opened per operation and closed
/// by the caller exactly once.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    fn role(&self) -> HostRole;

    fn label(&self) -> String;

    /// Runs a shell command, wrapping it in `sudo` when `elevate` is set.
    /// A nonzero exit is reported through `ExecOutput`, not as an error.
    async fn exec(&self, request: ExecRequest) -> AppResult<ExecOutput>;

    /// Stats without following symlinks. `Ok(None)` when the path is absent.
    async fn stat(&self, path: &str) -> AppResult<Option<EntryKind>>;

    async fn read_dir(&self, path: &str) -> AppResult<Vec<RemoteEntry>>;

    async fn create_dir(&self, path: &str) -> AppResult<()>;

    async fn remove_file(&self, path: &str) -> AppResult<()>;

    async fn remove_dir(&self, path: &str) -> AppResult<()>;

    async fn open_read(&self, path: &str) -> AppResult<RemoteReader>;

    /// Opens for writing, creating or truncating the file.
    async fn open_write(&self, path: &str) -> AppResult<RemoteWriter>;

    /// Releases the file channel and the connection. Safe to call twice.
    async fn close(&self);
}
