// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Fleet hosts reached over SSH. Commands run on exec channels, file
//! operations go through one SFTP subsystem opened on first use.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use russh::Disconnect;
use russh::client::{Config, Handle};
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::OpenFlags;
use tokio::sync::{Mutex, OnceCell};

use crate::app::errors::{AppError, AppResult};
use crate::app::ports::{ExecOutput, ExecRequest, RemoteReader, RemoteSession, RemoteWriter};
use crate::app::services::shell;
use crate::app::types::{EngineSettings, EntryKind, HostProfile, HostRole, RemoteEntry};

mod auth;
mod error;
mod exec;
mod handler;

pub use error::AuthenticationFailure;

use error::{is_sftp_missing_path, map_channel_error, map_connect_error, map_sftp_error};
use handler::ClientHandler;

pub struct SshSession {
    profile: HostProfile,
    command_timeout: Duration,
    label: String,
    handle: Mutex<Option<Handle<ClientHandler>>>,
    sftp: OnceCell<SftpSession>,
}

impl SshSession {
    /// Connects and authenticates. Gives up after `connect_timeout`.
    #[tracing::instrument(
        name = "ssh",
        level = "debug",
        skip(profile, settings),
        fields(op = "connect", host = %profile.address, user = %profile.username, port = profile.port)
    )]
    pub async fn connect(profile: HostProfile, settings: &EngineSettings) -> AppResult<Self> {
        let label = profile.label();
        let connect = async {
            let addr = tokio::net::lookup_host((profile.address.as_str(), profile.port))
                .await
                .with_context(|| format!("resolving {}", profile.address))?
                .next()
                .ok_or_else(|| anyhow!("{} did not resolve", profile.address))?;
            let config = Config {
                inactivity_timeout: Some(settings.command_timeout + Duration::from_secs(60)),
                keepalive_interval: Some(Duration::from_secs(30)),
                channel_buffer_size: 64,
                window_size: 1024 * 1024,
                ..Default::default()
            };
            let handler = ClientHandler::new(
                profile.address.clone(),
                addr,
                settings.known_hosts_path.clone(),
            );
            let mut handle = russh::client::connect(Arc::new(config), addr, handler)
                .await
                .context("SSH connect failed")?;
            tracing::debug!("connected to {label}, authenticating");
            auth::authenticate(&mut handle, &profile.username, profile.credential.as_ref())
                .await?;
            anyhow::Ok(handle)
        };
        let handle = tokio::time::timeout(settings.connect_timeout, connect)
            .await
            .map_err(|_| {
                AppError::timeout(format!(
                    "connecting to {label} timed out after {}s",
                    settings.connect_timeout.as_secs()
                ))
            })?
            .map_err(|err| map_connect_error(&label, err))?;
        tracing::info!("connected to {label}");
        Ok(Self {
            command_timeout: settings.command_timeout,
            label,
            profile,
            handle: Mutex::new(Some(handle)),
            sftp: OnceCell::new(),
        })
    }

    async fn sftp(&self) -> AppResult<&SftpSession> {
        self.sftp
            .get_or_try_init(|| async {
                let guard = self.handle.lock().await;
                let handle = guard
                    .as_ref()
                    .ok_or_else(|| anyhow!("SSH handle closed before opening SFTP"))?;
                let channel = handle.channel_open_session().await?;
                channel.request_subsystem(true, "sftp").await?;
                let sftp = SftpSession::new(channel.into_stream()).await?;
                anyhow::Ok(sftp)
            })
            .await
            .map_err(|err| map_channel_error(&self.label, err))
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    fn role(&self) -> HostRole {
        self.profile.role
    }

    fn label(&self) -> String {
        self.label.clone()
    }

    #[tracing::instrument(
        name = "ssh",
        level = "debug",
        skip(self, request),
        fields(op = "exec", host = %self.label, elevate = request.elevate)
    )]
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
        tracing::debug!("executing `{command}`");

        let run = async {
            let guard = self.handle.lock().await;
            let handle = guard
                .as_ref()
                .ok_or_else(|| anyhow!("SSH handle already closed"))?;
            exec::exec_capture(handle, &command, &stdin).await
        };
        let out = tokio::time::timeout(self.command_timeout, run)
            .await
            .map_err(|_| {
                AppError::timeout(format!(
                    "command on {} timed out after {}s",
                    self.label,
                    self.command_timeout.as_secs()
                ))
            })?
            .map_err(|err| map_channel_error(&self.label, err))?;
        tracing::debug!("exit status {}", out.exit_code);
        Ok(out)
    }

    async fn stat(&self, path: &str) -> AppResult<Option<EntryKind>> {
        let sftp = self.sftp().await?;
        match sftp.symlink_metadata(path).await {
            Ok(meta) => Ok(Some(if meta.is_symlink() {
                EntryKind::Symlink
            } else if meta.is_dir() {
                EntryKind::Directory
            } else if meta.is_regular() {
                EntryKind::File
            } else {
                EntryKind::Other
            })),
            Err(err) if is_sftp_missing_path(&err) => Ok(None),
            Err(err) => Err(map_sftp_error("stat", path, &self.label, err)),
        }
    }

    async fn read_dir(&self, path: &str) -> AppResult<Vec<RemoteEntry>> {
        let sftp = self.sftp().await?;
        let entries = sftp
            .read_dir(path)
            .await
            .map_err(|err| map_sftp_error("read_dir", path, &self.label, err))?;
        Ok(entries
            .into_iter()
            .filter(|entry| entry.file_name() != "." && entry.file_name() != "..")
            .map(|entry| {
                let meta = entry.metadata();
                let kind = if meta.is_symlink() {
                    EntryKind::Symlink
                } else if meta.is_dir() {
                    EntryKind::Directory
                } else if meta.is_regular() {
                    EntryKind::File
                } else {
                    EntryKind::Other
                };
                RemoteEntry {
                    name: entry.file_name(),
                    kind,
                }
            })
            .collect())
    }

    async fn create_dir(&self, path: &str) -> AppResult<()> {
        let sftp = self.sftp().await?;
        sftp.create_dir(path)
            .await
            .map_err(|err| map_sftp_error("mkdir", path, &self.label, err))
    }

    async fn remove_file(&self, path: &str) -> AppResult<()> {
        let sftp = self.sftp().await?;
        sftp.remove_file(path)
            .await
            .map_err(|err| map_sftp_error("remove", path, &self.label, err))
    }

    async fn remove_dir(&self, path: &str) -> AppResult<()> {
        let sftp = self.sftp().await?;
        sftp.remove_dir(path)
            .await
            .map_err(|err| map_sftp_error("rmdir", path, &self.label, err))
    }

    async fn open_read(&self, path: &str) -> AppResult<RemoteReader> {
        let sftp = self.sftp().await?;
        let file = sftp
            .open_with_flags(path, OpenFlags::READ)
            .await
            .map_err(|err| map_sftp_error("open", path, &self.label, err))?;
        Ok(Box::new(file))
    }

    async fn open_write(&self, path: &str) -> AppResult<RemoteWriter> {
        let sftp = self.sftp().await?;
        let flags = OpenFlags::WRITE
            .union(OpenFlags::CREATE)
            .union(OpenFlags::TRUNCATE);
        let file = sftp
            .open_with_flags(path, flags)
            .await
            .map_err(|err| map_sftp_error("create", path, &self.label, err))?;
        Ok(Box::new(file))
    }

    async fn close(&self) {
        if let Some(sftp) = self.sftp.get() {
            if let Err(err) = sftp.close().await {
                tracing::debug!("closing sftp on {}: {err}", self.label);
            }
        }
        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(err) = handle
                .disconnect(Disconnect::ByApplication, "", "English")
                .await
            {
                tracing::debug!("disconnecting {}: {err}", self.label);
            }
        }
    }
}
