// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use russh_sftp::client::error::Error as SftpError;
use russh_sftp::protocol::StatusCode;
use thiserror::Error as ThisError;

use crate::app::errors::{AppError, AppErrorKind, codes};

#[derive(Debug, ThisError)]
#[error("authentication_failure")]
pub struct AuthenticationFailure;

fn ssh_error_code(err: &anyhow::Error) -> &'static str {
    if err.chain().any(|cause| cause.is::<AuthenticationFailure>()) {
        codes::AUTHENTICATION_FAILURE
    } else {
        codes::CONNECTION_FAILURE
    }
}

pub(super) fn map_connect_error(label: &str, err: anyhow::Error) -> AppError {
    let code = ssh_error_code(&err);
    let kind = if code == codes::AUTHENTICATION_FAILURE {
        AppErrorKind::Authentication
    } else {
        AppErrorKind::Connection
    };
    AppError::with_message(kind, code, format!("ssh connect to {label} failed: {err:#}"))
}

pub(super) fn map_channel_error(label: &str, err: anyhow::Error) -> AppError {
    AppError::with_message(
        AppErrorKind::Connection,
        codes::CONNECTION_FAILURE,
        format!("ssh channel on {label} failed: {err:#}"),
    )
}

pub(super) fn is_sftp_missing_path(err: &SftpError) -> bool {
    matches!(err, SftpError::Status(status) if status.status_code == StatusCode::NoSuchFile)
}

pub(super) fn is_permission_denied(err: &SftpError) -> bool {
    match err {
        SftpError::Status(status) => status.status_code == StatusCode::PermissionDenied,
        SftpError::IO(msg) => msg.to_lowercase().contains("permission denied"),
        _ => false,
    }
}

pub(super) fn map_sftp_error(op: &str, path: &str, label: &str, err: SftpError) -> AppError {
    let message = format!("sftp {op} {path} on {label}: {err}");
    if is_sftp_missing_path(&err) {
        AppError::not_found(message)
    } else if is_permission_denied(&err) {
        AppError::permission_denied(message)
    } else if matches!(err, SftpError::Timeout) {
        AppError::timeout(message)
    } else {
        AppError::transfer(message)
    }
}
