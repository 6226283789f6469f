// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::fmt;

use serde::Serialize;

pub mod codes {
    pub const AUTHENTICATION_FAILURE: &str = "authentication_failure";
    pub const CONNECTION_FAILURE: &str = "connection_failure";
    pub const INVALID_ARGUMENT: &str = "invalid_argument";
    pub const NOT_FOUND: &str = "not_found";
    pub const CONFLICT: &str = "conflict";
    pub const PERMISSION_DENIED: &str = "permission_denied";
    pub const TIMEOUT: &str = "timeout";
    pub const TRANSFER_ERROR: &str = "transfer_error";
    pub const TOO_LARGE: &str = "too_large";
    pub const INTERNAL_ERROR: &str = "internal_error";
    pub const REMOTE_ERROR: &str = "remote_error";
    pub const LOCAL_ERROR: &str = "local_error";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AppErrorKind {
    InvalidArgument,
    NotFound,
    Conflict,
    Authentication,
    Connection,
    PermissionDenied,
    Timeout,
    Transfer,
    TooLarge,
    Internal,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppError {
    kind: AppErrorKind,
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<String>,
}

impl AppError {
    pub fn new(kind: AppErrorKind, code: &'static str) -> Self {
        Self {
            kind,
            code,
            message: code.to_string(),
            context: None,
        }
    }

    pub fn with_message(
        kind: AppErrorKind,
        code: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::with_message(AppErrorKind::InvalidArgument, codes::INVALID_ARGUMENT, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::with_message(AppErrorKind::NotFound, codes::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::with_message(AppErrorKind::Conflict, codes::CONFLICT, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::with_message(
            AppErrorKind::PermissionDenied,
            codes::PERMISSION_DENIED,
            message,
        )
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::with_message(AppErrorKind::Timeout, codes::TIMEOUT, message)
    }

    pub fn transfer(message: impl Into<String>) -> Self {
        Self::with_message(AppErrorKind::Transfer, codes::TRANSFER_ERROR, message)
    }

    pub fn too_large(message: impl Into<String>) -> Self {
        Self::with_message(AppErrorKind::TooLarge, codes::TOO_LARGE, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_message(AppErrorKind::Internal, codes::INTERNAL_ERROR, message)
    }

    pub fn kind(&self) -> AppErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == AppErrorKind::NotFound
    }

    pub fn is_permission_denied(&self) -> bool {
        self.kind == AppErrorKind::PermissionDenied
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ctx) = &self.context {
            write!(f, "{} ({})", self.message, ctx)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;
