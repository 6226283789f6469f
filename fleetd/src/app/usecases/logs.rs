// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::app::errors::{AppError, AppResult};
use crate::app::ports::ExecRequest;
use crate::app::services::layout;
use crate::app::services::shell;
use crate::app::types::{HostRole, LogContent};

use super::tree_sync::read_text;
use super::{SessionSet, UseCases};

impl UseCases {
    /// Reads an archived run log. Without `file` the newest `*.log` of the
    /// project is returned.
    pub async fn fetch_log(
        &self,
        username: &str,
        project: &str,
        file: Option<&str>,
    ) -> AppResult<LogContent> {
        layout::validate_name("username", username)?;
        layout::validate_name("project", project)?;
        if let Some(file) = file {
            layout::validate_name("log file", file)?;
        }
        let output_dir = self.layout(HostRole::Archive, username)?.output_dir(project);

        let mut sessions = SessionSet::new(self.connector.as_ref());
        let result = async {
            let archive = sessions.open(HostRole::Archive).await?;
            let path = match file {
                Some(file) => layout::join(&output_dir, file),
                None => {
                    let out = archive
                        .exec(ExecRequest::plain(shell::newest_log(&output_dir, "")))
                        .await?;
                    out.stdout_lossy()
                        .lines()
                        .map(str::trim)
                        .find(|line| !line.is_empty())
                        .map(str::to_string)
                        .ok_or_else(|| {
                            AppError::not_found(format!(
                                "no logs for project '{project}' on {}",
                                archive.label()
                            ))
                        })?
                }
            };
            if archive.stat(&path).await?.is_none() {
                return Err(AppError::not_found(format!(
                    "log {path} not found on {}",
                    archive.label()
                )));
            }
            let content = read_text(archive.as_ref(), &path).await?;
            Ok(LogContent {
                project: project.to_string(),
                path,
                content,
            })
        }
        .await;
        sessions.close_all().await;
        result
    }
}
