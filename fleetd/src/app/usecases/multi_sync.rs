// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashSet;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::app::errors::{AppError, AppResult};
use crate::app::ports::{ExecRequest, RemoteSession};
use crate::app::services::{layout, random, shell};
use crate::app::types::{
    EntryKind, HostPath, HostRole, ItemResult, SyncManyReport, TransferMethod,
};

use super::tree_sync::{copy_tree, ensure_dir, remove_tree, stream_file};
use super::{SessionSet, UseCases, exec_escalating};

/// Largest file the shell (base64) route will carry.
pub const BASE64_LIMIT: u64 = 10 * 1024 * 1024;

impl UseCases {
    /// Copies each of `sources` into `destination`, which is emptied first.
    /// Items are independent: one failing does not stop the others. A later
    /// item with the same name as an earlier one fails with `Conflict`.
    #[tracing::instrument(
        name = "sync_many",
        level = "debug",
        skip(self, sources),
        fields(src = %source_role, dst = %destination, items = sources.len())
    )]
    pub async fn sync_many(
        &self,
        source_role: HostRole,
        sources: &[String],
        destination: &HostPath,
    ) -> AppResult<SyncManyReport> {
        let mut sessions = SessionSet::new(self.connector.as_ref());
        let result = async {
            let src = sessions.open(source_role).await?;
            let dst = sessions.open(destination.role).await?;
            transfer_items(src.as_ref(), sources, dst.as_ref(), &destination.path).await
        }
        .await;
        sessions.close_all().await;
        result
    }
}

pub(crate) async fn transfer_items(
    src: &dyn RemoteSession,
    sources: &[String],
    dst: &dyn RemoteSession,
    dst_root: &str,
) -> AppResult<SyncManyReport> {
    let root = layout::normalize(dst_root);
    if src.role() == dst.role() {
        if let Some(source) = sources.iter().find(|source| layout::overlaps(source, &root)) {
            return Err(AppError::invalid_argument(format!(
                "{source} overlaps the destination root {root} on {}",
                dst.label()
            )));
        }
    }
    prepare_root(dst, &root).await?;

    let mut claimed = HashSet::new();
    let mut items = Vec::with_capacity(sources.len());
    for source in sources {
        let source = layout::normalize(source);
        let destination = layout::join(&root, layout::basename(&source));
        let outcome = if claimed.insert(destination.clone()) {
            transfer_item(src, &source, dst, &destination).await
        } else {
            Err((
                None,
                AppError::conflict(format!(
                    "{destination} is already taken by an earlier item"
                )),
            ))
        };
        let item = match outcome {
            Ok((kind, method, bytes)) => {
                tracing::info!("{source} -> {destination} via {method:?} ({bytes} bytes)");
                ItemResult {
                    source,
                    destination,
                    kind: Some(kind),
                    success: true,
                    method: Some(method),
                    bytes,
                    error: None,
                }
            }
            Err((kind, err)) => {
                tracing::warn!("{source} -> {destination} failed: {err}");
                ItemResult {
                    source,
                    destination,
                    kind,
                    success: false,
                    method: None,
                    bytes: 0,
                    error: Some(err),
                }
            }
        };
        items.push(item);
    }

    let transferred = items.iter().filter(|item| item.success).count();
    Ok(SyncManyReport {
        success: transferred == items.len(),
        message: format!(
            "{transferred}/{} items transferred to {}:{root}",
            items.len(),
            dst.role()
        ),
        destination_root: HostPath::new(dst.role(), root),
        items,
    })
}

type ItemOutcome = Result<(EntryKind, TransferMethod, u64), (Option<EntryKind>, AppError)>;

async fn transfer_item(
    src: &dyn RemoteSession,
    source: &str,
    dst: &dyn RemoteSession,
    destination: &str,
) -> ItemOutcome {
    let kind = match classify(src, source).await {
        Ok(Some(kind)) => kind,
        Ok(None) => {
            return Err((
                None,
                AppError::not_found(format!("{source} does not exist on {}", src.label())),
            ));
        }
        Err(err) => return Err((None, err)),
    };
    match kind {
        EntryKind::Directory => copy_tree(src, source, dst, destination)
            .await
            .map(|report| (kind, TransferMethod::Tree, report.bytes_copied))
            .map_err(|err| (Some(kind), err)),
        // Symlinked items are copied as the file they point to.
        EntryKind::File | EntryKind::Symlink => copy_file_with_fallback(src, source, dst, destination)
            .await
            .map(|(method, bytes)| (kind, method, bytes))
            .map_err(|err| (Some(kind), err)),
        EntryKind::Other => Err((
            Some(kind),
            AppError::invalid_argument(format!("{source} is not a regular file or directory")),
        )),
    }
}

/// Creates the root if needed, opens it up to everyone and empties it.
async fn prepare_root(dst: &dyn RemoteSession, root: &str) -> AppResult<()> {
    if root == "/" || root.is_empty() {
        return Err(AppError::invalid_argument(
            "refusing to use / as a destination root",
        ));
    }
    match dst.stat(root).await {
        Ok(Some(EntryKind::Directory)) => {}
        Ok(Some(kind)) => {
            return Err(AppError::invalid_argument(format!(
                "{root} on {} exists but is a {kind:?}",
                dst.label()
            )));
        }
        Ok(None) | Err(_) => {
            let mut warnings = Vec::new();
            ensure_dir(dst, root, &mut HashSet::new(), &mut warnings).await;
            if !matches!(dst.stat(root).await, Ok(Some(EntryKind::Directory))) {
                exec_escalating(dst, &shell::mkdir_p(root)).await?;
            }
        }
    }

    match dst.exec(ExecRequest::elevated(shell::chmod("777", root))).await {
        Ok(out) if out.success() => {}
        Ok(out) => tracing::warn!(
            "chmod 777 {root} on {} failed: {}",
            dst.label(),
            out.stderr_lossy().trim()
        ),
        Err(err) => tracing::warn!("chmod 777 {root} on {} failed: {err}", dst.label()),
    }

    let mut cleared = true;
    match dst.read_dir(root).await {
        Ok(entries) => {
            for entry in entries {
                if entry.name == "." || entry.name == ".." {
                    continue;
                }
                let child = layout::join(root, &entry.name);
                if let Err(err) = remove_tree(dst, &child).await {
                    tracing::debug!("could not remove {child}: {err}");
                    cleared = false;
                    break;
                }
            }
        }
        Err(err) => {
            tracing::debug!("could not list {root}: {err}");
            cleared = false;
        }
    }
    if !cleared {
        let out = dst.exec(ExecRequest::elevated(shell::clear_dir(root))).await?;
        if !out.success() {
            return Err(AppError::permission_denied(format!(
                "could not empty {root} on {}: {}",
                dst.label(),
                out.stderr_lossy().trim()
            )));
        }
    }
    Ok(())
}

/// Works out what `path` is, escalating when a plain stat is refused.
/// `Ok(None)` means the path does not exist.
async fn classify(src: &dyn RemoteSession, path: &str) -> AppResult<Option<EntryKind>> {
    match src.stat(path).await {
        Ok(kind) => return Ok(kind),
        Err(err) => tracing::debug!("stat {path} on {} failed: {err}", src.label()),
    }

    match src.exec(ExecRequest::elevated(shell::file_type(path))).await {
        Ok(out) if out.success() => {
            if let Some(kind) = parse_stat_type(&out.stdout_lossy()) {
                return Ok(Some(kind));
            }
        }
        Ok(out) => tracing::debug!(
            "elevated stat {path} on {} failed: {}",
            src.label(),
            out.stderr_lossy().trim()
        ),
        Err(err) => tracing::debug!("elevated stat {path} on {} failed: {err}", src.label()),
    }

    let out = src
        .exec(ExecRequest::elevated(shell::existence_probe(path)))
        .await?;
    Ok(match out.stdout_lossy().trim() {
        "directory" => Some(EntryKind::Directory),
        "file" => Some(EntryKind::File),
        _ => None,
    })
}

fn parse_stat_type(output: &str) -> Option<EntryKind> {
    match output.trim() {
        "" => None,
        "directory" => Some(EntryKind::Directory),
        "regular file" | "regular empty file" => Some(EntryKind::File),
        "symbolic link" => Some(EntryKind::Symlink),
        _ => Some(EntryKind::Other),
    }
}

/// Direct stream, then stream again after an elevated `chmod a+r`, then the
/// base64 shell route.
async fn copy_file_with_fallback(
    src: &dyn RemoteSession,
    source: &str,
    dst: &dyn RemoteSession,
    destination: &str,
) -> AppResult<(TransferMethod, u64)> {
    match stream_file(src, source, dst, destination).await {
        Ok(bytes) => return Ok((TransferMethod::Direct, bytes)),
        Err(err) => tracing::warn!("direct copy of {source} failed: {err}; relaxing permissions"),
    }

    match src.exec(ExecRequest::elevated(shell::chmod("a+r", source))).await {
        Ok(out) if out.success() => match stream_file(src, source, dst, destination).await {
            Ok(bytes) => return Ok((TransferMethod::ElevatedDirect, bytes)),
            Err(err) => tracing::warn!("copy of {source} after chmod failed: {err}"),
        },
        Ok(out) => tracing::warn!(
            "chmod a+r {source} on {} failed: {}",
            src.label(),
            out.stderr_lossy().trim()
        ),
        Err(err) => tracing::warn!("chmod a+r {source} on {} failed: {err}", src.label()),
    }

    tracing::info!("falling back to base64 transfer for {source}");
    let bytes = copy_via_base64(src, source, dst, destination).await?;
    Ok((TransferMethod::Base64, bytes))
}

async fn copy_via_base64(
    src: &dyn RemoteSession,
    source: &str,
    dst: &dyn RemoteSession,
    destination: &str,
) -> AppResult<u64> {
    let size_out = exec_escalating(src, &shell::file_size(source)).await?;
    let size: u64 = size_out.stdout_lossy().trim().parse().map_err(|_| {
        AppError::transfer(format!(
            "unexpected size output for {source}: {}",
            size_out.stdout_lossy().trim()
        ))
    })?;
    if size > BASE64_LIMIT {
        return Err(AppError::too_large(format!(
            "{source} is {size} bytes, over the {BASE64_LIMIT} byte limit of the shell transfer"
        )));
    }

    let encoded = exec_escalating(src, &shell::base64_encode(source)).await?;
    let compact: Vec<u8> = encoded
        .stdout
        .into_iter()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    let content = STANDARD
        .decode(&compact)
        .map_err(|err| AppError::transfer(format!("decoding base64 of {source}: {err}")))?;
    if content.len() as u64 != size {
        return Err(AppError::transfer(format!(
            "{source}: expected {size} bytes, received {}",
            content.len()
        )));
    }

    let payload = format!("{}\n", STANDARD.encode(&content)).into_bytes();
    let temp = format!("{destination}.{}.tmp", random::token(8));
    let command = shell::base64_decode_into(&temp, destination);
    let out = dst
        .exec(ExecRequest::plain(command.clone()).with_stdin(payload.clone()))
        .await?;
    if out.success() {
        return Ok(size);
    }
    tracing::debug!(
        "writing {destination} on {} failed ({}), retrying elevated",
        dst.label(),
        out.stderr_lossy().trim()
    );
    let out = dst
        .exec(ExecRequest::elevated(command).with_stdin(payload))
        .await?;
    if out.success() {
        return Ok(size);
    }
    match dst
        .exec(ExecRequest::elevated(shell::remove_file(&temp)))
        .await
    {
        Ok(out) if out.success() => {}
        _ => tracing::debug!("could not remove {temp} on {}", dst.label()),
    }
    Err(AppError::transfer(format!(
        "writing {destination} on {} failed: {}",
        dst.label(),
        out.stderr_lossy().trim()
    )))
}
