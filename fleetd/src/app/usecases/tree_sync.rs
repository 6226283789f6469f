// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashSet;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::app::errors::{AppError, AppErrorKind, AppResult};
use crate::app::ports::{ExecRequest, RemoteSession};
use crate::app::services::{layout, shell};
use crate::app::types::{EntryKind, HostPath, TreeSyncReport};

use super::{SessionSet, UseCases};

/// Bytes moved per read/write while streaming a file through fleetd.
pub const CHUNK_SIZE: usize = 32 * 1024;

impl UseCases {
    /// Replaces `destination` with a copy of the `source` directory tree.
    #[tracing::instrument(
        name = "sync_tree",
        level = "debug",
        skip(self),
        fields(src = %source, dst = %destination)
    )]
    pub async fn sync_tree(
        &self,
        source: &HostPath,
        destination: &HostPath,
    ) -> AppResult<TreeSyncReport> {
        let mut sessions = SessionSet::new(self.connector.as_ref());
        let result = async {
            let src = sessions.open(source.role).await?;
            let dst = sessions.open(destination.role).await?;
            copy_tree(src.as_ref(), &source.path, dst.as_ref(), &destination.path).await
        }
        .await;
        sessions.close_all().await;
        result
    }
}

/// Wipes `dst_path`, recreates it from `src_path` file by file, then lists
/// it. Symbolic links are not followed; they are reported as skipped.
pub(crate) async fn copy_tree(
    src: &dyn RemoteSession,
    src_path: &str,
    dst: &dyn RemoteSession,
    dst_path: &str,
) -> AppResult<TreeSyncReport> {
    let src_root = layout::normalize(src_path);
    let dst_root = layout::normalize(dst_path);
    if dst_root == "/" || dst_root.is_empty() {
        return Err(AppError::invalid_argument(format!(
            "refusing to replace '{dst_path}' on {}",
            dst.label()
        )));
    }
    if src.role() == dst.role() && layout::overlaps(&src_root, &dst_root) {
        return Err(AppError::invalid_argument(format!(
            "{dst_root} and {src_root} overlap on {}",
            dst.label()
        )));
    }
    match src.stat(&src_root).await? {
        Some(EntryKind::Directory) => {}
        Some(kind) => {
            return Err(AppError::invalid_argument(format!(
                "{src_root} on {} is not a directory ({kind:?})",
                src.label()
            )));
        }
        None => {
            return Err(AppError::not_found(format!(
                "{src_root} does not exist on {}",
                src.label()
            )));
        }
    }

    tracing::info!(
        "copying {}:{src_root} -> {}:{dst_root}",
        src.label(),
        dst.label()
    );
    remove_tree(dst, &dst_root).await?;

    let mut report = TreeSyncReport {
        source: HostPath::new(src.role(), src_root.clone()),
        destination: HostPath::new(dst.role(), dst_root.clone()),
        files_copied: 0,
        bytes_copied: 0,
        directories_created: 0,
        skipped: Vec::new(),
        warnings: Vec::new(),
        listing: String::new(),
    };
    let mut known_dirs = HashSet::new();
    report.directories_created +=
        ensure_dir(dst, &dst_root, &mut known_dirs, &mut report.warnings).await;

    let mut stack = vec![(src_root.clone(), dst_root.clone())];
    while let Some((src_dir, dst_dir)) = stack.pop() {
        let mut entries = src
            .read_dir(&src_dir)
            .await
            .map_err(|err| into_transfer(err, format!("listing {src_dir} on {}", src.label())))?;
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        for entry in entries {
            if entry.name == "." || entry.name == ".." {
                continue;
            }
            let src_child = layout::join(&src_dir, &entry.name);
            let dst_child = layout::join(&dst_dir, &entry.name);
            match entry.kind {
                EntryKind::Directory => {
                    report.directories_created +=
                        ensure_dir(dst, &dst_child, &mut known_dirs, &mut report.warnings).await;
                    stack.push((src_child, dst_child));
                }
                EntryKind::File => {
                    report.directories_created +=
                        ensure_dir(dst, &dst_dir, &mut known_dirs, &mut report.warnings).await;
                    let bytes = stream_file(src, &src_child, dst, &dst_child)
                        .await
                        .map_err(|err| {
                            into_transfer(err, format!("copying {src_child} -> {dst_child}"))
                        })?;
                    report.files_copied += 1;
                    report.bytes_copied += bytes;
                }
                EntryKind::Symlink | EntryKind::Other => {
                    tracing::warn!(
                        "skipping {src_child} on {} ({:?} entries are not copied)",
                        src.label(),
                        entry.kind
                    );
                    report.skipped.push(src_child);
                }
            }
        }
    }

    report.listing = verify_listing(dst, &dst_root, &report.warnings).await?;
    tracing::info!(
        "copied {} files ({} bytes) into {}:{dst_root}",
        report.files_copied,
        report.bytes_copied,
        dst.label()
    );
    Ok(report)
}

/// Removes a file or directory tree. A missing target is not an error.
pub(crate) async fn remove_tree(session: &dyn RemoteSession, path: &str) -> AppResult<()> {
    let root = layout::normalize(path);
    let kind = match session.stat(&root).await? {
        Some(kind) => kind,
        None => return Ok(()),
    };
    if kind != EntryKind::Directory {
        return tolerate_missing(session.remove_file(&root).await)
            .map_err(|err| into_transfer(err, format!("removing {root} on {}", session.label())));
    }

    // Pre-order walk; reversed it lists children before their parents.
    let mut ordered: Vec<(String, EntryKind)> = Vec::new();
    let mut stack = vec![root.clone()];
    while let Some(dir) = stack.pop() {
        let entries = session
            .read_dir(&dir)
            .await
            .map_err(|err| into_transfer(err, format!("listing {dir} on {}", session.label())))?;
        for entry in entries {
            if entry.name == "." || entry.name == ".." {
                continue;
            }
            let child = layout::join(&dir, &entry.name);
            if entry.kind == EntryKind::Directory {
                stack.push(child.clone());
            }
            ordered.push((child, entry.kind));
        }
    }
    for (child, kind) in ordered.into_iter().rev() {
        let removed = if kind == EntryKind::Directory {
            session.remove_dir(&child).await
        } else {
            session.remove_file(&child).await
        };
        tolerate_missing(removed)
            .map_err(|err| into_transfer(err, format!("removing {child} on {}", session.label())))?;
    }
    tolerate_missing(session.remove_dir(&root).await)
        .map_err(|err| into_transfer(err, format!("removing {root} on {}", session.label())))
}

/// Creates `dir` and its missing ancestors one segment at a time. Failures
/// are logged and collected in `warnings`; the caller keeps going. Returns
/// how many directories were created.
pub(crate) async fn ensure_dir(
    session: &dyn RemoteSession,
    dir: &str,
    known: &mut HashSet<String>,
    warnings: &mut Vec<String>,
) -> usize {
    let mut created = 0;
    for cur in layout::dir_chain(dir) {
        if known.contains(&cur) {
            continue;
        }
        match session.stat(&cur).await {
            Ok(Some(EntryKind::Directory)) => {}
            Ok(Some(kind)) => {
                let warning = format!("{cur} on {} exists but is a {kind:?}", session.label());
                tracing::warn!("{warning}");
                warnings.push(warning);
                return created;
            }
            Ok(None) | Err(_) => match session.create_dir(&cur).await {
                Ok(()) => created += 1,
                Err(err) => {
                    if !matches!(session.stat(&cur).await, Ok(Some(EntryKind::Directory))) {
                        let warning =
                            format!("mkdir {cur} on {} failed: {err}", session.label());
                        tracing::warn!("{warning}");
                        warnings.push(warning);
                        continue;
                    }
                }
            },
        }
        known.insert(cur);
    }
    created
}

/// Streams one file through this process in `CHUNK_SIZE` pieces.
pub(crate) async fn stream_file(
    src: &dyn RemoteSession,
    src_path: &str,
    dst: &dyn RemoteSession,
    dst_path: &str,
) -> AppResult<u64> {
    let mut reader = src.open_read(src_path).await?;
    let mut writer = dst.open_write(dst_path).await?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await.map_err(|err| {
            AppError::transfer(format!("reading {src_path} on {}: {err}", src.label()))
        })?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await.map_err(|err| {
            AppError::transfer(format!("writing {dst_path} on {}: {err}", dst.label()))
        })?;
        total += n as u64;
    }
    writer
        .shutdown()
        .await
        .map_err(|err| AppError::transfer(format!("closing {dst_path} on {}: {err}", dst.label())))?;
    tracing::debug!("streamed {total} bytes {src_path} -> {dst_path}");
    Ok(total)
}

pub(crate) async fn read_text(session: &dyn RemoteSession, path: &str) -> AppResult<String> {
    let mut reader = session.open_read(path).await?;
    let mut content = Vec::new();
    reader.read_to_end(&mut content).await.map_err(|err| {
        AppError::transfer(format!("reading {path} on {}: {err}", session.label()))
    })?;
    Ok(String::from_utf8_lossy(&content).into_owned())
}

pub(crate) async fn write_text(session: &dyn RemoteSession, path: &str, text: &str) -> AppResult<()> {
    let mut writer = session.open_write(path).await?;
    writer.write_all(text.as_bytes()).await.map_err(|err| {
        AppError::transfer(format!("writing {path} on {}: {err}", session.label()))
    })?;
    writer.shutdown().await.map_err(|err| {
        AppError::transfer(format!("closing {path} on {}: {err}", session.label()))
    })
}

async fn verify_listing(
    session: &dyn RemoteSession,
    path: &str,
    warnings: &[String],
) -> AppResult<String> {
    let out = session.exec(ExecRequest::plain(shell::list_long(path))).await?;
    if out.success() {
        return Ok(out.stdout_lossy());
    }
    let mut message = format!(
        "verification listing of {path} on {} failed: {}",
        session.label(),
        out.stderr_lossy().trim()
    );
    if !warnings.is_empty() {
        message.push_str(&format!("; earlier warnings: {}", warnings.join("; ")));
    }
    Err(AppError::transfer(message))
}

fn tolerate_missing(result: AppResult<()>) -> AppResult<()> {
    match result {
        Err(err) if err.is_not_found() => Ok(()),
        other => other,
    }
}

/// Keeps session-level failures as they are and turns everything else into
/// a transfer error carrying `context`.
pub(crate) fn into_transfer(err: AppError, context: String) -> AppError {
    match err.kind() {
        AppErrorKind::Authentication | AppErrorKind::Connection | AppErrorKind::Timeout => {
            err.with_context(context)
        }
        AppErrorKind::Transfer => err,
        _ => AppError::transfer(format!("{context}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testing::{FakeConnector, MemNode, MemoryHost};
    use crate::app::types::HostRole;
    use crate::app::usecases::test_support;
    use std::sync::Arc;

    fn seeded_origin() -> MemoryHost {
        let origin = MemoryHost::new(HostRole::Origin);
        origin.put_file("/src/proj/main.py", b"print('hi')\n");
        origin.put_file("/src/proj/pkg/util.py", &vec![7u8; CHUNK_SIZE * 2 + 5]);
        origin.mkdir_all("/src/proj/empty");
        origin
    }

    #[tokio::test]
    async fn copies_tree_and_replaces_destination() {
        let origin = seeded_origin();
        let compute = MemoryHost::new(HostRole::Compute);
        compute.put_file("/dst/proj/stale.txt", b"old");

        let report = copy_tree(&origin, "/src/proj/", &compute, "/dst/proj")
            .await
            .unwrap();

        assert_eq!(report.files_copied, 2);
        assert_eq!(report.bytes_copied, 12 + (CHUNK_SIZE as u64) * 2 + 5);
        assert_eq!(compute.file("/dst/proj/main.py").unwrap(), b"print('hi')\n");
        assert_eq!(
            compute.file("/dst/proj/pkg/util.py").unwrap().len(),
            CHUNK_SIZE * 2 + 5
        );
        assert_eq!(compute.node("/dst/proj/empty"), Some(MemNode::Dir));
        assert_eq!(compute.node("/dst/proj/stale.txt"), None);
        assert!(compute.ran("ls -la -- '/dst/proj'"));
    }

    #[tokio::test]
    async fn repeated_copy_gives_identical_tree() {
        let origin = seeded_origin();
        let compute = MemoryHost::new(HostRole::Compute);
        copy_tree(&origin, "/src/proj", &compute, "/dst/proj").await.unwrap();
        let first = compute.paths_under("/dst/proj");
        copy_tree(&origin, "/src/proj", &compute, "/dst/proj").await.unwrap();
        assert_eq!(compute.paths_under("/dst/proj"), first);
    }

    #[tokio::test]
    async fn skips_symlinks() {
        let origin = seeded_origin();
        origin.put_symlink("/src/proj/link", "/etc/passwd");
        let compute = MemoryHost::new(HostRole::Compute);
        let report = copy_tree(&origin, "/src/proj", &compute, "/dst/proj").await.unwrap();
        assert_eq!(report.skipped, vec!["/src/proj/link".to_string()]);
        assert_eq!(compute.node("/dst/proj/link"), None);
    }

    #[tokio::test]
    async fn missing_source_is_not_found() {
        let origin = MemoryHost::new(HostRole::Origin);
        let compute = MemoryHost::new(HostRole::Compute);
        let err = copy_tree(&origin, "/nope", &compute, "/dst").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn refuses_root_destination() {
        let origin = seeded_origin();
        let compute = MemoryHost::new(HostRole::Compute);
        let err = copy_tree(&origin, "/src/proj", &compute, "/").await.unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn refuses_overlapping_paths_on_one_host() {
        let origin = seeded_origin();
        for dst in ["/src/proj/", "/src/proj/backup", "/src"] {
            let err = copy_tree(&origin, "/src/proj", &origin, dst).await.unwrap_err();
            assert_eq!(err.kind(), AppErrorKind::InvalidArgument, "{dst}");
        }
        assert_eq!(origin.file("/src/proj/main.py").unwrap(), b"print('hi')\n");

        let compute = MemoryHost::new(HostRole::Compute);
        copy_tree(&origin, "/src/proj", &compute, "/src/proj").await.unwrap();
        assert_eq!(compute.file("/src/proj/main.py").unwrap(), b"print('hi')\n");
    }

    #[tokio::test]
    async fn unreadable_file_aborts_with_transfer_error() {
        let origin = seeded_origin();
        origin.deny_read("/src/proj/main.py");
        let compute = MemoryHost::new(HostRole::Compute);
        let err = copy_tree(&origin, "/src/proj", &compute, "/dst/proj").await.unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::Transfer);
        assert!(err.message().contains("/src/proj/main.py"));
    }

    #[tokio::test]
    async fn remove_tree_ignores_missing_target() {
        let host = MemoryHost::new(HostRole::Archive);
        remove_tree(&host, "/not/there").await.unwrap();
        host.put_file("/a/b/c.txt", b"x");
        remove_tree(&host, "/a").await.unwrap();
        assert_eq!(host.node("/a"), None);
    }

    #[tokio::test]
    async fn sync_tree_closes_both_sessions() {
        let origin = seeded_origin();
        let compute = MemoryHost::new(HostRole::Compute);
        let connector = Arc::new(FakeConnector::new([origin.clone(), compute.clone()]));
        let usecases = test_support::usecases(test_support::fleet("/fleet"), connector.clone());

        usecases
            .sync_tree(
                &HostPath::new(HostRole::Origin, "/src/proj"),
                &HostPath::new(HostRole::Compute, "/dst/proj"),
            )
            .await
            .unwrap();
        assert_eq!(origin.closes(), 1);
        assert_eq!(compute.closes(), 1);
    }

    #[tokio::test]
    async fn sync_tree_closes_source_when_destination_refuses() {
        let origin = seeded_origin();
        let connector = Arc::new(
            FakeConnector::new([origin.clone()])
                .failing(HostRole::Archive, AppError::new(AppErrorKind::Authentication, "authentication_failure")),
        );
        let usecases = test_support::usecases(test_support::fleet("/fleet"), connector);
        let err = usecases
            .sync_tree(
                &HostPath::new(HostRole::Origin, "/src/proj"),
                &HostPath::new(HostRole::Archive, "/dst/proj"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::Authentication);
        assert_eq!(origin.closes(), 1);
    }
}
