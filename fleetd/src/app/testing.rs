// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! In-memory port fakes shared by the use case tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use time::OffsetDateTime;
use time::macros::datetime;
use tokio::io::AsyncWrite;

use crate::app::errors::{AppError, AppResult};
use crate::app::ports::{
    ClockPort, ExecOutput, ExecRequest, RemoteReader, RemoteSession, RemoteWriter,
    SessionConnector,
};
use crate::app::services::layout;
use crate::app::types::{EntryKind, HostRole, RemoteEntry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemNode {
    Dir,
    File(Vec<u8>),
    Symlink(String),
}

pub type ExecHandler = Arc<dyn Fn(&ExecRequest, &MemoryHost) -> Option<ExecOutput> + Send + Sync>;

/// A fake fleet member: an in-memory filesystem, scripted command results,
/// and counters for commands and closes.
#[derive(Clone)]
pub struct MemoryHost {
    role: HostRole,
    nodes: Arc<Mutex<BTreeMap<String, MemNode>>>,
    deny_read: Arc<Mutex<HashSet<String>>>,
    deny_stat: Arc<Mutex<HashSet<String>>>,
    handler: Option<ExecHandler>,
    commands: Arc<Mutex<Vec<ExecRequest>>>,
    closes: Arc<AtomicUsize>,
}

impl MemoryHost {
    pub fn new(role: HostRole) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), MemNode::Dir);
        Self {
            role,
            nodes: Arc::new(Mutex::new(nodes)),
            deny_read: Arc::default(),
            deny_stat: Arc::default(),
            handler: None,
            commands: Arc::default(),
            closes: Arc::default(),
        }
    }

    pub fn with_handler(
        mut self,
        handler: impl Fn(&ExecRequest, &MemoryHost) -> Option<ExecOutput> + Send + Sync + 'static,
    ) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn mkdir_all(&self, path: &str) {
        let mut nodes = self.nodes.lock().unwrap();
        for dir in layout::dir_chain(path) {
            nodes.entry(dir).or_insert(MemNode::Dir);
        }
    }

    pub fn put_file(&self, path: &str, content: &[u8]) {
        if let Some(parent) = layout::parent(path) {
            self.mkdir_all(&parent);
        }
        self.nodes
            .lock()
            .unwrap()
            .insert(layout::normalize(path), MemNode::File(content.to_vec()));
    }

    pub fn put_symlink(&self, path: &str, target: &str) {
        self.nodes
            .lock()
            .unwrap()
            .insert(layout::normalize(path), MemNode::Symlink(target.to_string()));
    }

    pub fn node(&self, path: &str) -> Option<MemNode> {
        self.nodes.lock().unwrap().get(&layout::normalize(path)).cloned()
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        match self.node(path) {
            Some(MemNode::File(content)) => Some(content),
            _ => None,
        }
    }

    pub fn paths_under(&self, root: &str) -> Vec<String> {
        let prefix = format!("{}/", layout::normalize(root));
        self.nodes
            .lock()
            .unwrap()
            .keys()
            .filter(|key| key.starts_with(&prefix))
            .cloned()
            .collect()
    }

    /// Deletes everything below `root`, keeping `root` itself.
    pub fn remove_under(&self, root: &str) {
        let doomed = self.paths_under(root);
        let mut nodes = self.nodes.lock().unwrap();
        for path in doomed {
            nodes.remove(&path);
        }
    }

    pub fn deny_read(&self, path: &str) {
        self.deny_read.lock().unwrap().insert(layout::normalize(path));
    }

    pub fn allow_read(&self, path: &str) {
        self.deny_read.lock().unwrap().remove(&layout::normalize(path));
    }

    pub fn deny_stat(&self, path: &str) {
        self.deny_stat.lock().unwrap().insert(layout::normalize(path));
    }

    pub fn commands(&self) -> Vec<ExecRequest> {
        self.commands.lock().unwrap().clone()
    }

    pub fn ran(&self, needle: &str) -> bool {
        self.commands().iter().any(|req| req.command.contains(needle))
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn denied(&self, set: &Mutex<HashSet<String>>, path: &str) -> bool {
        set.lock().unwrap().contains(&layout::normalize(path))
    }
}

struct MemWriter {
    nodes: Arc<Mutex<BTreeMap<String, MemNode>>>,
    path: String,
}

impl AsyncWrite for MemWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let mut nodes = this.nodes.lock().unwrap();
        match nodes.get_mut(&this.path) {
            Some(MemNode::File(content)) => {
                content.extend_from_slice(buf);
                Poll::Ready(Ok(buf.len()))
            }
            _ => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::NotFound,
                "file vanished",
            ))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[async_trait]
impl RemoteSession for MemoryHost {
    fn role(&self) -> HostRole {
        self.role
    }

    fn label(&self) -> String {
        format!("{}(memory)", self.role)
    }

    async fn exec(&self, request: ExecRequest) -> AppResult<ExecOutput> {
        self.commands.lock().unwrap().push(request.clone());
        let scripted = self
            .handler
            .as_ref()
            .and_then(|handler| handler(&request, self));
        Ok(scripted.unwrap_or_default())
    }

    async fn stat(&self, path: &str) -> AppResult<Option<EntryKind>> {
        if self.denied(&self.deny_stat, path) {
            return Err(AppError::permission_denied(format!("stat {path}")));
        }
        Ok(self.node(path).map(|node| match node {
            MemNode::Dir => EntryKind::Directory,
            MemNode::File(_) => EntryKind::File,
            MemNode::Symlink(_) => EntryKind::Symlink,
        }))
    }

    async fn read_dir(&self, path: &str) -> AppResult<Vec<RemoteEntry>> {
        if self.denied(&self.deny_read, path) {
            return Err(AppError::permission_denied(format!("read_dir {path}")));
        }
        if self.node(path) != Some(MemNode::Dir) {
            return Err(AppError::not_found(format!("no such directory {path}")));
        }
        let base = layout::normalize(path);
        let prefix = if base == "/" { base.clone() } else { format!("{base}/") };
        let nodes = self.nodes.lock().unwrap();
        Ok(nodes
            .iter()
            .filter_map(|(key, node)| {
                let name = key.strip_prefix(&prefix)?;
                if name.is_empty() || name.contains('/') {
                    return None;
                }
                let kind = match node {
                    MemNode::Dir => EntryKind::Directory,
                    MemNode::File(_) => EntryKind::File,
                    MemNode::Symlink(_) => EntryKind::Symlink,
                };
                Some(RemoteEntry {
                    name: name.to_string(),
                    kind,
                })
            })
            .collect())
    }

    async fn create_dir(&self, path: &str) -> AppResult<()> {
        let parent = layout::parent(path).unwrap_or_else(|| "/".to_string());
        if self.node(&parent) != Some(MemNode::Dir) {
            return Err(AppError::not_found(format!("parent of {path} is missing")));
        }
        let mut nodes = self.nodes.lock().unwrap();
        let key = layout::normalize(path);
        if nodes.contains_key(&key) {
            return Err(AppError::conflict(format!("{path} already exists")));
        }
        nodes.insert(key, MemNode::Dir);
        Ok(())
    }

    async fn remove_file(&self, path: &str) -> AppResult<()> {
        let mut nodes = self.nodes.lock().unwrap();
        match nodes.get(&layout::normalize(path)) {
            Some(MemNode::File(_)) | Some(MemNode::Symlink(_)) => {
                nodes.remove(&layout::normalize(path));
                Ok(())
            }
            _ => Err(AppError::not_found(format!("no such file {path}"))),
        }
    }

    async fn remove_dir(&self, path: &str) -> AppResult<()> {
        if !self.paths_under(path).is_empty() {
            return Err(AppError::transfer(format!("directory not empty {path}")));
        }
        let mut nodes = self.nodes.lock().unwrap();
        match nodes.get(&layout::normalize(path)) {
            Some(MemNode::Dir) => {
                nodes.remove(&layout::normalize(path));
                Ok(())
            }
            _ => Err(AppError::not_found(format!("no such directory {path}"))),
        }
    }

    async fn open_read(&self, path: &str) -> AppResult<RemoteReader> {
        if self.denied(&self.deny_read, path) {
            return Err(AppError::permission_denied(format!("open {path}")));
        }
        match self.file(path) {
            Some(content) => Ok(Box::new(std::io::Cursor::new(content))),
            None => Err(AppError::not_found(format!("no such file {path}"))),
        }
    }

    async fn open_write(&self, path: &str) -> AppResult<RemoteWriter> {
        let parent = layout::parent(path).unwrap_or_else(|| "/".to_string());
        if self.node(&parent) != Some(MemNode::Dir) {
            return Err(AppError::not_found(format!("parent of {path} is missing")));
        }
        let key = layout::normalize(path);
        self.nodes
            .lock()
            .unwrap()
            .insert(key.clone(), MemNode::File(Vec::new()));
        Ok(Box::new(MemWriter {
            nodes: self.nodes.clone(),
            path: key,
        }))
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out clones of preconfigured hosts and counts connects per role.
#[derive(Clone, Default)]
pub struct FakeConnector {
    hosts: HashMap<HostRole, MemoryHost>,
    failures: HashMap<HostRole, AppError>,
    connects: Arc<Mutex<Vec<HostRole>>>,
}

impl FakeConnector {
    pub fn new(hosts: impl IntoIterator<Item = MemoryHost>) -> Self {
        Self {
            hosts: hosts.into_iter().map(|host| (host.role, host)).collect(),
            ..Default::default()
        }
    }

    pub fn failing(mut self, role: HostRole, err: AppError) -> Self {
        self.failures.insert(role, err);
        self
    }

    pub fn connects(&self, role: HostRole) -> usize {
        self.connects
            .lock()
            .unwrap()
            .iter()
            .filter(|r| **r == role)
            .count()
    }
}

#[async_trait]
impl SessionConnector for FakeConnector {
    async fn connect(&self, role: HostRole) -> AppResult<Box<dyn RemoteSession>> {
        if let Some(err) = self.failures.get(&role) {
            return Err(err.clone());
        }
        let host = self
            .hosts
            .get(&role)
            .cloned()
            .ok_or_else(|| AppError::invalid_argument(format!("no fake host for {role}")))?;
        self.connects.lock().unwrap().push(role);
        Ok(Box::new(host))
    }
}

pub struct FixedClock(pub OffsetDateTime);

impl Default for FixedClock {
    fn default() -> Self {
        Self(datetime!(2025-03-07 09:05:01 UTC))
    }
}

impl ClockPort for FixedClock {
    fn now_utc(&self) -> OffsetDateTime {
        self.0
    }
}

pub fn ok_output(stdout: &str) -> ExecOutput {
    ExecOutput {
        exit_code: 0,
        stdout: stdout.as_bytes().to_vec(),
        stderr: Vec::new(),
    }
}

pub fn failed_output(code: i32, stderr: &str) -> ExecOutput {
    ExecOutput {
        exit_code: code,
        stdout: Vec::new(),
        stderr: stderr.as_bytes().to_vec(),
    }
}
