// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app::errors::{AppError, AppResult};

/// One of the four fixed members of the fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostRole {
    Origin,
    Compute,
    Relay,
    Archive,
}

impl HostRole {
    pub const ALL: [HostRole; 4] = [
        HostRole::Origin,
        HostRole::Compute,
        HostRole::Relay,
        HostRole::Archive,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            HostRole::Origin => "origin",
            HostRole::Compute => "compute",
            HostRole::Relay => "relay",
            HostRole::Archive => "archive",
        }
    }
}

impl fmt::Display for HostRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HostRole {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "origin" => Ok(HostRole::Origin),
            "compute" => Ok(HostRole::Compute),
            "relay" => Ok(HostRole::Relay),
            "archive" => Ok(HostRole::Archive),
            other => Err(AppError::invalid_argument(format!(
                "unknown host role '{other}' (expected origin, compute, relay or archive)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Ssh,
    Local,
}

/// How privileged commands are wrapped on a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SudoMode {
    /// `sudo -k -S`, the host password is written to the command's stdin.
    #[default]
    Password,
    /// `sudo -n`, relies on a NOPASSWD rule.
    Passwordless,
    /// Run privileged commands as-is.
    Disabled,
}

#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Password(String),
    Identity(PathBuf),
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password(_) => f.write_str("Password(***)"),
            Credential::Identity(path) => f.debug_tuple("Identity").field(path).finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostProfile {
    pub role: HostRole,
    pub address: String,
    pub port: u16,
    pub username: String,
    pub credential: Option<Credential>,
    pub sudo: SudoMode,
    pub transport: Transport,
    pub home_root: String,
}

impl HostProfile {
    pub fn label(&self) -> String {
        match self.transport {
            Transport::Ssh => format!(
                "{}({}@{}:{})",
                self.role, self.username, self.address, self.port
            ),
            Transport::Local => format!("{}(local)", self.role),
        }
    }

    /// Password used for `sudo -S`, when the host authenticates with one.
    pub fn sudo_password(&self) -> Option<&str> {
        match &self.credential {
            Some(Credential::Password(password)) => Some(password.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub command_timeout: Duration,
    pub connect_timeout: Duration,
    pub max_background_runs: usize,
    pub package_index: Option<String>,
    pub base_venv: String,
    pub known_hosts_path: Option<PathBuf>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(30),
            max_background_runs: 4,
            package_index: None,
            base_venv: "/home/user/common/basevenv/venv".to_string(),
            known_hosts_path: None,
        }
    }
}

/// Immutable description of the fleet, shared by every component.
#[derive(Debug, Clone)]
pub struct Fleet {
    hosts: BTreeMap<HostRole, HostProfile>,
    pub settings: EngineSettings,
}

impl Fleet {
    pub fn new(hosts: BTreeMap<HostRole, HostProfile>, settings: EngineSettings) -> Self {
        Self { hosts, settings }
    }

    pub fn profile(&self, role: HostRole) -> AppResult<&HostProfile> {
        self.hosts.get(&role).ok_or_else(|| {
            AppError::invalid_argument(format!("no host configured for role {role}"))
        })
    }

    pub fn hosts(&self) -> impl Iterator<Item = &HostProfile> {
        self.hosts.values()
    }
}

/// A path on a specific fleet member, written `role:/abs/path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostPath {
    pub role: HostRole,
    pub path: String,
}

impl HostPath {
    pub fn new(role: HostRole, path: impl Into<String>) -> Self {
        Self {
            role,
            path: path.into(),
        }
    }
}

impl fmt::Display for HostPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.role, self.path)
    }
}

impl FromStr for HostPath {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (role, path) = value.split_once(':').ok_or_else(|| {
            AppError::invalid_argument(format!("expected <role>:<path>, got '{value}'"))
        })?;
        if !path.starts_with('/') {
            return Err(AppError::invalid_argument(format!(
                "path must be absolute: '{path}'"
            )));
        }
        Ok(HostPath::new(role.parse()?, path))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Directory,
    File,
    Symlink,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub kind: EntryKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeSyncReport {
    pub source: HostPath,
    pub destination: HostPath,
    pub files_copied: usize,
    pub bytes_copied: u64,
    pub directories_created: usize,
    /// Entries left behind, currently symbolic links.
    pub skipped: Vec<String>,
    pub warnings: Vec<String>,
    /// `ls -la` of the destination after the copy.
    pub listing: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMethod {
    Tree,
    Direct,
    ElevatedDirect,
    Base64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemResult {
    pub source: String,
    pub destination: String,
    pub kind: Option<EntryKind>,
    pub success: bool,
    pub method: Option<TransferMethod>,
    pub bytes: u64,
    pub error: Option<AppError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncManyReport {
    pub success: bool,
    pub message: String,
    pub destination_root: HostPath,
    pub items: Vec<ItemResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    pub username: String,
    pub project: String,
    pub env: String,
    pub command: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Validating,
    Staging,
    Executing,
    Archiving,
    Done,
    Failed,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStage::Validating => "validating",
            RunStage::Staging => "staging",
            RunStage::Executing => "executing",
            RunStage::Archiving => "archiving",
            RunStage::Done => "done",
            RunStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StageFailure {
    pub stage: RunStage,
    pub error: AppError,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub request: RunRequest,
    /// Final state, `done` or `failed`.
    pub stage: RunStage,
    /// True when the job command exited zero.
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub failure: Option<StageFailure>,
    pub project_path: String,
    pub env_path: String,
    pub output_path: String,
    pub run_output_path: String,
    pub log_file: String,
    pub archived: bool,
    pub log_archived: bool,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PidSource {
    Echoed,
    ProcessTable,
    Sentinel,
    LogScan,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackedProcess {
    pub pid: u32,
    pub pid_source: PidSource,
    pub run_id: String,
    pub username: String,
    pub project: String,
    pub log_file: String,
    pub script_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Running,
    AlreadyArchived { path: String },
    Archived { path: String, log_copied: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvInfo {
    pub name: String,
    pub path: String,
    pub is_venv: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub success: bool,
    pub exit_code: i32,
    pub command: String,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HostProvisioning {
    pub role: HostRole,
    pub success: bool,
    pub directories: Vec<String>,
    pub error: Option<AppError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProvisionReport {
    pub username: String,
    pub success: bool,
    pub hosts: Vec<HostProvisioning>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogContent {
    pub project: String,
    pub path: String,
    pub content: String,
}
