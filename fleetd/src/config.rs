// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::app::types::{
    Credential, EngineSettings, Fleet, HostProfile, HostRole, SudoMode, Transport,
};

const APP_DIR_NAME: &str = "fleetd";
const CONFIG_FILE_NAME: &str = "fleet.toml";
const CONFIG_ENV_VAR: &str = "FLEETD_CONFIG_PATH";
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 300;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_BACKGROUND_RUNS: usize = 4;
const DEFAULT_BASE_VENV: &str = "/home/user/common/basevenv/venv";
const DEFAULT_HOME_ROOT: &str = "/home/user";
const DEFAULT_SSH_PORT: u16 = 22;

#[derive(Debug, Default, Deserialize)]
struct FileHost {
    address: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    identity_path: Option<String>,
    sudo: Option<SudoMode>,
    transport: Option<Transport>,
    home_root: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    command_timeout_secs: Option<u64>,
    connect_timeout_secs: Option<u64>,
    max_background_runs: Option<usize>,
    package_index: Option<String>,
    base_venv: Option<String>,
    known_hosts_path: Option<String>,
    verbose: Option<bool>,
    #[serde(default)]
    hosts: BTreeMap<String, FileHost>,
}

#[derive(Debug)]
pub struct Config {
    pub fleet: Fleet,
    pub verbose: bool,
    #[allow(dead_code)]
    pub config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Override,
    Env,
    ConfigFile,
    Default,
}

impl ConfigSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfigSource::Override => "override",
            ConfigSource::Env => "env",
            ConfigSource::ConfigFile => "config",
            ConfigSource::Default => "default",
        }
    }
}

#[derive(Debug)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

#[derive(Debug)]
pub struct ConfigReport {
    pub config_path: Option<PathBuf>,
    pub config_path_source: Option<ConfigSource>,
    pub config_file_present: bool,
    pub command_timeout_secs: ConfigValue<u64>,
    pub connect_timeout_secs: ConfigValue<u64>,
    pub max_background_runs: ConfigValue<usize>,
    pub base_venv: ConfigValue<String>,
    pub verbose: ConfigValue<bool>,
    /// `role -> label` for every configured host.
    pub hosts: Vec<(HostRole, String)>,
}

#[derive(Debug)]
pub struct LoadResult {
    pub config: Config,
    pub report: ConfigReport,
}

#[derive(Debug, Default)]
pub struct Overrides {
    pub command_timeout_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    pub max_background_runs: Option<usize>,
    pub verbose: Option<bool>,
}

fn pick<T>(over: Option<T>, file: Option<T>, default: T) -> (T, ConfigSource) {
    match over {
        Some(value) => (value, ConfigSource::Override),
        None => match file {
            Some(value) => (value, ConfigSource::ConfigFile),
            None => (default, ConfigSource::Default),
        },
    }
}

#[allow(dead_code)]
pub fn load(config_path_override: Option<PathBuf>, overrides: Overrides) -> Result<Config> {
    Ok(load_with_report(config_path_override, overrides)?.config)
}

pub fn load_with_report(
    config_path_override: Option<PathBuf>,
    overrides: Overrides,
) -> Result<LoadResult> {
    let (config_path, config_path_source, required) = match config_path_override {
        Some(path) => (Some(expand_path(path)), Some(ConfigSource::Override), true),
        None => match config_path_from_env()? {
            Some(path) => (Some(expand_path(path)), Some(ConfigSource::Env), true),
            None => match default_config_path().ok() {
                Some(path) => (Some(path), Some(ConfigSource::Default), false),
                None => (None, None, false),
            },
        },
    };
    let config_file_present = config_path
        .as_deref()
        .map(|path| path.exists())
        .unwrap_or(false);

    let file_config = match config_path.as_deref() {
        Some(path) => read_config_file(path, required)?,
        None => FileConfig::default(),
    };
    let base_dir = config_path.as_deref().and_then(|path| path.parent());

    let (command_timeout_secs, command_timeout_source) = pick(
        overrides.command_timeout_secs,
        file_config.command_timeout_secs,
        DEFAULT_COMMAND_TIMEOUT_SECS,
    );
    let (connect_timeout_secs, connect_timeout_source) = pick(
        overrides.connect_timeout_secs,
        file_config.connect_timeout_secs,
        DEFAULT_CONNECT_TIMEOUT_SECS,
    );
    if command_timeout_secs == 0 || connect_timeout_secs == 0 {
        anyhow::bail!("timeouts must be at least one second");
    }
    let (max_background_runs, max_background_runs_source) = pick(
        overrides.max_background_runs,
        file_config.max_background_runs,
        DEFAULT_MAX_BACKGROUND_RUNS,
    );
    if max_background_runs == 0 {
        anyhow::bail!("max_background_runs must be at least 1");
    }
    let (base_venv, base_venv_source) = pick(
        None,
        file_config.base_venv.clone(),
        DEFAULT_BASE_VENV.to_string(),
    );
    let (verbose, verbose_source) = pick(overrides.verbose, file_config.verbose, false);

    let settings = EngineSettings {
        command_timeout: Duration::from_secs(command_timeout_secs),
        connect_timeout: Duration::from_secs(connect_timeout_secs),
        max_background_runs,
        package_index: file_config
            .package_index
            .clone()
            .filter(|url| !url.trim().is_empty()),
        base_venv: base_venv.clone(),
        known_hosts_path: file_config
            .known_hosts_path
            .as_deref()
            .map(|raw| resolve_path(raw, base_dir)),
    };
    let hosts = build_hosts(file_config.hosts, base_dir)?;
    let fleet = Fleet::new(hosts, settings);

    let report = ConfigReport {
        config_path: config_path.clone(),
        config_path_source,
        config_file_present,
        command_timeout_secs: ConfigValue {
            value: command_timeout_secs,
            source: command_timeout_source,
        },
        connect_timeout_secs: ConfigValue {
            value: connect_timeout_secs,
            source: connect_timeout_source,
        },
        max_background_runs: ConfigValue {
            value: max_background_runs,
            source: max_background_runs_source,
        },
        base_venv: ConfigValue {
            value: base_venv,
            source: base_venv_source,
        },
        verbose: ConfigValue {
            value: verbose,
            source: verbose_source,
        },
        hosts: fleet.hosts().map(|host| (host.role, host.label())).collect(),
    };

    let config = Config {
        fleet,
        verbose,
        config_path,
    };
    Ok(LoadResult { config, report })
}

fn build_hosts(
    raw: BTreeMap<String, FileHost>,
    base_dir: Option<&Path>,
) -> Result<BTreeMap<HostRole, HostProfile>> {
    let mut hosts = BTreeMap::new();
    for (name, host) in raw {
        let role: HostRole = name
            .parse()
            .map_err(|_| anyhow::anyhow!("unknown host role [hosts.{name}]"))?;
        hosts.insert(role, build_profile(role, host, base_dir)?);
    }
    for role in [HostRole::Origin, HostRole::Compute, HostRole::Archive] {
        if !hosts.contains_key(&role) {
            anyhow::bail!("missing [hosts.{role}] in config");
        }
    }
    hosts
        .entry(HostRole::Relay)
        .or_insert_with(|| local_profile(HostRole::Relay));
    Ok(hosts)
}

fn current_user() -> String {
    std::env::var("USER")
        .ok()
        .filter(|user| !user.is_empty())
        .unwrap_or_else(|| "user".to_string())
}

fn local_profile(role: HostRole) -> HostProfile {
    HostProfile {
        role,
        address: "localhost".to_string(),
        port: DEFAULT_SSH_PORT,
        username: current_user(),
        credential: None,
        sudo: SudoMode::Passwordless,
        transport: Transport::Local,
        home_root: DEFAULT_HOME_ROOT.to_string(),
    }
}

fn build_profile(role: HostRole, host: FileHost, base_dir: Option<&Path>) -> Result<HostProfile> {
    let transport = host.transport.unwrap_or_default();
    let credential = match (host.password, host.identity_path) {
        (Some(_), Some(_)) => {
            anyhow::bail!("[hosts.{role}] sets both password and identity_path")
        }
        (Some(password), None) => Some(Credential::Password(password)),
        (None, Some(path)) => Some(Credential::Identity(resolve_path(&path, base_dir))),
        (None, None) => None,
    };
    let (address, username) = match transport {
        Transport::Ssh => {
            let address = host
                .address
                .with_context(|| format!("[hosts.{role}] needs an address"))?;
            let username = host
                .username
                .with_context(|| format!("[hosts.{role}] needs a username"))?;
            if credential.is_none() {
                anyhow::bail!("[hosts.{role}] needs a password or an identity_path");
            }
            (address, username)
        }
        Transport::Local => (
            host.address.unwrap_or_else(|| "localhost".to_string()),
            host.username.unwrap_or_else(current_user),
        ),
    };
    let sudo = host.sudo.unwrap_or(match &credential {
        Some(Credential::Password(_)) => SudoMode::Password,
        _ => SudoMode::Passwordless,
    });
    Ok(HostProfile {
        role,
        address,
        port: host.port.unwrap_or(DEFAULT_SSH_PORT),
        username,
        credential,
        sudo,
        transport,
        home_root: host
            .home_root
            .unwrap_or_else(|| DEFAULT_HOME_ROOT.to_string()),
    })
}

fn read_config_file(path: &Path, required: bool) -> Result<FileConfig> {
    if !path.exists() {
        if required {
            anyhow::bail!("config file not found at {}", path.display());
        }
        return Ok(FileConfig::default());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

fn resolve_path(raw: &str, base_dir: Option<&Path>) -> PathBuf {
    let expanded = shellexpand::tilde(raw);
    let path = PathBuf::from(expanded.as_ref());
    if path.is_absolute() {
        return path;
    }
    match base_dir {
        Some(dir) => dir.join(path),
        None => path,
    }
}

fn expand_path(path: PathBuf) -> PathBuf {
    let path_string = path.to_string_lossy().to_string();
    let expanded = shellexpand::tilde(&path_string);
    PathBuf::from(expanded.as_ref())
}

fn config_path_from_env() -> Result<Option<PathBuf>> {
    match std::env::var_os(CONFIG_ENV_VAR) {
        Some(value) => {
            if value.is_empty() {
                anyhow::bail!("{CONFIG_ENV_VAR} is set but empty");
            }
            Ok(Some(PathBuf::from(value)))
        }
        None => Ok(None),
    }
}

fn default_config_path() -> Result<PathBuf> {
    let base = dirs::config_dir().context("failed to resolve config directory")?;
    Ok(base.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}
