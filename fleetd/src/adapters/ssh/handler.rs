// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::anyhow;
use russh::keys::known_hosts::{learn_known_hosts, learn_known_hosts_path};
use russh::keys::ssh_key::PublicKey;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// russh client handler that checks server keys against known_hosts and
/// records keys of hosts seen for the first time.
#[derive(Clone, Debug)]
pub(super) struct ClientHandler {
    host: String,
    addr: SocketAddr,
    known_hosts_path: Option<PathBuf>,
}

impl ClientHandler {
    pub(super) fn new(host: String, addr: SocketAddr, known_hosts_path: Option<PathBuf>) -> Self {
        Self {
            host,
            addr,
            known_hosts_path,
        }
    }
}

impl russh::client::Handler for ClientHandler {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        verify_server_key(
            &self.host,
            self.addr,
            server_public_key,
            self.known_hosts_path.as_deref(),
        )
    }
}

fn check_known_hosts_for(
    host: &str,
    port: u16,
    key: &PublicKey,
    known_hosts_path: Option<&Path>,
) -> std::result::Result<bool, russh::keys::Error> {
    match known_hosts_path {
        Some(path) => russh::keys::check_known_hosts_path(host, port, key, path),
        None => russh::keys::check_known_hosts(host, port, key),
    }
}

fn learn_known_hosts_for(
    host: &str,
    port: u16,
    key: &PublicKey,
    known_hosts_path: Option<&Path>,
) -> std::result::Result<(), russh::keys::Error> {
    match known_hosts_path {
        Some(path) => learn_known_hosts_path(host, port, key, path),
        None => learn_known_hosts(host, port, key),
    }
}

/// Accepts a key already known under the host name or its IP. A key that
/// contradicts a known_hosts entry is rejected; an unknown host is learned.
pub(super) fn verify_server_key(
    host: &str,
    addr: SocketAddr,
    key: &PublicKey,
    known_hosts_path: Option<&Path>,
) -> anyhow::Result<bool> {
    let port = addr.port();
    let ip_host = addr.ip().to_string();
    let mut candidates = vec![host.to_string()];
    if ip_host != host {
        candidates.push(ip_host);
    }
    for candidate in &candidates {
        match check_known_hosts_for(candidate, port, key, known_hosts_path) {
            Ok(true) => return Ok(true),
            Ok(false) => {}
            Err(err) => {
                tracing::warn!("server key validation failed for {candidate}:{port}: {err}");
                return Err(anyhow!(
                    "server key validation failed for {candidate}:{port}: {err}"
                ));
            }
        }
    }

    tracing::info!(
        "server key for {host}:{port} is not in known_hosts (tried {}); learning",
        candidates.join(", ")
    );
    learn_known_hosts_for(host, port, key, known_hosts_path).map_err(|err| {
        tracing::warn!("failed to learn server key for {host}:{port}: {err}");
        anyhow!("failed to learn server key for {host}:{port}: {err}")
    })?;
    Ok(true)
}
