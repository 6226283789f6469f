// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result};
use russh::ChannelMsg;
use russh::client::Handle;

use crate::app::ports::ExecOutput;

use super::handler::ClientHandler;

/// Folds one channel message into the captured output. Returns true once
/// the channel is closed.
fn handle_capture_message(
    msg: &ChannelMsg,
    out: &mut Vec<u8>,
    err: &mut Vec<u8>,
    code: &mut Option<i32>,
) -> bool {
    match msg {
        ChannelMsg::Data { data } => {
            out.extend_from_slice(data);
            false
        }
        ChannelMsg::ExtendedData { data, ext: 1 } => {
            err.extend_from_slice(data);
            false
        }
        ChannelMsg::ExitStatus { exit_status } => {
            *code = Some(*exit_status as i32);
            false
        }
        ChannelMsg::ExitSignal { signal_name, .. } => {
            tracing::debug!("remote command killed by signal {signal_name:?}");
            code.get_or_insert(-1);
            false
        }
        ChannelMsg::Close => true,
        _ => false,
    }
}

/// Runs `command` on a fresh channel, feeding `stdin` and collecting
/// stdout, stderr and the exit status.
pub(super) async fn exec_capture(
    handle: &Handle<ClientHandler>,
    command: &str,
    stdin: &[u8],
) -> Result<ExecOutput> {
    let mut chan = handle
        .channel_open_session()
        .await
        .context("open session")?;
    chan.exec(true, command).await.context("exec request")?;
    if !stdin.is_empty() {
        chan.data(stdin).await.context("writing stdin")?;
    }
    chan.eof().await.context("closing stdin")?;

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut code = None;
    while let Some(msg) = chan.wait().await {
        if handle_capture_message(&msg, &mut stdout, &mut stderr, &mut code) {
            break;
        }
    }
    let _ = chan.close().await;
    Ok(ExecOutput {
        exit_code: code.unwrap_or(-1),
        stdout,
        stderr,
    })
}
