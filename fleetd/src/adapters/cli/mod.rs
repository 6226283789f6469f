// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::PathBuf;

use clap::{Args, CommandFactory, FromArgMatches, Parser, Subcommand};

use crate::app::types::{HostPath, HostRole, RunRequest};

#[derive(Parser, Debug)]
#[command(
    name = "fleetd",
    version,
    about = "Move project trees across a four-host fleet and run jobs on the compute host",
    long_about = None,
    after_help = "Configuration precedence: defaults < config file < command-line flags.\n\
Config path precedence: defaults < FLEETD_CONFIG_PATH < command-line flags.\n\
Host paths are written as <role>:<absolute path>, roles being origin, compute, relay and archive.\n\
Results are printed to stdout as JSON; logs go to stderr."
)]
pub struct Opts {
    #[arg(
        short,
        long,
        global = true,
        value_name = "PATH",
        help = "Path to a TOML config file. When omitted, fleetd uses FLEETD_CONFIG_PATH if set, otherwise the default config file location."
    )]
    pub config: Option<PathBuf>,
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::SetTrue,
        help = "Enable debug logging. Overrides `verbose` from the config file."
    )]
    pub verbose: bool,
    #[arg(
        long,
        global = true,
        value_name = "SECS",
        help = "Per-command timeout. Overrides `command_timeout_secs` from the config file."
    )]
    pub command_timeout_secs: Option<u64>,
    #[arg(
        long,
        global = true,
        value_name = "SECS",
        help = "SSH connect timeout. Overrides `connect_timeout_secs` from the config file."
    )]
    pub connect_timeout_secs: Option<u64>,
    #[arg(
        long,
        global = true,
        value_name = "N",
        help = "Concurrent background runs. Overrides `max_background_runs` from the config file."
    )]
    pub max_background_runs: Option<usize>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct JobArgs {
    #[arg(long, short = 'u')]
    pub user: String,
    #[arg(long, short = 'p')]
    pub project: String,
    #[arg(long, short = 'e')]
    pub env: String,
    /// Command line run inside the project directory.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl JobArgs {
    pub fn into_request(self) -> RunRequest {
        RunRequest {
            username: self.user,
            project: self.project,
            env: self.env,
            command: self.command.join(" "),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replace a directory on one host with a copy of a directory on another.
    SyncTree {
        source: HostPath,
        destination: HostPath,
    },
    /// Copy several files or directories into one destination directory.
    SyncMany {
        #[arg(long)]
        from: HostRole,
        #[arg(long)]
        to: HostPath,
        #[arg(required = true)]
        items: Vec<String>,
    },
    /// Stage, execute and archive a job, waiting for it to finish.
    Run(JobArgs),
    /// Stage a job and start it in the background on the compute host.
    Launch(JobArgs),
    /// Check whether a process is running on the compute host.
    Alive { pid: u32 },
    /// Archive the outputs of a finished background job.
    Reconcile {
        pid: u32,
        #[arg(long, short = 'u')]
        user: String,
        #[arg(long, short = 'p')]
        project: String,
        #[arg(long)]
        run_id: String,
    },
    /// Manage virtual environments on the compute host.
    #[command(subcommand)]
    Env(EnvCommand),
    /// Create a user's directories on every host.
    UserInit { user: String },
    /// Print an archived run log.
    Log {
        user: String,
        project: String,
        #[arg(long)]
        file: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum EnvCommand {
    Create { user: String, name: String },
    List { user: String },
    Delete { user: String, name: String },
    Exec {
        user: String,
        #[arg(long, short = 'e')]
        env: Option<String>,
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
}

pub struct ParsedOpts {
    pub opts: Opts,
    pub verbose_override: Option<bool>,
}

const HELP_TEMPLATE: &str = r#"{name} {version}
{before-help}{about-with-newline}{usage-heading} {usage}
{after-help}

{all-args}
"#;

fn apply_help_template_recursively(cmd: &mut clap::Command) {
    let mut owned = std::mem::take(cmd);
    owned = owned.help_template(HELP_TEMPLATE);
    for sub in owned.get_subcommands_mut() {
        apply_help_template_recursively(sub);
    }
    *cmd = owned;
}

pub fn cli_command() -> clap::Command {
    let mut cmd = Opts::command();
    apply_help_template_recursively(&mut cmd);
    cmd
}

pub fn parse_opts() -> ParsedOpts {
    let cmd = cli_command();
    let matches = cmd.get_matches();
    let verbose_override = if matches.get_flag("verbose") {
        Some(true)
    } else {
        None
    };
    let opts = Opts::from_arg_matches(&matches).unwrap_or_else(|err| err.exit());
    ParsedOpts {
        opts,
        verbose_override,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Opts {
        let matches = cli_command().try_get_matches_from(args).unwrap();
        Opts::from_arg_matches(&matches).unwrap()
    }

    #[test]
    fn cli_definition_is_consistent() {
        cli_command().debug_assert();
    }

    #[test]
    fn parses_sync_tree_host_paths() {
        let opts = parse(&[
            "fleetd",
            "sync-tree",
            "origin:/home/user/alice/projects/demo",
            "archive:/backup/demo",
        ]);
        let Command::SyncTree {
            source,
            destination,
        } = opts.command
        else {
            panic!("expected sync-tree");
        };
        assert_eq!(source.role, HostRole::Origin);
        assert_eq!(destination.path, "/backup/demo");
    }

    #[test]
    fn run_keeps_trailing_command_words() {
        let opts = parse(&[
            "fleetd", "-v", "run", "-u", "alice", "-p", "demo", "-e", "py", "python", "train.py",
            "--epochs", "3",
        ]);
        assert!(opts.verbose);
        let Command::Run(job) = opts.command else {
            panic!("expected run");
        };
        let request = job.into_request();
        assert_eq!(request.command, "python train.py --epochs 3");
        assert_eq!(request.env, "py");
    }

    #[test]
    fn rejects_relative_host_path() {
        let err = cli_command()
            .try_get_matches_from(["fleetd", "sync-tree", "origin:rel", "archive:/x"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }
}
