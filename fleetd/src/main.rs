// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::process::ExitCode;
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;

use fleetd::adapters::cli::{self, Command, EnvCommand};
use fleetd::adapters::connector::FleetConnector;
use fleetd::adapters::time::SystemClock;
use fleetd::app::errors::AppError;
use fleetd::app::usecases::UseCases;
use fleetd::app::usecases::supervisor::{RunState, RunSupervisor};
use fleetd::{config, logging};

fn log_config_report(report: &config::ConfigReport) {
    match (&report.config_path, report.config_path_source) {
        (Some(path), Some(source)) => {
            log::info!(
                "config path: {} (source={}, present={})",
                path.display(),
                source.as_str(),
                report.config_file_present
            );
        }
        (Some(path), None) => {
            log::info!(
                "config path: {} (present={})",
                path.display(),
                report.config_file_present
            );
        }
        (None, _) => {
            log::info!("config path: (none)");
        }
    }
    log::info!(
        "config command_timeout_secs: {} (source={})",
        report.command_timeout_secs.value,
        report.command_timeout_secs.source.as_str()
    );
    log::info!(
        "config connect_timeout_secs: {} (source={})",
        report.connect_timeout_secs.value,
        report.connect_timeout_secs.source.as_str()
    );
    log::info!(
        "config max_background_runs: {} (source={})",
        report.max_background_runs.value,
        report.max_background_runs.source.as_str()
    );
    log::info!(
        "config base_venv: {} (source={})",
        report.base_venv.value,
        report.base_venv.source.as_str()
    );
    log::info!(
        "config verbose: {} (source={})",
        report.verbose.value,
        report.verbose.source.as_str()
    );
    for (role, label) in &report.hosts {
        log::info!("config host {role}: {label}");
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::internal(format!("failed to encode result: {err}")))?;
    println!("{text}");
    Ok(())
}

async fn dispatch(usecases: UseCases, command: Command) -> Result<(), AppError> {
    match command {
        Command::SyncTree {
            source,
            destination,
        } => print_json(&usecases.sync_tree(&source, &destination).await?),
        Command::SyncMany { from, to, items } => {
            print_json(&usecases.sync_many(from, &items, &to).await?)
        }
        Command::Run(job) => {
            let supervisor = RunSupervisor::new(usecases);
            let run_id = supervisor.submit(job.into_request()).await?;
            log::info!("submitted run {run_id}");
            match supervisor.wait(&run_id).await? {
                RunState::Finished { report } => print_json(&report),
                RunState::Failed { error } => Err(error),
                other => print_json(&other),
            }
        }
        Command::Launch(job) => print_json(&usecases.launch_detached(job.into_request()).await?),
        Command::Alive { pid } => {
            let alive = usecases.is_alive(pid).await?;
            print_json(&json!({ "pid": pid, "alive": alive }))
        }
        Command::Reconcile {
            pid,
            user,
            project,
            run_id,
        } => print_json(&usecases.reconcile(pid, &user, &project, &run_id).await?),
        Command::Env(EnvCommand::Create { user, name }) => {
            print_json(&usecases.create_env(&user, &name).await?)
        }
        Command::Env(EnvCommand::List { user }) => print_json(&usecases.list_envs(&user).await?),
        Command::Env(EnvCommand::Delete { user, name }) => {
            usecases.delete_env(&user, &name).await?;
            print_json(&json!({ "deleted": name }))
        }
        Command::Env(EnvCommand::Exec { user, env, command }) => print_json(
            &usecases
                .exec_in_env(&user, env.as_deref(), &command.join(" "))
                .await?,
        ),
        Command::UserInit { user } => print_json(&usecases.init_user(&user).await?),
        Command::Log {
            user,
            project,
            file,
        } => print_json(&usecases.fetch_log(&user, &project, file.as_deref()).await?),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let parsed = cli::parse_opts();
    let opts = parsed.opts;
    let config::LoadResult { config, report } = config::load_with_report(
        opts.config,
        config::Overrides {
            command_timeout_secs: opts.command_timeout_secs,
            connect_timeout_secs: opts.connect_timeout_secs,
            max_background_runs: opts.max_background_runs,
            verbose: parsed.verbose_override,
        },
    )?;
    logging::init(config.verbose);
    log_config_report(&report);

    let fleet = Arc::new(config.fleet);
    let connector = Arc::new(FleetConnector::new(fleet.clone()));
    let usecases = UseCases::new(fleet, connector, Arc::new(SystemClock));

    match dispatch(usecases, opts.command).await {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(err) => {
            log::error!("{err}");
            print_json(&json!({
                "code": err.code(),
                "message": err.message(),
                "context": err.context(),
            }))?;
            Ok(ExitCode::FAILURE)
        }
    }
}
