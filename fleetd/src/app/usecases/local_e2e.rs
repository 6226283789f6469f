// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Whole-engine runs against the local transport: every role is a directory
//! under one temporary root and commands run through `sh`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::connector::FleetConnector;
use crate::app::errors::AppErrorKind;
use crate::app::services::random;
use crate::app::types::{HostPath, HostRole, ReconcileOutcome, RunRequest, RunStage};

use super::UseCases;
use super::test_support::{fleet, usecases};

fn tools_available(tools: &[&str]) -> bool {
    tools.iter().all(|tool| {
        std::process::Command::new("sh")
            .arg("-c")
            .arg(format!("command -v {tool}"))
            .output()
            .map(|out| out.status.success())
            .unwrap_or(false)
    })
}

struct LocalFleet {
    _root: tempfile::TempDir,
    root: String,
    usecases: UseCases,
}

impl LocalFleet {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let root_str = root.path().to_str().unwrap().to_string();
        let fleet = fleet(&root_str);
        let connector = Arc::new(FleetConnector::new(Arc::new(fleet.clone())));
        Self {
            usecases: usecases(fleet, connector),
            root: root_str,
            _root: root,
        }
    }

    fn path(&self, role: HostRole, rel: &str) -> String {
        format!("{}/{role}/{rel}", self.root)
    }

    fn write(&self, role: HostRole, rel: &str, text: &str) {
        let path = self.path(role, rel);
        std::fs::create_dir_all(Path::new(&path).parent().unwrap()).unwrap();
        std::fs::write(path, text).unwrap();
    }

    /// A project on origin and an empty environment on compute.
    fn seed_job(&self, project: &str) {
        self.write(
            HostRole::Origin,
            &format!("alice/projects/{project}/main.sh"),
            "echo from-script\n",
        );
        self.write(HostRole::Compute, "alice/envs/py/bin/activate", "");
    }
}

fn request(project: &str, command: &str) -> RunRequest {
    RunRequest {
        username: "alice".to_string(),
        project: project.to_string(),
        env: "py".to_string(),
        command: command.to_string(),
    }
}

#[tokio::test]
async fn sync_tree_replaces_destination() {
    let fleet = LocalFleet::new();
    fleet.write(HostRole::Origin, "data/a.txt", "alpha");
    fleet.write(HostRole::Origin, "data/nested/b.txt", "beta");
    fleet.write(HostRole::Archive, "copy/stale.txt", "old");

    let report = fleet
        .usecases
        .sync_tree(
            &HostPath::new(HostRole::Origin, fleet.path(HostRole::Origin, "data")),
            &HostPath::new(HostRole::Archive, fleet.path(HostRole::Archive, "copy")),
        )
        .await
        .unwrap();

    assert_eq!(report.files_copied, 2);
    assert_eq!(report.bytes_copied, 9);
    let copy = fleet.path(HostRole::Archive, "copy");
    assert!(!Path::new(&format!("{copy}/stale.txt")).exists());
    assert_eq!(
        std::fs::read_to_string(format!("{copy}/nested/b.txt")).unwrap(),
        "beta"
    );
}

#[tokio::test]
async fn same_host_overlap_leaves_source_alone() {
    let fleet = LocalFleet::new();
    fleet.write(HostRole::Origin, "data/a.txt", "alpha");
    let data = fleet.path(HostRole::Origin, "data");

    let err = fleet
        .usecases
        .sync_tree(
            &HostPath::new(HostRole::Origin, data.clone()),
            &HostPath::new(HostRole::Origin, format!("{data}/")),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), AppErrorKind::InvalidArgument);

    let err = fleet
        .usecases
        .sync_many(
            HostRole::Origin,
            &[format!("{data}/a.txt")],
            &HostPath::new(HostRole::Origin, data.clone()),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), AppErrorKind::InvalidArgument);

    assert_eq!(
        std::fs::read_to_string(format!("{data}/a.txt")).unwrap(),
        "alpha"
    );
}

#[tokio::test]
async fn sync_many_is_best_effort() {
    let fleet = LocalFleet::new();
    fleet.write(HostRole::Origin, "in/report.csv", "1,2\n");
    fleet.write(HostRole::Origin, "in/models/w.bin", "weights");
    let items = vec![
        fleet.path(HostRole::Origin, "in/report.csv"),
        fleet.path(HostRole::Origin, "in/models"),
        fleet.path(HostRole::Origin, "in/missing"),
    ];

    let report = fleet
        .usecases
        .sync_many(
            HostRole::Origin,
            &items,
            &HostPath::new(HostRole::Relay, fleet.path(HostRole::Relay, "out")),
        )
        .await
        .unwrap();

    assert!(!report.success);
    let ok: Vec<bool> = report.items.iter().map(|item| item.success).collect();
    assert_eq!(ok, vec![true, true, false]);
    let out = fleet.path(HostRole::Relay, "out");
    assert_eq!(
        std::fs::read_to_string(format!("{out}/report.csv")).unwrap(),
        "1,2\n"
    );
    assert_eq!(
        std::fs::read_to_string(format!("{out}/models/w.bin")).unwrap(),
        "weights"
    );
}

#[tokio::test]
async fn pipeline_runs_and_archives_locally() {
    if !tools_available(&["bash", "tee"]) {
        return;
    }
    let fleet = LocalFleet::new();
    fleet.seed_job("demo");

    let report = fleet
        .usecases
        .run_pipeline(request("demo", "bash main.sh"))
        .await
        .unwrap();

    assert_eq!(report.stage, RunStage::Done);
    assert!(report.success);
    assert_eq!(report.exit_code, Some(0));
    assert!(report.stdout.contains("from-script"));
    assert!(report.archived);
    let log = std::fs::read_to_string(&report.log_file).unwrap();
    assert!(log.starts_with("+ bash main.sh\n"));
    assert!(log.contains("from-script"));
    assert!(Path::new(&format!("{}/main.sh", report.run_output_path)).exists());
}

#[tokio::test]
async fn failing_command_is_reported_and_archived() {
    if !tools_available(&["bash", "tee"]) {
        return;
    }
    let fleet = LocalFleet::new();
    fleet.seed_job("demo");

    let report = fleet
        .usecases
        .run_pipeline(request("demo", "echo partial; exit 3"))
        .await
        .unwrap();

    assert_eq!(report.stage, RunStage::Done);
    assert!(!report.success);
    assert_eq!(report.exit_code, Some(3));
    assert!(report.log_archived);
    let log = std::fs::read_to_string(&report.log_file).unwrap();
    assert!(log.starts_with("+ echo partial; exit 3\n"), "{log}");
    assert!(log.contains("partial\n"));
}

#[tokio::test]
async fn detached_job_is_tracked_and_reconciled() {
    if !tools_available(&["bash", "ps", "setsid", "nohup"]) {
        return;
    }
    let fleet = LocalFleet::new();
    let project = format!("e2e{}", random::token(8));
    fleet.seed_job(&project);

    let tracked = fleet
        .usecases
        .launch_detached(request(&project, "sleep 1; bash main.sh"))
        .await
        .unwrap();
    assert!(tracked.pid > 0);

    let mut finished = false;
    for _ in 0..50 {
        if !fleet.usecases.is_alive(tracked.pid).await.unwrap() {
            finished = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    assert!(finished, "detached job never finished");

    let outcome = fleet
        .usecases
        .reconcile(tracked.pid, "alice", &project, &tracked.run_id)
        .await
        .unwrap();
    let ReconcileOutcome::Archived { path, .. } = outcome else {
        panic!("expected archived, got {outcome:?}");
    };
    assert!(Path::new(&format!("{path}/main.sh")).exists());

    let again = fleet
        .usecases
        .reconcile(tracked.pid, "alice", &project, &tracked.run_id)
        .await
        .unwrap();
    assert_eq!(again, ReconcileOutcome::AlreadyArchived { path });

    let _ = std::fs::remove_file(&tracked.script_path);
    let _ = std::fs::remove_file(format!("/tmp/{project}_{}.log", tracked.pid));
}
