// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{RwLock, Semaphore, watch};

use crate::app::errors::{AppError, AppResult};
use crate::app::types::{RunReport, RunRequest};

use super::UseCases;
use super::pipeline::validate_request;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    Queued,
    Running,
    Finished { report: Box<RunReport> },
    Failed { error: AppError },
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Finished { .. } | RunState::Failed { .. })
    }
}

/// Runs pipelines in the background, at most `max_background_runs` at a
/// time. Every run is watched by a monitor task, so a panicking run ends
/// up `Failed` instead of disappearing. Finished runs stay queryable until
/// `prune` drops them.
#[derive(Clone)]
pub struct RunSupervisor {
    usecases: UseCases,
    permits: Arc<Semaphore>,
    runs: Arc<RwLock<HashMap<String, watch::Receiver<RunState>>>>,
}

impl RunSupervisor {
    pub fn new(usecases: UseCases) -> Self {
        let limit = usecases.fleet.settings.max_background_runs.max(1);
        Self {
            usecases,
            permits: Arc::new(Semaphore::new(limit)),
            runs: Arc::default(),
        }
    }

    /// Queues a run and returns its id right away.
    pub async fn submit(&self, request: RunRequest) -> AppResult<String> {
        validate_request(&request)?;
        let run_id = self.usecases.run_ids.next(&request.project);
        let (tx, rx) = watch::channel(RunState::Queued);
        let tx = Arc::new(tx);
        self.runs.write().await.insert(run_id.clone(), rx);

        let worker = tokio::spawn({
            let usecases = self.usecases.clone();
            let permits = self.permits.clone();
            let tx = tx.clone();
            let run_id = run_id.clone();
            async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|_| AppError::internal("run supervisor is shut down"))?;
                tx.send_replace(RunState::Running);
                usecases.run_pipeline_as(request, run_id).await
            }
        });

        let monitored = run_id.clone();
        tokio::spawn(async move {
            let state = match worker.await {
                Ok(Ok(report)) => RunState::Finished {
                    report: Box::new(report),
                },
                Ok(Err(error)) => RunState::Failed { error },
                Err(err) => {
                    tracing::error!("run {monitored} aborted: {err}");
                    RunState::Failed {
                        error: AppError::internal(format!("run {monitored} aborted: {err}")),
                    }
                }
            };
            tx.send_replace(state);
        });

        tracing::info!("queued run {run_id}");
        Ok(run_id)
    }

    pub async fn status(&self, run_id: &str) -> Option<RunState> {
        self.runs
            .read()
            .await
            .get(run_id)
            .map(|rx| rx.borrow().clone())
    }

    /// Ids and current states of every submitted run, sorted by id.
    pub async fn runs(&self) -> Vec<(String, RunState)> {
        let mut runs: Vec<_> = self
            .runs
            .read()
            .await
            .iter()
            .map(|(id, rx)| (id.clone(), rx.borrow().clone()))
            .collect();
        runs.sort_by(|a, b| a.0.cmp(&b.0));
        runs
    }

    /// Waits until the run is finished or failed.
    pub async fn wait(&self, run_id: &str) -> AppResult<RunState> {
        let mut rx = self
            .runs
            .read()
            .await
            .get(run_id)
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("unknown run {run_id}")))?;
        let state = rx
            .wait_for(RunState::is_terminal)
            .await
            .map_err(|_| AppError::internal(format!("run {run_id} lost its monitor")))?;
        Ok(state.clone())
    }

    /// Drops finished and failed runs from the registry and returns how
    /// many were removed. Queued and running entries stay.
    pub async fn prune(&self) -> usize {
        let mut runs = self.runs.write().await;
        let before = runs.len();
        runs.retain(|_, rx| !rx.borrow().is_terminal());
        before - runs.len()
    }
}
