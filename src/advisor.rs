//! Advisory analyze → plan → execute pipeline.
//!
//! Three staged tasks connected by bounded channels consume the monitor's
//! snapshot stream and end in log output. The pipeline is a pure observer:
//! nothing here feeds back into routing.

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::types::BackendMetrics;

const STAGE_CHANNEL_CAPACITY: usize = 10;

/// Verdict the analyzer assigns to one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackendStatus {
    Healthy,
    Degraded,
    Down,
}

/// Remediation the planner proposes for one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlannedAction {
    AttemptRestart,
    ThrottleTraffic,
    EnsureActive,
    NoOp,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub backend_id: usize,
    pub status: BackendStatus,
    pub reason: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanResult {
    pub backend_id: usize,
    pub action: PlannedAction,
}

/// Wire the three stages together and run them until cancellation.
pub fn start_advisory_pipeline(
    updates: mpsc::Receiver<Vec<BackendMetrics>>,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let (analysis_tx, analysis_rx) = mpsc::channel(STAGE_CHANNEL_CAPACITY);
    let (plan_tx, plan_rx) = mpsc::channel(STAGE_CHANNEL_CAPACITY);

    vec![
        spawn_analyzer(updates, analysis_tx, cancel.clone()),
        spawn_planner(analysis_rx, plan_tx, cancel.clone()),
        spawn_executor(plan_rx, cancel),
    ]
}

fn spawn_analyzer(
    mut updates: mpsc::Receiver<Vec<BackendMetrics>>,
    out: mpsc::Sender<Vec<AnalysisResult>>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("analyzer started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                batch = updates.recv() => {
                    let Some(metrics) = batch else { return };
                    let results = analyze_batch(&metrics);
                    if results.is_empty() {
                        continue;
                    }
                    if out.try_send(results).is_err() {
                        warn!("analysis channel full, dropping batch");
                    }
                }
            }
        }
    })
}

fn analyze_batch(metrics: &[BackendMetrics]) -> Vec<AnalysisResult> {
    let mut results = Vec::with_capacity(metrics.len());
    for metric in metrics {
        let (status, reason) = if !metric.alive {
            (BackendStatus::Down, "connection refused or timeout")
        } else if metric.error_rate > 0.5 {
            (BackendStatus::Degraded, "error rate above 50%")
        } else {
            (BackendStatus::Healthy, "nominal")
        };

        match status {
            BackendStatus::Down => info!(backend_id = metric.id, "backend is down"),
            BackendStatus::Degraded => info!(backend_id = metric.id, "backend is degraded"),
            BackendStatus::Healthy => debug!(backend_id = metric.id, "backend is healthy"),
        }

        results.push(AnalysisResult {
            backend_id: metric.id,
            status,
            reason,
        });
    }
    results
}

fn spawn_planner(
    mut analyses: mpsc::Receiver<Vec<AnalysisResult>>,
    out: mpsc::Sender<Vec<PlanResult>>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("planner started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                batch = analyses.recv() => {
                    let Some(analysis) = batch else { return };
                    let plan = plan_batch(&analysis);
                    if plan.is_empty() {
                        continue;
                    }
                    if out.try_send(plan).is_err() {
                        warn!("plan channel full, dropping batch");
                    }
                }
            }
        }
    })
}

fn plan_batch(analysis: &[AnalysisResult]) -> Vec<PlanResult> {
    let mut plan = Vec::with_capacity(analysis.len());
    for item in analysis {
        let action = match item.status {
            BackendStatus::Down => {
                info!(
                    backend_id = item.backend_id,
                    reason = item.reason,
                    "planning restart for backend"
                );
                PlannedAction::AttemptRestart
            }
            BackendStatus::Degraded => {
                info!(
                    backend_id = item.backend_id,
                    reason = item.reason,
                    "planning traffic throttle for backend"
                );
                PlannedAction::ThrottleTraffic
            }
            BackendStatus::Healthy => PlannedAction::EnsureActive,
        };

        plan.push(PlanResult {
            backend_id: item.backend_id,
            action,
        });
    }
    plan
}

fn spawn_executor(
    mut plans: mpsc::Receiver<Vec<PlanResult>>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("executor started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                batch = plans.recv() => {
                    let Some(plan) = batch else { return };
                    // Execution is advisory only: the plan is logged, nothing
                    // is applied to routing.
                    info!(plan = ?plan, "executing advisory plan");
                }
            }
        }
    })
}
