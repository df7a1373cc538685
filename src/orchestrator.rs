use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use log::{error, info, warn};
use tokio::time::timeout;

use crate::monitor::{self, BuildNumberClaims, BuildOutcome, PollSettings};
use crate::output::RunProgress;
use crate::plan::{ExecutionPlan, JobMarker, Stage};
use crate::server::JobServer;

/// Longest stretch the orchestrator waits on running jobs before checking for
/// an interrupt.
pub const WAIT_GRANULARITY: Duration = Duration::from_millis(250);

/// Operator interrupt, set from the signal handler and checked between waits.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of one job together with where it sat in the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub marker: JobMarker,
    pub job_name: String,
    pub outcome: BuildOutcome,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Succeeded,
    Failed,
    Interrupted,
}

/// Everything observed during a run, in completion order.
#[derive(Debug, Clone, Default)]
pub struct RunResult {
    completed: Vec<JobReport>,
    interrupted: bool,
}

impl RunResult {
    pub fn completed(&self) -> &[JobReport] {
        &self.completed
    }

    /// Every job that did not succeed, earliest finisher first.
    pub fn failures(&self) -> Vec<&JobReport> {
        self.completed
            .iter()
            .filter(|report| !report.outcome.is_success())
            .collect()
    }

    /// The failure the run is attributed to: the first one to complete.
    pub fn primary_failure(&self) -> Option<&JobReport> {
        self.completed
            .iter()
            .find(|report| !report.outcome.is_success())
    }

    pub fn status(&self) -> RunStatus {
        if self.interrupted {
            RunStatus::Interrupted
        } else if self.primary_failure().is_some() {
            RunStatus::Failed
        } else {
            RunStatus::Succeeded
        }
    }
}

/// Runs an execution plan stage by stage against one server.
pub struct Orchestrator {
    server: Arc<dyn JobServer>,
    settings: PollSettings,
    progress: RunProgress,
    claims: BuildNumberClaims,
}

impl Orchestrator {
    pub fn new(server: Arc<dyn JobServer>, settings: PollSettings, progress: RunProgress) -> Self {
        Self {
            server,
            settings,
            progress,
            claims: BuildNumberClaims::new(),
        }
    }

    /// Execute `plan`, stopping after the first stage that has a failing job.
    ///
    /// Every job of a parallel stage is awaited, even after a sibling failed.
    /// When `interrupt` fires, jobs still running are abandoned (the remote
    /// builds keep going) and the partial result is returned.
    pub async fn run(&self, plan: &ExecutionPlan, interrupt: &Interrupt) -> RunResult {
        let mut result = RunResult::default();
        let stage_count = plan.stages().len();

        info!(
            "Running {} job(s) in {} stage(s)",
            plan.job_count(),
            stage_count
        );

        for (position, stage) in plan.stages().iter().enumerate() {
            let number = position + 1;
            let succeeded = self.run_stage(number, stage, interrupt, &mut result).await;

            if result.interrupted {
                warn!("Interrupted during stage {number}/{stage_count}, builds already submitted keep running");
                break;
            }

            if !succeeded {
                let skipped = stage_count - number;
                if skipped > 0 {
                    warn!("Stage {number} failed, skipping {skipped} remaining stage(s)");
                }
                break;
            }
        }

        result
    }

    /// Returns whether every job of the stage succeeded.
    async fn run_stage(
        &self,
        number: usize,
        stage: &Stage,
        interrupt: &Interrupt,
        result: &mut RunResult,
    ) -> bool {
        match stage {
            Stage::Single(job) => info!("Stage {number}: {}", job.name),
            Stage::Parallel { label, jobs } => info!(
                "Stage {number}: {} job(s) in parallel{}",
                jobs.len(),
                label
                    .as_ref()
                    .map(|label| format!(" ({label})"))
                    .unwrap_or_default()
            ),
        }

        let server: &dyn JobServer = self.server.as_ref();
        let settings = &self.settings;
        let claims = &self.claims;

        let mut pending: FuturesUnordered<_> = stage
            .jobs()
            .iter()
            .enumerate()
            .map(|(index, job)| {
                let marker = if stage.is_parallel() {
                    JobMarker::parallel(number, index + 1)
                } else {
                    JobMarker::single(number)
                };
                let mut progress = self.progress.job(marker, &job.name);

                async move {
                    let outcome = monitor::run(job, server, settings, claims, &mut progress).await;
                    JobReport {
                        marker,
                        job_name: job.name.clone(),
                        outcome,
                        finished_at: Utc::now(),
                    }
                }
            })
            .collect();

        let mut stage_failures = 0;

        while !pending.is_empty() {
            if interrupt.is_triggered() {
                result.interrupted = true;
                return false;
            }

            match timeout(WAIT_GRANULARITY, pending.next()).await {
                Ok(Some(report)) => {
                    if !report.outcome.is_success() {
                        stage_failures += 1;
                        error!(
                            "[{}] Job {} failed: {}",
                            report.marker,
                            report.job_name,
                            describe(&report.outcome)
                        );
                    }
                    result.completed.push(report);
                }
                Ok(None) => break,
                Err(_) => {}
            }
        }

        if stage_failures > 1 {
            warn!("Stage {number}: {stage_failures} jobs failed");
        }

        stage_failures == 0
    }
}

fn describe(outcome: &BuildOutcome) -> String {
    match outcome {
        BuildOutcome::Success => "SUCCESS".to_string(),
        BuildOutcome::Failed { result, url } => format!("{result} ({url})"),
        BuildOutcome::Error(cause) => cause.clone(),
    }
}
