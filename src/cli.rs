use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{self, Credentials, DEFAULT_CREDENTIALS_FILE, DEFAULT_PLAN_FILE};
use crate::monitor::{PollSettings, DEFAULT_POLL_INTERVAL_SECONDS};
use crate::orchestrator::{Interrupt, Orchestrator, RunResult, RunStatus};
use crate::output::{self, RunProgress};
use crate::plan::{ExecutionPlan, Stage};
use crate::server::JenkinsClient;

/// Exit code used when the operator interrupts a run (128 + SIGINT).
const INTERRUPTED_EXIT_CODE: u8 = 130;

#[derive(Parser)]
#[command(name = "runjenkins")]
#[command(author, version, about = "Run predefined Jenkins jobs from a plan file", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// File holding the Jenkins url, user and password
    #[arg(long, global = true, env = "RUNJENKINS_CREDSFILE", default_value = DEFAULT_CREDENTIALS_FILE)]
    credsfile: PathBuf,

    /// Plan file listing the jobs to run
    #[arg(long, global = true, default_value = DEFAULT_PLAN_FILE)]
    conffile: PathBuf,

    /// Verbose logging
    #[arg(short, long, global = true, default_value_t = false)]
    pub debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the jobs of the plan file, stage by stage
    #[command(alias = "runbuild")]
    Run {
        /// Seconds between status lookups of a running build
        #[arg(short, long, default_value_t = DEFAULT_POLL_INTERVAL_SECONDS, value_parser = clap::value_parser!(u64).range(1..))]
        poll_interval: u64,

        /// Give up on a build after this many seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Do not open the failing build in a browser
        #[arg(long, default_value_t = false)]
        no_browser: bool,
    },
    /// Validate the plan file and show its stages without submitting anything
    Check,
}

impl Cli {
    async fn execute_run(
        &self,
        poll_interval: u64,
        timeout: Option<u64>,
        no_browser: bool,
    ) -> Result<ExitCode> {
        let plan = config::load_plan(&self.conffile)?;
        let credentials = Credentials::load(&self.credsfile)?;

        info!(
            "Running {} with Jenkins at {}",
            self.conffile.display(),
            credentials.url
        );

        let server = JenkinsClient::new(&credentials).context("Failed to set up Jenkins client")?;
        let settings = PollSettings::new(Duration::from_secs(poll_interval))
            .with_timeout(timeout.map(Duration::from_secs));

        let interrupt = Interrupt::new();
        let signal = interrupt.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    warn!("Received Ctrl-C, no longer waiting for builds");
                    signal.trigger();
                }
                Err(err) => error!("Failed to listen for Ctrl-C signal: {err}"),
            }
        });

        let orchestrator = Orchestrator::new(Arc::new(server), settings, RunProgress::new());
        let result = orchestrator.run(&plan, &interrupt).await;

        output::print_summary(&result, plan.job_count());

        if !no_browser {
            open_failed_build(&result);
        }

        Ok(ExitCode::from(exit_status(result.status())))
    }

    fn execute_check(&self) -> Result<ExitCode> {
        let plan = config::load_plan(&self.conffile)?;
        println!("{}", describe_plan(&plan));
        Ok(ExitCode::SUCCESS)
    }

    pub async fn execute(&self) -> Result<ExitCode> {
        match &self.command {
            Commands::Run {
                poll_interval,
                timeout,
                no_browser,
            } => {
                self.execute_run(*poll_interval, *timeout, *no_browser)
                    .await
            }
            Commands::Check => self.execute_check(),
        }
    }
}

fn open_failed_build(result: &RunResult) {
    let Some(url) = result
        .primary_failure()
        .and_then(|failure| failure.outcome.url())
    else {
        return;
    };

    info!("Opening {url}");
    if let Err(e) = open::that(url) {
        warn!("Failed to open browser: {e}");
    }
}

fn exit_status(status: RunStatus) -> u8 {
    match status {
        RunStatus::Succeeded => 0,
        RunStatus::Failed => 1,
        RunStatus::Interrupted => INTERRUPTED_EXIT_CODE,
    }
}

fn describe_plan(plan: &ExecutionPlan) -> String {
    let mut lines = Vec::new();
    for (position, stage) in plan.stages().iter().enumerate() {
        let number = position + 1;
        match stage {
            Stage::Single(job) => {
                lines.push(format!("{number}. {} {:?}", job.name, job.parameters));
            }
            Stage::Parallel { label, jobs } => {
                lines.push(format!(
                    "{number}. parallel{}",
                    label
                        .as_ref()
                        .map(|label| format!(" {label}"))
                        .unwrap_or_default()
                ));
                for (index, job) in jobs.iter().enumerate() {
                    lines.push(format!(
                        "   {number}.{} {} {:?}",
                        index + 1,
                        job.name,
                        job.parameters
                    ));
                }
            }
        }
    }
    lines.push(format!(
        "{} job(s) in {} stage(s)",
        plan.job_count(),
        plan.stages().len()
    ));
    lines.join("\n")
}
