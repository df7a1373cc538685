//! Drives one job from submission to a terminal outcome.
//!
//! The build number polled is normally the job's `nextBuildNumber`, read just
//! before submitting. That read is racy: if another build of the same job is
//! queued between the read and the submission (another run, or a job that
//! triggers this one), the monitor follows that other build. Servers that
//! report the build number from the submission itself skip the read.
//!
//! Submissions made by this process never collide with each other: see
//! [`BuildNumberClaims`].

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::debug;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{sleep, Instant};

use crate::error::{Result, RunJenkinsError};
use crate::output::JobProgress;
use crate::plan::JobSpec;
use crate::server::{JobServer, SUCCESS_RESULT};

pub const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 15;

/// Lookup cadence until a submitted build first shows up.
pub const VISIBILITY_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Delay between lookups once the build is visible
    pub poll_interval: Duration,
    /// Delay between lookups before the build is visible
    pub visibility_interval: Duration,
    /// Give up on a build after this long
    pub timeout: Option<Duration>,
}

impl PollSettings {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            visibility_interval: VISIBILITY_POLL_INTERVAL,
            timeout: None,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_POLL_INTERVAL_SECONDS))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildNumberSource {
    /// `nextBuildNumber` read before submitting; may belong to another build.
    NextBuildHint,
    /// Returned by the server for this submission.
    Reported,
}

impl fmt::Display for BuildNumberSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NextBuildHint => write!(f, "next build number hint"),
            Self::Reported => write!(f, "reported by server"),
        }
    }
}

/// The build a submission is believed to have produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildHandle {
    pub job_name: String,
    pub build_number: u64,
    pub source: BuildNumberSource,
}

/// Build numbers handed out during a run, per job name.
///
/// A job's read-then-submit runs under that job's lock, and a hint at or
/// below the last number claimed for the job is bumped past it. Two runs of
/// the same job in one parallel stage therefore follow two different builds,
/// even while Jenkins still reports the old `nextBuildNumber` for a build
/// sitting in the queue.
#[derive(Debug, Default)]
pub struct BuildNumberClaims {
    jobs: Mutex<HashMap<String, Arc<AsyncMutex<Option<u64>>>>>,
}

impl BuildNumberClaims {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, job: &str) -> Arc<AsyncMutex<Option<u64>>> {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(jobs.entry(job.to_string()).or_default())
    }
}

/// Terminal verdict for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Success,
    /// The build finished with a result other than `SUCCESS`.
    Failed { result: String, url: String },
    /// The job could not be submitted or followed.
    Error(String),
}

impl BuildOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Failed { url, .. } => Some(url),
            _ => None,
        }
    }

    /// Result code as Jenkins names it, or `ERROR` if there is no build result.
    pub fn result(&self) -> &str {
        match self {
            Self::Success => SUCCESS_RESULT,
            Self::Failed { result, .. } => result,
            Self::Error(_) => "ERROR",
        }
    }
}

/// Submit `job` and follow the build until it finishes.
///
/// Never returns early on lookup misses: a build that is not visible yet is
/// polled at [`PollSettings::visibility_interval`], and a visible build that
/// briefly disappears is reported and polled again.
pub async fn run(
    job: &JobSpec,
    server: &dyn JobServer,
    settings: &PollSettings,
    claims: &BuildNumberClaims,
    progress: &mut JobProgress,
) -> BuildOutcome {
    let outcome = match submit(job, server, claims).await {
        Ok(handle) => {
            progress.submitted(&handle);
            poll(job, &handle, server, settings, progress).await
        }
        Err(e) => BuildOutcome::Error(e.to_string()),
    };

    progress.finished(&outcome);
    outcome
}

/// Queue a build of `job` and work out which build number it will get.
pub async fn submit(
    job: &JobSpec,
    server: &dyn JobServer,
    claims: &BuildNumberClaims,
) -> Result<BuildHandle> {
    let slot = claims.slot(&job.name);
    let mut last_claimed = slot.lock().await;

    let hint = if server.reports_build_number() {
        None
    } else {
        let next = server.next_build_number(&job.name).await?;
        Some(match *last_claimed {
            Some(last) if next <= last => {
                debug!(
                    "{} reports next build #{next}, but #{last} is already followed; expecting #{}",
                    job.name,
                    last + 1
                );
                last + 1
            }
            _ => next,
        })
    };

    let reported = server.submit_job(&job.name, &job.parameters).await?;

    let handle = match (reported, hint) {
        (Some(build_number), _) => BuildHandle {
            job_name: job.name.clone(),
            build_number,
            source: BuildNumberSource::Reported,
        },
        (None, Some(build_number)) => {
            debug!(
                "Assuming submission of {} produced build #{}",
                job.name, build_number
            );
            BuildHandle {
                job_name: job.name.clone(),
                build_number,
                source: BuildNumberSource::NextBuildHint,
            }
        }
        (None, None) => {
            return Err(RunJenkinsError::Submission {
                job: job.name.clone(),
                message: "server did not report a build number".to_string(),
            })
        }
    };

    *last_claimed = Some(match *last_claimed {
        Some(last) => last.max(handle.build_number),
        None => handle.build_number,
    });
    Ok(handle)
}

/// Poll a submitted build until it reaches a terminal outcome.
pub async fn poll(
    job: &JobSpec,
    handle: &BuildHandle,
    server: &dyn JobServer,
    settings: &PollSettings,
    progress: &mut JobProgress,
) -> BuildOutcome {
    let started = Instant::now();
    let mut visible = false;

    loop {
        if let Some(limit) = settings.timeout {
            if started.elapsed() >= limit {
                return BuildOutcome::Error(
                    RunJenkinsError::Timeout {
                        job: handle.job_name.clone(),
                        limit,
                    }
                    .to_string(),
                );
            }
        }

        let delay = match server
            .build_status(&handle.job_name, handle.build_number)
            .await
        {
            Ok(status) => {
                if !visible {
                    visible = true;
                    progress.started(&job.parameters, &status.url);
                }

                if !status.building {
                    return match status.result {
                        Some(result) if result == SUCCESS_RESULT => BuildOutcome::Success,
                        result => BuildOutcome::Failed {
                            result: result.unwrap_or_else(|| "UNKNOWN".to_string()),
                            url: status.url,
                        },
                    };
                }

                progress.polled();
                settings.poll_interval
            }
            Err(e) if e.is_transient() => {
                if visible {
                    progress.anomaly(&e);
                    settings.poll_interval
                } else {
                    progress.waiting();
                    settings.visibility_interval
                }
            }
            Err(e) => return BuildOutcome::Error(e.to_string()),
        };

        sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{JobMarker, Parameters};
    use crate::server::fake::{Call, Reply, ScriptedServer};

    fn job(name: &str) -> JobSpec {
        let mut parameters = Parameters::new();
        parameters.insert("key".to_string(), "value".to_string());
        JobSpec::new(name, parameters)
    }

    fn progress(name: &str) -> JobProgress {
        JobProgress::hidden(JobMarker::single(1), name)
    }

    async fn run_job(job: &JobSpec, server: &ScriptedServer) -> BuildOutcome {
        run(
            job,
            server,
            &PollSettings::default(),
            &BuildNumberClaims::new(),
            &mut progress(&job.name),
        )
        .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_success() {
        let server = ScriptedServer::new().next_numbers("testjob", vec![10]);
        let testjob = job("testjob");

        let outcome = run_job(&testjob, &server).await;

        assert_eq!(outcome, BuildOutcome::Success);
        assert_eq!(
            server.calls(),
            vec![
                Call::NextBuildNumber("testjob".to_string()),
                Call::Submit("testjob".to_string(), testjob.parameters.clone()),
                Call::Status("testjob".to_string(), 10),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_before_visible_is_not_a_failure() {
        let server = ScriptedServer::new().next_numbers("testjob", vec![4]).script(
            "testjob",
            vec![Reply::NotFound, Reply::NotFound, Reply::Finished("FAILURE")],
        );

        let outcome = run_job(&job("testjob"), &server).await;

        assert_eq!(
            outcome,
            BuildOutcome::Failed {
                result: "FAILURE".to_string(),
                url: ScriptedServer::url("testjob", 4),
            }
        );
        let lookups = server
            .calls()
            .into_iter()
            .filter(|call| matches!(call, Call::Status(..)))
            .count();
        assert_eq!(lookups, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pre_visible_lookups_use_short_interval() {
        let server = ScriptedServer::new().script(
            "testjob",
            vec![Reply::NotFound, Reply::Unavailable, Reply::Finished("SUCCESS")],
        );

        let started = Instant::now();
        let outcome = run_job(&job("testjob"), &server).await;

        assert!(outcome.is_success());
        assert!(started.elapsed() >= VISIBILITY_POLL_INTERVAL * 2);
        assert!(started.elapsed() < Duration::from_secs(DEFAULT_POLL_INTERVAL_SECONDS));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_miss_after_visible_keeps_polling() {
        let server = ScriptedServer::new().script(
            "testjob",
            vec![
                Reply::Building,
                Reply::NotFound,
                Reply::Building,
                Reply::Finished("SUCCESS"),
            ],
        );

        let started = Instant::now();
        let outcome = run_job(&job("testjob"), &server).await;

        assert_eq!(outcome, BuildOutcome::Success);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(DEFAULT_POLL_INTERVAL_SECONDS * 3));
        assert!(elapsed < Duration::from_secs(DEFAULT_POLL_INTERVAL_SECONDS * 4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unstable_result_is_a_failure() {
        let server = ScriptedServer::new()
            .script("testjob", vec![Reply::Building, Reply::Finished("UNSTABLE")]);

        let outcome = run_job(&job("testjob"), &server).await;

        assert_eq!(outcome.result(), "UNSTABLE");
        assert_eq!(outcome.url(), Some(ScriptedServer::url("testjob", 1).as_str()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_submission_is_an_error() {
        let server = ScriptedServer::new().reject("testjob");

        let outcome = run_job(&job("testjob"), &server).await;

        let BuildOutcome::Error(cause) = outcome else {
            panic!("expected an error outcome");
        };
        assert!(cause.contains("testjob"));
        assert!(!server
            .calls()
            .iter()
            .any(|call| matches!(call, Call::Status(..))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_denied_lookup_is_an_error() {
        let server = ScriptedServer::new().script("testjob", vec![Reply::Denied]);

        let outcome = run_job(&job("testjob"), &server).await;

        assert!(matches!(outcome, BuildOutcome::Error(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_ends_a_stuck_build() {
        let server = ScriptedServer::new().script("testjob", vec![Reply::Building]);
        let settings = PollSettings::default().with_timeout(Some(Duration::from_secs(60)));

        let outcome = run(
            &job("testjob"),
            &server,
            &settings,
            &BuildNumberClaims::new(),
            &mut progress("testjob"),
        )
        .await;

        let BuildOutcome::Error(cause) = outcome else {
            panic!("expected a timeout");
        };
        assert!(cause.contains("did not finish"));
    }

    #[tokio::test]
    async fn test_reported_build_number_skips_hint() {
        let server = ScriptedServer::reporting(77);

        let handle = submit(&job("testjob"), &server, &BuildNumberClaims::new())
            .await
            .unwrap();

        assert_eq!(handle.build_number, 77);
        assert_eq!(handle.source, BuildNumberSource::Reported);
        assert!(!server
            .calls()
            .iter()
            .any(|call| matches!(call, Call::NextBuildNumber(_))));
    }

    #[tokio::test]
    async fn test_each_submission_gets_its_own_handle() {
        let server = ScriptedServer::new().next_numbers("testjob", vec![10, 11]);
        let testjob = job("testjob");

        let claims = BuildNumberClaims::new();

        let first = submit(&testjob, &server, &claims).await.unwrap();
        let second = submit(&testjob, &server, &claims).await.unwrap();

        assert_eq!(first.build_number, 10);
        assert_eq!(second.build_number, 11);
        assert_eq!(first.source, BuildNumberSource::NextBuildHint);
        assert_ne!(first, second);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_trail_and_single_start() {
        let server = ScriptedServer::new().script(
            "testjob",
            vec![
                Reply::NotFound,
                Reply::Building,
                Reply::NotFound,
                Reply::Finished("SUCCESS"),
            ],
        );
        let mut progress = progress("testjob");

        let outcome = run(
            &job("testjob"),
            &server,
            &PollSettings::default(),
            &BuildNumberClaims::new(),
            &mut progress,
        )
        .await;

        assert!(outcome.is_success());
        assert_eq!(progress.trail(), "x.!");
        assert_eq!(progress.announcements(), 1);
    }

    #[tokio::test]
    async fn test_stale_hint_is_not_claimed_twice() {
        let server = ScriptedServer::new().next_numbers("deploy", vec![7]);
        let claims = BuildNumberClaims::new();

        let first = submit(&job("deploy"), &server, &claims).await.unwrap();
        let second = submit(&job("deploy"), &server, &claims).await.unwrap();
        let other = submit(&job("lint"), &server, &claims).await.unwrap();

        assert_eq!(first.build_number, 7);
        assert_eq!(second.build_number, 8);
        assert_eq!(other.build_number, 1);
    }

    #[tokio::test]
    async fn test_concurrent_submissions_of_one_job_do_not_interleave() {
        let server = ScriptedServer::new().counting("deploy", 1);
        let claims = BuildNumberClaims::new();
        let a = job("deploy");
        let b = job("deploy");

        let (first, second) = tokio::join!(
            submit(&a, &server, &claims),
            submit(&b, &server, &claims)
        );

        let mut numbers = vec![first.unwrap().build_number, second.unwrap().build_number];
        numbers.sort_unstable();
        assert_eq!(numbers, vec![1, 2]);

        let sequence: Vec<_> = server
            .calls()
            .into_iter()
            .map(|call| match call {
                Call::NextBuildNumber(_) => "read",
                Call::Submit(..) => "submit",
                Call::Status(..) => "status",
            })
            .collect();
        assert_eq!(sequence, vec!["read", "submit", "read", "submit"]);
    }
}
