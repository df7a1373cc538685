//! Scripted in-memory [`JobServer`] for monitor and orchestrator tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{BuildStatus, JobServer};
use crate::error::{Result, RunJenkinsError};
use crate::plan::Parameters;

/// One scripted reply to a status lookup.
#[derive(Debug, Clone)]
pub enum Reply {
    NotFound,
    Unavailable,
    Denied,
    Building,
    Finished(&'static str),
}

/// Something the fake observed, in call order across all jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    NextBuildNumber(String),
    Submit(String, Parameters),
    Status(String, u64),
}

#[derive(Default)]
struct State {
    next_numbers: HashMap<String, VecDeque<u64>>,
    counters: HashMap<String, u64>,
    replies: HashMap<String, VecDeque<Reply>>,
    build_replies: HashMap<(String, u64), VecDeque<Reply>>,
    rejected: Vec<String>,
    calls: Vec<Call>,
}

/// Jobs not given a script finish with `SUCCESS` on the first lookup. The last
/// scripted reply of a job repeats once the script is exhausted.
#[derive(Default)]
pub struct ScriptedServer {
    state: Mutex<State>,
    reported_number: Option<u64>,
}

impl ScriptedServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A server whose submissions report `number` directly.
    pub fn reporting(number: u64) -> Self {
        Self {
            state: Mutex::default(),
            reported_number: Some(number),
        }
    }

    pub fn script(self, job: &str, replies: Vec<Reply>) -> Self {
        self.state
            .lock()
            .unwrap()
            .replies
            .insert(job.to_string(), replies.into());
        self
    }

    /// Replies for one build of `job`; they take precedence over [`Self::script`].
    pub fn script_build(self, job: &str, number: u64, replies: Vec<Reply>) -> Self {
        self.state
            .lock()
            .unwrap()
            .build_replies
            .insert((job.to_string(), number), replies.into());
        self
    }

    /// Behave like Jenkins for `job`: the next build number starts at `first`
    /// and advances with each submission. Reading it yields to the scheduler,
    /// as a network round trip would.
    pub fn counting(self, job: &str, first: u64) -> Self {
        self.state
            .lock()
            .unwrap()
            .counters
            .insert(job.to_string(), first);
        self
    }

    pub fn next_numbers(self, job: &str, numbers: Vec<u64>) -> Self {
        self.state
            .lock()
            .unwrap()
            .next_numbers
            .insert(job.to_string(), numbers.into());
        self
    }

    pub fn reject(self, job: &str) -> Self {
        self.state.lock().unwrap().rejected.push(job.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn submitted(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Submit(job, _) => Some(job),
                _ => None,
            })
            .collect()
    }

    pub fn url(job: &str, number: u64) -> String {
        format!("http://jenkins.test/job/{job}/{number}/")
    }
}

#[async_trait]
impl JobServer for ScriptedServer {
    async fn next_build_number(&self, job: &str) -> Result<u64> {
        let (number, counting) = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(Call::NextBuildNumber(job.to_string()));
            if let Some(next) = state.counters.get(job) {
                (*next, true)
            } else {
                let numbers = state.next_numbers.entry(job.to_string()).or_default();
                let number = if numbers.len() > 1 {
                    numbers.pop_front()
                } else {
                    numbers.front().copied()
                };
                (number.unwrap_or(1), false)
            }
        };

        if counting {
            tokio::task::yield_now().await;
        }
        Ok(number)
    }

    async fn submit_job(&self, job: &str, parameters: &Parameters) -> Result<Option<u64>> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(Call::Submit(job.to_string(), parameters.clone()));
        if state.rejected.iter().any(|rejected| rejected == job) {
            return Err(RunJenkinsError::Submission {
                job: job.to_string(),
                message: "status 400: rejected".to_string(),
            });
        }
        if let Some(next) = state.counters.get_mut(job) {
            *next += 1;
        }
        Ok(self.reported_number)
    }

    async fn build_status(&self, job: &str, number: u64) -> Result<BuildStatus> {
        let reply = {
            let mut guard = self.state.lock().unwrap();
            let state = &mut *guard;
            state.calls.push(Call::Status(job.to_string(), number));
            let scripted = match state.build_replies.get_mut(&(job.to_string(), number)) {
                Some(replies) => next_reply(replies),
                None => state.replies.get_mut(job).and_then(next_reply),
            };
            scripted.unwrap_or(Reply::Finished("SUCCESS"))
        };

        let url = Self::url(job, number);
        match reply {
            Reply::NotFound => Err(RunJenkinsError::NotFound(format!("build {job} #{number}"))),
            Reply::Unavailable => Err(RunJenkinsError::Api {
                status: 503,
                message: "unavailable".to_string(),
            }),
            Reply::Denied => Err(RunJenkinsError::Api {
                status: 403,
                message: "denied".to_string(),
            }),
            Reply::Building => Ok(BuildStatus {
                building: true,
                result: None,
                url,
            }),
            Reply::Finished(result) => Ok(BuildStatus {
                building: false,
                result: Some(result.to_string()),
                url,
            }),
        }
    }

    fn reports_build_number(&self) -> bool {
        self.reported_number.is_some()
    }
}

fn next_reply(replies: &mut VecDeque<Reply>) -> Option<Reply> {
    if replies.len() > 1 {
        replies.pop_front()
    } else {
        replies.front().cloned()
    }
}
