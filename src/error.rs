use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunJenkinsError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Submission of job {job} rejected: {message}")]
    Submission { job: String, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Jenkins API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Build of {job} did not finish within {limit:?}")]
    Timeout { job: String, limit: Duration },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl RunJenkinsError {
    /// Lookup failures the poll loop absorbs: the build is not visible yet, or the
    /// server is momentarily unhealthy.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Api { status, .. } => *status >= 500,
            Self::Network(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, RunJenkinsError>;
