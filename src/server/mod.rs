mod jenkins;

#[cfg(test)]
pub mod fake;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::plan::Parameters;

pub use jenkins::JenkinsClient;

/// Result code Jenkins reports for a build that passed.
pub const SUCCESS_RESULT: &str = "SUCCESS";

/// Status of one build as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStatus {
    pub building: bool,
    pub result: Option<String>,
    pub url: String,
}

/// The operations the build monitor needs from a CI server.
///
/// Implementations are shared by every job of a parallel stage, so they must be
/// safe to call concurrently.
#[async_trait]
pub trait JobServer: Send + Sync {
    /// Number the server will assign to the next build of `job`.
    async fn next_build_number(&self, job: &str) -> Result<u64>;

    /// Queues a build of `job`. Returns the build number when the server
    /// reports one at submission time.
    async fn submit_job(&self, job: &str, parameters: &Parameters) -> Result<Option<u64>>;

    /// Fetches the status of build `number` of `job`. Fails with
    /// [`crate::error::RunJenkinsError::NotFound`] while the build is not visible yet.
    async fn build_status(&self, job: &str, number: u64) -> Result<BuildStatus>;

    /// Whether [`JobServer::submit_job`] always returns the build number, which
    /// makes the next-build-number lookup unnecessary.
    fn reports_build_number(&self) -> bool {
        false
    }
}
