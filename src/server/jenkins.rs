use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::OnceCell;
use url::Url;

use super::{BuildStatus, JobServer};
use crate::config::Credentials;
use crate::error::{Result, RunJenkinsError};
use crate::plan::Parameters;

const REQUEST_TIMEOUT_SECONDS: u64 = 30;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Crumb {
    crumb: String,
    crumb_request_field: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobInfo {
    next_build_number: u64,
}

/// [`JobServer`] backed by the Jenkins JSON API.
///
/// A single `reqwest` client serves every concurrent job; requests carry basic
/// auth. The CSRF crumb is fetched once, before the first submission, and is
/// only valid within the web session it was issued for, so the client keeps
/// session cookies.
pub struct JenkinsClient {
    client: Client,
    base_url: Url,
    user: String,
    password: String,
    crumb: OnceCell<Option<Crumb>>,
}

impl JenkinsClient {
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the HTTP client cannot be built.
    pub fn new(credentials: &Credentials) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("runjenkins/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECONDS))
            .cookie_store(true)
            .build()
            .map_err(|e| RunJenkinsError::Config(format!("Failed to create HTTP client: {e}")))?;

        let mut base_url = Url::parse(&credentials.url)
            .map_err(|e| RunJenkinsError::Config(format!("Invalid Jenkins URL: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(RunJenkinsError::Config(format!(
                "Invalid Jenkins URL: {}",
                credentials.url
            )));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client,
            base_url,
            user: credentials.user.clone(),
            password: credentials.password.clone(),
            crumb: OnceCell::new(),
        })
    }

    /// URL under a job, handling folders: `team/deploy` becomes `job/team/job/deploy`.
    fn job_url(&self, job: &str, tail: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| RunJenkinsError::Config("Invalid Jenkins URL".to_string()))?;
            segments.pop_if_empty();
            for part in job.split('/').filter(|part| !part.is_empty()) {
                segments.push("job").push(part);
            }
            segments.extend(tail);
        }
        Ok(url)
    }

    fn authenticated(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth(&self.user, Some(&self.password))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, what: &str) -> Result<T> {
        debug!("GET {url}");
        let response = self.authenticated(self.client.get(url)).send().await?;
        let response = check_status(response, what).await?;
        Ok(response.json().await?)
    }

    async fn crumb(&self) -> Result<Option<&Crumb>> {
        self.crumb
            .get_or_try_init(|| self.fetch_crumb())
            .await
            .map(Option::as_ref)
    }

    async fn fetch_crumb(&self) -> Result<Option<Crumb>> {
        let url = self
            .base_url
            .join("crumbIssuer/api/json")
            .map_err(|e| RunJenkinsError::Config(format!("Invalid crumb issuer URL: {e}")))?;

        match self.get_json::<Crumb>(url, "crumb issuer").await {
            Ok(crumb) => Ok(Some(crumb)),
            Err(RunJenkinsError::NotFound(_)) => {
                debug!("Crumb issuer not available, submitting without CSRF crumb");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

async fn check_status(response: Response, what: &str) -> Result<Response> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(RunJenkinsError::NotFound(what.to_string()));
    }
    if !status.is_success() {
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read error response".to_string());
        return Err(RunJenkinsError::Api {
            status: status.as_u16(),
            message,
        });
    }
    Ok(response)
}

#[async_trait]
impl JobServer for JenkinsClient {
    async fn next_build_number(&self, job: &str) -> Result<u64> {
        let mut url = self.job_url(job, &["api", "json"])?;
        url.query_pairs_mut().append_pair("tree", "nextBuildNumber");

        let info: JobInfo = self.get_json(url, &format!("job {job}")).await?;
        Ok(info.next_build_number)
    }

    async fn submit_job(&self, job: &str, parameters: &Parameters) -> Result<Option<u64>> {
        let endpoint = if parameters.is_empty() {
            "build"
        } else {
            "buildWithParameters"
        };
        let mut url = self.job_url(job, &[endpoint])?;
        if !parameters.is_empty() {
            url.query_pairs_mut().extend_pairs(parameters.iter());
        }

        let mut request = self.authenticated(self.client.post(url.clone()));
        if let Some(crumb) = self.crumb().await? {
            request = request.header(crumb.crumb_request_field.as_str(), crumb.crumb.as_str());
        }

        debug!("POST {url}");
        let response = request
            .send()
            .await
            .map_err(|e| RunJenkinsError::Submission {
                job: job.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RunJenkinsError::Submission {
                job: job.to_string(),
                message: format!("status {}: {}", status.as_u16(), body.trim()),
            });
        }

        // Jenkins answers with a queue item location, not a build number.
        Ok(None)
    }

    async fn build_status(&self, job: &str, number: u64) -> Result<BuildStatus> {
        let number_segment = number.to_string();
        let mut url = self.job_url(job, &[number_segment.as_str(), "api", "json"])?;
        url.query_pairs_mut()
            .append_pair("tree", "building,result,url");

        self.get_json(url, &format!("build {job} #{number}")).await
    }
}
