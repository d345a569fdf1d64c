//! REST client for the Jenkins CI system.
//!
//! This is the only module that knows Jenkins' wire format. Everything else
//! drives CI through the `CiWorker` capability set.

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::PresubmitError;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Build parameter carrying the space-joined ref list.
pub const REFS_PARAMETER: &str = "REFS";
/// Build parameter carrying the comma-joined test names.
pub const TESTS_PARAMETER: &str = "TESTS";

/// Status of one completed or running build.
#[derive(Debug, Clone, Deserialize)]
pub struct BuildInfo {
    pub number: u64,
    #[serde(default)]
    pub building: bool,
    /// `SUCCESS`, `FAILURE`, `UNSTABLE`, `ABORTED`, or absent while building.
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    actions: Vec<ActionInfo>,
}

/// One item waiting in the build queue.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueItem {
    pub id: u64,
    pub task: QueueTask,
    #[serde(default)]
    actions: Vec<ActionInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueTask {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ActionInfo {
    #[serde(default)]
    parameters: Vec<ParameterInfo>,
}

#[derive(Debug, Clone, Deserialize)]
struct ParameterInfo {
    name: String,
    #[serde(default)]
    value: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct JobInfo {
    #[serde(default)]
    builds: Vec<BuildInfo>,
}

#[derive(Debug, Deserialize)]
struct QueueInfo {
    #[serde(default)]
    items: Vec<QueueItem>,
}

fn parameter_value(actions: &[ActionInfo], name: &str) -> Option<String> {
    actions
        .iter()
        .flat_map(|action| &action.parameters)
        .find(|parameter| parameter.name == name)
        .and_then(|parameter| parameter.value.as_str().map(str::to_string))
}

impl BuildInfo {
    pub fn parameter(&self, name: &str) -> Option<String> {
        parameter_value(&self.actions, name)
    }
}

impl QueueItem {
    pub fn parameter(&self, name: &str) -> Option<String> {
        parameter_value(&self.actions, name)
    }
}

/// Client for one Jenkins host and one presubmit job.
#[derive(Debug, Clone)]
pub struct JenkinsClient {
    client: Client,
    base_url: Url,
    job_name: String,
}

impl JenkinsClient {
    pub fn new(base_url: Url, job_name: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url,
            job_name,
        }
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    fn endpoint(&self, path: &str) -> Result<Url, PresubmitError> {
        self.base_url.join(path).map_err(|err| {
            PresubmitError::Service(format!("failed to build Jenkins URL for {path:?}: {err}"))
        })
    }

    async fn get_json<T>(&self, url: Url, context: &str) -> Result<Option<T>, PresubmitError>
    where
        T: for<'de> Deserialize<'de>,
    {
        debug!("GET {}", url);
        let response = self.client.get(url).send().await.map_err(|source| {
            PresubmitError::Transport {
                context: context.to_string(),
                source,
            }
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let body = response
            .text()
            .await
            .map_err(|source| PresubmitError::Transport {
                context: context.to_string(),
                source,
            })?;

        if !status.is_success() {
            return Err(PresubmitError::Service(format!(
                "{context}: Jenkins answered {status}: {body}"
            )));
        }

        serde_json::from_str(&body)
            .map(Some)
            .map_err(|err| PresubmitError::Service(format!("{context}: unparsable response: {err}")))
    }

    async fn post(&self, url: Url, context: &str) -> Result<StatusCode, PresubmitError> {
        debug!("POST {}", url);
        let response = self.client.post(url).send().await.map_err(|source| {
            PresubmitError::Transport {
                context: context.to_string(),
                source,
            }
        })?;
        Ok(response.status())
    }

    /// Status of the presubmit job's last completed build; `None` when the
    /// job has never completed a build.
    pub async fn last_completed_build(&self) -> Result<Option<BuildInfo>, PresubmitError> {
        let url = self.endpoint(&format!(
            "job/{}/lastCompletedBuild/api/json",
            self.job_name
        ))?;
        self.get_json(url, "fetching last completed build status")
            .await
    }

    /// Queue one parameterized presubmit build covering `refs` and `tests`.
    pub async fn trigger_build(&self, refs: &str, tests: &str) -> Result<(), PresubmitError> {
        let mut url = self.endpoint(&format!("job/{}/buildWithParameters", self.job_name))?;
        url.query_pairs_mut()
            .append_pair(REFS_PARAMETER, refs)
            .append_pair(TESTS_PARAMETER, tests);

        let context = "submitting presubmit build";
        let status = self.post(url, context).await?;
        if !status.is_success() {
            return Err(PresubmitError::Service(format!(
                "{context}: Jenkins answered {status}"
            )));
        }
        Ok(())
    }

    /// All recorded builds of the presubmit job, newest first, with their
    /// parameters (for outdated-build cleanup).
    pub async fn builds(&self) -> Result<Vec<BuildInfo>, PresubmitError> {
        let url = self.endpoint(&format!(
            "job/{}/api/json?tree=builds[number,building,result,actions[parameters[name,value]]]",
            self.job_name
        ))?;
        let job: Option<JobInfo> = self.get_json(url, "listing presubmit builds").await?;
        Ok(job.map(|job| job.builds).unwrap_or_default())
    }

    /// Items queued for the presubmit job but not yet building.
    pub async fn queued_items(&self) -> Result<Vec<QueueItem>, PresubmitError> {
        let url = self.endpoint("queue/api/json")?;
        let queue: Option<QueueInfo> = self.get_json(url, "listing build queue").await?;
        Ok(queue
            .map(|queue| queue.items)
            .unwrap_or_default()
            .into_iter()
            .filter(|item| item.task.name == self.job_name)
            .collect())
    }

    /// Stop a running build.
    pub async fn stop_build(&self, number: u64) -> Result<(), PresubmitError> {
        let url = self.endpoint(&format!("job/{}/{}/stop", self.job_name, number))?;
        let context = format!("stopping build {number}");
        let status = self.post(url, &context).await?;
        // Jenkins answers the stop with a redirect to the build page.
        if !status.is_success() && !status.is_redirection() {
            return Err(PresubmitError::Service(format!(
                "{context}: Jenkins answered {status}"
            )));
        }
        Ok(())
    }

    /// Cancel a queued item that has not started building.
    pub async fn cancel_queue_item(&self, id: u64) -> Result<(), PresubmitError> {
        let mut url = self.endpoint("queue/cancelItem")?;
        url.query_pairs_mut().append_pair("id", &id.to_string());

        let context = format!("cancelling queue item {id}");
        let status = self.post(url, &context).await?;
        // Historic Jenkins versions answer cancelItem with 404 on success.
        if !status.is_success() && !status.is_redirection() && status != StatusCode::NOT_FOUND {
            return Err(PresubmitError::Service(format!(
                "{context}: Jenkins answered {status}"
            )));
        }
        Ok(())
    }
}
