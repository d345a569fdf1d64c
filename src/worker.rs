//! The collaborator seams of the dispatch engine.
//!
//! `CiWorker` is the capability set every CI/review back end must provide;
//! the orchestrator is written only against it. `JenkinsGerritWorker` is the
//! production variant (Jenkins for CI, Gerrit for review); tests substitute
//! fakes with scripted responses.

use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::error::PresubmitError;
use crate::gerrit::{parse_reference, Change, ChangeId, GerritClient};
use crate::jenkins::{JenkinsClient, REFS_PARAMETER};
use crate::multipart::ChangeGroup;

/// Read access to the review service's pending changes.
#[allow(async_fn_in_trait)]
pub trait ChangeSource {
    async fn query_changes(&self, query: &str) -> Result<Vec<Change>, PresubmitError>;
}

/// Capability set for driving CI and reporting back to review.
#[allow(async_fn_in_trait)]
pub trait CiWorker {
    /// Verify the presubmit pipeline is healthy before anything else runs.
    async fn check_presubmit_job(&self) -> Result<(), PresubmitError>;

    /// Names of the test jobs configured for presubmit. An empty list is
    /// valid (nothing configured) and is the caller's warning to surface.
    async fn list_tests_to_run(&self) -> Result<Vec<String>, PresubmitError>;

    /// Best-effort cancellation of queued/running builds for changes whose
    /// recorded patchset was superseded. Partial failure is reported, never
    /// fatal: a stale build finishing harmlessly only wastes capacity.
    async fn remove_outdated_builds(
        &self,
        outdated: &BTreeMap<ChangeId, u32>,
    ) -> Vec<PresubmitError>;

    /// Submit one build request covering all `groups` and all `test_names`.
    /// Fails atomically; no partial enqueue is assumed.
    async fn add_presubmit_test_build(
        &self,
        groups: &[ChangeGroup],
        test_names: &[String],
    ) -> Result<(), PresubmitError>;

    /// Post `message` (with an optional Verified vote) to every ref. Review
    /// threads are independent, so every ref is attempted even when earlier
    /// ones fail; failures come back aggregated.
    async fn post_results(
        &self,
        message: &str,
        refs: &[String],
        verified: Option<i32>,
    ) -> Vec<PresubmitError>;
}

/// Does a build's space-joined `REFS` parameter name any superseded
/// patchset? Refs carry no project, so matching is by change number, which
/// Gerrit keeps unique across the host.
fn refs_are_outdated(refs: &str, outdated: &BTreeMap<ChangeId, u32>) -> bool {
    refs.split_whitespace().any(|reference| {
        let (number, patchset) = match parse_reference(reference) {
            Ok(parsed) => parsed,
            Err(_) => {
                debug!("ignoring unparsable ref {:?} on existing build", reference);
                return false;
            }
        };
        outdated
            .iter()
            .any(|(id, recorded)| id.number == number && patchset <= *recorded)
    })
}

/// Production worker: Jenkins runs the builds, Gerrit receives the results.
pub struct JenkinsGerritWorker {
    jenkins: JenkinsClient,
    gerrit: GerritClient,
    test_names: Vec<String>,
}

impl JenkinsGerritWorker {
    pub fn new(jenkins: JenkinsClient, gerrit: GerritClient, test_names: Vec<String>) -> Self {
        Self {
            jenkins,
            gerrit,
            test_names,
        }
    }
}

impl CiWorker for JenkinsGerritWorker {
    async fn check_presubmit_job(&self) -> Result<(), PresubmitError> {
        let last = self.jenkins.last_completed_build().await?;
        match last {
            None => {
                debug!("job {:?} has no completed builds yet", self.jenkins.job_name());
                Ok(())
            }
            Some(build) => match build.result.as_deref() {
                Some("SUCCESS") => Ok(()),
                result => Err(PresubmitError::CiUnhealthy(format!(
                    "last completed build #{} of {:?} finished with {}",
                    build.number,
                    self.jenkins.job_name(),
                    result.unwrap_or("no result")
                ))),
            },
        }
    }

    async fn list_tests_to_run(&self) -> Result<Vec<String>, PresubmitError> {
        Ok(self.test_names.clone())
    }

    async fn remove_outdated_builds(
        &self,
        outdated: &BTreeMap<ChangeId, u32>,
    ) -> Vec<PresubmitError> {
        let mut errors = Vec::new();

        // Queued items first: cancelling them is cheap and they have not
        // consumed an executor yet.
        match self.jenkins.queued_items().await {
            Ok(items) => {
                for item in items {
                    let refs = item.parameter(REFS_PARAMETER).unwrap_or_default();
                    if !refs_are_outdated(&refs, outdated) {
                        continue;
                    }
                    info!("cancelling queued presubmit item {} ({})", item.id, refs);
                    if let Err(err) = self.jenkins.cancel_queue_item(item.id).await {
                        errors.push(err);
                    }
                }
            }
            Err(err) => errors.push(err),
        }

        match self.jenkins.builds().await {
            Ok(builds) => {
                for build in builds.into_iter().filter(|build| build.building) {
                    let refs = build.parameter(REFS_PARAMETER).unwrap_or_default();
                    if !refs_are_outdated(&refs, outdated) {
                        continue;
                    }
                    info!("stopping outdated presubmit build #{} ({})", build.number, refs);
                    if let Err(err) = self.jenkins.stop_build(build.number).await {
                        errors.push(err);
                    }
                }
            }
            Err(err) => errors.push(err),
        }

        errors
    }

    async fn add_presubmit_test_build(
        &self,
        groups: &[ChangeGroup],
        test_names: &[String],
    ) -> Result<(), PresubmitError> {
        let refs: Vec<String> = groups.iter().flat_map(ChangeGroup::references).collect();
        self.jenkins
            .trigger_build(&refs.join(" "), &test_names.join(","))
            .await
    }

    async fn post_results(
        &self,
        message: &str,
        refs: &[String],
        verified: Option<i32>,
    ) -> Vec<PresubmitError> {
        let mut errors = Vec::new();
        for reference in refs {
            if let Err(err) = self.gerrit.post_review(reference, message, verified).await {
                warn!("failed to post to {}: {}", reference, err);
                errors.push(err);
            }
        }
        errors
    }
}
