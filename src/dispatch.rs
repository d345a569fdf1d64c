//! Dispatch orchestrator: one scheduled invocation, one linear pass.
//!
//! Sequence: health gate, load previous snapshot, query pending changes,
//! persist the new snapshot, group, diff, cancel superseded builds, submit
//! new work, report. There are no retries within a run; the next scheduled
//! invocation is the retry mechanism. Fatal errors abort before any side
//! effect, non-fatal ones accumulate into the report.

use std::path::PathBuf;
use tracing::{error, info, warn};

use crate::diff::{new_groups, outdated_changes};
use crate::error::PresubmitError;
use crate::multipart::{group_changes, ChangeGroup};
use crate::store::Snapshot;
use crate::worker::{ChangeSource, CiWorker};

/// What one invocation accomplished.
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Change groups submitted for testing.
    pub groups_sent: usize,
    /// Aggregated non-fatal errors (grouping problems, per-ref post
    /// failures, builds that could not be cancelled).
    pub errors: Vec<String>,
}

/// Drives one presubmit dispatch run against a change source and a CI worker.
pub struct Dispatcher<S, W> {
    source: S,
    worker: W,
    log_path: PathBuf,
    query: String,
    projects: Option<Vec<String>>,
    force: bool,
}

impl<S: ChangeSource, W: CiWorker> Dispatcher<S, W> {
    pub fn new(
        source: S,
        worker: W,
        log_path: PathBuf,
        query: String,
        projects: Option<Vec<String>>,
        force: bool,
    ) -> Self {
        Self {
            source,
            worker,
            log_path,
            query,
            projects,
            force,
        }
    }

    /// Run the full dispatch sequence once.
    pub async fn run(&self) -> Result<DispatchReport, PresubmitError> {
        let mut report = DispatchReport::default();

        // Never pile new work onto a known-broken pipeline. Aborting here
        // leaves the snapshot untouched, so nothing is marked as seen.
        self.worker.check_presubmit_job().await?;

        let previous = if self.force {
            info!("force flag set, sending all pending changes");
            Snapshot::default()
        } else {
            info!("using CL log: {:?}", self.log_path);
            Snapshot::load(&self.log_path)?
        };

        let mut current = self.source.query_changes(&self.query).await?;
        if let Some(projects) = &self.projects {
            current.retain(|change| projects.iter().any(|p| p == &change.project));
        }
        info!("{} pending change(s) after filtering", current.len());

        // Persist before dispatching: a crash past this point never loses
        // the already-seen record.
        Snapshot::from_changes(&current).save(&self.log_path)?;

        let (groups, group_errors) = group_changes(&current);
        for err in group_errors {
            error!("grouping error: {}", err);
            report.errors.push(err.to_string());
        }

        let pending = new_groups(&previous, &groups);

        let outdated = outdated_changes(&previous, &current);
        if !outdated.is_empty() {
            info!("{} change(s) superseded by a newer patchset", outdated.len());
            for err in self.worker.remove_outdated_builds(&outdated).await {
                warn!("outdated build not removed: {}", err);
                report.errors.push(err.to_string());
            }
        }

        if pending.is_empty() {
            info!("no new changes to test");
            return Ok(report);
        }

        let tests = self.worker.list_tests_to_run().await?;
        if tests.is_empty() {
            warn!("no presubmit tests configured, nothing submitted");
            return Ok(report);
        }

        for change in pending.iter().flat_map(ChangeGroup::changes) {
            info!("sending {} ({:?}) for testing", change.reference(), change.subject);
        }
        self.worker.add_presubmit_test_build(&pending, &tests).await?;
        report.groups_sent = pending.len();

        let refs: Vec<String> = pending.iter().flat_map(ChangeGroup::references).collect();
        let message = format!(
            "Presubmit: queued {} for {} change(s)",
            tests.join(", "),
            refs.len()
        );
        for err in self.worker.post_results(&message, &refs, None).await {
            report.errors.push(err.to_string());
        }

        Ok(report)
    }
}
