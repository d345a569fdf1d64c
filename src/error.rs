//! Error taxonomy for a dispatch run.
//!
//! Everything in `PresubmitError` is fatal for the current invocation: the
//! process exits non-zero and the next scheduled run is the retry mechanism.
//! Non-fatal conditions (multi-part grouping problems, per-ref post
//! failures) are collected into the run report instead; see
//! `multipart::GroupError` and `dispatch::DispatchReport`.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PresubmitError {
    /// Missing or invalid endpoint/flag. No run is attempted.
    #[error("configuration error: {0}")]
    Config(String),

    /// The snapshot file exists but cannot be parsed. Proceeding with an
    /// empty snapshot would re-test every pending change, so this aborts.
    #[error("snapshot file {path:?} is corrupt: {source}")]
    CorruptSnapshot {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Reading or replacing the snapshot file failed at the filesystem level.
    #[error("failed to {action} snapshot file {path:?}: {source}")]
    SnapshotIo {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A remote call to Gerrit or Jenkins failed in transit.
    #[error("{context}: {source}")]
    Transport {
        context: String,
        #[source]
        source: reqwest::Error,
    },

    /// A remote service answered, but not with what we needed
    /// (unexpected status code, unparsable body, missing revision data).
    #[error("{0}")]
    Service(String),

    /// The presubmit job's last completed build did not succeed. We refuse
    /// to pile new work onto a known-broken pipeline.
    #[error("refusing to test new CLs because of existing failures: {0}")]
    CiUnhealthy(String),

    /// A change/patchset string that matches neither accepted form.
    #[error(
        "malformed cl string: {given:?}; examples of supported forms are: \
         'refs/changes/53/1153/2', or '1153/2'"
    )]
    InvalidReference { given: String },
}
