//! Change record store: the persisted snapshot of previously seen changes.
//!
//! One snapshot file per log path. Each run loads the previous snapshot,
//! unconditionally replaces it with the current query result, and only then
//! dispatches, so a crash after the write never re-tests recorded changes,
//! and a crash before it is safely retried by the next run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::Path;
use tracing::debug;

use crate::error::PresubmitError;
use crate::gerrit::{Change, ChangeId};

/// What we remember about a change between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub project: String,
    pub number: u64,
    pub patchset: u32,
    pub reference: String,
}

/// The last-seen patchset per pending change, keyed by `<project>/<number>`.
///
/// Owned exclusively by this module; every other component sees immutable
/// values. The file is replaced wholesale each run, never merged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub recorded_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub changes: BTreeMap<String, ChangeRecord>,
}

impl Snapshot {
    /// Build a snapshot of the given query result, stamped with the current time.
    pub fn from_changes(changes: &[Change]) -> Self {
        let changes = changes
            .iter()
            .map(|change| {
                (
                    change.id().key(),
                    ChangeRecord {
                        project: change.project.clone(),
                        number: change.number,
                        patchset: change.patchset,
                        reference: change.reference(),
                    },
                )
            })
            .collect();

        Self {
            recorded_at: Some(Utc::now()),
            changes,
        }
    }

    /// Load the snapshot at `path`.
    ///
    /// A missing file is first-run semantics and yields an empty snapshot.
    /// An unparsable file is a fatal `CorruptSnapshot`: silently starting
    /// from empty would re-test everything pending.
    pub fn load(path: &Path) -> Result<Self, PresubmitError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("no snapshot at {:?}, starting from empty", path);
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(PresubmitError::SnapshotIo {
                    action: "read",
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        serde_json::from_str(&content).map_err(|source| PresubmitError::CorruptSnapshot {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Atomically replace the snapshot at `path`: write a sibling temp file,
    /// then rename it into place, so a crash never leaves a truncated file.
    pub fn save(&self, path: &Path) -> Result<(), PresubmitError> {
        let io_err = |action, source| PresubmitError::SnapshotIo {
            action,
            path: path.to_path_buf(),
            source,
        };

        let content = serde_json::to_string_pretty(self)
            .expect("snapshot serialization cannot fail");

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = Path::new(&tmp);

        std::fs::write(tmp, content).map_err(|e| io_err("write", e))?;
        std::fs::rename(tmp, path).map_err(|e| io_err("replace", e))?;

        debug!("snapshot of {} change(s) saved to {:?}", self.changes.len(), path);
        Ok(())
    }

    /// The patchset recorded for `id`, if we have seen it before.
    pub fn recorded_patchset(&self, id: &ChangeId) -> Option<u32> {
        self.changes.get(&id.key()).map(|record| record.patchset)
    }
}
