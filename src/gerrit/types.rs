//! Change records and the Gerrit reference string format.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::PresubmitError;

/// Identity of a change: number plus owning project. Patchsets version a
/// change without altering its identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChangeId {
    pub project: String,
    pub number: u64,
}

impl ChangeId {
    /// Stable string form used as the snapshot map key.
    pub fn key(&self) -> String {
        format!("{}/{}", self.project, self.number)
    }
}

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project, self.number)
    }
}

/// Membership of a change in a multi-part set that must be tested as one
/// unit. Carried in the commit message footer `MultiPart: <index>/<count>`;
/// the Gerrit topic names the group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiPartInfo {
    pub group_id: String,
    pub part_index: u32,
    pub part_count: u32,
}

impl MultiPartInfo {
    /// Extract multi-part metadata from a change's topic and commit message.
    ///
    /// Returns `None` when the message carries no `MultiPart:` footer, or
    /// when the footer is present but unusable (no topic to group under, or
    /// a malformed `<index>/<count>` payload). The caller logs the latter;
    /// a change we cannot place in a group is treated as standalone.
    pub fn from_commit_message(topic: Option<&str>, message: &str) -> Option<Self> {
        let payload = message
            .lines()
            .rev()
            .find_map(|line| line.trim().strip_prefix("MultiPart:"))?
            .trim();

        let (index, count) = payload.split_once('/')?;
        let part_index: u32 = index.trim().parse().ok()?;
        let part_count: u32 = count.trim().parse().ok()?;

        Some(Self {
            group_id: topic?.to_string(),
            part_index,
            part_count,
        })
    }
}

/// One pending change as returned by the review service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub number: u64,
    pub project: String,
    #[serde(default)]
    pub subject: String,
    pub patchset: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi_part: Option<MultiPartInfo>,
}

impl Change {
    pub fn id(&self) -> ChangeId {
        ChangeId {
            project: self.project.clone(),
            number: self.number,
        }
    }

    /// The ref that fetches exactly this patchset.
    pub fn reference(&self) -> String {
        format_reference(self.number, self.patchset)
    }
}

/// Format a Gerrit change ref: `refs/changes/<last-2-digits>/<number>/<patchset>`.
pub fn format_reference(number: u64, patchset: u32) -> String {
    format!("refs/changes/{:02}/{}/{}", number % 100, number, patchset)
}

/// Parse a change ref back into `(number, patchset)`.
///
/// Accepts the full `refs/changes/53/1153/2` form or the `1153/2` shorthand.
pub fn parse_reference(reference: &str) -> Result<(u64, u32), PresubmitError> {
    let malformed = || PresubmitError::InvalidReference {
        given: reference.to_string(),
    };

    let parts: Vec<&str> = reference.split('/').collect();
    let (number, patchset) = match parts.as_slice() {
        ["refs", "changes", _, number, patchset] => (*number, *patchset),
        [number, patchset] => (*number, *patchset),
        _ => return Err(malformed()),
    };

    let number: u64 = number.parse().map_err(|_| malformed())?;
    let patchset: u32 = patchset.parse().map_err(|_| malformed())?;
    Ok((number, patchset))
}
