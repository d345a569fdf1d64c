//! REST client for the Gerrit review service.
//!
//! Query and vote semantics only; the dispatch engine never sees Gerrit's
//! wire format, just `Change` values.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use super::types::{parse_reference, Change, MultiPartInfo};
use crate::error::PresubmitError;
use crate::worker::ChangeSource;

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Gerrit prepends this to JSON responses to defeat XSSI; strip before parsing.
const XSSI_PREFIX: &str = ")]}'";

/// One change entry from `GET /changes/`.
#[derive(Debug, Deserialize)]
struct ChangeInfo {
    #[serde(rename = "_number")]
    number: u64,
    project: String,
    #[serde(default)]
    subject: String,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    current_revision: Option<String>,
    #[serde(default)]
    revisions: HashMap<String, RevisionInfo>,
}

#[derive(Debug, Deserialize)]
struct RevisionInfo {
    #[serde(rename = "_number")]
    number: u32,
    #[serde(default)]
    commit: Option<CommitInfo>,
}

#[derive(Debug, Deserialize)]
struct CommitInfo {
    #[serde(default)]
    message: String,
}

/// Body of `POST /changes/<n>/revisions/<ps>/review`.
#[derive(Debug, Serialize)]
struct ReviewInput<'a> {
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    labels: Option<HashMap<&'a str, i32>>,
}

impl ChangeInfo {
    /// Flatten the current revision into a `Change`. Entries without usable
    /// revision data cannot be tested and are skipped by the caller.
    fn into_change(self) -> Option<Change> {
        let revision_id = self.current_revision?;
        let revision = self.revisions.get(&revision_id)?;

        let commit_message = revision
            .commit
            .as_ref()
            .map(|commit| commit.message.as_str())
            .unwrap_or("");
        let multi_part =
            MultiPartInfo::from_commit_message(self.topic.as_deref(), commit_message);

        Some(Change {
            number: self.number,
            project: self.project,
            subject: self.subject,
            patchset: revision.number,
            multi_part,
        })
    }
}

pub(crate) fn strip_xssi_prefix(body: &str) -> &str {
    body.strip_prefix(XSSI_PREFIX).unwrap_or(body)
}

/// Client for one Gerrit host.
#[derive(Debug, Clone)]
pub struct GerritClient {
    client: Client,
    base_url: Url,
}

impl GerritClient {
    pub fn new(base_url: Url) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .expect("Failed to build HTTP client");

        Self { client, base_url }
    }

    fn endpoint(&self, path: &str) -> Result<Url, PresubmitError> {
        self.base_url.join(path).map_err(|err| {
            PresubmitError::Service(format!("failed to build Gerrit URL for {path:?}: {err}"))
        })
    }

    async fn get_json(&self, url: Url, context: &str) -> Result<String, PresubmitError> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .header("x-request-id", Uuid::new_v4().to_string())
            .send()
            .await
            .map_err(|source| PresubmitError::Transport {
                context: context.to_string(),
                source,
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| PresubmitError::Transport {
                context: context.to_string(),
                source,
            })?;

        if !status.is_success() {
            return Err(PresubmitError::Service(format!(
                "{context}: Gerrit answered {status}: {body}"
            )));
        }

        Ok(strip_xssi_prefix(&body).to_string())
    }

    /// Fetch all changes matching `query` (e.g. `status:open`), with their
    /// current revision and commit message so multi-part metadata can be
    /// extracted.
    pub async fn query_open_changes(&self, query: &str) -> Result<Vec<Change>, PresubmitError> {
        let mut url = self.endpoint("changes/")?;
        url.query_pairs_mut()
            .append_pair("q", query)
            .append_pair("o", "CURRENT_REVISION")
            .append_pair("o", "CURRENT_COMMIT");

        let body = self.get_json(url, "querying pending changes").await?;
        let entries: Vec<ChangeInfo> = serde_json::from_str(&body).map_err(|err| {
            PresubmitError::Service(format!("unparsable change query response: {err}"))
        })?;

        let mut changes = Vec::with_capacity(entries.len());
        for entry in entries {
            let number = entry.number;
            match entry.into_change() {
                Some(change) => changes.push(change),
                None => warn!("change {} has no current revision data, skipping", number),
            }
        }
        Ok(changes)
    }

    /// Fetch a single change by number.
    pub async fn get_change(&self, number: u64) -> Result<Change, PresubmitError> {
        let mut url = self.endpoint(&format!("changes/{number}"))?;
        url.query_pairs_mut()
            .append_pair("o", "CURRENT_REVISION")
            .append_pair("o", "CURRENT_COMMIT");

        let body = self
            .get_json(url, &format!("fetching change {number}"))
            .await?;
        let entry: ChangeInfo = serde_json::from_str(&body).map_err(|err| {
            PresubmitError::Service(format!("unparsable change {number} response: {err}"))
        })?;

        entry.into_change().ok_or_else(|| {
            PresubmitError::Service(format!("change {number} has no current revision data"))
        })
    }

    /// Post a review comment on the patchset named by `reference`, with an
    /// optional Verified vote.
    pub async fn post_review(
        &self,
        reference: &str,
        message: &str,
        verified: Option<i32>,
    ) -> Result<(), PresubmitError> {
        let (number, patchset) = parse_reference(reference)?;
        let url = self.endpoint(&format!("changes/{number}/revisions/{patchset}/review"))?;

        let input = ReviewInput {
            message,
            labels: verified.map(|vote| HashMap::from([("Verified", vote)])),
        };

        debug!("POST {} ({:?})", url, message);
        let context = format!("posting review to {reference}");
        let response = self
            .client
            .post(url)
            .header("x-request-id", Uuid::new_v4().to_string())
            .json(&input)
            .send()
            .await
            .map_err(|source| PresubmitError::Transport {
                context: context.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PresubmitError::Service(format!(
                "{context}: Gerrit answered {status}: {body}"
            )));
        }
        Ok(())
    }
}

impl ChangeSource for GerritClient {
    async fn query_changes(&self, query: &str) -> Result<Vec<Change>, PresubmitError> {
        self.query_open_changes(query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUERY_RESPONSE: &str = r#")]}'
[
  {
    "_number": 1153,
    "project": "cobalt",
    "subject": "Add frobnicator",
    "topic": "frob",
    "current_revision": "abc123",
    "revisions": {
      "abc123": {
        "_number": 2,
        "commit": {"message": "Add frobnicator\n\nMultiPart: 1/2\n"}
      }
    }
  },
  {
    "_number": 7,
    "project": "manifest",
    "subject": "Roll deps",
    "current_revision": "def456",
    "revisions": {"def456": {"_number": 1}}
  },
  {
    "_number": 9,
    "project": "broken",
    "subject": "No revision data"
  }
]"#;

    #[test]
    fn strips_xssi_prefix() {
        assert_eq!(strip_xssi_prefix(")]}'\n[]"), "\n[]");
        assert_eq!(strip_xssi_prefix("[]"), "[]");
    }

    #[test]
    fn parses_query_response() {
        let body = strip_xssi_prefix(QUERY_RESPONSE);
        let entries: Vec<ChangeInfo> = serde_json::from_str(body).unwrap();
        let changes: Vec<Change> = entries
            .into_iter()
            .filter_map(ChangeInfo::into_change)
            .collect();

        assert_eq!(changes.len(), 2);

        assert_eq!(changes[0].number, 1153);
        assert_eq!(changes[0].patchset, 2);
        assert_eq!(changes[0].reference(), "refs/changes/53/1153/2");
        let info = changes[0].multi_part.as_ref().unwrap();
        assert_eq!(info.group_id, "frob");
        assert_eq!((info.part_index, info.part_count), (1, 2));

        assert_eq!(changes[1].number, 7);
        assert!(changes[1].multi_part.is_none());
    }

    #[test]
    fn review_input_serializes_vote_only_when_present() {
        let plain = ReviewInput {
            message: "queued",
            labels: None,
        };
        assert_eq!(
            serde_json::to_string(&plain).unwrap(),
            r#"{"message":"queued"}"#
        );

        let voted = ReviewInput {
            message: "passed",
            labels: Some(HashMap::from([("Verified", 1)])),
        };
        assert_eq!(
            serde_json::to_string(&voted).unwrap(),
            r#"{"message":"passed","labels":{"Verified":1}}"#
        );
    }
}
