//! Runtime configuration assembled from CLI flags and environment.
//!
//! Validation happens here, before any run is attempted: a missing or
//! unparsable endpoint is a `Config` error and nothing else executes.

use std::path::PathBuf;
use url::Url;

use crate::error::PresubmitError;

/// Everything one dispatch run needs to know.
#[derive(Debug, Clone)]
pub struct Config {
    pub gerrit_url: Url,
    pub jenkins_url: Url,
    pub job_name: String,
    pub log_path: PathBuf,
    pub query: String,
    /// Only changes from these projects are tested; `None` means all.
    pub projects: Option<Vec<String>>,
    /// Test job names handed to the CI build.
    pub test_names: Vec<String>,
    /// Bypass the diff and resend every pending change.
    pub force: bool,
}

impl Config {
    /// Validate an endpoint flag into a base URL.
    ///
    /// The path is normalized to end in `/` so joining endpoint paths never
    /// silently drops the last segment (relevant for hosts like
    /// `http://host/jenkins`).
    pub fn endpoint(flag: &str, value: Option<&str>) -> Result<Url, PresubmitError> {
        let value = value.ok_or_else(|| {
            PresubmitError::Config(format!("no {flag} host; use the --{flag} flag"))
        })?;

        let mut url = Url::parse(value).map_err(|err| {
            PresubmitError::Config(format!("invalid --{flag} URL {value:?}: {err}"))
        })?;

        if url.cannot_be_a_base() {
            return Err(PresubmitError::Config(format!(
                "invalid --{flag} URL {value:?}: not a base URL"
            )));
        }

        if !url.path().ends_with('/') {
            url.set_path(&format!("{}/", url.path()));
        }
        Ok(url)
    }

    /// Split a comma-separated flag value, dropping empty entries.
    pub fn split_list(value: &str) -> Vec<String> {
        value
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_endpoint_is_a_config_error() {
        let err = Config::endpoint("gerrit", None).unwrap_err();
        assert!(matches!(err, PresubmitError::Config(_)));
        assert!(err.to_string().contains("--gerrit"));
    }

    #[test]
    fn invalid_endpoint_is_a_config_error() {
        let err = Config::endpoint("jenkins", Some("not a url")).unwrap_err();
        assert!(matches!(err, PresubmitError::Config(_)));
    }

    #[test]
    fn endpoint_path_gets_a_trailing_slash() {
        let url = Config::endpoint("jenkins", Some("http://host:8090/jenkins")).unwrap();
        assert_eq!(url.as_str(), "http://host:8090/jenkins/");
        assert_eq!(
            url.join("job/presubmit-test/api/json").unwrap().as_str(),
            "http://host:8090/jenkins/job/presubmit-test/api/json"
        );

        let url = Config::endpoint("gerrit", Some("https://review.example.com/")).unwrap();
        assert_eq!(url.as_str(), "https://review.example.com/");
    }

    #[test]
    fn split_list_trims_and_drops_empties() {
        assert_eq!(
            Config::split_list("cobalt, manifest,,"),
            vec!["cobalt".to_string(), "manifest".to_string()]
        );
        assert!(Config::split_list("").is_empty());
    }
}
