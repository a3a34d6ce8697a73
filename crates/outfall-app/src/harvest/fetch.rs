//! Single-shot HTTP fetch and response classification.

use std::sync::Arc;
use std::time::Duration;

use bon::Builder;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::{debug, warn};

use crate::constants::{DEFAULT_NO_DATA_MARKERS, DEFAULT_USER_AGENT};
use crate::harvest::query::FetchRequest;

/// Transport-level failure of one request. Never terminal for a key.
#[derive(Debug, Error, Clone)]
pub enum FetchError {
    #[error("request to {url} timed out")]
    Timeout { url: String },
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: Arc<reqwest::Error>,
    },
    #[error("unexpected HTTP status {status} from {url}")]
    HttpStatus { url: String, status: u16 },
    #[error("failed to read response body from {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: Arc<reqwest::Error>,
    },
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] Arc<reqwest::Error>),
}

impl FetchError {
    fn from_send(url: &str, error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else {
            Self::Request {
                url: url.to_string(),
                source: Arc::new(error),
            }
        }
    }

    fn from_body(url: &str, error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else {
            Self::Body {
                url: url.to_string(),
                source: Arc::new(error),
            }
        }
    }
}

/// Classification of one upstream reply.
#[derive(Debug, Clone)]
pub enum ResponseOutcome {
    /// Usable payload, stored verbatim.
    Success(Bytes),
    /// Upstream answered but has nothing for this key.
    NoDataAvailable(Bytes),
    TransportFailure(FetchError),
}

impl ResponseOutcome {
    /// Terminal outcomes may be checkpointed; transport failures never are.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ResponseOutcome::TransportFailure(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            ResponseOutcome::Success(_) => "success",
            ResponseOutcome::NoDataAvailable(_) => "no-data",
            ResponseOutcome::TransportFailure(_) => "transport-failure",
        }
    }
}

/// Case-insensitive body fragments that mark a "no data" reply.
#[derive(Debug, Clone)]
pub struct NoDataMarkers(Vec<String>);

impl NoDataMarkers {
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(
            markers
                .into_iter()
                .map(Into::into)
                .filter(|marker: &String| !marker.is_empty())
                .collect(),
        )
    }

    /// First marker present in `body`, if any.
    pub fn find(&self, body: &[u8]) -> Option<&str> {
        self.0
            .iter()
            .find(|marker| contains_ignore_ascii_case(body, marker.as_bytes()))
            .map(String::as_str)
    }
}

impl Default for NoDataMarkers {
    fn default() -> Self {
        Self::new(DEFAULT_NO_DATA_MARKERS.iter().copied())
    }
}

fn contains_ignore_ascii_case(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() || needle.len() > haystack.len() {
        return needle.is_empty();
    }
    haystack
        .windows(needle.len())
        .any(|window| window.eq_ignore_ascii_case(needle))
}

/// Classify a reply. Status is checked before content; a non-2xx reply is a
/// transport failure whatever its body says.
pub fn classify(url: &str, status: StatusCode, body: Bytes, markers: &NoDataMarkers) -> ResponseOutcome {
    if !status.is_success() {
        return ResponseOutcome::TransportFailure(FetchError::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    match markers.find(&body) {
        Some(marker) => {
            debug!(url, marker, "response body carries a no-data marker");
            ResponseOutcome::NoDataAvailable(body)
        }
        None => ResponseOutcome::Success(body),
    }
}

#[derive(Debug, Clone, Builder)]
pub struct FetchClientOptions {
    #[builder(into, default = DEFAULT_USER_AGENT.to_string())]
    pub user_agent: String,
    #[builder(default = Duration::from_secs(120))]
    pub timeout: Duration,
    #[builder(default)]
    pub markers: NoDataMarkers,
}

/// Issues exactly one GET per call and never retries.
#[derive(Debug, Clone)]
pub struct FetchClient {
    http: Client,
    markers: NoDataMarkers,
}

impl FetchClient {
    pub fn new(options: FetchClientOptions) -> Result<Self, FetchError> {
        let http = Client::builder()
            .timeout(options.timeout)
            .user_agent(options.user_agent)
            .build()
            .map_err(|err| FetchError::Client(Arc::new(err)))?;
        Ok(Self {
            http,
            markers: options.markers,
        })
    }

    pub async fn fetch(&self, request: &FetchRequest) -> ResponseOutcome {
        let url = request.url.as_str();
        let response = match self
            .http
            .get(request.url.clone())
            .headers(request.headers.clone())
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => return ResponseOutcome::TransportFailure(FetchError::from_send(url, err)),
        };

        let status = response.status();
        if !status.is_success() {
            warn!(url, status = status.as_u16(), "upstream returned an error status");
            return classify(url, status, Bytes::new(), &self.markers);
        }

        match response.bytes().await {
            Ok(body) => classify(url, status, body, &self.markers),
            Err(err) => ResponseOutcome::TransportFailure(FetchError::from_body(url, err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(status: u16, body: &str) -> ResponseOutcome {
        let status = StatusCode::from_u16(status).expect("valid status");
        classify(
            "http://test/",
            status,
            Bytes::from(body.to_string()),
            &NoDataMarkers::default(),
        )
    }

    #[test]
    fn csv_body_with_ok_status_is_success() {
        match outcome(200, "a,b\n1,2\n") {
            ResponseOutcome::Success(body) => assert_eq!(&body[..], b"a,b\n1,2\n"),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn markers_match_case_insensitively() {
        assert!(matches!(
            outcome(200, "ERROR: FILE OUTPUT FAILED for request"),
            ResponseOutcome::NoDataAvailable(_)
        ));
        assert!(matches!(
            outcome(200, "<!DOCTYPE x><HTML><body>maintenance</body></HTML>"),
            ResponseOutcome::NoDataAvailable(_)
        ));
    }

    #[test]
    fn error_status_wins_over_marker_content() {
        match outcome(500, "<html>oops</html>") {
            ResponseOutcome::TransportFailure(FetchError::HttpStatus { status, .. }) => {
                assert_eq!(status, 500)
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn only_transport_failures_are_non_terminal() {
        assert!(outcome(200, "x").is_terminal());
        assert!(outcome(200, "<html").is_terminal());
        assert!(!outcome(404, "").is_terminal());
    }

    #[test]
    fn custom_markers_replace_defaults() {
        let markers = NoDataMarkers::new(["no records"]);
        assert_eq!(markers.find(b"NO RECORDS found"), Some("no records"));
        assert_eq!(markers.find(b"<html>"), None);
        assert_eq!(NoDataMarkers::new([""]).find(b"anything"), None);
    }

    #[test]
    fn substring_search_handles_short_bodies() {
        assert!(!contains_ignore_ascii_case(b"<ht", b"<html"));
        assert!(contains_ignore_ascii_case(b"<HtMl", b"<html"));
    }
}
