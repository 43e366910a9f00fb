//! HTTP fetcher implementation
//!
//! This module performs the single network operation the controller wraps:
//! - Building the HTTP client from the run configuration
//! - GET requests with an optional per-request user agent
//! - Error classification into messages the health monitor can match

use crate::config::RunConfig;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

/// Failure of one fetch attempt
///
/// The `Display` text is what the health monitor scans for block keywords,
/// so statuses carry their canonical reason ("HTTP 429 Too Many Requests").
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request timed out")]
    Timeout,

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("HTTP {0}")]
    Status(StatusCode),

    #[error("Page looks blocked (matched '{keyword}')")]
    Blocked { keyword: String },

    #[error("Request failed: {0}")]
    Request(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_connect() {
            Self::Connect(e.to_string())
        } else {
            Self::Request(e.to_string())
        }
    }
}

/// A successfully fetched page
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL that was requested
    pub url: String,

    /// URL after redirects
    pub final_url: String,

    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

impl FetchedPage {
    /// Converts the page into the payload stored in the result cache
    pub fn to_payload(&self) -> Value {
        json!({
            "url": self.url,
            "final_url": self.final_url,
            "status": self.status,
            "content_type": self.content_type,
            "bytes": self.body.len(),
            "body": self.body,
        })
    }
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - Run configuration supplying the request timeout
/// * `user_agent` - Default identity; individual requests may override it
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(config: &RunConfig, user_agent: &str) -> Result<Client, reqwest::Error> {
    let timeout = config.request_timeout();

    Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Fetches one page
///
/// # Arguments
///
/// * `client` - The HTTP client to use
/// * `url` - The URL to fetch
/// * `user_agent` - Identity override for this request, if any
/// * `block_keywords` - Fragments that mark a response body as a block page
///
/// # Returns
///
/// * `Ok(FetchedPage)` - 2xx response whose body does not look like a block page
/// * `Err(FetchError)` - Any other outcome
pub async fn fetch_page(
    client: &Client,
    url: &str,
    user_agent: Option<&str>,
    block_keywords: &[String],
) -> Result<FetchedPage, FetchError> {
    let mut request = client.get(url);
    if let Some(agent) = user_agent {
        request = request.header(USER_AGENT, agent);
    }

    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status(status));
    }

    let final_url = response.url().to_string();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let body = response.text().await?;

    if let Some(keyword) = find_block_keyword(&body, block_keywords) {
        return Err(FetchError::Blocked {
            keyword: keyword.to_string(),
        });
    }

    Ok(FetchedPage {
        url: url.to_string(),
        final_url,
        status: status.as_u16(),
        content_type,
        body,
    })
}

fn find_block_keyword<'a>(body: &str, keywords: &'a [String]) -> Option<&'a str> {
    let lowered = body.to_lowercase();
    keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .find(|k| lowered.contains(&k.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keywords() -> Vec<String> {
        vec!["captcha".to_string(), "Access Denied".to_string()]
    }

    #[test]
    fn test_build_http_client() {
        let client = build_http_client(&RunConfig::default(), "prompt-harvest-test");
        assert!(client.is_ok());
    }

    #[test]
    fn test_status_message_carries_reason() {
        let err = FetchError::Status(StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.to_string(), "HTTP 429 Too Many Requests");

        let err = FetchError::Status(StatusCode::FORBIDDEN);
        assert_eq!(err.to_string(), "HTTP 403 Forbidden");
    }

    #[test]
    fn test_blocked_message_contains_keyword() {
        let err = FetchError::Blocked {
            keyword: "captcha".to_string(),
        };
        assert!(err.to_string().contains("captcha"));
    }

    #[test]
    fn test_find_block_keyword() {
        assert_eq!(
            find_block_keyword("<h1>Please solve the CAPTCHA</h1>", &keywords()),
            Some("captcha")
        );
        assert_eq!(
            find_block_keyword("access denied for your region", &keywords()),
            Some("Access Denied")
        );
        assert_eq!(find_block_keyword("<p>Prompt list</p>", &keywords()), None);
    }

    #[test]
    fn test_payload_shape() {
        let page = FetchedPage {
            url: "https://example.com/a".to_string(),
            final_url: "https://example.com/a/".to_string(),
            status: 200,
            content_type: Some("text/html".to_string()),
            body: "hello".to_string(),
        };
        let payload = page.to_payload();
        assert_eq!(payload["bytes"], 5);
        assert_eq!(payload["status"], 200);
        assert_eq!(payload["body"], "hello");
    }
}
