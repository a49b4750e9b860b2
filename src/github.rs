//! # GitHub client
//!
//! [`GitHubClient`] implements the core [`Upstream`] trait against the GitHub
//! REST API. Authentication is an optional bearer token. Each request has its
//! own retry budget: server errors, rate limiting and connection failures are
//! retried with exponential backoff before an error is returned.
//!
//! The issue listing is requested oldest first (`sort=created&direction=asc`).
//! The sync cursor is a 1-based position in that listing, not an issue
//! number: state filters and deleted or transferred issues shift positions.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, ACCEPT, RETRY_AFTER, USER_AGENT};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};
use vossibility_core::error::BoxError;
use vossibility_core::{Label, PageRequest, Repository, StateFilter, Upstream};

use crate::load_config::GitHubSection;

const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

pub struct GitHubClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
    max_retries: u32,
    retry_delay: Duration,
}

impl GitHubClient {
    pub fn new(config: &GitHubSection) -> Result<Self, BoxError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        info!(
            base_url = %config.base_url,
            authenticated = config.api_token.is_some(),
            "Initialized GitHub client"
        );
        Ok(GitHubClient {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.api_token.clone(),
            max_retries: config.max_retries,
            retry_delay: Duration::from_secs(1),
        })
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    fn request(&self, path: &str) -> RequestBuilder {
        let request = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .header(USER_AGENT, "vossibility")
            .header(ACCEPT, "application/vnd.github+json");
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, BoxError> {
        let mut attempt = 0;
        loop {
            let outcome = self.request(path).query(query).send().await;
            let backoff = self.retry_delay * 2u32.saturating_pow(attempt);
            let wait = match outcome {
                Ok(resp) if resp.status().is_success() => return Ok(resp.json::<T>().await?),
                Ok(resp) if is_retryable(resp.status(), resp.headers()) && attempt < self.max_retries => {
                    let wait = retry_after(resp.headers()).unwrap_or(backoff);
                    warn!(path, status = %resp.status(), attempt, ?wait, "GitHub request failed, retrying");
                    wait
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp
                        .text()
                        .await
                        .unwrap_or_else(|_| String::from("<Failed to decode response body>"));
                    return Err(format!("GitHub API returned {status} for {path}: {body}").into());
                }
                Err(e) if (e.is_connect() || e.is_timeout()) && attempt < self.max_retries => {
                    warn!(path, error = %e, attempt, "GitHub request failed, retrying");
                    backoff
                }
                Err(e) => return Err(Box::new(e)),
            };
            attempt += 1;
            tokio::time::sleep(wait).await;
        }
    }
}

fn is_retryable(status: StatusCode, headers: &HeaderMap) -> bool {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return true;
    }
    // Primary rate limit exhaustion comes back as a 403.
    status == StatusCode::FORBIDDEN
        && headers
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            == Some("0")
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let secs = headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()?;
    Some(Duration::from_secs(secs).min(MAX_RETRY_AFTER))
}

/// Map a 1-based history position onto GitHub's page numbering: the page
/// to request and how many of its leading items precede `from`.
pub fn page_window(page: PageRequest) -> (u64, usize) {
    let per_page = u64::from(page.per_page.max(1));
    let offset = page.from.saturating_sub(1);
    (offset / per_page + 1, (offset % per_page) as usize)
}

#[async_trait]
impl Upstream for GitHubClient {
    async fn list_issues(
        &self,
        repository: &Repository,
        state: StateFilter,
        page: PageRequest,
    ) -> Result<Vec<Value>, BoxError> {
        let (page_number, skip) = page_window(page);
        debug!(
            repository = %repository.full_name(),
            page = page_number,
            per_page = page.per_page,
            "Listing issues"
        );
        let path = format!("/repos/{}/{}/issues", repository.user, repository.repo);
        let items: Vec<Value> = self
            .get_json(
                &path,
                &[
                    ("state", state.as_str().to_string()),
                    ("sort", "created".to_string()),
                    ("direction", "asc".to_string()),
                    ("per_page", page.per_page.to_string()),
                    ("page", page_number.to_string()),
                ],
            )
            .await?;
        Ok(items.into_iter().skip(skip).collect())
    }

    async fn list_labels(&self, repository: &Repository, number: i64) -> Result<Vec<Label>, BoxError> {
        let path = format!(
            "/repos/{}/{}/issues/{}/labels",
            repository.user, repository.repo, number
        );
        self.get_json(&path, &[("per_page", "100".to_string())]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_window_aligns_to_github_pages() {
        let window = |from, per_page| page_window(PageRequest { from, per_page });
        assert_eq!(window(1, 100), (1, 0));
        assert_eq!(window(101, 100), (2, 0));
        assert_eq!(window(150, 100), (2, 49));
        assert_eq!(window(0, 10), (1, 0));
    }

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(*name, value.parse().unwrap());
        }
        headers
    }

    #[test]
    fn server_errors_and_rate_limits_are_retryable() {
        let none = HeaderMap::new();
        assert!(is_retryable(StatusCode::INTERNAL_SERVER_ERROR, &none));
        assert!(is_retryable(StatusCode::BAD_GATEWAY, &none));
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS, &none));
        assert!(is_retryable(
            StatusCode::FORBIDDEN,
            &headers(&[("x-ratelimit-remaining", "0")])
        ));

        assert!(!is_retryable(StatusCode::FORBIDDEN, &none));
        assert!(!is_retryable(
            StatusCode::FORBIDDEN,
            &headers(&[("x-ratelimit-remaining", "12")])
        ));
        assert!(!is_retryable(StatusCode::NOT_FOUND, &none));
        assert!(!is_retryable(StatusCode::UNAUTHORIZED, &none));
    }

    #[test]
    fn retry_after_is_read_in_seconds_and_capped() {
        assert_eq!(retry_after(&HeaderMap::new()), None);
        assert_eq!(
            retry_after(&headers(&[("retry-after", "5")])),
            Some(Duration::from_secs(5))
        );
        assert_eq!(retry_after(&headers(&[("retry-after", "3600")])), Some(MAX_RETRY_AFTER));
        assert_eq!(
            retry_after(&headers(&[("retry-after", "Wed, 21 Oct 2015 07:28:00 GMT")])),
            None
        );
    }
}
