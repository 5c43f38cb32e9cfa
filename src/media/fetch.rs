//! Timeout-bounded upstream fetching.
//!
//! `Fetcher` is the raw transport seam (reqwest in production, an in-memory
//! table in tests). `Upstream` layers the failure contract every resolver
//! relies on: a fetch never errors, it yields an empty string or `None`, and
//! the mirror retry happens at most once.

use crate::config::FetchConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::scan;

pub type Header<'a> = (&'a str, &'a str);

#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// Present for form POSTs, absent for GETs.
    pub form: Option<Vec<(String, String)>>,
}

impl FetchRequest {
    pub fn get(url: &str, headers: &[Header<'_>]) -> Self {
        Self {
            url: url.to_string(),
            headers: owned_headers(headers),
            form: None,
        }
    }

    pub fn post_form(url: &str, form: &[(String, String)], headers: &[Header<'_>]) -> Self {
        Self {
            url: url.to_string(),
            headers: owned_headers(headers),
            form: Some(form.to_vec()),
        }
    }
}

fn owned_headers(headers: &[Header<'_>]) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn execute(&self, request: FetchRequest) -> Result<FetchResponse>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn execute(&self, request: FetchRequest) -> Result<FetchResponse> {
        let mut builder = match &request.form {
            Some(form) => self.client.post(&request.url).form(form),
            None => self.client.get(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .send()
            .await
            .with_context(|| format!("Request to {} failed", request.url))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .context("Failed to read upstream body")?;

        Ok(FetchResponse { status, body })
    }
}

/// Shared fetch helpers handed to every resolver.
pub struct Upstream {
    fetcher: Arc<dyn Fetcher>,
    timeout: Duration,
    api_timeout: Duration,
    mirror_base: String,
}

impl Upstream {
    pub fn new(fetcher: Arc<dyn Fetcher>, config: &FetchConfig) -> Self {
        Self {
            fetcher,
            timeout: config.timeout(),
            api_timeout: config.api_timeout(),
            mirror_base: config.mirror_base.trim_end_matches('/').to_string(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn api_timeout(&self) -> Duration {
        self.api_timeout
    }

    /// Runs one request under `timeout`. Dropping the timed-out future aborts
    /// the underlying request.
    pub async fn send(&self, request: FetchRequest, timeout: Duration) -> Option<FetchResponse> {
        let url = request.url.clone();
        match tokio::time::timeout(timeout, self.fetcher.execute(request)).await {
            Ok(Ok(response)) => Some(response),
            Ok(Err(e)) => {
                debug!("Upstream fetch of {} failed: {:#}", url, e);
                None
            }
            Err(_) => {
                debug!("Upstream fetch of {} timed out after {:?}", url, timeout);
                None
            }
        }
    }

    pub async fn fetch_text(&self, url: &str, headers: &[Header<'_>]) -> String {
        self.fetch_text_with_timeout(url, headers, self.timeout).await
    }

    /// Body of a 2xx response, or an empty string on any failure.
    pub async fn fetch_text_with_timeout(
        &self,
        url: &str,
        headers: &[Header<'_>],
        timeout: Duration,
    ) -> String {
        match self.send(FetchRequest::get(url, headers), timeout).await {
            Some(response) if response.is_success() => response.body,
            Some(response) => {
                debug!("Upstream {} answered HTTP {}", url, response.status);
                String::new()
            }
            None => String::new(),
        }
    }

    pub async fn fetch_json(&self, url: &str, headers: &[Header<'_>]) -> Option<Value> {
        self.fetch_json_with_timeout(url, headers, self.timeout).await
    }

    /// Parsed JSON body of a 2xx response, or `None` on any failure.
    pub async fn fetch_json_with_timeout(
        &self,
        url: &str,
        headers: &[Header<'_>],
        timeout: Duration,
    ) -> Option<Value> {
        let body = self.fetch_text_with_timeout(url, headers, timeout).await;
        if body.is_empty() {
            return None;
        }
        match serde_json::from_str(&body) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!("Upstream {} returned invalid JSON: {}", url, e);
                None
            }
        }
    }

    /// Address of `target` behind the read-only rendering proxy.
    pub fn mirror_url(&self, target: &str) -> String {
        let target = target
            .strip_prefix("https://")
            .or_else(|| target.strip_prefix("http://"))
            .unwrap_or(target);
        format!("{}/http://{}", self.mirror_base, target)
    }

    /// Fetches `target` through the mirror, once.
    pub async fn fetch_mirror_text(
        &self,
        target: &str,
        headers: &[Header<'_>],
        timeout: Duration,
    ) -> String {
        let mirrored = self.mirror_url(target);
        debug!("Retrying {} through mirror {}", target, mirrored);
        self.fetch_text_with_timeout(&mirrored, headers, timeout)
            .await
    }

    /// Mirror text parsed as JSON. The proxy may wrap the payload in its own
    /// preamble, so the first balanced object is tried when a strict parse
    /// fails.
    pub async fn fetch_mirror_json(
        &self,
        target: &str,
        headers: &[Header<'_>],
        timeout: Duration,
    ) -> Option<Value> {
        let text = self.fetch_mirror_text(target, headers, timeout).await;
        scan::parse_json_loose(&text)
    }

    /// Direct fetch, then exactly one mirror attempt of the same URL with the
    /// same headers.
    pub async fn fetch_text_or_mirror(
        &self,
        url: &str,
        headers: &[Header<'_>],
        timeout: Duration,
    ) -> String {
        let text = self.fetch_text_with_timeout(url, headers, timeout).await;
        if !text.is_empty() {
            return text;
        }
        self.fetch_mirror_text(url, headers, timeout).await
    }

    pub async fn fetch_json_or_mirror(
        &self,
        url: &str,
        headers: &[Header<'_>],
        timeout: Duration,
    ) -> Option<Value> {
        if let Some(value) = self.fetch_json_with_timeout(url, headers, timeout).await {
            return Some(value);
        }
        self.fetch_mirror_json(url, headers, timeout).await
    }

    /// Form POST returning the raw response whatever its status; `None` only
    /// on transport failure or timeout.
    pub async fn post_form(
        &self,
        url: &str,
        form: &[(String, String)],
        headers: &[Header<'_>],
        timeout: Duration,
    ) -> Option<FetchResponse> {
        self.send(FetchRequest::post_form(url, form, headers), timeout)
            .await
    }
}
