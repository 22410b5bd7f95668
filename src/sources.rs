use std::time::Duration;

use regex::Regex;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_LENGTH, HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use serde_json::Value;

use crate::config::{ApiUrls, StaticSource};
use crate::error::DepotError;

/// One build as reported by the build API.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RawBuild {
    pub version: String,
    pub date: String,
    pub files: Vec<RawBuildFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RawBuildFile {
    pub filename: String,
    pub url: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
    pub size: u64,
}

/// Remote discovery used by the catalog scan.
pub trait SourceClient: Send + Sync {
    /// Raw hrefs on a file-index page that match `pattern`.
    fn list_static_files(
        &self,
        source: &StaticSource,
        pattern: &Regex,
    ) -> Result<Vec<String>, DepotError>;
    fn probe_size(&self, url: &str) -> Result<u64, DepotError>;
    fn fetch_builds(&self, profile_id: &str) -> Result<Vec<RawBuild>, DepotError>;
    fn list_companion_repos(&self) -> Result<Vec<String>, DepotError>;
    fn latest_release_assets(&self, repo: &str) -> Result<Vec<ReleaseAsset>, DepotError>;
}

#[derive(Clone)]
pub struct HttpSourceClient {
    client: Client,
    api: ApiUrls,
    github_headers: HeaderMap,
}

impl HttpSourceClient {
    pub fn new(api: ApiUrls, token: Option<&str>) -> Result<Self, DepotError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("depot/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| DepotError::SourceHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|err| DepotError::SourceHttp(err.to_string()))?;

        let mut github_headers = HeaderMap::new();
        github_headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github.v3+json"),
        );
        if let Some(token) = token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|err| DepotError::SourceHttp(err.to_string()))?;
            value.set_sensitive(true);
            github_headers.insert(AUTHORIZATION, value);
        }

        Ok(Self {
            client,
            api,
            github_headers,
        })
    }

    fn github(&self, url: &str) -> RequestBuilder {
        self.client.get(url).headers(self.github_headers.clone())
    }

    fn send(request: RequestBuilder) -> Result<Response, DepotError> {
        let response = request
            .send()
            .map_err(|err| DepotError::SourceHttp(err.to_string()))?;
        Self::handle_status(response)
    }

    fn handle_status(response: Response) -> Result<Response, DepotError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "source request failed".to_string());
        Err(DepotError::SourceStatus { status, message })
    }
}

impl SourceClient for HttpSourceClient {
    fn list_static_files(
        &self,
        source: &StaticSource,
        pattern: &Regex,
    ) -> Result<Vec<String>, DepotError> {
        let response = Self::send(self.client.get(&source.url))?;
        let body = response
            .text()
            .map_err(|err| DepotError::SourceHttp(err.to_string()))?;
        Ok(extract_links(&body, pattern))
    }

    fn probe_size(&self, url: &str) -> Result<u64, DepotError> {
        let response = Self::send(self.client.head(url).timeout(Duration::from_secs(5)))?;
        Ok(response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse().ok())
            .unwrap_or(0))
    }

    fn fetch_builds(&self, profile_id: &str) -> Result<Vec<RawBuild>, DepotError> {
        let url = self.api.builds_url(profile_id);
        let response = Self::send(self.client.get(&url))?;
        response
            .json()
            .map_err(|err| DepotError::SourceHttp(err.to_string()))
    }

    fn list_companion_repos(&self) -> Result<Vec<String>, DepotError> {
        let response = Self::send(self.github(&self.api.gapps_org))?;
        let repos: Vec<Value> = response
            .json()
            .map_err(|err| DepotError::SourceHttp(err.to_string()))?;
        Ok(repos
            .iter()
            .filter_map(|repo| repo.get("name").and_then(|value| value.as_str()))
            .map(|name| name.to_string())
            .collect())
    }

    fn latest_release_assets(&self, repo: &str) -> Result<Vec<ReleaseAsset>, DepotError> {
        #[derive(Deserialize)]
        struct Release {
            #[serde(default)]
            assets: Vec<ReleaseAsset>,
        }

        let url = self.api.release_url(repo);
        let response = Self::send(self.github(&url))?;
        let release: Release = response
            .json()
            .map_err(|err| DepotError::SourceHttp(err.to_string()))?;
        Ok(release.assets)
    }
}

/// Capture group 1 of every match, or the whole match when the pattern has no group.
pub fn extract_links(body: &str, pattern: &Regex) -> Vec<String> {
    pattern
        .captures_iter(body)
        .filter_map(|captures| captures.get(1).or_else(|| captures.get(0)))
        .map(|found| found.as_str().to_string())
        .collect()
}
