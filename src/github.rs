//! GitHub contents API: repository URL parsing and file listing.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use std::collections::HashSet;
use tracing::{info, warn};
use url::Url;

use crate::harvest::fetch::HttpContentFetcher;
use crate::model::FileRef;
use crate::traits::{ListingError, RepositoryLister};

pub const DEFAULT_API_BASE: &str = "https://api.github.com";

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Splits `https://github.com/<owner>/<repo>[/...]` into owner and repo.
pub fn parse_repo_url(repo_url: &str) -> Result<(String, String), ListingError> {
    let invalid = |reason: &str| ListingError::InvalidRepoUrl {
        url: repo_url.to_string(),
        reason: reason.to_string(),
    };

    let parsed = Url::parse(repo_url).map_err(|e| invalid(&e.to_string()))?;
    let mut segments = parsed
        .path_segments()
        .ok_or_else(|| invalid("URL has no path"))?
        .filter(|s| !s.is_empty());

    let (Some(owner), Some(repo)) = (segments.next(), segments.next()) else {
        return Err(invalid("expected /<owner>/<repo>"));
    };
    let repo = repo.strip_suffix(".git").unwrap_or(repo);

    info!(owner, repo, "Parsed GitHub repository");
    Ok((owner.to_string(), repo.to_string()))
}

/// Client for the GitHub REST contents endpoints.
#[derive(Debug, Clone)]
pub struct GithubClient {
    http: reqwest::Client,
    api_base: String,
}

impl GithubClient {
    /// Builds a client against `api_base`, authenticating with `token` when
    /// one is given.
    pub fn new(api_base: &str, token: Option<&str>) -> Result<Self, ListingError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));

        if let Some(token) = token.filter(|t| !t.is_empty()) {
            match HeaderValue::from_str(&format!("Bearer {}", token)) {
                Ok(mut value) => {
                    value.set_sensitive(true);
                    headers.insert(AUTHORIZATION, value);
                }
                Err(_) => warn!("GitHub token contains invalid header characters, ignoring it"),
            }
        }

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    /// A content fetcher sharing this client's headers and connection pool.
    pub fn content_fetcher(&self) -> HttpContentFetcher {
        HttpContentFetcher::new(self.http.clone())
    }
}

#[async_trait]
impl RepositoryLister for GithubClient {
    async fn list_matching(
        &self,
        owner: &str,
        repo: &str,
        wanted: &[String],
    ) -> Result<Vec<FileRef>, ListingError> {
        let api_url = format!("{}/repos/{}/{}/contents/", self.api_base, owner, repo);
        info!(url = %api_url, "Getting repository files from GitHub");

        let response = self.http.get(&api_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "GitHub contents listing failed");
            return Err(ListingError::Status {
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        let contents: Vec<FileRef> =
            serde_json::from_slice(&body).map_err(|e| ListingError::Decode(e.to_string()))?;

        let wanted: HashSet<&str> = wanted.iter().map(String::as_str).collect();
        let mut seen = HashSet::new();
        let files: Vec<FileRef> = contents
            .into_iter()
            .filter(|f| wanted.contains(f.path.as_str()) && seen.insert(f.path.clone()))
            .collect();

        info!(matched = files.len(), "Total matching files found");
        Ok(files)
    }
}
