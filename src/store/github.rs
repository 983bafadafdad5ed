//! GitHub content store using the REST API.
//!
//! # Endpoints
//!
//! - head: `GET /repos/{owner}/{repo}/git/ref/heads/{branch}`
//! - create branch: `POST /repos/{owner}/{repo}/git/refs`
//! - write file: `PUT /repos/{owner}/{repo}/contents/{path}`
//! - merge: `POST /repos/{owner}/{repo}/merges`
//! - delete branch: `DELETE /repos/{owner}/{repo}/git/refs/heads/{branch}`
//!
//! # Timeouts and retries
//!
//! Every request carries the client-wide timeout. Only the head read is
//! retried, and only on network errors and 5xx responses; writes, merges and
//! deletes are attempted exactly once.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::traits::{ContentStore, FileCommit, MergeOutcome, PutFileRequest};
use crate::config::Config;
use crate::error::StoreError;

/// User-Agent header value for API requests.
const USER_AGENT_VALUE: &str = concat!("mailpress/", env!("CARGO_PKG_VERSION"));

/// Pause between head-read attempts.
const RETRY_DELAY: Duration = Duration::from_millis(250);

/// GitHub-backed [`ContentStore`].
pub struct GitHubStore {
    client: Client,
    token: SecretString,
    owner: String,
    repo: String,
    api_base: String,
    read_attempts: u32,
}

// Custom Debug to keep the token out of logs.
impl std::fmt::Debug for GitHubStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubStore")
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .field("api_base", &self.api_base)
            .field("read_attempts", &self.read_attempts)
            .finish()
    }
}

impl GitHubStore {
    /// Create a store for `owner/repo` behind `api_base`.
    ///
    /// `timeout` applies to every request made through this store.
    pub fn new(
        token: SecretString,
        owner: impl Into<String>,
        repo: impl Into<String>,
        api_base: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT_VALUE)
            .build()
            .map_err(|e| StoreError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            token,
            owner: owner.into(),
            repo: repo.into(),
            api_base: api_base.into(),
            read_attempts: 1,
        })
    }

    /// Build a store from the process configuration.
    pub fn from_config(config: &Config) -> Result<Self, StoreError> {
        Ok(Self::new(
            config.github_token.clone(),
            config.github_user.clone(),
            config.github_repo.clone(),
            config.api_base.clone(),
            config.timeout,
        )?
        .with_read_attempts(config.read_attempts))
    }

    /// Set the total number of attempts for the head read (minimum 1).
    pub fn with_read_attempts(mut self, attempts: u32) -> Self {
        self.read_attempts = attempts.max(1);
        self
    }

    fn headers(&self) -> Result<HeaderMap, StoreError> {
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", self.token.expose_secret()))
            .map_err(|_| StoreError::AuthFailed("token is not a valid header value".into()))?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "x-github-api-version",
            HeaderValue::from_static("2022-11-28"),
        );
        Ok(headers)
    }

    /// `{api_base}/repos/{owner}/{repo}/{path}`, with each path segment
    /// percent-encoded.
    fn repo_url(&self, path: &str) -> Result<Url, StoreError> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|e| StoreError::Network(format!("invalid API base {}: {e}", self.api_base)))?;
        url.path_segments_mut()
            .map_err(|()| StoreError::Network(format!("invalid API base {}", self.api_base)))?
            .pop_if_empty()
            .push("repos")
            .push(&self.owner)
            .push(&self.repo)
            .extend(path.split('/').filter(|s| !s.is_empty()));
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, StoreError> {
        request
            .headers(self.headers()?)
            .send()
            .await
            .map_err(|e| StoreError::Network(e.to_string()))
    }

    /// Decode a success body, or map the error response.
    async fn handle_response<T: DeserializeOwned>(response: Response) -> Result<T, StoreError> {
        let status = response.status();
        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| StoreError::InvalidResponse(format!("{status}: {e}")))
        } else {
            Err(Self::error_from_response(response).await)
        }
    }

    /// Map a non-success response to a [`StoreError`].
    async fn error_from_response(response: Response) -> StoreError {
        let status = response.status();
        let rate_limited = response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == "0");

        let message = match response.json::<GitHubErrorResponse>().await {
            Ok(err) => err.message,
            Err(_) => "Unknown error".to_string(),
        };

        match status {
            StatusCode::UNAUTHORIZED => StoreError::AuthFailed("Invalid or expired token".into()),
            StatusCode::FORBIDDEN if rate_limited => StoreError::RateLimited,
            StatusCode::FORBIDDEN => StoreError::AuthFailed(format!("Permission denied: {message}")),
            StatusCode::NOT_FOUND => StoreError::NotFound(message),
            StatusCode::CONFLICT => StoreError::Conflict(message),
            StatusCode::TOO_MANY_REQUESTS => StoreError::RateLimited,
            _ if status.is_server_error() => StoreError::Api {
                status: status.as_u16(),
                message: format!("GitHub server error: {message}"),
            },
            _ => StoreError::Api {
                status: status.as_u16(),
                message,
            },
        }
    }

    /// Errors worth another head-read attempt.
    fn is_transient(err: &StoreError) -> bool {
        match err {
            StoreError::Network(_) => true,
            StoreError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    async fn fetch_head(&self, url: &Url) -> Result<String, StoreError> {
        let response = self.send(self.client.get(url.clone())).await?;
        let git_ref: GitHubRef = Self::handle_response(response).await?;
        debug!(git_ref = %git_ref.ref_name, sha = %git_ref.object.sha, "Resolved branch head");
        Ok(git_ref.object.sha)
    }

    /// Blob SHA of an existing file on `branch`, if there is one.
    async fn existing_sha(&self, path: &str, branch: &str) -> Result<Option<String>, StoreError> {
        let mut url = self.repo_url(&format!("contents/{path}"))?;
        url.query_pairs_mut().append_pair("ref", branch);

        let response = self.send(self.client.get(url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let entry: ContentsEntry = Self::handle_response(response).await?;
        Ok(Some(entry.sha))
    }

    async fn put_contents(
        &self,
        request: &PutFileRequest,
        encoded: &str,
        sha: Option<&str>,
    ) -> Result<PutContentsResponse, StoreError> {
        let url = self.repo_url(&format!("contents/{}", request.path))?;
        let body = PutContentsBody {
            message: &request.message,
            content: encoded,
            branch: &request.branch,
            sha,
        };
        let response = self.send(self.client.put(url).json(&body)).await?;
        Self::handle_response(response).await
    }
}

#[async_trait]
impl ContentStore for GitHubStore {
    fn name(&self) -> &'static str {
        "github"
    }

    async fn branch_head(&self, branch: &str) -> Result<String, StoreError> {
        let url = self.repo_url(&format!("git/ref/heads/{branch}"))?;

        let mut attempt = 1;
        loop {
            match self.fetch_head(&url).await {
                Err(ref e) if Self::is_transient(e) && attempt < self.read_attempts => {
                    warn!(branch, attempt, error = %e, "Branch head read failed, retrying");
                    tokio::time::sleep(RETRY_DELAY).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn create_branch(&self, name: &str, sha: &str) -> Result<(), StoreError> {
        let url = self.repo_url("git/refs")?;
        let body = CreateRefBody {
            ref_name: format!("refs/heads/{name}"),
            sha,
        };
        let response = self.send(self.client.post(url).json(&body)).await?;
        let created: GitHubRef = Self::handle_response(response).await?;
        debug!(git_ref = %created.ref_name, sha = %created.object.sha, "Created branch");
        Ok(())
    }

    async fn put_file(&self, request: PutFileRequest) -> Result<FileCommit, StoreError> {
        let encoded = STANDARD.encode(&request.content);

        let written = match self.put_contents(&request, &encoded, None).await {
            Ok(written) => written,
            // Overwriting an existing file needs its current blob SHA.
            Err(err @ StoreError::Api { status: 422, .. }) => {
                match self.existing_sha(&request.path, &request.branch).await? {
                    Some(sha) => self.put_contents(&request, &encoded, Some(&sha)).await?,
                    None => return Err(err),
                }
            }
            Err(err) => return Err(err),
        };

        Ok(FileCommit {
            path: request.path,
            commit_sha: written.commit.sha,
        })
    }

    async fn merge(
        &self,
        base: &str,
        head: &str,
        message: &str,
    ) -> Result<MergeOutcome, StoreError> {
        let url = self.repo_url("merges")?;
        let body = MergeBody {
            base,
            head,
            commit_message: message,
        };
        let response = self.send(self.client.post(url).json(&body)).await?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(MergeOutcome::UpToDate);
        }
        let commit: GitHubCommit = Self::handle_response(response).await?;
        Ok(MergeOutcome::Merged { sha: commit.sha })
    }

    async fn delete_branch(&self, name: &str) -> Result<(), StoreError> {
        let url = self.repo_url(&format!("git/refs/heads/{name}"))?;
        let response = self.send(self.client.delete(url)).await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::error_from_response(response).await)
        }
    }
}

// --------------------------------------------------------------------------
// Wire types
// --------------------------------------------------------------------------

#[derive(Deserialize)]
struct GitHubRef {
    #[serde(rename = "ref")]
    ref_name: String,
    object: GitHubObject,
}

#[derive(Deserialize)]
struct GitHubObject {
    sha: String,
}

#[derive(Serialize)]
struct CreateRefBody<'a> {
    #[serde(rename = "ref")]
    ref_name: String,
    sha: &'a str,
}

#[derive(Serialize)]
struct PutContentsBody<'a> {
    message: &'a str,
    content: &'a str,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Deserialize)]
struct PutContentsResponse {
    commit: GitHubCommit,
}

#[derive(Deserialize)]
struct GitHubCommit {
    sha: String,
}

#[derive(Deserialize)]
struct ContentsEntry {
    sha: String,
}

#[derive(Serialize)]
struct MergeBody<'a> {
    base: &'a str,
    head: &'a str,
    commit_message: &'a str,
}

#[derive(Deserialize)]
struct GitHubErrorResponse {
    message: String,
}
