use crate::error::{DependapyError, Result};
use crate::publish::{HostingApi, NewPullRequest, PullRequestHandle, PullRequestState, RepoSlug};
use crate::python::pypi::{build_client, validate_service_url};
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

pub const DEFAULT_API_URL: &str = "https://api.github.com";

const ACCEPT: &str = "application/vnd.github+json";

/// GitHub REST v3 client for the few pull request calls publishing needs.
pub struct GitHubClient {
    client: Client,
    api_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct RepositoryResponse {
    default_branch: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullSummary {
    pub number: u64,
    pub state: String,
    #[serde(default)]
    pub merged_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedPull {
    number: u64,
}

impl GitHubClient {
    pub fn new(api_url: &str, token: &str) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            api_url: validate_service_url(api_url)?,
            token: token.to_string(),
        })
    }

    fn repo_url(&self, repo: &RepoSlug, tail: &str) -> String {
        format!("{}/repos/{}/{}{}", self.api_url, repo.owner, repo.name, tail)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, ACCEPT)
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    fn send(&self, builder: RequestBuilder, what: &str) -> Result<Response> {
        let response = self
            .authorized(builder)
            .send()
            .map_err(|e| DependapyError::Publish(format!("{what}: request failed: {e}")))?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(DependapyError::Authentication(format!(
                    "{what}: GitHub rejected the token (HTTP {})",
                    response.status()
                )))
            }
            status if status.is_success() => Ok(response),
            status => {
                let text = response.text().unwrap_or_default();
                Err(DependapyError::Publish(format!(
                    "{what}: HTTP {status}: {}",
                    text.trim()
                )))
            }
        }
    }

    fn json<T: DeserializeOwned>(response: Response, what: &str) -> Result<T> {
        response
            .json()
            .map_err(|e| DependapyError::Publish(format!("{what}: unexpected response: {e}")))
    }
}

impl HostingApi for GitHubClient {
    fn default_branch(&self, repo: &RepoSlug) -> Result<String> {
        let url = self.repo_url(repo, "");
        debug!("Fetching: {}", url);
        let response = self.send(self.client.get(&url), "repository lookup")?;
        let repository: RepositoryResponse = Self::json(response, "repository lookup")?;
        Ok(repository.default_branch)
    }

    fn find_pull_request(&self, repo: &RepoSlug, branch: &str) -> Result<PullRequestHandle> {
        let url = self.repo_url(repo, "/pulls");
        let head = format!("{}:{}", repo.owner, branch);
        debug!("Fetching: {} (head={})", url, head);
        let request = self.client.get(&url).query(&[
            ("state", "all"),
            ("head", head.as_str()),
            ("per_page", "100"),
        ]);
        let response = self.send(request, "pull request lookup")?;
        let pulls: Vec<PullSummary> = Self::json(response, "pull request lookup")?;
        Ok(select_handle(branch, &pulls))
    }

    fn create_pull_request(&self, repo: &RepoSlug, request: &NewPullRequest) -> Result<u64> {
        let url = self.repo_url(repo, "/pulls");
        let payload = json!({
            "title": request.title,
            "body": request.body,
            "head": request.head,
            "base": request.base,
        });
        let response = self.send(self.client.post(&url).json(&payload), "pull request creation")?;
        let created: CreatedPull = Self::json(response, "pull request creation")?;
        Ok(created.number)
    }

    fn update_pull_request(&self, repo: &RepoSlug, number: u64, title: &str, body: &str) -> Result<()> {
        let url = self.repo_url(repo, &format!("/pulls/{number}"));
        let payload = json!({ "title": title, "body": body });
        self.send(self.client.patch(&url).json(&payload), "pull request update")?;
        Ok(())
    }
}

/// Pick the pull request that represents `branch`: an open one wins, then
/// the most recently merged one. Closed-unmerged pull requests count as
/// absent.
pub fn select_handle(branch: &str, pulls: &[PullSummary]) -> PullRequestHandle {
    if let Some(open) = pulls.iter().find(|pr| pr.state == "open") {
        return PullRequestHandle::new(branch, Some(open.number), PullRequestState::Open);
    }

    pulls
        .iter()
        .filter(|pr| pr.merged_at.is_some())
        .max_by(|a, b| a.merged_at.cmp(&b.merged_at))
        .map(|merged| PullRequestHandle::new(branch, Some(merged.number), PullRequestState::Merged))
        .unwrap_or_else(|| PullRequestHandle::new(branch, None, PullRequestState::Absent))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pulls(body: &str) -> Vec<PullSummary> {
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn open_pull_request_wins() {
        let handle = select_handle(
            "dependapy/update-root",
            &pulls(
                r#"[{"number": 3, "state": "closed", "merged_at": "2024-05-01T10:00:00Z"},
                    {"number": 7, "state": "open", "merged_at": null}]"#,
            ),
        );
        assert_eq!(handle.state, PullRequestState::Open);
        assert_eq!(handle.number, Some(7));
    }

    #[test]
    fn latest_merged_pull_request_is_reported() {
        let handle = select_handle(
            "b",
            &pulls(
                r#"[{"number": 3, "state": "closed", "merged_at": "2024-05-01T10:00:00Z"},
                    {"number": 5, "state": "closed", "merged_at": "2024-06-01T10:00:00Z"},
                    {"number": 6, "state": "closed"}]"#,
            ),
        );
        assert_eq!(handle.state, PullRequestState::Merged);
        assert_eq!(handle.number, Some(5));
    }

    #[test]
    fn closed_or_missing_pull_requests_are_absent() {
        let handle = select_handle("b", &pulls(r#"[{"number": 6, "state": "closed"}]"#));
        assert_eq!(handle.state, PullRequestState::Absent);
        assert_eq!(handle.number, None);
        assert_eq!(select_handle("b", &[]).state, PullRequestState::Absent);
    }

    #[test]
    fn rejects_invalid_api_url() {
        assert!(GitHubClient::new("not a url", "token").is_err());
        assert!(GitHubClient::new("https://github.example.com/api/v3/", "token").is_ok());
    }
}
