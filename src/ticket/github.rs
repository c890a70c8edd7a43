use super::{Ticket, TicketQueue};
use crate::config::GitHubConfig;
use crate::constants::ticket::REQUEST_LABEL;
use crate::error::{PorterError, Result};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

const API_BASE: &str = "https://api.github.com";

#[derive(Debug, Deserialize)]
struct Issue {
    number: u64,
    title: String,
    user: Option<IssueUser>,
}

#[derive(Debug, Deserialize)]
struct IssueUser {
    login: String,
}

/// Ticket queue on the issues of one GitHub repository
pub struct GitHubQueue {
    http: reqwest::Client,
    api_base: String,
    token: String,
    owner: String,
    repo: String,
}

impl GitHubQueue {
    pub fn from_config(config: &GitHubConfig) -> Result<Self> {
        let missing = |name: &str| PorterError::config(format!("GitHub {} is not configured", name));
        let token = config.token.clone().ok_or_else(|| missing("token"))?;
        let owner = config.user.clone().ok_or_else(|| missing("user"))?;
        let repo = config.repo.clone().ok_or_else(|| missing("repo"))?;

        let http = reqwest::Client::builder()
            .user_agent(concat!("image-porter/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PorterError::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_base: API_BASE.to_string(),
            token,
            owner,
            repo,
        })
    }

    /// Point the client at a different API root, e.g. GitHub Enterprise.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!(
            "{}/repos/{}/{}{}",
            self.api_base, self.owner, self.repo, path
        );
        debug!("{} {}", method, url);
        self.http
            .request(method, url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    async fn send(&self, request: RequestBuilder, action: &str) -> Result<reqwest::Response> {
        request
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| PorterError::external(format!("GitHub {} failed", action), e))
    }
}

#[async_trait]
impl TicketQueue for GitHubQueue {
    async fn fetch_open_request(&self) -> Result<Option<Ticket>> {
        let request = self.request(Method::GET, "/issues").query(&[
            ("state", "open"),
            ("labels", REQUEST_LABEL),
            ("sort", "created"),
            ("direction", "desc"),
            ("per_page", "1"),
        ]);
        let issues: Vec<Issue> = self
            .send(request, "issue listing")
            .await?
            .json()
            .await
            .map_err(|e| PorterError::external("failed to decode GitHub issues", e))?;

        Ok(issues.into_iter().next().map(|issue| {
            info!("Picked up issue #{}: {}", issue.number, issue.title);
            Ticket {
                id: issue.number,
                title: issue.title,
                requester: issue.user.map(|u| u.login).unwrap_or_default(),
            }
        }))
    }

    async fn post_comment(&self, id: u64, text: &str) -> Result<()> {
        let request = self
            .request(Method::POST, &format!("/issues/{}/comments", id))
            .json(&json!({ "body": text }));
        self.send(request, "comment")
            .await
            .map_err(|e| e.with_context("issue_number", id))?;
        debug!("Commented on issue #{}", id);
        Ok(())
    }

    async fn add_labels(&self, id: u64, labels: &[&str]) -> Result<()> {
        let request = self
            .request(Method::POST, &format!("/issues/{}/labels", id))
            .json(&json!({ "labels": labels }));
        self.send(request, "labeling").await.map_err(|e| {
            e.with_context("issue_number", id)
                .with_context("labels", labels.join(","))
        })?;
        info!("Labeled issue #{}: {}", id, labels.join(", "));
        Ok(())
    }

    async fn close(&self, id: u64) -> Result<()> {
        let request = self
            .request(Method::PATCH, &format!("/issues/{}", id))
            .json(&json!({ "state": "closed" }));
        self.send(request, "close")
            .await
            .map_err(|e| e.with_context("issue_number", id))?;
        info!("Closed issue #{}", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_from_config_requires_token() {
        let err = GitHubQueue::from_config(&GitHubConfig {
            user: Some("octo".to_string()),
            repo: Some("mirror".to_string()),
            ..Default::default()
        })
        .err()
        .unwrap();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.message().contains("token"));
    }

    #[test]
    fn test_issue_decoding() {
        let issues: Vec<Issue> = serde_json::from_str(
            r#"[{"number": 7, "title": "[PORTER] quay.io/coreos/etcd:v3.5.0", "user": {"login": "octo"}, "labels": []}]"#,
        )
        .unwrap();
        assert_eq!(issues[0].number, 7);
        assert_eq!(issues[0].user.as_ref().unwrap().login, "octo");
    }

    #[test]
    fn test_api_base_override() {
        let queue = GitHubQueue::from_config(&GitHubConfig {
            token: Some("t".to_string()),
            user: Some("octo".to_string()),
            repo: Some("mirror".to_string()),
            run_id: None,
        })
        .unwrap()
        .with_api_base("https://ghe.example.com/api/v3/");
        assert_eq!(queue.api_base, "https://ghe.example.com/api/v3");
    }
}
