//! GitHub REST actions: issues, comments and pull requests.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{opt_str_arg, str_arg, u64_arg, Action, ActionContext, ActionParameter};
use crate::config::GithubConfig;

/// Thin GitHub REST v3 client.
#[derive(Clone)]
pub struct GithubClient {
    client: Client,
    api_url: String,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PullRequest {
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct User {
    login: String,
}

#[derive(Debug, Deserialize)]
struct Issue {
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    state: String,
    #[serde(default)]
    pull_request: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Comment {
    user: User,
    #[serde(default)]
    body: Option<String>,
}

/// Issue summary returned by `fetch_issues`.
#[derive(Debug, Serialize, PartialEq)]
pub struct IssueSummary {
    pub number: u64,
    pub title: String,
    pub state: String,
}

impl GithubClient {
    pub fn new(config: &GithubConfig) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> anyhow::Result<RequestBuilder> {
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("GitHub token not found in environment variables."))?;
        Ok(self
            .client
            .request(method, format!("{}{}", self.api_url, path))
            .bearer_auth(token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .header("User-Agent", "forge-agent"))
    }

    async fn send<T: for<'de> Deserialize<'de>>(&self, request: RequestBuilder) -> anyhow::Result<T> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("GitHub API error {}: {}", status, body.trim()));
        }
        Ok(response.json().await?)
    }

    pub async fn create_pull_request(
        &self,
        repo: &str,
        title: &str,
        body: &str,
        base: &str,
        head: &str,
    ) -> anyhow::Result<String> {
        let request = self
            .request(Method::POST, &format!("/repos/{}/pulls", repo))?
            .json(&json!({"title": title, "body": body, "base": base, "head": head}));
        let pr: PullRequest = self.send(request).await?;
        Ok(pr.html_url)
    }

    /// Issues of a repository; pull requests are filtered out.
    pub async fn list_issues(
        &self,
        repo: &str,
        state: &str,
        labels: &[String],
    ) -> anyhow::Result<Vec<IssueSummary>> {
        let mut path = format!("/repos/{}/issues?state={}", repo, urlencoding::encode(state));
        if !labels.is_empty() {
            path.push_str("&labels=");
            path.push_str(&urlencoding::encode(&labels.join(",")));
        }
        let issues: Vec<Issue> = self.send(self.request(Method::GET, &path)?).await?;
        Ok(issues
            .into_iter()
            .filter(|i| i.pull_request.is_none())
            .map(|i| IssueSummary {
                number: i.number,
                title: i.title,
                state: i.state,
            })
            .collect())
    }

    /// Title, body and comments of an issue rendered as text.
    pub async fn issue_with_comments(&self, repo: &str, number: u64) -> anyhow::Result<String> {
        let issue: Issue = self
            .send(self.request(Method::GET, &format!("/repos/{}/issues/{}", repo, number))?)
            .await?;
        let comments: Vec<Comment> = self
            .send(self.request(
                Method::GET,
                &format!("/repos/{}/issues/{}/comments", repo, number),
            )?)
            .await?;

        let mut text = format!(
            "Issue Title: {}\nIssue Body: {}\nComments:",
            issue.title,
            issue.body.unwrap_or_default()
        );
        for comment in comments {
            text.push_str(&format!(
                "\n{}: {}",
                comment.user.login,
                comment.body.unwrap_or_default()
            ));
        }
        Ok(text)
    }

    pub async fn add_comment(&self, repo: &str, number: u64, body: &str) -> anyhow::Result<()> {
        let request = self
            .request(
                Method::POST,
                &format!("/repos/{}/issues/{}/comments", repo, number),
            )?
            .json(&json!({ "body": body }));
        let _: Value = self.send(request).await?;
        Ok(())
    }
}

/// `owner/name` from a repo name that may already include the owner.
fn full_repo_name(repo_name: &str, owner: Option<&str>) -> anyhow::Result<String> {
    let repo_name = repo_name.trim().trim_matches('/');
    if let Some((o, r)) = repo_name.split_once('/') {
        if !o.is_empty() && !r.is_empty() && !r.contains('/') {
            return Ok(format!("{}/{}", o, r));
        }
        return Err(anyhow::anyhow!("Invalid repository name '{}'", repo_name));
    }
    match owner.map(str::trim).filter(|o| !o.is_empty()) {
        Some(owner) => Ok(format!("{}/{}", owner, repo_name)),
        None => Err(anyhow::anyhow!(
            "Repository '{}' needs an owner (use owner/repo)",
            repo_name
        )),
    }
}

fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(str::to_string)
            .collect(),
        Value::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Open a pull request.
pub struct CreatePullRequest;

#[async_trait]
impl Action for CreatePullRequest {
    fn name(&self) -> &str {
        "create_pull_request"
    }

    fn description(&self) -> &str {
        "Creates a pull request on GitHub to merge the head branch into the base"
    }

    fn parameters(&self) -> Vec<ActionParameter> {
        vec![
            ActionParameter::required("title", "string", "Title of the pull request"),
            ActionParameter::required("body", "string", "Description/body of the pull request"),
            ActionParameter::required(
                "repo_name",
                "string",
                "Name of the repository in owner/repo format. The repo at https://github.com/runyontr/docs would be provided as 'runyontr/docs'",
            ),
            ActionParameter::required("base_branch", "string", "Branch the changes will be merged into"),
            ActionParameter::required("head_branch", "string", "Branch where your changes are"),
        ]
    }

    async fn run(&self, ctx: &ActionContext<'_>, args: &Value) -> anyhow::Result<String> {
        let repo = full_repo_name(str_arg(args, "repo_name")?, None)?;
        ctx.github
            .create_pull_request(
                &repo,
                str_arg(args, "title")?,
                str_arg(args, "body")?,
                str_arg(args, "base_branch")?,
                str_arg(args, "head_branch")?,
            )
            .await
    }
}

/// List issues.
pub struct FetchIssues;

#[async_trait]
impl Action for FetchIssues {
    fn name(&self) -> &str {
        "fetch_issues"
    }

    fn description(&self) -> &str {
        "Fetches issues from a GitHub repository."
    }

    fn parameters(&self) -> Vec<ActionParameter> {
        vec![
            ActionParameter::required("repo_name", "string", "Name of the repository"),
            ActionParameter::required("owner", "string", "Owner of the repository"),
            ActionParameter::optional("labels", "list", "Labels to filter issues by"),
            ActionParameter::optional("state", "string", "State of issues ('open', 'closed')")
                .with_default(json!("open")),
        ]
    }

    fn output_type(&self) -> &str {
        "list"
    }

    async fn run(&self, ctx: &ActionContext<'_>, args: &Value) -> anyhow::Result<String> {
        let repo = full_repo_name(str_arg(args, "repo_name")?, opt_str_arg(args, "owner"))?;
        let labels = string_list(&args["labels"]);
        let issues = ctx
            .github
            .list_issues(&repo, str_arg(args, "state")?, &labels)
            .await?;
        Ok(serde_json::to_string(&issues)?)
    }
}

/// Fetch one issue with its comments.
pub struct FetchIssue;

#[async_trait]
impl Action for FetchIssue {
    fn name(&self) -> &str {
        "fetch_issue"
    }

    fn description(&self) -> &str {
        "Fetches a single issue from a GitHub repository using Issue ID."
    }

    fn parameters(&self) -> Vec<ActionParameter> {
        vec![
            ActionParameter::required(
                "repo_name",
                "string",
                "Name of the repository.  Should not include the owner",
            ),
            ActionParameter::required("owner", "string", "Owner of the repository"),
            ActionParameter::required("issue_id", "int", "ID of the issue to fetch"),
        ]
    }

    fn output_type(&self) -> &str {
        "Issue"
    }

    async fn run(&self, ctx: &ActionContext<'_>, args: &Value) -> anyhow::Result<String> {
        let repo = full_repo_name(str_arg(args, "repo_name")?, opt_str_arg(args, "owner"))?;
        let number = u64_arg(args, "issue_id")?;
        ctx.github.issue_with_comments(&repo, number).await
    }
}

/// Comment on an issue.
pub struct AddComment;

#[async_trait]
impl Action for AddComment {
    fn name(&self) -> &str {
        "add_comment"
    }

    fn description(&self) -> &str {
        "Adds a comment to a specified GitHub issue."
    }

    fn parameters(&self) -> Vec<ActionParameter> {
        vec![
            ActionParameter::required("repo_name", "string", "Name of the repository"),
            ActionParameter::required("owner", "string", "Owner of the repository"),
            ActionParameter::required("issue_number", "int", "Number of the issue"),
            ActionParameter::required("comment_body", "string", "Content of the comment"),
        ]
    }

    async fn run(&self, ctx: &ActionContext<'_>, args: &Value) -> anyhow::Result<String> {
        let repo = full_repo_name(str_arg(args, "repo_name")?, opt_str_arg(args, "owner"))?;
        let number = u64_arg(args, "issue_number")?;
        ctx.github
            .add_comment(&repo, number, str_arg(args, "comment_body")?)
            .await?;
        Ok("Successfully added comment to issue.".to_string())
    }
}
