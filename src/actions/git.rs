//! Git operation actions.
//!
//! All commands run through the `git` CLI inside the task workspace.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use url::Url;

use super::{opt_str_arg, str_arg, Action, ActionContext, ActionParameter};

/// Clone a repository into the task workspace.
pub struct CloneRepo;

#[async_trait]
impl Action for CloneRepo {
    fn name(&self) -> &str {
        "clone_repo"
    }

    fn description(&self) -> &str {
        "Clones a GitHub repository into the dest_path folder which it expects not to exist. This will fail if that folder is already present"
    }

    fn parameters(&self) -> Vec<ActionParameter> {
        vec![
            ActionParameter::required("repo_url", "string", "URL of the GitHub repository"),
            ActionParameter::optional(
                "dest_path",
                "string",
                "Local destination path.  If empty it defaults to a local folder matching the git repository name",
            ),
        ]
    }

    async fn run(&self, ctx: &ActionContext<'_>, args: &Value) -> anyhow::Result<String> {
        let repo_url = plain_arg(args, "repo_url")?;
        let dest_path = match opt_str_arg(args, "dest_path") {
            Some(p) => p.to_string(),
            None => default_clone_dir(repo_url)
                .ok_or_else(|| anyhow::anyhow!("Cannot derive a folder name from '{}'", repo_url))?,
        };

        let task = ctx.task_key();
        if ctx.workspace.exists(&task, &dest_path).await? {
            return Err(anyhow::anyhow!(
                "Destination '{}' already exists in the workspace",
                dest_path
            ));
        }
        let dest = ctx.workspace.resolve(&task, &dest_path)?;
        let task_root = ctx.workspace.task_root(&task);
        tokio::fs::create_dir_all(&task_root).await?;

        let token = ctx.config.github.token.as_deref();
        let clone_url = authenticated_url(repo_url, token);
        let dest_str = dest.to_string_lossy().to_string();

        run_git_command(&["clone", "--", &clone_url, &dest_str], &task_root)
            .await
            .map_err(|e| match token {
                Some(t) => anyhow::anyhow!("{}", e.to_string().replace(t, "***")),
                None => e,
            })?;

        Ok(format!("Successfully cloned repository to {}.", dest_path))
    }
}

/// Create and check out a new branch.
pub struct CreateBranch;

#[async_trait]
impl Action for CreateBranch {
    fn name(&self) -> &str {
        "create_branch"
    }

    fn description(&self) -> &str {
        "Creates a new branch in the repository."
    }

    fn parameters(&self) -> Vec<ActionParameter> {
        vec![
            ActionParameter::required("branch_name", "string", "Name of the new branch"),
            ActionParameter::optional("base_branch", "string", "Base branch for the new branch")
                .with_default(json!("main")),
            ActionParameter::required("repo_path", "string", "Path to the local repository"),
        ]
    }

    async fn run(&self, ctx: &ActionContext<'_>, args: &Value) -> anyhow::Result<String> {
        let repo = ctx.workspace.resolve(&ctx.task_key(), str_arg(args, "repo_path")?)?;
        let branch_name = plain_arg(args, "branch_name")?;
        let base_branch = plain_arg(args, "base_branch")?;

        // Fall back to HEAD when the base branch does not exist locally.
        let base_exists = run_git_command(&["rev-parse", "--verify", "--quiet", base_branch], &repo)
            .await
            .is_ok();
        if base_exists {
            run_git_command(&["checkout", "-b", branch_name, base_branch], &repo).await?;
            Ok(format!(
                "Successfully created branch {} from {}",
                branch_name, base_branch
            ))
        } else {
            run_git_command(&["checkout", "-b", branch_name], &repo).await?;
            Ok(format!(
                "Successfully created branch {} from HEAD ({} not found)",
                branch_name, base_branch
            ))
        }
    }
}

/// Stage everything and commit.
pub struct CommitChanges;

#[async_trait]
impl Action for CommitChanges {
    fn name(&self) -> &str {
        "commit_changes"
    }

    fn description(&self) -> &str {
        "Commits changes made in the current branch."
    }

    fn parameters(&self) -> Vec<ActionParameter> {
        vec![
            ActionParameter::required("commit_message", "string", "Message for the commit"),
            ActionParameter::required("repo_path", "string", "Path to the local repository"),
        ]
    }

    async fn run(&self, ctx: &ActionContext<'_>, args: &Value) -> anyhow::Result<String> {
        let repo = ctx.workspace.resolve(&ctx.task_key(), str_arg(args, "repo_path")?)?;
        let message = str_arg(args, "commit_message")?;

        let status = run_git_command(&["status", "--porcelain"], &repo).await?;
        if status.trim().is_empty() {
            return Ok("No changes to commit.".to_string());
        }

        run_git_command(&["add", "-A"], &repo).await?;
        run_git_command(&["commit", "-m", message], &repo).await?;

        Ok(format!(
            "Successfully committed changes with message: {}",
            message
        ))
    }
}

/// Push a branch to a remote.
pub struct PushBranch;

#[async_trait]
impl Action for PushBranch {
    fn name(&self) -> &str {
        "push_branch"
    }

    fn description(&self) -> &str {
        "Pushes the current branch to the specified remote."
    }

    fn parameters(&self) -> Vec<ActionParameter> {
        vec![
            ActionParameter::required("branch_name", "string", "Name of the branch to push"),
            ActionParameter::optional(
                "remote_name",
                "string",
                "Name of the remote (default is 'origin')",
            )
            .with_default(json!("origin")),
            ActionParameter::required("repo_path", "string", "Path to the local repository"),
        ]
    }

    async fn run(&self, ctx: &ActionContext<'_>, args: &Value) -> anyhow::Result<String> {
        let repo = ctx.workspace.resolve(&ctx.task_key(), str_arg(args, "repo_path")?)?;
        let branch_name = plain_arg(args, "branch_name")?;
        let remote_name = plain_arg(args, "remote_name")?;

        run_git_command(&["push", "--", remote_name, branch_name], &repo).await?;

        Ok(format!(
            "Successfully pushed branch '{}' to remote '{}'.",
            branch_name, remote_name
        ))
    }
}

/// String argument that git must not read as an option.
fn plain_arg<'a>(args: &'a Value, name: &str) -> anyhow::Result<&'a str> {
    let value = str_arg(args, name)?;
    if value.trim_start().starts_with('-') {
        return Err(anyhow::anyhow!(
            "'{}' must not start with '-', got '{}'",
            name,
            value
        ));
    }
    Ok(value)
}

/// Last path segment of a repository URL, without `.git`.
fn default_clone_dir(repo_url: &str) -> Option<String> {
    let name = repo_url
        .trim()
        .trim_end_matches('/')
        .rsplit(['/', ':'])
        .next()?
        .trim_end_matches(".git");
    (!name.is_empty()).then(|| name.to_string())
}

/// Inject `token` as userinfo into an https URL; other URLs pass through.
fn authenticated_url(repo_url: &str, token: Option<&str>) -> String {
    let Some(token) = token else {
        return repo_url.to_string();
    };
    match Url::parse(repo_url) {
        Ok(mut url) if url.scheme() == "https" && url.username().is_empty() => {
            if url.set_username(token).is_err() {
                return repo_url.to_string();
            }
            url.to_string()
        }
        _ => repo_url.to_string(),
    }
}

/// Run a git command and return its output.
async fn run_git_command(args: &[&str], workspace: &Path) -> anyhow::Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(workspace)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run git: {}", e))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    if !output.status.success() {
        if stderr.trim().is_empty() {
            return Err(anyhow::anyhow!("Git command failed: {}", stdout.trim()));
        }
        return Err(anyhow::anyhow!("Git error: {}", stderr.trim()));
    }

    Ok(stdout.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::testing::Fixture;

    async fn git(args: &[&str], dir: &Path) -> String {
        run_git_command(args, dir).await.unwrap()
    }

    /// Create `<task root>/repo` with one commit on `main`.
    async fn init_repo(fixture: &Fixture) -> std::path::PathBuf {
        let repo = fixture.workspace.task_root(&fixture.task_id.to_string()).join("repo");
        tokio::fs::create_dir_all(&repo).await.unwrap();
        git(&["init", "-q", "-b", "main"], &repo).await;
        git(&["config", "user.email", "agent@example.com"], &repo).await;
        git(&["config", "user.name", "Agent"], &repo).await;
        tokio::fs::write(repo.join("README.md"), "hello\n").await.unwrap();
        git(&["add", "-A"], &repo).await;
        git(&["commit", "-q", "-m", "init"], &repo).await;
        repo
    }

    #[test]
    fn clone_dir_defaults_to_repo_name() {
        assert_eq!(
            default_clone_dir("https://github.com/runyontr/docs.git").as_deref(),
            Some("docs")
        );
        assert_eq!(
            default_clone_dir("https://github.com/runyontr/docs/").as_deref(),
            Some("docs")
        );
        assert_eq!(
            default_clone_dir("git@github.com:owner/tool.git").as_deref(),
            Some("tool")
        );
        assert_eq!(default_clone_dir(""), None);
    }

    #[test]
    fn token_is_injected_only_into_https_urls() {
        assert_eq!(
            authenticated_url("https://github.com/o/r.git", Some("tok")),
            "https://tok@github.com/o/r.git"
        );
        assert_eq!(
            authenticated_url("git@github.com:o/r.git", Some("tok")),
            "git@github.com:o/r.git"
        );
        assert_eq!(
            authenticated_url("https://github.com/o/r.git", None),
            "https://github.com/o/r.git"
        );
    }

    #[tokio::test]
    async fn branch_commit_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = Fixture::new(dir.path()).await;
        let repo = init_repo(&fixture).await;
        let ctx = fixture.ctx();

        let out = CreateBranch
            .run(
                &ctx,
                &json!({"repo_path": "repo", "branch_name": "feature", "base_branch": "main"}),
            )
            .await
            .unwrap();
        assert_eq!(out, "Successfully created branch feature from main");
        assert_eq!(git(&["branch", "--show-current"], &repo).await.trim(), "feature");

        let out = CommitChanges
            .run(&ctx, &json!({"repo_path": "repo", "commit_message": "noop"}))
            .await
            .unwrap();
        assert_eq!(out, "No changes to commit.");

        tokio::fs::write(repo.join("new.txt"), "data").await.unwrap();
        let out = CommitChanges
            .run(&ctx, &json!({"repo_path": "repo", "commit_message": "add new"}))
            .await
            .unwrap();
        assert_eq!(out, "Successfully committed changes with message: add new");
        let log = git(&["log", "-1", "--format=%s"], &repo).await;
        assert_eq!(log.trim(), "add new");
    }

    #[tokio::test]
    async fn missing_base_branch_falls_back_to_head() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = Fixture::new(dir.path()).await;
        init_repo(&fixture).await;

        let out = CreateBranch
            .run(
                &fixture.ctx(),
                &json!({"repo_path": "repo", "branch_name": "fix", "base_branch": "develop"}),
            )
            .await
            .unwrap();
        assert!(out.contains("from HEAD"));
    }

    #[tokio::test]
    async fn clone_from_local_repo_and_refuse_existing_destination() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = Fixture::new(dir.path()).await;
        let source = init_repo(&fixture).await;
        let source_url = source.to_string_lossy().to_string();
        let ctx = fixture.ctx();

        let out = CloneRepo
            .run(&ctx, &json!({"repo_url": source_url, "dest_path": "copy"}))
            .await
            .unwrap();
        assert_eq!(out, "Successfully cloned repository to copy.");
        assert!(ctx
            .workspace
            .exists(&ctx.task_key(), "copy/README.md")
            .await
            .unwrap());

        let err = CloneRepo
            .run(&ctx, &json!({"repo_url": source_url, "dest_path": "copy"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[tokio::test]
    async fn option_like_arguments_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = Fixture::new(dir.path()).await;
        let repo = init_repo(&fixture).await;
        let remote = dir.path().join("remote.git");
        git(&["init", "-q", "--bare", &remote.to_string_lossy()], dir.path()).await;
        git(&["remote", "add", "origin", &remote.to_string_lossy()], &repo).await;
        git(&["push", "-q", "-u", "origin", "main"], &repo).await;
        let ctx = fixture.ctx();

        let marker = dir.path().join("MARKER");
        let remote_name = format!(
            "--receive-pack=touch {}; git-receive-pack",
            marker.display()
        );
        let err = PushBranch
            .run(
                &ctx,
                &json!({"repo_path": "repo", "branch_name": "origin", "remote_name": remote_name}),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("remote_name"));
        assert!(!marker.exists());

        let err = CreateBranch
            .run(
                &ctx,
                &json!({"repo_path": "repo", "branch_name": "-D", "base_branch": "main"}),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("branch_name"));

        let err = CloneRepo
            .run(&ctx, &json!({"repo_url": "--upload-pack=touch x", "dest_path": "copy"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("repo_url"));
        assert!(!ctx.workspace.exists(&ctx.task_key(), "copy").await.unwrap());
    }

    #[tokio::test]
    async fn push_to_local_bare_remote() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = Fixture::new(dir.path()).await;
        let repo = init_repo(&fixture).await;
        let remote = dir.path().join("remote.git");
        git(&["init", "-q", "--bare", &remote.to_string_lossy()], dir.path()).await;
        git(&["remote", "add", "origin", &remote.to_string_lossy()], &repo).await;

        let out = PushBranch
            .run(&fixture.ctx(), &json!({"repo_path": "repo", "branch_name": "main", "remote_name": "origin"}))
            .await
            .unwrap();
        assert_eq!(out, "Successfully pushed branch 'main' to remote 'origin'.");
        let refs = git(&["branch", "--list", "main"], &remote).await;
        assert!(refs.contains("main"));
    }
}
