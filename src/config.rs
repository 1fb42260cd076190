//! Configuration management for the forge agent.
//!
//! Configuration can be set via environment variables:
//! - `OPENAI_API_KEY` - Required. API key for the chat-completion service.
//! - `OPENAI_BASE_URL` - Optional. OpenAI-compatible base URL. Defaults to `https://api.openai.com/v1`.
//! - `DEFAULT_MODEL` - Optional. Model used for every step. Defaults to `gpt-4`.
//! - `FILE_EDIT_MODEL` - Optional. Model used by `modify_file`. Defaults to `gpt-3.5-turbo`.
//! - `AGENT_WORKSPACE` - Optional. Base directory of task workspaces. Defaults to `./workspace`.
//! - `DATABASE_PATH` - Optional. SQLite database file. In-memory storage when unset.
//! - `HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Server port. Defaults to `8000`.
//! - `MAX_STEP_RETRIES` - Optional. LLM attempts per step. Defaults to `5`.
//! - `RETRY_BASE_DELAY_SECS` - Optional. First retry delay. Defaults to `30`.
//! - `RETRY_MAX_DELAY_SECS` - Optional. Upper bound on a retry delay. Defaults to `300`.
//! - `REQUEST_DELAY_SECS` - Optional. Pause before each completion request. Defaults to `0`.
//! - `GITHUB_TOKEN` - Optional. Token for GitHub API calls and authenticated clones.
//! - `GITHUB_API_URL` - Optional. GitHub REST base URL. Defaults to `https://api.github.com`.
//! - `LLM_TIMEOUT_SECS` - Optional. Whole-request timeout for completions. Defaults to `300`.
//! - `GITHUB_TIMEOUT_SECS` - Optional. Whole-request timeout for GitHub calls. Defaults to `30`.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Bounded exponential backoff used when the model gives no usable answer.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of completion attempts per step (at least 1)
    pub max_attempts: u32,

    /// Delay before the second attempt; doubled for each further attempt
    pub base_delay: Duration,

    /// Upper bound for a single delay
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(300),
        }
    }
}

impl RetryConfig {
    /// Delay to wait after the failed attempt number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// GitHub access configuration.
#[derive(Debug, Clone)]
pub struct GithubConfig {
    /// Personal access token
    pub token: Option<String>,

    /// REST API base URL
    pub api_url: String,

    /// Timeout of a single REST call
    pub timeout: Duration,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_url: "https://api.github.com".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Chat-completion API key
    pub api_key: String,

    /// Base URL of the OpenAI-compatible API
    pub api_base_url: String,

    /// Model identifier sent with every step
    pub default_model: String,

    /// Model used when rewriting files
    pub file_edit_model: String,

    /// Base directory; each task gets `workspace_path/<task_id>`
    pub workspace_path: PathBuf,

    /// SQLite database file (in-memory store when `None`)
    pub database_path: Option<PathBuf>,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Retry policy for completion requests
    pub retry: RetryConfig,

    /// Pause before each completion request (token rate limits)
    pub request_delay: Duration,

    /// Timeout of a single completion request
    pub llm_timeout: Duration,

    /// GitHub configuration
    pub github: GithubConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `OPENAI_API_KEY` is not set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("OPENAI_API_KEY".to_string()))?;

        let api_base_url = std::env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());

        let default_model = std::env::var("DEFAULT_MODEL").unwrap_or_else(|_| "gpt-4".to_string());

        let file_edit_model =
            std::env::var("FILE_EDIT_MODEL").unwrap_or_else(|_| "gpt-3.5-turbo".to_string());

        let workspace_path = std::env::var("AGENT_WORKSPACE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./workspace"));

        let database_path = std::env::var("DATABASE_PATH")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = parse_env("PORT", 8000u16)?;

        let max_attempts: u32 = parse_env("MAX_STEP_RETRIES", 5)?;
        if max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_STEP_RETRIES".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let retry = RetryConfig {
            max_attempts,
            base_delay: Duration::from_secs(parse_env("RETRY_BASE_DELAY_SECS", 30)?),
            max_delay: Duration::from_secs(parse_env("RETRY_MAX_DELAY_SECS", 300)?),
        };

        let request_delay = Duration::from_secs(parse_env("REQUEST_DELAY_SECS", 0)?);
        let llm_timeout = Duration::from_secs(parse_env("LLM_TIMEOUT_SECS", 300)?);

        let github = GithubConfig {
            token: std::env::var("GITHUB_TOKEN")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            api_url: std::env::var("GITHUB_API_URL")
                .unwrap_or_else(|_| "https://api.github.com".to_string()),
            timeout: Duration::from_secs(parse_env("GITHUB_TIMEOUT_SECS", 30)?),
        };

        Ok(Self {
            api_key,
            api_base_url,
            default_model,
            file_edit_model,
            workspace_path,
            database_path,
            host,
            port,
            retry,
            request_delay,
            llm_timeout,
            github,
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(api_key: String, default_model: String, workspace_path: PathBuf) -> Self {
        Self {
            api_key,
            api_base_url: "https://api.openai.com/v1".to_string(),
            default_model,
            file_edit_model: "gpt-3.5-turbo".to_string(),
            workspace_path,
            database_path: None,
            host: "127.0.0.1".to_string(),
            port: 8000,
            retry: RetryConfig::default(),
            request_delay: Duration::ZERO,
            llm_timeout: Duration::from_secs(300),
            github: GithubConfig::default(),
        }
    }
}

fn parse_env<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}
