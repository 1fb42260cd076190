//! # Forge Agent
//!
//! An autonomous task agent that works one step at a time.
//!
//! This library provides:
//! - An HTTP API following the agent protocol (tasks, steps, artifacts)
//! - A step loop that asks an OpenAI-compatible model for the next action
//! - Workspace, git and GitHub actions the model can call
//! - In-memory and SQLite persistence of tasks, steps and history
//!
//! ## Architecture
//!
//! Every step:
//! 1. Renders the task prompt with the action catalogue and earlier actions
//! 2. Asks the model for a JSON answer naming one action
//! 3. Runs the action (or finishes the task) and stores the outcome
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use forge_agent::{agent::{Agent, StepRequest}, db::InMemoryAgentDb, llm::OpenAiClient, Config};
//!
//! let config = Config::from_env()?;
//! let llm = Arc::new(OpenAiClient::new(
//!     config.api_key.clone(),
//!     config.api_base_url.clone(),
//!     config.llm_timeout,
//! )?);
//! let agent = Agent::new(config, llm, Arc::new(InMemoryAgentDb::new()))?;
//! let task = agent.create_task("Write a haiku to poem.txt", None).await?;
//! let step = agent.execute_step(task.task_id, StepRequest::default()).await?;
//! ```

pub mod actions;
pub mod agent;
pub mod api;
pub mod config;
pub mod db;
pub mod llm;
pub mod workspace;

pub use config::Config;
