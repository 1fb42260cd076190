//! HTTP API module.
//!
//! Exposes the agent protocol:
//! - `POST /ap/v1/agent/tasks` - Create a task
//! - `POST /ap/v1/agent/tasks/:id/steps` - Run the next step of a task
//! - `GET /ap/v1/agent/tasks/:id/artifacts/:artifact_id` - Download a file the agent wrote
//! - `GET /health` - Service status

mod routes;
pub mod types;

pub use routes::{router, serve, AppState};
