//! Agent module - the step-at-a-time task agent.
//!
//! Each step follows the same pattern:
//! 1. Render the task prompt with the action catalogue and earlier actions
//! 2. Ask the model for a JSON answer naming one action
//! 3. Either finish the task or run the action and persist its output

mod agent_loop;
mod answer;
mod prompt;

pub use agent_loop::{Agent, AgentError, StepRequest, BAD_ACTION_OUTPUT};
pub use answer::{ActionCall, AgentAnswer, AnswerError, Thoughts};
pub use prompt::{PreviousAction, PromptEngine, PromptError, TaskStepParams};
