//! Workflow actions that report on the task itself.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{opt_str_arg, str_arg, Action, ActionContext, ActionParameter, FINISH_ACTION};

/// Signal that the agent is stuck.
pub struct CantMakeProgress;

#[async_trait]
impl Action for CantMakeProgress {
    fn name(&self) -> &str {
        "cant_make_progress"
    }

    fn description(&self) -> &str {
        "Should be called when the agent doesn't believe it can make any progress on the task"
    }

    fn parameters(&self) -> Vec<ActionParameter> {
        vec![
            ActionParameter::required(
                "reason",
                "string",
                "Explanation for why the agent cannot make any progress",
            ),
            ActionParameter::optional(
                "new_ability",
                "string",
                "Suggestion for a new ability, that if provided to the agent, would allow for progress to be made",
            ),
        ]
    }

    fn output_type(&self) -> &str {
        "dict"
    }

    async fn run(&self, ctx: &ActionContext<'_>, args: &Value) -> anyhow::Result<String> {
        let reason = str_arg(args, "reason")?;
        let new_ability = opt_str_arg(args, "new_ability");
        tracing::warn!(
            task_id = %ctx.task_id,
            reason,
            new_ability = new_ability.unwrap_or("-"),
            "Agent cannot make progress"
        );
        Ok(json!({ "reason": reason, "new_ability": new_ability }).to_string())
    }
}

/// Reserved action that ends the task. The agent loop handles it before
/// dispatch; it is registered so that it appears in the prompt.
pub struct Finish;

#[async_trait]
impl Action for Finish {
    fn name(&self) -> &str {
        FINISH_ACTION
    }

    fn description(&self) -> &str {
        "Use this to shut down once you have accomplished all of your goals, or when there are insurmountable problems that make it impossible for you to finish your task."
    }

    fn parameters(&self) -> Vec<ActionParameter> {
        vec![ActionParameter::required(
            "reason",
            "string",
            "A summary to the user of how the goals were accomplished",
        )]
    }

    async fn run(&self, _ctx: &ActionContext<'_>, args: &Value) -> anyhow::Result<String> {
        Ok(str_arg(args, "reason")?.to_string())
    }
}
