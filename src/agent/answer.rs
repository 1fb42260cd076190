//! Decoding of the model's JSON reply.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::actions::FINISH_ACTION;

static JSON_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?\s*\n(.*?)\n?\s*```").expect("valid fence pattern")
});

#[derive(Debug, Error)]
pub enum AnswerError {
    #[error("reply is not valid answer JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("reply names no action")]
    MissingAction,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Thoughts {
    #[serde(default, deserialize_with = "null_as_default")]
    pub text: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub reasoning: String,
    /// Usually a bulleted string; some models send a list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub criticism: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub speak: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

/// Reply as sent; either key may carry the action.
#[derive(Deserialize)]
struct RawAnswer {
    #[serde(default, deserialize_with = "null_as_default")]
    thoughts: Thoughts,
    #[serde(default)]
    action: Option<ActionCall>,
    #[serde(default)]
    ability: Option<ActionCall>,
}

/// A decoded reply: what the model thinks and which action it picked.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AgentAnswer {
    pub thoughts: Thoughts,
    /// The action to dispatch: `action`, else `ability`.
    pub action: ActionCall,
    /// The legacy `ability` key, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ability: Option<ActionCall>,
}

impl AgentAnswer {
    /// Parse a reply, unwrapping a Markdown JSON fence if there is one.
    pub fn parse(reply: &str) -> Result<Self, AnswerError> {
        let body = extract_json(reply);
        let raw: RawAnswer = serde_json::from_str(body)?;
        let action = match (raw.action, &raw.ability) {
            (Some(action), _) => action,
            (None, Some(ability)) => ability.clone(),
            (None, None) => return Err(AnswerError::MissingAction),
        };
        Ok(Self {
            thoughts: raw.thoughts,
            action,
            ability: raw.ability,
        })
    }

    pub fn action_name(&self) -> &str {
        &self.action.name
    }

    pub fn args(&self) -> &Value {
        &self.action.args
    }

    /// True when either key names `finish`.
    pub fn is_finish(&self) -> bool {
        self.finish_call().is_some()
    }

    pub fn reasoning(&self) -> &str {
        &self.thoughts.reasoning
    }

    /// What to tell the user when the task ends.
    pub fn closing_remark(&self) -> String {
        if !self.thoughts.speak.trim().is_empty() {
            return self.thoughts.speak.clone();
        }
        let reason = self
            .finish_call()
            .and_then(|call| call.args.get("reason"))
            .and_then(Value::as_str)
            .filter(|r| !r.trim().is_empty());
        match reason {
            Some(reason) => reason.to_string(),
            None => self.thoughts.text.clone(),
        }
    }

    fn finish_call(&self) -> Option<&ActionCall> {
        std::iter::once(&self.action)
            .chain(self.ability.as_ref())
            .find(|call| call.name == FINISH_ACTION)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn extract_json(reply: &str) -> &str {
    if let Some(caps) = JSON_FENCE_RE.captures(reply) {
        if let Some(body) = caps.get(1) {
            return body.as_str();
        }
    }
    // Prose around a bare object.
    let trimmed = reply.trim();
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const REPLY: &str = r#"{
        "thoughts": {
            "text": "I should write the file",
            "reasoning": "the task asks for a file",
            "plan": "- write it",
            "criticism": "none",
            "speak": "Writing the file now"
        },
        "action": {"name": "write_file", "args": {"file_path": "a.txt", "data": "x"}}
    }"#;

    #[test]
    fn parses_plain_reply() {
        let answer = AgentAnswer::parse(REPLY).unwrap();
        assert_eq!(answer.action_name(), "write_file");
        assert_eq!(answer.args(), &json!({"file_path": "a.txt", "data": "x"}));
        assert_eq!(answer.reasoning(), "the task asks for a file");
        assert!(!answer.is_finish());
    }

    #[test]
    fn unwraps_markdown_fence() {
        let fenced = format!("Here you go:\n```json\n{}\n```\n", REPLY);
        let answer = AgentAnswer::parse(&fenced).unwrap();
        assert_eq!(answer.action_name(), "write_file");
    }

    #[test]
    fn accepts_legacy_ability_key() {
        let answer = AgentAnswer::parse(
            r#"{"thoughts": {"speak": "All done"}, "ability": {"name": "finish", "args": {"reason": "done"}}}"#,
        )
        .unwrap();
        assert!(answer.is_finish());
        assert_eq!(answer.closing_remark(), "All done");
    }

    #[test]
    fn closing_remark_falls_back() {
        let answer = AgentAnswer::parse(
            r#"{"thoughts": {"text": "t"}, "action": {"name": "finish", "args": {"reason": "because"}}}"#,
        )
        .unwrap();
        assert_eq!(answer.closing_remark(), "because");

        let answer =
            AgentAnswer::parse(r#"{"thoughts": {"text": "t"}, "action": {"name": "finish"}}"#)
                .unwrap();
        assert_eq!(answer.closing_remark(), "t");
        assert_eq!(answer.args(), &Value::Null);
    }

    #[test]
    fn null_thought_fields_decode_as_empty() {
        let answer = AgentAnswer::parse(
            r#"{"thoughts": {"text": "t", "reasoning": null, "plan": null, "criticism": null, "speak": null},
                "action": {"name": "list_files", "args": {"path": "."}}}"#,
        )
        .unwrap();
        assert_eq!(answer.action_name(), "list_files");
        assert_eq!(answer.reasoning(), "");
        assert_eq!(answer.thoughts.criticism, "");
        assert_eq!(answer.thoughts.plan, None);

        let answer =
            AgentAnswer::parse(r#"{"thoughts": null, "action": {"name": "list_files"}}"#).unwrap();
        assert_eq!(answer.thoughts, Thoughts::default());
    }

    #[test]
    fn both_action_keys_are_read() {
        let answer = AgentAnswer::parse(
            r#"{"ability": {"name": "finish"}, "action": {"name": "finish", "args": {"reason": "x"}}}"#,
        )
        .unwrap();
        assert!(answer.is_finish());
        assert_eq!(answer.closing_remark(), "x");

        let answer = AgentAnswer::parse(
            r#"{"ability": {"name": "finish", "args": {"reason": "stop"}}, "action": {"name": "write_file", "args": {}}}"#,
        )
        .unwrap();
        assert!(answer.is_finish());
        assert_eq!(answer.closing_remark(), "stop");

        let answer = AgentAnswer::parse(
            r#"{"ability": {"name": "read_file"}, "action": {"name": "write_file", "args": {"file_path": "a"}}}"#,
        )
        .unwrap();
        assert!(!answer.is_finish());
        assert_eq!(answer.action_name(), "write_file");
        assert_eq!(answer.args(), &json!({"file_path": "a"}));

        let answer =
            AgentAnswer::parse(r#"{"ability": {"name": "read_file", "args": {"file_path": "b"}}}"#)
                .unwrap();
        assert_eq!(answer.action_name(), "read_file");
    }

    #[test]
    fn plan_may_be_a_list() {
        let answer = AgentAnswer::parse(
            r#"{"thoughts": {"plan": ["a", "b"]}, "action": {"name": "list_files", "args": {"path": "."}}}"#,
        )
        .unwrap();
        assert_eq!(answer.thoughts.plan, Some(json!(["a", "b"])));
    }

    #[test]
    fn rejects_garbage_and_missing_action() {
        assert!(matches!(
            AgentAnswer::parse("I cannot help with that"),
            Err(AnswerError::Decode(_))
        ));
        assert!(matches!(
            AgentAnswer::parse(r#"{"thoughts": {"text": "hmm"}}"#),
            Err(AnswerError::MissingAction)
        ));
    }
}
