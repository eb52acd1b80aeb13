use serde::Deserialize;
use serde_json::Value;

use crate::tool_format::truncate_chars;
use crate::types::AgentStatus;

const PROMPT_PREVIEW_CHARS: usize = 100;
const REPLY_PREVIEW_CHARS: usize = 200;

/// Body of `POST /hooks`, posted by agent-side lifecycle hooks.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookEvent {
    pub event_type: String,
    pub agent_id: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub source: Option<String>,
}

/// What a hook event means for the agent it names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookOutcome {
    pub activity: String,
    pub status: Option<AgentStatus>,
}

impl HookEvent {
    pub fn transcript_path(&self) -> Option<&str> {
        data_str(&self.data, "transcript_path").filter(|path| !path.trim().is_empty())
    }

    pub fn outcome(&self) -> HookOutcome {
        let data = &self.data;
        let (activity, status) = match self.event_type.as_str() {
            "SessionStart" => ("Session started".to_string(), Some(AgentStatus::Active)),
            "UserPromptSubmit" => {
                let prompt = data_str(data, "prompt").unwrap_or_default();
                (
                    format!("User: {}", truncate_chars(prompt, PROMPT_PREVIEW_CHARS)),
                    Some(AgentStatus::Active),
                )
            }
            "PreToolUse" => (format!("▶ {}", tool_name(data)), Some(AgentStatus::Active)),
            "PostToolUse" => {
                let mark = if tool_failed(data) { '✗' } else { '✓' };
                (format!("{mark} {}", tool_name(data)), None)
            }
            "Stop" => {
                let activity = match data_str(data, "last_assistant_message")
                    .map(str::trim)
                    .filter(|text| !text.is_empty())
                {
                    Some(text) => {
                        format!("Assistant: {}", truncate_chars(text, REPLY_PREVIEW_CHARS))
                    }
                    None => "Response complete".to_string(),
                };
                (activity, Some(AgentStatus::Idle))
            }
            "Notification" => (
                data_str(data, "message")
                    .unwrap_or("Notification")
                    .to_string(),
                Some(AgentStatus::Idle),
            ),
            "SessionEnd" => ("Session ended".to_string(), Some(AgentStatus::Disconnected)),
            other => (other.to_string(), None),
        };
        HookOutcome { activity, status }
    }
}

fn data_str<'a>(data: &'a Value, key: &str) -> Option<&'a str> {
    data.get(key).and_then(Value::as_str)
}

fn tool_name(data: &Value) -> &str {
    data_str(data, "tool_name").unwrap_or("tool")
}

fn tool_failed(data: &Value) -> bool {
    if data.get("error").is_some_and(|e| !e.is_null()) {
        return true;
    }
    data.get("tool_response")
        .and_then(|response| response.get("is_error").or_else(|| response.get("isError")))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}
