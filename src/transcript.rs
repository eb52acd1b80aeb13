//! Incremental reader for JSON-lines conversation transcripts.
//!
//! The producer rewrites and appends to the file while we read it, so each
//! poll re-reads the whole log and relies on per-record ids for
//! de-duplication instead of byte offsets. Read failures and half-written
//! lines are expected and are retried on the next tick.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::events::{EventSender, RelayEvent};
use crate::tool_format::render_tool_use;
use crate::types::{ChatMessage, ChatRole};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawRecord {
    uuid: Option<String>,
    #[serde(rename = "type")]
    record_type: Option<String>,
    timestamp: Option<String>,
    is_meta: Option<bool>,
    message: Option<RawMessage>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawMessage {
    content: Option<RawContent>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

/// A parsed transcript line: its id plus the chat message it carries, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptRecord {
    pub id: String,
    pub message: Option<ChatMessage>,
}

/// Parse one transcript line. Returns `None` for lines that cannot be
/// identified (malformed JSON, missing id).
pub fn parse_record(line: &str) -> Option<TranscriptRecord> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let raw: RawRecord = serde_json::from_str(line).ok()?;
    let id = raw.uuid.clone().filter(|id| !id.is_empty())?;
    let message = to_chat_message(raw, &id);
    Some(TranscriptRecord { id, message })
}

fn to_chat_message(raw: RawRecord, id: &str) -> Option<ChatMessage> {
    if raw.is_meta == Some(true) {
        return None;
    }
    let role = match raw.record_type.as_deref()? {
        "user" => ChatRole::User,
        "assistant" => ChatRole::Assistant,
        _ => return None,
    };
    let content = match raw.message?.content? {
        RawContent::Text(text) => text,
        RawContent::Blocks(blocks) => render_blocks(role, blocks),
    };
    if content.trim().is_empty() {
        return None;
    }
    Some(ChatMessage {
        role,
        content,
        timestamp: parse_timestamp(raw.timestamp.as_deref()),
        uuid: Some(id.to_string()),
    })
}

fn render_blocks(role: ChatRole, blocks: Vec<ContentBlock>) -> String {
    let parts: Vec<String> = blocks
        .into_iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } if !text.trim().is_empty() => Some(text),
            // Tool calls only appear meaningfully on assistant turns.
            ContentBlock::ToolUse { name, input } if role == ChatRole::Assistant => {
                Some(render_tool_use(&name, &input))
            }
            _ => None,
        })
        .collect();
    parts.join("\n\n")
}

fn parse_timestamp(raw: Option<&str>) -> DateTime<Utc> {
    raw.and_then(|value| DateTime::parse_from_rfc3339(value).ok())
        .map(|value| value.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

/// Parse every chat message in `content`, ignoring de-duplication state.
pub fn parse_all(content: &str) -> Vec<ChatMessage> {
    content
        .lines()
        .filter_map(parse_record)
        .filter_map(|record| record.message)
        .collect()
}

/// Read and parse the whole transcript. A missing or unreadable file yields
/// an empty history.
pub async fn read_all_messages(path: &Path) -> Vec<ChatMessage> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => parse_all(&content),
        Err(error) => {
            tracing::debug!(path = %path.display(), error = %error, "transcript not readable");
            Vec::new()
        }
    }
}

#[derive(Debug)]
pub struct TranscriptTailer {
    agent_id: String,
    path: PathBuf,
    seen: HashSet<String>,
}

impl TranscriptTailer {
    pub fn new(agent_id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            agent_id: agent_id.into(),
            path: path.into(),
            seen: HashSet::new(),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Messages from records that have not been seen before. Never fails: an
    /// unreadable file simply produces nothing this tick.
    pub async fn poll_once(&mut self) -> Vec<ChatMessage> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => self.ingest(&content),
            Err(error) => {
                tracing::trace!(
                    agent_id = %self.agent_id,
                    path = %self.path.display(),
                    error = %error,
                    "transcript read failed, retrying next tick"
                );
                Vec::new()
            }
        }
    }

    /// Feed the full current contents of the log.
    pub fn ingest(&mut self, content: &str) -> Vec<ChatMessage> {
        content
            .lines()
            .filter_map(parse_record)
            .filter(|record| self.seen.insert(record.id.clone()))
            .filter_map(|record| record.message)
            .collect()
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }
}

/// Owns the polling task; dropping it stops the tailer.
#[derive(Debug)]
pub struct TailerHandle {
    path: PathBuf,
    task: JoinHandle<()>,
}

impl TailerHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TailerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start polling `tailer` every `interval`, forwarding new messages as
/// [`RelayEvent::ChatMessage`]. Must be called within a tokio runtime.
pub fn spawn_tailer(
    mut tailer: TranscriptTailer,
    interval: Duration,
    events: EventSender,
) -> TailerHandle {
    let path = tailer.path().to_path_buf();
    let task = tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::debug!(
            agent_id = %tailer.agent_id,
            path = %tailer.path.display(),
            "transcript tailer started"
        );
        loop {
            tick.tick().await;
            for message in tailer.poll_once().await {
                let event = RelayEvent::ChatMessage {
                    agent_id: tailer.agent_id.clone(),
                    message,
                };
                if events.send(event).is_err() {
                    tracing::debug!(agent_id = %tailer.agent_id, "relay gone, stopping tailer");
                    return;
                }
            }
        }
    });
    TailerHandle { path, task }
}
