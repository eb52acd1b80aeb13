use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentKind {
    TerminalCli,
    EditorPlugin,
    IdeIntegration,
}

impl AgentKind {
    /// Resolve the kind from an explicit hint, falling back to the id prefix.
    pub fn infer(agent_id: &str, hint: Option<&str>) -> Self {
        hint.and_then(Self::from_hint)
            .or_else(|| Self::from_id_prefix(agent_id))
            .unwrap_or(AgentKind::TerminalCli)
    }

    pub fn from_hint(hint: &str) -> Option<Self> {
        match hint.trim().to_ascii_lowercase().as_str() {
            "terminal-cli" | "terminal" | "cli" | "claude" | "codex" | "gemini" => {
                Some(AgentKind::TerminalCli)
            }
            "editor-plugin" | "editor" | "vscode" | "cursor" | "windsurf" => {
                Some(AgentKind::EditorPlugin)
            }
            "ide-integration" | "ide" | "jetbrains" | "intellij" | "idea" => {
                Some(AgentKind::IdeIntegration)
            }
            _ => None,
        }
    }

    fn from_id_prefix(agent_id: &str) -> Option<Self> {
        let lower = agent_id.to_ascii_lowercase();
        let prefix = lower.split(['-', ':', '_']).next().unwrap_or_default();
        match prefix {
            "vscode" | "cursor" | "windsurf" | "editor" => Some(AgentKind::EditorPlugin),
            "jetbrains" | "intellij" | "idea" | "ide" => Some(AgentKind::IdeIntegration),
            "claude" | "codex" | "gemini" | "terminal" | "cli" => Some(AgentKind::TerminalCli),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AgentKind::TerminalCli => "Terminal",
            AgentKind::EditorPlugin => "Editor",
            AgentKind::IdeIntegration => "IDE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Idle,
    Disconnected,
}

/// Which ingestion source first reported the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentOrigin {
    Hook,
    Detector,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    pub display_name: String,
    pub kind: AgentKind,
    pub status: AgentStatus,
    pub connected_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_path: Option<String>,
    pub origin: AgentOrigin,
}

impl Agent {
    pub fn new(id: &str, kind: AgentKind, origin: AgentOrigin) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name_for(id, kind),
            kind,
            status: AgentStatus::Active,
            connected_at: Utc::now(),
            transcript_path: None,
            origin,
        }
    }
}

fn display_name_for(id: &str, kind: AgentKind) -> String {
    let chars: Vec<char> = id.chars().collect();
    let short: String = chars[chars.len().saturating_sub(6)..].iter().collect();
    format!("{} ({})", kind.label(), short)
}

/// Build the id a process detector assigns to a local session.
///
/// `locality` distinguishes sessions with colliding pids, e.g. a WSL
/// distribution versus the host.
pub fn local_agent_id(source: &str, pid: u32, locality: Option<&str>) -> String {
    match locality.map(str::trim).filter(|value| !value.is_empty()) {
        Some(locality) => format!("{source}-{locality}-{pid}"),
        None => format!("{source}-{pid}"),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    pub agent_id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ActivityRecord {
    pub fn now(agent_id: &str, content: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}
