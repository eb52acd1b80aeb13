use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ActivityRecord, Agent, AgentStatus, ChatMessage};

/// Frames pushed to mobile clients over the WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    AgentsList {
        agents: Vec<Agent>,
    },
    AgentConnected {
        agent: Agent,
    },
    #[serde(rename_all = "camelCase")]
    AgentDisconnected {
        agent_id: String,
    },
    #[serde(rename_all = "camelCase")]
    Activity {
        agent_id: String,
        content: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    StatusChange {
        agent_id: String,
        status: AgentStatus,
    },
    #[serde(rename_all = "camelCase")]
    ChatMessage {
        agent_id: String,
        message: ChatMessage,
    },
    #[serde(rename_all = "camelCase")]
    MessageSent {
        agent_id: String,
        success: bool,
        hint: String,
    },
    #[serde(rename_all = "camelCase")]
    InterruptSent {
        agent_id: String,
        success: bool,
    },
    Error {
        error: String,
    },
}

impl ServerMessage {
    pub fn activity(record: &ActivityRecord) -> Self {
        ServerMessage::Activity {
            agent_id: record.agent_id.clone(),
            content: record.content.clone(),
            timestamp: record.timestamp,
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        ServerMessage::Error {
            error: error.into(),
        }
    }
}

/// Commands sent by mobile clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    Subscribe {
        agent_id: String,
    },
    #[serde(rename_all = "camelCase")]
    Unsubscribe {
        agent_id: String,
    },
    ListAgents,
    #[serde(rename_all = "camelCase")]
    SendMessage {
        agent_id: String,
        message: String,
        #[serde(default)]
        instant: bool,
    },
    #[serde(rename_all = "camelCase")]
    Interrupt {
        agent_id: String,
    },
}
