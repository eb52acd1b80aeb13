use anyhow::Result;
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, EnvFilter};

use crate::types::{ActivityRecord, Agent, AgentStatus, ChatMessage};

/// Domain events produced by the registry and transcript tailers and
/// consumed by the fan-out hub.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    AgentConnected(Agent),
    AgentDisconnected {
        agent_id: String,
    },
    Activity(ActivityRecord),
    StatusChanged {
        agent_id: String,
        status: AgentStatus,
    },
    ChatMessage {
        agent_id: String,
        message: ChatMessage,
    },
}

impl RelayEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            RelayEvent::AgentConnected(_) => "agent_connected",
            RelayEvent::AgentDisconnected { .. } => "agent_disconnected",
            RelayEvent::Activity(_) => "activity",
            RelayEvent::StatusChanged { .. } => "status_change",
            RelayEvent::ChatMessage { .. } => "chat_message",
        }
    }
}

pub type EventSender = mpsc::UnboundedSender<RelayEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<RelayEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

pub fn init_logging(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
