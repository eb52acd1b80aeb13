//! Fan-out of relay events to connected WebSocket clients.
//!
//! The hub keeps its own bounded activity and chat history per agent so a
//! client that connects late can be brought up to date. On connect a client
//! receives the agent list, then every stored activity line, then every
//! stored chat message, so it never sees a frame for an agent it has not
//! been told about.
//!
//! Interest sets narrow `activity` and `chat_message` frames only; an empty
//! set means the client wants everything. Lifecycle frames always reach
//! every client.

use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc;

use crate::events::RelayEvent;
use crate::protocol::ServerMessage;
use crate::replay_buffer::{ReplayBuffer, DEFAULT_ACTIVITY_CAPACITY, DEFAULT_CHAT_CAPACITY};
use crate::types::{ActivityRecord, Agent, ChatMessage};

pub type ConnId = u64;

/// Outbound frames for one client. Unbounded: sends never wait on a slow
/// client.
pub type ClientSender = mpsc::UnboundedSender<ServerMessage>;

struct Subscriber {
    tx: ClientSender,
    interests: HashSet<String>,
}

impl Subscriber {
    fn wants(&self, frame: &ServerMessage) -> bool {
        if self.interests.is_empty() {
            return true;
        }
        match frame {
            ServerMessage::Activity { agent_id, .. }
            | ServerMessage::ChatMessage { agent_id, .. } => self.interests.contains(agent_id),
            _ => true,
        }
    }
}

pub struct Hub {
    subscribers: HashMap<ConnId, Subscriber>,
    next_conn_id: ConnId,
    activity: ReplayBuffer<ActivityRecord>,
    chat: ReplayBuffer<ChatMessage>,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(DEFAULT_ACTIVITY_CAPACITY, DEFAULT_CHAT_CAPACITY)
    }
}

impl Hub {
    pub fn new(activity_capacity: usize, chat_capacity: usize) -> Self {
        Self {
            subscribers: HashMap::new(),
            next_conn_id: 1,
            activity: ReplayBuffer::new(activity_capacity),
            chat: ReplayBuffer::new(chat_capacity),
        }
    }

    /// Register a client and replay current state to it.
    pub fn connect(&mut self, tx: ClientSender, agents: Vec<Agent>) -> ConnId {
        let conn_id = self.next_conn_id;
        self.next_conn_id += 1;

        let _ = tx.send(ServerMessage::AgentsList { agents });
        for (_, record) in self.activity.replay() {
            let _ = tx.send(ServerMessage::activity(record));
        }
        for (agent_id, message) in self.chat.replay() {
            let _ = tx.send(ServerMessage::ChatMessage {
                agent_id: agent_id.to_string(),
                message: message.clone(),
            });
        }

        self.subscribers.insert(
            conn_id,
            Subscriber {
                tx,
                interests: HashSet::new(),
            },
        );
        tracing::debug!(conn_id, clients = self.subscribers.len(), "client registered");
        conn_id
    }

    pub fn disconnect(&mut self, conn_id: ConnId) {
        if self.subscribers.remove(&conn_id).is_some() {
            tracing::debug!(conn_id, clients = self.subscribers.len(), "client unregistered");
        }
    }

    pub fn subscribe(&mut self, conn_id: ConnId, agent_id: &str) {
        if let Some(sub) = self.subscribers.get_mut(&conn_id) {
            sub.interests.insert(agent_id.to_string());
        }
    }

    pub fn unsubscribe(&mut self, conn_id: ConnId, agent_id: &str) {
        if let Some(sub) = self.subscribers.get_mut(&conn_id) {
            sub.interests.remove(agent_id);
        }
    }

    /// Reply to a single client. Returns false if the client is gone.
    pub fn send_to(&self, conn_id: ConnId, frame: ServerMessage) -> bool {
        self.subscribers
            .get(&conn_id)
            .is_some_and(|sub| sub.tx.send(frame).is_ok())
    }

    pub fn sender(&self, conn_id: ConnId) -> Option<ClientSender> {
        self.subscribers.get(&conn_id).map(|sub| sub.tx.clone())
    }

    pub fn handle_event(&mut self, event: RelayEvent) {
        let kind = event.kind();
        let frame = match event {
            RelayEvent::AgentConnected(agent) => ServerMessage::AgentConnected { agent },
            RelayEvent::AgentDisconnected { agent_id } => {
                self.activity.purge(&agent_id);
                self.chat.purge(&agent_id);
                ServerMessage::AgentDisconnected { agent_id }
            }
            RelayEvent::Activity(record) => {
                let frame = ServerMessage::activity(&record);
                let agent_id = record.agent_id.clone();
                self.activity.push(&agent_id, record);
                frame
            }
            RelayEvent::StatusChanged { agent_id, status } => {
                ServerMessage::StatusChange { agent_id, status }
            }
            RelayEvent::ChatMessage { agent_id, message } => {
                self.chat.push(&agent_id, message.clone());
                ServerMessage::ChatMessage { agent_id, message }
            }
        };
        let receivers = self.broadcast(frame);
        tracing::trace!(kind, receivers, "broadcast relay event");
    }

    /// Send to every interested client, dropping clients whose channel is
    /// closed. Returns how many clients received the frame.
    pub fn broadcast(&mut self, frame: ServerMessage) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();
        for (conn_id, sub) in &self.subscribers {
            if !sub.wants(&frame) {
                continue;
            }
            if sub.tx.send(frame.clone()).is_ok() {
                delivered += 1;
            } else {
                closed.push(*conn_id);
            }
        }
        for conn_id in closed {
            self.disconnect(conn_id);
        }
        delivered
    }

    pub fn activity_history(&self, agent_id: &str) -> Vec<ActivityRecord> {
        self.activity.history(agent_id).cloned().collect()
    }

    pub fn chat_history(&self, agent_id: &str) -> Vec<ChatMessage> {
        self.chat.history(agent_id).cloned().collect()
    }

    pub fn client_count(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tokio::sync::mpsc::error::TryRecvError;

    use super::*;
    use crate::types::{AgentKind, AgentOrigin, AgentStatus, ChatRole};

    fn client() -> (ClientSender, mpsc::UnboundedReceiver<ServerMessage>) {
        mpsc::unbounded_channel()
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    fn chat(content: &str) -> ChatMessage {
        ChatMessage {
            role: ChatRole::Assistant,
            content: content.to_string(),
            timestamp: Utc::now(),
            uuid: Some(content.to_string()),
        }
    }

    fn agent(id: &str) -> Agent {
        Agent::new(id, AgentKind::TerminalCli, AgentOrigin::Hook)
    }

    #[test]
    fn history_keeps_fifty_most_recent_activities() {
        let mut hub = Hub::default();
        for i in 0..60 {
            hub.handle_event(RelayEvent::Activity(ActivityRecord::now("a", format!("{i}"))));
        }

        let history = hub.activity_history("a");
        assert_eq!(history.len(), 50);
        let contents: Vec<String> = history.into_iter().map(|r| r.content).collect();
        let expected: Vec<String> = (10..60).map(|i| i.to_string()).collect();
        assert_eq!(contents, expected);
    }

    #[test]
    fn connect_replays_list_then_activity_then_chat() {
        let mut hub = Hub::default();
        hub.handle_event(RelayEvent::AgentConnected(agent("A")));
        hub.handle_event(RelayEvent::ChatMessage {
            agent_id: "A".into(),
            message: chat("c1"),
        });
        for content in ["x1", "x2", "x3"] {
            hub.handle_event(RelayEvent::Activity(ActivityRecord::now("A", content)));
        }
        hub.handle_event(RelayEvent::ChatMessage {
            agent_id: "A".into(),
            message: chat("c2"),
        });

        let (tx, mut rx) = client();
        hub.connect(tx, vec![agent("A")]);
        let frames = drain(&mut rx);

        assert_eq!(frames.len(), 6);
        match &frames[0] {
            ServerMessage::AgentsList { agents } => assert_eq!(agents[0].id, "A"),
            other => panic!("expected agents_list, got {other:?}"),
        }
        let activities: Vec<&str> = frames[1..4]
            .iter()
            .map(|f| match f {
                ServerMessage::Activity { content, .. } => content.as_str(),
                other => panic!("expected activity, got {other:?}"),
            })
            .collect();
        assert_eq!(activities, ["x1", "x2", "x3"]);
        let chats: Vec<&str> = frames[4..]
            .iter()
            .map(|f| match f {
                ServerMessage::ChatMessage { message, .. } => message.content.as_str(),
                other => panic!("expected chat_message, got {other:?}"),
            })
            .collect();
        assert_eq!(chats, ["c1", "c2"]);
    }

    #[test]
    fn disconnect_event_purges_history_and_is_broadcast() {
        let mut hub = Hub::default();
        hub.handle_event(RelayEvent::Activity(ActivityRecord::now("A", "x")));
        hub.handle_event(RelayEvent::ChatMessage {
            agent_id: "A".into(),
            message: chat("c"),
        });
        let (tx, mut rx) = client();
        hub.connect(tx, Vec::new());
        drain(&mut rx);

        hub.handle_event(RelayEvent::AgentDisconnected {
            agent_id: "A".into(),
        });

        assert!(hub.activity_history("A").is_empty());
        assert!(hub.chat_history("A").is_empty());
        assert_eq!(
            drain(&mut rx),
            vec![ServerMessage::AgentDisconnected {
                agent_id: "A".into()
            }]
        );
    }

    #[test]
    fn interest_set_filters_activity_but_not_lifecycle() {
        let mut hub = Hub::default();
        let (tx, mut rx) = client();
        let conn = hub.connect(tx, Vec::new());
        drain(&mut rx);

        hub.subscribe(conn, "A");
        hub.handle_event(RelayEvent::Activity(ActivityRecord::now("B", "ignored")));
        hub.handle_event(RelayEvent::Activity(ActivityRecord::now("A", "wanted")));
        hub.handle_event(RelayEvent::StatusChanged {
            agent_id: "B".into(),
            status: AgentStatus::Idle,
        });

        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 2);
        assert!(matches!(&frames[0], ServerMessage::Activity { agent_id, .. } if agent_id == "A"));
        assert!(matches!(
            &frames[1],
            ServerMessage::StatusChange { agent_id, .. } if agent_id == "B"
        ));

        hub.unsubscribe(conn, "A");
        hub.handle_event(RelayEvent::Activity(ActivityRecord::now("B", "now visible")));
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[test]
    fn broadcast_reaches_every_client_and_drops_closed_ones() {
        let mut hub = Hub::default();
        let (tx1, mut rx1) = client();
        let (tx2, rx2) = client();
        hub.connect(tx1, Vec::new());
        hub.connect(tx2, Vec::new());
        drop(rx2);
        drain(&mut rx1);

        let delivered = hub.broadcast(ServerMessage::AgentConnected { agent: agent("A") });
        assert_eq!(delivered, 1);
        assert_eq!(hub.client_count(), 1);
        assert_eq!(drain(&mut rx1).len(), 1);
    }

    #[test]
    fn send_to_targets_one_client() {
        let mut hub = Hub::default();
        let (tx1, mut rx1) = client();
        let (tx2, mut rx2) = client();
        let first = hub.connect(tx1, Vec::new());
        hub.connect(tx2, Vec::new());
        drain(&mut rx1);
        drain(&mut rx2);

        assert!(hub.send_to(first, ServerMessage::error("nope")));
        assert_eq!(drain(&mut rx1), vec![ServerMessage::error("nope")]);
        assert!(matches!(rx2.try_recv(), Err(TryRecvError::Empty)));
        assert!(!hub.send_to(999, ServerMessage::error("nope")));
    }
}
