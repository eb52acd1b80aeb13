use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// A message waiting to be typed into an agent once it goes idle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMessage {
    pub id: String,
    pub agent_id: String,
    pub text: String,
    pub queued_at: DateTime<Utc>,
}

/// Per-agent FIFO of pending messages. Unbounded: agents drain it from their
/// idle hook, there is no expiry.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    queues: HashMap<String, VecDeque<QueuedMessage>>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message and return the agent's new queue length.
    pub fn enqueue(&mut self, agent_id: &str, text: &str) -> usize {
        let queue = self.queues.entry(agent_id.to_string()).or_default();
        queue.push_back(QueuedMessage {
            id: Uuid::new_v4().to_string(),
            agent_id: agent_id.to_string(),
            text: text.to_string(),
            queued_at: Utc::now(),
        });
        queue.len()
    }

    pub fn dequeue(&mut self, agent_id: &str) -> Option<QueuedMessage> {
        let queue = self.queues.get_mut(agent_id)?;
        let item = queue.pop_front();
        if queue.is_empty() {
            self.queues.remove(agent_id);
        }
        item
    }

    pub fn peek(&self, agent_id: &str) -> (usize, Vec<QueuedMessage>) {
        match self.queues.get(agent_id) {
            Some(queue) => (queue.len(), queue.iter().cloned().collect()),
            None => (0, Vec::new()),
        }
    }

    /// Drop every pending message for the agent, returning how many there were.
    pub fn clear(&mut self, agent_id: &str) -> usize {
        self.queues.remove(agent_id).map_or(0, |queue| queue.len())
    }

    pub fn len(&self, agent_id: &str) -> usize {
        self.queues.get(agent_id).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}
