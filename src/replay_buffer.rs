//! Bounded per-agent history used to replay state to newly connected
//! WebSocket clients.
//!
//! Each agent gets its own ring; when a ring is full the oldest entry is
//! evicted. Agents are remembered in first-seen order so replay walks them
//! deterministically.

use std::collections::{HashMap, VecDeque};

pub const DEFAULT_ACTIVITY_CAPACITY: usize = 50;
pub const DEFAULT_CHAT_CAPACITY: usize = 200;

#[derive(Debug, Clone)]
pub struct ReplayBuffer<T> {
    capacity: usize,
    order: Vec<String>,
    entries: HashMap<String, VecDeque<T>>,
}

impl<T> ReplayBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: Vec::new(),
            entries: HashMap::new(),
        }
    }

    pub fn push(&mut self, agent_id: &str, item: T) {
        if self.capacity == 0 {
            return;
        }
        if !self.entries.contains_key(agent_id) {
            self.order.push(agent_id.to_string());
        }
        let capacity = self.capacity;
        let ring = self
            .entries
            .entry(agent_id.to_string())
            .or_insert_with(|| VecDeque::with_capacity(capacity));
        if ring.len() >= capacity {
            ring.pop_front();
        }
        ring.push_back(item);
    }

    /// Entries for one agent, oldest first.
    pub fn history(&self, agent_id: &str) -> impl Iterator<Item = &T> {
        self.entries.get(agent_id).into_iter().flatten()
    }

    pub fn len(&self, agent_id: &str) -> usize {
        self.entries.get(agent_id).map_or(0, VecDeque::len)
    }

    /// Every agent's entries, agent by agent in first-seen order.
    pub fn replay(&self) -> impl Iterator<Item = (&str, &T)> {
        self.order.iter().flat_map(move |agent_id| {
            self.history(agent_id)
                .map(move |item| (agent_id.as_str(), item))
        })
    }

    pub fn purge(&mut self, agent_id: &str) {
        if self.entries.remove(agent_id).is_some() {
            self.order.retain(|id| id != agent_id);
        }
    }
}
