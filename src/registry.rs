use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::events::{EventSender, RelayEvent};
use crate::transcript::{spawn_tailer, TailerHandle, TranscriptTailer, DEFAULT_POLL_INTERVAL};
use crate::types::{ActivityRecord, Agent, AgentKind, AgentOrigin, AgentStatus};

pub const ACTIVITY_RING_CAPACITY: usize = 100;

struct AgentEntry {
    agent: Agent,
    activity: VecDeque<ActivityRecord>,
    tailer: Option<TailerHandle>,
}

/// Agent plus its registry-side activity ring, as served by `GET /agents/{id}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSnapshot {
    #[serde(flatten)]
    pub agent: Agent,
    pub activity: Vec<ActivityRecord>,
}

/// One live session as reported by an external process detector.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedAgent {
    pub id: String,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub transcript_path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub created: Vec<String>,
    pub removed: Vec<String>,
}

/// Source of truth for which agents exist. Owned by the relay task; every
/// state change is announced on the event channel.
pub struct AgentRegistry {
    agents: HashMap<String, AgentEntry>,
    events: EventSender,
    poll_interval: Duration,
}

impl AgentRegistry {
    pub fn new(events: EventSender) -> Self {
        Self::with_poll_interval(events, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(events: EventSender, poll_interval: Duration) -> Self {
        Self {
            agents: HashMap::new(),
            events,
            poll_interval,
        }
    }

    /// Return the agent, creating it on first contact. A transcript path
    /// supplied after creation attaches a tailer to the existing agent.
    pub fn get_or_create(
        &mut self,
        agent_id: &str,
        transcript_path: Option<&str>,
        kind_hint: Option<&str>,
        origin: AgentOrigin,
    ) -> Agent {
        let transcript_path = transcript_path.map(str::trim).filter(|p| !p.is_empty());

        if let Some(entry) = self.agents.get_mut(agent_id) {
            if entry.agent.transcript_path.is_none() {
                if let Some(path) = transcript_path {
                    tracing::info!(
                        agent_id = %agent_id,
                        path = %path,
                        "attaching transcript to existing agent"
                    );
                    entry.agent.transcript_path = Some(path.to_string());
                    let tailer = start_tailer(agent_id, path, self.poll_interval, &self.events);
                    entry.tailer = Some(tailer);
                }
            }
            return entry.agent.clone();
        }

        let kind = AgentKind::infer(agent_id, kind_hint);
        let mut agent = Agent::new(agent_id, kind, origin);
        agent.transcript_path = transcript_path.map(str::to_string);
        let tailer = transcript_path
            .map(|path| start_tailer(agent_id, path, self.poll_interval, &self.events));

        tracing::info!(agent_id = %agent_id, kind = ?kind, origin = ?origin, "agent connected");
        self.agents.insert(
            agent_id.to_string(),
            AgentEntry {
                agent: agent.clone(),
                activity: VecDeque::with_capacity(ACTIVITY_RING_CAPACITY),
                tailer,
            },
        );
        self.emit(RelayEvent::AgentConnected(agent.clone()));
        agent
    }

    /// Append to the agent's activity ring. Unknown agents are ignored.
    pub fn record_activity(&mut self, agent_id: &str, content: &str) -> Option<ActivityRecord> {
        let entry = self.agents.get_mut(agent_id)?;
        let record = ActivityRecord::now(agent_id, content);
        if entry.activity.len() >= ACTIVITY_RING_CAPACITY {
            entry.activity.pop_front();
        }
        entry.activity.push_back(record.clone());
        self.emit(RelayEvent::Activity(record.clone()));
        Some(record)
    }

    /// Returns true when the status actually changed.
    pub fn set_status(&mut self, agent_id: &str, status: AgentStatus) -> bool {
        let Some(entry) = self.agents.get_mut(agent_id) else {
            return false;
        };
        if entry.agent.status == status {
            return false;
        }
        entry.agent.status = status;
        tracing::debug!(agent_id = %agent_id, status = ?status, "agent status changed");
        self.emit(RelayEvent::StatusChanged {
            agent_id: agent_id.to_string(),
            status,
        });
        true
    }

    pub fn remove(&mut self, agent_id: &str) -> Option<Agent> {
        // Dropping the entry drops its tailer handle, which stops polling.
        let entry = self.agents.remove(agent_id)?;
        tracing::info!(agent_id = %agent_id, "agent disconnected");
        self.emit(RelayEvent::AgentDisconnected {
            agent_id: agent_id.to_string(),
        });
        Some(entry.agent)
    }

    /// Reconcile with a detector's view of running sessions: create what is
    /// new, remove detector-backed agents that are gone. Hook-created agents
    /// are left alone.
    pub fn sync_detected(&mut self, reports: &[DetectedAgent]) -> SyncOutcome {
        let mut outcome = SyncOutcome::default();
        let mut reported: HashSet<&str> = HashSet::new();

        for report in reports {
            let agent_id = report.id.trim();
            if agent_id.is_empty() {
                tracing::warn!("skipping detector report with blank id");
                continue;
            }
            reported.insert(agent_id);
            let existed = self.agents.contains_key(agent_id);
            self.get_or_create(
                agent_id,
                report.transcript_path.as_deref(),
                report.kind.as_deref(),
                AgentOrigin::Detector,
            );
            if !existed {
                outcome.created.push(agent_id.to_string());
            }
        }

        let mut stale: Vec<String> = self
            .agents
            .values()
            .filter(|entry| entry.agent.origin == AgentOrigin::Detector)
            .filter(|entry| !reported.contains(entry.agent.id.as_str()))
            .map(|entry| entry.agent.id.clone())
            .collect();
        stale.sort();
        for agent_id in stale {
            self.remove(&agent_id);
            outcome.removed.push(agent_id);
        }
        outcome
    }

    pub fn get(&self, agent_id: &str) -> Option<&Agent> {
        self.agents.get(agent_id).map(|entry| &entry.agent)
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.agents.contains_key(agent_id)
    }

    pub fn snapshot(&self, agent_id: &str) -> Option<AgentSnapshot> {
        self.agents.get(agent_id).map(|entry| AgentSnapshot {
            agent: entry.agent.clone(),
            activity: entry.activity.iter().cloned().collect(),
        })
    }

    /// All agents, oldest connection first.
    pub fn list(&self) -> Vec<Agent> {
        let mut agents: Vec<Agent> = self.agents.values().map(|e| e.agent.clone()).collect();
        agents.sort_by(|a, b| a.connected_at.cmp(&b.connected_at).then_with(|| a.id.cmp(&b.id)));
        agents
    }

    pub fn transcript_path(&self, agent_id: &str) -> Option<PathBuf> {
        self.get(agent_id)
            .and_then(|agent| agent.transcript_path.as_deref())
            .map(PathBuf::from)
    }

    pub fn has_tailer(&self, agent_id: &str) -> bool {
        self.agents
            .get(agent_id)
            .is_some_and(|entry| entry.tailer.is_some())
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    fn emit(&self, event: RelayEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("relay event channel closed, dropping registry event");
        }
    }
}

fn start_tailer(
    agent_id: &str,
    path: &str,
    poll_interval: Duration,
    events: &EventSender,
) -> TailerHandle {
    spawn_tailer(
        TranscriptTailer::new(agent_id, PathBuf::from(path)),
        poll_interval,
        events.clone(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{event_channel, EventReceiver};

    fn drain(rx: &mut EventReceiver) -> Vec<RelayEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let (tx, mut rx) = event_channel();
        let mut registry = AgentRegistry::new(tx);

        let first = registry.get_or_create("a1", None, None, AgentOrigin::Hook);
        let second = registry.get_or_create("a1", None, None, AgentOrigin::Hook);

        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
        let connected = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, RelayEvent::AgentConnected(_)))
            .count();
        assert_eq!(connected, 1);
    }

    #[test]
    fn kind_hint_then_prefix_then_default() {
        let (tx, _rx) = event_channel();
        let mut registry = AgentRegistry::new(tx);

        let hinted = registry.get_or_create("x1", None, Some("vscode"), AgentOrigin::Hook);
        let prefixed = registry.get_or_create("jetbrains-1", None, None, AgentOrigin::Hook);
        let plain = registry.get_or_create("x2", None, None, AgentOrigin::Hook);

        assert_eq!(hinted.kind, AgentKind::EditorPlugin);
        assert_eq!(prefixed.kind, AgentKind::IdeIntegration);
        assert_eq!(plain.kind, AgentKind::TerminalCli);
    }

    #[test]
    fn record_activity_on_unknown_agent_is_noop() {
        let (tx, mut rx) = event_channel();
        let mut registry = AgentRegistry::new(tx);

        assert!(registry.record_activity("nonexistent", "x").is_none());
        assert!(registry.is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn activity_ring_is_bounded() {
        let (tx, _rx) = event_channel();
        let mut registry = AgentRegistry::new(tx);
        registry.get_or_create("a1", None, None, AgentOrigin::Hook);

        for i in 0..(ACTIVITY_RING_CAPACITY + 5) {
            registry.record_activity("a1", &format!("line {i}"));
        }

        let snapshot = registry.snapshot("a1").unwrap();
        assert_eq!(snapshot.activity.len(), ACTIVITY_RING_CAPACITY);
        assert_eq!(snapshot.activity[0].content, "line 5");
        assert_eq!(
            snapshot.activity.last().unwrap().content,
            format!("line {}", ACTIVITY_RING_CAPACITY + 4)
        );
    }

    #[test]
    fn status_change_emitted_only_on_change() {
        let (tx, mut rx) = event_channel();
        let mut registry = AgentRegistry::new(tx);
        registry.get_or_create("a1", None, None, AgentOrigin::Hook);
        drain(&mut rx);

        assert!(!registry.set_status("a1", AgentStatus::Active));
        assert!(registry.set_status("a1", AgentStatus::Idle));
        assert!(!registry.set_status("ghost", AgentStatus::Idle));

        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![RelayEvent::StatusChanged {
                agent_id: "a1".into(),
                status: AgentStatus::Idle,
            }]
        );
    }

    #[test]
    fn remove_emits_disconnected() {
        let (tx, mut rx) = event_channel();
        let mut registry = AgentRegistry::new(tx);
        registry.get_or_create("a1", None, None, AgentOrigin::Hook);
        drain(&mut rx);

        assert!(registry.remove("a1").is_some());
        assert!(registry.remove("a1").is_none());
        assert_eq!(
            drain(&mut rx),
            vec![RelayEvent::AgentDisconnected {
                agent_id: "a1".into()
            }]
        );
    }

    #[tokio::test]
    async fn late_transcript_path_attaches_tailer() {
        let (tx, _rx) = event_channel();
        let mut registry = AgentRegistry::new(tx);

        registry.get_or_create("a1", None, None, AgentOrigin::Hook);
        assert!(!registry.has_tailer("a1"));

        let agent = registry.get_or_create("a1", Some("/tmp/t.jsonl"), None, AgentOrigin::Hook);
        assert_eq!(agent.transcript_path.as_deref(), Some("/tmp/t.jsonl"));
        assert!(registry.has_tailer("a1"));

        // A second path does not replace the first.
        let agent = registry.get_or_create("a1", Some("/tmp/other.jsonl"), None, AgentOrigin::Hook);
        assert_eq!(agent.transcript_path.as_deref(), Some("/tmp/t.jsonl"));
    }

    #[test]
    fn detector_sync_leaves_hook_agents_alone() {
        let (tx, _rx) = event_channel();
        let mut registry = AgentRegistry::new(tx);
        registry.get_or_create("hooked", None, None, AgentOrigin::Hook);

        let report = |id: &str| DetectedAgent {
            id: id.to_string(),
            kind: None,
            transcript_path: None,
        };

        let outcome = registry.sync_detected(&[report("claude-1"), report("claude-2")]);
        assert_eq!(outcome.created, vec!["claude-1", "claude-2"]);
        assert!(outcome.removed.is_empty());

        let outcome = registry.sync_detected(&[report("claude-2")]);
        assert!(outcome.created.is_empty());
        assert_eq!(outcome.removed, vec!["claude-1"]);
        assert!(registry.contains("hooked"));
        assert!(registry.contains("claude-2"));
        assert_eq!(registry.get("claude-2").unwrap().origin, AgentOrigin::Detector);
    }

    #[test]
    fn blank_detector_ids_are_skipped() {
        let (tx, _rx) = event_channel();
        let mut registry = AgentRegistry::new(tx);

        let report = |id: &str| DetectedAgent {
            id: id.to_string(),
            kind: None,
            transcript_path: None,
        };

        let outcome = registry.sync_detected(&[report(""), report("   "), report(" claude-3 ")]);
        assert_eq!(outcome.created, vec!["claude-3"]);
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("claude-3"));

        let outcome = registry.sync_detected(&[report("claude-3\n")]);
        assert!(outcome.created.is_empty());
        assert!(outcome.removed.is_empty());
    }
}
