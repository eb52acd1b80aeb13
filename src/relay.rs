//! The relay actor.
//!
//! One task owns the registry, the fan-out hub and the outbound queue. HTTP
//! handlers and WebSocket tasks reach it through [`RelayHandle`], which sends
//! a [`RelayRequest`] and awaits a `oneshot` reply. Registry and tailer events
//! arrive on a separate unbounded channel and are drained after every request
//! so broadcasts caused by a request go out before the next one is handled.
//!
//! Injector calls never run on the actor: they are spawned, bounded by a
//! timeout, and their result is routed straight back to whoever asked.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::events::{event_channel, EventReceiver, RelayEvent};
use crate::hooks::HookEvent;
use crate::hub::{ClientSender, ConnId, Hub};
use crate::inject::{with_timeout, InjectError, InputInjector};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::queue::{OutboundQueue, QueuedMessage};
use crate::registry::{AgentRegistry, AgentSnapshot, DetectedAgent, SyncOutcome};
use crate::replay_buffer::{DEFAULT_ACTIVITY_CAPACITY, DEFAULT_CHAT_CAPACITY};
use crate::transcript::DEFAULT_POLL_INTERVAL;
use crate::types::{Agent, AgentOrigin, ChatMessage};

const REQUEST_CHANNEL_CAPACITY: usize = 256;
pub const DEFAULT_INJECT_TIMEOUT: Duration = Duration::from_secs(10);

pub const INSTANT_HINT: &str = "Typed into the agent's terminal";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("Agent \"{0}\" not found")]
    UnknownAgent(String),
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error(transparent)]
    Inject(#[from] InjectError),
    #[error("relay is not running")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub agent_id: String,
    pub hint: String,
}

/// Where `GET /agents/{id}/chat` should read the conversation from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatSource {
    Transcript {
        path: PathBuf,
        fallback: Vec<ChatMessage>,
    },
    History(Vec<ChatMessage>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthSnapshot {
    pub agent_count: usize,
    pub client_count: usize,
}

pub type Reply<T> = oneshot::Sender<T>;

pub enum RelayRequest {
    Connect {
        tx: ClientSender,
        reply: Reply<ConnId>,
    },
    Disconnect {
        conn_id: ConnId,
    },
    Command {
        conn_id: ConnId,
        command: ClientMessage,
    },
    Hook {
        event: HookEvent,
        reply: Reply<Result<Agent, RelayError>>,
    },
    DetectorSync {
        agents: Vec<DetectedAgent>,
        reply: Reply<SyncOutcome>,
    },
    ListAgents {
        reply: Reply<Vec<Agent>>,
    },
    Snapshot {
        agent_id: String,
        reply: Reply<Option<AgentSnapshot>>,
    },
    Chat {
        agent_id: String,
        reply: Reply<Result<ChatSource, RelayError>>,
    },
    Dequeue {
        agent_id: String,
        reply: Reply<(Option<QueuedMessage>, usize)>,
    },
    Peek {
        agent_id: String,
        reply: Reply<(usize, Vec<QueuedMessage>)>,
    },
    Send {
        agent_id: String,
        message: String,
        instant: bool,
        reply: Reply<Result<SendReceipt, RelayError>>,
    },
    Interrupt {
        agent_id: String,
        reply: Reply<Result<(), RelayError>>,
    },
    Health {
        reply: Reply<HealthSnapshot>,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct RelaySettings {
    pub activity_history: usize,
    pub chat_history: usize,
    pub poll_interval: Duration,
    pub inject_timeout: Duration,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            activity_history: DEFAULT_ACTIVITY_CAPACITY,
            chat_history: DEFAULT_CHAT_CAPACITY,
            poll_interval: DEFAULT_POLL_INTERVAL,
            inject_timeout: DEFAULT_INJECT_TIMEOUT,
        }
    }
}

/// Cloneable entry point to the relay actor.
#[derive(Clone)]
pub struct RelayHandle {
    tx: mpsc::Sender<RelayRequest>,
}

impl RelayHandle {
    pub fn new(tx: mpsc::Sender<RelayRequest>) -> Self {
        Self { tx }
    }

    /// Send a request carrying a reply channel and wait for the answer.
    pub async fn ask<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> RelayRequest,
    ) -> Result<T, RelayError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| RelayError::Closed)?;
        reply_rx.await.map_err(|_| RelayError::Closed)
    }

    /// Send a request that has no reply.
    pub async fn tell(&self, request: RelayRequest) -> Result<(), RelayError> {
        self.tx.send(request).await.map_err(|_| RelayError::Closed)
    }
}

/// Start the actor on the current runtime.
pub fn spawn_relay(settings: RelaySettings, injector: Arc<dyn InputInjector>) -> RelayHandle {
    let (tx, rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
    let (relay, events) = Relay::new(settings, injector);
    tokio::spawn(run_relay(relay, rx, events));
    RelayHandle::new(tx)
}

type Done<T> = Box<dyn FnOnce(Result<T, RelayError>) + Send + 'static>;

pub struct Relay {
    registry: AgentRegistry,
    hub: Hub,
    queue: OutboundQueue,
    injector: Arc<dyn InputInjector>,
    inject_timeout: Duration,
}

impl Relay {
    pub fn new(settings: RelaySettings, injector: Arc<dyn InputInjector>) -> (Self, EventReceiver) {
        let (events_tx, events_rx) = event_channel();
        let relay = Self {
            registry: AgentRegistry::with_poll_interval(events_tx, settings.poll_interval),
            hub: Hub::new(settings.activity_history, settings.chat_history),
            queue: OutboundQueue::new(),
            injector,
            inject_timeout: settings.inject_timeout,
        };
        (relay, events_rx)
    }

    fn handle_request(&mut self, request: RelayRequest) {
        match request {
            RelayRequest::Connect { tx, reply } => {
                let conn_id = self.hub.connect(tx, self.registry.list());
                tracing::info!(conn_id, "mobile client connected");
                let _ = reply.send(conn_id);
            }
            RelayRequest::Disconnect { conn_id } => {
                self.hub.disconnect(conn_id);
                tracing::info!(conn_id, "mobile client disconnected");
            }
            RelayRequest::Command { conn_id, command } => self.handle_command(conn_id, command),
            RelayRequest::Hook { event, reply } => {
                let _ = reply.send(self.ingest_hook(event));
            }
            RelayRequest::DetectorSync { agents, reply } => {
                let outcome = self.registry.sync_detected(&agents);
                if !outcome.created.is_empty() || !outcome.removed.is_empty() {
                    tracing::info!(
                        created = outcome.created.len(),
                        removed = outcome.removed.len(),
                        "detector sync applied"
                    );
                }
                let _ = reply.send(outcome);
            }
            RelayRequest::ListAgents { reply } => {
                let _ = reply.send(self.registry.list());
            }
            RelayRequest::Snapshot { agent_id, reply } => {
                let _ = reply.send(self.registry.snapshot(&agent_id));
            }
            RelayRequest::Chat { agent_id, reply } => {
                let _ = reply.send(self.chat_source(&agent_id));
            }
            RelayRequest::Dequeue { agent_id, reply } => {
                let message = self.queue.dequeue(&agent_id);
                let _ = reply.send((message, self.queue.len(&agent_id)));
            }
            RelayRequest::Peek { agent_id, reply } => {
                let _ = reply.send(self.queue.peek(&agent_id));
            }
            RelayRequest::Send {
                agent_id,
                message,
                instant,
                reply,
            } => self.send_message(
                agent_id,
                message,
                instant,
                Box::new(move |result| {
                    let _ = reply.send(result);
                }),
            ),
            RelayRequest::Interrupt { agent_id, reply } => self.interrupt(
                agent_id,
                Box::new(move |result| {
                    let _ = reply.send(result);
                }),
            ),
            RelayRequest::Health { reply } => {
                let _ = reply.send(HealthSnapshot {
                    agent_count: self.registry.len(),
                    client_count: self.hub.client_count(),
                });
            }
        }
    }

    fn handle_command(&mut self, conn_id: ConnId, command: ClientMessage) {
        match command {
            ClientMessage::Subscribe { agent_id } => self.hub.subscribe(conn_id, &agent_id),
            ClientMessage::Unsubscribe { agent_id } => self.hub.unsubscribe(conn_id, &agent_id),
            ClientMessage::ListAgents => {
                self.hub.send_to(
                    conn_id,
                    ServerMessage::AgentsList {
                        agents: self.registry.list(),
                    },
                );
            }
            ClientMessage::SendMessage {
                agent_id,
                message,
                instant,
            } => {
                let Some(tx) = self.hub.sender(conn_id) else {
                    return;
                };
                self.send_message(
                    agent_id,
                    message,
                    instant,
                    Box::new(move |result| {
                        let frame = match result {
                            Ok(receipt) => ServerMessage::MessageSent {
                                agent_id: receipt.agent_id,
                                success: true,
                                hint: receipt.hint,
                            },
                            Err(error) => ServerMessage::error(error.to_string()),
                        };
                        let _ = tx.send(frame);
                    }),
                );
            }
            ClientMessage::Interrupt { agent_id } => {
                let Some(tx) = self.hub.sender(conn_id) else {
                    return;
                };
                let target = agent_id.clone();
                self.interrupt(
                    agent_id,
                    Box::new(move |result| {
                        let frame = match result {
                            Ok(()) => ServerMessage::InterruptSent {
                                agent_id: target,
                                success: true,
                            },
                            Err(error) => ServerMessage::error(error.to_string()),
                        };
                        let _ = tx.send(frame);
                    }),
                );
            }
        }
    }

    fn ingest_hook(&mut self, event: HookEvent) -> Result<Agent, RelayError> {
        let agent_id = event.agent_id.trim();
        if agent_id.is_empty() {
            return Err(RelayError::MissingField("agentId"));
        }
        self.registry.get_or_create(
            agent_id,
            event.transcript_path(),
            event.source.as_deref(),
            AgentOrigin::Hook,
        );

        let outcome = event.outcome();
        tracing::debug!(agent_id = %agent_id, event_type = %event.event_type, "hook event");
        self.registry.record_activity(agent_id, &outcome.activity);
        if let Some(status) = outcome.status {
            self.registry.set_status(agent_id, status);
        }
        self.registry
            .get(agent_id)
            .cloned()
            .ok_or_else(|| RelayError::UnknownAgent(agent_id.to_string()))
    }

    fn chat_source(&self, agent_id: &str) -> Result<ChatSource, RelayError> {
        if !self.registry.contains(agent_id) {
            return Err(RelayError::UnknownAgent(agent_id.to_string()));
        }
        let history = self.hub.chat_history(agent_id);
        Ok(match self.registry.transcript_path(agent_id) {
            Some(path) => ChatSource::Transcript {
                path,
                fallback: history,
            },
            None => ChatSource::History(history),
        })
    }

    fn send_message(
        &mut self,
        agent_id: String,
        message: String,
        instant: bool,
        done: Done<SendReceipt>,
    ) {
        if !self.registry.contains(&agent_id) {
            done(Err(RelayError::UnknownAgent(agent_id)));
            return;
        }
        if message.trim().is_empty() {
            done(Err(RelayError::MissingField("message")));
            return;
        }

        if !instant {
            let pending = self.queue.enqueue(&agent_id, &message);
            tracing::info!(agent_id = %agent_id, pending, "message queued");
            done(Ok(SendReceipt {
                hint: queued_hint(pending),
                agent_id,
            }));
            return;
        }

        let injector = Arc::clone(&self.injector);
        let limit = self.inject_timeout;
        tokio::spawn(async move {
            let result = with_timeout(limit, injector.inject(&agent_id, &message)).await;
            match &result {
                Ok(()) => tracing::info!(agent_id = %agent_id, "message injected"),
                Err(error) => {
                    tracing::warn!(agent_id = %agent_id, error = %error, "message injection failed")
                }
            }
            let receipt = result.map(|()| SendReceipt {
                agent_id,
                hint: INSTANT_HINT.to_string(),
            });
            done(receipt.map_err(RelayError::from));
        });
    }

    fn interrupt(&mut self, agent_id: String, done: Done<()>) {
        if !self.registry.contains(&agent_id) {
            done(Err(RelayError::UnknownAgent(agent_id)));
            return;
        }
        let injector = Arc::clone(&self.injector);
        let limit = self.inject_timeout;
        tokio::spawn(async move {
            let result = with_timeout(limit, injector.interrupt(&agent_id)).await;
            match &result {
                Ok(()) => tracing::info!(agent_id = %agent_id, "interrupt sent"),
                Err(error) => {
                    tracing::warn!(agent_id = %agent_id, error = %error, "interrupt failed")
                }
            }
            done(result.map_err(RelayError::from));
        });
    }

    /// Tailer tasks may still be flushing a batch when their agent is
    /// removed, so chat for agents the registry no longer knows is dropped
    /// here rather than stored in history.
    fn dispatch_event(&mut self, event: RelayEvent) {
        match &event {
            RelayEvent::ChatMessage { agent_id, .. } if !self.registry.contains(agent_id) => {
                tracing::trace!(agent_id = %agent_id, "dropping chat for removed agent");
                return;
            }
            RelayEvent::AgentDisconnected { agent_id } => {
                let dropped = self.queue.clear(agent_id);
                if dropped > 0 {
                    tracing::info!(agent_id = %agent_id, dropped, "discarded queued messages");
                }
            }
            _ => {}
        }
        self.hub.handle_event(event);
    }

    fn drain_events(&mut self, events: &mut EventReceiver) {
        while let Ok(event) = events.try_recv() {
            self.dispatch_event(event);
        }
    }
}

pub fn queued_hint(pending: usize) -> String {
    if pending == 1 {
        "Queued; delivered when the agent is next idle".to_string()
    } else {
        format!("Queued ({pending} pending); delivered when the agent is next idle")
    }
}

pub async fn run_relay(
    mut relay: Relay,
    mut requests: mpsc::Receiver<RelayRequest>,
    mut events: EventReceiver,
) {
    tracing::debug!("relay actor started");
    loop {
        tokio::select! {
            request = requests.recv() => {
                let Some(request) = request else {
                    break;
                };
                relay.handle_request(request);
                relay.drain_events(&mut events);
            }
            Some(event) = events.recv() => {
                relay.dispatch_event(event);
            }
        }
    }
    tracing::debug!("relay actor stopped");
}
