// ABOUTME: Per-container registry actor that serializes every mutation through one tokio task.
// ABOUTME: Provides RegistryHandle for sending commands, subscribing to events, and reading held epochs.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{RwLock, RwLockReadGuard, broadcast, mpsc, oneshot};
use ulid::Ulid;

use crate::command::RegistryCommand;
use crate::epoch::Epoch;
use crate::event::{RegistryEvent, RegistryEventPayload};
use crate::registry::{RangeError, RegistryState};

/// Error type returned by an event sink.
pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// Durable destination for registry events. The actor appends every event
/// here before applying it, so a failed append leaves the registry untouched.
pub trait EventSink: Send + Sync + 'static {
    fn append(&mut self, event: &RegistryEvent) -> Result<(), SinkError>;
}

/// Errors that can occur when processing commands in the actor.
#[derive(Debug, Error)]
pub enum ActorError {
    #[error("epoch {0} is not held")]
    NotFound(Epoch),

    #[error(transparent)]
    Range(#[from] RangeError),

    #[error("failed to persist registry event: {0}")]
    Persist(String),

    #[error("registry actor channel closed")]
    ChannelClosed,
}

/// Message type sent through the command channel: a command paired with
/// a oneshot sender for the response.
type CommandMessage = (
    RegistryCommand,
    oneshot::Sender<Result<Vec<RegistryEvent>, ActorError>>,
);

/// Public handle for interacting with a registry actor. Cloning is cheap;
/// all clones talk to the same task.
#[derive(Clone)]
pub struct RegistryHandle {
    cmd_tx: mpsc::Sender<CommandMessage>,
    event_tx: broadcast::Sender<RegistryEvent>,
    state: Arc<RwLock<RegistryState>>,
    pub container_id: Ulid,
}

impl RegistryHandle {
    /// Send a command to the actor and await the resulting events.
    pub async fn send_command(
        &self,
        cmd: RegistryCommand,
    ) -> Result<Vec<RegistryEvent>, ActorError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send((cmd, tx))
            .await
            .map_err(|_| ActorError::ChannelClosed)?;
        rx.await.map_err(|_| ActorError::ChannelClosed)?
    }

    /// Add an epoch to the registry. Already held epochs are accepted silently.
    pub async fn insert(&self, epoch: Epoch) -> Result<(), ActorError> {
        self.send_command(RegistryCommand::Insert { epoch }).await?;
        Ok(())
    }

    /// Remove exactly one held epoch.
    pub async fn remove_one(&self, epoch: Epoch) -> Result<(), ActorError> {
        self.send_command(RegistryCommand::RemoveOne { epoch }).await?;
        Ok(())
    }

    /// Remove every held epoch in `[lo, hi]` and return how many were removed.
    pub async fn remove_range(&self, lo: Epoch, hi: Epoch) -> Result<usize, ActorError> {
        let events = self
            .send_command(RegistryCommand::RemoveRange { lo, hi })
            .await?;
        Ok(events
            .iter()
            .map(|e| match &e.payload {
                RegistryEventPayload::SnapshotRangeDestroyed { removed, .. } => removed.len(),
                _ => 0,
            })
            .sum())
    }

    /// Durably reserve epochs up to `through` before any of them is handed out.
    pub async fn reserve(&self, through: Epoch) -> Result<(), ActorError> {
        self.send_command(RegistryCommand::Reserve { through }).await?;
        Ok(())
    }

    /// A consistent copy of the current membership.
    pub async fn list(&self) -> BTreeSet<Epoch> {
        self.state.read().await.held.clone()
    }

    /// Subscribe to the event broadcast stream.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_tx.subscribe()
    }

    /// Get a read-only reference to the shared state.
    pub async fn read_state(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().await
    }
}

/// Spawn a registry actor for `container_id` starting from `initial_state`.
/// With a sink, every event is made durable before it becomes visible.
pub fn spawn(
    container_id: Ulid,
    initial_state: RegistryState,
    sink: Option<Box<dyn EventSink>>,
) -> RegistryHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel::<CommandMessage>(64);
    let (event_tx, _) = broadcast::channel::<RegistryEvent>(256);
    let last_event_id = initial_state.last_event_id;
    let state = Arc::new(RwLock::new(initial_state));

    let handle = RegistryHandle {
        cmd_tx,
        event_tx: event_tx.clone(),
        state: Arc::clone(&state),
        container_id,
    };

    let actor = RegistryActor {
        state,
        cmd_rx,
        event_tx,
        sink,
        next_event_id: last_event_id + 1,
        container_id,
    };

    tokio::spawn(actor.run());

    handle
}

/// The internal actor that processes commands in arrival order.
struct RegistryActor {
    state: Arc<RwLock<RegistryState>>,
    cmd_rx: mpsc::Receiver<CommandMessage>,
    event_tx: broadcast::Sender<RegistryEvent>,
    sink: Option<Box<dyn EventSink>>,
    next_event_id: u64,
    container_id: Ulid,
}

impl RegistryActor {
    async fn run(mut self) {
        while let Some((cmd, reply_tx)) = self.cmd_rx.recv().await {
            let result = self.process_command(cmd).await;
            // The caller may have timed out and dropped its receiver
            let _ = reply_tx.send(result);
        }
        tracing::debug!("registry actor for container {} stopped", self.container_id);
    }

    async fn process_command(
        &mut self,
        cmd: RegistryCommand,
    ) -> Result<Vec<RegistryEvent>, ActorError> {
        let payloads = self.command_to_payloads(cmd).await?;

        let now = Utc::now();
        let events: Vec<RegistryEvent> = payloads
            .into_iter()
            .enumerate()
            .map(|(i, payload)| RegistryEvent {
                event_id: self.next_event_id + i as u64,
                container_id: self.container_id,
                timestamp: now,
                payload,
            })
            .collect();

        let container_id = self.container_id;
        if let Some(sink) = self.sink.as_mut() {
            for event in &events {
                sink.append(event).map_err(|e| {
                    tracing::error!(
                        "container {}: failed to persist event {}: {}",
                        container_id,
                        event.event_id,
                        e
                    );
                    ActorError::Persist(e.to_string())
                })?;
            }
        }
        self.next_event_id += events.len() as u64;

        {
            let mut state = self.state.write().await;
            for event in &events {
                state.apply(event);
            }
        }

        for event in &events {
            tracing::debug!(
                "container {}: event {} {}",
                self.container_id,
                event.event_id,
                event.payload.kind()
            );
            // No active subscribers is fine
            let _ = self.event_tx.send(event.clone());
        }

        Ok(events)
    }

    /// Validate a command against current state and produce the payloads to record.
    /// No-op commands produce no payloads.
    async fn command_to_payloads(
        &self,
        cmd: RegistryCommand,
    ) -> Result<Vec<RegistryEventPayload>, ActorError> {
        let state = self.state.read().await;

        let payloads = match cmd {
            RegistryCommand::Insert { epoch } => {
                if state.contains(epoch) {
                    tracing::warn!(
                        "container {}: epoch {} already held, insert ignored",
                        self.container_id,
                        epoch
                    );
                    Vec::new()
                } else {
                    vec![RegistryEventPayload::SnapshotCreated { epoch }]
                }
            }

            RegistryCommand::RemoveOne { epoch } => {
                if !state.contains(epoch) {
                    return Err(ActorError::NotFound(epoch));
                }
                vec![RegistryEventPayload::SnapshotDestroyed { epoch }]
            }

            RegistryCommand::RemoveRange { lo, hi } => {
                let removed = state.held_in_range(lo, hi)?;
                if removed.is_empty() {
                    Vec::new()
                } else {
                    vec![RegistryEventPayload::SnapshotRangeDestroyed { lo, hi, removed }]
                }
            }

            RegistryCommand::Reserve { through } => {
                if through <= state.reserved_through {
                    Vec::new()
                } else {
                    vec![RegistryEventPayload::EpochsReserved { through }]
                }
            }
        };

        Ok(payloads)
    }
}
