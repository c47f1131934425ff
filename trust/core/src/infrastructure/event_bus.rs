// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Pub/Sub for Domain Events
//
// Provides in-memory event streaming using tokio broadcast channels.
// Observers (audit sinks, webhooks, dashboards) subscribe here; nothing in the
// engine depends on an event being received.
//
// In-memory only: events are lost on restart. The append-only tables are the
// durable record.

use crate::domain::agent::AgentId;
use crate::domain::events::{
    AgentLifecycleEvent, AttestationEvent, CapabilityEvent, DriftEvent, KeyEvent, PolicyEvent, TrustEvent,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Unified domain event type for the event bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    AgentLifecycle(AgentLifecycleEvent),
    Capability(CapabilityEvent),
    Trust(TrustEvent),
    Key(KeyEvent),
    Attestation(AttestationEvent),
    Drift(DriftEvent),
    Policy(PolicyEvent),
}

impl DomainEvent {
    /// Agent the event is about, if any
    pub fn agent_id(&self) -> Option<AgentId> {
        match self {
            DomainEvent::AgentLifecycle(e) => Some(match e {
                AgentLifecycleEvent::AgentRegistered { agent_id, .. }
                | AgentLifecycleEvent::AgentStatusChanged { agent_id, .. }
                | AgentLifecycleEvent::AgentCompromised { agent_id, .. } => *agent_id,
            }),
            DomainEvent::Capability(e) => Some(match e {
                CapabilityEvent::CapabilityGranted { agent_id, .. }
                | CapabilityEvent::CapabilityRevoked { agent_id, .. }
                | CapabilityEvent::ViolationRecorded { agent_id, .. } => *agent_id,
            }),
            DomainEvent::Trust(TrustEvent::TrustScoreUpdated { agent_id, .. }) => Some(*agent_id),
            DomainEvent::Key(e) => Some(match e {
                KeyEvent::KeyIssued { agent_id, .. }
                | KeyEvent::KeyRotated { agent_id, .. }
                | KeyEvent::PreviousKeyRevoked { agent_id, .. } => *agent_id,
            }),
            DomainEvent::Attestation(e) => match e {
                AttestationEvent::AttestationVerified { agent_id, .. } => Some(*agent_id),
                AttestationEvent::AttestationRejected { agent_id, .. } => *agent_id,
                AttestationEvent::AttestationsExpired { .. } => None,
            },
            DomainEvent::Drift(e) => Some(match e {
                DriftEvent::BaselineEstablished { agent_id, .. }
                | DriftEvent::DriftDetected { agent_id, .. }
                | DriftEvent::BaselineRetired { agent_id, .. } => *agent_id,
            }),
            DomainEvent::Policy(PolicyEvent::PolicyMatched { agent_id, .. }) => Some(*agent_id),
        }
    }
}

/// Event bus for publishing and subscribing to domain events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity
    /// Capacity determines how many events can be buffered before dropping old ones
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create event bus with default capacity (1000)
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn publish_agent_event(&self, event: AgentLifecycleEvent) {
        self.publish(DomainEvent::AgentLifecycle(event));
    }

    pub fn publish_capability_event(&self, event: CapabilityEvent) {
        self.publish(DomainEvent::Capability(event));
    }

    pub fn publish_trust_event(&self, event: TrustEvent) {
        self.publish(DomainEvent::Trust(event));
    }

    pub fn publish_key_event(&self, event: KeyEvent) {
        self.publish(DomainEvent::Key(event));
    }

    pub fn publish_attestation_event(&self, event: AttestationEvent) {
        self.publish(DomainEvent::Attestation(event));
    }

    pub fn publish_drift_event(&self, event: DriftEvent) {
        self.publish(DomainEvent::Drift(event));
    }

    pub fn publish_policy_event(&self, event: PolicyEvent) {
        self.publish(DomainEvent::Policy(event));
    }

    /// Publish a domain event to all subscribers
    fn publish(&self, event: DomainEvent) {
        debug!("Publishing event: {:?}", event);

        // send() fails only when there are no receivers
        let receiver_count = self.sender.send(event).unwrap_or(0);

        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }

    /// Subscribe to all domain events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to events about a single agent
    pub fn subscribe_agent(&self, agent_id: AgentId) -> AgentEventReceiver {
        AgentEventReceiver {
            receiver: self.sender.subscribe(),
            agent_id,
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

/// Receiver for all domain events
pub struct EventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
}

impl EventReceiver {
    /// Receive the next event (waits until one is available)
    pub async fn recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Receiver filtered to one agent
pub struct AgentEventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
    agent_id: AgentId,
}

impl AgentEventReceiver {
    pub async fn recv(&mut self) -> Result<DomainEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if event.agent_id() == Some(self.agent_id) {
                return Ok(event);
            }
        }
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}
