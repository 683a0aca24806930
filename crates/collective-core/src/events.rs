//! Notifications published to subscribers of the collective.

use crate::agent::AgentRole;
use crate::consensus::ProposalStatus;
use crate::types::{AgentId, MessageId, ProposalId, TaskId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

/// Event emitted by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum CollectiveEvent {
    AgentJoined {
        agent_id: AgentId,
        role: AgentRole,
    },
    AgentLeft {
        agent_id: AgentId,
    },
    MessageBroadcast {
        message_id: MessageId,
        sender_id: AgentId,
        message_type: String,
        recipients: usize,
    },
    ConsensusUpdate {
        proposal_id: ProposalId,
        status: ProposalStatus,
        approval_rate: f64,
    },
    EmergencyProtocol {
        task_id: TaskId,
        unmet_requirement: Option<String>,
        specialist_id: Option<AgentId>,
    },
}

impl CollectiveEvent {
    /// Notification method name.
    pub fn name(&self) -> &'static str {
        match self {
            CollectiveEvent::AgentJoined { .. } => "agent_joined",
            CollectiveEvent::AgentLeft { .. } => "agent_left",
            CollectiveEvent::MessageBroadcast { .. } => "message_broadcast",
            CollectiveEvent::ConsensusUpdate { .. } => "consensus_update",
            CollectiveEvent::EmergencyProtocol { .. } => "emergency_protocol",
        }
    }
}

/// Fan-out of events to any number of subscribers.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<CollectiveEvent>,
}

impl EventPublisher {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    /// Publish an event. Nothing happens when nobody is listening.
    pub fn publish(&self, event: CollectiveEvent) {
        tracing::trace!(event = event.name(), "Publishing event");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CollectiveEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let publisher = EventPublisher::new();
        let mut rx = publisher.subscribe();

        publisher.publish(CollectiveEvent::AgentLeft {
            agent_id: "a1".into(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "agent_left");
    }

    #[test]
    fn test_publish_without_subscribers() {
        EventPublisher::new().publish(CollectiveEvent::AgentLeft {
            agent_id: "a1".into(),
        });
    }

    #[test]
    fn test_wire_shape() {
        let value = serde_json::to_value(CollectiveEvent::AgentJoined {
            agent_id: "a1".into(),
            role: AgentRole::Analyst,
        })
        .unwrap();
        assert_eq!(value["event"], "agent_joined");
        assert_eq!(value["data"]["role"], "analyst");
    }
}
