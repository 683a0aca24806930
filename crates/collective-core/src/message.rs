//! Messages exchanged between agents and the orchestrator.

use crate::consensus::{ProposalKind, ProposalStatus};
use crate::scheduler::TaskSpec;
use crate::types::{new_id, AgentId, MessageId, ProposalId, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lowest message priority.
pub const MIN_PRIORITY: u8 = 1;
/// Highest message priority.
pub const MAX_PRIORITY: u8 = 5;

fn default_priority() -> u8 {
    3
}

/// Work handed to an agent by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub task_id: TaskId,
    pub title: String,
    pub requirements: Vec<String>,
    pub fit_score: f64,
}

/// Request for votes on a proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusRequest {
    pub proposal_id: ProposalId,
    pub proposer_id: AgentId,
    pub proposal: ProposalKind,
    pub voting_threshold: f64,
    pub deadline: DateTime<Utc>,
}

/// Alert raised when no registered agent qualifies for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyAlert {
    pub task_id: TaskId,
    pub unmet_requirement: Option<String>,
    pub domain: Option<String>,
}

/// Typed message payload, tagged by message type.
///
/// The last four variants are directives addressed to the orchestrator;
/// they are applied by the collective rather than delivered to agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum MessageBody {
    Text(String),
    Notification {
        event: String,
        #[serde(default)]
        data: Value,
    },
    TaskAssignment(TaskAssignment),
    TaskOffer {
        task_id: TaskId,
        requirements: Vec<String>,
    },
    ConsensusRequest(ConsensusRequest),
    ConsensusResult {
        proposal_id: ProposalId,
        status: ProposalStatus,
        approval_rate: f64,
    },
    Emergency(EmergencyAlert),
    PlanningRequest {
        objective: String,
    },
    Custom {
        name: String,
        #[serde(default)]
        payload: Value,
    },
    Vote {
        proposal_id: ProposalId,
        vote: bool,
    },
    ClaimTask {
        task_id: TaskId,
    },
    SubmitTask(TaskSpec),
    RequestSpecialist {
        specialty: String,
        domain: String,
    },
}

impl MessageBody {
    /// Wire name of the message type.
    pub fn type_name(&self) -> &'static str {
        match self {
            MessageBody::Text(_) => "text",
            MessageBody::Notification { .. } => "notification",
            MessageBody::TaskAssignment(_) => "task_assignment",
            MessageBody::TaskOffer { .. } => "task_offer",
            MessageBody::ConsensusRequest(_) => "consensus_request",
            MessageBody::ConsensusResult { .. } => "consensus_result",
            MessageBody::Emergency(_) => "emergency",
            MessageBody::PlanningRequest { .. } => "planning_request",
            MessageBody::Custom { .. } => "custom",
            MessageBody::Vote { .. } => "vote",
            MessageBody::ClaimTask { .. } => "claim_task",
            MessageBody::SubmitTask(_) => "submit_task",
            MessageBody::RequestSpecialist { .. } => "request_specialist",
        }
    }

    /// Whether this payload is an instruction for the orchestrator.
    pub fn is_directive(&self) -> bool {
        matches!(
            self,
            MessageBody::Vote { .. }
                | MessageBody::ClaimTask { .. }
                | MessageBody::SubmitTask(_)
                | MessageBody::RequestSpecialist { .. }
        )
    }
}

/// A message on the bus. Immutable once sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default = "new_id")]
    pub id: MessageId,

    pub sender_id: AgentId,

    /// `None` broadcasts to every active agent except the sender
    #[serde(default)]
    pub recipient_id: Option<AgentId>,

    #[serde(flatten)]
    pub body: MessageBody,

    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    #[serde(default = "default_priority")]
    pub priority: u8,

    #[serde(default)]
    pub requires_response: bool,

    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl Message {
    /// Create a direct message.
    pub fn direct(
        sender_id: impl Into<AgentId>,
        recipient_id: impl Into<AgentId>,
        body: MessageBody,
    ) -> Self {
        Self::new(sender_id.into(), Some(recipient_id.into()), body)
    }

    /// Create a broadcast message.
    pub fn broadcast(sender_id: impl Into<AgentId>, body: MessageBody) -> Self {
        Self::new(sender_id.into(), None, body)
    }

    fn new(sender_id: AgentId, recipient_id: Option<AgentId>, body: MessageBody) -> Self {
        Self {
            id: new_id(),
            sender_id,
            recipient_id,
            body,
            timestamp: Utc::now(),
            priority: default_priority(),
            requires_response: false,
            correlation_id: None,
        }
    }

    /// Build the reply an agent returned for `original`.
    pub fn reply_to(original: &Message, responder: AgentId, body: MessageBody) -> Self {
        let mut reply = Self::new(responder, Some(original.sender_id.clone()), body);
        reply.correlation_id = Some(
            original
                .correlation_id
                .clone()
                .unwrap_or_else(|| original.id.clone()),
        );
        reply.priority = original.priority;
        reply
    }

    /// Set priority (clamped to 1..=5).
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.clamp(MIN_PRIORITY, MAX_PRIORITY);
        self
    }

    /// Mark the message as expecting responses.
    pub fn requiring_response(mut self) -> Self {
        self.requires_response = true;
        self
    }

    /// Set the correlation id.
    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn is_broadcast(&self) -> bool {
        self.recipient_id.is_none()
    }

    /// Serialized JSON size, used as the token cost of the message.
    pub fn serialized_size(&self) -> u64 {
        serde_json::to_vec(self).map(|v| v.len() as u64).unwrap_or(0)
    }
}
