//! Agents: the registry entries of the collective and their behaviours.

use crate::capability::{best_match, clamp_unit, Capability};
use crate::consensus::{ProposalKind, ProposalStatus};
use crate::message::{ConsensusRequest, EmergencyAlert, Message, MessageBody, TaskAssignment};
use crate::scheduler::Task;
use crate::types::{new_id, AgentId, CollectiveError, ProposalId, Result, TaskId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Smoothing factor for the success-rate moving average.
const SUCCESS_EMA_ALPHA: f64 = 0.1;

/// Role an agent plays in the collective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Coordinator,
    Analyst,
    Legislator,
    Communicator,
    DataProcessor,
    Auditor,
    Specialist,
    Monitor,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Coordinator => "coordinator",
            AgentRole::Analyst => "analyst",
            AgentRole::Legislator => "legislator",
            AgentRole::Communicator => "communicator",
            AgentRole::DataProcessor => "data_processor",
            AgentRole::Auditor => "auditor",
            AgentRole::Specialist => "specialist",
            AgentRole::Monitor => "monitor",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Idle,
    Busy,
    Corrupted,
    Isolated,
    Dead,
}

/// Running performance figures of an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub success_rate: f64,
    pub learning_rate: f64,
    pub collaboration_score: f64,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self {
            success_rate: 1.0,
            learning_rate: 0.1,
            collaboration_score: 0.5,
        }
    }
}

/// A registered agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub role: AgentRole,
    pub status: AgentStatus,
    pub capabilities: Vec<Capability>,
    pub specializations: BTreeSet<String>,
    pub trust_score: f64,
    pub metrics: PerformanceMetrics,
    pub is_corrupted: bool,
    pub corruption_reason: Option<String>,
    pub isolation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Agent {
    /// Create an active agent with full trust.
    pub fn new(id: impl Into<AgentId>, role: AgentRole, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            role,
            status: AgentStatus::Active,
            capabilities: Vec::new(),
            specializations: BTreeSet::new(),
            trust_score: 1.0,
            metrics: PerformanceMetrics::default(),
            is_corrupted: false,
            corruption_reason: None,
            isolation_reason: None,
            created_at: now,
            last_seen: now,
        }
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability.normalized());
        self
    }

    pub fn with_specialization(mut self, specialization: impl Into<String>) -> Self {
        self.specializations.insert(specialization.into());
        self
    }

    pub fn with_trust(mut self, trust: f64) -> Self {
        self.set_trust(trust);
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == AgentStatus::Active
    }

    /// Isolated and dead agents take no further part in the collective.
    pub fn is_quarantined(&self) -> bool {
        matches!(self.status, AgentStatus::Isolated | AgentStatus::Dead)
    }

    /// How well this agent fits a task, in [0, 1].
    pub fn assess_fit(&self, task: &Task) -> f64 {
        self.requirement_fit(&task.requirements)
    }

    /// Average best proficiency across `requirements`. Inactive agents score
    /// 0 and an empty requirement list scores 1.
    pub fn requirement_fit(&self, requirements: &[String]) -> f64 {
        if !self.is_active() {
            return 0.0;
        }
        if requirements.is_empty() {
            return 1.0;
        }

        let total: f64 = requirements
            .iter()
            .map(|r| best_match(&self.capabilities, r))
            .sum();
        clamp_unit(total / requirements.len() as f64)
    }

    /// Fit against a single requirement tag.
    pub fn requirement_score(&self, requirement: &str) -> f64 {
        if !self.is_active() {
            return 0.0;
        }
        best_match(&self.capabilities, requirement)
    }

    /// Mark the agent as compromised.
    pub fn corrupt(&mut self, reason: impl Into<String>) {
        self.trust_score = 0.0;
        self.status = AgentStatus::Corrupted;
        self.is_corrupted = true;
        self.corruption_reason = Some(reason.into());
    }

    /// Quarantine the agent.
    pub fn isolate(&mut self, reason: impl Into<String>) {
        self.status = AgentStatus::Isolated;
        self.isolation_reason = Some(reason.into());
    }

    /// Fold a task outcome into the success rate.
    pub fn record_outcome(&mut self, success: bool, now: DateTime<Utc>) {
        let sample = if success { 1.0 } else { 0.0 };
        self.metrics.success_rate = clamp_unit(
            (1.0 - SUCCESS_EMA_ALPHA) * self.metrics.success_rate + SUCCESS_EMA_ALPHA * sample,
        );
        self.last_seen = now;
    }

    pub fn set_trust(&mut self, trust: f64) {
        self.trust_score = clamp_unit(trust);
    }

    pub fn adjust_trust(&mut self, delta: f64) {
        self.set_trust(self.trust_score + delta);
    }

    /// Multiply trust by `factor`.
    pub fn decay_trust(&mut self, factor: f64) {
        self.set_trust(self.trust_score * factor);
    }

    /// Run `message` through `behavior`.
    ///
    /// Isolated and dead agents drop everything. Directives are addressed to
    /// the orchestrator and never reach a behaviour.
    pub async fn process_message(
        &self,
        behavior: &dyn AgentBehavior,
        message: &Message,
    ) -> Option<MessageBody> {
        if self.is_quarantined() {
            tracing::debug!(agent_id = %self.id, message_id = %message.id, "Dropping message for quarantined agent");
            return None;
        }

        match &message.body {
            MessageBody::Text(text) => behavior.on_text(self, message, text).await,
            MessageBody::Notification { event, data } => {
                behavior.on_notification(self, message, event, data).await
            }
            MessageBody::TaskAssignment(assignment) => {
                behavior.on_task_assignment(self, message, assignment).await
            }
            MessageBody::TaskOffer {
                task_id,
                requirements,
            } => {
                behavior
                    .on_task_offer(self, message, task_id, requirements)
                    .await
            }
            MessageBody::ConsensusRequest(request) => {
                behavior.on_consensus_request(self, message, request).await
            }
            MessageBody::ConsensusResult {
                proposal_id,
                status,
                ..
            } => {
                let approved = *status == ProposalStatus::Approved;
                behavior
                    .on_consensus_result(self, message, proposal_id, approved)
                    .await
            }
            MessageBody::Emergency(alert) => behavior.on_emergency(self, message, alert).await,
            MessageBody::PlanningRequest { objective } => {
                behavior.on_planning_request(self, message, objective).await
            }
            MessageBody::Custom { name, payload } => {
                behavior.on_custom(self, message, name, payload).await
            }
            MessageBody::Vote { .. }
            | MessageBody::ClaimTask { .. }
            | MessageBody::SubmitTask(_)
            | MessageBody::RequestSpecialist { .. } => None,
        }
    }
}

/// How an agent reacts to incoming messages.
///
/// Every handler defaults to ignoring the message. A returned body is sent
/// back to the original sender, so directives such as
/// [`MessageBody::Vote`] reach the orchestrator this way.
#[async_trait]
pub trait AgentBehavior: Send + Sync {
    async fn on_text(&self, _agent: &Agent, _message: &Message, _text: &str) -> Option<MessageBody> {
        None
    }

    async fn on_notification(
        &self,
        _agent: &Agent,
        _message: &Message,
        _event: &str,
        _data: &Value,
    ) -> Option<MessageBody> {
        None
    }

    async fn on_task_assignment(
        &self,
        _agent: &Agent,
        _message: &Message,
        _assignment: &TaskAssignment,
    ) -> Option<MessageBody> {
        None
    }

    async fn on_task_offer(
        &self,
        _agent: &Agent,
        _message: &Message,
        _task_id: &TaskId,
        _requirements: &[String],
    ) -> Option<MessageBody> {
        None
    }

    async fn on_consensus_request(
        &self,
        _agent: &Agent,
        _message: &Message,
        _request: &ConsensusRequest,
    ) -> Option<MessageBody> {
        None
    }

    async fn on_consensus_result(
        &self,
        _agent: &Agent,
        _message: &Message,
        _proposal_id: &ProposalId,
        _approved: bool,
    ) -> Option<MessageBody> {
        None
    }

    async fn on_emergency(
        &self,
        _agent: &Agent,
        _message: &Message,
        _alert: &EmergencyAlert,
    ) -> Option<MessageBody> {
        None
    }

    async fn on_planning_request(
        &self,
        _agent: &Agent,
        _message: &Message,
        _objective: &str,
    ) -> Option<MessageBody> {
        None
    }

    async fn on_custom(
        &self,
        _agent: &Agent,
        _message: &Message,
        _name: &str,
        _payload: &Value,
    ) -> Option<MessageBody> {
        None
    }
}

/// Receives messages and never answers.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassiveBehavior;

#[async_trait]
impl AgentBehavior for PassiveBehavior {}

/// Votes for every proposal except its own isolation and claims offered tasks.
#[derive(Debug, Default, Clone, Copy)]
pub struct CooperativeBehavior;

#[async_trait]
impl AgentBehavior for CooperativeBehavior {
    async fn on_consensus_request(
        &self,
        agent: &Agent,
        _message: &Message,
        request: &ConsensusRequest,
    ) -> Option<MessageBody> {
        let vote = match &request.proposal {
            ProposalKind::IsolateAgent { agent_id, .. } => agent_id != &agent.id,
            _ => true,
        };
        Some(MessageBody::Vote {
            proposal_id: request.proposal_id.clone(),
            vote,
        })
    }

    async fn on_task_offer(
        &self,
        _agent: &Agent,
        _message: &Message,
        task_id: &TaskId,
        _requirements: &[String],
    ) -> Option<MessageBody> {
        Some(MessageBody::ClaimTask {
            task_id: task_id.clone(),
        })
    }
}

/// Built-in behaviours selectable from an [`AgentDescriptor`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorKind {
    #[default]
    Passive,
    Cooperative,
}

impl BehaviorKind {
    pub fn build(self) -> Arc<dyn AgentBehavior> {
        match self {
            BehaviorKind::Passive => Arc::new(PassiveBehavior),
            BehaviorKind::Cooperative => Arc::new(CooperativeBehavior),
        }
    }
}

/// External description of an agent to register.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    /// Generated from the role when absent
    #[serde(default)]
    pub id: Option<AgentId>,
    pub role: AgentRole,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    #[serde(default)]
    pub specializations: Vec<String>,
    #[serde(default)]
    pub trust_score: Option<f64>,
    #[serde(default)]
    pub behavior: BehaviorKind,
}

impl AgentDescriptor {
    pub fn new(role: AgentRole) -> Self {
        Self {
            id: None,
            role,
            capabilities: Vec::new(),
            specializations: Vec::new(),
            trust_score: None,
            behavior: BehaviorKind::default(),
        }
    }

    pub fn with_id(mut self, id: impl Into<AgentId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }

    pub fn with_behavior(mut self, behavior: BehaviorKind) -> Self {
        self.behavior = behavior;
        self
    }

    /// Build the registry entry.
    pub fn into_agent(self, now: DateTime<Utc>) -> Result<Agent> {
        let id = match self.id {
            Some(id) if id.trim().is_empty() => {
                return Err(CollectiveError::InvalidDescriptor(
                    "agent id must not be empty".to_string(),
                ))
            }
            Some(id) => id,
            None => format!("{}-{}", self.role, &new_id()[..8]),
        };

        let mut agent = Agent::new(id, self.role, now);
        for capability in self.capabilities {
            if capability.name.trim().is_empty() {
                return Err(CollectiveError::InvalidDescriptor(
                    "capability name must not be empty".to_string(),
                ));
            }
            agent.capabilities.push(capability.normalized());
        }
        agent.specializations.extend(self.specializations);
        if let Some(trust) = self.trust_score {
            agent.set_trust(trust);
        }
        Ok(agent)
    }
}
