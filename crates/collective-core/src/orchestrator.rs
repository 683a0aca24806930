//! The collective orchestrator.
//!
//! [`Collective`] owns the agent registry, the message bus, the proposal and
//! task tables and the aggregate metrics behind a single lock. Every
//! operation mutates that state synchronously and queues outbound messages;
//! the queue is then drained breadth-first, delivering each message and
//! queueing the replies one generation deeper, until nothing is left or the
//! fan-out bound is reached.
//!
//! Agent behaviours run on their own tasks while the lock is held and must
//! not call back into the collective. They act on it by replying with
//! directives (`vote`, `claim_task`, `submit_task`, `request_specialist`).

use crate::agent::{Agent, AgentBehavior, AgentDescriptor, AgentRole, AgentStatus, BehaviorKind};
use crate::bus::MessageBus;
use crate::clock::{Clock, SystemClock};
use crate::consensus::{
    ConsensusEngine, Proposal, ProposalKind, ProposalRequest, ProposalStatus, VoteOutcome,
};
use crate::events::{CollectiveEvent, EventPublisher};
use crate::health::{
    communication_efficiency, CollectiveMetrics, ConsciousnessCost, FlagReason, HealthMonitor,
    HealthSummary,
};
use crate::message::{ConsensusRequest, EmergencyAlert, Message, MessageBody, TaskAssignment};
use crate::scheduler::{SchedulingPlan, Task, TaskScheduler, TaskSpec, TaskStatus};
use crate::specialization::{DomainTrainer, EmergenceReport, HeuristicTrainer, SpecialistFactory};
use crate::types::{
    generate_instance_id, AgentId, CollectiveError, ProposalId, Result, TaskId, COLLECTIVE_ID,
};
use chrono::Duration as ChronoDuration;
use collective_config::CollectiveConfig;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

/// Result of sending one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub message_id: String,
    /// At least one recipient accepted the message, or the directive was applied
    pub delivered: bool,
    pub recipients: Vec<AgentId>,
    pub responses: usize,
}

struct Outgoing {
    message: Message,
    depth: usize,
}

struct CollectiveState {
    agents: HashMap<AgentId, Agent>,
    agent_order: Vec<AgentId>,
    bus: MessageBus,
    consensus: ConsensusEngine,
    scheduler: TaskScheduler,
    metrics: CollectiveMetrics,
    emergency_active: bool,
    outbox: VecDeque<Outgoing>,
    /// Generation of the message being dispatched
    depth: usize,
}

impl CollectiveState {
    fn agents_in_order(&self) -> impl Iterator<Item = &Agent> {
        self.agent_order.iter().filter_map(|id| self.agents.get(id))
    }

    fn active_count(&self) -> usize {
        self.agents.values().filter(|a| a.is_active()).count()
    }

    fn enqueue(&mut self, message: Message) {
        let depth = self.depth;
        self.outbox.push_back(Outgoing { message, depth });
    }

    fn refresh_emergency(&mut self) {
        if self.emergency_active && !self.scheduler.has_emergencies() {
            info!("Emergency protocol cleared");
            self.emergency_active = false;
        }
    }
}

struct Inner {
    state: Mutex<CollectiveState>,
    clock: Arc<dyn Clock>,
    events: EventPublisher,
    health: HealthMonitor,
    specialists: SpecialistFactory,
    specialist_behavior: Arc<dyn AgentBehavior>,
    config: CollectiveConfig,
    instance_id: String,
}

/// Builder for [`Collective`].
pub struct CollectiveBuilder {
    config: CollectiveConfig,
    clock: Option<Arc<dyn Clock>>,
    trainer: Option<Arc<dyn DomainTrainer>>,
    specialist_behavior: Option<Arc<dyn AgentBehavior>>,
    instance_id: Option<String>,
}

impl CollectiveBuilder {
    pub fn new(config: CollectiveConfig) -> Self {
        Self {
            config,
            clock: None,
            trainer: None,
            specialist_behavior: None,
            instance_id: None,
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn trainer(mut self, trainer: Arc<dyn DomainTrainer>) -> Self {
        self.trainer = Some(trainer);
        self
    }

    /// Behaviour given to dynamically created specialists. Cooperative by
    /// default.
    pub fn specialist_behavior(mut self, behavior: Arc<dyn AgentBehavior>) -> Self {
        self.specialist_behavior = Some(behavior);
        self
    }

    pub fn instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    pub fn build(self) -> Result<Collective> {
        self.config.validate()?;

        let config = self.config;
        let trainer = self
            .trainer
            .unwrap_or_else(|| Arc::new(HeuristicTrainer::new(&config.specialist)));
        let state = CollectiveState {
            agents: HashMap::new(),
            agent_order: Vec::new(),
            bus: MessageBus::new(&config.bus),
            consensus: ConsensusEngine::new(config.consensus.clone()),
            scheduler: TaskScheduler::new(config.scheduler.clone()),
            metrics: CollectiveMetrics {
                communication_efficiency: 1.0,
                ..CollectiveMetrics::default()
            },
            emergency_active: false,
            outbox: VecDeque::new(),
            depth: 0,
        };

        let inner = Inner {
            state: Mutex::new(state),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            events: EventPublisher::new(),
            health: HealthMonitor::new(config.health.clone()),
            specialists: SpecialistFactory::new(trainer, &config.specialist),
            specialist_behavior: self
                .specialist_behavior
                .unwrap_or_else(|| BehaviorKind::Cooperative.build()),
            instance_id: self.instance_id.unwrap_or_else(generate_instance_id),
            config,
        };

        info!(instance_id = %inner.instance_id, "Collective initialized");
        Ok(Collective {
            inner: Arc::new(inner),
        })
    }
}

/// Handle to a running collective. Cheap to clone.
#[derive(Clone)]
pub struct Collective {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Collective {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collective")
            .field("instance_id", &self.inner.instance_id)
            .finish_non_exhaustive()
    }
}

impl Collective {
    /// Create a collective with the system clock and default trainer.
    pub fn new(config: CollectiveConfig) -> Result<Self> {
        CollectiveBuilder::new(config).build()
    }

    pub fn builder(config: CollectiveConfig) -> CollectiveBuilder {
        CollectiveBuilder::new(config)
    }

    pub fn instance_id(&self) -> &str {
        &self.inner.instance_id
    }

    pub fn config(&self) -> &CollectiveConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CollectiveEvent> {
        self.inner.events.subscribe()
    }

    // ---- registry ----------------------------------------------------

    /// Register an agent from its external description.
    pub async fn register_agent(&self, descriptor: AgentDescriptor) -> Result<AgentId> {
        let behavior = descriptor.behavior.build();
        let agent = descriptor.into_agent(self.inner.clock.now())?;
        self.register_agent_with(agent, behavior).await
    }

    /// Register an agent record driven by a custom behaviour.
    pub async fn register_agent_with(
        &self,
        agent: Agent,
        behavior: Arc<dyn AgentBehavior>,
    ) -> Result<AgentId> {
        if agent.id.trim().is_empty() {
            return Err(CollectiveError::InvalidDescriptor(
                "agent id must not be empty".to_string(),
            ));
        }
        let mut state = self.inner.state.lock().await;
        self.inner.register_locked(&mut state, agent, behavior)
    }

    /// Remove an agent from the registry, handing its work to others.
    pub async fn remove_agent(&self, agent_id: &str) -> bool {
        let mut state = self.inner.state.lock().await;
        let Some(agent) = state.agents.get_mut(agent_id) else {
            return false;
        };
        agent.status = AgentStatus::Dead;

        if !state.scheduler.assignments_of(agent_id).is_empty() {
            self.inner.redistribute(&mut state, agent_id);
        }
        state.agents.remove(agent_id);
        state.agent_order.retain(|id| id != agent_id);
        state.bus.detach(agent_id);

        info!(agent_id, "Agent left the collective");
        self.inner.events.publish(CollectiveEvent::AgentLeft {
            agent_id: agent_id.to_string(),
        });
        self.inner.pump(&mut state).await;
        true
    }

    /// Agents in registration order.
    pub async fn list_agents(&self) -> Vec<Agent> {
        let state = self.inner.state.lock().await;
        state.agents_in_order().cloned().collect()
    }

    pub async fn agent(&self, agent_id: &str) -> Option<Agent> {
        self.inner.state.lock().await.agents.get(agent_id).cloned()
    }

    /// Mark an agent as compromised. It stays registered until isolated.
    pub async fn corrupt_agent(&self, agent_id: &str, reason: &str) -> bool {
        let mut state = self.inner.state.lock().await;
        match state.agents.get_mut(agent_id) {
            Some(agent) if !agent.is_quarantined() => {
                agent.corrupt(reason);
                warn!(agent_id, reason, "Agent marked corrupted");
                true
            }
            _ => false,
        }
    }

    // ---- messaging ---------------------------------------------------

    /// Send a message; true if anyone received it.
    pub async fn send(&self, message: Message) -> Result<bool> {
        Ok(self.send_message(message).await?.delivered)
    }

    /// Send a message and report who received it.
    pub async fn send_message(&self, message: Message) -> Result<DeliveryReport> {
        if message.sender_id.trim().is_empty() {
            return Err(CollectiveError::InvalidMessage(
                "sender_id must not be empty".to_string(),
            ));
        }
        if matches!(&message.recipient_id, Some(r) if r.trim().is_empty()) {
            return Err(CollectiveError::InvalidMessage(
                "recipient_id must not be empty".to_string(),
            ));
        }
        let priority = message.priority;
        let message = message.with_priority(priority);

        let mut state = self.inner.state.lock().await;
        let report = self.inner.dispatch(&mut state, message, 0).await;
        self.inner.pump(&mut state).await;
        Ok(report)
    }

    /// The message log in send order.
    pub async fn messages(&self) -> Vec<Message> {
        self.inner.state.lock().await.bus.log().to_vec()
    }

    // ---- consensus ---------------------------------------------------

    /// Open a proposal and ask every active agent to vote.
    pub async fn propose(&self, request: ProposalRequest) -> Result<ProposalId> {
        if request.proposer_id.trim().is_empty() {
            return Err(CollectiveError::InvalidMessage(
                "proposer_id must not be empty".to_string(),
            ));
        }
        let mut state = self.inner.state.lock().await;
        let id = self.inner.propose_locked(&mut state, request);
        self.inner.pump(&mut state).await;
        Ok(id)
    }

    /// Cast a vote; false when the vote was not counted.
    pub async fn vote(&self, proposal_id: &str, agent_id: &str, vote: bool) -> bool {
        let mut state = self.inner.state.lock().await;
        let accepted = self.inner.vote_locked(&mut state, proposal_id, agent_id, vote);
        self.inner.pump(&mut state).await;
        accepted
    }

    /// A proposal with its status as of now.
    pub async fn proposal(&self, proposal_id: &str) -> Option<Proposal> {
        let now = self.inner.clock.now();
        let state = self.inner.state.lock().await;
        state.consensus.get(proposal_id).map(|p| p.observed_at(now))
    }

    /// All proposals with their status as of now, oldest first.
    pub async fn proposals(&self) -> Vec<Proposal> {
        let now = self.inner.clock.now();
        let state = self.inner.state.lock().await;
        state.consensus.proposals().map(|p| p.observed_at(now)).collect()
    }

    /// Status of a proposal as of now.
    pub async fn proposal_status(&self, proposal_id: &str) -> Result<ProposalStatus> {
        self.proposal(proposal_id)
            .await
            .map(|p| p.status)
            .ok_or_else(|| CollectiveError::ProposalNotFound(proposal_id.to_string()))
    }

    /// Wait until a proposal is decided or its deadline passes.
    ///
    /// Dropping the returned future cancels the wait.
    pub async fn await_decision(&self, proposal_id: &str) -> Result<ProposalStatus> {
        let (mut decisions, deadline) = {
            let state = self.inner.state.lock().await;
            let proposal = state
                .consensus
                .get(proposal_id)
                .ok_or_else(|| CollectiveError::ProposalNotFound(proposal_id.to_string()))?;
            let decisions = state
                .consensus
                .subscribe(proposal_id)
                .ok_or_else(|| CollectiveError::ProposalNotFound(proposal_id.to_string()))?;
            (decisions, proposal.deadline)
        };

        let remaining = (deadline - self.inner.clock.now())
            .to_std()
            .unwrap_or_default();

        let decision = async {
            loop {
                let status = *decisions.borrow_and_update();
                if status.is_terminal() {
                    return Some(status);
                }
                if decisions.changed().await.is_err() {
                    return None;
                }
            }
        };
        let decided = tokio::select! {
            biased;
            status = decision => status,
            _ = self.inner.clock.sleep(remaining) => None,
        };
        if let Some(status) = decided {
            return Ok(status);
        }

        let state = self.inner.state.lock().await;
        let status = state
            .consensus
            .get(proposal_id)
            .map(|p| p.status)
            .unwrap_or(ProposalStatus::Expired);
        Ok(if status.is_terminal() {
            status
        } else {
            ProposalStatus::Expired
        })
    }

    // ---- tasks -------------------------------------------------------

    /// Add a task and run a scheduling pass for it.
    pub async fn distribute(&self, spec: TaskSpec) -> Result<TaskId> {
        let mut state = self.inner.state.lock().await;
        let id = self.inner.distribute_locked(&mut state, spec)?;
        self.inner.pump(&mut state).await;
        Ok(id)
    }

    /// Let an agent join a task.
    pub async fn claim(&self, task_id: &str, agent_id: &str) -> bool {
        let mut state = self.inner.state.lock().await;
        self.inner.claim_locked(&mut state, task_id, agent_id)
    }

    /// Run a scheduling pass over every pending task. Returns the tasks that
    /// were assigned.
    pub async fn reschedule_pending(&self) -> Vec<TaskId> {
        let mut state = self.inner.state.lock().await;
        let assigned = state
            .scheduler
            .pending_ids()
            .into_iter()
            .filter(|id| self.inner.schedule_task(&mut state, id))
            .collect();
        self.inner.pump(&mut state).await;
        assigned
    }

    /// Finish a task and credit or debit its assignees.
    pub async fn complete_task(&self, task_id: &str, success: bool) -> bool {
        let now = self.inner.clock.now();
        let mut state = self.inner.state.lock().await;
        let Some(assignees) = state.scheduler.complete(task_id, success, now) else {
            return false;
        };

        for agent_id in &assignees {
            if let Some(agent) = state.agents.get_mut(agent_id) {
                agent.record_outcome(success, now);
            }
        }
        if success {
            state.metrics.tasks_completed += 1;
        }
        state.refresh_emergency();
        info!(task_id, success, "Task finished");
        true
    }

    /// Remove a task that is not running.
    pub async fn archive_task(&self, task_id: &str) -> Option<Task> {
        let mut state = self.inner.state.lock().await;
        let task = state.scheduler.archive(task_id)?;
        state.refresh_emergency();
        debug!(task_id, "Task archived");
        Some(task)
    }

    pub async fn task(&self, task_id: &str) -> Option<Task> {
        self.inner.state.lock().await.scheduler.get(task_id).cloned()
    }

    /// Tasks in creation order.
    pub async fn tasks(&self) -> Vec<Task> {
        self.inner.state.lock().await.scheduler.tasks().cloned().collect()
    }

    // ---- health ------------------------------------------------------

    /// Scan agents and open isolation votes for the ones that look unhealthy.
    pub async fn detect_corrupted(&self) -> Vec<AgentId> {
        let mut state = self.inner.state.lock().await;
        let flagged = self.inner.detect_locked(&mut state);
        self.inner.pump(&mut state).await;
        flagged
    }

    /// Isolate an agent immediately, without a vote.
    pub async fn isolate(&self, agent_id: &str, reason: &str) -> bool {
        let mut state = self.inner.state.lock().await;
        let isolated = self.inner.isolate_locked(&mut state, agent_id, reason);
        self.inner.pump(&mut state).await;
        isolated
    }

    pub async fn health(&self) -> HealthSummary {
        let state = self.inner.state.lock().await;
        let active_agents = state.active_count();
        let metrics = self.inner.metrics_locked(&state);
        let now = self.inner.clock.now();

        HealthSummary {
            instance_id: self.inner.instance_id.clone(),
            total_agents: state.agents.len(),
            active_agents,
            isolated_agents: state
                .agents
                .values()
                .filter(|a| a.status == AgentStatus::Isolated)
                .count(),
            corrupted_agents: state.agents.values().filter(|a| a.is_corrupted).count(),
            total_messages: state.bus.log().len(),
            pending_proposals: state.consensus.pending_count(now),
            pending_tasks: state
                .scheduler
                .tasks()
                .filter(|t| t.status == TaskStatus::Pending)
                .count(),
            in_progress_tasks: state
                .scheduler
                .tasks()
                .filter(|t| t.status == TaskStatus::InProgress)
                .count(),
            emergency_protocols_active: state.emergency_active,
            consciousness_cost: ConsciousnessCost::compute(
                metrics.total_tokens,
                active_agents,
                metrics.consensus_decisions,
            ),
            metrics,
        }
    }

    pub async fn metrics(&self) -> CollectiveMetrics {
        let state = self.inner.state.lock().await;
        self.inner.metrics_locked(&state)
    }

    pub async fn emergency_active(&self) -> bool {
        self.inner.state.lock().await.emergency_active
    }

    // ---- specialization ----------------------------------------------

    /// Create and register a specialist for `domain`.
    pub async fn create_specialist(&self, specialty: &str, domain: &str) -> Result<AgentId> {
        let domain = domain.trim();
        if domain.is_empty() {
            return Err(CollectiveError::InvalidDescriptor(
                "specialist domain must not be empty".to_string(),
            ));
        }
        let mut state = self.inner.state.lock().await;
        self.inner.spawn_specialist(&mut state, specialty, domain, false)
    }

    /// Ask the collective to plan around an open-ended objective and report
    /// what changed during the observation window.
    pub async fn process_vague_objective(&self, objective: &str) -> Result<EmergenceReport> {
        if objective.trim().is_empty() {
            return Err(CollectiveError::InvalidMessage(
                "objective must not be empty".to_string(),
            ));
        }

        let (agents_before, tasks_before, messages_before) = {
            let mut state = self.inner.state.lock().await;
            let before = (
                state.agents.len(),
                state.scheduler.len(),
                state.bus.log().len(),
            );
            let request = self
                .inner
                .collective_message(
                    None,
                    MessageBody::PlanningRequest {
                        objective: objective.to_string(),
                    },
                )
                .requiring_response();
            state.enqueue(request);
            self.inner.pump(&mut state).await;
            before
        };

        self.inner
            .clock
            .sleep(self.inner.config.emergence.observation_window())
            .await;

        let mut state = self.inner.state.lock().await;
        state.metrics.emergent_behaviors += 1;
        let report = EmergenceReport {
            objective: objective.to_string(),
            agents_before,
            agents_after: state.agents.len(),
            tasks_before,
            tasks_after: state.scheduler.len(),
            messages_before,
            messages_after: state.bus.log().len(),
            new_agents: state.agents.len() as i64 - agents_before as i64,
            new_tasks: state.scheduler.len() as i64 - tasks_before as i64,
            new_messages: state.bus.log().len() as i64 - messages_before as i64,
            emergent_behaviors: state.metrics.emergent_behaviors,
        };
        info!(
            new_agents = report.new_agents,
            new_tasks = report.new_tasks,
            "Objective processed"
        );
        Ok(report)
    }
}

impl Inner {
    fn collective_message(&self, recipient: Option<AgentId>, body: MessageBody) -> Message {
        let mut message = match recipient {
            Some(recipient) => Message::direct(COLLECTIVE_ID, recipient, body),
            None => Message::broadcast(COLLECTIVE_ID, body),
        };
        message.timestamp = self.clock.now();
        message
    }

    fn metrics_locked(&self, state: &CollectiveState) -> CollectiveMetrics {
        let mut metrics = state.metrics.clone();
        metrics.communication_efficiency =
            communication_efficiency(state.bus.log().len(), state.active_count());
        metrics.total_tokens = state.bus.total_tokens();
        metrics
    }

    fn register_locked(
        &self,
        state: &mut CollectiveState,
        agent: Agent,
        behavior: Arc<dyn AgentBehavior>,
    ) -> Result<AgentId> {
        if state.agents.contains_key(&agent.id) {
            return Err(CollectiveError::DuplicateAgent(agent.id));
        }

        let id = agent.id.clone();
        let role = agent.role;
        state.bus.attach(&id, behavior);
        state.agent_order.push(id.clone());
        state.agents.insert(id.clone(), agent);

        info!(agent_id = %id, role = %role, "Agent joined the collective");
        self.events.publish(CollectiveEvent::AgentJoined {
            agent_id: id.clone(),
            role,
        });
        Ok(id)
    }

    fn spawn_specialist(
        &self,
        state: &mut CollectiveState,
        specialty: &str,
        domain: &str,
        emergency: bool,
    ) -> Result<AgentId> {
        let agent = self
            .specialists
            .build(specialty, domain, emergency, self.clock.now());
        info!(domain, specialty, emergency, "Creating specialist");
        self.register_locked(state, agent, Arc::clone(&self.specialist_behavior))
    }

    // ---- delivery ----------------------------------------------------

    /// Drain the outbox breadth-first.
    async fn pump(&self, state: &mut CollectiveState) {
        while let Some(Outgoing { message, depth }) = state.outbox.pop_front() {
            self.dispatch(state, message, depth).await;
        }
        state.depth = 0;
    }

    /// Log one message and deliver or apply it. Replies are queued one
    /// generation deeper.
    async fn dispatch(
        &self,
        state: &mut CollectiveState,
        message: Message,
        depth: usize,
    ) -> DeliveryReport {
        state.depth = depth;
        state.bus.record(&message);

        let mut report = DeliveryReport {
            message_id: message.id.clone(),
            delivered: false,
            recipients: Vec::new(),
            responses: 0,
        };

        if message.body.is_directive() {
            report.delivered = self.apply_directive(state, &message.sender_id, message.body.clone());
            return report;
        }

        if state
            .agents
            .get(&message.sender_id)
            .is_some_and(|a| a.is_quarantined())
        {
            warn!(sender_id = %message.sender_id, "Quarantined sender, message not delivered");
            return report;
        }

        let recipients: Vec<Agent> = match &message.recipient_id {
            Some(recipient) => state
                .agents
                .get(recipient)
                .filter(|a| !a.is_quarantined())
                .cloned()
                .into_iter()
                .collect(),
            None => state
                .agents_in_order()
                .filter(|a| a.is_active() && a.id != message.sender_id)
                .cloned()
                .collect(),
        };

        let message = Arc::new(message);
        let delivery = state.bus.deliver(Arc::clone(&message), recipients).await;

        let now = self.clock.now();
        for agent_id in &delivery.delivered_to {
            if let Some(agent) = state.agents.get_mut(agent_id) {
                agent.last_seen = now;
            }
        }

        if message.is_broadcast() {
            self.events.publish(CollectiveEvent::MessageBroadcast {
                message_id: message.id.clone(),
                sender_id: message.sender_id.clone(),
                message_type: message.body.type_name().to_string(),
                recipients: delivery.delivered_to.len(),
            });
        }

        report.responses = delivery.responses.len();
        let next_depth = depth + 1;
        for (responder, body) in delivery.responses {
            if next_depth > state.bus.max_fanout_depth() {
                warn!(
                    message_id = %message.id,
                    responder = %responder,
                    depth = next_depth,
                    "Fan-out depth reached, response dropped"
                );
                continue;
            }
            let mut reply = Message::reply_to(&message, responder, body);
            reply.timestamp = now;
            state.outbox.push_back(Outgoing {
                message: reply,
                depth: next_depth,
            });
        }

        report.delivered = !delivery.delivered_to.is_empty();
        report.recipients = delivery.delivered_to;
        report
    }

    fn apply_directive(&self, state: &mut CollectiveState, sender_id: &str, body: MessageBody) -> bool {
        if !state.agents.get(sender_id).is_some_and(|a| a.is_active()) {
            debug!(sender_id, directive = body.type_name(), "Directive from inactive sender ignored");
            return false;
        }

        match body {
            MessageBody::Vote { proposal_id, vote } => {
                self.vote_locked(state, &proposal_id, sender_id, vote)
            }
            MessageBody::ClaimTask { task_id } => self.claim_locked(state, &task_id, sender_id),
            MessageBody::SubmitTask(spec) => match self.distribute_locked(state, spec) {
                Ok(_) => true,
                Err(e) => {
                    warn!(sender_id, error = %e, "Submitted task rejected");
                    false
                }
            },
            MessageBody::RequestSpecialist { specialty, domain } => {
                if domain.trim().is_empty() {
                    return false;
                }
                self.spawn_specialist(state, &specialty, domain.trim(), false)
                    .is_ok()
            }
            _ => false,
        }
    }

    // ---- consensus ---------------------------------------------------

    fn propose_locked(&self, state: &mut CollectiveState, request: ProposalRequest) -> ProposalId {
        let proposal = state.consensus.propose(request, self.clock.now());
        let body = MessageBody::ConsensusRequest(ConsensusRequest {
            proposal_id: proposal.id.clone(),
            proposer_id: proposal.proposer_id.clone(),
            proposal: proposal.kind.clone(),
            voting_threshold: proposal.voting_threshold,
            deadline: proposal.deadline,
        });
        let request = self.collective_message(None, body).requiring_response();
        state.enqueue(request);
        proposal.id
    }

    fn vote_locked(
        &self,
        state: &mut CollectiveState,
        proposal_id: &str,
        agent_id: &str,
        vote: bool,
    ) -> bool {
        let voter_active = state.agents.get(agent_id).is_some_and(|a| a.is_active());
        let active = state.active_count();
        let now = self.clock.now();

        match state
            .consensus
            .vote(proposal_id, agent_id, vote, voter_active, active, now)
        {
            VoteOutcome::Rejected(reason) => {
                debug!(proposal_id, agent_id, ?reason, "Vote rejected");
                false
            }
            VoteOutcome::Recorded { .. } => true,
            VoteOutcome::Decided(proposal) => {
                self.on_decision(state, proposal);
                true
            }
        }
    }

    fn on_decision(&self, state: &mut CollectiveState, proposal: Proposal) {
        state.metrics.consensus_decisions += 1;

        if proposal.status == ProposalStatus::Approved {
            self.execute_decision(state, &proposal);
        }

        let approval_rate = proposal.approval_rate.unwrap_or(0.0);
        let result = self.collective_message(
            None,
            MessageBody::ConsensusResult {
                proposal_id: proposal.id.clone(),
                status: proposal.status,
                approval_rate,
            },
        );
        state.enqueue(result);
        self.events.publish(CollectiveEvent::ConsensusUpdate {
            proposal_id: proposal.id,
            status: proposal.status,
            approval_rate,
        });
    }

    fn execute_decision(&self, state: &mut CollectiveState, proposal: &Proposal) {
        match &proposal.kind {
            ProposalKind::IsolateAgent { agent_id, reason } => {
                self.isolate_locked(state, agent_id, reason);
            }
            ProposalKind::CreateSpecialist { specialty, domain } => {
                if let Err(e) = self.spawn_specialist(state, specialty, domain, false) {
                    warn!(proposal_id = %proposal.id, error = %e, "Approved specialist not created");
                }
            }
            ProposalKind::General { title, .. } => {
                debug!(proposal_id = %proposal.id, title, "General proposal approved");
            }
        }
    }

    // ---- scheduling --------------------------------------------------

    fn distribute_locked(&self, state: &mut CollectiveState, spec: TaskSpec) -> Result<TaskId> {
        let task = spec.into_task(self.clock.now());
        let id = state.scheduler.insert(task)?;
        info!(task_id = %id, "Task submitted");
        self.schedule_task(state, &id);
        Ok(id)
    }

    /// One scheduling pass for a pending task. True when it was assigned.
    fn schedule_task(&self, state: &mut CollectiveState, task_id: &str) -> bool {
        let Some(task) = state.scheduler.get(task_id).cloned() else {
            return false;
        };
        if task.status != TaskStatus::Pending {
            return false;
        }

        match state.scheduler.plan(&task, state.agents_in_order()) {
            SchedulingPlan::Assign(candidates) => {
                state.scheduler.assign(task_id, &candidates);
                let priority = state.scheduler.config().assignment_priority;
                for candidate in &candidates {
                    let body = MessageBody::TaskAssignment(TaskAssignment {
                        task_id: task.id.clone(),
                        title: task.title.clone(),
                        requirements: task.requirements.clone(),
                        fit_score: candidate.fit_score,
                    });
                    let message = self
                        .collective_message(Some(candidate.agent_id.clone()), body)
                        .with_priority(priority);
                    state.enqueue(message);
                }
                info!(task_id, assignees = candidates.len(), "Task assigned");

                if state.scheduler.resolve_emergency(task_id) {
                    state.refresh_emergency();
                }
                true
            }
            SchedulingPlan::Emergency {
                unmet_requirement,
                domain,
            } => {
                self.emergency_protocol(state, &task, unmet_requirement, domain);
                false
            }
        }
    }

    fn emergency_protocol(
        &self,
        state: &mut CollectiveState,
        task: &Task,
        unmet_requirement: Option<String>,
        domain: Option<String>,
    ) {
        warn!(
            task_id = %task.id,
            unmet_requirement = ?unmet_requirement,
            "No agent qualifies, activating emergency protocol"
        );
        state.emergency_active = true;
        state.scheduler.mark_emergency(&task.id);

        let priority = state.scheduler.config().emergency_priority;
        let alert = self
            .collective_message(
                None,
                MessageBody::Emergency(EmergencyAlert {
                    task_id: task.id.clone(),
                    unmet_requirement: unmet_requirement.clone(),
                    domain: domain.clone(),
                }),
            )
            .with_priority(priority);
        state.enqueue(alert);

        let specialist_id = domain.as_deref().and_then(|domain| {
            if let Some(existing) = state.agents_in_order().find(|a| {
                a.role == AgentRole::Specialist && a.is_active() && a.specializations.contains(domain)
            }) {
                debug!(task_id = %task.id, specialist_id = %existing.id, "Specialist for domain already present");
                return None;
            }
            let specialty = unmet_requirement.as_deref().unwrap_or(domain);
            match self.spawn_specialist(state, specialty, domain, true) {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "Emergency specialist not created");
                    None
                }
            }
        });

        self.events.publish(CollectiveEvent::EmergencyProtocol {
            task_id: task.id.clone(),
            unmet_requirement,
            specialist_id,
        });
    }

    fn claim_locked(&self, state: &mut CollectiveState, task_id: &str, agent_id: &str) -> bool {
        let Some(agent) = state.agents.get(agent_id) else {
            return false;
        };
        if !state.scheduler.claim(task_id, agent) {
            debug!(task_id, agent_id, "Claim refused");
            return false;
        }
        if state.scheduler.resolve_emergency(task_id) {
            state.refresh_emergency();
        }
        debug!(task_id, agent_id, "Task claimed");
        true
    }

    // ---- health ------------------------------------------------------

    fn detect_locked(&self, state: &mut CollectiveState) -> Vec<AgentId> {
        let now = self.clock.now();
        let mut flagged = Vec::new();

        for agent_id in state.agent_order.clone() {
            let Some(agent) = state.agents.get_mut(&agent_id) else {
                continue;
            };
            let Some(reason) = self.health.assess(agent) else {
                continue;
            };

            warn!(agent_id = %agent_id, %reason, "Agent flagged by health scan");
            flagged.push(agent_id.clone());

            if state.consensus.has_pending_isolation(&agent_id, now) {
                continue;
            }
            self.propose_isolation(state, &agent_id, reason);
        }
        flagged
    }

    fn propose_isolation(&self, state: &mut CollectiveState, agent_id: &str, reason: FlagReason) {
        let consensus = &self.config.consensus;
        let deadline =
            self.clock.now() + ChronoDuration::seconds(consensus.isolation_deadline_secs as i64);
        let request = ProposalRequest::new(
            COLLECTIVE_ID,
            ProposalKind::IsolateAgent {
                agent_id: agent_id.to_string(),
                reason: reason.to_string(),
            },
        )
        .with_threshold(consensus.isolation_threshold)
        .with_deadline(deadline);
        self.propose_locked(state, request);
    }

    fn isolate_locked(&self, state: &mut CollectiveState, agent_id: &str, reason: &str) -> bool {
        let Some(agent) = state.agents.get_mut(agent_id) else {
            return false;
        };
        if agent.is_quarantined() {
            return false;
        }

        agent.isolate(reason);
        state.metrics.corrupted_agents_detected += 1;
        info!(agent_id, reason, "Agent isolated");

        self.redistribute(state, agent_id);
        true
    }

    /// Take `agent_id` off every task and reschedule what it left orphaned.
    fn redistribute(&self, state: &mut CollectiveState, agent_id: &str) {
        let orphaned = state.scheduler.release_agent(agent_id);
        state.metrics.self_healing_events += 1;
        info!(agent_id, orphaned = orphaned.len(), "Redistributing work");

        for task_id in orphaned {
            self.schedule_task(state, &task_id);
        }
    }
}
