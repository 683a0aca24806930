//! Collective decision-making through quorum voting.
//!
//! A proposal is open while `pending`. Every accepted vote re-checks quorum:
//! once the number of votes cast reaches `ceil(active_agents * threshold)`
//! the proposal is decided, approved when the share of yes votes among the
//! votes cast meets the threshold. Expiry is never stored; a pending proposal
//! reads as `expired` from its deadline on.

use crate::types::{new_id, AgentId, Domain, ProposalId};
use chrono::{DateTime, Duration, Utc};
use collective_config::ConsensusConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::watch;

/// Tolerance for floating-point threshold comparisons.
const EPSILON: f64 = 1e-9;

/// What a proposal asks the collective to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum ProposalKind {
    /// Quarantine an agent
    IsolateAgent { agent_id: AgentId, reason: String },
    /// Spawn a specialist for a domain
    CreateSpecialist { specialty: String, domain: Domain },
    /// Anything else; approval only produces a notification
    General {
        title: String,
        #[serde(default)]
        payload: Value,
    },
}

/// Status of a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl ProposalStatus {
    pub fn is_terminal(&self) -> bool {
        *self != ProposalStatus::Pending
    }
}

/// A proposal submitted by an agent or by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalRequest {
    pub proposer_id: AgentId,

    #[serde(flatten)]
    pub kind: ProposalKind,

    /// Clamped into [0.5, 1.0]; the configured default when absent
    #[serde(default)]
    pub voting_threshold: Option<f64>,

    /// The configured voting window from now when absent
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
}

impl ProposalRequest {
    pub fn new(proposer_id: impl Into<AgentId>, kind: ProposalKind) -> Self {
        Self {
            proposer_id: proposer_id.into(),
            kind,
            voting_threshold: None,
            deadline: None,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.voting_threshold = Some(threshold);
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// A proposal under vote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: ProposalId,
    pub proposer_id: AgentId,
    #[serde(flatten)]
    pub kind: ProposalKind,
    pub voting_threshold: f64,
    pub deadline: DateTime<Utc>,
    pub votes: HashMap<AgentId, bool>,
    pub status: ProposalStatus,
    /// Share of yes votes among votes cast, set when decided
    pub approval_rate: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl Proposal {
    /// Status as observed at `now`.
    pub fn status_at(&self, now: DateTime<Utc>) -> ProposalStatus {
        if self.status == ProposalStatus::Pending && now >= self.deadline {
            ProposalStatus::Expired
        } else {
            self.status
        }
    }

    /// Copy with the status resolved at `now`.
    pub fn observed_at(&self, now: DateTime<Utc>) -> Proposal {
        let mut view = self.clone();
        view.status = self.status_at(now);
        view
    }

    pub fn votes_cast(&self) -> usize {
        self.votes.len()
    }

    pub fn yes_votes(&self) -> usize {
        self.votes.values().filter(|v| **v).count()
    }
}

/// Why a vote was not counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteRejection {
    UnknownProposal,
    NotPending,
    Expired,
    InactiveVoter,
}

/// Result of casting a vote.
#[derive(Debug, Clone, PartialEq)]
pub enum VoteOutcome {
    Rejected(VoteRejection),
    /// Counted; quorum not reached yet
    Recorded { votes_cast: usize, required: usize },
    /// Counted and the proposal reached a decision
    Decided(Proposal),
}

impl VoteOutcome {
    pub fn accepted(&self) -> bool {
        !matches!(self, VoteOutcome::Rejected(_))
    }
}

/// Votes needed for quorum among `active_agents`.
pub fn required_votes(active_agents: usize, threshold: f64) -> usize {
    ((active_agents as f64 * threshold) - EPSILON).ceil().max(0.0) as usize
}

/// Proposal table and vote counting.
#[derive(Debug)]
pub struct ConsensusEngine {
    proposals: HashMap<ProposalId, Proposal>,
    order: Vec<ProposalId>,
    watchers: HashMap<ProposalId, watch::Sender<ProposalStatus>>,
    config: ConsensusConfig,
}

impl ConsensusEngine {
    pub fn new(config: ConsensusConfig) -> Self {
        Self {
            proposals: HashMap::new(),
            order: Vec::new(),
            watchers: HashMap::new(),
            config,
        }
    }

    /// Open a proposal and return a snapshot of it.
    pub fn propose(&mut self, request: ProposalRequest, now: DateTime<Utc>) -> Proposal {
        let threshold = request
            .voting_threshold
            .filter(|t| !t.is_nan())
            .unwrap_or(self.config.default_threshold)
            .clamp(0.5, 1.0);
        let deadline = request.deadline.unwrap_or_else(|| {
            now + Duration::seconds(self.config.default_voting_window_secs as i64)
        });

        let proposal = Proposal {
            id: new_id(),
            proposer_id: request.proposer_id,
            kind: request.kind,
            voting_threshold: threshold,
            deadline,
            votes: HashMap::new(),
            status: ProposalStatus::Pending,
            approval_rate: None,
            created_at: now,
            decided_at: None,
        };

        let (sender, _) = watch::channel(ProposalStatus::Pending);
        self.watchers.insert(proposal.id.clone(), sender);
        self.order.push(proposal.id.clone());
        self.proposals.insert(proposal.id.clone(), proposal.clone());

        tracing::info!(
            proposal_id = %proposal.id,
            proposer_id = %proposal.proposer_id,
            threshold = proposal.voting_threshold,
            "Proposal opened"
        );
        proposal
    }

    /// Record a vote and decide the proposal once quorum is reached.
    pub fn vote(
        &mut self,
        proposal_id: &str,
        agent_id: &str,
        vote: bool,
        voter_active: bool,
        active_agents: usize,
        now: DateTime<Utc>,
    ) -> VoteOutcome {
        let Some(proposal) = self.proposals.get_mut(proposal_id) else {
            return VoteOutcome::Rejected(VoteRejection::UnknownProposal);
        };
        if proposal.status != ProposalStatus::Pending {
            return VoteOutcome::Rejected(VoteRejection::NotPending);
        }
        if now >= proposal.deadline {
            return VoteOutcome::Rejected(VoteRejection::Expired);
        }
        if !voter_active {
            return VoteOutcome::Rejected(VoteRejection::InactiveVoter);
        }

        proposal.votes.insert(agent_id.to_string(), vote);
        tracing::debug!(proposal_id, agent_id, vote, "Vote recorded");

        let required = required_votes(active_agents, proposal.voting_threshold);
        let votes_cast = proposal.votes_cast();
        if active_agents == 0 || votes_cast < required {
            return VoteOutcome::Recorded {
                votes_cast,
                required,
            };
        }

        let approval_rate = proposal.yes_votes() as f64 / votes_cast as f64;
        proposal.approval_rate = Some(approval_rate);
        proposal.decided_at = Some(now);
        proposal.status = if approval_rate + EPSILON >= proposal.voting_threshold {
            ProposalStatus::Approved
        } else {
            ProposalStatus::Rejected
        };

        tracing::info!(
            proposal_id,
            status = ?proposal.status,
            approval_rate,
            votes_cast,
            "Proposal decided"
        );

        if let Some(watcher) = self.watchers.get(proposal_id) {
            watcher.send_replace(proposal.status);
        }
        VoteOutcome::Decided(proposal.clone())
    }

    pub fn get(&self, proposal_id: &str) -> Option<&Proposal> {
        self.proposals.get(proposal_id)
    }

    /// Proposals in creation order.
    pub fn proposals(&self) -> impl Iterator<Item = &Proposal> {
        self.order.iter().filter_map(|id| self.proposals.get(id))
    }

    /// Watch a proposal's stored status; `None` for unknown proposals.
    pub fn subscribe(&self, proposal_id: &str) -> Option<watch::Receiver<ProposalStatus>> {
        self.watchers.get(proposal_id).map(|sender| sender.subscribe())
    }

    /// Whether an isolation vote for `agent_id` is still open at `now`.
    pub fn has_pending_isolation(&self, agent_id: &str, now: DateTime<Utc>) -> bool {
        self.proposals.values().any(|p| {
            p.status_at(now) == ProposalStatus::Pending
                && matches!(&p.kind, ProposalKind::IsolateAgent { agent_id: target, .. } if target == agent_id)
        })
    }

    pub fn pending_count(&self, now: DateTime<Utc>) -> usize {
        self.proposals
            .values()
            .filter(|p| p.status_at(now) == ProposalStatus::Pending)
            .count()
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }
}
