//! Agent health checks and collective metrics.

use crate::agent::Agent;
use collective_config::HealthConfig;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why an agent was flagged by a health scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagReason {
    Corrupted,
    LowTrust,
    LowSuccessRate,
}

impl fmt::Display for FlagReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlagReason::Corrupted => f.write_str("agent reported corrupted"),
            FlagReason::LowTrust => f.write_str("trust score below floor"),
            FlagReason::LowSuccessRate => f.write_str("success rate below floor"),
        }
    }
}

/// Detects agents that should be voted out.
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    config: HealthConfig,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        Self { config }
    }

    /// Check one agent. Isolated and dead agents are skipped.
    ///
    /// A success rate under the floor decays trust before the checks run,
    /// so repeated scans push a failing agent toward the trust floor.
    pub fn assess(&self, agent: &mut Agent) -> Option<FlagReason> {
        if agent.is_quarantined() {
            return None;
        }

        let failing = agent.metrics.success_rate < self.config.success_floor;
        if failing {
            agent.decay_trust(self.config.trust_decay);
        }

        if agent.is_corrupted {
            Some(FlagReason::Corrupted)
        } else if agent.trust_score < self.config.trust_floor {
            Some(FlagReason::LowTrust)
        } else if failing {
            Some(FlagReason::LowSuccessRate)
        } else {
            None
        }
    }
}

/// Aggregate counters of the collective.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectiveMetrics {
    pub tasks_completed: u64,
    pub consensus_decisions: u64,
    pub corrupted_agents_detected: u64,
    pub self_healing_events: u64,
    pub emergent_behaviors: u64,
    pub communication_efficiency: f64,
    pub total_tokens: u64,
}

/// `1 / (1 + 0.1 * messages per active agent)`.
pub fn communication_efficiency(messages: usize, active_agents: usize) -> f64 {
    let average = messages as f64 / active_agents.max(1) as f64;
    1.0 / (1.0 + 0.1 * average)
}

/// Token spend of the collective.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsciousnessCost {
    pub total_tokens: u64,
    pub tokens_per_active_agent: f64,
    pub tokens_per_decision: f64,
}

impl ConsciousnessCost {
    pub fn compute(total_tokens: u64, active_agents: usize, decisions: u64) -> Self {
        Self {
            total_tokens,
            tokens_per_active_agent: total_tokens as f64 / active_agents.max(1) as f64,
            tokens_per_decision: total_tokens as f64 / decisions.max(1) as f64,
        }
    }
}

/// Snapshot returned by `swarm/health`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSummary {
    pub instance_id: String,
    pub total_agents: usize,
    pub active_agents: usize,
    pub isolated_agents: usize,
    pub corrupted_agents: usize,
    pub total_messages: usize,
    pub pending_proposals: usize,
    pub pending_tasks: usize,
    pub in_progress_tasks: usize,
    pub emergency_protocols_active: bool,
    pub metrics: CollectiveMetrics,
    pub consciousness_cost: ConsciousnessCost,
}
