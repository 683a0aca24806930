//! Dynamic specialist creation.
//!
//! Specialists are synthesized on demand for a domain nobody covers. Their
//! starting proficiency and trust come from a [`DomainTrainer`]; the default
//! trainer returns fixed, configured values.

use crate::agent::{Agent, AgentRole};
use crate::capability::{clamp_unit, Capability};
use crate::types::new_id;
use chrono::{DateTime, Utc};
use collective_config::SpecialistConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Result of training a specialist for a domain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingOutcome {
    pub accuracy: f64,
    pub trust_score: f64,
    pub learning_rate: f64,
}

/// Seeds new specialists for a domain.
pub trait DomainTrainer: Send + Sync {
    fn train(&self, domain: &str, specialization_type: &str) -> TrainingOutcome;
}

/// Returns the configured seed values for every domain.
#[derive(Debug, Clone)]
pub struct HeuristicTrainer {
    outcome: TrainingOutcome,
}

impl HeuristicTrainer {
    pub fn new(config: &SpecialistConfig) -> Self {
        Self {
            outcome: TrainingOutcome {
                accuracy: config.proficiency,
                trust_score: config.trust,
                learning_rate: config.learning_rate,
            },
        }
    }
}

impl Default for HeuristicTrainer {
    fn default() -> Self {
        Self::new(&SpecialistConfig::default())
    }
}

impl DomainTrainer for HeuristicTrainer {
    fn train(&self, domain: &str, specialization_type: &str) -> TrainingOutcome {
        tracing::debug!(domain, specialization_type, "Training specialist");
        self.outcome
    }
}

/// Builds specialist agents.
#[derive(Clone)]
pub struct SpecialistFactory {
    trainer: Arc<dyn DomainTrainer>,
    emergency_trust_penalty: f64,
}

impl SpecialistFactory {
    pub fn new(trainer: Arc<dyn DomainTrainer>, config: &SpecialistConfig) -> Self {
        Self {
            trainer,
            emergency_trust_penalty: config.emergency_trust_penalty,
        }
    }

    /// Create an unregistered specialist for `domain`.
    ///
    /// Specialists raised by the emergency protocol start with less trust.
    pub fn build(&self, specialty: &str, domain: &str, emergency: bool, now: DateTime<Utc>) -> Agent {
        let outcome = self.trainer.train(domain, specialty);
        let trust = if emergency {
            outcome.trust_score - self.emergency_trust_penalty
        } else {
            outcome.trust_score
        };

        let id = format!("specialist-{}-{}", domain, &new_id()[..8]);
        let capability = Capability::new(format!("{}_analysis", domain), outcome.accuracy)
            .with_domains(vec![domain.to_string()]);

        let mut agent = Agent::new(id, AgentRole::Specialist, now)
            .with_capability(capability)
            .with_specialization(specialty)
            .with_specialization(domain)
            .with_trust(trust);
        agent.metrics.learning_rate = clamp_unit(outcome.learning_rate);
        agent
    }
}

impl std::fmt::Debug for SpecialistFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpecialistFactory")
            .field("emergency_trust_penalty", &self.emergency_trust_penalty)
            .finish_non_exhaustive()
    }
}

/// What changed while the collective worked on a vague objective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergenceReport {
    pub objective: String,
    pub agents_before: usize,
    pub agents_after: usize,
    pub tasks_before: usize,
    pub tasks_after: usize,
    pub messages_before: usize,
    pub messages_after: usize,
    pub new_agents: i64,
    pub new_tasks: i64,
    pub new_messages: i64,
    pub emergent_behaviors: u64,
}
