//! Multi-agent collective orchestration.
//!
//! This crate implements a collective of autonomous agents that work on
//! shared goals:
//!
//! - **Registry**: Agents join with a role, capabilities and trust
//! - **Message Bus**: Direct and broadcast delivery through per-agent mailboxes
//! - **Consensus**: Quorum voting on proposals, with approved decisions executed
//! - **Scheduling**: Tasks are matched to the agents whose capabilities fit best
//! - **Self-Healing**: Unhealthy agents are voted out and their work reassigned
//! - **Specialization**: Specialists are created on demand for uncovered domains
//!
//! # Usage
//!
//! ```ignore
//! use collective_core::{AgentDescriptor, AgentRole, Capability, Collective, TaskSpec};
//! use collective_config::CollectiveConfig;
//!
//! let collective = Collective::new(CollectiveConfig::default())?;
//!
//! collective
//!     .register_agent(
//!         AgentDescriptor::new(AgentRole::Analyst)
//!             .with_capability(Capability::new("tax_calculation", 0.9)),
//!     )
//!     .await?;
//!
//! let task_id = collective
//!     .distribute(TaskSpec::new("Quarterly returns", vec!["tax_calculation".into()]))
//!     .await?;
//! ```

pub mod agent;
pub mod bus;
pub mod capability;
pub mod clock;
pub mod consensus;
pub mod events;
pub mod health;
pub mod message;
pub mod orchestrator;
pub mod scheduler;
pub mod specialization;
pub mod types;

// Re-export main types for convenience
pub use agent::{
    Agent, AgentBehavior, AgentDescriptor, AgentRole, AgentStatus, BehaviorKind,
    CooperativeBehavior, PassiveBehavior, PerformanceMetrics,
};
pub use capability::Capability;
pub use clock::{Clock, ManualClock, SystemClock};
pub use consensus::{Proposal, ProposalKind, ProposalRequest, ProposalStatus};
pub use events::CollectiveEvent;
pub use health::{CollectiveMetrics, ConsciousnessCost, FlagReason, HealthSummary};
pub use message::{ConsensusRequest, EmergencyAlert, Message, MessageBody, TaskAssignment};
pub use orchestrator::{Collective, CollectiveBuilder, DeliveryReport};
pub use scheduler::{Task, TaskSpec, TaskStatus};
pub use specialization::{DomainTrainer, EmergenceReport, HeuristicTrainer, TrainingOutcome};
pub use types::{AgentId, CollectiveError, ProposalId, Result, TaskId, COLLECTIVE_ID};
