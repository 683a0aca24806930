//! Common types used across the collective.

use hostname::get as get_hostname;
use uuid::{NoContext, Timestamp, Uuid};

/// Unique identifier for an agent in the registry.
pub type AgentId = String;

/// Unique identifier for a task.
pub type TaskId = String;

/// Unique identifier for a proposal.
pub type ProposalId = String;

/// Unique identifier for a message.
pub type MessageId = String;

/// Domain identifier for capabilities (e.g., "logistics", "tax").
pub type Domain = String;

/// Sender id used for messages originated by the orchestrator itself.
pub const COLLECTIVE_ID: &str = "collective";

/// Generate a unique id for an orchestrator instance.
pub fn generate_instance_id() -> String {
    let hostname = get_hostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());
    let uuid = Uuid::new_v7(Timestamp::now(NoContext));
    format!("{}-{}", hostname, uuid)
}

/// Generate a fresh random id.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Error types for collective operations.
///
/// Expected multi-agent conditions (voting on a closed proposal, claiming an
/// unknown task, isolating an unknown agent) are reported as `false` results
/// by the orchestrator, not through this type.
#[derive(Debug, thiserror::Error)]
pub enum CollectiveError {
    #[error("Agent already registered: {0}")]
    DuplicateAgent(AgentId),

    #[error("Agent not found: {0}")]
    AgentNotFound(AgentId),

    #[error("Task already exists: {0}")]
    DuplicateTask(TaskId),

    #[error("Invalid task: {0}")]
    InvalidTask(String),

    #[error("Proposal not found: {0}")]
    ProposalNotFound(ProposalId),

    #[error("Invalid agent descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Configuration error: {0}")]
    Config(#[from] collective_config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, CollectiveError>;
