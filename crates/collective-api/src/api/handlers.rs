/// RPC method dispatch
use crate::api::protocol::{RpcError, RpcRequest, RpcResponse};
use collective_core::{
    AgentDescriptor, Collective, CollectiveError, Message, ProposalRequest, TaskSpec,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Method names understood by [`RpcHandler`].
pub mod methods {
    pub const REGISTER_AGENT: &str = "swarm/agent/register";
    pub const LIST_AGENTS: &str = "swarm/agents/list";
    pub const SEND_MESSAGE: &str = "swarm/message/send";
    pub const PROPOSE: &str = "swarm/consensus/propose";
    pub const VOTE: &str = "swarm/consensus/vote";
    pub const DISTRIBUTE_TASK: &str = "swarm/task/distribute";
    pub const CLAIM_TASK: &str = "swarm/task/claim";
    pub const RESCHEDULE_TASKS: &str = "swarm/task/reschedule";
    pub const ISOLATE_AGENT: &str = "swarm/agent/isolate";
    pub const HEALTH: &str = "swarm/health";
    pub const REMOVE_AGENT: &str = "swarm/agent/remove";
    pub const PROPOSAL_STATUS: &str = "swarm/consensus/status";
    pub const COMPLETE_TASK: &str = "swarm/task/complete";
    pub const HEALTH_SCAN: &str = "swarm/health/scan";
    pub const CREATE_SPECIALIST: &str = "swarm/specialist/create";
    pub const OBJECTIVE: &str = "swarm/objective";
}

#[derive(Debug, thiserror::Error)]
enum MethodError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidParams(serde_json::Error),

    #[error(transparent)]
    Collective(#[from] CollectiveError),
}

impl From<MethodError> for RpcError {
    fn from(err: MethodError) -> Self {
        match err {
            MethodError::NotFound(method) => RpcError::method_not_found(&method),
            MethodError::InvalidParams(e) => RpcError::invalid_params(e.to_string()),
            MethodError::Collective(
                e @ (CollectiveError::InvalidDescriptor(_)
                | CollectiveError::InvalidTask(_)
                | CollectiveError::InvalidMessage(_)),
            ) => RpcError::invalid_params(e.to_string()),
            MethodError::Collective(e) => RpcError::internal(e.to_string()),
        }
    }
}

type MethodResult = std::result::Result<Value, MethodError>;

#[derive(Debug, Deserialize)]
struct VoteParams {
    proposal_id: String,
    agent_id: String,
    vote: bool,
}

#[derive(Debug, Deserialize)]
struct ClaimParams {
    task_id: String,
    agent_id: String,
}

#[derive(Debug, Deserialize)]
struct IsolateParams {
    agent_id: String,
    reason: String,
}

#[derive(Debug, Deserialize)]
struct AgentParams {
    agent_id: String,
}

#[derive(Debug, Deserialize)]
struct ProposalParams {
    proposal_id: String,
}

#[derive(Debug, Deserialize)]
struct CompleteParams {
    task_id: String,
    #[serde(default = "default_success")]
    success: bool,
}

fn default_success() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct SpecialistParams {
    specialty: String,
    domain: String,
}

#[derive(Debug, Deserialize)]
struct ObjectiveParams {
    objective: String,
}

fn params<T: DeserializeOwned>(params: Value) -> std::result::Result<T, MethodError> {
    serde_json::from_value(params).map_err(MethodError::InvalidParams)
}

fn to_json<T: Serialize>(value: &T) -> MethodResult {
    serde_json::to_value(value).map_err(|e| MethodError::Collective(e.into()))
}

/// Translates RPC calls into collective operations.
#[derive(Clone)]
pub struct RpcHandler {
    collective: Collective,
}

impl RpcHandler {
    pub fn new(collective: Collective) -> Self {
        Self { collective }
    }

    pub fn collective(&self) -> &Collective {
        &self.collective
    }

    /// Handle a raw request body.
    ///
    /// Bodies that are not JSON objects fail with `PARSE_ERROR`; objects
    /// without a string `method` fail with `INVALID_REQUEST`.
    pub async fn handle_raw(&self, body: &str) -> RpcResponse {
        let value: Value = match serde_json::from_str(body) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(error = %e, "Rejecting malformed request");
                return RpcResponse::failure(None, None, RpcError::parse_error(e.to_string()));
            }
        };

        let Some(object) = value.as_object() else {
            return RpcResponse::failure(
                None,
                None,
                RpcError::parse_error("request must be a JSON object"),
            );
        };

        let id = object.get("id").cloned().filter(|id| !id.is_null());
        let jsonrpc = object
            .get("jsonrpc")
            .and_then(Value::as_str)
            .map(str::to_string);

        if !object.get("method").is_some_and(Value::is_string) {
            return RpcResponse::failure(
                jsonrpc,
                id,
                RpcError::invalid_request("missing method"),
            );
        }

        match serde_json::from_value::<RpcRequest>(value) {
            Ok(request) => self.handle(request).await,
            Err(e) => RpcResponse::failure(jsonrpc, id, RpcError::parse_error(e.to_string())),
        }
    }

    /// Handle a parsed request.
    pub async fn handle(&self, request: RpcRequest) -> RpcResponse {
        tracing::debug!(method = %request.method, "Dispatching RPC call");

        match self.dispatch(&request.method, request.params.clone()).await {
            Ok(result) => RpcResponse::success(&request, result),
            Err(err) => {
                let error = RpcError::from(err);
                tracing::warn!(
                    method = %request.method,
                    code = error.code,
                    "RPC call failed: {}",
                    error.message
                );
                RpcResponse::failure(request.jsonrpc, request.id, error)
            }
        }
    }

    async fn dispatch(&self, method: &str, raw: Value) -> MethodResult {
        let collective = &self.collective;

        match method {
            methods::REGISTER_AGENT => {
                let descriptor: AgentDescriptor = params(raw)?;
                let agent_id = collective.register_agent(descriptor).await?;
                Ok(json!({ "success": true, "agent_id": agent_id }))
            }
            methods::LIST_AGENTS => {
                let agents = collective.list_agents().await;
                Ok(json!({ "agents": to_json(&agents)? }))
            }
            methods::SEND_MESSAGE => {
                let message: Message = params(raw)?;
                let delivered = collective.send(message).await?;
                Ok(json!({ "delivered": delivered }))
            }
            methods::PROPOSE => {
                let request: ProposalRequest = params(raw)?;
                let proposal_id = collective.propose(request).await?;
                Ok(json!({ "proposal_id": proposal_id, "status": "proposed" }))
            }
            methods::VOTE => {
                let p: VoteParams = params(raw)?;
                let voted = collective.vote(&p.proposal_id, &p.agent_id, p.vote).await;
                Ok(json!({ "voted": voted }))
            }
            methods::DISTRIBUTE_TASK => {
                let spec: TaskSpec = params(raw)?;
                let task_id = collective.distribute(spec).await?;
                Ok(json!({ "task_id": task_id, "status": "distributed" }))
            }
            methods::CLAIM_TASK => {
                let p: ClaimParams = params(raw)?;
                let claimed = collective.claim(&p.task_id, &p.agent_id).await;
                Ok(json!({ "claimed": claimed }))
            }
            methods::RESCHEDULE_TASKS => {
                let assigned = collective.reschedule_pending().await;
                Ok(json!({ "assigned": assigned }))
            }
            methods::ISOLATE_AGENT => {
                let p: IsolateParams = params(raw)?;
                let isolated = collective.isolate(&p.agent_id, &p.reason).await;
                Ok(json!({ "isolated": isolated }))
            }
            methods::HEALTH => to_json(&collective.health().await),
            methods::REMOVE_AGENT => {
                let p: AgentParams = params(raw)?;
                let removed = collective.remove_agent(&p.agent_id).await;
                Ok(json!({ "removed": removed }))
            }
            methods::PROPOSAL_STATUS => {
                let p: ProposalParams = params(raw)?;
                let proposal = collective.proposal(&p.proposal_id).await;
                Ok(json!({ "proposal": to_json(&proposal)? }))
            }
            methods::COMPLETE_TASK => {
                let p: CompleteParams = params(raw)?;
                let completed = collective.complete_task(&p.task_id, p.success).await;
                Ok(json!({ "completed": completed }))
            }
            methods::HEALTH_SCAN => {
                let flagged = collective.detect_corrupted().await;
                Ok(json!({ "flagged": flagged }))
            }
            methods::CREATE_SPECIALIST => {
                let p: SpecialistParams = params(raw)?;
                let agent_id = collective.create_specialist(&p.specialty, &p.domain).await?;
                Ok(json!({ "agent_id": agent_id }))
            }
            methods::OBJECTIVE => {
                let p: ObjectiveParams = params(raw)?;
                let report = collective.process_vague_objective(&p.objective).await?;
                to_json(&report)
            }
            other => Err(MethodError::NotFound(other.to_string())),
        }
    }
}
