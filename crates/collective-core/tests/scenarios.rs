use async_trait::async_trait;
use collective_config::CollectiveConfig;
use collective_core::{
    Agent, AgentBehavior, AgentRole, AgentStatus, Capability, Collective, CollectiveEvent,
    CooperativeBehavior, Clock, ManualClock, Message, MessageBody, PassiveBehavior, ProposalKind,
    ProposalRequest, ProposalStatus, TaskSpec, TaskStatus, COLLECTIVE_ID,
};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn collective() -> (Collective, ManualClock) {
    let clock = ManualClock::starting_now();
    let collective = Collective::builder(CollectiveConfig::default())
        .clock(Arc::new(clock.clone()))
        .instance_id("scenario")
        .build()
        .unwrap();
    (collective, clock)
}

fn agent(id: &str, role: AgentRole, capability: &str, proficiency: f64) -> Agent {
    Agent::new(id, role, chrono::Utc::now()).with_capability(Capability::new(capability, proficiency))
}

fn general(title: &str) -> ProposalKind {
    ProposalKind::General {
        title: title.to_string(),
        payload: Value::Null,
    }
}

/// Counts every message that reaches it.
#[derive(Default)]
struct Counting {
    received: AtomicUsize,
}

#[async_trait]
impl AgentBehavior for Counting {
    async fn on_text(&self, _agent: &Agent, _message: &Message, _text: &str) -> Option<MessageBody> {
        self.received.fetch_add(1, Ordering::SeqCst);
        None
    }
}

/// Answers every text message with another one.
struct Chatty;

#[async_trait]
impl AgentBehavior for Chatty {
    async fn on_text(&self, agent: &Agent, _message: &Message, _text: &str) -> Option<MessageBody> {
        Some(MessageBody::Text(format!("ack from {}", agent.id)))
    }
}

/// Turns a planning request into a task and a specialist request.
struct Planner;

#[async_trait]
impl AgentBehavior for Planner {
    async fn on_planning_request(
        &self,
        _agent: &Agent,
        _message: &Message,
        objective: &str,
    ) -> Option<MessageBody> {
        Some(MessageBody::SubmitTask(TaskSpec::new(
            objective,
            vec!["coordination".to_string()],
        )))
    }
}

struct SpecialistRequester;

#[async_trait]
impl AgentBehavior for SpecialistRequester {
    async fn on_planning_request(
        &self,
        _agent: &Agent,
        _message: &Message,
        _objective: &str,
    ) -> Option<MessageBody> {
        Some(MessageBody::RequestSpecialist {
            specialty: "compliance".to_string(),
            domain: "legal".to_string(),
        })
    }
}

async fn register_core_four(collective: &Collective) {
    for (id, role, capability) in [
        ("coordinator", AgentRole::Coordinator, "coordination"),
        ("analyst", AgentRole::Analyst, "data_analysis"),
        ("communicator", AgentRole::Communicator, "messaging"),
        ("monitor", AgentRole::Monitor, "monitoring"),
    ] {
        collective
            .register_agent_with(agent(id, role, capability, 0.9), Arc::new(PassiveBehavior))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_uncovered_requirement_triggers_emergency_specialist() {
    let (collective, _) = collective();
    register_core_four(&collective).await;
    let mut events = collective.subscribe();

    let task_id = collective
        .distribute(TaskSpec::new("Route trucks", vec!["logistics_optimization".into()]))
        .await
        .unwrap();

    assert!(collective.emergency_active().await);
    assert_eq!(collective.task(&task_id).await.unwrap().status, TaskStatus::Pending);

    let agents = collective.list_agents().await;
    assert_eq!(agents.len(), 5);
    let specialist = agents
        .iter()
        .find(|a| a.role == AgentRole::Specialist)
        .expect("specialist created");
    assert!(specialist
        .capabilities
        .iter()
        .any(|c| c.name.contains("logistics")));
    assert!((specialist.trust_score - 0.6).abs() < 1e-9);

    let emergencies: Vec<_> = collective
        .messages()
        .await
        .into_iter()
        .filter(|m| matches!(m.body, MessageBody::Emergency(_)))
        .collect();
    assert_eq!(emergencies.len(), 1);
    assert_eq!(emergencies[0].priority, 5);
    assert!(emergencies[0].is_broadcast());

    let mut names = Vec::new();
    while let Ok(event) = events.try_recv() {
        names.push(event.name());
    }
    assert!(names.contains(&"agent_joined"));
    assert!(names.contains(&"emergency_protocol"));

    // The specialist picks the task up on the next pass.
    let assigned = collective.reschedule_pending().await;
    assert_eq!(assigned, vec![task_id.clone()]);
    let task = collective.task(&task_id).await.unwrap();
    assert_eq!(task.assigned_agents, vec![specialist.id.clone()]);
    assert!(!collective.emergency_active().await);
}

#[tokio::test]
async fn test_repeated_passes_do_not_duplicate_specialists() {
    let (collective, _) = collective();
    let task_id = collective
        .distribute(TaskSpec::new(
            "Cross-domain audit",
            vec!["logistics_a".into(), "finance_b".into(), "legal_c".into()],
        ))
        .await
        .unwrap();

    let specialists = |agents: Vec<Agent>| {
        agents
            .into_iter()
            .filter(|a| a.role == AgentRole::Specialist)
            .map(|a| a.capabilities[0].name.clone())
            .collect::<Vec<_>>()
    };

    for _ in 0..6 {
        collective.reschedule_pending().await;
    }

    // One specialist per uncovered domain; once every requirement is covered
    // individually, further passes add nobody.
    let mut names = specialists(collective.list_agents().await);
    names.sort();
    assert_eq!(
        names,
        vec!["finance_analysis", "legal_analysis", "logistics_analysis"]
    );

    collective.reschedule_pending().await;
    assert_eq!(specialists(collective.list_agents().await).len(), 3);
    assert_eq!(collective.task(&task_id).await.unwrap().status, TaskStatus::Pending);
}

#[tokio::test]
async fn test_corrupted_agent_is_flagged_for_isolation() {
    let (collective, _) = collective();
    register_core_four(&collective).await;

    assert!(collective.corrupt_agent("analyst", "malicious").await);
    let flagged = collective.detect_corrupted().await;
    assert_eq!(flagged, vec!["analyst"]);

    let proposals = collective.proposals().await;
    assert_eq!(proposals.len(), 1);
    assert_eq!(proposals[0].voting_threshold, 0.6);
    assert_eq!(proposals[0].status, ProposalStatus::Pending);
    assert!(matches!(
        &proposals[0].kind,
        ProposalKind::IsolateAgent { agent_id, .. } if agent_id == "analyst"
    ));

    // Still flagged, but no second proposal while the first is open.
    assert_eq!(collective.detect_corrupted().await, vec!["analyst"]);
    assert_eq!(collective.proposals().await.len(), 1);
}

#[tokio::test]
async fn test_cooperative_agents_vote_corrupted_agent_out() {
    let (collective, _) = collective();
    for id in ["a", "b", "c", "d"] {
        collective
            .register_agent_with(
                agent(id, AgentRole::Auditor, "audit", 0.8),
                Arc::new(CooperativeBehavior),
            )
            .await
            .unwrap();
    }
    let task_id = collective
        .distribute(TaskSpec::new("Ledger review", vec!["audit".into()]))
        .await
        .unwrap();

    collective.corrupt_agent("a", "tampered ledger").await;
    assert_eq!(collective.detect_corrupted().await, vec!["a"]);

    let isolated = collective.agent("a").await.unwrap();
    assert_eq!(isolated.status, AgentStatus::Isolated);

    let proposal = &collective.proposals().await[0];
    assert_eq!(proposal.status, ProposalStatus::Approved);
    assert!(!proposal.votes.contains_key("a"));

    let metrics = collective.metrics().await;
    assert_eq!(metrics.consensus_decisions, 1);
    assert_eq!(metrics.corrupted_agents_detected, 1);
    assert_eq!(metrics.self_healing_events, 1);

    let task = collective.task(&task_id).await.unwrap();
    assert!(!task.assigned_agents.contains(&"a".to_string()));
    assert_eq!(task.status, TaskStatus::InProgress);
}

#[tokio::test]
async fn test_quorum_waits_for_enough_votes() {
    let (collective, _) = collective();
    register_core_four(&collective).await;

    let id = collective
        .propose(ProposalRequest::new("coordinator", general("Adopt plan")).with_threshold(0.51))
        .await
        .unwrap();

    assert!(collective.vote(&id, "coordinator", true).await);
    assert!(collective.vote(&id, "analyst", true).await);
    assert_eq!(
        collective.proposal_status(&id).await.unwrap(),
        ProposalStatus::Pending
    );

    assert!(collective.vote(&id, "communicator", true).await);
    let proposal = collective.proposal(&id).await.unwrap();
    assert_eq!(proposal.status, ProposalStatus::Approved);
    assert_eq!(proposal.approval_rate, Some(1.0));

    // Decided proposals take no more votes and are decided once.
    assert!(!collective.vote(&id, "monitor", false).await);
    assert_eq!(collective.metrics().await.consensus_decisions, 1);

    let results = collective
        .messages()
        .await
        .into_iter()
        .filter(|m| matches!(m.body, MessageBody::ConsensusResult { .. }))
        .count();
    assert_eq!(results, 1);
}

#[tokio::test]
async fn test_votes_from_inactive_agents_are_rejected() {
    let (collective, clock) = collective();
    register_core_four(&collective).await;
    collective.isolate("monitor", "manual").await;

    let id = collective
        .propose(ProposalRequest::new("coordinator", general("Adopt plan")))
        .await
        .unwrap();
    assert!(!collective.vote(&id, "monitor", true).await);
    assert!(!collective.vote(&id, "ghost", true).await);
    assert!(!collective.vote("missing", "analyst", true).await);

    clock.advance(chrono::Duration::seconds(301));
    assert!(!collective.vote(&id, "analyst", true).await);
    assert_eq!(
        collective.proposal_status(&id).await.unwrap(),
        ProposalStatus::Expired
    );
}

#[tokio::test]
async fn test_broadcast_skips_isolated_agents() {
    let (collective, _) = collective();
    let isolated = Arc::new(Counting::default());
    let active = Arc::new(Counting::default());

    collective
        .register_agent_with(agent("x", AgentRole::Coordinator, "coordination", 0.9), Arc::new(PassiveBehavior))
        .await
        .unwrap();
    for id in ["a", "b", "c"] {
        collective
            .register_agent_with(agent(id, AgentRole::Analyst, "analysis", 0.9), active.clone())
            .await
            .unwrap();
    }
    collective
        .register_agent_with(agent("q", AgentRole::Analyst, "analysis", 0.9), isolated.clone())
        .await
        .unwrap();
    assert!(collective.isolate("q", "quarantine").await);

    let report = collective
        .send_message(Message::broadcast("x", MessageBody::Text("status?".into())))
        .await
        .unwrap();

    assert!(report.delivered);
    assert_eq!(report.recipients, vec!["a", "b", "c"]);
    assert_eq!(active.received.load(Ordering::SeqCst), 3);
    assert_eq!(isolated.received.load(Ordering::SeqCst), 0);

    // Direct messages to a quarantined agent are not delivered either.
    let direct = Message::direct("x", "q", MessageBody::Text("hello".into()));
    assert!(!collective.send(direct).await.unwrap());
    assert_eq!(isolated.received.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_replies_stop_at_fanout_depth() {
    let (collective, _) = collective();
    for id in ["a", "b", "c"] {
        collective
            .register_agent_with(agent(id, AgentRole::Communicator, "messaging", 0.9), Arc::new(Chatty))
            .await
            .unwrap();
    }

    let report = collective
        .send_message(Message::broadcast("a", MessageBody::Text("hello".into())))
        .await
        .unwrap();
    assert_eq!(report.responses, 2);

    // The broadcast plus one reply from each recipient; replies to replies
    // are dropped.
    let log = collective.messages().await;
    assert_eq!(log.len(), 3);
    assert!(log[1..]
        .iter()
        .all(|m| m.recipient_id.as_deref() == Some("a") && m.correlation_id.as_deref() == Some(log[0].id.as_str())));

    let metrics = collective.metrics().await;
    let expected: u64 = log.iter().map(|m| m.serialized_size()).sum();
    assert_eq!(metrics.total_tokens, expected);
    assert!(metrics.communication_efficiency < 1.0);
}

#[tokio::test]
async fn test_isolation_is_idempotent() {
    let (collective, _) = collective();
    register_core_four(&collective).await;

    assert!(collective.isolate("analyst", "manual").await);
    let after_first = collective.metrics().await;

    assert!(!collective.isolate("analyst", "again").await);
    assert!(!collective.isolate("nobody", "manual").await);
    assert_eq!(collective.metrics().await, after_first);
    assert_eq!(after_first.corrupted_agents_detected, 1);
}

#[tokio::test]
async fn test_isolated_agent_work_moves_to_remaining_agents() {
    let (collective, _) = collective();
    collective
        .register_agent_with(agent("a", AgentRole::Analyst, "payroll", 0.9), Arc::new(PassiveBehavior))
        .await
        .unwrap();
    let task_id = collective
        .distribute(TaskSpec::new("Run payroll", vec!["payroll".into()]))
        .await
        .unwrap();
    assert_eq!(collective.task(&task_id).await.unwrap().assigned_agents, vec!["a"]);

    collective
        .register_agent_with(agent("b", AgentRole::Analyst, "payroll", 0.7), Arc::new(PassiveBehavior))
        .await
        .unwrap();
    assert!(collective.isolate("a", "manual").await);

    let task = collective.task(&task_id).await.unwrap();
    assert_eq!(task.assigned_agents, vec!["b"]);
    assert_eq!(task.status, TaskStatus::InProgress);
    for task in collective.tasks().await {
        assert!(!task.assigned_agents.contains(&"a".to_string()));
    }
}

#[tokio::test]
async fn test_departing_agent_work_is_rescheduled() {
    let (collective, _) = collective();
    collective
        .register_agent_with(agent("a", AgentRole::Analyst, "payroll", 0.9), Arc::new(PassiveBehavior))
        .await
        .unwrap();
    let task_id = collective
        .distribute(TaskSpec::new("Run payroll", vec!["payroll".into()]))
        .await
        .unwrap();

    assert!(collective.remove_agent("a").await);
    // Nobody left to take it: back to pending, emergency raised.
    let task = collective.task(&task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert!(task.assigned_agents.is_empty());
    assert!(collective.emergency_active().await);
}

#[tokio::test]
async fn test_completing_tasks_updates_metrics() {
    let (collective, _) = collective();
    collective
        .register_agent_with(agent("a", AgentRole::Analyst, "payroll", 0.9), Arc::new(PassiveBehavior))
        .await
        .unwrap();
    let ok = collective
        .distribute(TaskSpec::new("Run payroll", vec!["payroll".into()]))
        .await
        .unwrap();
    let failed = collective
        .distribute(TaskSpec::new("Rerun payroll", vec!["payroll".into()]))
        .await
        .unwrap();

    assert!(collective.complete_task(&ok, true).await);
    assert!(collective.complete_task(&failed, false).await);
    assert!(!collective.complete_task(&ok, true).await);
    assert!(!collective.complete_task("missing", true).await);

    assert_eq!(collective.metrics().await.tasks_completed, 1);
    assert_eq!(collective.task(&failed).await.unwrap().status, TaskStatus::Failed);
    let agent = collective.agent("a").await.unwrap();
    assert!((agent.metrics.success_rate - 0.9).abs() < 1e-9);
}

#[tokio::test]
async fn test_fit_scores_stay_in_unit_range() {
    let agent = Agent::new("a", AgentRole::Analyst, chrono::Utc::now())
        .with_capability(Capability::new("tax", 1.0))
        .with_capability(Capability::new("tax_calculation", 2.0))
        .with_capability(Capability::new("legal", -1.0).with_domains(vec!["law".into()]));

    for requirements in [
        vec![],
        vec!["tax"],
        vec!["tax", "tax_calculation", "law_review"],
        vec!["unknown"],
        vec!["", "tax"],
    ] {
        let spec = TaskSpec::new("t", requirements.iter().map(|r| r.to_string()).collect());
        let fit = agent.assess_fit(&spec.into_task(chrono::Utc::now()));
        assert!((0.0..=1.0).contains(&fit), "fit {} out of range", fit);
    }
}

#[tokio::test]
async fn test_vague_objective_reports_emergent_changes() {
    let (collective, clock) = collective();
    collective
        .register_agent_with(agent("planner", AgentRole::Coordinator, "coordination", 0.9), Arc::new(Planner))
        .await
        .unwrap();
    collective
        .register_agent_with(
            agent("legislator", AgentRole::Legislator, "policy", 0.9),
            Arc::new(SpecialistRequester),
        )
        .await
        .unwrap();

    let start = clock.now();
    let report = collective
        .process_vague_objective("Improve compliance")
        .await
        .unwrap();

    assert_eq!(report.new_tasks, 1);
    assert_eq!(report.new_agents, 1);
    assert!(report.new_messages >= 3);
    assert_eq!(report.emergent_behaviors, 1);
    assert!(clock.now() - start >= chrono::Duration::seconds(2));

    let tasks = collective.tasks().await;
    assert_eq!(tasks[0].title, "Improve compliance");
    assert_eq!(tasks[0].assigned_agents, vec!["planner"]);
    assert!(collective
        .list_agents()
        .await
        .iter()
        .any(|a| a.specializations.contains("legal")));
}

#[tokio::test]
async fn test_approved_specialist_proposal_creates_agent() {
    let (collective, _) = collective();
    for id in ["a", "b", "c"] {
        collective
            .register_agent_with(agent(id, AgentRole::Analyst, "analysis", 0.9), Arc::new(CooperativeBehavior))
            .await
            .unwrap();
    }
    let mut events = collective.subscribe();

    let id = collective
        .propose(ProposalRequest::new(
            "a",
            ProposalKind::CreateSpecialist {
                specialty: "freight".into(),
                domain: "logistics".into(),
            },
        ))
        .await
        .unwrap();

    assert_eq!(
        collective.await_decision(&id).await.unwrap(),
        ProposalStatus::Approved
    );
    let specialist = collective
        .list_agents()
        .await
        .into_iter()
        .find(|a| a.role == AgentRole::Specialist)
        .expect("specialist created");
    assert!((specialist.trust_score - 0.7).abs() < 1e-9);

    let mut saw_update = false;
    while let Ok(event) = events.try_recv() {
        if let CollectiveEvent::ConsensusUpdate { status, .. } = event {
            assert_eq!(status, ProposalStatus::Approved);
            saw_update = true;
        }
    }
    assert!(saw_update);
}

#[tokio::test]
async fn test_directives_from_unknown_senders_are_ignored() {
    let (collective, _) = collective();
    register_core_four(&collective).await;

    let claim = Message::direct(
        "ghost",
        COLLECTIVE_ID,
        MessageBody::SubmitTask(TaskSpec::new("sneaky", vec![])),
    );
    assert!(!collective.send(claim).await.unwrap());
    assert!(collective.tasks().await.is_empty());
}
