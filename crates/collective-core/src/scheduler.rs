//! Capability-based task scheduling.
//!
//! Agents are scored against a task's requirements and the best few above
//! the fit threshold are assigned. When nobody qualifies the scheduler names
//! the first requirement nobody covers so the orchestrator can raise the
//! emergency protocol.

use crate::agent::Agent;
use crate::capability::requirement_domain;
use crate::types::{new_id, AgentId, CollectiveError, Domain, Result, TaskId};
use chrono::{DateTime, Utc};
use collective_config::SchedulerConfig;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

fn default_complexity() -> u8 {
    5
}

/// Status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// A task as submitted for distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    #[serde(default)]
    pub id: Option<TaskId>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub requirements: Vec<String>,
    /// Clamped into [1, 10]
    #[serde(default = "default_complexity")]
    pub complexity: u8,
    /// Advisory, in seconds
    #[serde(default)]
    pub estimated_duration: Option<u64>,
    /// Advisory
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
}

impl TaskSpec {
    pub fn new(title: impl Into<String>, requirements: Vec<String>) -> Self {
        Self {
            id: None,
            title: title.into(),
            description: String::new(),
            requirements,
            complexity: default_complexity(),
            estimated_duration: None,
            deadline: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_complexity(mut self, complexity: u8) -> Self {
        self.complexity = complexity;
        self
    }

    /// Build a pending task, generating an id when none was given.
    pub fn into_task(self, now: DateTime<Utc>) -> Task {
        Task {
            id: self.id.unwrap_or_else(new_id),
            title: self.title,
            description: self.description,
            requirements: self.requirements,
            complexity: self.complexity.clamp(1, 10),
            estimated_duration: self.estimated_duration,
            assigned_agents: Vec::new(),
            status: TaskStatus::Pending,
            deadline: self.deadline,
            created_at: now,
            completed_at: None,
        }
    }
}

/// A unit of work tracked by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub requirements: Vec<String>,
    pub complexity: u8,
    pub estimated_duration: Option<u64>,
    /// At most `max_assignees`, in assignment order
    pub assigned_agents: Vec<AgentId>,
    pub status: TaskStatus,
    pub deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// An agent selected for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub agent_id: AgentId,
    pub fit_score: f64,
}

/// What one scheduling pass decided for a task.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulingPlan {
    Assign(Vec<Candidate>),
    /// No agent qualifies
    Emergency {
        unmet_requirement: Option<String>,
        domain: Option<Domain>,
    },
}

/// Task table and candidate selection.
#[derive(Debug)]
pub struct TaskScheduler {
    tasks: HashMap<TaskId, Task>,
    order: Vec<TaskId>,
    emergency_tasks: HashSet<TaskId>,
    config: SchedulerConfig,
}

impl TaskScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            tasks: HashMap::new(),
            order: Vec::new(),
            emergency_tasks: HashSet::new(),
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Add a new pending task.
    pub fn insert(&mut self, task: Task) -> Result<TaskId> {
        if task.id.trim().is_empty() {
            return Err(CollectiveError::InvalidTask("task id must not be empty".to_string()));
        }
        if task.title.trim().is_empty() {
            return Err(CollectiveError::InvalidTask("task title must not be empty".to_string()));
        }
        if self.tasks.contains_key(&task.id) {
            return Err(CollectiveError::DuplicateTask(task.id));
        }

        let id = task.id.clone();
        self.order.push(id.clone());
        self.tasks.insert(id.clone(), task);
        Ok(id)
    }

    /// Choose agents for `task` among `agents` (registry order).
    pub fn plan<'a>(&self, task: &Task, agents: impl IntoIterator<Item = &'a Agent>) -> SchedulingPlan {
        let active: Vec<&Agent> = agents.into_iter().filter(|a| a.is_active()).collect();
        let min_fit = self.config.min_fit_score;

        let mut candidates: Vec<Candidate> = active
            .iter()
            .map(|agent| Candidate {
                agent_id: agent.id.clone(),
                fit_score: agent.assess_fit(task),
            })
            .filter(|c| c.fit_score > min_fit)
            .collect();

        if !candidates.is_empty() {
            // Stable, so ties keep registry order.
            candidates.sort_by(|a, b| b.fit_score.total_cmp(&a.fit_score));
            candidates.truncate(self.config.max_assignees);
            tracing::debug!(task_id = %task.id, candidates = candidates.len(), "Candidates selected");
            return SchedulingPlan::Assign(candidates);
        }

        // None when every requirement is covered by someone and only the
        // combined fit falls short.
        let unmet_requirement = task
            .requirements
            .iter()
            .find(|r| !active.iter().any(|a| a.requirement_score(r) > min_fit))
            .cloned();
        let domain = unmet_requirement.as_deref().and_then(requirement_domain);

        SchedulingPlan::Emergency {
            unmet_requirement,
            domain,
        }
    }

    /// Assign candidates to a pending task and start it.
    pub fn assign(&mut self, task_id: &str, candidates: &[Candidate]) -> bool {
        let Some(task) = self.tasks.get_mut(task_id) else {
            return false;
        };
        if task.status != TaskStatus::Pending || candidates.is_empty() {
            return false;
        }

        task.assigned_agents = candidates
            .iter()
            .take(self.config.max_assignees)
            .map(|c| c.agent_id.clone())
            .collect();
        task.status = TaskStatus::InProgress;
        true
    }

    /// Add `agent` to a task's assignees. Claiming twice succeeds.
    pub fn claim(&mut self, task_id: &str, agent: &Agent) -> bool {
        let Some(task) = self.tasks.get_mut(task_id) else {
            return false;
        };
        if !agent.is_active() || task.status.is_finished() {
            return false;
        }
        if task.assigned_agents.contains(&agent.id) {
            return true;
        }
        if task.assigned_agents.len() >= self.config.max_assignees {
            return false;
        }

        task.assigned_agents.push(agent.id.clone());
        task.status = TaskStatus::InProgress;
        true
    }

    /// Unfinished tasks `agent_id` is assigned to.
    pub fn assignments_of(&self, agent_id: &str) -> Vec<TaskId> {
        self.tasks()
            .filter(|t| !t.status.is_finished() && t.assigned_agents.iter().any(|a| a == agent_id))
            .map(|t| t.id.clone())
            .collect()
    }

    /// Remove an agent from every task. Returns in-progress tasks left
    /// without assignees, which are reverted to pending.
    pub fn release_agent(&mut self, agent_id: &str) -> Vec<TaskId> {
        let mut orphaned = Vec::new();
        for id in &self.order {
            let Some(task) = self.tasks.get_mut(id) else {
                continue;
            };
            let before = task.assigned_agents.len();
            task.assigned_agents.retain(|a| a != agent_id);
            if task.assigned_agents.len() == before {
                continue;
            }
            if task.status == TaskStatus::InProgress && task.assigned_agents.is_empty() {
                task.status = TaskStatus::Pending;
                orphaned.push(id.clone());
            }
        }
        orphaned
    }

    /// Finish a task. Returns its assignees, or `None` when the task is
    /// unknown or already finished.
    pub fn complete(&mut self, task_id: &str, success: bool, now: DateTime<Utc>) -> Option<Vec<AgentId>> {
        let task = self.tasks.get_mut(task_id)?;
        if task.status.is_finished() {
            return None;
        }
        task.status = if success {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        task.completed_at = Some(now);
        self.emergency_tasks.remove(task_id);
        Some(task.assigned_agents.clone())
    }

    /// Drop a task that is not running.
    pub fn archive(&mut self, task_id: &str) -> Option<Task> {
        if self.tasks.get(task_id)?.status == TaskStatus::InProgress {
            return None;
        }
        self.order.retain(|id| id != task_id);
        self.emergency_tasks.remove(task_id);
        self.tasks.remove(task_id)
    }

    pub fn mark_emergency(&mut self, task_id: &str) {
        self.emergency_tasks.insert(task_id.to_string());
    }

    /// Clear a task's emergency mark; true if it had one.
    pub fn resolve_emergency(&mut self, task_id: &str) -> bool {
        self.emergency_tasks.remove(task_id)
    }

    pub fn has_emergencies(&self) -> bool {
        !self.emergency_tasks.is_empty()
    }

    /// Pending task ids in creation order.
    pub fn pending_ids(&self) -> Vec<TaskId> {
        self.tasks()
            .filter(|t| t.status == TaskStatus::Pending)
            .map(|t| t.id.clone())
            .collect()
    }

    pub fn get(&self, task_id: &str) -> Option<&Task> {
        self.tasks.get(task_id)
    }

    /// Tasks in creation order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.order.iter().filter_map(|id| self.tasks.get(id))
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentRole;
    use crate::capability::Capability;

    fn agent(id: &str, capability: &str, proficiency: f64) -> Agent {
        Agent::new(id, AgentRole::Analyst, Utc::now())
            .with_capability(Capability::new(capability, proficiency))
    }

    fn scheduler() -> TaskScheduler {
        TaskScheduler::new(SchedulerConfig::default())
    }

    fn spec(id: &str, requirements: &[&str]) -> TaskSpec {
        TaskSpec::new(id, requirements.iter().map(|r| r.to_string()).collect()).with_id(id)
    }

    #[test]
    fn test_plan_orders_and_caps_candidates() {
        let scheduler = scheduler();
        let agents = vec![
            agent("a", "tax", 0.5),
            agent("b", "tax", 0.9),
            agent("c", "tax", 0.3),
            agent("d", "tax", 0.5),
            agent("e", "tax", 0.7),
        ];
        let task = spec("t", &["tax"]).into_task(Utc::now());

        let SchedulingPlan::Assign(candidates) = scheduler.plan(&task, &agents) else {
            panic!("expected candidates");
        };
        let ids: Vec<_> = candidates.iter().map(|c| c.agent_id.as_str()).collect();
        // c sits exactly on the threshold and is excluded; a precedes d on tie.
        assert_eq!(ids, vec!["b", "e", "a"]);
    }

    #[test]
    fn test_plan_reports_first_unmet_requirement() {
        let scheduler = scheduler();
        let agents = vec![agent("a", "tax_calculation", 0.9)];
        let task = spec("t", &["tax_calculation", "logistics_optimization"]).into_task(Utc::now());

        assert_eq!(
            scheduler.plan(&task, &agents),
            SchedulingPlan::Emergency {
                unmet_requirement: Some("logistics_optimization".into()),
                domain: Some("logistics".into()),
            }
        );
    }

    #[test]
    fn test_plan_with_covered_requirements_names_no_domain() {
        let scheduler = scheduler();
        let agents = vec![
            agent("a", "logistics_a", 0.8),
            agent("b", "finance_b", 0.8),
            agent("c", "legal_c", 0.8),
        ];
        let task = spec("t", &["logistics_a", "finance_b", "legal_c"]).into_task(Utc::now());

        assert_eq!(
            scheduler.plan(&task, &agents),
            SchedulingPlan::Emergency {
                unmet_requirement: None,
                domain: None,
            }
        );
    }

    #[test]
    fn test_plan_without_active_agents() {
        let scheduler = scheduler();
        let mut isolated = agent("a", "tax", 0.9);
        isolated.isolate("test");
        let task = spec("t", &[]).into_task(Utc::now());

        assert_eq!(
            scheduler.plan(&task, &[isolated]),
            SchedulingPlan::Emergency {
                unmet_requirement: None,
                domain: None,
            }
        );
    }

    #[test]
    fn test_insert_rejects_duplicates_and_blank() {
        let mut scheduler = scheduler();
        scheduler.insert(spec("t1", &[]).into_task(Utc::now())).unwrap();

        let err = scheduler.insert(spec("t1", &[]).into_task(Utc::now())).unwrap_err();
        assert!(matches!(err, CollectiveError::DuplicateTask(_)));

        let err = scheduler
            .insert(TaskSpec::new("  ", vec![]).into_task(Utc::now()))
            .unwrap_err();
        assert!(matches!(err, CollectiveError::InvalidTask(_)));
    }

    #[test]
    fn test_complexity_is_clamped() {
        assert_eq!(spec("t", &[]).with_complexity(0).into_task(Utc::now()).complexity, 1);
        assert_eq!(spec("t", &[]).with_complexity(40).into_task(Utc::now()).complexity, 10);
    }

    #[test]
    fn test_claim_rules() {
        let mut scheduler = scheduler();
        scheduler.insert(spec("t", &[]).into_task(Utc::now())).unwrap();

        let a = agent("a", "x", 0.5);
        assert!(scheduler.claim("t", &a));
        assert!(scheduler.claim("t", &a));
        assert_eq!(scheduler.get("t").unwrap().assigned_agents, vec!["a"]);
        assert_eq!(scheduler.get("t").unwrap().status, TaskStatus::InProgress);

        assert!(scheduler.claim("t", &agent("b", "x", 0.5)));
        assert!(scheduler.claim("t", &agent("c", "x", 0.5)));
        assert!(!scheduler.claim("t", &agent("d", "x", 0.5)));

        let mut isolated = agent("e", "x", 0.5);
        isolated.isolate("test");
        assert!(!scheduler.claim("t", &isolated));
        assert!(!scheduler.claim("missing", &a));
    }

    #[test]
    fn test_release_agent_reverts_orphans() {
        let mut scheduler = scheduler();
        let now = Utc::now();
        scheduler.insert(spec("solo", &[]).into_task(now)).unwrap();
        scheduler.insert(spec("shared", &[]).into_task(now)).unwrap();

        let candidate = |id: &str| Candidate {
            agent_id: id.into(),
            fit_score: 1.0,
        };
        assert!(scheduler.assign("solo", &[candidate("x")]));
        assert!(scheduler.assign("shared", &[candidate("x"), candidate("y")]));

        let orphaned = scheduler.release_agent("x");
        assert_eq!(orphaned, vec!["solo"]);
        assert_eq!(scheduler.get("solo").unwrap().status, TaskStatus::Pending);
        assert_eq!(scheduler.get("shared").unwrap().assigned_agents, vec!["y"]);
        assert_eq!(scheduler.get("shared").unwrap().status, TaskStatus::InProgress);
        assert!(scheduler.tasks().all(|t| !t.assigned_agents.contains(&"x".to_string())));
    }

    #[test]
    fn test_complete_and_archive() {
        let mut scheduler = scheduler();
        let now = Utc::now();
        scheduler.insert(spec("t", &[]).into_task(now)).unwrap();
        scheduler.assign(
            "t",
            &[Candidate {
                agent_id: "a".into(),
                fit_score: 1.0,
            }],
        );

        assert!(scheduler.archive("t").is_none());
        assert_eq!(scheduler.complete("t", true, now), Some(vec!["a".to_string()]));
        assert_eq!(scheduler.complete("t", true, now), None);
        assert!(!scheduler.claim("t", &agent("b", "x", 0.5)));

        assert!(scheduler.archive("t").is_some());
        assert!(scheduler.is_empty());
    }
}
