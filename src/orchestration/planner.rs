//! Plan generation and validation.
//!
//! The Planner asks the completion service to break a request into
//! subtasks with worker assignments and dependencies, then treats the
//! response as untrusted input: it is schema-parsed, validated against the
//! known worker types, and checked for dangling references and cycles.
//! Anything suspect is discarded in favor of a single-task fallback graph,
//! so the scheduler always receives a valid, non-empty graph.

use crate::core::task::{Task, TaskId};
use crate::core::TaskGraph;
use crate::hlog_warn;
use crate::orchestration::completion::CompletionService;
use crate::registry::{WorkerInfo, WorkerType};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

const SYSTEM_PROMPT: &str = "You are a task orchestrator. You break user requests \
into subtasks, assign each subtask to a worker type, and declare dependencies \
between subtasks. Respond with a single fenced ```json block.";

/// One subtask in the completion service's plan response.
#[derive(Debug, Deserialize)]
struct PlanTask {
    id: String,
    description: String,
    worker: String,
    #[serde(default)]
    dependencies: Vec<String>,
}

/// The structured plan the completion service is asked to produce.
#[derive(Debug, Deserialize)]
struct PlanResponse {
    #[serde(default)]
    strategy: Option<String>,
    tasks: Vec<PlanTask>,
}

/// A validated plan, ready for the scheduler.
#[derive(Debug)]
pub struct Plan {
    /// The task graph. Always valid and non-empty.
    pub graph: TaskGraph,
    /// Strategy hint from the plan response, if any. The caller's explicit
    /// strategy always wins; this is informational.
    pub suggested_strategy: Option<String>,
    /// Whether validation discarded the response and fell back.
    pub fell_back: bool,
}

/// Turns a request into a validated task graph.
pub struct Planner {
    service: Arc<dyn CompletionService>,
}

impl Planner {
    /// Create a planner backed by the given completion service.
    pub fn new(service: Arc<dyn CompletionService>) -> Self {
        Self { service }
    }

    /// Plan a request against a snapshot of the available workers.
    ///
    /// This never fails: completion errors, malformed responses, unknown
    /// worker types, dangling dependency ids, and cycles all degrade to a
    /// single-task fallback graph.
    pub async fn plan(&self, request: &str, workers: &[WorkerInfo]) -> Plan {
        let prompt = build_prompt(request, workers);

        let text = match self.service.complete(SYSTEM_PROMPT, &prompt).await {
            Ok(text) => text,
            Err(e) => {
                hlog_warn!("planner: completion failed, falling back: {}", e);
                return fallback_plan(request, workers);
            }
        };

        match parse_plan(&text, workers) {
            Ok((graph, strategy)) => Plan {
                graph,
                suggested_strategy: strategy,
                fell_back: false,
            },
            Err(reason) => {
                hlog_warn!("planner: rejected plan response ({}), falling back", reason);
                fallback_plan(request, workers)
            }
        }
    }
}

fn build_prompt(request: &str, workers: &[WorkerInfo]) -> String {
    let snapshot = serde_json::to_string_pretty(workers).unwrap_or_else(|_| "[]".to_string());
    format!(
        "Request: {}\n\nAvailable workers:\n{}\n\nRespond with a ```json block of the form:\n\
        {{\"strategy\": \"sequential|parallel|swarm\", \"tasks\": [{{\"id\": \"t1\", \
        \"description\": \"...\", \"worker\": \"backend\", \"dependencies\": []}}]}}",
        request, snapshot
    )
}

/// Extract the first fenced ```json block, or fall back to the whole text.
fn extract_json(text: &str) -> Option<String> {
    let fence = Regex::new(r"(?s)```json\s*(.*?)```").ok()?;
    if let Some(captures) = fence.captures(text) {
        return Some(captures[1].trim().to_string());
    }
    // Some responses skip the fence; accept the body if it is bare JSON.
    let trimmed = text.trim();
    if trimmed.starts_with('{') {
        return Some(trimmed.to_string());
    }
    None
}

/// Parse and validate a plan response into a task graph.
///
/// Returns a human-readable rejection reason on any validation failure.
fn parse_plan(
    text: &str,
    workers: &[WorkerInfo],
) -> std::result::Result<(TaskGraph, Option<String>), String> {
    let json = extract_json(text).ok_or("no structured block in response")?;
    let response: PlanResponse =
        serde_json::from_str(&json).map_err(|e| format!("malformed plan JSON: {}", e))?;

    if response.tasks.is_empty() {
        return Err("plan contains no tasks".to_string());
    }

    let known_types: Vec<&WorkerType> = workers.iter().map(|w| &w.worker_type).collect();

    let mut graph = TaskGraph::new();
    let mut id_map: HashMap<String, TaskId> = HashMap::new();

    for plan_task in &response.tasks {
        let worker_type: WorkerType = plan_task.worker.clone().into();
        if !known_types.contains(&&worker_type) {
            return Err(format!("unknown worker type: {}", plan_task.worker));
        }
        if id_map.contains_key(&plan_task.id) {
            return Err(format!("duplicate task id: {}", plan_task.id));
        }
        let id = graph.add_task(Task::for_worker(&plan_task.description, worker_type));
        id_map.insert(plan_task.id.clone(), id);
    }

    for plan_task in &response.tasks {
        let to = id_map[&plan_task.id];
        for dep in &plan_task.dependencies {
            let from = *id_map
                .get(dep)
                .ok_or_else(|| format!("dependency references unknown id: {}", dep))?;
            graph
                .add_dependency(&from, &to)
                .map_err(|e| format!("invalid dependency: {}", e))?;
        }
    }

    Ok((graph, response.strategy))
}

/// Build the guaranteed-safe fallback: one task carrying the whole request.
fn fallback_plan(request: &str, workers: &[WorkerInfo]) -> Plan {
    let worker_type = workers
        .first()
        .map(|w| w.worker_type.clone())
        .unwrap_or(WorkerType::Backend);

    let mut graph = TaskGraph::new();
    graph.add_task(Task::for_worker(request, worker_type));

    Plan {
        graph,
        suggested_strategy: None,
        fell_back: true,
    }
}
