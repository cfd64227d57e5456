//! Task dependency graph.
//!
//! This module provides the TaskGraph structure that represents one
//! request's subtasks and their dependencies as a directed acyclic graph.
//! The scheduler walks it to find dispatchable work; the planner builds it
//! from the completion service's response.

use crate::core::task::{Task, TaskId, TaskStatus};
use crate::error::{Error, Result};
use crate::registry::WorkerType;
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

/// The task dependency graph for one orchestration request.
///
/// Nodes are tasks; an edge from A to B means A must reach a terminal
/// state before B can be dispatched. Insertion order is preserved so that
/// scheduling decisions are deterministic when several orders are valid.
pub struct TaskGraph {
    /// The underlying directed graph.
    graph: DiGraph<Task, ()>,
    /// Index mapping from TaskId to NodeIndex for fast lookups.
    task_index: HashMap<TaskId, NodeIndex>,
    /// Task ids in insertion order, used for deterministic tie-breaking.
    order: Vec<TaskId>,
}

impl TaskGraph {
    /// Create a new empty TaskGraph.
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            task_index: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Add a task to the graph, returning its id.
    ///
    /// Adding a task whose id is already present is a no-op.
    pub fn add_task(&mut self, task: Task) -> TaskId {
        let id = task.id;
        if self.task_index.contains_key(&id) {
            return id;
        }
        let index = self.graph.add_node(task);
        self.task_index.insert(id, index);
        self.order.push(id);
        id
    }

    /// Add a dependency edge: `from` must complete before `to` starts.
    ///
    /// # Errors
    ///
    /// Returns a validation error if either id is unknown, the edge is a
    /// self-dependency, or adding it would create a cycle.
    pub fn add_dependency(&mut self, from: &TaskId, to: &TaskId) -> Result<()> {
        if from == to {
            return Err(Error::Validation(format!(
                "Task {} cannot depend on itself",
                from.short()
            )));
        }

        let from_index = *self
            .task_index
            .get(from)
            .ok_or_else(|| Error::Validation(format!("Task {} not found in graph", from)))?;
        let to_index = *self
            .task_index
            .get(to)
            .ok_or_else(|| Error::Validation(format!("Task {} not found in graph", to)))?;

        // Add the edge, then roll it back if it closed a cycle.
        let edge = self.graph.add_edge(from_index, to_index, ());
        if is_cyclic_directed(&self.graph) {
            self.graph.remove_edge(edge);
            return Err(Error::Validation(format!(
                "Dependency from {} to {} would create a cycle",
                from.short(),
                to.short()
            )));
        }

        Ok(())
    }

    /// Get a reference to a task by its id.
    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.task_index
            .get(id)
            .and_then(|&index| self.graph.node_weight(index))
    }

    /// Get a mutable reference to a task by its id.
    pub fn get_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        if let Some(&index) = self.task_index.get(id) {
            self.graph.node_weight_mut(index)
        } else {
            None
        }
    }

    /// Check if the graph contains a task.
    pub fn contains(&self, id: &TaskId) -> bool {
        self.task_index.contains_key(id)
    }

    /// Number of tasks in the graph.
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Check if the graph is empty.
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Number of dependency edges.
    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Task ids in insertion order.
    pub fn task_ids(&self) -> Vec<TaskId> {
        self.order.clone()
    }

    /// All tasks in insertion order.
    pub fn tasks(&self) -> Vec<&Task> {
        self.order.iter().filter_map(|id| self.get(id)).collect()
    }

    /// Ids of the tasks the given task depends on.
    pub fn dependencies_of(&self, id: &TaskId) -> Vec<TaskId> {
        self.neighbor_ids(id, petgraph::Direction::Incoming)
    }

    /// Ids of the tasks that depend on the given task.
    pub fn dependents_of(&self, id: &TaskId) -> Vec<TaskId> {
        self.neighbor_ids(id, petgraph::Direction::Outgoing)
    }

    fn neighbor_ids(&self, id: &TaskId, dir: petgraph::Direction) -> Vec<TaskId> {
        if let Some(&index) = self.task_index.get(id) {
            self.graph
                .neighbors_directed(index, dir)
                .filter_map(|n| self.graph.node_weight(n))
                .map(|t| t.id)
                .collect()
        } else {
            Vec::new()
        }
    }

    /// All transitive dependents of a task (the set poisoned when it fails).
    pub fn transitive_dependents(&self, id: &TaskId) -> Vec<TaskId> {
        let mut seen = Vec::new();
        let mut stack = self.dependents_of(id);
        while let Some(next) = stack.pop() {
            if !seen.contains(&next) {
                stack.extend(self.dependents_of(&next));
                seen.push(next);
            }
        }
        seen
    }

    /// Tasks ready for dispatch: still pending, with every dependency
    /// completed. Returned in insertion order.
    pub fn ready_tasks(&self) -> Vec<TaskId> {
        self.order
            .iter()
            .filter(|id| {
                let task = match self.get(id) {
                    Some(t) => t,
                    None => return false,
                };
                if task.status != TaskStatus::Pending {
                    return false;
                }
                self.dependencies_of(id).iter().all(|dep| {
                    self.get(dep)
                        .map(|t| t.status == TaskStatus::Completed)
                        .unwrap_or(false)
                })
            })
            .copied()
            .collect()
    }

    /// Check if every task has reached a terminal state.
    pub fn all_terminal(&self) -> bool {
        self.order
            .iter()
            .all(|id| self.get(id).map(|t| t.is_terminal()).unwrap_or(true))
    }

    /// Tasks in a topological order consistent with the dependency edges.
    ///
    /// Kahn's algorithm, scanning candidates in insertion order so ties
    /// break deterministically.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the graph contains a cycle (which
    /// `add_dependency` prevents, so this indicates internal corruption).
    pub fn topological_order(&self) -> Result<Vec<TaskId>> {
        let mut in_degree: HashMap<TaskId, usize> = self
            .order
            .iter()
            .map(|id| (*id, self.dependencies_of(id).len()))
            .collect();

        let mut sorted = Vec::with_capacity(self.order.len());
        while sorted.len() < self.order.len() {
            let next = self
                .order
                .iter()
                .find(|id| !sorted.contains(*id) && in_degree[id] == 0)
                .copied();
            match next {
                Some(id) => {
                    for dependent in self.dependents_of(&id) {
                        if let Some(degree) = in_degree.get_mut(&dependent) {
                            *degree = degree.saturating_sub(1);
                        }
                    }
                    sorted.push(id);
                }
                None => {
                    return Err(Error::Validation(
                        "Cycle detected in task graph".to_string(),
                    ))
                }
            }
        }
        Ok(sorted)
    }

    /// Peak concurrent demand per worker type.
    ///
    /// Tasks are bucketed by dependency depth (the longest path from a
    /// root); tasks at the same depth may run concurrently, so the demand
    /// for a type is the largest per-depth count. Used by the swarm
    /// strategy to size the pool before dispatch.
    pub fn worker_demand(&self) -> HashMap<WorkerType, usize> {
        let order = match self.topological_order() {
            Ok(order) => order,
            Err(_) => return HashMap::new(),
        };

        let mut depth: HashMap<TaskId, usize> = HashMap::new();
        for id in &order {
            let d = self
                .dependencies_of(id)
                .iter()
                .filter_map(|dep| depth.get(dep))
                .max()
                .map(|d| d + 1)
                .unwrap_or(0);
            depth.insert(*id, d);
        }

        // Count tasks per (depth, type), then keep the per-type maximum.
        let mut per_level: HashMap<(usize, WorkerType), usize> = HashMap::new();
        for id in &order {
            if let Some(worker_type) = self.get(id).and_then(|t| t.worker_type.clone()) {
                *per_level.entry((depth[id], worker_type)).or_insert(0) += 1;
            }
        }

        let mut demand: HashMap<WorkerType, usize> = HashMap::new();
        for ((_, worker_type), count) in per_level {
            let entry = demand.entry(worker_type).or_insert(0);
            *entry = (*entry).max(count);
        }
        demand
    }
}

impl Default for TaskGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("tasks", &self.len())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}
