//! Task registry and dependency graph
//!
//! Tasks are registered once at startup. Every registration updates a
//! petgraph graph (edges point from a task to its dependencies) and is
//! rejected if it would close a cycle, so a registry that accepted all of its
//! tasks always describes an acyclic graph. Dependencies may name tasks that
//! are registered later; unresolved names surface when a chain is resolved.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use petgraph::algo::{all_simple_paths, has_path_connecting};
use petgraph::prelude::*;

use crate::builder::BuildContext;
use crate::configs::tasks::TaskConfig;
use crate::execution::command::Step;
use crate::types::{RunbookError, RunbookResult};

/// A built-in task body
pub type Recipe = fn(&BuildContext<'_>) -> RunbookResult<Vec<Step>>;

#[derive(Debug, Clone)]
pub enum TaskAction {
    Builtin(Recipe),
    /// Declared in the workspace file
    File(TaskConfig),
}

#[derive(Debug, Clone)]
pub struct TaskDefinition {
    pub name: String,
    pub description: String,
    /// Run before this task, in this order
    pub dependencies: Vec<String>,
    pub action: TaskAction,
}

impl TaskDefinition {
    pub fn builtin(name: &str, description: &str, recipe: Recipe) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            dependencies: Vec::new(),
            action: TaskAction::Builtin(recipe),
        }
    }

    pub fn from_config(config: TaskConfig) -> Self {
        Self {
            name: config.name.clone(),
            description: config.description.clone().unwrap_or_default(),
            dependencies: config.dependencies(),
            action: TaskAction::File(config),
        }
    }

    pub fn depends_on(mut self, dependencies: &[&str]) -> Self {
        self.dependencies = dependencies.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self.action, TaskAction::Builtin(_))
    }
}

/// Discovery metadata for one task
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct TaskSummary {
    pub name: String,
    pub description: String,
    pub dependencies: Vec<String>,
    /// False for tasks declared in `runbook.yml`
    pub builtin: bool,
}

#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: IndexMap<String, TaskDefinition>,
    graph: DiGraph<String, ()>,
    nodes: HashMap<String, NodeIndex>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, definition: TaskDefinition) -> RunbookResult<()> {
        if self.tasks.contains_key(&definition.name) {
            return Err(RunbookError::DuplicateTask(definition.name));
        }

        // Adding edges name -> dep closes a cycle iff dep already reaches name
        if let Some(cycle) = self.cycle_through(&definition.name, &definition.dependencies) {
            return Err(RunbookError::CyclicDependency { cycle });
        }

        let node = self.node(&definition.name);
        for dependency in &definition.dependencies {
            let dep_node = self.node(dependency);
            self.graph.update_edge(node, dep_node, ());
        }

        tracing::trace!(
            task = %definition.name,
            deps = ?definition.dependencies,
            "registered task"
        );
        self.tasks.insert(definition.name.clone(), definition);
        Ok(())
    }

    fn node(&mut self, name: &str) -> NodeIndex {
        if let Some(&index) = self.nodes.get(name) {
            return index;
        }
        let index = self.graph.add_node(name.to_string());
        self.nodes.insert(name.to_string(), index);
        index
    }

    fn cycle_through(&self, name: &str, dependencies: &[String]) -> Option<Vec<String>> {
        for dependency in dependencies {
            if dependency == name {
                return Some(vec![name.to_string(), name.to_string()]);
            }
        }

        let &target = self.nodes.get(name)?;
        for dependency in dependencies {
            let Some(&start) = self.nodes.get(dependency) else {
                continue;
            };
            if !has_path_connecting(&self.graph, start, target, None) {
                continue;
            }
            let path = all_simple_paths::<Vec<_>, _>(&self.graph, start, target, 0, None)
                .next()
                .unwrap_or_else(|| vec![start, target]);
            let mut cycle = vec![name.to_string()];
            cycle.extend(path.into_iter().map(|node| self.graph[node].clone()));
            return Some(cycle);
        }
        None
    }

    pub fn get(&self, name: &str) -> Option<&TaskDefinition> {
        self.tasks.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Expand `name` into the tasks to run, dependencies first, each once
    pub fn resolve_chain(&self, name: &str) -> RunbookResult<Vec<&TaskDefinition>> {
        let root = self.tasks.get(name).ok_or_else(|| RunbookError::UnknownTask {
            name: name.to_string(),
            required_by: None,
        })?;

        let mut chain = Vec::new();
        let mut done = HashSet::new();
        let mut path = Vec::new();
        self.visit(root, &mut path, &mut done, &mut chain)?;
        Ok(chain)
    }

    fn visit<'a>(
        &'a self,
        task: &'a TaskDefinition,
        path: &mut Vec<String>,
        done: &mut HashSet<&'a str>,
        chain: &mut Vec<&'a TaskDefinition>,
    ) -> RunbookResult<()> {
        if done.contains(task.name.as_str()) {
            return Ok(());
        }
        if let Some(start) = path.iter().position(|n| n == &task.name) {
            let mut cycle = path[start..].to_vec();
            cycle.push(task.name.clone());
            return Err(RunbookError::CyclicDependency { cycle });
        }

        path.push(task.name.clone());
        for dependency in &task.dependencies {
            let dep = self.tasks.get(dependency).ok_or_else(|| RunbookError::UnknownTask {
                name: dependency.clone(),
                required_by: Some(task.name.clone()),
            })?;
            self.visit(dep, path, done, chain)?;
        }
        path.pop();

        done.insert(task.name.as_str());
        chain.push(task);
        Ok(())
    }

    /// Registered tasks in registration order
    pub fn list(&self) -> Vec<TaskSummary> {
        self.tasks
            .values()
            .map(|task| TaskSummary {
                name: task.name.clone(),
                description: task.description.clone(),
                dependencies: task.dependencies.clone(),
                builtin: task.is_builtin(),
            })
            .collect()
    }

    /// The dependency graph; edges point from a task to its dependencies and
    /// forward references show up as nodes without a registered task
    pub fn graph(&self) -> &DiGraph<String, ()> {
        &self.graph
    }

    /// Direct dependencies of `name` read back from the graph, in declared order
    pub fn graph_dependencies(&self, name: &str) -> Vec<&str> {
        let Some(&node) = self.nodes.get(name) else {
            return Vec::new();
        };
        // petgraph yields the most recently added edge first
        let mut deps: Vec<&str> = self
            .graph
            .neighbors(node)
            .map(|dep| self.graph[dep].as_str())
            .collect();
        deps.reverse();
        deps
    }

    /// Dependency names that no registered task provides
    pub fn dangling_dependencies(&self) -> Vec<(String, String)> {
        self.tasks
            .values()
            .flat_map(|task| {
                task.dependencies
                    .iter()
                    .filter(|dep| !self.tasks.contains_key(dep.as_str()))
                    .map(|dep| (task.name.clone(), dep.clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}
