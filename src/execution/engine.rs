//! Entry point for running a [`TaskGraph`].

use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::exec_graph::ExecutionGraph;
use crate::core::task_graph::{GraphError, TaskGraph};
use crate::core::types::RuleId;
use crate::error::Error;

/// Plans and runs rule graphs with bounded concurrency.
pub struct Engine {
    /// Maximum number of rules executing at once.
    max_concurrency: usize,
    semaphore: Arc<Semaphore>,
}

impl Engine {
    /// Create an engine that runs at most `max_concurrency` rules at once.
    pub fn new(max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            max_concurrency,
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Number of rules that could start right now.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Turn a task graph into an execution plan.
    ///
    /// Every rule becomes a node whose callback waits for a concurrency
    /// permit and then executes the rule.
    pub fn plan(&self, graph: &TaskGraph) -> Result<ExecutionGraph, GraphError> {
        let plan = ExecutionGraph::new();
        for rule in graph.rules() {
            let rule = Arc::clone(rule);
            let semaphore = Arc::clone(&self.semaphore);
            plan.add_fn(rule.id().clone(), move |cancel| {
                let rule = Arc::clone(&rule);
                let semaphore = Arc::clone(&semaphore);
                async move {
                    let _permit = tokio::select! {
                        permit = semaphore.acquire_owned() => {
                            permit.map_err(|_| Error::Cancelled)?
                        }
                        _ = cancel.cancelled() => return Err(Error::Cancelled),
                    };
                    rule.execute(&cancel).await
                }
            })?;
        }
        for (from, to) in graph.edges() {
            plan.add_dependency(from.as_str(), to.as_str())?;
        }
        Ok(plan)
    }

    /// Execute `target` and its dependencies.
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        graph: &TaskGraph,
        target: &str,
    ) -> Result<(), Error> {
        if graph.find_rule(target).is_none() {
            return Err(GraphError::MissingNode(RuleId::new(target)).into());
        }
        let plan = self.plan(graph)?;
        info!(rule = target, rules = plan.len(), "executing");
        plan.execute(cancel, target).await.map_err(Error::Shared)?;
        debug!(rule = target, "execution finished");
        Ok(())
    }

    /// Render the dependency tree of `target`.
    ///
    /// ```text
    /// //app:serve
    /// ├── //app:build
    /// │   └── //lib:build
    /// └── //db:migrate
    /// ```
    pub fn tree<W: Write>(&self, graph: &TaskGraph, target: &str, out: &mut W) -> Result<(), Error> {
        let root = graph
            .find_rule(target)
            .ok_or_else(|| GraphError::MissingNode(RuleId::new(target)))?;
        let io = |e| Error::io("write dependency tree", e);

        writeln!(out, "{}", root.id()).map_err(io)?;
        let mut path = HashSet::from([root.id().clone()]);
        render_children(graph, root.id(), "", &mut path, out)
    }

    /// Write the ID of every rule in `graph`, sorted, one per line.
    pub fn list<W: Write>(&self, graph: &TaskGraph, out: &mut W) -> Result<(), Error> {
        for id in graph.rule_ids() {
            writeln!(out, "{id}").map_err(|e| Error::io("write rule list", e))?;
        }
        Ok(())
    }
}

impl Default for Engine {
    fn default() -> Self {
        let parallelism = std::thread::available_parallelism().map_or(1, |n| n.get());
        Self::new(parallelism)
    }
}

fn render_children<W: Write>(
    graph: &TaskGraph,
    id: &RuleId,
    prefix: &str,
    path: &mut HashSet<RuleId>,
    out: &mut W,
) -> Result<(), Error> {
    let mut deps: Vec<RuleId> = graph
        .find_dependencies(id.as_str())?
        .iter()
        .map(|rule| rule.id().clone())
        .collect();
    deps.sort();

    let count = deps.len();
    for (i, dep) in deps.into_iter().enumerate() {
        if path.contains(&dep) {
            return Err(GraphError::Cycle {
                from: id.clone(),
                to: dep,
            }
            .into());
        }
        let last = i + 1 == count;
        let (branch, indent) = if last {
            ("└── ", "    ")
        } else {
            ("├── ", "│   ")
        };
        writeln!(out, "{prefix}{branch}{dep}").map_err(|e| Error::io("write dependency tree", e))?;

        path.insert(dep.clone());
        render_children(graph, &dep, &format!("{prefix}{indent}"), path, out)?;
        path.remove(&dep);
    }
    Ok(())
}
