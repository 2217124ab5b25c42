//! Concurrent, memoized execution of a dependency graph.
//!
//! An [`ExecutionGraph`] holds named callbacks and the edges between them.
//! Edges are checked when they are added, so the graph never contains a
//! cycle. [`ExecutionGraph::execute`] runs a target and everything it
//! depends on:
//!
//! 1. the structure is cloned, so later edits do not affect the run;
//! 2. redundant edges are removed (transitive reduction);
//! 3. each node gets a [`Promise`] on first request, which waits for the
//!    promises of its direct dependencies and then runs the node's callback.
//!
//! Nodes that do not depend on each other run concurrently. Each node runs
//! at most once per run. When a dependency fails the node is not run and the
//! failure is passed on.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use futures::FutureExt;
use futures::future::BoxFuture;
use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span};

use crate::core::future::Promise;
use crate::core::task_graph::GraphError;
use crate::core::types::{RuleId, RunId};
use crate::error::{Error, combine};

/// The action run for a node.
pub type Callback =
    Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, Result<(), Error>> + Send + Sync>;

/// Outcome of a node, shared by everything that depends on it.
pub type NodeResult = Result<(), Arc<Error>>;

#[derive(Clone)]
struct Node {
    id: RuleId,
    callback: Callback,
}

/// Nodes and `dependent -> dependency` edges.
#[derive(Clone, Default)]
struct Structure {
    graph: DiGraph<Node, ()>,
    index: HashMap<RuleId, NodeIndex>,
}

impl Structure {
    fn node(&self, id: &str) -> Result<NodeIndex, GraphError> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| GraphError::MissingNode(RuleId::new(id)))
    }

    /// Drop every edge `u -> v` where `v` is also reachable from another
    /// direct dependency of `u`.
    fn reduce(&mut self) {
        let mut redundant = Vec::new();
        for node in self.graph.node_indices() {
            let deps: Vec<NodeIndex> = self.graph.neighbors(node).collect();
            for &dep in &deps {
                let implied = deps
                    .iter()
                    .any(|&other| other != dep && has_path_connecting(&self.graph, other, dep, None));
                if implied {
                    redundant.push((node, dep));
                }
            }
        }
        for (from, to) in redundant {
            if let Some(edge) = self.graph.find_edge(from, to) {
                self.graph.remove_edge(edge);
            }
        }
    }
}

/// A cycle-free graph of callbacks that can be executed from any node.
#[derive(Default)]
pub struct ExecutionGraph {
    live: RwLock<Structure>,
}

impl ExecutionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node.
    pub fn add(&self, id: impl Into<RuleId>, callback: Callback) -> Result<(), GraphError> {
        let id = id.into();
        let mut live = self.live.write().map_err(|_| GraphError::LockPoisoned)?;
        if live.index.contains_key(&id) {
            return Err(GraphError::DuplicateNode(id));
        }
        let node = live.graph.add_node(Node {
            id: id.clone(),
            callback,
        });
        live.index.insert(id, node);
        Ok(())
    }

    /// Add a node from an async closure.
    pub fn add_fn<F, Fut>(&self, id: impl Into<RuleId>, action: F) -> Result<(), GraphError>
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        self.add(id, Arc::new(move |cancel| action(cancel).boxed()))
    }

    /// Declare that `from` depends on `to`.
    ///
    /// Adding an edge that already exists does nothing. An edge that would
    /// close a cycle is rejected and the graph is left unchanged.
    pub fn add_dependency(&self, from: &str, to: &str) -> Result<(), GraphError> {
        let mut live = self.live.write().map_err(|_| GraphError::LockPoisoned)?;
        let source = live.node(from)?;
        let target = live.node(to)?;

        if live.graph.contains_edge(source, target) {
            return Ok(());
        }
        if source == target || has_path_connecting(&live.graph, target, source, None) {
            return Err(GraphError::Cycle {
                from: RuleId::new(from),
                to: RuleId::new(to),
            });
        }
        live.graph.add_edge(source, target, ());
        Ok(())
    }

    /// IDs of the direct dependencies of `id`, sorted.
    pub fn dependencies(&self, id: &str) -> Result<Vec<RuleId>, GraphError> {
        let live = self.live.read().map_err(|_| GraphError::LockPoisoned)?;
        let node = live.node(id)?;
        let mut deps: Vec<RuleId> = live
            .graph
            .neighbors(node)
            .map(|dep| live.graph[dep].id.clone())
            .collect();
        deps.sort();
        Ok(deps)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.live
            .read()
            .map(|live| live.index.contains_key(id))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.live.read().map(|live| live.index.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `root` and everything it depends on.
    pub async fn execute(&self, cancel: &CancellationToken, root: &str) -> NodeResult {
        let mut snapshot = self
            .live
            .read()
            .map_err(|_| Arc::new(Error::from(GraphError::LockPoisoned)))?
            .clone();
        snapshot.reduce();
        let root = snapshot
            .node(root)
            .map_err(|err| Arc::new(Error::from(err)))?;

        let run = Arc::new(Run {
            id: RunId::new(),
            structure: snapshot,
            promises: DashMap::new(),
            cancel: cancel.clone(),
        });
        let root_id = run.structure.graph[root].id.clone();
        let span = info_span!("graph_execution", run = %run.id, root = %root_id);

        async move {
            debug!(nodes = run.structure.graph.node_count(), "starting run");
            let result = run.promise(root).get().await;
            debug!(ok = result.is_ok(), "run finished");
            result
        }
        .instrument(span)
        .await
    }
}

/// State of one `execute` call.
struct Run {
    id: RunId,
    structure: Structure,
    promises: DashMap<NodeIndex, Promise<NodeResult>>,
    cancel: CancellationToken,
}

impl Run {
    /// The promise for `node`, created on first request.
    fn promise(self: &Arc<Self>, node: NodeIndex) -> Promise<NodeResult> {
        self.promises
            .entry(node)
            .or_insert_with(|| Promise::spawn(Arc::clone(self).work(node)))
            .value()
            .clone()
    }

    fn work(self: Arc<Self>, node: NodeIndex) -> BoxFuture<'static, NodeResult> {
        async move {
            let id = self.structure.graph[node].id.clone();
            let deps: Vec<Promise<NodeResult>> = self
                .structure
                .graph
                .neighbors(node)
                .map(|dep| self.promise(dep))
                .collect();

            let failures: Vec<Arc<Error>> = Promise::all_of(deps)
                .get()
                .await
                .into_iter()
                .filter_map(Result::err)
                .collect();
            if let Some(err) = combine(failures) {
                debug!(rule = %id, "dependencies failed, not running");
                return Err(err);
            }

            let callback = Arc::clone(&self.structure.graph[node].callback);
            let span = info_span!("rule", run = %self.id, rule = %id);
            async {
                debug!("running");
                let result = callback(self.cancel.clone()).await;
                match &result {
                    Ok(()) => debug!("finished"),
                    Err(err) => debug!(error = %err, "failed"),
                }
                result.map_err(Arc::new)
            }
            .instrument(span)
            .await
        }
        .boxed()
    }
}
