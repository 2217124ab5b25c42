//! The set of rules in a workspace and their declared dependency edges.
//!
//! A [`TaskGraph`] is pure data: it is filled once from loaded rules and only
//! read afterwards. Edges may name rules that were never added; such edges
//! surface as [`GraphError::MissingNode`] when the graph is looked up or
//! turned into an execution plan.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use thiserror::Error;

use super::types::RuleId;
use crate::rules::Rule;

/// Errors that can occur when working with rule graphs.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Adding the edge would close a cycle.
    #[error("adding dependency {from} -> {to} would create a cycle")]
    Cycle { from: RuleId, to: RuleId },

    /// A rule or node with this ID does not exist.
    #[error("missing rule with id {0}")]
    MissingNode(RuleId),

    /// A rule with this ID was already added.
    #[error("duplicate rule: {0}")]
    DuplicateNode(RuleId),

    /// The graph lock was poisoned by a panicking writer.
    #[error("graph lock poisoned")]
    LockPoisoned,
}

/// Rules indexed by ID plus `dependent -> dependencies` edges.
#[derive(Clone, Default)]
pub struct TaskGraph {
    rules: BTreeMap<RuleId, Arc<dyn Rule>>,
    dependencies: HashMap<RuleId, Vec<RuleId>>,
}

impl TaskGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from rules, adding the dependencies each rule declares.
    pub fn from_rules<I>(rules: I) -> Result<Self, GraphError>
    where
        I: IntoIterator<Item = Arc<dyn Rule>>,
    {
        let mut graph = Self::new();
        for rule in rules {
            graph.add_rule_with_dependencies(rule)?;
        }
        Ok(graph)
    }

    /// Check if the graph has no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Number of rules in the graph.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Add a rule without edges.
    pub fn add_rule(&mut self, rule: Arc<dyn Rule>) -> Result<(), GraphError> {
        let id = rule.id().clone();
        if self.rules.contains_key(&id) {
            return Err(GraphError::DuplicateNode(id));
        }
        self.rules.insert(id, rule);
        Ok(())
    }

    /// Add a rule and an edge to every dependency it declares.
    pub fn add_rule_with_dependencies(&mut self, rule: Arc<dyn Rule>) -> Result<(), GraphError> {
        let id = rule.id().clone();
        let deps = rule.dependencies().to_vec();
        self.add_rule(rule)?;
        for dep in deps {
            self.add_dependency(id.clone(), dep);
        }
        Ok(())
    }

    /// Declare that `from` depends on `to`. Repeated edges are ignored.
    pub fn add_dependency(&mut self, from: impl Into<RuleId>, to: impl Into<RuleId>) {
        let to = to.into();
        let deps = self.dependencies.entry(from.into()).or_default();
        if !deps.contains(&to) {
            deps.push(to);
        }
    }

    /// Get a rule by ID.
    pub fn find_rule(&self, id: &str) -> Option<&Arc<dyn Rule>> {
        self.rules.get(id)
    }

    /// IDs of the direct dependencies of a rule, as declared.
    pub fn dependency_ids(&self, id: &str) -> &[RuleId] {
        self.dependencies.get(id).map_or(&[], |deps| deps.as_slice())
    }

    /// The direct dependencies of a rule.
    ///
    /// Fails if the rule or any of its dependencies is unknown.
    pub fn find_dependencies(&self, id: &str) -> Result<Vec<Arc<dyn Rule>>, GraphError> {
        if !self.rules.contains_key(id) {
            return Err(GraphError::MissingNode(RuleId::new(id)));
        }
        self.dependency_ids(id)
            .iter()
            .map(|dep| {
                self.rules
                    .get(dep)
                    .cloned()
                    .ok_or_else(|| GraphError::MissingNode(dep.clone()))
            })
            .collect()
    }

    /// All rules, ordered by ID.
    pub fn rules(&self) -> impl Iterator<Item = &Arc<dyn Rule>> {
        self.rules.values()
    }

    /// All rule IDs, sorted.
    pub fn rule_ids(&self) -> Vec<RuleId> {
        self.rules.keys().cloned().collect()
    }

    /// All declared edges as `(dependent, dependency)` pairs.
    pub fn edges(&self) -> impl Iterator<Item = (&RuleId, &RuleId)> {
        self.dependencies
            .iter()
            .flat_map(|(from, deps)| deps.iter().map(move |to| (from, to)))
    }
}
