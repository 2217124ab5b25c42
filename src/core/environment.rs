//! Environment variables for rule execution.
//!
//! An [`Environment`] is an overlay: subprocesses inherit the orchestrator's
//! own environment and then receive these variables on top of it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsString;

/// Environment variables passed to a rule's subprocesses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl Environment {
    /// Create an empty environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: add an environment variable.
    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Add an environment variable.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    /// Get a variable from the overlay only.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(|s| s.as_str())
    }

    /// Resolve a variable the way a child process would see it: the overlay
    /// first, then the orchestrator's own environment.
    pub fn lookup(&self, key: &str) -> Option<OsString> {
        match self.vars.get(key) {
            Some(value) => Some(OsString::from(value)),
            None => std::env::var_os(key),
        }
    }

    /// Check if the environment is empty.
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Get the number of variables.
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Merge another environment into this one.
    /// Variables from `other` override existing variables.
    pub fn merge(&mut self, other: &Environment) {
        for (k, v) in &other.vars {
            self.vars.insert(k.clone(), v.clone());
        }
    }

    /// Create a new environment by merging this one with another.
    pub fn merged_with(&self, other: &Environment) -> Self {
        let mut result = self.clone();
        result.merge(other);
        result
    }

    /// Iterate over the variables in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.vars.iter()
    }
}

impl FromIterator<(String, String)> for Environment {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            vars: iter.into_iter().collect(),
        }
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for Environment {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a str)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}
