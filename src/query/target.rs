//! Static read-dependency tracking for query expressions.
//!
//! Every expression node can report the set of data paths it would read:
//! metadata keys, fields of the message body, or declared variables. The
//! report is static — it never depends on runtime values — which makes it
//! usable for dependency analysis before any message is processed.

use crate::query::function::Function;
use std::collections::HashMap;
use std::sync::Arc;

/// The namespace a [`TargetPath`] points into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetKind {
    Metadata,
    Value,
    Variable,
}

/// A typed dotted path denoting a read dependency.
#[derive(Clone, Debug, PartialEq)]
pub struct TargetPath {
    pub kind: TargetKind,
    pub path: Vec<String>,
}

impl TargetPath {
    pub fn new<S: Into<String>>(kind: TargetKind, path: impl IntoIterator<Item = S>) -> Self {
        TargetPath {
            kind,
            path: path.into_iter().map(Into::into).collect(),
        }
    }

    /// Extend this path with further segments.
    pub fn join(&self, extra: &[String]) -> TargetPath {
        let mut path = self.path.clone();
        path.extend(extra.iter().cloned());
        TargetPath {
            kind: self.kind,
            path,
        }
    }
}

/// Context threaded through [`Function::query_targets`] calls.
///
/// Besides the declared maps table it tracks which paths the *context value*
/// (the "this" a nested query runs against) refers to. Methods that rebind
/// the context value — `get`, `apply`, query arguments — stage replacement
/// paths with [`with_values`](Self::with_values) and promote them with
/// [`with_values_as_context`](Self::with_values_as_context) before
/// descending.
#[derive(Clone)]
pub struct TargetsContext<'a> {
    pub maps: &'a HashMap<String, Arc<dyn Function>>,
    current: Vec<TargetPath>,
    staged: Vec<TargetPath>,
}

impl<'a> TargetsContext<'a> {
    pub fn new(maps: &'a HashMap<String, Arc<dyn Function>>) -> Self {
        TargetsContext {
            maps,
            current: Vec::new(),
            staged: Vec::new(),
        }
    }

    /// Paths the current context value refers to. Empty means the root of the
    /// message body.
    pub fn value_paths(&self) -> &[TargetPath] {
        &self.current
    }

    /// Stage paths that will become the context value for a nested query.
    pub fn with_values(mut self, paths: Vec<TargetPath>) -> Self {
        self.staged = paths;
        self
    }

    /// Promote the staged paths to be the context value.
    pub fn with_values_as_context(mut self) -> Self {
        self.current = std::mem::take(&mut self.staged);
        self
    }
}
