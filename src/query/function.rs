//! The core expression-node abstraction.
//!
//! Every evaluable expression is a [`Function`]: it executes against a
//! [`FunctionContext`], reports the static paths it reads, and carries a
//! human-readable annotation for diagnostics. Inner nodes wrap child
//! functions; composition is by wrapping, never by inheritance.

use crate::message::MessageBatch;
use crate::path;
use crate::query::error::QueryError;
use crate::query::target::{TargetKind, TargetPath, TargetsContext};
use crate::value::Value;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// An evaluable expression node.
pub trait Function: Send + Sync {
    /// Evaluate the node against a context.
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError>;

    /// Report the static paths this node would read. Deterministic and
    /// independent of dynamic input values; short-circuit operators still
    /// report the targets of operands they might skip.
    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>);

    /// Human-readable identity of the node for diagnostics.
    fn annotation(&self) -> String;

    /// Downcast support for the few constructors that inspect their target
    /// structurally (path collapsing). Most nodes are opaque.
    fn as_any(&self) -> Option<&dyn Any> {
        None
    }
}

/// The evaluation context of a single `exec` call.
///
/// Contexts are immutable; derived contexts are produced by the `with_*`
/// builders. All fields borrow from the evaluation's surroundings, so the
/// struct is `Copy` and handing out derivatives is free.
#[derive(Clone, Copy)]
pub struct FunctionContext<'a> {
    pub batch: &'a MessageBatch,
    pub index: usize,
    pub vars: &'a HashMap<String, Value>,
    pub maps: &'a HashMap<String, Arc<dyn Function>>,
    value: Option<&'a Value>,
}

impl<'a> FunctionContext<'a> {
    pub fn new(
        batch: &'a MessageBatch,
        vars: &'a HashMap<String, Value>,
        maps: &'a HashMap<String, Arc<dyn Function>>,
    ) -> Self {
        FunctionContext {
            batch,
            index: 0,
            vars,
            maps,
            value: None,
        }
    }

    /// The current context value (the "this" a query runs against).
    pub fn value(&self) -> Option<&'a Value> {
        self.value
    }

    pub fn with_value(mut self, value: &'a Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_index(mut self, index: usize) -> Self {
        self.index = index;
        self
    }

    pub fn with_vars(mut self, vars: &'a HashMap<String, Value>) -> Self {
        self.vars = vars;
        self
    }
}

impl fmt::Debug for dyn Function + '_ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("annotation", &self.annotation())
            .finish()
    }
}

/// Prefix an error with the annotation of the node it came from.
pub fn err_from(err: QueryError, node: &dyn Function) -> QueryError {
    err.at(node.annotation())
}

/// Thread a targets context through a sequence of nodes, concatenating their
/// reported paths.
pub fn aggregate_targets<'a>(
    ctx: TargetsContext<'a>,
    nodes: &[&dyn Function],
) -> (TargetsContext<'a>, Vec<TargetPath>) {
    let mut ctx = ctx;
    let mut paths = Vec::new();
    for node in nodes {
        let (next, mut p) = node.query_targets(ctx);
        ctx = next;
        paths.append(&mut p);
    }
    (ctx, paths)
}

/// A constant value.
pub struct Literal {
    value: Value,
    label: Option<String>,
}

impl Literal {
    pub fn new(value: Value) -> Self {
        Literal { value, label: None }
    }

    pub fn named(label: impl Into<String>, value: Value) -> Self {
        let label = label.into();
        Literal {
            value,
            label: (!label.is_empty()).then_some(label),
        }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

impl Function for Literal {
    fn exec(&self, _ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        Ok(self.value.clone())
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        (ctx, Vec::new())
    }

    fn annotation(&self) -> String {
        match &self.label {
            Some(label) => label.clone(),
            None => format!("{} literal", self.value.kind()),
        }
    }

    fn as_any(&self) -> Option<&dyn Any> {
        Some(self)
    }
}

/// A reference into the context value by dot path.
pub struct FieldFunction {
    path: Vec<String>,
}

impl FieldFunction {
    pub fn new(path_str: &str) -> Self {
        FieldFunction {
            path: path::parse(path_str),
        }
    }

    /// A copy of this reference descended by further segments. Used to
    /// collapse chained path accessors into a single node.
    pub fn expand(&self, extra: &[String]) -> FieldFunction {
        let mut path = self.path.clone();
        path.extend(extra.iter().cloned());
        FieldFunction { path }
    }
}

impl Function for FieldFunction {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        let Some(value) = ctx.value() else {
            return Err(QueryError::message(
                "context was undefined, unable to reference `this`",
            ));
        };
        Ok(path::get(value, &self.path).cloned().unwrap_or(Value::Null))
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        let paths = if ctx.value_paths().is_empty() {
            vec![TargetPath::new(TargetKind::Value, self.path.clone())]
        } else {
            ctx.value_paths()
                .iter()
                .map(|p| p.join(&self.path))
                .collect()
        };
        (ctx, paths)
    }

    fn annotation(&self) -> String {
        if self.path.is_empty() {
            "this".to_owned()
        } else {
            format!("field `this.{}`", path::to_dot_path(&self.path))
        }
    }

    fn as_any(&self) -> Option<&dyn Any> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn literal_annotation_names_the_kind() {
        assert_eq!(Literal::new(Value::from("x")).annotation(), "string literal");
        assert_eq!(Literal::new(Value::from(1i64)).annotation(), "number literal");
        assert_eq!(Literal::named("foobar", Value::Null).annotation(), "foobar");
    }

    #[test]
    fn field_reads_context_value() {
        let batch = MessageBatch::new();
        let vars = HashMap::new();
        let maps = HashMap::new();
        let ctx = FunctionContext::new(&batch, &vars, &maps);

        let doc = Value::from_json(json!({"foo": {"bar": 7}}));
        let f = FieldFunction::new("foo.bar");
        assert_eq!(f.exec(ctx.with_value(&doc)).unwrap(), Value::from(7i64));
        assert_eq!(
            f.exec(ctx.with_value(&doc).with_index(3)).unwrap(),
            Value::from(7i64)
        );
        assert!(f.exec(ctx).is_err());
    }

    #[test]
    fn field_targets_report_value_paths() {
        let maps = HashMap::new();
        let f = FieldFunction::new("qux.quz");
        let (_, paths) = f.query_targets(TargetsContext::new(&maps));
        assert_eq!(
            paths,
            vec![TargetPath::new(TargetKind::Value, ["qux", "quz"])]
        );
    }
}
