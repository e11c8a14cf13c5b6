//! General-purpose methods: error recovery, coercions, batch perspective
//! shifts, and path access.
//!
//! Each method is a struct holding its target function and whatever owned
//! state its arguments produced. The `register_all` function at the bottom
//! wires them into the global method registry.

use crate::path;
use crate::query::error::QueryError;
use crate::query::function::{Function, FunctionContext, aggregate_targets, err_from};
use crate::query::params::{ParamSpec, Params};
use crate::query::registry::{Category, MethodSet, MethodSpec};
use crate::query::target::{TargetPath, TargetsContext};
use crate::value::Value;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// `apply(mapping)`: run a declared map over the target value. Variables are
/// reset inside the mapping; the map sees the target value as its context.
struct ApplyMethod {
    target: Arc<dyn Function>,
    mapping: String,
}

impl Function for ApplyMethod {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        let res = self.target.exec(ctx)?;
        if ctx.maps.is_empty() {
            return Err(QueryError::message("no maps were found"));
        }
        let map = ctx
            .maps
            .get(&self.mapping)
            .ok_or_else(|| QueryError::UnknownMap(self.mapping.clone()))?;

        // Maps evaluate with isolated variables.
        let isolated = HashMap::new();
        map.exec(ctx.with_value(&res).with_vars(&isolated))
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        let Some(map) = ctx.maps.get(&self.mapping).cloned() else {
            return self.target.query_targets(ctx);
        };
        let (ctx, mut targets) = self.target.query_targets(ctx);
        let ctx = ctx.with_values(targets.clone()).with_values_as_context();
        let (ctx, mut map_targets) = map.query_targets(ctx);
        targets.append(&mut map_targets);
        (ctx, targets)
    }

    fn annotation(&self) -> String {
        format!("map {}", self.mapping)
    }
}

/// `bool([default])`: lenient boolean coercion, falling back to the default
/// on failure when one is given.
struct BoolMethod {
    target: Arc<dyn Function>,
    fallback: Option<bool>,
}

impl Function for BoolMethod {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        let v = match self.target.exec(ctx) {
            Ok(v) => v,
            Err(e) => {
                return match self.fallback {
                    Some(d) => Ok(Value::Bool(d)),
                    None => Err(e),
                };
            }
        };
        match v.coerce_bool() {
            Ok(b) => Ok(Value::Bool(b)),
            Err(e) => match self.fallback {
                Some(d) => Ok(Value::Bool(d)),
                None => Err(err_from(e.into(), self.target.as_ref())),
            },
        }
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        self.target.query_targets(ctx)
    }

    fn annotation(&self) -> String {
        "method bool".to_owned()
    }
}

/// `catch(fallback)`: evaluate the fallback if the target fails.
struct CatchMethod {
    target: Arc<dyn Function>,
    fallback: Arc<dyn Function>,
}

impl Function for CatchMethod {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        match self.target.exec(ctx) {
            Err(_) => self.fallback.exec(ctx),
            ok => ok,
        }
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        aggregate_targets(ctx, &[self.target.as_ref(), self.fallback.as_ref()])
    }

    fn annotation(&self) -> String {
        "method catch".to_owned()
    }
}

/// `or(fallback)`: evaluate the fallback if the target fails or is null.
struct OrMethod {
    target: Arc<dyn Function>,
    fallback: Arc<dyn Function>,
}

impl Function for OrMethod {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        match self.target.exec(ctx) {
            Err(_) | Ok(Value::Null) => self.fallback.exec(ctx),
            ok => ok,
        }
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        aggregate_targets(ctx, &[self.target.as_ref(), self.fallback.as_ref()])
    }

    fn annotation(&self) -> String {
        "method or".to_owned()
    }
}

/// `from(index)`: re-execute the target from the perspective of another
/// message of the batch.
struct FromMethod {
    target: Arc<dyn Function>,
    index: i64,
}

impl Function for FromMethod {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        let index = usize::try_from(self.index).map_err(|_| {
            QueryError::message(format!("message index {} out of range", self.index))
        })?;
        self.target.exec(ctx.with_index(index))
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        // The reported targets keep the original perspective.
        self.target.query_targets(ctx)
    }

    fn annotation(&self) -> String {
        format!("{} from {}", self.target.annotation(), self.index)
    }
}

/// `from_all()`: execute the target once per message of the batch, returning
/// the results as an array. Partial failures produce a recoverable error
/// carrying the best-effort array.
struct FromAllMethod {
    target: Arc<dyn Function>,
}

impl Function for FromAllMethod {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        let mut values = Vec::with_capacity(ctx.batch.len());
        let mut failure = None;
        for i in 0..ctx.batch.len() {
            match self.target.exec(ctx.with_index(i)) {
                Ok(v) => values.push(v),
                Err(QueryError::Recoverable { recovered, source }) => {
                    values.push(recovered);
                    failure = Some(QueryError::Recoverable {
                        recovered: Value::Null,
                        source,
                    });
                }
                Err(e) => {
                    values.push(Value::Null);
                    failure = Some(e);
                }
            }
        }
        match failure {
            Some(e) => Err(QueryError::Recoverable {
                recovered: Value::Array(values),
                source: Box::new(match e {
                    QueryError::Recoverable { source, .. } => *source,
                    other => other,
                }),
            }),
            None => Ok(Value::Array(values)),
        }
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        self.target.query_targets(ctx)
    }

    fn annotation(&self) -> String {
        "method from_all".to_owned()
    }
}

/// `get(path)`: descend into the target value by dot path; a missing path
/// yields null. Chained gets collapse into one node.
pub(crate) struct GetMethod {
    target: Arc<dyn Function>,
    path: Vec<String>,
}

impl Function for GetMethod {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        let v = self.target.exec(ctx)?;
        Ok(path::get(&v, &self.path).cloned().unwrap_or(Value::Null))
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        let (ctx, mut fn_paths) = self.target.query_targets(ctx);
        let extended: Vec<TargetPath> = ctx
            .value_paths()
            .iter()
            .map(|p| p.join(&self.path))
            .collect();
        let ctx = ctx.with_values(extended.clone()).with_values_as_context();
        fn_paths.extend(extended);
        (ctx, fn_paths)
    }

    fn annotation(&self) -> String {
        format!("path `{}`", path::to_dot_path(&self.path))
    }

    fn as_any(&self) -> Option<&dyn Any> {
        Some(self)
    }
}

pub(crate) fn new_get_method(target: Arc<dyn Function>, path_str: &str) -> Arc<dyn Function> {
    let segments = path::parse(path_str);
    if let Some(any) = target.as_any() {
        // Chained path accessors collapse into a single node.
        if let Some(get) = any.downcast_ref::<GetMethod>() {
            let mut path = get.path.clone();
            path.extend(segments);
            return Arc::new(GetMethod {
                target: Arc::clone(&get.target),
                path,
            });
        }
        if let Some(field) = any.downcast_ref::<crate::query::function::FieldFunction>() {
            return Arc::new(field.expand(&segments));
        }
    }
    Arc::new(GetMethod {
        target,
        path: segments,
    })
}

/// Hidden `map(query)`: evaluate a query with the target value as context.
struct MapMethod {
    target: Arc<dyn Function>,
    query: Arc<dyn Function>,
}

impl Function for MapMethod {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        let res = self.target.exec(ctx)?;
        self.query.exec(ctx.with_value(&res))
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        let (ctx, mut targets) = self.target.query_targets(ctx);
        let ctx = ctx.with_values(targets.clone()).with_values_as_context();
        let (ctx, mut query_targets) = self.query.query_targets(ctx);
        targets.append(&mut query_targets);
        (ctx, targets)
    }

    fn annotation(&self) -> String {
        self.query.annotation()
    }
}

/// Hidden `not()`: boolean negation of the target.
struct NotMethod {
    target: Arc<dyn Function>,
}

impl Function for NotMethod {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        let v = self.target.exec(ctx)?;
        let b = v
            .as_bool()
            .map_err(|e| err_from(e.into(), self.target.as_ref()))?;
        Ok(Value::Bool(!b))
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        self.target.query_targets(ctx)
    }

    fn annotation(&self) -> String {
        format!("not {}", self.target.annotation())
    }
}

/// Logical NOT of a child function.
pub fn not(target: Arc<dyn Function>) -> Arc<dyn Function> {
    Arc::new(NotMethod { target })
}

/// `not_null()`: pass the value through unless it is null.
struct NotNullMethod {
    target: Arc<dyn Function>,
}

impl Function for NotNullMethod {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        match self.target.exec(ctx)? {
            Value::Null => Err(QueryError::message("value is null")),
            v => Ok(v),
        }
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        self.target.query_targets(ctx)
    }

    fn annotation(&self) -> String {
        "method not_null".to_owned()
    }
}

/// `number([default])`: lenient numeric coercion with an optional fallback.
struct NumberMethod {
    target: Arc<dyn Function>,
    fallback: Option<f64>,
}

impl Function for NumberMethod {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        let v = match self.target.exec(ctx) {
            Ok(v) => v,
            Err(e) => {
                return match self.fallback {
                    Some(d) => Ok(Value::from(d)),
                    None => Err(e),
                };
            }
        };
        match v.coerce_number() {
            Ok(n) => Ok(Value::Number(n)),
            Err(e) => match self.fallback {
                Some(d) => Ok(Value::from(d)),
                None => Err(err_from(e.into(), self.target.as_ref())),
            },
        }
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        self.target.query_targets(ctx)
    }

    fn annotation(&self) -> String {
        "method number".to_owned()
    }
}

/// `string()`: render the value as a string.
struct StringMethod {
    target: Arc<dyn Function>,
}

impl Function for StringMethod {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        Ok(Value::String(self.target.exec(ctx)?.coerce_string()))
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        self.target.query_targets(ctx)
    }

    fn annotation(&self) -> String {
        "method string".to_owned()
    }
}

/// `type()`: the kind of the value as a string.
struct TypeMethod {
    target: Arc<dyn Function>,
}

impl Function for TypeMethod {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        Ok(Value::String(self.target.exec(ctx)?.kind().to_string()))
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        self.target.query_targets(ctx)
    }

    fn annotation(&self) -> String {
        "method type".to_owned()
    }
}

pub(crate) fn register_all(set: &mut MethodSet) -> Result<(), QueryError> {
    set.add(
        MethodSpec::new("apply", "Apply a declared mapping to a target value.").with_params(
            Params::new().add(ParamSpec::string("mapping", "The mapping to apply.")),
        ),
        Arc::new(|target, args| {
            let mapping = args.field_string("mapping")?;
            Ok(Arc::new(ApplyMethod { target, mapping }))
        }),
    )?;

    set.add(
        MethodSpec::new(
            "bool",
            "Attempt to parse a value into a boolean. Non-zero numbers are true; the usual spellings of true and false are accepted for strings. An optional argument is returned instead when parsing fails.",
        )
        .in_category(Category::Coercion)
        .with_params(
            Params::new()
                .add(ParamSpec::bool("default", "A fallback for values that cannot be parsed.").optional()),
        ),
        Arc::new(|target, args| {
            let fallback = args.field_optional_bool("default")?;
            Ok(Arc::new(BoolMethod { target, fallback }))
        }),
    )?;

    set.add(
        MethodSpec::new(
            "catch",
            "If the target query fails the argument is evaluated and returned instead.",
        )
        .with_params(Params::new().add(ParamSpec::query("fallback", "The fallback value or query."))),
        Arc::new(|target, args| {
            let fallback = args.field_query("fallback")?;
            Ok(Arc::new(CatchMethod { target, fallback }))
        }),
    )?;

    set.add(
        MethodSpec::new(
            "or",
            "If the target query fails or resolves to null the argument is evaluated and returned instead.",
        )
        .with_params(Params::new().add(ParamSpec::query("fallback", "The fallback value or query."))),
        Arc::new(|target, args| {
            let fallback = args.field_query("fallback")?;
            Ok(Arc::new(OrMethod { target, fallback }))
        }),
    )?;

    set.add(
        MethodSpec::new(
            "from",
            "Execute the target query from the perspective of another message of the batch.",
        )
        .with_params(Params::new().add(ParamSpec::int("index", "The message index."))),
        Arc::new(|target, args| {
            let index = args.field_i64("index")?;
            Ok(Arc::new(FromMethod { target, index }))
        }),
    )?;

    set.add(
        MethodSpec::new(
            "from_all",
            "Execute the target query from the perspective of each message of the batch, returning the results as an array.",
        ),
        Arc::new(|target, _| Ok(Arc::new(FromAllMethod { target }))),
    )?;

    set.add(
        MethodSpec::new(
            "get",
            "Extract a field value, identified by a dot path, from an object.",
        )
        .in_category(Category::ObjectAndArray)
        .with_params(Params::new().add(ParamSpec::string("path", "The dot path of the field."))),
        Arc::new(|target, args| {
            let p = args.field_string("path")?;
            Ok(new_get_method(target, &p))
        }),
    )?;

    set.add(
        MethodSpec::new("map", "").with_params(
            Params::new().add(ParamSpec::query("query", "The query to apply.")),
        ),
        Arc::new(|target, args| {
            let query = args.field_query("query")?;
            Ok(Arc::new(MapMethod { target, query }))
        }),
    )?;

    set.add(
        MethodSpec::new("not", ""),
        Arc::new(|target, _| Ok(Arc::new(NotMethod { target }))),
    )?;

    set.add(
        MethodSpec::new(
            "not_null",
            "Ensure that the value is not null, returning it unchanged if so.",
        )
        .in_category(Category::Coercion),
        Arc::new(|target, _| Ok(Arc::new(NotNullMethod { target }))),
    )?;

    set.add(
        MethodSpec::new(
            "number",
            "Attempt to parse a value into a number. An optional argument is returned instead when parsing fails.",
        )
        .in_category(Category::Coercion)
        .with_params(
            Params::new()
                .add(ParamSpec::float("default", "A fallback for values that cannot be parsed.").optional()),
        ),
        Arc::new(|target, args| {
            let fallback = args.field_optional_f64("default")?;
            Ok(Arc::new(NumberMethod { target, fallback }))
        }),
    )?;

    set.add(
        MethodSpec::new("string", "Render the value as a string.").in_category(Category::Coercion),
        Arc::new(|target, _| Ok(Arc::new(StringMethod { target }))),
    )?;

    set.add(
        MethodSpec::new(
            "type",
            "The type of the value as a string: string, bytes, number, bool, array, object or null.",
        )
        .in_category(Category::Coercion),
        Arc::new(|target, _| Ok(Arc::new(TypeMethod { target }))),
    )?;

    Ok(())
}
