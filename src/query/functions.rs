//! Builtin leaf functions.
//!
//! These are the named entry points of the query language that read from the
//! message batch, metadata, or declared variables. Each is a small struct
//! with explicit owned state; registration wires them into the global
//! [`FunctionSet`](crate::query::registry::FunctionSet).

use crate::message::Part;
use crate::path;
use crate::query::error::QueryError;
use crate::query::function::{Function, FunctionContext};
use crate::query::params::{ParamSpec, Params};
use crate::query::registry::{Category, FunctionSet, FunctionSpec};
use crate::query::target::{TargetKind, TargetPath, TargetsContext};
use crate::value::{Number, Value};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

fn part_at<'a>(ctx: &FunctionContext<'a>) -> Result<&'a Part, QueryError> {
    ctx.batch.get(ctx.index).ok_or_else(|| {
        QueryError::message(format!(
            "message index {} out of range for batch of size {}",
            ctx.index,
            ctx.batch.len()
        ))
    })
}

/// `content()`: the raw bytes of the current part.
struct ContentFunction;

impl Function for ContentFunction {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        Ok(Value::Bytes(part_at(&ctx)?.as_bytes().to_vec()))
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        let paths = vec![TargetPath::new::<String>(TargetKind::Value, [])];
        (ctx, paths)
    }

    fn annotation(&self) -> String {
        "function content".to_owned()
    }
}

/// `json(path)`: a field of the current part's parsed JSON document.
struct JsonFunction {
    argument: Vec<String>,
}

impl Function for JsonFunction {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        let doc = part_at(&ctx)?.structured().map_err(QueryError::Message)?;
        Ok(path::get(doc, &self.argument)
            .cloned()
            .unwrap_or(Value::Null))
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        let paths = vec![TargetPath::new(TargetKind::Value, self.argument.clone())];
        (ctx, paths)
    }

    fn annotation(&self) -> String {
        if self.argument.is_empty() {
            "function json".to_owned()
        } else {
            format!("json path `{}`", path::to_dot_path(&self.argument))
        }
    }
}

/// `meta(key)`: a metadata value of the current part, or the full metadata
/// object when no key is given.
struct MetaFunction {
    key: Option<String>,
}

impl Function for MetaFunction {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        let part = part_at(&ctx)?;
        match &self.key {
            Some(key) => Ok(part
                .metadata()
                .get(key)
                .map(|v| Value::String(v.clone()))
                .unwrap_or(Value::Null)),
            None => Ok(Value::Object(
                part.metadata()
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            )),
        }
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        let paths = match &self.key {
            Some(key) => vec![TargetPath::new(TargetKind::Metadata, [key.clone()])],
            None => vec![TargetPath::new::<String>(TargetKind::Metadata, [])],
        };
        (ctx, paths)
    }

    fn annotation(&self) -> String {
        match &self.key {
            Some(key) => format!("meta field {key}"),
            None => "function meta".to_owned(),
        }
    }
}

/// `var(name)`: a declared variable.
struct VarFunction {
    name: String,
}

impl Function for VarFunction {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        ctx.vars
            .get(&self.name)
            .cloned()
            .ok_or_else(|| QueryError::UnknownVariable(self.name.clone()))
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        let paths = vec![TargetPath::new(TargetKind::Variable, [self.name.clone()])];
        (ctx, paths)
    }

    fn annotation(&self) -> String {
        format!("variable {}", self.name)
    }
}

/// `batch_index()`: the index of the part under evaluation.
struct BatchIndexFunction;

impl Function for BatchIndexFunction {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        Ok(Value::Number(Number::Int(ctx.index as i64)))
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        (ctx, Vec::new())
    }

    fn annotation(&self) -> String {
        "function batch_index".to_owned()
    }
}

/// `batch_size()`: the number of parts in the batch.
struct BatchSizeFunction;

impl Function for BatchSizeFunction {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        Ok(Value::Number(Number::Int(ctx.batch.len() as i64)))
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        (ctx, Vec::new())
    }

    fn annotation(&self) -> String {
        "function batch_size".to_owned()
    }
}

static COUNTERS: LazyLock<Mutex<HashMap<String, i64>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// `count(name)`: a process-wide named counter, incremented on each call.
struct CountFunction {
    name: String,
}

impl Function for CountFunction {
    fn exec(&self, _ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        let mut counters = COUNTERS.lock().unwrap();
        let entry = counters.entry(self.name.clone()).or_insert(0);
        *entry += 1;
        Ok(Value::Number(Number::Int(*entry)))
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        (ctx, Vec::new())
    }

    fn annotation(&self) -> String {
        format!("counter {}", self.name)
    }
}

/// `timestamp_unix()`: seconds since the epoch.
struct TimestampUnixFunction;

impl Function for TimestampUnixFunction {
    fn exec(&self, _ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();
        Ok(Value::Number(Number::Int(secs)))
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        (ctx, Vec::new())
    }

    fn annotation(&self) -> String {
        "function timestamp_unix".to_owned()
    }
}

/// `throw(why)`: always fails with the given message.
struct ThrowFunction {
    why: String,
}

impl Function for ThrowFunction {
    fn exec(&self, _ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        Err(QueryError::message(self.why.clone()))
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        (ctx, Vec::new())
    }

    fn annotation(&self) -> String {
        "function throw".to_owned()
    }
}

pub(crate) fn register_all(set: &mut FunctionSet) -> Result<(), QueryError> {
    set.add(
        FunctionSpec::new("content", "The raw bytes of the message part under evaluation.")
            .in_category(Category::Message),
        Arc::new(|_| Ok(Arc::new(ContentFunction))),
    )?;

    set.add(
        FunctionSpec::new(
            "json",
            "A field of the message part's JSON document, addressed by dot path. The root document when the path is empty; null when the path is missing.",
        )
        .in_category(Category::Message)
        .with_params(Params::new().add(
            ParamSpec::string("path", "The dot path of the target field.").with_default(""),
        )),
        Arc::new(|args| {
            let argument = path::parse(&args.field_string("path")?);
            Ok(Arc::new(JsonFunction { argument }))
        }),
    )?;

    set.add(
        FunctionSpec::new(
            "meta",
            "A metadata value of the message part, or an object of all metadata when no key is given.",
        )
        .in_category(Category::Message)
        .with_params(
            Params::new().add(ParamSpec::string("key", "The metadata key.").optional()),
        ),
        Arc::new(|args| {
            let key = args.field_optional_string("key")?;
            Ok(Arc::new(MetaFunction { key }))
        }),
    )?;

    set.add(
        FunctionSpec::new("var", "The value of a declared variable.").with_params(
            Params::new().add(ParamSpec::string("name", "The variable name.")),
        ),
        Arc::new(|args| {
            let name = args.field_string("name")?;
            Ok(Arc::new(VarFunction { name }))
        }),
    )?;

    set.add(
        FunctionSpec::new("batch_index", "The index of the part under evaluation.")
            .in_category(Category::Message),
        Arc::new(|_| Ok(Arc::new(BatchIndexFunction))),
    )?;

    set.add(
        FunctionSpec::new("batch_size", "The number of parts in the batch.")
            .in_category(Category::Message),
        Arc::new(|_| Ok(Arc::new(BatchSizeFunction))),
    )?;

    set.add(
        FunctionSpec::new(
            "count",
            "A process-wide named counter, incremented with each invocation.",
        )
        .impure()
        .with_params(Params::new().add(ParamSpec::string("name", "The counter name."))),
        Arc::new(|args| {
            let name = args.field_string("name")?;
            Ok(Arc::new(CountFunction { name }))
        }),
    )?;

    set.add(
        FunctionSpec::new("timestamp_unix", "Seconds since the unix epoch.")
            .in_category(Category::Timestamp)
            .impure(),
        Arc::new(|_| Ok(Arc::new(TimestampUnixFunction))),
    )?;

    set.add(
        FunctionSpec::new("throw", "Fail the query with a custom message.").with_params(
            Params::new().add(ParamSpec::string("why", "The error message.")),
        ),
        Arc::new(|args| {
            let why = args.field_string("why")?;
            Ok(Arc::new(ThrowFunction { why }))
        }),
    )?;

    Ok(())
}
