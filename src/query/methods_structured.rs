//! Methods over structured values: arrays, objects, strings and bytes.
//!
//! The shape mirrors `methods.rs`: one struct per method holding the target
//! function and owned argument state, with registration at the bottom.

use crate::path;
use crate::query::error::QueryError;
use crate::query::function::{Function, FunctionContext, aggregate_targets, err_from};
use crate::query::params::{ParamSpec, ParamValue, Params};
use crate::query::registry::{Category, MethodSet, MethodSpec};
use crate::query::target::{TargetPath, TargetsContext};
use crate::utils::OrdF64;
use crate::value::{Number, TypeError, Value, ValueKind};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

fn expect_array(v: Value) -> Result<Vec<Value>, QueryError> {
    match v {
        Value::Array(items) => Ok(items),
        other => Err(TypeError::new(&other, &[ValueKind::Array]).into()),
    }
}

fn expect_object(v: Value) -> Result<HashMap<String, Value>, QueryError> {
    match v {
        Value::Object(fields) => Ok(fields),
        other => Err(TypeError::new(&other, &[ValueKind::Object]).into()),
    }
}

fn pair_object(key: &str, key_value: Value, value: Value) -> Value {
    let mut fields = HashMap::with_capacity(2);
    fields.insert(key.to_owned(), key_value);
    fields.insert("value".to_owned(), value);
    Value::Object(fields)
}

/// `all(test)` / `any(test)`: check each element of an array against a query.
/// Empty arrays are false either way.
struct ElementTestMethod {
    target: Arc<dyn Function>,
    test: Arc<dyn Function>,
    // true: all elements must pass; false: one passing element suffices.
    require_all: bool,
}

impl Function for ElementTestMethod {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        let items = expect_array(self.target.exec(ctx)?)?;
        if items.is_empty() {
            return Ok(Value::Bool(false));
        }
        for (i, item) in items.iter().enumerate() {
            let res = self
                .test
                .exec(ctx.with_value(item))
                .map_err(|e| QueryError::message(format!("element {i}: {e}")))?;
            let b = res.as_bool().map_err(|e| {
                QueryError::message(format!("element {i}: {}", QueryError::from(e)))
            })?;
            if b != self.require_all {
                return Ok(Value::Bool(!self.require_all));
            }
        }
        Ok(Value::Bool(self.require_all))
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        aggregate_targets(ctx, &[self.target.as_ref(), self.test.as_ref()])
    }

    fn annotation(&self) -> String {
        if self.require_all {
            "method all".to_owned()
        } else {
            "method any".to_owned()
        }
    }
}

/// `append(...)`: an array with extra elements appended.
struct AppendMethod {
    target: Arc<dyn Function>,
    extra: Vec<Value>,
}

impl Function for AppendMethod {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        let mut items = expect_array(self.target.exec(ctx)?)?;
        items.extend(self.extra.iter().cloned());
        Ok(Value::Array(items))
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        self.target.query_targets(ctx)
    }

    fn annotation(&self) -> String {
        "method append".to_owned()
    }
}

/// `collapse([include_empty])`: flatten a structure into an object keyed by
/// the dot path of each leaf.
struct CollapseMethod {
    target: Arc<dyn Function>,
    include_empty: bool,
}

fn collapse_into(prefix: &str, v: &Value, include_empty: bool, out: &mut HashMap<String, Value>) {
    let empty = match v {
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        _ => {
            out.insert(prefix.to_owned(), v.clone());
            return;
        }
    };
    if empty {
        if include_empty {
            out.insert(prefix.to_owned(), v.clone());
        }
        return;
    }
    match v {
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                let key = if prefix.is_empty() {
                    i.to_string()
                } else {
                    format!("{prefix}.{i}")
                };
                collapse_into(&key, item, include_empty, out);
            }
        }
        Value::Object(fields) => {
            for (k, item) in fields {
                let key = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{prefix}.{k}")
                };
                collapse_into(&key, item, include_empty, out);
            }
        }
        _ => unreachable!(),
    }
}

impl Function for CollapseMethod {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        let v = self.target.exec(ctx)?;
        if !matches!(v, Value::Array(_) | Value::Object(_)) {
            return Err(TypeError::new(&v, &[ValueKind::Array, ValueKind::Object]).into());
        }
        let mut out = HashMap::new();
        collapse_into("", &v, self.include_empty, &mut out);
        Ok(Value::Object(out))
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        self.target.query_targets(ctx)
    }

    fn annotation(&self) -> String {
        "method collapse".to_owned()
    }
}

/// `contains(value)`: substring match for strings and bytes, element match
/// for arrays and objects. Numeric matches ignore representation kind.
struct ContainsMethod {
    target: Arc<dyn Function>,
    operand: Value,
}

impl ContainsMethod {
    fn matches(&self, candidate: &Value) -> bool {
        match (self.operand.as_number(), candidate.as_number()) {
            (Ok(a), Ok(b)) => a == b,
            _ => *candidate == self.operand,
        }
    }
}

impl Function for ContainsMethod {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        let v = self.target.exec(ctx)?;
        let found = match &v {
            Value::String(s) => s.contains(&self.operand.coerce_string()),
            Value::Bytes(b) => {
                let needle = self.operand.coerce_bytes();
                needle.is_empty() || b.windows(needle.len()).any(|w| w == needle.as_slice())
            }
            Value::Array(items) => items.iter().any(|item| self.matches(item)),
            Value::Object(fields) => fields.values().any(|item| self.matches(item)),
            other => {
                return Err(TypeError::new(
                    other,
                    &[ValueKind::String, ValueKind::Array, ValueKind::Object],
                )
                .into());
            }
        };
        Ok(Value::Bool(found))
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        self.target.query_targets(ctx)
    }

    fn annotation(&self) -> String {
        "method contains".to_owned()
    }
}

/// `enumerated()`: an array of `{index, value}` objects.
struct EnumeratedMethod {
    target: Arc<dyn Function>,
}

impl Function for EnumeratedMethod {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        let items = expect_array(self.target.exec(ctx)?)?;
        let out = items
            .into_iter()
            .enumerate()
            .map(|(i, v)| pair_object("index", Value::from(i as i64), v))
            .collect();
        Ok(Value::Array(out))
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        self.target.query_targets(ctx)
    }

    fn annotation(&self) -> String {
        "method enumerated".to_owned()
    }
}

/// `exists(path)`: whether a dot path resolves in the target value.
struct ExistsMethod {
    target: Arc<dyn Function>,
    argument: Vec<String>,
}

impl Function for ExistsMethod {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        let v = self.target.exec(ctx)?;
        Ok(Value::Bool(path::exists(&v, &self.argument)))
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        self.target.query_targets(ctx)
    }

    fn annotation(&self) -> String {
        "method exists".to_owned()
    }
}

/// `explode(path)`: fan the container at a path out into copies of the
/// enclosing document.
struct ExplodeMethod {
    target: Arc<dyn Function>,
    path_raw: String,
    argument: Vec<String>,
}

impl Function for ExplodeMethod {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        let v = self.target.exec(ctx)?;
        let found = path::get(&v, &self.argument).cloned().unwrap_or(Value::Null);
        match found {
            Value::Array(items) => {
                let out = items
                    .into_iter()
                    .map(|item| {
                        let mut doc = v.clone();
                        path::set(&mut doc, &self.argument, item);
                        doc
                    })
                    .collect();
                Ok(Value::Array(out))
            }
            Value::Object(fields) => {
                let out = fields
                    .into_iter()
                    .map(|(k, item)| {
                        let mut doc = v.clone();
                        path::set(&mut doc, &self.argument, item);
                        (k, doc)
                    })
                    .collect();
                Ok(Value::Object(out))
            }
            other => Err(QueryError::message(format!(
                "expected array or object value at path '{}', found: {}",
                self.path_raw,
                other.kind()
            ))),
        }
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        self.target.query_targets(ctx)
    }

    fn annotation(&self) -> String {
        "method explode".to_owned()
    }
}

/// `filter(test)`: keep elements (or key/value pairs) for which the query
/// returns true; non-boolean results drop the element.
struct FilterMethod {
    target: Arc<dyn Function>,
    test: Arc<dyn Function>,
}

impl Function for FilterMethod {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        match self.target.exec(ctx)? {
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    let keep = self
                        .test
                        .exec(ctx.with_value(&item))?
                        .as_bool()
                        .unwrap_or(false);
                    if keep {
                        out.push(item);
                    }
                }
                Ok(Value::Array(out))
            }
            Value::Object(fields) => {
                let mut out = HashMap::with_capacity(fields.len());
                for (k, v) in fields {
                    let item = pair_object("key", Value::String(k.clone()), v.clone());
                    let keep = self
                        .test
                        .exec(ctx.with_value(&item))?
                        .as_bool()
                        .unwrap_or(false);
                    if keep {
                        out.insert(k, v);
                    }
                }
                Ok(Value::Object(out))
            }
            other => Err(TypeError::new(&other, &[ValueKind::Array, ValueKind::Object]).into()),
        }
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        aggregate_targets(ctx, &[self.target.as_ref(), self.test.as_ref()])
    }

    fn annotation(&self) -> String {
        "method filter".to_owned()
    }
}

/// `flatten()`: remove one level of array nesting.
struct FlattenMethod {
    target: Arc<dyn Function>,
}

impl Function for FlattenMethod {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        let items = expect_array(self.target.exec(ctx)?)?;
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Value::Array(nested) => out.extend(nested),
                other => out.push(other),
            }
        }
        Ok(Value::Array(out))
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        self.target.query_targets(ctx)
    }

    fn annotation(&self) -> String {
        "method flatten".to_owned()
    }
}

/// `fold(init, query)`: accumulate over an array. The query context is an
/// object with `tally` and `value` fields; the initial tally may itself be a
/// query.
struct FoldMethod {
    target: Arc<dyn Function>,
    init: ParamValue,
    step: Arc<dyn Function>,
}

impl Function for FoldMethod {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        let items = expect_array(self.target.exec(ctx)?)?;
        let mut tally = match &self.init {
            ParamValue::Literal(v) => v.clone(),
            ParamValue::Query(f) => f.exec(ctx).map_err(|e| {
                QueryError::message(format!("failed to extract tally initial value: {e}"))
            })?,
        };
        for item in items {
            let step_ctx = pair_object("tally", tally, item);
            tally = self.step.exec(ctx.with_value(&step_ctx))?;
        }
        Ok(tally)
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        match &self.init {
            ParamValue::Query(f) => {
                aggregate_targets(ctx, &[self.target.as_ref(), f.as_ref(), self.step.as_ref()])
            }
            ParamValue::Literal(_) => {
                aggregate_targets(ctx, &[self.target.as_ref(), self.step.as_ref()])
            }
        }
    }

    fn annotation(&self) -> String {
        "method fold".to_owned()
    }
}

/// `index(i)`: an element of an array or byte of a byte sequence; negative
/// indices count back from the end.
struct IndexMethod {
    target: Arc<dyn Function>,
    index: i64,
}

fn resolve_index(index: i64, len: usize) -> Result<usize, QueryError> {
    let i = if index < 0 {
        index + len as i64
    } else {
        index
    };
    if i < 0 || i >= len as i64 {
        return Err(QueryError::message(format!(
            "index '{i}' was out of bounds for array size: {len}"
        )));
    }
    Ok(i as usize)
}

impl Function for IndexMethod {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        match self.target.exec(ctx)? {
            Value::Array(items) => {
                let i = resolve_index(self.index, items.len())?;
                Ok(items[i].clone())
            }
            Value::Bytes(bytes) => {
                let i = resolve_index(self.index, bytes.len())?;
                Ok(Value::Number(Number::Int(bytes[i] as i64)))
            }
            other => Err(TypeError::new(&other, &[ValueKind::Array]).into()),
        }
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        self.target.query_targets(ctx)
    }

    fn annotation(&self) -> String {
        "method index".to_owned()
    }
}

/// `json_schema(schema)`: validate the value against a JSON schema, passing
/// it through unchanged on success.
struct JsonSchemaMethod {
    target: Arc<dyn Function>,
    schema: jsonschema::Validator,
}

impl Function for JsonSchemaMethod {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        let v = self.target.exec(ctx)?;
        let doc = v.to_json();
        let mut failures = Vec::new();
        for err in self.schema.iter_errors(&doc) {
            let field = err
                .instance_path
                .to_string()
                .trim_start_matches('/')
                .replace('/', ".");
            failures.push(format!("{field} {err}"));
        }
        if failures.is_empty() {
            Ok(v)
        } else {
            Err(QueryError::message(failures.join("\n")))
        }
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        self.target.query_targets(ctx)
    }

    fn annotation(&self) -> String {
        "method json_schema".to_owned()
    }
}

/// `keys()`: the keys of an object, sorted.
struct KeysMethod {
    target: Arc<dyn Function>,
}

impl Function for KeysMethod {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        let fields = expect_object(self.target.exec(ctx)?)?;
        let mut keys: Vec<String> = fields.into_keys().collect();
        keys.sort();
        Ok(Value::Array(keys.into_iter().map(Value::String).collect()))
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        self.target.query_targets(ctx)
    }

    fn annotation(&self) -> String {
        "method keys".to_owned()
    }
}

/// `key_values()`: `{key, value}` pairs of an object, in no particular order.
struct KeyValuesMethod {
    target: Arc<dyn Function>,
}

impl Function for KeyValuesMethod {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        let fields = expect_object(self.target.exec(ctx)?)?;
        let out = fields
            .into_iter()
            .map(|(k, v)| pair_object("key", Value::String(k), v))
            .collect();
        Ok(Value::Array(out))
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        self.target.query_targets(ctx)
    }

    fn annotation(&self) -> String {
        "method key_values".to_owned()
    }
}

/// `length()`: element or byte count.
struct LengthMethod {
    target: Arc<dyn Function>,
}

impl Function for LengthMethod {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        let len = match self.target.exec(ctx)? {
            Value::String(s) => s.len(),
            Value::Bytes(b) => b.len(),
            Value::Array(items) => items.len(),
            Value::Object(fields) => fields.len(),
            other => {
                return Err(TypeError::new(
                    &other,
                    &[ValueKind::String, ValueKind::Array, ValueKind::Object],
                )
                .into());
            }
        };
        Ok(Value::Number(Number::Int(len as i64)))
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        self.target.query_targets(ctx)
    }

    fn annotation(&self) -> String {
        "method length".to_owned()
    }
}

/// `map_each(query)`: replace each element (or object value) with the query
/// result. A `delete` result drops the element, `nothing` keeps the
/// original.
struct MapEachMethod {
    target: Arc<dyn Function>,
    query: Arc<dyn Function>,
}

impl Function for MapEachMethod {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        match self.target.exec(ctx)? {
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.into_iter().enumerate() {
                    let mapped = self.query.exec(ctx.with_value(&item)).map_err(|e| {
                        QueryError::message(format!(
                            "failed to process element {i}: {}",
                            err_from(e, self.query.as_ref())
                        ))
                    })?;
                    match mapped {
                        Value::Delete => {}
                        Value::Nothing => out.push(item),
                        other => out.push(other),
                    }
                }
                Ok(Value::Array(out))
            }
            Value::Object(fields) => {
                let mut out = HashMap::with_capacity(fields.len());
                for (k, v) in fields {
                    let item = pair_object("key", Value::String(k.clone()), v.clone());
                    let mapped = self.query.exec(ctx.with_value(&item)).map_err(|e| {
                        QueryError::message(format!(
                            "failed to process element {k}: {}",
                            err_from(e, self.query.as_ref())
                        ))
                    })?;
                    match mapped {
                        Value::Delete => {}
                        Value::Nothing => {
                            out.insert(k, v);
                        }
                        other => {
                            out.insert(k, other);
                        }
                    }
                }
                Ok(Value::Object(out))
            }
            other => Err(TypeError::new(&other, &[ValueKind::Array]).into()),
        }
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        aggregate_targets(ctx, &[self.target.as_ref(), self.query.as_ref()])
    }

    fn annotation(&self) -> String {
        "method map_each".to_owned()
    }
}

/// `map_each_key(query)`: replace each key of an object with the query
/// result, which must be a string. A `nothing` result keeps the original
/// key.
struct MapEachKeyMethod {
    target: Arc<dyn Function>,
    query: Arc<dyn Function>,
}

impl Function for MapEachKeyMethod {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        let fields = expect_object(self.target.exec(ctx)?)?;
        let mut out = HashMap::with_capacity(fields.len());
        for (k, v) in fields {
            let key_value = Value::String(k.clone());
            let mapped = self.query.exec(ctx.with_value(&key_value))?;
            match mapped {
                Value::Nothing => {
                    out.insert(k, v);
                }
                Value::String(new_key) => {
                    out.insert(new_key, v);
                }
                other => {
                    return Err(QueryError::message(format!(
                        "unexpected result from key mapping: {}",
                        QueryError::from(TypeError::new(&other, &[ValueKind::String]))
                    )));
                }
            }
        }
        Ok(Value::Object(out))
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        aggregate_targets(ctx, &[self.target.as_ref(), self.query.as_ref()])
    }

    fn annotation(&self) -> String {
        "method map_each_key".to_owned()
    }
}

/// `merge(with)`: concatenate arrays; deep-merge objects, turning key
/// collisions into arrays of both values.
struct MergeMethod {
    target: Arc<dyn Function>,
    with: Arc<dyn Function>,
}

fn merge_collide(existing: Value, incoming: Value) -> Value {
    let mut items = match existing {
        Value::Array(items) => items,
        other => vec![other],
    };
    match incoming {
        Value::Array(incoming) => items.extend(incoming),
        other => items.push(other),
    }
    Value::Array(items)
}

fn merge_objects(dest: &mut HashMap<String, Value>, src: HashMap<String, Value>) {
    for (k, v) in src {
        match dest.remove(&k) {
            None => {
                dest.insert(k, v);
            }
            Some(Value::Object(mut inner)) => {
                if let Value::Object(src_inner) = v {
                    merge_objects(&mut inner, src_inner);
                    dest.insert(k, Value::Object(inner));
                } else {
                    dest.insert(k, merge_collide(Value::Object(inner), v));
                }
            }
            Some(existing) => {
                dest.insert(k, merge_collide(existing, v));
            }
        }
    }
}

impl Function for MergeMethod {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        let into = self.target.exec(ctx)?;
        let from = self.with.exec(ctx)?;

        if let Value::Array(mut items) = into {
            match from {
                Value::Array(from) => items.extend(from),
                other => items.push(other),
            }
            return Ok(Value::Array(items));
        }
        let Value::Object(mut dest) = into else {
            return Err(err_from(
                TypeError::new(&into, &[ValueKind::Object, ValueKind::Array]).into(),
                self.target.as_ref(),
            ));
        };
        match from {
            Value::Object(src) => merge_objects(&mut dest, src),
            other => {
                return Err(err_from(
                    TypeError::new(&other, &[ValueKind::Object]).into(),
                    self.with.as_ref(),
                ));
            }
        }
        Ok(Value::Object(dest))
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        aggregate_targets(ctx, &[self.target.as_ref(), self.with.as_ref()])
    }

    fn annotation(&self) -> String {
        "method merge".to_owned()
    }
}

/// `not_empty()`: pass strings, arrays and objects through unless empty.
struct NotEmptyMethod {
    target: Arc<dyn Function>,
}

impl Function for NotEmptyMethod {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        let v = self.target.exec(ctx)?;
        let empty_msg = match &v {
            Value::String(s) => s.is_empty().then_some("string value is empty"),
            Value::Array(items) => items.is_empty().then_some("array value is empty"),
            Value::Object(fields) => fields.is_empty().then_some("object value is empty"),
            other => {
                return Err(TypeError::new(
                    other,
                    &[ValueKind::String, ValueKind::Array, ValueKind::Object],
                )
                .into());
            }
        };
        match empty_msg {
            Some(msg) => Err(QueryError::message(msg)),
            None => Ok(v),
        }
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        self.target.query_targets(ctx)
    }

    fn annotation(&self) -> String {
        "method not_empty".to_owned()
    }
}

/// `slice(low[,high])`: half-open range over strings, bytes or arrays.
/// Negative bounds offset from the end.
struct SliceMethod {
    target: Arc<dyn Function>,
    low: i64,
    high: Option<i64>,
}

impl SliceMethod {
    fn bounds(&self, len: i64) -> Result<(usize, usize), QueryError> {
        let mut high = len;
        if let Some(h) = self.high {
            high = if h < 0 { len + h } else { h };
        }
        high = high.clamp(0, len);
        let mut low = self.low;
        if low < 0 {
            low = (len + low).max(0);
        }
        if low > high {
            return Err(QueryError::message(format!(
                "lower slice bound {low} must be lower than or equal to upper bound ({high}) and target length ({len})"
            )));
        }
        Ok((low as usize, high as usize))
    }
}

impl Function for SliceMethod {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        match self.target.exec(ctx)? {
            Value::String(s) => {
                // Bounds are byte offsets, as for byte sequences.
                let (low, high) = self.bounds(s.len() as i64)?;
                Ok(Value::String(
                    String::from_utf8_lossy(&s.as_bytes()[low..high]).into_owned(),
                ))
            }
            Value::Bytes(b) => {
                let (low, high) = self.bounds(b.len() as i64)?;
                Ok(Value::Bytes(b[low..high].to_vec()))
            }
            Value::Array(items) => {
                let (low, high) = self.bounds(items.len() as i64)?;
                Ok(Value::Array(items[low..high].to_vec()))
            }
            other => Err(TypeError::new(&other, &[ValueKind::Array, ValueKind::String]).into()),
        }
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        self.target.query_targets(ctx)
    }

    fn annotation(&self) -> String {
        "method slice".to_owned()
    }
}

// Natural element ordering for sort/sort_by: numbers with numbers, strings
// (or bytes) with strings, nothing else.
fn natural_cmp(l: &Value, r: &Value, index: usize, label: &str) -> Result<Ordering, QueryError> {
    match l {
        Value::Number(a) => match r.as_number() {
            Ok(b) => Ok(a.partial_cmp(&b).unwrap_or(Ordering::Equal)),
            Err(e) => Err(QueryError::message(format!(
                "{label} element {index}: {}",
                QueryError::from(e)
            ))),
        },
        Value::String(_) | Value::Bytes(_) => {
            let a = l.coerce_string();
            match r {
                Value::String(_) | Value::Bytes(_) => Ok(a.cmp(&r.coerce_string())),
                other => Err(QueryError::message(format!(
                    "{label} element {index}: {}",
                    QueryError::from(TypeError::new(other, &[ValueKind::String]))
                ))),
            }
        }
        other => Err(QueryError::message(format!(
            "{label} element {index}: {}",
            QueryError::from(TypeError::new(other, &[ValueKind::Number, ValueKind::String]))
        ))),
    }
}

// Pre-compute a sortable key for every element, failing on the first
// non-orderable pair, then sort by the keys.
fn sort_by_keys(
    mut pairs: Vec<(Value, Value)>,
    label: &str,
) -> Result<Vec<Value>, QueryError> {
    for i in 1..pairs.len() {
        natural_cmp(&pairs[i - 1].0, &pairs[i].0, i, label)?;
    }
    let mut failure = None;
    pairs.sort_by(|a, b| match natural_cmp(&a.0, &b.0, 0, label) {
        Ok(ord) => ord,
        Err(e) => {
            failure.get_or_insert(e);
            Ordering::Equal
        }
    });
    match failure {
        Some(e) => Err(e),
        None => Ok(pairs.into_iter().map(|(_, v)| v).collect()),
    }
}

/// `sort([compare])`: ascending sort of numbers or strings, or a custom
/// comparison query over `{left, right}` returning whether left < right.
struct SortMethod {
    target: Arc<dyn Function>,
    compare: Option<Arc<dyn Function>>,
}

fn sort_with_query(
    ctx: FunctionContext<'_>,
    values: Vec<Value>,
    compare: &Arc<dyn Function>,
) -> Result<Vec<Value>, QueryError> {
    let less = |a: &Value, b: &Value| -> Result<bool, QueryError> {
        let mut fields = HashMap::with_capacity(2);
        fields.insert("left".to_owned(), a.clone());
        fields.insert("right".to_owned(), b.clone());
        let pair = Value::Object(fields);
        let res = compare.exec(ctx.with_value(&pair))?;
        res.as_bool().map_err(|e| {
            QueryError::from(e).at("sort argument")
        })
    };
    let mut failure: Option<QueryError> = None;
    let mut values = values;
    values.sort_by(|a, b| {
        if failure.is_some() {
            return Ordering::Equal;
        }
        match less(a, b) {
            Ok(true) => Ordering::Less,
            Ok(false) => match less(b, a) {
                Ok(true) => Ordering::Greater,
                Ok(false) => Ordering::Equal,
                Err(e) => {
                    failure = Some(e);
                    Ordering::Equal
                }
            },
            Err(e) => {
                failure = Some(e);
                Ordering::Equal
            }
        }
    });
    match failure {
        Some(e) => Err(e),
        None => Ok(values),
    }
}

impl Function for SortMethod {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        let v = self.target.exec(ctx)?;
        let Value::Array(items) = v else {
            return Err(err_from(
                TypeError::new(&v, &[ValueKind::Array]).into(),
                self.target.as_ref(),
            ));
        };
        let sorted = match &self.compare {
            Some(compare) => sort_with_query(ctx, items, compare)?,
            None => {
                let pairs = items.into_iter().map(|v| (v.clone(), v)).collect();
                sort_by_keys(pairs, "sort")?
            }
        };
        Ok(Value::Array(sorted))
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        match &self.compare {
            Some(compare) => aggregate_targets(ctx, &[self.target.as_ref(), compare.as_ref()]),
            None => self.target.query_targets(ctx),
        }
    }

    fn annotation(&self) -> String {
        "method sort".to_owned()
    }
}

/// `sort_by(query)`: ascending sort by a value emitted per element.
struct SortByMethod {
    target: Arc<dyn Function>,
    key: Arc<dyn Function>,
}

impl Function for SortByMethod {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        let v = self.target.exec(ctx)?;
        let Value::Array(items) = v else {
            return Err(err_from(
                TypeError::new(&v, &[ValueKind::Array]).into(),
                self.target.as_ref(),
            ));
        };
        let mut pairs = Vec::with_capacity(items.len());
        for (i, item) in items.into_iter().enumerate() {
            let key = self.key.exec(ctx.with_value(&item)).map_err(|e| {
                QueryError::message(format!(
                    "sort_by element {i}: {}",
                    err_from(e, self.key.as_ref())
                ))
            })?;
            pairs.push((key, item));
        }
        Ok(Value::Array(sort_by_keys(pairs, "sort_by")?))
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        aggregate_targets(ctx, &[self.target.as_ref(), self.key.as_ref()])
    }

    fn annotation(&self) -> String {
        "method sort_by".to_owned()
    }
}

/// `sum()`: sum the numeric elements of an array as a float. A number target
/// passes through unchanged.
struct SumMethod {
    target: Arc<dyn Function>,
}

impl Function for SumMethod {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        let v = self.target.exec(ctx)?;
        match &v {
            Value::Number(_) => Ok(v),
            Value::Array(items) => {
                let mut total = 0.0;
                for (i, item) in items.iter().enumerate() {
                    let n = item.as_number().map_err(|e| {
                        QueryError::message(format!("index {i}: {}", QueryError::from(e)))
                    })?;
                    total += n.as_f64();
                }
                Ok(Value::from(total))
            }
            other => Err(err_from(
                TypeError::new(other, &[ValueKind::Array]).into(),
                self.target.as_ref(),
            )),
        }
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        self.target.query_targets(ctx)
    }

    fn annotation(&self) -> String {
        "method sum".to_owned()
    }
}

/// `unique([emit])`: drop duplicate elements, preserving first occurrence.
/// Numbers dedupe by numeric value, strings separately; an optional query
/// selects the comparison key.
struct UniqueMethod {
    target: Arc<dyn Function>,
    emit: Option<Arc<dyn Function>>,
}

impl Function for UniqueMethod {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        let items = expect_array(self.target.exec(ctx)?)?;
        let mut seen_strings: HashSet<String> = HashSet::new();
        let mut seen_numbers: HashSet<OrdF64> = HashSet::new();
        let mut out = Vec::with_capacity(items.len());
        for (i, item) in items.into_iter().enumerate() {
            let check = match &self.emit {
                Some(emit) => emit.exec(ctx.with_value(&item)).map_err(|e| {
                    QueryError::message(format!("index {i}: {e}"))
                })?,
                None => item.clone(),
            };
            let fresh = match &check {
                Value::String(s) => seen_strings.insert(s.clone()),
                Value::Bytes(b) => seen_strings.insert(String::from_utf8_lossy(b).into_owned()),
                Value::Number(n) => seen_numbers.insert(OrdF64(n.as_f64())),
                other => {
                    return Err(QueryError::message(format!(
                        "index {i}: {}",
                        QueryError::from(TypeError::new(
                            other,
                            &[ValueKind::String, ValueKind::Number]
                        ))
                    )));
                }
            };
            if fresh {
                out.push(item);
            }
        }
        Ok(Value::Array(out))
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        match &self.emit {
            Some(emit) => aggregate_targets(ctx, &[self.target.as_ref(), emit.as_ref()]),
            None => self.target.query_targets(ctx),
        }
    }

    fn annotation(&self) -> String {
        "method unique".to_owned()
    }
}

/// `values()`: the values of an object, in no particular order.
struct ValuesMethod {
    target: Arc<dyn Function>,
}

impl Function for ValuesMethod {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        let fields = expect_object(self.target.exec(ctx)?)?;
        Ok(Value::Array(fields.into_values().collect()))
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        self.target.query_targets(ctx)
    }

    fn annotation(&self) -> String {
        "method values".to_owned()
    }
}

/// `without(paths...)`: a copy of an object with the given dot paths
/// removed. Keys along a path that are not objects are retained untouched.
struct WithoutMethod {
    target: Arc<dyn Function>,
    paths: Vec<Vec<String>>,
}

fn object_without(
    fields: HashMap<String, Value>,
    paths: &[Vec<String>],
) -> HashMap<String, Value> {
    let mut out = HashMap::with_capacity(fields.len());
    for (k, v) in fields {
        let mut excluded = false;
        let mut nested: Vec<Vec<String>> = Vec::new();
        for p in paths {
            if p[0] == k {
                if p.len() > 1 {
                    nested.push(p[1..].to_vec());
                } else {
                    excluded = true;
                }
            }
        }
        if excluded {
            continue;
        }
        if !nested.is_empty()
            && let Value::Object(inner) = v
        {
            out.insert(k, Value::Object(object_without(inner, &nested)));
            continue;
        }
        out.insert(k, v);
    }
    out
}

impl Function for WithoutMethod {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        let fields = expect_object(self.target.exec(ctx)?)?;
        Ok(Value::Object(object_without(fields, &self.paths)))
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        self.target.query_targets(ctx)
    }

    fn annotation(&self) -> String {
        "method without".to_owned()
    }
}

fn literal_args(args: &crate::query::params::ParsedParams) -> Result<Vec<Value>, QueryError> {
    args.raw()
        .map(|v| match v {
            ParamValue::Literal(v) => Ok(v.clone()),
            ParamValue::Query(_) => Err(QueryError::message("expected value argument")),
        })
        .collect()
}

pub(crate) fn register_all(set: &mut MethodSet) -> Result<(), QueryError> {
    set.add(
        MethodSpec::new(
            "all",
            "Check each element of an array against a query, returning true only when every element passes. Empty arrays return false.",
        )
        .in_category(Category::ObjectAndArray)
        .with_params(Params::new().add(ParamSpec::query("test", "A test query applied to each element."))),
        Arc::new(|target, args| {
            let test = args.field_query("test")?;
            Ok(Arc::new(ElementTestMethod { target, test, require_all: true }))
        }),
    )?;

    set.add(
        MethodSpec::new(
            "any",
            "Check the elements of an array against a query, returning true when any element passes. Empty arrays return false.",
        )
        .in_category(Category::ObjectAndArray)
        .with_params(Params::new().add(ParamSpec::query("test", "A test query applied to each element."))),
        Arc::new(|target, args| {
            let test = args.field_query("test")?;
            Ok(Arc::new(ElementTestMethod { target, test, require_all: false }))
        }),
    )?;

    set.add(
        MethodSpec::new("append", "An array with new elements added to the end.")
            .in_category(Category::ObjectAndArray)
            .with_params(Params::variadic()),
        Arc::new(|target, args| {
            let extra = literal_args(&args)?;
            Ok(Arc::new(AppendMethod { target, extra }))
        }),
    )?;

    set.add(
        MethodSpec::new(
            "collapse",
            "Collapse an array or object into an object of key/value pairs, where each key is the dot path of the field. Empty containers are dropped unless the optional argument is set.",
        )
        .in_category(Category::ObjectAndArray)
        .with_params(
            Params::new().add(
                ParamSpec::bool("include_empty", "Keep empty objects and arrays.").with_default(false),
            ),
        ),
        Arc::new(|target, args| {
            let include_empty = args.field_optional_bool("include_empty")?.unwrap_or(false);
            Ok(Arc::new(CollapseMethod { target, include_empty }))
        }),
    )?;

    set.add(
        MethodSpec::new(
            "contains",
            "Whether a string contains a substring, or an array or object contains a matching element. Numeric matches ignore representation type.",
        )
        .in_category(Category::ObjectAndArray)
        .with_params(Params::new().add(ParamSpec::any("value", "The value to search for.").eager())),
        Arc::new(|target, args| {
            let operand = match args.field_any("value")? {
                ParamValue::Literal(v) => v,
                ParamValue::Query(_) => return Err(QueryError::message("expected value argument")),
            };
            Ok(Arc::new(ContainsMethod { target, operand }))
        }),
    )?;

    set.add(
        MethodSpec::new(
            "enumerated",
            "An array of objects with index and value fields for each element.",
        )
        .in_category(Category::ObjectAndArray),
        Arc::new(|target, _| Ok(Arc::new(EnumeratedMethod { target }))),
    )?;

    set.add(
        MethodSpec::new("exists", "Whether a dot path exists in an object.").with_params(
            Params::new().add(ParamSpec::string("path", "The dot path to check.")),
        ),
        Arc::new(|target, args| {
            let argument = path::parse(&args.field_string("path")?);
            Ok(Arc::new(ExistsMethod { target, argument }))
        }),
    )?;

    set.add(
        MethodSpec::new("explode", "Explode an array or object at a dot path.")
            .in_category(Category::ObjectAndArray)
            .with_params(Params::new().add(ParamSpec::string("path", "The dot path to explode."))),
        Arc::new(|target, args| {
            let path_raw = args.field_string("path")?;
            let argument = path::parse(&path_raw);
            Ok(Arc::new(ExplodeMethod { target, path_raw, argument }))
        }),
    )?;

    set.add(
        MethodSpec::new(
            "filter",
            "Keep the elements of an array, or key/value pairs of an object, for which a query returns true. On objects the query context has key and value fields.",
        )
        .in_category(Category::ObjectAndArray)
        .with_params(Params::new().add(ParamSpec::query("test", "A test query applied to each item."))),
        Arc::new(|target, args| {
            let test = args.field_query("test")?;
            Ok(Arc::new(FilterMethod { target, test }))
        }),
    )?;

    set.add(
        MethodSpec::new(
            "flatten",
            "Remove one level of array nesting, inserting the elements of nested arrays directly.",
        )
        .in_category(Category::ObjectAndArray),
        Arc::new(|target, _| Ok(Arc::new(FlattenMethod { target }))),
    )?;

    set.add(
        MethodSpec::new(
            "fold",
            "Accumulate over an array. The query context has tally and value fields; the first argument is the initial tally.",
        )
        .in_category(Category::ObjectAndArray)
        .with_params(
            Params::new()
                .add(ParamSpec::any("init", "The initial tally value."))
                .add(ParamSpec::query("query", "The accumulation query.")),
        ),
        Arc::new(|target, args| {
            let init = args.field_any("init")?;
            let step = args.field_query("query")?;
            Ok(Arc::new(FoldMethod { target, init, step }))
        }),
    )?;

    set.add(
        MethodSpec::new(
            "index",
            "An element of an array by index. Negative indices count back from the end. On byte sequences the selected byte is returned as an integer.",
        )
        .in_category(Category::ObjectAndArray)
        .with_params(Params::new().add(ParamSpec::int("index", "The element index."))),
        Arc::new(|target, args| {
            let index = args.field_i64("index")?;
            Ok(Arc::new(IndexMethod { target, index }))
        }),
    )?;

    set.add(
        MethodSpec::new(
            "json_schema",
            "Validate the value against a JSON schema, returning it unchanged on success.",
        )
        .in_category(Category::ObjectAndArray)
        .beta()
        .with_params(Params::new().add(ParamSpec::string("schema", "The schema document."))),
        Arc::new(|target, args| {
            let raw = args.field_string("schema")?;
            let doc: serde_json::Value = serde_json::from_str(&raw).map_err(|e| {
                QueryError::message(format!("failed to parse json schema definition: {e}"))
            })?;
            let schema = jsonschema::validator_for(&doc).map_err(|e| {
                QueryError::message(format!("failed to parse json schema definition: {e}"))
            })?;
            Ok(Arc::new(JsonSchemaMethod { target, schema }))
        }),
    )?;

    set.add(
        MethodSpec::new("keys", "The keys of an object as a sorted array.")
            .in_category(Category::ObjectAndArray),
        Arc::new(|target, _| Ok(Arc::new(KeysMethod { target }))),
    )?;

    set.add(
        MethodSpec::new(
            "key_values",
            "The key/value pairs of an object as an array of objects with key and value fields. Order is not specified.",
        )
        .in_category(Category::ObjectAndArray),
        Arc::new(|target, _| Ok(Arc::new(KeyValuesMethod { target }))),
    )?;

    set.add(
        MethodSpec::new(
            "length",
            "The length of a string, byte sequence, array or object.",
        ),
        Arc::new(|target, _| Ok(Arc::new(LengthMethod { target }))),
    )?;

    set.add(
        MethodSpec::new(
            "map_each",
            "Apply a query to each element of an array, or value of an object, replacing it with the result. A delete result drops the element, a nothing result keeps the original.",
        )
        .in_category(Category::ObjectAndArray)
        .with_params(Params::new().add(ParamSpec::query("query", "The query applied to each item."))),
        Arc::new(|target, args| {
            let query = args.field_query("query")?;
            Ok(Arc::new(MapEachMethod { target, query }))
        }),
    )?;

    set.add(
        MethodSpec::new(
            "map_each_key",
            "Apply a query to each key of an object, replacing it with the result, which must be a string.",
        )
        .in_category(Category::ObjectAndArray)
        .with_params(Params::new().add(ParamSpec::query("query", "The query applied to each key."))),
        Arc::new(|target, args| {
            let query = args.field_query("query")?;
            Ok(Arc::new(MapEachKeyMethod { target, query }))
        }),
    )?;

    set.add(
        MethodSpec::new(
            "merge",
            "Merge a source object into the target object. Colliding non-object keys produce an array of both values, with existing arrays expanded.",
        )
        .in_category(Category::ObjectAndArray)
        .with_params(Params::new().add(ParamSpec::query("with", "The value to merge in."))),
        Arc::new(|target, args| {
            let with = args.field_query("with")?;
            Ok(Arc::new(MergeMethod { target, with }))
        }),
    )?;

    set.add(
        MethodSpec::new(
            "not_empty",
            "Ensure that a string, array or object is not empty, returning it unchanged if so.",
        )
        .in_category(Category::Coercion),
        Arc::new(|target, _| Ok(Arc::new(NotEmptyMethod { target }))),
    )?;

    set.add(
        MethodSpec::new(
            "slice",
            "Extract a half-open range from a string, byte sequence or array. Negative bounds offset from the end; the upper bound defaults to the length.",
        )
        .with_params(
            Params::new()
                .add(ParamSpec::int("low", "The inclusive lower bound."))
                .add(ParamSpec::int("high", "The exclusive upper bound.").optional()),
        ),
        Arc::new(|target, args| {
            let low = args.field_i64("low")?;
            let high = args.field_optional_i64("high")?;
            if let Some(h) = high
                && h > 0
                && low >= h
            {
                return Err(QueryError::message(format!(
                    "lower slice bound {low} must be lower than upper ({h})"
                )));
            }
            Ok(Arc::new(SliceMethod { target, low, high }))
        }),
    )?;

    set.add(
        MethodSpec::new(
            "sort",
            "Sort the elements of an array in increasing order. All elements must be numbers, or all strings. An optional comparison query receives left and right fields and returns whether left is less than right.",
        )
        .in_category(Category::ObjectAndArray)
        .with_params(
            Params::new().add(ParamSpec::query("compare", "A custom comparison query.").optional()),
        ),
        Arc::new(|target, args| {
            let compare = args.field_optional_query("compare")?;
            Ok(Arc::new(SortMethod { target, compare }))
        }),
    )?;

    set.add(
        MethodSpec::new(
            "sort_by",
            "Sort the elements of an array, in increasing order, by a value emitted by a query applied to each element.",
        )
        .in_category(Category::ObjectAndArray)
        .with_params(Params::new().add(ParamSpec::query("query", "The key query."))),
        Arc::new(|target, args| {
            let key = args.field_query("query")?;
            Ok(Arc::new(SortByMethod { target, key }))
        }),
    )?;

    set.add(
        MethodSpec::new("sum", "Sum the numerical values of an array.")
            .in_category(Category::ObjectAndArray),
        Arc::new(|target, _| Ok(Arc::new(SumMethod { target }))),
    )?;

    set.add(
        MethodSpec::new(
            "unique",
            "Remove duplicate values from an array, preserving first occurrences. Numbers and strings are checked separately; an optional query selects the comparison key.",
        )
        .in_category(Category::ObjectAndArray)
        .with_params(
            Params::new().add(ParamSpec::query("emit", "A query emitting the comparison key.").optional()),
        ),
        Arc::new(|target, args| {
            let emit = args.field_optional_query("emit")?;
            Ok(Arc::new(UniqueMethod { target, emit }))
        }),
    )?;

    set.add(
        MethodSpec::new(
            "values",
            "The values of an object as an array. Order is not specified.",
        )
        .in_category(Category::ObjectAndArray),
        Arc::new(|target, _| Ok(Arc::new(ValuesMethod { target }))),
    )?;

    set.add(
        MethodSpec::new(
            "without",
            "A copy of an object with one or more dot paths removed. Keys along a path that are not objects are retained.",
        )
        .in_category(Category::ObjectAndArray)
        .with_params(Params::variadic()),
        Arc::new(|target, args| {
            let mut paths = Vec::new();
            for v in literal_args(&args)? {
                match v {
                    Value::String(s) => paths.push(path::parse(&s)),
                    other => {
                        return Err(QueryError::from(TypeError::new(
                            &other,
                            &[ValueKind::String],
                        )));
                    }
                }
            }
            Ok(Arc::new(WithoutMethod { target, paths }))
        }),
    )?;

    Ok(())
}
