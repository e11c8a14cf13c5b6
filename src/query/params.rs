//! Parameter declaration, positional binding, and deferred arguments.
//!
//! A function or method spec declares an ordered list of named parameters,
//! each with a kind and optionally a default. Positional argument values are
//! bound and kind-checked by [`Params::populate_nameless`]. An argument may
//! itself be a query: query-kinded parameters keep it for the constructor to
//! evaluate per element, while any other kind marks the argument *dynamic* —
//! the registry wraps the constructor so each execution first resolves the
//! query against the runtime context, then re-constructs and runs the inner
//! function.

use crate::query::error::{NAME_PATTERN, QueryError};
use crate::query::function::{Function, FunctionContext, Literal};
use crate::value::{Value, ValueKind};
use std::collections::HashSet;
use std::sync::Arc;

/// The declared kind of a parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Int,
    Float,
    Bool,
    Query,
    Any,
}

/// A positional argument value: either a literal or a query to be evaluated
/// later.
#[derive(Clone, Debug)]
pub enum ParamValue {
    Literal(Value),
    Query(Arc<dyn Function>),
}

impl From<Value> for ParamValue {
    fn from(v: Value) -> Self {
        ParamValue::Literal(v)
    }
}

impl From<Arc<dyn Function>> for ParamValue {
    fn from(f: Arc<dyn Function>) -> Self {
        ParamValue::Query(f)
    }
}

/// A single declared parameter.
#[derive(Clone, Debug)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub description: String,
    default: Option<Value>,
    optional: bool,
    eager: bool,
}

impl ParamSpec {
    fn new(name: &str, kind: ParamKind, description: &str) -> Self {
        ParamSpec {
            name: name.to_owned(),
            kind,
            description: description.to_owned(),
            default: None,
            optional: false,
            eager: false,
        }
    }

    pub fn string(name: &str, description: &str) -> Self {
        Self::new(name, ParamKind::String, description)
    }

    pub fn int(name: &str, description: &str) -> Self {
        Self::new(name, ParamKind::Int, description)
    }

    pub fn float(name: &str, description: &str) -> Self {
        Self::new(name, ParamKind::Float, description)
    }

    pub fn bool(name: &str, description: &str) -> Self {
        Self::new(name, ParamKind::Bool, description)
    }

    pub fn query(name: &str, description: &str) -> Self {
        Self::new(name, ParamKind::Query, description)
    }

    pub fn any(name: &str, description: &str) -> Self {
        Self::new(name, ParamKind::Any, description)
    }

    pub fn with_default(mut self, v: impl Into<Value>) -> Self {
        self.default = Some(v.into());
        self
    }

    /// The parameter may be omitted without a default standing in.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// An any-kinded parameter that wants query arguments resolved to values
    /// before construction, rather than handed over as functions.
    pub fn eager(mut self) -> Self {
        self.eager = true;
        self
    }

    fn coerce(&self, value: Value) -> Result<Value, QueryError> {
        let mismatch = |expected: &[ValueKind], v: &Value| {
            QueryError::from(crate::value::TypeError::new(v, expected))
                .at(format!("param '{}'", self.name))
        };
        match self.kind {
            ParamKind::String => match value {
                Value::String(_) => Ok(value),
                other => Err(mismatch(&[ValueKind::String], &other)),
            },
            ParamKind::Int => match value.as_number() {
                Ok(n) if !n.is_float() => Ok(Value::from(n.as_i64())),
                Ok(n) if n.as_f64().fract() == 0.0 => Ok(Value::from(n.as_f64() as i64)),
                Ok(_) => Err(QueryError::message(format!(
                    "param '{}': expected integer value, found a fractional number",
                    self.name
                ))),
                Err(_) => Err(mismatch(&[ValueKind::Number], &value)),
            },
            ParamKind::Float => match value.as_number() {
                Ok(n) => Ok(Value::from(n.as_f64())),
                Err(_) => Err(mismatch(&[ValueKind::Number], &value)),
            },
            ParamKind::Bool => match value {
                Value::Bool(_) => Ok(value),
                other => Err(mismatch(&[ValueKind::Bool], &other)),
            },
            ParamKind::Query | ParamKind::Any => Ok(value),
        }
    }
}

/// The full parameter declaration of a function or method.
#[derive(Clone, Default, Debug)]
pub struct Params {
    defs: Vec<ParamSpec>,
    variadic: bool,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// A declaration accepting any number of untyped arguments.
    pub fn variadic() -> Self {
        Params {
            defs: Vec::new(),
            variadic: true,
        }
    }

    pub fn add(mut self, spec: ParamSpec) -> Self {
        self.defs.push(spec);
        self
    }

    pub fn is_variadic(&self) -> bool {
        self.variadic
    }

    pub fn definitions(&self) -> &[ParamSpec] {
        &self.defs
    }

    /// Check the declaration itself: parameter names follow the registry name
    /// rule and are unique, and nothing is declared alongside variadic mode.
    pub fn validate(&self) -> Result<(), QueryError> {
        if self.variadic && !self.defs.is_empty() {
            return Err(QueryError::message(
                "a variadic parameter spec cannot declare named parameters",
            ));
        }
        let mut seen = HashSet::new();
        for def in &self.defs {
            if !crate::query::registry::valid_name(&def.name) {
                return Err(QueryError::BadName {
                    kind: "parameter",
                    name: def.name.clone(),
                    pattern: NAME_PATTERN,
                });
            }
            if !seen.insert(def.name.as_str()) {
                return Err(QueryError::ConflictingName {
                    kind: "parameter",
                    name: def.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Bind positional arguments to the declared parameters in order,
    /// coercing literals to the declared kinds. Query values are held for
    /// deferred resolution.
    pub fn populate_nameless(
        &self,
        args: Vec<ParamValue>,
    ) -> Result<ParsedParams, QueryError> {
        if self.variadic {
            return Ok(ParsedParams {
                params: self.clone(),
                values: args.into_iter().map(Some).collect(),
            });
        }
        if args.len() > self.defs.len() {
            return Err(QueryError::message(format!(
                "expected at most {} arguments, received {}",
                self.defs.len(),
                args.len()
            )));
        }
        let mut args = args.into_iter();
        let mut values = Vec::with_capacity(self.defs.len());
        for def in &self.defs {
            match args.next() {
                Some(ParamValue::Literal(v)) => {
                    values.push(Some(ParamValue::Literal(def.coerce(v)?)));
                }
                Some(q @ ParamValue::Query(_)) => values.push(Some(q)),
                None => match (&def.default, def.optional) {
                    (Some(d), _) => values.push(Some(ParamValue::Literal(d.clone()))),
                    (None, true) => values.push(None),
                    (None, false) => {
                        return Err(QueryError::message(format!(
                            "required parameter '{}' was not set",
                            def.name
                        )));
                    }
                },
            }
        }
        Ok(ParsedParams {
            params: self.clone(),
            values,
        })
    }
}

/// Arguments bound to a declaration, ready for a constructor.
#[derive(Clone, Debug)]
pub struct ParsedParams {
    params: Params,
    values: Vec<Option<ParamValue>>,
}

impl ParsedParams {
    /// Bound values in declaration order, skipping omitted optionals. For
    /// variadic declarations this is the full argument list.
    pub fn raw(&self) -> impl Iterator<Item = &ParamValue> {
        self.values.iter().flatten()
    }

    fn index_of(&self, name: &str) -> Result<usize, QueryError> {
        self.params
            .defs
            .iter()
            .position(|d| d.name == name)
            .ok_or_else(|| QueryError::message(format!("unknown parameter '{name}'")))
    }

    fn literal(&self, name: &str) -> Result<Option<&Value>, QueryError> {
        let idx = self.index_of(name)?;
        match &self.values[idx] {
            None => Ok(None),
            Some(ParamValue::Literal(v)) => Ok(Some(v)),
            Some(ParamValue::Query(_)) => Err(QueryError::message(format!(
                "parameter '{name}' holds an unresolved query"
            ))),
        }
    }

    pub fn field_string(&self, name: &str) -> Result<String, QueryError> {
        match self.literal(name)? {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(v) => Err(QueryError::from(crate::value::TypeError::new(
                v,
                &[ValueKind::String],
            ))),
            None => Err(QueryError::message(format!("parameter '{name}' not set"))),
        }
    }

    pub fn field_optional_string(&self, name: &str) -> Result<Option<String>, QueryError> {
        match self.literal(name)? {
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(v) => Err(QueryError::from(crate::value::TypeError::new(
                v,
                &[ValueKind::String],
            ))),
            None => Ok(None),
        }
    }

    pub fn field_i64(&self, name: &str) -> Result<i64, QueryError> {
        match self.literal(name)? {
            Some(v) => Ok(v.as_number()?.as_i64()),
            None => Err(QueryError::message(format!("parameter '{name}' not set"))),
        }
    }

    pub fn field_optional_i64(&self, name: &str) -> Result<Option<i64>, QueryError> {
        match self.literal(name)? {
            Some(v) => Ok(Some(v.as_number()?.as_i64())),
            None => Ok(None),
        }
    }

    pub fn field_optional_f64(&self, name: &str) -> Result<Option<f64>, QueryError> {
        match self.literal(name)? {
            Some(v) => Ok(Some(v.as_number()?.as_f64())),
            None => Ok(None),
        }
    }

    pub fn field_optional_bool(&self, name: &str) -> Result<Option<bool>, QueryError> {
        match self.literal(name)? {
            Some(v) => Ok(Some(v.as_bool()?)),
            None => Ok(None),
        }
    }

    /// A query-kinded parameter, wrapping a bound literal as a constant.
    pub fn field_query(&self, name: &str) -> Result<Arc<dyn Function>, QueryError> {
        let idx = self.index_of(name)?;
        match &self.values[idx] {
            Some(ParamValue::Query(f)) => Ok(Arc::clone(f)),
            Some(ParamValue::Literal(v)) => Ok(Arc::new(Literal::new(v.clone()))),
            None => Err(QueryError::message(format!("parameter '{name}' not set"))),
        }
    }

    pub fn field_optional_query(&self, name: &str) -> Result<Option<Arc<dyn Function>>, QueryError> {
        let idx = self.index_of(name)?;
        match &self.values[idx] {
            Some(ParamValue::Query(f)) => Ok(Some(Arc::clone(f))),
            Some(ParamValue::Literal(v)) => Ok(Some(Arc::new(Literal::new(v.clone())))),
            None => Ok(None),
        }
    }

    /// An any-kinded parameter as bound, without coercion.
    pub fn field_any(&self, name: &str) -> Result<ParamValue, QueryError> {
        let idx = self.index_of(name)?;
        self.values[idx]
            .clone()
            .ok_or_else(|| QueryError::message(format!("parameter '{name}' not set")))
    }

    fn is_dynamic_slot(&self, i: usize) -> bool {
        if self.params.variadic {
            return true;
        }
        match self.params.defs[i].kind {
            ParamKind::Query => false,
            ParamKind::Any => self.params.defs[i].eager,
            _ => true,
        }
    }

    /// Query values bound to parameters that expect materialised arguments.
    /// Query-kinded parameters are excluded (the constructor consumes those
    /// as functions), as are any-kinded parameters not marked eager
    /// (constructors handle those case by case).
    pub fn dynamic(&self) -> Vec<Arc<dyn Function>> {
        let mut out = Vec::new();
        for (i, value) in self.values.iter().enumerate() {
            let Some(ParamValue::Query(f)) = value else {
                continue;
            };
            if self.is_dynamic_slot(i) {
                out.push(Arc::clone(f));
            }
        }
        out
    }

    /// Execute every dynamic argument against a runtime context, producing a
    /// fully materialised copy of these parameters.
    pub fn resolve_dynamic(&self, ctx: FunctionContext<'_>) -> Result<ParsedParams, QueryError> {
        let mut values = Vec::with_capacity(self.values.len());
        for (i, value) in self.values.iter().enumerate() {
            let resolved = match value {
                Some(ParamValue::Query(f)) if self.is_dynamic_slot(i) => {
                    let v = f.exec(ctx)?;
                    let v = if self.params.variadic {
                        v
                    } else {
                        self.params.defs[i].coerce(v)?
                    };
                    Some(ParamValue::Literal(v))
                }
                other => other.clone(),
            };
            values.push(resolved);
        }
        Ok(ParsedParams {
            params: self.params.clone(),
            values,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::function::FieldFunction;

    #[test]
    fn positional_binding_applies_defaults() {
        let params = Params::new()
            .add(ParamSpec::string("path", ""))
            .add(ParamSpec::bool("strict", "").with_default(false));
        let parsed = params
            .populate_nameless(vec![Value::from("foo.bar").into()])
            .unwrap();
        assert_eq!(parsed.field_string("path").unwrap(), "foo.bar");
        assert_eq!(parsed.field_optional_bool("strict").unwrap(), Some(false));
    }

    #[test]
    fn integral_floats_bind_to_int_params() {
        let params = Params::new().add(ParamSpec::int("n", ""));
        let parsed = params.populate_nameless(vec![Value::from(3.0).into()]).unwrap();
        assert_eq!(parsed.field_i64("n").unwrap(), 3);
        assert!(
            params
                .populate_nameless(vec![Value::from(3.5).into()])
                .is_err()
        );
    }

    #[test]
    fn missing_required_parameter_is_an_error() {
        let params = Params::new().add(ParamSpec::string("path", ""));
        let err = params.populate_nameless(vec![]).unwrap_err();
        assert_eq!(err.to_string(), "required parameter 'path' was not set");
    }

    #[test]
    fn queries_to_typed_params_are_dynamic() {
        let params = Params::new().add(ParamSpec::string("path", ""));
        let field: Arc<dyn Function> = Arc::new(FieldFunction::new("target"));
        let parsed = params.populate_nameless(vec![field.into()]).unwrap();
        assert_eq!(parsed.dynamic().len(), 1);

        let params = Params::new().add(ParamSpec::query("test", ""));
        let field: Arc<dyn Function> = Arc::new(FieldFunction::new("target"));
        let parsed = params.populate_nameless(vec![field.into()]).unwrap();
        assert!(parsed.dynamic().is_empty());
    }

    #[test]
    fn duplicate_parameter_names_rejected() {
        let params = Params::new()
            .add(ParamSpec::string("a", ""))
            .add(ParamSpec::string("a", ""));
        assert!(params.validate().is_err());
    }
}
