//! Name-addressed catalogs of functions and methods.
//!
//! The two global registries are built once at startup and are read-only
//! afterwards; the filtering operations (`without`, `only_pure`,
//! `no_message`) clone the catalog so callers can restrict it in isolation.
//! Constructors are reference-counted, so a clone is cheap.

use crate::query::error::{NAME_PATTERN, QueryError};
use crate::query::function::{Function, FunctionContext, aggregate_targets};
use crate::query::params::{ParamValue, Params, ParsedParams};
use crate::query::target::{TargetPath, TargetsContext};
use crate::value::Value;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

static NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(NAME_PATTERN).expect("name pattern compiles"));

pub(crate) fn valid_name(name: &str) -> bool {
    NAME_REGEX.is_match(name)
}

/// The documentation category of a registered function or method.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Category {
    General,
    Message,
    Coercion,
    ObjectAndArray,
    Strings,
    Timestamp,
}

/// Documentation and declaration of a registered function.
#[derive(Clone)]
pub struct FunctionSpec {
    pub name: String,
    pub category: Category,
    pub impure: bool,
    pub beta: bool,
    pub description: String,
    pub params: Params,
}

impl FunctionSpec {
    pub fn new(name: &str, description: &str) -> Self {
        FunctionSpec {
            name: name.to_owned(),
            category: Category::General,
            impure: false,
            beta: false,
            description: description.to_owned(),
            params: Params::new(),
        }
    }

    pub fn in_category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    pub fn impure(mut self) -> Self {
        self.impure = true;
        self
    }

    pub fn beta(mut self) -> Self {
        self.beta = true;
        self
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }
}

/// Documentation and declaration of a registered method. Structurally the
/// same as a function spec; methods additionally receive an implicit target.
pub type MethodSpec = FunctionSpec;

pub type FunctionCtor =
    Arc<dyn Fn(ParsedParams) -> Result<Arc<dyn Function>, QueryError> + Send + Sync>;
pub type MethodCtor = Arc<
    dyn Fn(Arc<dyn Function>, ParsedParams) -> Result<Arc<dyn Function>, QueryError> + Send + Sync,
>;

/// An explicit set of named functions.
#[derive(Clone, Default)]
pub struct FunctionSet {
    specs: HashMap<String, FunctionSpec>,
    ctors: HashMap<String, FunctionCtor>,
}

impl FunctionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function. Rejects malformed names, duplicates, and invalid
    /// parameter declarations.
    pub fn add(&mut self, spec: FunctionSpec, ctor: FunctionCtor) -> Result<(), QueryError> {
        if !valid_name(&spec.name) {
            return Err(QueryError::BadName {
                kind: "function",
                name: spec.name,
                pattern: NAME_PATTERN,
            });
        }
        if self.ctors.contains_key(&spec.name) {
            return Err(QueryError::ConflictingName {
                kind: "function",
                name: spec.name,
            });
        }
        spec.params.validate()?;
        self.ctors.insert(spec.name.clone(), ctor);
        self.specs.insert(spec.name.clone(), spec);
        Ok(())
    }

    /// The parameter declaration of a named function.
    pub fn params(&self, name: &str) -> Result<Params, QueryError> {
        self.specs
            .get(name)
            .map(|s| s.params.clone())
            .ok_or_else(|| QueryError::UnknownFunction(name.to_owned()))
    }

    /// Instantiate a named function. If any bound argument is a deferred
    /// query, the result resolves its arguments and re-constructs on every
    /// execution.
    pub fn init(&self, name: &str, args: ParsedParams) -> Result<Arc<dyn Function>, QueryError> {
        let ctor = self
            .ctors
            .get(name)
            .ok_or_else(|| QueryError::UnknownFunction(name.to_owned()))?;
        init_with_dynamic_args(format!("function {name}"), None, args, Arc::clone(ctor))
    }

    /// A clone of this set without the named entries.
    pub fn without(&self, names: &[&str]) -> FunctionSet {
        let mut out = self.clone();
        for name in names {
            out.specs.remove(*name);
            out.ctors.remove(*name);
        }
        out
    }

    /// A clone of this set without entries marked impure.
    pub fn only_pure(&self) -> FunctionSet {
        let impure: Vec<&str> = self
            .specs
            .values()
            .filter(|s| s.impure)
            .map(|s| s.name.as_str())
            .collect();
        self.without(&impure)
    }

    /// A clone of this set without message-access entries.
    pub fn no_message(&self) -> FunctionSet {
        let message: Vec<&str> = self
            .specs
            .values()
            .filter(|s| s.category == Category::Message)
            .map(|s| s.name.as_str())
            .collect();
        self.without(&message)
    }

    /// Registered names, alphabetical.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.ctors.keys().cloned().collect();
        names.sort();
        names
    }

    /// Registered specs, alphabetical by name.
    pub fn docs(&self) -> Vec<FunctionSpec> {
        let mut specs: Vec<FunctionSpec> = self.specs.values().cloned().collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }
}

/// An explicit set of named methods.
#[derive(Clone, Default)]
pub struct MethodSet {
    specs: HashMap<String, MethodSpec>,
    ctors: HashMap<String, MethodCtor>,
}

impl MethodSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, spec: MethodSpec, ctor: MethodCtor) -> Result<(), QueryError> {
        if !valid_name(&spec.name) {
            return Err(QueryError::BadName {
                kind: "method",
                name: spec.name,
                pattern: NAME_PATTERN,
            });
        }
        if self.ctors.contains_key(&spec.name) {
            return Err(QueryError::ConflictingName {
                kind: "method",
                name: spec.name,
            });
        }
        spec.params.validate()?;
        self.ctors.insert(spec.name.clone(), ctor);
        self.specs.insert(spec.name.clone(), spec);
        Ok(())
    }

    pub fn params(&self, name: &str) -> Result<Params, QueryError> {
        self.specs
            .get(name)
            .map(|s| s.params.clone())
            .ok_or_else(|| QueryError::UnknownMethod(name.to_owned()))
    }

    /// Instantiate a named method over a target function.
    pub fn init(
        &self,
        name: &str,
        target: Arc<dyn Function>,
        args: ParsedParams,
    ) -> Result<Arc<dyn Function>, QueryError> {
        let ctor = self
            .ctors
            .get(name)
            .ok_or_else(|| QueryError::UnknownMethod(name.to_owned()))?;
        let ctor = Arc::clone(ctor);
        let method_ctor: FunctionCtor = {
            let target = Arc::clone(&target);
            Arc::new(move |args| ctor(Arc::clone(&target), args))
        };
        init_with_dynamic_args(format!("method {name}"), Some(target), args, method_ctor)
    }

    pub fn without(&self, names: &[&str]) -> MethodSet {
        let mut out = self.clone();
        for name in names {
            out.specs.remove(*name);
            out.ctors.remove(*name);
        }
        out
    }

    pub fn only_pure(&self) -> MethodSet {
        let impure: Vec<&str> = self
            .specs
            .values()
            .filter(|s| s.impure)
            .map(|s| s.name.as_str())
            .collect();
        self.without(&impure)
    }

    pub fn no_message(&self) -> MethodSet {
        let message: Vec<&str> = self
            .specs
            .values()
            .filter(|s| s.category == Category::Message)
            .map(|s| s.name.as_str())
            .collect();
        self.without(&message)
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.ctors.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn docs(&self) -> Vec<MethodSpec> {
        let mut specs: Vec<MethodSpec> = self.specs.values().cloned().collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }
}

/// When any argument is a deferred query, the constructed function resolves
/// the arguments against the runtime context and re-constructs the inner
/// function on every execution.
struct DynamicArgs {
    label: String,
    target: Option<Arc<dyn Function>>,
    args: ParsedParams,
    deferred: Vec<Arc<dyn Function>>,
    ctor: FunctionCtor,
}

impl Function for DynamicArgs {
    fn exec(&self, ctx: FunctionContext<'_>) -> Result<Value, QueryError> {
        let resolved = self.args.resolve_dynamic(ctx)?;
        let inner = (self.ctor)(resolved)?;
        inner.exec(ctx)
    }

    fn query_targets<'a>(&self, ctx: TargetsContext<'a>) -> (TargetsContext<'a>, Vec<TargetPath>) {
        let mut nodes: Vec<&dyn Function> = Vec::with_capacity(self.deferred.len() + 1);
        if let Some(target) = &self.target {
            nodes.push(target.as_ref());
        }
        nodes.extend(self.deferred.iter().map(|f| f.as_ref()));
        aggregate_targets(ctx, &nodes)
    }

    fn annotation(&self) -> String {
        self.label.clone()
    }
}

fn init_with_dynamic_args(
    label: String,
    target: Option<Arc<dyn Function>>,
    args: ParsedParams,
    ctor: FunctionCtor,
) -> Result<Arc<dyn Function>, QueryError> {
    let deferred = args.dynamic();
    if deferred.is_empty() {
        return ctor(args);
    }
    Ok(Arc::new(DynamicArgs {
        label,
        target,
        args,
        deferred,
        ctor,
    }))
}

/// Every function declared by this crate.
pub static ALL_FUNCTIONS: LazyLock<FunctionSet> = LazyLock::new(|| {
    let mut set = FunctionSet::new();
    crate::query::functions::register_all(&mut set).expect("builtin function registration");
    set
});

/// Every method declared by this crate.
pub static ALL_METHODS: LazyLock<MethodSet> = LazyLock::new(|| {
    let mut set = MethodSet::new();
    crate::query::methods::register_all(&mut set).expect("builtin method registration");
    crate::query::methods_structured::register_all(&mut set).expect("structured method registration");
    set
});

/// Instantiate a function from the global registry by name and positional
/// arguments. Convenient for tests and embedding.
pub fn init_function(
    name: &str,
    args: Vec<ParamValue>,
) -> Result<Arc<dyn Function>, QueryError> {
    let params = ALL_FUNCTIONS.params(name)?;
    ALL_FUNCTIONS.init(name, params.populate_nameless(args)?)
}

/// Instantiate a method from the global registry over a target function.
pub fn init_method(
    name: &str,
    target: Arc<dyn Function>,
    args: Vec<ParamValue>,
) -> Result<Arc<dyn Function>, QueryError> {
    let params = ALL_METHODS.params(name)?;
    ALL_METHODS.init(name, target, params.populate_nameless(args)?)
}
