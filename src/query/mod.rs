//! The mapping/query evaluator: dynamic expressions over message batches.

pub mod arithmetic;
pub mod error;
pub mod function;
pub mod functions;
pub mod methods;
pub mod methods_structured;
pub mod params;
pub mod registry;
pub mod target;

pub use arithmetic::{Operator, new_arithmetic_expression};
pub use error::QueryError;
pub use function::{FieldFunction, Function, FunctionContext, Literal};
pub use methods::not;
pub use params::{ParamKind, ParamSpec, ParamValue, Params, ParsedParams};
pub use registry::{
    ALL_FUNCTIONS, ALL_METHODS, Category, FunctionSet, FunctionSpec, MethodSet, MethodSpec,
    init_function, init_method,
};
pub use target::{TargetKind, TargetPath, TargetsContext};
