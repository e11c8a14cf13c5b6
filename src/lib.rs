pub mod codec;
pub mod message;
pub mod path;
pub mod query;
pub mod utils;
pub mod value;

pub use message::{MessageBatch, Part};
pub use query::{Function, FunctionContext, QueryError};
pub use value::{Number, Value, ValueKind};
