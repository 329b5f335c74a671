pub mod builtins;
pub mod closure;
pub mod env;
pub mod hash;
pub mod value;

pub use closure::{Closure, CompiledClosure, FunctionProto, TreeClosure, Upvalue};
pub use env::{Env, Globals};
pub use hash::HashObj;
pub use value::{Builtin, Constructor, Value, ValueKind, Variant};
