//! Runtime for a line-numbered BASIC dialect: identifier hashing, the
//! tokenizer, the shunting-yard RPN builder, the expression evaluator and the
//! statement interpreter. Program storage and everything host-specific
//! (stdio, randomness, locale) live in `b1fmt`/`b1host` so this crate stays
//! free of any particular front end.

pub mod builtins;
pub mod debug;
pub mod errors;
pub mod eval;
pub mod features;
pub mod hash;
pub mod iface;
pub mod memory;
pub mod rpn;
pub mod stmt;
pub mod token;
pub mod types;
pub mod vars;

pub use debug::Breakpoints;
pub use errors::{B1Result, Error, ErrorKind, RunResult, Signal};
pub use features::Features;
pub use iface::{AsciiLocale, CachedStmtKind, IoPort, LineRequest, LocaleCompare, ProgramLineProvider, RandomSource};
pub use stmt::Interpreter;
pub use types::{BasicString, TypeTag, Value};
