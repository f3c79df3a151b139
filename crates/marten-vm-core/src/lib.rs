//! # Marten VM Core
//!
//! Register-based bytecode interpreter with inline-cached property access.
//!
//! ## Design Principles
//!
//! - **Thread-safe**: Values are `Send + Sync`; a context moves between
//!   threads even though execution inside it is single-threaded
//! - **NaN-boxing**: Efficient 64-bit value representation
//! - **Hidden classes**: Shape-based property access optimization
//! - **Out-of-line feedback**: Modules stay immutable; inline caches live in
//!   per-context feedback vectors

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod context;
pub mod control_flow;
pub mod dispatch;
pub mod enumerate;
pub mod environment;
pub mod error;
pub mod inline_cache;
pub mod interpreter;
pub mod object;
mod operations;
pub mod shape;
pub mod string;
pub mod value;

pub use context::{MAX_STACK_DEPTH, VmContext};
pub use error::{StackFrame, ThrownValue, VmError, VmResult};
pub use interpreter::{Flow, Interpreter};
pub use object::{JsObject, ObjectKind, Property};
pub use shape::{PropertyMeta, Shape};
pub use string::JsString;
pub use value::Value;
