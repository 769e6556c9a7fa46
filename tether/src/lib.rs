//! # tether
//!
//! Embeds the `tether_vm` Ruby interpreter in a Rust host.
//!
//! ```text
//!  script ──▶ tether_vm ──▶ trampoline ──▶ registry ──▶ host callback
//!                 ▲                                        │
//!                 └──────────── Value / exception ◀────────┘
//!
//!  host ──▶ Mrb::evaluate ──▶ Value ──▶ decode ──▶ typed Rust value
//! ```
//!
//! Host functions become methods with [`Class::define_method`]. Each call
//! lands in a single native function that finds the callback registered
//! for the calling class and method name and hands it an [`Args`] bound to
//! that call. Results come back to the host as [`Value`]s and can be
//! pulled into ordinary Rust types with [`decode`].

mod args;
mod array;
mod class;
mod context;
pub mod decode;
mod exception;
mod hash;
mod mrb;
mod registry;
mod trampoline;
mod value;

pub use args::{ArgSpec, Args};
pub use array::Array;
pub use class::Class;
pub use context::CompileContext;
pub use decode::{Decode, DecodeError, DecodeErrorKind, Destination, DestinationKind, Dynamic, decode};
pub use exception::ScriptException;
pub use hash::Hash;
pub use mrb::{ArenaGuard, ArenaIndex, Mrb};
pub use registry::DispatchInvariantViolation;
pub use value::{ToValue, Value, ValueType};

pub use tether_vm::GarbageCollectionStats;
