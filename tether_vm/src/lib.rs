//! # tether_vm
//!
//! A small embeddable Ruby interpreter.
//!
//! ```text
//!  source ──▶ Lexer ──▶ Parser ──▶ AST ──▶ State::eval ──▶ RawValue
//!                                              │
//!                                  Heap (arena-pinned objects)
//! ```
//!
//! The embedding surface mirrors a C interpreter API: [`State`] entry
//! points return a [`RawValue`] and report failures through
//! [`State::exc`]; embedder methods are plain [`NativeFn`] pointers that
//! find their arguments through the active [`CallInfo`].
mod aspec;
mod ast;
mod eval;
mod format;
mod heap;
mod lexer;
mod object;
mod parser;
mod primitives;
mod span;
mod state;
mod symbols;
mod token;
mod value;

pub use aspec::{ArityMismatch, Aspec};
pub use eval::{BreakTarget, EvalResult, Exc};
pub use format::{format_float, quote};
pub use heap::{GarbageCollectionStats, Heap};
pub use object::{ClassData, ClassKind, ExceptionData, HashKey, HashTable, Instance, Method, Object, ProcData, Scope};
pub use parser::ParseError;
pub use primitives::{PrimitiveContext, PrimitiveFn, PrimitiveMessage, parse_integer_literal};
pub use span::Pos;
pub use state::{CallInfo, CoreClasses, MAX_CALL_DEPTH, NativeFn, State};
pub use symbols::{Sym, Symbols};
pub use value::{Float, ObjRef, RawValue};
