//! Variable Expansion Module
//!
//! Scoped variable definitions and the expander that resolves them.
//!
//! # Structure
//!
//! - [`store`]: Scopes, raw values and the scoped store
//! - [`expander`]: Recursive, cycle-safe `{name}` resolution
//! - [`math`]: Arithmetic evaluation of expanded values
//! - [`typed`]: Coercion of expanded strings into typed values

pub mod expander;
pub mod math;
pub mod store;
pub mod typed;

pub use expander::{ExpandOptions, Expander};
pub use store::{Scope, Variable, VariableStore, VariableValue};
