//! Core logic: script model, parsing, include resolution, interpolation,
//! argument binding, privileges, the convergence engine and the remote driver.

pub mod args;
pub mod error;
pub mod executor;
pub mod expr;
pub mod facts;
pub mod host;
pub mod interpolate;
pub mod parser;
pub mod privilege;
pub mod remote;
pub mod resolver;
pub mod types;
