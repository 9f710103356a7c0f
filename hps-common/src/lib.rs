//! Shared primitives used by all `hps-rs` crates.
//!
//! This crate sits at the bottom of the dependency graph: configuration, the error model and
//! the connection handle types that every layer passes around.

pub mod config;
pub mod error;
pub mod ids;
