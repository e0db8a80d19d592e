//! Riser server library.
//!
//! This crate primarily ships the `riser-server` binary, but exposes its
//! internals as a library for integration testing and reuse.
//!
//! - [`reservation`]: deployment name ownership
//! - [`deployment`]: the deploy, delete and status orchestration
//! - [`store`]: record store contracts and the in-memory implementation
//! - [`db`]: the Postgres implementation
//! - [`api`]: the HTTP surface

pub mod api;
pub mod config;
pub mod db;
pub mod deployment;
pub mod reservation;
pub mod state;
pub mod store;
