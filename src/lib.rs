//! Warrant edge agent.
//!
//! Mirrors the upstream warrant graph into a local cache (memory or redis)
//! and answers authorization checks from it. Modules are public for the
//! integration tests.

pub mod edge;
pub mod errors;
pub mod settings;
