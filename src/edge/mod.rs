//! Edge agent: a local mirror of the upstream warrant graph plus the check
//! API served from it.

pub mod backoff;
pub mod check;
pub mod events;
pub mod sse;
pub mod store;
pub mod sync;
pub mod upstream;
pub mod warrant;
pub mod web;
