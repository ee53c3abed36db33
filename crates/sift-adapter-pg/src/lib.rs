//! # sift-adapter-pg
//!
//! Postgres adapter for Sift. Every statement the tool layer runs goes
//! through [`ReadOnlyPg`], which opens an engine-level read-only
//! transaction per call: the database itself rejects mutations an LLM
//! might emit, independent of any SQL inspection upstream.

pub mod introspect;
pub mod pool;
mod rows;

pub use pool::{PoolError, QueryOutput, ReadOnlyPg};
