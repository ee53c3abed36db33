//! # sift-store
//!
//! Durable storage for conversation sessions, their transcripts, and
//! auth sessions. Three collections, each with the indexes the access
//! paths need:
//!
//! - `sessions`: unique on session_id, compound (user_id, updated_at
//!   desc) for listing;
//! - `messages`: compound (session_id, created_at) for ordered scans,
//!   ties broken by insertion order;
//! - `auth_sessions`: unique on token and on email.
//!
//! Messages are append-only; the only in-place mutation anywhere is the
//! parent session's `updated_at` touch, performed in the same
//! transaction as the insert.

mod models;
mod store;

pub use models::{AuthSession, Session, StoredMessage};
pub use store::{DocStore, StoreError};
