//! Shared application state.
//!
//! One [`AppContext`] is built at startup and handed to every handler
//! through axum state; there are no process-wide singletons. Shutdown
//! tears the same context down.

use sift_acl::AclEngine;
use sift_agent::AgentOrchestrator;
use sift_store::DocStore;
use std::sync::Arc;

pub struct AppContext {
    /// Conversation + auth session persistence.
    pub store: DocStore,
    /// Staff directory and tool policy; used here for the login gate.
    pub acl: Arc<AclEngine>,
    /// The agent loop behind `POST /sessions/{id}/messages`.
    pub orchestrator: AgentOrchestrator,
}

pub type SharedContext = Arc<AppContext>;
