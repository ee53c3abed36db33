//! Policy evaluation and the staff cache.

use crate::directory::{StaffDirectory, StaffRecord};
use sift_core::config::DefaultPolicy;
use sift_core::{mask_email, normalize_email, AclConfig};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Errors surfaced by the ACL engine.
#[derive(Debug, thiserror::Error)]
pub enum AclError {
    /// The staff directory lookup itself failed (not "user missing").
    #[error("staff directory lookup failed: {0}")]
    Directory(String),
}

/// Outcome of a per-tool access check.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessDecision {
    pub allowed: bool,
    /// Stable, human-readable explanation of the policy that fired.
    pub reason: String,
    /// The caller's ACL tags when a staff record was found.
    pub acls: Option<Vec<String>>,
}

impl AccessDecision {
    fn allow(reason: impl Into<String>, acls: Option<Vec<String>>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
            acls,
        }
    }

    fn deny(reason: impl Into<String>, acls: Option<Vec<String>>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            acls,
        }
    }
}

/// Resolve the effective caller email for a tool request.
///
/// Priority: explicit `_meta.user_email` on the call, then the email the
/// transport session was opened with, then the process-wide fallback.
/// Blank strings count as absent.
pub fn resolve_email(
    meta_email: Option<&str>,
    session_email: Option<&str>,
    fallback: Option<&str>,
) -> Option<String> {
    [meta_email, session_email, fallback]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|e| !e.is_empty())
        .map(normalize_email)
}

struct CacheEntry {
    record: StaffRecord,
    fetched_at: Instant,
}

/// The ACL engine: policy + staff directory + bounded-TTL cache.
///
/// The cache holds positive results only and is keyed by normalized
/// email. Writes may race; entries are idempotent, so last-writer-wins
/// is fine.
pub struct AclEngine {
    config: AclConfig,
    directory: Arc<dyn StaffDirectory>,
    cache: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl AclEngine {
    pub fn new(config: AclConfig, directory: Arc<dyn StaffDirectory>) -> Self {
        Self::with_ttl(config, directory, Duration::from_secs(300))
    }

    pub fn with_ttl(
        config: AclConfig,
        directory: Arc<dyn StaffDirectory>,
        ttl: Duration,
    ) -> Self {
        Self {
            config,
            directory,
            cache: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Look up a staff record, consulting the cache first.
    ///
    /// `Ok(None)` is "no such staff member" and is never cached;
    /// a directory failure propagates as `Err`.
    pub async fn resolve_acls(&self, email: &str) -> Result<Option<StaffRecord>, AclError> {
        let email = normalize_email(email);

        if let Some(hit) = self.cache_get(&email) {
            return Ok(Some(hit));
        }

        let record = self.directory.lookup(&email).await?;
        if let Some(record) = &record {
            self.cache_put(&email, record.clone());
        } else {
            tracing::debug!(email = %mask_email(&email), "staff record not found");
        }
        Ok(record)
    }

    /// Drop one cached entry.
    pub fn invalidate(&self, email: &str) {
        let email = normalize_email(email);
        if let Ok(mut cache) = self.cache.write() {
            cache.remove(&email);
        }
    }

    /// Drop every cached entry.
    pub fn clear(&self) {
        if let Ok(mut cache) = self.cache.write() {
            cache.clear();
        }
    }

    fn cache_get(&self, email: &str) -> Option<StaffRecord> {
        let cache = self.cache.read().ok()?;
        let entry = cache.get(email)?;
        (entry.fetched_at.elapsed() < self.ttl).then(|| entry.record.clone())
    }

    fn cache_put(&self, email: &str, record: StaffRecord) {
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(
                email.to_string(),
                CacheEntry {
                    record,
                    fetched_at: Instant::now(),
                },
            );
        }
    }

    /// Evaluate whether `email` may call `tool`.
    pub async fn check_tool_access(
        &self,
        tool: &str,
        email: Option<&str>,
    ) -> Result<AccessDecision, AclError> {
        // Public tools short-circuit before any lookup.
        if self.config.public_tools.iter().any(|t| t == tool) {
            return Ok(AccessDecision::allow(
                format!("'{tool}' is a public tool"),
                None,
            ));
        }

        let Some(email) = email.map(str::trim).filter(|e| !e.is_empty()) else {
            return Ok(AccessDecision::deny(
                "Authentication required: no user identity was provided",
                None,
            ));
        };

        let staff = self.resolve_acls(email).await?;
        Ok(self.decide(tool, staff.as_ref()))
    }

    /// Apply the same rules to a set of tool names, keeping only the
    /// visible ones. Resolves the staff record once.
    pub async fn filter_tools<'a>(
        &self,
        tools: impl IntoIterator<Item = &'a str>,
        email: Option<&str>,
    ) -> Result<Vec<&'a str>, AclError> {
        let email = email.map(str::trim).filter(|e| !e.is_empty());
        let staff = match email {
            Some(e) => self.resolve_acls(e).await?,
            None => None,
        };

        Ok(tools
            .into_iter()
            .filter(|tool| {
                if self.config.public_tools.iter().any(|t| t == tool) {
                    return true;
                }
                if email.is_none() {
                    return false;
                }
                self.decide(tool, staff.as_ref()).allowed
            })
            .collect())
    }

    /// Policy steps 3-7: staff presence, active flag, superuser tags,
    /// explicit tool rules, default policy.
    fn decide(&self, tool: &str, staff: Option<&StaffRecord>) -> AccessDecision {
        let Some(staff) = staff else {
            return AccessDecision::deny("User not found", None);
        };

        let acls = Some(staff.acls.clone());

        if !staff.active {
            return AccessDecision::deny("User is inactive", acls);
        }

        if staff
            .acls
            .iter()
            .any(|a| self.config.superuser_acls.contains(a))
        {
            return AccessDecision::allow("superuser ACL", acls);
        }

        if let Some(required) = self.config.tool_acls.get(tool) {
            let held: Vec<&String> = staff
                .acls
                .iter()
                .filter(|a| required.contains(a))
                .collect();
            if !held.is_empty() {
                return AccessDecision::allow(
                    format!("'{tool}' granted via {:?}", held),
                    acls,
                );
            }
            return AccessDecision::deny(
                format!(
                    "Access denied: '{tool}' requires one of {:?}; you hold {:?}",
                    required, staff.acls
                ),
                acls,
            );
        }

        match self.config.default_policy {
            DefaultPolicy::Open => {
                AccessDecision::allow(format!("'{tool}' allowed by open default policy"), acls)
            }
            DefaultPolicy::Deny => AccessDecision::deny(
                format!("Access denied: '{tool}' is not listed and the default policy is deny"),
                acls,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MemoryDirectory {
        staff: HashMap<String, StaffRecord>,
        lookups: AtomicUsize,
    }

    impl MemoryDirectory {
        fn new(records: Vec<StaffRecord>) -> Self {
            Self {
                staff: records
                    .into_iter()
                    .map(|r| (r.email.clone(), r))
                    .collect(),
                lookups: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl StaffDirectory for MemoryDirectory {
        async fn lookup(&self, email: &str) -> Result<Option<StaffRecord>, AclError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self.staff.get(email).cloned())
        }
    }

    fn staff(email: &str, acls: &[&str], active: bool) -> StaffRecord {
        StaffRecord {
            email: email.to_string(),
            acls: acls.iter().map(|s| s.to_string()).collect(),
            active,
        }
    }

    fn config() -> AclConfig {
        AclConfig::from_yaml(
            r#"
default_policy: deny
superuser_acls: [ADMIN]
public_tools: [list_query_patterns]
tool_acls:
  query: [DB_VIEW]
  fetch_redash_query: [DB_VIEW, BI_VIEW]
"#,
        )
        .unwrap()
    }

    fn engine(records: Vec<StaffRecord>) -> (AclEngine, Arc<MemoryDirectory>) {
        let dir = Arc::new(MemoryDirectory::new(records));
        (AclEngine::new(config(), dir.clone()), dir)
    }

    #[test]
    fn email_resolution_chain() {
        assert_eq!(
            resolve_email(Some("Meta@X.io"), Some("s@x.io"), Some("f@x.io")),
            Some("meta@x.io".to_string())
        );
        assert_eq!(
            resolve_email(Some("  "), Some("s@x.io"), Some("f@x.io")),
            Some("s@x.io".to_string())
        );
        assert_eq!(
            resolve_email(None, None, Some("f@x.io")),
            Some("f@x.io".to_string())
        );
        assert_eq!(resolve_email(None, Some(""), None), None);
    }

    #[tokio::test]
    async fn holder_of_required_acl_is_allowed() {
        let (engine, _) = engine(vec![staff("a@x", &["DB_VIEW"], true)]);
        let d = engine.check_tool_access("query", Some("a@x")).await.unwrap();
        assert!(d.allowed);
        assert_eq!(d.acls, Some(vec!["DB_VIEW".to_string()]));
    }

    #[tokio::test]
    async fn wrong_acl_denied_with_required_tags_named() {
        let (engine, _) = engine(vec![staff("b@x", &["OTHER"], true)]);
        let d = engine.check_tool_access("query", Some("b@x")).await.unwrap();
        assert!(!d.allowed);
        assert!(d.reason.contains("DB_VIEW"));
        assert!(d.reason.contains("OTHER"));
    }

    #[tokio::test]
    async fn unknown_user_denied_as_not_found() {
        let (engine, _) = engine(vec![]);
        let d = engine.check_tool_access("query", Some("c@x")).await.unwrap();
        assert!(!d.allowed);
        assert_eq!(d.reason, "User not found");
    }

    #[tokio::test]
    async fn inactive_user_denied() {
        let (engine, _) = engine(vec![staff("a@x", &["DB_VIEW"], false)]);
        let d = engine.check_tool_access("query", Some("a@x")).await.unwrap();
        assert!(!d.allowed);
        assert_eq!(d.reason, "User is inactive");
    }

    #[tokio::test]
    async fn superuser_bypasses_tool_rules() {
        let (engine, _) = engine(vec![staff("root@x", &["ADMIN"], true)]);
        let d = engine
            .check_tool_access("query", Some("root@x"))
            .await
            .unwrap();
        assert!(d.allowed);
        let d = engine
            .check_tool_access("anything_else", Some("root@x"))
            .await
            .unwrap();
        assert!(d.allowed);
    }

    #[tokio::test]
    async fn public_tool_needs_no_identity() {
        let (engine, dir) = engine(vec![]);
        let d = engine
            .check_tool_access("list_query_patterns", None)
            .await
            .unwrap();
        assert!(d.allowed);
        assert_eq!(dir.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_identity_denied_for_private_tool() {
        let (engine, _) = engine(vec![staff("a@x", &["DB_VIEW"], true)]);
        let d = engine.check_tool_access("query", None).await.unwrap();
        assert!(!d.allowed);
        assert!(d.reason.contains("Authentication required"));
    }

    #[tokio::test]
    async fn unlisted_tool_follows_default_policy() {
        let (engine, _) = engine(vec![staff("a@x", &["DB_VIEW"], true)]);
        let d = engine
            .check_tool_access("analyze_query", Some("a@x"))
            .await
            .unwrap();
        assert!(!d.allowed);
        assert!(d.reason.contains("default policy"));

        let mut open = config();
        open.default_policy = DefaultPolicy::Open;
        let engine = AclEngine::new(
            open,
            Arc::new(MemoryDirectory::new(vec![staff("a@x", &["DB_VIEW"], true)])),
        );
        let d = engine
            .check_tool_access("analyze_query", Some("a@x"))
            .await
            .unwrap();
        assert!(d.allowed);
    }

    #[tokio::test]
    async fn filter_matches_check_for_every_tool_and_caller() {
        let tools = [
            "query",
            "fetch_redash_query",
            "list_query_patterns",
            "analyze_query",
        ];
        let (engine, _) = engine(vec![
            staff("a@x", &["DB_VIEW"], true),
            staff("b@x", &["OTHER"], true),
            staff("root@x", &["ADMIN"], true),
            staff("off@x", &["DB_VIEW"], false),
        ]);

        for caller in [Some("a@x"), Some("b@x"), Some("root@x"), Some("off@x"), Some("c@x"), None] {
            let visible = engine
                .filter_tools(tools.iter().copied(), caller)
                .await
                .unwrap();
            for tool in tools {
                let allowed = engine.check_tool_access(tool, caller).await.unwrap().allowed;
                assert_eq!(
                    visible.contains(&tool),
                    allowed,
                    "tool {tool:?} caller {caller:?}"
                );
            }
        }
    }

    #[tokio::test]
    async fn scenario_visible_sets() {
        let (engine, _) = engine(vec![
            staff("a@x", &["DB_VIEW"], true),
            staff("b@x", &["OTHER"], true),
        ]);
        let tools = ["query", "analyze_query"];

        let a = engine.filter_tools(tools.iter().copied(), Some("a@x")).await.unwrap();
        assert_eq!(a, vec!["query"]);

        let b = engine.filter_tools(tools.iter().copied(), Some("b@x")).await.unwrap();
        assert!(b.is_empty());

        let c = engine.filter_tools(tools.iter().copied(), Some("c@x")).await.unwrap();
        assert!(c.is_empty());
    }

    #[tokio::test]
    async fn positive_results_are_cached_and_invalidated() {
        let (engine, dir) = engine(vec![staff("a@x", &["DB_VIEW"], true)]);

        engine.resolve_acls("a@x").await.unwrap();
        engine.resolve_acls("A@X").await.unwrap(); // normalized hit
        assert_eq!(dir.lookups.load(Ordering::SeqCst), 1);

        engine.invalidate("a@x");
        engine.resolve_acls("a@x").await.unwrap();
        assert_eq!(dir.lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn missing_users_are_not_cached() {
        let (engine, dir) = engine(vec![]);
        engine.resolve_acls("ghost@x").await.unwrap();
        engine.resolve_acls("ghost@x").await.unwrap();
        assert_eq!(dir.lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn expired_entries_refetch() {
        let dir = Arc::new(MemoryDirectory::new(vec![staff("a@x", &["DB_VIEW"], true)]));
        let engine = AclEngine::with_ttl(config(), dir.clone(), Duration::from_millis(0));
        engine.resolve_acls("a@x").await.unwrap();
        engine.resolve_acls("a@x").await.unwrap();
        assert_eq!(dir.lookups.load(Ordering::SeqCst), 2);
    }
}
