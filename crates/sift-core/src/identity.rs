//! Caller identity.
//!
//! Identity is derived from the external provider, never created here;
//! the canonical id IS the email, lowercased and trimmed.

use serde::{Deserialize, Serialize};

/// An authenticated staff user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// Canonical id; equal to the normalized email.
    pub user_id: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
}

impl UserIdentity {
    /// Build an identity from provider profile fields, normalizing the
    /// email.
    pub fn from_profile(email: &str, name: Option<String>, picture: Option<String>) -> Self {
        let email = normalize_email(email);
        Self {
            user_id: email.clone(),
            email,
            name,
            picture,
        }
    }
}

/// Lowercase and trim an email address. Email uniqueness throughout the
/// system is case-insensitive.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_and_whitespace() {
        assert_eq!(normalize_email("  Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn user_id_is_the_email() {
        let u = UserIdentity::from_profile(" Bob@X.io", Some("Bob".into()), None);
        assert_eq!(u.user_id, "bob@x.io");
        assert_eq!(u.email, "bob@x.io");
    }
}
