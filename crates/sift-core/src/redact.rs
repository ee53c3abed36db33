//! Log-time redaction helpers.
//!
//! Raw emails never reach the tracing pipeline; call sites log
//! `mask_email(..)` instead of the value itself.

/// Mask an email for logging: keep the first character of the local
/// part and the domain, hide the rest.
///
/// `alice@example.com` -> `a***@example.com`. Values without an `@` are
/// fully masked.
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() => {
            let first = local.chars().next().unwrap();
            format!("{first}***@{domain}")
        }
        _ => "***".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_local_part() {
        assert_eq!(mask_email("alice@example.com"), "a***@example.com");
    }

    #[test]
    fn masks_non_emails_entirely() {
        assert_eq!(mask_email("not-an-email"), "***");
        assert_eq!(mask_email("@host"), "***");
    }
}
