//! Email address syntax validation and string-level helpers.
//!
//! The validator is deliberately pragmatic: an RFC 5322 dot-atom grammar
//! with the RFC 5321 length bounds, checked on the normalized (trimmed,
//! lower-cased) form so that validity is invariant under normalization.

use once_cell::sync::Lazy;
use regex::Regex;

static ADDR_RE: Lazy<Regex> = Lazy::new(|| {
    // dot-atom local part, LDH domain labels, alphabetic TLD of length >= 2
    Regex::new(
        r"^[a-z0-9!#$%&'*+/=?^_`{|}~.-]+@[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?(?:\.[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?)*\.[a-z]{2,}$",
    )
    .expect("address regex is valid")
});

/// Trim surrounding whitespace and lower-case the address.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Check whether an address is syntactically deliverable.
///
/// Enforces: total length <= 254, local part 1..=64, domain 1..=253, no
/// leading/trailing/consecutive dots in the local part, LDH domain labels,
/// and a TLD of at least two letters.
pub fn is_valid_format(email: &str) -> bool {
    let email = normalize_email(email);
    if email.is_empty() || email.len() > 254 {
        return false;
    }
    let Some((local, domain)) = email.rsplit_once('@') else {
        return false;
    };
    if local.is_empty() || local.len() > 64 {
        return false;
    }
    if domain.is_empty() || domain.len() > 253 {
        return false;
    }
    if local.starts_with('.') || local.ends_with('.') || local.contains("..") {
        return false;
    }
    ADDR_RE.is_match(&email)
}

/// Extract the normalized domain, if the address has one.
pub fn extract_domain(email: &str) -> Option<String> {
    let email = normalize_email(email);
    email
        .rsplit_once('@')
        .map(|(_, domain)| domain.to_string())
        .filter(|domain| !domain.is_empty())
}

/// Extract the normalized local part, if the address has one.
pub fn extract_local_part(email: &str) -> Option<String> {
    let email = normalize_email(email);
    email
        .rsplit_once('@')
        .map(|(local, _)| local.to_string())
        .filter(|local| !local.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn accepts_common_addresses() {
        assert!(is_valid_format("user@example.com"));
        assert!(is_valid_format("first.last@example.co.uk"));
        assert!(is_valid_format("user+tag@example.com"));
        assert!(is_valid_format("user_name-x@sub.example.com"));
        assert!(is_valid_format("  User@Example.COM  "));
    }

    #[test]
    fn rejects_malformed_addresses() {
        assert!(!is_valid_format(""));
        assert!(!is_valid_format("not-an-email"));
        assert!(!is_valid_format("@example.com"));
        assert!(!is_valid_format("user@"));
        assert!(!is_valid_format("user@@example.com"));
        assert!(!is_valid_format("user@localhost"));
        assert!(!is_valid_format("user@example.c"));
        assert!(!is_valid_format("user@-example.com"));
        assert!(!is_valid_format("user@example-.com"));
        assert!(!is_valid_format("user name@example.com"));
    }

    #[test]
    fn rejects_dot_misuse_in_local_part() {
        assert!(!is_valid_format(".user@example.com"));
        assert!(!is_valid_format("user.@example.com"));
        assert!(!is_valid_format("us..er@example.com"));
        assert!(is_valid_format("us.er@example.com"));
    }

    #[test]
    fn enforces_length_bounds() {
        let local_64 = "a".repeat(64);
        let local_65 = "a".repeat(65);
        assert!(is_valid_format(&format!("{local_64}@example.com")));
        assert!(!is_valid_format(&format!("{local_65}@example.com")));

        // 254 total is the ceiling
        let label = "b".repeat(61);
        let long_domain = format!("{label}.{label}.{label}.{}.com", "c".repeat(58));
        let email = format!("{}@{long_domain}", "a".repeat(5));
        assert_eq!(email.len(), 254);
        assert!(is_valid_format(&email));
        let too_long = format!("{}@{long_domain}", "a".repeat(6));
        assert!(!is_valid_format(&too_long));
    }

    #[test]
    fn validity_is_invariant_under_normalization() {
        for input in ["  USER@Example.Com ", "first.LAST@EXAMPLE.ORG", "bad@@x.com"] {
            assert_eq!(is_valid_format(input), is_valid_format(&normalize_email(input)));
        }
    }

    #[test]
    fn extracts_parts() {
        assert_eq!(extract_domain("User@Example.COM"), Some("example.com".into()));
        assert_eq!(extract_local_part("User@Example.COM"), Some("user".into()));
        assert_eq!(extract_domain("no-at-sign"), None);
        assert_eq!(extract_local_part("@example.com"), None);
        assert_eq!(extract_domain("user@"), None);
    }
}
