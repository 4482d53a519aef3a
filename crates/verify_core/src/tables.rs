//! Static lookup tables bundled with the crate.
//!
//! Lists ship as plain text under `data/` and are parsed once on first
//! use. All comparisons are case-insensitive; role prefixes additionally
//! collapse the `.`, `_`, `-` separators before matching.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use tracing::debug;

use crate::format;
use crate::MailProvider;

static DISPOSABLE_DOMAINS: Lazy<HashSet<&'static str>> =
    Lazy::new(|| parse_list(include_str!("../data/disposable_domains.txt"), "disposable"));

static FREE_PROVIDERS: Lazy<HashSet<&'static str>> =
    Lazy::new(|| parse_list(include_str!("../data/free_providers.txt"), "free-provider"));

static ROLE_PREFIXES: Lazy<HashSet<&'static str>> =
    Lazy::new(|| parse_list(include_str!("../data/role_prefixes.txt"), "role-prefix"));

static FIRST_NAMES: Lazy<HashSet<&'static str>> =
    Lazy::new(|| parse_list(include_str!("../data/first_names.txt"), "first-name"));

/// Ordered substring table for provider detection over MX hostnames.
/// More specific substrings come first; the first match wins.
const PROVIDER_SUBSTRINGS: &[(&str, &str)] = &[
    ("aspmx.l.google.com", "Google Workspace"),
    ("googlemail.com", "Google Workspace"),
    ("google.com", "Google Workspace"),
    ("mail.protection.outlook.com", "Microsoft 365"),
    ("olc.protection.outlook.com", "Microsoft 365"),
    ("outlook.com", "Microsoft 365"),
    ("hotmail.com", "Microsoft 365"),
    ("mx.yahoodns.net", "Yahoo Mail"),
    ("yahoo.com", "Yahoo Mail"),
    ("mail.icloud.com", "Apple iCloud Mail"),
    ("icloud.com", "Apple iCloud Mail"),
    ("pphosted.com", "Proofpoint"),
    ("ppe-hosted.com", "Proofpoint"),
    ("mimecast.com", "Mimecast"),
    ("barracudanetworks.com", "Barracuda"),
    ("iphmx.com", "Cisco Secure Email"),
    ("messagelabs.com", "Broadcom MessageLabs"),
    ("hornetsecurity.com", "Hornetsecurity"),
    ("zoho.com", "Zoho Mail"),
    ("zoho.eu", "Zoho Mail"),
    ("messagingengine.com", "Fastmail"),
    ("fastmail.com", "Fastmail"),
    ("protonmail.ch", "Proton Mail"),
    ("mail.ovh.net", "OVH Mail"),
    ("mail.gandi.net", "Gandi Mail"),
    ("secureserver.net", "GoDaddy Email"),
    ("emailsrvr.com", "Rackspace Email"),
    ("mailgun.org", "Mailgun"),
    ("amazonaws.com", "Amazon WorkMail"),
    ("yandex.net", "Yandex Mail"),
    ("mail.ru", "Mail.ru"),
    ("qq.com", "Tencent Exmail"),
    ("mxhichina.com", "Alibaba Mail"),
    ("163.com", "NetEase Mail"),
    ("naver.com", "Naver Works"),
    ("daum.net", "Kakao Mail"),
    ("gmx.net", "GMX"),
    ("web.de", "WEB.DE"),
    ("kundenserver.de", "IONOS"),
    ("migadu.com", "Migadu"),
    ("tutanota.de", "Tuta Mail"),
    ("posteo.de", "Posteo"),
    ("mxroute.com", "MXroute"),
];

fn parse_list(content: &'static str, label: &str) -> HashSet<&'static str> {
    let entries: HashSet<&'static str> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect();
    debug!("loaded {} {} entries", entries.len(), label);
    entries
}

fn collapse_separators(local: &str) -> String {
    local
        .to_lowercase()
        .chars()
        .filter(|c| !matches!(c, '.' | '_' | '-'))
        .collect()
}

/// True when the domain belongs to a disposable/temporary mail provider.
pub fn is_disposable_domain(domain: &str) -> bool {
    DISPOSABLE_DOMAINS.contains(domain.trim().to_lowercase().as_str())
}

/// True when the address' domain is disposable.
pub fn is_disposable_email(email: &str) -> bool {
    format::extract_domain(email)
        .map(|domain| is_disposable_domain(&domain))
        .unwrap_or(false)
}

/// True when the domain is a free consumer mailbox provider.
pub fn is_free_domain(domain: &str) -> bool {
    FREE_PROVIDERS.contains(domain.trim().to_lowercase().as_str())
}

/// True when the address' domain is a free provider.
pub fn is_free_email(email: &str) -> bool {
    format::extract_domain(email)
        .map(|domain| is_free_domain(&domain))
        .unwrap_or(false)
}

/// True when the local part names a role rather than a person.
/// Separators are collapsed, so `no-reply` and `no.reply` both match.
pub fn is_role_based_local_part(local: &str) -> bool {
    ROLE_PREFIXES.contains(collapse_separators(local).as_str())
}

/// True when the address' local part is role-based.
pub fn is_role_based_email(email: &str) -> bool {
    format::extract_local_part(email)
        .map(|local| is_role_based_local_part(&local))
        .unwrap_or(false)
}

/// True when the token is a bundled given name.
pub fn is_known_first_name(token: &str) -> bool {
    FIRST_NAMES.contains(token.trim().to_lowercase().as_str())
}

/// Identify the hosted-mail provider from MX hostnames.
///
/// The first MX whose hostname contains a known substring wins.
pub fn detect_provider(mx_hosts: &[String]) -> Option<MailProvider> {
    for host in mx_hosts {
        let host = host.to_lowercase();
        for (needle, name) in PROVIDER_SUBSTRINGS {
            if host.contains(needle) {
                return Some(MailProvider {
                    name: (*name).to_string(),
                });
            }
        }
    }
    None
}

/// Iterator over the bundled free-provider domains, for typo matching.
pub(crate) fn free_provider_domains() -> impl Iterator<Item = &'static str> {
    FREE_PROVIDERS.iter().copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn detects_disposable_domains() {
        assert!(is_disposable_domain("mailinator.com"));
        assert!(is_disposable_domain("MAILINATOR.COM"));
        assert!(is_disposable_email("test@mailinator.com"));
        assert!(!is_disposable_domain("example.com"));
        assert!(!is_disposable_email("not-an-email"));
    }

    #[test]
    fn detects_free_providers() {
        assert!(is_free_email("u@gmail.com"));
        assert!(is_free_domain("Yahoo.co.uk"));
        assert!(!is_free_domain("example.com"));
    }

    #[test]
    fn detects_role_accounts_with_collapsed_separators() {
        assert!(is_role_based_email("info@x.com"));
        assert!(is_role_based_local_part("no-reply"));
        assert!(is_role_based_local_part("no.reply"));
        assert!(is_role_based_local_part("customer_service"));
        assert!(!is_role_based_local_part("john"));
    }

    #[test]
    fn detects_providers_by_mx_substring() {
        let provider = detect_provider(&["ASPMX.L.GOOGLE.COM".to_string()]);
        assert_eq!(
            provider,
            Some(MailProvider {
                name: "Google Workspace".to_string()
            })
        );

        let provider = detect_provider(&[
            "unknown-relay.example.net".to_string(),
            "example-com.mail.protection.outlook.com".to_string(),
        ]);
        assert_eq!(provider.map(|p| p.name), Some("Microsoft 365".to_string()));

        assert_eq!(detect_provider(&["mx.selfhosted.example".to_string()]), None);
        assert_eq!(detect_provider(&[]), None);
    }

    #[test]
    fn specific_substrings_win_over_general_ones() {
        // mail.protection.outlook.com must not be reported as a generic
        // outlook.com match for some other provider label
        let provider = detect_provider(&["corp.mail.protection.outlook.com".to_string()]);
        assert_eq!(provider.map(|p| p.name), Some("Microsoft 365".to_string()));
    }

    #[test]
    fn knows_first_names() {
        assert!(is_known_first_name("maria"));
        assert!(is_known_first_name("Hiroshi"));
        assert!(!is_known_first_name("qwxzy"));
    }
}
