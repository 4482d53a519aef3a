//! Domain typo detection against well-known mailbox providers.
//!
//! A domain one edit away from `gmail.com` is far more likely a typo
//! than a real zone. The suggestion is advisory: it feeds the result
//! narrative, never the confidence score.

use textdistance::str::levenshtein;
use tracing::debug;

use crate::tables;

/// Edit-distance ceiling for short provider names.
const SHORT_NAME_LEN: usize = 6;

/// Suggest a likely intended provider domain, if the given domain is a
/// near miss of a bundled free-provider domain.
pub fn suggest_domain(domain: &str) -> Option<String> {
    let domain = domain.trim().to_lowercase();
    if domain.is_empty() || tables::is_free_domain(&domain) {
        return None;
    }
    let (sld, tld) = domain.split_once('.')?;

    for provider in tables::free_provider_domains() {
        let Some((provider_sld, provider_tld)) = provider.split_once('.') else {
            continue;
        };
        if provider_tld != tld {
            continue;
        }
        let distance = levenshtein(sld, provider_sld);
        let is_typo = if provider_sld.len() <= SHORT_NAME_LEN {
            distance == 1
        } else {
            distance >= 1 && distance <= 2
        };
        if is_typo {
            debug!("domain {domain} looks like a typo of {provider} (distance {distance})");
            return Some(provider.to_string());
        }
    }
    None
}
