//! MX/A resolution and SPF/DMARC presence checks using hickory-resolver.
//!
//! DNS is advisory: every resolver error and timeout maps to an empty
//! result or `false`, never an `Err`. Each lookup is raced against its
//! own timer in addition to the resolver's internal timeout.

use std::time::Duration;

use hickory_resolver::{
    config::{ResolverConfig, ResolverOpts},
    AsyncResolver, TokioAsyncResolver,
};
use tracing::{debug, info};

use crate::{DnsResult, MxRecord};

const RESOLVER_ATTEMPTS: usize = 2;
const RESOLVER_CACHE_SIZE: usize = 1024;

/// DNS resolver wrapper with email-verification defaults.
pub struct DnsResolver {
    resolver: TokioAsyncResolver,
}

impl DnsResolver {
    /// Create a resolver with the given internal query timeout.
    pub fn new(timeout_ms: u64) -> Self {
        let config = ResolverConfig::cloudflare();

        let mut opts = ResolverOpts::default();
        opts.timeout = Duration::from_millis(timeout_ms);
        opts.attempts = RESOLVER_ATTEMPTS;
        opts.cache_size = RESOLVER_CACHE_SIZE;
        opts.negative_min_ttl = Some(Duration::from_secs(30));
        opts.positive_max_ttl = Some(Duration::from_secs(3600));

        let resolver = AsyncResolver::tokio(config, opts);
        info!("DNS resolver initialized, timeout {timeout_ms}ms");

        Self { resolver }
    }

    /// Resolve the MX set for a domain, falling back to the RFC 5321
    /// implicit MX when only an A record exists.
    pub async fn check_dns(&self, domain: &str, timeout: Duration) -> DnsResult {
        match tokio::time::timeout(timeout, self.resolver.mx_lookup(domain)).await {
            Ok(Ok(lookup)) => {
                let mut records: Vec<MxRecord> = lookup
                    .iter()
                    .map(|mx| MxRecord {
                        exchange: mx.exchange().to_utf8().trim_end_matches('.').to_string(),
                        priority: mx.preference(),
                    })
                    .collect();
                if !records.is_empty() {
                    sort_mx_records(&mut records);
                    debug!("domain {domain} has {} MX record(s)", records.len());
                    return DnsResult {
                        mx_records: records,
                        has_valid_dns: true,
                    };
                }
            }
            Ok(Err(e)) => debug!("MX lookup failed for {domain}: {e}"),
            Err(_) => debug!("MX lookup timed out for {domain}"),
        }

        match tokio::time::timeout(timeout, self.resolver.ipv4_lookup(domain)).await {
            Ok(Ok(lookup)) if lookup.iter().next().is_some() => {
                debug!("domain {domain} has no MX, using implicit MX from A record");
                DnsResult {
                    mx_records: vec![MxRecord {
                        exchange: domain.to_string(),
                        priority: 0,
                    }],
                    has_valid_dns: true,
                }
            }
            Ok(Ok(_)) => DnsResult::empty(),
            Ok(Err(e)) => {
                debug!("A lookup failed for {domain}: {e}");
                DnsResult::empty()
            }
            Err(_) => {
                debug!("A lookup timed out for {domain}");
                DnsResult::empty()
            }
        }
    }

    /// True iff any TXT record at the domain starts with `v=spf1`.
    pub async fn check_spf(&self, domain: &str, timeout: Duration) -> bool {
        self.txt_record_with_prefix(domain, "v=spf1", timeout).await
    }

    /// True iff any TXT record at `_dmarc.<domain>` starts with `v=dmarc1`.
    pub async fn check_dmarc(&self, domain: &str, timeout: Duration) -> bool {
        let dmarc_domain = format!("_dmarc.{domain}");
        self.txt_record_with_prefix(&dmarc_domain, "v=dmarc1", timeout)
            .await
    }

    async fn txt_record_with_prefix(&self, name: &str, prefix: &str, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, self.resolver.txt_lookup(name)).await {
            Ok(Ok(lookup)) => lookup.iter().any(|txt| {
                let record: String = txt
                    .txt_data()
                    .iter()
                    .map(|chunk| String::from_utf8_lossy(chunk))
                    .collect();
                record.trim().to_lowercase().starts_with(prefix)
            }),
            Ok(Err(e)) => {
                debug!("TXT lookup failed for {name}: {e}");
                false
            }
            Err(_) => {
                debug!("TXT lookup timed out for {name}");
                false
            }
        }
    }
}

/// Ascending priority; ties keep their original order.
pub(crate) fn sort_mx_records(records: &mut [MxRecord]) {
    records.sort_by_key(|record| record.priority);
}

/// The preferred exchange, if any records exist.
pub fn get_primary_mx(records: &[MxRecord]) -> Option<&str> {
    records.first().map(|record| record.exchange.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn mx(exchange: &str, priority: u16) -> MxRecord {
        MxRecord {
            exchange: exchange.to_string(),
            priority,
        }
    }

    #[test]
    fn sorts_by_priority_with_stable_ties() {
        let mut records = vec![
            mx("c.example.com", 20),
            mx("a.example.com", 10),
            mx("b.example.com", 10),
            mx("d.example.com", 5),
        ];
        sort_mx_records(&mut records);
        let order: Vec<&str> = records.iter().map(|r| r.exchange.as_str()).collect();
        assert_eq!(
            order,
            vec![
                "d.example.com",
                "a.example.com",
                "b.example.com",
                "c.example.com"
            ]
        );
    }

    #[test]
    fn primary_mx_is_first_or_none() {
        let records = vec![mx("a.example.com", 10), mx("b.example.com", 20)];
        assert_eq!(get_primary_mx(&records), Some("a.example.com"));
        assert_eq!(get_primary_mx(&[]), None);
    }

    #[tokio::test]
    async fn reserved_tld_resolves_to_nothing() {
        let resolver = DnsResolver::new(1500);
        let result = resolver
            .check_dns("rcptcheck-test.invalid", Duration::from_millis(1500))
            .await;
        assert!(!result.has_valid_dns);
        assert!(result.mx_records.is_empty());
    }

    #[tokio::test]
    async fn spf_check_is_false_when_lookup_fails() {
        let resolver = DnsResolver::new(1500);
        assert!(
            !resolver
                .check_spf("rcptcheck-test.invalid", Duration::from_millis(1500))
                .await
        );
        assert!(
            !resolver
                .check_dmarc("rcptcheck-test.invalid", Duration::from_millis(1500))
                .await
        );
    }
}
