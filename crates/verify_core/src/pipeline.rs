//! The verification pipeline.
//!
//! Orchestrates cache lookup, static detections, syntax, DNS, the
//! throttled SMTP probe, catch-all differentiation, and confidence
//! synthesis, in that order. Network failures never escape: every
//! outcome is folded into the returned [`VerificationResult`].
//!
//! Caching rules: only accepted, rejected, and DNS-invalid outcomes are
//! memoized. Unknown, throttled, and syntax-invalid results are not, so
//! a later call can succeed once conditions change.

use std::time::Duration;

use once_cell::sync::Lazy;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::cache::{self, TtlCache};
use crate::catch_all;
use crate::dns::DnsResolver;
use crate::format;
use crate::smtp;
use crate::tables;
use crate::throttle::HostThrottle;
use crate::typo;
use crate::{
    CatchAllSignals, DnsResult, MailProvider, MxRecord, SmtpStatus, TimingAnalysis,
    VerificationChecks, VerificationDetails, VerificationResult, VerifyOptions,
};

/// Internal query timeout for the shared resolver; per-call timeouts are
/// raced on top of it.
const RESOLVER_TIMEOUT_MS: u64 = 5_000;

/// Verification engine owning the caches, the throttle, and the resolver.
///
/// The free functions [`verify_email`], [`verify_emails`],
/// [`clear_caches`], and [`clear_throttle`] are sugar over a process-wide
/// default instance.
pub struct Verifier {
    resolver: DnsResolver,
    email_cache: Mutex<TtlCache<VerificationResult>>,
    dns_cache: Mutex<TtlCache<DnsResult>>,
    throttle: Mutex<HostThrottle>,
}

/// Result under construction; `finish` derives the dependent checks.
struct Draft {
    email: String,
    format_valid: bool,
    mx_records: Vec<MxRecord>,
    smtp_status: SmtpStatus,
    catch_all: Option<bool>,
    provider: Option<MailProvider>,
    signals: Option<CatchAllSignals>,
    suggestion: Option<String>,
    reasons: Vec<String>,
    is_disposable: bool,
    is_role: bool,
    is_free: bool,
    is_unknown: bool,
    valid: bool,
    confidence: f64,
}

impl Draft {
    fn new(email: String) -> Self {
        Self {
            email,
            format_valid: false,
            mx_records: Vec::new(),
            smtp_status: SmtpStatus::Skipped,
            catch_all: None,
            provider: None,
            signals: None,
            suggestion: None,
            reasons: Vec::new(),
            is_disposable: false,
            is_role: false,
            is_free: false,
            is_unknown: false,
            valid: false,
            confidence: 0.0,
        }
    }

    fn finish(self) -> VerificationResult {
        let is_catch_all = self.catch_all.unwrap_or(false);
        let checks = VerificationChecks {
            is_valid_syntax: self.format_valid,
            is_valid_domain: !self.mx_records.is_empty(),
            can_connect_smtp: !matches!(
                self.smtp_status,
                SmtpStatus::Unknown | SmtpStatus::Skipped
            ),
            is_deliverable: self.smtp_status == SmtpStatus::Accepted,
            is_catch_all_domain: is_catch_all,
            is_disposable_email: self.is_disposable,
            is_role_based_account: self.is_role,
            is_free_email_provider: self.is_free,
            is_unknown: self.is_unknown,
        };
        // for catch-all domains, safety additionally requires a clear
        // timing separation between the real and synthetic probes
        let z_ok = !is_catch_all
            || self
                .signals
                .as_ref()
                .and_then(|signals| signals.z_score)
                .map(|z| z > 2.0)
                .unwrap_or(false);
        let is_safe_to_send = checks.is_valid_syntax
            && checks.is_valid_domain
            && checks.is_deliverable
            && !checks.is_disposable_email
            && !checks.is_role_based_account
            && z_ok;
        VerificationResult {
            email: self.email,
            valid: self.valid,
            confidence: self.confidence,
            is_safe_to_send,
            checks,
            details: VerificationDetails {
                format_valid: self.format_valid,
                mx_records: self.mx_records,
                smtp_status: self.smtp_status,
                catch_all: self.catch_all,
                provider: self.provider,
                catch_all_signals: self.signals,
                suggestion: self.suggestion,
                confidence_reasons: self.reasons,
            },
        }
    }
}

impl Verifier {
    pub fn new() -> Self {
        Self {
            resolver: DnsResolver::new(RESOLVER_TIMEOUT_MS),
            email_cache: Mutex::new(TtlCache::default()),
            dns_cache: Mutex::new(TtlCache::default()),
            throttle: Mutex::new(HostThrottle::default()),
        }
    }

    /// Verify a single address. Never fails; every network or input
    /// problem is reflected in the result.
    #[instrument(skip(self, options), fields(email = %email))]
    pub async fn verify_email(&self, email: &str, options: &VerifyOptions) -> VerificationResult {
        let normalized = format::normalize_email(email);
        let cache_key = cache::email_cache_key(&normalized);

        if let Some(hit) = self.email_cache.lock().await.get(&cache_key) {
            debug!("email cache hit");
            return hit;
        }

        // static detections need no I/O and run even for bad syntax
        let local = format::extract_local_part(&normalized);
        let domain = format::extract_domain(&normalized);
        let mut draft = Draft::new(normalized.clone());
        draft.is_disposable = domain
            .as_deref()
            .map(tables::is_disposable_domain)
            .unwrap_or(false);
        draft.is_role = local
            .as_deref()
            .map(tables::is_role_based_local_part)
            .unwrap_or(false);
        draft.is_free = domain.as_deref().map(tables::is_free_domain).unwrap_or(false);
        if draft.is_disposable {
            draft
                .reasons
                .push("domain belongs to a disposable mail provider".to_string());
        }
        if draft.is_role {
            draft.reasons.push("local part is a role account".to_string());
        }
        if draft.is_free {
            draft
                .reasons
                .push("domain is a free mailbox provider".to_string());
        }

        // syntax failures are final but never cached
        let (local, domain) = match (local, domain) {
            (Some(local), Some(domain)) if format::is_valid_format(&normalized) => {
                draft.format_valid = true;
                (local, domain)
            }
            _ => {
                draft
                    .reasons
                    .push("address fails RFC 5322 syntax".to_string());
                return draft.finish();
            }
        };

        draft.suggestion = typo::suggest_domain(&domain);
        if let Some(suggestion) = &draft.suggestion {
            draft
                .reasons
                .push(format!("domain may be a typo of {suggestion}"));
        }

        // DNS through the domain cache
        let dns_key = cache::domain_cache_key(&domain);
        let dns_result = {
            let cached = self.dns_cache.lock().await.get(&dns_key);
            match cached {
                Some(result) => result,
                None => {
                    let result = self
                        .resolver
                        .check_dns(&domain, Duration::from_millis(options.dns_timeout_ms))
                        .await;
                    self.dns_cache
                        .lock()
                        .await
                        .set(&dns_key, result.clone(), None);
                    result
                }
            }
        };

        if !dns_result.has_valid_dns {
            draft
                .reasons
                .push(format!("no MX or A records found for {domain}"));
            let result = draft.finish();
            self.email_cache
                .lock()
                .await
                .set(&cache_key, result.clone(), None);
            return result;
        }
        draft.mx_records = dns_result.mx_records;
        draft
            .reasons
            .push(format!("{} MX record(s) found", draft.mx_records.len()));

        let mx_hosts: Vec<String> = draft
            .mx_records
            .iter()
            .map(|record| record.exchange.clone())
            .collect();
        draft.provider = tables::detect_provider(&mx_hosts);
        if let Some(provider) = &draft.provider {
            draft
                .reasons
                .push(format!("mail handled by {}", provider.name));
        }

        // SMTP gate
        if !options.smtp_check || mx_hosts.is_empty() {
            draft.reasons.push("SMTP probe skipped".to_string());
            draft.valid = true;
            draft.confidence = 0.70;
            draft.is_unknown = true;
            return draft.finish();
        }

        let primary_mx = mx_hosts[0].clone();
        {
            let mut throttle = self.throttle.lock().await;
            if !throttle.can_proceed(&primary_mx) {
                let wait = throttle.wait_time(&primary_mx);
                debug!("{primary_mx} throttled for {wait:?}");
                draft.reasons.push(format!(
                    "{primary_mx} is rate limited, retry in {} ms",
                    wait.as_millis()
                ));
                draft.smtp_status = SmtpStatus::Unknown;
                draft.valid = true;
                draft.confidence = 0.5;
                draft.is_unknown = true;
                return draft.finish();
            }
            throttle.consume(&primary_mx);
        }

        let real = smtp::probe_with_timing_stats(
            &mx_hosts,
            options.smtp_port,
            &normalized,
            &options.sender_email,
            options.smtp_timeout_ms,
            smtp::DEFAULT_TIMING_PROBES,
        )
        .await;
        {
            let mut throttle = self.throttle.lock().await;
            if real.result.status == SmtpStatus::Unknown {
                throttle.record_failure(&primary_mx);
            } else {
                throttle.record_success(&primary_mx);
            }
        }
        draft.smtp_status = real.result.status;

        match real.result.status {
            SmtpStatus::Rejected => {
                let code = real
                    .result
                    .response_code
                    .map(|code| code.to_string())
                    .unwrap_or_else(|| "5xx".to_string());
                draft.reasons.push(format!("recipient rejected with {code}"));
                let result = draft.finish();
                self.email_cache
                    .lock()
                    .await
                    .set(&cache_key, result.clone(), None);
                return result;
            }
            SmtpStatus::Unknown => {
                draft
                    .reasons
                    .push("SMTP dialog was inconclusive".to_string());
                draft.valid = true;
                draft.confidence = 0.5;
                draft.is_unknown = true;
                return draft.finish();
            }
            _ => {}
        }
        draft
            .reasons
            .push("SMTP server accepted the recipient".to_string());

        // catch-all differentiation with a synthetic local part
        let mut timing_band: Option<TimingAnalysis> = None;
        let mut pattern = 0.0;
        let mut name = 0.0;
        if options.catch_all_check && !mx_hosts.is_empty() {
            let synthetic = format!("x9x0{local}@{domain}");
            debug!("running catch-all probe with {synthetic}");
            let fake = smtp::probe_with_timing_stats(
                &mx_hosts,
                options.smtp_port,
                &synthetic,
                &options.sender_email,
                options.smtp_timeout_ms,
                smtp::DEFAULT_TIMING_PROBES,
            )
            .await;
            let is_catch_all = fake.result.status == SmtpStatus::Accepted;
            draft.catch_all = Some(is_catch_all);
            if is_catch_all {
                draft
                    .reasons
                    .push("domain accepts any recipient (catch-all)".to_string());
            } else {
                draft
                    .reasons
                    .push("synthetic recipient was not accepted".to_string());
            }

            let (pattern_match, pattern_name) = catch_all::pattern_score(&local);
            pattern = pattern_match;
            name = catch_all::name_score(&local);

            let dns_timeout = Duration::from_millis(options.dns_timeout_ms);
            let (has_spf, has_dmarc) = tokio::join!(
                self.resolver.check_spf(&domain, dns_timeout),
                self.resolver.check_dmarc(&domain, dns_timeout),
            );
            if has_spf {
                draft.reasons.push("SPF record present".to_string());
            }
            if has_dmarc {
                draft.reasons.push("DMARC policy present".to_string());
            }

            let analysis = catch_all::analyze_timing(real.avg_rcpt_to_ms, fake.avg_rcpt_to_ms);
            draft.reasons.push(analysis.reason.clone());
            draft.signals = Some(CatchAllSignals {
                pattern_match,
                pattern_name: pattern_name.map(str::to_string),
                name_score: name,
                timing_score: analysis.confidence,
                z_score: Some(analysis.z_score),
                has_spf,
                has_dmarc,
                mx_count: draft.mx_records.len(),
                timing_analysis: Some(analysis.clone()),
            });
            timing_band = Some(analysis);
        }

        // confidence synthesis
        draft.valid = true;
        match (draft.catch_all, &timing_band) {
            (Some(true), Some(analysis)) => {
                draft.confidence =
                    catch_all::catch_all_confidence(analysis.confidence, pattern, name);
                draft.is_unknown = analysis.confidence <= 0.65;
            }
            _ => {
                draft.confidence = 0.95;
            }
        }

        let result = draft.finish();
        self.email_cache
            .lock()
            .await
            .set(&cache_key, result.clone(), None);
        result
    }

    /// Verify addresses one at a time, in order, to play nicely with the
    /// per-host throttle.
    pub async fn verify_emails(
        &self,
        emails: &[String],
        options: &VerifyOptions,
    ) -> Vec<VerificationResult> {
        let mut results = Vec::with_capacity(emails.len());
        for email in emails {
            results.push(self.verify_email(email, options).await);
        }
        results
    }

    /// Resolve the MX set for a domain (A-record fallback included).
    pub async fn check_dns(&self, domain: &str, timeout_ms: u64) -> DnsResult {
        self.resolver
            .check_dns(domain, Duration::from_millis(timeout_ms))
            .await
    }

    /// TXT presence check for `v=spf1` at the domain.
    pub async fn check_spf(&self, domain: &str, timeout_ms: u64) -> bool {
        self.resolver
            .check_spf(domain, Duration::from_millis(timeout_ms))
            .await
    }

    /// TXT presence check for `v=dmarc1` at `_dmarc.<domain>`.
    pub async fn check_dmarc(&self, domain: &str, timeout_ms: u64) -> bool {
        self.resolver
            .check_dmarc(domain, Duration::from_millis(timeout_ms))
            .await
    }

    pub async fn clear_caches(&self) {
        self.email_cache.lock().await.clear();
        self.dns_cache.lock().await.clear();
    }

    pub async fn clear_throttle(&self) {
        self.throttle.lock().await.clear();
    }
}

impl Default for Verifier {
    fn default() -> Self {
        Self::new()
    }
}

static DEFAULT_VERIFIER: Lazy<Verifier> = Lazy::new(Verifier::new);

/// Verify a single address against the default engine.
pub async fn verify_email(email: &str, options: &VerifyOptions) -> VerificationResult {
    DEFAULT_VERIFIER.verify_email(email, options).await
}

/// Verify a batch sequentially against the default engine.
pub async fn verify_emails(emails: &[String], options: &VerifyOptions) -> Vec<VerificationResult> {
    DEFAULT_VERIFIER.verify_emails(emails, options).await
}

/// Resolve MX records via the default engine's resolver.
pub async fn check_dns(domain: &str, timeout_ms: u64) -> DnsResult {
    DEFAULT_VERIFIER.check_dns(domain, timeout_ms).await
}

/// SPF presence via the default engine's resolver.
pub async fn check_spf(domain: &str, timeout_ms: u64) -> bool {
    DEFAULT_VERIFIER.check_spf(domain, timeout_ms).await
}

/// DMARC presence via the default engine's resolver.
pub async fn check_dmarc(domain: &str, timeout_ms: u64) -> bool {
    DEFAULT_VERIFIER.check_dmarc(domain, timeout_ms).await
}

/// Drop every memoized email and DNS result on the default engine.
pub async fn clear_caches() {
    DEFAULT_VERIFIER.clear_caches().await;
}

/// Forget all throttle state on the default engine.
pub async fn clear_throttle() {
    DEFAULT_VERIFIER.clear_throttle().await;
}
