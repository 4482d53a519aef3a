//! # verify_core
//!
//! Email deliverability verification without sending mail.
//!
//! The pipeline walks an address through syntax validation, MX resolution,
//! an SMTP `RCPT TO` probe with per-stage timing, and catch-all
//! disambiguation, then synthesises a calibrated confidence score with
//! structured diagnostic flags.
//!
//! ## Example
//!
//! ```rust,no_run
//! use verify_core::{verify_email, VerifyOptions};
//!
//! #[tokio::main]
//! async fn main() {
//!     let result = verify_email("user@example.com", &VerifyOptions::default()).await;
//!     println!("deliverable: {} ({:.2})", result.valid, result.confidence);
//! }
//! ```

pub mod cache;
pub mod catch_all;
pub mod dns;
pub mod format;
pub mod pipeline;
pub mod smtp;
pub mod tables;
pub mod throttle;
pub mod typo;

use serde::{Deserialize, Serialize};

/// Options accepted by [`verify_email`] and [`verify_emails`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyOptions {
    /// DNS lookup timeout in milliseconds.
    pub dns_timeout_ms: u64,
    /// Per-operation SMTP timeout in milliseconds.
    pub smtp_timeout_ms: u64,
    /// Perform the SMTP RCPT-TO probe.
    pub smtp_check: bool,
    /// Differentiate catch-all domains with a second, synthetic probe.
    pub catch_all_check: bool,
    /// Envelope sender used for `MAIL FROM` and the `EHLO` domain.
    pub sender_email: String,
    /// SMTP port to probe.
    pub smtp_port: u16,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            dns_timeout_ms: 5_000,
            smtp_timeout_ms: 10_000,
            smtp_check: true,
            catch_all_check: true,
            sender_email: "test@example.com".to_string(),
            smtp_port: 25,
        }
    }
}

/// A single MX record, already stripped of the trailing root dot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MxRecord {
    pub exchange: String,
    pub priority: u16,
}

/// Outcome of MX/A resolution for a domain.
///
/// When a domain has no MX but does have an A record, a single implicit
/// MX `{domain, 0}` is synthesised per RFC 5321.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsResult {
    pub mx_records: Vec<MxRecord>,
    pub has_valid_dns: bool,
}

impl DnsResult {
    pub fn empty() -> Self {
        Self {
            mx_records: Vec::new(),
            has_valid_dns: false,
        }
    }
}

/// Final classification of the SMTP dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmtpStatus {
    /// 2xx to `RCPT TO`.
    Accepted,
    /// 5xx to `RCPT TO`.
    Rejected,
    /// 4xx, timeout, connect error, or dialog failure before `RCPT TO`.
    Unknown,
    /// Probe not performed.
    Skipped,
}

/// Millisecond duration of each dialog stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpTiming {
    pub connect: u64,
    pub banner: u64,
    pub ehlo: u64,
    pub mail_from: u64,
    pub rcpt_to: u64,
    pub total: u64,
}

/// Result of a single RCPT-TO probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpResult {
    pub status: SmtpStatus,
    pub response_code: Option<u16>,
    pub response_message: Option<String>,
    /// End-to-end probe wall time in milliseconds.
    pub response_time: u64,
    pub timing: Option<SmtpTiming>,
}

/// Aggregate over `n` sequential probes of the same recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeStats {
    /// Last non-unknown result if any, else the final unknown one.
    pub result: SmtpResult,
    pub timings: Vec<SmtpTiming>,
    /// Mean RCPT-TO latency over probes with `rcpt_to > 0`.
    pub avg_rcpt_to_ms: f64,
    pub min_rcpt_to_ms: u64,
    pub max_rcpt_to_ms: u64,
}

/// Z-score comparison of real vs synthetic RCPT-TO latencies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingAnalysis {
    pub z_score: f64,
    pub confidence: f64,
    pub reason: String,
}

/// Signals feeding catch-all confidence synthesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatchAllSignals {
    pub pattern_match: f64,
    pub pattern_name: Option<String>,
    pub name_score: f64,
    pub timing_score: f64,
    pub z_score: Option<f64>,
    pub has_spf: bool,
    pub has_dmarc: bool,
    pub mx_count: usize,
    pub timing_analysis: Option<TimingAnalysis>,
}

/// A detected hosted-mail provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailProvider {
    pub name: String,
}

/// The nine independent boolean checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationChecks {
    pub is_valid_syntax: bool,
    pub is_valid_domain: bool,
    pub can_connect_smtp: bool,
    pub is_deliverable: bool,
    pub is_catch_all_domain: bool,
    pub is_disposable_email: bool,
    pub is_role_based_account: bool,
    pub is_free_email_provider: bool,
    pub is_unknown: bool,
}

/// Supporting evidence for a [`VerificationResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationDetails {
    pub format_valid: bool,
    pub mx_records: Vec<MxRecord>,
    pub smtp_status: SmtpStatus,
    /// `None` iff the probe never accepted or the catch-all check was off.
    pub catch_all: Option<bool>,
    pub provider: Option<MailProvider>,
    pub catch_all_signals: Option<CatchAllSignals>,
    /// Suggested correction when the domain looks like a provider typo.
    pub suggestion: Option<String>,
    pub confidence_reasons: Vec<String>,
}

/// Complete verification verdict for one address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub email: String,
    pub valid: bool,
    /// Calibrated confidence in `[0, 1]`; always 0 when `valid` is false.
    pub confidence: f64,
    pub is_safe_to_send: bool,
    pub checks: VerificationChecks,
    pub details: VerificationDetails,
}

// Re-export the public surface.
pub use cache::{domain_cache_key, email_cache_key};
pub use catch_all::{
    analyze_timing, catch_all_confidence, name_score, pattern_penalty, pattern_score,
    weighted_confidence,
};
pub use dns::get_primary_mx;
pub use format::{extract_domain, extract_local_part, is_valid_format, normalize_email};
pub use pipeline::{
    check_dns, check_dmarc, check_spf, clear_caches, clear_throttle, verify_email, verify_emails,
    Verifier,
};
pub use smtp::{probe_with_fallback, probe_with_timing_stats, smtp_probe};
pub use tables::{
    detect_provider, is_disposable_domain, is_disposable_email, is_free_domain, is_free_email,
    is_role_based_email, is_role_based_local_part,
};
pub use typo::suggest_domain;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn smtp_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&SmtpStatus::Accepted).unwrap(),
            "\"accepted\""
        );
        assert_eq!(
            serde_json::to_string(&SmtpStatus::Rejected).unwrap(),
            "\"rejected\""
        );
        assert_eq!(
            serde_json::to_string(&SmtpStatus::Unknown).unwrap(),
            "\"unknown\""
        );
        assert_eq!(
            serde_json::to_string(&SmtpStatus::Skipped).unwrap(),
            "\"skipped\""
        );
    }

    #[test]
    fn default_options_match_documented_values() {
        let options = VerifyOptions::default();
        assert_eq!(options.dns_timeout_ms, 5_000);
        assert_eq!(options.smtp_timeout_ms, 10_000);
        assert!(options.smtp_check);
        assert!(options.catch_all_check);
        assert_eq!(options.sender_email, "test@example.com");
        assert_eq!(options.smtp_port, 25);
    }
}
