//! Catch-all disambiguation scoring.
//!
//! When a domain accepts the synthetic probe as readily as the real one,
//! the RCPT answer alone says nothing about mailbox existence. This
//! module scores the secondary evidence: how person-like the local part
//! looks, whether its tokens contain a known given name, and whether the
//! RCPT-TO latencies of the real and synthetic probes separate
//! statistically.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::tables;
use crate::{CatchAllSignals, TimingAnalysis};

/// Confidence ceiling for any catch-all verdict.
pub const MAX_CATCH_ALL_CONFIDENCE: f64 = 0.85;

/// Estimated-deviation floor in milliseconds; loopback-fast servers
/// otherwise produce runaway z-scores.
const SIGMA_FLOOR_MS: f64 = 30.0;
const SIGMA_FRACTION: f64 = 0.3;

struct LocalPattern {
    re: Regex,
    score: f64,
    name: &'static str,
}

/// Ordered, first match wins; higher-scoring patterns come first.
static LOCAL_PATTERNS: Lazy<Vec<LocalPattern>> = Lazy::new(|| {
    [
        (r"^[a-z]+\.[a-z]+$", 0.90, "first.last"),
        (r"^[a-z]+\.[a-z]\.[a-z]+$", 0.90, "first.m.last"),
        (r"^[a-z]+_[a-z]+$", 0.85, "first_last"),
        (r"^[a-z]+-[a-z]+$", 0.85, "first-last"),
        (r"^[a-z]{4,}[a-z]{3,}$", 0.70, "firstlast"),
        (r"^[a-z][a-z]{3,}$", 0.60, "flast"),
        (r"^[a-z]{3,}[a-z]$", 0.50, "firstl"),
    ]
    .into_iter()
    .map(|(pattern, score, name)| LocalPattern {
        re: Regex::new(pattern).expect("local-part pattern is valid"),
        score,
        name,
    })
    .collect()
});

static SINGLE_WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z]{3,12}$").expect("single-word pattern is valid"));

/// Score how much the local part looks like an addressing convention a
/// company would hand out to a real person.
pub fn pattern_score(local: &str) -> (f64, Option<&'static str>) {
    if local.is_empty() {
        return (0.0, None);
    }
    let local = local.to_lowercase();
    for pattern in LOCAL_PATTERNS.iter() {
        if pattern.re.is_match(&local) {
            return (pattern.score, Some(pattern.name));
        }
    }
    if local
        .split(['.', '_', '-'])
        .any(tables::is_known_first_name)
    {
        return (0.60, Some("contains_name"));
    }
    if SINGLE_WORD_RE.is_match(&local) {
        return (0.40, Some("single_word"));
    }
    if local.chars().any(|c| c.is_ascii_digit()) {
        return (0.20, Some("contains_numbers"));
    }
    (0.30, Some("unknown"))
}

/// Score how likely the local part names an actual person.
pub fn name_score(local: &str) -> f64 {
    if local.is_empty() {
        return 0.0;
    }
    let local = local.to_lowercase();
    let parts: Vec<&str> = local.split(['.', '_', '-']).collect();
    if parts.len() >= 2 {
        let lead_alpha = parts[..2]
            .iter()
            .all(|part| (2..=15).contains(&part.len()) && part.chars().all(|c| c.is_ascii_alphabetic()));
        if lead_alpha {
            return if tables::is_known_first_name(parts[0]) {
                0.95
            } else {
                0.75
            };
        }
    }
    if tables::is_known_first_name(&local) {
        return 0.70;
    }
    if SINGLE_WORD_RE.is_match(&local) {
        return 0.50;
    }
    let noisy = local
        .chars()
        .any(|c| c.is_ascii_digit() || !(c.is_ascii_lowercase() || matches!(c, '.' | '_' | '-')));
    if noisy {
        return 0.20;
    }
    0.30
}

/// Z-score comparison of real vs synthetic RCPT-TO latencies.
///
/// The deviation estimate is `max(0.3 * fake_avg, 30ms)`; a zero average
/// on either side means a probe produced no usable timing.
pub fn analyze_timing(real_avg_ms: f64, fake_avg_ms: f64) -> TimingAnalysis {
    if real_avg_ms <= 0.0 || fake_avg_ms <= 0.0 {
        return TimingAnalysis {
            z_score: 0.0,
            confidence: 0.50,
            reason: "insufficient timing data to compare probes".to_string(),
        };
    }
    let sigma = (SIGMA_FRACTION * fake_avg_ms).max(SIGMA_FLOOR_MS);
    let z = (real_avg_ms - fake_avg_ms).abs() / sigma;
    let (confidence, reason) = if z > 5.0 {
        (0.85, format!("very strong timing separation (z={z:.1})"))
    } else if z > 3.0 {
        (0.75, format!("strong timing separation (z={z:.1})"))
    } else if z > 2.0 {
        (0.65, format!("moderate timing separation (z={z:.1})"))
    } else {
        (0.50, format!("no significant timing separation (z={z:.1})"))
    };
    TimingAnalysis {
        z_score: z,
        confidence,
        reason,
    }
}

/// Penalty applied to catch-all confidence for unconvincing local parts.
/// Never positive.
pub fn pattern_penalty(pattern: f64, name: f64) -> f64 {
    if pattern >= 0.70 {
        0.0
    } else if pattern >= 0.50 {
        if name >= 0.70 {
            0.0
        } else {
            -0.05
        }
    } else if pattern >= 0.30 {
        if name >= 0.70 {
            -0.10
        } else {
            -0.15
        }
    } else {
        -0.25
    }
}

/// Final catch-all confidence: the timing band plus the pattern penalty,
/// clamped to `[0, 0.85]`.
pub fn catch_all_confidence(timing_band: f64, pattern: f64, name: f64) -> f64 {
    (timing_band + pattern_penalty(pattern, name)).clamp(0.0, MAX_CATCH_ALL_CONFIDENCE)
}

/// Legacy weighted-sum scoring, kept as an alternate entry point.
///
/// The orchestrator's z-score path is authoritative; this routine never
/// drives the public confidence.
pub fn weighted_confidence(signals: &CatchAllSignals) -> f64 {
    let infrastructure = {
        let mut score: f64 = 0.0;
        if signals.has_spf {
            score += 0.4;
        }
        if signals.has_dmarc {
            score += 0.4;
        }
        if signals.mx_count > 1 {
            score += 0.2;
        }
        score
    };
    (0.35 * signals.pattern_match
        + 0.25 * signals.name_score
        + 0.25 * signals.timing_score
        + 0.15 * infrastructure)
        .clamp(0.0, 1.0)
}
