//! Per-host token bucket with exponential-backoff failure tracking.
//!
//! Each probed MX host gets its own bucket, created lazily on first
//! reference and kept for the life of the process. `consume` does not
//! check backoff; callers gate with `can_proceed` first.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    pub max_tokens: f64,
    /// Tokens added per second.
    pub refill_rate: f64,
    /// Consecutive failures before backoff engages.
    pub failure_threshold: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_tokens: 10.0,
            refill_rate: 1.0,
            failure_threshold: 3,
            initial_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(300),
            backoff_multiplier: 2.0,
        }
    }
}

#[derive(Debug)]
struct HostState {
    tokens: f64,
    last_refill: Instant,
    failure_count: u32,
    backoff_until: Option<Instant>,
}

#[derive(Debug)]
pub struct HostThrottle {
    config: ThrottleConfig,
    hosts: HashMap<String, HostState>,
}

impl HostThrottle {
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            hosts: HashMap::new(),
        }
    }

    fn state(&mut self, host: &str) -> &mut HostState {
        let max_tokens = self.config.max_tokens;
        self.hosts
            .entry(host.to_lowercase())
            .or_insert_with(|| HostState {
                tokens: max_tokens,
                last_refill: Instant::now(),
                failure_count: 0,
                backoff_until: None,
            })
    }

    fn refill(state: &mut HostState, config: &ThrottleConfig) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * config.refill_rate).min(config.max_tokens);
        state.last_refill = now;
    }

    /// False while the host is in backoff or the bucket is dry.
    pub fn can_proceed(&mut self, host: &str) -> bool {
        let config = self.config.clone();
        let state = self.state(host);
        if let Some(until) = state.backoff_until {
            if Instant::now() < until {
                debug!("host {host} is backing off");
                return false;
            }
        }
        Self::refill(state, &config);
        state.tokens >= 1.0
    }

    /// Take one token if available. Does not consult backoff.
    pub fn consume(&mut self, host: &str) -> bool {
        let config = self.config.clone();
        let state = self.state(host);
        Self::refill(state, &config);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// A success ends any failure streak and lifts backoff.
    pub fn record_success(&mut self, host: &str) {
        let state = self.state(host);
        state.failure_count = 0;
        state.backoff_until = None;
    }

    /// Count a failure; at the threshold the backoff window starts
    /// doubling, capped at `max_backoff`.
    pub fn record_failure(&mut self, host: &str) {
        let config = self.config.clone();
        let state = self.state(host);
        state.failure_count += 1;
        if state.failure_count >= config.failure_threshold {
            let exponent = state.failure_count - config.failure_threshold;
            let backoff_secs = (config.initial_backoff.as_secs_f64()
                * config.backoff_multiplier.powi(exponent as i32))
            .min(config.max_backoff.as_secs_f64());
            let backoff = Duration::from_secs_f64(backoff_secs);
            state.backoff_until = Some(Instant::now() + backoff);
            warn!(
                "host {host} reached {} consecutive failures, backing off {:?}",
                state.failure_count, backoff
            );
        }
    }

    /// How long until the host can be probed: backoff remainder, zero
    /// when a token is ready, else time until the next token refills.
    pub fn wait_time(&mut self, host: &str) -> Duration {
        let config = self.config.clone();
        let state = self.state(host);
        let now = Instant::now();
        if let Some(until) = state.backoff_until {
            if now < until {
                return until.duration_since(now);
            }
        }
        Self::refill(state, &config);
        if state.tokens >= 1.0 {
            return Duration::ZERO;
        }
        let wait_ms = ((1.0 - state.tokens) / config.refill_rate * 1000.0).ceil();
        Duration::from_millis(wait_ms as u64)
    }

    pub fn reset(&mut self, host: &str) {
        self.hosts.remove(&host.to_lowercase());
    }

    pub fn clear(&mut self) {
        self.hosts.clear();
    }
}

impl Default for HostThrottle {
    fn default() -> Self {
        Self::new(ThrottleConfig::default())
    }
}
