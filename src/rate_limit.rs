//! Rate limiting — per-source-IP sliding windows with escalating blocks.
//!
//! DESIGN
//! ======
//! Each source IP gets a sliding window of request timestamps. Exceeding the
//! window limit blocks the source outright; every repeat offense doubles the
//! block duration up to a ceiling, so a misbehaving client backs itself off
//! without any external state.
//!
//! The limiter is owned by `AppState` and cloned into handlers, so tests can
//! construct isolated instances with their own config. A background sweeper
//! evicts idle sources; it is started and stopped explicitly by whoever owns
//! the limiter (main in production, individual tests when they need one).
//!
//! State lives in process memory. Multi-instance deployments rate limit per
//! instance, which is accepted for this service's scale.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::envelope::ErrorCode;

// =============================================================================
// CONFIGURATION
// =============================================================================

const DEFAULT_PER_IP_LIMIT: usize = 20;
const DEFAULT_WINDOW_SECS: u64 = 60;
const DEFAULT_BLOCK_BASE_SECS: u64 = 60;
const DEFAULT_BLOCK_MAX_SECS: u64 = 3600;
const DEFAULT_SWEEP_SECS: u64 = 300;

/// Parse an environment variable, falling back to `default` when the variable
/// is unset or fails to parse.
fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse::<T>().ok())
        .unwrap_or(default)
}

/// Limiter tuning, read from the environment at construction time.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Requests allowed per source within one window.
    pub per_ip_limit: usize,
    /// Width of the sliding window.
    pub window: Duration,
    /// Block duration for a first offense; doubles per repeat.
    pub block_base: Duration,
    /// Ceiling for escalated blocks.
    pub block_max: Duration,
    /// How often the sweeper evicts idle sources.
    pub sweep_interval: Duration,
}

impl RateLimitConfig {
    /// Reads `RATE_LIMIT_PER_IP`, `RATE_LIMIT_WINDOW_SECS`,
    /// `RATE_LIMIT_BLOCK_BASE_SECS`, `RATE_LIMIT_BLOCK_MAX_SECS` and
    /// `RATE_LIMIT_SWEEP_SECS`.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            per_ip_limit: env_parse("RATE_LIMIT_PER_IP", DEFAULT_PER_IP_LIMIT),
            window: Duration::from_secs(env_parse("RATE_LIMIT_WINDOW_SECS", DEFAULT_WINDOW_SECS)),
            block_base: Duration::from_secs(env_parse("RATE_LIMIT_BLOCK_BASE_SECS", DEFAULT_BLOCK_BASE_SECS)),
            block_max: Duration::from_secs(env_parse("RATE_LIMIT_BLOCK_MAX_SECS", DEFAULT_BLOCK_MAX_SECS)),
            sweep_interval: Duration::from_secs(env_parse("RATE_LIMIT_SWEEP_SECS", DEFAULT_SWEEP_SECS)),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_ip_limit: DEFAULT_PER_IP_LIMIT,
            window: Duration::from_secs(DEFAULT_WINDOW_SECS),
            block_base: Duration::from_secs(DEFAULT_BLOCK_BASE_SECS),
            block_max: Duration::from_secs(DEFAULT_BLOCK_MAX_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_SECS),
        }
    }
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("rate limit exceeded: max {limit} requests per {window_secs}s, blocked for {retry_after_secs}s")]
    LimitExceeded { limit: usize, window_secs: u64, retry_after_secs: u64 },
    #[error("source is blocked, retry in {retry_after_secs}s")]
    Blocked { retry_after_secs: u64 },
}

impl RateLimitError {
    /// Seconds until the source may try again.
    #[must_use]
    pub fn retry_after_secs(&self) -> u64 {
        match self {
            Self::LimitExceeded { retry_after_secs, .. } | Self::Blocked { retry_after_secs } => *retry_after_secs,
        }
    }
}

impl ErrorCode for RateLimitError {
    fn error_code(&self) -> &'static str {
        "RATE_LIMITED"
    }

    fn suggested_action(&self) -> Option<&'static str> {
        Some("retry_after_delay")
    }
}

// =============================================================================
// LIMITER
// =============================================================================

struct SourceWindow {
    hits: VecDeque<Instant>,
    blocked_until: Option<Instant>,
    strikes: u32,
    last_seen: Instant,
}

struct RateLimiterInner {
    sources: HashMap<IpAddr, SourceWindow>,
}

/// Sliding-window limiter keyed by source IP. Cheap to clone.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Mutex<RateLimiterInner>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RateLimitConfig::from_env())
    }

    #[must_use]
    pub fn with_config(config: RateLimitConfig) -> Self {
        Self { inner: Arc::new(Mutex::new(RateLimiterInner { sources: HashMap::new() })), config }
    }

    /// Record one request from `source`, rejecting it when the source is over
    /// its window limit or currently blocked.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError`] when the request must be refused.
    pub fn check_and_record(&self, source: IpAddr) -> Result<(), RateLimitError> {
        self.check_and_record_at(source, Instant::now())
    }

    fn check_and_record_at(&self, source: IpAddr, now: Instant) -> Result<(), RateLimitError> {
        let config = self.config;
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        let window = inner.sources.entry(source).or_insert_with(|| SourceWindow {
            hits: VecDeque::new(),
            blocked_until: None,
            strikes: 0,
            last_seen: now,
        });
        window.last_seen = now;

        if let Some(until) = window.blocked_until {
            if now < until {
                return Err(RateLimitError::Blocked { retry_after_secs: secs_until(now, until) });
            }
            // Block has lapsed; strikes persist until the sweeper evicts the
            // source after a quiet period.
            window.blocked_until = None;
        }

        prune_window(&mut window.hits, now, config.window);

        if window.hits.len() >= config.per_ip_limit {
            window.strikes = window.strikes.saturating_add(1);
            let block = escalated_block(config.block_base, config.block_max, window.strikes);
            let until = now + block;
            window.blocked_until = Some(until);
            return Err(RateLimitError::LimitExceeded {
                limit: config.per_ip_limit,
                window_secs: config.window.as_secs(),
                retry_after_secs: secs_until(now, until),
            });
        }

        window.hits.push_back(now);
        Ok(())
    }

    /// Evict sources with no recent activity and no live block. Returns the
    /// number of sources removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    fn sweep_at(&self, now: Instant) -> usize {
        let window = self.config.window;
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let before = inner.sources.len();
        inner.sources.retain(|_, source| {
            if let Some(until) = source.blocked_until {
                if now < until {
                    return true;
                }
            }
            prune_window(&mut source.hits, now, window);
            !source.hits.is_empty()
        });
        before - inner.sources.len()
    }

    fn tracked_sources(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.sources.len()
    }

    /// Spawn the periodic sweeper. The task runs until [`SweeperHandle::stop`]
    /// is called or the handle is dropped into the void at shutdown.
    #[must_use]
    pub fn start_sweeper(&self) -> SweeperHandle {
        let limiter = self.clone();
        let every = self.config.sweep_interval;
        info!(sweep_secs = every.as_secs(), "rate limiter sweeper started");
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately; skip it so startup does
            // not sweep an empty map.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let evicted = limiter.sweep();
                if evicted > 0 {
                    debug!(evicted, remaining = limiter.tracked_sources(), "rate limiter sweep");
                }
            }
        });
        SweeperHandle { task }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to the background sweeper task.
pub struct SweeperHandle {
    task: tokio::task::JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop sweeping. Sources already tracked stay until process exit.
    pub fn stop(self) {
        self.task.abort();
        info!("rate limiter sweeper stopped");
    }
}

// =============================================================================
// HELPERS
// =============================================================================

/// Drop hits that fell out of the sliding window.
fn prune_window(hits: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&front) = hits.front() {
        if now.duration_since(front) >= window {
            hits.pop_front();
        } else {
            break;
        }
    }
}

/// Block duration for the nth strike: base * 2^(strikes-1), capped.
fn escalated_block(base: Duration, max: Duration, strikes: u32) -> Duration {
    let factor = 2_u32.saturating_pow(strikes.saturating_sub(1).min(16));
    base.saturating_mul(factor).min(max)
}

/// Whole seconds from `now` to `until`, rounded up so "retry in 0s" never
/// appears while a block is live.
fn secs_until(now: Instant, until: Instant) -> u64 {
    let remaining = until.saturating_duration_since(now);
    let secs = remaining.as_secs();
    if remaining.subsec_nanos() > 0 { secs + 1 } else { secs }
}

#[cfg(test)]
#[path = "rate_limit_test.rs"]
mod tests;
