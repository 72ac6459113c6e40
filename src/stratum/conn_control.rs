//! Connection control: miner bans and access judgment
//!
//! Tracks per-session accept/error counters, bans miners whose error rate
//! crosses the abuse threshold, and sweeps stale ban entries in the
//! background. Per-IP throughput/connection limiters and the whitelist are
//! constructed from configuration but wiring them into connection admission
//! is a declared, optional extension.

use std::collections::HashSet;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{Error, Result};

/// A session becomes ban-eligible at this many total submissions
const BAN_MIN_SUBMISSIONS: u64 = 100;
/// ...with at least this share of them erroneous
const BAN_ERROR_RATE: f64 = 0.5;
/// Sweep removes entries whose expiry is older than this
const SWEEP_GRACE: Duration = Duration::from_secs(30 * 60);

/// Per-session accepted/error submission counters.
///
/// Owned by the session; only its own loops increment, the judge call may
/// reset both at ban time.
#[derive(Debug, Default)]
pub struct SessionCounters {
    accepted: AtomicU64,
    errors: AtomicU64,
}

impl SessionCounters {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one accepted submission
    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one erroneous submission
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Accepted submissions so far
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Erroneous submissions so far
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Reset both counters (at ban time)
    pub fn reset(&self) {
        self.accepted.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
    }
}

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Build a per-second quota, treating zero as one
fn quota_per_second(rate: u32, burst: u32) -> Quota {
    let rate = NonZeroU32::new(rate).unwrap_or(NonZeroU32::MIN);
    let burst = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);
    Quota::per_second(rate).allow_burst(burst)
}

/// Per-IP throughput and connection limiters
pub struct IpLimiter {
    throughput: DirectLimiter,
    connection: DirectLimiter,
}

impl IpLimiter {
    fn new(throughput: Quota, connection: Quota) -> Self {
        Self {
            throughput: RateLimiter::direct(throughput),
            connection: RateLimiter::direct(connection),
        }
    }

    /// Take one message token if available
    pub fn allow_message(&self) -> bool {
        self.throughput.check().is_ok()
    }

    /// Take one connection token if available
    pub fn allow_connection(&self) -> bool {
        self.connection.check().is_ok()
    }
}

/// Configuration for [`ConnectionControl`]
#[derive(Debug, Clone)]
pub struct ConnControlConfig {
    /// Ban duration; zero disables the ban mechanism entirely
    pub ban_period: Duration,
    /// Whether IP-level banning is enabled (advisory extension)
    pub ip_ban_enable: bool,
    /// Max messages per second per IP
    pub max_throughput: u32,
    /// Max connections per second per IP
    pub max_connection: u32,
    /// Burst multiplier for throughput
    pub throughput_ratio: f64,
    /// Burst multiplier for connections
    pub connection_ratio: f64,
    /// IPs exempt from limiting
    pub whitelist: Vec<String>,
    /// Forward (rather than handle) requests from banned miners
    pub forward_banned: bool,
}

impl Default for ConnControlConfig {
    fn default() -> Self {
        Self {
            ban_period: Duration::from_secs(20 * 60),
            ip_ban_enable: false,
            max_throughput: 131_072,
            max_connection: 1_000,
            throughput_ratio: 1.2,
            connection_ratio: 1.2,
            whitelist: Vec::new(),
            forward_banned: false,
        }
    }
}

/// Manages the miner ban table and accessing privilege
pub struct ConnectionControl {
    ban_period: Duration,
    miner_bans: DashMap<String, Instant>,
    ban_count: AtomicI64,
    ip_limiters: DashMap<String, Arc<IpLimiter>>,
    ip_ban_enable: bool,
    throughput_quota: Quota,
    connection_quota: Quota,
    whitelist: HashSet<String>,
    forward_banned: bool,
}

impl ConnectionControl {
    /// Build from configuration
    pub fn new(config: ConnControlConfig) -> Self {
        Self {
            ban_period: config.ban_period,
            miner_bans: DashMap::new(),
            ban_count: AtomicI64::new(0),
            ip_limiters: DashMap::new(),
            ip_ban_enable: config.ip_ban_enable,
            throughput_quota: quota_per_second(
                config.max_throughput,
                (config.max_throughput as f64 * config.throughput_ratio) as u32,
            ),
            connection_quota: quota_per_second(
                config.max_connection,
                (config.max_connection as f64 * config.connection_ratio) as u32,
            ),
            whitelist: config.whitelist.into_iter().collect(),
            forward_banned: config.forward_banned,
        }
    }

    /// Whether banned miners' requests should be forwarded
    pub fn forward_banned(&self) -> bool {
        self.forward_banned
    }

    /// Whether IP-level banning is enabled
    pub fn ip_ban_enabled(&self) -> bool {
        self.ip_ban_enable
    }

    /// Whether the IP is exempt from limiting
    pub fn is_whitelisted(&self, ip: &str) -> bool {
        self.whitelist.contains(ip)
    }

    /// The limiter for an IP, created on first use.
    ///
    /// Not consulted by the listener; admission-level limiting is an
    /// optional extension point.
    pub fn limiter_for(&self, ip: &str) -> Arc<IpLimiter> {
        self.ip_limiters
            .entry(ip.to_string())
            .or_insert_with(|| {
                Arc::new(IpLimiter::new(self.throughput_quota, self.connection_quota))
            })
            .clone()
    }

    /// Ban expiry for a miner, if present
    pub fn query_ban(&self, miner: &str) -> Option<Instant> {
        self.miner_bans.get(miner).map(|entry| *entry.value())
    }

    /// Add a miner to the ban table. No-op when banning is disabled.
    pub fn add_ban(&self, miner: &str, duration: Duration) {
        if self.ban_period.is_zero() {
            return;
        }
        info!(miner, banned_secs = duration.as_secs(), "add banned miner");
        self.miner_bans
            .insert(miner.to_string(), Instant::now() + duration);
        self.ban_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Remove a miner from the ban table
    pub fn remove_ban(&self, miner: &str) {
        info!(miner, "remove banned miner");
        if self.miner_bans.remove(miner).is_some() {
            self.ban_count.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Number of active ban entries
    pub fn ban_count(&self) -> i64 {
        self.ban_count.load(Ordering::Relaxed)
    }

    /// Judge whether the miner may proceed.
    ///
    /// Returns `Err(Error::BannedMiner)` when the miner is inside an active
    /// ban window, or when its session counters cross the abuse threshold
    /// (which also inserts a ban and resets the counters). Expired bans are
    /// removed lazily here.
    pub fn judge_miner(&self, miner: &str, counters: &SessionCounters) -> Result<()> {
        if self.ban_period.is_zero() {
            return Ok(());
        }

        if let Some(expiry) = self.query_ban(miner) {
            if expiry > Instant::now() {
                return Err(Error::BannedMiner);
            }
            self.remove_ban(miner);
            return Ok(());
        }

        let accepted = counters.accepted();
        let errors = counters.errors();
        let total = accepted + errors;
        if total >= BAN_MIN_SUBMISSIONS && errors as f64 / total as f64 >= BAN_ERROR_RATE {
            self.add_ban(miner, self.ban_period);
            counters.reset();
            return Err(Error::BannedMiner);
        }
        Ok(())
    }

    /// Background sweep removing entries whose expiry passed more than 30
    /// minutes ago. Safety net for miners that never reconnect.
    pub async fn run_sweep(self: Arc<Self>, period: Duration, token: CancellationToken) {
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(period) => {}
            }
            let cutoff = Instant::now();
            let expired: Vec<String> = self
                .miner_bans
                .iter()
                .filter(|entry| *entry.value() + SWEEP_GRACE < cutoff)
                .map(|entry| entry.key().clone())
                .collect();
            for miner in expired {
                self.remove_ban(&miner);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn control(ban_period: Duration) -> ConnectionControl {
        ConnectionControl::new(ConnControlConfig {
            ban_period,
            max_throughput: 2,
            max_connection: 2,
            throughput_ratio: 1.1,
            connection_ratio: 1.1,
            ..Default::default()
        })
    }

    #[test]
    fn test_ban_add_query_remove() {
        let ctl = control(Duration::from_secs(10));
        let miner = "xx.yy";

        assert!(ctl.query_ban(miner).is_none());

        ctl.add_ban(miner, Duration::from_secs(10));
        let expiry = ctl.query_ban(miner).expect("banned");
        assert!(expiry > Instant::now());
        assert_eq!(ctl.ban_count(), 1);

        ctl.remove_ban(miner);
        assert!(ctl.query_ban(miner).is_none());
        assert_eq!(ctl.ban_count(), 0);
    }

    #[test]
    fn test_judge_bans_on_error_rate() {
        let ctl = control(Duration::from_millis(50));
        let miner = "xx.yy";
        let counters = SessionCounters::new();
        for _ in 0..100 {
            counters.record_error();
        }
        for _ in 0..10 {
            counters.record_accepted();
        }

        // threshold crossed: banned, counters reset
        assert!(ctl.judge_miner(miner, &counters).unwrap_err().is_banned());
        assert!(ctl.query_ban(miner).is_some());
        assert_eq!(counters.accepted(), 0);
        assert_eq!(counters.errors(), 0);

        // denied during the ban window
        assert!(ctl.judge_miner(miner, &counters).unwrap_err().is_banned());

        // permitted after expiry, entry removed lazily
        std::thread::sleep(Duration::from_millis(60));
        assert!(ctl.judge_miner(miner, &counters).is_ok());
        assert!(ctl.query_ban(miner).is_none());
    }

    #[test]
    fn test_judge_below_threshold_permits() {
        let ctl = control(Duration::from_secs(10));
        let counters = SessionCounters::new();
        for _ in 0..49 {
            counters.record_error();
        }
        for _ in 0..50 {
            counters.record_accepted();
        }
        // 99 total submissions: not yet eligible
        assert!(ctl.judge_miner("a.b", &counters).is_ok());

        // 100 total but below 50% errors
        counters.record_accepted();
        assert!(ctl.judge_miner("a.b", &counters).is_ok());
    }

    #[test]
    fn test_zero_ban_period_disables_mechanism() {
        let ctl = control(Duration::ZERO);
        let counters = SessionCounters::new();
        for _ in 0..200 {
            counters.record_error();
        }
        assert!(ctl.judge_miner("a.b", &counters).is_ok());
        ctl.add_ban("a.b", Duration::from_secs(10));
        assert!(ctl.query_ban("a.b").is_none());
    }

    #[test]
    fn test_limiter_construction() {
        let ctl = control(Duration::from_secs(10));
        let limiter = ctl.limiter_for("10.0.0.1");
        assert!(limiter.allow_connection());
        assert!(limiter.allow_message());
        // same IP returns the same limiter
        assert!(Arc::ptr_eq(&limiter, &ctl.limiter_for("10.0.0.1")));
    }

    #[test]
    fn test_limiter_denies_past_burst() {
        let limiter = IpLimiter::new(quota_per_second(1, 2), quota_per_second(1, 2));
        assert!(limiter.allow_message());
        assert!(limiter.allow_message());
        assert!(!limiter.allow_message());
        // the connection quota is tracked independently
        assert!(limiter.allow_connection());
    }

    #[test]
    fn test_zero_rate_rounds_up_to_one() {
        let limiter = IpLimiter::new(quota_per_second(0, 0), quota_per_second(0, 0));
        assert!(limiter.allow_message());
        assert!(!limiter.allow_message());
    }
}
