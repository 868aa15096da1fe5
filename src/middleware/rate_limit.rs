//! Rate limiting middleware
//!
//! Fixed-window request counters keyed by tenant, principal, or source
//! address, with budgets scaled by subscription tier. Runs as the last
//! stage before the handler so quota is only consumed by requests that
//! already passed authentication and authorization.
//!
//! The counter store is a trait so multi-instance deployments can swap
//! in a shared external store with an atomic increment-and-expire
//! primitive; the in-memory map is the single-process implementation.
//! A periodic sweep reclaims expired windows independently of request
//! traffic.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration as StdDuration,
};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Duration, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{
    config::RateLimitSettings,
    middleware::auth::RequestPrincipal,
    models::{SubscriptionTier, Tenant},
    utils::error::AppError,
    AppState,
};

/// Outcome of an admission check
#[derive(Debug, Clone, Copy)]
pub struct Admission {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

impl Admission {
    /// Whole seconds until the window resets, rounded up, minimum 1
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> i64 {
        let millis = (self.reset_at - now).num_milliseconds();
        ((millis + 999) / 1000).max(1)
    }
}

/// Per-key windowed counter storage.
///
/// `increment` must be atomic per key: the read-increment-compare
/// sequence may not interleave with another caller's.
pub trait CounterStore: Send + Sync {
    /// Advance the window for `key`, returning the post-increment count
    /// and the window's expiry
    fn increment(&self, key: &str, window: Duration, now: DateTime<Utc>) -> (u32, DateTime<Utc>);

    /// Drop windows whose expiry has passed, returning how many were removed
    fn sweep(&self, now: DateTime<Utc>) -> usize;

    /// Number of tracked keys
    fn tracked_keys(&self) -> usize;
}

struct Window {
    count: u32,
    reset_at: DateTime<Utc>,
}

/// In-memory counter store for single-process deployments
#[derive(Default)]
pub struct MemoryCounterStore {
    windows: Mutex<HashMap<String, Window>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Window>> {
        // A poisoned lock only means another thread panicked mid-update;
        // the map itself is still usable.
        self.windows.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CounterStore for MemoryCounterStore {
    fn increment(&self, key: &str, window: Duration, now: DateTime<Utc>) -> (u32, DateTime<Utc>) {
        let mut windows = self.lock();
        let entry = windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            reset_at: now + window,
        });

        if now >= entry.reset_at {
            entry.count = 0;
            entry.reset_at = now + window;
        }

        entry.count += 1;
        (entry.count, entry.reset_at)
    }

    fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut windows = self.lock();
        let before = windows.len();
        windows.retain(|_, w| now < w.reset_at);
        before - windows.len()
    }

    fn tracked_keys(&self) -> usize {
        self.lock().len()
    }
}

/// Which budget table a limiter consults
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LimiterKind {
    /// Tier-scaled budgets for general API traffic
    Standard,
    /// Small fixed budget for sensitive endpoints (credential issuance)
    Strict,
}

/// A keyed fixed-window limiter with its own store and window length
#[derive(Clone)]
pub struct RateLimitState {
    store: Arc<dyn CounterStore>,
    settings: RateLimitSettings,
    kind: LimiterKind,
}

impl RateLimitState {
    pub fn standard(settings: RateLimitSettings) -> Self {
        Self {
            store: Arc::new(MemoryCounterStore::new()),
            settings,
            kind: LimiterKind::Standard,
        }
    }

    pub fn strict(settings: RateLimitSettings) -> Self {
        Self {
            store: Arc::new(MemoryCounterStore::new()),
            settings,
            kind: LimiterKind::Strict,
        }
    }

    /// Build a limiter over a custom store (external deployments)
    pub fn with_store(store: Arc<dyn CounterStore>, settings: RateLimitSettings) -> Self {
        Self {
            store,
            settings,
            kind: LimiterKind::Standard,
        }
    }

    fn window(&self) -> Duration {
        let secs = match self.kind {
            LimiterKind::Standard => self.settings.window_secs,
            LimiterKind::Strict => self.settings.strict_window_secs,
        };
        Duration::seconds(secs as i64)
    }

    fn limit_for(&self, tier: SubscriptionTier) -> u32 {
        match self.kind {
            LimiterKind::Standard => self.settings.budget_for(tier),
            LimiterKind::Strict => self.settings.strict_budget,
        }
    }

    /// Admission check against the current clock
    pub fn admit(&self, key: &str, tier: SubscriptionTier) -> Admission {
        self.admit_at(key, tier, Utc::now())
    }

    /// Admission check at an explicit instant
    pub fn admit_at(&self, key: &str, tier: SubscriptionTier, now: DateTime<Utc>) -> Admission {
        let limit = self.limit_for(tier);
        let (count, reset_at) = self.store.increment(key, self.window(), now);

        Admission {
            allowed: count <= limit,
            limit,
            remaining: limit.saturating_sub(count),
            reset_at,
        }
    }

    /// Reclaim expired windows
    pub fn sweep(&self) -> usize {
        self.store.sweep(Utc::now())
    }

    pub fn tracked_keys(&self) -> usize {
        self.store.tracked_keys()
    }
}

/// Derive the limiter key and tier from request context.
///
/// Precedence: resolved tenant > authenticated principal > source
/// address. All of a tenant's traffic shares one budget regardless of
/// which user or device issues it.
fn derive_key(request: &Request) -> (String, SubscriptionTier) {
    if let Some(tenant) = request.extensions().get::<Tenant>() {
        return (format!("tenant:{}", tenant.id), tenant.tier);
    }
    if let Some(principal) = request.extensions().get::<RequestPrincipal>() {
        return (principal.rate_limit_key(), SubscriptionTier::Free);
    }
    let source = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    (format!("ip:{}", source), SubscriptionTier::Free)
}

fn apply_headers(response: &mut Response, admission: &Admission) {
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&admission.limit.to_string()) {
        headers.insert("X-RateLimit-Limit", value);
    }
    if let Ok(value) = HeaderValue::from_str(&admission.remaining.to_string()) {
        headers.insert("X-RateLimit-Remaining", value);
    }
    if let Ok(value) = HeaderValue::from_str(&admission.reset_at.timestamp_millis().to_string()) {
        headers.insert("X-RateLimit-Reset", value);
    }
}

/// Rate limiting middleware (pipeline stage 5)
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let (key, tier) = derive_key(&request);
    let now = Utc::now();
    let admission = state.rate_limit.admit_at(&key, tier, now);

    if !admission.allowed {
        warn!(key = %key, limit = admission.limit, "Rate limit exceeded");
        return Err(AppError::RateLimited {
            retry_after_secs: admission.retry_after_secs(now),
        });
    }

    debug!(key = %key, remaining = admission.remaining, "Rate limit check passed");

    let mut response = next.run(request).await;
    apply_headers(&mut response, &admission);
    Ok(response)
}

/// Strict rate limiting middleware for sensitive single endpoints.
///
/// Same algorithm, narrower key (includes the endpoint identity),
/// smaller budget, independent window.
pub async fn strict_rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let (base_key, tier) = derive_key(&request);
    let key = format!("{}|{}", request.uri().path(), base_key);
    let now = Utc::now();
    let admission = state.strict_rate_limit.admit_at(&key, tier, now);

    if !admission.allowed {
        warn!(key = %key, "Strict rate limit exceeded");
        return Err(AppError::RateLimited {
            retry_after_secs: admission.retry_after_secs(now),
        });
    }

    let mut response = next.run(request).await;
    apply_headers(&mut response, &admission);
    Ok(response)
}

/// Spawn a background task that periodically reclaims expired windows
pub fn spawn_rate_limit_sweep(limiters: Vec<RateLimitState>, interval_secs: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(StdDuration::from_secs(interval_secs.max(1)));
        loop {
            interval.tick().await;
            for limiter in &limiters {
                let removed = limiter.sweep();
                if removed > 0 {
                    debug!(
                        removed,
                        tracked = limiter.tracked_keys(),
                        "Rate limiter sweep"
                    );
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_settings() -> RateLimitSettings {
        RateLimitSettings {
            window_secs: 60,
            free: 3,
            starter: 5,
            professional: 10,
            enterprise: 20,
            strict_budget: 2,
            strict_window_secs: 60,
            sweep_interval_secs: 300,
        }
    }

    #[test]
    fn test_budget_is_exact() {
        let limiter = RateLimitState::standard(test_settings());
        let t0 = Utc::now();

        for i in 0..3 {
            let admission = limiter.admit_at("tenant:a", SubscriptionTier::Free, t0);
            assert!(admission.allowed, "admission {} should pass", i);
        }

        let rejected = limiter.admit_at("tenant:a", SubscriptionTier::Free, t0);
        assert!(!rejected.allowed);
        assert_eq!(rejected.remaining, 0);
        assert!(rejected.reset_at <= t0 + Duration::seconds(60));
    }

    #[test]
    fn test_window_resets_counter() {
        let limiter = RateLimitState::standard(test_settings());
        let t0 = Utc::now();

        for _ in 0..4 {
            limiter.admit_at("tenant:a", SubscriptionTier::Free, t0);
        }

        let after_window = t0 + Duration::seconds(61);
        let admission = limiter.admit_at("tenant:a", SubscriptionTier::Free, after_window);
        assert!(admission.allowed);
        assert_eq!(admission.remaining, 2);
    }

    #[test]
    fn test_remaining_counts_down() {
        let limiter = RateLimitState::standard(test_settings());
        let t0 = Utc::now();

        let first = limiter.admit_at("tenant:a", SubscriptionTier::Starter, t0);
        assert_eq!(first.limit, 5);
        assert_eq!(first.remaining, 4);

        let second = limiter.admit_at("tenant:a", SubscriptionTier::Starter, t0);
        assert_eq!(second.remaining, 3);
    }

    #[test]
    fn test_keys_have_independent_budgets() {
        let limiter = RateLimitState::standard(test_settings());
        let t0 = Utc::now();

        for _ in 0..3 {
            limiter.admit_at("tenant:a", SubscriptionTier::Free, t0);
        }
        assert!(!limiter.admit_at("tenant:a", SubscriptionTier::Free, t0).allowed);
        assert!(limiter.admit_at("tenant:b", SubscriptionTier::Free, t0).allowed);
    }

    #[test]
    fn test_strict_limiter_is_independent() {
        let settings = test_settings();
        let standard = RateLimitState::standard(settings.clone());
        let strict = RateLimitState::strict(settings);
        let t0 = Utc::now();

        for _ in 0..2 {
            assert!(strict.admit_at("login|ip:1.2.3.4", SubscriptionTier::Free, t0).allowed);
        }
        assert!(!strict.admit_at("login|ip:1.2.3.4", SubscriptionTier::Free, t0).allowed);

        // The standard limiter never saw those requests.
        assert!(standard.admit_at("ip:1.2.3.4", SubscriptionTier::Free, t0).allowed);
    }

    #[test]
    fn test_sweep_reclaims_only_expired_windows() {
        let limiter = RateLimitState::standard(test_settings());
        let t0 = Utc::now();

        limiter.admit_at("tenant:old", SubscriptionTier::Free, t0 - Duration::seconds(120));
        limiter.admit_at("tenant:new", SubscriptionTier::Free, t0);
        assert_eq!(limiter.tracked_keys(), 2);

        let removed = limiter.sweep();
        assert_eq!(removed, 1);
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let now = Utc::now();
        let admission = Admission {
            allowed: false,
            limit: 3,
            remaining: 0,
            reset_at: now + Duration::milliseconds(1500),
        };
        assert_eq!(admission.retry_after_secs(now), 2);
    }

    #[tokio::test]
    async fn test_concurrent_admissions_never_overshoot() {
        let limiter = Arc::new(RateLimitState::standard(test_settings()));
        let t0 = Utc::now();

        let mut handles = Vec::new();
        for _ in 0..50 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter
                    .admit_at("tenant:contended", SubscriptionTier::Professional, t0)
                    .allowed
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }

        // Budget is 10; exactly 10 of 50 concurrent calls may pass.
        assert_eq!(admitted, 10);
    }
}
