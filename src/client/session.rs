//! Session lifecycle manager
//!
//! Owns a single credential on the client side: a timer-driven renewal
//! loop keeps the access token fresh, and an activity-driven loop
//! enforces the inactivity timeout on top of (and independently from)
//! credential expiry.
//!
//! States: `Unarmed → Monitoring → Refreshing → (Monitoring | Expired)`.
//! Refresh is single-flight: concurrent callers share one in-flight
//! renewal and observe the same resulting credential. Policy fetch
//! failures never surface to the user; monitoring falls back to the
//! last-known-good policy, then to the system default, so the loop
//! keeps working offline.
//!
//! The manager is an explicit object constructed at sign-in and driven
//! by method calls; it holds no ambient global state.

use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tokio::{
    sync::{watch, Mutex, RwLock},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::models::{SessionPolicy, TokenResponse};

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No credential installed
    Unarmed,
    /// Credential installed, timers armed
    Monitoring,
    /// A renewal call is in flight
    Refreshing,
    /// Credential gone; the owner must redirect to re-authentication
    Expired,
}

/// Session manager errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("No credential installed")]
    NotSignedIn,
    #[error("Session has expired")]
    Expired,
    #[error("Credential renewal failed: {0}")]
    RefreshFailed(String),
}

/// The client-held credential
#[derive(Debug, Clone)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl From<TokenResponse> for Credential {
    fn from(response: TokenResponse) -> Self {
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_at: response.expires_at,
        }
    }
}

/// Session manager configuration
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Base URL of the control plane API
    pub base_url: String,
    /// How long before expiry a renewal is scheduled
    pub renewal_lead_time_secs: i64,
    /// Cadence of the inactivity check
    pub activity_check_interval_secs: u64,
    /// Minimum gap between recorded activity updates
    pub activity_throttle_secs: i64,
}

impl SessionOptions {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            renewal_lead_time_secs: 300,
            activity_check_interval_secs: 60,
            activity_throttle_secs: 30,
        }
    }
}

struct SessionInner {
    http: reqwest::Client,
    options: SessionOptions,
    credential: RwLock<Option<Credential>>,
    /// Single-flight gate: at most one renewal call is in flight; late
    /// arrivals observe the credential it produced instead of renewing
    /// again.
    refresh_gate: Mutex<()>,
    state_tx: watch::Sender<SessionState>,
    last_activity: StdMutex<DateTime<Utc>>,
    /// Last-known-good policy cache
    policy: StdMutex<Option<SessionPolicy>>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

/// Client-side session lifecycle manager
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl SessionManager {
    pub fn new(options: SessionOptions) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Unarmed);
        Self {
            inner: Arc::new(SessionInner {
                http: reqwest::Client::new(),
                options,
                credential: RwLock::new(None),
                refresh_gate: Mutex::new(()),
                state_tx,
                last_activity: StdMutex::new(Utc::now()),
                policy: StdMutex::new(None),
                tasks: StdMutex::new(Vec::new()),
            }),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        *self.inner.state_tx.borrow()
    }

    /// Observe state transitions (e.g. to redirect on `Expired`)
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    fn set_state(&self, state: SessionState) {
        self.inner.state_tx.send_replace(state);
    }

    fn lead_time(&self) -> Duration {
        Duration::seconds(self.inner.options.renewal_lead_time_secs)
    }

    /// Install a credential at sign-in (or after an external refresh)
    /// and arm the renewal and inactivity timers.
    pub async fn install(&self, credential: Credential) {
        self.abort_tasks();

        *self.inner.credential.write().await = Some(credential.clone());
        {
            let mut last = lock_ignoring_poison(&self.inner.last_activity);
            *last = Utc::now();
        }
        self.set_state(SessionState::Monitoring);

        self.arm_renewal_timer(credential.expires_at);
        self.spawn_activity_monitor();
        self.spawn_policy_load();
    }

    /// The installed credential, if any
    pub async fn credential(&self) -> Option<Credential> {
        self.inner.credential.read().await.clone()
    }

    /// Record user activity, throttled so input storms do not thrash
    /// the clock.
    pub fn record_activity(&self) {
        let now = Utc::now();
        let mut last = lock_ignoring_poison(&self.inner.last_activity);
        if now - *last >= Duration::seconds(self.inner.options.activity_throttle_secs) {
            *last = now;
        }
    }

    /// Elapsed time since the last recorded activity
    pub fn idle_time(&self, now: DateTime<Utc>) -> Duration {
        let last = lock_ignoring_poison(&self.inner.last_activity);
        now - *last
    }

    /// The inactivity budget currently in force. A company-enforced
    /// timeout beats the user preference, which beats the system
    /// default.
    pub fn effective_timeout_minutes(&self) -> i64 {
        let policy = lock_ignoring_poison(&self.inner.policy);
        match policy.as_ref() {
            Some(p) if p.is_company_enforced => {
                p.company_timeout.unwrap_or(p.timeout_minutes)
            }
            Some(p) => p.user_timeout.unwrap_or(p.timeout_minutes),
            None => SessionPolicy::system_default().timeout_minutes,
        }
    }

    /// Run the periodic inactivity check at an explicit instant.
    /// Returns true when the session was force-expired.
    pub async fn check_inactivity_at(&self, now: DateTime<Utc>) -> bool {
        if self.state() != SessionState::Monitoring && self.state() != SessionState::Refreshing {
            return false;
        }

        let timeout = Duration::minutes(self.effective_timeout_minutes());
        if self.idle_time(now) > timeout {
            debug!("Inactivity timeout exceeded, forcing session expiry");
            self.force_expire().await;
            return true;
        }
        false
    }

    /// Renew only when the credential is inside its renewal lead
    /// window; the timer path goes through here so a timer armed for an
    /// already-replaced credential becomes a no-op.
    pub async fn renew_if_due(&self) -> Result<Credential, SessionError> {
        let current = self.credential().await.ok_or(SessionError::NotSignedIn)?;
        if current.expires_at - Utc::now() > self.lead_time() {
            return Ok(current);
        }
        self.refresh_from(current).await
    }

    /// Renew the credential, de-duplicating concurrent attempts.
    ///
    /// The timer firing and a 401-triggered retry arriving together
    /// result in exactly one renewal call; both callers observe the
    /// same resulting credential.
    pub async fn refresh(&self) -> Result<Credential, SessionError> {
        let before = self
            .credential()
            .await
            .ok_or(SessionError::NotSignedIn)?;
        self.refresh_from(before).await
    }

    /// Renew, treating `before` as the credential the caller observed
    /// to be stale or rejected.
    async fn refresh_from(&self, before: Credential) -> Result<Credential, SessionError> {
        let _gate = self.inner.refresh_gate.lock().await;

        if self.state() == SessionState::Expired {
            return Err(SessionError::Expired);
        }

        let current = self
            .credential()
            .await
            .ok_or(SessionError::NotSignedIn)?;

        // A concurrent caller may have completed a renewal while we
        // waited on the gate; share its result instead of renewing
        // twice.
        if current.access_token != before.access_token {
            return Ok(current);
        }

        self.set_state(SessionState::Refreshing);

        match self.renew_credential(&current.refresh_token).await {
            Ok(renewed) => {
                *self.inner.credential.write().await = Some(renewed.clone());
                self.set_state(SessionState::Monitoring);
                self.arm_renewal_timer(renewed.expires_at);
                Ok(renewed)
            }
            Err(message) => {
                warn!(error = %message, "Credential renewal failed");
                self.force_expire().await;
                Err(SessionError::RefreshFailed(message))
            }
        }
    }

    async fn renew_credential(&self, refresh_token: &str) -> Result<Credential, String> {
        let url = format!(
            "{}/api/v1/auth/refresh",
            self.inner.options.base_url.trim_end_matches('/')
        );

        let response = self
            .inner
            .http
            .post(&url)
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            return Err(format!("renewal rejected with status {}", response.status()));
        }

        let tokens: TokenResponse = response.json().await.map_err(|e| e.to_string())?;
        Ok(Credential::from(tokens))
    }

    /// Fetch the session timeout policy and cache it. Monitoring must
    /// keep working offline, so failures here only log and the cached
    /// or default policy stays in force.
    pub async fn refresh_policy(&self) {
        let Some(credential) = self.credential().await else {
            return;
        };

        let url = format!(
            "{}/api/v1/auth/session-policy",
            self.inner.options.base_url.trim_end_matches('/')
        );

        let result = self
            .inner
            .http
            .get(&url)
            .bearer_auth(&credential.access_token)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                match response.json::<SessionPolicy>().await {
                    Ok(fetched) => {
                        let mut policy = lock_ignoring_poison(&self.inner.policy);
                        *policy = Some(fetched);
                    }
                    Err(e) => debug!(error = %e, "Ignoring malformed session policy"),
                }
            }
            Ok(response) => {
                debug!(status = %response.status(), "Session policy fetch rejected, keeping cached policy");
            }
            Err(e) => {
                debug!(error = %e, "Session policy fetch failed, keeping cached policy");
            }
        }
    }

    /// The cached policy, if one was ever loaded
    pub fn cached_policy(&self) -> Option<SessionPolicy> {
        lock_ignoring_poison(&self.inner.policy).clone()
    }

    /// Check the session is usable and return the bearer token for a
    /// dispatch. Forces expiry first if the inactivity budget is spent.
    pub async fn ensure_active(&self) -> Result<String, SessionError> {
        if self.state() == SessionState::Expired {
            return Err(SessionError::Expired);
        }
        if self.check_inactivity_at(Utc::now()).await {
            return Err(SessionError::Expired);
        }
        self.credential()
            .await
            .map(|c| c.access_token)
            .ok_or(SessionError::NotSignedIn)
    }

    /// Force the session into `Expired`, clearing the credential and
    /// stopping both timers.
    pub async fn force_expire(&self) {
        *self.inner.credential.write().await = None;
        self.set_state(SessionState::Expired);
        self.abort_tasks();
    }

    /// Tear the session down at sign-out
    pub async fn sign_out(&self) {
        *self.inner.credential.write().await = None;
        self.abort_tasks();
        self.set_state(SessionState::Unarmed);
    }

    fn arm_renewal_timer(&self, expires_at: DateTime<Utc>) {
        let manager = self.clone();
        let refresh_at = expires_at - self.lead_time();
        let delay = (refresh_at - Utc::now()).to_std().unwrap_or_default();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // refresh() owns the state transitions; a failure already
            // forced expiry and there is nothing left to re-arm.
            let _ = manager.renew_if_due().await;
        });

        self.push_task(handle);
    }

    fn spawn_activity_monitor(&self) {
        let manager = self.clone();
        let interval_secs = self.inner.options.activity_check_interval_secs.max(1);

        let handle = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            // The first tick fires immediately; skip it so a fresh
            // sign-in is not checked against a stale clock.
            interval.tick().await;
            loop {
                interval.tick().await;
                if manager.check_inactivity_at(Utc::now()).await {
                    break;
                }
            }
        });

        self.push_task(handle);
    }

    fn spawn_policy_load(&self) {
        let manager = self.clone();
        let handle = tokio::spawn(async move {
            manager.refresh_policy().await;
        });
        self.push_task(handle);
    }

    fn push_task(&self, handle: JoinHandle<()>) {
        let mut tasks = lock_ignoring_poison(&self.inner.tasks);
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }

    fn abort_tasks(&self) {
        let mut tasks = lock_ignoring_poison(&self.inner.tasks);
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

fn lock_ignoring_poison<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
