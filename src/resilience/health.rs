use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// Placeholder producer invoked for a degraded backend with nothing cached locally.
pub type FallbackFn = Arc<dyn Fn() -> Option<serde_json::Value> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    /// No outcome recorded for this backend yet.
    Unknown,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Healthy => "healthy",
            HealthState::Degraded => "degraded",
            HealthState::Unknown => "unknown",
        }
    }

    /// Whether callers should still try the backend.
    pub fn is_usable(&self) -> bool {
        !matches!(self, HealthState::Degraded)
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    pub backend: String,
    pub state: HealthState,
    pub failure_threshold: u32,
    pub consecutive_failures: u32,
    /// Reason given for the last degradation, if currently degraded.
    pub last_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub failure_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
        }
    }
}

impl HealthConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of consecutive failures that flips a backend to degraded
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }
}

#[derive(Debug, Default)]
struct State {
    consecutive_failures: u32,
    healthy: bool,
    last_reason: Option<String>,
}

#[derive(Default)]
struct Inner {
    backends: HashMap<String, State>,
    fallbacks: HashMap<String, FallbackFn>,
}

/// Per-backend health tracking for graceful degradation.
///
/// - Counts consecutive failures per backend name
/// - Degrades once the threshold is reached
/// - Recovers only on a success or an explicit [`mark_healthy`](Self::mark_healthy), never by elapsed time
pub struct HealthTracker {
    cfg: HealthConfig,
    inner: Mutex<Inner>,
}

impl HealthTracker {
    pub fn new(cfg: HealthConfig) -> Self {
        Self {
            cfg,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn state(&self, backend: &str) -> HealthState {
        match self.lock().backends.get(backend) {
            Some(st) if st.healthy => HealthState::Healthy,
            Some(_) => HealthState::Degraded,
            None => HealthState::Unknown,
        }
    }

    pub fn is_usable(&self, backend: &str) -> bool {
        self.state(backend).is_usable()
    }

    pub fn record_success(&self, backend: &str) {
        let mut inner = self.lock();
        let st = inner.backends.entry(backend.to_string()).or_default();
        let recovered = !st.healthy && st.consecutive_failures > 0;
        st.consecutive_failures = 0;
        st.healthy = true;
        st.last_reason = None;
        if recovered {
            tracing::info!(backend, "backend recovered, leaving degraded mode");
        }
    }

    /// Count a failure. Returns true when this call flipped the backend to degraded.
    pub fn record_failure(&self, backend: &str, reason: &str) -> bool {
        let mut inner = self.lock();
        let st = inner.backends.entry(backend.to_string()).or_insert(State {
            healthy: true,
            ..State::default()
        });
        st.consecutive_failures = st.consecutive_failures.saturating_add(1);
        if st.healthy && st.consecutive_failures >= self.cfg.failure_threshold {
            st.healthy = false;
            st.last_reason = Some(reason.to_string());
            tracing::warn!(
                backend,
                failures = st.consecutive_failures,
                reason,
                "backend degraded, bypassing distributed tier"
            );
            return true;
        }
        false
    }

    pub fn mark_degraded(&self, backend: &str, reason: &str) {
        let mut inner = self.lock();
        let st = inner.backends.entry(backend.to_string()).or_default();
        if st.healthy || st.last_reason.is_none() {
            tracing::warn!(backend, reason, "backend marked degraded");
        }
        st.healthy = false;
        st.consecutive_failures = st.consecutive_failures.max(self.cfg.failure_threshold);
        st.last_reason = Some(reason.to_string());
    }

    pub fn mark_healthy(&self, backend: &str) {
        let mut inner = self.lock();
        let st = inner.backends.entry(backend.to_string()).or_default();
        if !st.healthy {
            tracing::info!(backend, "backend marked healthy");
        }
        st.healthy = true;
        st.consecutive_failures = 0;
        st.last_reason = None;
    }

    pub fn register_fallback(&self, backend: &str, f: FallbackFn) {
        self.lock().fallbacks.insert(backend.to_string(), f);
    }

    /// Run the registered fallback for `backend`, if any.
    pub fn invoke_fallback(&self, backend: &str) -> Option<serde_json::Value> {
        // Clone out so the callback runs without the lock held.
        let f = self.lock().fallbacks.get(backend).cloned()?;
        f()
    }

    pub fn snapshot(&self, backend: &str) -> HealthSnapshot {
        let inner = self.lock();
        let st = inner.backends.get(backend);
        HealthSnapshot {
            backend: backend.to_string(),
            state: match st {
                Some(s) if s.healthy => HealthState::Healthy,
                Some(_) => HealthState::Degraded,
                None => HealthState::Unknown,
            },
            failure_threshold: self.cfg.failure_threshold,
            consecutive_failures: st.map(|s| s.consecutive_failures).unwrap_or(0),
            last_reason: st.and_then(|s| s.last_reason.clone()),
        }
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_health_config_defaults() {
        let config = HealthConfig::default();
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(HealthConfig::new().with_failure_threshold(0).failure_threshold, 1);
    }

    #[test]
    fn test_unknown_until_observed() {
        let tracker = HealthTracker::default();
        assert_eq!(tracker.state("redis"), HealthState::Unknown);
        assert!(tracker.is_usable("redis"));
        assert_eq!(tracker.state("redis").to_string(), "unknown");
    }

    #[test]
    fn test_degrades_at_threshold() {
        let tracker = HealthTracker::default();
        assert!(!tracker.record_failure("redis", "timeout"));
        assert!(!tracker.record_failure("redis", "timeout"));
        assert_eq!(tracker.state("redis"), HealthState::Healthy);

        assert!(tracker.record_failure("redis", "connection reset"));
        assert_eq!(tracker.state("redis"), HealthState::Degraded);
        assert_eq!(tracker.state("redis").to_string(), "degraded");
        // Already degraded: further failures do not re-trigger.
        assert!(!tracker.record_failure("redis", "timeout"));

        let snap = tracker.snapshot("redis");
        assert_eq!(snap.consecutive_failures, 4);
        assert_eq!(snap.last_reason.as_deref(), Some("connection reset"));
    }

    #[test]
    fn test_success_restores_healthy() {
        let tracker = HealthTracker::default();
        for _ in 0..3 {
            tracker.record_failure("redis", "down");
        }
        tracker.record_success("redis");
        assert_eq!(tracker.state("redis"), HealthState::Healthy);
        assert_eq!(tracker.snapshot("redis").consecutive_failures, 0);
    }

    #[test]
    fn test_success_resets_partial_failures() {
        let tracker = HealthTracker::default();
        tracker.record_failure("redis", "x");
        tracker.record_failure("redis", "x");
        tracker.record_success("redis");
        tracker.record_failure("redis", "x");
        tracker.record_failure("redis", "x");
        assert_eq!(tracker.state("redis"), HealthState::Healthy);
    }

    #[test]
    fn test_explicit_marks() {
        let tracker = HealthTracker::default();
        tracker.mark_degraded("redis", "connection closed");
        assert_eq!(tracker.state("redis"), HealthState::Degraded);
        tracker.mark_healthy("redis");
        assert_eq!(tracker.state("redis"), HealthState::Healthy);
    }

    #[test]
    fn test_backends_are_independent() {
        let tracker = HealthTracker::default();
        tracker.mark_degraded("primary", "down");
        tracker.record_success("replica");
        assert_eq!(tracker.state("primary"), HealthState::Degraded);
        assert_eq!(tracker.state("replica"), HealthState::Healthy);
    }

    #[test]
    fn test_fallback_invocation() {
        let tracker = HealthTracker::default();
        assert!(tracker.invoke_fallback("redis").is_none());
        tracker.register_fallback("redis", Arc::new(|| Some(serde_json::Value::Null)));
        assert_eq!(tracker.invoke_fallback("redis"), Some(serde_json::Value::Null));
    }

    #[test]
    fn test_health_tracker_thread_safe() {
        let tracker = Arc::new(HealthTracker::new(
            HealthConfig::new().with_failure_threshold(100),
        ));
        let mut handles = vec![];
        for _ in 0..10 {
            let t = Arc::clone(&tracker);
            handles.push(thread::spawn(move || {
                for _ in 0..5 {
                    t.record_failure("redis", "x");
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(tracker.snapshot("redis").consecutive_failures, 50);
        assert_eq!(tracker.state("redis"), HealthState::Healthy);
    }
}
