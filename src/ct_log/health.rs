// src/ct_log/health.rs
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Fetch health of one CT log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogHealth {
    /// Windows are fetching normally
    Healthy,
    /// Some consecutive window failures, still fetching at full speed
    Degraded,
    /// Too many consecutive failures; workers wait out a cooldown between windows
    Failed,
}

#[derive(Debug)]
struct HealthState {
    status: LogHealth,
    failure_count: u32,
    last_failure: Option<Instant>,
    last_error: Option<String>,
}

/// Tracks consecutive window failures for a single log, shared by its workers
#[derive(Debug)]
pub struct FetchHealth {
    log_url: String,
    state: Mutex<HealthState>,
    failure_threshold: u32,
    base_backoff: Duration,
    max_backoff: Duration,
}

impl FetchHealth {
    /// # Arguments
    /// * `failure_threshold` - consecutive failures before the log is marked Failed
    /// * `base_backoff` - cooldown after reaching the threshold; doubles per further failure
    pub fn new(log_url: String, failure_threshold: u32, base_backoff: Duration) -> Self {
        Self {
            log_url,
            state: Mutex::new(HealthState {
                status: LogHealth::Healthy,
                failure_count: 0,
                last_failure: None,
                last_error: None,
            }),
            failure_threshold: failure_threshold.max(1),
            base_backoff,
            max_backoff: Duration::from_secs(300),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HealthState> {
        // State is a handful of plain fields; a poisoned lock still holds usable data
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record_success(&self) {
        let mut state = self.lock();
        let previous = state.status;

        state.status = LogHealth::Healthy;
        state.failure_count = 0;

        match previous {
            LogHealth::Failed => info!("Log recovered: {} is now healthy (was failed)", self.log_url),
            LogHealth::Degraded => debug!("Log recovered: {} is now healthy (was degraded)", self.log_url),
            LogHealth::Healthy => {}
        }
    }

    pub fn record_failure(&self, error: &str) {
        let mut state = self.lock();
        let previous = state.status;

        state.failure_count += 1;
        state.last_failure = Some(Instant::now());
        state.last_error = Some(error.to_string());
        state.status = if state.failure_count >= self.failure_threshold {
            LogHealth::Failed
        } else {
            LogHealth::Degraded
        };

        match (previous, state.status) {
            (LogHealth::Healthy, LogHealth::Degraded) => {
                warn!(
                    "Log degraded: {} (failure {}/{}): {}",
                    self.log_url, state.failure_count, self.failure_threshold, error
                );
            }
            (LogHealth::Failed, LogHealth::Failed) => {
                debug!(
                    "Log still failed: {} (failure {}): {}",
                    self.log_url, state.failure_count, error
                );
            }
            (_, LogHealth::Failed) => {
                warn!(
                    "Log failed: {} (after {} failures, cooling down {:?} between windows): {}",
                    self.log_url,
                    state.failure_count,
                    self.backoff_for(state.failure_count),
                    error
                );
            }
            _ => {}
        }
    }

    pub fn status(&self) -> LogHealth {
        self.lock().status
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    fn backoff_for(&self, failure_count: u32) -> Duration {
        if failure_count < self.failure_threshold {
            return Duration::ZERO;
        }
        let doublings = (failure_count - self.failure_threshold).min(16);
        self.base_backoff
            .saturating_mul(1 << doublings)
            .min(self.max_backoff)
    }

    /// Time a worker should wait before fetching its next window
    pub fn cooldown(&self) -> Duration {
        let state = self.lock();
        if state.status != LogHealth::Failed {
            return Duration::ZERO;
        }
        let backoff = self.backoff_for(state.failure_count);
        match state.last_failure {
            Some(at) => backoff.saturating_sub(at.elapsed()),
            None => Duration::ZERO,
        }
    }
}
