//! # Application State Management
//!
//! State shared by every HTTP handler and every call actor.
//!
//! ## What is shared:
//! - **config**: read-only after startup, so a plain `Arc` is enough
//! - **transcoder**: built once from validated config; it is `Copy`
//! - **services**: collaborator clients (HTTP client pools inside are shareable)
//! - **metrics**: process-wide counters
//!
//! ## Why atomics instead of Arc<RwLock<...>>:
//! Calls only ever increment or read the counters. Atomics give that without a
//! lock, and a call actor never blocks its arbiter waiting on another call.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::audio::codec::Transcoder;
use crate::config::AppConfig;
use crate::integrations::Services;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub transcoder: Transcoder,
    pub services: Services,
    pub metrics: Arc<BridgeMetrics>,
    pub start_time: Instant,
}

/// Process-wide call counters.
#[derive(Debug, Default)]
pub struct BridgeMetrics {
    active_sessions: AtomicU64,
    sessions_total: AtomicU64,
    setup_failures: AtomicU64,
    completed_calls: AtomicU64,
}

/// Point-in-time copy of `BridgeMetrics`, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub active_sessions: u64,
    pub sessions_total: u64,
    pub setup_failures: u64,
    pub completed_calls: u64,
}

impl BridgeMetrics {
    pub fn session_started(&self) {
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
        self.sessions_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Never goes below zero, even if called more often than `session_started`.
    pub fn session_ended(&self) {
        let _ = self
            .active_sessions
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn setup_failed(&self) {
        self.setup_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn call_completed(&self) {
        self.completed_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
            sessions_total: self.sessions_total.load(Ordering::Relaxed),
            setup_failures: self.setup_failures.load(Ordering::Relaxed),
            completed_calls: self.completed_calls.load(Ordering::Relaxed),
        }
    }
}

impl AppState {
    /// Build shared state from a validated configuration.
    pub fn new(config: AppConfig, services: Services) -> anyhow::Result<Self> {
        let transcoder = config.transcoder()?;
        Ok(Self {
            config: Arc::new(config),
            transcoder,
            services,
            metrics: Arc::new(BridgeMetrics::default()),
            start_time: Instant::now(),
        })
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
