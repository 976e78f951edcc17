// src/proxy/backend.rs
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use url::Url;

/// A single upstream origin the load balancer may forward to.
///
/// `healthy` and `in_flight` are mutated by request workers and the health
/// checker concurrently; both are plain atomics so neither side ever blocks
/// on the other mid-I/O.
#[derive(Debug)]
pub struct Backend {
    pub url: Url,
    healthy: AtomicBool,
    in_flight: AtomicI64,
}

impl Backend {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            healthy: AtomicBool::new(true),
            in_flight: AtomicI64::new(0),
        }
    }

    /// Authority string (`host:port`), used for the rewritten `Host` header
    /// and in log lines.
    pub fn authority(&self) -> String {
        match self.url.port() {
            Some(port) => format!("{}:{}", self.url.host_str().unwrap_or(""), port),
            None => self.url.host_str().unwrap_or("").to_string(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Release);
    }

    pub fn in_flight(&self) -> i64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub(super) fn incr_in_flight(&self) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
    }

    pub(super) fn decr_in_flight(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.url)
    }
}
