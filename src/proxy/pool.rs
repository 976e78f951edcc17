//
// src/proxy/pool.rs
//
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::backend::Backend;

/// Outcome of a forwarded request, as classified by the proxy handler.
/// Only `ProxyError` has any effect on pool state (passive ejection);
/// application-level errors from the backend are `Success` here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    ProxyError,
}

/// Fixed set of backends plus round-robin selection state.
///
/// The backend set never changes after construction (spec: "fixed at
/// startup; no add/remove at runtime"), so this is a plain `Vec` rather
/// than the teacher's `DashMap` snapshot-and-swap design, which existed to
/// support a dynamic pool this spec does not have.
pub struct BackendPool {
    backends: Vec<Arc<Backend>>,
    cursor: AtomicU64,
}

impl BackendPool {
    pub fn new(backends: Vec<Arc<Backend>>) -> Self {
        Self {
            backends,
            cursor: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn all(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    pub fn healthy_count(&self) -> usize {
        self.backends.iter().filter(|b| b.is_healthy()).count()
    }

    /// Advance the free-running cursor and return its value reduced modulo
    /// `n`. `fetch_add` on an unsigned atomic wraps on overflow rather than
    /// panicking or saturating, which is the wrap behavior spec.md §9
    /// requires.
    fn next_index(&self, n: usize) -> usize {
        let v = self.cursor.fetch_add(1, Ordering::Relaxed);
        (v % n as u64) as usize
    }

    /// Scan forward from `start` (inclusive) for at most `n` positions and
    /// return the first healthy backend found, skipping `exclude` if given.
    fn scan_healthy(&self, start: usize, exclude: Option<usize>) -> Option<usize> {
        let n = self.backends.len();
        for offset in 0..n {
            let idx = (start + offset) % n;
            if Some(idx) == exclude {
                continue;
            }
            if self.backends[idx].is_healthy() {
                return Some(idx);
            }
        }
        None
    }

    /// JSQ-of-2 with round-robin tie-breaking (spec.md §4.1).
    ///
    /// Returns `None` iff no healthy backend exists. On success, the
    /// returned backend's `in_flight` has already been incremented; the
    /// caller must eventually call `release` exactly once.
    pub fn pick(&self) -> Option<Arc<Backend>> {
        let n = self.backends.len();
        if n == 0 {
            return None;
        }

        let i = self.next_index(n);
        let a_idx = self.scan_healthy(i, None)?;

        let j = self.next_index(n);
        let b_idx = self.scan_healthy(j, Some(a_idx));

        let chosen_idx = match b_idx {
            None => a_idx,
            Some(b_idx) => {
                let a = &self.backends[a_idx];
                let b = &self.backends[b_idx];
                if b.in_flight() < a.in_flight() {
                    b_idx
                } else {
                    a_idx
                }
            }
        };

        let backend = self.backends[chosen_idx].clone();
        backend.incr_in_flight();
        Some(backend)
    }

    /// Decrement `in_flight` and, on `ProxyError`, passively eject the
    /// backend. Idempotent per-call; the caller must invoke this exactly
    /// once per successful `pick()`.
    pub fn release(&self, backend: &Backend, outcome: Outcome) {
        backend.decr_in_flight();
        if outcome == Outcome::ProxyError {
            backend.set_healthy(false);
        }
    }

    /// Set a backend's health flag directly. Used by the health checker;
    /// idempotent, no edge-triggered notification.
    pub fn mark(&self, backend: &Backend, healthy: bool) {
        backend.set_healthy(healthy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn pool(urls: &[&str]) -> BackendPool {
        let backends = urls
            .iter()
            .map(|u| Arc::new(Backend::new(Url::parse(u).unwrap())))
            .collect();
        BackendPool::new(backends)
    }

    #[test]
    fn pick_returns_none_when_empty() {
        let p = BackendPool::new(vec![]);
        assert!(p.pick().is_none());
    }

    #[test]
    fn pick_returns_none_when_all_unhealthy() {
        let p = pool(&["http://localhost:8000", "http://localhost:8001"]);
        for b in p.all() {
            b.set_healthy(false);
        }
        assert!(p.pick().is_none());
    }

    #[test]
    fn pick_never_returns_unhealthy_backend() {
        let p = pool(&[
            "http://localhost:8000",
            "http://localhost:8001",
            "http://localhost:8002",
        ]);
        p.all()[1].set_healthy(false);

        for _ in 0..50 {
            let b = p.pick().expect("should find a healthy backend");
            assert!(b.is_healthy());
            p.release(&b, Outcome::Success);
        }
    }

    #[test]
    fn pick_increments_in_flight_and_release_decrements() {
        let p = pool(&["http://localhost:8000"]);
        let b = p.pick().unwrap();
        assert_eq!(b.in_flight(), 1);
        p.release(&b, Outcome::Success);
        assert_eq!(b.in_flight(), 0);
    }

    #[test]
    fn release_with_proxy_error_ejects_backend() {
        let p = pool(&["http://localhost:8000", "http://localhost:8001"]);
        let b = p.pick().unwrap();
        p.release(&b, Outcome::ProxyError);
        assert!(!b.is_healthy());
        assert_eq!(p.healthy_count(), 1);
    }

    #[test]
    fn prefers_less_busy_backend() {
        let p = pool(&["http://localhost:8000", "http://localhost:8001"]);
        // Saturate backend 0 with in-flight requests so it always loses JSQ.
        p.all()[0].incr_in_flight();
        p.all()[0].incr_in_flight();
        p.all()[0].incr_in_flight();

        let mut hit_counts = [0usize; 2];
        for _ in 0..20 {
            let b = p.pick().unwrap();
            let idx = p.all().iter().position(|x| Arc::ptr_eq(x, &b)).unwrap();
            hit_counts[idx] += 1;
            p.release(&b, Outcome::Success);
        }
        assert!(hit_counts[1] > hit_counts[0]);
    }

    #[test]
    fn distributes_across_all_healthy_backends_under_uniform_load() {
        let p = pool(&[
            "http://localhost:8000",
            "http://localhost:8001",
            "http://localhost:8002",
        ]);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..30 {
            let b = p.pick().unwrap();
            seen.insert(b.url.clone());
            p.release(&b, Outcome::Success);
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn healthy_count_matches_flags() {
        let p = pool(&["http://localhost:8000", "http://localhost:8001"]);
        assert_eq!(p.healthy_count(), 2);
        p.all()[0].set_healthy(false);
        assert_eq!(p.healthy_count(), 1);
    }
}
