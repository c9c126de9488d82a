use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

/// Per-address sliding-window request counter.
#[derive(Clone)]
pub struct RateLimiter {
    windows: Arc<Mutex<HashMap<String, VecDeque<(Instant, u32)>>>>,
    max_requests: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            windows: Arc::new(Mutex::new(HashMap::new())),
            max_requests,
            window,
        }
    }

    pub fn check_and_record(&self, address: &str) -> bool {
        self.check_and_record_at(address, Instant::now())
    }

    pub fn check_and_record_at(&self, address: &str, now: Instant) -> bool {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        let entries = windows.entry(address.to_string()).or_default();

        while let Some((ts, _)) = entries.front() {
            if now.saturating_duration_since(*ts) < self.window {
                break;
            }
            entries.pop_front();
        }

        let total: u32 = entries.iter().map(|(_, count)| *count).sum();
        if total >= self.max_requests {
            return false;
        }

        entries.push_back((now, 1));
        true
    }

    /// Forgets addresses with nothing left in the window.
    pub fn retain_recent(&self) {
        let now = Instant::now();
        let window = self.window;
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);

        windows.retain(|_, entries| {
            entries.retain(|(ts, _)| now.saturating_duration_since(*ts) < window);
            !entries.is_empty()
        });
    }

    pub fn len(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
