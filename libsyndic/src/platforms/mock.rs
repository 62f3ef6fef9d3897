//! Scripted publisher for tests and dry runs
//!
//! Compiled into every build, not just tests, so the daemon can run with a
//! mock registry when no platform credentials are configured.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::platforms::Publisher;
use crate::types::{Platform, PublishReport, SocialMediaPostRequest};

pub struct MockPublisher {
    platform: Platform,
    /// Reports consumed in order; when empty, every call succeeds
    scripted: Mutex<VecDeque<PublishReport>>,
    /// When set, ignore the script and fail retryably forever
    always_fail: bool,
    calls: AtomicUsize,
}

impl MockPublisher {
    pub fn new(platform: Platform, scripted: Vec<PublishReport>) -> Self {
        Self {
            platform,
            scripted: Mutex::new(scripted.into()),
            always_fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn always_succeeding(platform: Platform) -> Self {
        Self::new(platform, Vec::new())
    }

    /// Fails retryably `n` times, then succeeds
    pub fn failing_n_then_success(platform: Platform, n: usize) -> Self {
        let scripted = (0..n)
            .map(|i| PublishReport::failure(format!("scripted transient failure {}", i + 1), true))
            .collect();
        Self::new(platform, scripted)
    }

    pub fn always_retryable_failure(platform: Platform) -> Self {
        Self {
            always_fail: true,
            ..Self::new(platform, Vec::new())
        }
    }

    pub fn fatal_failure(platform: Platform, reason: &str) -> Self {
        Self::new(platform, vec![PublishReport::failure(reason, false)])
    }

    /// Number of publish calls made so far
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn publish(&self, _request: &SocialMediaPostRequest) -> PublishReport {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.always_fail {
            return PublishReport::failure("scripted transient failure", true);
        }
        match self.scripted.lock().unwrap().pop_front() {
            Some(report) => report,
            None => PublishReport::success(format!("mock-{}-{}", self.platform, call)),
        }
    }
}
