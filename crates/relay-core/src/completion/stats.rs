use std::{sync::Mutex, time::Duration};

#[derive(Debug, Default)]
struct Counters {
    total: u64,
    successful: u64,
    failed: u64,
    total_chars: u64,
    total_latency: Duration,
}

/// Rolling statistics of completion calls, for observability only.
#[derive(Debug, Default)]
pub struct ApiStats {
    inner: Mutex<Counters>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ApiStatsSnapshot {
    pub total_requests: u64,
    pub successful: u64,
    pub failed: u64,
    pub total_chars_generated: u64,
    /// Percentage in `0.0..=100.0`.
    pub success_rate: f64,
    pub avg_latency: Duration,
}

impl ApiStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, chars: usize, latency: Duration) {
        let mut c = self.lock();
        c.total += 1;
        c.successful += 1;
        c.total_chars += chars as u64;
        c.total_latency += latency;
    }

    pub fn record_failure(&self) {
        let mut c = self.lock();
        c.total += 1;
        c.failed += 1;
    }

    pub fn snapshot(&self) -> ApiStatsSnapshot {
        let c = self.lock();
        let success_rate = if c.total > 0 {
            c.successful as f64 / c.total as f64 * 100.0
        } else {
            0.0
        };
        let avg_latency = if c.successful > 0 {
            c.total_latency / c.successful as u32
        } else {
            Duration::ZERO
        };
        ApiStatsSnapshot {
            total_requests: c.total,
            successful: c.successful,
            failed: c.failed,
            total_chars_generated: c.total_chars,
            success_rate,
            avg_latency,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Counters> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ApiStatsSnapshot {
    pub fn summary(&self) -> String {
        format!(
            "📡 API Stats: {} calls | ✅ {} ok | ❌ {} fail | 📊 {:.1}% success | ⏱️ {:.1}s avg",
            self.total_requests,
            self.successful,
            self.failed,
            self.success_rate,
            self.avg_latency.as_secs_f64()
        )
    }
}
