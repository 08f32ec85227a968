use std::time::Duration;

use citescout_core::config::PubmedConfig;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};

use crate::error::Result;

// ─── RateGate ─────────────────────────────────────────────────────────────────

/// Spaces outgoing requests at least `1/R` seconds apart across every worker
/// holding a clone of the same `Arc<RateGate>`.
pub struct RateGate {
    rate: f64,
    min_interval: Duration,
    last_grant: Mutex<Option<Instant>>,
}

impl RateGate {
    pub fn new(requests_per_second: f64) -> Self {
        let rate = if requests_per_second.is_finite() && requests_per_second > 0.0 {
            requests_per_second
        } else {
            1.0
        };
        Self {
            rate,
            min_interval: Duration::from_secs_f64(1.0 / rate),
            last_grant: Mutex::new(None),
        }
    }

    /// Gate for the E-utilities quota implied by `cfg` and the credential.
    pub fn for_pubmed(cfg: &PubmedConfig, api_key: Option<&str>) -> Self {
        Self::new(cfg.effective_rate(api_key))
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Worker bound derived from the quota: `ceil(factor × R)`, at least 1.
    pub fn worker_bound(&self, factor: f64) -> usize {
        ((self.rate * factor).ceil() as usize).max(1)
    }

    /// Waits until one more request may be issued. The lock is held across
    /// the sleep so waiters are granted strictly one at a time, in FIFO order.
    pub async fn acquire(&self) {
        let mut last = self.last_grant.lock().await;
        if let Some(t) = *last {
            let elapsed = t.elapsed();
            if elapsed < self.min_interval {
                sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

// ─── Client ───────────────────────────────────────────────────────────────────

/// HTTP client with a per-call timeout. Requests are never retried.
pub fn build_client(user_agent: &str, timeout: Duration) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(user_agent)
        .gzip(true)
        .timeout(timeout)
        .build()?;
    Ok(client)
}
