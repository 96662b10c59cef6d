use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;

#[derive(Debug)]
struct Window {
    last_request: Option<Instant>,
    count: u32,
}

/// Throttles outbound calls to a single provider to at most `max_requests`
/// per fixed `period`.
///
/// Rolling-window scheduling, not a token bucket: once the window elapses the
/// counter resets before the limit is evaluated; once the counter hits the
/// limit the caller sleeps for the remainder of the window. Every call,
/// including the first, advances the last-request time and the counter.
/// There is no error path.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    period: Duration,
    window: Mutex<Window>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, period: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            period,
            window: Mutex::new(Window {
                last_request: None,
                count: 0,
            }),
        }
    }

    /// Blocks until issuing another call stays within the budget.
    pub async fn acquire(&self) {
        let mut window = self.window.lock().await;

        if let Some(last) = window.last_request {
            let elapsed = last.elapsed();
            if elapsed >= self.period {
                window.count = 0;
            } else if window.count >= self.max_requests {
                let wait = self.period - elapsed;
                tracing::info!("Rate limit reached, waiting {:.1}s", wait.as_secs_f64());
                sleep(wait).await;
                window.count = 0;
            }
        }

        window.last_request = Some(Instant::now());
        window.count += 1;
    }
}
