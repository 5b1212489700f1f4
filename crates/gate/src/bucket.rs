//! Per-tool token bucket: sustained rate `rps`, burst of `floor(rps)`
//! (at least one). Callers block until a token accrues.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

struct BucketState {
    tokens: f64,
    last: Instant,
}

pub struct TokenBucket {
    rps: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(rps: f64) -> Self {
        let rps = if rps > 0.0 { rps } else { 1.0 };
        Self {
            rps,
            burst: rps.floor().max(1.0),
            state: Mutex::new(BucketState {
                tokens: rps.floor().max(1.0),
                last: Instant::now(),
            }),
        }
    }

    /// Take one token, sleeping until one has accrued. The lock is only
    /// held for the refill arithmetic, never across the sleep.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut st = match self.state.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                let now = Instant::now();
                let elapsed = now.duration_since(st.last).as_secs_f64();
                st.tokens = (st.tokens + elapsed * self.rps).min(self.burst);
                st.last = now;
                if st.tokens >= 1.0 {
                    st.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - st.tokens) / self.rps)
            };
            tokio::time::sleep(wait).await;
        }
    }
}
