use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

/// Delay source for the polling loops. Injected so tests run the full retry
/// logic without real time passing.
#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Unix-time source, injected for the same reason.
pub trait Clock: Send + Sync {
    fn now_unix(&self) -> i64;
}

pub struct TokioScheduler;

#[async_trait]
impl Scheduler for TokioScheduler {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> i64 {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(elapsed) => elapsed.as_secs() as i64,
            Err(_) => 0,
        }
    }
}
