// Injectable sleep for retry backoff and inter-chunk delays

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Source of deliberate suspensions
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real wall-clock sleep on the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Returns immediately and records every requested duration.
///
/// Lets tests assert on backoff schedules and chunk delays without waiting.
#[derive(Debug, Clone, Default)]
pub struct RecordingSleeper {
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.sleeps.lock().len()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_sleeper_records_without_waiting() {
        let sleeper = RecordingSleeper::new();
        let start = std::time::Instant::now();
        sleeper.sleep(Duration::from_secs(60)).await;
        sleeper.sleep(Duration::from_millis(5)).await;

        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(
            sleeper.recorded(),
            vec![Duration::from_secs(60), Duration::from_millis(5)]
        );
    }
}
