use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

/// How an interruptible wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Elapsed,
    Shutdown,
}

/// Time source for the scheduler.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// True once a shutdown has been requested. Checked between hours so a
    /// long range or catch-up stops at the next hour boundary.
    fn shutdown_requested(&self) -> bool {
        false
    }

    /// Wait until `deadline` (returns at once if it has passed) unless a
    /// shutdown is requested first.
    async fn sleep_until(&self, deadline: DateTime<Utc>) -> WaitOutcome;
}

/// Wall clock; Ctrl-C requests shutdown.
///
/// The signal is latched, so a Ctrl-C received while an hour is being
/// processed lets that hour finish and stops before the next one.
pub struct SystemClock {
    shutdown: watch::Receiver<bool>,
}

impl SystemClock {
    /// Must be called inside a tokio runtime.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown requested");
                let _ = tx.send(true);
            }
        });
        Self { shutdown: rx }
    }
}

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn sleep_until(&self, deadline: DateTime<Utc>) -> WaitOutcome {
        let mut shutdown = self.shutdown.clone();
        if *shutdown.borrow() {
            return WaitOutcome::Shutdown;
        }
        let wait = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            _ = tokio::time::sleep(wait) => WaitOutcome::Elapsed,
            changed = shutdown.changed() => match changed {
                Ok(()) if *shutdown.borrow() => WaitOutcome::Shutdown,
                // Sender gone without a signal: keep the full wait.
                _ => {
                    tokio::time::sleep((deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO)).await;
                    WaitOutcome::Elapsed
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_past_deadline_returns_immediately() {
        let clock = SystemClock::new();
        let outcome = clock.sleep_until(Utc::now() - chrono::Duration::minutes(5)).await;
        assert_eq!(outcome, WaitOutcome::Elapsed);
    }
}
