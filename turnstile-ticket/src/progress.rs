use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Status of one issuance run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssuanceStatus {
    Idle,
    Creating,
    Cancelled,
    Completed,
    Error,
}

impl IssuanceStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed | Self::Error)
    }
}

/// Snapshot of a run's progress
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Progress {
    pub current: u32,
    pub total: u32,
    pub percentage: u8,
    pub current_tier: Option<String>,
    pub status: IssuanceStatus,
    pub error: Option<String>,
}

impl Progress {
    fn idle() -> Self {
        Self {
            current: 0,
            total: 0,
            percentage: 0,
            current_tier: None,
            status: IssuanceStatus::Idle,
            error: None,
        }
    }
}

fn percentage(current: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    (f64::from(current) / f64::from(total) * 100.0).round() as u8
}

/// Drives the run state machine and publishes every change to watchers.
///
/// ```text
/// Idle --start--> Creating --advance--> Creating
///                 Creating --(current == total)--> Completed
///                 Creating --cancel--> Cancelled
///                 Creating --fail--> Error
/// Cancelled | Completed | Error --reset--> Idle
/// ```
pub struct ProgressTracker {
    tx: watch::Sender<Progress>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Progress::idle());
        Self { tx }
    }

    pub fn snapshot(&self) -> Progress {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Progress> {
        self.tx.subscribe()
    }

    pub fn start(&self, total: u32) -> Result<(), ProgressError> {
        self.transition("start", IssuanceStatus::Idle, |p| {
            p.current = 0;
            p.total = total;
            p.percentage = 0;
            p.status = IssuanceStatus::Creating;
        })
    }

    pub fn set_tier(&self, tier: &str) {
        self.tx.send_if_modified(|p| {
            if p.status != IssuanceStatus::Creating || p.current_tier.as_deref() == Some(tier) {
                return false;
            }
            p.current_tier = Some(tier.to_string());
            true
        });
    }

    /// Count one more persisted ticket; completes the run when it was the last
    pub fn advance(&self) -> Result<(), ProgressError> {
        self.transition("advance", IssuanceStatus::Creating, |p| {
            p.current = (p.current + 1).min(p.total);
            p.percentage = percentage(p.current, p.total);
            if p.current >= p.total {
                p.status = IssuanceStatus::Completed;
            }
        })
    }

    pub fn cancel(&self) -> Result<(), ProgressError> {
        self.transition("cancel", IssuanceStatus::Creating, |p| {
            p.status = IssuanceStatus::Cancelled;
        })
    }

    pub fn fail(&self, message: impl Into<String>) -> Result<(), ProgressError> {
        let message = message.into();
        self.transition("fail", IssuanceStatus::Creating, |p| {
            p.status = IssuanceStatus::Error;
            p.error = Some(message);
        })
    }

    /// Only terminal states can be reset
    pub fn reset(&self) -> Result<(), ProgressError> {
        let status = self.tx.borrow().status;
        if !status.is_terminal() {
            return Err(ProgressError::InvalidTransition {
                from: status,
                action: "reset",
            });
        }
        self.tx.send_replace(Progress::idle());
        Ok(())
    }

    fn transition(
        &self,
        action: &'static str,
        required: IssuanceStatus,
        apply: impl FnOnce(&mut Progress),
    ) -> Result<(), ProgressError> {
        let mut result = Ok(());
        self.tx.send_if_modified(|p| {
            if p.status != required {
                result = Err(ProgressError::InvalidTransition {
                    from: p.status,
                    action,
                });
                return false;
            }
            apply(p);
            true
        });
        result
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProgressError {
    #[error("Cannot {action} an issuance run in state {from:?}")]
    InvalidTransition {
        from: IssuanceStatus,
        action: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_to_completion() {
        let tracker = ProgressTracker::new();
        assert_eq!(tracker.snapshot().status, IssuanceStatus::Idle);

        tracker.start(3).unwrap();
        tracker.set_tier("VIP");
        tracker.advance().unwrap();
        let p = tracker.snapshot();
        assert_eq!(p.current, 1);
        assert_eq!(p.percentage, 33);
        assert_eq!(p.current_tier.as_deref(), Some("VIP"));
        assert_eq!(p.status, IssuanceStatus::Creating);

        tracker.advance().unwrap();
        assert_eq!(tracker.snapshot().percentage, 67);
        tracker.advance().unwrap();

        let p = tracker.snapshot();
        assert_eq!(p.status, IssuanceStatus::Completed);
        assert_eq!(p.percentage, 100);

        // No further progress after completion
        assert!(tracker.advance().is_err());
    }

    #[test]
    fn test_cancel_keeps_count() {
        let tracker = ProgressTracker::new();
        tracker.start(10).unwrap();
        for _ in 0..3 {
            tracker.advance().unwrap();
        }
        tracker.cancel().unwrap();

        let p = tracker.snapshot();
        assert_eq!(p.status, IssuanceStatus::Cancelled);
        assert_eq!(p.current, 3);
        assert_eq!(p.total, 10);
        assert_eq!(p.percentage, 30);
    }

    #[test]
    fn test_terminal_states_require_reset() {
        let tracker = ProgressTracker::new();
        tracker.start(2).unwrap();
        tracker.fail("store unavailable").unwrap();

        assert_eq!(tracker.snapshot().error.as_deref(), Some("store unavailable"));
        assert!(tracker.start(2).is_err());
        assert!(tracker.cancel().is_err());

        tracker.reset().unwrap();
        assert_eq!(tracker.snapshot(), Progress::idle());
        tracker.start(2).unwrap();
    }

    #[test]
    fn test_reset_rejected_while_creating() {
        let tracker = ProgressTracker::new();
        assert!(tracker.reset().is_err());
        tracker.start(1).unwrap();
        assert_eq!(
            tracker.reset(),
            Err(ProgressError::InvalidTransition {
                from: IssuanceStatus::Creating,
                action: "reset",
            })
        );
    }

    #[tokio::test]
    async fn test_watchers_see_updates() {
        let tracker = ProgressTracker::new();
        let mut rx = tracker.subscribe();

        tracker.start(4).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().status, IssuanceStatus::Creating);

        tracker.advance().unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().current, 1);
    }
}
