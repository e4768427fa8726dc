use std::time::Duration;

use rand::Rng;
use tally_types::VoteIntakeEvent;
use tracing::{error, warn};

use crate::error::{IntakeError, Result};
use crate::queue::IntakeQueue;

/// Producer-side enqueue budget.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Wall-clock cap on the whole enqueue, sleeps included.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(500),
            timeout: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Exponential delay before retry `attempt` (0-based), capped at
    /// `max_backoff`, plus up to 50% jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .base_backoff
            .saturating_mul(2u32.saturating_pow(attempt.min(16)));
        let capped = exp.min(self.max_backoff);
        let jitter_ms = capped.as_millis() as u64 / 2;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        capped + Duration::from_millis(jitter)
    }
}

/// Enqueue with bounded exponential backoff.
///
/// A full queue and a failed log write are retried; a closed queue fails at
/// once. When the budget runs out the event is logged as a reconciliation
/// task and the caller gets an unavailable-class error.
pub async fn enqueue_with_retry(
    queue: &IntakeQueue,
    event: &VoteIntakeEvent,
    policy: &RetryPolicy,
) -> Result<u64> {
    let payload = event.encode()?;

    let attempt_loop = async {
        let mut attempt = 0u32;
        loop {
            match queue.enqueue_raw(payload.clone()) {
                Ok(seq) => return Ok(seq),
                Err(e) if e.is_transient() && attempt < policy.max_retries => {
                    let delay = policy.backoff(attempt);
                    warn!(
                        post_id = %event.post_id,
                        user_id = %event.user_id,
                        attempt,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "vote enqueue failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) if e.is_transient() => {
                    warn!(attempts = attempt + 1, error = %e, "last enqueue attempt failed");
                    return Err(IntakeError::RetriesExhausted {
                        attempts: attempt + 1,
                    });
                }
                Err(e) => return Err(e),
            }
        }
    };

    let result = match tokio::time::timeout(policy.timeout, attempt_loop).await {
        Ok(result) => result,
        Err(_) => Err(IntakeError::Timeout(policy.timeout)),
    };

    if let Err(e) = &result {
        if e.is_unavailable() {
            error!(
                post_id = %event.post_id,
                user_id = %event.user_id,
                direction = event.direction.value(),
                submitted_at = event.submitted_at.as_millis(),
                error = %e,
                "vote enqueue abandoned; reconciliation required"
            );
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tally_types::{PostId, Timestamp, UserId, VoteDirection};

    fn event() -> VoteIntakeEvent {
        VoteIntakeEvent::new(
            PostId::new(1),
            UserId::new(2),
            VoteDirection::Up,
            Timestamp::from_millis(5),
        )
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy {
            base_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(100),
            ..RetryPolicy::default()
        };
        let first = policy.backoff(0);
        assert!(first >= Duration::from_millis(10) && first <= Duration::from_millis(15));
        let late = policy.backoff(30);
        assert!(late >= Duration::from_millis(100) && late <= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn succeeds_once_space_frees_up() {
        let queue = Arc::new(IntakeQueue::in_memory(1));
        queue.enqueue(&event()).unwrap();
        let drained = queue.poll(1).unwrap();

        let consumer = {
            let queue = Arc::clone(&queue);
            let seq = drained[0].seq;
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                queue.ack(&[seq]).unwrap();
            })
        };

        let policy = RetryPolicy {
            max_retries: 50,
            ..fast_policy(0)
        };
        let seq = enqueue_with_retry(&queue, &event(), &policy).await.unwrap();
        assert_eq!(seq, 2);
        consumer.await.unwrap();
    }

    #[tokio::test]
    async fn exhausted_budget_is_unavailable() {
        let queue = IntakeQueue::in_memory(0);
        let err = enqueue_with_retry(&queue, &event(), &fast_policy(2))
            .await
            .unwrap_err();
        assert!(matches!(err, IntakeError::RetriesExhausted { attempts: 3 }));
        assert!(err.is_unavailable());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn unwritable_log_is_retried_then_unavailable() {
        let queue = IntakeQueue::open(&crate::queue::QueueConfig {
            capacity: 16,
            wal_path: Some(std::path::PathBuf::from("/dev/full")),
            sync_every_write: false,
        })
        .unwrap();
        let err = enqueue_with_retry(&queue, &event(), &fast_policy(2))
            .await
            .unwrap_err();
        assert!(matches!(err, IntakeError::RetriesExhausted { attempts: 3 }));
        assert!(err.is_unavailable());
        assert_eq!(queue.pending().unwrap(), 0);
    }

    #[tokio::test]
    async fn closed_queue_is_not_retried() {
        let queue = IntakeQueue::in_memory(4);
        queue.close();
        let err = enqueue_with_retry(&queue, &event(), &fast_policy(10))
            .await
            .unwrap_err();
        assert!(matches!(err, IntakeError::Closed));
    }
}
