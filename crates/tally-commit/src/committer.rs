use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tally_intake::{Delivery, IntakeQueue};
use tally_store::{DurableStore, StatusStore, VoteRow};
use tally_types::{Clock, PostId, Timestamp, UserId, VoteIntakeEvent};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::CommitConfig;
use crate::error::CommitError;

/// Running totals since the committer was created.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CommitStats {
    pub batches: u64,
    pub committed_rows: u64,
    pub stale_rows: u64,
    pub skipped_duplicates: u64,
    pub dropped_poison: u64,
    pub failures: u64,
}

/// What one batch did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub delivered: usize,
    /// Rows written by the transaction.
    pub committed: usize,
    /// Rows the store kept because it already held a newer write.
    pub stale: usize,
    /// Events already durable according to the status store.
    pub duplicates: usize,
    /// Undecodable events dropped for good.
    pub poison: usize,
    /// Undecodable events returned for another attempt.
    pub retried: usize,
}

/// Drains the intake queue into the durable store.
pub struct BatchCommitter {
    queue: Arc<IntakeQueue>,
    store: Arc<dyn DurableStore>,
    status: Arc<dyn StatusStore>,
    clock: Arc<dyn Clock>,
    config: CommitConfig,
    stats: Mutex<CommitStats>,
    // One batch at a time, whether from the loop or an explicit flush.
    batch_lock: tokio::sync::Mutex<()>,
}

impl BatchCommitter {
    pub fn new(
        queue: Arc<IntakeQueue>,
        store: Arc<dyn DurableStore>,
        status: Arc<dyn StatusStore>,
        clock: Arc<dyn Clock>,
        config: CommitConfig,
    ) -> Self {
        Self {
            queue,
            store,
            status,
            clock,
            config,
            stats: Mutex::new(CommitStats::default()),
            batch_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &CommitConfig {
        &self.config
    }

    pub fn stats(&self) -> CommitStats {
        match self.stats.lock() {
            Ok(stats) => *stats,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Poll and commit a single batch.
    pub async fn run_once(&self) -> Result<BatchReport, CommitError> {
        let _guard = self.batch_lock.lock().await;

        let deliveries = self.queue.poll(self.config.batch_size)?;
        if deliveries.is_empty() {
            return Ok(BatchReport::default());
        }

        let now = self.clock.now();
        let mut report = BatchReport {
            delivered: deliveries.len(),
            ..BatchReport::default()
        };

        let mut finished: Vec<u64> = Vec::new();
        let mut retry: Vec<u64> = Vec::new();
        let mut candidates: Vec<(u64, VoteIntakeEvent)> = Vec::new();

        for delivery in &deliveries {
            match VoteIntakeEvent::decode(&delivery.payload) {
                Ok(event) if self.already_persisted(&event, now) => {
                    report.duplicates += 1;
                    finished.push(delivery.seq);
                }
                Ok(event) => candidates.push((delivery.seq, event)),
                Err(e) if delivery.attempts >= self.config.max_attempts => {
                    report.poison += 1;
                    finished.push(delivery.seq);
                    log_poison(delivery, &e.to_string());
                }
                Err(e) => {
                    report.retried += 1;
                    retry.push(delivery.seq);
                    warn!(
                        seq = delivery.seq,
                        attempts = delivery.attempts,
                        error = %e,
                        "malformed vote event; will retry"
                    );
                }
            }
        }

        self.queue.nack(&retry)?;

        let (rows, candidate_seqs) = collapse(&candidates);
        if rows.is_empty() {
            self.queue.ack(&finished)?;
            self.record(&report, false);
            return Ok(report);
        }

        match self.store.upsert_votes(&rows).await {
            Ok(summary) => {
                for row in &rows {
                    let key = tally_types::IdempotencyKey {
                        post_id: row.post_id,
                        user_id: row.user_id,
                        submitted_at: row.submitted_at,
                    };
                    if let Err(e) = self.status.mark_persisted(key, self.config.ack_ttl(), now) {
                        warn!(key = %key, error = %e, "failed to set acknowledgment flag");
                    }
                }
                finished.extend(candidate_seqs);
                self.queue.ack(&finished)?;

                report.committed = summary.applied;
                report.stale = summary.stale;
                self.record(&report, false);
                debug!(
                    delivered = report.delivered,
                    committed = report.committed,
                    stale = report.stale,
                    duplicates = report.duplicates,
                    "vote batch committed"
                );
                Ok(report)
            }
            Err(source) => {
                self.queue.nack(&candidate_seqs)?;
                self.queue.ack(&finished)?;
                self.record(&report, true);
                warn!(rows = rows.len(), error = %source, "vote batch rolled back; requeued");
                Err(CommitError::DurableWriteFailure {
                    rows: rows.len(),
                    source,
                })
            }
        }
    }

    /// Commit batches until nothing is left to poll. Returns the number of
    /// deliveries handled. Stops at the first failed batch, and after any
    /// batch that put a malformed event back, so each drain costs a
    /// malformed event at most one attempt.
    pub async fn drain(&self) -> Result<usize, CommitError> {
        let mut handled = 0;
        loop {
            let report = self.run_once().await?;
            if report.delivered == 0 {
                return Ok(handled);
            }
            handled += report.delivered;
            if report.retried > 0 {
                return Ok(handled);
            }
        }
    }

    /// Start the background loop.
    pub fn spawn(self: Arc<Self>) -> CommitterHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let committer = Arc::clone(&self);
        let task = tokio::spawn(async move { committer.run(shutdown_rx).await });
        CommitterHandle {
            committer: self,
            shutdown_tx,
            task,
        }
    }

    async fn run(&self, mut shutdown_rx: mpsc::Receiver<()>) {
        let mut tick = interval(self.config.batch_interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately.
        tick.tick().await;

        info!(
            batch_size = self.config.batch_size,
            interval_ms = self.config.batch_interval_ms,
            "batch committer started"
        );

        loop {
            let due = tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = tick.tick() => {
                    self.purge_expired_flags();
                    true
                }
                _ = self.queue.notified() => {
                    self.queue.pending().unwrap_or(0) >= self.config.batch_size
                }
            };
            if !due {
                continue;
            }

            if let Err(e) = self.drain().await {
                warn!(error = %e, "batch drain failed; backing off");
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = sleep(self.config.retry_backoff()) => {}
                }
            }
        }

        match self.drain().await {
            Ok(handled) => info!(handled, "batch committer stopped"),
            Err(e) => error!(error = %e, "final drain failed; events remain queued"),
        }
    }

    /// Drop acknowledgment flags whose TTL has passed. Runs on every tick of
    /// the background loop. Returns how many were removed.
    pub fn purge_expired_flags(&self) -> usize {
        match self.status.purge_expired(self.clock.now()) {
            Ok(0) => 0,
            Ok(purged) => {
                debug!(purged, "expired acknowledgment flags purged");
                purged
            }
            Err(e) => {
                warn!(error = %e, "acknowledgment flag purge failed");
                0
            }
        }
    }

    fn already_persisted(&self, event: &VoteIntakeEvent, now: Timestamp) -> bool {
        match self.status.is_persisted(&event.idempotency_key(), now) {
            Ok(done) => done,
            Err(e) => {
                // The store upsert is last-write-wins, so a missed skip is harmless.
                debug!(error = %e, "status lookup failed; committing anyway");
                false
            }
        }
    }

    fn record(&self, report: &BatchReport, failed: bool) {
        let mut stats = match self.stats.lock() {
            Ok(stats) => stats,
            Err(poisoned) => poisoned.into_inner(),
        };
        stats.batches += 1;
        stats.skipped_duplicates += report.duplicates as u64;
        stats.dropped_poison += report.poison as u64;
        if failed {
            stats.failures += 1;
        } else {
            stats.committed_rows += report.committed as u64;
            stats.stale_rows += report.stale as u64;
        }
    }
}

/// Keep the latest event per `(post, user)`. Returns the rows to write and
/// every sequence number they cover.
fn collapse(candidates: &[(u64, VoteIntakeEvent)]) -> (Vec<VoteRow>, Vec<u64>) {
    let mut latest: HashMap<(PostId, UserId), VoteIntakeEvent> = HashMap::new();
    for (_, event) in candidates {
        latest
            .entry(event.partition_key())
            .and_modify(|held| {
                if event.submitted_at >= held.submitted_at {
                    *held = *event;
                }
            })
            .or_insert(*event);
    }

    let mut rows: Vec<VoteRow> = latest
        .into_values()
        .map(|e| VoteRow {
            post_id: e.post_id,
            user_id: e.user_id,
            direction: e.direction,
            submitted_at: e.submitted_at,
        })
        .collect();
    rows.sort_by_key(|r| (r.post_id, r.user_id));

    let seqs = candidates.iter().map(|(seq, _)| *seq).collect();
    (rows, seqs)
}

fn log_poison(delivery: &Delivery, reason: &str) {
    error!(
        seq = delivery.seq,
        attempts = delivery.attempts,
        payload = %String::from_utf8_lossy(&delivery.payload),
        reason,
        "dropping malformed vote event; reconciliation required"
    );
}

/// Owner of the background committer task.
pub struct CommitterHandle {
    committer: Arc<BatchCommitter>,
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl CommitterHandle {
    /// Drain the queue now instead of waiting for the next tick.
    pub async fn flush(&self) -> Result<usize, CommitError> {
        self.committer.drain().await
    }

    pub fn stats(&self) -> CommitStats {
        self.committer.stats()
    }

    pub fn committer(&self) -> &Arc<BatchCommitter> {
        &self.committer
    }

    /// Stop the loop after a final drain and wait for it to finish.
    pub async fn shutdown(self) -> Result<CommitStats, CommitError> {
        // A closed channel means the task already exited.
        let _ = self.shutdown_tx.send(()).await;
        self.task
            .await
            .map_err(|e| CommitError::Task(e.to_string()))?;
        Ok(self.committer.stats())
    }
}
