use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tally_types::VoteIntakeEvent;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::error::{IntakeError, Result};
use crate::wal::{self, pending_from, SyncMode, WalRecord, WriteAheadLog};

/// Configuration for the intake queue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of un-acked events held at once.
    pub capacity: usize,
    /// Outbox file. `None` keeps the queue in memory only.
    pub wal_path: Option<PathBuf>,
    pub sync_every_write: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            wal_path: None,
            sync_every_write: false,
        }
    }
}

/// One handed-out event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    pub seq: u64,
    /// How many times this event has been handed out, this one included.
    pub attempts: u32,
    pub payload: Vec<u8>,
}

#[derive(Default)]
struct QueueState {
    next_seq: u64,
    ready: BTreeMap<u64, Delivery>,
    in_flight: BTreeMap<u64, Delivery>,
}

impl QueueState {
    fn len(&self) -> usize {
        self.ready.len() + self.in_flight.len()
    }
}

/// Bounded at-least-once FIFO of encoded vote events.
///
/// Events stay in the queue from `enqueue` until the consumer acks them.
/// A nacked event returns to its original position, so redelivery keeps
/// enqueue order.
pub struct IntakeQueue {
    capacity: usize,
    state: Mutex<QueueState>,
    wal: Option<WriteAheadLog>,
    notify: Notify,
    closed: AtomicBool,
}

impl IntakeQueue {
    /// Memory-only queue.
    pub fn in_memory(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(QueueState {
                next_seq: 1,
                ..QueueState::default()
            }),
            wal: None,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Open a queue, replaying the outbox when one is configured.
    pub fn open(config: &QueueConfig) -> Result<Self> {
        let Some(path) = &config.wal_path else {
            return Ok(Self::in_memory(config.capacity));
        };

        let sync = if config.sync_every_write {
            SyncMode::EveryWrite
        } else {
            SyncMode::OsDefault
        };
        let wal = WriteAheadLog::open(path, sync)?;
        let records = wal.recover()?;
        let highest = records
            .iter()
            .filter_map(|r| match r {
                WalRecord::Enqueued { seq, .. } => Some(*seq),
                WalRecord::Acked { seqs } => seqs.iter().max().copied(),
            })
            .max()
            .unwrap_or(0);

        let ready: BTreeMap<u64, Delivery> = pending_from(&records)
            .into_iter()
            .map(|(seq, payload)| {
                (
                    seq,
                    Delivery {
                        seq,
                        attempts: 0,
                        payload,
                    },
                )
            })
            .collect();

        info!(
            path = %path.display(),
            records = records.len(),
            recovered = ready.len(),
            "intake outbox replayed"
        );

        Ok(Self {
            capacity: config.capacity,
            state: Mutex::new(QueueState {
                next_seq: highest + 1,
                ready,
                in_flight: BTreeMap::new(),
            }),
            wal: Some(wal),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// Un-acked events in an outbox file, read without opening the queue.
    pub fn inspect(path: &Path) -> Result<Vec<Delivery>> {
        let records = wal::read_records(path)?;
        Ok(pending_from(&records)
            .into_iter()
            .map(|(seq, payload)| Delivery {
                seq,
                attempts: 0,
                payload,
            })
            .collect())
    }

    /// Encode and enqueue an event, returning its sequence number.
    pub fn enqueue(&self, event: &VoteIntakeEvent) -> Result<u64> {
        let payload = event.encode()?;
        self.enqueue_raw(payload)
    }

    /// Enqueue an already-encoded payload.
    pub fn enqueue_raw(&self, payload: Vec<u8>) -> Result<u64> {
        if self.is_closed() {
            return Err(IntakeError::Closed);
        }

        let mut state = self.lock()?;
        if state.len() >= self.capacity {
            return Err(IntakeError::Full {
                capacity: self.capacity,
            });
        }

        let seq = state.next_seq;
        // Log under the state lock so the outbox order matches seq order.
        if let Some(wal) = &self.wal {
            wal.append(&WalRecord::Enqueued {
                seq,
                payload: payload.clone(),
            })?;
        }
        state.next_seq += 1;
        state.ready.insert(
            seq,
            Delivery {
                seq,
                attempts: 0,
                payload,
            },
        );
        drop(state);

        self.notify.notify_one();
        debug!(seq, "vote event enqueued");
        Ok(seq)
    }

    /// Hand out up to `max` events in enqueue order.
    pub fn poll(&self, max: usize) -> Result<Vec<Delivery>> {
        let mut state = self.lock()?;
        let mut out = Vec::with_capacity(max.min(state.ready.len()));
        while out.len() < max {
            let Some((seq, mut delivery)) = state.ready.pop_first() else {
                break;
            };
            delivery.attempts += 1;
            state.in_flight.insert(seq, delivery.clone());
            out.push(delivery);
        }
        Ok(out)
    }

    /// Mark events done. Unknown sequence numbers are ignored.
    pub fn ack(&self, seqs: &[u64]) -> Result<usize> {
        let mut state = self.lock()?;
        let acked: Vec<u64> = seqs
            .iter()
            .copied()
            .filter(|seq| state.in_flight.remove(seq).is_some())
            .collect();
        if acked.is_empty() {
            return Ok(0);
        }
        if let Some(wal) = &self.wal {
            wal.append(&WalRecord::Acked {
                seqs: acked.clone(),
            })?;
        }
        Ok(acked.len())
    }

    /// Return in-flight events for redelivery.
    pub fn nack(&self, seqs: &[u64]) -> Result<usize> {
        let mut state = self.lock()?;
        let mut returned = 0;
        for seq in seqs {
            if let Some(delivery) = state.in_flight.remove(seq) {
                state.ready.insert(*seq, delivery);
                returned += 1;
            }
        }
        drop(state);

        if returned > 0 {
            self.notify.notify_one();
        }
        Ok(returned)
    }

    /// Stop accepting events. Already queued events can still be drained.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("intake queue closed");
            self.notify.notify_one();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Events waiting to be handed out.
    pub fn pending(&self) -> Result<usize> {
        Ok(self.lock()?.ready.len())
    }

    /// Events handed out and not yet acked or nacked.
    pub fn in_flight(&self) -> Result<usize> {
        Ok(self.lock()?.in_flight.len())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Resolves after the next enqueue, nack or close.
    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }

    /// Rewrite the outbox to hold only un-acked events. Returns how many
    /// were kept; memory-only queues keep everything and return the count.
    pub fn compact(&self) -> Result<usize> {
        let state = self.lock()?;
        let Some(wal) = &self.wal else {
            return Ok(state.len());
        };

        let mut live: Vec<&Delivery> = state.ready.values().chain(state.in_flight.values()).collect();
        live.sort_by_key(|d| d.seq);
        let records: Vec<WalRecord> = live
            .into_iter()
            .map(|d| WalRecord::Enqueued {
                seq: d.seq,
                payload: d.payload.clone(),
            })
            .collect();
        wal.rewrite(&records)?;

        info!(kept = records.len(), "intake outbox compacted");
        Ok(records.len())
    }

    fn lock(&self) -> Result<MutexGuard<'_, QueueState>> {
        self.state.lock().map_err(|_| IntakeError::LockPoisoned)
    }
}
