use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::ids::{PostId, UserId};
use crate::temporal::Timestamp;
use crate::vote::VoteDirection;

/// An accepted vote on its way from the ledger to the durable store.
///
/// Immutable once created. The intake transport may deliver it more than once,
/// so consumers key their work on [`Self::idempotency_key`] and resolve
/// conflicts per [`Self::partition_key`] by latest `submitted_at`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VoteIntakeEvent {
    pub post_id: PostId,
    pub user_id: UserId,
    pub direction: VoteDirection,
    pub submitted_at: Timestamp,
}

/// Identifies one delivery-independent vote transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdempotencyKey {
    pub post_id: PostId,
    pub user_id: UserId,
    pub submitted_at: Timestamp,
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "vote:{}:{}@{}",
            self.post_id,
            self.user_id,
            self.submitted_at.as_millis()
        )
    }
}

/// Untrusted wire shape, validated by [`VoteIntakeEvent::decode`].
#[derive(Deserialize)]
struct WireEvent {
    post_id: u64,
    user_id: u64,
    direction: i64,
    submitted_at: u64,
}

impl VoteIntakeEvent {
    pub fn new(
        post_id: PostId,
        user_id: UserId,
        direction: VoteDirection,
        submitted_at: Timestamp,
    ) -> Self {
        Self {
            post_id,
            user_id,
            direction,
            submitted_at,
        }
    }

    pub fn idempotency_key(&self) -> IdempotencyKey {
        IdempotencyKey {
            post_id: self.post_id,
            user_id: self.user_id,
            submitted_at: self.submitted_at,
        }
    }

    /// Ordering is only guaranteed within one partition key.
    pub fn partition_key(&self) -> (PostId, UserId) {
        (self.post_id, self.user_id)
    }

    /// JSON payload as carried by the intake queue.
    pub fn encode(&self) -> Result<Vec<u8>, TypeError> {
        serde_json::to_vec(self).map_err(|e| TypeError::Serialization(e.to_string()))
    }

    /// Decode and validate a queue payload.
    ///
    /// Anything that fails here is a poison message: retrying it cannot help.
    pub fn decode(payload: &[u8]) -> Result<Self, TypeError> {
        let wire: WireEvent = serde_json::from_slice(payload)
            .map_err(|e| TypeError::MalformedEvent(e.to_string()))?;

        if wire.post_id == 0 || wire.user_id == 0 {
            return Err(TypeError::MalformedEvent(format!(
                "null identifier (post_id={}, user_id={})",
                wire.post_id, wire.user_id
            )));
        }
        let direction = VoteDirection::from_value(wire.direction)
            .map_err(|e| TypeError::MalformedEvent(e.to_string()))?;

        Ok(Self {
            post_id: PostId::new(wire.post_id),
            user_id: UserId::new(wire.user_id),
            direction,
            submitted_at: Timestamp::from_millis(wire.submitted_at),
        })
    }
}
