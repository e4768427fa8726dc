//! Post id generation.
//!
//! Ids follow the snowflake layout, most significant bit first:
//!
//! ```text
//! [1 bit: 0][41 bits: ms since ID_EPOCH_MS][10 bits: node][12 bits: sequence]
//! ```
//!
//! Ids from one generator are strictly increasing. Ids from generators with
//! different node numbers never collide.

use std::sync::{Arc, Mutex, PoisonError};

use tally_types::{Clock, PostId};

use crate::error::{EngineError, EngineResult};

/// 2020-01-01T00:00:00Z.
pub const ID_EPOCH_MS: u64 = 1_577_836_800_000;

const NODE_BITS: u32 = 10;
const SEQ_BITS: u32 = 12;
const TIME_BITS: u32 = 41;

pub const MAX_NODE_ID: u16 = (1 << NODE_BITS) - 1;
const MAX_SEQ: u64 = (1 << SEQ_BITS) - 1;
const MAX_ELAPSED: u64 = (1 << TIME_BITS) - 1;

/// Source of globally unique post ids.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> EngineResult<PostId>;
}

/// Snowflake-style generator.
///
/// When a millisecond's sequence space runs out, or the wall clock steps
/// backwards, the generator borrows the next millisecond instead of waiting.
pub struct SnowflakeGenerator {
    node: u64,
    clock: Arc<dyn Clock>,
    // (elapsed ms of the last id, sequence within it)
    last: Mutex<(u64, u64)>,
}

impl SnowflakeGenerator {
    pub fn new(node_id: u16, clock: Arc<dyn Clock>) -> EngineResult<Self> {
        if node_id > MAX_NODE_ID {
            return Err(EngineError::Config(format!(
                "node_id {node_id} exceeds {MAX_NODE_ID}"
            )));
        }
        Ok(Self {
            node: u64::from(node_id),
            clock,
            last: Mutex::new((0, 0)),
        })
    }

    /// Split an id into `(ms since epoch, node, sequence)`.
    pub fn decompose(id: PostId) -> (u64, u16, u16) {
        let raw = id.get();
        let seq = raw & MAX_SEQ;
        let node = (raw >> SEQ_BITS) & u64::from(MAX_NODE_ID);
        let elapsed = raw >> (SEQ_BITS + NODE_BITS);
        (elapsed, node as u16, seq as u16)
    }
}

impl IdGenerator for SnowflakeGenerator {
    fn next_id(&self) -> EngineResult<PostId> {
        let wall = self.clock.now().as_millis().saturating_sub(ID_EPOCH_MS);
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let (last_ms, last_seq) = *last;

        let (ms, seq) = if wall > last_ms {
            (wall, 0)
        } else if last_seq < MAX_SEQ {
            (last_ms, last_seq + 1)
        } else {
            (last_ms + 1, 0)
        };

        if ms > MAX_ELAPSED {
            return Err(EngineError::IdGenerator(
                "timestamp space exhausted".into(),
            ));
        }
        *last = (ms, seq);

        Ok(PostId::new(
            (ms << (SEQ_BITS + NODE_BITS)) | (self.node << SEQ_BITS) | seq,
        ))
    }
}
