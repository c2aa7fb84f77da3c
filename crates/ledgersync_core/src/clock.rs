//! Hybrid logical clock.
//!
//! The clock keeps a single `floor`: the greatest timestamp it has either
//! issued or observed. Every issued timestamp is the smallest timestamp
//! carrying this device's node id that is greater than the floor and whose
//! millis are no earlier than local wall-clock.
//!
//! Because timestamps order by `(millis, node, counter)`, "greater than the
//! floor" can mean bumping the counter (same node), reusing the floor's
//! millisecond with counter 0 (our node sorts after the floor's), or moving to
//! the next millisecond (our node sorts before it, or the counter is
//! exhausted). None of these fail, and a wall clock that jumps backwards just
//! keeps ticking from the floor.

use crate::error::{CoreError, CoreResult};
use ledgersync_codec::{NodeId, Timestamp};
use rand::Rng;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn wall_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Per-file hybrid logical clock.
#[derive(Debug, Clone)]
pub struct Clock {
    node: NodeId,
    floor: Timestamp,
}

impl Clock {
    /// Creates a clock that has seen nothing yet.
    #[must_use]
    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            floor: Timestamp::ZERO,
        }
    }

    /// Restores a clock from a persisted floor.
    #[must_use]
    pub fn restore(node: NodeId, floor: Timestamp) -> Self {
        Self { node, floor }
    }

    /// Picks a fresh random node identifier.
    #[must_use]
    pub fn random_node() -> NodeId {
        NodeId::new(rand::thread_rng().gen())
    }

    /// This device's node identifier.
    #[must_use]
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Greatest timestamp issued or observed so far.
    #[must_use]
    pub fn floor(&self) -> Timestamp {
        self.floor
    }

    /// Issues the next timestamp using the system clock.
    pub fn next_timestamp(&mut self) -> Timestamp {
        self.next_at(wall_millis())
    }

    /// Issues the next timestamp as if wall-clock read `wall`.
    pub fn next_at(&mut self, wall: u64) -> Timestamp {
        let floor = self.floor;
        let next = if wall > floor.millis() {
            Timestamp::new(wall, self.node, 0)
        } else if self.node > floor.node() {
            Timestamp::new(floor.millis(), self.node, 0)
        } else if self.node == floor.node() && floor.counter() < u16::MAX {
            Timestamp::new(floor.millis(), self.node, floor.counter() + 1)
        } else {
            Timestamp::new(floor.millis().saturating_add(1), self.node, 0)
        };
        self.floor = next;
        next
    }

    /// Moves the floor up to a timestamp seen on a remote message.
    pub fn observe(&mut self, remote: Timestamp) {
        if remote > self.floor {
            self.floor = remote;
        }
    }

    /// Rejects a remote timestamp too far ahead of local wall-clock.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ClockDrift`] if `remote` is more than `max_drift`
    /// ahead of `wall`.
    pub fn check_drift_at(remote: Timestamp, wall: u64, max_drift: Duration) -> CoreResult<()> {
        let max_ms = u64::try_from(max_drift.as_millis()).unwrap_or(u64::MAX);
        let drift_ms = remote.millis().saturating_sub(wall);
        if drift_ms > max_ms {
            return Err(CoreError::ClockDrift {
                remote,
                drift_ms,
                max_ms,
            });
        }
        Ok(())
    }
}
