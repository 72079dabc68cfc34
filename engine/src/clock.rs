//! Hybrid logical clock.
//!
//! Produces strictly increasing [`Timestamp`]s for one node. The physical
//! component follows the wall clock; the counter absorbs stalls and skew so
//! that a clock which stops or runs backwards still never repeats itself.

use crate::{error::Result, Error, NodeId, Timestamp};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

/// Default tolerated lead of logical time over wall time (5 minutes).
pub const DEFAULT_MAX_DRIFT_MS: u64 = 5 * 60 * 1000;

/// Source of physical time in milliseconds since the Unix epoch.
pub trait WallClock: Send + Sync {
    fn now_millis(&self) -> u64;
}

/// The operating system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// A wall clock that only moves when told to. Used in tests and replays.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: Mutex<u64>,
}

impl ManualClock {
    pub fn new(millis: u64) -> Self {
        Self {
            millis: Mutex::new(millis),
        }
    }

    pub fn set(&self, millis: u64) {
        *lock(&self.millis) = millis;
    }

    pub fn advance(&self, delta: u64) {
        *lock(&self.millis) += delta;
    }
}

impl WallClock for ManualClock {
    fn now_millis(&self) -> u64 {
        *lock(&self.millis)
    }
}

/// Last issued (millis, counter) pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ClockState {
    millis: u64,
    counter: u16,
}

/// A hybrid logical clock bound to one node id.
///
/// `now` is a single locked read-increment-write, so concurrent callers in
/// one process never receive equal timestamps.
pub struct HybridLogicalClock {
    node: NodeId,
    wall: Arc<dyn WallClock>,
    max_drift: u64,
    state: Mutex<ClockState>,
}

impl std::fmt::Debug for HybridLogicalClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridLogicalClock")
            .field("node", &self.node)
            .field("max_drift", &self.max_drift)
            .field("state", &*lock(&self.state))
            .finish()
    }
}

impl HybridLogicalClock {
    /// Create a clock for `node` driven by the system clock.
    pub fn new(node: impl Into<NodeId>) -> Result<Self> {
        Self::with_wall_clock(node, Arc::new(SystemClock))
    }

    /// Create a clock driven by an arbitrary wall clock.
    pub fn with_wall_clock(node: impl Into<NodeId>, wall: Arc<dyn WallClock>) -> Result<Self> {
        let node = node.into();
        // Validates the node id once, up front.
        Timestamp::new(0, 0, node.clone())?;
        Ok(Self {
            node,
            wall,
            max_drift: DEFAULT_MAX_DRIFT_MS,
            state: Mutex::new(ClockState::default()),
        })
    }

    /// Builder-style override of the tolerated drift.
    pub fn with_max_drift(mut self, max_drift: u64) -> Self {
        self.max_drift = max_drift;
        self
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    /// Issue the next timestamp for this node.
    ///
    /// The counter resets to zero whenever the wall clock has moved past the
    /// last issued millis, and increments otherwise.
    pub fn now(&self) -> Result<Timestamp> {
        let mut state = lock(&self.state);
        let wall = self.wall.now_millis();

        let millis = state.millis.max(wall);
        let counter = if millis == state.millis {
            state
                .counter
                .checked_add(1)
                .ok_or(Error::ClockOverflow { millis })?
        } else {
            0
        };
        self.check_drift(millis, wall)?;

        let ts = Timestamp::new(millis, counter, self.node.clone())?;
        *state = ClockState { millis, counter };
        Ok(ts)
    }

    /// Advance past a timestamp received from another node.
    ///
    /// After this returns, `now` never issues anything `<= remote`.
    pub fn observe(&self, remote: &Timestamp) -> Result<()> {
        let mut state = lock(&self.state);
        let wall = self.wall.now_millis();

        let millis = state.millis.max(wall).max(remote.millis());
        let counter = if millis == state.millis && millis == remote.millis() {
            state.counter.max(remote.counter())
        } else if millis == state.millis {
            state.counter
        } else if millis == remote.millis() {
            remote.counter()
        } else {
            0
        };
        self.check_drift(millis, wall)?;

        // Equal (millis, counter) with a smaller node id is still below the
        // remote stamp; the next `now` increments past it.
        *state = ClockState { millis, counter };
        Ok(())
    }

    /// The last issued or observed position, as a timestamp of this node.
    pub fn last(&self) -> Timestamp {
        let state = *lock(&self.state);
        Timestamp::new(state.millis, state.counter, self.node.clone())
            .unwrap_or_else(|_| Timestamp::zero())
    }

    fn check_drift(&self, millis: u64, wall: u64) -> Result<()> {
        if millis.saturating_sub(wall) > self.max_drift {
            return Err(Error::ClockDrift {
                logical: millis,
                wall,
                max_drift: self.max_drift,
            });
        }
        Ok(())
    }
}

// A panic while holding the lock leaves plain integers behind; keep using them.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    const NODE: &str = "00000000000000AA";
    const OTHER: &str = "00000000000000BB";

    fn manual(millis: u64) -> (Arc<ManualClock>, HybridLogicalClock) {
        let wall = Arc::new(ManualClock::new(millis));
        let clock = HybridLogicalClock::with_wall_clock(NODE, wall.clone()).unwrap();
        (wall, clock)
    }

    #[test]
    fn rejects_invalid_node() {
        assert!(HybridLogicalClock::new("not-hex").is_err());
    }

    #[test]
    fn counter_increments_while_wall_clock_stalls() {
        let (_wall, clock) = manual(1000);
        let a = clock.now().unwrap();
        let b = clock.now().unwrap();
        assert_eq!((a.millis(), a.counter()), (1000, 0));
        assert_eq!((b.millis(), b.counter()), (1000, 1));
    }

    #[test]
    fn counter_resets_when_wall_clock_advances() {
        let (wall, clock) = manual(1000);
        clock.now().unwrap();
        clock.now().unwrap();
        wall.advance(1);
        let ts = clock.now().unwrap();
        assert_eq!((ts.millis(), ts.counter()), (1001, 0));
    }

    #[test]
    fn wall_clock_going_backwards_keeps_order() {
        let (wall, clock) = manual(5000);
        let a = clock.now().unwrap();
        wall.set(4000);
        let b = clock.now().unwrap();
        assert!(a < b);
        assert_eq!(b.millis(), 5000);
    }

    #[test]
    fn ten_thousand_sequential_calls_strictly_increase() {
        let clock = HybridLogicalClock::new(NODE).unwrap();
        let mut prev = clock.now().unwrap();
        for _ in 0..10_000 {
            let next = clock.now().unwrap();
            assert!(prev < next);
            prev = next;
        }
    }

    #[test]
    fn counter_overflow_is_reported() {
        let (_wall, clock) = manual(1000);
        for _ in 0..=u16::MAX as u32 {
            clock.now().unwrap();
        }
        assert!(matches!(
            clock.now(),
            Err(Error::ClockOverflow { millis: 1000 })
        ));
    }

    #[test]
    fn observe_moves_past_remote() {
        let (_wall, clock) = manual(1000);
        let remote = Timestamp::new(2000, 7, OTHER).unwrap();
        clock.observe(&remote).unwrap();
        let next = clock.now().unwrap();
        assert!(next > remote);
        assert_eq!((next.millis(), next.counter()), (2000, 8));
    }

    #[test]
    fn observe_older_remote_is_noop() {
        let (_wall, clock) = manual(5000);
        let before = clock.now().unwrap();
        clock
            .observe(&Timestamp::new(10, 3, OTHER).unwrap())
            .unwrap();
        let after = clock.now().unwrap();
        assert_eq!((after.millis(), after.counter()), (5000, before.counter() + 1));
    }

    #[test]
    fn observe_rejects_drift() {
        let (_wall, clock) = manual(1000);
        let far_future = Timestamp::new(1000 + DEFAULT_MAX_DRIFT_MS + 1, 0, OTHER).unwrap();
        assert!(matches!(
            clock.observe(&far_future),
            Err(Error::ClockDrift { .. })
        ));
        // State untouched on failure
        assert_eq!(clock.now().unwrap().millis(), 1000);
    }

    #[test]
    fn concurrent_callers_never_collide() {
        let clock = Arc::new(HybridLogicalClock::new(NODE).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let clock = clock.clone();
                thread::spawn(move || {
                    (0..1000)
                        .map(|_| clock.now().unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for ts in handle.join().unwrap() {
                assert!(seen.insert(ts), "duplicate timestamp issued");
            }
        }
        assert_eq!(seen.len(), 8000);
    }

    #[test]
    fn last_reflects_issued_state() {
        let (_wall, clock) = manual(1234);
        let ts = clock.now().unwrap();
        assert_eq!(clock.last(), ts);
    }
}
