//! Execution gate bounding concurrent runs of the external tool.
//!
//! With the default capacity of one, runs are strictly serial across the
//! whole process. A slot is held by a [`GatePermit`] and returned when the
//! permit is dropped, so no exit path can leak it.

use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::error::{MediaError, MediaResult};

/// How many tool invocations may run at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GateCapacity {
    /// At most N at a time
    Bounded(NonZeroUsize),
    /// No admission control at all
    Unlimited,
}

impl GateCapacity {
    /// One at a time.
    pub const SERIAL: GateCapacity = GateCapacity::Bounded(NonZeroUsize::MIN);

    pub fn bounded(n: usize) -> Self {
        NonZeroUsize::new(n).map_or(GateCapacity::Unlimited, GateCapacity::Bounded)
    }

    pub fn is_serial(&self) -> bool {
        *self == Self::SERIAL
    }
}

impl Default for GateCapacity {
    fn default() -> Self {
        Self::SERIAL
    }
}

impl fmt::Display for GateCapacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateCapacity::Bounded(n) => write!(f, "{n}"),
            GateCapacity::Unlimited => f.write_str("unlimited"),
        }
    }
}

impl FromStr for GateCapacity {
    type Err = String;

    /// Accepts a positive integer, or `0`/`unlimited`/`parallel` for no limit.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("unlimited") || s.eq_ignore_ascii_case("parallel") {
            return Ok(GateCapacity::Unlimited);
        }
        if s.eq_ignore_ascii_case("serial") {
            return Ok(GateCapacity::SERIAL);
        }
        s.parse::<usize>()
            .map(GateCapacity::bounded)
            .map_err(|_| format!("invalid execution capacity: {s:?}"))
    }
}

/// Process-wide admission control for the external tool.
///
/// Waiters are served in arrival order. Cloning shares the same slots.
#[derive(Debug, Clone)]
pub struct ExecutionGate {
    semaphore: Option<Arc<Semaphore>>,
    capacity: GateCapacity,
    queue_timeout: Option<Duration>,
    in_flight: Arc<AtomicUsize>,
    waiting: Arc<AtomicUsize>,
}

impl ExecutionGate {
    pub fn new(capacity: GateCapacity) -> Self {
        let semaphore = match capacity {
            GateCapacity::Bounded(n) => Some(Arc::new(Semaphore::new(n.get()))),
            GateCapacity::Unlimited => None,
        };
        Self {
            semaphore,
            capacity,
            queue_timeout: None,
            in_flight: Arc::new(AtomicUsize::new(0)),
            waiting: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn serial() -> Self {
        Self::new(GateCapacity::SERIAL)
    }

    pub fn unlimited() -> Self {
        Self::new(GateCapacity::Unlimited)
    }

    /// Give up waiting for a slot after `timeout`. `None` waits forever.
    pub fn with_queue_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.queue_timeout = timeout;
        self
    }

    pub fn capacity(&self) -> GateCapacity {
        self.capacity
    }

    /// Runs currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Callers queued behind a full gate.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Wait for a slot. Returns immediately in unlimited mode.
    pub async fn acquire(&self) -> MediaResult<GatePermit> {
        let start = Instant::now();

        let permit = match &self.semaphore {
            None => None,
            Some(semaphore) => {
                let _waiting = Counted::enter(&self.waiting);
                let acquire = Arc::clone(semaphore).acquire_owned();
                let permit = match self.queue_timeout {
                    Some(timeout) => tokio::time::timeout(timeout, acquire)
                        .await
                        .map_err(|_| MediaError::QueueTimeout(timeout))?,
                    None => acquire.await,
                };
                Some(permit.map_err(|_| MediaError::GateClosed)?)
            }
        };

        let waited = start.elapsed();
        debug!(
            capacity = %self.capacity,
            waited_ms = waited.as_millis() as u64,
            "Execution slot acquired"
        );

        Ok(GatePermit {
            _permit: permit,
            _in_flight: Counted::enter(&self.in_flight),
            waited,
        })
    }
}

impl Default for ExecutionGate {
    fn default() -> Self {
        Self::serial()
    }
}

/// A held execution slot. Dropping it releases the slot.
#[derive(Debug)]
pub struct GatePermit {
    _permit: Option<OwnedSemaphorePermit>,
    _in_flight: Counted,
    waited: Duration,
}

impl GatePermit {
    /// Time spent queued before the slot was granted.
    pub fn waited(&self) -> Duration {
        self.waited
    }

    /// Release the slot now.
    pub fn release(self) {}
}

/// Increments a counter for as long as it lives.
#[derive(Debug)]
struct Counted(Arc<AtomicUsize>);

impl Counted {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for Counted {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
