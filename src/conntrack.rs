//! Approximate per-host flow membership sketch (§4.3).
//!
//! A packet is counted as a new flow iff its 5-tuple is absent from this
//! sketch. Membership is approximate: the sketch is a fixed-capacity,
//! LRU-evicted map, not an exact set, so under sustained 5-tuple churn a
//! flow can be "forgotten" and recounted — that is the documented
//! trade-off for O(1) bounded memory per host.

use std::net::IpAddr;

use lru::LruCache;
use std::num::NonZeroUsize;

/// Source+dest address, source+dest port, protocol — the conventional
/// 5-tuple, directionless (src/dst swapped for the same conversation hash
/// to the same key via the caller normalising who is "src").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub src: IpAddr,
    pub dst: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
}

pub struct ConntrackSketch {
    seen: LruCache<FlowKey, ()>,
}

impl ConntrackSketch {
    pub fn with_capacity(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            seen: LruCache::new(cap),
        }
    }

    /// Returns `true` if this is the first time `key` has been observed in
    /// the current window (i.e. it should be counted as a new flow).
    pub fn observe(&mut self, key: FlowKey) -> bool {
        if self.seen.get(&key).is_some() {
            false
        } else {
            self.seen.put(key, ());
            true
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
