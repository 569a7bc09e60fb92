//! Point-bounded LRU cache of evicted node payloads.
//!
//! The render thread inserts nodes it has disposed; the traverser reclaims
//! them when they are selected again. Payload ownership moves between node and
//! cache atomically: a payload is held by exactly one of them at any time.
//!
//! Entries are keyed by [`NodeKey`], so nodes of different geometries never
//! collide. Lock order is always cache, then node.

use std::collections::BTreeMap;
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;
use pointstream_octree::{GeometryId, NodeKey, OctreeGeometryNode, PointPayload};

use crate::counters::LoadCounters;

struct CacheEntry {
    stamp: u64,
    node: Arc<OctreeGeometryNode>,
    payload: PointPayload,
    points: u64,
}

struct CacheInner {
    point_load_limit: u64,
    num_points: u64,
    next_stamp: u64,
    /// Recency order: smallest stamp is least recently inserted.
    order: BTreeMap<u64, NodeKey>,
    entries: HashMap<NodeKey, CacheEntry>,
}

impl CacheInner {
    fn remove(&mut self, key: NodeKey) -> Option<CacheEntry> {
        let entry = self.entries.remove(&key)?;
        self.order.remove(&entry.stamp);
        self.num_points -= entry.points;
        Some(entry)
    }

    /// Pop the least recently used entry.
    fn pop_oldest(&mut self) -> Option<CacheEntry> {
        let (_, key) = self.order.pop_first()?;
        let entry = self.entries.remove(&key)?;
        self.num_points -= entry.points;
        Some(entry)
    }
}

/// Shared cache of recently disposed node payloads.
pub struct LruCache {
    inner: Mutex<CacheInner>,
    counters: Option<Arc<LoadCounters>>,
}

impl LruCache {
    /// Create a cache holding at most `point_load_limit` points.
    pub fn new(point_load_limit: u64) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                point_load_limit,
                num_points: 0,
                next_stamp: 0,
                order: BTreeMap::new(),
                entries: HashMap::new(),
            }),
            counters: None,
        }
    }

    /// Report released payloads to the loader's counters.
    pub fn with_counters(mut self, counters: Arc<LoadCounters>) -> Self {
        self.counters = Some(counters);
        self
    }

    /// Park a disposed node's payload.
    ///
    /// Takes the payload out of `node` (`Loaded -> Cached`), then evicts least
    /// recently used entries until the point total fits the limit. The new
    /// entry itself is evicted last, so a node larger than the whole limit is
    /// dropped immediately. Returns the keys evicted by this call.
    ///
    /// A node that is not loaded is left untouched.
    pub fn insert(&self, node: &Arc<OctreeGeometryNode>) -> Vec<NodeKey> {
        let mut inner = self.inner.lock();
        let Some(payload) = node.park() else {
            tracing::trace!(node = %node.id(), "cache insert skipped, node not loaded");
            return Vec::new();
        };

        let stamp = inner.next_stamp;
        inner.next_stamp += 1;
        let points = payload.len() as u64;
        let key = node.key();
        inner.order.insert(stamp, key);
        inner.num_points += points;
        let stale = inner.entries.insert(
            key,
            CacheEntry {
                stamp,
                node: Arc::clone(node),
                payload,
                points,
            },
        );
        if let Some(stale) = stale {
            // The node left the cache without going through reclaim.
            tracing::warn!(node = %key, "replacing stale cache entry");
            inner.order.remove(&stale.stamp);
            inner.num_points -= stale.points;
        }

        self.evict_over_limit(&mut inner)
    }

    /// Take a parked payload back into its node (`Cached -> Loaded`).
    ///
    /// Returns `false` if the node has no entry, i.e. it was never inserted or
    /// has been evicted since.
    pub fn reclaim(&self, node: &OctreeGeometryNode) -> bool {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.remove(node.key()) else {
            return false;
        };
        match node.restore(entry.payload) {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(node = %node.id(), "cached node was not parked, payload dropped");
                self.release(&entry.node);
                false
            }
        }
    }

    /// Counters this cache reports released payloads to, if any.
    pub fn counters(&self) -> Option<&Arc<LoadCounters>> {
        self.counters.as_ref()
    }

    /// Number of cached entries.
    pub fn size(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Total points held by the cache.
    pub fn num_points(&self) -> u64 {
        self.inner.lock().num_points
    }

    pub fn point_load_limit(&self) -> u64 {
        self.inner.lock().point_load_limit
    }

    /// Change the point limit, evicting immediately if the cache is now over it.
    pub fn set_point_load_limit(&self, limit: u64) -> Vec<NodeKey> {
        let mut inner = self.inner.lock();
        inner.point_load_limit = limit;
        self.evict_over_limit(&mut inner)
    }

    pub fn contains(&self, node: &OctreeGeometryNode) -> bool {
        self.inner.lock().entries.contains_key(&node.key())
    }

    /// Drop every payload parked by nodes of `geometry`, returning them to
    /// `Unloaded`. Returns the number of entries removed.
    pub fn remove_geometry(&self, geometry: GeometryId) -> usize {
        let mut inner = self.inner.lock();
        let keys: Vec<NodeKey> = inner
            .entries
            .keys()
            .filter(|key| key.geometry == geometry)
            .copied()
            .collect();
        for key in &keys {
            if let Some(entry) = inner.remove(*key) {
                self.release(&entry.node);
            }
        }
        if !keys.is_empty() {
            tracing::debug!(removed = keys.len(), num_points = inner.num_points, "cache purged geometry");
        }
        keys.len()
    }

    /// Drop every cached payload.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        while let Some(entry) = inner.pop_oldest() {
            self.release(&entry.node);
        }
    }

    fn evict_over_limit(&self, inner: &mut CacheInner) -> Vec<NodeKey> {
        let mut evicted = Vec::new();
        while inner.num_points > inner.point_load_limit {
            let Some(entry) = inner.pop_oldest() else {
                break;
            };
            self.release(&entry.node);
            evicted.push(entry.node.key());
        }
        if !evicted.is_empty() {
            tracing::debug!(
                evicted = evicted.len(),
                num_points = inner.num_points,
                limit = inner.point_load_limit,
                "cache evicted least recently used nodes"
            );
        }
        evicted
    }

    fn release(&self, node: &OctreeGeometryNode) {
        node.evict();
        if let Some(counters) = &self.counters {
            counters.payload_released();
        }
    }
}

impl std::fmt::Debug for LruCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("LruCache")
            .field("size", &inner.entries.len())
            .field("num_points", &inner.num_points)
            .field("point_load_limit", &inner.point_load_limit)
            .finish()
    }
}
