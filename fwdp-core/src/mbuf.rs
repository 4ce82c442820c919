use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use log::debug;

use crate::cursor::PacketCursor;
use crate::mempool::AllocationError;

struct PoolInner {
    name: Arc<str>,
    capacity: usize,
    dataroom: usize,
    in_use: AtomicUsize,
}

/// Fixed-capacity pool of packet objects.
///
/// The pool bounds how many [`Packet`]s drawn from it are alive at once.
/// Segment memory itself is reference counted, so a packet built from
/// another packet's segments shares them instead of copying.
#[derive(Clone)]
pub struct PktmbufPool {
    inner: Arc<PoolInner>,
}

impl PktmbufPool {
    /// Create a pool of `capacity` packets whose copied segments hold at
    /// most `dataroom` octets each
    pub fn new(
        name: impl Into<Arc<str>>,
        capacity: usize,
        dataroom: usize,
    ) -> Result<Self, AllocationError> {
        if capacity == 0 || dataroom == 0 {
            return Err(AllocationError::ZeroCapacity);
        }
        let name = name.into();
        debug!(
            "pktmbuf pool {} created: capacity={} dataroom={}",
            name, capacity, dataroom
        );
        Ok(Self {
            inner: Arc::new(PoolInner {
                name,
                capacity,
                dataroom,
                in_use: AtomicUsize::new(0),
            }),
        })
    }

    fn reserve(&self) -> Result<PoolLease, AllocationError> {
        let capacity = self.inner.capacity;
        self.inner
            .in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < capacity).then_some(n + 1)
            })
            .map_err(|_| AllocationError::Exhausted {
                pool: Arc::clone(&self.inner.name),
                capacity,
            })?;
        Ok(PoolLease {
            pool: Arc::clone(&self.inner),
        })
    }

    /// Copy `data` into a new packet, splitting it into dataroom-sized segments
    pub fn alloc_copy(&self, data: &[u8]) -> Result<Packet, AllocationError> {
        let lease = self.reserve()?;
        let segs = data
            .chunks(self.inner.dataroom)
            .map(Bytes::copy_from_slice)
            .collect();
        Ok(Packet::with_lease(segs, false, lease))
    }

    /// Build a packet over existing segments without copying them
    pub fn alloc_chain(&self, segs: Vec<Bytes>) -> Result<Packet, AllocationError> {
        let lease = self.reserve()?;
        Ok(Packet::with_lease(segs, false, lease))
    }

    pub(crate) fn alloc_indirect(&self, segs: Vec<Bytes>) -> Result<Packet, AllocationError> {
        let lease = self.reserve()?;
        Ok(Packet::with_lease(segs, true, lease))
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn dataroom(&self) -> usize {
        self.inner.dataroom
    }

    pub fn count_in_use(&self) -> usize {
        self.inner.in_use.load(Ordering::Acquire)
    }

    pub fn count_available(&self) -> usize {
        self.capacity().saturating_sub(self.count_in_use())
    }
}

impl fmt::Debug for PktmbufPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PktmbufPool")
            .field("name", &self.inner.name)
            .field("capacity", &self.inner.capacity)
            .field("in_use", &self.count_in_use())
            .finish()
    }
}

struct PoolLease {
    pool: Arc<PoolInner>,
}

impl Drop for PoolLease {
    fn drop(&mut self) {
        self.pool.in_use.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A packet: a chain of buffer segments read as one byte stream.
///
/// Empty segments are dropped on construction, so every segment in the
/// chain holds at least one octet.
pub struct Packet {
    segs: Vec<Bytes>,
    len: usize,
    indirect: bool,
    _lease: Option<PoolLease>,
}

impl Packet {
    /// Build a packet that is not accounted against any pool
    pub fn from_segments<I>(segs: I) -> Self
    where
        I: IntoIterator<Item = Bytes>,
    {
        Self::build(segs.into_iter().collect(), false, None)
    }

    fn with_lease(segs: Vec<Bytes>, indirect: bool, lease: PoolLease) -> Self {
        Self::build(segs, indirect, Some(lease))
    }

    fn build(mut segs: Vec<Bytes>, indirect: bool, lease: Option<PoolLease>) -> Self {
        segs.retain(|s| !s.is_empty());
        let len = segs.iter().map(Bytes::len).sum();
        Self {
            segs,
            len,
            indirect,
            _lease: lease,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn n_segments(&self) -> usize {
        self.segs.len()
    }

    pub fn segments(&self) -> &[Bytes] {
        &self.segs
    }

    /// Whether the segments were borrowed from another packet
    pub fn is_indirect(&self) -> bool {
        self.indirect
    }

    /// Cursor positioned at the first octet
    pub fn cursor(&self) -> PacketCursor<'_> {
        PacketCursor::begin(self)
    }

    /// Copy the whole chain into one contiguous buffer
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len);
        for seg in &self.segs {
            out.extend_from_slice(seg);
        }
        out
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("len", &self.len)
            .field("n_segments", &self.segs.len())
            .field("indirect", &self.indirect)
            .finish()
    }
}
