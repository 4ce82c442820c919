use std::fmt;
use std::sync::Arc;

use fwdp_common::NumaSocket;
use log::debug;

/// Errors returned by the object and packet pools
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocationError {
    #[error("pool capacity must be positive")]
    ZeroCapacity,
    #[error("out of memory reserving {requested} objects")]
    OutOfMemory { requested: usize },
    #[error("pool {pool} exhausted ({capacity} objects in use)")]
    Exhausted { pool: Arc<str>, capacity: usize },
    #[error("requested {requested} octets but only {available} remain")]
    OutOfRange { requested: usize, available: usize },
}

/// Creation parameters for a [`Mempool`]
#[derive(Debug, Clone)]
pub struct MempoolConfig {
    pub capacity: usize,
    pub socket: NumaSocket,
    /// Disable per-core object caches
    pub no_cache: bool,
    pub single_producer: bool,
    pub single_consumer: bool,
}

impl MempoolConfig {
    /// Configuration for a pool owned by exactly one worker
    pub fn single_owner(capacity: usize, socket: NumaSocket) -> Self {
        Self {
            capacity,
            socket,
            no_cache: true,
            single_producer: true,
            single_consumer: true,
        }
    }
}

/// Fixed-capacity pool of pre-allocated objects addressed by index.
///
/// All storage is reserved in [`Mempool::new`]; `alloc` and `free` only move
/// indices between the free list and the caller, and neither allocates, not
/// even to report exhaustion. Object contents are left as the previous owner
/// wrote them, so callers reset what they take.
pub struct Mempool<T> {
    name: Arc<str>,
    config: MempoolConfig,
    objs: Vec<T>,
    free: Vec<u32>,
    in_use: Vec<bool>,
}

impl<T: Default> Mempool<T> {
    pub fn new(name: impl Into<Arc<str>>, config: MempoolConfig) -> Result<Self, AllocationError> {
        let capacity = config.capacity;
        if capacity == 0 {
            return Err(AllocationError::ZeroCapacity);
        }
        if capacity > u32::MAX as usize {
            return Err(AllocationError::OutOfMemory { requested: capacity });
        }

        let oom = |_| AllocationError::OutOfMemory { requested: capacity };
        let mut objs = Vec::new();
        objs.try_reserve_exact(capacity).map_err(oom)?;
        let mut free = Vec::new();
        free.try_reserve_exact(capacity).map_err(oom)?;
        let mut in_use = Vec::new();
        in_use.try_reserve_exact(capacity).map_err(oom)?;

        objs.resize_with(capacity, T::default);
        in_use.resize(capacity, false);
        // Lowest index is handed out first.
        free.extend((0..capacity as u32).rev());

        let name = name.into();
        debug!(
            "mempool {} created: capacity={} socket={} elt_size={}",
            name,
            capacity,
            config.socket,
            std::mem::size_of::<T>()
        );

        Ok(Self {
            name,
            config,
            objs,
            free,
            in_use,
        })
    }
}

impl<T> Mempool<T> {
    /// Take one object index out of the pool
    pub fn alloc(&mut self) -> Result<u32, AllocationError> {
        match self.free.pop() {
            Some(index) => {
                self.in_use[index as usize] = true;
                Ok(index)
            }
            None => Err(AllocationError::Exhausted {
                pool: Arc::clone(&self.name),
                capacity: self.capacity(),
            }),
        }
    }

    /// Return an object index to the pool.
    ///
    /// Panics if the index is not currently allocated.
    pub fn free(&mut self, index: u32) {
        let slot = &mut self.in_use[index as usize];
        assert!(*slot, "mempool {}: double free of object {}", self.name, index);
        *slot = false;
        self.free.push(index);
    }

    pub fn get(&self, index: u32) -> &T {
        &self.objs[index as usize]
    }

    pub fn get_mut(&mut self, index: u32) -> &mut T {
        &mut self.objs[index as usize]
    }

    pub fn is_allocated(&self, index: u32) -> bool {
        self.in_use.get(index as usize).copied().unwrap_or(false)
    }

    /// Indices of every allocated object, in index order
    pub fn allocated(&self) -> impl Iterator<Item = u32> + '_ {
        self.in_use
            .iter()
            .enumerate()
            .filter(|(_, used)| **used)
            .map(|(i, _)| i as u32)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &MempoolConfig {
        &self.config
    }

    pub fn capacity(&self) -> usize {
        self.objs.len()
    }

    pub fn count_in_use(&self) -> usize {
        self.objs.len() - self.free.len()
    }

    pub fn count_available(&self) -> usize {
        self.free.len()
    }

    pub fn is_full(&self) -> bool {
        self.free.is_empty()
    }
}

impl<T> fmt::Display for Mempool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mempool({}, {}/{} in use, socket {})",
            self.name,
            self.count_in_use(),
            self.capacity(),
            self.config.socket
        )
    }
}
