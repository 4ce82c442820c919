//! PIT-CS Composite Table.
//!
//! One fixed pool of slots backs both the pending-interest table and the
//! content store. A slot keyed by a name bucket may carry a pending record,
//! a cached record, or both at once. Slots are addressed by index and
//! versioned by a generation counter; [`Token`]s built from the pair stay
//! safe to hold after the slot is recycled.
//!
//! The table is owned by a single worker and mutated through `&mut self`.
//! Every structure it indexes through (slot pool, name index, deadline heap
//! and CS queues) is sized in [`Pcct::new`]; no operation allocates after
//! that, a full table included.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use fwdp_common::{
    CsStats, FaceId, NumaSocket, PcctStats, PitStats, Timestamp, CS_DEFAULT_INLINE_THRESHOLD,
    CS_DIRECT_CAPACITY, DEFAULT_CS_CAP_DIRECT, DEFAULT_CS_CAP_INDIRECT, DEFAULT_MAX_ENTRIES,
    PIT_MAX_DOWNSTREAMS,
};
use log::{debug, trace};

use crate::mbuf::{Packet, PktmbufPool};
use crate::mempool::{AllocationError, Mempool, MempoolConfig};

mod cs;
mod deadline;
mod pit;
mod token;

pub use cs::{CsEvicted, CsInsert, CsPayload, CsRecord, CsVariant};
pub use pit::{PitAttach, PitDownstream, PitRecord};
pub use token::Token;

use cs::{CsLink, CsList, CsStorage};
use deadline::DeadlineHeap;
use pit::DnUpdate;

/// Canonical name bucket key produced by the name trie
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NameKey(pub u64);

impl fmt::Display for NameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Maps an encoded name to its bucket key
pub trait NameResolver {
    fn resolve(&self, name: &[u8]) -> NameKey;
}

/// Index of an occupied slot, valid until the slot is released
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SlotId(u32);

impl SlotId {
    pub fn index(self) -> u32 {
        self.0
    }
}

/// What a slot currently holds
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    Free,
    PendingOnly,
    CachedOnly,
    Both,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PcctError {
    #[error("PCCT is full")]
    TableFull,
    #[error("stale token {0}")]
    StaleToken(Token),
    #[error("pending record already has {0} downstreams")]
    TooManyDownstreams(usize),
    #[error("invalid PCCT configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Allocation(#[from] AllocationError),
}

/// PCCT creation parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcctConfig {
    pub max_entries: usize,
    /// Capacity of Direct CS records
    pub cs_cap_direct: usize,
    /// Capacity of Indirect CS records
    pub cs_cap_indirect: usize,
    /// Payloads up to this length are stored Direct
    pub cs_inline_threshold: usize,
    pub socket: NumaSocket,
}

impl Default for PcctConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            cs_cap_direct: DEFAULT_CS_CAP_DIRECT,
            cs_cap_indirect: DEFAULT_CS_CAP_INDIRECT,
            cs_inline_threshold: CS_DEFAULT_INLINE_THRESHOLD,
            socket: NumaSocket::Any,
        }
    }
}

impl PcctConfig {
    pub fn validate(&self) -> Result<(), PcctError> {
        if self.max_entries == 0 {
            return Err(PcctError::InvalidConfig(
                "max_entries must be positive".to_string(),
            ));
        }
        if self.max_entries > u32::MAX as usize {
            return Err(PcctError::InvalidConfig(format!(
                "max_entries {} exceeds slot index range",
                self.max_entries
            )));
        }
        if self.cs_inline_threshold > CS_DIRECT_CAPACITY {
            return Err(PcctError::InvalidConfig(format!(
                "cs_inline_threshold {} exceeds direct capacity {}",
                self.cs_inline_threshold, CS_DIRECT_CAPACITY
            )));
        }
        Ok(())
    }
}

/// A pending record removed by deadline expiry
#[derive(Debug)]
pub struct ExpiredPending {
    pub key: NameKey,
    /// Token of the slot at expiry time; it no longer resolves
    pub token: Token,
    pub record: PitRecord,
}

#[derive(Default)]
struct PccEntry {
    key: Option<NameKey>,
    generation: u32,
    pit: Option<PitRecord>,
    cs: Option<CsRecord>,
    cs_link: CsLink,
}

#[derive(Default)]
struct Counters {
    table_full: u64,
    tokens_issued: u64,
    pit_inserted: u64,
    pit_aggregated: u64,
    pit_duplicates: u64,
    pit_expired: u64,
    pit_satisfied: u64,
    cs_inserted: u64,
    cs_evicted: [u64; 2],
    cs_not_admitted: u64,
    cs_stale_dropped: u64,
}

/// PIT-CS Composite Table
pub struct Pcct {
    config: PcctConfig,
    entries: Mempool<PccEntry>,
    by_name: HashMap<NameKey, u32>,
    deadlines: DeadlineHeap,
    cs_lists: [CsList; 2],
    indirect_mp: PktmbufPool,
    n_pit: usize,
    counters: Counters,
    stale_tokens: AtomicU64,
}

impl Pcct {
    /// Create a table, reserving every slot up front.
    ///
    /// Indirect CS records are cloned into packets drawn from `indirect_mp`.
    pub fn new(config: PcctConfig, indirect_mp: PktmbufPool) -> Result<Self, PcctError> {
        config.validate()?;

        let entries = Mempool::new(
            "pcct",
            MempoolConfig::single_owner(config.max_entries, config.socket),
        )?;
        // Twice the slot count keeps tombstone cleanup an in-place rehash.
        let index_capacity = config.max_entries.saturating_mul(2);
        let mut by_name = HashMap::new();
        by_name
            .try_reserve(index_capacity)
            .map_err(|_| AllocationError::OutOfMemory {
                requested: index_capacity,
            })?;
        let deadlines = DeadlineHeap::new(config.max_entries)?;

        debug!(
            "pcct created: max_entries={} cs_cap_md={} cs_cap_mi={} inline_threshold={} socket={}",
            config.max_entries,
            config.cs_cap_direct,
            config.cs_cap_indirect,
            config.cs_inline_threshold,
            config.socket
        );

        Ok(Self {
            cs_lists: [
                CsList::new(config.cs_cap_direct),
                CsList::new(config.cs_cap_indirect),
            ],
            config,
            entries,
            by_name,
            deadlines,
            indirect_mp,
            n_pit: 0,
            counters: Counters::default(),
            stale_tokens: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &PcctConfig {
        &self.config
    }

    pub fn indirect_pool(&self) -> &PktmbufPool {
        &self.indirect_mp
    }

    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.entries.count_in_use()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count_pending(&self) -> usize {
        self.n_pit
    }

    pub fn count_cached(&self, variant: CsVariant) -> usize {
        self.cs_lists[variant.idx()].count
    }

    /// Slot for `key`, if one exists
    pub fn find(&self, key: NameKey) -> Option<SlotId> {
        self.by_name.get(&key).map(|&idx| SlotId(idx))
    }

    /// Find the slot for `key`, taking a free slot if there is none.
    ///
    /// Returns the slot and whether it already existed. A full table is
    /// reported as [`PcctError::TableFull`]; nothing is evicted to make room.
    pub fn find_or_insert(&mut self, key: NameKey) -> Result<(SlotId, bool), PcctError> {
        if let Some(&idx) = self.by_name.get(&key) {
            return Ok((SlotId(idx), true));
        }

        if self.entries.is_full() {
            self.counters.table_full += 1;
            return Err(PcctError::TableFull);
        }
        let idx = self.entries.alloc()?;

        let entry = self.entries.get_mut(idx);
        entry.key = Some(key);
        entry.pit = None;
        entry.cs = None;
        entry.cs_link = CsLink::default();
        self.by_name.insert(key, idx);
        trace!("pcct insert {} -> slot {}", key, idx);
        Ok((SlotId(idx), false))
    }

    pub fn state(&self, slot: SlotId) -> SlotState {
        if !self.entries.is_allocated(slot.0) {
            return SlotState::Free;
        }
        let entry = self.entries.get(slot.0);
        match (entry.pit.is_some(), entry.cs.is_some()) {
            (false, false) => SlotState::Free,
            (true, false) => SlotState::PendingOnly,
            (false, true) => SlotState::CachedOnly,
            (true, true) => SlotState::Both,
        }
    }

    pub fn key(&self, slot: SlotId) -> Option<NameKey> {
        if !self.entries.is_allocated(slot.0) {
            return None;
        }
        self.entries.get(slot.0).key
    }

    pub fn pending(&self, slot: SlotId) -> Option<&PitRecord> {
        self.entry(slot).pit.as_ref()
    }

    pub fn cached(&self, slot: SlotId) -> Option<&CsRecord> {
        self.entry(slot).cs.as_ref()
    }

    /// Add a downstream face to the slot's pending record, creating it if needed
    pub fn attach_pending(
        &mut self,
        slot: SlotId,
        face: FaceId,
        nonce: u32,
        expiry: Timestamp,
    ) -> Result<PitAttach, PcctError> {
        self.assert_in_use(slot);
        let idx = slot.0;
        let entry = self.entries.get_mut(idx);
        let Some(pit) = entry.pit.as_mut() else {
            entry.pit = Some(PitRecord::new(face, nonce, expiry));
            self.deadlines.push(idx, expiry);
            self.n_pit += 1;
            self.counters.pit_inserted += 1;
            return Ok(PitAttach::Inserted);
        };

        let old_deadline = pit.deadline();
        match pit.update(face, nonce, expiry) {
            DnUpdate::Duplicate => {
                self.counters.pit_duplicates += 1;
                return Ok(PitAttach::DuplicateAggregation);
            }
            DnUpdate::Full => return Err(PcctError::TooManyDownstreams(PIT_MAX_DOWNSTREAMS)),
            DnUpdate::Added | DnUpdate::Refreshed => {}
        }

        let new_deadline = pit.deadline();
        if new_deadline != old_deadline {
            self.deadlines.update(idx, new_deadline);
        }
        self.counters.pit_aggregated += 1;
        Ok(PitAttach::Aggregated)
    }

    /// Store `pkt` as the slot's cached record.
    ///
    /// Payloads up to the inline threshold are copied into the slot; longer
    /// ones are held as an indirect clone. When the chosen variant is at
    /// capacity its oldest record is evicted first. Any pending record on the
    /// slot is left for the caller to resolve.
    pub fn attach_cache(
        &mut self,
        slot: SlotId,
        pkt: &Packet,
        freshness: Timestamp,
    ) -> Result<CsInsert, PcctError> {
        self.assert_in_use(slot);
        let idx = slot.0;

        let len = pkt.len();
        let variant = if len <= self.config.cs_inline_threshold {
            CsVariant::Direct
        } else {
            CsVariant::Indirect
        };

        if self.cs_lists[variant.idx()].capacity == 0 {
            self.remove_cs(idx);
            self.counters.cs_not_admitted += 1;
            self.free_if_empty(idx);
            return Ok(CsInsert {
                variant,
                admitted: false,
                evicted: None,
            });
        }

        let storage = match variant {
            CsVariant::Direct => {
                let mut buf = [0u8; CS_DIRECT_CAPACITY];
                let n = pkt.cursor().read_into(&mut buf[..len]);
                CsStorage::Direct { len: n as u16, buf }
            }
            CsVariant::Indirect => {
                CsStorage::Indirect(pkt.cursor().clone_range(len, &self.indirect_mp)?)
            }
        };
        self.remove_cs(idx);

        let evicted = if self.cs_lists[variant.idx()].is_full() {
            self.evict_oldest(variant)
        } else {
            None
        };

        self.entries.get_mut(idx).cs = Some(CsRecord { storage, freshness });
        self.cs_push_back(variant, idx);
        self.counters.cs_inserted += 1;
        Ok(CsInsert {
            variant,
            admitted: true,
            evicted,
        })
    }

    /// Downstreams waiting on the slot; empty if it has no pending record
    pub fn resolve_pending(&self, slot: SlotId) -> &[PitDownstream] {
        self.entry(slot)
            .pit
            .as_ref()
            .map(PitRecord::downstreams)
            .unwrap_or(&[])
    }

    /// Drop the slot's pending record after the caller has answered it.
    ///
    /// A `Both` slot becomes `CachedOnly`; a `PendingOnly` slot is freed.
    /// Returns whether there was a pending record.
    pub fn release_pending(&mut self, slot: SlotId) -> bool {
        self.assert_in_use(slot);
        let released = self.remove_pit(slot.0).is_some();
        if released {
            self.counters.pit_satisfied += 1;
        }
        self.free_if_empty(slot.0);
        released
    }

    /// Drop the slot's cached record. Returns whether there was one.
    pub fn release_cache(&mut self, slot: SlotId) -> bool {
        self.assert_in_use(slot);
        let released = self.remove_cs(slot.0).is_some();
        self.free_if_empty(slot.0);
        released
    }

    /// Return the slot to the pool, invalidating every token issued for it
    pub fn erase(&mut self, slot: SlotId) {
        self.assert_in_use(slot);
        self.free_slot(slot.0);
    }

    pub fn issue_token(&mut self, slot: SlotId) -> Token {
        let generation = self.entry(slot).generation;
        self.counters.tokens_issued += 1;
        Token::new(slot.0, generation)
    }

    /// Slot the token refers to, if the slot has not been released since
    pub fn resolve(&self, token: Token) -> Result<SlotId, PcctError> {
        let idx = token.index();
        let live = (idx as usize) < self.entries.capacity()
            && self.entries.is_allocated(idx)
            && self.entries.get(idx).generation == token.generation();
        if live {
            Ok(SlotId(idx))
        } else {
            self.stale_tokens.fetch_add(1, Ordering::Relaxed);
            Err(PcctError::StaleToken(token))
        }
    }

    /// Remove every pending record whose deadline is at or before `now`.
    ///
    /// Each removed record is passed to `on_expired`; the count is returned.
    pub fn expire_deadlines<F>(&mut self, now: Timestamp, mut on_expired: F) -> usize
    where
        F: FnMut(ExpiredPending),
    {
        let mut count = 0;
        while let Some((deadline, _)) = self.deadlines.peek() {
            if deadline > now {
                break;
            }
            let Some((_, idx)) = self.deadlines.pop() else {
                break;
            };
            let entry = self.entries.get_mut(idx);
            let key = entry.key;
            let token = Token::new(idx, entry.generation);
            let record = entry.pit.take();
            if record.is_some() {
                self.n_pit -= 1;
            }
            self.free_if_empty(idx);

            if let (Some(key), Some(record)) = (key, record) {
                on_expired(ExpiredPending { key, token, record });
                count += 1;
            }
        }
        debug_assert_eq!(self.deadlines.len(), self.n_pit);
        if count > 0 {
            self.counters.pit_expired += count as u64;
            debug!("pcct expired {} pending records", count);
        }
        count
    }

    /// Drop up to `limit` stale cached records from the head of each queue
    pub fn expire_cache(&mut self, now: Timestamp, limit: usize) -> usize {
        let mut count = 0;
        for variant in [CsVariant::Direct, CsVariant::Indirect] {
            let mut n = 0;
            while n < limit {
                let Some(idx) = self.cs_lists[variant.idx()].head else {
                    break;
                };
                let fresh = self
                    .entries
                    .get(idx)
                    .cs
                    .as_ref()
                    .map_or(false, |cs| cs.is_fresh(now));
                if fresh {
                    break;
                }
                self.remove_cs(idx);
                self.free_if_empty(idx);
                n += 1;
            }
            count += n;
        }
        self.counters.cs_stale_dropped += count as u64;
        count
    }

    /// Release every slot. Indirect payloads still referenced elsewhere stay alive.
    pub fn clear(&mut self) {
        let mut n = 0;
        for idx in 0..self.capacity() as u32 {
            if self.entries.is_allocated(idx) {
                self.free_slot(idx);
                n += 1;
            }
        }
        debug!("pcct cleared {} slots", n);
    }

    pub fn stats(&self) -> PcctStats {
        let c = &self.counters;
        PcctStats {
            capacity: self.capacity() as u64,
            in_use: self.len() as u64,
            table_full: c.table_full,
            tokens_issued: c.tokens_issued,
            stale_tokens: self.stale_tokens.load(Ordering::Relaxed),
            pit: PitStats {
                entries: self.n_pit as u64,
                inserted: c.pit_inserted,
                aggregated: c.pit_aggregated,
                duplicates: c.pit_duplicates,
                expired: c.pit_expired,
                satisfied: c.pit_satisfied,
            },
            cs: CsStats {
                direct_entries: self.count_cached(CsVariant::Direct) as u64,
                indirect_entries: self.count_cached(CsVariant::Indirect) as u64,
                direct_capacity: self.config.cs_cap_direct as u64,
                indirect_capacity: self.config.cs_cap_indirect as u64,
                inserted: c.cs_inserted,
                evicted_direct: c.cs_evicted[CsVariant::Direct.idx()],
                evicted_indirect: c.cs_evicted[CsVariant::Indirect.idx()],
                not_admitted: c.cs_not_admitted,
                stale_dropped: c.cs_stale_dropped,
            },
        }
    }

    fn assert_in_use(&self, slot: SlotId) {
        assert!(
            self.entries.is_allocated(slot.0),
            "pcct: slot {} is not in use",
            slot.0
        );
    }

    fn entry(&self, slot: SlotId) -> &PccEntry {
        self.assert_in_use(slot);
        self.entries.get(slot.0)
    }

    fn remove_pit(&mut self, idx: u32) -> Option<PitRecord> {
        let pit = self.entries.get_mut(idx).pit.take()?;
        self.deadlines.remove(idx);
        self.n_pit -= 1;
        Some(pit)
    }

    fn remove_cs(&mut self, idx: u32) -> Option<CsRecord> {
        let cs = self.entries.get_mut(idx).cs.take()?;
        self.cs_unlink(cs.variant(), idx);
        Some(cs)
    }

    fn evict_oldest(&mut self, variant: CsVariant) -> Option<CsEvicted> {
        let victim = self.cs_lists[variant.idx()].head?;
        let key = self.entries.get(victim).key?;
        self.remove_cs(victim);
        self.free_if_empty(victim);
        self.counters.cs_evicted[variant.idx()] += 1;
        debug!("pcct evicted {} cs record {}", variant, key);
        Some(CsEvicted { key, variant })
    }

    fn free_if_empty(&mut self, idx: u32) {
        let entry = self.entries.get(idx);
        if entry.pit.is_none() && entry.cs.is_none() {
            self.free_slot(idx);
        }
    }

    fn free_slot(&mut self, idx: u32) {
        self.remove_pit(idx);
        self.remove_cs(idx);
        let entry = self.entries.get_mut(idx);
        if let Some(key) = entry.key.take() {
            self.by_name.remove(&key);
        }
        entry.generation = entry.generation.wrapping_add(1);
        self.entries.free(idx);
        trace!("pcct free slot {}", idx);
    }

    fn cs_push_back(&mut self, variant: CsVariant, idx: u32) {
        let list = &mut self.cs_lists[variant.idx()];
        let tail = list.tail;
        self.entries.get_mut(idx).cs_link = CsLink {
            prev: tail,
            next: None,
        };
        match tail {
            Some(t) => self.entries.get_mut(t).cs_link.next = Some(idx),
            None => list.head = Some(idx),
        }
        list.tail = Some(idx);
        list.count += 1;
    }

    fn cs_unlink(&mut self, variant: CsVariant, idx: u32) {
        let list = &mut self.cs_lists[variant.idx()];
        let link = std::mem::take(&mut self.entries.get_mut(idx).cs_link);
        match link.prev {
            Some(p) => self.entries.get_mut(p).cs_link.next = link.next,
            None => list.head = link.next,
        }
        match link.next {
            Some(n) => self.entries.get_mut(n).cs_link.prev = link.prev,
            None => list.tail = link.prev,
        }
        list.count -= 1;
    }
}

impl fmt::Display for Pcct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pcct({}/{} slots, pit={}, cs-md={}/{}, cs-mi={}/{})",
            self.len(),
            self.capacity(),
            self.n_pit,
            self.count_cached(CsVariant::Direct),
            self.config.cs_cap_direct,
            self.count_cached(CsVariant::Indirect),
            self.config.cs_cap_indirect
        )
    }
}
