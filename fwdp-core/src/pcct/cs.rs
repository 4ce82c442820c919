use std::fmt;

use fwdp_common::{Timestamp, CS_DIRECT_CAPACITY};

use super::NameKey;
use crate::mbuf::Packet;

/// CS storage variant; each has its own capacity and eviction queue
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CsVariant {
    /// Payload copied into the slot
    Direct,
    /// Payload held as an indirect clone of the original chain
    Indirect,
}

impl CsVariant {
    pub(crate) const fn idx(self) -> usize {
        match self {
            CsVariant::Direct => 0,
            CsVariant::Indirect => 1,
        }
    }
}

impl fmt::Display for CsVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CsVariant::Direct => f.write_str("direct"),
            CsVariant::Indirect => f.write_str("indirect"),
        }
    }
}

pub(crate) enum CsStorage {
    Direct {
        len: u16,
        buf: [u8; CS_DIRECT_CAPACITY],
    },
    Indirect(Packet),
}

/// Borrowed view of a cached payload
#[derive(Debug)]
pub enum CsPayload<'a> {
    Direct(&'a [u8]),
    Indirect(&'a Packet),
}

impl CsPayload<'_> {
    pub fn len(&self) -> usize {
        match self {
            CsPayload::Direct(bytes) => bytes.len(),
            CsPayload::Indirect(pkt) => pkt.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        match self {
            CsPayload::Direct(bytes) => bytes.to_vec(),
            CsPayload::Indirect(pkt) => pkt.to_vec(),
        }
    }
}

/// Cached-response record
pub struct CsRecord {
    pub(crate) storage: CsStorage,
    pub(crate) freshness: Timestamp,
}

impl CsRecord {
    pub fn variant(&self) -> CsVariant {
        match self.storage {
            CsStorage::Direct { .. } => CsVariant::Direct,
            CsStorage::Indirect(_) => CsVariant::Indirect,
        }
    }

    pub fn payload(&self) -> CsPayload<'_> {
        match &self.storage {
            CsStorage::Direct { len, buf } => CsPayload::Direct(&buf[..*len as usize]),
            CsStorage::Indirect(pkt) => CsPayload::Indirect(pkt),
        }
    }

    /// Time after which the record no longer satisfies fresh-only requests
    pub fn freshness(&self) -> Timestamp {
        self.freshness
    }

    pub fn is_fresh(&self, now: Timestamp) -> bool {
        now < self.freshness
    }
}

impl fmt::Debug for CsRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CsRecord")
            .field("variant", &self.variant())
            .field("len", &self.payload().len())
            .field("freshness", &self.freshness)
            .finish()
    }
}

/// Outcome of storing a cached record
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CsInsert {
    pub variant: CsVariant,
    /// False when the variant has zero capacity and nothing was stored
    pub admitted: bool,
    /// Record pushed out to make room
    pub evicted: Option<CsEvicted>,
}

/// A record evicted by capacity pressure
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CsEvicted {
    pub key: NameKey,
    pub variant: CsVariant,
}

/// Links of the per-variant eviction queue, stored on each slot
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct CsLink {
    pub prev: Option<u32>,
    pub next: Option<u32>,
}

/// Insertion-ordered queue threaded through the slot arena
#[derive(Debug)]
pub(crate) struct CsList {
    pub head: Option<u32>,
    pub tail: Option<u32>,
    pub count: usize,
    pub capacity: usize,
}

impl CsList {
    pub fn new(capacity: usize) -> Self {
        Self {
            head: None,
            tail: None,
            count: 0,
            capacity,
        }
    }

    pub fn is_full(&self) -> bool {
        self.count >= self.capacity
    }
}
