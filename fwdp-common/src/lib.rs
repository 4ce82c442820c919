#![no_std]

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Maximum PIT entry lifetime in milliseconds
pub const PIT_MAX_LIFETIME_MS: u64 = 120_000;

/// Interest lifetime assumed when the packet does not carry one
pub const PIT_DEFAULT_LIFETIME_MS: u64 = 4_000;

/// Maximum number of downstream faces aggregated on one PIT record
pub const PIT_MAX_DOWNSTREAMS: usize = 8;

/// Size of the inline payload area of a Direct CS record
pub const CS_DIRECT_CAPACITY: usize = 512;

/// Default payload length at or below which CS records are stored Direct
pub const CS_DEFAULT_INLINE_THRESHOLD: usize = 256;

/// Default PCCT capacity
pub const DEFAULT_MAX_ENTRIES: usize = 65_535;

/// Default Direct CS capacity
pub const DEFAULT_CS_CAP_DIRECT: usize = 32_768;

/// Default Indirect CS capacity
pub const DEFAULT_CS_CAP_INDIRECT: usize = 16_384;

/// Largest receive burst handed to a callback
pub const MAX_BURST_SIZE: usize = 64;

/// Face identifier
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FaceId(pub u16);

impl FaceId {
    /// Reserved value that never names a real face
    pub const INVALID: FaceId = FaceId(0);

    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for FaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "face#{}", self.0)
    }
}

impl From<u16> for FaceId {
    fn from(id: u16) -> Self {
        FaceId(id)
    }
}

/// Monotonic time in nanoseconds since an arbitrary epoch
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub const fn from_millis(ms: u64) -> Self {
        Timestamp(ms.saturating_mul(1_000_000))
    }

    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    pub const fn as_millis(self) -> u64 {
        self.0 / 1_000_000
    }

    pub const fn add_millis(self, ms: u64) -> Self {
        Timestamp(self.0.saturating_add(ms.saturating_mul(1_000_000)))
    }

    /// Nanoseconds from `earlier` to `self`, zero if `earlier` is later
    pub const fn saturating_since(self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}ms", self.0 / 1_000_000, self.0 % 1_000_000)
    }
}

/// NUMA socket placement hint
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum NumaSocket {
    /// No preference
    #[default]
    Any,
    /// Place memory on the given socket
    Id(u32),
}

impl NumaSocket {
    pub const fn is_any(self) -> bool {
        matches!(self, NumaSocket::Any)
    }

    /// Socket id, if one was requested
    pub const fn id(self) -> Option<u32> {
        match self {
            NumaSocket::Any => None,
            NumaSocket::Id(id) => Some(id),
        }
    }
}

impl fmt::Display for NumaSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NumaSocket::Any => f.write_str("any"),
            NumaSocket::Id(id) => write!(f, "{}", id),
        }
    }
}

/// PIT statistics structure
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PitStats {
    /// Current number of pending records
    pub entries: u64,
    /// Pending records created
    pub inserted: u64,
    /// Downstreams added to an existing pending record
    pub aggregated: u64,
    /// Same face and nonce seen again
    pub duplicates: u64,
    /// Pending records removed by deadline expiry
    pub expired: u64,
    /// Pending records released after resolution
    pub satisfied: u64,
}

impl PitStats {
    pub const fn new() -> Self {
        Self {
            entries: 0,
            inserted: 0,
            aggregated: 0,
            duplicates: 0,
            expired: 0,
            satisfied: 0,
        }
    }
}

/// Content Store statistics structure
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CsStats {
    /// Current number of Direct records
    pub direct_entries: u64,
    /// Current number of Indirect records
    pub indirect_entries: u64,
    /// Direct record capacity
    pub direct_capacity: u64,
    /// Indirect record capacity
    pub indirect_capacity: u64,
    /// Records stored
    pub inserted: u64,
    /// Direct records evicted by capacity pressure
    pub evicted_direct: u64,
    /// Indirect records evicted by capacity pressure
    pub evicted_indirect: u64,
    /// Records refused because their variant has zero capacity
    pub not_admitted: u64,
    /// Records dropped after their freshness deadline passed
    pub stale_dropped: u64,
}

impl CsStats {
    pub const fn new() -> Self {
        Self {
            direct_entries: 0,
            indirect_entries: 0,
            direct_capacity: 0,
            indirect_capacity: 0,
            inserted: 0,
            evicted_direct: 0,
            evicted_indirect: 0,
            not_admitted: 0,
            stale_dropped: 0,
        }
    }
}

/// Composite table statistics
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PcctStats {
    /// Number of slots
    pub capacity: u64,
    /// Occupied slots
    pub in_use: u64,
    /// Insertions refused because no slot was free
    pub table_full: u64,
    /// Tokens handed out
    pub tokens_issued: u64,
    /// Token resolutions that failed
    pub stale_tokens: u64,
    pub pit: PitStats,
    pub cs: CsStats,
}

impl PcctStats {
    pub const fn new() -> Self {
        Self {
            capacity: 0,
            in_use: 0,
            table_full: 0,
            tokens_issued: 0,
            stale_tokens: 0,
            pit: PitStats::new(),
            cs: CsStats::new(),
        }
    }
}

/// Forwarding input statistics
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FwdStats {
    /// Bursts delivered to the handler
    pub bursts: u64,
    /// Interest packets received
    pub interests: u64,
    /// Data packets received
    pub data: u64,
    /// Nack packets received
    pub nacks: u64,
    /// Interests answered from the CS
    pub cs_hits: u64,
    /// Packets dispatched by name
    pub n_name_disp: u64,
    /// Packets dispatched by PIT token
    pub n_token_disp: u64,
    /// Packets dropped due to a missing or stale token
    pub n_bad_token: u64,
    /// Duplicate Interests dropped as loops
    pub duplicates: u64,
    /// Interests refused because the table was full
    pub table_full_drops: u64,
    /// Nacks sent downstream, for refused Interests or relayed from upstream
    pub nacks_sent: u64,
    /// Data packets that matched no pending record
    pub unsolicited: u64,
    /// Packets that failed to decode
    pub parse_errors: u64,
}

impl FwdStats {
    pub const fn new() -> Self {
        Self {
            bursts: 0,
            interests: 0,
            data: 0,
            nacks: 0,
            cs_hits: 0,
            n_name_disp: 0,
            n_token_disp: 0,
            n_bad_token: 0,
            duplicates: 0,
            table_full_drops: 0,
            nacks_sent: 0,
            unsolicited: 0,
            parse_errors: 0,
        }
    }

    /// Accumulate another worker's counters
    pub fn merge(&mut self, other: &FwdStats) {
        self.bursts += other.bursts;
        self.interests += other.interests;
        self.data += other.data;
        self.nacks += other.nacks;
        self.cs_hits += other.cs_hits;
        self.n_name_disp += other.n_name_disp;
        self.n_token_disp += other.n_token_disp;
        self.n_bad_token += other.n_bad_token;
        self.duplicates += other.duplicates;
        self.table_full_drops += other.table_full_drops;
        self.nacks_sent += other.nacks_sent;
        self.unsolicited += other.unsolicited;
        self.parse_errors += other.parse_errors;
    }
}
