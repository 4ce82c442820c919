use std::fmt;

/// Generation-guarded handle to a PCCT slot.
///
/// The low 32 bits hold the slot index and the high 32 bits the slot
/// generation at issue time. A token outlives the slot safely: once the
/// slot is released its generation moves on and the token stops resolving.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(u64);

impl Token {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Token(((generation as u64) << 32) | index as u64)
    }

    /// Rebuild a token from its wire form
    pub const fn from_u64(raw: u64) -> Self {
        Token(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub const fn index(self) -> u32 {
        self.0 as u32
    }

    pub const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}
