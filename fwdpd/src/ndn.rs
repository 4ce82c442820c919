//! Minimal NDN TLV codec.
//!
//! Decoding runs over a [`PacketCursor`] so packets are read in place no
//! matter how they are segmented. Only the fields the forwarder acts on are
//! extracted; unrecognized elements are skipped.
//!
//! Wire format (NDN packet format v0.3, NDNLPv2):
//! - TLV-TYPE and TLV-LENGTH are VAR-NUMBERs: one octet below 253, otherwise
//!   0xFD/0xFE/0xFF followed by a 2/4/8-octet big-endian number
//! - An LpPacket carries an optional PIT token and the network packet as its
//!   Fragment; a bare Interest or Data is accepted as well
//! - A Nack is an LpPacket with a Nack header whose Fragment is the Interest
//!   being refused

use std::fmt::Write as _;
use std::io;

use fwdp_common::{PIT_DEFAULT_LIFETIME_MS, PIT_MAX_LIFETIME_MS};
use fwdp_core::{Packet, PacketCursor};

pub mod tt {
    pub const LP_PACKET: u64 = 0x64;
    pub const LP_PIT_TOKEN: u64 = 0x62;
    pub const LP_FRAGMENT: u64 = 0x50;
    pub const LP_NACK: u64 = 0x0320;
    pub const LP_NACK_REASON: u64 = 0x0321;
    pub const INTEREST: u64 = 0x05;
    pub const DATA: u64 = 0x06;
    pub const NAME: u64 = 0x07;
    pub const GENERIC_NAME_COMPONENT: u64 = 0x08;
    pub const MUST_BE_FRESH: u64 = 0x12;
    pub const NONCE: u64 = 0x0A;
    pub const INTEREST_LIFETIME: u64 = 0x0C;
    pub const META_INFO: u64 = 0x14;
    pub const CONTENT: u64 = 0x15;
    pub const FRESHNESS_PERIOD: u64 = 0x19;
}

/// PIT tokens issued by this forwarder are exactly this long
pub const PIT_TOKEN_LEN: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum TlvError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid VAR-NUMBER encoding")]
    InvalidVarNum,
    #[error("Buffer too short")]
    BufferTooShort,
    #[error("Unexpected TLV type: expected {expected:#x}, got {actual:#x}")]
    UnexpectedType { expected: u64, actual: u64 },
    #[error("Unknown packet type: {0:#x}")]
    UnknownPacket(u64),
    #[error("Missing {0} element")]
    MissingField(&'static str),
    #[error("Value length mismatch: expected {expected}, got {actual}")]
    ValueLengthMismatch { expected: usize, actual: usize },
}

/// Reason carried in a Nack header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackReason {
    /// Reason absent or not understood
    Unspecified,
    Congestion,
    Duplicate,
    NoRoute,
}

impl NackReason {
    pub fn from_code(code: u64) -> Self {
        match code {
            50 => NackReason::Congestion,
            100 => NackReason::Duplicate,
            150 => NackReason::NoRoute,
            _ => NackReason::Unspecified,
        }
    }

    pub fn code(self) -> u64 {
        match self {
            NackReason::Unspecified => 0,
            NackReason::Congestion => 50,
            NackReason::Duplicate => 100,
            NackReason::NoRoute => 150,
        }
    }
}

/// Link-layer fields preceding the network packet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LpHeader {
    pub pit_token: Option<u64>,
    /// Set when the packet is a Nack of the enclosed Interest
    pub nack: Option<NackReason>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interest {
    /// Name TLV-VALUE: the sequence of encoded components
    pub name: Vec<u8>,
    pub nonce: u32,
    pub must_be_fresh: bool,
    /// Lifetime after clamping to the PIT maximum
    pub lifetime_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Data {
    pub name: Vec<u8>,
    pub freshness_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum L3 {
    Interest(Interest),
    Data(Data),
}

/// A decoded packet and the location of its network-layer part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub lp: LpHeader,
    pub l3: L3,
    /// Offset of the Interest or Data TLV within the packet
    pub l3_offset: usize,
    pub l3_len: usize,
}

impl Decoded {
    /// Cursor covering only the Interest or Data TLV
    pub fn l3_cursor<'a>(&self, pkt: &'a Packet) -> PacketCursor<'a> {
        PacketCursor::bounded(pkt, self.l3_offset, self.l3_len)
    }
}

fn read_octet(c: &mut PacketCursor<'_>) -> Result<u8, TlvError> {
    let b = c.peek_octet().ok_or(TlvError::BufferTooShort)?;
    c.advance(1);
    Ok(b)
}

fn read_exact<const N: usize>(c: &mut PacketCursor<'_>) -> Result<[u8; N], TlvError> {
    let mut buf = [0u8; N];
    io::Read::read_exact(c, &mut buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => TlvError::BufferTooShort,
        _ => TlvError::Io(e),
    })?;
    Ok(buf)
}

/// Decode a VAR-NUMBER
pub fn read_varnum(c: &mut PacketCursor<'_>) -> Result<u64, TlvError> {
    match read_octet(c)? {
        b @ 0..=252 => Ok(b as u64),
        0xFD => Ok(u16::from_be_bytes(read_exact(c)?) as u64),
        0xFE => Ok(u32::from_be_bytes(read_exact(c)?) as u64),
        0xFF => Ok(u64::from_be_bytes(read_exact(c)?)),
    }
}

/// Decode a TLV-TYPE and TLV-LENGTH, checking the value fits in the cursor
pub fn read_header(c: &mut PacketCursor<'_>) -> Result<(u64, usize), TlvError> {
    let typ = read_varnum(c)?;
    let len = usize::try_from(read_varnum(c)?).map_err(|_| TlvError::InvalidVarNum)?;
    if len > c.remaining() {
        return Err(TlvError::BufferTooShort);
    }
    Ok((typ, len))
}

fn read_value(c: &mut PacketCursor<'_>, len: usize) -> Vec<u8> {
    let mut value = vec![0u8; len];
    let n = c.read_into(&mut value);
    value.truncate(n);
    value
}

/// Decode a NonNegativeInteger of 1, 2, 4 or 8 octets
fn read_nni(c: &mut PacketCursor<'_>, len: usize) -> Result<u64, TlvError> {
    match len {
        1 => Ok(read_octet(c)? as u64),
        2 => Ok(u16::from_be_bytes(read_exact(c)?) as u64),
        4 => Ok(u32::from_be_bytes(read_exact(c)?) as u64),
        8 => Ok(u64::from_be_bytes(read_exact(c)?)),
        _ => Err(TlvError::InvalidVarNum),
    }
}

/// Decode an Interest or Data, optionally wrapped in an LpPacket
pub fn decode(pkt: &Packet) -> Result<Decoded, TlvError> {
    let mut c = pkt.cursor();
    let start = c;
    let (typ, len) = read_header(&mut c)?;

    if typ != tt::LP_PACKET {
        let l3 = decode_l3(pkt, start.distance(&c) as usize, typ, len)?;
        return Ok(Decoded {
            lp: LpHeader::default(),
            l3,
            l3_offset: 0,
            l3_len: start.distance(&c) as usize + len,
        });
    }

    let mut lp = LpHeader::default();
    let end = c.position() + len;
    while c.position() < end {
        let (typ, len) = read_header(&mut c)?;
        match typ {
            tt::LP_PIT_TOKEN => {
                if len != PIT_TOKEN_LEN {
                    return Err(TlvError::ValueLengthMismatch {
                        expected: PIT_TOKEN_LEN,
                        actual: len,
                    });
                }
                lp.pit_token = Some(u64::from_be_bytes(read_exact(&mut c)?));
            }
            tt::LP_NACK => {
                let mut nack = PacketCursor::bounded(pkt, c.position(), len);
                c.advance(len);
                let mut reason = NackReason::Unspecified;
                while !nack.is_end() {
                    let (typ, len) = read_header(&mut nack)?;
                    if typ == tt::LP_NACK_REASON {
                        reason = NackReason::from_code(read_nni(&mut nack, len)?);
                    } else {
                        nack.advance(len);
                    }
                }
                lp.nack = Some(reason);
            }
            tt::LP_FRAGMENT => {
                let l3_offset = c.position();
                let mut frag = PacketCursor::bounded(pkt, l3_offset, len);
                let (typ, inner) = read_header(&mut frag)?;
                if lp.nack.is_some() && typ != tt::INTEREST {
                    return Err(TlvError::UnexpectedType {
                        expected: tt::INTEREST,
                        actual: typ,
                    });
                }
                let l3 = decode_l3(pkt, frag.position(), typ, inner)?;
                return Ok(Decoded {
                    lp,
                    l3,
                    l3_offset,
                    l3_len: frag.position() - l3_offset + inner,
                });
            }
            _ => {
                c.advance(len);
            }
        }
    }
    Err(TlvError::MissingField("Fragment"))
}

fn decode_l3(pkt: &Packet, value_offset: usize, typ: u64, len: usize) -> Result<L3, TlvError> {
    let c = PacketCursor::bounded(pkt, value_offset, len);
    match typ {
        tt::INTEREST => decode_interest(c).map(L3::Interest),
        tt::DATA => decode_data(c).map(L3::Data),
        other => Err(TlvError::UnknownPacket(other)),
    }
}

fn decode_name(c: &mut PacketCursor<'_>) -> Result<Vec<u8>, TlvError> {
    let (typ, len) = read_header(c)?;
    if typ != tt::NAME {
        return Err(TlvError::UnexpectedType {
            expected: tt::NAME,
            actual: typ,
        });
    }
    Ok(read_value(c, len))
}

fn decode_interest(mut c: PacketCursor<'_>) -> Result<Interest, TlvError> {
    let name = decode_name(&mut c)?;
    let mut nonce = None;
    let mut must_be_fresh = false;
    let mut lifetime_ms = PIT_DEFAULT_LIFETIME_MS;

    while !c.is_end() {
        let (typ, len) = read_header(&mut c)?;
        match typ {
            tt::NONCE => {
                if len != 4 {
                    return Err(TlvError::ValueLengthMismatch {
                        expected: 4,
                        actual: len,
                    });
                }
                nonce = Some(u32::from_be_bytes(read_exact(&mut c)?));
            }
            tt::MUST_BE_FRESH => {
                must_be_fresh = true;
                c.advance(len);
            }
            tt::INTEREST_LIFETIME => lifetime_ms = read_nni(&mut c, len)?,
            _ => {
                c.advance(len);
            }
        }
    }

    Ok(Interest {
        name,
        nonce: nonce.ok_or(TlvError::MissingField("Nonce"))?,
        must_be_fresh,
        lifetime_ms: lifetime_ms.min(PIT_MAX_LIFETIME_MS),
    })
}

fn decode_data(mut c: PacketCursor<'_>) -> Result<Data, TlvError> {
    let name = decode_name(&mut c)?;
    let mut freshness_ms = 0;

    while !c.is_end() {
        let (typ, len) = read_header(&mut c)?;
        if typ != tt::META_INFO {
            c.advance(len);
            continue;
        }
        let mut meta = PacketCursor::bounded(c.packet(), c.position(), len);
        c.advance(len);
        while !meta.is_end() {
            let (typ, len) = read_header(&mut meta)?;
            if typ == tt::FRESHNESS_PERIOD {
                freshness_ms = read_nni(&mut meta, len)?;
            } else {
                meta.advance(len);
            }
        }
    }

    Ok(Data { name, freshness_ms })
}

pub fn write_varnum(buf: &mut Vec<u8>, n: u64) {
    if n < 253 {
        buf.push(n as u8);
    } else if n <= u16::MAX as u64 {
        buf.push(0xFD);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= u32::MAX as u64 {
        buf.push(0xFE);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(0xFF);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

pub fn write_tlv(buf: &mut Vec<u8>, typ: u64, value: &[u8]) {
    write_varnum(buf, typ);
    write_varnum(buf, value.len() as u64);
    buf.extend_from_slice(value);
}

/// Name TLV-VALUE made of generic components
pub fn encode_name<S: AsRef<[u8]>>(components: &[S]) -> Vec<u8> {
    let mut value = Vec::new();
    for comp in components {
        write_tlv(&mut value, tt::GENERIC_NAME_COMPONENT, comp.as_ref());
    }
    value
}

/// Render a Name TLV-VALUE as a URI path, for logging
pub fn name_to_uri(name: &[u8]) -> String {
    let pkt = Packet::from_segments(vec![bytes::Bytes::copy_from_slice(name)]);
    let mut c = pkt.cursor();
    let mut uri = String::new();
    while !c.is_end() {
        let Ok((_, len)) = read_header(&mut c) else {
            uri.push_str("/...");
            break;
        };
        uri.push('/');
        for b in read_value(&mut c, len) {
            if b.is_ascii_alphanumeric() || b"-._~".contains(&b) {
                uri.push(b as char);
            } else {
                let _ = write!(uri, "%{:02X}", b);
            }
        }
    }
    if uri.is_empty() {
        uri.push('/');
    }
    uri
}

pub fn encode_interest(name: &[u8], nonce: u32, lifetime_ms: u64, must_be_fresh: bool) -> Vec<u8> {
    let mut value = Vec::new();
    write_tlv(&mut value, tt::NAME, name);
    if must_be_fresh {
        write_tlv(&mut value, tt::MUST_BE_FRESH, &[]);
    }
    write_tlv(&mut value, tt::NONCE, &nonce.to_be_bytes());
    write_tlv(&mut value, tt::INTEREST_LIFETIME, &(lifetime_ms as u32).to_be_bytes());

    let mut buf = Vec::with_capacity(value.len() + 4);
    write_tlv(&mut buf, tt::INTEREST, &value);
    buf
}

pub fn encode_data(name: &[u8], freshness_ms: u64, content: &[u8]) -> Vec<u8> {
    let mut meta = Vec::new();
    write_tlv(&mut meta, tt::FRESHNESS_PERIOD, &(freshness_ms as u32).to_be_bytes());

    let mut value = Vec::new();
    write_tlv(&mut value, tt::NAME, name);
    write_tlv(&mut value, tt::META_INFO, &meta);
    write_tlv(&mut value, tt::CONTENT, content);

    let mut buf = Vec::with_capacity(value.len() + 4);
    write_tlv(&mut buf, tt::DATA, &value);
    buf
}

/// Wrap a network packet in an LpPacket carrying `pit_token`
pub fn encode_lp(pit_token: Option<u64>, l3: &[u8]) -> Vec<u8> {
    encode_lp_fields(pit_token, None, l3)
}

/// Nack `interest` with `reason`, echoing `pit_token`
pub fn encode_nack(pit_token: Option<u64>, reason: NackReason, interest: &[u8]) -> Vec<u8> {
    encode_lp_fields(pit_token, Some(reason), interest)
}

fn encode_lp_fields(pit_token: Option<u64>, nack: Option<NackReason>, l3: &[u8]) -> Vec<u8> {
    let mut value = Vec::with_capacity(l3.len() + 24);
    if let Some(token) = pit_token {
        write_tlv(&mut value, tt::LP_PIT_TOKEN, &token.to_be_bytes());
    }
    if let Some(reason) = nack {
        let mut header = Vec::new();
        if reason != NackReason::Unspecified {
            write_tlv(&mut header, tt::LP_NACK_REASON, &[reason.code() as u8]);
        }
        write_tlv(&mut value, tt::LP_NACK, &header);
    }
    write_tlv(&mut value, tt::LP_FRAGMENT, l3);

    let mut buf = Vec::with_capacity(value.len() + 4);
    write_tlv(&mut buf, tt::LP_PACKET, &value);
    buf
}
