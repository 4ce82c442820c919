//! Read position over a packet's segment chain.
//!
//! A [`PacketCursor`] never assumes the packet is contiguous: every operation
//! walks the chain segment by segment, so codecs behave the same no matter how
//! the packet was fragmented on arrival.

use std::io;
use std::ptr;

use crate::mbuf::{Packet, PktmbufPool};
use crate::mempool::AllocationError;

/// Movable read position within a [`Packet`].
///
/// The cursor borrows the packet and is cheap to copy; a copy is an
/// independent position over the same chain.
#[derive(Clone, Copy, Debug)]
pub struct PacketCursor<'a> {
    pkt: &'a Packet,
    /// Index of the current segment
    seg: usize,
    /// Offset within the current segment
    off: usize,
    /// Octets left before the cursor's bound
    rem: usize,
    /// Offset from the start of the packet
    pos: usize,
}

impl<'a> PacketCursor<'a> {
    /// Cursor at offset 0 covering the whole packet
    pub fn begin(pkt: &'a Packet) -> Self {
        Self {
            pkt,
            seg: 0,
            off: 0,
            rem: pkt.len(),
            pos: 0,
        }
    }

    /// Cursor at `offset` whose remaining length is capped to `len`
    pub fn bounded(pkt: &'a Packet, offset: usize, len: usize) -> Self {
        let mut cursor = Self::begin(pkt);
        cursor.advance(offset);
        cursor.rem = cursor.rem.min(len);
        cursor
    }

    pub fn packet(&self) -> &'a Packet {
        self.pkt
    }

    pub fn is_end(&self) -> bool {
        self.rem == 0
    }

    /// Octets between the cursor and its bound
    pub fn remaining(&self) -> usize {
        self.rem
    }

    /// Offset from the start of the packet
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Move forward by up to `n` octets; returns how far it actually moved
    pub fn advance(&mut self, n: usize) -> usize {
        let n = n.min(self.rem);
        let segs = self.pkt.segments();
        let mut left = n;
        while left > 0 {
            let avail = segs[self.seg].len() - self.off;
            if left < avail {
                self.off += left;
                left = 0;
            } else {
                left -= avail;
                self.seg += 1;
                self.off = 0;
            }
        }
        self.pos += n;
        self.rem -= n;
        n
    }

    /// Signed distance from `self` to `other`.
    ///
    /// If positive, `self.advance(d)` lands on `other`; if negative,
    /// `other.advance(-d)` lands on `self`. Both cursors must be over the
    /// same packet.
    pub fn distance(&self, other: &PacketCursor<'_>) -> isize {
        debug_assert!(
            ptr::eq(self.pkt, other.pkt),
            "distance between cursors of different packets"
        );
        other.pos as isize - self.pos as isize
    }

    /// Next octet without advancing, or `None` at end of packet
    pub fn peek_octet(&self) -> Option<u8> {
        if self.rem == 0 {
            return None;
        }
        Some(self.pkt.segments()[self.seg][self.off])
    }

    /// Copy up to `buf.len()` octets and advance past them
    pub fn read_into(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.rem);
        let segs = self.pkt.segments();
        let mut copied = 0;
        while copied < n {
            let seg = &segs[self.seg];
            let take = (seg.len() - self.off).min(n - copied);
            buf[copied..copied + take].copy_from_slice(&seg[self.off..self.off + take]);
            copied += take;
            self.off += take;
            if self.off == seg.len() {
                self.seg += 1;
                self.off = 0;
            }
        }
        self.pos += n;
        self.rem -= n;
        n
    }

    /// Clone the next `n` octets into a new packet drawn from `mp`.
    ///
    /// The new packet references the original segments; no payload is
    /// copied. The cursor moves past the range only on success.
    pub fn clone_range(&mut self, n: usize, mp: &PktmbufPool) -> Result<Packet, AllocationError> {
        if n > self.rem {
            return Err(AllocationError::OutOfRange {
                requested: n,
                available: self.rem,
            });
        }

        let segs = self.pkt.segments();
        let mut chain = Vec::new();
        let (mut seg, mut off, mut left) = (self.seg, self.off, n);
        while left > 0 {
            let take = (segs[seg].len() - off).min(left);
            chain.push(segs[seg].slice(off..off + take));
            left -= take;
            seg += 1;
            off = 0;
        }

        let clone = mp.alloc_indirect(chain)?;
        self.advance(n);
        Ok(clone)
    }
}

impl io::Read for PacketCursor<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_into(buf))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use bytes::Bytes;

    use super::*;

    fn chain(parts: &[&'static [u8]]) -> Packet {
        Packet::from_segments(parts.iter().copied().map(Bytes::from_static))
    }

    fn shapes() -> Vec<Packet> {
        vec![
            chain(&[b"abcdefghij"]),
            chain(&[b"abcd", b"efghij"]),
            chain(&[b"ab", b"cde", b"f", b"ghij"]),
        ]
    }

    #[test]
    fn test_distance_law_across_segment_shapes() {
        for pkt in shapes() {
            for start in 0..=pkt.len() {
                for n in 0..=(pkt.len() - start) {
                    let mut a = PacketCursor::begin(&pkt);
                    a.advance(start);
                    let mut b = a;
                    assert_eq!(b.advance(n), n);
                    assert_eq!(a.distance(&b), n as isize);
                    assert_eq!(b.distance(&a), -(n as isize));

                    // Advancing by the distance lands on the same octet.
                    let mut c = a;
                    c.advance(a.distance(&b) as usize);
                    assert_eq!(c.peek_octet(), b.peek_octet());
                    assert_eq!(c.distance(&b), 0);
                }
            }
        }
    }

    #[test]
    fn test_short_advance_at_end() {
        let pkt = chain(&[b"abc", b"de"]);
        let mut c = pkt.cursor();
        assert_eq!(c.advance(4), 4);
        assert_eq!(c.advance(10), 1);
        assert!(c.is_end());
        assert_eq!(c.advance(1), 0);
        assert_eq!(c.peek_octet(), None);
    }

    #[test]
    fn test_peek_does_not_advance() {
        let pkt = chain(&[b"x", b"yz"]);
        let mut c = pkt.cursor();
        assert_eq!(c.peek_octet(), Some(b'x'));
        assert_eq!(c.peek_octet(), Some(b'x'));
        c.advance(1);
        assert_eq!(c.peek_octet(), Some(b'y'));
        assert_eq!(c.position(), 1);
    }

    #[test]
    fn test_read_into_spans_segments() {
        let pkt = chain(&[b"ab", b"cde", b"f", b"ghij"]);
        let mut c = pkt.cursor();
        c.advance(1);
        let mut buf = [0u8; 6];
        assert_eq!(c.read_into(&mut buf), 6);
        assert_eq!(&buf, b"bcdefg");
        assert_eq!(c.peek_octet(), Some(b'h'));

        let mut rest = [0u8; 8];
        assert_eq!(c.read_into(&mut rest), 3);
        assert_eq!(&rest[..3], b"hij");
        assert!(c.is_end());
    }

    #[test]
    fn test_bounded_cursor() {
        let pkt = chain(&[b"abcd", b"efgh"]);
        let mut c = PacketCursor::bounded(&pkt, 3, 3);
        assert_eq!(c.position(), 3);
        assert_eq!(c.remaining(), 3);
        let mut buf = [0u8; 8];
        assert_eq!(c.read_into(&mut buf), 3);
        assert_eq!(&buf[..3], b"def");
        assert!(c.is_end());
        assert_eq!(c.peek_octet(), None);

        let past = PacketCursor::bounded(&pkt, 6, 100);
        assert_eq!(past.remaining(), 2);
    }

    #[test]
    fn test_clone_range_shares_segments() {
        let pkt = chain(&[b"abc", b"defg", b"hi"]);
        let mp = PktmbufPool::new("indirect", 4, 64).unwrap();
        let mut c = pkt.cursor();
        c.advance(2);

        let clone = c.clone_range(5, &mp).unwrap();
        assert!(clone.is_indirect());
        assert_eq!(clone.len(), 5);
        assert_eq!(clone.n_segments(), 2);
        assert_eq!(clone.to_vec(), b"cdefg");
        // Same memory as the original chain.
        assert_eq!(clone.segments()[1].as_ptr(), pkt.segments()[1].as_ptr());
        assert_eq!(c.position(), 7);
        assert_eq!(mp.count_in_use(), 1);

        drop(clone);
        assert_eq!(mp.count_in_use(), 0);
    }

    #[test]
    fn test_clone_range_failure_leaves_cursor() {
        let pkt = chain(&[b"abc"]);
        let mp = PktmbufPool::new("indirect", 1, 64).unwrap();
        let mut c = pkt.cursor();
        assert_eq!(
            c.clone_range(4, &mp).err(),
            Some(AllocationError::OutOfRange {
                requested: 4,
                available: 3
            })
        );
        assert_eq!(c.position(), 0);

        let _held = c.clone_range(1, &mp).unwrap();
        assert!(matches!(
            c.clone_range(1, &mp),
            Err(AllocationError::Exhausted { .. })
        ));
        assert_eq!(c.position(), 1);
    }

    #[test]
    fn test_io_read() {
        let pkt = chain(&[b"hello ", b"world"]);
        let mut c = pkt.cursor();
        let mut s = String::new();
        c.read_to_string(&mut s).unwrap();
        assert_eq!(s, "hello world");
    }

    #[test]
    fn test_empty_packet() {
        let pkt = Packet::from_segments(Vec::<Bytes>::new());
        let mut c = pkt.cursor();
        assert!(c.is_end());
        assert_eq!(c.advance(3), 0);
        assert_eq!(c.read_into(&mut [0u8; 2]), 0);
    }
}
