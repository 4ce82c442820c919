use std::sync::Arc;
use std::time::Instant;

use fwdp_common::{FaceId, FwdStats, PcctStats, Timestamp};
use fwdp_core::{
    CsPayload, NameKey, NameResolver, Packet, PacketCursor, Pcct, PcctError, PitAttach,
    PitDownstream, PktmbufPool, RxBurst, SlotId, Token,
};
use log::{debug, trace, warn};

use crate::face::FaceTable;
use crate::ndn::{self, Data, Decoded, Interest, NackReason, L3};

/// Cached records examined per expiry run and queue
const EXPIRE_CACHE_LIMIT: usize = 64;

/// Name bucket keys from a BLAKE3 digest of the encoded name
#[derive(Debug, Default, Clone, Copy)]
pub struct HashNameResolver;

impl NameResolver for HashNameResolver {
    fn resolve(&self, name: &[u8]) -> NameKey {
        let digest = blake3::hash(name);
        let mut key = [0u8; 8];
        key.copy_from_slice(&digest.as_bytes()[..8]);
        NameKey(u64::from_le_bytes(key))
    }
}

/// Monotonic clock producing [`Timestamp`]s
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    start: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn now(&self) -> Timestamp {
        Timestamp(self.start.elapsed().as_nanos() as u64)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

pub struct WorkerConfig {
    /// Face Interests are forwarded to
    pub upstream: FaceId,
    pub pit_lifetime_ms: u64,
    pub expire_interval_ms: u64,
}

/// Forwarding worker owning one PCCT.
///
/// Interests are answered from the CS or recorded in the PIT and sent
/// upstream with a PIT token. Data coming back carrying that token is
/// matched by token; Data without one is matched by name. Upstream Nacks are
/// matched by token only. An Interest the PIT cannot take is Nacked back to
/// its downstream.
pub struct FwdWorker<R = HashNameResolver> {
    pcct: Pcct,
    names: R,
    faces: Arc<FaceTable>,
    pool: PktmbufPool,
    clock: Clock,
    config: WorkerConfig,
    last_expire: Timestamp,
    stats: FwdStats,
}

impl<R: NameResolver> FwdWorker<R> {
    pub fn new(
        pcct: Pcct,
        names: R,
        faces: Arc<FaceTable>,
        pool: PktmbufPool,
        clock: Clock,
        config: WorkerConfig,
    ) -> Self {
        Self {
            pcct,
            names,
            faces,
            pool,
            last_expire: clock.now(),
            clock,
            config,
            stats: FwdStats::new(),
        }
    }

    pub fn stats(&self) -> FwdStats {
        self.stats
    }

    pub fn pcct_stats(&self) -> PcctStats {
        self.pcct.stats()
    }

    pub fn pcct(&self) -> &Pcct {
        &self.pcct
    }

    /// Process one receive burst, consuming its packets
    pub fn on_burst(&mut self, face: FaceId, burst: &mut RxBurst) {
        let now = self.clock.now();
        self.stats.bursts += 1;
        for pkt in burst.drain(..) {
            match ndn::decode(&pkt) {
                Ok(decoded) => self.on_packet(face, &pkt, decoded, now),
                Err(e) => {
                    self.stats.parse_errors += 1;
                    debug!("{}: drop undecodable packet: {}", face, e);
                }
            }
        }

        let interval = Timestamp::from_millis(self.config.expire_interval_ms).as_nanos();
        if now.saturating_since(self.last_expire) >= interval {
            self.expire(now);
        }
    }

    fn on_packet(&mut self, face: FaceId, pkt: &Packet, decoded: Decoded, now: Timestamp) {
        match (&decoded.l3, decoded.lp.nack) {
            (L3::Interest(interest), Some(reason)) => {
                self.on_nack(face, &decoded, interest, reason, now)
            }
            (L3::Interest(interest), None) => self.on_interest(face, pkt, &decoded, interest, now),
            (L3::Data(data), _) => self.on_data(face, pkt, &decoded, data, now),
        }
    }

    fn on_interest(
        &mut self,
        face: FaceId,
        pkt: &Packet,
        decoded: &Decoded,
        interest: &Interest,
        now: Timestamp,
    ) {
        self.stats.interests += 1;
        let key = self.names.resolve(&interest.name);

        if let Some(slot) = self.pcct.find(key) {
            if self.answer_from_cache(face, slot, interest.must_be_fresh, now) {
                self.stats.cs_hits += 1;
                return;
            }
        }

        let slot = match self.pcct.find_or_insert(key) {
            Ok((slot, _)) => slot,
            Err(e) => {
                if e == PcctError::TableFull {
                    self.stats.table_full_drops += 1;
                }
                debug!("{}: refuse Interest {}: {}", face, ndn::name_to_uri(&interest.name), e);
                self.send_nack(face, pkt, decoded, NackReason::Congestion);
                return;
            }
        };

        let lifetime = interest.lifetime_ms.min(self.config.pit_lifetime_ms);
        match self
            .pcct
            .attach_pending(slot, face, interest.nonce, now.add_millis(lifetime))
        {
            Ok(PitAttach::Inserted) => self.forward_interest(slot, pkt, decoded),
            Ok(PitAttach::Aggregated) => {
                trace!("{}: aggregated {}", face, ndn::name_to_uri(&interest.name));
            }
            Ok(PitAttach::DuplicateAggregation) => {
                self.stats.duplicates += 1;
                debug!(
                    "{}: duplicate nonce {:08x} for {}",
                    face,
                    interest.nonce,
                    ndn::name_to_uri(&interest.name)
                );
            }
            Err(e) => {
                debug!("{}: refuse Interest: {}", face, e);
                self.send_nack(face, pkt, decoded, NackReason::Congestion);
            }
        }
    }

    /// Send the cached record on `slot` to `face`, if there is a usable one
    fn answer_from_cache(
        &self,
        face: FaceId,
        slot: SlotId,
        must_be_fresh: bool,
        now: Timestamp,
    ) -> bool {
        let Some(cs) = self.pcct.cached(slot) else {
            return false;
        };
        if must_be_fresh && !cs.is_fresh(now) {
            return false;
        }
        let reply = match cs.payload() {
            CsPayload::Direct(bytes) => self.pool.alloc_copy(bytes),
            CsPayload::Indirect(cached) => cached.cursor().clone_range(cached.len(), &self.pool),
        };
        match reply {
            Ok(reply) => self.faces.send(face, reply),
            Err(e) => {
                warn!("{}: cannot answer from cache: {}", face, e);
                false
            }
        }
    }

    fn forward_interest(&mut self, slot: SlotId, pkt: &Packet, decoded: &Decoded) {
        let token = self.pcct.issue_token(slot);
        let wire = ndn::encode_lp(Some(token.as_u64()), &l3_bytes(pkt, decoded));

        match self.pool.alloc_copy(&wire) {
            Ok(out) => {
                trace!("forward upstream with token {}", token);
                self.faces.send(self.config.upstream, out);
            }
            Err(e) => {
                warn!("drop outgoing Interest: {}", e);
                self.pcct.release_pending(slot);
            }
        }
    }

    fn on_data(
        &mut self,
        face: FaceId,
        pkt: &Packet,
        decoded: &Decoded,
        data: &Data,
        now: Timestamp,
    ) {
        self.stats.data += 1;
        let key = self.names.resolve(&data.name);

        let slot = match decoded.lp.pit_token {
            Some(raw) => match self.dispatch_token(face, raw, key) {
                Some(slot) => slot,
                None => return,
            },
            None => {
                self.stats.n_name_disp += 1;
                match self.pcct.find(key) {
                    Some(slot) => slot,
                    None => {
                        self.stats.unsolicited += 1;
                        trace!("{}: unsolicited {}", face, ndn::name_to_uri(&data.name));
                        return;
                    }
                }
            }
        };

        let downstreams: Vec<PitDownstream> = self.pcct.resolve_pending(slot).to_vec();
        if downstreams.is_empty() {
            self.stats.unsolicited += 1;
            return;
        }

        let l3 = match decoded.l3_cursor(pkt).clone_range(decoded.l3_len, &self.pool) {
            Ok(l3) => l3,
            Err(e) => {
                warn!("{}: drop Data: {}", face, e);
                return;
            }
        };

        for dn in downstreams.iter().filter(|dn| dn.expiry > now) {
            if let Err(e) = self.send_copy(dn.face, &l3) {
                warn!("{}: cannot deliver Data: {}", dn.face, e);
            }
        }

        let freshness = now.add_millis(data.freshness_ms);
        match self.pcct.attach_cache(slot, &l3, freshness) {
            Ok(res) => {
                if let Some(evicted) = res.evicted {
                    trace!("cs evicted {} ({})", evicted.key, evicted.variant);
                }
            }
            Err(e) => warn!("cannot cache Data: {}", e),
        }
        self.pcct.release_pending(slot);
    }

    /// Relay an upstream Nack to every downstream of the record its token names
    fn on_nack(
        &mut self,
        face: FaceId,
        decoded: &Decoded,
        interest: &Interest,
        reason: NackReason,
        now: Timestamp,
    ) {
        self.stats.nacks += 1;
        let Some(raw) = decoded.lp.pit_token else {
            self.stats.unsolicited += 1;
            debug!("{}: drop Nack without PIT token", face);
            return;
        };
        let key = self.names.resolve(&interest.name);
        let Some(slot) = self.dispatch_token(face, raw, key) else {
            return;
        };

        let downstreams: Vec<PitDownstream> = self.pcct.resolve_pending(slot).to_vec();
        if downstreams.is_empty() {
            self.stats.unsolicited += 1;
            return;
        }
        for dn in downstreams.iter().filter(|dn| dn.expiry > now) {
            let lifetime_ms = dn.expiry.saturating_since(now) / 1_000_000;
            let l3 = ndn::encode_interest(
                &interest.name,
                dn.nonce,
                lifetime_ms,
                interest.must_be_fresh,
            );
            self.transmit_nack(dn.face, &ndn::encode_nack(None, reason, &l3));
        }
        debug!(
            "{}: Nack~{:?} for {} relayed to {} downstreams",
            face,
            reason,
            ndn::name_to_uri(&interest.name),
            downstreams.len()
        );
        self.pcct.release_pending(slot);
    }

    /// Slot named by a PIT token, provided it still holds `key`
    fn dispatch_token(&mut self, face: FaceId, raw: u64, key: NameKey) -> Option<SlotId> {
        self.stats.n_token_disp += 1;
        match self.pcct.resolve(Token::from_u64(raw)) {
            Ok(slot) if self.pcct.key(slot) == Some(key) => Some(slot),
            Ok(_) | Err(PcctError::StaleToken(_)) => {
                self.stats.n_bad_token += 1;
                debug!("{}: drop packet with bad token {:016x}", face, raw);
                None
            }
            Err(e) => {
                warn!("{}: token lookup failed: {}", face, e);
                None
            }
        }
    }

    /// Refuse the Interest in `pkt`, echoing the downstream's PIT token
    fn send_nack(&mut self, face: FaceId, pkt: &Packet, decoded: &Decoded, reason: NackReason) {
        let wire = ndn::encode_nack(decoded.lp.pit_token, reason, &l3_bytes(pkt, decoded));
        self.transmit_nack(face, &wire);
    }

    fn transmit_nack(&mut self, face: FaceId, wire: &[u8]) {
        match self.pool.alloc_copy(wire) {
            Ok(out) => {
                self.faces.send(face, out);
                self.stats.nacks_sent += 1;
            }
            Err(e) => warn!("{}: cannot send Nack: {}", face, e),
        }
    }

    fn send_copy(&self, face: FaceId, l3: &Packet) -> Result<(), fwdp_core::AllocationError> {
        let mut c = PacketCursor::begin(l3);
        let out = c.clone_range(l3.len(), &self.pool)?;
        self.faces.send(face, out);
        Ok(())
    }

    /// Drop expired pending records and stale cached records
    pub fn expire(&mut self, now: Timestamp) {
        let expired = self.pcct.expire_deadlines(now, |e| {
            trace!(
                "pending {} expired with {} downstreams",
                e.key,
                e.record.downstreams().len()
            );
        });
        let stale = self.pcct.expire_cache(now, EXPIRE_CACHE_LIMIT);
        if expired > 0 || stale > 0 {
            debug!("expiry: {} pending, {} cached; {}", expired, stale, self.pcct);
        }
        self.last_expire = now;
    }
}

/// The Interest or Data TLV of `pkt`, copied out
fn l3_bytes(pkt: &Packet, decoded: &Decoded) -> Vec<u8> {
    let mut l3 = vec![0u8; decoded.l3_len];
    decoded.l3_cursor(pkt).read_into(&mut l3);
    l3
}
