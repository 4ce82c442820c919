use fwdp_common::FaceId;
use fwdp_core::PktmbufPool;
use log::{trace, warn};
use serde::Serialize;

use crate::face::FaceTable;
use crate::ndn::{self, NackReason, L3};

/// Every Nth producer reply omits the PIT token and is matched by name
const UNTOKENED_EVERY: u64 = 16;
/// Every Nth producer reply carries a token from another generation
const MANGLED_EVERY: u64 = 97;
/// Every Nth tokened Interest is refused with a Nack instead of answered
const NACK_EVERY: u64 = 53;

pub struct TrafficConfig {
    pub consumers: Vec<FaceId>,
    pub producer: FaceId,
    pub n_names: usize,
    pub lifetime_ms: u64,
    pub freshness_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TrafficStats {
    pub interests_sent: u64,
    pub data_served: u64,
    pub data_received: u64,
    pub nacks_served: u64,
    pub nacks_received: u64,
    pub untokened_replies: u64,
    pub mangled_tokens: u64,
}

/// Synthetic consumers and a producer attached to memory faces
pub struct TrafficGen {
    rng: fastrand::Rng,
    pool: PktmbufPool,
    config: TrafficConfig,
    stats: TrafficStats,
}

impl TrafficGen {
    pub fn new(config: TrafficConfig, pool: PktmbufPool, seed: u64) -> Self {
        Self {
            rng: fastrand::Rng::with_seed(seed),
            pool,
            config,
            stats: TrafficStats::default(),
        }
    }

    pub fn stats(&self) -> TrafficStats {
        self.stats
    }

    /// Inject `n` Interests for random names on random consumer faces
    pub fn send_interests(&mut self, faces: &FaceTable, n: usize) {
        if self.config.consumers.is_empty() {
            return;
        }
        for _ in 0..n {
            let face = self.config.consumers[self.rng.usize(..self.config.consumers.len())];
            let seq = self.rng.usize(..self.config.n_names).to_string();
            let name = ndn::encode_name(&["fwdp".as_bytes(), seq.as_bytes()]);
            let must_be_fresh = self.rng.u8(..8) == 0;
            let wire =
                ndn::encode_interest(&name, self.rng.u32(..), self.config.lifetime_ms, must_be_fresh);

            match self.pool.alloc_copy(&wire) {
                Ok(pkt) => {
                    faces.inject(face, pkt);
                    self.stats.interests_sent += 1;
                }
                Err(e) => {
                    warn!("traffic: cannot build Interest: {}", e);
                    return;
                }
            }
        }
    }

    /// Answer up to `max` Interests the forwarder sent to the producer
    pub fn serve(&mut self, faces: &FaceTable, max: usize) -> usize {
        let mut served = 0;
        for pkt in faces.take_tx(self.config.producer, max) {
            let decoded = match ndn::decode(&pkt) {
                Ok(decoded) => decoded,
                Err(e) => {
                    warn!("producer: undecodable Interest: {}", e);
                    continue;
                }
            };
            let L3::Interest(interest) = decoded.l3 else {
                continue;
            };

            let n = self.stats.data_served + self.stats.nacks_served + 1;
            if let (Some(token), 0) = (decoded.lp.pit_token, n % NACK_EVERY) {
                let interest_wire = ndn::encode_interest(
                    &interest.name,
                    interest.nonce,
                    interest.lifetime_ms,
                    interest.must_be_fresh,
                );
                let wire = ndn::encode_nack(Some(token), NackReason::NoRoute, &interest_wire);
                match self.pool.alloc_copy(&wire) {
                    Ok(reply) => {
                        faces.inject(self.config.producer, reply);
                        self.stats.nacks_served += 1;
                        served += 1;
                    }
                    Err(e) => warn!("producer: cannot build Nack: {}", e),
                }
                continue;
            }

            let token = match decoded.lp.pit_token {
                Some(_) if n % UNTOKENED_EVERY == 0 => {
                    self.stats.untokened_replies += 1;
                    None
                }
                Some(token) if n % MANGLED_EVERY == 0 => {
                    self.stats.mangled_tokens += 1;
                    Some(token ^ (1 << 32))
                }
                other => other,
            };

            let len = self.rng.usize(16..=1024);
            let content = vec![self.rng.u8(..); len];
            let data = ndn::encode_data(&interest.name, self.config.freshness_ms, &content);
            let wire = match token {
                Some(_) => ndn::encode_lp(token, &data),
                None => data,
            };
            match self.pool.alloc_copy(&wire) {
                Ok(reply) => {
                    trace!("producer: reply {} octets", wire.len());
                    faces.inject(self.config.producer, reply);
                    self.stats.data_served += 1;
                    served += 1;
                }
                Err(e) => warn!("producer: cannot build Data: {}", e),
            }
        }
        served
    }

    /// Drain Data and Nacks delivered to the consumers
    pub fn collect(&mut self, faces: &FaceTable, max: usize) -> usize {
        let mut received = 0;
        for &face in &self.config.consumers {
            for pkt in faces.take_tx(face, max) {
                let is_nack = matches!(ndn::decode(&pkt), Ok(d) if d.lp.nack.is_some());
                if is_nack {
                    self.stats.nacks_received += 1;
                } else {
                    self.stats.data_received += 1;
                }
                received += 1;
            }
        }
        received
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use fwdp_core::Packet;
    use parking_lot::Mutex;

    use super::*;

    fn setup() -> (TrafficGen, FaceTable) {
        let faces = FaceTable::new([FaceId(1), FaceId(2), FaceId(9)]);
        let traffic = TrafficGen::new(
            TrafficConfig {
                consumers: vec![FaceId(1), FaceId(2)],
                producer: FaceId(9),
                n_names: 10,
                lifetime_ms: 1_000,
                freshness_ms: 500,
            },
            PktmbufPool::new("traffic", 1024, 128).unwrap(),
            42,
        );
        (traffic, faces)
    }

    #[test]
    fn test_interests_land_on_consumer_faces() {
        let (mut traffic, faces) = setup();
        traffic.send_interests(&faces, 20);
        let rx = faces.face(FaceId(1)).unwrap().count_rx() + faces.face(FaceId(2)).unwrap().count_rx();
        assert_eq!(rx, 20);
        assert_eq!(faces.face(FaceId(9)).unwrap().count_rx(), 0);
        assert_eq!(traffic.stats().interests_sent, 20);
    }

    /// Packets the forwarder would receive from the producer
    fn producer_replies(faces: &FaceTable) -> Vec<Packet> {
        let got = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&got);
        let (cb, cbarg) = fwdp_core::wrap_rx_cb(move |_, burst| sink.lock().append(burst));
        faces.poll_once(usize::MAX, cb, cbarg);
        let mut got = got.lock();
        std::mem::take(&mut *got)
    }

    fn upstream_interest(traffic: &TrafficGen, faces: &FaceTable, seq: &str, token: u64) {
        let name = ndn::encode_name(&["fwdp", seq]);
        let interest = ndn::encode_interest(&name, 1, 1_000, false);
        let wire = ndn::encode_lp(Some(token), &interest);
        faces.send(FaceId(9), traffic.pool.alloc_copy(&wire).unwrap());
    }

    #[test]
    fn test_producer_echoes_token() {
        let (mut traffic, faces) = setup();
        upstream_interest(&traffic, &faces, "3", 0xABCD);
        assert_eq!(traffic.serve(&faces, 8), 1);

        let replies = producer_replies(&faces);
        assert_eq!(replies.len(), 1);
        let decoded = ndn::decode(&replies[0]).unwrap();
        assert_eq!(decoded.lp.pit_token, Some(0xABCD));
        match decoded.l3 {
            L3::Data(data) => {
                assert_eq!(data.name, ndn::encode_name(&["fwdp", "3"]));
                assert_eq!(data.freshness_ms, 500);
            }
            other => panic!("expected Data, got {:?}", other),
        }
    }

    #[test]
    fn test_some_replies_are_untokened() {
        let (mut traffic, faces) = setup();
        for i in 0..UNTOKENED_EVERY {
            upstream_interest(&traffic, &faces, &i.to_string(), i);
        }
        assert_eq!(traffic.serve(&faces, 64), UNTOKENED_EVERY as usize);

        let untokened = producer_replies(&faces)
            .iter()
            .filter(|pkt| ndn::decode(pkt).unwrap().lp.pit_token.is_none())
            .count();
        assert_eq!(untokened, 1);
        assert_eq!(traffic.stats().untokened_replies, 1);
    }

    #[test]
    fn test_some_interests_are_nacked() {
        let (mut traffic, faces) = setup();
        for i in 0..NACK_EVERY {
            upstream_interest(&traffic, &faces, &i.to_string(), 0x100 + i);
        }
        assert_eq!(traffic.serve(&faces, 64), NACK_EVERY as usize);

        let nacks: Vec<_> = producer_replies(&faces)
            .iter()
            .map(|pkt| ndn::decode(pkt).unwrap())
            .filter(|d| d.lp.nack.is_some())
            .collect();
        assert_eq!(nacks.len(), 1);
        assert_eq!(nacks[0].lp.nack, Some(NackReason::NoRoute));
        assert_eq!(nacks[0].lp.pit_token, Some(0x100 + NACK_EVERY - 1));
        assert_eq!(traffic.stats().nacks_served, 1);
        assert_eq!(traffic.stats().data_served, NACK_EVERY - 1);
    }

    #[test]
    fn test_collect_drains_consumers() {
        let (mut traffic, faces) = setup();
        faces.send(FaceId(1), traffic.pool.alloc_copy(b"d1").unwrap());
        faces.send(FaceId(2), traffic.pool.alloc_copy(b"d2").unwrap());
        assert_eq!(traffic.collect(&faces, 8), 2);
        assert_eq!(traffic.stats().data_received, 2);

        let interest = ndn::encode_interest(&ndn::encode_name(&["fwdp", "1"]), 5, 1_000, false);
        let nack = ndn::encode_nack(None, NackReason::Congestion, &interest);
        faces.send(FaceId(2), traffic.pool.alloc_copy(&nack).unwrap());
        assert_eq!(traffic.collect(&faces, 8), 1);
        assert_eq!(traffic.stats().nacks_received, 1);
        assert_eq!(traffic.stats().data_received, 2);
        assert_eq!(traffic.pool.count_in_use(), 0);
    }
}
