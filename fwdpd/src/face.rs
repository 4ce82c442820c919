use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use fwdp_common::FaceId;
use fwdp_core::{Packet, RawRxCallback, RxBurst, RxLooper};
use log::{debug, info};
use parking_lot::Mutex;

/// In-memory face: an RX queue filled by a traffic source and a TX queue
/// filled by the forwarder
pub struct MemFace {
    id: FaceId,
    rx: Mutex<VecDeque<Packet>>,
    tx: Mutex<VecDeque<Packet>>,
    n_rx: AtomicU64,
    n_tx: AtomicU64,
}

impl MemFace {
    fn new(id: FaceId) -> Self {
        Self {
            id,
            rx: Mutex::new(VecDeque::new()),
            tx: Mutex::new(VecDeque::new()),
            n_rx: AtomicU64::new(0),
            n_tx: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> FaceId {
        self.id
    }

    pub fn count_rx(&self) -> u64 {
        self.n_rx.load(Ordering::Relaxed)
    }

    pub fn count_tx(&self) -> u64 {
        self.n_tx.load(Ordering::Relaxed)
    }
}

/// Set of memory faces polled by one receive loop
pub struct FaceTable {
    faces: Vec<MemFace>,
    stopped: AtomicBool,
    idle_sleep: Duration,
}

impl FaceTable {
    pub fn new<I>(ids: I) -> Self
    where
        I: IntoIterator<Item = FaceId>,
    {
        Self {
            faces: ids.into_iter().map(MemFace::new).collect(),
            stopped: AtomicBool::new(false),
            idle_sleep: Duration::from_millis(1),
        }
    }

    pub fn face(&self, id: FaceId) -> Option<&MemFace> {
        self.faces.iter().find(|f| f.id == id)
    }

    /// Queue a packet as if it arrived on `id`. Returns false for an unknown face.
    pub fn inject(&self, id: FaceId, pkt: Packet) -> bool {
        let Some(face) = self.face(id) else {
            return false;
        };
        face.rx.lock().push_back(pkt);
        face.n_rx.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Transmit a packet out of `id`. Returns false for an unknown face.
    pub fn send(&self, id: FaceId, pkt: Packet) -> bool {
        let Some(face) = self.face(id) else {
            return false;
        };
        face.tx.lock().push_back(pkt);
        face.n_tx.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Take up to `max` transmitted packets from `id`
    pub fn take_tx(&self, id: FaceId, max: usize) -> Vec<Packet> {
        let Some(face) = self.face(id) else {
            return Vec::new();
        };
        let mut tx = face.tx.lock();
        let n = max.min(tx.len());
        tx.drain(..n).collect()
    }

    /// Poll every face once, handing each non-empty burst to `cb`.
    /// Returns the number of packets delivered.
    pub fn poll_once(&self, burst_size: usize, cb: RawRxCallback, cbarg: usize) -> usize {
        let mut delivered = 0;
        for face in &self.faces {
            let mut burst: RxBurst = {
                let mut rx = face.rx.lock();
                let n = burst_size.min(rx.len());
                rx.drain(..n).collect()
            };
            if burst.is_empty() {
                continue;
            }
            delivered += burst.len();
            cb(face.id, &mut burst, cbarg);
        }
        delivered
    }
}

impl RxLooper for FaceTable {
    fn rx_loop(&self, burst_size: usize, cb: RawRxCallback, cbarg: usize) {
        info!(
            "rx loop started on {} faces, burst_size={}",
            self.faces.len(),
            burst_size
        );
        while !self.stopped.load(Ordering::Acquire) {
            if self.poll_once(burst_size, cb, cbarg) == 0 {
                thread::sleep(self.idle_sleep);
            }
        }
        debug!("rx loop stopped");
    }

    fn stop_rx_loop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    fn list_faces(&self) -> Vec<FaceId> {
        self.faces.iter().map(|f| f.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;

    use super::*;

    fn pkt(b: &'static [u8]) -> Packet {
        Packet::from_segments(vec![Bytes::from_static(b)])
    }

    #[test]
    fn test_inject_and_send() {
        let faces = FaceTable::new([FaceId(1), FaceId(2)]);
        assert!(faces.inject(FaceId(1), pkt(b"x")));
        assert!(!faces.inject(FaceId(9), pkt(b"x")));
        assert!(faces.send(FaceId(2), pkt(b"a")));
        assert!(faces.send(FaceId(2), pkt(b"b")));

        let out = faces.take_tx(FaceId(2), 1);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].to_vec(), b"a");
        assert_eq!(faces.take_tx(FaceId(2), 10).len(), 1);
        assert_eq!(faces.face(FaceId(1)).unwrap().count_rx(), 1);
        assert_eq!(faces.face(FaceId(2)).unwrap().count_tx(), 2);
        assert_eq!(faces.list_faces(), vec![FaceId(1), FaceId(2)]);
    }

    #[test]
    fn test_poll_respects_burst_size() {
        let faces = FaceTable::new([FaceId(1)]);
        for _ in 0..5 {
            faces.inject(FaceId(1), pkt(b"p"));
        }
        let counter = Arc::new(AtomicU64::new(0));
        let sink = Arc::clone(&counter);
        let (cb, cbarg) = fwdp_core::wrap_rx_cb(move |_, burst| {
            sink.fetch_add(burst.len() as u64, Ordering::Relaxed);
            burst.clear();
        });
        assert_eq!(faces.poll_once(2, cb, cbarg), 2);
        assert_eq!(faces.poll_once(2, cb, cbarg), 2);
        assert_eq!(faces.poll_once(2, cb, cbarg), 1);
        assert_eq!(faces.poll_once(2, cb, cbarg), 0);
        assert_eq!(counter.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn test_rx_loop_stops() {
        let faces = Arc::new(FaceTable::new([FaceId(1)]));
        let looper = Arc::clone(&faces);
        let (cb, cbarg) = fwdp_core::wrap_rx_cb(|_, burst| burst.clear());
        let handle = thread::spawn(move || looper.rx_loop(4, cb, cbarg));
        faces.inject(FaceId(1), pkt(b"p"));
        faces.stop_rx_loop();
        handle.join().unwrap();
    }
}
