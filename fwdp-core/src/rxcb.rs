//! Receive dispatch bridge.
//!
//! A receive loop stores a plain function pointer and an integer argument
//! per face. Handlers are registered once into an append-only table and the
//! integer is an index into it, so the loop never holds a reference into
//! handler state.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use fwdp_common::FaceId;
use log::{debug, warn};
use parking_lot::RwLock;

use crate::mbuf::Packet;

/// Packets handed over by one receive poll
pub type RxBurst = Vec<Packet>;

/// Burst handler. The handler may drain the burst; whatever it leaves is dropped.
pub type RxHandler = Arc<dyn Fn(FaceId, &mut RxBurst) + Send + Sync>;

/// Callback shape stored by a receive loop
pub type RawRxCallback = fn(FaceId, &mut RxBurst, usize);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("no rx callback registered under handle {0}")]
    UnknownHandle(usize),
}

/// Index of a registered handler. Never reassigned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RxCallbackHandle(usize);

impl RxCallbackHandle {
    pub fn from_raw(raw: usize) -> Self {
        RxCallbackHandle(raw)
    }

    pub fn as_raw(self) -> usize {
        self.0
    }
}

impl fmt::Display for RxCallbackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rxcb#{}", self.0)
    }
}

/// Append-only table of burst handlers
#[derive(Default)]
pub struct RxCallbackRegistry {
    handlers: RwLock<Vec<RxHandler>>,
    dispatched: AtomicU64,
    unknown: AtomicU64,
}

impl RxCallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, handler: F) -> RxCallbackHandle
    where
        F: Fn(FaceId, &mut RxBurst) + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.write();
        handlers.push(Arc::new(handler));
        let handle = RxCallbackHandle(handlers.len() - 1);
        debug!("registered {}", handle);
        handle
    }

    /// Run the handler registered under `handle` on the calling thread.
    ///
    /// The registry lock is released before the handler runs, so a handler
    /// may itself register or dispatch.
    pub fn dispatch(
        &self,
        handle: RxCallbackHandle,
        face: FaceId,
        burst: &mut RxBurst,
    ) -> Result<(), DispatchError> {
        let handler = {
            // Readers do not queue behind a waiting writer.
            let handlers = self.handlers.read_recursive();
            handlers.get(handle.0).cloned()
        };
        let Some(handler) = handler else {
            self.unknown.fetch_add(1, Ordering::Relaxed);
            return Err(DispatchError::UnknownHandle(handle.0));
        };
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        handler(face, burst);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.handlers.read_recursive().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count_dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    pub fn count_unknown(&self) -> u64 {
        self.unknown.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for RxCallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RxCallbackRegistry")
            .field("handlers", &self.len())
            .field("dispatched", &self.count_dispatched())
            .field("unknown", &self.count_unknown())
            .finish()
    }
}

/// Process-wide registry used by [`wrap_rx_cb`]
pub fn global() -> &'static RxCallbackRegistry {
    static REGISTRY: OnceLock<RxCallbackRegistry> = OnceLock::new();
    REGISTRY.get_or_init(RxCallbackRegistry::new)
}

fn rx_trampoline(face: FaceId, burst: &mut RxBurst, cbarg: usize) {
    if let Err(e) = global().dispatch(RxCallbackHandle(cbarg), face, burst) {
        warn!("{}: dropping {} packets from {}", e, burst.len(), face);
        burst.clear();
    }
}

/// Register `handler` globally and return the callback pair a receive loop stores
pub fn wrap_rx_cb<F>(handler: F) -> (RawRxCallback, usize)
where
    F: Fn(FaceId, &mut RxBurst) + Send + Sync + 'static,
{
    let handle = global().register(handler);
    (rx_trampoline, handle.as_raw())
}

/// A receive loop that polls faces and hands bursts to a stored callback
pub trait RxLooper: Send + Sync {
    /// Poll until [`stop_rx_loop`](RxLooper::stop_rx_loop) is called,
    /// delivering at most `burst_size` packets per callback
    fn rx_loop(&self, burst_size: usize, cb: RawRxCallback, cbarg: usize);

    fn stop_rx_loop(&self);

    fn list_faces(&self) -> Vec<FaceId>;
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::thread;

    use bytes::Bytes;
    use parking_lot::Mutex;

    use super::*;

    fn burst(n: usize) -> RxBurst {
        (0..n)
            .map(|_| Packet::from_segments(vec![Bytes::from_static(b"pkt")]))
            .collect()
    }

    #[test]
    fn test_register_and_dispatch() {
        let reg = RxCallbackRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_a = Arc::clone(&seen);
        let a = reg.register(move |face, burst| seen_a.lock().push(("a", face, burst.len())));
        let seen_b = Arc::clone(&seen);
        let b = reg.register(move |face, burst| {
            seen_b.lock().push(("b", face, burst.len()));
            burst.clear();
        });
        assert_ne!(a, b);
        assert_eq!(reg.len(), 2);

        let mut pkts = burst(3);
        reg.dispatch(b, FaceId(7), &mut pkts).unwrap();
        assert!(pkts.is_empty());
        let mut pkts = burst(1);
        reg.dispatch(a, FaceId(2), &mut pkts).unwrap();

        assert_eq!(
            *seen.lock(),
            vec![("b", FaceId(7), 3), ("a", FaceId(2), 1)]
        );
        assert_eq!(reg.count_dispatched(), 2);
    }

    #[test]
    fn test_unknown_handle() {
        let reg = RxCallbackRegistry::new();
        let mut pkts = burst(2);
        assert_eq!(
            reg.dispatch(RxCallbackHandle::from_raw(5), FaceId(1), &mut pkts),
            Err(DispatchError::UnknownHandle(5))
        );
        assert_eq!(pkts.len(), 2);
        assert_eq!(reg.count_unknown(), 1);
    }

    #[test]
    fn test_handler_may_register() {
        let reg = Arc::new(RxCallbackRegistry::new());
        let inner = Arc::clone(&reg);
        let h = reg.register(move |_, _| {
            inner.register(|_, _| {});
        });
        reg.dispatch(h, FaceId(1), &mut burst(0)).unwrap();
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn test_concurrent_register_and_dispatch() {
        let reg = Arc::new(RxCallbackRegistry::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let first = reg.register(move |_, burst| {
            counter.fetch_add(burst.len(), Ordering::Relaxed);
        });

        let stop = Arc::new(AtomicBool::new(false));
        let writer = {
            let reg = Arc::clone(&reg);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut handles = Vec::new();
                while !stop.load(Ordering::Relaxed) && handles.len() < 1_000 {
                    handles.push(reg.register(|_, _| {}));
                }
                handles
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let reg = Arc::clone(&reg);
                thread::spawn(move || {
                    for _ in 0..1_000 {
                        reg.dispatch(first, FaceId(1), &mut burst(1)).unwrap();
                    }
                })
            })
            .collect();
        for r in readers {
            r.join().unwrap();
        }
        stop.store(true, Ordering::Relaxed);
        let handles = writer.join().unwrap();

        assert_eq!(hits.load(Ordering::Relaxed), 4_000);
        // Handles are dense and never reassigned.
        for (i, h) in handles.iter().enumerate() {
            assert_eq!(h.as_raw(), i + 1);
        }
    }

    struct OneShotLooper {
        stopped: AtomicBool,
    }

    impl RxLooper for OneShotLooper {
        fn rx_loop(&self, burst_size: usize, cb: RawRxCallback, cbarg: usize) {
            let mut pkts = burst(burst_size);
            cb(FaceId(3), &mut pkts, cbarg);
            self.stop_rx_loop();
        }

        fn stop_rx_loop(&self) {
            self.stopped.store(true, Ordering::Release);
        }

        fn list_faces(&self) -> Vec<FaceId> {
            vec![FaceId(3)]
        }
    }

    #[test]
    fn test_wrap_rx_cb_trampoline() {
        let got = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&got);
        let (cb, cbarg) = wrap_rx_cb(move |face, burst| {
            assert_eq!(face, FaceId(3));
            sink.fetch_add(burst.len(), Ordering::Relaxed);
        });

        let looper = OneShotLooper {
            stopped: AtomicBool::new(false),
        };
        looper.rx_loop(4, cb, cbarg);
        assert_eq!(got.load(Ordering::Relaxed), 4);
        assert!(looper.stopped.load(Ordering::Acquire));
        assert_eq!(looper.list_faces(), vec![FaceId(3)]);
    }

    #[test]
    fn test_trampoline_drops_unknown() {
        let mut pkts = burst(2);
        let before = global().count_unknown();
        rx_trampoline(FaceId(1), &mut pkts, usize::MAX);
        assert!(pkts.is_empty());
        assert!(global().count_unknown() > before);
    }
}
