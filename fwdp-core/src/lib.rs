use log::info;

pub mod cursor;
pub mod mbuf;
pub mod mempool;
pub mod pcct;
pub mod rxcb;

pub use cursor::PacketCursor;
pub use mbuf::{Packet, PktmbufPool};
pub use mempool::{AllocationError, Mempool, MempoolConfig};
pub use pcct::{
    CsEvicted, CsInsert, CsPayload, CsRecord, CsVariant, ExpiredPending, NameKey, NameResolver,
    Pcct, PcctConfig, PcctError, PitAttach, PitDownstream, PitRecord, SlotId, SlotState, Token,
};
pub use rxcb::{
    wrap_rx_cb, DispatchError, RawRxCallback, RxBurst, RxCallbackHandle, RxCallbackRegistry,
    RxHandler, RxLooper,
};

pub fn init() {
    info!("fwdp core initialized");
}
