use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use fwdp_common::{FaceId, Timestamp};
use fwdp_core::{NameKey, Packet, Pcct, PcctConfig, PktmbufPool};

fn new_pcct(max_entries: usize) -> Pcct {
    let mp = PktmbufPool::new("bench-indirect", max_entries, 2048).unwrap();
    Pcct::new(
        PcctConfig {
            max_entries,
            cs_cap_direct: max_entries / 2,
            cs_cap_indirect: max_entries / 4,
            ..PcctConfig::default()
        },
        mp,
    )
    .unwrap()
}

fn benchmark_pcct(c: &mut Criterion) {
    c.bench_function("pcct_insert_pending_release", |b| {
        let mut pcct = new_pcct(4096);
        let mut key = 0u64;
        b.iter(|| {
            key = key.wrapping_add(1);
            let (slot, _) = pcct.find_or_insert(black_box(NameKey(key))).unwrap();
            pcct.attach_pending(slot, FaceId(1), key as u32, Timestamp::from_millis(4_000))
                .unwrap();
            pcct.release_pending(slot);
        })
    });

    c.bench_function("pcct_token_resolve", |b| {
        let mut pcct = new_pcct(1024);
        let (slot, _) = pcct.find_or_insert(NameKey(1)).unwrap();
        pcct.attach_pending(slot, FaceId(1), 1, Timestamp::from_millis(4_000))
            .unwrap();
        let token = pcct.issue_token(slot);
        b.iter(|| {
            let _ = pcct.resolve(black_box(token));
        })
    });

    c.bench_function("pcct_cache_direct_churn", |b| {
        let mut pcct = new_pcct(1024);
        let pkt = Packet::from_segments(vec![Bytes::from_static(&[0xAB; 128])]);
        let mut key = 0u64;
        b.iter(|| {
            key = key.wrapping_add(1);
            let (slot, _) = pcct.find_or_insert(NameKey(key)).unwrap();
            let _ = pcct.attach_cache(slot, black_box(&pkt), Timestamp::from_millis(1_000));
        })
    });

    c.bench_function("pcct_expire_deadlines", |b| {
        b.iter(|| {
            let mut pcct = new_pcct(256);
            for key in 0..256u64 {
                let (slot, _) = pcct.find_or_insert(NameKey(key)).unwrap();
                pcct.attach_pending(slot, FaceId(1), 0, Timestamp::from_millis(key))
                    .unwrap();
            }
            pcct.expire_deadlines(black_box(Timestamp::from_millis(1_000)), |_| {})
        })
    });
}

criterion_group!(benches, benchmark_pcct);
criterion_main!(benches);
