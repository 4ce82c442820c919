use std::collections::HashMap;

use bytes::Bytes;
use fwdp_common::{FaceId, NumaSocket, Timestamp};
use fwdp_core::{
    CsEvicted, CsVariant, NameKey, NameResolver, Packet, Pcct, PcctConfig, PcctError,
    PitAttach, PitDownstream, PktmbufPool, SlotState,
};

/// Stand-in for the name trie: hands out keys in first-seen order
#[derive(Default)]
struct SeqResolver {
    keys: std::cell::RefCell<HashMap<Vec<u8>, u64>>,
}

impl NameResolver for SeqResolver {
    fn resolve(&self, name: &[u8]) -> NameKey {
        let mut keys = self.keys.borrow_mut();
        let next = keys.len() as u64 + 1;
        NameKey(*keys.entry(name.to_vec()).or_insert(next))
    }
}

fn small_table() -> Pcct {
    let _ = env_logger::builder().is_test(true).try_init();
    let mp = PktmbufPool::new("scenario-indirect", 8, 2048).unwrap();
    Pcct::new(
        PcctConfig {
            max_entries: 4,
            cs_cap_direct: 1,
            cs_cap_indirect: 1,
            cs_inline_threshold: 64,
            socket: NumaSocket::Any,
        },
        mp,
    )
    .unwrap()
}

fn data(payload: &'static [u8]) -> Packet {
    Packet::from_segments(vec![Bytes::from_static(payload)])
}

#[test]
fn test_pending_answered_then_evicted() {
    let names = SeqResolver::default();
    let mut pcct = small_table();
    let now = Timestamp::from_millis(10_000);
    let nonce = 0x1234_5678;

    let a = names.resolve(b"/a");
    let (slot_a, existed) = pcct.find_or_insert(a).unwrap();
    assert!(!existed);
    assert_eq!(
        pcct.attach_pending(slot_a, FaceId(1), nonce, now.add_millis(4_000)),
        Ok(PitAttach::Inserted)
    );
    assert_eq!(pcct.state(slot_a), SlotState::PendingOnly);

    let res = pcct
        .attach_cache(slot_a, &data(b"payload-a"), now.add_millis(1_000))
        .unwrap();
    assert_eq!(res.variant, CsVariant::Direct);
    assert_eq!(res.evicted, None);
    assert_eq!(pcct.state(slot_a), SlotState::Both);

    let dns: Vec<(FaceId, u32)> = pcct
        .resolve_pending(slot_a)
        .iter()
        .map(|dn: &PitDownstream| (dn.face, dn.nonce))
        .collect();
    assert_eq!(dns, vec![(FaceId(1), nonce)]);

    assert!(pcct.release_pending(slot_a));
    assert_eq!(pcct.state(slot_a), SlotState::CachedOnly);
    assert_eq!(
        pcct.cached(slot_a).unwrap().payload().to_vec(),
        b"payload-a".to_vec()
    );

    let b = names.resolve(b"/b");
    let (slot_b, _) = pcct.find_or_insert(b).unwrap();
    let res = pcct
        .attach_cache(slot_b, &data(b"payload-b"), now.add_millis(1_000))
        .unwrap();
    assert_eq!(
        res.evicted,
        Some(CsEvicted {
            key: a,
            variant: CsVariant::Direct
        })
    );
    assert_eq!(pcct.state(slot_b), SlotState::CachedOnly);
    assert_eq!(pcct.find(a), None);
    assert_eq!(pcct.find(b), Some(slot_b));
    assert_eq!(pcct.len(), 1);
}

#[test]
fn test_tokens_fail_closed_across_reuse() {
    let mut pcct = small_table();
    let deadline = Timestamp::from_millis(500);

    let mut tokens = Vec::new();
    for round in 0..3u64 {
        let (slot, _) = pcct.find_or_insert(NameKey(100 + round)).unwrap();
        pcct.attach_pending(slot, FaceId(2), round as u32, deadline)
            .unwrap();
        let token = pcct.issue_token(slot);
        assert_eq!(pcct.resolve(token), Ok(slot));
        tokens.push(token);

        let mut expired = 0;
        pcct.expire_deadlines(deadline, |e| {
            assert_eq!(e.token, token);
            expired += 1;
        });
        assert_eq!(expired, 1);
    }

    // All three rounds used the same slot; only the generation changed.
    assert!(tokens.windows(2).all(|w| w[0].index() == w[1].index()));
    for token in tokens {
        assert_eq!(pcct.resolve(token), Err(PcctError::StaleToken(token)));
    }
    assert!(pcct.is_empty());
}

#[test]
fn test_full_table_keeps_pending_records() {
    let mut pcct = small_table();
    let deadline = Timestamp::from_millis(4_000);
    let mut slots = Vec::new();
    for k in 1..=4 {
        let (slot, _) = pcct.find_or_insert(NameKey(k)).unwrap();
        pcct.attach_pending(slot, FaceId(k as u16), 0, deadline)
            .unwrap();
        slots.push(slot);
    }

    assert_eq!(pcct.find_or_insert(NameKey(5)), Err(PcctError::TableFull));
    assert_eq!(pcct.count_pending(), 4);
    for (i, slot) in slots.iter().enumerate() {
        assert_eq!(pcct.state(*slot), SlotState::PendingOnly);
        assert_eq!(pcct.resolve_pending(*slot)[0].face, FaceId(i as u16 + 1));
    }

    // An existing name still aggregates while the table is full.
    assert_eq!(
        pcct.attach_pending(slots[0], FaceId(9), 1, deadline),
        Ok(PitAttach::Aggregated)
    );
}

#[test]
fn test_indirect_payload_outlives_table() {
    let mp = PktmbufPool::new("outlive", 4, 2048).unwrap();
    let mut pcct = Pcct::new(
        PcctConfig {
            max_entries: 2,
            cs_cap_direct: 1,
            cs_cap_indirect: 1,
            cs_inline_threshold: 4,
            socket: NumaSocket::Any,
        },
        mp.clone(),
    )
    .unwrap();

    let original = Packet::from_segments(vec![
        Bytes::from_static(b"first-"),
        Bytes::from_static(b"second"),
    ]);
    let (slot, _) = pcct.find_or_insert(NameKey(1)).unwrap();
    pcct.attach_cache(slot, &original, Timestamp::from_millis(1))
        .unwrap();
    assert_eq!(mp.count_in_use(), 1);

    drop(pcct);
    assert_eq!(mp.count_in_use(), 0);
    assert_eq!(original.to_vec(), b"first-second".to_vec());
}
