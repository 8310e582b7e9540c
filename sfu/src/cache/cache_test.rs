use bytes::Bytes;

use super::*;

fn payload(i: u16) -> Bytes {
    Bytes::copy_from_slice(&i.to_be_bytes())
}

#[test]
fn test_s1_cache_overflow() {
    let mut cache = PacketCache::new(16);
    for i in 0..32u16 {
        cache.store(i, i as u32, false, false, payload(i)).unwrap();
    }

    for i in 0..16u16 {
        assert!(cache.get(i).is_none(), "seqno {i} should be evicted");
    }
    for i in 16..32u16 {
        assert_eq!(cache.get(i), Some(payload(i)));
    }

    let stats = cache.stats(false);
    assert_eq!(stats.received, 32);
    assert_eq!(stats.expected, 32);
}

#[test]
fn test_s2_loss_and_recovery() {
    let mut cache = PacketCache::new(128);
    for i in 0..32u16 {
        if i == 8 || i == 10 {
            continue;
        }
        cache.store(i, 0, false, false, payload(i)).unwrap();
    }

    let stats = cache.stats(false);
    assert_eq!(stats.received, 30);
    assert_eq!(stats.expected, 32);
    assert_eq!(stats.extended_last_seqno, 31);

    cache.store(8, 0, false, false, payload(8)).unwrap();
    cache.store(10, 0, false, false, payload(10)).unwrap();

    let stats = cache.stats(false);
    assert_eq!(stats.received, 32);
    assert_eq!(stats.expected, 32);
}

#[test]
fn test_s3_nack_accounting() {
    let mut cache = PacketCache::new(128);
    for i in 0..32u16 {
        if i == 8 || i == 10 {
            continue;
        }
        cache.store(i, 0, false, false, payload(i)).unwrap();
    }

    cache.expect(2);
    cache.store(8, 0, false, false, payload(8)).unwrap();
    cache.store(10, 0, false, false, payload(10)).unwrap();

    let stats = cache.stats(false);
    assert_eq!(stats.received, 32);
    assert_eq!(stats.expected, 34);
}

#[test]
fn test_s7_keyframe_assembly() {
    let mut cache = PacketCache::new(128);
    cache.store(7, 57, true, false, payload(7)).unwrap();
    cache.store(8, 57, false, true, payload(8)).unwrap();

    let (ts, complete, seqnos) = cache.keyframe();
    assert_eq!(ts, 57);
    assert!(complete);
    assert_eq!(seqnos, vec![7, 8]);

    for i in 0..32u16 {
        cache
            .store(100 + i, 999, false, false, payload(100 + i))
            .unwrap();
    }

    let (ts, complete, _) = cache.keyframe();
    assert_eq!(ts, 57);
    assert!(complete);
    assert_eq!(cache.get(7), Some(payload(7)));
    assert_eq!(cache.get(8), Some(payload(8)));
}

#[test]
fn test_s7_keyframe_survives_small_ring_eviction() {
    // Capacity 24 (audio-sized), well below the 34 packets that follow
    // the keyframe -- the keyframe buffer, not the ring, must keep it.
    let mut cache = PacketCache::new(24);
    cache.store(7, 57, true, false, payload(7)).unwrap();
    cache.store(8, 57, false, true, payload(8)).unwrap();

    for i in 0..34u16 {
        cache.store(100 + i, 999, false, false, payload(100 + i)).unwrap();
    }

    let (ts, complete, seqnos) = cache.keyframe();
    assert_eq!(ts, 57);
    assert!(complete);
    assert_eq!(seqnos, vec![7, 8]);
    assert_eq!(cache.get(7), Some(payload(7)));
    assert_eq!(cache.get(8), Some(payload(8)));
}

#[test]
fn test_complete_keyframe_gap_fills_from_ring() {
    let mut cache = PacketCache::new(128);
    // Reordering delivers 8 before the start packet (7) is recognized;
    // insert() drops it (nothing started yet) even though it lands in
    // the ring. By the time 7 and the marker packet 9 arrive, 8 is
    // missing from the buffered frame but still sitting in the ring.
    cache.store(8, 57, false, false, payload(8)).unwrap();
    cache.store(7, 57, true, false, payload(7)).unwrap();
    cache.store(9, 57, false, true, payload(9)).unwrap();

    let (_, complete, seqnos) = cache.keyframe();
    assert!(!complete);
    assert_eq!(seqnos, vec![7, 9]);

    // ...until complete_keyframe() walks the ring and folds it in.
    assert!(cache.complete_keyframe());
    let (_, complete, seqnos) = cache.keyframe();
    assert!(complete);
    assert_eq!(seqnos, vec![7, 8, 9]);
}

#[test]
fn test_invariant_index_validity() {
    let mut cache = PacketCache::new(16);
    let (_, idx) = cache.store(5, 0, false, false, payload(5)).unwrap();
    assert_eq!(cache.get_at(5, idx), Some(payload(5)));

    for i in 6..22u16 {
        cache.store(i, 0, false, false, payload(i)).unwrap();
    }
    assert_eq!(cache.get_at(5, idx), None);
}

#[test]
fn test_invariant_expected_never_less_than_received() {
    let mut cache = PacketCache::new(32);
    for i in [0u16, 5, 3, 5, 9, 2] {
        cache.store(i, 0, false, false, payload(i)).unwrap();
        let s = cache.stats(false);
        assert!(s.expected >= s.received);
    }
}

#[test]
fn test_resize_cond_refuses_in_stable_range() {
    let mut cache = PacketCache::new(128);
    assert!(cache.resize_cond(150).is_err());
}

#[test]
fn test_resize_cond_allows_large_change() {
    let mut cache = PacketCache::new(128);
    assert!(cache.resize_cond(1024).is_ok());
}

#[test]
fn test_store_rejects_far_behind_seqno() {
    let mut cache = PacketCache::new(128);
    cache.store(1000, 0, false, false, payload(1)).unwrap();
    assert!(cache.store(100, 0, false, false, payload(2)).is_err());
}
