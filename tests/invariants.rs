//! Crate-level invariant tests for the response cache and text cleaner.
//!
//! These exercise the public API the way the server does: binary values,
//! churn well past capacity, and hostile extraction output.

use pdfscope::cache::ResponseCache;
use pdfscope::clean::{clean, clean_text};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Cache laws
// ---------------------------------------------------------------------------

#[test]
fn size_never_exceeds_capacity_under_churn() {
    let cache = ResponseCache::new(16, Duration::from_secs(60));
    for i in 0..1000 {
        let key = format!("key-{i}");
        cache.set(&key, format!("value-{i}").as_bytes(), None);
        assert!(cache.len() <= 16);
    }
    assert_eq!(cache.len(), 16);
}

#[test]
fn lru_law_oldest_key_is_evicted() {
    // After capacity+1 inserts, k1 is gone and k2..kN remain.
    let capacity = 5;
    let cache = ResponseCache::new(capacity, Duration::from_secs(60));
    for i in 1..=capacity + 1 {
        let key = format!("k{i}");
        cache.set(&key, key.as_bytes(), None);
    }
    assert_eq!(cache.get("k1"), None);
    for i in 2..=capacity + 1 {
        let key = format!("k{i}");
        assert_eq!(cache.get(&key), Some(key.clone().into_bytes()), "{key} missing");
    }
}

#[test]
fn ttl_law_expired_entry_is_a_miss() {
    let cache = ResponseCache::new(4, Duration::from_secs(60));
    cache.set("k", b"v", Some(Duration::from_millis(100)));
    assert_eq!(cache.get("k"), Some(b"v".to_vec()));
    std::thread::sleep(Duration::from_millis(250));
    assert_eq!(cache.get("k"), None);
}

#[test]
fn set_then_set_then_get_sees_latest() {
    let cache = ResponseCache::new(4, Duration::from_secs(60));
    cache.set("k", b"v", None);
    cache.set("k", b"v2", None);
    assert_eq!(cache.get("k"), Some(b"v2".to_vec()));
}

#[test]
fn concurrent_writers_preserve_invariants() {
    let cache = std::sync::Arc::new(ResponseCache::new(32, Duration::from_secs(60)));
    let mut handles = Vec::new();
    for t in 0..8 {
        let cache = std::sync::Arc::clone(&cache);
        handles.push(std::thread::spawn(move || {
            for i in 0..500 {
                let key = format!("t{t}-k{}", i % 40);
                cache.set(&key, key.as_bytes(), None);
                if let Some(value) = cache.get(&key) {
                    assert_eq!(value, key.as_bytes());
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    assert!(cache.len() <= 32);
}

// ---------------------------------------------------------------------------
// Cleaner laws
// ---------------------------------------------------------------------------

#[test]
fn cleaner_output_is_always_valid_utf8() {
    let hostile: Vec<Vec<u8>> = vec![
        vec![0xFF, 0xFE, 0xFD],
        vec![0xC2], // truncated 2-byte
        vec![0xE2, 0x82], // truncated 3-byte
        vec![0xF0, 0x9F, 0x98], // truncated 4-byte
        b"mixed \xC3\xA9 ok \x80\x81 bad".to_vec(),
        b"\xED\xA0\x80 surrogate \xEF\xBF\xBD replacement".to_vec(),
        (0u8..=255).collect(),
    ];
    for input in hostile {
        let mut buf = input.clone();
        clean(&mut buf, false);
        assert!(
            std::str::from_utf8(&buf).is_ok(),
            "invalid UTF-8 out of input {input:?}"
        );
    }
}

#[test]
fn cleaner_strips_forbidden_characters() {
    let mut buf = b"keep\x01this\x02text\x03clean \xE2\x80\x8B ok".to_vec();
    clean(&mut buf, false);
    let text = std::str::from_utf8(&buf).unwrap();
    assert!(!text.contains('\u{FFFD}'));
    assert!(!text.contains('\u{200B}'));
    for ch in text.chars() {
        assert!(!ch.is_control() || matches!(ch, '\t' | '\n' | '\r'));
    }
}

#[test]
fn cleaning_is_idempotent() {
    let samples = [
        "Ordinary prose with no artifacts at all.",
        "spaced    out\t\ttext\n\nwith a break",
        "trailing junk ----------",
        "see https://example.com for more",
    ];
    for sample in samples {
        let once = clean_text(sample, true);
        let twice = clean_text(&once, true);
        assert_eq!(once, twice, "not idempotent for {sample:?}");
    }
}
