//! Performance benchmarks for the protocol hot paths

use shared::{Message, SharedKey, Tag, TransferHeader};
use std::time::Instant;

/// Benchmarks text message parsing
#[test]
fn benchmark_message_parsing() {
    let raw = b"command|say welcome to the server|extra|fields";

    let iterations = 100_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let message = Message::parse(raw).unwrap();
        assert_eq!(message.tag, Tag::Command);
    }

    let duration = start.elapsed();
    println!(
        "Message parsing: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    // Should complete in under 1 second for 100k iterations
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks key derivation and comparison, done once per handshake
#[test]
fn benchmark_key_derivation() {
    let iterations = 2_000;
    let start = Instant::now();

    for minute in 0..iterations {
        let stamp = format!("2024/03/01-{:02}:{:02}", (minute / 60) % 24, minute % 60);
        let key = SharedKey::for_timestamp(&stamp);
        assert!(key.matches(key.as_bytes()));
    }

    let duration = start.elapsed();
    println!(
        "Key derivation: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Unoptimized SHA3 is slow; only guard against pathological cost
    assert!(duration.as_millis() < 5000);
}

/// Benchmarks transfer header encoding and decoding
#[test]
fn benchmark_transfer_header() {
    let iterations = 20_000;
    let start = Instant::now();

    for size in 0..iterations {
        let header = TransferHeader::for_body("latest.log", size as u64);
        let encoded = header.encode().unwrap();
        let (decoded, used) = TransferHeader::decode(&encoded).unwrap();
        assert_eq!(used, encoded.len());
        assert_eq!(decoded.body_len(), size as u64);
    }

    let duration = start.elapsed();
    println!(
        "Transfer header: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 3000);
}
