//! Performance benchmarks for the hot paths of frame handling

use serde_json::json;
use server::client_manager::Outbound;
use server::dispatch::Dispatcher;
use server::police::Police;
use shared::{normalize_chat_text, ServerMessage};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Benchmarks rate limiter scoring across many identities
#[test]
fn benchmark_police_scoring() {
    let mut police = Police::default();
    let addresses: Vec<String> = (0..1_000)
        .map(|i| format!("10.0.{}.{}", i / 256, i % 256))
        .collect();

    let iterations = 100;
    let start = Instant::now();
    let base = Instant::now();

    for step in 0..iterations {
        let now = base + Duration::from_millis(step * 100);
        for address in &addresses {
            let _ = police.check_at(address, 1.0, now);
        }
    }

    let duration = start.elapsed();
    println!(
        "Police scoring: {} identities × {} rounds in {:?}",
        addresses.len(),
        iterations,
        duration
    );

    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks chat text normalization on large messages
#[test]
fn benchmark_text_normalization() {
    let text = format!("\n\n{}\n\n\n\n   \n", "line of chat\n\n\n".repeat(1_000));

    let iterations = 1_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let normalized = normalize_chat_text(&text);
        assert!(!normalized.contains("\n\n\n"));
    }

    let duration = start.elapsed();
    println!(
        "Text normalization: {} bytes × {} iterations in {:?}",
        text.len(),
        iterations,
        duration
    );

    // Should complete in under 5 seconds
    assert!(duration.as_millis() < 5000);
}

/// Benchmarks message stamping and serialization
#[test]
fn benchmark_message_serialization() {
    let message = ServerMessage::Chat {
        nick: "alice".to_string(),
        text: "x".repeat(512),
        admin: false,
        moderator: true,
        trip: Some("AbCdEf".to_string()),
    };

    let iterations = 10_000;
    let start = Instant::now();

    for i in 0..iterations {
        let frame = serde_json::to_string(&message.clone().stamp(i)).unwrap();
        assert!(frame.starts_with('{'));
    }

    let duration = start.elapsed();
    println!(
        "Message serialization: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}

/// Stress tests a broadcast into a crowded channel
#[test]
fn stress_test_channel_broadcast() {
    let mut dispatcher = Dispatcher::default();
    let mut receivers = Vec::new();

    for id in 0..200u64 {
        let (tx, rx) = mpsc::unbounded_channel();
        // Distinct addresses keep every join under the rate limit
        dispatcher.connect(id, format!("10.1.{}.{}", id / 256, id % 256), tx);
        let join = json!({ "cmd": "join", "channel": "lobby", "nick": format!("user{}", id) });
        dispatcher.handle_frame(id, join.to_string().as_bytes());
        receivers.push(rx);
    }

    let chat = json!({ "cmd": "chat", "text": "hello everyone" }).to_string();
    let start = Instant::now();
    dispatcher.handle_frame(0, chat.as_bytes());
    let duration = start.elapsed();

    let mut delivered = 0;
    for rx in &mut receivers {
        while let Ok(outbound) = rx.try_recv() {
            if let Outbound::Frame(text) = outbound {
                if text.contains("hello everyone") {
                    delivered += 1;
                }
            }
        }
    }

    println!(
        "Channel broadcast: {} recipients in {:?}",
        receivers.len(),
        duration
    );

    assert_eq!(delivered, receivers.len());
    // Should complete in under 100ms
    assert!(duration.as_millis() < 100);
}
