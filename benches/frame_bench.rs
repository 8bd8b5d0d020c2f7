use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use glam::Vec3;
use realm_net::core::codec::{decode_frame, encode_frame};
use realm_net::protocol::message::{Message, MessageType, PlayerState};
use realm_net::service::session::parse_payload;
use realm_net::utils::crypto::{cipher_pair, CipherKind, Role};

fn state_update() -> Message {
    Message::PlayerStateUpdate(PlayerState {
        player_id: 7,
        position: Vec3::new(12.0, 100.0, -4.5),
        velocity: Vec3::new(4.3, 0.0, 0.0),
        yaw: 90.0,
        pitch: 0.0,
        health: 100.0,
        resource: 50.0,
        timestamp: 123_456,
    })
}

fn bench_messages(c: &mut Criterion) {
    let mut group = c.benchmark_group("message");
    let messages = vec![
        state_update(),
        Message::Chat {
            sender: "Alice".into(),
            message: "a".repeat(256),
        },
        Message::PlayerDespawn { player_id: 7 },
    ];

    group.bench_function("encode", |b| {
        b.iter_batched(
            || messages.clone(),
            |msgs| {
                for m in msgs {
                    let _ = m.encode();
                }
            },
            BatchSize::SmallInput,
        )
    });

    let payload = state_update().encode();
    group.bench_function("validate_and_decode", |b| {
        b.iter(|| {
            let _ = parse_payload(&payload, Some(&[MessageType::PlayerStateUpdate])).unwrap();
        })
    });

    group.finish();
}

fn bench_frames(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame");
    let payload = state_update().encode();

    group.bench_function("encode_decode", |b| {
        b.iter(|| {
            let frame = encode_frame(&payload).unwrap();
            let _ = decode_frame(&frame).unwrap();
        })
    });

    for kind in [CipherKind::Aead, CipherKind::Keystream] {
        group.bench_function(format!("seal_open_{}", kind.as_str()), |b| {
            let mut client = cipher_pair(kind, b"bench-secret", Role::Client).unwrap();
            let mut server = cipher_pair(kind, b"bench-secret", Role::Server).unwrap();
            b.iter(|| {
                let sealed = client.outbound.seal(&payload).unwrap();
                let _ = server.inbound.open(&sealed).unwrap();
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_messages, bench_frames);
criterion_main!(benches);
