//! Benchmarks for relay room fan-out

use std::time::Instant;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use cohort_core::{ConnectionId, Pose, Profile, Role, RoomId, TransformFrame, Vec3};
use cohort_transport::RoomRegistry;
use cohort_wire::{encode_datagram, ClientMessage, EventEnvelope};

fn seated_room(size: u64) -> (RoomRegistry, RoomId) {
    let mut registry = RoomRegistry::new();
    let room = RoomId::new("workshop");
    let now = Instant::now();
    for i in 1..=size {
        registry.handle(
            ConnectionId::new(i),
            ClientMessage::JoinRoom {
                room_id: room.clone(),
                participant: Profile::new(format!("Student {}", i), Role::Student),
            },
            now,
        );
    }
    (registry, room)
}

fn bench_transform_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("transform_fan_out");

    for size in [2u64, 8, 32, 128] {
        let (mut registry, room) = seated_room(size);
        let frame = TransformFrame::head_only(Pose::at(Vec3::new(1.0, 1.6, -2.0)));

        group.throughput(Throughput::Elements(size - 1));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                let deliveries = registry.handle(
                    ConnectionId::new(1),
                    ClientMessage::UpdateTransform {
                        room_id: room.clone(),
                        transforms: black_box(frame),
                    },
                    Instant::now(),
                );
                black_box(deliveries)
            })
        });
    }

    group.finish();
}

fn bench_workshop_event(c: &mut Criterion) {
    let (mut registry, room) = seated_room(32);
    let event = EventEnvelope::new("step", serde_json::json!({ "index": 4, "done": true }));

    c.bench_function("workshop_event_32", |b| {
        b.iter(|| {
            registry.handle(
                ConnectionId::new(3),
                ClientMessage::WorkshopEvent {
                    room_id: room.clone(),
                    event: event.clone(),
                },
                Instant::now(),
            )
        })
    });
}

fn bench_datagram_encode(c: &mut Criterion) {
    let message = ClientMessage::UpdateTransform {
        room_id: RoomId::new("workshop"),
        transforms: TransformFrame {
            head: Pose::new(Vec3::new(0.5, 1.7, -1.0), Vec3::new(-10.0, 35.0, 0.0)),
            left_hand: Some(Pose::at(Vec3::new(0.3, 1.2, -0.4))),
            right_hand: Some(Pose::at(Vec3::new(0.7, 1.2, -0.4))),
        },
    };

    c.bench_function("datagram_encode_transform", |b| {
        b.iter(|| encode_datagram(black_box(&message)).unwrap())
    });
}

criterion_group!(
    benches,
    bench_transform_fan_out,
    bench_workshop_event,
    bench_datagram_encode,
);

criterion_main!(benches);
