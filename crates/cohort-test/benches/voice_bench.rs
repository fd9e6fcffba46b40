//! Benchmarks for the voice path: PCM codec, capture framing, playback scheduling

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use cohort_voice::{CaptureFramer, PlaybackScheduler, CAPTURE_FRAME_SIZE};
use cohort_wire::{encode_pcm_chunk, PcmBuffer};

fn tone(len: usize) -> Vec<f32> {
    (0..len).map(|i| ((i as f32) * 0.05).sin() * 0.5).collect()
}

fn bench_pcm_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("pcm_encode");

    for len in [1024, 4096, 24_000] {
        let samples = tone(len);
        group.throughput(Throughput::Elements(len as u64));
        group.bench_function(format!("{}_samples", len), |b| {
            b.iter(|| encode_pcm_chunk(black_box(&samples)))
        });
    }

    group.finish();
}

fn bench_pcm_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("pcm_decode");

    for len in [1024, 4096, 24_000] {
        let chunk = encode_pcm_chunk(&tone(len));
        group.throughput(Throughput::Elements(len as u64));
        group.bench_function(format!("{}_samples", len), |b| {
            b.iter(|| PcmBuffer::decode(black_box(&chunk), 24_000).unwrap())
        });
    }

    group.finish();
}

fn bench_capture_framer(c: &mut Criterion) {
    // Typical device callback size, not aligned with the frame size
    let block = tone(1000);
    let mut framer = CaptureFramer::new(CAPTURE_FRAME_SIZE, 16_000);

    let mut group = c.benchmark_group("capture_framer");
    group.throughput(Throughput::Elements(block.len() as u64));
    group.bench_function("push_1000", |b| {
        b.iter(|| black_box(framer.push(black_box(&block))))
    });
    group.finish();
}

fn bench_playback_scheduler(c: &mut Criterion) {
    c.bench_function("scheduler_schedule_complete", |b| {
        let mut scheduler = PlaybackScheduler::new();
        let mut now = 0.0;
        b.iter(|| {
            let placed = scheduler.schedule(black_box(0.2), now);
            now += 0.2;
            black_box(scheduler.complete(placed.id))
        })
    });

    c.bench_function("scheduler_backlog_64", |b| {
        b.iter(|| {
            let mut scheduler = PlaybackScheduler::new();
            scheduler.reset(0.0);
            let ids: Vec<_> = (0..64).map(|_| scheduler.schedule(0.05, 0.0).id).collect();
            for id in ids {
                scheduler.complete(id);
            }
            black_box(scheduler.next_start())
        })
    });
}

criterion_group!(
    benches,
    bench_pcm_encode,
    bench_pcm_decode,
    bench_capture_framer,
    bench_playback_scheduler,
);

criterion_main!(benches);
