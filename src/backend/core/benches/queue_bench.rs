//! Benchmarks for the in-memory job queue and the quality scorer.
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mdus_core::jobs::{DocumentType, InMemoryQueueBackend, JobQueue, QualityAssessment, QueueConfig, TextExtraction};
use std::sync::Arc;

fn bench_enqueue(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_enqueue");
    let rt = tokio::runtime::Runtime::new().unwrap();
    let queue = JobQueue::in_memory();
    let mut document_id = 0i64;
    group.bench_function("single", |b| {
        b.iter(|| {
            document_id += 1;
            rt.block_on(async { black_box(queue.enqueue(document_id, "/uploads/bench.pdf", DocumentType::Prescription, (document_id % 7) as i32).await.unwrap()); });
        });
    });
    group.finish();
}

fn bench_enqueue_dequeue_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_cycle");
    let rt = tokio::runtime::Runtime::new().unwrap();
    for depth in [10usize, 1_000, 10_000] {
        group.throughput(Throughput::Elements(depth as u64));
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &n| {
            b.iter(|| { rt.block_on(async {
                let queue = JobQueue::in_memory();
                for i in 0..n { queue.enqueue(i as i64, "/uploads/bench.pdf", DocumentType::Other, (i % 11) as i32 - 5).await.unwrap(); }
                while let Some(job) = queue.dequeue().await.unwrap() { black_box(job); }
            }); });
        });
    }
    group.finish();
}

fn bench_dequeue_with_deep_backlog(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_dequeue_deep");
    let rt = tokio::runtime::Runtime::new().unwrap();
    let queue = JobQueue::new(Arc::new(InMemoryQueueBackend::new()), QueueConfig { max_retries: u32::MAX, ..QueueConfig::default() });
    rt.block_on(async { for i in 0..50_000i64 { queue.enqueue(i, "/uploads/bench.pdf", DocumentType::Other, (i % 9) as i32).await.unwrap(); } });
    group.bench_function("pop_and_requeue", |b| {
        b.iter(|| { rt.block_on(async {
            let job = queue.dequeue().await.unwrap().unwrap();
            queue.fail(&job.lease().unwrap(), "bench").await.unwrap();
        }); });
    });
    group.finish();
}

fn bench_quality_assessment(c: &mut Criterion) {
    let mut group = c.benchmark_group("quality_assessment");
    for len in [50usize, 1_000, 20_000] {
        let extraction = TextExtraction { text: "a".repeat(len), confidence: 0.82, page_count: 1, error: None };
        group.bench_with_input(BenchmarkId::from_parameter(len), &extraction, |b, e| { b.iter(|| black_box(QualityAssessment::assess(e))); });
    }
    group.finish();
}

criterion_group!(benches, bench_enqueue, bench_enqueue_dequeue_cycle, bench_dequeue_with_deep_backlog, bench_quality_assessment);
criterion_main!(benches);
