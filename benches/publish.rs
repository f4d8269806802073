//! Performance benchmarks for tmt-event
//!
//! Run with: cargo bench

use std::sync::Arc;
use tmt_event::codec;
use tmt_event::{
    Event, EventCategory, EventKey, EventPublisher, EventStore, EventSubscriber, MemoryStore,
};
use criterion::{criterion_group, criterion_main, Criterion};

fn sample_event() -> Event {
    Event::new(
        EventKey::parse("tcs.pointing.demand").unwrap(),
        EventCategory::System,
    )
    .with_param("ra", 187.5)
    .with_param("dec", -33.25)
    .with_param("frame", "ICRS")
}

fn bench_event_creation(c: &mut Criterion) {
    let key = EventKey::parse("tcs.pointing.demand").unwrap();

    c.bench_function("Event::new", |b| {
        b.iter(|| Event::new(key.clone(), EventCategory::System).with_param("ra", 187.5));
    });

    c.bench_function("EventKey::parse", |b| {
        b.iter(|| EventKey::parse("wfos.red.detector.filterWheel").unwrap());
    });
}

fn bench_event_codec(c: &mut Criterion) {
    let event = sample_event();

    c.bench_function("Event encode", |b| {
        b.iter(|| codec::encode(&event).unwrap());
    });

    let bytes = codec::encode(&event).unwrap();
    c.bench_function("Event decode", |b| {
        b.iter(|| codec::decode(&bytes).unwrap());
    });
}

fn bench_memory_publish(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let publisher = EventPublisher::new(Arc::new(MemoryStore::default()));
    let event = sample_event();

    c.bench_function("MemoryStore publish", |b| {
        b.to_async(&rt)
            .iter(|| async { publisher.publish(event.renew()).await.unwrap() });
    });
}

fn bench_memory_publish_throughput(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("publish_throughput");
    for count in [10, 100, 1000] {
        group.bench_function(format!("{} keys", count), |b| {
            b.to_async(&rt).iter(|| async {
                let publisher = EventPublisher::new(Arc::new(MemoryStore::default()));
                for i in 0..count {
                    let key = EventKey::parse(&format!("tcs.mount.axis{}", i)).unwrap();
                    let event = Event::new(key, EventCategory::System).with_param("i", i);
                    publisher.publish(event).await.unwrap();
                }
            });
        });
    }
    group.finish();
}

fn bench_memory_get(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    // Pre-populate
    let store: Arc<dyn EventStore> = Arc::new(MemoryStore::default());
    let keys: Vec<EventKey> = (0..100)
        .map(|i| EventKey::parse(&format!("tcs.mount.axis{}", i)).unwrap())
        .collect();
    rt.block_on(async {
        for key in &keys {
            store
                .publish(&Event::new(key.clone(), EventCategory::System))
                .await
                .unwrap();
        }
    });
    let subscriber = EventSubscriber::new(store);

    c.bench_function("get (single key)", |b| {
        b.to_async(&rt)
            .iter(|| async { subscriber.get(&keys[42]).await.unwrap() });
    });

    c.bench_function("get_many (100 keys)", |b| {
        b.to_async(&rt)
            .iter(|| async { subscriber.get_many(&keys).await.unwrap() });
    });
}

criterion_group!(
    benches,
    bench_event_creation,
    bench_event_codec,
    bench_memory_publish,
    bench_memory_publish_throughput,
    bench_memory_get,
);
criterion_main!(benches);
