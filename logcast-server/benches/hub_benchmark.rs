use criterion::{criterion_group, criterion_main, Criterion};
use logcast_core::{BroadcastEvent, Channel, Environment, Level, MessageSearch, NewLog};
use logcast_server::storage::{search_messages, LogStore, MemoryStore};
use logcast_server::{EventHub, Frame, HandlerError};
use std::hint::black_box;
use std::sync::Arc;
use tokio::sync::mpsc;

fn batch_event(rows: u64) -> BroadcastEvent {
    let now = chrono::Utc::now();
    BroadcastEvent::LogAdded {
        rows: (0..rows)
            .map(|id| {
                NewLog::new(format!("Player {id} joined"), Level::Info, Environment::Server)
                    .with_server("bench")
                    .normalize()
                    .into_record(id, now)
            })
            .collect(),
    }
}

fn bench_publish_fanout(c: &mut Criterion) {
    for subscribers in [1usize, 10, 100] {
        let hub = Arc::new(EventHub::new(Channel::LogEvents));
        let mut receivers = Vec::new();
        for _ in 0..subscribers {
            let (tx, rx) = mpsc::unbounded_channel();
            hub.subscribe(move |event| {
                let frame = Frame::encode(event).map_err(|e| HandlerError::Failed(e.to_string()))?;
                tx.send(frame).map_err(|_| HandlerError::Closed)
            });
            receivers.push(rx);
        }
        let event = batch_event(10);

        c.bench_function(&format!("publish_10_rows_to_{subscribers}_streams"), |b| {
            b.iter(|| {
                black_box(hub.publish(black_box(event.clone())));
                for rx in receivers.iter_mut() {
                    while rx.try_recv().is_ok() {}
                }
            })
        });
    }
}

fn bench_subscribe_unsubscribe(c: &mut Criterion) {
    let hub = Arc::new(EventHub::new(Channel::LogEvents));
    for _ in 0..100 {
        hub.subscribe(|_| Ok(()));
    }

    c.bench_function("scoped_subscribe_drop_with_100_peers", |b| {
        b.iter(|| {
            let subscription = hub.subscribe_scoped(|_| Ok(()));
            black_box(subscription.id());
        })
    });
}

fn bench_distinct_search(c: &mut Criterion) {
    let store = MemoryStore::new();
    let batch = (0..10_000u64)
        .map(|i| {
            NewLog::new(format!("message {}", i % 250), Level::Warning, Environment::Client)
                .normalize()
        })
        .collect();
    store.append_logs(batch).unwrap();
    let search = MessageSearch::new("message 1");

    c.bench_function("distinct_search_10k_rows", |b| {
        b.iter(|| black_box(search_messages(&store, black_box(&search), 200).unwrap()))
    });
}

criterion_group!(
    benches,
    bench_publish_fanout,
    bench_subscribe_unsubscribe,
    bench_distinct_search
);
criterion_main!(benches);
