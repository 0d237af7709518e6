//! Benchmarks for hub fan-out
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use relayhub::broker::transport::memory;
use relayhub::broker::{Broker, BrokerConfig, ConnectRequest};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;

/// Connect `users * per_user` sessions to app "bench"
///
/// Every frame a peer receives is acknowledged on the returned channel.
fn connect_sessions(
    rt: &Runtime,
    broker: &Arc<Broker>,
    users: usize,
    per_user: usize,
) -> mpsc::UnboundedReceiver<()> {
    let (ack_tx, ack_rx) = mpsc::unbounded_channel();

    rt.block_on(async {
        for user in 0..users {
            for _ in 0..per_user {
                let (sink, stream, mut peer) = memory::channel();
                let request = ConnectRequest::new("bench", format!("user-{user}"));

                let session_broker = Arc::clone(broker);
                tokio::spawn(async move {
                    let _ = session_broker.handle_connect(request, sink, stream).await;
                });

                let ack = ack_tx.clone();
                tokio::spawn(async move {
                    while peer.recv().await.is_some() {
                        if ack.send(()).is_err() {
                            break;
                        }
                    }
                });
            }
        }

        let expected = users * per_user;
        let hub = broker.hub("bench").await.unwrap();
        while hub.stats().await.sessions < expected {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    });

    ack_rx
}

async fn await_acks(acks: &mut mpsc::UnboundedReceiver<()>, count: usize) {
    for _ in 0..count {
        acks.recv().await.unwrap();
    }
}

fn bench_broadcast(c: &mut Criterion) {
    let mut group = c.benchmark_group("broadcast");
    let rt = Runtime::new().unwrap();

    for sessions in [10, 100, 1000] {
        let broker = Arc::new(Broker::new(BrokerConfig::default()));
        let mut acks = connect_sessions(&rt, &broker, sessions, 1);

        group.throughput(Throughput::Elements(sessions as u64));
        group.bench_function(format!("all_{}", sessions), |b| {
            b.iter(|| {
                rt.block_on(async {
                    broker
                        .push_message("bench", Vec::new(), black_box("tick"), None)
                        .await
                        .unwrap();
                    await_acks(&mut acks, sessions).await;
                })
            })
        });

        rt.block_on(broker.shutdown());
    }

    group.finish();
}

fn bench_targeted(c: &mut Criterion) {
    let mut group = c.benchmark_group("targeted");
    let rt = Runtime::new().unwrap();

    // 500 users with 2 sessions each; one user is addressed per push
    let broker = Arc::new(Broker::new(BrokerConfig::default()));
    let mut acks = connect_sessions(&rt, &broker, 500, 2);

    group.throughput(Throughput::Elements(2));
    group.bench_function("one_user_of_500", |b| {
        let mut user = 0;
        b.iter(|| {
            user = (user + 1) % 500;
            rt.block_on(async {
                broker
                    .push_message("bench", vec![format!("user-{user}")], "tick", None)
                    .await
                    .unwrap();
                await_acks(&mut acks, 2).await;
            })
        })
    });

    rt.block_on(broker.shutdown());
    group.finish();
}

fn bench_filtered(c: &mut Criterion) {
    let mut group = c.benchmark_group("filtered");
    let rt = Runtime::new().unwrap();

    let broker = Arc::new(Broker::new(BrokerConfig::default()));
    let mut acks = connect_sessions(&rt, &broker, 1000, 1);

    // Only user-0 passes
    group.bench_function("filter_1000_deliver_1", |b| {
        b.iter(|| {
            let only_first = relayhub::broker::filter(|s| s.user_id() == "user-0");
            rt.block_on(async {
                broker
                    .push_message("bench", Vec::new(), "tick", Some(only_first))
                    .await
                    .unwrap();
                await_acks(&mut acks, 1).await;
            })
        })
    });

    rt.block_on(broker.shutdown());
    group.finish();
}

criterion_group!(benches, bench_broadcast, bench_targeted, bench_filtered);
criterion_main!(benches);
