use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::Utc;
use std::sync::Arc;
use unitcart_core::{Money, PartnerId, TransactionId};
use unitcart_events::{EventEnvelope, InMemoryEventBus};
use unitcart_infra::command_dispatcher::CommandDispatcher;
use unitcart_infra::event_store::InMemoryEventStore;
use unitcart_wallet::{RecordCredit, Wallet, WalletCommand};

type Dispatcher =
    CommandDispatcher<InMemoryEventStore, Arc<InMemoryEventBus<EventEnvelope<serde_json::Value>>>>;

fn dispatcher() -> Dispatcher {
    CommandDispatcher::new(InMemoryEventStore::new(), Arc::new(InMemoryEventBus::new()))
}

fn credit(partner_id: PartnerId) -> WalletCommand {
    WalletCommand::RecordCredit(RecordCredit {
        partner_id,
        transaction_id: TransactionId::new(),
        amount: Money::from_major(1),
        linked_order: None,
        escrow: false,
        occurred_at: Utc::now(),
    })
}

/// Dispatch cost grows with stream length because every command rehydrates.
fn bench_dispatch_by_history(c: &mut Criterion) {
    let mut group = c.benchmark_group("wallet_dispatch_by_history");
    for history in [0usize, 100, 1_000] {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(history), &history, |b, &history| {
            let dispatcher = dispatcher();
            let partner = PartnerId::new();
            for _ in 0..history {
                dispatcher
                    .dispatch(partner, "wallet", credit(partner), Wallet::empty)
                    .unwrap();
            }
            b.iter(|| {
                black_box(
                    dispatcher
                        .dispatch(partner, "wallet", credit(partner), Wallet::empty)
                        .unwrap(),
                )
            });
        });
    }
    group.finish();
}

fn bench_rehydration(c: &mut Criterion) {
    let dispatcher = dispatcher();
    let partner = PartnerId::new();
    for _ in 0..1_000 {
        dispatcher
            .dispatch(partner, "wallet", credit(partner), Wallet::empty)
            .unwrap();
    }
    c.bench_function("wallet_load_1000_events", |b| {
        b.iter(|| black_box(dispatcher.load(partner, Wallet::empty).unwrap().balance()))
    });
}

criterion_group!(benches, bench_dispatch_by_history, bench_rehydration);
criterion_main!(benches);
