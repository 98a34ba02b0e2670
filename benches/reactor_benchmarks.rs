use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use std::time::Duration;
use uring_reactor::reactor::{PendingTable, Token};
use uring_reactor::{Collector, Op, Reactor, ReactorConfig};

fn bench_pending_table(c: &mut Criterion) {
    let mut group = c.benchmark_group("pending_table");

    for depth in [16usize, 256, 4096].iter() {
        group.bench_with_input(BenchmarkId::new("insert_remove", depth), depth, |b, &depth| {
            let mut table = PendingTable::with_capacity(depth);
            let tokens: Vec<Token> = (0..depth).map(|i| table.insert(i)).collect();
            let mut cursor = 0;
            let mut live = tokens;
            b.iter(|| {
                let token = live[cursor];
                let value = table.remove(token);
                live[cursor] = table.insert(black_box(value.unwrap_or_default()));
                cursor = (cursor + 1) % depth;
            })
        });
    }

    group.bench_function("token_pack", |b| {
        b.iter(|| {
            let token = Token::new(black_box(1234), black_box(7));
            black_box(Token::from_user_data(token.to_user_data()))
        })
    });

    group.finish();
}

fn bench_op_validation(c: &mut Criterion) {
    let mut group = c.benchmark_group("op_validation");

    for count in [1usize, 64, 1024].iter() {
        group.bench_with_input(BenchmarkId::new("writev", count), count, |b, &count| {
            b.iter_batched(
                || Op::writev(1, vec![vec![0u8; 16]; count], None),
                |op| black_box(op.validate(1024)),
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

fn bench_nop_round_trip(c: &mut Criterion) {
    let collector = Collector::new();
    let mut reactor = match Reactor::new(ReactorConfig::fallback(), collector.clone()) {
        Ok(reactor) => reactor,
        Err(e) => {
            eprintln!("skipping reactor benchmarks: {e}");
            return;
        }
    };

    let mut group = c.benchmark_group("nop_round_trip");
    group.measurement_time(Duration::from_secs(5));

    for batch in [1usize, 16, 64].iter() {
        group.bench_with_input(BenchmarkId::new("batch", batch), batch, |b, &batch| {
            b.iter(|| {
                for tag in 0..batch {
                    let _ = reactor.submit(Op::nop(), tag as u64);
                }
                let mut dispatched = 0;
                while dispatched < batch {
                    match reactor.poll(batch - dispatched, None) {
                        Ok(n) => dispatched += n,
                        Err(_) => break,
                    }
                }
                black_box(collector.take())
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_pending_table,
    bench_op_validation,
    bench_nop_round_trip
);
criterion_main!(benches);
