//! Benchmark for outcome resolution and case settlement.
//!
//! Run with: cargo bench --package otodrop_economy --bench resolver_benchmark

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use otodrop_economy::{
    resolve, upgrade_chance, AdminPolicy, Catalog, ChaChaRolls, CreditDelta, Credits,
    EconomyConfig, EconomyStore, Identity, Market, Provider, ResolverStatistics, Roll, RollSource,
};

fn benchmark_single_resolution(c: &mut Criterion) {
    let catalog = Catalog::reference().unwrap();
    let case = catalog.case("knife-ultra").unwrap().clone();
    let mut rolls = ChaChaRolls::from_seed(1);

    c.bench_function("resolve_knife_ultra", |b| {
        b.iter(|| {
            let roll = rolls.next_roll();
            black_box(resolve(black_box(&case.contents), roll))
        });
    });
}

fn benchmark_million_rolls(c: &mut Criterion) {
    let catalog = Catalog::reference().unwrap();
    let case = catalog.case("budget").unwrap().clone();

    let mut group = c.benchmark_group("million_rolls");
    group.throughput(Throughput::Elements(1_000_000));
    group.sample_size(10);

    group.bench_function("1M_budget_rolls", |b| {
        b.iter(|| {
            for i in 0..1_000_000u32 {
                let roll = Roll::saturating(i.wrapping_mul(7919) % 100_000);
                black_box(resolve(&case.contents, roll));
            }
        });
    });

    group.finish();
}

fn benchmark_statistics(c: &mut Criterion) {
    let catalog = Catalog::reference().unwrap();
    let case = catalog.case("covert").unwrap().clone();

    c.bench_function("statistics_100k", |b| {
        let mut rolls = ChaChaRolls::from_seed(2);
        b.iter(|| black_box(ResolverStatistics::sample(&case.contents, &mut rolls, 100_000)));
    });
}

fn benchmark_upgrade_chance(c: &mut Criterion) {
    c.bench_function("upgrade_chance", |b| {
        let mut cents = 1u64;
        b.iter(|| {
            cents = cents % 600_000 + 1;
            black_box(upgrade_chance(
                black_box(Credits::from_cents(cents)),
                black_box(Credits::from_whole(1_000)),
            ))
        });
    });
}

fn benchmark_open_case(c: &mut Criterion) {
    let market = Market::new(
        Arc::new(Catalog::reference().unwrap()),
        EconomyStore::in_memory(AdminPolicy::Nobody),
        Box::new(ChaChaRolls::from_seed(3)),
        &EconomyConfig::instant(),
    )
    .unwrap();
    let user = market
        .sign_in(&Identity::new(Provider::Guest, "bench"))
        .unwrap()
        .id;

    c.bench_function("open_and_sell_budget_case", |b| {
        b.iter(|| {
            market
                .admin_adjust_balance(&user, CreditDelta::from_cents(4_99))
                .unwrap();
            let owned = market.open_case(&user, "budget").unwrap();
            black_box(market.sell(&user, owned.uid).unwrap())
        });
    });
}

criterion_group!(
    benches,
    benchmark_single_resolution,
    benchmark_million_rolls,
    benchmark_statistics,
    benchmark_upgrade_chance,
    benchmark_open_case
);
criterion_main!(benches);
