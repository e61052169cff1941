//! Benchmarks for the replay hot path: timeline construction, portfolio
//! mutation, and per-tick statistics updates.

use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::collections::HashMap;

use ticklab_core::domain::{Bar, Portfolio};
use ticklab_core::engine::{AlgorithmStatistics, Timeline};

fn minute_bars(symbol: &str, count: usize) -> Vec<Bar> {
    let start = Utc.with_ymd_and_hms(2024, 1, 8, 14, 30, 0).unwrap();
    (0..count)
        .map(|i| {
            let close = 100.0 + (i % 50) as f64 * 0.1;
            Bar::new(
                symbol,
                start + Duration::minutes(i as i64),
                close,
                close + 0.5,
                close - 0.5,
                close,
                10_000.0,
            )
        })
        .collect()
}

fn bench_timeline_build(c: &mut Criterion) {
    let mut data = HashMap::new();
    for symbol in ["TSLA", "AAPL", "MSFT", "NVDA"] {
        data.insert(symbol.to_string(), minute_bars(symbol, 5_000));
    }

    c.bench_function("timeline_build_4x5000", |b| {
        b.iter(|| Timeline::build(black_box(&data)).unwrap())
    });
}

fn bench_portfolio_churn(c: &mut Criterion) {
    c.bench_function("portfolio_buy_sell_churn", |b| {
        b.iter(|| {
            let mut portfolio = Portfolio::new(10_000_000.0);
            for i in 0..1_000u32 {
                let price = 100.0 + (i % 10) as f64;
                portfolio.buy_stock("TSLA", 10, price).unwrap();
                portfolio.sell_stock("TSLA", 10, price + 1.0).unwrap();
            }
            black_box(portfolio.cash())
        })
    });
}

fn bench_statistics_update(c: &mut Criterion) {
    c.bench_function("statistics_update_5000_ticks", |b| {
        b.iter(|| {
            let start = Utc.with_ymd_and_hms(2024, 1, 8, 14, 30, 0).unwrap();
            let mut stats = AlgorithmStatistics::new("bench", 1_000_000.0, start);
            for i in 0..5_000 {
                let value = 1_000_000.0 + (i as f64).sin() * 10_000.0;
                stats.update_statistics(value, 0.02);
            }
            black_box(stats.sharpe_ratio())
        })
    });
}

criterion_group!(
    benches,
    bench_timeline_build,
    bench_portfolio_churn,
    bench_statistics_update
);
criterion_main!(benches);
