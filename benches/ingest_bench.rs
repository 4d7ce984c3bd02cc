use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use std::hint::black_box;
use std::sync::Arc;
use visitstat::ingest::classify::classify;
use visitstat::ingest::geo::{GeoRange, GeoTable};
use visitstat::ingest::recorder::{Beacon, VisitRecorder};
use visitstat::ingest::reference::ReferenceData;
use visitstat::ingest::referrer::{attribute, RuleSet};
use visitstat::query::windows::{Window, Windows};
use visitstat::storage::store::{to_local, VisitStore, Website};

const CHROME_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap()
}

fn make_geo(ranges: u32) -> GeoTable {
    GeoTable::new(
        (0..ranges)
            .map(|i| GeoRange::new(i * 256, i * 256 + 255, "Region", "ISP"))
            .collect(),
    )
}

fn make_recorder() -> VisitRecorder {
    let store = VisitStore::open(None).unwrap();
    store
        .register_website(&Website {
            id: 1,
            name: "Bench".to_string(),
            url: "https://bench.example.com".to_string(),
            owner_id: 1,
            is_public: true,
            start_time: NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        })
        .unwrap();
    let reference = ReferenceData::new(make_geo(10_000), RuleSet::new(RuleSet::default_rules()));
    VisitRecorder::new(store, Arc::new(reference), FixedOffset::east_opt(0).unwrap())
}

fn make_beacon(i: usize) -> Beacon {
    Beacon {
        website_id: 1,
        ip: format!("10.{}.{}.{}", (i >> 16) & 0xFF, (i >> 8) & 0xFF, i & 0xFF),
        referrer: "https://www.baidu.com/s?wd=duckdb".to_string(),
        location: format!("https://bench.example.com/page-{}", i % 100),
        screen_color: "24".to_string(),
        screen_size: "1920X1080".to_string(),
        user_agent: CHROME_UA.to_string(),
        language: "zh-CN".to_string(),
    }
}

fn bench_classify(c: &mut Criterion) {
    let rules = RuleSet::new(RuleSet::default_rules());
    let mut group = c.benchmark_group("normalize");

    group.bench_function("classify", |b| {
        b.iter(|| classify(black_box(CHROME_UA), black_box("en-US")));
    });
    group.bench_function("attribute_search", |b| {
        b.iter(|| attribute(black_box("https://www.google.com/search?q=rust+duckdb"), &rules));
    });
    group.bench_function("attribute_external", |b| {
        b.iter(|| attribute(black_box("https://news.example.org/a/b?c=d"), &rules));
    });

    group.finish();
}

fn bench_geo_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("geo_lookup");

    for size in [1_000, 100_000] {
        let table = make_geo(size);
        let probe = size / 2 * 256 + 7;
        group.bench_with_input(BenchmarkId::from_parameter(size), &probe, |b, &probe| {
            b.iter(|| table.resolve(black_box(probe)));
        });
    }

    group.finish();
}

/// Setup runs outside the timed closure so only `record_visit` is measured.
fn bench_record_visit(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_visit");

    group.bench_function("new_visit", |b| {
        let recorder = make_recorder();
        let mut i = 0;
        b.iter(|| {
            i += 1;
            recorder.record_visit(&make_beacon(i), base_time()).unwrap();
        });
    });

    group.bench_function("repeat_hit", |b| {
        let recorder = make_recorder();
        let beacon = make_beacon(0);
        recorder.record_visit(&beacon, base_time()).unwrap();
        b.iter(|| {
            recorder.record_visit(&beacon, base_time()).unwrap();
        });
    });

    group.bench_function("new_visit_fresh_store", |b| {
        b.iter_batched(
            make_recorder,
            |recorder| {
                recorder.record_visit(&make_beacon(1), base_time()).unwrap();
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

fn bench_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("query");

    // Ten days of traffic from 1 000 IPs, three hits each
    let recorder = make_recorder();
    for day in 0..10 {
        for i in 0..1_000 {
            let at = base_time() + Duration::days(day) + Duration::seconds(i64::try_from(i).unwrap());
            for _ in 0..3 {
                recorder.record_visit(&make_beacon(i), at).unwrap();
            }
        }
    }
    let now = to_local(base_time() + Duration::days(9) + Duration::hours(12), recorder.offset());
    let start = recorder.store().find_website(1).unwrap().unwrap().start_time;
    let conn = recorder.store().conn();

    group.bench_function("window_stats_10k", |b| {
        b.iter(|| {
            let conn = conn.lock();
            visitstat::query::metrics::query_window_stats(&conn, 1, start, now).unwrap();
        });
    });

    group.bench_function("system_trend_30d", |b| {
        b.iter(|| {
            let conn = conn.lock();
            visitstat::query::timeseries::query_system_trend(&conn, 30, now.date()).unwrap();
        });
    });

    let total: Window = Windows::at(now, start).total;
    group.bench_function("breakdown_browser_10k", |b| {
        b.iter(|| {
            let conn = conn.lock();
            visitstat::query::breakdowns::query_breakdown(
                &conn,
                1,
                total,
                visitstat::query::breakdowns::Dimension::Browser,
                10,
            )
            .unwrap();
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_classify,
    bench_geo_lookup,
    bench_record_visit,
    bench_queries
);
criterion_main!(benches);
