use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use grant_store::testing::{alice, at, bob, generic_record, key};
use grant_store::{ActionType, GrantStore, NeverCancel, PageRequest, QueryService};

fn populated(grants: usize, expired_every: usize) -> QueryService {
    let store = GrantStore::in_memory();
    for i in 0..grants {
        let action = format!("action-{i:05}");
        let exp = if i % expired_every == 0 { Some(1) } else { None };
        store.put(&key(alice(), bob(), &action), &generic_record(&action, exp)).unwrap();
    }
    QueryService::new(Arc::new(store))
}

fn query_benchmarks(c: &mut Criterion) {
    let svc = populated(10_000, 3);
    let now = Some(at(1_000));

    c.bench_function("query_single", |b| {
        let action = ActionType::from("action-05001");
        b.iter(|| {
            let _grant = svc.query_single(&alice(), &bob(), &action, now, &NeverCancel);
        })
    });

    c.bench_function("query_pair_page_100", |b| {
        let request = PageRequest::first(100);
        b.iter(|| {
            let _page = svc.query_pair(&alice(), &bob(), now, &request, &NeverCancel);
        })
    });

    c.bench_function("scan_all_page_100", |b| {
        b.iter(|| {
            let _page = svc.store().scan_all("", 100, &NeverCancel);
        })
    });
}

criterion_group!(benches, query_benchmarks);
criterion_main!(benches);
