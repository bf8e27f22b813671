use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion, black_box};

use terramp::cache::TileCache;
use terramp::producer::get_ready_tile;
use terramp::quadtree::TileAddress;
use terramp::storage::StorageConfig;
use terramp::task::{Deadline, RenderContext, Scheduler, Task, TaskGraph};
use terramp::{ProducerRegistry, TerrainConfig};

fn noop_task() -> Arc<Task> {
    Task::from_fn("bench", Deadline::NONE, |_| true)
}

fn bench_cache_hit(c: &mut Criterion) {
    let cache = TileCache::new("bench", StorageConfig::new(64, 256)).unwrap();
    let producer = cache.register_producer(None);
    let address = TileAddress::new(4, 3, 5);
    let pinned = cache.get_tile(producer, address, Deadline::NONE, |_| noop_task()).unwrap();

    c.bench_function("cache_get_put_hit", |b| {
        b.iter(|| {
            let tile = cache
                .get_tile(producer, black_box(address), Deadline::NONE, |_| noop_task())
                .unwrap();
            cache.put_tile(&tile);
        });
    });
    cache.put_tile(&pinned);
}

fn bench_cache_churn(c: &mut Criterion) {
    // 4x more addresses than slots: almost every request evicts
    let cache = TileCache::new("churn", StorageConfig::new(64, 256)).unwrap();
    let producer = cache.register_producer(None);
    let addresses: Vec<TileAddress> = (0..16u32)
        .flat_map(|ty| (0..16u32).map(move |tx| TileAddress::new(4, tx, ty)))
        .collect();

    c.bench_function("cache_churn_256_over_64", |b| {
        let mut i = 0usize;
        b.iter(|| {
            let address = addresses[i % addresses.len()];
            i += 1;
            let tile = cache.get_tile(producer, address, Deadline::NONE, |_| noop_task()).unwrap();
            cache.put_tile(&tile);
        });
    });
}

fn bench_graph_chain(c: &mut Criterion) {
    c.bench_function("task_graph_chain_64", |b| {
        let scheduler = Scheduler::new();
        b.iter(|| {
            let tasks: Vec<Arc<Task>> = (0..64).map(|_| noop_task()).collect();
            let mut graph = TaskGraph::new();
            for task in &tasks {
                graph.add_task(task.clone());
            }
            for pair in tasks.windows(2) {
                graph.add_dependency(&pair[1], &pair[0]).unwrap();
            }
            let report = scheduler.run(graph, &mut RenderContext::new());
            black_box(report.executed)
        });
    });
}

fn bench_produce_normals(c: &mut Criterion) {
    let config = TerrainConfig::from_json_str(
        r#"{
            "caches": [{ "name": "terrain", "capacity": 64 }],
            "producers": [
                { "name": "elevation", "cache": "terrain", "kind": "elevation",
                  "layout": { "tile_size": 32, "border": 2, "max_level": 8 } },
                { "name": "normals", "cache": "terrain", "kind": "normal",
                  "layout": { "tile_size": 32, "border": 1, "max_level": 8 },
                  "elevation": "elevation", "world_size": 20000.0 }
            ]
        }"#,
    )
    .unwrap();
    let registry = ProducerRegistry::from_config(&config).unwrap();
    let elevation = registry.producer("elevation").unwrap();
    let normals = registry.producer("normals").unwrap();
    let scheduler = Scheduler::new();
    let mut ctx = RenderContext::new();

    c.bench_function("produce_normals_level4", |b| {
        b.iter(|| {
            // Rebuild the whole chain each iteration
            elevation.invalidate_tiles();
            let tile = get_ready_tile(
                normals.as_ref(),
                black_box(TileAddress::new(4, 7, 9)),
                Deadline::IMMEDIATE,
                &scheduler,
                &mut ctx,
            )
            .unwrap();
            normals.put_tile(&tile);
        });
    });
}

criterion_group!(
    benches,
    bench_cache_hit,
    bench_cache_churn,
    bench_graph_chain,
    bench_produce_normals,
);
criterion_main!(benches);
