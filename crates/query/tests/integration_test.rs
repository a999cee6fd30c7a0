//! End-to-end tests for Sculpin collections.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sculpin_core::{CollectionSettings, Metric, QuerySettings, VectorId};
use sculpin_index::{brute_force_search, CancelFlag};
use sculpin_query::{
    Catalog, CreateCollection, ErrorKind, IndexState, OperatorRegistry, PipelineSpec,
    QueryEngine, SearchRequest, StageSpec,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;

fn random_vector(rng: &mut StdRng, dim: usize) -> Vec<f32> {
    (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

fn settings(metric: Metric, partitions: usize, threshold: usize) -> CollectionSettings {
    CollectionSettings {
        metric,
        num_partitions: partitions,
        train_threshold: threshold,
        seed: Some(42),
        ..Default::default()
    }
}

fn engine_at(catalog: Catalog) -> QueryEngine {
    QueryEngine::new(
        Arc::new(catalog),
        QuerySettings::default(),
        CollectionSettings::default(),
    )
}

fn in_memory_engine() -> QueryEngine {
    engine_at(Catalog::in_memory(Arc::new(OperatorRegistry::builtin())))
}

fn create(engine: &QueryEngine, name: &str, dimension: usize, settings: CollectionSettings) {
    engine
        .create_collection(CreateCollection {
            name: name.to_string(),
            dimension,
            settings: Some(settings),
            pipeline: None,
        })
        .unwrap();
}

fn load_random(engine: &QueryEngine, name: &str, n: u64, dim: usize, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let records: Vec<Value> = (0..n)
        .map(|i| json!({"id": i, "vector": random_vector(&mut rng, dim)}))
        .collect();
    let report = engine.insert(name, records, false).unwrap();
    assert_eq!(report.failed, 0);
}

fn search(engine: &QueryEngine, name: &str, vector: Vec<f32>, k: usize, nprobe: usize) -> Vec<u64> {
    let request = SearchRequest {
        vector,
        top_k: Some(k),
        nprobe: Some(nprobe),
        include_payload: false,
    };
    engine
        .search(name, &request)
        .unwrap()
        .into_iter()
        .map(|h| h.id.get())
        .collect()
}

#[test]
fn test_four_dimensional_example() {
    let engine = in_memory_engine();
    create(&engine, "example", 4, settings(Metric::L2, 2, 3));

    let records = vec![
        json!({"id": 1, "vector": [0.0, 0.0, 0.0, 0.0]}),
        json!({"id": 2, "vector": [10.0, 10.0, 10.0, 10.0]}),
        json!({"id": 3, "vector": [10.0, 10.0, 10.0, 0.0]}),
    ];
    engine.insert("example", records, false).unwrap();
    assert_eq!(engine.stats("example").unwrap().state, IndexState::Indexed);

    assert_eq!(search(&engine, "example", vec![10.0, 10.0, 9.0, 0.0], 1, 2), vec![3]);
    assert_eq!(engine.count("example").unwrap(), 3);
}

#[test]
fn test_exhaustive_probe_equals_brute_force() {
    let engine = in_memory_engine();
    for metric in [Metric::L2, Metric::Cosine] {
        let name = format!("exact_{}", metric);
        create(&engine, &name, 16, settings(metric, 8, 100));
        load_random(&engine, &name, 500, 16, 7);
        assert_eq!(engine.stats(&name).unwrap().state, IndexState::Indexed);

        let collection = engine.catalog().get(&name).unwrap();
        let mut rng = StdRng::seed_from_u64(99);
        for _ in 0..10 {
            let query = random_vector(&mut rng, 16);
            let ivf = search(&engine, &name, query.clone(), 20, 8);
            let exact: Vec<u64> = collection.with_store(|store| {
                brute_force_search(store, &query, 20, metric)
                    .unwrap()
                    .into_iter()
                    .map(|r| r.id.get())
                    .collect()
            });
            assert_eq!(ivf, exact);
        }
    }
}

#[test]
fn test_recall_improves_with_probes() {
    let engine = in_memory_engine();
    create(&engine, "recall", 8, settings(Metric::L2, 16, 100));
    load_random(&engine, "recall", 2000, 8, 11);

    let collection = engine.catalog().get("recall").unwrap();
    let mut rng = StdRng::seed_from_u64(5);
    let mut hits_narrow = 0;
    let mut hits_full = 0;
    for _ in 0..20 {
        let query = random_vector(&mut rng, 8);
        let truth: Vec<u64> = collection.with_store(|store| {
            brute_force_search(store, &query, 10, Metric::L2)
                .unwrap()
                .into_iter()
                .map(|r| r.id.get())
                .collect()
        });
        let narrow = search(&engine, "recall", query.clone(), 10, 1);
        let full = search(&engine, "recall", query, 10, 16);
        hits_narrow += narrow.iter().filter(|id| truth.contains(id)).count();
        hits_full += full.iter().filter(|id| truth.contains(id)).count();
    }
    assert_eq!(hits_full, 200);
    assert!(hits_narrow <= hits_full);
}

#[test]
fn test_batch_with_malformed_records() {
    let engine = in_memory_engine();
    create(&engine, "batch", 3, settings(Metric::L2, 2, 1000));

    let mut records: Vec<Value> = (0..10)
        .map(|i| json!({"id": i, "vector": [i as f32, 1.0, 2.0]}))
        .collect();
    records[2] = json!({"id": 2, "vector": [1.0, 2.0]});
    records[5] = json!({"id": 5, "vector": [1.0, "x", 2.0]});
    records[7] = json!({"id": 7});

    let report = engine.insert("batch", records, false).unwrap();
    assert_eq!(report.inserted, 7);
    assert_eq!(report.failed, 3);
    let failed: Vec<usize> = report.items.iter().filter(|i| !i.ok).map(|i| i.index).collect();
    assert_eq!(failed, vec![2, 5, 7]);
    assert_eq!(engine.count("batch").unwrap(), 7);
}

#[test]
fn test_deleted_vectors_never_returned() {
    let engine = in_memory_engine();
    create(&engine, "del", 4, settings(Metric::L2, 4, 50));
    load_random(&engine, "del", 200, 4, 3);

    for id in (0..200).step_by(2) {
        engine.delete("del", VectorId(id)).unwrap();
    }
    assert_eq!(engine.count("del").unwrap(), 100);

    let mut rng = StdRng::seed_from_u64(8);
    for _ in 0..10 {
        let ids = search(&engine, "del", random_vector(&mut rng, 4), 100, 4);
        assert_eq!(ids.len(), 100);
        assert!(ids.iter().all(|id| id % 2 == 1));
    }
    assert_eq!(
        engine.get("del", VectorId(0)).unwrap_err().kind(),
        ErrorKind::NotFound
    );
}

#[test]
fn test_pipeline_normalizes_and_keeps_payload() {
    let engine = in_memory_engine();
    let pipeline = PipelineSpec {
        source_fields: vec!["id".into(), "embedding".into(), "answer".into()],
        stages: vec![
            StageSpec {
                operator: "parse_vector".into(),
                inputs: vec!["embedding".into()],
                output: Some("vector".into()),
                params: Value::Null,
            },
            StageSpec {
                operator: "normalize".into(),
                inputs: vec!["vector".into()],
                output: Some("vector".into()),
                params: Value::Null,
            },
            StageSpec {
                operator: "drop_fields".into(),
                inputs: vec!["embedding".into()],
                output: None,
                params: Value::Null,
            },
        ],
        ..Default::default()
    };
    engine
        .create_collection(CreateCollection {
            name: "qa".into(),
            dimension: 2,
            settings: Some(settings(Metric::Cosine, 1, 1000)),
            pipeline: Some(pipeline),
        })
        .unwrap();

    let report = engine
        .insert(
            "qa",
            vec![
                json!({"id": 1, "embedding": "3, 4", "answer": "yes"}),
                json!({"id": 2, "embedding": "[0, 2]", "answer": "no"}),
            ],
            false,
        )
        .unwrap();
    assert_eq!(report.inserted, 2);

    let record = engine.get("qa", VectorId(1)).unwrap();
    assert!((record.vector[0] - 0.6).abs() < 1e-6);
    assert!((record.vector[1] - 0.8).abs() < 1e-6);
    assert_eq!(record.payload, Some(json!({"answer": "yes"})));

    let hits = engine
        .search(
            "qa",
            &SearchRequest {
                vector: vec![0.0, 5.0],
                top_k: Some(1),
                nprobe: None,
                include_payload: true,
            },
        )
        .unwrap();
    assert_eq!(hits[0].id, VectorId(2));
    assert_eq!(hits[0].payload, Some(json!({"answer": "no"})));
}

#[test]
fn test_persistence_roundtrip() {
    let dir = tempdir().unwrap();
    {
        let engine = engine_at(Catalog::open(dir.path(), Arc::new(OperatorRegistry::builtin())).unwrap());
        create(&engine, "kept", 8, settings(Metric::L2, 4, 50));
        load_random(&engine, "kept", 120, 8, 21);
        engine.delete("kept", VectorId(7)).unwrap();
    }

    let engine = engine_at(Catalog::open(dir.path(), Arc::new(OperatorRegistry::builtin())).unwrap());
    let stats = engine.stats("kept").unwrap();
    assert_eq!(stats.count, 119);
    assert_eq!(stats.state, IndexState::Indexed);
    assert_eq!(stats.num_partitions, 4);
    assert_eq!(
        engine.get("kept", VectorId(7)).unwrap_err().kind(),
        ErrorKind::NotFound
    );

    let mut rng = StdRng::seed_from_u64(21);
    let first = random_vector(&mut rng, 8);
    assert_eq!(search(&engine, "kept", first, 1, 4), vec![0]);
}

#[test]
fn test_concurrent_search_during_ingest_and_rebuild() {
    let engine = Arc::new(in_memory_engine());
    create(&engine, "busy", 8, settings(Metric::L2, 4, 64));
    load_random(&engine, "busy", 256, 8, 1);

    let writer = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            let mut rng = StdRng::seed_from_u64(2);
            for batch in 0..10u64 {
                let records: Vec<Value> = (0..32)
                    .map(|i| json!({"id": 1000 + batch * 32 + i, "vector": random_vector(&mut rng, 8)}))
                    .collect();
                let report = engine.insert("busy", records, false).unwrap();
                assert_eq!(report.inserted, 32);
            }
        })
    };
    let rebuilder = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            for _ in 0..3 {
                engine.rebuild("busy", &CancelFlag::new()).unwrap();
            }
        })
    };
    let readers: Vec<_> = (0..4u64)
        .map(|seed| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(100 + seed);
                for _ in 0..50 {
                    let ids = search(&engine, "busy", random_vector(&mut rng, 8), 10, 4);
                    assert_eq!(ids.len(), 10);
                }
            })
        })
        .collect();

    writer.join().unwrap();
    rebuilder.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    let stats = engine.stats("busy").unwrap();
    assert_eq!(stats.count, 256 + 320);
    assert_eq!(stats.state, IndexState::Indexed);
    assert_eq!(stats.partition_sizes.iter().sum::<usize>(), 256 + 320);
}

#[test]
fn test_cancelled_rebuild_keeps_index() {
    let engine = in_memory_engine();
    create(&engine, "cancel", 4, settings(Metric::L2, 4, 40));
    load_random(&engine, "cancel", 100, 4, 9);
    let before = engine.stats("cancel").unwrap().partition_sizes;

    let cancel = CancelFlag::new();
    cancel.cancel();
    let err = engine.rebuild("cancel", &cancel).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);

    let after = engine.stats("cancel").unwrap();
    assert_eq!(after.state, IndexState::Indexed);
    assert_eq!(after.partition_sizes, before);
}
