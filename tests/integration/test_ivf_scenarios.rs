//! End-to-end build and query scenarios over local table files.

use ivfdb::storage::Transaction;
use ivfdb::{
    CentroidId, DataRecord, IndexConfig, IndexInfo, IvfIndex, LeafId, LocalStorage,
    RecordPointer, SearchRange, TableDirectory, Vector,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

fn config(dimension: usize, level1: usize, level2: usize) -> IndexConfig {
    IndexConfig {
        dimension,
        level1_clusters: level1,
        level2_clusters: level2,
        probe_width: 2,
        seed: Some(42),
        ..IndexConfig::default()
    }
}

fn random_records(count: usize, dimension: usize, seed: u64) -> Vec<DataRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|i| {
            let values = (0..dimension).map(|_| rng.random::<f32>()).collect();
            DataRecord::new(
                Vector::new(values),
                RecordPointer::new(i as u64 / 8, (i % 8) as i32),
            )
        })
        .collect()
}

fn build(
    storage: &LocalStorage,
    config: IndexConfig,
    records: &[DataRecord],
) -> IvfIndex {
    let index = IvfIndex::new(IndexInfo::new("scenario", "items", "v", config)).unwrap();
    let tx = storage.begin_bulk();
    for record in records {
        index.insert(record.clone(), &tx).unwrap();
    }
    index.build_index(&tx).unwrap();
    index
}

fn count_postings_rows(index: &IvfIndex, directory: &TableDirectory, tx: &dyn Transaction) -> usize {
    let mut rows = 0;
    for entry in directory.leaves.values() {
        if !tx.table_exists(&entry.table).unwrap() {
            continue;
        }
        let mut file = tx
            .open_table(&entry.table, index.codec().postings_schema(), false)
            .unwrap();
        file.before_first().unwrap();
        while file.next().unwrap() {
            rows += 1;
        }
        file.close();
    }
    rows
}

#[test]
fn test_thousand_vectors_fill_leaf_postings_exactly() {
    let dir = TempDir::new().unwrap();
    let storage = LocalStorage::open(dir.path(), 4096, 256).unwrap();
    let records = random_records(1000, 4, 7);
    let index = build(&storage, config(4, 2, 4), &records);

    let directory = index.directory().unwrap();
    let tx = storage.begin();
    assert_eq!(count_postings_rows(&index, &directory, &tx), 1000);
    assert_eq!(directory.record_count, 1000);
    assert!(directory.level2.len() <= 2);
    assert!(directory.leaves.len() <= 8);
}

#[test]
fn test_every_record_retrieves_itself() {
    let dir = TempDir::new().unwrap();
    let storage = LocalStorage::open(dir.path(), 4096, 256).unwrap();
    let records = random_records(1000, 4, 11);
    let index = build(&storage, config(4, 2, 4), &records);
    let tx = storage.begin();

    for record in &records {
        let mut scan = index
            .open_scan(&SearchRange::point(record.vector.clone()), &tx)
            .unwrap();
        let mut found = false;
        while scan.advance().unwrap() {
            if scan.current_payload().unwrap() == record.payload {
                found = true;
                break;
            }
        }
        scan.close();
        assert!(found, "record {} not found by its own vector", record.payload);
    }
}

#[test]
fn test_leaf_centroid_query_selects_its_own_leaf() {
    let dir = TempDir::new().unwrap();
    let storage = LocalStorage::open(dir.path(), 4096, 256).unwrap();
    let records = random_records(1000, 4, 13);
    let index = build(&storage, config(4, 2, 4), &records);
    let directory = index.directory().unwrap();
    let tx = storage.begin();

    for (&level1, table) in &directory.level2 {
        let mut file = tx
            .open_table(table, index.codec().centroid_schema(), false)
            .unwrap();
        let mut centroids = Vec::new();
        file.before_first().unwrap();
        while file.next().unwrap() {
            centroids.push(index.codec().read_centroid(file.as_ref()).unwrap());
        }
        file.close();

        for centroid in centroids {
            let scan = index
                .open_scan(&SearchRange::point(centroid.vector.clone()), &tx)
                .unwrap();
            assert_eq!(
                scan.candidates().first(),
                Some(&LeafId::new(level1, centroid.id)),
            );
        }
    }
}

#[test]
fn test_empty_leaf_has_no_table_and_is_skipped() {
    let dir = TempDir::new().unwrap();
    let storage = LocalStorage::open(dir.path(), 4096, 64).unwrap();
    // Identical vectors: every record lands on level-2 centroid 0
    let records: Vec<DataRecord> = (0..10)
        .map(|i| DataRecord::new(Vector::new(vec![1.0, 2.0, 3.0, 4.0]), RecordPointer::new(i, 0)))
        .collect();
    let config = IndexConfig {
        probe_width: 3,
        ..config(4, 1, 3)
    };
    let index = build(&storage, config, &records);
    let directory = index.directory().unwrap();
    let tx = storage.begin();

    let level1 = CentroidId::new(0);
    for level2 in 1..3 {
        let leaf = LeafId::new(level1, CentroidId::new(level2));
        let table = directory.leaf_table(leaf).unwrap();
        assert!(!tx.table_exists(table).unwrap(), "leaf {leaf} should have no table");
    }

    let mut scan = index
        .open_scan(&SearchRange::point(Vector::new(vec![1.0, 2.0, 3.0, 4.0])), &tx)
        .unwrap();
    assert_eq!(scan.candidates().len(), 3);
    let mut rows = 0;
    while scan.advance().unwrap() {
        rows += 1;
    }
    assert_eq!(rows, 10);
}

#[test]
fn test_dataset_size_equal_to_level1_k() {
    let dir = TempDir::new().unwrap();
    let storage = LocalStorage::open(dir.path(), 4096, 64).unwrap();
    let records = random_records(5, 4, 3);
    let index = build(&storage, config(4, 5, 200), &records);

    let directory = index.directory().unwrap();
    assert_eq!(directory.record_count, 5);
    let tx = storage.begin();
    assert_eq!(count_postings_rows(&index, &directory, &tx), 5);

    for record in &records {
        let hits = index.search(&record.vector, 1, &tx).unwrap();
        assert_eq!(hits[0].payload, record.payload);
    }
}

#[test]
fn test_rebuild_keeps_records_and_queries_stay_valid() {
    let dir = TempDir::new().unwrap();
    let storage = LocalStorage::open(dir.path(), 4096, 256).unwrap();
    let records = random_records(300, 4, 21);
    let index = build(&storage, config(4, 3, 4), &records);

    let tx = storage.begin_bulk();
    let extra = DataRecord::new(Vector::new(vec![0.5; 4]), RecordPointer::new(10_000, 0));
    index.insert(extra.clone(), &tx).unwrap();
    let directory = index.build_index(&tx).unwrap();

    assert_eq!(directory.generation, 2);
    assert_eq!(count_postings_rows(&index, &directory, &tx), 301);
    let hits = index.search(&extra.vector, 1, &tx).unwrap();
    assert_eq!(hits[0].payload, extra.payload);
}
