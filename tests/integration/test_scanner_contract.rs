//! Scanner lifecycle and query-shape errors seen from outside the crate.

use ivfdb::{
    DataRecord, IndexConfig, IndexInfo, IvfError, IvfIndex, LocalStorage, RecordPointer,
    ScanState, SearchKey, SearchRange, Vector,
};
use tempfile::TempDir;

fn small_index(storage: &LocalStorage, build: bool) -> IvfIndex {
    let config = IndexConfig {
        dimension: 2,
        level1_clusters: 2,
        level2_clusters: 2,
        seed: Some(5),
        ..IndexConfig::default()
    };
    let index = IvfIndex::new(IndexInfo::new("contract", "t", "v", config)).unwrap();
    let tx = storage.begin_bulk();
    for i in 0..20u64 {
        let v = Vector::new(vec![(i % 5) as f32, (i / 5) as f32]);
        index
            .insert(DataRecord::new(v, RecordPointer::new(i, 0)), &tx)
            .unwrap();
    }
    if build {
        index.build_index(&tx).unwrap();
    }
    index
}

#[test]
fn test_unbuilt_index_reports_not_built() {
    let dir = TempDir::new().unwrap();
    let storage = LocalStorage::open(dir.path(), 1024, 16).unwrap();
    let index = small_index(&storage, false);
    let tx = storage.begin();

    let result = index.open_scan(&SearchRange::point(Vector::new(vec![0.0, 0.0])), &tx);
    assert!(matches!(result, Err(IvfError::IndexNotBuilt { .. })));
}

#[test]
fn test_multi_value_range_is_rejected() {
    let dir = TempDir::new().unwrap();
    let storage = LocalStorage::open(dir.path(), 1024, 16).unwrap();
    let index = small_index(&storage, true);
    let tx = storage.begin();

    let range = SearchRange::Values(vec![
        SearchKey::new(Vector::new(vec![0.0, 0.0])),
        SearchKey::new(Vector::new(vec![1.0, 1.0])),
    ]);
    let err = index.open_scan(&range, &tx).unwrap_err();
    assert!(matches!(err, IvfError::UnsupportedQueryShape { .. }));
    assert_eq!(err.status_code(), "UNSUPPORTED_QUERY_SHAPE");
}

#[test]
fn test_advance_before_open_is_an_error() {
    let dir = TempDir::new().unwrap();
    let storage = LocalStorage::open(dir.path(), 1024, 16).unwrap();
    let index = small_index(&storage, true);
    let tx = storage.begin();

    let mut scan = index.scanner(&tx);
    assert_eq!(scan.state(), ScanState::Closed);
    assert!(matches!(scan.advance(), Err(IvfError::ScanNotPositioned)));
    assert!(scan.current_payload().is_err());
}

#[test]
fn test_close_twice_then_advance_fails() {
    let dir = TempDir::new().unwrap();
    let storage = LocalStorage::open(dir.path(), 1024, 16).unwrap();
    let index = small_index(&storage, true);
    let tx = storage.begin();

    let mut scan = index
        .open_scan(&SearchRange::point(Vector::new(vec![2.0, 2.0])), &tx)
        .unwrap();
    assert_eq!(scan.state(), ScanState::Positioned);
    assert!(scan.advance().unwrap());

    scan.close();
    scan.close();
    assert_eq!(scan.state(), ScanState::Closed);
    assert!(matches!(scan.advance(), Err(IvfError::ScanNotPositioned)));
}

#[test]
fn test_exhausted_scan_keeps_returning_false() {
    let dir = TempDir::new().unwrap();
    let storage = LocalStorage::open(dir.path(), 1024, 16).unwrap();
    let index = small_index(&storage, true);
    let tx = storage.begin();

    let mut scan = index
        .open_scan(&SearchRange::point(Vector::new(vec![4.0, 3.0])), &tx)
        .unwrap();
    while scan.advance().unwrap() {}
    assert_eq!(scan.state(), ScanState::Exhausted);
    assert!(!scan.advance().unwrap());

    // Reopening repositions the same scanner
    scan.open(&SearchRange::point(Vector::new(vec![0.0, 0.0]))).unwrap();
    assert!(scan.advance().unwrap());
}

#[test]
fn test_wrong_query_dimension() {
    let dir = TempDir::new().unwrap();
    let storage = LocalStorage::open(dir.path(), 1024, 16).unwrap();
    let index = small_index(&storage, true);
    let tx = storage.begin();

    let result = index.open_scan(&SearchRange::point(Vector::new(vec![1.0, 2.0, 3.0])), &tx);
    assert!(matches!(
        result,
        Err(IvfError::DimensionMismatch {
            expected: 2,
            actual: 3
        })
    ));
}
