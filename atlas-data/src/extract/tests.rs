//! Unit tests for region extraction and closure.

use super::*;
use crate::load::{BulkLoader, LoadMetadata, LoadOptions};
use crate::store::Store;
use atlas_core::test_support::{collection, multipolygon, point_at, sequence, tagged_point_at};
use atlas_core::{Coverer, Entity, Location, QuadCoverer, Region, RegionFormat};
use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use tempfile::TempDir;

struct Loaded {
    _dir: TempDir,
    store: Store,
}

fn load(entities: Vec<Entity>) -> Loaded {
    let dir = TempDir::new().expect("create temp dir");
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 temp dir");
    let store = Store::create(&root.join("atlas.db")).expect("create store");
    let mut loader = BulkLoader::new(
        &store,
        LoadOptions {
            sort_capacity: 4,
            ..LoadOptions::default()
        },
    )
    .expect("loader");
    for entity in &entities {
        loader.add(entity).expect("add entity");
    }
    loader.finish(&LoadMetadata::default()).expect("finish");
    Loaded { _dir: dir, store }
}

/// Two points inside the unit square, two outside, a boundary-crossing
/// sequence, a collection cycle and a multipolygon reaching outside.
#[fixture]
fn city() -> Loaded {
    load(vec![
        tagged_point_at(1, 0.5, 0.5, "name", "Inside").into(),
        point_at(2, 10.0, 10.0).into(),
        point_at(3, 20.0, 20.0).into(),
        point_at(4, 0.6, 0.6).into(),
        sequence(10, &[1, 2]).into(),
        sequence(11, &[3]).into(),
        sequence(12, &[99]).into(),
        collection(20, &[(EntityKind::Point, 1)]).into(),
        collection(
            21,
            &[(EntityKind::Collection, 20), (EntityKind::Collection, 22)],
        )
        .into(),
        collection(22, &[(EntityKind::Collection, 21)]).into(),
        multipolygon(30, &[10, 11, 13]).into(),
    ])
}

fn unit_square() -> Vec<CellId> {
    let region = Region::parse(RegionFormat::Bbox, "0,0,1,1").expect("valid bbox");
    QuadCoverer::default().covering(&region)
}

fn ids(set: &RoaringTreemap) -> Vec<u64> {
    set.iter().collect()
}

#[rstest]
fn closure_follows_references_to_a_fixed_point(city: Loaded) {
    let txn = city.store.read().expect("read txn");
    let selection = Extractor::new(&txn)
        .run(&unit_square(), &ExtractOptions::default())
        .expect("extract");

    assert_eq!(ids(&selection.points), vec![1, 2, 3, 4]);
    assert_eq!(ids(&selection.sequences), vec![10, 11]);
    assert_eq!(ids(&selection.collections), vec![20, 21, 22, 30]);
}

#[rstest]
fn sequences_are_completed_without_nested_pass(city: Loaded) {
    let txn = city.store.read().expect("read txn");
    let selection = Extractor::new(&txn)
        .run(
            &unit_square(),
            &ExtractOptions {
                nested_completeness: false,
            },
        )
        .expect("extract");

    assert_eq!(ids(&selection.points), vec![1, 2, 4]);
    assert_eq!(ids(&selection.sequences), vec![10]);
    assert_eq!(
        selection.stats(4),
        ExtractStats {
            cells: 4,
            points: 3,
            sequences: 1,
            collections: 4,
        }
    );
}

#[rstest]
fn empty_cells_yield_an_empty_selection(city: Loaded) {
    let txn = city.store.read().expect("read txn");
    let far = CellId::leaf(Location::from_degrees(-120.0, -45.0).expect("valid coordinate"));
    let selection = Extractor::new(&txn)
        .run(&[far, far.parent(4)], &ExtractOptions::default())
        .expect("extract");
    assert_eq!(selection, Selection::default());
}

#[rstest]
fn cells_finer_than_the_leaf_level_scan_their_leaf(city: Loaded) {
    let txn = city.store.read().expect("read txn");
    let location = Location::from_degrees(0.6, 0.6).expect("valid coordinate");
    let fine = CellId::from_location(location, LEAF_LEVEL + 4);
    let selection = Extractor::new(&txn)
        .run(&[fine], &ExtractOptions::default())
        .expect("extract");
    assert!(selection.points.contains(4));
}

#[rstest]
fn writes_json_lines_and_skips_missing_entities(city: Loaded) {
    let txn = city.store.read().expect("read txn");
    let mut selection = Extractor::new(&txn)
        .run(&unit_square(), &ExtractOptions::default())
        .expect("extract");
    selection.points.insert(500);
    selection.sequences.insert(12);
    selection.sequences.insert(600);

    let mut out = Vec::new();
    let summary = write_selection(&txn, &selection, &mut out).expect("write");
    assert_eq!(
        summary,
        WriteSummary {
            points: 4,
            sequences: 3,
            collections: 4,
        }
    );

    let text = String::from_utf8(out).expect("utf-8 output");
    let records: Vec<Value> = text
        .lines()
        .map(|line| serde_json::from_str(line).expect("json line"))
        .collect();
    assert_eq!(records.len(), 11);
    let first = records.first().expect("first record");
    assert_eq!(first["type"], "point");
    assert_eq!(first["id"], 1);
    assert_eq!(first["tags"]["name"], "Inside");
    let last = records.last().expect("last record");
    assert_eq!(last["type"], "collection");
    assert_eq!(last["id"], 30);
    assert_eq!(last["members"][0]["type"], "sequence");
    assert_eq!(last["members"][0]["role"], "outer");
}
