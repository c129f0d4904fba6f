//! Behavioural tests for applying change batches.

use atlas_core::test_support::{point_at, sequence};
use atlas_core::{CellId, Change, Location};
use atlas_data::{BatchMarker, Finish, IndexTable, Store, Txn, UpdateReport, apply_batch};
use camino::Utf8PathBuf;
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use std::cell::RefCell;
use tempfile::TempDir;

struct Scratch {
    _dir: TempDir,
    store: Store,
}

#[fixture]
fn scratch() -> RefCell<Option<Scratch>> {
    RefCell::new(None)
}

#[fixture]
fn report() -> RefCell<Option<UpdateReport>> {
    RefCell::new(None)
}

fn marker() -> BatchMarker {
    BatchMarker {
        sequence_number: "1".to_owned(),
        timestamp: "2024-05-01T00:00:00Z".to_owned(),
    }
}

fn apply(scratch: &RefCell<Option<Scratch>>, change: Change, finish: Finish) -> UpdateReport {
    let guard = scratch.borrow();
    let store = &guard.as_ref().expect("store created").store;
    apply_batch(store, &[change], &marker(), finish)
        .expect("apply batch")
        .report
}

fn id_list(text: &str) -> Vec<u64> {
    text.trim_matches('"')
        .split(',')
        .map(|part| part.trim().parse().expect("numeric id"))
        .collect()
}

fn leaf(lon: f64, lat: f64) -> u64 {
    CellId::leaf(Location::from_degrees(lon, lat).expect("valid coordinate")).raw()
}

fn indexed(scratch: &RefCell<Option<Scratch>>, table: IndexTable, key: u64, value: u64) -> bool {
    let guard = scratch.borrow();
    let txn = guard
        .as_ref()
        .expect("store created")
        .store
        .read()
        .expect("read txn");
    txn.index(table).contains(key, value).expect("lookup")
}

#[given("an empty store")]
fn given_empty_store(#[from(scratch)] scratch: &RefCell<Option<Scratch>>) {
    let dir = TempDir::new().expect("create temp dir");
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 temp dir");
    let store = Store::create(&root.join("atlas.db")).expect("create store");
    *scratch.borrow_mut() = Some(Scratch { _dir: dir, store });
}

#[given("point {id} at longitude {lon} latitude {lat} is committed")]
fn given_point(#[from(scratch)] scratch: &RefCell<Option<Scratch>>, id: u64, lon: f64, lat: f64) {
    apply(
        scratch,
        Change::Create(point_at(id, lon, lat).into()),
        Finish::Commit,
    );
}

#[given("sequence {id} over points {members} is committed")]
fn given_sequence(#[from(scratch)] scratch: &RefCell<Option<Scratch>>, id: u64, members: String) {
    apply(
        scratch,
        Change::Create(sequence(id, &id_list(&members)).into()),
        Finish::Commit,
    );
}

#[when("point {id} is moved to longitude {lon} latitude {lat}")]
fn when_point_moves(
    #[from(scratch)] scratch: &RefCell<Option<Scratch>>,
    #[from(report)] report: &RefCell<Option<UpdateReport>>,
    id: u64,
    lon: f64,
    lat: f64,
) {
    let outcome = apply(
        scratch,
        Change::Modify(point_at(id, lon, lat).into()),
        Finish::Commit,
    );
    *report.borrow_mut() = Some(outcome);
}

#[when("a batch changing sequence {id} to points {members} is aborted")]
fn when_sequence_aborted(
    #[from(scratch)] scratch: &RefCell<Option<Scratch>>,
    #[from(report)] report: &RefCell<Option<UpdateReport>>,
    id: u64,
    members: String,
) {
    let outcome = apply(
        scratch,
        Change::Modify(sequence(id, &id_list(&members)).into()),
        Finish::Abort,
    );
    *report.borrow_mut() = Some(outcome);
}

#[when("sequence {id} is changed to points {members}")]
fn when_sequence_changes(
    #[from(scratch)] scratch: &RefCell<Option<Scratch>>,
    #[from(report)] report: &RefCell<Option<UpdateReport>>,
    id: u64,
    members: String,
) {
    let outcome = apply(
        scratch,
        Change::Modify(sequence(id, &id_list(&members)).into()),
        Finish::Commit,
    );
    *report.borrow_mut() = Some(outcome);
}

#[then("the cell index holds point {id} at longitude {lon} latitude {lat}")]
fn then_cell_holds(#[from(scratch)] scratch: &RefCell<Option<Scratch>>, id: u64, lon: f64, lat: f64) {
    assert!(indexed(scratch, IndexTable::CellPoint, leaf(lon, lat), id));
}

#[then("the cell index does not hold point {id} at longitude {lon} latitude {lat}")]
fn then_cell_lacks(#[from(scratch)] scratch: &RefCell<Option<Scratch>>, id: u64, lon: f64, lat: f64) {
    assert!(!indexed(scratch, IndexTable::CellPoint, leaf(lon, lat), id));
}

#[then("the points indexed for sequence {id} are {members}")]
fn then_sequence_members(
    #[from(scratch)] scratch: &RefCell<Option<Scratch>>,
    id: u64,
    members: String,
) {
    let guard = scratch.borrow();
    let txn = guard
        .as_ref()
        .expect("store created")
        .store
        .read()
        .expect("read txn");
    let pairs = txn
        .index(IndexTable::PointSequence)
        .cursor()
        .scan_range(0, u64::MAX)
        .expect("scan");
    let points: Vec<u64> = pairs
        .into_iter()
        .filter(|(_, owner)| *owner == id)
        .map(|(point, _)| point)
        .collect();
    assert_eq!(points, id_list(&members));
}

#[then("the batch made {inserts} index inserts and {deletes} index deletes")]
fn then_index_writes(
    #[from(report)] report: &RefCell<Option<UpdateReport>>,
    inserts: u64,
    deletes: u64,
) {
    let outcome = report.borrow().expect("batch applied");
    assert_eq!(
        (outcome.index_inserts, outcome.index_deletes),
        (inserts, deletes)
    );
}

#[scenario(path = "tests/features/update.feature", index = 0)]
fn scenario_point_moves(scratch: RefCell<Option<Scratch>>, report: RefCell<Option<UpdateReport>>) {
    let _ = (scratch, report);
}

#[scenario(path = "tests/features/update.feature", index = 1)]
fn scenario_sequence_difference(
    scratch: RefCell<Option<Scratch>>,
    report: RefCell<Option<UpdateReport>>,
) {
    let _ = (scratch, report);
}

#[scenario(path = "tests/features/update.feature", index = 2)]
fn scenario_abort(scratch: RefCell<Option<Scratch>>, report: RefCell<Option<UpdateReport>>) {
    let _ = (scratch, report);
}
