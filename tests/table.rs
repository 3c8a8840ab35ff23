// Copyright 2025 Mica Project Authors. Licensed under Apache-2.0.

//! End-to-end tests of the table storage engine through the collection API.

use std::sync::Arc;

use itertools::Itertools;
use mica::buffer::BufferManager;
use mica::storage::{
    Collection, ColumnDefinition, ComparisonOp, StorageError, StorageIndex, StorageOptions,
    TableFilter, TableFilterSet, TableScanType, TransactionData, TRANSACTION_ID_START,
};
use mica::types::{DataValue, LogicalType, StructField};
use mica::vector::{DataChunk, ListEntry};

const TXN: u64 = TRANSACTION_ID_START;

fn small_options() -> StorageOptions {
    StorageOptions {
        // Small blocks force several segments per column.
        block_size: 4096,
        row_group_size: 2048,
    }
}

fn new_collection(types: Vec<LogicalType>, options: &StorageOptions) -> Arc<Collection> {
    let buffer_manager = BufferManager::new(options.block_size);
    Collection::new(buffer_manager, types, 0, 0, options).unwrap()
}

/// Appends `rows` under transaction id `txn_id` and commits at `commit_id`.
fn append_committed(collection: &Collection, rows: &[Vec<DataValue>], txn_id: u64, commit_id: u64) {
    let row_start = collection.total_rows();
    let chunk = DataChunk::from_rows(collection.types(), rows);
    let mut state = collection
        .initialize_append(TransactionData::new(txn_id, txn_id))
        .unwrap();
    collection.append(&chunk, &mut state).unwrap();
    collection.finalize_append(&mut state).unwrap();
    drop(state);
    collection
        .commit_append(commit_id, row_start, rows.len() as u64)
        .unwrap();
}

fn bigint_rows(range: std::ops::Range<i64>) -> Vec<Vec<DataValue>> {
    range
        .map(|i| vec![DataValue::Int64(i), DataValue::Int64(i + 1)])
        .collect()
}

fn collect_column(collection: &Collection, column: usize, snapshot: u64) -> Vec<DataValue> {
    let mut values = vec![];
    collection
        .scan_all(TransactionData::new(snapshot, snapshot), |chunk| {
            for row in 0..chunk.size() {
                values.push(chunk.column(column).value(row));
            }
            true
        })
        .unwrap();
    values
}

#[test]
fn append_and_scan_roundtrip() {
    let options = small_options();
    let collection = new_collection(vec![LogicalType::BigInt, LogicalType::BigInt], &options);
    assert!(collection.is_empty());
    append_committed(&collection, &bigint_rows(0..100), TXN, 10);
    assert!(!collection.is_empty());
    assert!(collection.allocation_size() > 0);

    let values = collect_column(&collection, 0, 20);
    assert_eq!(values.len(), 100);
    for (i, v) in values.iter().enumerate() {
        assert_eq!(*v, DataValue::Int64(i as i64));
    }
}

#[test]
fn multiple_row_groups_stay_contiguous() {
    let options = small_options();
    let collection = new_collection(vec![LogicalType::BigInt, LogicalType::BigInt], &options);
    append_committed(&collection, &bigint_rows(0..5000), TXN, 10);

    assert_eq!(collection.total_rows(), 5000);
    assert!(collection.row_group_count() >= 3);
    let mut expected_start = 0;
    for i in 0..collection.row_group_count() {
        let row_group = collection.row_group(i as i64).unwrap();
        assert_eq!(
            mica::storage::SegmentNode::start(row_group.as_ref()),
            expected_start
        );
        expected_start += mica::storage::SegmentNode::count(row_group.as_ref());
    }
    assert_eq!(expected_start, 5000);

    let values = collect_column(&collection, 0, 20);
    assert_eq!(values.len(), 5000);
    assert_eq!(values[4999], DataValue::Int64(4999));
}

#[test]
fn snapshot_isolation_for_uncommitted_appends() {
    let options = small_options();
    let collection = new_collection(vec![LogicalType::BigInt, LogicalType::BigInt], &options);

    // Append under an uncommitted transaction.
    let chunk = DataChunk::from_rows(collection.types(), &bigint_rows(0..10));
    let txn = TransactionData::new(TXN + 1, 50);
    let mut state = collection.initialize_append(txn).unwrap();
    collection.append(&chunk, &mut state).unwrap();
    collection.finalize_append(&mut state).unwrap();
    drop(state);

    // The appending transaction sees its own rows.
    let mut own = 0;
    collection
        .scan_all(txn, |chunk| {
            own += chunk.size();
            true
        })
        .unwrap();
    assert_eq!(own, 10);

    // A concurrent snapshot does not.
    assert_eq!(collect_column(&collection, 0, 50).len(), 0);

    // After commit, snapshots started later do.
    collection.commit_append(60, 0, 10).unwrap();
    assert_eq!(collect_column(&collection, 0, 61).len(), 10);
    // Snapshots from before the commit still do not.
    assert_eq!(collect_column(&collection, 0, 55).len(), 0);
}

#[test]
fn revert_append_truncates() {
    let options = small_options();
    let collection = new_collection(vec![LogicalType::BigInt, LogicalType::BigInt], &options);
    append_committed(&collection, &bigint_rows(0..50), TXN, 10);

    // A second append that gets rolled back, spanning a row group boundary.
    let chunk = DataChunk::from_rows(collection.types(), &bigint_rows(50..4000));
    let mut state = collection
        .initialize_append(TransactionData::new(TXN + 1, 20))
        .unwrap();
    collection.append(&chunk, &mut state).unwrap();
    collection.finalize_append(&mut state).unwrap();
    drop(state);
    assert_eq!(collection.total_rows(), 4000);

    collection.revert_append(50).unwrap();
    assert_eq!(collection.total_rows(), 50);
    let values = collect_column(&collection, 0, 30);
    assert_eq!(values.len(), 50);
    assert_eq!(values[49], DataValue::Int64(49));

    // The collection accepts appends again after the revert.
    append_committed(&collection, &bigint_rows(50..60), TXN + 2, 40);
    assert_eq!(collect_column(&collection, 0, 50).len(), 60);
}

#[test]
fn delete_rows_visibility_and_conflict() {
    let options = small_options();
    let collection = new_collection(vec![LogicalType::BigInt, LogicalType::BigInt], &options);
    append_committed(&collection, &bigint_rows(0..100), TXN, 10);

    let deleted = collection.delete_rows(TXN + 1, &[5, 6, 7]).unwrap();
    assert_eq!(deleted, 3);

    // Another snapshot still sees all rows while the delete is uncommitted.
    assert_eq!(collect_column(&collection, 0, 20).len(), 100);

    // A different transaction deleting an overlapping row conflicts.
    let err = collection.delete_rows(TXN + 2, &[6]).unwrap_err();
    assert_eq!(err, StorageError::Conflict("Conflict on tuple deletion!"));
    // Re-delete by the same transaction is a tolerated no-op.
    assert_eq!(collection.delete_rows(TXN + 1, &[6]).unwrap(), 0);
    // Disjoint deletes by another transaction succeed.
    assert_eq!(collection.delete_rows(TXN + 2, &[80]).unwrap(), 1);

    collection.commit_delete(30, &[5, 6, 7]).unwrap();
    let values = collect_column(&collection, 0, 40);
    // Rows 5, 6, 7 are committed-deleted before snapshot 40; the delete of
    // row 80 is still uncommitted and stays visible.
    assert_eq!(values.len(), 97);
    assert!(!values.contains(&DataValue::Int64(5)));
    assert!(!values.contains(&DataValue::Int64(6)));
    assert!(values.contains(&DataValue::Int64(80)));
}

#[test]
fn filter_scan_end_to_end() {
    let options = small_options();
    let collection = new_collection(vec![LogicalType::BigInt, LogicalType::BigInt], &options);
    // id = 0..100, count = 1..=100.
    append_committed(&collection, &bigint_rows(0..100), TXN, 10);

    let mut filters = TableFilterSet::default();
    filters.push_filter(
        1,
        TableFilter::ConstantComparison {
            op: ComparisonOp::GreaterThan,
            value: DataValue::Int64(90),
        },
    );
    let column_ids = vec![StorageIndex::new(0), StorageIndex::new(1)];
    let mut ids = vec![];
    collection
        .scan(
            TransactionData::new(20, 20),
            &column_ids,
            Some(&filters),
            |chunk| {
                for row in 0..chunk.size() {
                    ids.push(chunk.column(0).value(row));
                }
                true
            },
        )
        .unwrap();
    assert_eq!(ids.len(), 10);
    let expected = (90..100).map(DataValue::Int64).collect_vec();
    assert_eq!(ids, expected);
}

#[test]
fn adaptive_filter_reordering_never_changes_results() {
    let options = small_options();
    let collection = new_collection(vec![LogicalType::BigInt, LogicalType::BigInt], &options);
    // Enough batches per scan (~30) for the adaptive filter to leave its
    // warm-up and run execute/observe cycles with tentative swaps.
    append_committed(&collection, &bigint_rows(0..30000), TXN, 10);

    let mut filters = TableFilterSet::default();
    filters.push_filter(
        0,
        TableFilter::ConstantComparison {
            op: ComparisonOp::GreaterThanOrEqual,
            value: DataValue::Int64(100),
        },
    );
    filters.push_filter(
        1,
        TableFilter::ConstantComparison {
            op: ComparisonOp::LessThan,
            value: DataValue::Int64(2000),
        },
    );
    let column_ids = vec![StorageIndex::new(0), StorageIndex::new(1)];

    // id >= 100 AND count < 2000 <=> id in [100, 1999).
    let expected = (100..1999).map(DataValue::Int64).collect_vec();
    // Regardless of the permutation the filter converges to, the result
    // set must equal the declared-order evaluation.
    for _ in 0..5 {
        let mut ids = vec![];
        collection
            .scan(
                TransactionData::new(20, 20),
                &column_ids,
                Some(&filters),
                |chunk| {
                    for row in 0..chunk.size() {
                        ids.push(chunk.column(0).value(row));
                    }
                    true
                },
            )
            .unwrap();
        assert_eq!(ids, expected);
    }
}

#[test]
fn row_id_column_scan() {
    let options = small_options();
    let collection = new_collection(vec![LogicalType::BigInt, LogicalType::BigInt], &options);
    append_committed(&collection, &bigint_rows(0..10), TXN, 10);

    let column_ids = vec![StorageIndex::row_id(), StorageIndex::new(1)];
    let mut row_ids = vec![];
    collection
        .scan(TransactionData::new(20, 20), &column_ids, None, |chunk| {
            for row in 0..chunk.size() {
                row_ids.push(chunk.column(0).value(row));
            }
            true
        })
        .unwrap();
    let expected: Vec<DataValue> = (0..10).map(DataValue::Int64).collect();
    assert_eq!(row_ids, expected);
}

#[test]
fn update_conflict_and_commit_flow() {
    let options = small_options();
    let collection = new_collection(vec![LogicalType::BigInt, LogicalType::BigInt], &options);
    append_committed(&collection, &bigint_rows(0..100), TXN, 10);

    // Update count at rows 1 and 3.
    let updates = DataChunk::from_rows(
        &[LogicalType::BigInt],
        &[vec![DataValue::Int64(1000)], vec![DataValue::Int64(3000)]],
    );
    collection.update(&[1, 3], &[1], &updates).unwrap();

    // Regular scans observe the updated values.
    let values = collect_column(&collection, 1, 20);
    assert_eq!(values[1], DataValue::Int64(1000));
    assert_eq!(values[3], DataValue::Int64(3000));
    assert_eq!(values[2], DataValue::Int64(3));

    // Committed-only scans do not...
    let column_ids = vec![StorageIndex::new(0), StorageIndex::new(1)];
    let mut committed = vec![];
    collection
        .scan_committed(20, &column_ids, TableScanType::CommittedRows, |chunk| {
            for row in 0..chunk.size() {
                committed.push(chunk.column(1).value(row));
            }
            true
        })
        .unwrap();
    assert_eq!(committed[1], DataValue::Int64(2));
    assert_eq!(committed[3], DataValue::Int64(4));

    // ...and refusing updates outright is an error while they are pending.
    let err = collection
        .scan_committed(
            20,
            &column_ids,
            TableScanType::CommittedRowsDisallowUpdates,
            |_| true,
        )
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidState(_)));

    // An overlapping update from another transaction conflicts.
    let overlapping = DataChunk::from_rows(&[LogicalType::BigInt], &[vec![DataValue::Int64(7)]]);
    let err = collection.update(&[3], &[1], &overlapping).unwrap_err();
    assert_eq!(err, StorageError::Conflict("Conflict on update!"));

    // A disjoint update succeeds.
    let disjoint = DataChunk::from_rows(&[LogicalType::BigInt], &[vec![DataValue::Int64(9)]]);
    collection.update(&[50], &[1], &disjoint).unwrap();

    // Committing folds the chain; committed scans now see the new values
    // and the disallow-updates scan works again.
    collection.commit_updates().unwrap();
    let mut committed = vec![];
    collection
        .scan_committed(
            30,
            &column_ids,
            TableScanType::CommittedRowsDisallowUpdates,
            |chunk| {
                for row in 0..chunk.size() {
                    committed.push(chunk.column(1).value(row));
                }
                true
            },
        )
        .unwrap();
    assert_eq!(committed[1], DataValue::Int64(1000));
    assert_eq!(committed[3], DataValue::Int64(3000));
    assert_eq!(committed[50], DataValue::Int64(9));
}

#[test]
fn update_replay_is_idempotent() {
    let options = small_options();
    let collection = new_collection(vec![LogicalType::BigInt, LogicalType::BigInt], &options);
    append_committed(&collection, &bigint_rows(0..20), TXN, 10);

    let updates = DataChunk::from_rows(
        &[LogicalType::BigInt],
        &[vec![DataValue::Int64(-1)], vec![DataValue::Int64(-2)]],
    );
    collection.update(&[4, 9], &[1], &updates).unwrap();

    let first = collect_column(&collection, 1, 20);
    let second = collect_column(&collection, 1, 20);
    assert_eq!(first, second);
    assert_eq!(first[4], DataValue::Int64(-1));
    assert_eq!(first[9], DataValue::Int64(-2));
}

#[test]
fn string_dictionary_roundtrip_with_overflow() {
    let options = small_options();
    let collection = new_collection(vec![LogicalType::Varchar], &options);

    // Longer than the 4 KiB block's overflow threshold (1024 bytes).
    let long = "y".repeat(2000);
    let rows: Vec<Vec<DataValue>> = vec![
        vec![DataValue::from("a")],
        vec![DataValue::from("bb")],
        vec![DataValue::from("ccc")],
        vec![DataValue::String(long.clone())],
        vec![DataValue::Null],
        vec![DataValue::from("tail")],
    ];
    append_committed(&collection, &rows, TXN, 10);

    let values = collect_column(&collection, 0, 20);
    assert_eq!(values.len(), 6);
    assert_eq!(values[0], DataValue::from("a"));
    assert_eq!(values[1], DataValue::from("bb"));
    assert_eq!(values[2], DataValue::from("ccc"));
    assert_eq!(values[3], DataValue::String(long));
    assert_eq!(values[4], DataValue::Null);
    assert_eq!(values[5], DataValue::from("tail"));
}

#[test]
fn fetch_by_row_id() {
    let options = small_options();
    let collection = new_collection(vec![LogicalType::BigInt, LogicalType::BigInt], &options);
    append_committed(&collection, &bigint_rows(0..3000), TXN, 10);

    let column_ids = vec![StorageIndex::new(0), StorageIndex::new(1)];
    let mut result = DataChunk::new(collection.types());
    collection
        .fetch(&mut result, &column_ids, &[0, 2500, 2999])
        .unwrap();
    assert_eq!(result.size(), 3);
    assert_eq!(result.column(0).value(0), DataValue::Int64(0));
    assert_eq!(result.column(0).value(1), DataValue::Int64(2500));
    assert_eq!(result.column(1).value(2), DataValue::Int64(3000));
}

#[test]
fn schema_evolution_shares_columns() {
    let options = small_options();
    let collection = new_collection(vec![LogicalType::BigInt, LogicalType::BigInt], &options);
    append_committed(&collection, &bigint_rows(0..100), TXN, 10);

    let widened = collection
        .add_column(
            ColumnDefinition::new("flag", LogicalType::Integer)
                .with_default(DataValue::Int32(7)),
        )
        .unwrap();
    assert_eq!(widened.types().len(), 3);
    let flags = collect_column(&widened, 2, 20);
    assert_eq!(flags.len(), 100);
    assert!(flags.iter().all(|f| *f == DataValue::Int32(7)));

    // The original is no longer the root and rejects writes.
    assert!(!collection.is_root());
    assert!(widened.is_root());
    let err = collection
        .initialize_append(TransactionData::new(TXN + 1, 20))
        .err()
        .unwrap();
    assert!(matches!(err, StorageError::InvalidState(_)));
    // It still serves reads over the shared columns.
    assert_eq!(collect_column(&collection, 0, 20).len(), 100);

    // Dropping a column shares the remaining ones too.
    let narrowed = widened.remove_column(0).unwrap();
    assert_eq!(narrowed.types().len(), 2);
    let counts = collect_column(&narrowed, 0, 20);
    assert_eq!(counts[0], DataValue::Int64(1));
}

#[test]
fn merge_storage_reanchors_row_groups() {
    let options = small_options();
    let main = new_collection(vec![LogicalType::BigInt, LogicalType::BigInt], &options);
    append_committed(&main, &bigint_rows(0..100), TXN, 10);

    let local = Collection::new(
        BufferManager::new(options.block_size),
        main.types().to_vec(),
        0,
        0,
        &options,
    )
    .unwrap();
    append_committed(&local, &bigint_rows(100..150), TXN + 1, 20);

    main.merge_storage(&local).unwrap();
    assert_eq!(main.total_rows(), 150);
    assert_eq!(local.total_rows(), 0);

    let values = collect_column(&main, 0, 30);
    assert_eq!(values.len(), 150);
    assert_eq!(values[149], DataValue::Int64(149));

    // Row ids continue seamlessly across the merged row groups.
    let column_ids = vec![StorageIndex::row_id()];
    let mut row_ids = vec![];
    main.scan(TransactionData::new(30, 30), &column_ids, None, |chunk| {
        for row in 0..chunk.size() {
            row_ids.push(chunk.column(0).value(row));
        }
        true
    })
    .unwrap();
    assert_eq!(row_ids.len(), 150);
    assert_eq!(row_ids[100], DataValue::Int64(100));
}

#[test]
fn zonemap_pruning_preserves_results() {
    // 16 KiB blocks make each BIGINT segment span two batches, so an
    // ALWAYS_FALSE verdict skips whole batches forward.
    let options = StorageOptions {
        block_size: 16384,
        row_group_size: 4096,
    };
    let collection = new_collection(vec![LogicalType::BigInt, LogicalType::BigInt], &options);
    append_committed(&collection, &bigint_rows(0..4000), TXN, 10);

    let mut filters = TableFilterSet::default();
    filters.push_filter(
        0,
        TableFilter::ConstantComparison {
            op: ComparisonOp::GreaterThan,
            value: DataValue::Int64(3900),
        },
    );
    let column_ids = vec![StorageIndex::new(0), StorageIndex::new(1)];
    let mut ids = vec![];
    collection
        .scan(
            TransactionData::new(20, 20),
            &column_ids,
            Some(&filters),
            |chunk| {
                for row in 0..chunk.size() {
                    ids.push(chunk.column(0).value(row));
                }
                true
            },
        )
        .unwrap();
    let expected: Vec<DataValue> = (3901..4000).map(DataValue::Int64).collect();
    assert_eq!(ids, expected);
}

#[test]
fn struct_column_roundtrip() {
    let options = small_options();
    let struct_ty = LogicalType::Struct(vec![
        StructField::new("x", LogicalType::Integer),
        StructField::new("y", LogicalType::Varchar),
    ]);
    let collection = new_collection(vec![struct_ty.clone()], &options);

    let mut chunk = DataChunk::with_capacity(collection.types(), 4);
    {
        let vector = chunk.column_mut(0);
        let entries = vector.struct_entries_mut();
        for i in 0..4 {
            entries[0].set_value(i, &DataValue::Int32(i as i32));
            entries[1].set_value(i, &DataValue::String(format!("s{i}")));
        }
    }
    chunk.column_mut(0).validity_mut().set_invalid(2);
    chunk.set_cardinality(4);

    let mut state = collection
        .initialize_append(TransactionData::new(10, 10))
        .unwrap();
    collection.append(&chunk, &mut state).unwrap();
    collection.finalize_append(&mut state).unwrap();
    drop(state);
    collection.commit_append(11, 0, 4).unwrap();

    let mut seen = 0;
    collection
        .scan_all(TransactionData::new(20, 20), |chunk| {
            let vector = chunk.column(0);
            let entries = vector.struct_entries();
            assert_eq!(chunk.size(), 4);
            assert_eq!(entries[0].value(0), DataValue::Int32(0));
            assert_eq!(entries[1].value(3), DataValue::from("s3"));
            assert!(!vector.validity().row_is_valid(2));
            assert!(vector.validity().row_is_valid(1));
            seen += chunk.size();
            true
        })
        .unwrap();
    assert_eq!(seen, 4);

    // Projecting a single struct child leaves the others as constant NULL.
    let column_ids = vec![StorageIndex::with_children(0, vec![StorageIndex::new(1)])];
    collection
        .scan(TransactionData::new(20, 20), &column_ids, None, |chunk| {
            let entries = chunk.column(0).struct_entries();
            assert_eq!(entries[1].value(0), DataValue::from("s0"));
            assert_eq!(entries[0].value(0), DataValue::Null);
            true
        })
        .unwrap();
}

#[test]
fn list_column_roundtrip_and_unsupported_fetch() {
    let options = small_options();
    let list_ty = LogicalType::List(Box::new(LogicalType::Integer));
    let collection = new_collection(vec![list_ty.clone()], &options);

    // Rows: [1, 2], [], [3, 4, 5].
    let mut chunk = DataChunk::with_capacity(collection.types(), 3);
    {
        let vector = chunk.column_mut(0);
        vector.reserve_list_child(5);
        for (i, v) in [1, 2, 3, 4, 5].into_iter().enumerate() {
            vector.child_mut().set_value(i, &DataValue::Int32(v));
        }
        let entries = vector.list_entries_mut();
        entries[0] = ListEntry { offset: 0, length: 2 };
        entries[1] = ListEntry { offset: 2, length: 0 };
        entries[2] = ListEntry { offset: 2, length: 3 };
        vector.set_list_size(5);
    }
    chunk.set_cardinality(3);

    let mut state = collection
        .initialize_append(TransactionData::new(10, 10))
        .unwrap();
    collection.append(&chunk, &mut state).unwrap();
    collection.finalize_append(&mut state).unwrap();
    drop(state);
    collection.commit_append(11, 0, 3).unwrap();

    collection
        .scan_all(TransactionData::new(20, 20), |chunk| {
            assert_eq!(chunk.size(), 3);
            let vector = chunk.column(0);
            let entries = vector.list_entries();
            assert_eq!(entries[0], ListEntry { offset: 0, length: 2 });
            assert_eq!(entries[1], ListEntry { offset: 2, length: 0 });
            assert_eq!(entries[2], ListEntry { offset: 2, length: 3 });
            assert_eq!(vector.list_size(), 5);
            let child = vector.child();
            assert_eq!(child.value(0), DataValue::Int32(1));
            assert_eq!(child.value(4), DataValue::Int32(5));
            true
        })
        .unwrap();

    // Updating a list column is intentionally unsupported.
    let mut updates = DataChunk::with_capacity(&[list_ty], 1);
    updates.set_cardinality(1);
    let err = collection.update(&[0], &[0], &updates).unwrap_err();
    assert_eq!(err, StorageError::Unsupported("List update is not supported"));
}

#[test]
fn array_column_roundtrip() {
    let options = small_options();
    let array_ty = LogicalType::Array(Box::new(LogicalType::Integer), 3);
    let collection = new_collection(vec![array_ty.clone()], &options);

    let mut chunk = DataChunk::with_capacity(collection.types(), 2);
    {
        let vector = chunk.column_mut(0);
        for i in 0..6 {
            vector
                .child_mut()
                .set_value(i, &DataValue::Int32(10 + i as i32));
        }
    }
    chunk.set_cardinality(2);

    let mut state = collection
        .initialize_append(TransactionData::new(10, 10))
        .unwrap();
    collection.append(&chunk, &mut state).unwrap();
    collection.finalize_append(&mut state).unwrap();
    drop(state);
    collection.commit_append(11, 0, 2).unwrap();

    collection
        .scan_all(TransactionData::new(20, 20), |chunk| {
            assert_eq!(chunk.size(), 2);
            let child = chunk.column(0).child();
            for i in 0..6 {
                assert_eq!(child.value(i), DataValue::Int32(10 + i as i32));
            }
            true
        })
        .unwrap();

    // Point lookups read through the fixed child stride.
    let column_ids = vec![StorageIndex::new(0)];
    let mut result = DataChunk::new(collection.types());
    collection.fetch(&mut result, &column_ids, &[1]).unwrap();
    assert_eq!(result.size(), 1);
    let child = result.column(0).child();
    assert_eq!(child.value(0), DataValue::Int32(13));
    assert_eq!(child.value(2), DataValue::Int32(15));
}

#[test]
fn committed_scan_omits_permanently_deleted() {
    let options = small_options();
    let collection = new_collection(vec![LogicalType::BigInt, LogicalType::BigInt], &options);
    append_committed(&collection, &bigint_rows(0..10), TXN, 10);
    collection.delete_rows(TXN + 1, &[2]).unwrap();
    collection.commit_delete(15, &[2]).unwrap();

    let column_ids = vec![StorageIndex::new(0), StorageIndex::new(1)];
    // Watermark past the delete commit: the row is permanently gone.
    let mut seen = 0;
    collection
        .scan_committed(
            30,
            &column_ids,
            TableScanType::CommittedRowsOmitPermanentlyDeleted,
            |chunk| {
                seen += chunk.size();
                true
            },
        )
        .unwrap();
    assert_eq!(seen, 9);

    // Plain committed scans still return every committed row.
    let mut seen = 0;
    collection
        .scan_committed(30, &column_ids, TableScanType::CommittedRows, |chunk| {
            seen += chunk.size();
            true
        })
        .unwrap();
    assert_eq!(seen, 10);
}

#[test]
fn column_segment_info_reports_layout() {
    let options = small_options();
    let collection = new_collection(vec![LogicalType::BigInt, LogicalType::BigInt], &options);
    append_committed(&collection, &bigint_rows(0..1500), TXN, 10);

    let info = collection.column_segment_info();
    assert!(!info.is_empty());
    // Column 0 carries value segments plus validity segments.
    assert!(info.iter().any(|i| i.column_path == "[0]"));
    assert!(info.iter().any(|i| i.column_path == "[0, 0]"));
    // Segment runs are contiguous per column.
    let col0: Vec<_> = info.iter().filter(|i| i.column_path == "[0]").collect();
    for pair in col0.windows(2) {
        assert_eq!(
            pair[0].segment_start + pair[0].segment_count,
            pair[1].segment_start
        );
    }
}
