#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Schema and Space over both data sources

mod common;

use std::sync::Arc;

use common::{opcode, script, MockTransport};
use iproto_client::error::{ER_ACTIVE_TRANSACTION, ER_TUPLE_FOUND, ER_UNSUPPORTED};
use iproto_client::schema::{Action, UNLIMITED, VSPACE_ID};
use iproto_client::{
    tuple, Connection, DataSource, IprotoError, IteratorType, MemorySource, RemoteSource,
    Response, Schema, SelectOptions, Value,
};

fn remote(responses: &[Response]) -> (RemoteSource<MockTransport>, common::Probe) {
    let (transport, probe) = MockTransport::new(script(responses));
    let conn = Connection::handshake(transport).unwrap();
    (RemoteSource::new(conn), probe)
}

fn users() -> Arc<MemorySource> {
    let source = MemorySource::new();
    source.create_space(512, "users").unwrap();
    source.create_index(512, 0, &[0]).unwrap();
    source.create_index(512, 1, &[1]).unwrap();
    for (id, name) in [(3, "carol"), (1, "alice"), (4, "alice"), (2, "bob"), (5, "dave")] {
        source.insert(512, &tuple![id, name]).unwrap();
    }
    Arc::new(source)
}

fn ids(rows: &[Vec<Value>]) -> Vec<u64> {
    rows.iter().map(|r| r[0].as_u64().unwrap()).collect()
}

// ============================================================================
// REMOTE SOURCE
// ============================================================================

#[test]
fn test_remote_select_encodes_all_keys() {
    let (source, probe) = remote(&[Response::ok(vec![tuple![1, "a"], tuple![2, "b"]])]);

    let rows = source
        .select(512, IteratorType::Ge, &tuple![1], 1, 10, 100)
        .unwrap();
    assert_eq!(rows, vec![tuple![1, "a"], tuple![2, "b"]]);

    let (header, body) = &probe.frames()[0];
    assert_eq!(opcode(header), 0x01);
    assert_eq!(body.get_key(0x10), Some(&Value::from(512u32)));
    assert_eq!(body.get_key(0x11), Some(&Value::from(1u32)));
    assert_eq!(body.get_key(0x12), Some(&Value::from(100u32)));
    assert_eq!(body.get_key(0x13), Some(&Value::from(10u32)));
    assert_eq!(body.get_key(0x14), Some(&Value::from(5u32)));
    assert_eq!(body.get_key(0x20), Some(&Value::Array(tuple![1])));
}

#[test]
fn test_remote_get_is_limit_one_eq() {
    let (source, probe) = remote(&[Response::ok(vec![tuple![7, "x"]]), Response::ok(vec![])]);

    assert_eq!(source.get(512, &tuple![7], 0).unwrap(), Some(tuple![7, "x"]));
    assert_eq!(source.get(512, &tuple![8], 0).unwrap(), None);

    let (_, body) = &probe.frames()[0];
    assert_eq!(body.get_key(0x12), Some(&Value::from(1u32)));
    assert_eq!(body.get_key(0x13), Some(&Value::from(0u32)));
    assert_eq!(body.get_key(0x14), Some(&Value::from(0u32)));
}

#[test]
fn test_remote_mutations_use_their_opcodes() {
    let ok = Response::ok(vec![]);
    let (source, probe) = remote(&[ok.clone(), ok.clone(), ok.clone(), ok.clone(), ok]);
    let ops = vec![Value::from(tuple!["+", 2, 1])];

    source.insert(512, &tuple![1, "a", 0]).unwrap();
    source.replace(512, &tuple![1, "b", 0]).unwrap();
    source.update(512, &tuple![1], &ops, 0).unwrap();
    source.upsert(512, &tuple![1, "c", 0], &ops, 0).unwrap();
    source.delete(512, &tuple![1], 0).unwrap();

    let frames = probe.frames();
    let codes: Vec<u64> = frames.iter().map(|(h, _)| opcode(h)).collect();
    assert_eq!(codes, vec![0x02, 0x03, 0x04, 0x09, 0x05]);

    let (_, update) = &frames[2];
    assert_eq!(update.get_key(0x20), Some(&Value::Array(tuple![1])));
    assert_eq!(update.get_key(0x28), Some(&Value::Array(ops.clone())));

    let (_, upsert) = &frames[3];
    assert_eq!(upsert.get_key(0x21), Some(&Value::Array(tuple![1, "c", 0])));
    assert_eq!(upsert.get_key(0x28), Some(&Value::Array(ops)));

    let (_, insert) = &frames[0];
    assert_eq!(insert.get_key(0x11), None, "insert carries no index id");
}

#[test]
fn test_remote_server_error_passes_through() {
    let (source, _probe) = remote(&[Response::error(ER_TUPLE_FOUND, "Duplicate key exists")]);
    match source.insert(512, &tuple![1]) {
        Err(IprotoError::BadRequest { code, message }) => {
            assert_eq!(code, ER_TUPLE_FOUND);
            assert_eq!(message, "Duplicate key exists");
        }
        other => panic!("Unexpected result: {other:?}"),
    }
}

#[test]
fn test_remote_rows_must_be_arrays() {
    let mut reply = Response::empty();
    reply.body = Value::Map(vec![(
        Value::from(0x30u8),
        Value::Array(vec![Value::from(1)]),
    )]);
    let (source, _probe) = remote(&[reply]);
    assert!(source.select(512, IteratorType::All, &[], 0, 0, UNLIMITED).is_err());
}

#[test]
fn test_schema_bootstrap_over_remote() {
    let vspace = Response::ok(vec![
        tuple![272, 1, "_schema", "memtx", 0],
        tuple![512, 1, "users", "memtx", 0],
    ]);
    let (source, probe) = remote(&[vspace, Response::ok(vec![tuple![1, "alice"]])]);
    let schema = Schema::bootstrap(Arc::new(source)).unwrap();

    let users = schema.space("users").unwrap();
    assert_eq!(users.id(), 512);
    assert_eq!(users.get(&tuple![1]).unwrap(), Some(tuple![1, "alice"]));

    let frames = probe.frames();
    let (_, bootstrap) = &frames[0];
    assert_eq!(bootstrap.get_key(0x10), Some(&Value::from(VSPACE_ID)));
    assert_eq!(bootstrap.get_key(0x14), Some(&Value::from(2u32)));
    assert_eq!(bootstrap.get_key(0x12), Some(&Value::from(UNLIMITED)));
    assert_eq!(bootstrap.get_key(0x20), Some(&Value::Array(vec![])));
    let (_, get) = &frames[1];
    assert_eq!(get.get_key(0x10), Some(&Value::from(512u32)));
}

#[test]
fn test_schema_bootstrap_rejects_malformed_rows() {
    let vspace = Response::ok(vec![tuple![512, 1, "users"], tuple![513, 1, 99]]);
    let (source, _probe) = remote(&[vspace]);
    assert!(matches!(
        Schema::bootstrap(Arc::new(source)),
        Err(IprotoError::InvalidSchema)
    ));
}

// ============================================================================
// MEMORY SOURCE
// ============================================================================

#[test]
fn test_memory_primary_iterators() {
    let source = users();

    let all = source.select(512, IteratorType::All, &[], 0, 0, UNLIMITED).unwrap();
    assert_eq!(ids(&all), vec![1, 2, 3, 4, 5]);

    let ge = source.select(512, IteratorType::Ge, &tuple![3], 0, 0, UNLIMITED).unwrap();
    assert_eq!(ids(&ge), vec![3, 4, 5]);

    let gt = source.select(512, IteratorType::Gt, &tuple![3], 0, 0, UNLIMITED).unwrap();
    assert_eq!(ids(&gt), vec![4, 5]);

    let le = source.select(512, IteratorType::Le, &tuple![3], 0, 0, UNLIMITED).unwrap();
    assert_eq!(ids(&le), vec![3, 2, 1]);

    let lt = source.select(512, IteratorType::Lt, &[], 0, 0, UNLIMITED).unwrap();
    assert_eq!(ids(&lt), vec![5, 4, 3, 2, 1]);

    let eq = source.select(512, IteratorType::Eq, &tuple![4], 0, 0, UNLIMITED).unwrap();
    assert_eq!(eq, vec![tuple![4, "alice"]]);
}

#[test]
fn test_memory_offset_and_limit() {
    let source = users();
    let page = source.select(512, IteratorType::All, &[], 0, 1, 2).unwrap();
    assert_eq!(ids(&page), vec![2, 3]);

    let past_end = source.select(512, IteratorType::All, &[], 0, 10, 2).unwrap();
    assert!(past_end.is_empty());
}

#[test]
fn test_memory_secondary_index_is_non_unique() {
    let source = users();

    let alices = source.select(512, IteratorType::Eq, &tuple!["alice"], 1, 0, UNLIMITED).unwrap();
    assert_eq!(ids(&alices), vec![1, 4]);

    let reversed = source.select(512, IteratorType::Req, &tuple!["alice"], 1, 0, UNLIMITED).unwrap();
    assert_eq!(ids(&reversed), vec![4, 1]);

    let by_name = source.select(512, IteratorType::All, &[], 1, 0, UNLIMITED).unwrap();
    assert_eq!(ids(&by_name), vec![1, 4, 2, 3, 5]);

    assert_eq!(source.get(512, &tuple!["bob"], 1).unwrap(), Some(tuple![2, "bob"]));
}

#[test]
fn test_memory_eq_needs_a_key() {
    let source = users();
    assert!(source.select(512, IteratorType::Eq, &[], 0, 0, UNLIMITED).is_err());
    assert!(source.select(512, IteratorType::Req, &[], 0, 0, UNLIMITED).is_err());
}

#[test]
fn test_memory_unsupported_iterator() {
    let source = users();
    match source.select(512, IteratorType::BitsAllSet, &tuple![1], 0, 0, UNLIMITED) {
        Err(IprotoError::BadRequest { code, .. }) => assert_eq!(code, ER_UNSUPPORTED),
        other => panic!("Unexpected result: {other:?}"),
    }
}

#[test]
fn test_memory_unknown_space_and_index() {
    let source = users();
    assert!(matches!(
        source.select(999, IteratorType::All, &[], 0, 0, UNLIMITED),
        Err(IprotoError::SpaceNotFound(_))
    ));
    assert!(matches!(
        source.select(512, IteratorType::All, &[], 7, 0, UNLIMITED),
        Err(IprotoError::IndexNotFound { space_id: 512, index_id: 7 })
    ));
}

#[test]
fn test_memory_insert_duplicate_and_replace() {
    let source = users();
    match source.insert(512, &tuple![1, "again"]) {
        Err(IprotoError::BadRequest { code, .. }) => assert_eq!(code, ER_TUPLE_FOUND),
        other => panic!("Unexpected result: {other:?}"),
    }

    source.replace(512, &tuple![1, "zed"]).unwrap();
    source.replace(512, &tuple![9, "ivan"]).unwrap();
    assert_eq!(source.get(512, &tuple![1], 0).unwrap(), Some(tuple![1, "zed"]));
    assert_eq!(source.get(512, &tuple![9], 0).unwrap(), Some(tuple![9, "ivan"]));
}

#[test]
fn test_memory_tuple_must_cover_indexes() {
    let source = users();
    assert!(source.insert(512, &tuple![10]).is_err());
}

#[test]
fn test_memory_update_delete_upsert() {
    let source = MemorySource::new();
    source.create_space(600, "counters").unwrap();
    source.create_index(600, 0, &[0]).unwrap();

    source.insert(600, &tuple!["hits", 1]).unwrap();
    source
        .update(600, &tuple!["hits"], &[Value::from(tuple!["+", 1, 10])], 0)
        .unwrap();
    assert_eq!(source.get(600, &tuple!["hits"], 0).unwrap(), Some(tuple!["hits", 11]));

    // Upsert applies ops to an existing tuple and inserts a missing one
    let bump = [Value::from(tuple!["+", 1, 1])];
    source.upsert(600, &tuple!["hits", 0], &bump, 0).unwrap();
    source.upsert(600, &tuple!["misses", 0], &bump, 0).unwrap();
    assert_eq!(source.get(600, &tuple!["hits"], 0).unwrap(), Some(tuple!["hits", 12]));
    assert_eq!(source.get(600, &tuple!["misses"], 0).unwrap(), Some(tuple!["misses", 0]));

    // The primary key can not be changed through an update
    assert!(source
        .update(600, &tuple!["hits"], &[Value::from(tuple!["=", 0, "renamed"])], 0)
        .is_err());

    source.delete(600, &tuple!["hits"], 0).unwrap();
    source.delete(600, &tuple!["absent"], 0).unwrap();
    assert_eq!(source.get(600, &tuple!["hits"], 0).unwrap(), None);

    // Updating a missing tuple is a no-op
    source.update(600, &tuple!["absent"], &bump, 0).unwrap();
}

#[test]
fn test_memory_exact_match_needs_full_key() {
    let source = MemorySource::new();
    source.create_space(601, "pairs").unwrap();
    source.create_index(601, 0, &[0, 1]).unwrap();
    source.insert(601, &tuple![1, 1, "a"]).unwrap();
    source.insert(601, &tuple![1, 2, "b"]).unwrap();
    source.insert(601, &tuple![2, 1, "c"]).unwrap();

    assert!(source.delete(601, &tuple![1], 0).is_err());

    // A partial key still selects on its prefix
    let prefix = source.select(601, IteratorType::Eq, &tuple![1], 0, 0, UNLIMITED).unwrap();
    assert_eq!(prefix, vec![tuple![1, 1, "a"], tuple![1, 2, "b"]]);
}

#[test]
fn test_memory_space_names_are_unique() {
    let source = users();
    assert!(source.create_space(512, "other").is_err());
    assert!(source.create_space(513, "users").is_err());
    assert!(source.create_index(512, 0, &[1]).is_err(), "Primary index is fixed once rows exist");
}

#[test]
fn test_schema_bootstrap_over_memory() {
    let source = users();
    source.create_space(513, "orders").unwrap();

    let schema = Schema::bootstrap(source).unwrap();
    assert_eq!(schema.len(), 2);

    let users = schema.space("users").unwrap();
    let page = users
        .select_with(IteratorType::All, &[], SelectOptions::default().offset(3))
        .unwrap();
    assert_eq!(ids(&page), vec![4, 5]);
    assert_eq!(schema.space("orders").unwrap().id(), 513);
    assert!(matches!(
        schema.space("nope"),
        Err(IprotoError::SpaceNotFound(_))
    ));
}

// ============================================================================
// TRANSACTIONS
// ============================================================================

#[test]
fn test_transaction_commit() {
    let source = users();
    let action = source
        .transaction(|s| {
            s.insert(512, &tuple![6, "erin"])?;
            s.delete(512, &tuple![1], 0)?;
            Ok(Action::Commit)
        })
        .unwrap();

    assert_eq!(action, Action::Commit);
    let all = source.select(512, IteratorType::All, &[], 0, 0, UNLIMITED).unwrap();
    assert_eq!(ids(&all), vec![2, 3, 4, 5, 6]);
}

#[test]
fn test_transaction_rollback() {
    let source = users();
    let action = source
        .transaction(|s| {
            s.insert(512, &tuple![6, "erin"])?;
            Ok(Action::Rollback)
        })
        .unwrap();

    assert_eq!(action, Action::Rollback);
    assert_eq!(source.get(512, &tuple![6], 0).unwrap(), None);
}

#[test]
fn test_transaction_error_rolls_back() {
    let source = users();
    let result = source.transaction(|s| {
        s.insert(512, &tuple![6, "erin"])?;
        s.insert(512, &tuple![1, "duplicate"])?;
        Ok(Action::Commit)
    });

    assert!(matches!(result, Err(IprotoError::BadRequest { code, .. }) if code == ER_TUPLE_FOUND));
    assert_eq!(source.get(512, &tuple![6], 0).unwrap(), None);

    // The source is usable for a new transaction afterwards
    assert!(source.transaction(|_| Ok(Action::Commit)).is_ok());
}

#[test]
fn test_nested_transaction_is_rejected() {
    let source = users();
    let outer = source.transaction(|s| {
        let inner = s.transaction(|_| Ok(Action::Commit));
        match inner {
            Err(IprotoError::BadRequest { code, .. }) => assert_eq!(code, ER_ACTIVE_TRANSACTION),
            other => panic!("Unexpected result: {other:?}"),
        }
        Ok(Action::Commit)
    });
    assert!(outer.is_ok());
}

#[test]
fn test_panicking_step_rolls_back() {
    let source = users();
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        source.transaction(|s| {
            s.insert(512, &tuple![6, "erin"])?;
            panic!("step aborted");
        })
    }));

    assert!(result.is_err());
    assert_eq!(source.get(512, &tuple![6], 0).unwrap(), None);
    assert_eq!(
        ids(&source.select(512, IteratorType::All, &[], 0, 0, UNLIMITED).unwrap()),
        vec![1, 2, 3, 4, 5]
    );

    // The source was released for the next transaction
    assert!(source.transaction(|_| Ok(Action::Commit)).is_ok());
}

#[test]
fn test_transactions_on_other_threads_wait_their_turn() {
    let source = users();
    let (started_tx, started_rx) = std::sync::mpsc::channel();

    let first = {
        let source = Arc::clone(&source);
        std::thread::spawn(move || {
            source.transaction(|s| {
                started_tx.send(()).unwrap();
                std::thread::sleep(std::time::Duration::from_millis(100));
                s.insert(512, &tuple![6, "erin"])?;
                Ok(Action::Commit)
            })
        })
    };

    started_rx.recv().unwrap();
    let second = source.transaction(|s| {
        // Runs only after the first transaction committed
        assert!(s.get(512, &tuple![6], 0)?.is_some());
        s.insert(512, &tuple![7, "frank"])?;
        Ok(Action::Commit)
    });

    assert_eq!(first.join().unwrap().unwrap(), Action::Commit);
    assert_eq!(second.unwrap(), Action::Commit);
    assert_eq!(
        ids(&source.select(512, IteratorType::All, &[], 0, 0, UNLIMITED).unwrap()),
        vec![1, 2, 3, 4, 5, 6, 7]
    );
}

#[test]
fn test_rollback_keeps_writes_from_other_threads() {
    let source = users();
    let (started_tx, started_rx) = std::sync::mpsc::channel();

    let rolled_back = {
        let source = Arc::clone(&source);
        std::thread::spawn(move || {
            source.transaction(|s| {
                started_tx.send(()).unwrap();
                std::thread::sleep(std::time::Duration::from_millis(100));
                s.insert(512, &tuple![6, "erin"])?;
                Ok(Action::Rollback)
            })
        })
    };

    started_rx.recv().unwrap();
    // Waits for the transaction to end, so the rollback cannot undo it
    source.insert(512, &tuple![7, "frank"]).unwrap();

    assert_eq!(rolled_back.join().unwrap().unwrap(), Action::Rollback);
    assert_eq!(source.get(512, &tuple![6], 0).unwrap(), None);
    assert!(source.get(512, &tuple![7], 0).unwrap().is_some());
}
