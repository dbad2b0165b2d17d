//! In-process [`DataSource`].
//!
//! Spaces live in memory behind a `RwLock`. Index 0 of every space is its
//! unique primary key and rows are kept sorted by it; secondary indexes are
//! non-unique and ordered on the fly, ties broken by primary key.
//!
//! Tree-index iterators are supported (`Eq`, `Req`, `All`, `Lt`, `Le`, `Ge`,
//! `Gt`); any other kind fails the way a server would, with
//! [`ER_UNSUPPORTED`]. A read-only `_vspace` view lists the created spaces so
//! [`Schema::bootstrap`](super::Schema::bootstrap) works unchanged.
//!
//! [`MemorySource::transaction`] runs a closure as one unit of work. While it
//! runs, transactions and writes from other threads wait for it to finish;
//! reads do not wait and may see uncommitted rows. Unless the closure commits,
//! the snapshot taken at the start is restored, including when it panics.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use std::sync::{
    Condvar, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use std::thread::{self, ThreadId};

use tracing::{debug, instrument};

use crate::core::value::{compare_slices, Tuple, Value};
use crate::error::{
    constants, IprotoError, Result, ER_ACTIVE_TRANSACTION, ER_ILLEGAL_PARAMS, ER_SPACE_EXISTS,
    ER_TUPLE_FOUND, ER_UNSUPPORTED,
};
use crate::protocol::iterator::IteratorType;

use super::{DataSource, VSPACE_ID};

/// Outcome chosen by a transaction step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Commit,
    Rollback,
}

#[derive(Debug, Clone, Default)]
struct Store {
    spaces: BTreeMap<u32, SpaceData>,
}

#[derive(Debug, Clone)]
struct SpaceData {
    name: String,
    /// Index id to the tuple field numbers it is built on
    indexes: BTreeMap<u32, Vec<usize>>,
    /// Sorted by primary key
    rows: Vec<Tuple>,
}

fn extract_key(tuple: &[Value], parts: &[usize]) -> Option<Tuple> {
    parts.iter().map(|&field| tuple.get(field).cloned()).collect()
}

fn illegal(message: &str) -> IprotoError {
    IprotoError::bad_request(ER_ILLEGAL_PARAMS, message)
}

impl SpaceData {
    fn parts(&self, space_id: u32, index_id: u32) -> Result<&[usize]> {
        self.indexes
            .get(&index_id)
            .map(Vec::as_slice)
            .ok_or(IprotoError::IndexNotFound { space_id, index_id })
    }

    fn check_fields(&self, tuple: &[Value]) -> Result<()> {
        let covered = self
            .indexes
            .values()
            .flatten()
            .all(|&field| field < tuple.len());
        if covered {
            Ok(())
        } else {
            Err(illegal(constants::ERR_MISSING_FIELD))
        }
    }

    /// Binary search the rows by primary key
    fn find(&self, primary: &[usize], key: &[Value]) -> std::result::Result<usize, usize> {
        self.rows.binary_search_by(|row| {
            let row_key = extract_key(row, primary).unwrap_or_default();
            compare_slices(&row_key, key)
        })
    }

    /// `(key, row position)` pairs in index order
    fn ordered(&self, parts: &[usize]) -> Vec<(Tuple, usize)> {
        let mut entries: Vec<(Tuple, usize)> = self
            .rows
            .iter()
            .enumerate()
            .filter_map(|(pos, row)| extract_key(row, parts).map(|key| (key, pos)))
            .collect();
        // Stable, so equal secondary keys stay in primary key order
        entries.sort_by(|a, b| compare_slices(&a.0, &b.0));
        entries
    }

    /// Row matching a full key of `index_id`
    fn locate(&self, space_id: u32, keys: &[Value], index_id: u32) -> Result<Option<usize>> {
        let parts = self.parts(space_id, index_id)?;
        if keys.len() != parts.len() {
            return Err(illegal(&format!(
                "Invalid key part count in an exact match (expected {}, got {})",
                parts.len(),
                keys.len()
            )));
        }
        if index_id == 0 {
            return Ok(self.find(parts, keys).ok());
        }
        Ok(self
            .ordered(parts)
            .into_iter()
            .find(|(key, _)| compare_slices(key, keys) == Ordering::Equal)
            .map(|(_, pos)| pos))
    }

    /// Replace the row at `pos` with `updated`, refusing primary key changes
    fn store_updated(&mut self, space_id: u32, pos: usize, updated: Tuple) -> Result<()> {
        self.check_fields(&updated)?;
        let primary = self.parts(space_id, 0)?;
        if extract_key(&self.rows[pos], primary) != extract_key(&updated, primary) {
            return Err(illegal(constants::ERR_PRIMARY_KEY_MODIFIED));
        }
        self.rows[pos] = updated;
        Ok(())
    }
}

/// Walk `entries` (sorted ascending by key) with `iterator`
fn traverse<T>(entries: Vec<(Tuple, T)>, iterator: IteratorType, keys: &[Value]) -> Result<Vec<T>> {
    let (accept, descending): (fn(Ordering) -> bool, bool) = match iterator {
        IteratorType::Eq | IteratorType::Req if keys.is_empty() => {
            return Err(illegal(constants::ERR_EMPTY_KEY));
        }
        IteratorType::Eq => (|o: Ordering| o == Ordering::Equal, false),
        IteratorType::Req => (|o: Ordering| o == Ordering::Equal, true),
        IteratorType::All => (|_: Ordering| true, false),
        IteratorType::Ge => (|o: Ordering| o != Ordering::Less, false),
        IteratorType::Gt => (|o: Ordering| o == Ordering::Greater, false),
        IteratorType::Le => (|o: Ordering| o != Ordering::Greater, true),
        IteratorType::Lt => (|o: Ordering| o == Ordering::Less, true),
        _ => {
            return Err(IprotoError::bad_request(
                ER_UNSUPPORTED,
                constants::ERR_UNSUPPORTED_ITERATOR,
            ))
        }
    };

    let walk_all = keys.is_empty() || iterator == IteratorType::All;
    let mut selected: Vec<T> = entries
        .into_iter()
        .filter(|(key, _)| {
            // Partial keys match on their prefix
            let prefix = &key[..keys.len().min(key.len())];
            walk_all || accept(compare_slices(prefix, keys))
        })
        .map(|(_, item)| item)
        .collect();

    if descending {
        selected.reverse();
    }
    Ok(selected)
}

fn integer(value: &Value) -> Option<i128> {
    value
        .as_i64()
        .map(i128::from)
        .or_else(|| value.as_u64().map(i128::from))
}

fn arithmetic(current: &Value, arg: &Value, subtract: bool) -> Result<Value> {
    if let (Some(a), Some(b)) = (integer(current), integer(arg)) {
        let sum = if subtract { a - b } else { a + b };
        return match (u64::try_from(sum), i64::try_from(sum)) {
            (Ok(unsigned), _) => Ok(Value::UInt(unsigned)),
            (_, Ok(signed)) => Ok(Value::Int(signed)),
            _ => Err(illegal("Integer overflow")),
        };
    }
    match (current.as_f64(), arg.as_f64()) {
        (Some(a), Some(b)) => Ok(Value::Float(if subtract { a - b } else { a + b })),
        _ => Err(illegal(constants::ERR_BAD_UPDATE_OP)),
    }
}

/// Apply update operations such as `["=", 1, "x"]` to a copy of `tuple`.
///
/// Field numbers are 0-based. Supported: `=` assign (or append at the end),
/// `+`/`-` arithmetic, `!` insert before, `#` delete `n` fields.
fn apply_ops(mut tuple: Tuple, ops: &[Value]) -> Result<Tuple> {
    let bad_op = || illegal(constants::ERR_BAD_UPDATE_OP);

    for op in ops {
        let op = op.as_array().ok_or_else(bad_op)?;
        let name = op.first().and_then(Value::as_str).ok_or_else(bad_op)?;
        let field = op
            .get(1)
            .and_then(Value::as_u64)
            .and_then(|f| usize::try_from(f).ok())
            .ok_or_else(bad_op)?;
        let arg = op.get(2).ok_or_else(bad_op)?;

        match name {
            "=" if field < tuple.len() => tuple[field] = arg.clone(),
            "=" if field == tuple.len() => tuple.push(arg.clone()),
            "!" if field <= tuple.len() => tuple.insert(field, arg.clone()),
            "#" if field < tuple.len() => {
                let count = arg
                    .as_u64()
                    .filter(|&n| n > 0)
                    .and_then(|n| usize::try_from(n).ok())
                    .ok_or_else(bad_op)?;
                let end = field.saturating_add(count).min(tuple.len());
                tuple.drain(field..end);
            }
            "+" | "-" if field < tuple.len() => {
                tuple[field] = arithmetic(&tuple[field], arg, name == "-")?;
            }
            _ => return Err(bad_op()),
        }
    }
    Ok(tuple)
}

/// Store write access, held while no other thread runs a transaction
struct WriteAccess<'a> {
    store: RwLockWriteGuard<'a, Store>,
    _turn: MutexGuard<'a, Option<ThreadId>>,
}

impl Deref for WriteAccess<'_> {
    type Target = Store;

    fn deref(&self) -> &Store {
        &self.store
    }
}

impl DerefMut for WriteAccess<'_> {
    fn deref_mut(&mut self) -> &mut Store {
        &mut self.store
    }
}

/// Ends a transaction: restores the snapshot unless it was committed, then
/// hands the source to the next waiting thread. Runs on panic too.
struct TransactionGuard<'a> {
    source: &'a MemorySource,
    snapshot: Option<Store>,
}

impl Drop for TransactionGuard<'_> {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            let mut store = self
                .source
                .store
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            *store = snapshot;
            debug!("Transaction rolled back");
        }
        let mut owner = self
            .source
            .owner
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *owner = None;
        drop(owner);
        self.source.released.notify_all();
    }
}

#[derive(Debug, Default)]
pub struct MemorySource {
    store: RwLock<Store>,
    /// Thread running a transaction, if any
    owner: Mutex<Option<ThreadId>>,
    released: Condvar,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Store>> {
        self.store.read().map_err(|_| IprotoError::LockPoisoned)
    }

    /// Wait until no other thread runs a transaction, then lock the store
    fn write(&self) -> Result<WriteAccess<'_>> {
        let me = thread::current().id();
        let owner = self.owner.lock().map_err(|_| IprotoError::LockPoisoned)?;
        let turn = self
            .released
            .wait_while(owner, |owner| matches!(owner, Some(id) if *id != me))
            .map_err(|_| IprotoError::LockPoisoned)?;
        let store = self.store.write().map_err(|_| IprotoError::LockPoisoned)?;
        Ok(WriteAccess { store, _turn: turn })
    }

    /// Claim the source for a transaction on this thread
    fn begin(&self) -> Result<()> {
        let me = thread::current().id();
        let owner = self.owner.lock().map_err(|_| IprotoError::LockPoisoned)?;
        if *owner == Some(me) {
            return Err(IprotoError::bad_request(
                ER_ACTIVE_TRANSACTION,
                constants::ERR_NESTED_TRANSACTION,
            ));
        }
        let mut owner = self
            .released
            .wait_while(owner, |owner| owner.is_some())
            .map_err(|_| IprotoError::LockPoisoned)?;
        *owner = Some(me);
        Ok(())
    }

    /// Run `f` against a space, failing with `SpaceNotFound` if it is missing
    fn with_space<R>(&self, space_id: u32, f: impl FnOnce(&mut SpaceData) -> Result<R>) -> Result<R> {
        let mut store = self.write()?;
        let space = store
            .spaces
            .get_mut(&space_id)
            .ok_or_else(|| IprotoError::SpaceNotFound(space_id.to_string()))?;
        f(space)
    }

    /// Create an empty space without indexes
    pub fn create_space(&self, id: u32, name: &str) -> Result<()> {
        let mut store = self.write()?;
        if store.spaces.contains_key(&id) || store.spaces.values().any(|s| s.name == name) {
            return Err(IprotoError::bad_request(
                ER_SPACE_EXISTS,
                constants::ERR_SPACE_EXISTS,
            ));
        }
        store.spaces.insert(
            id,
            SpaceData {
                name: name.to_string(),
                indexes: BTreeMap::new(),
                rows: Vec::new(),
            },
        );
        debug!(id, name, "Space created");
        Ok(())
    }

    /// Define index `index_id` over the given 0-based field numbers.
    ///
    /// Index 0 is the primary key and can only be (re)defined while the space
    /// is empty.
    pub fn create_index(&self, space_id: u32, index_id: u32, parts: &[usize]) -> Result<()> {
        if parts.is_empty() {
            return Err(illegal(constants::ERR_KEY_PART_COUNT));
        }
        self.with_space(space_id, |space| {
            if index_id == 0 && !space.rows.is_empty() {
                return Err(illegal(constants::ERR_INDEX_REDEFINED));
            }
            if space
                .rows
                .iter()
                .any(|row| parts.iter().any(|&field| field >= row.len()))
            {
                return Err(illegal(constants::ERR_MISSING_FIELD));
            }
            space.indexes.insert(index_id, parts.to_vec());
            Ok(())
        })
    }

    /// Run `step` as one unit of work.
    ///
    /// The store is snapshotted first. Unless `step` returns
    /// `Ok(Action::Commit)` the snapshot is restored; an error from `step` is
    /// returned after the rollback. Transactions on other threads wait their
    /// turn; a nested call on the same thread fails with
    /// `ER_ACTIVE_TRANSACTION`.
    #[instrument(skip(self, step))]
    pub fn transaction<F>(&self, step: F) -> Result<Action>
    where
        F: FnOnce(&Self) -> Result<Action>,
    {
        self.begin()?;
        let mut guard = TransactionGuard {
            source: self,
            snapshot: None,
        };
        guard.snapshot = Some(self.read()?.clone());

        let outcome = step(self);
        match &outcome {
            Ok(Action::Commit) => {
                guard.snapshot = None;
                debug!("Transaction committed");
            }
            Ok(Action::Rollback) => {}
            Err(e) => debug!(error = %e, "Transaction step failed"),
        }
        outcome
    }

    fn vspace_rows(store: &Store) -> Vec<(Tuple, Tuple)> {
        store
            .spaces
            .iter()
            .map(|(&id, space)| {
                let row = vec![
                    Value::from(id),
                    Value::from(0u32),
                    Value::from(space.name.as_str()),
                    Value::from("memtx"),
                    Value::from(0u32),
                    Value::Map(Vec::new()),
                    Value::Array(Vec::new()),
                ];
                (vec![Value::from(id)], row)
            })
            .collect()
    }
}

impl DataSource for MemorySource {
    fn select(
        &self,
        space_id: u32,
        iterator: IteratorType,
        keys: &[Value],
        index_id: u32,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<Tuple>> {
        let store = self.read()?;
        let window = |rows: Vec<Tuple>| -> Vec<Tuple> {
            rows.into_iter()
                .skip(offset as usize)
                .take(limit as usize)
                .collect()
        };

        let space = match store.spaces.get(&space_id) {
            Some(space) => space,
            None if space_id == VSPACE_ID => {
                if index_id != 0 {
                    return Err(IprotoError::IndexNotFound { space_id, index_id });
                }
                if keys.len() > 1 {
                    return Err(illegal(constants::ERR_KEY_PART_COUNT));
                }
                let rows = traverse(Self::vspace_rows(&store), iterator, keys)?;
                return Ok(window(rows));
            }
            None => return Err(IprotoError::SpaceNotFound(space_id.to_string())),
        };

        let parts = space.parts(space_id, index_id)?;
        if keys.len() > parts.len() {
            return Err(illegal(constants::ERR_KEY_PART_COUNT));
        }
        let positions = traverse(space.ordered(parts), iterator, keys)?;
        Ok(window(
            positions.into_iter().map(|pos| space.rows[pos].clone()).collect(),
        ))
    }

    fn insert(&self, space_id: u32, tuple: &[Value]) -> Result<()> {
        self.with_space(space_id, |space| {
            let primary = space.parts(space_id, 0)?;
            space.check_fields(tuple)?;
            let key = extract_key(tuple, primary).unwrap_or_default();
            match space.find(primary, &key) {
                Ok(_) => Err(IprotoError::bad_request(
                    ER_TUPLE_FOUND,
                    constants::ERR_DUPLICATE_KEY,
                )),
                Err(pos) => {
                    space.rows.insert(pos, tuple.to_vec());
                    Ok(())
                }
            }
        })
    }

    fn replace(&self, space_id: u32, tuple: &[Value]) -> Result<()> {
        self.with_space(space_id, |space| {
            let primary = space.parts(space_id, 0)?;
            space.check_fields(tuple)?;
            let key = extract_key(tuple, primary).unwrap_or_default();
            match space.find(primary, &key) {
                Ok(pos) => space.rows[pos] = tuple.to_vec(),
                Err(pos) => space.rows.insert(pos, tuple.to_vec()),
            }
            Ok(())
        })
    }

    fn delete(&self, space_id: u32, keys: &[Value], index_id: u32) -> Result<()> {
        self.with_space(space_id, |space| {
            if let Some(pos) = space.locate(space_id, keys, index_id)? {
                space.rows.remove(pos);
            }
            Ok(())
        })
    }

    fn update(&self, space_id: u32, keys: &[Value], ops: &[Value], index_id: u32) -> Result<()> {
        self.with_space(space_id, |space| {
            let Some(pos) = space.locate(space_id, keys, index_id)? else {
                return Ok(());
            };
            let updated = apply_ops(space.rows[pos].clone(), ops)?;
            space.store_updated(space_id, pos, updated)
        })
    }

    fn upsert(&self, space_id: u32, tuple: &[Value], ops: &[Value], index_id: u32) -> Result<()> {
        self.with_space(space_id, |space| {
            space.parts(space_id, index_id)?;
            let primary = space.parts(space_id, 0)?;
            space.check_fields(tuple)?;
            let key = extract_key(tuple, primary).unwrap_or_default();
            match space.find(primary, &key) {
                Ok(pos) => {
                    let updated = apply_ops(space.rows[pos].clone(), ops)?;
                    space.store_updated(space_id, pos, updated)
                }
                Err(pos) => {
                    space.rows.insert(pos, tuple.to_vec());
                    Ok(())
                }
            }
        })
    }
}
