//! # Schema Layer
//!
//! Record access through the [`DataSource`] capability, plus the
//! [`Schema`]/[`Space`] convenience layer built on top of it.
//!
//! ## Components
//! - **DataSource**: seven-operation capability (select, get and the five mutations)
//! - **RemoteSource**: implementation over a blocking [`Connection`](crate::Connection)
//! - **MemorySource**: in-process implementation with scoped transactions
//! - **Space**: stateless handle binding a space id to a source
//! - **Schema**: name → space map read once from the `_vspace` system view
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use iproto_client::schema::{RemoteSource, Schema};
//! use iproto_client::{tuple, Connection, IteratorType};
//!
//! # fn main() -> iproto_client::Result<()> {
//! let conn = Connection::connect("127.0.0.1", 3301)?;
//! let schema = Schema::bootstrap(Arc::new(RemoteSource::new(conn)))?;
//!
//! let users = schema.space("users")?;
//! users.insert(&tuple![1, "alice"])?;
//! let rows = users.select(IteratorType::All, &[])?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::core::value::{Tuple, Value};
use crate::error::{IprotoError, Result};
use crate::protocol::iterator::IteratorType;

pub mod memory;
pub mod remote;

pub use memory::{Action, MemorySource};
pub use remote::RemoteSource;

/// Id of the `_vspace` system view listing the spaces visible to the user
pub const VSPACE_ID: u32 = 281;

/// Limit meaning "no limit"
pub const UNLIMITED: u32 = u32::MAX;

/// Capability for reading and mutating tuples.
///
/// Implementations return tuples in index iteration order, honouring offset
/// and limit. `get` must behave exactly like an `Eq` select with offset 0 and
/// limit 1.
pub trait DataSource: Send + Sync {
    fn select(
        &self,
        space_id: u32,
        iterator: IteratorType,
        keys: &[Value],
        index_id: u32,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<Tuple>>;

    fn get(&self, space_id: u32, keys: &[Value], index_id: u32) -> Result<Option<Tuple>> {
        let rows = self.select(space_id, IteratorType::Eq, keys, index_id, 0, 1)?;
        Ok(rows.into_iter().next())
    }

    fn insert(&self, space_id: u32, tuple: &[Value]) -> Result<()>;

    fn replace(&self, space_id: u32, tuple: &[Value]) -> Result<()>;

    fn delete(&self, space_id: u32, keys: &[Value], index_id: u32) -> Result<()>;

    fn update(&self, space_id: u32, keys: &[Value], ops: &[Value], index_id: u32) -> Result<()>;

    fn upsert(&self, space_id: u32, tuple: &[Value], ops: &[Value], index_id: u32) -> Result<()>;
}

/// Index, offset and limit of a select
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectOptions {
    pub index_id: u32,
    pub offset: u32,
    pub limit: u32,
}

impl Default for SelectOptions {
    fn default() -> Self {
        Self {
            index_id: 0,
            offset: 0,
            limit: UNLIMITED,
        }
    }
}

impl SelectOptions {
    pub fn index(mut self, index_id: u32) -> Self {
        self.index_id = index_id;
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }
}

/// A space id bound to the source that serves it.
///
/// Cheap to clone; every clone shares the same source.
#[derive(Clone)]
pub struct Space {
    id: u32,
    source: Arc<dyn DataSource>,
}

impl Space {
    pub fn new(id: u32, source: Arc<dyn DataSource>) -> Self {
        Self { id, source }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn source(&self) -> &Arc<dyn DataSource> {
        &self.source
    }

    /// Select on the primary index with no offset or limit
    pub fn select(&self, iterator: IteratorType, keys: &[Value]) -> Result<Vec<Tuple>> {
        self.select_with(iterator, keys, SelectOptions::default())
    }

    pub fn select_with(
        &self,
        iterator: IteratorType,
        keys: &[Value],
        options: SelectOptions,
    ) -> Result<Vec<Tuple>> {
        self.source.select(
            self.id,
            iterator,
            keys,
            options.index_id,
            options.offset,
            options.limit,
        )
    }

    /// First tuple equal to `keys` in the primary index
    pub fn get(&self, keys: &[Value]) -> Result<Option<Tuple>> {
        self.get_by_index(keys, 0)
    }

    pub fn get_by_index(&self, keys: &[Value], index_id: u32) -> Result<Option<Tuple>> {
        self.source.get(self.id, keys, index_id)
    }

    pub fn insert(&self, tuple: &[Value]) -> Result<()> {
        self.source.insert(self.id, tuple)
    }

    pub fn replace(&self, tuple: &[Value]) -> Result<()> {
        self.source.replace(self.id, tuple)
    }

    pub fn delete(&self, keys: &[Value]) -> Result<()> {
        self.delete_by_index(keys, 0)
    }

    pub fn delete_by_index(&self, keys: &[Value], index_id: u32) -> Result<()> {
        self.source.delete(self.id, keys, index_id)
    }

    /// Apply update `ops` to the tuple matching `keys`, e.g. `[["=", 1, "x"]]`
    pub fn update(&self, keys: &[Value], ops: &[Value]) -> Result<()> {
        self.update_by_index(keys, ops, 0)
    }

    pub fn update_by_index(&self, keys: &[Value], ops: &[Value], index_id: u32) -> Result<()> {
        self.source.update(self.id, keys, ops, index_id)
    }

    /// Insert `tuple`, or apply `ops` to the existing tuple with the same key
    pub fn upsert(&self, tuple: &[Value], ops: &[Value]) -> Result<()> {
        self.upsert_by_index(tuple, ops, 0)
    }

    pub fn upsert_by_index(&self, tuple: &[Value], ops: &[Value], index_id: u32) -> Result<()> {
        self.source.upsert(self.id, tuple, ops, index_id)
    }
}

impl fmt::Debug for Space {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Space").field("id", &self.id).finish()
    }
}

impl fmt::Display for Space {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "space: {}", self.id)
    }
}

/// Space names mapped to handles, read once and never refreshed
#[derive(Clone, Debug)]
pub struct Schema {
    spaces: HashMap<String, Space>,
}

impl Schema {
    /// Read every row of `_vspace` and build the name map.
    ///
    /// Each row must hold an integer id in field 0 and a string name in
    /// field 2. One malformed row fails the whole bootstrap with
    /// [`IprotoError::InvalidSchema`].
    #[instrument(skip(source))]
    pub fn bootstrap(source: Arc<dyn DataSource>) -> Result<Self> {
        let rows = source.select(VSPACE_ID, IteratorType::All, &[], 0, 0, UNLIMITED)?;

        let mut spaces = HashMap::with_capacity(rows.len());
        for row in &rows {
            let id = row
                .first()
                .and_then(Value::as_u64)
                .and_then(|id| u32::try_from(id).ok());
            let name = row.get(2).and_then(Value::as_str);

            match (id, name) {
                (Some(id), Some(name)) => {
                    spaces.insert(name.to_string(), Space::new(id, Arc::clone(&source)));
                }
                _ => {
                    warn!(row = ?row, "Malformed space metadata");
                    return Err(IprotoError::InvalidSchema);
                }
            }
        }

        debug!(spaces = spaces.len(), "Schema loaded");
        Ok(Self { spaces })
    }

    /// Look up a space by name
    pub fn space(&self, name: &str) -> Result<&Space> {
        self.spaces
            .get(name)
            .ok_or_else(|| IprotoError::SpaceNotFound(name.to_string()))
    }

    pub fn spaces(&self) -> &HashMap<String, Space> {
        &self.spaces
    }

    pub fn len(&self) -> usize {
        self.spaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spaces.is_empty()
    }
}
