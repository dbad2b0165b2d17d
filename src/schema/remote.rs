//! [`DataSource`] over a blocking connection.
//!
//! Each operation becomes one request. The connection sits behind a mutex so
//! the source can be shared by many [`Space`](super::Space) handles; requests
//! from different threads are serialised, never pipelined.

use std::net::TcpStream;
use std::sync::{Mutex, MutexGuard};

use tracing::instrument;

use crate::core::value::{Tuple, Value};
use crate::error::{IprotoError, Result};
use crate::protocol::code::Code;
use crate::protocol::iterator::IteratorType;
use crate::protocol::key::Key;
use crate::protocol::message::{into_rows, Keys};
use crate::service::connection::Connection;
use crate::transport::Transport;

use super::DataSource;

fn array(values: &[Value]) -> Value {
    Value::Array(values.to_vec())
}

pub struct RemoteSource<T: Transport = TcpStream> {
    connection: Mutex<Connection<T>>,
}

impl<T: Transport> RemoteSource<T> {
    pub fn new(connection: Connection<T>) -> Self {
        Self {
            connection: Mutex::new(connection),
        }
    }

    /// Lock the connection for a raw exchange
    pub fn connection(&self) -> Result<MutexGuard<'_, Connection<T>>> {
        self.connection.lock().map_err(|_| IprotoError::LockPoisoned)
    }

    /// Take the connection back
    pub fn into_inner(self) -> Result<Connection<T>> {
        self.connection
            .into_inner()
            .map_err(|_| IprotoError::LockPoisoned)
    }

    fn request(&self, code: Code, keys: Keys) -> Result<Tuple> {
        self.connection()?.request(code, keys, None, None)
    }
}

impl<T: Transport + Send> DataSource for RemoteSource<T> {
    #[instrument(skip(self, keys), level = "debug")]
    fn select(
        &self,
        space_id: u32,
        iterator: IteratorType,
        keys: &[Value],
        index_id: u32,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<Tuple>> {
        let body = Keys::from([
            (Key::SpaceId, Value::from(space_id)),
            (Key::IndexId, Value::from(index_id)),
            (Key::Limit, Value::from(limit)),
            (Key::Offset, Value::from(offset)),
            (Key::Iterator, Value::from(iterator.code())),
            (Key::Key, array(keys)),
        ]);
        into_rows(self.request(Code::Select, body)?)
    }

    fn insert(&self, space_id: u32, tuple: &[Value]) -> Result<()> {
        let body = Keys::from([
            (Key::SpaceId, Value::from(space_id)),
            (Key::Tuple, array(tuple)),
        ]);
        self.request(Code::Insert, body).map(drop)
    }

    fn replace(&self, space_id: u32, tuple: &[Value]) -> Result<()> {
        let body = Keys::from([
            (Key::SpaceId, Value::from(space_id)),
            (Key::Tuple, array(tuple)),
        ]);
        self.request(Code::Replace, body).map(drop)
    }

    fn delete(&self, space_id: u32, keys: &[Value], index_id: u32) -> Result<()> {
        let body = Keys::from([
            (Key::SpaceId, Value::from(space_id)),
            (Key::IndexId, Value::from(index_id)),
            (Key::Key, array(keys)),
        ]);
        self.request(Code::Delete, body).map(drop)
    }

    fn update(&self, space_id: u32, keys: &[Value], ops: &[Value], index_id: u32) -> Result<()> {
        let body = Keys::from([
            (Key::SpaceId, Value::from(space_id)),
            (Key::IndexId, Value::from(index_id)),
            (Key::Key, array(keys)),
            (Key::Ops, array(ops)),
        ]);
        self.request(Code::Update, body).map(drop)
    }

    fn upsert(&self, space_id: u32, tuple: &[Value], ops: &[Value], index_id: u32) -> Result<()> {
        let body = Keys::from([
            (Key::SpaceId, Value::from(space_id)),
            (Key::IndexId, Value::from(index_id)),
            (Key::Tuple, array(tuple)),
            (Key::Ops, array(ops)),
        ]);
        self.request(Code::Upsert, body).map(drop)
    }
}

impl<T: Transport> std::fmt::Debug for RemoteSource<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSource").finish_non_exhaustive()
    }
}
