//! # Context
//!
//! The one owner of every handle table in a server process.
//!
//! Tables are keyed by resource kind, so `ctx.table::<Source>()` and
//! `ctx.table::<Scene>()` never share ids. The first lookup of a kind creates an
//! unbounded table; call [`Context::install`] beforehand to use a bounded one.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use crate::handle::Handle;
use crate::handle::Kind;
use crate::table::ObjectTable;

type Tables = anymap::Map<dyn anymap::any::Any + Send + Sync>;

pub struct Context {
    tables: Mutex<Tables>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The table for kind `K`, created on first use.
    pub fn table<K: Kind>(&self) -> Arc<ObjectTable<K>> {
        let mut tables = self.lock();
        if let Some(table) = tables.get::<Arc<ObjectTable<K>>>() {
            return table.clone();
        }
        let table = Arc::new(ObjectTable::<K>::new());
        tables.insert(table.clone());
        table
    }

    /// Installs `table` as the table for `K`, returning the one it replaced.
    pub fn install<K: Kind>(&self, table: ObjectTable<K>) -> Option<Arc<ObjectTable<K>>> {
        self.lock().insert(Arc::new(table))
    }

    /// Empties the table for `K`, passing each released reference to `release`
    /// in ascending handle order.
    pub fn release_all<K: Kind>(&self, mut release: impl FnMut(Handle<K>, K::Ref)) {
        let table = self.lock().get::<Arc<ObjectTable<K>>>().cloned();
        let Some(table) = table else {
            return;
        };
        for (handle, object) in table.drain() {
            release(handle, object);
        }
    }
}
