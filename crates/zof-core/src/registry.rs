use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::datapath::Datapath;

/// Mapping from connection-id to live [`Datapath`] objects.
///
/// Single-threaded, so a `RefCell` is enough: the state machine is the only
/// writer, and `iterate()` hands out an owned snapshot so a caller closing
/// entries mid-iteration never observes a partial update.
#[derive(Default)]
pub struct Registry {
    entries: RefCell<HashMap<u64, Rc<Datapath>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `dp` under `conn_id`. Returns `false` without modifying the
    /// registry if `conn_id` is already present — the helper is assumed to
    /// hand out unique connection ids, so a collision means a bug upstream
    /// rather than a case to paper over silently.
    pub fn insert(&self, conn_id: u64, dp: Rc<Datapath>) -> bool {
        let mut entries = self.entries.borrow_mut();
        if entries.contains_key(&conn_id) {
            return false;
        }
        entries.insert(conn_id, dp);
        true
    }

    pub fn remove(&self, conn_id: u64) -> Option<Rc<Datapath>> {
        self.entries.borrow_mut().remove(&conn_id)
    }

    pub fn get(&self, conn_id: u64) -> Option<Rc<Datapath>> {
        self.entries.borrow().get(&conn_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Returns a snapshot of every live datapath at the moment of the call.
    pub fn iterate(&self) -> Vec<Rc<Datapath>> {
        self.entries.borrow().values().cloned().collect()
    }
}
