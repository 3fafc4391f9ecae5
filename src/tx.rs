//! Write transaction wrapper

use heed::{RoTxn, RwTxn};

use crate::db::{Dbs, Store};
use crate::error::{err, Result};

/// One LMDB write transaction. Dropped without `commit` means aborted,
/// so an `Err` anywhere inside `transact` leaves no partial rows behind.
pub struct Tx<'s> {
    txn: RwTxn<'s>,
    dbs: &'s Dbs,
}

impl<'s> Tx<'s> {
    #[inline]
    pub(crate) fn new(store: &'s Store) -> Result<Self> {
        Ok(Tx {
            txn: store.env().write_txn().map_err(err)?,
            dbs: store.dbs(),
        })
    }

    #[inline]
    pub(crate) fn txn(&mut self) -> &mut RwTxn<'s> {
        &mut self.txn
    }

    /// Read view of this transaction (sees its own uncommitted writes)
    #[inline]
    pub(crate) fn ro(&self) -> &RoTxn<'s> {
        &self.txn
    }

    #[inline]
    pub(crate) fn dbs(&self) -> &'s Dbs {
        self.dbs
    }

    #[inline]
    pub(crate) fn commit(self) -> Result<()> {
        self.txn.commit().map_err(err)
    }

    /// Next record id (shared by all record kinds)
    pub(crate) fn next_id(&mut self) -> Result<u64> {
        let dbs = self.dbs;
        let id = dbs
            .meta
            .get(self.ro(), "next_id")
            .map_err(err)?
            .and_then(|s| s.parse().ok())
            .unwrap_or(1u64);
        dbs.meta.put(self.txn(), "next_id", &(id + 1).to_string()).map_err(err)?;
        Ok(id)
    }
}

impl Store {
    /// Run multiple operations in a single write transaction
    #[inline]
    pub fn transact<T, F: FnOnce(&mut Tx) -> Result<T>>(&self, f: F) -> Result<T> {
        let mut tx = Tx::new(self)?;
        let r = f(&mut tx)?;
        tx.commit()?;
        Ok(r)
    }
}
