//! Bit position registry.
//!
//! Positions are allocated per namespace as `high_water + 1` (0 when empty) and
//! are never released: rows in `bits` are never deleted and the high-water mark
//! only grows, so a slug created after a deletion can never inherit a retired
//! position. Allocation happens inside the caller's write transaction, which
//! LMDB serializes, so concurrent first use of one slug yields one position.

use heed::RoTxn;
use tracing::debug;

use crate::db::{Dbs, Store};
use crate::error::{err, Error, Result};
use crate::keys::Namespace;
use crate::tx::Tx;

pub type BitPosition = u64;

fn bit_name(ns: Namespace, slug: &str) -> String {
    format!("{}/{}", ns.name(), slug)
}

fn high_water_name(ns: Namespace) -> String {
    format!("hw/{}", ns.name())
}

pub(crate) fn lookup_in(d: &Dbs, tx: &RoTxn, ns: Namespace, slug: &str) -> Result<Option<BitPosition>> {
    d.bits.get(tx, &bit_name(ns, slug)).map_err(err)
}

pub(crate) fn high_water_in(d: &Dbs, tx: &RoTxn, ns: Namespace) -> Result<Option<BitPosition>> {
    match d.meta.get(tx, &high_water_name(ns)).map_err(err)? {
        Some(s) => s
            .parse()
            .map(Some)
            .map_err(|_| Error::Corrupt(format!("high-water mark for {} is '{}'", ns.name(), s))),
        None => Ok(None),
    }
}

impl Tx<'_> {
    /// Existing position for `slug`, or a freshly reserved one
    pub fn allocate(&mut self, ns: Namespace, slug: &str) -> Result<BitPosition> {
        let dbs = self.dbs();
        if let Some(bit) = lookup_in(dbs, self.ro(), ns, slug)? {
            return Ok(bit);
        }
        let bit = high_water_in(dbs, self.ro(), ns)?.map_or(0, |h| h + 1);
        dbs.bits.put(self.txn(), &bit_name(ns, slug), &bit).map_err(err)?;
        dbs.meta.put(self.txn(), &high_water_name(ns), &bit.to_string()).map_err(err)?;
        debug!(namespace = ns.name(), slug, bit, "bit allocated");
        Ok(bit)
    }
}

impl Store {
    /// Allocate (or return) the bit position for `slug` in `ns`
    pub fn allocate(&self, ns: Namespace, slug: &str) -> Result<BitPosition> {
        self.transact(|tx| tx.allocate(ns, slug))
    }

    /// Pure lookup; never allocates
    pub fn lookup_bit(&self, ns: Namespace, slug: &str) -> Result<Option<BitPosition>> {
        self.read(|d, tx| lookup_in(d, tx, ns, slug))
    }

    /// Highest position ever handed out in `ns`
    pub fn high_water(&self, ns: Namespace) -> Result<Option<BitPosition>> {
        self.read(|d, tx| high_water_in(d, tx, ns))
    }
}
