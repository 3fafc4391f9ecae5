//! Database handles and the `Store` that owns them

use std::path::{Path, PathBuf};

use heed::types::{Bytes, Str, U64};
use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};
use tracing::info;

use crate::config::Config;
use crate::error::{err, Result};

// Database type aliases
pub type Db = Database<Bytes, U64<byteorder::BigEndian>>;
pub type DbRec = Database<Bytes, Str>;
pub type DbName = Database<Str, U64<byteorder::BigEndian>>;

const MAX_DBS: u32 = 12;

/// Bidirectional index: every `fwd` row has a mirrored `rev` row
pub struct BiPair {
    pub fwd: Db,
    pub rev: Db,
}

impl BiPair {
    #[inline]
    pub fn get(&self, tx: &RoTxn, fwd: &[u8]) -> Result<Option<u64>> {
        self.fwd.get(tx, fwd).map_err(err)
    }

    #[inline]
    pub fn put(&self, tx: &mut RwTxn, fwd: &[u8], rev: &[u8], v: u64) -> Result<()> {
        self.fwd.put(tx, fwd, &v).map_err(err)?;
        self.rev.put(tx, rev, &v).map_err(err)
    }

    #[inline]
    pub fn del(&self, tx: &mut RwTxn, fwd: &[u8], rev: &[u8]) -> Result<bool> {
        let r = self.fwd.delete(tx, fwd).map_err(err)?;
        self.rev.delete(tx, rev).map_err(err)?;
        Ok(r)
    }

    pub fn scan_fwd(&self, tx: &RoTxn, prefix: &[u8]) -> Result<Vec<Vec<u8>>> {
        Self::scan(tx, &self.fwd, prefix)
    }

    pub fn scan_rev(&self, tx: &RoTxn, prefix: &[u8]) -> Result<Vec<Vec<u8>>> {
        Self::scan(tx, &self.rev, prefix)
    }

    fn scan(tx: &RoTxn, db: &Db, prefix: &[u8]) -> Result<Vec<Vec<u8>>> {
        let mut r = Vec::new();
        for item in db.prefix_iter(tx, prefix).map_err(err)? {
            let (k, _) = item.map_err(err)?;
            r.push(k.to_vec());
        }
        Ok(r)
    }

    fn clear(&self, tx: &mut RwTxn) -> Result<()> {
        self.fwd.clear(tx).map_err(err)?;
        self.rev.clear(tx).map_err(err)
    }
}

/// All database handles
pub struct Dbs {
    /// id counter and per-namespace bit high-water marks
    pub meta: Database<Str, Str>,
    /// `<ns>/<slug>` -> bit position, never deleted from
    pub bits: DbName,
    /// `<kind>/<slug or name>` -> record id
    pub slugs: DbName,
    pub actions: DbRec,
    pub resource_actions: DbRec,
    pub roles: DbRec,
    pub groups: DbRec,
    /// owner -> last resolved masks
    pub resolved: DbRec,
    /// holder|unit -> grant epoch (ms)
    pub grants: BiPair,
    /// owner|ns|bit <-> ns|bit|owner
    pub index: BiPair,
}

/// An opened LMDB environment plus its databases.
///
/// Reads run on MVCC snapshots and never block; LMDB admits one writer at a
/// time, so every `transact` is serialized against every other.
pub struct Store {
    env: Env,
    dbs: Dbs,
    path: PathBuf,
}

impl Store {
    /// Open (creating if needed) the store described by `config`
    pub fn open(config: &Config) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.path).map_err(err)?;
        // SAFETY: LMDB requires no other process to open this path with a different configuration concurrently.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(config.map_size)
                .max_readers(config.max_readers)
                .max_dbs(MAX_DBS)
                .open(&config.path)
                .map_err(err)?
        };
        let mut tx = env.write_txn().map_err(err)?;
        let dbs = Dbs {
            meta: env.create_database(&mut tx, Some("meta")).map_err(err)?,
            bits: env.create_database(&mut tx, Some("bits")).map_err(err)?,
            slugs: env.create_database(&mut tx, Some("slugs")).map_err(err)?,
            actions: env.create_database(&mut tx, Some("actions")).map_err(err)?,
            resource_actions: env.create_database(&mut tx, Some("resource_actions")).map_err(err)?,
            roles: env.create_database(&mut tx, Some("roles")).map_err(err)?,
            groups: env.create_database(&mut tx, Some("groups")).map_err(err)?,
            resolved: env.create_database(&mut tx, Some("resolved")).map_err(err)?,
            grants: BiPair {
                fwd: env.create_database(&mut tx, Some("grants")).map_err(err)?,
                rev: env.create_database(&mut tx, Some("grants_rev")).map_err(err)?,
            },
            index: BiPair {
                fwd: env.create_database(&mut tx, Some("index")).map_err(err)?,
                rev: env.create_database(&mut tx, Some("index_rev")).map_err(err)?,
            },
        };
        tx.commit().map_err(err)?;
        info!(path = %config.path.display(), map_size = config.map_size, "store opened");
        Ok(Store { env, dbs, path: config.path.clone() })
    }

    /// Open with defaults at `path`
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(&Config::with_path(path.as_ref()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Execute a read-only operation on one snapshot
    #[inline]
    pub fn read<T, F: FnOnce(&Dbs, &RoTxn) -> Result<T>>(&self, f: F) -> Result<T> {
        let tx = self.env.read_txn().map_err(err)?;
        f(&self.dbs, &tx)
    }

    pub(crate) fn env(&self) -> &Env {
        &self.env
    }

    pub(crate) fn dbs(&self) -> &Dbs {
        &self.dbs
    }

    /// Clear all databases, bit registry included (for testing)
    pub fn clear_all(&self) -> Result<()> {
        self.transact(|tx| {
            let d = tx.dbs();
            let t = tx.txn();
            d.meta.clear(t).map_err(err)?;
            d.bits.clear(t).map_err(err)?;
            d.slugs.clear(t).map_err(err)?;
            d.actions.clear(t).map_err(err)?;
            d.resource_actions.clear(t).map_err(err)?;
            d.roles.clear(t).map_err(err)?;
            d.groups.clear(t).map_err(err)?;
            d.resolved.clear(t).map_err(err)?;
            d.grants.clear(t)?;
            d.index.clear(t)
        })
    }
}
