//! Direct associations (holder -> unit) and the grant/revoke entry points.
//!
//! Every mutation here ends in `propagate(holder)`, which rewrites the holder's
//! own bitmask and the index rows of everything that depends on it.

use std::collections::BTreeSet;

use heed::RoTxn;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::{Dbs, Store};
use crate::entity::{action_by_slug, exists, resource_action_for, resource_slug};
use crate::error::{err, propagation, Error, Result};
use crate::keys::{pair, split_pair, Namespace, Node, NodeKind};
use crate::registry::lookup_in;
use crate::tx::Tx;

/// Something a holder can be granted.
///
/// JSON form: `{"type": "action", "value": "posts.edit"}`, `{"type": "role", "value": 3}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Unit {
    Action(String),
    ResourceAction {
        resource_type: String,
        resource_id: String,
        action_type: String,
    },
    Role(u64),
    Group(u64),
}

impl Unit {
    pub fn action(slug: impl Into<String>) -> Self {
        Unit::Action(slug.into())
    }

    pub fn resource(resource_type: impl Into<String>, resource_id: impl Into<String>, action_type: impl Into<String>) -> Self {
        Unit::ResourceAction {
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            action_type: action_type.into(),
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Unit::Action(_) => NodeKind::Action,
            Unit::ResourceAction { .. } => NodeKind::ResourceAction,
            Unit::Role(_) => NodeKind::Role,
            Unit::Group(_) => NodeKind::Group,
        }
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Units directly associated with `holder`
pub(crate) fn units_of(d: &Dbs, tx: &RoTxn, holder: Node) -> Result<Vec<Node>> {
    Ok(d.grants
        .scan_fwd(tx, &holder.encode())?
        .iter()
        .filter_map(|k| split_pair(k).map(|(_, unit)| unit))
        .collect())
}

/// Holders directly associated with `unit`
pub(crate) fn holders_of(d: &Dbs, tx: &RoTxn, unit: Node) -> Result<Vec<Node>> {
    Ok(d.grants
        .scan_rev(tx, &unit.encode())?
        .iter()
        .filter_map(|k| split_pair(k).map(|(_, holder)| holder))
        .collect())
}

/// Every holder with at least one direct association
pub(crate) fn all_holders(d: &Dbs, tx: &RoTxn) -> Result<BTreeSet<Node>> {
    let mut r = BTreeSet::new();
    for item in d.grants.fwd.iter(tx).map_err(err)? {
        let (k, _) = item.map_err(err)?;
        if let Some((holder, _)) = split_pair(k) {
            r.insert(holder);
        }
    }
    Ok(r)
}

/// Map a unit to its node without creating anything. `Ok(None)` means the
/// unit once existed (its bit is reserved) but has since been deleted.
fn find_unit(d: &Dbs, tx: &RoTxn, unit: &Unit) -> Result<Option<Node>> {
    match unit {
        Unit::Action(slug) => match action_by_slug(d, tx, slug)? {
            Some(a) => Ok(Some(Node::action(a.id))),
            None if lookup_in(d, tx, Namespace::Global, slug)?.is_some() => Ok(None),
            None => Err(Error::UnknownSlug(slug.clone())),
        },
        Unit::ResourceAction { resource_type, resource_id, action_type } => {
            match resource_action_for(d, tx, resource_type, resource_id, action_type)? {
                Some(ra) => Ok(Some(Node::resource_action(ra.id))),
                None => {
                    let slug = resource_slug(resource_type, resource_id, action_type);
                    if lookup_in(d, tx, Namespace::Resource, &slug)?.is_some() {
                        Ok(None)
                    } else {
                        Err(Error::UnknownSlug(slug))
                    }
                }
            }
        }
        Unit::Role(id) | Unit::Group(id) => {
            let node = Node::new(unit.kind(), *id);
            Ok(if exists(d, tx, node)? { Some(node) } else { None })
        }
    }
}

impl Tx<'_> {
    fn check_holder(&self, holder: Node, unit: NodeKind) -> Result<()> {
        if !holder.kind.can_hold(unit) {
            return Err(Error::MissingCapability { holder, unit });
        }
        if !exists(self.dbs(), self.ro(), holder)? {
            return Err(Error::NotFound(holder.to_string()));
        }
        Ok(())
    }

    /// Node for `unit`, creating actions and resource actions on first use
    fn unit_for_grant(&mut self, unit: &Unit) -> Result<Node> {
        match unit {
            Unit::Action(slug) => self.create_action(slug).map(|a| Node::action(a.id)),
            Unit::ResourceAction { resource_type, resource_id, action_type } => self
                .ensure_resource_action(resource_type, resource_id, action_type)
                .map(|ra| Node::resource_action(ra.id)),
            Unit::Role(id) | Unit::Group(id) => {
                let node = Node::new(unit.kind(), *id);
                if !exists(self.dbs(), self.ro(), node)? {
                    return Err(Error::NotFound(node.to_string()));
                }
                Ok(node)
            }
        }
    }

    /// Insert the association only; returns false if it was already there
    pub(crate) fn link(&mut self, holder: Node, unit: Node) -> Result<bool> {
        let dbs = self.dbs();
        if dbs.grants.get(self.ro(), &pair(holder, unit))?.is_some() {
            return Ok(false);
        }
        dbs.grants.put(self.txn(), &pair(holder, unit), &pair(unit, holder), now_ms())?;
        Ok(true)
    }

    /// Remove the association only
    pub(crate) fn unlink(&mut self, holder: Node, unit: Node) -> Result<bool> {
        let dbs = self.dbs();
        dbs.grants.del(self.txn(), &pair(holder, unit), &pair(unit, holder))
    }

    /// Remove every association in which `node` takes part. Returns its former holders.
    pub(crate) fn detach(&mut self, node: Node) -> Result<Vec<Node>> {
        let dbs = self.dbs();
        let holders = holders_of(dbs, self.ro(), node)?;
        for &h in &holders {
            self.unlink(h, node)?;
        }
        for unit in units_of(dbs, self.ro(), node)? {
            self.unlink(node, unit)?;
        }
        Ok(holders)
    }

    /// Grant `unit` to `holder` and recompute everything depending on `holder`
    pub fn grant(&mut self, holder: Node, unit: &Unit) -> Result<bool> {
        self.check_holder(holder, unit.kind())?;
        let node = self.unit_for_grant(unit)?;
        let changed = self.link(holder, node)?;
        if changed {
            self.propagate(holder).map_err(|e| propagation(holder, e))?;
        }
        debug!(%holder, unit = %node, changed, "grant");
        Ok(changed)
    }

    /// Revoke a direct association. Indirect paths to the same bit are untouched.
    pub fn revoke(&mut self, holder: Node, unit: &Unit) -> Result<bool> {
        self.check_holder(holder, unit.kind())?;
        let Some(node) = find_unit(self.dbs(), self.ro(), unit)? else { return Ok(false) };
        let changed = self.unlink(holder, node)?;
        if changed {
            self.propagate(holder).map_err(|e| propagation(holder, e))?;
        }
        debug!(%holder, unit = %node, changed, "revoke");
        Ok(changed)
    }

    /// Several grants, one propagation
    pub fn grant_many(&mut self, holder: Node, units: &[Unit]) -> Result<usize> {
        let mut added = 0;
        for unit in units {
            self.check_holder(holder, unit.kind())?;
            let node = self.unit_for_grant(unit)?;
            if self.link(holder, node)? {
                added += 1;
            }
        }
        if added > 0 {
            self.propagate(holder).map_err(|e| propagation(holder, e))?;
        }
        debug!(%holder, added, "grant_many");
        Ok(added)
    }

    /// Make the holder's direct actions exactly `slugs`. Returns (attached, detached).
    pub fn sync_actions(&mut self, holder: Node, slugs: &[&str]) -> Result<(usize, usize)> {
        self.check_holder(holder, NodeKind::Action)?;
        let mut wanted = BTreeSet::new();
        for slug in slugs {
            wanted.insert(Node::action(self.create_action(slug)?.id));
        }
        let current: BTreeSet<Node> = units_of(self.dbs(), self.ro(), holder)?
            .into_iter()
            .filter(|n| n.kind == NodeKind::Action)
            .collect();
        let mut attached = 0;
        for &n in wanted.difference(&current) {
            self.link(holder, n)?;
            attached += 1;
        }
        let mut detached = 0;
        for &n in current.difference(&wanted) {
            self.unlink(holder, n)?;
            detached += 1;
        }
        if attached + detached > 0 {
            self.propagate(holder).map_err(|e| propagation(holder, e))?;
        }
        debug!(%holder, attached, detached, "sync_actions");
        Ok((attached, detached))
    }
}

impl Store {
    pub fn grant(&self, holder: Node, unit: &Unit) -> Result<bool> {
        self.transact(|tx| tx.grant(holder, unit))
    }

    pub fn revoke(&self, holder: Node, unit: &Unit) -> Result<bool> {
        self.transact(|tx| tx.revoke(holder, unit))
    }

    pub fn grant_many(&self, holder: Node, units: &[Unit]) -> Result<usize> {
        self.transact(|tx| tx.grant_many(holder, units))
    }

    pub fn sync_actions(&self, holder: Node, slugs: &[&str]) -> Result<(usize, usize)> {
        self.transact(|tx| tx.sync_actions(holder, slugs))
    }

    /// Direct associations of `holder`, in key order
    pub fn direct_units(&self, holder: Node) -> Result<Vec<Node>> {
        self.read(|d, tx| units_of(d, tx, holder))
    }

    /// Direct holders of `unit`
    pub fn direct_holders(&self, unit: Node) -> Result<Vec<Node>> {
        self.read(|d, tx| holders_of(d, tx, unit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_json() {
        let u: Unit = serde_json::from_str(r#"{"type": "action", "value": "posts.edit"}"#).unwrap();
        assert_eq!(u, Unit::action("posts.edit"));
        let u: Unit = serde_json::from_str(r#"{"type": "group", "value": 4}"#).unwrap();
        assert_eq!(u.kind(), NodeKind::Group);
        let u: Unit = serde_json::from_str(
            r#"{"type": "resource_action", "value": {"resource_type": "Folder", "resource_id": "f1", "action_type": "share"}}"#,
        )
        .unwrap();
        assert_eq!(u, Unit::resource("Folder", "f1", "share"));
        assert_eq!(serde_json::to_string(&Unit::Role(3)).unwrap(), r#"{"type":"role","value":3}"#);
    }
}
