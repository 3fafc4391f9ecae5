//! Permission resolution and bit index maintenance.
//!
//! Aggregation:
//! - Role/Group own bitmask = OR of the bits of their directly granted actions
//! - Principal global mask  = own actions | roles | groups (| roles of those groups)
//! - Resource mask          = the same walk over resource-action associations
//!
//! Every indexed owner's resolved masks are stored in `resolved` and exploded
//! into one `index` row per held bit. Writes go through `propagate`, which
//! recomputes the mutated owner and everything that holds it and rewrites the
//! rows as a diff against the stored snapshot.

use std::collections::{BTreeSet, HashMap, HashSet};

use heed::RoTxn;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::bitmask::Bitmask;
use crate::db::{Dbs, Store};
use crate::entity::{
    action_in, decode, encode, group_in, list_actions_in, list_ids, resource_action_for, resource_action_in,
    resource_prefix, resource_slug, role_in,
};
use crate::error::{err, Error, Result};
use crate::grants::{all_holders, holders_of, units_of};
use crate::keys::{bit_key, bit_prefix, bit_rev_key, parse_bit_rev_key, Namespace, Node, NodeKind};
use crate::registry::{lookup_in, BitPosition};
use crate::tx::Tx;

/// Resolved masks of one owner
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Masks {
    pub global: Bitmask,
    pub resource: Bitmask,
}

impl Masks {
    pub fn get(&self, ns: Namespace) -> &Bitmask {
        match ns {
            Namespace::Global => &self.global,
            Namespace::Resource => &self.resource,
        }
    }

    fn union_with(&mut self, other: &Masks) {
        self.global.union_with(&other.global);
        self.resource.union_with(&other.resource);
    }
}

/// OR of the bits of the actions directly granted to `holder`
fn direct_action_mask(d: &Dbs, tx: &RoTxn, holder: Node) -> Result<Bitmask> {
    let mut mask = Bitmask::new();
    for unit in units_of(d, tx, holder)? {
        if unit.kind == NodeKind::Action {
            if let Some(a) = action_in(d, tx, unit.id)? {
                mask.set_bit(a.bit);
            }
        }
    }
    Ok(mask)
}

/// Masks an owner carries before following any Role/Group edge
fn own_masks(d: &Dbs, tx: &RoTxn, node: Node) -> Result<Masks> {
    let mut m = Masks::default();
    match node.kind {
        NodeKind::Action => {
            if let Some(a) = action_in(d, tx, node.id)? {
                m.global.set_bit(a.bit);
            }
        }
        NodeKind::ResourceAction => {
            if let Some(ra) = resource_action_in(d, tx, node.id)? {
                m.resource.set_bit(ra.bit);
            }
        }
        NodeKind::Role => {
            if let Some(r) = role_in(d, tx, node.id)? {
                m.global = r.bitmask;
            }
        }
        NodeKind::Group => {
            if let Some(g) = group_in(d, tx, node.id)? {
                m.global = g.bitmask;
            }
        }
        NodeKind::Principal => m.global = direct_action_mask(d, tx, node)?,
    }
    Ok(m)
}

/// One resolution pass. Results are memoized per owner. An owner met again
/// while it is still being resolved yields what it has accumulated so far
/// (its own masks plus any edges already walked) instead of looping.
#[derive(Default)]
pub(crate) struct Pass {
    done: HashMap<Node, Masks>,
    partial: HashMap<Node, Masks>,
}

impl Pass {
    pub(crate) fn resolve(&mut self, d: &Dbs, tx: &RoTxn, node: Node) -> Result<Masks> {
        if let Some(m) = self.done.get(&node) {
            return Ok(m.clone());
        }
        if let Some(m) = self.partial.get(&node) {
            warn!(%node, "cycle in aggregation graph");
            return Ok(m.clone());
        }
        let mut masks = own_masks(d, tx, node)?;
        if matches!(node.kind, NodeKind::Role | NodeKind::Group | NodeKind::Principal) {
            self.partial.insert(node, masks.clone());
            for unit in units_of(d, tx, node)? {
                match unit.kind {
                    NodeKind::Role | NodeKind::Group | NodeKind::Principal => {
                        let sub = self.resolve(d, tx, unit)?;
                        masks.union_with(&sub);
                    }
                    NodeKind::ResourceAction => {
                        if let Some(ra) = resource_action_in(d, tx, unit.id)? {
                            masks.resource.set_bit(ra.bit);
                        }
                    }
                    // folded into own_masks
                    NodeKind::Action => continue,
                }
                self.partial.insert(node, masks.clone());
            }
            self.partial.remove(&node);
        }
        self.done.insert(node, masks.clone());
        Ok(masks)
    }
}

/// `origin` followed by everything that transitively holds it
fn dependents(d: &Dbs, tx: &RoTxn, origin: Node) -> Result<Vec<Node>> {
    let mut seen = HashSet::from([origin]);
    let mut order = vec![origin];
    let mut i = 0;
    while i < order.len() {
        let n = order[i];
        i += 1;
        if matches!(n.kind, NodeKind::Role | NodeKind::Group) {
            for h in holders_of(d, tx, n)? {
                if seen.insert(h) {
                    order.push(h);
                }
            }
        }
    }
    order.retain(|n| n.kind.is_indexed());
    Ok(order)
}

pub(crate) fn resolved_in(d: &Dbs, tx: &RoTxn, owner: Node) -> Result<Option<Masks>> {
    match d.resolved.get(tx, &owner.encode()).map_err(err)? {
        Some(s) => decode(s).map(Some),
        None => Ok(None),
    }
}

fn indexed_owners(d: &Dbs, tx: &RoTxn, ns: Namespace, bit: BitPosition, kind: Option<NodeKind>) -> Result<Vec<Node>> {
    Ok(d.index
        .scan_rev(tx, &bit_prefix(ns, bit))?
        .iter()
        .filter_map(|k| parse_bit_rev_key(k).map(|(_, _, owner)| owner))
        .filter(|o| kind.map_or(true, |k| o.kind == k))
        .collect())
}

/// Outcome of probing the index for one bit
enum Probe {
    /// no bit was ever allocated for the slug
    Absent,
    /// owner is materialized; the index answered
    Indexed(bool),
    /// owner has no snapshot yet
    Unindexed(BitPosition),
}

fn probe(d: &Dbs, tx: &RoTxn, owner: Node, ns: Namespace, slug: &str) -> Result<Probe> {
    let Some(bit) = lookup_in(d, tx, ns, slug)? else { return Ok(Probe::Absent) };
    if d.resolved.get(tx, &owner.encode()).map_err(err)?.is_none() {
        return Ok(Probe::Unindexed(bit));
    }
    Ok(Probe::Indexed(d.index.get(tx, &bit_key(owner, ns, bit))?.is_some()))
}

impl Tx<'_> {
    /// Recompute a Role/Group own bitmask from its direct actions
    fn recompute_own(&mut self, node: Node) -> Result<()> {
        let dbs = self.dbs();
        let mask = direct_action_mask(dbs, self.ro(), node)?;
        match node.kind {
            NodeKind::Role => {
                if let Some(mut r) = role_in(dbs, self.ro(), node.id)? {
                    if r.bitmask != mask {
                        r.bitmask = mask;
                        self.put_role(&r)?;
                    }
                }
            }
            NodeKind::Group => {
                if let Some(mut g) = group_in(dbs, self.ro(), node.id)? {
                    if g.bitmask != mask {
                        g.bitmask = mask;
                        self.put_group(&g)?;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Rewrite `owner`'s index rows as a diff against its stored snapshot
    pub(crate) fn write_index(&mut self, owner: Node, new: &Masks) -> Result<()> {
        let dbs = self.dbs();
        let old = resolved_in(dbs, self.ro(), owner)?;
        if old.as_ref() == Some(new) {
            return Ok(());
        }
        let old = old.unwrap_or_default();
        let (mut added, mut removed) = (0usize, 0usize);
        for ns in Namespace::ALL {
            let (before, after) = (old.get(ns), new.get(ns));
            for bit in before.ones() {
                if !after.test_bit(bit) {
                    dbs.index.del(self.txn(), &bit_key(owner, ns, bit), &bit_rev_key(ns, bit, owner))?;
                    removed += 1;
                }
            }
            for bit in after.ones() {
                if !before.test_bit(bit) {
                    dbs.index.put(self.txn(), &bit_key(owner, ns, bit), &bit_rev_key(ns, bit, owner), 1)?;
                    added += 1;
                }
            }
        }
        dbs.resolved.put(self.txn(), &owner.encode(), &encode(new)?).map_err(err)?;
        trace!(%owner, added, removed, "index diff");
        Ok(())
    }

    /// Remove every index row of `owner` and its snapshot
    pub(crate) fn drop_index(&mut self, owner: Node) -> Result<()> {
        if !owner.kind.is_indexed() {
            return Ok(());
        }
        self.write_index(owner, &Masks::default())?;
        let dbs = self.dbs();
        dbs.resolved.delete(self.txn(), &owner.encode()).map_err(err)?;
        Ok(())
    }

    /// Recompute `origin` and every owner that depends on it, inside this transaction.
    /// Returns the number of owners rewritten.
    pub(crate) fn propagate(&mut self, origin: Node) -> Result<usize> {
        let dbs = self.dbs();
        if matches!(origin.kind, NodeKind::Role | NodeKind::Group) {
            self.recompute_own(origin)?;
        }
        let affected = dependents(dbs, self.ro(), origin)?;
        let mut pass = Pass::default();
        for &owner in &affected {
            let masks = pass.resolve(dbs, self.ro(), owner)?;
            self.write_index(owner, &masks)?;
        }
        debug!(%origin, affected = affected.len(), "propagated");
        Ok(affected.len())
    }

    /// Resolve `owner` and store its snapshot
    pub(crate) fn materialize(&mut self, owner: Node) -> Result<Masks> {
        let masks = Pass::default().resolve(self.dbs(), self.ro(), owner)?;
        self.write_index(owner, &masks)?;
        Ok(masks)
    }

    /// Recompute every own bitmask and every owner's rows from scratch
    pub fn rebuild_index(&mut self) -> Result<usize> {
        let dbs = self.dbs();
        let mut owners: BTreeSet<Node> = all_holders(dbs, self.ro())?;
        for kind in [NodeKind::Action, NodeKind::Role, NodeKind::Group] {
            owners.extend(list_ids(dbs, self.ro(), kind)?.into_iter().map(|id| Node::new(kind, id)));
        }
        for item in dbs.resolved.iter(self.ro()).map_err(err)? {
            let (k, _) = item.map_err(err)?;
            if let Some(n) = Node::decode(k) {
                owners.insert(n);
            }
        }
        owners.retain(|n| n.kind.is_indexed());
        for &n in owners.iter().filter(|n| matches!(n.kind, NodeKind::Role | NodeKind::Group)) {
            self.recompute_own(n)?;
        }
        let mut pass = Pass::default();
        for &owner in &owners {
            let masks = pass.resolve(dbs, self.ro(), owner)?;
            self.write_index(owner, &masks)?;
        }
        debug!(owners = owners.len(), "index rebuilt");
        Ok(owners.len())
    }
}

impl Store {
    fn has_bit(&self, owner: Node, ns: Namespace, slug: &str) -> Result<bool> {
        match self.read(|d, tx| probe(d, tx, owner, ns, slug))? {
            Probe::Absent => Ok(false),
            Probe::Indexed(held) => Ok(held),
            Probe::Unindexed(bit) => {
                let masks = self.transact(|tx| tx.materialize(owner))?;
                Ok(masks.get(ns).test_bit(bit))
            }
        }
    }

    /// Does `principal` hold the action `slug` through any path?
    /// An unallocated slug is simply not held.
    pub fn has_action(&self, principal: u64, slug: &str) -> Result<bool> {
        self.node_has_action(Node::principal(principal), slug)
    }

    /// `has_action` for any indexed owner
    pub fn node_has_action(&self, owner: Node, slug: &str) -> Result<bool> {
        self.has_bit(owner, Namespace::Global, slug)
    }

    pub fn has_resource_action(
        &self,
        principal: u64,
        resource_type: &str,
        resource_id: &str,
        action_type: &str,
    ) -> Result<bool> {
        let slug = resource_slug(resource_type, resource_id, action_type);
        self.has_bit(Node::principal(principal), Namespace::Resource, &slug)
    }

    /// Effective global mask, computed by walking the graph
    pub fn global_mask(&self, principal: u64) -> Result<Bitmask> {
        self.read(|d, tx| Ok(Pass::default().resolve(d, tx, Node::principal(principal))?.global))
    }

    /// Effective resource mask restricted to one resource instance
    pub fn resource_mask(&self, principal: u64, resource_type: &str, resource_id: &str) -> Result<Bitmask> {
        let prefix = resource_prefix(resource_type, resource_id);
        self.read(|d, tx| {
            let all = Pass::default().resolve(d, tx, Node::principal(principal))?.resource;
            let mut mask = Bitmask::new();
            for item in d.slugs.prefix_iter(tx, &format!("{}/{}", NodeKind::ResourceAction.name(), prefix)).map_err(err)? {
                let (_, id) = item.map_err(err)?;
                if let Some(ra) = resource_action_in(d, tx, id)? {
                    if ra.matches(resource_type, resource_id) && all.test_bit(ra.bit) {
                        mask.set_bit(ra.bit);
                    }
                }
            }
            Ok(mask)
        })
    }

    /// Masks stored for `owner` by the last propagation, if materialized
    pub fn indexed_mask(&self, owner: Node) -> Result<Option<Masks>> {
        self.read(|d, tx| resolved_in(d, tx, owner))
    }

    /// Slugs of every action `principal` effectively holds
    pub fn actions_of(&self, principal: u64) -> Result<Vec<String>> {
        self.read(|d, tx| {
            let mask = Pass::default().resolve(d, tx, Node::principal(principal))?.global;
            Ok(list_actions_in(d, tx)?
                .into_iter()
                .filter(|a| mask.test_bit(a.bit))
                .map(|a| a.slug)
                .collect())
        })
    }

    /// Principals holding `action_type` on the given resource, from the reverse index
    pub fn users_with_access(&self, resource_type: &str, resource_id: &str, action_type: &str) -> Result<Vec<u64>> {
        self.read(|d, tx| match resource_action_for(d, tx, resource_type, resource_id, action_type)? {
            Some(ra) => Ok(indexed_owners(d, tx, Namespace::Resource, ra.bit, Some(NodeKind::Principal))?
                .into_iter()
                .map(|n| n.id)
                .collect()),
            None => Ok(Vec::new()),
        })
    }

    /// Principals holding the global action `slug`, from the reverse index
    pub fn principals_with_action(&self, slug: &str) -> Result<Vec<u64>> {
        self.read(|d, tx| match lookup_in(d, tx, Namespace::Global, slug)? {
            Some(bit) => Ok(indexed_owners(d, tx, Namespace::Global, bit, Some(NodeKind::Principal))?
                .into_iter()
                .map(|n| n.id)
                .collect()),
            None => Ok(Vec::new()),
        })
    }

    /// Every indexed owner (of any kind) holding `bit` in `ns`
    pub fn owners_of_bit(&self, ns: Namespace, bit: BitPosition) -> Result<Vec<Node>> {
        self.read(|d, tx| indexed_owners(d, tx, ns, bit, None))
    }

    /// Rewrite the whole index from the associations (repair tool)
    pub fn rebuild_index(&self) -> Result<usize> {
        self.transact(|tx| tx.rebuild_index())
    }

    /// Materialize `owner` if it has no snapshot yet
    pub fn ensure_indexed(&self, owner: Node) -> Result<Masks> {
        if !owner.kind.is_indexed() {
            return Err(Error::MissingCapability { holder: owner, unit: owner.kind });
        }
        match self.indexed_mask(owner)? {
            Some(m) => Ok(m),
            None => self.transact(|tx| tx.materialize(owner)),
        }
    }
}
