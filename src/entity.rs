//! Persisted entities: actions, resource actions, roles and groups

use heed::RoTxn;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bitmask::Bitmask;
use crate::db::{DbRec, Dbs, Store};
use crate::error::{err, Error, Result};
use crate::keys::{id_key, Namespace, Node, NodeKind};
use crate::registry::BitPosition;
use crate::tx::Tx;

/// Globally-scoped permission unit with one reserved bit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub id: u64,
    pub slug: String,
    pub bit: BitPosition,
}

/// One `(resource instance, verb)` pair, bit taken from the resource namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAction {
    pub id: u64,
    pub resource_type: String,
    pub resource_id: String,
    pub action_type: String,
    pub slug: String,
    pub bit: BitPosition,
}

impl ResourceAction {
    pub fn matches(&self, resource_type: &str, resource_id: &str) -> bool {
        self.resource_type == resource_type && self.resource_id == resource_id
    }

    pub fn is(&self, resource_type: &str, resource_id: &str, action_type: &str) -> bool {
        self.matches(resource_type, resource_id) && self.action_type == action_type
    }
}

/// Named bundle of actions. `bitmask` is the OR of the directly granted action bits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: u64,
    pub name: String,
    pub bitmask: Bitmask,
}

/// Named bundle of actions and roles. `bitmask` covers the directly granted actions only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: u64,
    pub name: String,
    pub bitmask: Bitmask,
}

/// Escape `\` and `:` so a component can never swallow a separator
fn escape_part(part: &str, out: &mut String) {
    for c in part.chars() {
        if c == '\\' || c == ':' {
            out.push('\\');
        }
        out.push(c);
    }
}

/// Slug of the resource action for `(resource_type, resource_id, action_type)`.
///
/// Components are joined with `:` after escaping, so `("Folder:a", "b", v)` and
/// `("Folder", "a:b", v)` get different slugs.
pub fn resource_slug(resource_type: &str, resource_id: &str, action_type: &str) -> String {
    let mut s = resource_prefix(resource_type, resource_id);
    escape_part(action_type, &mut s);
    s
}

/// Slug prefix shared by every verb on one resource instance
pub(crate) fn resource_prefix(resource_type: &str, resource_id: &str) -> String {
    let mut s = String::with_capacity(resource_type.len() + resource_id.len() + 2);
    escape_part(resource_type, &mut s);
    s.push(':');
    escape_part(resource_id, &mut s);
    s.push(':');
    s
}

fn slug_key(kind: NodeKind, s: &str) -> String {
    format!("{}/{}", kind.name(), s)
}

pub(crate) fn encode<T: Serialize>(v: &T) -> Result<String> {
    serde_json::to_string(v).map_err(|e| Error::Corrupt(e.to_string()))
}

pub(crate) fn decode<T: DeserializeOwned>(s: &str) -> Result<T> {
    serde_json::from_str(s).map_err(|e| Error::Corrupt(e.to_string()))
}

fn record_db(d: &Dbs, kind: NodeKind) -> Option<&DbRec> {
    match kind {
        NodeKind::Action => Some(&d.actions),
        NodeKind::ResourceAction => Some(&d.resource_actions),
        NodeKind::Role => Some(&d.roles),
        NodeKind::Group => Some(&d.groups),
        NodeKind::Principal => None,
    }
}

fn get_rec<T: DeserializeOwned>(db: &DbRec, tx: &RoTxn, id: u64) -> Result<Option<T>> {
    match db.get(tx, &id_key(id)).map_err(err)? {
        Some(s) => decode(s).map(Some),
        None => Ok(None),
    }
}

pub(crate) fn id_by_slug(d: &Dbs, tx: &RoTxn, kind: NodeKind, s: &str) -> Result<Option<u64>> {
    d.slugs.get(tx, &slug_key(kind, s)).map_err(err)
}

pub(crate) fn action_in(d: &Dbs, tx: &RoTxn, id: u64) -> Result<Option<Action>> {
    get_rec(&d.actions, tx, id)
}

pub(crate) fn resource_action_in(d: &Dbs, tx: &RoTxn, id: u64) -> Result<Option<ResourceAction>> {
    get_rec(&d.resource_actions, tx, id)
}

pub(crate) fn role_in(d: &Dbs, tx: &RoTxn, id: u64) -> Result<Option<Role>> {
    get_rec(&d.roles, tx, id)
}

pub(crate) fn group_in(d: &Dbs, tx: &RoTxn, id: u64) -> Result<Option<Group>> {
    get_rec(&d.groups, tx, id)
}

pub(crate) fn action_by_slug(d: &Dbs, tx: &RoTxn, slug: &str) -> Result<Option<Action>> {
    match id_by_slug(d, tx, NodeKind::Action, slug)? {
        Some(id) => action_in(d, tx, id),
        None => Ok(None),
    }
}

pub(crate) fn resource_action_by_slug(d: &Dbs, tx: &RoTxn, slug: &str) -> Result<Option<ResourceAction>> {
    match id_by_slug(d, tx, NodeKind::ResourceAction, slug)? {
        Some(id) => resource_action_in(d, tx, id),
        None => Ok(None),
    }
}

/// Record for exactly `(resource_type, resource_id, action_type)`
pub(crate) fn resource_action_for(
    d: &Dbs,
    tx: &RoTxn,
    resource_type: &str,
    resource_id: &str,
    action_type: &str,
) -> Result<Option<ResourceAction>> {
    let slug = resource_slug(resource_type, resource_id, action_type);
    Ok(resource_action_by_slug(d, tx, &slug)?.filter(|ra| ra.is(resource_type, resource_id, action_type)))
}

/// Does the record behind `node` exist? Principals are external and always exist.
pub(crate) fn exists(d: &Dbs, tx: &RoTxn, node: Node) -> Result<bool> {
    match record_db(d, node.kind) {
        Some(db) => Ok(db.get(tx, &id_key(node.id)).map_err(err)?.is_some()),
        None => Ok(true),
    }
}

fn list_all<T: DeserializeOwned>(db: &DbRec, tx: &RoTxn) -> Result<Vec<T>> {
    let mut r = Vec::new();
    for item in db.iter(tx).map_err(err)? {
        let (_, v) = item.map_err(err)?;
        r.push(decode(v)?);
    }
    Ok(r)
}

pub(crate) fn list_actions_in(d: &Dbs, tx: &RoTxn) -> Result<Vec<Action>> {
    list_all(&d.actions, tx)
}

pub(crate) fn list_ids(d: &Dbs, tx: &RoTxn, kind: NodeKind) -> Result<Vec<u64>> {
    let Some(db) = record_db(d, kind) else { return Ok(Vec::new()) };
    let mut r = Vec::new();
    for item in db.iter(tx).map_err(err)? {
        let (k, _) = item.map_err(err)?;
        if let Ok(b) = <[u8; 8]>::try_from(k) {
            r.push(u64::from_be_bytes(b));
        }
    }
    Ok(r)
}

impl Tx<'_> {
    fn put_rec<T: Serialize>(&mut self, kind: NodeKind, id: u64, v: &T) -> Result<()> {
        let dbs = self.dbs();
        let db = record_db(dbs, kind).ok_or_else(|| Error::Corrupt(format!("{} has no record", kind)))?;
        db.put(self.txn(), &id_key(id), &encode(v)?).map_err(err)
    }

    fn put_slug(&mut self, kind: NodeKind, s: &str, id: u64) -> Result<()> {
        let dbs = self.dbs();
        dbs.slugs.put(self.txn(), &slug_key(kind, s), &id).map_err(err)
    }

    fn del_slug(&mut self, kind: NodeKind, s: &str) -> Result<()> {
        let dbs = self.dbs();
        dbs.slugs.delete(self.txn(), &slug_key(kind, s)).map_err(err)?;
        Ok(())
    }

    fn del_rec(&mut self, node: Node) -> Result<bool> {
        let dbs = self.dbs();
        match record_db(dbs, node.kind) {
            Some(db) => db.delete(self.txn(), &id_key(node.id)).map_err(err),
            None => Ok(false),
        }
    }

    pub(crate) fn put_role(&mut self, role: &Role) -> Result<()> {
        self.put_rec(NodeKind::Role, role.id, role)
    }

    pub(crate) fn put_group(&mut self, group: &Group) -> Result<()> {
        self.put_rec(NodeKind::Group, group.id, group)
    }

    /// Create an action, reserving its bit on first use. Idempotent on `slug`.
    pub fn create_action(&mut self, slug: &str) -> Result<Action> {
        if slug.is_empty() {
            return Err(Error::UnknownSlug(String::new()));
        }
        if let Some(a) = action_by_slug(self.dbs(), self.ro(), slug)? {
            return Ok(a);
        }
        let bit = self.allocate(Namespace::Global, slug)?;
        let action = Action { id: self.next_id()?, slug: slug.to_string(), bit };
        self.put_rec(NodeKind::Action, action.id, &action)?;
        self.put_slug(NodeKind::Action, slug, action.id)?;
        self.propagate(Node::action(action.id))?;
        debug!(slug, bit, id = action.id, "action created");
        Ok(action)
    }

    /// Resource action for `(type, id, verb)`, created lazily
    pub fn ensure_resource_action(
        &mut self,
        resource_type: &str,
        resource_id: &str,
        action_type: &str,
    ) -> Result<ResourceAction> {
        let slug = resource_slug(resource_type, resource_id, action_type);
        if let Some(ra) = resource_action_by_slug(self.dbs(), self.ro(), &slug)? {
            if !ra.is(resource_type, resource_id, action_type) {
                return Err(Error::Corrupt(format!("slug '{}' belongs to {}:{}:{}", slug, ra.resource_type, ra.resource_id, ra.action_type)));
            }
            return Ok(ra);
        }
        let bit = self.allocate(Namespace::Resource, &slug)?;
        let ra = ResourceAction {
            id: self.next_id()?,
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            action_type: action_type.to_string(),
            slug,
            bit,
        };
        self.put_rec(NodeKind::ResourceAction, ra.id, &ra)?;
        self.put_slug(NodeKind::ResourceAction, &ra.slug, ra.id)?;
        debug!(slug = %ra.slug, bit, id = ra.id, "resource action created");
        Ok(ra)
    }

    pub fn create_role(&mut self, name: &str) -> Result<Role> {
        if id_by_slug(self.dbs(), self.ro(), NodeKind::Role, name)?.is_some() {
            return Err(Error::Duplicate(format!("role '{}'", name)));
        }
        let role = Role { id: self.next_id()?, name: name.to_string(), bitmask: Bitmask::new() };
        self.put_role(&role)?;
        self.put_slug(NodeKind::Role, name, role.id)?;
        self.propagate(Node::role(role.id))?;
        Ok(role)
    }

    pub fn create_group(&mut self, name: &str) -> Result<Group> {
        if id_by_slug(self.dbs(), self.ro(), NodeKind::Group, name)?.is_some() {
            return Err(Error::Duplicate(format!("group '{}'", name)));
        }
        let group = Group { id: self.next_id()?, name: name.to_string(), bitmask: Bitmask::new() };
        self.put_group(&group)?;
        self.put_slug(NodeKind::Group, name, group.id)?;
        self.propagate(Node::group(group.id))?;
        Ok(group)
    }

    pub fn rename_role(&mut self, id: u64, new_name: &str) -> Result<()> {
        let mut role = role_in(self.dbs(), self.ro(), id)?.ok_or_else(|| Error::NotFound(Node::role(id).to_string()))?;
        if role.name == new_name {
            return Ok(());
        }
        if id_by_slug(self.dbs(), self.ro(), NodeKind::Role, new_name)?.is_some() {
            return Err(Error::Duplicate(format!("role '{}'", new_name)));
        }
        self.del_slug(NodeKind::Role, &role.name)?;
        role.name = new_name.to_string();
        self.put_slug(NodeKind::Role, new_name, id)?;
        self.put_role(&role)
    }

    pub fn rename_group(&mut self, id: u64, new_name: &str) -> Result<()> {
        let mut group = group_in(self.dbs(), self.ro(), id)?.ok_or_else(|| Error::NotFound(Node::group(id).to_string()))?;
        if group.name == new_name {
            return Ok(());
        }
        if id_by_slug(self.dbs(), self.ro(), NodeKind::Group, new_name)?.is_some() {
            return Err(Error::Duplicate(format!("group '{}'", new_name)));
        }
        self.del_slug(NodeKind::Group, &group.name)?;
        group.name = new_name.to_string();
        self.put_slug(NodeKind::Group, new_name, id)?;
        self.put_group(&group)
    }

    /// Detach `node` from every holder, drop its own grants and index rows, then the
    /// record. The bit position (if any) stays reserved.
    fn delete_node(&mut self, node: Node, slug: &str) -> Result<()> {
        let holders = self.detach(node)?;
        self.drop_index(node)?;
        self.del_rec(node)?;
        self.del_slug(node.kind, slug)?;
        for holder in holders {
            self.propagate(holder).map_err(|e| crate::error::propagation(node, e))?;
        }
        debug!(%node, "deleted");
        Ok(())
    }

    pub fn delete_action(&mut self, slug: &str) -> Result<bool> {
        match action_by_slug(self.dbs(), self.ro(), slug)? {
            Some(a) => self.delete_node(Node::action(a.id), slug).map(|_| true),
            None => Ok(false),
        }
    }

    pub fn delete_resource_action(&mut self, resource_type: &str, resource_id: &str, action_type: &str) -> Result<bool> {
        match resource_action_for(self.dbs(), self.ro(), resource_type, resource_id, action_type)? {
            Some(ra) => self.delete_node(Node::resource_action(ra.id), &ra.slug).map(|_| true),
            None => Ok(false),
        }
    }

    pub fn delete_role(&mut self, id: u64) -> Result<bool> {
        match role_in(self.dbs(), self.ro(), id)? {
            Some(r) => self.delete_node(Node::role(id), &r.name).map(|_| true),
            None => Ok(false),
        }
    }

    pub fn delete_group(&mut self, id: u64) -> Result<bool> {
        match group_in(self.dbs(), self.ro(), id)? {
            Some(g) => self.delete_node(Node::group(id), &g.name).map(|_| true),
            None => Ok(false),
        }
    }
}

impl Store {
    pub fn create_action(&self, slug: &str) -> Result<Action> {
        self.transact(|tx| tx.create_action(slug))
    }

    pub fn delete_action(&self, slug: &str) -> Result<bool> {
        self.transact(|tx| tx.delete_action(slug))
    }

    pub fn action(&self, slug: &str) -> Result<Option<Action>> {
        self.read(|d, tx| action_by_slug(d, tx, slug))
    }

    pub fn list_actions(&self) -> Result<Vec<Action>> {
        self.read(list_actions_in)
    }

    pub fn resource_action(&self, resource_type: &str, resource_id: &str, action_type: &str) -> Result<Option<ResourceAction>> {
        self.read(|d, tx| resource_action_for(d, tx, resource_type, resource_id, action_type))
    }

    pub fn delete_resource_action(&self, resource_type: &str, resource_id: &str, action_type: &str) -> Result<bool> {
        self.transact(|tx| tx.delete_resource_action(resource_type, resource_id, action_type))
    }

    pub fn create_role(&self, name: &str) -> Result<Role> {
        self.transact(|tx| tx.create_role(name))
    }

    pub fn create_group(&self, name: &str) -> Result<Group> {
        self.transact(|tx| tx.create_group(name))
    }

    pub fn rename_role(&self, id: u64, new_name: &str) -> Result<()> {
        self.transact(|tx| tx.rename_role(id, new_name))
    }

    pub fn rename_group(&self, id: u64, new_name: &str) -> Result<()> {
        self.transact(|tx| tx.rename_group(id, new_name))
    }

    pub fn delete_role(&self, id: u64) -> Result<bool> {
        self.transact(|tx| tx.delete_role(id))
    }

    pub fn delete_group(&self, id: u64) -> Result<bool> {
        self.transact(|tx| tx.delete_group(id))
    }

    pub fn role(&self, id: u64) -> Result<Option<Role>> {
        self.read(|d, tx| role_in(d, tx, id))
    }

    pub fn group(&self, id: u64) -> Result<Option<Group>> {
        self.read(|d, tx| group_in(d, tx, id))
    }

    pub fn role_by_name(&self, name: &str) -> Result<Option<Role>> {
        self.read(|d, tx| match id_by_slug(d, tx, NodeKind::Role, name)? {
            Some(id) => role_in(d, tx, id),
            None => Ok(None),
        })
    }

    pub fn group_by_name(&self, name: &str) -> Result<Option<Group>> {
        self.read(|d, tx| match id_by_slug(d, tx, NodeKind::Group, name)? {
            Some(id) => group_in(d, tx, id),
            None => Ok(None),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_slug_plain() {
        assert_eq!(resource_slug("Folder", "f1", "share"), "Folder:f1:share");
        assert_eq!(resource_prefix("Folder", "f1"), "Folder:f1:");
    }

    #[test]
    fn test_resource_slug_escapes_separators() {
        let a = resource_slug("Folder:a", "b", "share");
        let b = resource_slug("Folder", "a:b", "share");
        assert_ne!(a, b);
        assert_eq!(a, r"Folder\:a:b:share");
        assert_eq!(b, r"Folder:a\:b:share");
        assert_ne!(resource_slug("x\\", "y", "z"), resource_slug("x", "\\y", "z"));
        assert!(!resource_slug("Folder", "a:b", "share").starts_with(&resource_prefix("Folder", "a")));
    }
}
