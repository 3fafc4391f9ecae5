//! Fixed-width key encoding for LMDB storage.
//!
//! - Node:          [kind: u8][id: u64 BE]              (9 bytes)
//! - Grant pair:    [holder: node][unit: node]          (18 bytes)
//! - Index forward: [owner: node][ns: u8][bit: u64 BE]  (18 bytes)
//! - Index reverse: [ns: u8][bit: u64 BE][owner: node]  (18 bytes)
//!
//! Everything is big-endian so a prefix scan over a holder (or over a bit)
//! returns its rows in id order.

use std::fmt;

use serde::{Deserialize, Serialize};

pub const NODE_LEN: usize = 9;
pub const PAIR_LEN: usize = 2 * NODE_LEN;

/// Kind tag of anything that can appear in the aggregation graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Action = 1,
    ResourceAction = 2,
    Role = 3,
    Group = 4,
    Principal = 5,
}

impl NodeKind {
    pub const ALL: [NodeKind; 5] = [
        NodeKind::Action,
        NodeKind::ResourceAction,
        NodeKind::Role,
        NodeKind::Group,
        NodeKind::Principal,
    ];

    #[inline]
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.tag() == tag)
    }

    pub fn name(self) -> &'static str {
        match self {
            NodeKind::Action => "action",
            NodeKind::ResourceAction => "resource_action",
            NodeKind::Role => "role",
            NodeKind::Group => "group",
            NodeKind::Principal => "principal",
        }
    }

    /// Direct associations allowed from a holder of this kind.
    /// Roles hold units, groups also hold roles, principals hold everything.
    pub fn can_hold(self, unit: NodeKind) -> bool {
        use NodeKind::*;
        match self {
            Role => matches!(unit, Action | ResourceAction),
            Group => matches!(unit, Action | ResourceAction | Role),
            Principal => matches!(unit, Action | ResourceAction | Role | Group),
            Action | ResourceAction => false,
        }
    }

    /// Kinds that own a row set in the bit index.
    #[inline]
    pub fn is_indexed(self) -> bool {
        self != NodeKind::ResourceAction
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Tagged owner reference: `{kind, id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Node {
    pub kind: NodeKind,
    pub id: u64,
}

impl Node {
    #[inline]
    pub const fn new(kind: NodeKind, id: u64) -> Self {
        Node { kind, id }
    }

    pub const fn action(id: u64) -> Self {
        Node::new(NodeKind::Action, id)
    }

    pub const fn resource_action(id: u64) -> Self {
        Node::new(NodeKind::ResourceAction, id)
    }

    pub const fn role(id: u64) -> Self {
        Node::new(NodeKind::Role, id)
    }

    pub const fn group(id: u64) -> Self {
        Node::new(NodeKind::Group, id)
    }

    pub const fn principal(id: u64) -> Self {
        Node::new(NodeKind::Principal, id)
    }

    #[inline]
    pub fn encode(&self) -> [u8; NODE_LEN] {
        let mut k = [0u8; NODE_LEN];
        k[0] = self.kind.tag();
        k[1..].copy_from_slice(&self.id.to_be_bytes());
        k
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != NODE_LEN {
            return None;
        }
        let kind = NodeKind::from_tag(bytes[0])?;
        Some(Node::new(kind, u64::from_be_bytes(bytes[1..].try_into().ok()?)))
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.name(), self.id)
    }
}

/// Independent bit-position namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    /// Global actions.
    Global = 0,
    /// Resource-scoped actions.
    Resource = 1,
}

impl Namespace {
    pub const ALL: [Namespace; 2] = [Namespace::Global, Namespace::Resource];

    #[inline]
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|n| n.tag() == tag)
    }

    pub fn name(self) -> &'static str {
        match self {
            Namespace::Global => "action",
            Namespace::Resource => "resource",
        }
    }
}

/// Build an 8-byte record key from an id
#[inline]
pub fn id_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

/// Build a `[a][b]` pair key (grants)
#[inline]
pub fn pair(a: Node, b: Node) -> [u8; PAIR_LEN] {
    let mut k = [0u8; PAIR_LEN];
    k[..NODE_LEN].copy_from_slice(&a.encode());
    k[NODE_LEN..].copy_from_slice(&b.encode());
    k
}

/// Split a pair key back into its two nodes
pub fn split_pair(bytes: &[u8]) -> Option<(Node, Node)> {
    if bytes.len() != PAIR_LEN {
        return None;
    }
    Some((Node::decode(&bytes[..NODE_LEN])?, Node::decode(&bytes[NODE_LEN..])?))
}

/// Prefix shared by every index row for one `(ns, bit)`
#[inline]
pub fn bit_prefix(ns: Namespace, bit: u64) -> [u8; 9] {
    let mut k = [0u8; 9];
    k[0] = ns.tag();
    k[1..].copy_from_slice(&bit.to_be_bytes());
    k
}

/// Forward index key: owner first
#[inline]
pub fn bit_key(owner: Node, ns: Namespace, bit: u64) -> [u8; PAIR_LEN] {
    let mut k = [0u8; PAIR_LEN];
    k[..NODE_LEN].copy_from_slice(&owner.encode());
    k[NODE_LEN..].copy_from_slice(&bit_prefix(ns, bit));
    k
}

/// Reverse index key: bit first
#[inline]
pub fn bit_rev_key(ns: Namespace, bit: u64, owner: Node) -> [u8; PAIR_LEN] {
    let mut k = [0u8; PAIR_LEN];
    k[..9].copy_from_slice(&bit_prefix(ns, bit));
    k[9..].copy_from_slice(&owner.encode());
    k
}

/// Parse a reverse index key into `(ns, bit, owner)`
pub fn parse_bit_rev_key(bytes: &[u8]) -> Option<(Namespace, u64, Node)> {
    if bytes.len() != PAIR_LEN {
        return None;
    }
    let ns = Namespace::from_tag(bytes[0])?;
    let bit = u64::from_be_bytes(bytes[1..9].try_into().ok()?);
    Some((ns, bit, Node::decode(&bytes[9..])?))
}
