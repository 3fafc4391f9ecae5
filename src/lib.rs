//! Bitgate - bitmask permission resolution
//!
//! Principals hold permissions directly, through roles, through groups, and
//! through the roles of their groups. Every named permission owns a stable bit
//! in an unbounded bitmask, resolved masks are denormalized into a per-bit index
//! on each grant/revoke, and checks read the index instead of walking the graph.
//!
//! ```no_run
//! use bitgate::{Gate, Node, Store, Unit};
//!
//! let store = Store::open_path("./data/bitgate.mdb")?;
//! let editor = store.create_role("editor")?;
//! store.grant(Node::role(editor.id), &Unit::action("posts.edit"))?;
//! store.grant(Node::principal(1), &Unit::Role(editor.id))?;
//! assert!(store.has_action(1, "posts.edit")?);
//!
//! let gate = Gate::new(&store);
//! assert!(gate.allows("posts.edit", None, Some(1))?);
//! # Ok::<(), bitgate::Error>(())
//! ```

pub mod bitmask;
pub mod config;
pub mod db;
pub mod entity;
pub mod error;
pub mod gate;
pub mod grants;
pub mod keys;
pub mod registry;
pub mod resolver;
pub mod tx;

pub use bitmask::Bitmask;
pub use config::Config;
pub use db::Store;
pub use entity::{resource_slug, Action, Group, ResourceAction, Role};
pub use error::{Error, Result};
pub use gate::{Combined, Gate, PrincipalId, Response, Target, DEFAULT_DENIAL};
pub use grants::Unit;
pub use keys::{Namespace, Node, NodeKind};
pub use registry::BitPosition;
pub use resolver::Masks;
pub use tx::Tx;
