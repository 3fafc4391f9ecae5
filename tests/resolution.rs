//! Resolution through roles, groups and group roles, plus grant/revoke semantics

use bitgate::{Bitmask, Error, Node, NodeKind, Store, Unit};
use tempfile::TempDir;

fn setup() -> (Store, TempDir) {
    let dir = TempDir::new().unwrap();
    let store = Store::open_path(dir.path()).unwrap();
    (store, dir)
}

#[test]
fn test_editor_role_through_group() {
    let (store, _dir) = setup();

    for slug in ["users.read", "users.write", "users.delete"] {
        store.create_action(slug).unwrap();
    }
    let edit = store.create_action("posts.edit").unwrap();
    assert_eq!(edit.bit, 3);

    let editor = store.create_role("editor").unwrap();
    store.grant(Node::role(editor.id), &Unit::action("posts.edit")).unwrap();
    assert_eq!(store.role(editor.id).unwrap().unwrap().bitmask, Bitmask::from(8));

    let team = store.create_group("content-team").unwrap();
    store.grant(Node::group(team.id), &Unit::Role(editor.id)).unwrap();
    store.grant(Node::principal(1), &Unit::Group(team.id)).unwrap();

    assert!(store.has_action(1, "posts.edit").unwrap());
    assert!(!store.has_action(1, "posts.delete").unwrap());
    assert!(!store.has_action(1, "users.read").unwrap());
    assert!(!store.has_action(2, "posts.edit").unwrap());
}

#[test]
fn test_direct_resource_grant() {
    let (store, _dir) = setup();

    store.grant(Node::principal(1), &Unit::resource("Folder", "f1", "share")).unwrap();

    let ra = store.resource_action("Folder", "f1", "share").unwrap().unwrap();
    assert_eq!(ra.bit, 0);
    assert!(store.has_resource_action(1, "Folder", "f1", "share").unwrap());
    assert!(!store.has_resource_action(1, "Folder", "f2", "share").unwrap());
    assert!(!store.has_resource_action(1, "Folder", "f1", "delete").unwrap());
    assert!(!store.has_resource_action(2, "Folder", "f1", "share").unwrap());
}

#[test]
fn test_global_and_resource_bits_do_not_mix() {
    let (store, _dir) = setup();

    // both get bit 0 in their own namespace
    store.grant(Node::principal(1), &Unit::action("share")).unwrap();
    store.grant(Node::principal(2), &Unit::resource("Folder", "f1", "share")).unwrap();

    assert!(store.has_action(1, "share").unwrap());
    assert!(!store.has_resource_action(1, "Folder", "f1", "share").unwrap());
    assert!(store.has_resource_action(2, "Folder", "f1", "share").unwrap());
    assert!(!store.has_action(2, "share").unwrap());
}

#[test]
fn test_all_four_paths() {
    let (store, _dir) = setup();

    let direct = Node::principal(1);
    let via_role = Node::principal(2);
    let via_group = Node::principal(3);
    let via_group_role = Node::principal(4);

    let role = store.create_role("r").unwrap();
    store.grant(Node::role(role.id), &Unit::action("from.role")).unwrap();
    let group = store.create_group("g").unwrap();
    store.grant(Node::group(group.id), &Unit::action("from.group")).unwrap();
    let nested = store.create_group("g2").unwrap();
    store.grant(Node::group(nested.id), &Unit::Role(role.id)).unwrap();

    store.grant(direct, &Unit::action("direct")).unwrap();
    store.grant(via_role, &Unit::Role(role.id)).unwrap();
    store.grant(via_group, &Unit::Group(group.id)).unwrap();
    store.grant(via_group_role, &Unit::Group(nested.id)).unwrap();

    assert!(store.has_action(1, "direct").unwrap());
    assert!(store.has_action(2, "from.role").unwrap());
    assert!(store.has_action(3, "from.group").unwrap());
    assert!(store.has_action(4, "from.role").unwrap());
    assert!(!store.has_action(4, "from.group").unwrap());
    assert!(!store.has_action(1, "from.role").unwrap());
}

#[test]
fn test_role_resource_actions_reach_members() {
    let (store, _dir) = setup();

    let role = store.create_role("sharer").unwrap();
    store.grant(Node::role(role.id), &Unit::resource("Folder", "f1", "share")).unwrap();
    let group = store.create_group("team").unwrap();
    store.grant(Node::group(group.id), &Unit::Role(role.id)).unwrap();
    store.grant(Node::principal(7), &Unit::Group(group.id)).unwrap();

    assert!(store.has_resource_action(7, "Folder", "f1", "share").unwrap());
    // resource bits stay out of the role's own action bitmask
    assert!(store.role(role.id).unwrap().unwrap().bitmask.is_empty());
}

#[test]
fn test_role_change_reaches_existing_members() {
    let (store, _dir) = setup();

    let role = store.create_role("viewer").unwrap();
    let group = store.create_group("staff").unwrap();
    store.grant(Node::group(group.id), &Unit::Role(role.id)).unwrap();
    store.grant(Node::principal(1), &Unit::Role(role.id)).unwrap();
    store.grant(Node::principal(2), &Unit::Group(group.id)).unwrap();
    assert!(!store.has_action(1, "reports.view").unwrap());

    store.grant(Node::role(role.id), &Unit::action("reports.view")).unwrap();
    assert!(store.has_action(1, "reports.view").unwrap());
    assert!(store.has_action(2, "reports.view").unwrap());

    store.revoke(Node::role(role.id), &Unit::action("reports.view")).unwrap();
    assert!(!store.has_action(1, "reports.view").unwrap());
    assert!(!store.has_action(2, "reports.view").unwrap());
}

#[test]
fn test_grant_is_idempotent() {
    let (store, _dir) = setup();

    let role = store.create_role("editor").unwrap();
    assert!(store.grant(Node::role(role.id), &Unit::action("posts.edit")).unwrap());
    store.grant(Node::principal(1), &Unit::Role(role.id)).unwrap();
    let before = store.indexed_mask(Node::principal(1)).unwrap();
    let own = store.role(role.id).unwrap().unwrap().bitmask;

    assert!(!store.grant(Node::role(role.id), &Unit::action("posts.edit")).unwrap());
    assert!(!store.grant(Node::principal(1), &Unit::Role(role.id)).unwrap());

    assert_eq!(store.indexed_mask(Node::principal(1)).unwrap(), before);
    assert_eq!(store.role(role.id).unwrap().unwrap().bitmask, own);
    assert_eq!(store.direct_units(Node::role(role.id)).unwrap().len(), 1);
}

#[test]
fn test_revoke_undoes_grant() {
    let (store, _dir) = setup();

    store.grant(Node::principal(1), &Unit::action("a")).unwrap();
    let before = store.indexed_mask(Node::principal(1)).unwrap();

    assert!(store.grant(Node::principal(1), &Unit::action("b")).unwrap());
    assert!(store.has_action(1, "b").unwrap());
    assert!(store.revoke(Node::principal(1), &Unit::action("b")).unwrap());

    assert_eq!(store.indexed_mask(Node::principal(1)).unwrap(), before);
    assert!(!store.has_action(1, "b").unwrap());
    assert!(store.has_action(1, "a").unwrap());
    // second revoke is a no-op
    assert!(!store.revoke(Node::principal(1), &Unit::action("b")).unwrap());
}

#[test]
fn test_revoke_keeps_indirect_path() {
    let (store, _dir) = setup();

    let role = store.create_role("editor").unwrap();
    store.grant(Node::role(role.id), &Unit::action("posts.edit")).unwrap();
    store.grant(Node::principal(1), &Unit::Role(role.id)).unwrap();
    store.grant(Node::principal(1), &Unit::action("posts.edit")).unwrap();

    store.revoke(Node::principal(1), &Unit::action("posts.edit")).unwrap();
    assert!(store.has_action(1, "posts.edit").unwrap());

    store.revoke(Node::principal(1), &Unit::Role(role.id)).unwrap();
    assert!(!store.has_action(1, "posts.edit").unwrap());
}

#[test]
fn test_illegal_associations() {
    let (store, _dir) = setup();

    let role = store.create_role("r").unwrap();
    let other = store.create_role("r2").unwrap();
    let group = store.create_group("g").unwrap();

    let e = store.grant(Node::role(role.id), &Unit::Group(group.id)).unwrap_err();
    assert_eq!(e, Error::MissingCapability { holder: Node::role(role.id), unit: NodeKind::Group });
    assert!(matches!(
        store.grant(Node::role(role.id), &Unit::Role(other.id)),
        Err(Error::MissingCapability { .. })
    ));
    assert!(matches!(
        store.grant(Node::group(group.id), &Unit::Group(group.id)),
        Err(Error::MissingCapability { .. })
    ));
    let action = store.create_action("x").unwrap();
    assert!(matches!(
        store.grant(Node::action(action.id), &Unit::action("y")),
        Err(Error::MissingCapability { .. })
    ));
    // nothing was created by the rejected grant
    assert!(store.action("y").unwrap().is_none());
}

#[test]
fn test_missing_role_or_group() {
    let (store, _dir) = setup();

    assert!(matches!(store.grant(Node::principal(1), &Unit::Role(999)), Err(Error::NotFound(_))));
    assert!(matches!(store.grant(Node::role(999), &Unit::action("x")), Err(Error::NotFound(_))));
    assert!(!store.revoke(Node::principal(1), &Unit::Group(999)).unwrap());
}

#[test]
fn test_unknown_slug() {
    let (store, _dir) = setup();

    let e = store.revoke(Node::principal(1), &Unit::action("never.seen")).unwrap_err();
    assert_eq!(e, Error::UnknownSlug("never.seen".into()));
    assert!(matches!(
        store.revoke(Node::principal(1), &Unit::resource("Doc", "d1", "read")),
        Err(Error::UnknownSlug(_))
    ));
    assert!(matches!(store.create_action(""), Err(Error::UnknownSlug(_))));
    // reads on unknown slugs are plain denials
    assert!(!store.has_action(1, "never.seen").unwrap());
    assert!(!store.has_resource_action(1, "Doc", "d1", "read").unwrap());
}

#[test]
fn test_failed_transaction_rolls_back() {
    let (store, _dir) = setup();

    let r: bitgate::Result<()> = store.transact(|tx| {
        tx.grant(Node::principal(1), &Unit::action("posts.edit"))?;
        Err(Error::Storage("abort".into()))
    });
    assert!(r.is_err());

    assert!(!store.has_action(1, "posts.edit").unwrap());
    assert!(store.action("posts.edit").unwrap().is_none());
    assert!(store.direct_units(Node::principal(1)).unwrap().is_empty());
}

#[test]
fn test_transact_batches_commit_together() {
    let (store, _dir) = setup();

    let role = store
        .transact(|tx| {
            let role = tx.create_role("auditor")?;
            tx.grant(Node::role(role.id), &Unit::action("logs.read"))?;
            tx.grant(Node::principal(5), &Unit::Role(role.id))?;
            Ok(role)
        })
        .unwrap();

    assert!(store.has_action(5, "logs.read").unwrap());
    assert_eq!(store.role_by_name("auditor").unwrap().unwrap().id, role.id);
}

#[test]
fn test_grant_many_and_sync_actions() {
    let (store, _dir) = setup();

    let role = store.create_role("ops").unwrap();
    let added = store
        .grant_many(
            Node::role(role.id),
            &[Unit::action("a"), Unit::action("b"), Unit::action("a"), Unit::resource("Host", "h1", "ssh")],
        )
        .unwrap();
    assert_eq!(added, 3);
    store.grant(Node::principal(1), &Unit::Role(role.id)).unwrap();
    assert!(store.has_action(1, "b").unwrap());
    assert!(store.has_resource_action(1, "Host", "h1", "ssh").unwrap());

    let (attached, detached) = store.sync_actions(Node::role(role.id), &["b", "c"]).unwrap();
    assert_eq!((attached, detached), (1, 1));
    assert!(!store.has_action(1, "a").unwrap());
    assert!(store.has_action(1, "b").unwrap());
    assert!(store.has_action(1, "c").unwrap());
    // sync only touches action associations
    assert!(store.has_resource_action(1, "Host", "h1", "ssh").unwrap());

    assert_eq!(store.sync_actions(Node::role(role.id), &["c", "b"]).unwrap(), (0, 0));
}

#[test]
fn test_group_bitmask_covers_direct_actions_only() {
    let (store, _dir) = setup();

    let role = store.create_role("r").unwrap();
    store.grant(Node::role(role.id), &Unit::action("from.role")).unwrap();
    let group = store.create_group("g").unwrap();
    store.grant(Node::group(group.id), &Unit::action("own")).unwrap();
    store.grant(Node::group(group.id), &Unit::Role(role.id)).unwrap();

    let own_bit = store.action("own").unwrap().unwrap().bit;
    assert_eq!(store.group(group.id).unwrap().unwrap().bitmask, Bitmask::from_bit(own_bit));
    // the group's resolved mask includes its role
    assert!(store.node_has_action(Node::group(group.id), "from.role").unwrap());
}

#[test]
fn test_masks_and_action_listing() {
    let (store, _dir) = setup();

    let role = store.create_role("r").unwrap();
    store.grant(Node::role(role.id), &Unit::action("b")).unwrap();
    store.grant(Node::principal(1), &Unit::action("a")).unwrap();
    store.grant(Node::principal(1), &Unit::Role(role.id)).unwrap();
    store.create_action("c").unwrap();

    let mask = store.global_mask(1).unwrap();
    assert_eq!(mask, [0u64, 1].into_iter().collect::<Bitmask>());
    assert_eq!(store.indexed_mask(Node::principal(1)).unwrap().unwrap().global, mask);

    let mut actions = store.actions_of(1).unwrap();
    actions.sort();
    assert_eq!(actions, vec!["a".to_string(), "b".to_string()]);
    assert!(store.actions_of(2).unwrap().is_empty());
}

#[test]
fn test_resource_mask_is_per_instance() {
    let (store, _dir) = setup();

    let p = Node::principal(1);
    store.grant(p, &Unit::resource("Folder", "f1", "view")).unwrap();
    store.grant(p, &Unit::resource("Folder", "f1", "share")).unwrap();
    store.grant(p, &Unit::resource("Folder", "f2", "view")).unwrap();
    store.grant(Node::principal(2), &Unit::resource("Folder", "f1", "delete")).unwrap();

    let f1 = store.resource_mask(1, "Folder", "f1").unwrap();
    assert_eq!(f1, [0u64, 1].into_iter().collect::<Bitmask>());
    assert_eq!(store.resource_mask(1, "Folder", "f2").unwrap(), Bitmask::from_bit(2));
    assert!(store.resource_mask(1, "Folder", "f3").unwrap().is_empty());
    assert!(store.resource_mask(2, "Folder", "f2").unwrap().is_empty());
}

#[test]
fn test_many_actions_past_word_width() {
    let (store, _dir) = setup();

    let role = store.create_role("wide").unwrap();
    let units: Vec<Unit> = (0..70).map(|i| Unit::action(format!("perm.{}", i))).collect();
    store.grant_many(Node::role(role.id), &units).unwrap();
    store.grant(Node::principal(1), &Unit::Role(role.id)).unwrap();

    assert!(store.has_action(1, "perm.69").unwrap());
    assert!(store.has_action(1, "perm.0").unwrap());
    assert_eq!(store.global_mask(1).unwrap().popcount(), 70);
    assert!(store.role(role.id).unwrap().unwrap().bitmask.test_bit(69));
}

#[test]
fn test_colon_bearing_resource_ids_stay_distinct() {
    let (store, _dir) = setup();

    store.grant(Node::principal(1), &Unit::resource("Folder:a", "b", "share")).unwrap();
    store.grant(Node::principal(2), &Unit::resource("Folder", "a:b", "share")).unwrap();

    assert!(store.has_resource_action(1, "Folder:a", "b", "share").unwrap());
    assert!(!store.has_resource_action(1, "Folder", "a:b", "share").unwrap());
    assert!(store.has_resource_action(2, "Folder", "a:b", "share").unwrap());
    assert!(!store.has_resource_action(2, "Folder:a", "b", "share").unwrap());

    let left = store.resource_action("Folder:a", "b", "share").unwrap().unwrap();
    let right = store.resource_action("Folder", "a:b", "share").unwrap().unwrap();
    assert_ne!(left.bit, right.bit);
    assert_eq!((right.resource_type.as_str(), right.resource_id.as_str()), ("Folder", "a:b"));

    assert_eq!(store.users_with_access("Folder:a", "b", "share").unwrap(), vec![1]);
    assert_eq!(store.users_with_access("Folder", "a:b", "share").unwrap(), vec![2]);
}

#[test]
fn test_urn_ids_scope_resource_masks() {
    let (store, _dir) = setup();

    store.grant(Node::principal(1), &Unit::resource("Org", "urn:org:42", "read")).unwrap();
    store.grant(Node::principal(1), &Unit::resource("Org", "urn", "org:42:read")).unwrap();

    let urn = store.resource_action("Org", "urn:org:42", "read").unwrap().unwrap();
    assert_eq!(store.resource_mask(1, "Org", "urn:org:42").unwrap(), Bitmask::from_bit(urn.bit));
    assert!(!store.resource_mask(1, "Org", "urn").unwrap().test_bit(urn.bit));
    assert!(matches!(
        store.revoke(Node::principal(1), &Unit::resource("Org", "urn:org", "42:read")),
        Err(Error::UnknownSlug(_))
    ));
}
