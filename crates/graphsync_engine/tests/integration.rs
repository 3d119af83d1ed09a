//! Integration tests for the sync engine and relay server.

use graphsync_engine::{SyncConfig, SyncError, Synchronizer};
use graphsync_model::{ExportOptions, Field};
use graphsync_protocol::{CommitSet, Gid, Scalar, Value};
use graphsync_server::ServerConfig;
use graphsync_testkit::prelude::*;
use proptest::prelude::*;

/// A replica with a started synchronizer and no auto-commit.
fn synced(priority: i64) -> (Replica, Synchronizer) {
    let replica = Replica::new();
    let sync = Synchronizer::with_model(
        &replica.root,
        SyncConfig::new()
            .with_priority(priority)
            .with_sync_registry(true),
    )
    .unwrap();
    sync.start();
    (replica, sync)
}

fn root_commit(commits: &CommitSet) -> &graphsync_protocol::Commit {
    &commits[&Gid::from("root")]
}

#[test]
fn newer_version_beats_older_history() {
    init_tracing();
    let (s, s_sync) = synced(1);
    let (c, c_sync) = synced(0);

    s.root.set("foo", "s");
    let s1 = s_sync.commit();
    assert_eq!(root_commit(&s1).version, 1);
    c_sync.merge(s1).unwrap();
    assert_eq!(c.root.get("foo"), Field::from("s"));

    c.root.set("foo", "c");
    let c2 = c_sync.commit();
    assert_eq!(root_commit(&c2).version, 2);

    let merged = s_sync.merge(c2).unwrap();
    assert_eq!(root_commit(&merged).changes["foo"], Value::from("c"));
    assert_eq!(s.root.get("foo"), Field::from("c"));
}

#[test]
fn priority_breaks_ties_at_equal_versions() {
    let (s, s_sync) = synced(1);
    let (c, c_sync) = synced(0);

    s.root.set("x", 1);
    c_sync.merge(s_sync.commit()).unwrap();

    s.root.set("foo", "s");
    c.root.set("foo", "c");
    let s2 = s_sync.commit();
    let c2 = c_sync.commit();
    assert_eq!(root_commit(&s2).version, 2);
    assert_eq!(root_commit(&c2).version, 2);

    c_sync.merge(s2).unwrap();
    let merged = s_sync.merge(c2).unwrap();

    assert!(root_commit(&merged).changes.is_empty());
    assert_eq!(s.root.get("foo"), Field::from("s"));
    assert_eq!(c.root.get("foo"), Field::from("s"));
}

#[test]
fn conflicts_resolve_the_same_in_any_order() {
    for a_first in [true, false] {
        let (a, a_sync) = synced(1);
        let (b, b_sync) = synced(0);

        a.root.set("foo", "a");
        b.root.set("foo", "b");
        let a1 = a_sync.commit();
        let b1 = b_sync.commit();

        if a_first {
            b_sync.merge(a1).unwrap();
            a_sync.merge(b1).unwrap();
        } else {
            a_sync.merge(b1).unwrap();
            b_sync.merge(a1).unwrap();
        }

        assert_eq!(a.root.get("foo"), Field::from("a"));
        assert_eq!(b.root.get("foo"), Field::from("a"));
    }
}

#[test]
fn merging_twice_changes_nothing() {
    let (a, a_sync) = synced(1);
    let (b, b_sync) = synced(0);

    a.root.set("foo", "a");
    let commits = a_sync.commit();
    let uuid = root_commit(&commits).uuid;

    b_sync.merge(commits.clone()).unwrap();
    let before = b.snapshot();
    let again = b_sync.merge(commits).unwrap();

    assert_eq!(root_commit(&again).uuid, uuid);
    assert_eq!(b.snapshot(), before);
    assert!(!b_sync.has_changes());
}

#[test]
fn merged_changes_are_not_recorded() {
    let (a, a_sync) = synced(1);
    let (b, b_sync) = synced(0);

    a.root.set("foo", "a");
    a.root.set("bar", 3);
    b_sync.merge(a_sync.commit()).unwrap();

    assert_eq!(b.root.get("bar"), Field::from(3));
    assert!(!b_sync.has_changes());
    assert!(b_sync.commit().is_empty());
}

#[test]
fn history_bound_rejects_old_commits() {
    let (a, a_sync) = synced(0);
    let b = Replica::new();
    let b_sync = Synchronizer::with_model(
        &b.root,
        SyncConfig::new()
            .with_history_length(3)
            .with_sync_registry(true),
    )
    .unwrap();
    b_sync.start();

    a.root.set("n", 0);
    let stale = a_sync.commit();

    let mut min_versions = Vec::new();
    for i in 1..=5 {
        b.root.set("n", i);
        b_sync.commit();
        min_versions.push(b_sync.watcher(&Gid::from("root")).unwrap().history_min_version());
    }
    assert_eq!(min_versions, vec![1, 1, 1, 2, 3]);

    let err = b_sync.merge(stale).unwrap_err();
    assert_eq!(err, SyncError::outdated(Gid::from("root"), 1, 3));
    assert_eq!(b.root.get("n"), Field::from(5));
}

#[test]
fn new_entities_travel_in_full_then_by_reference() {
    let (a, a_sync) = synced(0);
    let (b, b_sync) = synced(1);

    let child = a
        .registry
        .builder("child")
        .field("name", "first")
        .create()
        .unwrap();
    a.root.set("child", &child);
    let first = a_sync.commit();
    match &root_commit(&first).changes["child"] {
        Value::Entity(data) => assert_eq!(data.get("name"), Some(&Value::from("first"))),
        other => panic!("expected full export, got {other:?}"),
    }

    a.root.set("again", &child);
    let second = a_sync.commit();
    assert_eq!(
        root_commit(&second).changes["again"],
        Value::reference("child")
    );

    b_sync.merge(first).unwrap();
    b_sync.merge(second).unwrap();

    let b_child = b.registry.get("child").unwrap();
    assert_eq!(b_child.get("name"), Field::from("first"));
    assert!(b.root.get("again").as_entity().unwrap().ptr_eq(&b_child));
    assert!(b_sync.watcher(&Gid::from("child")).is_some());
    assert!(!b_sync.has_changes());
}

#[test]
fn entities_merged_in_are_only_referenced_afterwards() {
    let (a, a_sync) = synced(1);
    let (b, b_sync) = synced(0);
    let a_x = a.registry.create("x").unwrap();
    let b_x = b.registry.create("x").unwrap();

    let c = a.registry.builder("c").field("name", "first").create().unwrap();
    a.root.set("child", &c);
    b_sync.merge(a_sync.commit()).unwrap();
    let b_c = b.registry.get("c").unwrap();
    assert!(!b_sync.is_new(b_c.gid()));

    c.set("name", "newer");
    let a2 = a_sync.commit();
    b_x.set("link", &b_c);
    let b1 = b_sync.commit();
    assert_eq!(b1[&Gid::from("x")].changes["link"], Value::reference("c"));

    a_sync.merge(b1).unwrap();
    b_sync.merge(a2).unwrap();

    assert_eq!(c.get("name"), Field::from("newer"));
    assert_eq!(b_c.get("name"), Field::from("newer"));
    assert!(a_x.get("link").as_entity().unwrap().ptr_eq(&c));
    assert!(!a_sync.has_changes());
    assert!(!b_sync.has_changes());
}

#[test]
fn nested_entity_edits_sync() {
    let (a, a_sync) = synced(0);
    let (b, b_sync) = synced(1);

    let child = a.registry.create("child").unwrap();
    a.root.set("child", &child);
    b_sync.merge(a_sync.commit()).unwrap();

    child.set("score", 10);
    let commits = a_sync.commit();
    assert!(commits.contains_key(&Gid::from("child")));
    b_sync.merge(commits).unwrap();

    assert_eq!(
        b.registry.get("child").unwrap().get("score"),
        Field::from(10)
    );
    assert_eq!(
        a.root.export(ExportOptions::deep()),
        b.root.export(ExportOptions::deep())
    );
}

#[test]
fn relay_converges_concurrent_edits() {
    init_tracing();
    let mut network = Network::new().unwrap().with_json_wire();
    let a = network.add_client().unwrap();
    let b = network.add_client().unwrap();
    let c = network.add_client().unwrap();
    network.pump();

    network.model(a).set("left", 1);
    network.model(b).set("right", 2);
    network.server_model().set("title", "server");
    network.settle();

    assert!(network.converged());
    assert_eq!(network.model(c).get("left"), Field::from(1));
    assert_eq!(network.model(c).get("right"), Field::from(2));
    assert_eq!(network.model(c).get("title"), Field::from("server"));
    assert!(network.errors().is_empty());
}

#[test]
fn first_push_to_reach_the_server_wins() {
    let mut network = Network::new().unwrap();
    let a = network.add_client().unwrap();
    let b = network.add_client().unwrap();
    network.pump();

    network.model(a).set("foo", "a");
    network.model(b).set("foo", "b");
    network.settle();

    assert!(network.converged());
    assert_eq!(network.model(b).get("foo"), Field::from("a"));
}

#[test]
fn outdated_push_is_answered_with_full_state() {
    let server_config = ServerConfig::new().with_history_length(1);
    let mut network = Network::with_replica(Replica::new(), server_config).unwrap();
    let a = network.add_client().unwrap();
    network.pump();

    network.server_model().set("foo", 1);
    network.server().synchronizer().commit();
    network.server_model().set("foo", 2);
    network.server().synchronizer().commit();

    network.model(a).set("bar", "late");
    network.client(a).synchronizer().commit();
    network.pump();

    assert!(network.server_model().get("bar").is_null());
    assert_eq!(network.model(a).get("foo"), Field::from(2));
    assert!(network.errors().is_empty());
}

#[test]
fn full_state_from_a_client_replaces_everyone() {
    let mut network = Network::new().unwrap();
    let a = network.add_client().unwrap();
    let b = network.add_client().unwrap();
    network.pump();

    network.server_model().set("stale", true);
    network.settle();
    assert_eq!(network.model(b).get("stale"), Field::from(true));

    network.client(a).synchronizer().stop();
    network.model(a).set("stale", Field::NULL);
    network.model(a).set("fresh", "yes");
    network.client(a).send_full_state().unwrap();
    network.pump();

    assert!(network.server_model().get("stale").is_null());
    assert_eq!(network.server_model().get("fresh"), Field::from("yes"));
    assert_eq!(network.model(b).get("fresh"), Field::from("yes"));
}

#[test]
fn application_messages_are_relayed() {
    let mut network = Network::new().unwrap();
    let a = network.add_client().unwrap();
    let b = network.add_client().unwrap();
    network.pump();

    let received = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
    let store = received.clone();
    let _sub = network
        .client(b)
        .subscribe_messages(move |payload| store.lock().push(payload.clone()));

    network
        .client(a)
        .message(serde_json::json!({"cursor": [1, 2]}))
        .unwrap();
    network.pump();

    assert_eq!(*received.lock(), vec![serde_json::json!({"cursor": [1, 2]})]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn disjoint_edits_commute(
        a_edits in prop::collection::vec(("[a-c]", scalar_strategy()), 1..6),
        b_edits in prop::collection::vec(("[x-z]", scalar_strategy()), 1..6),
    ) {
        let (a, a_sync) = synced(1);
        let (b, b_sync) = synced(0);
        for (field, value) in &a_edits {
            a.root.set(field.as_str(), Field::Scalar(value.clone()));
        }
        for (field, value) in &b_edits {
            b.root.set(field.as_str(), Field::Scalar(value.clone()));
        }

        let a1 = a_sync.commit();
        let b1 = b_sync.commit();
        if !b1.is_empty() {
            a_sync.merge(b1).unwrap();
        }
        if !a1.is_empty() {
            b_sync.merge(a1).unwrap();
        }

        prop_assert_eq!(a.snapshot(), b.snapshot());
    }

    #[test]
    fn same_field_conflicts_go_to_priority(
        a_edits in prop::collection::vec((field_name_strategy(), scalar_strategy()), 1..6),
        b_edits in prop::collection::vec((field_name_strategy(), scalar_strategy()), 1..6),
    ) {
        let (a, a_sync) = synced(1);
        let (b, b_sync) = synced(0);
        for (field, value) in &a_edits {
            a.root.set(field.as_str(), Field::Scalar(value.clone()));
        }
        for (field, value) in &b_edits {
            b.root.set(field.as_str(), Field::Scalar(value.clone()));
        }
        let a_values = a.snapshot();

        let a1 = a_sync.commit();
        let b1 = b_sync.commit();
        if !b1.is_empty() {
            a_sync.merge(b1).unwrap();
        }
        if !a1.is_empty() {
            b_sync.merge(a1).unwrap();
        }

        let b_values = b.snapshot();
        prop_assert_eq!(a.snapshot(), b_values.clone());
        for (field, value) in &a_values {
            prop_assert_eq!(b_values.get(field), Some(value));
        }
    }

    #[test]
    fn settled_edits_converge(script in settled_script_strategy(3, 12)) {
        let mut network = Network::new().unwrap();
        network.add_client().unwrap();
        network.add_client().unwrap();
        network.pump();

        for edit in &script {
            edit.apply(&mut network);
        }

        prop_assert!(network.converged());
        prop_assert!(network.errors().is_empty());
    }
}

#[test]
fn scalar_values_round_trip_through_the_relay() {
    let mut network = Network::new().unwrap();
    let a = network.add_client().unwrap();
    let b = network.add_client().unwrap();
    network.pump();

    for (field, value) in [
        ("flag", Scalar::Bool(true)),
        ("count", Scalar::Integer(-7)),
        ("ratio", Scalar::Float(0.25)),
        ("name", Scalar::Text("graph".into())),
    ] {
        network.model(a).set(field, Field::Scalar(value));
    }
    network.settle();

    assert!(network.converged());
    assert_eq!(network.model(b).get("ratio"), Field::from(0.25));
}
