//! Integration tests against a real PostgreSQL via testcontainers.
//!
//! Marked `#[ignore]` so the default test run stays engine-free; run with
//! `cargo test -p silt -- --ignored` where Docker is available.

use std::sync::Arc;

use serde_json::json;
use silt::{
    Datastore, DatastoreConfig, Doc, DocKind, DocRef, ObjectStore, Profile, ResourceQuery,
    View, ViewFilter,
};
use silt_wire::{TypeRegistry, TypeSpec, TypedRecord, WireValue};
use testcontainers::{ImageExt, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;

async fn start_postgres() -> (testcontainers::ContainerAsync<Postgres>, DatastoreConfig) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let container = Postgres::default()
        .with_tag("16")
        .start()
        .await
        .expect("failed to start Postgres container");

    let host = container.get_host().await.unwrap();
    let port = container.get_host_port_ipv4(5432).await.unwrap();

    let config = DatastoreConfig {
        host: host.to_string(),
        port,
        username: "postgres".into(),
        password: "postgres".into(),
        // does not exist yet: exercises the auto-create path with db_init
        database: "silt_test".into(),
        default_database: "postgres".into(),
        profile: Profile::Resources,
        ..DatastoreConfig::default()
    };
    (container, config)
}

fn registry() -> Arc<TypeRegistry> {
    let mut reg = TypeRegistry::new();
    reg.register(TypeSpec::new(
        "Resource",
        [
            "name",
            "lcstate",
            "availability",
            "ts_created",
            "keywords",
            "alt_ids",
            "special_attrs",
        ],
    ));
    reg.register(TypeSpec::new(
        "Association",
        ["s", "st", "p", "o", "ot", "retired"],
    ));
    reg.register(TypeSpec::new(
        "DirEntry",
        ["org", "parent", "key", "attributes"],
    ));
    Arc::new(reg)
}

fn doc(v: serde_json::Value) -> Doc {
    v.as_object().unwrap().clone()
}

fn resource(name: &str, lcstate: &str) -> TypedRecord {
    TypedRecord::new("Resource")
        .with("name", name)
        .with("lcstate", lcstate)
}

#[tokio::test]
#[ignore = "requires docker"]
async fn document_crud_and_revision_guard() {
    let (_pg, config) = start_postgres().await;
    let store = Datastore::new(Some("resources"), config).await.unwrap();

    // create assigns an id and revision 1
    let (id, rev) = store
        .create_doc(
            doc(json!({"type_": "Resource", "name": "x", "lcstate": "DRAFT"})),
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(rev, "1");

    let body = store.read_doc(&id, None).await.unwrap();
    assert_eq!(body["_id"], json!(id));
    assert_eq!(body["_rev"], json!("1"));
    assert_eq!(body["name"], json!("x"));

    // revision-checked update
    let mut body2 = body.clone();
    body2.insert("name".into(), json!("y"));
    let (_, rev2) = store.update_doc(body2).await.unwrap();
    assert_eq!(rev2, "2");

    // re-issuing the first update (still carrying _rev=1) conflicts
    let mut stale = body.clone();
    stale.insert("name".into(), json!("z"));
    assert!(matches!(
        store.update_doc(stale).await,
        Err(silt::Error::Conflict(_))
    ));

    // duplicate create with the same id
    let dup = store
        .create_doc(
            doc(json!({"_id": id.clone(), "type_": "Resource", "name": "x"})),
            None,
            None,
        )
        .await;
    assert!(matches!(dup, Err(silt::Error::AlreadyExists(_))));

    // revision monotonicity across several updates
    for expected in 3..=6 {
        let mut latest = store.read_doc(&id, None).await.unwrap();
        latest.insert("name".into(), json!(format!("name-{expected}")));
        let (_, rev) = store.update_doc(latest).await.unwrap();
        assert_eq!(rev, expected.to_string());
    }

    store.delete_doc(&id, None).await.unwrap();
    assert!(matches!(
        store.read_doc(&id, None).await,
        Err(silt::Error::NotFound(_))
    ));
    assert!(matches!(
        store.delete_doc(&id, None).await,
        Err(silt::Error::NotFound(_))
    ));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn concurrent_updates_with_same_base_rev() {
    let (_pg, config) = start_postgres().await;
    let store = Arc::new(Datastore::new(Some("resources"), config).await.unwrap());

    let (id, _) = store
        .create_doc(doc(json!({"type_": "Resource", "name": "base"})), None, None)
        .await
        .unwrap();
    let base = store.read_doc(&id, None).await.unwrap();

    let mut a = base.clone();
    a.insert("name".into(), json!("writer-a"));
    let mut b = base.clone();
    b.insert("name".into(), json!("writer-b"));

    let (ra, rb) = tokio::join!(store.update_doc(a), store.update_doc(b));
    let successes = [&ra, &rb].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one writer wins: {ra:?} {rb:?}");
    let winner = [ra, rb].into_iter().find_map(|r| r.ok()).unwrap();
    assert_eq!(winner.1, "2");
}

#[tokio::test]
#[ignore = "requires docker"]
async fn read_mult_preserves_order_and_bulk_create_falls_back_to_update() {
    let (_pg, config) = start_postgres().await;
    let store = Datastore::new(Some("resources"), config).await.unwrap();

    let (id_a, _) = store
        .create_doc(doc(json!({"type_": "Resource", "name": "a"})), None, None)
        .await
        .unwrap();
    let (id_b, _) = store
        .create_doc(doc(json!({"type_": "Resource", "name": "b"})), None, None)
        .await
        .unwrap();

    let ids = vec![id_b.clone(), "missing".to_string(), id_a.clone()];
    let docs = store.read_doc_mult(&ids, None).await.unwrap();
    assert_eq!(docs.len(), 3);
    assert_eq!(docs[0].as_ref().unwrap()["name"], json!("b"));
    assert!(docs[1].is_none());
    assert_eq!(docs[2].as_ref().unwrap()["name"], json!("a"));

    // one new row, one pre-existing id that upgrades to an update
    let results = store
        .create_doc_mult(
            vec![
                doc(json!({"type_": "Resource", "name": "c"})),
                doc(json!({"type_": "Resource", "name": "a2"})),
            ],
            Some(vec!["freshid0000000000000000000000001".into(), id_a.clone()]),
        )
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(
        results[0],
        (true, "freshid0000000000000000000000001".to_string(), "1".to_string())
    );
    assert_eq!(results[1], (true, id_a.clone(), "2".to_string()));

    let upgraded = store.read_doc(&id_a, None).await.unwrap();
    assert_eq!(upgraded["name"], json!("a2"));
    assert_eq!(upgraded["_rev"], json!("2"));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn attachment_lifecycle() {
    let (_pg, config) = start_postgres().await;
    let store = Datastore::new(Some("resources"), config).await.unwrap();

    let (id, _) = store
        .create_doc(doc(json!({"type_": "Resource", "name": "carrier"})), None, None)
        .await
        .unwrap();

    // attachment on a missing parent is NotFound through the FK
    assert!(matches!(
        store
            .create_attachment(DocRef::Id("nope"), "a.txt", b"data", Some("text/plain"))
            .await,
        Err(silt::Error::NotFound(_))
    ));

    store
        .create_attachment(DocRef::Id(&id), "a.txt", b"hello", Some("text/plain"))
        .await
        .unwrap();

    let listed = store.list_attachments(DocRef::Id(&id)).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "a.txt");
    assert_eq!(listed[0].content_type.as_deref(), Some("text/plain"));

    let data = store.read_attachment(DocRef::Id(&id), "a.txt").await.unwrap();
    assert_eq!(data, b"hello");

    store
        .update_attachment(DocRef::Id(&id), "a.txt", b"hello2", Some("text/plain"))
        .await
        .unwrap();
    let data = store.read_attachment(DocRef::Id(&id), "a.txt").await.unwrap();
    assert_eq!(data, b"hello2");

    assert!(matches!(
        store
            .update_attachment(DocRef::Id(&id), "missing.txt", b"x", None)
            .await,
        Err(silt::Error::NotFound(_))
    ));

    // a stale full document fails the revision assertion
    let mut stale = store.read_doc(&id, None).await.unwrap();
    stale.insert("_rev".into(), json!("99"));
    assert!(matches!(
        store
            .create_attachment(DocRef::Doc(&stale), "b.txt", b"x", None)
            .await,
        Err(silt::Error::Conflict(_))
    ));

    store.delete_attachment(DocRef::Id(&id), "a.txt").await.unwrap();
    assert!(matches!(
        store.read_attachment(DocRef::Id(&id), "a.txt").await,
        Err(silt::Error::NotFound(_))
    ));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn association_traversal_and_retirement() {
    let (_pg, config) = start_postgres().await;
    let store = Datastore::new(Some("resources"), config).await.unwrap();
    let objects = ObjectStore::new(store, registry());

    let (id_a, _) = objects.create(&resource("a", "DRAFT"), None, None).await.unwrap();
    let (id_b, _) = objects.create(&resource("b", "DRAFT"), None, None).await.unwrap();

    let assoc = TypedRecord::new("Association")
        .with("s", id_a.as_str())
        .with("st", "Resource")
        .with("p", "hasChild")
        .with("o", id_b.as_str())
        .with("ot", "Resource")
        .with("retired", false);
    let (assoc_id, _) = objects.create(&assoc, None, None).await.unwrap();

    let (found, assocs) = objects
        .find_objects(&id_a, Some("hasChild"), Some("Resource"), true, &ViewFilter::default())
        .await
        .unwrap();
    assert_eq!(found.ids().unwrap(), &[id_b.clone()]);
    assert_eq!(assocs.len(), 1);
    assert_eq!(assocs[0].type_tag, "Association");

    // reverse traversal
    let (found, _) = objects
        .find_subjects(&id_b, Some("hasChild"), Some("Resource"), true, &ViewFilter::default())
        .await
        .unwrap();
    assert_eq!(found.ids().unwrap(), &[id_a.clone()]);

    // full records on the forward edge
    let (found, _) = objects
        .find_objects(&id_a, Some("hasChild"), None, false, &ViewFilter::default())
        .await
        .unwrap();
    let records = found.records().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].get("name"), Some(&WireValue::Str("b".into())));

    // bulk view
    let (found, assocs) = objects
        .find_objects_mult(&[id_a.clone()], true)
        .await
        .unwrap();
    assert_eq!(found.ids().unwrap(), &[id_b.clone()]);
    assert_eq!(assocs.len(), 1);

    // retire the edge: traversals stop returning it
    let mut assoc_doc = objects
        .store()
        .read_doc(&assoc_id, Some(DocKind::Association))
        .await
        .unwrap();
    assoc_doc.insert("retired".into(), json!(true));
    objects.store().update_doc(assoc_doc).await.unwrap();

    let (found, _) = objects
        .find_objects(&id_a, Some("hasChild"), Some("Resource"), true, &ViewFilter::default())
        .await
        .unwrap();
    assert!(found.is_empty());

    // find_associations still reaches it when asked explicitly
    let found = objects
        .find_associations(Some(&id_a), None, None, None, true, &ViewFilter::default())
        .await
        .unwrap();
    assert_eq!(found.len(), 1);

    // validation rules
    assert!(
        objects
            .find_associations(None, None, None, None, true, &ViewFilter::default())
            .await
            .is_err()
    );
    assert!(
        objects
            .find_objects(&id_a, None, Some("Resource"), true, &ViewFilter::default())
            .await
            .is_err()
    );
}

#[tokio::test]
#[ignore = "requires docker"]
async fn resource_finders() {
    let (_pg, config) = start_postgres().await;
    let store = Datastore::new(Some("resources"), config).await.unwrap();
    let objects = ObjectStore::new(store, registry());

    let rec = resource("probe-1", "DRAFT")
        .with(
            "keywords",
            WireValue::list([WireValue::Str("deep".into()), WireValue::Str("ocean".into())]),
        )
        .with(
            "alt_ids",
            WireValue::list([WireValue::Str("ns1:abc".into()), WireValue::Str("ns2:def".into())]),
        );
    let (id, _) = objects.create(&rec, None, None).await.unwrap();

    let other = resource("probe-2", "DEPLOYED").with("availability", "AVAILABLE");
    let (other_id, _) = objects.create(&other, None, None).await.unwrap();

    // S1: by restype + name returns exactly the one id
    let (found, res_assocs) = objects
        .find_resources_ext(
            &ResourceQuery {
                restype: Some("Resource".into()),
                name: Some("probe-1".into()),
                ..Default::default()
            },
            &ViewFilter::default(),
            true,
        )
        .await
        .unwrap();
    assert_eq!(found.ids().unwrap(), &[id.clone()]);
    assert_eq!(res_assocs[0]["name"], json!("probe-1"));

    // keyword search through json_keywords
    let (found, _) = objects
        .find_res_by_keyword("deep", None, true, &ViewFilter::default())
        .await
        .unwrap();
    assert_eq!(found.ids().unwrap(), &[id.clone()]);

    // S5: alt id must match namespace and value together
    let (found, _) = objects
        .find_res_by_alt_id(Some("abc"), Some("ns1"), true, &ViewFilter::default())
        .await
        .unwrap();
    assert_eq!(found.ids().unwrap(), &[id.clone()]);
    let (found, _) = objects
        .find_res_by_alt_id(Some("def"), Some("ns1"), true, &ViewFilter::default())
        .await
        .unwrap();
    assert!(found.is_empty());

    // lcstate routing: maturity vs availability
    let (found, _) = objects
        .find_res_by_lcstate("DEPLOYED_AVAILABLE", None, true, &ViewFilter::default())
        .await
        .unwrap();
    assert_eq!(found.ids().unwrap(), &[other_id.clone()]);
    let (found, _) = objects
        .find_res_by_lcstate("AVAILABLE", None, true, &ViewFilter::default())
        .await
        .unwrap();
    assert_eq!(found.ids().unwrap(), &[other_id.clone()]);

    // retirement hides a resource from the finders
    let mut body = objects.store().read_doc(&id, None).await.unwrap();
    body.insert("lcstate".into(), json!("RETIRED"));
    objects.store().update_doc(body).await.unwrap();
    let (found, _) = objects
        .find_res_by_name("probe-1", None, true, &ViewFilter::default())
        .await
        .unwrap();
    assert!(found.is_empty());
}

#[tokio::test]
#[ignore = "requires docker"]
async fn directory_profile_views_and_uniqueness() {
    let (_pg, mut config) = start_postgres().await;
    config.profile = Profile::Directory;
    let store = Datastore::new(Some("dirstore"), config).await.unwrap();

    for (parent, key) in [("/", "services"), ("/services", "svc1"), ("/services", "svc2")] {
        store
            .create_doc(
                doc(json!({
                    "type_": "DirEntry",
                    "org": "ion",
                    "parent": parent,
                    "key": key,
                    "attributes": {"owner": "kai"},
                })),
                None,
                None,
            )
            .await
            .unwrap();
    }

    // (org, parent, key) is unique
    assert!(matches!(
        store
            .create_doc(
                doc(json!({"type_": "DirEntry", "org": "ion", "parent": "/services", "key": "svc1"})),
                None,
                None,
            )
            .await,
        Err(silt::Error::AlreadyExists(_))
    ));

    let rows = store
        .find_docs_by_view(
            &View::DirByKey {
                org: "ion".into(),
                key: "svc1".into(),
                parent: "/services".into(),
                parent_prefix: false,
            },
            true,
            &ViewFilter::default(),
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].key[2], json!("svc1"));

    let rows = store
        .find_docs_by_view(
            &View::DirByParent {
                org: "ion".into(),
                parent: "/services".into(),
            },
            true,
            &ViewFilter::default(),
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);

    // path prefix covers the whole subtree
    let rows = store
        .find_docs_by_view(
            &View::DirByPath {
                org: "ion".into(),
                path: vec!["services".into()],
            },
            true,
            &ViewFilter::default(),
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);

    let rows = store
        .find_docs_by_view(
            &View::DirByAttribute {
                org: "ion".into(),
                attr_name: "owner".into(),
                attr_value: "kai".into(),
                parent: "/".into(),
            },
            true,
            &ViewFilter::default(),
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 3);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn event_profile_time_windows_and_filters() {
    let (_pg, mut config) = start_postgres().await;
    config.profile = Profile::Events;
    let store = Datastore::new(Some("events"), config).await.unwrap();

    for (i, origin) in [(1, "node-1"), (2, "node-1"), (3, "node-2"), (4, "node-1")] {
        store
            .create_doc(
                doc(json!({
                    "type_": "StateEvent",
                    "origin": origin,
                    "origin_type": "Node",
                    "ts_created": format!("{:013}", i),
                })),
                None,
                None,
            )
            .await
            .unwrap();
    }

    let rows = store
        .find_docs_by_view(
            &View::EventByOrigin {
                origin: "node-1".into(),
                start_ts: Some(format!("{:013}", 2)),
                end_ts: None,
            },
            true,
            &ViewFilter::default(),
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    // ascending ts order
    assert!(rows[0].value.as_str().unwrap() < rows[1].value.as_str().unwrap());

    // S6: unbounded by_time is capped and ascending
    let rows = store
        .find_docs_by_view(
            &View::EventByTime {
                start_ts: None,
                end_ts: None,
            },
            true,
            &ViewFilter::default(),
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 4);
    let ts: Vec<_> = rows.iter().map(|r| r.value.as_str().unwrap().to_owned()).collect();
    let mut sorted = ts.clone();
    sorted.sort();
    assert_eq!(ts, sorted);

    // limit/skip/descending
    let rows = store
        .find_docs_by_view(
            &View::EventByTime {
                start_ts: Some(format!("{:013}", 1)),
                end_ts: Some(format!("{:013}", 4)),
            },
            true,
            &ViewFilter {
                limit: Some(2),
                skip: Some(1),
                descending: true,
            },
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].value, json!(format!("{:013}", 3)));
    assert_eq!(rows[1].value, json!(format!("{:013}", 2)));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn datastore_lifecycle() {
    let (_pg, config) = start_postgres().await;
    let store = Datastore::new(Some("resources"), config).await.unwrap();

    assert!(store.datastore_exists(None).await.unwrap());
    let list = store.list_datastores().await.unwrap();
    assert!(list.contains(&"resources".to_string()));
    // sidecars are suppressed from the listing
    assert!(!list.iter().any(|t| t.ends_with("_assoc")));

    store
        .create_doc(doc(json!({"type_": "Resource", "name": "x"})), None, None)
        .await
        .unwrap();
    store.clear_datastore(None).await.unwrap();
    assert!(store.list_objects().await.unwrap().is_empty());

    store.delete_datastore(None).await.unwrap();
    assert!(!store.datastore_exists(None).await.unwrap());

    // recreate under a different profile name
    store.create_datastore(Some("resources"), None).await.unwrap();
    assert!(store.datastore_exists(Some("resources")).await.unwrap());
}
