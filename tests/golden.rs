//! Golden renderings of the flat format and service manifests.
//!
//! These snapshots pin the exact on-disk shapes other tooling reads. A
//! diff here is a compatibility break, not a refactoring detail.

use drover::modules::ServiceManifest;
use drover::store::{persist, ConfigStore, PropertyPath, PropertyValue};
use drover::topology;

fn set(store: &mut ConfigStore, key: &str, value: PropertyValue) {
    let path = PropertyPath::parse(key).unwrap();
    store.set(&path, value).unwrap();
}

#[test]
fn test_merged_cluster_flattens_deterministically() {
    let mut store = ConfigStore::new();
    set(&mut store, "hosts.defaults.user", "dbadmin".into());
    set(&mut store, "hosts.db1.address", "10.0.0.1".into());
    set(&mut store, "hosts.db2.address", "10.0.0.2".into());
    set(
        &mut store,
        "dataservices.east.members",
        vec!["db1".to_string(), "db2".to_string()].into(),
    );
    set(&mut store, "dataservices.east.master", "db1".into());
    set(&mut store, "dataservices.east.managed", "false".into());
    topology::derive_service_members(&mut store).unwrap();

    insta::assert_snapshot!(persist::to_flat_string(&store.merged()), @r#"
    dataservices.east.managed = "false"
    dataservices.east.master = "db1"
    dataservices.east.members = ["db1","db2"]
    hosts.db1.address = "10.0.0.1"
    hosts.db2.address = "10.0.0.2"
    hosts.defaults.user = "dbadmin"
    repl_services.east_db1.dataservice = "east"
    repl_services.east_db1.host = "db1"
    repl_services.east_db2.dataservice = "east"
    repl_services.east_db2.host = "db2"
    "#);
}

#[test]
fn test_flat_format_escapes_awkward_values() {
    let mut store = ConfigStore::new();
    set(&mut store, "notes.comment", "leading # stays data".into());
    set(
        &mut store,
        "paths.backup.location",
        r#"C:\drover "main""#.into(),
    );
    set(&mut store, "queue.empty", Vec::<String>::new().into());
    set(&mut store, "queue.name", "".into());

    insta::assert_snapshot!(store.to_flat_string(), @r#"
    notes.comment = "leading # stays data"
    paths.backup.location = "C:\\drover \"main\""
    queue.empty = []
    queue.name = ""
    "#);
}

#[test]
fn test_replicator_manifest_render() {
    let manifest = ServiceManifest {
        service: "east_db2".to_string(),
        kind: "replicator".to_string(),
        dataservice: "east".to_string(),
        host: "db2".to_string(),
        role: Some("slave".to_string()),
        listen_port: Some("2112".to_string()),
        master_thl_uri: Some("thl://10.0.0.1:2112/".to_string()),
        enabled: false,
    };

    insta::assert_snapshot!(serde_json::to_string_pretty(&manifest).unwrap(), @r#"
    {
      "service": "east_db2",
      "kind": "replicator",
      "dataservice": "east",
      "host": "db2",
      "role": "slave",
      "listen_port": "2112",
      "master_thl_uri": "thl://10.0.0.1:2112/",
      "enabled": false
    }
    "#);
}

#[test]
fn test_master_manifest_omits_absent_fields() {
    let manifest = ServiceManifest {
        service: "east_db1".to_string(),
        kind: "replicator".to_string(),
        dataservice: "east".to_string(),
        host: "db1".to_string(),
        role: Some("master".to_string()),
        listen_port: Some("2112".to_string()),
        master_thl_uri: None,
        enabled: true,
    };

    let rendered = serde_json::to_string_pretty(&manifest).unwrap();
    assert!(!rendered.contains("master_thl_uri"));
    assert!(rendered.contains(r#""enabled": true"#));
}
