//! State store integration tests: container registration, package
//! reference counting, tombstones, repositories and schema migration
//! across every released version.

use std::collections::{HashMap, HashSet};

use rusqlite::Connection;
use tempfile::TempDir;

use ybox::state::{create_version_db, CopyType, DependencyType, PackageFilter, StateStore};

fn open_store(dir: &TempDir) -> StateStore {
    StateStore::open(&dir.path().join("state.db"), None).unwrap()
}

fn no_flags() -> HashMap<String, String> {
    HashMap::new()
}

#[test]
fn test_fresh_database_is_current_version() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    assert_eq!(store.schema_version().unwrap(), ybox::VERSION);
}

#[test]
fn test_container_roundtrip() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    store
        .register_container("c1", "arch", "", "[base]\nname = basic\n", false)
        .unwrap();
    let conf = store.get_container_configuration("c1").unwrap().unwrap();
    assert_eq!(conf.distribution, "arch");
    assert_eq!(conf.shared_root, "");
    assert!(conf.ini_config.contains("[base]"));

    assert_eq!(store.get_containers(None, None).unwrap(), vec!["c1"]);
    assert_eq!(
        store.get_containers(Some("arch"), None).unwrap(),
        vec!["c1"]
    );
    assert!(store.get_containers(Some("debian"), None).unwrap().is_empty());

    let result = store.mark_container_destroyed("c1").unwrap();
    assert!(result.found);
    assert!(result.tombstone.is_none());
    assert!(store.get_container_configuration("c1").unwrap().is_none());
}

#[test]
fn test_destroy_without_shared_root_removes_packages() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    store
        .register_container("c1", "arch", "", "[base]\n", false)
        .unwrap();
    store
        .record_package(
            "c1",
            "firefox",
            &["/home/u/.local/bin/c1-firefox".to_string()],
            CopyType::EXECUTABLE,
            &no_flags(),
            None,
            "",
            false,
        )
        .unwrap();

    let result = store.mark_container_destroyed("c1").unwrap();
    assert!(result.found);
    assert!(result.tombstone.is_none());
    assert_eq!(
        result.removed_wrappers,
        vec!["/home/u/.local/bin/c1-firefox"]
    );
    // no tombstone, no packages left
    assert!(store
        .list_packages("c1", &PackageFilter::default())
        .unwrap()
        .is_empty());
}

#[test]
fn test_destroy_with_shared_root_leaves_tombstone() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let shared_root = "/data/SHARED_ROOTS/arch";

    store
        .register_container("c1", "arch", shared_root, "[base]\nname = b\n", false)
        .unwrap();
    store
        .record_package(
            "c1",
            "vim",
            &["/home/u/.local/bin/c1-vim".to_string()],
            CopyType::EXECUTABLE,
            &no_flags(),
            None,
            "",
            false,
        )
        .unwrap();

    let result = store.mark_container_destroyed("c1").unwrap();
    assert!(result.found);
    let tombstone = result.tombstone.expect("tombstone expected");
    // wrappers are removed from the host and cleared in the row
    assert_eq!(result.removed_wrappers, vec!["/home/u/.local/bin/c1-vim"]);
    // the package row survives under the tombstone name
    assert_eq!(
        store.list_packages(&tombstone, &PackageFilter::default()).unwrap(),
        vec!["vim"]
    );
    // tombstones are not listed as live containers
    assert!(store.get_containers(None, None).unwrap().is_empty());

    // purge refuses while the package row references the tombstone
    assert_eq!(store.purge_destroyed_if_unreferenced().unwrap(), 0);
}

#[test]
fn test_orphan_adoption_on_register() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let shared_root = "/data/SHARED_ROOTS/arch";
    let config = "[base]\nname = basic\n";

    store
        .register_container("c1", "arch", shared_root, config, false)
        .unwrap();
    let mut flags = HashMap::new();
    flags.insert("vim".to_string(), "!p !a".to_string());
    store
        .record_package("c1", "vim", &[], CopyType::EXECUTABLE, &flags, None, "", false)
        .unwrap();
    store.mark_container_destroyed("c1").unwrap();

    // same configuration: adoption without force
    let adopted = store
        .register_container("c2", "arch", shared_root, config, false)
        .unwrap();
    assert_eq!(adopted.len(), 1);
    assert_eq!(adopted[0].name, "vim");
    assert_eq!(adopted[0].copy_type, CopyType::EXECUTABLE);
    assert_eq!(adopted[0].flags.get("vim").unwrap(), "!p !a");
    assert_eq!(
        store.list_packages("c2", &PackageFilter::default()).unwrap(),
        vec!["vim"]
    );
    // the fully adopted tombstone is gone
    assert_eq!(store.purge_destroyed_if_unreferenced().unwrap(), 0);
}

#[test]
fn test_orphan_adoption_requires_matching_config_unless_forced() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let shared_root = "/data/SHARED_ROOTS/arch";

    store
        .register_container("c1", "arch", shared_root, "[base]\nname = one\n", false)
        .unwrap();
    store
        .record_package("c1", "vim", &[], CopyType::NONE, &no_flags(), None, "", false)
        .unwrap();
    store.mark_container_destroyed("c1").unwrap();

    // different configuration: nothing is adopted
    let adopted = store
        .register_container("c2", "arch", shared_root, "[base]\nname = two\n", false)
        .unwrap();
    assert!(adopted.is_empty());

    // force adopts regardless
    let adopted = store
        .register_container("c3", "arch", shared_root, "[base]\nname = three\n", true)
        .unwrap();
    assert_eq!(adopted.len(), 1);
    assert_eq!(adopted[0].name, "vim");
}

#[test]
fn test_dependency_refcounting() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    store
        .register_container("c1", "arch", "", "[base]\n", false)
        .unwrap();
    // zoom and skype both depend on qt5ct
    for app in ["zoom", "skype"] {
        store
            .record_package("c1", app, &[], CopyType::NONE, &no_flags(), None, "", false)
            .unwrap();
    }
    store
        .record_package(
            "c1",
            "qt5ct",
            &[],
            CopyType::NONE,
            &no_flags(),
            Some(DependencyType::Optional),
            "zoom",
            false,
        )
        .unwrap();
    store
        .record_dependency("c1", "skype", "qt5ct", DependencyType::Optional)
        .unwrap();
    assert_eq!(store.dependency_refcount("c1", "qt5ct").unwrap(), 2);

    // removing zoom keeps qt5ct: skype still references it
    let (orphans, _) = store.remove_package("c1", "zoom", "").unwrap();
    assert!(orphans.is_empty());
    assert_eq!(store.dependency_refcount("c1", "qt5ct").unwrap(), 1);

    // removing skype orphans qt5ct
    let (orphans, _) = store.remove_package("c1", "skype", "").unwrap();
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].0, "qt5ct");
    assert_eq!(orphans[0].1, DependencyType::Optional);
    let (_, _) = store.remove_package("c1", "qt5ct", "").unwrap();
    assert_eq!(store.dependency_refcount("c1", "qt5ct").unwrap(), 0);
}

#[test]
fn test_self_dependency_rejected() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    store
        .register_container("c1", "arch", "", "[base]\n", false)
        .unwrap();
    assert!(store
        .record_dependency("c1", "vim", "vim", DependencyType::Optional)
        .is_err());
}

#[test]
fn test_shared_root_dependency_visibility() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let shared_root = "/data/SHARED_ROOTS/arch";
    let config = "[base]\n";

    for container in ["c1", "c2"] {
        store
            .register_container(container, "arch", shared_root, config, false)
            .unwrap();
    }
    store
        .record_package("c1", "zoom", &[], CopyType::NONE, &no_flags(), None, "", false)
        .unwrap();
    store
        .record_package(
            "c1",
            "qt5ct",
            &[],
            CopyType::NONE,
            &no_flags(),
            Some(DependencyType::Optional),
            "zoom",
            false,
        )
        .unwrap();
    // c2 also depends on qt5ct through another package
    store
        .record_package("c2", "obs", &[], CopyType::NONE, &no_flags(), None, "", false)
        .unwrap();
    store
        .record_dependency("c2", "obs", "qt5ct", DependencyType::Optional)
        .unwrap();

    // removing zoom from c1 must not orphan qt5ct: c2 on the same
    // shared root still references it
    let (orphans, _) = store.remove_package("c1", "zoom", shared_root).unwrap();
    assert!(orphans.is_empty());
}

#[test]
fn test_explicit_only_filter() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    store
        .register_container("c1", "arch", "", "[base]\n", false)
        .unwrap();
    store
        .record_package("c1", "zoom", &[], CopyType::NONE, &no_flags(), None, "", false)
        .unwrap();
    store
        .record_package(
            "c1",
            "qt5ct",
            &[],
            CopyType::NONE,
            &no_flags(),
            Some(DependencyType::Optional),
            "zoom",
            false,
        )
        .unwrap();

    let explicit = store
        .list_packages(
            "c1",
            &PackageFilter {
                explicit_only: true,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(explicit, vec!["zoom"]);

    let all = store.list_packages("c1", &PackageFilter::default()).unwrap();
    assert_eq!(all, vec!["qt5ct", "zoom"]);

    let regex_filtered = store
        .list_packages(
            "c1",
            &PackageFilter {
                name_regex: Some("qt.*".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(regex_filtered, vec!["qt5ct"]);
}

#[test]
fn test_repositories() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    assert!(store
        .add_repo("sublime", "c1", "https://download.sublimetext.com/", "8A8F901A", "", false, false)
        .unwrap());
    // duplicate registration is refused
    assert!(!store
        .add_repo("sublime", "c1", "https://other/", "", "", false, false)
        .unwrap());
    // update path changes the row
    assert!(store
        .add_repo("sublime", "c1", "https://download.sublimetext.com/", "NEWKEY", "", true, true)
        .unwrap());

    let repos = store.list_repos("c1").unwrap();
    assert_eq!(repos.len(), 1);
    assert_eq!(repos[0].key, "NEWKEY");
    assert!(repos[0].with_source_repo);

    let removed = store.remove_repo("sublime", "c1").unwrap().unwrap();
    assert_eq!(removed.key, "NEWKEY");
    assert!(store.list_repos("c1").unwrap().is_empty());
    assert!(store.remove_repo("sublime", "c1").unwrap().is_none());
}

#[test]
fn test_record_package_idempotent() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    store
        .register_container("c1", "arch", "", "[base]\n", false)
        .unwrap();
    let copies = vec!["/home/u/.local/bin/c1-vim".to_string()];
    for _ in 0..2 {
        store
            .record_package("c1", "vim", &copies, CopyType::EXECUTABLE, &no_flags(), None, "", false)
            .unwrap();
    }
    assert_eq!(
        store.list_packages("c1", &PackageFilter::default()).unwrap(),
        vec!["vim"]
    );
    let (copy_type, _) = store.get_package_wrapper_info("c1", "vim").unwrap().unwrap();
    assert_eq!(copy_type, CopyType::EXECUTABLE);
}

// ----------------------------------------------------------------------
// schema migration
// ----------------------------------------------------------------------

fn table_columns(conn: &Connection, table: &str) -> HashSet<String> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({})", table))
        .unwrap();
    stmt.query_map([], |row| row.get::<_, String>(1))
        .unwrap()
        .map(Result::unwrap)
        .collect()
}

fn table_names(conn: &Connection) -> HashSet<String> {
    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'")
        .unwrap();
    stmt.query_map([], |row| row.get::<_, String>(0))
        .unwrap()
        .map(Result::unwrap)
        .collect()
}

/// Opening a database created at any released version migrates it to a
/// schema structurally equal to a freshly created one.
#[test]
fn test_migration_from_every_released_version() {
    let fresh_dir = TempDir::new().unwrap();
    let _fresh = open_store(&fresh_dir);
    let fresh_conn = Connection::open(fresh_dir.path().join("state.db")).unwrap();
    let fresh_tables = table_names(&fresh_conn);

    for version in ["0.9.0", "0.9.1", "0.9.2", "0.9.5", "0.9.6", "0.9.7", "0.9.10"] {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("state.db");
        {
            let conn = Connection::open(&db_path).unwrap();
            create_version_db(&conn, version).unwrap();
        }
        let store = StateStore::open(&db_path, None).unwrap();
        assert_eq!(
            store.schema_version().unwrap(),
            ybox::VERSION,
            "version {} did not migrate to current",
            version
        );
        drop(store);

        let conn = Connection::open(&db_path).unwrap();
        assert_eq!(
            table_names(&conn),
            fresh_tables,
            "table set differs after migrating from {}",
            version
        );
        for table in &fresh_tables {
            assert_eq!(
                table_columns(&conn, table),
                table_columns(&fresh_conn, table),
                "columns of '{}' differ after migrating from {}",
                table,
                version
            );
        }
    }
}

/// Migrating a 0.9.0 database carries its data forward: CSV
/// local_copies become JSON and local_copy_type is backfilled from the
/// wrapper paths.
#[test]
fn test_migration_preserves_and_upgrades_data() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("state.db");
    {
        let conn = Connection::open(&db_path).unwrap();
        create_version_db(&conn, "0.9.0").unwrap();
        conn.execute(
            "INSERT INTO containers VALUES ('c1', 'arch', '', '[base]')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO packages VALUES ('firefox', 'c1', \
             '/home/u/.local/share/applications/c1-firefox.desktop,/home/u/.local/bin/c1-firefox')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO packages VALUES ('mandoc-page', 'c1', \
             '/home/u/.local/share/man/man1/x.1')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO package_deps VALUES ('firefox', 'c1', 'libvpx', 'required')",
            [],
        )
        .unwrap();
    }

    let store = StateStore::open(&db_path, None).unwrap();
    assert_eq!(store.schema_version().unwrap(), ybox::VERSION);
    // the destroyed flag exists and defaults to live
    assert_eq!(store.get_containers(None, None).unwrap(), vec!["c1"]);

    // CSV local_copies converted to a JSON array
    let conn = Connection::open(&db_path).unwrap();
    let copies: String = conn
        .query_row(
            "SELECT local_copies FROM packages WHERE name = 'firefox'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    let parsed: Vec<String> = serde_json::from_str(&copies).unwrap();
    assert_eq!(parsed.len(), 2);

    // desktop + executable heuristic: 1 | 2 == 3
    let (copy_type, _) = store.get_package_wrapper_info("c1", "firefox").unwrap().unwrap();
    assert_eq!(copy_type.bits(), 3);
    // man-only package backfills to none (documented best-effort)
    let (copy_type, _) = store
        .get_package_wrapper_info("c1", "mandoc-page")
        .unwrap()
        .unwrap();
    assert_eq!(copy_type.bits(), 0);

    // dependency edges survive
    assert_eq!(store.dependency_refcount("c1", "libvpx").unwrap(), 1);
}

/// A database from a newer library version must refuse to open.
#[test]
fn test_downgrade_refused() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("state.db");
    {
        let store = StateStore::open(&db_path, None).unwrap();
        drop(store);
        let conn = Connection::open(&db_path).unwrap();
        conn.execute("INSERT INTO schema VALUES ('99.0.0')", []).unwrap();
    }
    let err = StateStore::open(&db_path, None).unwrap_err();
    assert!(matches!(err, ybox::YboxError::Schema(_)));
    assert_eq!(err.exit_code(), 4);
}

/// Two writers against the same database serialize; neither loses
/// updates.
#[test]
fn test_concurrent_writers_serialize() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("state.db");
    {
        let store = StateStore::open(&db_path, None).unwrap();
        store
            .register_container("c1", "arch", "", "[base]\n", false)
            .unwrap();
    }

    let mut handles = Vec::new();
    for (idx, package) in ["pkgA", "pkgB"].iter().enumerate() {
        let db_path = db_path.clone();
        let package = package.to_string();
        handles.push(std::thread::spawn(move || {
            let store = StateStore::open(&db_path, None).unwrap();
            for round in 0..20 {
                store
                    .record_package(
                        "c1",
                        &format!("{}-{}", package, round),
                        &[],
                        CopyType::NONE,
                        &HashMap::new(),
                        None,
                        "",
                        false,
                    )
                    .unwrap();
            }
            idx
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let store = StateStore::open(&db_path, None).unwrap();
    let packages = store.list_packages("c1", &PackageFilter::default()).unwrap();
    assert_eq!(packages.len(), 40);
}
