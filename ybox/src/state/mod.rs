//! SQLite-backed state of all ybox containers: their full resolved
//! configuration, the packages installed through `ybox pkg` with their
//! host wrappers and dependency edges, and extra package repositories.
//!
//! A single writer is enforced with an advisory file lock on a sibling
//! `.lock` file wrapped around every write transaction, so error
//! mapping stays uniform instead of leaning on SQLite's busy timeout.
//! Reads take the lock in shared mode.

mod migrate;
mod schema;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};

use ybox_shared::errors::{YboxError, YboxResult};

use crate::lock::{FileLock, LockMode};

pub use migrate::SchemaVersion;

/// Convert rusqlite errors to YboxError.
macro_rules! db_err {
    ($result:expr) => {
        $result.map_err(|e| YboxError::Storage(format!("state database error: {}", e)))
    };
}

/// Bit mask of wrapper kinds created for a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CopyType(u32);

impl CopyType {
    pub const NONE: CopyType = CopyType(0);
    pub const DESKTOP: CopyType = CopyType(1);
    pub const EXECUTABLE: CopyType = CopyType(2);

    pub fn from_bits(bits: u32) -> CopyType {
        CopyType(bits & 3)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: CopyType) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for CopyType {
    type Output = CopyType;
    fn bitor(self, rhs: CopyType) -> CopyType {
        CopyType(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for CopyType {
    fn bitor_assign(&mut self, rhs: CopyType) {
        self.0 |= rhs.0;
    }
}

impl std::ops::Sub for CopyType {
    type Output = CopyType;
    fn sub(self, rhs: CopyType) -> CopyType {
        CopyType(self.0 & !rhs.0)
    }
}

/// Kind of a package dependency edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyType {
    Required,
    Optional,
    Suggestion,
}

impl DependencyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyType::Required => "required",
            DependencyType::Optional => "optional",
            DependencyType::Suggestion => "suggestion",
        }
    }

    pub fn parse(text: &str) -> YboxResult<DependencyType> {
        match text {
            "required" => Ok(DependencyType::Required),
            "optional" => Ok(DependencyType::Optional),
            "suggestion" => Ok(DependencyType::Suggestion),
            _ => Err(YboxError::Internal(format!(
                "unknown dependency type '{}'",
                text
            ))),
        }
    }
}

/// Runtime configuration of a container as recorded at creation.
#[derive(Debug, Clone)]
pub struct RuntimeConfiguration {
    pub name: String,
    pub distribution: String,
    /// Shared root directory, or empty when the container does not use
    /// one.
    pub shared_root: String,
    /// Full resolved configuration in INI format.
    pub ini_config: String,
}

impl RuntimeConfiguration {
    /// Key for repository rows: the shared root when one is used (the
    /// repositories are then visible to every container on it), else
    /// the container name.
    pub fn repo_scope(&self) -> &str {
        if self.shared_root.is_empty() {
            &self.name
        } else {
            &self.shared_root
        }
    }
}

/// A registered extra package repository.
#[derive(Debug, Clone)]
pub struct RepoRecord {
    pub name: String,
    pub scope: String,
    pub urls: String,
    pub key: String,
    pub options: String,
    pub with_source_repo: bool,
}

/// A package adopted from a destroyed tombstone during container
/// registration: its wrapper mask and extra flags allow the wrappers to
/// be recreated.
#[derive(Debug, Clone)]
pub struct AdoptedPackage {
    pub name: String,
    pub copy_type: CopyType,
    pub flags: HashMap<String, String>,
}

/// Result of destroying a container's state.
#[derive(Debug, Default)]
pub struct DestroyResult {
    /// Whether a live container row existed.
    pub found: bool,
    /// Wrapper files that must be unlinked by the caller.
    pub removed_wrappers: Vec<String>,
    /// Tombstone name when packages were preserved in a shared root.
    pub tombstone: Option<String>,
}

/// Filter for [`StateStore::list_packages`].
#[derive(Debug, Clone, Default)]
pub struct PackageFilter {
    /// Regular expression the package name must fully match.
    pub name_regex: Option<String>,
    /// `Some(regex)`: only packages that are dependencies with a
    /// matching dep_type; `None`: no dependency constraint.
    pub dependency_type: Option<String>,
    /// Only packages that are not dependencies of anything (explicitly
    /// installed). Mutually exclusive with `dependency_type`.
    pub explicit_only: bool,
}

/// The single-writer SQLite state store.
#[derive(Debug)]
pub struct StateStore {
    conn: Arc<Mutex<Connection>>,
    lock_path: PathBuf,
    lock_timeout: Option<Duration>,
}

impl StateStore {
    /// Open or create the state database, running schema creation or
    /// forward-only migration as needed under the exclusive lock.
    pub fn open(db_path: &Path, lock_timeout: Option<Duration>) -> YboxResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let lock_path = db_path.with_extension("db.lock");
        let _lock = FileLock::acquire_mode(&lock_path, lock_timeout, LockMode::Exclusive)?;

        let conn = db_err!(Connection::open(db_path))?;
        db_err!(conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=FULL;
            PRAGMA foreign_keys=ON;
            PRAGMA busy_timeout=100000;
            "
        ))?;
        register_functions(&conn)?;
        init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            lock_path,
            lock_timeout,
        })
    }

    /// Run a closure inside an exclusive write transaction guarded by
    /// the cross-process lock. The transaction commits when the closure
    /// returns Ok and rolls back otherwise.
    fn write_txn<T>(&self, f: impl FnOnce(&Connection) -> YboxResult<T>) -> YboxResult<T> {
        let _lock =
            FileLock::acquire_mode(&self.lock_path, self.lock_timeout, LockMode::Exclusive)?;
        let mut conn = self.conn.lock();
        let txn = db_err!(conn.transaction_with_behavior(TransactionBehavior::Exclusive))?;
        match f(&txn) {
            Ok(value) => {
                db_err!(txn.commit())?;
                Ok(value)
            }
            Err(err) => {
                let _ = txn.rollback();
                Err(err)
            }
        }
    }

    /// Run a read-only closure under the shared cross-process lock.
    fn read<T>(&self, f: impl FnOnce(&Connection) -> YboxResult<T>) -> YboxResult<T> {
        let _lock = FileLock::acquire_mode(&self.lock_path, self.lock_timeout, LockMode::Shared)?;
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Latest entry of the schema version history.
    pub fn schema_version(&self) -> YboxResult<String> {
        self.read(|conn| {
            db_err!(conn.query_row(
                "SELECT version FROM schema ORDER BY rowid DESC LIMIT 1",
                [],
                |row| row.get(0),
            ))
        })
    }

    // ------------------------------------------------------------------
    // containers
    // ------------------------------------------------------------------

    /// Register a newly created container. When the container uses a
    /// shared root, packages owned by destroyed tombstones on the same
    /// shared root are adopted: with `force_own_orphans` regardless of
    /// configuration, otherwise only from tombstones whose recorded
    /// configuration matches. Returns the adopted packages so the
    /// caller can recreate their wrappers.
    pub fn register_container(
        &self,
        name: &str,
        distribution: &str,
        shared_root: &str,
        config: &str,
        force_own_orphans: bool,
    ) -> YboxResult<Vec<AdoptedPackage>> {
        self.write_txn(|conn| {
            // the container may have been destroyed outside of ybox
            Self::destroy_container_inner(conn, name).map(|_| ())?;
            db_err!(conn.execute(
                "INSERT INTO containers VALUES (?1, ?2, ?3, ?4, 0)",
                params![name, distribution, shared_root, config],
            ))?;
            if shared_root.is_empty() {
                return Ok(Vec::new());
            }

            let tombstones = if force_own_orphans {
                "SELECT dc.name FROM containers dc WHERE dc.destroyed = 1 \
                 AND dc.name <> ?1 AND dc.shared_root = ?2"
            } else {
                "SELECT dc.name FROM containers dc WHERE dc.destroyed = 1 \
                 AND dc.name <> ?1 AND dc.shared_root = ?2 AND dc.configuration = ?3"
            };
            let update_packages = format!(
                "UPDATE packages SET container = ?1 WHERE container IN ({}) \
                 RETURNING name, local_copy_type, flags",
                tombstones
            );
            let mut adopted = Vec::new();
            {
                let mut stmt = db_err!(conn.prepare(&update_packages))?;
                let mut rows = db_err!(if force_own_orphans {
                    stmt.query(params![name, shared_root])
                } else {
                    stmt.query(params![name, shared_root, config])
                })?;
                while let Some(row) = db_err!(rows.next())? {
                    let pkg: String = db_err!(row.get(0))?;
                    let copy_type: u32 = db_err!(row.get(1))?;
                    let flags_json: String = db_err!(row.get(2))?;
                    adopted.push(AdoptedPackage {
                        name: pkg,
                        copy_type: CopyType::from_bits(copy_type),
                        flags: serde_json::from_str(&flags_json).unwrap_or_default(),
                    });
                }
            }
            if !adopted.is_empty() {
                let update_deps = format!(
                    "UPDATE package_deps SET container = ?1 WHERE container IN ({})",
                    tombstones
                );
                db_err!(if force_own_orphans {
                    conn.execute(&update_deps, params![name, shared_root])
                } else {
                    conn.execute(&update_deps, params![name, shared_root, config])
                })?;
            }
            // tombstones whose packages all got adopted are done for
            db_err!(conn.execute(
                "DELETE FROM containers WHERE destroyed = 1 AND NOT EXISTS \
                 (SELECT 1 FROM packages WHERE packages.container = containers.name)",
                [],
            ))?;
            Ok(adopted)
        })
    }

    /// Destroy a container's state. When packages registered for it are
    /// still present in a shared root, the row is renamed to a unique
    /// tombstone with `destroyed = 1` and the packages stay attributed
    /// to the tombstone; otherwise all its rows are removed. Wrapper
    /// paths are returned for the caller to unlink.
    pub fn mark_container_destroyed(&self, name: &str) -> YboxResult<DestroyResult> {
        self.write_txn(|conn| Self::destroy_container_inner(conn, name))
    }

    fn destroy_container_inner(conn: &Connection, name: &str) -> YboxResult<DestroyResult> {
        let row: Option<(String, String, String)> = db_err!(conn
            .query_row(
                "DELETE FROM containers WHERE name = ?1 AND destroyed = 0 \
                 RETURNING distribution, shared_root, configuration",
                params![name],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional())?;
        let found = row.is_some();

        let has_packages: bool = db_err!(conn
            .query_row(
                "SELECT 1 FROM packages WHERE container = ?1 LIMIT 1",
                params![name],
                |_| Ok(true),
            )
            .optional())?
        .unwrap_or(false);
        if !has_packages {
            db_err!(conn.execute(
                "DELETE FROM package_repos WHERE container_or_shared_root = ?1",
                params![name],
            ))?;
            return Ok(DestroyResult {
                found,
                ..Default::default()
            });
        }

        let shared_root = row.as_ref().map(|r| r.1.clone()).unwrap_or_default();
        let mut result = DestroyResult {
            found,
            ..Default::default()
        };
        if !shared_root.is_empty() {
            let (distribution, _, configuration) = row.unwrap();
            // generate a unique tombstone name, retrying on the absurd
            // chance of a UUID collision
            let tombstone = loop {
                let candidate = uuid::Uuid::new_v4().to_string();
                let inserted = conn.execute(
                    "INSERT INTO containers VALUES (?1, ?2, ?3, ?4, 1)",
                    params![candidate, distribution, shared_root, configuration],
                );
                match inserted {
                    Ok(_) => break candidate,
                    Err(rusqlite::Error::SqliteFailure(err, _))
                        if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                    {
                        continue;
                    }
                    Err(err) => {
                        return Err(YboxError::Storage(format!(
                            "state database error: {}",
                            err
                        )))
                    }
                }
            };
            result.removed_wrappers = Self::collect_local_copies(
                conn,
                "UPDATE packages SET container = ?1 WHERE container = ?2 \
                 RETURNING local_copies",
                params![tombstone, name],
            )?;
            db_err!(conn.execute(
                "UPDATE package_deps SET container = ?1 WHERE container = ?2",
                params![tombstone, name],
            ))?;
            // wrappers are gone from the host, clear the recorded copies
            db_err!(conn.execute(
                "UPDATE packages SET local_copies = '[]' WHERE container = ?1",
                params![tombstone],
            ))?;
            result.tombstone = Some(tombstone);
        } else {
            result.removed_wrappers = Self::collect_local_copies(
                conn,
                "DELETE FROM packages WHERE container = ?1 RETURNING local_copies",
                params![name],
            )?;
            db_err!(conn.execute(
                "DELETE FROM package_deps WHERE container = ?1",
                params![name],
            ))?;
            db_err!(conn.execute(
                "DELETE FROM package_repos WHERE container_or_shared_root = ?1",
                params![name],
            ))?;
        }
        Ok(result)
    }

    fn collect_local_copies(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> YboxResult<Vec<String>> {
        let mut files = Vec::new();
        let mut stmt = db_err!(conn.prepare(sql))?;
        let mut rows = db_err!(stmt.query(params))?;
        while let Some(row) = db_err!(rows.next())? {
            let copies_json: String = db_err!(row.get(0))?;
            if copies_json.is_empty() {
                continue;
            }
            if let Ok(copies) = serde_json::from_str::<Vec<String>>(&copies_json) {
                files.extend(copies.into_iter().filter(|f| !f.is_empty()));
            }
        }
        Ok(files)
    }

    /// Remove destroyed tombstones that no package row references
    /// anymore.
    pub fn purge_destroyed_if_unreferenced(&self) -> YboxResult<usize> {
        self.write_txn(|conn| {
            db_err!(conn.execute(
                "DELETE FROM containers WHERE destroyed = 1 AND NOT EXISTS \
                 (SELECT 1 FROM packages WHERE packages.container = containers.name)",
                [],
            ))
        })
    }

    /// Configuration of a live container.
    pub fn get_container_configuration(
        &self,
        name: &str,
    ) -> YboxResult<Option<RuntimeConfiguration>> {
        self.read(|conn| {
            db_err!(conn
                .query_row(
                    "SELECT distribution, shared_root, configuration FROM containers \
                     WHERE name = ?1 AND destroyed = 0",
                    params![name],
                    |row| {
                        Ok(RuntimeConfiguration {
                            name: name.to_string(),
                            distribution: row.get(0)?,
                            shared_root: row.get(1)?,
                            ini_config: row.get(2)?,
                        })
                    },
                )
                .optional())
        })
    }

    /// Names of live containers matching the given criteria.
    pub fn get_containers(
        &self,
        distribution: Option<&str>,
        shared_root: Option<&str>,
    ) -> YboxResult<Vec<String>> {
        self.read(|conn| {
            let mut sql = "SELECT name FROM containers WHERE destroyed = 0".to_string();
            let mut args: Vec<String> = Vec::new();
            if let Some(distribution) = distribution {
                sql.push_str(" AND distribution = ?");
                args.push(distribution.to_string());
            }
            if let Some(shared_root) = shared_root {
                sql.push_str(" AND shared_root = ?");
                args.push(shared_root.to_string());
            }
            sql.push_str(" ORDER BY name ASC");
            let mut stmt = db_err!(conn.prepare(&sql))?;
            let rows = db_err!(stmt.query_map(
                rusqlite::params_from_iter(args.iter()),
                |row| row.get::<_, String>(0)
            ))?;
            let mut names = Vec::new();
            for row in rows {
                names.push(db_err!(row)?);
            }
            Ok(names)
        })
    }

    /// Other live containers using the same shared root.
    pub fn get_other_shared_containers(
        &self,
        name: &str,
        shared_root: &str,
    ) -> YboxResult<Vec<String>> {
        if shared_root.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .get_containers(None, Some(shared_root))?
            .into_iter()
            .filter(|c| c != name)
            .collect())
    }

    // ------------------------------------------------------------------
    // packages
    // ------------------------------------------------------------------

    /// Record a package as owned by a container, optionally as a
    /// dependency of another package. Idempotent: an existing row is
    /// replaced unless `skip_if_exists`.
    #[allow(clippy::too_many_arguments)]
    pub fn record_package(
        &self,
        container: &str,
        package: &str,
        local_copies: &[String],
        copy_type: CopyType,
        flags: &HashMap<String, String>,
        dep_type: Option<DependencyType>,
        dep_of: &str,
        skip_if_exists: bool,
    ) -> YboxResult<()> {
        let copies_json = serde_json::to_string(local_copies)?;
        let flags_json = serde_json::to_string(flags)?;
        self.write_txn(|conn| {
            let insert = if skip_if_exists {
                "INSERT OR IGNORE INTO packages VALUES (?1, ?2, ?3, ?4, ?5)"
            } else {
                "INSERT OR REPLACE INTO packages VALUES (?1, ?2, ?3, ?4, ?5)"
            };
            db_err!(conn.execute(
                insert,
                params![package, container, copies_json, copy_type.bits(), flags_json],
            ))?;
            if let Some(dep_type) = dep_type {
                db_err!(conn.execute(
                    "INSERT OR REPLACE INTO package_deps VALUES (?1, ?2, ?3, ?4)",
                    params![dep_of, container, package, dep_type.as_str()],
                ))?;
            }
            Ok(())
        })
    }

    /// Remove a package row and its outgoing dependency edges, and
    /// return the dependencies that no surviving package references
    /// (within the same shared root when one is used) along with the
    /// wrapper files to unlink.
    pub fn remove_package(
        &self,
        container: &str,
        package: &str,
        shared_root: &str,
    ) -> YboxResult<(Vec<(String, DependencyType)>, Vec<String>)> {
        self.write_txn(|conn| {
            // dependencies of `package` that no other package (on the
            // same shared root, or in the same container otherwise)
            // also depends on
            let orphans_sql = if shared_root.is_empty() {
                "SELECT dependency, dep_type FROM package_deps deps \
                 WHERE name = ?1 AND container = ?2 AND NOT EXISTS ( \
                   SELECT 1 FROM package_deps d WHERE d.name <> ?1 AND d.container = ?2 \
                   AND deps.dependency = d.dependency)"
            } else {
                "SELECT dependency, dep_type FROM package_deps deps \
                 WHERE name = ?1 AND container = ?2 AND NOT EXISTS ( \
                   SELECT 1 FROM package_deps d INNER JOIN containers c \
                   ON (d.container = c.name AND d.name <> ?1) \
                   WHERE c.shared_root = ?3 AND deps.dependency = d.dependency)"
            };
            let mut orphans = Vec::new();
            {
                let mut stmt = db_err!(conn.prepare(orphans_sql))?;
                let mut rows = db_err!(if shared_root.is_empty() {
                    stmt.query(params![package, container])
                } else {
                    stmt.query(params![package, container, shared_root])
                })?;
                while let Some(row) = db_err!(rows.next())? {
                    let dep: String = db_err!(row.get(0))?;
                    let dep_type: String = db_err!(row.get(1))?;
                    orphans.push((dep, DependencyType::parse(&dep_type)?));
                }
            }
            let wrappers = Self::collect_local_copies(
                conn,
                "DELETE FROM packages WHERE name = ?1 AND container = ?2 \
                 RETURNING local_copies",
                params![package, container],
            )?;
            db_err!(conn.execute(
                "DELETE FROM package_deps WHERE name = ?1 AND container = ?2",
                params![package, container],
            ))?;
            Ok((orphans, wrappers))
        })
    }

    /// Record one dependency edge (increments the dependency's
    /// reference count).
    pub fn record_dependency(
        &self,
        container: &str,
        package: &str,
        dependency: &str,
        dep_type: DependencyType,
    ) -> YboxResult<()> {
        if package == dependency {
            return Err(YboxError::InvalidState(format!(
                "package '{}' cannot depend on itself",
                package
            )));
        }
        self.write_txn(|conn| {
            db_err!(conn.execute(
                "INSERT OR REPLACE INTO package_deps VALUES (?1, ?2, ?3, ?4)",
                params![package, container, dependency, dep_type.as_str()],
            ))?;
            Ok(())
        })
    }

    /// Remove dependency edges pointing at `dependency` from packages
    /// matching the SQL LIKE pattern `name_pattern` (decrements the
    /// reference count).
    pub fn remove_dependency(
        &self,
        container: &str,
        name_pattern: &str,
        dependency: &str,
    ) -> YboxResult<usize> {
        self.write_txn(|conn| {
            db_err!(conn.execute(
                "DELETE FROM package_deps WHERE name LIKE ?1 AND container = ?2 \
                 AND dependency = ?3",
                params![name_pattern, container, dependency],
            ))
        })
    }

    /// Number of packages depending on `dependency` in the container.
    pub fn dependency_refcount(&self, container: &str, dependency: &str) -> YboxResult<u32> {
        self.read(|conn| {
            db_err!(conn.query_row(
                "SELECT COUNT(*) FROM package_deps WHERE container = ?1 AND dependency = ?2",
                params![container, dependency],
                |row| row.get(0),
            ))
        })
    }

    /// Registered packages of a container, filtered.
    pub fn list_packages(
        &self,
        container: &str,
        filter: &PackageFilter,
    ) -> YboxResult<Vec<String>> {
        self.read(|conn| {
            let mut sql = "SELECT name FROM packages WHERE container = ?1".to_string();
            let mut args: Vec<String> = vec![container.to_string()];
            if let Some(name_regex) = &filter.name_regex {
                sql.push_str(" AND name REGEXP ?2");
                args.push(name_regex.clone());
            }
            if filter.explicit_only {
                sql.push_str(
                    " AND NOT EXISTS (SELECT 1 FROM package_deps WHERE \
                     packages.container = package_deps.container AND \
                     packages.name = package_deps.dependency)",
                );
            } else if let Some(dep_type) = &filter.dependency_type {
                sql.push_str(&format!(
                    " AND EXISTS (SELECT 1 FROM package_deps WHERE dep_type REGEXP ?{} AND \
                     packages.container = package_deps.container AND \
                     packages.name = package_deps.dependency)",
                    args.len() + 1
                ));
                args.push(dep_type.clone());
            }
            sql.push_str(" ORDER BY name ASC");
            let mut stmt = db_err!(conn.prepare(&sql))?;
            let rows = db_err!(
                stmt.query_map(rusqlite::params_from_iter(args.iter()), |row| row
                    .get::<_, String>(0))
            )?;
            let mut names = Vec::new();
            for row in rows {
                names.push(db_err!(row)?);
            }
            Ok(names)
        })
    }

    /// The subset of `names` that are registered for the container.
    pub fn check_packages(&self, container: &str, names: &[String]) -> YboxResult<Vec<String>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        self.read(|conn| {
            let placeholders = vec!["?"; names.len()].join(",");
            let sql = format!(
                "SELECT name FROM packages WHERE container = ?1 AND name IN ({}) \
                 ORDER BY name ASC",
                placeholders
            );
            let mut stmt = db_err!(conn.prepare(&sql))?;
            let mut args: Vec<&str> = vec![container];
            args.extend(names.iter().map(String::as_str));
            let rows = db_err!(stmt.query_map(rusqlite::params_from_iter(args.iter()), |row| {
                row.get::<_, String>(0)
            }))?;
            let mut found = Vec::new();
            for row in rows {
                found.push(db_err!(row)?);
            }
            Ok(found)
        })
    }

    /// Wrapper mask and flags of one registered package.
    pub fn get_package_wrapper_info(
        &self,
        container: &str,
        package: &str,
    ) -> YboxResult<Option<(CopyType, HashMap<String, String>)>> {
        self.read(|conn| {
            let row: Option<(u32, String)> = db_err!(conn
                .query_row(
                    "SELECT local_copy_type, flags FROM packages \
                     WHERE name = ?1 AND container = ?2",
                    params![package, container],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional())?;
            Ok(row.map(|(bits, flags_json)| {
                (
                    CopyType::from_bits(bits),
                    serde_json::from_str(&flags_json).unwrap_or_default(),
                )
            }))
        })
    }

    // ------------------------------------------------------------------
    // repositories
    // ------------------------------------------------------------------

    /// Register a repository. Returns false when a row with the same
    /// name already exists for the scope (unless `update`).
    #[allow(clippy::too_many_arguments)]
    pub fn add_repo(
        &self,
        name: &str,
        scope: &str,
        urls: &str,
        key: &str,
        options: &str,
        with_source_repo: bool,
        update: bool,
    ) -> YboxResult<bool> {
        self.write_txn(|conn| {
            let changed = if update {
                db_err!(conn.execute(
                    "UPDATE package_repos SET urls = ?3, key = ?4, options = ?5, \
                     with_source_repo = ?6 WHERE name = ?1 AND container_or_shared_root = ?2",
                    params![name, scope, urls, key, options, with_source_repo as i64],
                ))?
            } else {
                db_err!(conn.execute(
                    "INSERT OR IGNORE INTO package_repos VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![name, scope, urls, key, options, with_source_repo as i64],
                ))?
            };
            Ok(changed > 0)
        })
    }

    /// Remove a repository row, returning it when present.
    pub fn remove_repo(&self, name: &str, scope: &str) -> YboxResult<Option<RepoRecord>> {
        self.write_txn(|conn| {
            db_err!(conn
                .query_row(
                    "DELETE FROM package_repos WHERE name = ?1 AND \
                     container_or_shared_root = ?2 \
                     RETURNING urls, key, options, with_source_repo",
                    params![name, scope],
                    |row| {
                        Ok(RepoRecord {
                            name: name.to_string(),
                            scope: scope.to_string(),
                            urls: row.get(0)?,
                            key: row.get(1)?,
                            options: row.get(2)?,
                            with_source_repo: row.get::<_, i64>(3)? != 0,
                        })
                    },
                )
                .optional())
        })
    }

    /// All repositories registered for a scope.
    pub fn list_repos(&self, scope: &str) -> YboxResult<Vec<RepoRecord>> {
        self.read(|conn| {
            let mut stmt = db_err!(conn.prepare(
                "SELECT name, urls, key, options, with_source_repo FROM package_repos \
                 WHERE container_or_shared_root = ?1 ORDER BY name ASC"
            ))?;
            let rows = db_err!(stmt.query_map(params![scope], |row| {
                Ok(RepoRecord {
                    name: row.get(0)?,
                    scope: scope.to_string(),
                    urls: row.get(1)?,
                    key: row.get(2)?,
                    options: row.get(3)?,
                    with_source_repo: row.get::<_, i64>(4)? != 0,
                })
            }))?;
            let mut repos = Vec::new();
            for row in rows {
                repos.push(db_err!(row)?);
            }
            Ok(repos)
        })
    }
}

/// Register the REGEXP and JSON_FROM_CSV SQL functions used by queries
/// and migration scripts.
fn register_functions(conn: &Connection) -> YboxResult<()> {
    db_err!(conn.create_scalar_function(
        "REGEXP",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let pattern: String = ctx.get(0)?;
            let value: String = ctx.get(1)?;
            let re = regex::Regex::new(&format!("\\A(?:{})\\z", pattern))
                .map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))?;
            Ok(re.is_match(&value) as i32)
        },
    ))?;
    db_err!(conn.create_scalar_function(
        "JSON_FROM_CSV",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let csv: String = ctx.get(0)?;
            let items: Vec<&str> = csv.split(',').collect();
            serde_json::to_string(&items)
                .map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))
        },
    ))?;
    Ok(())
}

fn table_exists(conn: &Connection, name: &str) -> YboxResult<bool> {
    let found: Option<String> = db_err!(conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![name],
            |row| row.get(0),
        )
        .optional())?;
    Ok(found.is_some())
}

/// Create the schema on an empty database or migrate an existing one
/// forward to the library version.
fn init_schema(conn: &Connection) -> YboxResult<()> {
    let current = migrate::SchemaVersion::parse(crate::VERSION)?;
    // the containers table exists in every released version, so its
    // absence means a fresh database
    if !table_exists(conn, "containers")? {
        let script = schema::expand_script("init.sql")?;
        conn.execute_batch(&script)
            .map_err(|e| YboxError::Schema(format!("schema creation failed: {}", e)))?;
        db_err!(conn.execute("INSERT INTO schema VALUES (?1)", params![crate::VERSION]))?;
        tracing::info!("initialized state database at schema version {}", crate::VERSION);
        return Ok(());
    }

    let old = if table_exists(conn, "schema")? {
        let version: String = db_err!(conn.query_row(
            "SELECT version FROM schema ORDER BY rowid DESC LIMIT 1",
            [],
            |row| row.get(0),
        ))?;
        migrate::SchemaVersion::parse(&version)?
    } else {
        // last version before versioning existed
        migrate::SchemaVersion::parse("0.9.0")?
    };
    if old == current {
        return Ok(());
    }

    for step in migrate::plan_migrations(&old, &current)? {
        tracing::info!("migrating state database {} -> {}", step.from, step.to);
        let expanded = schema::expand_text(step.script, "migrate")?;
        conn.execute_batch("BEGIN")
            .and_then(|_| conn.execute_batch(&expanded))
            .and_then(|_| {
                conn.execute(
                    "INSERT INTO schema VALUES (?1)",
                    params![step.to.to_string()],
                )
                .map(|_| ())
            })
            .and_then(|_| conn.execute_batch("COMMIT"))
            .map_err(|e| {
                let _ = conn.execute_batch("ROLLBACK");
                YboxError::Schema(format!(
                    "migration {} -> {} failed: {}",
                    step.from, step.to, e
                ))
            })?;
    }
    Ok(())
}

/// Execute a bundled `added/` snapshot script on a connection; used by
/// tests to produce databases of historical versions.
pub fn create_version_db(conn: &Connection, version: &str) -> YboxResult<()> {
    register_functions(conn)?;
    let script = schema::expand_script(&format!("added/{}-added.sql", version))?;
    conn.execute_batch(&script)
        .map_err(|e| YboxError::Schema(format!("creating {} database failed: {}", version, e)))?;
    Ok(())
}
