//! Shared-root lifecycle: several containers of one distribution share
//! `/usr`, `/etc`, `/opt`, `/var` from a per-distribution host tree to
//! save disk and memory.
//!
//! The first container created for a distribution populates the tree:
//! a dedicated copy container mounts the tree at a secondary location
//! and copies the image's system directories into it before the final
//! container starts. Every container of the distribution then bind
//! mounts the populated tree; mutations are serialized by the per-root
//! lock rather than mount modes since in-container package operations
//! must write through the mounts.
//!
//! All bootstrap and package mutations on a shared root are serialized
//! through a per-root file lock; the locking discipline is always
//! state-DB lock first, then the shared-root lock, then engine
//! operations.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ybox_shared::constants;
use ybox_shared::errors::{YboxError, YboxResult};

use crate::engine::{BindMount, ContainerSpec, Engine};
use crate::env::Environ;
use crate::layout::DataLayout;
use crate::lock::FileLock;

/// Coordinates one distribution's shared root tree.
pub struct SharedRootManager<'a> {
    env: &'a Environ,
    engine: &'a Engine,
    data: &'a DataLayout,
    shared_root: PathBuf,
    shared_root_dirs: Vec<String>,
}

impl<'a> SharedRootManager<'a> {
    pub fn new(
        env: &'a Environ,
        engine: &'a Engine,
        data: &'a DataLayout,
        shared_root: &str,
        shared_root_dirs: Vec<String>,
    ) -> Self {
        Self {
            env,
            engine,
            data,
            shared_root: PathBuf::from(shared_root),
            shared_root_dirs,
        }
    }

    pub fn shared_root(&self) -> &Path {
        &self.shared_root
    }

    /// Acquire the per-shared-root lock. Must be taken after the
    /// state-DB lock and before any engine operation that mutates the
    /// tree.
    pub fn lock(&self, timeout: Option<Duration>) -> YboxResult<FileLock> {
        let lock_path = self.data.shared_root_lock_path(&self.shared_root);
        FileLock::acquire_mode(&lock_path, timeout, crate::lock::LockMode::Exclusive)
    }

    /// Whether the tree already contains every shared directory.
    pub fn is_populated(&self) -> bool {
        !self.shared_root_dirs.is_empty()
            && self.shared_root_dirs.iter().all(|dir| {
                self.shared_root
                    .join(dir.trim_start_matches('/'))
                    .is_dir()
            })
    }

    /// Directories of the tree that are missing.
    pub fn missing_dirs(&self) -> Vec<String> {
        self.shared_root_dirs
            .iter()
            .filter(|dir| !self.shared_root.join(dir.trim_start_matches('/')).is_dir())
            .cloned()
            .collect()
    }

    pub fn create_parent(&self) -> YboxResult<()> {
        if let Some(parent) = self.shared_root.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    /// Bind mounts for a final container using this shared root. The
    /// directories are mounted writable: package mutations run inside
    /// the container and must write the package database and installed
    /// files through these mounts. Write discipline comes from the
    /// shared-root lock, not the mount mode.
    pub fn container_mounts(&self) -> Vec<BindMount> {
        self.shared_root_dirs
            .iter()
            .map(|dir| {
                BindMount::new(format!("{}{}", self.shared_root.display(), dir), dir.clone())
            })
            .collect()
    }

    /// Bootstrap mounts for the first container of a distribution: the
    /// shared directories are written directly into the tree.
    pub fn bootstrap_mounts(&self) -> YboxResult<Vec<BindMount>> {
        let mut mounts = Vec::new();
        for dir in &self.shared_root_dirs {
            let host = self.shared_root.join(dir.trim_start_matches('/'));
            std::fs::create_dir_all(&host)?;
            mounts.push(BindMount::new(host.display().to_string(), dir.clone()));
        }
        Ok(mounts)
    }

    /// Run the dedicated copy container that copies the populated
    /// system directories of `image` into the shared root through the
    /// secondary mount. Used when the shared image exists but the tree
    /// (or part of it) is missing.
    pub fn run_copy_container(
        &self,
        image: &str,
        box_name: &str,
        scripts_dir: &Path,
        target_scripts_dir: &str,
    ) -> YboxResult<()> {
        std::fs::create_dir_all(&self.shared_root)?;
        let mut spec = ContainerSpec::new(image, box_name);
        spec.user = Some(0);
        spec.add_mount(BindMount::read_only(
            scripts_dir.display().to_string(),
            target_scripts_dir,
        ));
        spec.add_mount(BindMount::new(
            self.shared_root.display().to_string(),
            constants::SHARED_ROOT_MOUNT_DIR,
        ));
        spec.add_label(constants::CONTAINER_TYPE_LABEL, constants::CONTAINER_TYPE_COPY);
        spec.entrypoint = Some(format!("{}/{}", target_scripts_dir, constants::ENTRYPOINT_CP));
        spec.command = vec![
            self.shared_root_dirs.join(","),
            constants::SHARED_ROOT_MOUNT_DIR.to_string(),
        ];
        self.engine
            .run_foreground(&spec, "copying system directories to the shared root")?;
        self.engine.rm(box_name, false)
    }

    /// Delete a stale tree after the caller confirmed it is orphaned.
    /// Refuses while any live container still references the tree; the
    /// caller passes the referencing containers it knows about.
    pub fn remove_tree(&self, referencing_containers: &[String]) -> YboxResult<()> {
        if !referencing_containers.is_empty() {
            return Err(YboxError::InvalidState(format!(
                "shared root {} is still used by: {}",
                self.shared_root.display(),
                referencing_containers.join(", ")
            )));
        }
        if self.shared_root.exists() {
            std::fs::remove_dir_all(&self.shared_root).map_err(|e| {
                YboxError::Storage(format!(
                    "failed to remove shared root {}: {}",
                    self.shared_root.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    pub fn env(&self) -> &Environ {
        self.env
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use tempfile::TempDir;

    fn manager<'a>(
        env: &'a Environ,
        engine: &'a Engine,
        data: &'a DataLayout,
        root: &Path,
    ) -> SharedRootManager<'a> {
        SharedRootManager::new(
            env,
            engine,
            data,
            &root.display().to_string(),
            vec!["/etc".into(), "/usr".into(), "/var".into()],
        )
    }

    fn stub_env(dir: &Path) -> Environ {
        let engine = dir.join("podman");
        std::fs::write(&engine, "#!/bin/sh\necho podman version 4.9.0\n").unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&engine, std::fs::Permissions::from_mode(0o755)).unwrap();
        Environ::with_engine(engine).unwrap()
    }

    #[test]
    fn test_populated_detection() {
        let temp_dir = TempDir::new().unwrap();
        let env = stub_env(temp_dir.path());
        let engine = Engine::from_env(&env);
        let data = DataLayout::new(temp_dir.path().join("data"));
        let root = temp_dir.path().join("SHARED_ROOTS/arch");
        let mgr = manager(&env, &engine, &data, &root);

        assert!(!mgr.is_populated());
        assert_eq!(mgr.missing_dirs().len(), 3);
        for dir in ["etc", "usr", "var"] {
            std::fs::create_dir_all(root.join(dir)).unwrap();
        }
        assert!(mgr.is_populated());
        assert!(mgr.missing_dirs().is_empty());
    }

    #[test]
    fn test_container_mounts_cover_all_shared_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let env = stub_env(temp_dir.path());
        let engine = Engine::from_env(&env);
        let data = DataLayout::new(temp_dir.path().join("data"));
        let root = temp_dir.path().join("SHARED_ROOTS/arch");
        let mgr = manager(&env, &engine, &data, &root);

        let mounts = mgr.container_mounts();
        assert_eq!(mounts.len(), 3);
        let etc = mounts.iter().find(|m| m.guest == "/etc").unwrap();
        assert!(etc.host.ends_with("SHARED_ROOTS/arch/etc"));
        // mounts stay writable so in-container package mutations work;
        // the shared-root lock serializes writers
        assert!(mounts.iter().all(|m| m.mode.is_empty()));
    }

    #[test]
    fn test_remove_tree_guarded() {
        let temp_dir = TempDir::new().unwrap();
        let env = stub_env(temp_dir.path());
        let engine = Engine::from_env(&env);
        let data = DataLayout::new(temp_dir.path().join("data"));
        let root = temp_dir.path().join("SHARED_ROOTS/arch");
        std::fs::create_dir_all(&root).unwrap();
        let mgr = manager(&env, &engine, &data, &root);

        let err = mgr.remove_tree(&["c1".to_string()]).unwrap_err();
        assert!(matches!(err, YboxError::InvalidState(_)));
        mgr.remove_tree(&[]).unwrap();
        assert!(!root.exists());
    }
}
