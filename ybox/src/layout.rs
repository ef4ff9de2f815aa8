//! Host filesystem layout for ybox data.
//!
//! All runtime data lives under `~/.local/share/ybox` (or
//! `$XDG_DATA_HOME/ybox`):
//!
//! ```text
//! ~/.local/share/ybox/
//! ├── state.db            SQLite state store
//! ├── state.db.lock       advisory lock for write transactions
//! ├── SHARED_ROOTS/
//! │   └── {distribution}/ shared /usr,/etc,/opt,/var trees
//! └── {container}/
//!     ├── home/           guest HOME (bind mounted)
//!     ├── logs/           engine log files
//!     ├── configs/        copies/links of host [configs] entries
//!     ├── scripts/        entrypoint scripts + manifests (mounted ro)
//!     └── status          single-line container status file
//! ```

use std::path::{Path, PathBuf};

use ybox_shared::constants;
use ybox_shared::errors::{YboxError, YboxResult};

use crate::env::Environ;

fn create_dir(path: &Path) -> YboxResult<()> {
    std::fs::create_dir_all(path)
        .map_err(|e| YboxError::Storage(format!("failed to create {}: {}", path.display(), e)))
}

/// Layout of the per-user ybox data directory.
#[derive(Debug, Clone)]
pub struct DataLayout {
    data_dir: PathBuf,
}

impl DataLayout {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    pub fn from_env(env: &Environ) -> Self {
        Self::new(env.data_dir().to_path_buf())
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// SQLite state database: `<data>/state.db`.
    pub fn state_db_path(&self) -> PathBuf {
        self.data_dir.join("state.db")
    }

    /// Sibling lock file guarding state database write transactions.
    pub fn state_db_lock_path(&self) -> PathBuf {
        self.data_dir.join("state.db.lock")
    }

    /// Root of all shared distribution trees.
    pub fn shared_roots_dir(&self) -> PathBuf {
        self.data_dir.join("SHARED_ROOTS")
    }

    /// Shared root tree for one distribution.
    pub fn shared_root_for(&self, distribution: &str) -> PathBuf {
        self.shared_roots_dir().join(distribution)
    }

    /// Lock file coordinating bootstrap and package mutations for one
    /// shared root. Lives next to the tree so it survives tree removal.
    pub fn shared_root_lock_path(&self, shared_root: &Path) -> PathBuf {
        let mut name = shared_root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "shared".to_string());
        name.push_str(".lock");
        shared_root
            .parent()
            .unwrap_or(Path::new("/"))
            .join(name)
    }

    /// Layout of a single container's data directory.
    pub fn container(&self, name: &str) -> ContainerLayout {
        ContainerLayout {
            root: self.data_dir.join(name),
            name: name.to_string(),
        }
    }

    pub fn prepare(&self) -> YboxResult<()> {
        create_dir(&self.data_dir)
    }
}

/// Per-container directories and files under `<data>/<container>`.
#[derive(Debug, Clone)]
pub struct ContainerLayout {
    root: PathBuf,
    name: String,
}

impl ContainerLayout {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Guest HOME directory, bind mounted over the container user home.
    pub fn home_dir(&self) -> PathBuf {
        self.root.join("home")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Host copies of `[configs]` entries, mounted into the container.
    pub fn configs_dir(&self) -> PathBuf {
        self.root.join("configs")
    }

    /// Entrypoint scripts and manifests, mounted read-only into the
    /// container at [`target_scripts_dir`](Self::target_scripts_dir).
    pub fn scripts_dir(&self) -> PathBuf {
        self.root.join("scripts")
    }

    /// Single-line status file written by the guest entrypoint.
    pub fn status_file(&self) -> PathBuf {
        self.root.join("status")
    }

    /// Manifest of `[configs]` actions consumed by the entrypoint.
    pub fn config_list(&self) -> PathBuf {
        self.scripts_dir().join("config.list")
    }

    /// Manifest of `[apps]` packages consumed by the entrypoint.
    pub fn app_list(&self) -> PathBuf {
        self.scripts_dir().join("app.list")
    }

    /// Manifest of `[startup]` commands consumed by the entrypoint.
    pub fn startup_list(&self) -> PathBuf {
        self.scripts_dir().join("startup.list")
    }

    /// Marker file telling the entrypoint that first-run initialization
    /// has completed.
    pub fn init_done_file(&self) -> PathBuf {
        self.scripts_dir().join(constants::INIT_DONE_FILE)
    }

    /// Mount point of the scripts directory inside the container,
    /// overridable through `YBOX_TARGET_SCRIPTS_DIR`.
    pub fn target_scripts_dir(&self) -> String {
        std::env::var("YBOX_TARGET_SCRIPTS_DIR")
            .unwrap_or_else(|_| constants::TARGET_SCRIPTS_DIR.to_string())
    }

    /// Mount point of the configs directory inside the container.
    pub fn target_configs_dir(&self, env: &Environ) -> String {
        format!("{}/{}/configs", env.target_data_dir(), self.name)
    }

    /// Image name for this container: per-container when standalone,
    /// per-distribution when the root is shared.
    pub fn image_name(&self, distribution: &str, has_shared_root: bool) -> String {
        if has_shared_root {
            format!("{}/{}", constants::SHARED_IMAGE_PREFIX, distribution)
        } else {
            format!(
                "{}/{}/{}",
                constants::IMAGE_PREFIX,
                distribution,
                self.name
            )
        }
    }

    /// Create the container directory tree.
    pub fn prepare(&self) -> YboxResult<()> {
        for dir in [
            self.root.clone(),
            self.home_dir(),
            self.logs_dir(),
            self.configs_dir(),
            self.scripts_dir(),
        ] {
            create_dir(&dir)?;
        }
        Ok(())
    }

    /// Remove everything below the container directory.
    pub fn cleanup(&self) -> YboxResult<()> {
        if self.root.exists() {
            std::fs::remove_dir_all(&self.root).map_err(|e| {
                YboxError::Storage(format!("failed to remove {}: {}", self.root.display(), e))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_paths() {
        let layout = DataLayout::new(PathBuf::from("/data/ybox"));
        assert_eq!(layout.state_db_path(), PathBuf::from("/data/ybox/state.db"));
        assert_eq!(
            layout.state_db_lock_path(),
            PathBuf::from("/data/ybox/state.db.lock")
        );
        assert_eq!(
            layout.shared_root_for("arch"),
            PathBuf::from("/data/ybox/SHARED_ROOTS/arch")
        );
        let lock = layout.shared_root_lock_path(&layout.shared_root_for("arch"));
        assert_eq!(lock, PathBuf::from("/data/ybox/SHARED_ROOTS/arch.lock"));
    }

    #[test]
    fn test_container_layout() {
        let layout = DataLayout::new(PathBuf::from("/data/ybox"));
        let cnt = layout.container("c1");
        assert_eq!(cnt.home_dir(), PathBuf::from("/data/ybox/c1/home"));
        assert_eq!(cnt.status_file(), PathBuf::from("/data/ybox/c1/status"));
        assert_eq!(cnt.config_list(), PathBuf::from("/data/ybox/c1/scripts/config.list"));
        assert_eq!(cnt.image_name("arch", true), "ybox-shared-local/arch");
        assert_eq!(cnt.image_name("arch", false), "ybox-local/arch/c1");
    }
}
