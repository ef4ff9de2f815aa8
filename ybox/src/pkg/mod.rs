//! Distribution-agnostic package operations on a running container.
//!
//! Every operation interprets parametrized command templates from the
//! distribution's `[pkgmgr]` table (see [`crate::config::distro`]) and
//! records its effects in the state store. The locking discipline for
//! mutations is: state-DB lock, then the shared-root lock when the
//! container uses one, then engine operations.

pub mod clean;
pub mod info;
pub mod install;
pub mod list;
pub mod mark;
pub mod repair;
pub mod repo;
pub mod search;
pub mod templates;
pub mod uninstall;
pub mod update;

use std::time::Duration;

use ybox_shared::errors::{YboxError, YboxResult};

use crate::config::distro::{DistroConfig, PkgCmd};
use crate::engine::Engine;
use crate::env::Environ;
use crate::layout::DataLayout;
use crate::lock::{FileLock, LockMode};
use crate::state::{RuntimeConfiguration, StateStore};

/// Guards for a package mutation; fields drop in declaration order so
/// the shared-root lock releases before the state-DB lock.
pub struct MutationLocks {
    _shared_root: Option<FileLock>,
    _db: FileLock,
}

/// Everything a package operation needs about its target container.
pub struct PkgContext<'a> {
    pub env: &'a Environ,
    pub engine: &'a Engine,
    pub data: &'a DataLayout,
    pub distro: &'a DistroConfig,
    pub runtime: &'a RuntimeConfiguration,
    pub state: &'a StateStore,
    pub lock_timeout: Option<Duration>,
}

impl<'a> PkgContext<'a> {
    pub fn container(&self) -> &str {
        &self.runtime.name
    }

    /// Take the locks required for a package mutation: state-DB lock
    /// first, then the shared-root lock. The guard drops them in
    /// reverse order.
    pub fn acquire_mutation_locks(&self) -> YboxResult<MutationLocks> {
        let db = FileLock::acquire_mode(
            &self.data.state_db_lock_path(),
            self.lock_timeout,
            LockMode::Exclusive,
        )?;
        let shared_root = if self.runtime.shared_root.is_empty() {
            None
        } else {
            let lock_path = self
                .data
                .shared_root_lock_path(std::path::Path::new(&self.runtime.shared_root));
            Some(FileLock::acquire_mode(
                &lock_path,
                self.lock_timeout,
                LockMode::Exclusive,
            )?)
        };
        Ok(MutationLocks {
            _shared_root: shared_root,
            _db: db,
        })
    }

    /// Resolve a required template for this distribution.
    pub fn template(&self, cmd: PkgCmd) -> YboxResult<&str> {
        self.distro.pkgmgr(cmd)
    }

    /// The `{quiet}` substitution value for the given quiet setting.
    pub fn quiet_flag(&self, quiet: bool) -> &str {
        if quiet {
            self.distro.pkgmgr_opt(PkgCmd::QuietFlag)
        } else {
            ""
        }
    }
}

/// Run a `check_install`/`check_avail` style template for a package and
/// return the resolved package names it reported (possibly different
/// from the queried name for virtual packages or multiple providers).
pub fn check_package(
    engine: &Engine,
    container: &str,
    check_template: &str,
    package: &str,
) -> YboxResult<(bool, Vec<String>)> {
    let cmd = templates::substitute(check_template, &[("package", package)]);
    let result = engine.exec_capture(container, &cmd)?;
    let names: Vec<String> = result
        .stdout
        .lines()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect();
    Ok((result.success() && !names.is_empty(), names))
}

/// Run a formatted template inside the container, mapping a non-zero
/// exit to a package operation error tagged with `action`.
pub fn run_template(
    engine: &Engine,
    container: &str,
    cmd: &str,
    action: &str,
) -> YboxResult<()> {
    let code = engine.exec_shell(container, cmd, true)?;
    if code != 0 {
        return Err(YboxError::PackageOp(format!(
            "{} failed with exit code {}",
            action, code
        )));
    }
    Ok(())
}
