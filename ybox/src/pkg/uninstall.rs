//! Package uninstallation: the reverse of install, with
//! reference-counted removal of orphaned dependencies.

use ybox_shared::errors::{YboxError, YboxResult};

use crate::config::distro::PkgCmd;
use crate::wrapper;

use super::{check_package, templates, PkgContext};

#[derive(Debug, Clone, Default)]
pub struct UninstallOptions {
    pub package: String,
    pub quiet: bool,
    /// Keep system configuration/data files of the package (skips the
    /// `{purge}` flag).
    pub keep_config_files: bool,
    /// Do not uninstall orphaned dependencies.
    pub skip_deps: bool,
}

/// Uninstall a package: remove its wrappers, run the distribution
/// uninstall template, then uninstall every dependency whose reference
/// count dropped to zero (unless it was marked explicitly installed).
pub fn uninstall_package(ctx: &PkgContext<'_>, opts: &UninstallOptions) -> YboxResult<()> {
    let _locks = ctx.acquire_mutation_locks()?;

    let quiet_flag = ctx.quiet_flag(opts.quiet);
    let purge_flag = if opts.keep_config_files {
        ""
    } else {
        ctx.distro.pkgmgr_opt(PkgCmd::PurgeFlag)
    };
    let remove_deps_flag = if opts.skip_deps {
        ""
    } else {
        ctx.distro.pkgmgr_opt(PkgCmd::RemoveDepsFlag)
    };
    let uninstall_tmpl = ctx.template(PkgCmd::Uninstall)?;

    uninstall_inner(
        ctx,
        &opts.package,
        uninstall_tmpl,
        quiet_flag,
        purge_flag,
        remove_deps_flag,
        opts.skip_deps,
        false,
    )
}

#[allow(clippy::too_many_arguments)]
fn uninstall_inner(
    ctx: &PkgContext<'_>,
    package: &str,
    uninstall_tmpl: &str,
    quiet_flag: &str,
    purge_flag: &str,
    remove_deps_flag: &str,
    skip_deps: bool,
    is_dep: bool,
) -> YboxResult<()> {
    let container = ctx.container();
    let check_install = ctx.template(PkgCmd::CheckInstall)?;
    let (installed, names) = check_package(ctx.engine, container, check_install, package)?;
    let mut package = package.to_string();
    let mut code = 0;
    if installed {
        package = names[0].clone();
        let verb = if is_dep { "dependency " } else { "" };
        tracing::info!("uninstalling {}'{}' from '{}'", verb, package, container);
        // purge and remove-deps only apply while no other package still
        // references this one
        let refcount = ctx.state.dependency_refcount(container, &package)?;
        let (purge, remove_deps) = if refcount > 0 {
            ("", "")
        } else {
            (purge_flag, remove_deps_flag)
        };
        let cmd = templates::substitute(
            uninstall_tmpl,
            &[
                ("quiet", quiet_flag),
                ("purge", purge),
                ("remove_deps", remove_deps),
                ("package", &package),
            ],
        );
        code = ctx.engine.exec_shell(container, &cmd, true)?;
    } else if !is_dep {
        // a dependency may already be gone from the original uninstall;
        // a directly requested package should exist
        tracing::warn!(
            "package '{}' is not installed in container '{}', clearing state only",
            package,
            container
        );
    }
    if code != 0 {
        return Err(YboxError::PackageOp(format!(
            "uninstalling '{}' failed with exit code {}",
            package, code
        )));
    }

    let (orphans, wrappers) =
        ctx.state
            .remove_package(container, &package, &ctx.runtime.shared_root)?;
    wrapper::remove_wrappers(&wrappers);
    if !skip_deps && !orphans.is_empty() {
        let names: Vec<&str> = orphans.iter().map(|(name, _)| name.as_str()).collect();
        tracing::info!("uninstalling orphaned dependencies of '{}': {:?}", package, names);
        for (orphan, _) in &orphans {
            uninstall_inner(
                ctx,
                orphan,
                uninstall_tmpl,
                quiet_flag,
                purge_flag,
                remove_deps_flag,
                skip_deps,
                true,
            )?;
        }
    }
    Ok(())
}
