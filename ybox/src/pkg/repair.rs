//! Repair package state after failed operations, interrupts or stale
//! package manager processes and locks.

use ybox_shared::errors::{YboxError, YboxResult};

use crate::config::distro::PkgCmd;
use crate::engine::check_ybox_state;

use super::{install, run_template, templates, PkgContext};

/// Repair the container's package state: kill stale package-manager
/// processes and remove leftover locks across every active container on
/// the same shared root, then run the distribution's repair command.
/// `extensive` uses `repair_all` which reinstalls every tracked package
/// and re-marks explicit/dependency state.
pub fn repair_packages(ctx: &PkgContext<'_>, extensive: bool, quiet: bool) -> YboxResult<()> {
    let _locks = ctx.acquire_mutation_locks()?;

    // every active container on the shared root contends on the same
    // package database, so all of them are checked
    let containers = if ctx.runtime.shared_root.is_empty() {
        vec![ctx.container().to_string()]
    } else {
        let mut all = ctx
            .state
            .get_containers(None, Some(&ctx.runtime.shared_root))?;
        all.retain(|c| {
            check_ybox_state(ctx.engine, c, &["running"]).unwrap_or(false)
        });
        if all.is_empty() {
            all.push(ctx.container().to_string());
        }
        all
    };
    for container in &containers {
        tracing::info!("checking for stale package manager state in '{}'", container);
        install::kill_stale_processes(ctx, container);
        install::remove_stale_locks(ctx, container);
    }

    let template = if extensive {
        ctx.template(PkgCmd::RepairAll)?
    } else {
        ctx.template(PkgCmd::Repair)?
    };
    let cmd = templates::substitute(template, &[("quiet", ctx.quiet_flag(quiet))]);
    run_template(ctx.engine, ctx.container(), &cmd, "repairing packages")?;

    // replay explicit marks from the state store: it is authoritative
    // for what the user asked for, which a reinstall may have reset
    if extensive {
        let explicit = ctx.state.list_packages(
            ctx.container(),
            &crate::state::PackageFilter {
                explicit_only: true,
                ..Default::default()
            },
        )?;
        if let Ok(mark_tmpl) = ctx.template(PkgCmd::MarkExplicit) {
            for package in &explicit {
                let mark_cmd = templates::substitute(mark_tmpl, &[("package", package)]);
                if let Err(err) =
                    run_template(ctx.engine, ctx.container(), &mark_cmd, "re-marking package")
                {
                    tracing::warn!("could not re-mark '{}' as explicit: {}", package, err);
                }
            }
        }
    }

    // restart the affected containers so upgraded system libraries take
    // effect cleanly
    for container in &containers {
        tracing::info!("restarting container '{}'", container);
        if let Err(err) = ctx.engine.stop(container, 10) {
            tracing::warn!("stop of '{}' failed: {}", container, err);
            continue;
        }
        std::thread::sleep(std::time::Duration::from_secs(2));
        ctx.engine.start(container)?;
    }
    Ok(())
}

/// Regenerate wrappers for tracked packages after a repair, driven by
/// each package's recorded wrapper mask.
pub fn regenerate_wrappers(ctx: &PkgContext<'_>) -> YboxResult<()> {
    let packages = ctx
        .state
        .list_packages(ctx.container(), &Default::default())?;
    for package in &packages {
        let Some((copy_type, flags)) = ctx
            .state
            .get_package_wrapper_info(ctx.container(), package)?
        else {
            continue;
        };
        if copy_type.is_empty() {
            continue;
        }
        let local_copies = install::materialize_wrappers(ctx, package, copy_type, &flags)?;
        ctx.state.record_package(
            ctx.container(),
            package,
            &local_copies,
            copy_type,
            &flags,
            None,
            "",
            false,
        )?;
    }
    Ok(())
}

/// Print packages the package manager considers orphaned (installed as
/// dependencies with no dependent left).
pub fn list_orphans(ctx: &PkgContext<'_>) -> YboxResult<()> {
    let cmd = ctx.template(PkgCmd::Orphans)?;
    match run_template(ctx.engine, ctx.container(), cmd, "listing orphans") {
        // some package managers exit non-zero when there are no orphans
        Err(YboxError::PackageOp(_)) => Ok(()),
        other => other,
    }
}
