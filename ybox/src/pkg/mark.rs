//! Mark a package as explicitly installed or as a dependency of
//! another package.

use std::collections::HashMap;

use ybox_shared::errors::{YboxError, YboxResult};

use crate::config::distro::PkgCmd;
use crate::state::{CopyType, DependencyType};

use super::{check_package, run_template, templates, PkgContext};

/// Mark `package` explicitly installed (`explicit = true`) or as an
/// optional dependency of `dependency_of`. Exactly one of the two must
/// be requested.
pub fn mark_package(
    ctx: &PkgContext<'_>,
    package: &str,
    explicit: bool,
    dependency_of: Option<&str>,
) -> YboxResult<()> {
    if explicit == dependency_of.is_some() {
        return Err(YboxError::Config(
            "exactly one of --explicit or --dependency-of must be specified".into(),
        ));
    }
    let _locks = ctx.acquire_mutation_locks()?;
    let container = ctx.container();
    let check_install = ctx.template(PkgCmd::CheckInstall)?;

    // both packages must exist; resolve their actual installed names
    let (installed, names) = check_package(ctx.engine, container, check_install, package)?;
    if !installed {
        return Err(YboxError::NotFound(format!(
            "package '{}' is not installed in container '{}'",
            package, container
        )));
    }
    let package = names[0].clone();

    if let Some(parent) = dependency_of {
        let (parent_installed, parent_names) =
            check_package(ctx.engine, container, check_install, parent)?;
        if !parent_installed {
            return Err(YboxError::NotFound(format!(
                "package '{}' is not installed in container '{}'",
                parent, container
            )));
        }
        let parent = parent_names[0].clone();
        tracing::info!("marking '{}' as an optional dependency of '{}'", package, parent);
        // make sure both have state rows, then record the edge; the
        // underlying package manager is deliberately not told since the
        // dependency may not exist in its metadata and auto-removal
        // could then orphan it
        let no_flags: HashMap<String, String> = HashMap::new();
        ctx.state
            .record_package(container, &parent, &[], CopyType::NONE, &no_flags, None, "", true)?;
        ctx.state.record_package(
            container,
            &package,
            &[],
            CopyType::NONE,
            &no_flags,
            Some(DependencyType::Optional),
            &parent,
            true,
        )?;
        return Ok(());
    }

    tracing::info!("marking '{}' as explicitly installed", package);
    let no_flags: HashMap<String, String> = HashMap::new();
    ctx.state
        .record_package(container, &package, &[], CopyType::NONE, &no_flags, None, "", true)?;
    // dropping all incoming edges is what makes it explicit for
    // reference counting
    ctx.state.remove_dependency(container, "%", &package)?;
    let mark_cmd = templates::substitute(
        ctx.template(PkgCmd::MarkExplicit)?,
        &[("package", &package)],
    );
    run_template(
        ctx.engine,
        container,
        &mark_cmd,
        &format!("marking '{}' as explicitly installed", package),
    )
}
