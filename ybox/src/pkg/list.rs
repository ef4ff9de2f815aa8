//! List packages of a container, from the state store or from the
//! underlying package manager.

use ybox_shared::errors::YboxResult;

use crate::config::distro::PkgCmd;
use crate::state::PackageFilter;

use super::{run_template, templates, PkgContext};

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Include every package known to the package manager, not only the
    /// ones installed through ybox.
    pub all: bool,
    /// Also show packages installed as optional dependencies.
    pub with_optional: bool,
    /// Long output with versions and descriptions (delegates to the
    /// package manager's verbose listing).
    pub verbose: bool,
}

/// List container packages. The short forms come from the state store
/// (what ybox manages); `--all`/`--verbose` delegate to the package
/// manager templates for the full picture.
pub fn list_packages(ctx: &PkgContext<'_>, opts: &ListOptions) -> YboxResult<Vec<String>> {
    if opts.all || opts.verbose {
        let cmd = match (opts.all, opts.verbose) {
            (true, true) => ctx.template(PkgCmd::ListAllLong)?,
            (true, false) => ctx.template(PkgCmd::ListAll)?,
            (false, true) => ctx.template(PkgCmd::ListLong)?,
            (false, false) => unreachable!(),
        };
        run_template(ctx.engine, ctx.container(), cmd, "listing packages")?;
        return Ok(Vec::new());
    }

    let filter = if opts.with_optional {
        PackageFilter::default()
    } else {
        PackageFilter {
            explicit_only: true,
            ..Default::default()
        }
    };
    ctx.state.list_packages(ctx.container(), &filter)
}

/// Print the files belonging to an installed package.
pub fn list_files(ctx: &PkgContext<'_>, package: &str) -> YboxResult<()> {
    let cmd = templates::substitute(ctx.template(PkgCmd::ListFiles)?, &[("package", package)]);
    run_template(
        ctx.engine,
        ctx.container(),
        &cmd,
        &format!("listing files of '{}'", package),
    )
}
