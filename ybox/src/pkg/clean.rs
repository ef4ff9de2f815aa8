//! Clean the package manager caches of a container.

use ybox_shared::errors::YboxResult;

use crate::config::distro::PkgCmd;

use super::{run_template, PkgContext};

/// Run the distribution's cache cleanup; `quiet` uses the
/// no-questions-asked variant.
pub fn clean_cache(ctx: &PkgContext<'_>, quiet: bool) -> YboxResult<()> {
    let cmd = if quiet {
        ctx.template(PkgCmd::CleanQuiet)?
    } else {
        ctx.template(PkgCmd::Clean)?
    };
    run_template(ctx.engine, ctx.container(), cmd, "cleaning package cache")
}
