//! Show package details.

use ybox_shared::errors::YboxResult;

use crate::config::distro::PkgCmd;

use super::{run_template, PkgContext};

/// Show details of the given packages: installed ones by default, any
/// available package with `all`.
pub fn show_info(ctx: &PkgContext<'_>, packages: &[String], all: bool) -> YboxResult<()> {
    let template = if all {
        ctx.template(PkgCmd::InfoAll)?
    } else {
        ctx.template(PkgCmd::Info)?
    };
    let cmd = format!("{} {}", template, packages.join(" "));
    run_template(ctx.engine, ctx.container(), &cmd, "showing package information")
}
