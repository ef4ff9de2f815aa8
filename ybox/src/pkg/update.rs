//! Update some or all packages of a container.

use ybox_shared::errors::YboxResult;

use crate::config::distro::PkgCmd;

use super::{run_template, templates, PkgContext};

/// Update the named packages (refreshing package metadata first) or,
/// with an empty list, everything in the container. Containers sharing
/// the same root see the same updates, so the caller is warned about
/// them.
pub fn update_packages(ctx: &PkgContext<'_>, packages: &[String], quiet: bool) -> YboxResult<()> {
    let _locks = ctx.acquire_mutation_locks()?;
    let quiet_flag = ctx.quiet_flag(quiet);

    let others = ctx
        .state
        .get_other_shared_containers(ctx.container(), &ctx.runtime.shared_root)?;
    if !others.is_empty() {
        tracing::warn!(
            "the operation will also update packages in containers sharing the same root: {}",
            others.join(", ")
        );
    }

    let cmd = if packages.is_empty() {
        templates::substitute(ctx.template(PkgCmd::UpdateAll)?, &[("quiet", quiet_flag)])
    } else {
        let update_meta = ctx.template(PkgCmd::UpdateMeta)?;
        let update = templates::substitute(
            ctx.template(PkgCmd::Update)?,
            &[("quiet", quiet_flag), ("packages", &packages.join(" "))],
        );
        format!("{{ {}; }} && {{ {}; }}", update_meta, update)
    };
    run_template(ctx.engine, ctx.container(), &cmd, "updating packages")
}
