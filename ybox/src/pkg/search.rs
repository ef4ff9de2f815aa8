//! Search package repositories.

use ybox_shared::errors::YboxResult;

use crate::config::distro::PkgCmd;

use super::{run_template, templates, PkgContext};

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Search name and description instead of just the name.
    pub all: bool,
    /// Match at word boundaries (wraps terms with the distribution's
    /// word-anchor flags).
    pub word_boundary: bool,
    /// Restrict to official repositories where the distribution
    /// distinguishes them.
    pub official: bool,
}

/// Search the repositories for the given terms.
pub fn search_repositories(
    ctx: &PkgContext<'_>,
    terms: &[String],
    opts: &SearchOptions,
) -> YboxResult<()> {
    let template = if opts.all {
        ctx.template(PkgCmd::SearchAll)?
    } else {
        ctx.template(PkgCmd::Search)?
    };
    let official_flag = if opts.official {
        ctx.distro.pkgmgr_opt(PkgCmd::SearchOfficialFlag)
    } else {
        ""
    };
    let cmd = templates::substitute(template, &[("official", official_flag)]);

    let (word_start, word_end) = if opts.word_boundary {
        (
            ctx.distro.pkgmgr_opt(PkgCmd::SearchWordStartFlag),
            ctx.distro.pkgmgr_opt(PkgCmd::SearchWordEndFlag),
        )
    } else {
        ("", "")
    };
    let wrapped: Vec<String> = terms
        .iter()
        .map(|term| format!("'{}{}{}'", word_start, term, word_end))
        .collect();
    let full_cmd = format!("{} {}", cmd, wrapped.join(" "));
    run_template(ctx.engine, ctx.container(), &full_cmd, "searching repositories")
}
