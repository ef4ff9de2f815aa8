use clap::Args;

use ybox::runtime::CreateOptions;

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Name of the container; default is ybox-<distribution>_<profile>
    #[arg(short, long)]
    pub name: Option<String>,

    /// Force ownership of orphaned packages on the same shared root
    /// even if the container configuration does not match
    #[arg(short = 'F', long)]
    pub force_own_orphans: bool,

    /// Short name of the distribution (as listed in
    /// distros/supported.list)
    pub distribution: Option<String>,

    /// Profile name in the profiles directory, or a path to an INI file
    pub profile: Option<String>,
}

pub fn execute(args: CreateArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let runtime = global.create_runtime()?;
    let opts = CreateOptions {
        name: args.name,
        distribution: args.distribution,
        profile: args.profile,
        quiet: global.quiet,
        force_own_orphans: args.force_own_orphans,
    };
    runtime.create(&opts)?;
    Ok(())
}
