use clap::Args;

#[derive(Args, Debug)]
pub struct DestroyArgs {
    /// Force removal of a running container (SIGKILL if required)
    #[arg(short, long)]
    pub force: bool,

    /// Name of the container to destroy
    pub container: String,
}

pub fn execute(args: DestroyArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let runtime = global.create_runtime()?;
    runtime.destroy(&args.container, args.force)?;
    Ok(())
}
