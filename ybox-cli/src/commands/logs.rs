use clap::Args;

#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Follow the log output
    #[arg(short, long)]
    pub follow: bool,

    /// Name of the container
    pub container: String,
}

pub fn execute(args: LogsArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let runtime = global.create_runtime()?;
    runtime.logs(&args.container, args.follow)?;
    Ok(())
}
