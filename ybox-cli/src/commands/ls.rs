use clap::Args;

#[derive(Args, Debug)]
pub struct LsArgs {
    /// Also show stopped containers
    #[arg(short, long)]
    pub all: bool,

    /// Engine format template for the listing
    #[arg(short, long)]
    pub format: Option<String>,
}

pub fn execute(args: LsArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let runtime = global.create_runtime()?;
    let listing = runtime.list(args.all, args.format.as_deref())?;
    print!("{}", listing);
    Ok(())
}
