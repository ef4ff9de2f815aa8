use clap::Args;

#[derive(Args, Debug)]
pub struct CmdArgs {
    /// Name of the container
    pub container: String,

    /// Command to run (defaults to a login shell)
    #[arg(trailing_var_arg = true)]
    pub command: Vec<String>,
}

pub fn execute(args: CmdArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let runtime = global.create_runtime()?;
    let code = runtime.run_cmd(&args.container, &args.command)?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
