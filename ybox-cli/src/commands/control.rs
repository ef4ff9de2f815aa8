use clap::{Args, Subcommand};

use ybox::runtime::ControlAction;

#[derive(Args, Debug)]
pub struct ControlArgs {
    #[command(subcommand)]
    pub action: ControlCommand,
}

#[derive(Subcommand, Debug)]
pub enum ControlCommand {
    /// Start a stopped container and wait for it to be ready
    Start { container: String },
    /// Stop a running container
    Stop { container: String },
    /// Restart a container
    Restart { container: String },
    /// Show the effective status of a container
    Status { container: String },
}

pub fn execute(args: ControlArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let runtime = global.create_runtime()?;
    let (container, action) = match &args.action {
        ControlCommand::Start { container } => (container, ControlAction::Start),
        ControlCommand::Stop { container } => (container, ControlAction::Stop),
        ControlCommand::Restart { container } => (container, ControlAction::Restart),
        ControlCommand::Status { container } => (container, ControlAction::Status),
    };
    let result = runtime.control(container, action)?;
    println!("{}", result);
    Ok(())
}
