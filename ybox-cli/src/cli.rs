//! CLI definition and argument parsing for the `ybox` binary.

use clap::{Args, Parser, Subcommand};

use ybox::YboxRuntime;

#[derive(Parser, Debug)]
#[command(
    name = "ybox",
    author,
    version,
    about = "Secure application sandboxes backed by rootless podman/docker containers"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalFlags,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create and initialize a new container from a profile
    Create(crate::commands::create::CreateArgs),

    /// Stop and remove a container, clearing its state
    Destroy(crate::commands::destroy::DestroyArgs),

    /// List ybox containers
    Ls(crate::commands::ls::LsArgs),

    /// Show the logs of a container
    Logs(crate::commands::logs::LogsArgs),

    /// Start, stop, restart a container or show its status
    Control(crate::commands::control::ControlArgs),

    /// Run a command (default: a login shell) in a running container
    Cmd(crate::commands::cmd::CmdArgs),

    /// Manage packages in a container
    Pkg(crate::commands::pkg::PkgArgs),
}

#[derive(Args, Debug, Clone)]
pub struct GlobalFlags {
    /// Proceed without questions, using defaults where possible
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable debug output
    #[arg(long, global = true)]
    pub debug: bool,
}

impl GlobalFlags {
    pub fn create_runtime(&self) -> anyhow::Result<YboxRuntime> {
        YboxRuntime::new().map_err(Into::into)
    }
}
