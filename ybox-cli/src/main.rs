mod cli;
mod commands;

use std::process;

use clap::Parser;
use cli::Cli;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() {
    let cli = Cli::parse();

    let level = if cli.global.debug { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().without_time().with_target(false).with_writer(std::io::stderr))
        .init();

    // locks held by guards release through the error path on SIGINT
    ybox::interrupt::install_handlers();

    let result = match cli.command {
        cli::Commands::Create(args) => commands::create::execute(args, &cli.global),
        cli::Commands::Destroy(args) => commands::destroy::execute(args, &cli.global),
        cli::Commands::Ls(args) => commands::ls::execute(args, &cli.global),
        cli::Commands::Logs(args) => commands::logs::execute(args, &cli.global),
        cli::Commands::Control(args) => commands::control::execute(args, &cli.global),
        cli::Commands::Cmd(args) => commands::cmd::execute(args, &cli.global),
        cli::Commands::Pkg(args) => commands::pkg::execute(args, &cli.global),
    };

    if let Err(error) = result {
        eprintln!("Error: {:#}", error);
        let code = error
            .downcast_ref::<ybox::YboxError>()
            .map(|e| e.exit_code())
            .unwrap_or(1);
        process::exit(code);
    }
}
