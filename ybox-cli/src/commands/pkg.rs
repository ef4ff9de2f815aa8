use std::collections::HashMap;

use clap::{Args, Subcommand};

use ybox::pkg::{self, PkgContext};

#[derive(Args, Debug)]
pub struct PkgArgs {
    /// Name of the target container; can be omitted when only one
    /// container is registered
    #[arg(short = 'z', long = "ybox", global = true)]
    pub container: Option<String>,

    #[command(subcommand)]
    pub operation: PkgCommand,
}

#[derive(Subcommand, Debug)]
pub enum PkgCommand {
    /// Install a package with its optional dependencies
    Install {
        package: String,
        /// Comma-separated optional dependencies to install along
        #[arg(short, long, value_delimiter = ',')]
        with_opt_deps: Option<Vec<String>>,
        /// Skip the optional-dependency scan
        #[arg(short = 'O', long)]
        skip_opt_deps: bool,
        /// Do not create wrapper desktop files
        #[arg(short = 'D', long)]
        skip_desktop_files: bool,
        /// Do not create wrapper executables
        #[arg(short = 'E', long)]
        skip_executables: bool,
        /// Also create wrappers for installed optional dependencies
        #[arg(long)]
        add_dep_wrappers: bool,
        /// Extra flags per executable: `exe=flags,...` (use !p and !a
        /// for the program and its arguments)
        #[arg(long)]
        app_flags: Option<String>,
    },

    /// Uninstall a package and its orphaned dependencies
    Uninstall {
        package: String,
        /// Keep system configuration and data files of the package
        #[arg(short, long)]
        keep_config_files: bool,
        /// Keep orphaned dependencies installed
        #[arg(short = 'K', long)]
        keep_deps: bool,
    },

    /// Update packages (all of them when none are named)
    Update { packages: Vec<String> },

    /// List packages
    List {
        /// All packages known to the package manager
        #[arg(short, long)]
        all: bool,
        /// Include packages installed as optional dependencies
        #[arg(short = 'o', long)]
        with_optional: bool,
        /// Verbose listing with versions and descriptions
        #[arg(short, long)]
        verbose: bool,
    },

    /// List the files of an installed package
    ListFiles { package: String },

    /// Show package details
    Info {
        packages: Vec<String>,
        /// Include packages that are not installed
        #[arg(short, long)]
        all: bool,
    },

    /// Search the package repositories
    Search {
        terms: Vec<String>,
        /// Search names and descriptions
        #[arg(short, long)]
        all: bool,
        /// Match at word boundaries
        #[arg(short, long)]
        word: bool,
        /// Restrict to official repositories
        #[arg(short, long)]
        official: bool,
    },

    /// Mark a package as explicitly installed or as a dependency
    Mark {
        package: String,
        /// Mark as explicitly installed
        #[arg(short, long)]
        explicit: bool,
        /// Mark as an optional dependency of the given package
        #[arg(short, long)]
        dependency_of: Option<String>,
    },

    /// Clean package manager caches
    Clean,

    /// Show packages the package manager considers orphaned
    Orphans,

    /// Repair package state after a failed operation or interrupt
    Repair {
        /// Reinstall every tracked package and re-mark install state
        #[arg(long)]
        extensive: bool,
    },

    /// Register and enable an extra package repository
    RepoAdd {
        name: String,
        /// Server URL(s) of the repository
        #[arg(required = true)]
        urls: Vec<String>,
        /// Signing key URL or key ID
        #[arg(short, long)]
        key: Option<String>,
        /// Key server for key IDs
        #[arg(short = 'S', long)]
        key_server: Option<String>,
        /// Extra options recorded for the repository
        #[arg(short, long)]
        options: Option<String>,
        /// Also enable the source-code repository
        #[arg(short = 's', long)]
        add_source_repo: bool,
    },

    /// Disable and unregister an extra package repository
    RepoRemove {
        name: String,
        /// Also remove the signing key that was registered
        #[arg(short = 'K', long)]
        remove_key: bool,
    },

    /// List registered extra package repositories
    RepoList,
}

pub fn execute(args: PkgArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let runtime = global.create_runtime()?;
    let state = runtime.open_state()?;
    let runtime_conf = runtime.resolve_container(&state, args.container.as_deref())?;
    let distro = runtime.distro_for(&runtime_conf)?;
    let ctx = PkgContext {
        env: runtime.env(),
        engine: runtime.engine(),
        data: runtime.data(),
        distro: &distro,
        runtime: &runtime_conf,
        state: &state,
        lock_timeout: Some(std::time::Duration::from_secs(
            ybox_shared::constants::DEFAULT_LOCK_TIMEOUT_SECS,
        )),
    };
    dispatch(&ctx, args.operation, global.quiet)
}

fn dispatch(ctx: &PkgContext<'_>, operation: PkgCommand, quiet: bool) -> anyhow::Result<()> {
    match operation {
        PkgCommand::Install {
            package,
            with_opt_deps,
            skip_opt_deps,
            skip_desktop_files,
            skip_executables,
            add_dep_wrappers,
            app_flags,
        } => {
            let opts = pkg::install::InstallOptions {
                package,
                quiet,
                skip_opt_deps,
                with_opt_deps,
                skip_desktop_files,
                skip_executables,
                add_dep_wrappers,
                app_flags: parse_app_flags(app_flags.as_deref()),
            };
            pkg::install::install_package(ctx, &opts)?;
        }
        PkgCommand::Uninstall {
            package,
            keep_config_files,
            keep_deps,
        } => {
            let opts = pkg::uninstall::UninstallOptions {
                package,
                quiet,
                keep_config_files,
                skip_deps: keep_deps,
            };
            pkg::uninstall::uninstall_package(ctx, &opts)?;
        }
        PkgCommand::Update { packages } => pkg::update::update_packages(ctx, &packages, quiet)?,
        PkgCommand::List {
            all,
            with_optional,
            verbose,
        } => {
            let opts = pkg::list::ListOptions {
                all,
                with_optional,
                verbose,
            };
            for package in pkg::list::list_packages(ctx, &opts)? {
                println!("{}", package);
            }
        }
        PkgCommand::ListFiles { package } => pkg::list::list_files(ctx, &package)?,
        PkgCommand::Info { packages, all } => pkg::info::show_info(ctx, &packages, all)?,
        PkgCommand::Search {
            terms,
            all,
            word,
            official,
        } => {
            let opts = pkg::search::SearchOptions {
                all,
                word_boundary: word,
                official,
            };
            pkg::search::search_repositories(ctx, &terms, &opts)?;
        }
        PkgCommand::Mark {
            package,
            explicit,
            dependency_of,
        } => pkg::mark::mark_package(ctx, &package, explicit, dependency_of.as_deref())?,
        PkgCommand::Clean => pkg::clean::clean_cache(ctx, quiet)?,
        PkgCommand::Orphans => pkg::repair::list_orphans(ctx)?,
        PkgCommand::Repair { extensive } => {
            pkg::repair::repair_packages(ctx, extensive, quiet)?;
            if extensive {
                pkg::repair::regenerate_wrappers(ctx)?;
            }
        }
        PkgCommand::RepoAdd {
            name,
            urls,
            key,
            key_server,
            options,
            add_source_repo,
        } => {
            let opts = pkg::repo::RepoAddOptions {
                name,
                urls,
                key,
                key_server,
                options,
                add_source_repo,
            };
            pkg::repo::add_repository(ctx, &opts)?;
        }
        PkgCommand::RepoRemove { name, remove_key } => {
            pkg::repo::remove_repository(ctx, &name, remove_key)?;
        }
        PkgCommand::RepoList => {
            for repo in pkg::repo::list_repositories(ctx)? {
                let source = if repo.with_source_repo { " [source]" } else { "" };
                println!("{}\t{}{}", repo.name, repo.urls, source);
            }
        }
    }
    Ok(())
}

fn parse_app_flags(value: Option<&str>) -> HashMap<String, String> {
    let mut flags = HashMap::new();
    if let Some(value) = value {
        for part in value.split(',') {
            if let Some((exe, flag)) = part.split_once('=') {
                flags.insert(exe.trim().to_string(), flag.trim().to_string());
            }
        }
    }
    flags
}
