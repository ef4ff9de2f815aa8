//! Two-phase package installation with optional-dependency handling
//! and host wrapper materialization.

use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::process::Stdio;

use ybox_shared::constants;
use ybox_shared::errors::{YboxError, YboxResult};

use crate::config::distro::PkgCmd;
use crate::state::{CopyType, DependencyType};
use crate::wrapper::WrapperGenerator;

use super::{check_package, templates, PkgContext};

/// Output phrases that mark a failure as transient (another package
/// manager holding its lock, or a flaky mirror) rather than permanent.
const TRANSIENT_MARKERS: &[&str] = &[
    "unable to lock database",
    "could not get lock",
    "could not lock",
    "db.lck",
    "temporary failure",
    "connection timed out",
    "connection reset",
];

/// An optional dependency reported by the distribution's `opt_deps`
/// helper.
#[derive(Debug, Clone)]
pub struct OptionalDep {
    pub name: String,
    pub description: String,
    /// 1 for an immediate dependency, 2 for a dependency of a new
    /// required dependency.
    pub level: u32,
}

#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    pub package: String,
    pub quiet: bool,
    /// Skip the optional-dependency scan entirely.
    pub skip_opt_deps: bool,
    /// Pre-selected optional dependencies (`--with-opt-deps`); when
    /// unset no optional dependencies are chosen (non-interactive).
    pub with_opt_deps: Option<Vec<String>>,
    pub skip_desktop_files: bool,
    pub skip_executables: bool,
    /// Also create wrappers for installed optional dependencies.
    pub add_dep_wrappers: bool,
    /// Extra per-executable argv fragments (`--app-flags exe=flags,..`).
    pub app_flags: HashMap<String, String>,
}

/// Install a package in the container per the documented algorithm:
/// take the state-DB and shared-root locks, skip the engine install
/// when the package is already present, retry once on transient
/// failures after clearing stale package-manager processes and locks,
/// resolve optional dependencies, materialize wrappers and durably
/// record everything before reporting success.
pub fn install_package(ctx: &PkgContext<'_>, opts: &InstallOptions) -> YboxResult<()> {
    let _locks = ctx.acquire_mutation_locks()?;
    install_inner(ctx, opts, &opts.package, None)
}

fn install_inner(
    ctx: &PkgContext<'_>,
    opts: &InstallOptions,
    package: &str,
    dep_of: Option<&str>,
) -> YboxResult<()> {
    let container = ctx.container();
    let check_install = ctx.template(PkgCmd::CheckInstall)?;
    let is_dep = dep_of.is_some();

    // resolve the actual package name; virtual packages and providers
    // report the installed/available name
    let (mut installed, inst_names) = check_package(ctx.engine, container, check_install, package)?;
    let mut package = package.to_string();
    if installed {
        package = inst_names[0].clone();
        if !opts.quiet {
            tracing::info!("'{}' is already installed in '{}'", package, container);
        }
    } else if let Ok(check_avail) = ctx.template(PkgCmd::CheckAvail) {
        let (available, avail_names) = check_package(ctx.engine, container, check_avail, &package)?;
        if available && avail_names.len() > 1 {
            // non-interactive: take the first provider
            tracing::info!(
                "multiple packages provide '{}', selecting '{}'",
                package,
                avail_names[0]
            );
            package = avail_names[0].clone();
        }
    }

    if !installed {
        let install_tmpl = ctx.template(PkgCmd::Install)?;
        let opt_dep_flag = if is_dep {
            ctx.distro.pkgmgr_opt(PkgCmd::OptDepFlag)
        } else {
            ""
        };
        let install_cmd = templates::substitute(
            install_tmpl,
            &[("quiet", ctx.quiet_flag(opts.quiet)), ("opt_dep", opt_dep_flag)],
        );
        let full_cmd = format!("{} {}", install_cmd, package);
        tracing::info!("installing '{}' in '{}'", package, container);
        if let Err(err) = run_install_command(ctx, &full_cmd, &package) {
            return Err(err);
        }
        // confirm and pick up the real installed name
        let (ok, names) = check_package(ctx.engine, container, check_install, &package)?;
        if !ok {
            return Err(YboxError::PackageOp(format!(
                "package '{}' was not installed successfully",
                package
            )));
        }
        package = names[0].clone();
        installed = true;
    }
    debug_assert!(installed);

    // wrapper mask: dependencies only get wrappers when asked for
    let mut copy_type = CopyType::NONE;
    if !is_dep || opts.add_dep_wrappers {
        if !opts.skip_desktop_files {
            copy_type |= CopyType::DESKTOP;
        }
        if !opts.skip_executables {
            copy_type |= CopyType::EXECUTABLE;
        }
    }
    let local_copies = materialize_wrappers(ctx, &package, copy_type, &opts.app_flags)?;

    let (dep_type, dep_parent) = match dep_of {
        Some(parent) => (Some(DependencyType::Optional), parent),
        None => (None, ""),
    };
    if let Err(err) = ctx.state.record_package(
        container,
        &package,
        &local_copies,
        copy_type,
        &opts.app_flags,
        dep_type,
        dep_parent,
        false,
    ) {
        // never advertise wrappers whose package row was not committed
        crate::wrapper::remove_wrappers(&local_copies);
        return Err(err);
    }

    // scan for optional dependencies only at the top level; recursion
    // would be overwhelming beyond level 2 which the helper reports
    if is_dep || (opts.skip_opt_deps && opts.with_opt_deps.is_none()) {
        return Ok(());
    }
    let (optional_deps, installed_deps) = query_optional_deps(ctx, &package)?;
    // dependencies already installed by the package manager get edges
    // recorded so reference counting sees them
    let recorded = ctx.state.check_packages(container, &installed_deps)?;
    for dep in recorded {
        ctx.state
            .record_dependency(container, &package, &dep, DependencyType::Optional)?;
    }
    let selected: Vec<String> = match &opts.with_opt_deps {
        Some(selection) => selection.clone(),
        // non-interactive mode selects none
        None => Vec::new(),
    };
    for dep in &selected {
        if !optional_deps.iter().any(|d| &d.name == dep) {
            tracing::warn!(
                "'{}' is not among the reported optional dependencies of '{}'",
                dep,
                package
            );
        }
        install_inner(ctx, opts, dep, Some(&package))?;
    }
    Ok(())
}

/// Run the install command, retrying once when the failure looks
/// transient after killing stale package-manager processes and removing
/// leftover lock files.
fn run_install_command(ctx: &PkgContext<'_>, cmd: &str, package: &str) -> YboxResult<()> {
    let result = ctx.engine.exec_capture(ctx.container(), cmd)?;
    if result.success() {
        print!("{}", result.stdout);
        return Ok(());
    }
    let combined = format!("{}\n{}", result.stdout, result.stderr).to_lowercase();
    let transient = TRANSIENT_MARKERS.iter().any(|m| combined.contains(m));
    if !transient {
        eprint!("{}", result.stderr);
        return Err(YboxError::PackageOp(format!(
            "installing '{}' failed with exit code {}",
            package, result.code
        )));
    }

    tracing::warn!(
        "transient failure installing '{}', clearing stale state and retrying once",
        package
    );
    kill_stale_processes(ctx, ctx.container());
    remove_stale_locks(ctx, ctx.container());
    let retry = ctx.engine.exec_capture(ctx.container(), cmd)?;
    if retry.success() {
        print!("{}", retry.stdout);
        Ok(())
    } else {
        eprint!("{}", retry.stderr);
        Err(YboxError::PackageOp(format!(
            "installing '{}' failed again after retry (exit code {})",
            package, retry.code
        )))
    }
}

/// Kill processes inside the container matching the distribution's
/// `processes_pattern`. Failures are logged, not fatal: the retry will
/// surface anything that is still wedged.
pub(crate) fn kill_stale_processes(ctx: &PkgContext<'_>, container: &str) {
    let pattern = ctx.distro.pkgmgr_opt(PkgCmd::ProcessesPattern);
    if pattern.is_empty() {
        return;
    }
    let pgrep = match ctx
        .engine
        .exec_argv_capture(container, &["/usr/bin/pgrep", "-f", pattern])
    {
        Ok(result) if result.success() => result.stdout,
        _ => return,
    };
    let pids: Vec<&str> = pgrep.split_whitespace().collect();
    if pids.is_empty() {
        return;
    }
    tracing::warn!("killing stale package manager processes {:?} in '{}'", pids, container);
    for sig in ["-INT", "-TERM", "-KILL"] {
        let mut argv = vec!["/usr/bin/sudo", "/bin/kill", sig];
        argv.extend(pids.iter().copied());
        let _ = ctx.engine.exec_argv_capture(container, &argv);
        std::thread::sleep(std::time::Duration::from_secs(2));
        match ctx
            .engine
            .exec_argv_capture(container, &["/usr/bin/pgrep", "-f", pattern])
        {
            Ok(result) if result.success() && !result.stdout.trim().is_empty() => continue,
            _ => break,
        }
    }
}

/// Remove stale package manager lock files matching `locks_pattern`.
pub(crate) fn remove_stale_locks(ctx: &PkgContext<'_>, container: &str) {
    let pattern = ctx.distro.pkgmgr_opt(PkgCmd::LocksPattern);
    if pattern.is_empty() {
        return;
    }
    let ls_cmd = format!("/bin/ls {} 2>/dev/null", pattern.replace(',', " "));
    let locks = match ctx.engine.exec_capture(container, &ls_cmd) {
        Ok(result) => result.stdout,
        Err(_) => return,
    };
    let files: Vec<&str> = locks.split_whitespace().collect();
    if files.is_empty() {
        return;
    }
    tracing::warn!("removing stale lock file(s) {:?} in '{}'", files, container);
    let mut argv = vec!["/usr/bin/sudo", "/bin/rm", "-f"];
    argv.extend(files.iter().copied());
    let _ = ctx.engine.exec_argv_capture(container, &argv);
}

/// Run the `opt_deps` helper and parse its machine-readable tail.
///
/// The output format is fixed: informational lines (shown to the user
/// as they arrive) up to a header line, then one line per dependency:
/// `{prefix}<name>{sep}<level>{sep}<installed>{sep}<description>`.
/// Returns the not-yet-installed dependencies and the names of already
/// installed ones.
pub fn query_optional_deps(
    ctx: &PkgContext<'_>,
    package: &str,
) -> YboxResult<(Vec<OptionalDep>, Vec<String>)> {
    let template = match ctx.template(PkgCmd::OptDeps) {
        Ok(t) => t,
        Err(_) => return Ok((Vec::new(), Vec::new())),
    };
    let cmd = templates::substitute(
        template,
        &[
            ("separator", constants::FIELD_SEPARATOR),
            ("prefix", constants::OPT_DEPS_PREFIX),
            ("header", constants::OPT_DEPS_HEADER),
        ],
    );
    let mut child = ctx
        .engine
        .exec_command(ctx.container(), &format!("{} {}", cmd, package), false)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| YboxError::Engine(format!("failed to run opt_deps helper: {}", e)))?;

    let mut optional_deps = Vec::new();
    let mut installed = Vec::new();
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| YboxError::Internal("no stdout from opt_deps helper".into()))?;
    let mut seen_header = false;
    for line in BufReader::new(stdout).lines() {
        let line = line?;
        if !seen_header {
            if line.trim() == constants::OPT_DEPS_HEADER {
                seen_header = true;
            } else {
                // progress output from the underlying package manager
                println!("{}", line);
            }
            continue;
        }
        let Some(rest) = line.strip_prefix(constants::OPT_DEPS_PREFIX) else {
            continue;
        };
        let fields: Vec<&str> = rest.splitn(4, constants::FIELD_SEPARATOR).collect();
        if fields.len() < 4 {
            tracing::warn!("malformed opt_deps line: {}", line);
            continue;
        }
        let level: u32 = fields[1].trim().parse().unwrap_or(1);
        if fields[2].trim().eq_ignore_ascii_case("true") {
            installed.push(fields[0].to_string());
        } else {
            optional_deps.push(OptionalDep {
                name: fields[0].to_string(),
                description: fields[3].trim().to_string(),
                level,
            });
        }
    }
    let status = child
        .wait()
        .map_err(|e| YboxError::Engine(format!("waiting for opt_deps helper: {}", e)))?;
    if !status.success() {
        tracing::warn!(
            "failed to determine optional dependencies of '{}'; skipping them",
            package
        );
        return Ok((Vec::new(), installed));
    }
    Ok((optional_deps, installed))
}

/// List the files of an installed package and create the requested host
/// wrappers for them.
pub fn materialize_wrappers(
    ctx: &PkgContext<'_>,
    package: &str,
    copy_type: CopyType,
    app_flags: &HashMap<String, String>,
) -> YboxResult<Vec<String>> {
    if copy_type.is_empty() {
        return Ok(Vec::new());
    }
    let list_files = ctx.template(PkgCmd::ListFiles)?;
    let cmd = templates::substitute(list_files, &[("package", package)]);
    let result = ctx.engine.exec_capture(ctx.container(), &cmd)?;
    if !result.success() {
        // do not fail the installation over wrappers
        tracing::warn!("listing files of '{}' failed: {}", package, result.stderr.trim());
        return Ok(Vec::new());
    }
    let files: Vec<String> = result.stdout.lines().map(str::to_string).collect();

    // merge profile [app_flags] entries under the explicit ones
    let mut merged_flags = app_flags.clone();
    if let Ok(profile) = crate::config::ini::IniDocument::parse(
        &ctx.runtime.ini_config,
        "recorded configuration",
    ) {
        if let Some(section) = profile.section("app_flags") {
            for (key, value) in section.entries() {
                merged_flags
                    .entry(key.to_string())
                    .or_insert_with(|| value.to_string());
            }
        }
    }

    let generator = WrapperGenerator::new(ctx.env, ctx.engine, ctx.container());
    let mut created =
        generator.generate(copy_type, &merged_flags, &files, &ctx.runtime.shared_root)?;
    // every recorded wrapper path must lie under a known wrapper
    // directory (applications, bin, man)
    created.retain(|path| {
        let known = crate::wrapper::is_known_wrapper_path(ctx.env, path);
        if !known {
            tracing::warn!("dropping wrapper outside the known directories: {}", path);
        }
        known
    });
    Ok(created)
}
