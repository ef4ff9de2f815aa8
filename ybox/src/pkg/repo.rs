//! Extra package repository management: add/remove named repositories
//! (with signing keys) in a container and track them in the state
//! store, keyed by the shared root when one is used so that every
//! container on it sees the same repositories.

use std::io::{BufRead, BufReader};
use std::process::Stdio;

use ybox_shared::errors::{YboxError, YboxResult};

use crate::config::distro::{PkgCmd, RepoCmd};
use crate::state::RepoRecord;

use super::{run_template, templates, PkgContext};

#[derive(Debug, Clone, Default)]
pub struct RepoAddOptions {
    pub name: String,
    pub urls: Vec<String>,
    /// Signing key: a URL or a key ID/fingerprint.
    pub key: Option<String>,
    pub key_server: Option<String>,
    pub options: Option<String>,
    /// Also enable the distribution's source-code repository.
    pub add_source_repo: bool,
}

fn repo_cmd<'a>(ctx: &'a PkgContext<'a>, cmd: RepoCmd) -> YboxResult<&'a str> {
    ctx.distro.repo_cmd(cmd).ok_or_else(|| {
        YboxError::Config(format!(
            "distribution '{}' does not define the repo '{}' command",
            ctx.distro.distribution(),
            cmd.key()
        ))
    })
}

/// Register and enable a new package repository. The state row is
/// written first so a duplicate is caught before mutating the
/// container; on later failures the partial changes are rolled back.
pub fn add_repository(ctx: &PkgContext<'_>, opts: &RepoAddOptions) -> YboxResult<()> {
    let _locks = ctx.acquire_mutation_locks()?;
    let container = ctx.container();
    let scope = ctx.runtime.repo_scope().to_string();
    let urls = opts.urls.join(",");
    let mut key = opts.key.clone().unwrap_or_default();
    let options = opts.options.clone().unwrap_or_default();

    if !ctx.state.add_repo(
        &opts.name,
        &scope,
        &urls,
        &key,
        &options,
        opts.add_source_repo,
        false,
    )? {
        return Err(YboxError::InvalidState(format!(
            "repository '{}' is already registered for '{}'",
            opts.name, scope
        )));
    }
    let cleanup_state = |ctx: &PkgContext<'_>| {
        let _ = ctx.state.remove_repo(&opts.name, &scope);
    };

    let exists_cmd = templates::substitute(repo_cmd(ctx, RepoCmd::Exists)?, &[("name", &opts.name)]);
    if ctx.engine.exec_capture(container, &exists_cmd)?.success() {
        cleanup_state(ctx);
        return Err(YboxError::InvalidState(format!(
            "repository '{}' is already present in the package manager of '{}'",
            opts.name, container
        )));
    }

    // register the signing key first so the repository is trusted the
    // moment it is enabled
    if !key.is_empty() {
        if key.contains("://") {
            key = match register_key_from_url(ctx, &opts.name, &key) {
                Ok(resolved) => resolved,
                Err(err) => {
                    cleanup_state(ctx);
                    return Err(err);
                }
            };
            // record the resolved fingerprint
            ctx.state.add_repo(
                &opts.name,
                &scope,
                &urls,
                &key,
                &options,
                opts.add_source_repo,
                true,
            )?;
        } else {
            let server = opts
                .key_server
                .clone()
                .or_else(|| {
                    ctx.distro
                        .repo_cmd(RepoCmd::DefaultGpgKeyServer)
                        .map(str::to_string)
                })
                .unwrap_or_default();
            let add_key_cmd = templates::substitute(
                repo_cmd(ctx, RepoCmd::AddKeyId)?,
                &[("key", &key), ("server", &server), ("name", &opts.name)],
            );
            tracing::info!("registering key '{}'", key);
            if let Err(err) = run_template(ctx.engine, container, &add_key_cmd, "registering key") {
                cleanup_state(ctx);
                return Err(err);
            }
        }
    }

    let add_cmd = templates::substitute(
        repo_cmd(ctx, RepoCmd::Add)?,
        &[("name", &opts.name), ("urls", &urls), ("options", &options)],
    );
    tracing::info!("registering repository '{}'", opts.name);
    let mut added = false;
    let result = (|| -> YboxResult<()> {
        run_template(ctx.engine, container, &add_cmd, "adding repository")?;
        added = true;
        if opts.add_source_repo {
            if let Some(add_src) = ctx.distro.repo_cmd(RepoCmd::AddSource) {
                let add_src_cmd = templates::substitute(
                    add_src,
                    &[("name", &opts.name), ("urls", &urls), ("options", &options)],
                );
                run_template(ctx.engine, container, &add_src_cmd, "adding source repository")?;
            }
        }
        // refresh metadata so the new repository is usable immediately
        let update_meta = ctx.template(PkgCmd::UpdateMeta)?;
        run_template(ctx.engine, container, update_meta, "refreshing package metadata")
    })();

    if let Err(err) = result {
        tracing::warn!("rolling back repository '{}' after failure", opts.name);
        if added {
            if let Ok(remove) = repo_cmd(ctx, RepoCmd::Remove) {
                let remove_cmd = templates::substitute(remove, &[("name", &opts.name)]);
                let _ = ctx.engine.exec_capture(container, &remove_cmd);
            }
        }
        if !key.is_empty() {
            if let Some(remove_key) = ctx.distro.repo_cmd(RepoCmd::RemoveKey) {
                let remove_key_cmd = templates::substitute(remove_key, &[("key", &key)]);
                let _ = ctx.engine.exec_capture(container, &remove_key_cmd);
            }
        }
        cleanup_state(ctx);
        return Err(err);
    }
    Ok(())
}

/// Fetch and register a key from a URL; the template prints the
/// resolved `KEYID=<fingerprint>` which is captured while everything
/// else streams through to the user.
fn register_key_from_url(ctx: &PkgContext<'_>, name: &str, url: &str) -> YboxResult<String> {
    let add_key_cmd = templates::substitute(
        repo_cmd(ctx, RepoCmd::AddKey)?,
        &[("url", url), ("name", name)],
    );
    tracing::info!("fetching and registering key from '{}'", url);
    let mut child = ctx
        .engine
        .exec_command(ctx.container(), &add_key_cmd, false)
        .stdout(Stdio::piped())
        .spawn()
        .map_err(|e| YboxError::Engine(format!("failed to run key registration: {}", e)))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| YboxError::Internal("no stdout from key registration".into()))?;
    let mut key_id = String::new();
    for line in BufReader::new(stdout).lines() {
        let line = line?;
        match line.strip_prefix("KEYID=") {
            Some(id) => key_id = id.trim().to_string(),
            None => println!("{}", line),
        }
    }
    let status = child
        .wait()
        .map_err(|e| YboxError::Engine(format!("waiting for key registration: {}", e)))?;
    if !status.success() || key_id.is_empty() {
        return Err(YboxError::PackageOp(format!(
            "failed to register key from '{}' for repository '{}'",
            url, name
        )));
    }
    tracing::info!("registered key '{}'", key_id);
    Ok(key_id)
}

/// Disable and unregister a repository, removing its key when one was
/// recorded.
pub fn remove_repository(ctx: &PkgContext<'_>, name: &str, remove_key: bool) -> YboxResult<()> {
    let _locks = ctx.acquire_mutation_locks()?;
    let container = ctx.container();
    let scope = ctx.runtime.repo_scope().to_string();

    let record = ctx.state.remove_repo(name, &scope)?.ok_or_else(|| {
        YboxError::NotFound(format!(
            "repository '{}' is not registered for '{}'",
            name, scope
        ))
    })?;

    let remove_cmd = templates::substitute(repo_cmd(ctx, RepoCmd::Remove)?, &[("name", name)]);
    run_template(ctx.engine, container, &remove_cmd, "removing repository")?;
    if remove_key && !record.key.is_empty() {
        if let Some(remove_key_tmpl) = ctx.distro.repo_cmd(RepoCmd::RemoveKey) {
            let cmd = templates::substitute(remove_key_tmpl, &[("key", &record.key)]);
            run_template(ctx.engine, container, &cmd, "removing repository key")?;
        }
    }
    let update_meta = ctx.template(PkgCmd::UpdateMeta)?;
    run_template(ctx.engine, container, update_meta, "refreshing package metadata")
}

/// Repositories registered for this container's scope.
pub fn list_repositories(ctx: &PkgContext<'_>) -> YboxResult<Vec<RepoRecord>> {
    ctx.state.list_repos(ctx.runtime.repo_scope())
}
