//! Container lifecycle orchestration: create, destroy, list, logs,
//! control and command execution, binding the config, engine, shared
//! root, state and wrapper subsystems together.
//!
//! Container state machine:
//!
//! ```text
//! Absent -> Creating -> FirstBoot(init running) -> StoppedForReboot
//!        -> Created(initialized) -> Running <-> Stopped -> Destroyed
//! ```
//!
//! `Destroyed` leaves a tombstone row only when packages remain in a
//! shared root; otherwise every trace of the container is removed.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use ybox_shared::constants;
use ybox_shared::errors::{YboxError, YboxResult};

use crate::config::distro::DistroConfig;
use crate::config::ini::ConfigSource;
use crate::config::profile::{self, CompiledProfile, ProfileCompiler};
use crate::engine::{check_ybox_state, BindMount, ContainerSpec, Engine};
use crate::env::Environ;
use crate::layout::{ContainerLayout, DataLayout};
use crate::pkg::{self, PkgContext};
use crate::resources;
use crate::shared_root::SharedRootManager;
use crate::state::{RuntimeConfiguration, StateStore};
use crate::status::{self, ContainerStatus};
use crate::wrapper;

/// Container names must stay shell- and path-safe.
fn validate_name(name: &str) -> YboxResult<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(YboxError::Config(format!(
            "invalid container name '{}': only alphanumeric, underscore, dot and hyphen \
             characters are accepted",
            name
        )))
    }
}

#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Container name; defaults to `ybox-<distribution>_<profile>`.
    pub name: Option<String>,
    pub distribution: Option<String>,
    /// Profile name (searched in the profiles directories) or a path.
    pub profile: Option<String>,
    pub quiet: bool,
    /// Adopt orphaned packages on the shared root even when the
    /// tombstone's configuration differs.
    pub force_own_orphans: bool,
}

/// Control actions on an existing container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Start,
    Stop,
    Restart,
    Status,
}

/// The entry point for all container operations of one invocation.
pub struct YboxRuntime {
    env: Environ,
    engine: Engine,
    data: DataLayout,
    lock_timeout: Option<Duration>,
}

impl YboxRuntime {
    pub fn new() -> YboxResult<Self> {
        let env = Environ::new()?;
        Ok(Self::with_env(env))
    }

    pub fn with_env(env: Environ) -> Self {
        let engine = Engine::from_env(&env);
        let data = DataLayout::from_env(&env);
        Self {
            env,
            engine,
            data,
            lock_timeout: Some(Duration::from_secs(
                constants::DEFAULT_LOCK_TIMEOUT_SECS,
            )),
        }
    }

    pub fn env(&self) -> &Environ {
        &self.env
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn data(&self) -> &DataLayout {
        &self.data
    }

    pub fn set_lock_timeout(&mut self, timeout: Option<Duration>) {
        self.lock_timeout = timeout;
    }

    pub fn open_state(&self) -> YboxResult<StateStore> {
        self.data.prepare()?;
        StateStore::open(&self.data.state_db_path(), self.lock_timeout)
    }

    // ------------------------------------------------------------------
    // create
    // ------------------------------------------------------------------

    /// Create and initialize a new container from a profile.
    pub fn create(&self, opts: &CreateOptions) -> YboxResult<()> {
        let distribution = self.select_distribution(opts)?;
        let profile_name = opts.profile.clone().unwrap_or_else(|| "basic".to_string());
        let profile_src = profile::profile_source(&self.env, &profile_name)?;

        let box_name = match &opts.name {
            Some(name) => name.clone(),
            None => {
                let stem = Path::new(&profile_name)
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| profile_name.clone());
                format!("ybox-{}_{}", distribution, stem)
            }
        };
        validate_name(&box_name)?;
        tracing::info!(
            "creating container '{}' for distribution '{}' using profile '{}'",
            box_name,
            distribution,
            profile_name
        );
        if check_ybox_state(&self.engine, &box_name, &[])? {
            if opts.force_own_orphans {
                // the container exists: only transfer orphaned packages
                // from tombstones on its shared root to it
                let adopted = self.adopt_orphans(&box_name)?;
                tracing::info!(
                    "adopted {} orphaned package(s) into existing container '{}'",
                    adopted.len(),
                    box_name
                );
                return Ok(());
            }
            return Err(YboxError::InvalidState(format!(
                "container '{}' already exists",
                box_name
            )));
        }

        let container = self.data.container(&box_name);
        container.prepare()?;
        let ctx = profile::expand_context(&self.env, &box_name, &container.target_scripts_dir());
        let distro_doc = profile::load_resolved(&profile::distro_source(&self.env, &distribution)?, &ctx)?;
        let distro = DistroConfig::new(&distribution, distro_doc)?;
        self.setup_scripts(&container, &distro)?;

        let profile_doc = profile::load_resolved(&profile_src, &ctx)?;
        let compiler = ProfileCompiler::new(&self.env, &self.data, &container, &distro);
        let compiled = compiler.compile(profile_doc)?;

        // ensure the base image exists, building the shared root when
        // this is the first container of the distribution
        let has_shared_root = !compiled.shared_root.is_empty();
        let image = container.image_name(&distribution, has_shared_root);
        let shared_mounts = if has_shared_root {
            let manager = SharedRootManager::new(
                &self.env,
                &self.engine,
                &self.data,
                &compiled.shared_root,
                distro.shared_root_dirs(),
            );
            manager.create_parent()?;
            let _root_lock = manager.lock(self.lock_timeout)?;
            if !self.engine.image_exists(&image)? {
                self.build_container_image(&container, &distro, &image, true)?;
            }
            if !manager.is_populated() {
                tracing::info!(
                    "populating shared root {} for '{}'",
                    compiled.shared_root,
                    distribution
                );
                manager.run_copy_container(
                    &image,
                    &box_name,
                    &container.scripts_dir(),
                    &container.target_scripts_dir(),
                )?;
            }
            manager.container_mounts()
        } else {
            self.engine.pull(distro.image())?;
            self.build_container_image(&container, &distro, &image, false)?;
            Vec::new()
        };

        // launch the final container; first boot runs the init scripts
        // and deliberately stops, after which it is recreated clean
        let spec = self.final_spec(&container, &distro, &compiled, &image, shared_mounts)?;
        tracing::info!("initializing container '{}' (see 'ybox logs -f {}')", box_name, box_name);
        self.reset_status_file(&container)?;
        self.engine.create(&spec)?;
        let first = status::wait_for_status(
            &box_name,
            &container.status_file(),
            ContainerStatus::Started,
            Duration::from_secs(constants::FIRST_BOOT_WAIT_SECS),
        );
        match first {
            Ok(ContainerStatus::Stopped) => {
                // StoppedForReboot: recreate without the init phase so
                // system upgrades from the bootstrap take effect
                tracing::info!("restarting '{}' after initialization", box_name);
                std::fs::File::create(container.init_done_file())?;
                self.engine.rm_quiet(&box_name);
                self.reset_status_file(&container)?;
                self.engine.create(&spec)?;
                status::wait_for_status(
                    &box_name,
                    &container.status_file(),
                    ContainerStatus::Started,
                    Duration::from_secs(constants::DEFAULT_STATUS_WAIT_SECS),
                )?;
            }
            Ok(_) => {}
            Err(err) => {
                // leave no half-created engine object behind
                self.engine.rm_quiet(&box_name);
                return Err(err);
            }
        }

        // manifests are consumed; truncate so a later restart does not
        // replay installs
        for manifest in [container.app_list(), container.config_list()] {
            if manifest.exists() {
                std::fs::File::create(&manifest)?;
            }
        }

        // record in the state store and install profile apps
        let state = self.open_state()?;
        self.sweep_dangling_containers(&state)?;
        let adopted = state.register_container(
            &box_name,
            &distribution,
            &compiled.shared_root,
            &compiled.resolved.to_ini_string(),
            opts.force_own_orphans,
        )?;
        let runtime_conf = RuntimeConfiguration {
            name: box_name.clone(),
            distribution: distribution.clone(),
            shared_root: compiled.shared_root.clone(),
            ini_config: compiled.resolved.to_ini_string(),
        };
        let pkg_ctx = PkgContext {
            env: &self.env,
            engine: &self.engine,
            data: &self.data,
            distro: &distro,
            runtime: &runtime_conf,
            state: &state,
            lock_timeout: self.lock_timeout,
        };
        for package in &adopted {
            if compiled.apps_with_deps.iter().any(|(app, _)| app == &package.name) {
                continue; // about to be (re-)installed below anyway
            }
            if package.copy_type.is_empty() {
                continue;
            }
            let local_copies =
                pkg::install::materialize_wrappers(&pkg_ctx, &package.name, package.copy_type, &package.flags)?;
            state.record_package(
                &box_name,
                &package.name,
                &local_copies,
                package.copy_type,
                &package.flags,
                None,
                "",
                false,
            )?;
        }
        for (app, deps) in &compiled.apps_with_deps {
            let install_opts = pkg::install::InstallOptions {
                package: app.clone(),
                quiet: opts.quiet,
                with_opt_deps: if deps.is_empty() {
                    None
                } else {
                    Some(deps.clone())
                },
                skip_opt_deps: deps.is_empty(),
                ..Default::default()
            };
            pkg::install::install_package(&pkg_ctx, &install_opts)?;
        }
        tracing::info!("container '{}' is ready", box_name);
        Ok(())
    }

    fn select_distribution(&self, opts: &CreateOptions) -> YboxResult<String> {
        let supported = self.supported_distributions()?;
        match &opts.distribution {
            Some(distribution) => {
                if supported.iter().any(|d| d == distribution) {
                    Ok(distribution.clone())
                } else {
                    Err(YboxError::Config(format!(
                        "distribution '{}' not in supported list [{}]",
                        distribution,
                        supported.join(", ")
                    )))
                }
            }
            None if supported.len() == 1 => Ok(supported[0].clone()),
            None => Err(YboxError::Config(format!(
                "specify a distribution; supported: [{}]",
                supported.join(", ")
            ))),
        }
    }

    fn supported_distributions(&self) -> YboxResult<Vec<String>> {
        let text = match self.env.find_config("distros/supported.list", false) {
            Some(path) => std::fs::read_to_string(path)?,
            None => resources::builtin_config("distros/supported.list")
                .ok_or_else(|| YboxError::Internal("missing builtin supported.list".into()))?
                .to_string(),
        };
        Ok(text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_string)
            .collect())
    }

    /// Copy the entrypoint and distribution scripts into the container
    /// scripts directory and stamp the product version.
    fn setup_scripts(&self, container: &ContainerLayout, distro: &DistroConfig) -> YboxResult<()> {
        let scripts_dir = container.scripts_dir();
        if scripts_dir.exists() {
            std::fs::remove_dir_all(&scripts_dir)?;
        }
        std::fs::create_dir_all(&scripts_dir)?;
        // docker needs world read/execute on the mount
        set_mode(&scripts_dir, 0o755)?;

        let mut copy_script = |rel: String, name: &str| -> YboxResult<()> {
            let content = match self.env.find_config(&rel, true) {
                Some(path) => std::fs::read_to_string(path)?,
                None => resources::builtin_script(&rel)
                    .ok_or_else(|| {
                        YboxError::Config(format!("missing bundled script '{}'", rel))
                    })?
                    .to_string(),
            };
            let dest = scripts_dir.join(name);
            std::fs::write(&dest, content)?;
            set_mode(&dest, 0o755)
        };
        for script in constants::RESOURCE_SCRIPTS {
            copy_script(format!("resources/{}", script), script)?;
        }
        for script in constants::DISTRIBUTION_SCRIPTS {
            copy_script(
                format!("distros/{}/{}", distro.distribution(), script),
                script,
            )?;
        }
        for script in distro.extra_scripts() {
            copy_script(
                format!("distros/{}/{}", distro.distribution(), script),
                &script,
            )?;
        }

        // pkgmgr.conf carries the install/clean commands the entrypoint
        // uses for the [apps] manifest
        use crate::config::distro::PkgCmd;
        use crate::pkg::templates;
        let install_cmd = templates::substitute(
            distro.pkgmgr_opt(PkgCmd::Install),
            &[("quiet", distro.pkgmgr_opt(PkgCmd::QuietFlag)), ("opt_dep", "")],
        );
        let clean_cmd = distro.pkgmgr_opt(PkgCmd::CleanQuiet);
        let mut pkgmgr_conf = std::fs::File::create(scripts_dir.join("pkgmgr.conf"))?;
        writeln!(pkgmgr_conf, "PKGMGR_INSTALL='{}'", install_cmd)?;
        writeln!(pkgmgr_conf, "PKGMGR_CLEAN='{}'", clean_cmd)?;

        std::fs::write(scripts_dir.join("version"), crate::VERSION)?;
        Ok(())
    }

    /// Run the base container phase and commit the result as `image`.
    /// The base phase creates a sudo-enabled user matching the host
    /// user so the final container needs no UID remapping.
    fn build_container_image(
        &self,
        container: &ContainerLayout,
        distro: &DistroConfig,
        image: &str,
        shared: bool,
    ) -> YboxResult<()> {
        tracing::info!(
            "building container image '{}' with sudo user '{}'",
            image,
            self.env.user()
        );
        let target_scripts = container.target_scripts_dir();
        let mut spec = ContainerSpec::new(distro.image(), container.name());
        spec.add_mount(BindMount::read_only(
            container.scripts_dir().display().to_string(),
            &target_scripts,
        ));
        spec.add_label(constants::CONTAINER_TYPE_LABEL, constants::CONTAINER_TYPE_BASE);
        spec.entrypoint = Some(format!("{}/{}", target_scripts, constants::ENTRYPOINT_BASE));
        spec.userns = crate::engine::UserNsMode::None;
        let mut command = vec![
            "-u".to_string(),
            self.env.user().to_string(),
            "-U".to_string(),
            self.env.uid().to_string(),
            "-n".to_string(),
            self.env.user().to_string(),
            "-g".to_string(),
            self.env.user().to_string(),
            "-G".to_string(),
            self.env.gid().to_string(),
            "-s".to_string(),
            distro.secondary_groups().to_string(),
        ];
        if let Ok(localtime) = std::fs::read_link("/etc/localtime") {
            command.push("-l".to_string());
            command.push(localtime.display().to_string());
        }
        if let Ok(timezone) = std::fs::read_to_string("/etc/timezone") {
            command.push("-z".to_string());
            command.push(timezone.trim().to_string());
        }
        spec.command = command;
        let context = if shared {
            "running container for the shared base image"
        } else {
            "running container with the base image"
        };
        self.engine.run_foreground(&spec, context)?;
        self.engine
            .commit(container.name(), image, self.env.target_user(), self.env.target_home())?;
        self.engine.rm_quiet(container.name());
        Ok(())
    }

    /// Decorate the compiled spec into the final creation spec.
    fn final_spec(
        &self,
        container: &ContainerLayout,
        distro: &DistroConfig,
        compiled: &CompiledProfile,
        image: &str,
        shared_mounts: Vec<BindMount>,
    ) -> YboxResult<ContainerSpec> {
        let mut spec = compiled.spec.clone();
        spec.image = image.to_string();
        let target_scripts = container.target_scripts_dir();
        spec.add_mount(BindMount::read_only(
            container.scripts_dir().display().to_string(),
            &target_scripts,
        ));
        // the profile may have mounted a custom home already
        if !spec.mounts.iter().any(|m| m.guest == self.env.target_home()) {
            spec.add_mount(BindMount::new(
                container.home_dir().display().to_string(),
                self.env.target_home(),
            ));
        }
        spec.add_mount(BindMount::new(
            container.status_file().display().to_string(),
            constants::STATUS_TARGET_FILE,
        ));
        for mount in shared_mounts {
            spec.add_mount(mount);
        }
        spec.add_label(
            constants::CONTAINER_TYPE_LABEL,
            constants::CONTAINER_TYPE_PRIMARY,
        );
        spec.add_label(
            constants::CONTAINER_DISTRIBUTION_LABEL,
            distro.distribution(),
        );
        spec.add_env("YBOX_TARGET_SCRIPTS_DIR", &target_scripts);
        if self.env.uses_podman() {
            spec.add_env("USER", self.env.user());
        } else {
            spec.add_env("USER", "root");
        }
        if distro.configure_fastest_mirrors() {
            spec.add_env("CONFIGURE_FASTEST_MIRRORS", "1");
        }
        if let Some(packages) = distro.document().section("packages") {
            for (key, env_var) in [
                ("required", "REQUIRED_PKGS"),
                ("recommended", "RECOMMENDED_PKGS"),
                ("suggested", "SUGGESTED_PKGS"),
                ("extra", "EXTRA_PKGS"),
            ] {
                if let Some(value) = packages.get(key) {
                    if !value.is_empty() {
                        spec.add_env(env_var, value.split_whitespace().collect::<Vec<_>>().join(" "));
                    }
                }
            }
        }
        spec.entrypoint = Some(format!("{}/{}", target_scripts, constants::ENTRYPOINT));

        let mut command = Vec::new();
        if container.config_list().exists() {
            command.push("-c".to_string());
            command.push(format!("{}/config.list", target_scripts));
            command.push("-d".to_string());
            command.push(container.target_configs_dir(&self.env));
        }
        if container.app_list().exists() {
            command.push("-a".to_string());
            command.push(format!("{}/app.list", target_scripts));
        }
        if container.startup_list().exists() {
            command.push("-s".to_string());
            command.push(format!("{}/startup.list", target_scripts));
        }
        command.push(container.name().to_string());
        spec.command = command;
        Ok(spec)
    }

    fn reset_status_file(&self, container: &ContainerLayout) -> YboxResult<()> {
        let status_file = container.status_file();
        if status_file.exists() {
            std::fs::remove_file(&status_file)?;
        }
        std::fs::File::create(&status_file)?;
        set_mode(&status_file, 0o600)
    }

    // ------------------------------------------------------------------
    // destroy
    // ------------------------------------------------------------------

    /// Stop and remove a container, clearing its state. Packages left
    /// in a shared root turn the state row into a tombstone.
    pub fn destroy(&self, name: &str, force: bool) -> YboxResult<()> {
        let exists = check_ybox_state(&self.engine, name, &[])?;
        if exists {
            tracing::info!("stopping container '{}'", name);
            if let Err(err) = self.engine.stop(name, 10) {
                tracing::warn!("stop failed (may already be stopped): {}", err);
            }
            tracing::info!("removing container '{}'", name);
            self.engine.rm(name, force)?;
        }

        tracing::info!("clearing state for '{}'", name);
        let state = self.open_state()?;
        let result = state.mark_container_destroyed(name)?;
        wrapper::remove_wrappers(&result.removed_wrappers);
        if let Some(tombstone) = &result.tombstone {
            tracing::info!(
                "packages of '{}' remain in the shared root under tombstone '{}'; \
                 another container can adopt them with --force-own-orphans",
                name,
                tombstone
            );
        }
        self.sweep_dangling_containers(&state)?;
        if !result.found && !exists {
            return Err(YboxError::NotFound(format!(
                "no container named '{}' found",
                name
            )));
        }
        Ok(())
    }

    /// Unregister state rows whose engine container no longer exists
    /// (destroyed outside of ybox).
    pub fn sweep_dangling_containers(&self, state: &StateStore) -> YboxResult<()> {
        let valid = self.engine.list_names(true, None)?;
        let known = state.get_containers(None, None)?;
        for name in known {
            if !valid.contains(&name) {
                tracing::info!("removing dangling container entry '{}' from the state database", name);
                let result = state.mark_container_destroyed(&name)?;
                wrapper::remove_wrappers(&result.removed_wrappers);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // ls / logs / control / cmd
    // ------------------------------------------------------------------

    /// List ybox containers via the engine, using a format template the
    /// adapter controls.
    pub fn list(&self, all: bool, format: Option<&str>) -> YboxResult<String> {
        let label = format!("{}={}", constants::CONTAINER_TYPE_LABEL, constants::CONTAINER_TYPE_PRIMARY);
        let format = format.unwrap_or(
            "table {{.Names}}\t{{.Image}}\t{{.Status}}",
        );
        self.engine.list_formatted(all, Some(&label), format)
    }

    /// Show (optionally follow) the engine logs of a container.
    pub fn logs(&self, name: &str, follow: bool) -> YboxResult<()> {
        if self.engine.inspect_state(name)?.is_none() {
            return Err(YboxError::NotFound(format!(
                "no container named '{}' found",
                name
            )));
        }
        self.engine.logs(name, follow)
    }

    /// Start/stop/restart a container or report its status.
    pub fn control(&self, name: &str, action: ControlAction) -> YboxResult<String> {
        let container = self.data.container(name);
        match action {
            ControlAction::Start => {
                self.ensure_exists(name)?;
                self.reset_status_file(&container)?;
                self.engine.start(name)?;
                status::wait_for_status(
                    name,
                    &container.status_file(),
                    ContainerStatus::Started,
                    Duration::from_secs(constants::DEFAULT_STATUS_WAIT_SECS),
                )?;
                Ok("started".to_string())
            }
            ControlAction::Stop => {
                self.ensure_exists(name)?;
                self.engine.stop(name, 10)?;
                Ok("stopped".to_string())
            }
            ControlAction::Restart => {
                self.control(name, ControlAction::Stop)?;
                self.control(name, ControlAction::Start)
            }
            ControlAction::Status => match self.engine.inspect_state(name)? {
                Some((_, engine_state)) => {
                    let status = ContainerStatus::read(&container.status_file());
                    Ok(match status {
                        ContainerStatus::Started => "running".to_string(),
                        _ => engine_state,
                    })
                }
                None => Err(YboxError::NotFound(format!(
                    "no container named '{}' found",
                    name
                ))),
            },
        }
    }

    fn ensure_exists(&self, name: &str) -> YboxResult<()> {
        if !check_ybox_state(&self.engine, name, &[])? {
            return Err(YboxError::NotFound(format!(
                "no container named '{}' found",
                name
            )));
        }
        Ok(())
    }

    /// Run a command (default: a login shell) inside a running
    /// container with a pseudo-tty.
    pub fn run_cmd(&self, name: &str, argv: &[String]) -> YboxResult<i32> {
        if !check_ybox_state(&self.engine, name, &["running"])? {
            return Err(YboxError::NotReady(
                name.to_string(),
                "container is not running (try 'ybox control start')".to_string(),
            ));
        }
        if argv.is_empty() {
            return self.engine.exec_shell(name, "/bin/bash -l", true);
        }
        self.engine.exec_argv(name, argv, true)
    }

    // ------------------------------------------------------------------
    // pkg plumbing
    // ------------------------------------------------------------------

    /// Resolve the target container for a package operation: the given
    /// name, or the sole registered container.
    pub fn resolve_container(
        &self,
        state: &StateStore,
        name: Option<&str>,
    ) -> YboxResult<RuntimeConfiguration> {
        let name = match name {
            Some(name) => name.to_string(),
            None => {
                let containers = state.get_containers(None, None)?;
                match containers.as_slice() {
                    [single] => single.clone(),
                    [] => {
                        return Err(YboxError::NotFound(
                            "no ybox containers registered; create one first".into(),
                        ))
                    }
                    many => {
                        return Err(YboxError::Config(format!(
                            "specify a container with -z/--ybox; candidates: [{}]",
                            many.join(", ")
                        )))
                    }
                }
            }
        };
        let runtime_conf = state.get_container_configuration(&name)?.ok_or_else(|| {
            YboxError::NotFound(format!("container '{}' not found in the state database", name))
        })?;
        if !check_ybox_state(&self.engine, &name, &["running"])? {
            return Err(YboxError::NotReady(
                name,
                "container is not running (try 'ybox control start')".to_string(),
            ));
        }
        Ok(runtime_conf)
    }

    /// Load the distribution configuration for a registered container.
    pub fn distro_for(&self, runtime_conf: &RuntimeConfiguration) -> YboxResult<DistroConfig> {
        let container = self.data.container(&runtime_conf.name);
        let ctx = profile::expand_context(
            &self.env,
            &runtime_conf.name,
            &container.target_scripts_dir(),
        );
        let source: ConfigSource = profile::distro_source(&self.env, &runtime_conf.distribution)?;
        let doc = profile::load_resolved(&source, &ctx)?;
        DistroConfig::new(&runtime_conf.distribution, doc)
    }

    /// Regenerate wrappers for every adopted package of a container
    /// (`--force-own-orphans` on an existing container).
    pub fn adopt_orphans(&self, name: &str) -> YboxResult<Vec<String>> {
        let state = self.open_state()?;
        let runtime_conf = state.get_container_configuration(name)?.ok_or_else(|| {
            YboxError::NotFound(format!("container '{}' not found in the state database", name))
        })?;
        if runtime_conf.shared_root.is_empty() {
            return Err(YboxError::InvalidState(format!(
                "container '{}' does not use a shared root",
                name
            )));
        }
        let adopted = state.register_container(
            name,
            &runtime_conf.distribution,
            &runtime_conf.shared_root,
            &runtime_conf.ini_config,
            true,
        )?;
        let distro = self.distro_for(&runtime_conf)?;
        let pkg_ctx = PkgContext {
            env: &self.env,
            engine: &self.engine,
            data: &self.data,
            distro: &distro,
            runtime: &runtime_conf,
            state: &state,
            lock_timeout: self.lock_timeout,
        };
        let mut names = Vec::new();
        for package in &adopted {
            if !package.copy_type.is_empty() {
                let local_copies = pkg::install::materialize_wrappers(
                    &pkg_ctx,
                    &package.name,
                    package.copy_type,
                    &package.flags,
                )?;
                state.record_package(
                    name,
                    &package.name,
                    &local_copies,
                    package.copy_type,
                    &package.flags,
                    None,
                    "",
                    false,
                )?;
            }
            names.push(package.name.clone());
        }
        Ok(names)
    }

}

fn set_mode(path: &Path, mode: u32) -> YboxResult<()> {
    let mut perms = std::fs::metadata(path)?.permissions();
    std::os::unix::fs::PermissionsExt::set_mode(&mut perms, mode);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}
