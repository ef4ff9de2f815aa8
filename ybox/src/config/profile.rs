//! Profile compiler: translate a resolved profile INI into a
//! [`ContainerSpec`] plus the three manifest files consumed by the
//! container entrypoint (config.list, app.list, startup.list).
//!
//! The compiler also enforces the security defaults: the host HOME is
//! never mounted unless `allow_home_share` is set, and never-permitted
//! privileged flags are stripped from `custom_options`.

use std::io::Write;
use std::path::Path;

use ybox_shared::errors::{YboxError, YboxResult};

use crate::engine::{BindMount, ContainerSpec};
use crate::env::Environ;
use crate::layout::{ContainerLayout, DataLayout};

use super::distro::DistroConfig;
use super::ini::{parse_bool, ConfigSource, IniDocument};
use super::interpolate::{self, ExpandContext};

/// Engine flags that a profile may never smuggle in via custom_options.
const FORBIDDEN_OPTIONS: &[&str] = &["--privileged", "--pid=host", "--ipc=host"];

/// Result of compiling a profile for one container.
#[derive(Debug)]
pub struct CompiledProfile {
    /// The engine spec carrying mounts, env, caps and devices from the
    /// profile. Entrypoint, labels and shared-root mounts are added by
    /// the runtime which knows the creation phase.
    pub spec: ContainerSpec,
    /// Shared root directory, empty when disabled.
    pub shared_root: String,
    /// Apps from `[apps]` mapped to their chosen optional dependencies.
    pub apps_with_deps: Vec<(String, Vec<String>)>,
    /// The fully resolved profile (recorded in the state database).
    pub resolved: IniDocument,
}

/// Build the expansion context for resolving a container's profile.
pub fn expand_context(env: &Environ, container_name: &str, target_scripts_dir: &str) -> ExpandContext {
    ExpandContext::new()
        .placeholder("TARGET_HOME", env.target_home())
        .placeholder("TARGET_SCRIPTS_DIR", target_scripts_dir)
        .placeholder("HOME", env.home().display().to_string())
        .placeholder("USER", env.user())
        .placeholder("XDG_RUNTIME_DIR", env.xdg_rt_dir())
        .placeholder("YBOX_CONTAINER_NAME", container_name)
        .placeholder("YBOX_HOST_UID", env.uid().to_string())
        .placeholder("YBOX_HOST_GID", env.gid().to_string())
        // values inside [configs] refer to paths in the container, so
        // the guest resolves them, not the host
        .skip_section("configs")
}

/// Load and fully resolve a profile or distribution INI.
pub fn load_resolved(source: &ConfigSource, ctx: &ExpandContext) -> YboxResult<IniDocument> {
    let doc = IniDocument::load(source)?;
    interpolate::resolve_document(&doc, ctx)
}

/// Locate the `distro.ini` for a distribution: user override first,
/// then the system configuration directory, then the builtin.
pub fn distro_source(env: &Environ, distribution: &str) -> YboxResult<ConfigSource> {
    let rel = format!("distros/{}/distro.ini", distribution);
    if let Some(path) = env.find_config(&rel, false) {
        return Ok(ConfigSource::File(path));
    }
    crate::resources::builtin_config_name(&rel)
        .map(ConfigSource::Builtin)
        .ok_or_else(|| {
            YboxError::NotFound(format!(
                "no distro.ini found for distribution '{}'",
                distribution
            ))
        })
}

/// Locate a profile by name or path.
pub fn profile_source(env: &Environ, profile: &str) -> YboxResult<ConfigSource> {
    let as_path = Path::new(profile);
    if as_path.is_file() {
        return Ok(ConfigSource::File(as_path.to_path_buf()));
    }
    let mut rel = format!("profiles/{}", profile);
    if !rel.ends_with(".ini") {
        rel.push_str(".ini");
    }
    if let Some(path) = env.find_config(&rel, false) {
        return Ok(ConfigSource::File(path));
    }
    crate::resources::builtin_config_name(&rel)
        .map(ConfigSource::Builtin)
        .ok_or_else(|| YboxError::NotFound(format!("no profile '{}' found", profile)))
}

pub struct ProfileCompiler<'a> {
    env: &'a Environ,
    data: &'a DataLayout,
    container: &'a ContainerLayout,
    distro: &'a DistroConfig,
}

impl<'a> ProfileCompiler<'a> {
    pub fn new(
        env: &'a Environ,
        data: &'a DataLayout,
        container: &'a ContainerLayout,
        distro: &'a DistroConfig,
    ) -> Self {
        Self {
            env,
            data,
            container,
            distro,
        }
    }

    /// Compile a resolved profile document. Writes the manifest files
    /// and the configs directory as side effects.
    pub fn compile(&self, profile: IniDocument) -> YboxResult<CompiledProfile> {
        if !profile.has_section("base") {
            return Err(YboxError::Config("missing [base] section in profile".into()));
        }
        let mut spec = ContainerSpec::new(String::new(), self.container.name());
        spec.hostname = format!("ybox-{}", self.container.name());
        spec.user = Some(self.env.uid());

        let base = self.process_base(&profile, &mut spec)?;
        let mut apps_with_deps = Vec::new();
        for section in profile.sections() {
            match section.name.as_str() {
                "base" | "app_flags" => {}
                "security" => self.process_security(&profile, &mut spec)?,
                "network" => self.process_network(&profile, &mut spec)?,
                "mounts" => self.process_mounts(&profile, &mut spec)?,
                "env" => self.process_env(&profile, &mut spec)?,
                "configs" => {
                    if let Some(hardlinks) = base.config_hardlinks {
                        self.process_configs(&profile, hardlinks, &mut spec)?;
                    }
                }
                "apps" => apps_with_deps = self.process_apps(&profile)?,
                "startup" => self.process_startup(&profile)?,
                other => {
                    return Err(YboxError::Config(format!(
                        "unknown section [{}] in profile or one of its includes",
                        other
                    )));
                }
            }
        }

        if base.config_locale {
            spec.pass_env("LANG");
            spec.pass_env("LANGUAGE");
        }
        spec.add_env("YBOX_HOST_UID", self.env.uid().to_string());
        spec.add_env("YBOX_HOST_GID", self.env.gid().to_string());
        spec.add_env("XDG_RUNTIME_DIR", self.env.target_xdg_rt_dir());

        Ok(CompiledProfile {
            spec,
            shared_root: base.shared_root,
            apps_with_deps,
            resolved: profile,
        })
    }

    fn process_base(
        &self,
        profile: &IniDocument,
        spec: &mut ContainerSpec,
    ) -> YboxResult<BaseOptions> {
        let section = profile.section("base").expect("checked by compile");
        let mut options = BaseOptions::default();
        let allow_home_share = profile
            .get_bool("base", "allow_home_share")?
            .unwrap_or(false);
        let mut dri = false;
        let mut nvidia = false;
        let mut nvidia_ctk = false;
        for (key, value) in section.entries() {
            match key {
                "name" | "includes" | "dbus_sys" | "allow_home_share" => {}
                "home" => {
                    if !value.is_empty() {
                        // mounting the host HOME wholesale defeats the
                        // sandbox and needs an explicit opt-in
                        let host_home = self.env.home().display().to_string();
                        if value == host_home && !allow_home_share {
                            return Err(YboxError::Config(
                                "profile mounts the host HOME as the container home; \
                                 set allow_home_share=true if this is intended"
                                    .into(),
                            ));
                        }
                        std::fs::create_dir_all(value)?;
                        spec.add_mount(BindMount::new(value, self.env.target_home()));
                    }
                }
                "shared_root" => options.shared_root = self.shared_root_path(value)?,
                "config_hardlinks" => {
                    options.config_hardlinks = if value.is_empty() {
                        None
                    } else {
                        Some(bool_value("base", key, value)?)
                    };
                }
                "config_locale" => options.config_locale = bool_value("base", key, value)?,
                "x11" => {
                    if bool_value("base", key, value)? {
                        self.enable_x11(spec);
                    }
                }
                "wayland" => {
                    if bool_value("base", key, value)? {
                        self.enable_wayland(spec);
                    }
                }
                "pulseaudio" => {
                    if bool_value("base", key, value)? {
                        self.enable_pulse(spec);
                    }
                }
                "dbus" => {
                    if bool_value("base", key, value)? {
                        let sys = profile.get_bool("base", "dbus_sys")?.unwrap_or(false);
                        self.enable_dbus(spec, sys);
                    }
                }
                "ssh_agent" => {
                    if bool_value("base", key, value)? {
                        self.share_agent_socket(spec, "SSH_AUTH_SOCK");
                    }
                }
                "gpg_agent" => {
                    if bool_value("base", key, value)? {
                        self.share_agent_socket(spec, "GPG_AGENT_INFO");
                    }
                }
                "dri" => dri = bool_value("base", key, value)?,
                "nvidia" => nvidia = bool_value("base", key, value)?,
                "nvidia_ctk" => nvidia_ctk = bool_value("base", key, value)?,
                "shm_size" => {
                    if !value.is_empty() {
                        spec.shm_size = Some(value.to_string());
                    }
                }
                "pids_limit" => {
                    if !value.is_empty() {
                        spec.pids_limit = Some(value.to_string());
                    }
                }
                "log_driver" => {
                    if !value.is_empty() {
                        spec.log_driver = Some(value.to_string());
                    }
                }
                "log_opts" => {
                    for opt in split_csv(value) {
                        if let Some(log_dir) = opt
                            .strip_prefix("path=")
                            .and_then(|p| Path::new(p).parent())
                        {
                            std::fs::create_dir_all(log_dir)?;
                        }
                        spec.log_opts.push(opt);
                    }
                }
                "devices" => spec.devices.extend(split_csv(value)),
                "custom_options" => {
                    for opt in value.split_whitespace() {
                        if FORBIDDEN_OPTIONS
                            .iter()
                            .any(|f| opt == *f || opt.starts_with(&format!("{}=", f)))
                        {
                            tracing::warn!("stripping forbidden option '{}' from profile", opt);
                            continue;
                        }
                        spec.extra_args.push(opt.to_string());
                    }
                }
                other => {
                    return Err(YboxError::Config(format!(
                        "unknown key '{}' in the [base] section of the profile or its includes",
                        other
                    )));
                }
            }
        }
        if dri || nvidia || nvidia_ctk {
            if Path::new("/dev/dri").exists() {
                spec.devices.push("/dev/dri".to_string());
            }
        }
        if nvidia_ctk {
            // the container device interface of nvidia-container-toolkit
            spec.devices.push("nvidia.com/gpu=all".to_string());
        } else if nvidia {
            for dev in ["/dev/nvidia0", "/dev/nvidiactl", "/dev/nvidia-uvm"] {
                if Path::new(dev).exists() {
                    spec.devices.push(dev.to_string());
                }
            }
        }
        Ok(options)
    }

    /// Interpret the `shared_root` key: a boolean selects the standard
    /// per-distribution location, a path overrides it, empty/false
    /// disables sharing.
    fn shared_root_path(&self, value: &str) -> YboxResult<String> {
        if value.is_empty() {
            return Ok(String::new());
        }
        if let Ok(enabled) = parse_bool(value) {
            return Ok(if enabled {
                self.data
                    .shared_root_for(self.distro.distribution())
                    .display()
                    .to_string()
            } else {
                String::new()
            });
        }
        if !value.starts_with('/') {
            return Err(YboxError::Config(format!(
                "base.shared_root must be a boolean or an absolute path, got '{}'",
                value
            )));
        }
        Ok(value.to_string())
    }

    fn enable_x11(&self, spec: &mut ContainerSpec) {
        let sockets = "/tmp/.X11-unix";
        if Path::new(sockets).exists() {
            spec.add_mount(BindMount::new(sockets, sockets));
        }
        spec.pass_env("DISPLAY");
        if let Ok(xauth) = std::env::var("XAUTHORITY") {
            if Path::new(&xauth).exists() {
                spec.add_mount(BindMount::read_only(&xauth, &xauth));
                spec.add_env("XAUTHORITY", xauth);
            }
        }
    }

    fn enable_wayland(&self, spec: &mut ContainerSpec) {
        let rt_dir = self.env.xdg_rt_dir();
        if rt_dir.is_empty() {
            return;
        }
        if let Ok(display) = std::env::var("WAYLAND_DISPLAY") {
            let socket = format!("{}/{}", rt_dir, display);
            if Path::new(&socket).exists() {
                spec.add_mount(BindMount::new(
                    &socket,
                    format!("{}/{}", self.env.target_xdg_rt_dir(), display),
                ));
                spec.add_env("WAYLAND_DISPLAY", display);
            }
        }
    }

    fn enable_pulse(&self, spec: &mut ContainerSpec) {
        let cookie = self.env.home().join(".config/pulse/cookie");
        if cookie.exists() {
            spec.add_mount(BindMount::read_only(
                cookie.display().to_string(),
                format!("{}/.config/pulse/cookie", self.env.target_home()),
            ));
        }
        let rt_dir = self.env.xdg_rt_dir();
        if rt_dir.is_empty() {
            return;
        }
        let pulse = format!("{}/pulse/native", rt_dir);
        if Path::new(&pulse).exists() {
            spec.add_mount(BindMount::new(
                &pulse,
                format!("{}/pulse/native", self.env.target_xdg_rt_dir()),
            ));
        }
        // pipewire exposes numbered sockets next to the pulse one
        if let Ok(entries) = std::fs::read_dir(rt_dir) {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.starts_with("pipewire-") {
                    spec.add_mount(BindMount::new(
                        entry.path().display().to_string(),
                        format!("{}/{}", self.env.target_xdg_rt_dir(), name),
                    ));
                }
            }
        }
    }

    fn enable_dbus(&self, spec: &mut ContainerSpec, sys_enable: bool) {
        let rt_dir = self.env.xdg_rt_dir();
        if let Ok(session) = std::env::var("DBUS_SESSION_BUS_ADDRESS") {
            if let Some(path) = session
                .split(',')
                .next()
                .and_then(|part| part.split_once('=').map(|(_, p)| p))
            {
                let target = self.retarget_runtime_path(path);
                spec.add_mount(BindMount::new(path, &target));
                let target_session = if rt_dir.is_empty() {
                    session.clone()
                } else {
                    session.replacen(rt_dir, self.env.target_xdg_rt_dir(), 1)
                };
                spec.add_env("DBUS_SESSION_BUS_ADDRESS", target_session);
            }
        }
        if sys_enable {
            for socket in ["/run/dbus/system_bus_socket", "/var/run/dbus/system_bus_socket"] {
                if Path::new(socket).exists() {
                    spec.add_mount(BindMount::new(socket, socket));
                    break;
                }
            }
        }
    }

    fn share_agent_socket(&self, spec: &mut ContainerSpec, env_var: &str) {
        if let Ok(value) = std::env::var(env_var) {
            // agent values may carry :pid:proto suffixes after the path
            let path = value.split(':').next().unwrap_or(&value);
            if Path::new(path).exists() {
                let target = self.retarget_runtime_path(path);
                spec.add_mount(BindMount::new(path, &target));
                spec.add_env(env_var, value.replacen(path, &target, 1));
            }
        }
    }

    /// Rewrite a host runtime-dir path to the container user's runtime
    /// dir.
    fn retarget_runtime_path(&self, path: &str) -> String {
        let rt_dir = self.env.xdg_rt_dir();
        if rt_dir.is_empty() {
            path.to_string()
        } else {
            path.replacen(rt_dir, self.env.target_xdg_rt_dir(), 1)
        }
    }

    fn process_security(&self, profile: &IniDocument, spec: &mut ContainerSpec) -> YboxResult<()> {
        let section = profile.section("security").expect("checked by caller");
        for (key, value) in section.entries() {
            match key {
                "caps_add" => spec.caps_add.extend(split_csv(value)),
                "caps_drop" => spec.caps_drop.extend(split_csv(value)),
                "seccomp" => {
                    if !value.is_empty() {
                        spec.security_opts.push(format!("seccomp={}", value));
                    }
                }
                "apparmor" => {
                    if !value.is_empty() {
                        spec.security_opts.push(format!("apparmor={}", value));
                    }
                }
                "label" => {
                    if !value.is_empty() {
                        spec.security_opts.push(format!("label={}", value));
                    }
                }
                "no_new_privileges" => {
                    if bool_value("security", key, value)? {
                        spec.security_opts.push("no-new-privileges".to_string());
                    }
                }
                "ulimits" => spec.ulimits.extend(split_csv(value)),
                other => {
                    return Err(YboxError::Config(format!(
                        "unknown key '{}' in the [security] section of the profile or its includes",
                        other
                    )));
                }
            }
        }
        Ok(())
    }

    fn process_network(&self, profile: &IniDocument, spec: &mut ContainerSpec) -> YboxResult<()> {
        let section = profile.section("network").expect("checked by caller");
        for (key, value) in section.entries() {
            match key {
                "mode" => {
                    if !value.is_empty() {
                        spec.network = Some(value.to_string());
                    }
                }
                "host" => {
                    if !value.is_empty() {
                        spec.hostname = value.to_string();
                    }
                }
                other => {
                    return Err(YboxError::Config(format!(
                        "unknown key '{}' in the [network] section of the profile or its includes",
                        other
                    )));
                }
            }
        }
        Ok(())
    }

    fn process_mounts(&self, profile: &IniDocument, spec: &mut ContainerSpec) -> YboxResult<()> {
        let section = profile.section("mounts").expect("checked by caller");
        // keys are symbolic names that only exist so later profiles can
        // override earlier ones
        for (key, value) in section.entries() {
            if value.is_empty() {
                continue;
            }
            if value.contains('=') {
                spec.extra_args.push(format!("--mount={}", value));
                continue;
            }
            let parts: Vec<&str> = value.split(':').collect();
            match parts.as_slice() {
                [host, guest] => spec.add_mount(BindMount::new(*host, *guest)),
                [host, guest, mode] => spec.add_mount(BindMount {
                    host: host.to_string(),
                    guest: guest.to_string(),
                    mode: mode.to_string(),
                }),
                _ => {
                    return Err(YboxError::Config(format!(
                        "invalid mount value for '{}': '{}' (need host:guest[:mode])",
                        key, value
                    )));
                }
            }
        }
        Ok(())
    }

    fn process_env(&self, profile: &IniDocument, spec: &mut ContainerSpec) -> YboxResult<()> {
        let section = profile.section("env").expect("checked by caller");
        // a TMPDIR shared with the host lets apps expose files the host
        // side needs to see (tray icons over dbus, drag and drop)
        if section.get("TMPDIR").is_none() {
            let tmpdir = format!("/var/tmp/ybox.{}", self.container.name());
            std::fs::create_dir_all(&tmpdir)?;
            let mut perms = std::fs::metadata(&tmpdir)?.permissions();
            std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o1777);
            std::fs::set_permissions(&tmpdir, perms)?;
            spec.add_mount(BindMount::new(&tmpdir, &tmpdir));
            spec.add_env("TMPDIR", tmpdir);
        }
        for (key, value) in section.entries() {
            if value.is_empty() {
                spec.pass_env(key);
            } else {
                spec.add_env(key, value);
            }
        }
        Ok(())
    }

    fn process_configs(
        &self,
        profile: &IniDocument,
        hardlinks: bool,
        spec: &mut ContainerSpec,
    ) -> YboxResult<()> {
        let section = profile.section("configs").expect("checked by caller");
        let configs_dir = self.container.configs_dir();
        // recreate on every (re-)creation to pick up changed host files
        if configs_dir.exists() {
            std::fs::remove_dir_all(&configs_dir)?;
        }
        std::fs::create_dir_all(&configs_dir)?;

        let mut manifest = std::fs::File::create(self.container.config_list())?;
        for (key, value) in section.entries() {
            // environment expansion was skipped for this section, do the
            // host-side part now
            let expanded = interpolate::expand_env(value, &host_expand_context(self.env))?;
            let (src, dest_rel) = expanded.split_once("->").ok_or_else(|| {
                YboxError::Config(format!(
                    "incorrect value format in [configs] for '{}': need '<src> -> <dest>'",
                    key
                ))
            })?;
            let src = src.trim();
            let dest_rel = dest_rel.trim();
            if !Path::new(src).exists() {
                tracing::warn!("skipping inaccessible configuration path '{}'", src);
                continue;
            }
            let dest = configs_dir.join(dest_rel);
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            copy_or_link(Path::new(src), &dest, hardlinks)?;
            // the action tag tells the entrypoint how to materialize the
            // entry in the container home
            let action = if key.ends_with(":copy") {
                "COPY"
            } else if key.ends_with(":dir") {
                "LINK_DIR"
            } else {
                "LINK"
            };
            writeln!(manifest, "{}:{}", action, dest_rel)?;
        }
        spec.add_mount(BindMount::new(
            configs_dir.display().to_string(),
            self.container.target_configs_dir(self.env),
        ));
        Ok(())
    }

    fn process_apps(&self, profile: &IniDocument) -> YboxResult<Vec<(String, Vec<String>)>> {
        let section = profile.section("apps").expect("checked by caller");
        let mut apps_with_deps: Vec<(String, Vec<String>)> = Vec::new();
        let mut manifest = std::fs::File::create(self.container.app_list())?;
        let opt_dep_flag = self
            .distro
            .pkgmgr_opt(super::distro::PkgCmd::OptDepFlag)
            .to_string();
        let dep_re = regex::Regex::new(r"^(.*):dep\((.*)\)$").expect("static regex");
        for (_, value) in section.entries() {
            let entries: Vec<&str> = split_csv_str(value);
            let mut apps = Vec::new();
            let mut deps = Vec::new();
            for entry in entries {
                if let Some(caps) = dep_re.captures(entry) {
                    let dep = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
                    let parent = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
                    deps.push(dep.to_string());
                    match apps_with_deps.iter_mut().find(|(app, _)| app == parent) {
                        Some((_, parent_deps)) => parent_deps.push(dep.to_string()),
                        None => apps_with_deps.push((parent.to_string(), vec![dep.to_string()])),
                    }
                } else {
                    apps.push(entry.to_string());
                }
            }
            if !deps.is_empty() {
                writeln!(manifest, "{} {}", opt_dep_flag, deps.join(" "))?;
            }
            if !apps.is_empty() {
                writeln!(manifest, "{}", apps.join(" "))?;
                for app in apps {
                    if !apps_with_deps.iter().any(|(a, _)| a == &app) {
                        apps_with_deps.push((app, Vec::new()));
                    }
                }
            }
        }
        Ok(apps_with_deps)
    }

    fn process_startup(&self, profile: &IniDocument) -> YboxResult<()> {
        let section = profile.section("startup").expect("checked by caller");
        let mut manifest = std::fs::File::create(self.container.startup_list())?;
        for (_, value) in section.entries() {
            if !value.is_empty() {
                writeln!(manifest, "{}", value)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
struct BaseOptions {
    shared_root: String,
    /// None means skip the [configs] section entirely.
    config_hardlinks: Option<bool>,
    config_locale: bool,
}

impl Default for BaseOptions {
    fn default() -> Self {
        Self {
            shared_root: String::new(),
            config_hardlinks: Some(false),
            config_locale: true,
        }
    }
}

fn bool_value(section: &str, key: &str, value: &str) -> YboxResult<bool> {
    parse_bool(value).map_err(|_| {
        YboxError::Config(format!(
            "not a boolean for '{}.{}': '{}'",
            section, key, value
        ))
    })
}

/// Context for host-side expansion of `[configs]` sources.
fn host_expand_context(env: &Environ) -> ExpandContext {
    ExpandContext::new()
        .placeholder("HOME", env.home().display().to_string())
        .placeholder("USER", env.user())
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

fn split_csv_str(value: &str) -> Vec<&str> {
    value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect()
}

/// Copy a file or directory tree, hard-linking individual files when
/// requested (falling back to a copy on cross-device errors).
fn copy_or_link(src: &Path, dest: &Path, hardlink: bool) -> YboxResult<()> {
    let meta = std::fs::metadata(src)?;
    if meta.is_dir() {
        std::fs::create_dir_all(dest)?;
        for entry in walkdir::WalkDir::new(src).min_depth(1) {
            let entry = entry
                .map_err(|e| YboxError::Storage(format!("walking '{}': {}", src.display(), e)))?;
            let rel = entry
                .path()
                .strip_prefix(src)
                .map_err(|e| YboxError::Internal(e.to_string()))?;
            let target = dest.join(rel);
            if entry.file_type().is_dir() {
                std::fs::create_dir_all(&target)?;
            } else if entry.file_type().is_file() {
                link_or_copy_file(entry.path(), &target, hardlink)?;
            }
            // special files (sockets, fifos) are skipped
        }
        Ok(())
    } else {
        link_or_copy_file(src, dest, hardlink)
    }
}

fn link_or_copy_file(src: &Path, dest: &Path, hardlink: bool) -> YboxResult<()> {
    if dest.exists() {
        std::fs::remove_file(dest)?;
    }
    if hardlink {
        if std::fs::hard_link(src, dest).is_ok() {
            return Ok(());
        }
        // cross-device links fail, fall through to a copy
    }
    std::fs::copy(src, dest)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::distro::DistroConfig;
    use tempfile::TempDir;

    fn test_distro() -> DistroConfig {
        let doc = IniDocument::parse(
            "[base]\nname = Arch\nimage = img\nshared_root_dirs = /etc,/usr\n\
             [pkgmgr]\nopt_dep_flag = --asdeps\n",
            "test",
        )
        .unwrap();
        DistroConfig::new("arch", doc).unwrap()
    }

    fn test_env(engine_dir: &Path) -> Environ {
        // a stub engine script that identifies as podman
        let engine = engine_dir.join("podman");
        std::fs::write(&engine, "#!/bin/sh\necho podman version 4.9.0\n").unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&engine, std::fs::Permissions::from_mode(0o755)).unwrap();
        Environ::with_engine(engine).unwrap()
    }

    #[test]
    fn test_compile_minimal_profile() {
        let temp_dir = TempDir::new().unwrap();
        let env = test_env(temp_dir.path());
        let data = DataLayout::new(temp_dir.path().join("data"));
        let container = data.container("c1");
        container.prepare().unwrap();
        let distro = test_distro();
        let compiler = ProfileCompiler::new(&env, &data, &container, &distro);

        let profile = IniDocument::parse(
            "[base]\nname = basic\nshared_root = true\nconfig_locale = true\n\
             [security]\nno_new_privileges = true\n\
             [env]\nEDITOR = vim\n\
             [apps]\neditors = neovim, qt5ct:dep(neovim)\n",
            "test",
        )
        .unwrap();
        let compiled = compiler.compile(profile).unwrap();

        assert_eq!(
            compiled.shared_root,
            data.shared_root_for("arch").display().to_string()
        );
        assert!(compiled
            .spec
            .security_opts
            .contains(&"no-new-privileges".to_string()));
        assert!(compiled
            .spec
            .env
            .iter()
            .any(|e| matches!(e, crate::engine::EnvEntry::Set(k, v) if k == "EDITOR" && v == "vim")));
        assert_eq!(
            compiled.apps_with_deps,
            vec![("neovim".to_string(), vec!["qt5ct".to_string()])]
        );
        let app_list = std::fs::read_to_string(container.app_list()).unwrap();
        assert!(app_list.contains("--asdeps qt5ct"));
        assert!(app_list.contains("neovim"));
    }

    #[test]
    fn test_home_share_requires_opt_in() {
        let temp_dir = TempDir::new().unwrap();
        let env = test_env(temp_dir.path());
        let data = DataLayout::new(temp_dir.path().join("data"));
        let container = data.container("c1");
        container.prepare().unwrap();
        let distro = test_distro();
        let compiler = ProfileCompiler::new(&env, &data, &container, &distro);

        let profile = IniDocument::parse(
            &format!("[base]\nhome = {}\n", env.home().display()),
            "test",
        )
        .unwrap();
        let err = compiler.compile(profile).unwrap_err();
        assert!(err.to_string().contains("allow_home_share"));
    }

    #[test]
    fn test_forbidden_custom_options_stripped() {
        let temp_dir = TempDir::new().unwrap();
        let env = test_env(temp_dir.path());
        let data = DataLayout::new(temp_dir.path().join("data"));
        let container = data.container("c1");
        container.prepare().unwrap();
        let distro = test_distro();
        let compiler = ProfileCompiler::new(&env, &data, &container, &distro);

        let profile = IniDocument::parse(
            "[base]\ncustom_options = --privileged --pull=newer\n",
            "test",
        )
        .unwrap();
        let compiled = compiler.compile(profile).unwrap();
        assert!(!compiled.spec.extra_args.contains(&"--privileged".to_string()));
        assert!(compiled.spec.extra_args.contains(&"--pull=newer".to_string()));
    }

    #[test]
    fn test_unknown_section_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let env = test_env(temp_dir.path());
        let data = DataLayout::new(temp_dir.path().join("data"));
        let container = data.container("c1");
        container.prepare().unwrap();
        let distro = test_distro();
        let compiler = ProfileCompiler::new(&env, &data, &container, &distro);

        let profile = IniDocument::parse("[base]\nname = x\n[bogus]\nk = v\n", "test").unwrap();
        let err = compiler.compile(profile).unwrap_err();
        assert!(err.to_string().contains("[bogus]"));
    }
}
