//! User environment discovery: the container engine, the target user
//! inside containers, and the host directories ybox works with.

use std::path::{Path, PathBuf};
use std::process::Command;

use ybox_shared::errors::{YboxError, YboxResult};

/// Environment variable naming a custom podman/docker executable.
pub const CONTAINER_MANAGER_ENV: &str = "YBOX_CONTAINER_MANAGER";

/// Environment variable overriding the system configuration directory
/// that holds the bundled profiles and distribution INIs.
pub const SYS_CONF_DIR_ENV: &str = "YBOX_SYS_CONF_DIR";

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Locate the container engine executable: `YBOX_CONTAINER_MANAGER` if
/// set (must be executable), else podman then docker in /usr/bin.
pub fn find_engine_binary() -> YboxResult<PathBuf> {
    if let Ok(cmd) = std::env::var(CONTAINER_MANAGER_ENV) {
        let path = PathBuf::from(&cmd);
        if is_executable(&path) {
            return Ok(path);
        }
        return Err(YboxError::Engine(format!(
            "cannot execute '{}' provided in {}",
            cmd, CONTAINER_MANAGER_ENV
        )));
    }
    for candidate in ["/usr/bin/podman", "/usr/bin/docker"] {
        let path = PathBuf::from(candidate);
        if is_executable(&path) {
            return Ok(path);
        }
    }
    Err(YboxError::Engine(format!(
        "no podman/docker found in /usr/bin and ${} not defined",
        CONTAINER_MANAGER_ENV
    )))
}

/// Common environment details resolved once per invocation: the engine
/// executable, whether it is podman, the user mapped into containers and
/// the host directory layout roots.
#[derive(Debug, Clone)]
pub struct Environ {
    home: PathBuf,
    engine_cmd: PathBuf,
    uses_podman: bool,
    user: String,
    uid: u32,
    gid: u32,
    target_user: String,
    target_home: String,
    data_dir: PathBuf,
    target_data_dir: String,
    xdg_rt_dir: String,
    target_xdg_rt_dir: String,
    user_config_dir: PathBuf,
    sys_conf_dir: Option<PathBuf>,
    user_applications_dir: PathBuf,
    user_executables_dir: PathBuf,
    user_man_dir: PathBuf,
}

impl Environ {
    /// Resolve the environment using the detected engine binary.
    pub fn new() -> YboxResult<Self> {
        Self::with_engine(find_engine_binary()?)
    }

    /// Resolve the environment for a given engine executable. Probes the
    /// binary once with `--version` to distinguish podman from docker
    /// and verifies docker runs in rootless mode.
    pub fn with_engine(engine_cmd: PathBuf) -> YboxResult<Self> {
        let version_out = Command::new(&engine_cmd)
            .arg("--version")
            .output()
            .map_err(|e| {
                YboxError::Engine(format!("failed to run {} --version: {}", engine_cmd.display(), e))
            })?;
        let uses_podman = String::from_utf8_lossy(&version_out.stdout)
            .to_lowercase()
            .contains("podman");
        if !uses_podman {
            // podman is rootless for a non-root caller in any case; docker
            // must be explicitly configured for it
            let ctx = Command::new(&engine_cmd)
                .args(["context", "show"])
                .output()
                .map_err(|e| YboxError::Engine(format!("failed to run docker context show: {}", e)))?;
            let ctx = String::from_utf8_lossy(&ctx.stdout).trim().to_string();
            if ctx != "rootless" {
                return Err(YboxError::Engine(format!(
                    "docker must use rootless mode but the current context is '{}'",
                    ctx
                )));
            }
        }

        let home = dirs::home_dir()
            .ok_or_else(|| YboxError::Internal("cannot determine home directory".into()))?;
        let uid = nix::unistd::Uid::current().as_raw();
        let gid = nix::unistd::Gid::current().as_raw();
        let user = nix::unistd::User::from_uid(nix::unistd::Uid::current())
            .ok()
            .flatten()
            .map(|u| u.name)
            .or_else(|| std::env::var("USER").ok())
            .ok_or_else(|| YboxError::Internal("cannot determine current user name".into()))?;

        // the container user home is always under /home with podman since
        // the UID is mapped with keep-id, while rootless docker runs the
        // container as root and the entrypoint rewrites ownership
        let (target_user, target_home) = if uses_podman {
            (user.clone(), format!("/home/{}", user))
        } else {
            ("root".to_string(), "/root".to_string())
        };
        let target_uid = if uses_podman { uid } else { 0 };

        let xdg_data_home = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join(".local/share"));
        let user_config_dir = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join(".config"))
            .join("ybox");
        let sys_conf_dir = std::env::var(SYS_CONF_DIR_ENV).ok().map(PathBuf::from);

        Ok(Environ {
            engine_cmd,
            uses_podman,
            uid,
            gid,
            user,
            target_user,
            target_data_dir: format!("{}/.local/share/ybox", target_home),
            target_home,
            data_dir: xdg_data_home.join("ybox"),
            xdg_rt_dir: std::env::var("XDG_RUNTIME_DIR").unwrap_or_default(),
            target_xdg_rt_dir: format!("/run/user/{}", target_uid),
            user_config_dir,
            sys_conf_dir,
            user_applications_dir: xdg_data_home.join("applications"),
            user_executables_dir: home.join(".local/bin"),
            user_man_dir: xdg_data_home.join("man"),
            home,
        })
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    /// The podman/docker executable used for all engine commands.
    pub fn engine_cmd(&self) -> &Path {
        &self.engine_cmd
    }

    pub fn uses_podman(&self) -> bool {
        self.uses_podman
    }

    /// Current host user name.
    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn gid(&self) -> u32 {
        self.gid
    }

    /// User name inside the container (host user for podman, root for
    /// rootless docker).
    pub fn target_user(&self) -> &str {
        &self.target_user
    }

    /// Home directory of the container user.
    pub fn target_home(&self) -> &str {
        &self.target_home
    }

    /// Base host directory for all container runtime data.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Counterpart of [`Environ::data_dir`] inside the container.
    pub fn target_data_dir(&self) -> &str {
        &self.target_data_dir
    }

    pub fn xdg_rt_dir(&self) -> &str {
        &self.xdg_rt_dir
    }

    pub fn target_xdg_rt_dir(&self) -> &str {
        &self.target_xdg_rt_dir
    }

    /// Host directory for generated wrapper desktop files.
    pub fn user_applications_dir(&self) -> &Path {
        &self.user_applications_dir
    }

    /// Host directory for generated wrapper executables; expected to be
    /// in $PATH.
    pub fn user_executables_dir(&self) -> &Path {
        &self.user_executables_dir
    }

    /// Host directory for man page links.
    pub fn user_man_dir(&self) -> &Path {
        &self.user_man_dir
    }

    /// Search for a configuration path in the user configuration
    /// directory and then the system configuration directory. Absolute
    /// paths are returned as-is when readable. Returns `None` when not
    /// found on disk (the caller may fall back to builtin resources).
    pub fn find_config(&self, conf_path: &str, only_sys_conf: bool) -> Option<PathBuf> {
        if conf_path.starts_with('/') {
            let path = PathBuf::from(conf_path);
            return path.exists().then_some(path);
        }
        let mut dirs: Vec<&Path> = Vec::new();
        if !only_sys_conf {
            dirs.push(&self.user_config_dir);
        }
        if let Some(sys_dir) = &self.sys_conf_dir {
            dirs.push(sys_dir);
        }
        for dir in dirs {
            let path = dir.join(conf_path);
            if path.exists() {
                return Some(path);
            }
        }
        None
    }
}
