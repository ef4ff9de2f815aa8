//! Structured container specification handed to the engine adapter.
//!
//! A `ContainerSpec` is the output of the profile compiler and the only
//! input to container creation: everything the engine needs is carried
//! as structured values (argv vectors and maps, never shell strings).

use serde::{Deserialize, Serialize};

/// A bind mount `(host, guest, mode)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindMount {
    pub host: String,
    pub guest: String,
    /// Mount options like `ro`; empty for the engine default.
    pub mode: String,
}

impl BindMount {
    pub fn new(host: impl Into<String>, guest: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            guest: guest.into(),
            mode: String::new(),
        }
    }

    pub fn read_only(host: impl Into<String>, guest: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            guest: guest.into(),
            mode: "ro".to_string(),
        }
    }

    /// Render as the engine `-v=` argument value.
    pub fn to_arg(&self) -> String {
        if self.mode.is_empty() {
            format!("{}:{}", self.host, self.guest)
        } else {
            format!("{}:{}:{}", self.host, self.guest, self.mode)
        }
    }
}

/// An environment entry: a fixed value or a pass-through of the host
/// value at engine invocation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvEntry {
    Set(String, String),
    PassThrough(String),
}

/// User namespace handling for the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UserNsMode {
    /// podman `--userns=keep-id`: host UID maps to itself.
    #[default]
    KeepId,
    /// Engine default mapping; used with rootless docker where the
    /// container runs as root and the entrypoint rewrites ownership
    /// using `YBOX_HOST_UID`/`YBOX_HOST_GID`.
    None,
}

/// Everything needed to create and run one container.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub image: String,
    pub name: String,
    pub hostname: String,
    /// `uid` of the container user, or `None` for the engine default
    /// (docker rootless fallback runs as root).
    pub user: Option<u32>,
    pub userns: UserNsMode,
    pub env: Vec<EnvEntry>,
    pub mounts: Vec<BindMount>,
    pub devices: Vec<String>,
    pub caps_add: Vec<String>,
    pub caps_drop: Vec<String>,
    /// `--security-opt` values (`no-new-privileges`,
    /// `seccomp=<path>`, `label=disable`, `apparmor=<profile>`).
    pub security_opts: Vec<String>,
    pub ulimits: Vec<String>,
    pub network: Option<String>,
    pub shm_size: Option<String>,
    pub pids_limit: Option<String>,
    pub memory: Option<String>,
    pub log_driver: Option<String>,
    pub log_opts: Vec<String>,
    pub labels: Vec<(String, String)>,
    pub working_dir: Option<String>,
    /// Entrypoint path inside the container.
    pub entrypoint: Option<String>,
    /// Arguments passed to the entrypoint.
    pub command: Vec<String>,
    /// Additional raw engine arguments from `base.custom_options`,
    /// already filtered of never-permitted flags.
    pub extra_args: Vec<String>,
}

impl ContainerSpec {
    pub fn new(image: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn add_env(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.env.push(EnvEntry::Set(key.into(), value.into()));
    }

    /// Pass a host environment variable through unchanged.
    pub fn pass_env(&mut self, key: impl Into<String>) {
        self.env.push(EnvEntry::PassThrough(key.into()));
    }

    pub fn add_mount(&mut self, mount: BindMount) {
        self.mounts.push(mount);
    }

    pub fn add_label(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.labels.push((key.into(), value.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_mount_args() {
        assert_eq!(BindMount::new("/a", "/b").to_arg(), "/a:/b");
        assert_eq!(BindMount::read_only("/a", "/b").to_arg(), "/a:/b:ro");
    }
}
