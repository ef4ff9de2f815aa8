//! Adapter over the external container engine (rootless podman or
//! docker).
//!
//! Every operation is built as an argv vector and invoked as a
//! subprocess; no shell string ever reaches the host side. Shell
//! quoting happens exactly once, at the guest boundary, where a command
//! is handed to `/bin/bash -c` inside the container as a single argv
//! element.

pub mod spec;

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use ybox_shared::constants;
use ybox_shared::errors::{YboxError, YboxResult};

use crate::env::Environ;
use crate::interrupt;

pub use spec::{BindMount, ContainerSpec, EnvEntry, UserNsMode};

/// Captured result of an engine subprocess.
#[derive(Debug)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Handle to the detected engine binary.
#[derive(Debug, Clone)]
pub struct Engine {
    cmd: PathBuf,
    uses_podman: bool,
}

impl Engine {
    pub fn from_env(env: &Environ) -> Self {
        Self {
            cmd: env.engine_cmd().to_path_buf(),
            uses_podman: env.uses_podman(),
        }
    }

    pub fn new(cmd: PathBuf, uses_podman: bool) -> Self {
        Self { cmd, uses_podman }
    }

    pub fn cmd(&self) -> &Path {
        &self.cmd
    }

    pub fn uses_podman(&self) -> bool {
        self.uses_podman
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.cmd);
        cmd.args(args);
        cmd
    }

    /// Run an engine command inheriting stdio; non-zero exit is an
    /// engine error tagged with `context`.
    pub fn run_checked(&self, args: &[String], context: &str) -> YboxResult<()> {
        tracing::debug!(engine = %self.cmd.display(), ?args, "running engine command");
        let status = self
            .command(args)
            .status()
            .map_err(|e| YboxError::Engine(format!("failed to invoke engine for {}: {}", context, e)))?;
        if interrupt::interrupted() {
            return Err(YboxError::Interrupted);
        }
        if !status.success() {
            return Err(YboxError::Engine(format!(
                "{} failed with exit code {}",
                context,
                status.code().unwrap_or(-1)
            )));
        }
        Ok(())
    }

    /// Run an engine command capturing stdout/stderr.
    pub fn run_capture(&self, args: &[String]) -> YboxResult<CommandOutput> {
        tracing::debug!(engine = %self.cmd.display(), ?args, "running engine command (captured)");
        let output = self
            .command(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| YboxError::Engine(format!("failed to invoke engine: {}", e)))?;
        if interrupt::interrupted() {
            return Err(YboxError::Interrupted);
        }
        Ok(CommandOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    // ------------------------------------------------------------------
    // container lifecycle
    // ------------------------------------------------------------------

    /// Build the full `run` argv for a spec. Exposed for tests.
    pub fn build_run_args(&self, spec: &ContainerSpec, detach: bool) -> Vec<String> {
        let mut args: Vec<String> = vec!["run".into()];
        if detach {
            args.push("-itd".into());
        }
        args.push(format!("--name={}", spec.name));
        if !spec.hostname.is_empty() {
            args.push(format!("--hostname={}", spec.hostname));
        }
        match spec.userns {
            UserNsMode::KeepId => {
                // only podman understands keep-id; docker rootless runs
                // as root and the entrypoint remaps ownership
                if self.uses_podman {
                    args.push("--userns=keep-id".into());
                    if let Some(uid) = spec.user {
                        args.push(format!("--user={}", uid));
                    }
                } else {
                    args.push("--user=0".into());
                }
            }
            UserNsMode::None => {
                args.push("--user=0".into());
            }
        }
        for entry in &spec.env {
            match entry {
                EnvEntry::Set(key, value) => args.push(format!("-e={}={}", key, value)),
                EnvEntry::PassThrough(key) => args.push(format!("-e={}", key)),
            }
        }
        for mount in &spec.mounts {
            args.push(format!("-v={}", mount.to_arg()));
        }
        for device in &spec.devices {
            args.push(format!("--device={}", device));
        }
        for cap in &spec.caps_add {
            args.push(format!("--cap-add={}", cap));
        }
        for cap in &spec.caps_drop {
            args.push(format!("--cap-drop={}", cap));
        }
        for opt in &spec.security_opts {
            args.push(format!("--security-opt={}", opt));
        }
        for ulimit in &spec.ulimits {
            args.push(format!("--ulimit={}", ulimit));
        }
        if let Some(network) = &spec.network {
            args.push(format!("--network={}", network));
        }
        if let Some(shm_size) = &spec.shm_size {
            args.push(format!("--shm-size={}", shm_size));
        }
        if let Some(pids_limit) = &spec.pids_limit {
            args.push(format!("--pids-limit={}", pids_limit));
        }
        if let Some(memory) = &spec.memory {
            args.push(format!("--memory={}", memory));
        }
        if let Some(log_driver) = &spec.log_driver {
            args.push(format!("--log-driver={}", log_driver));
        }
        for opt in &spec.log_opts {
            args.push(format!("--log-opt={}", opt));
        }
        for (key, value) in &spec.labels {
            args.push(format!("--label={}={}", key, value));
        }
        if let Some(working_dir) = &spec.working_dir {
            args.push(format!("--workdir={}", working_dir));
        }
        if let Some(entrypoint) = &spec.entrypoint {
            args.push(format!("--entrypoint={}", entrypoint));
        }
        args.extend(spec.extra_args.iter().cloned());
        args.push(spec.image.clone());
        args.extend(spec.command.iter().cloned());
        args
    }

    /// Create and start a container from a spec (detached).
    pub fn create(&self, spec: &ContainerSpec) -> YboxResult<()> {
        let args = self.build_run_args(spec, true);
        self.run_checked(&args, &format!("launching container '{}'", spec.name))
    }

    /// Run a container in the foreground and wait for it to finish
    /// (used by the base and copy phases of container creation).
    pub fn run_foreground(&self, spec: &ContainerSpec, context: &str) -> YboxResult<()> {
        let args = self.build_run_args(spec, false);
        self.run_checked(&args, context)
    }

    pub fn start(&self, name: &str) -> YboxResult<()> {
        self.run_checked(
            &["container".into(), "start".into(), name.into()],
            &format!("starting container '{}'", name),
        )
    }

    /// Stop with a timeout after which the engine kills the container.
    pub fn stop(&self, name: &str, timeout_secs: u64) -> YboxResult<()> {
        let result = self.run_capture(&[
            "container".into(),
            "stop".into(),
            format!("-t={}", timeout_secs),
            name.into(),
        ])?;
        if result.success() {
            return Ok(());
        }
        tracing::warn!(container = name, stderr = %result.stderr.trim(),
            "graceful stop failed, killing");
        self.run_checked(
            &["container".into(), "kill".into(), name.into()],
            &format!("killing container '{}'", name),
        )
    }

    pub fn rm(&self, name: &str, force: bool) -> YboxResult<()> {
        let mut args: Vec<String> = vec!["container".into(), "rm".into()];
        if force {
            args.push("--force".into());
        }
        args.push(name.into());
        self.run_checked(&args, &format!("removing container '{}'", name))
    }

    /// Remove a container ignoring failures (cleanup paths).
    pub fn rm_quiet(&self, name: &str) {
        let _ = self.run_capture(&["container".into(), "rm".into(), "--force".into(), name.into()]);
    }

    pub fn logs(&self, name: &str, follow: bool) -> YboxResult<()> {
        let mut args: Vec<String> = vec!["logs".into()];
        if follow {
            args.push("--follow".into());
        }
        args.push(name.into());
        self.run_checked(&args, &format!("showing logs of '{}'", name))
    }

    /// List container names, optionally including stopped ones, always
    /// requesting a template form the adapter controls.
    pub fn list_names(&self, all: bool, label_filter: Option<&str>) -> YboxResult<Vec<String>> {
        let mut args: Vec<String> = vec!["container".into(), "ls".into()];
        if all {
            args.push("--all".into());
        }
        if let Some(label) = label_filter {
            args.push(format!("--filter=label={}", label));
        }
        args.push("--format={{ .Names }}".into());
        let result = self.run_capture(&args)?;
        if !result.success() {
            return Err(YboxError::Engine(format!(
                "listing containers failed: {}",
                result.stderr.trim()
            )));
        }
        Ok(result
            .stdout
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    /// List with a caller-provided format template (`ls --format=...`).
    pub fn list_formatted(
        &self,
        all: bool,
        label_filter: Option<&str>,
        format: &str,
    ) -> YboxResult<String> {
        let mut args: Vec<String> = vec!["container".into(), "ls".into()];
        if all {
            args.push("--all".into());
        }
        if let Some(label) = label_filter {
            args.push(format!("--filter=label={}", label));
        }
        args.push(format!("--format={}", format));
        let result = self.run_capture(&args)?;
        if !result.success() {
            return Err(YboxError::Engine(format!(
                "listing containers failed: {}",
                result.stderr.trim()
            )));
        }
        Ok(result.stdout)
    }

    /// Inspect the ybox type label and engine state of a container.
    /// Returns `None` when the container does not exist.
    pub fn inspect_state(&self, name: &str) -> YboxResult<Option<(String, String)>> {
        let format = format!(
            "--format={{{{index .Config.Labels \"{}\"}}}} {{{{.State.Status}}}}",
            constants::CONTAINER_TYPE_LABEL
        );
        let result = self.run_capture(&[
            "inspect".into(),
            "--type=container".into(),
            format,
            name.into(),
        ])?;
        if !result.success() {
            return Ok(None);
        }
        let text = result.stdout.trim();
        let (label, state) = text.split_once(' ').unwrap_or((text, ""));
        Ok(Some((label.to_string(), state.to_string())))
    }

    // ------------------------------------------------------------------
    // exec
    // ------------------------------------------------------------------

    /// Argv to run a shell command inside the container. The command
    /// string is passed as one argv element to bash; this is the only
    /// point where guest-side shell interpretation happens.
    pub fn bash_exec_args(&self, container: &str, cmd: &str, enable_pty: bool) -> Vec<String> {
        let mut args: Vec<String> = vec!["exec".into()];
        if enable_pty {
            args.push("-it".into());
        }
        args.extend([
            container.to_string(),
            "/bin/bash".to_string(),
            "-c".to_string(),
            cmd.to_string(),
        ]);
        args
    }

    /// Run a shell command inside the container inheriting stdio.
    pub fn exec_shell(&self, container: &str, cmd: &str, enable_pty: bool) -> YboxResult<i32> {
        let args = self.bash_exec_args(container, cmd, enable_pty);
        tracing::debug!(container, cmd, "exec in container");
        let status = self
            .command(&args)
            .status()
            .map_err(|e| YboxError::Engine(format!("failed to exec in '{}': {}", container, e)))?;
        if interrupt::interrupted() {
            return Err(YboxError::Interrupted);
        }
        Ok(status.code().unwrap_or(-1))
    }

    /// Run a shell command inside the container capturing stdout.
    pub fn exec_capture(&self, container: &str, cmd: &str) -> YboxResult<CommandOutput> {
        let args = self.bash_exec_args(container, cmd, false);
        self.run_capture(&args)
    }

    /// A prepared `std::process::Command` for streaming exec use
    /// (callers attach pipes and drive the child themselves).
    pub fn exec_command(&self, container: &str, cmd: &str, enable_pty: bool) -> Command {
        let args = self.bash_exec_args(container, cmd, enable_pty);
        self.command(&args)
    }

    /// Run a raw argv inside the container (no shell), inheriting
    /// stdio. Returns the exit code.
    pub fn exec_argv(&self, container: &str, argv: &[String], enable_pty: bool) -> YboxResult<i32> {
        let mut args: Vec<String> = vec!["exec".into()];
        if enable_pty {
            args.push("-it".into());
        }
        args.push(container.into());
        args.extend(argv.iter().cloned());
        let status = self
            .command(&args)
            .status()
            .map_err(|e| YboxError::Engine(format!("failed to exec in '{}': {}", container, e)))?;
        if interrupt::interrupted() {
            return Err(YboxError::Interrupted);
        }
        Ok(status.code().unwrap_or(-1))
    }

    /// Run a raw argv inside the container (no shell), capturing output.
    pub fn exec_argv_capture(&self, container: &str, argv: &[&str]) -> YboxResult<CommandOutput> {
        let mut args: Vec<String> = vec!["exec".into(), container.into()];
        args.extend(argv.iter().map(|a| a.to_string()));
        self.run_capture(&args)
    }

    // ------------------------------------------------------------------
    // images
    // ------------------------------------------------------------------

    pub fn image_exists(&self, image: &str) -> YboxResult<bool> {
        let result = self.run_capture(&[
            "inspect".into(),
            "--type=image".into(),
            "--format={{.Id}}".into(),
            image.into(),
        ])?;
        Ok(result.success())
    }

    pub fn pull(&self, image: &str) -> YboxResult<()> {
        self.run_checked(
            &["pull".into(), image.into()],
            &format!("fetching image '{}'", image),
        )
    }

    /// Commit a stopped container as an image, fixing USER and WORKDIR
    /// to the target user.
    pub fn commit(
        &self,
        container: &str,
        image: &str,
        target_user: &str,
        target_home: &str,
    ) -> YboxResult<()> {
        self.run_checked(
            &[
                "commit".into(),
                "--change".into(),
                format!("USER {}", target_user),
                "--change".into(),
                format!("WORKDIR {}", target_home),
                container.into(),
                image.into(),
            ],
            &format!("committing container '{}' as '{}'", container, image),
        )
    }

    pub fn remove_image(&self, image: &str) {
        if let Err(err) = self.run_checked(
            &["image".into(), "rm".into(), image.into()],
            &format!("removing image '{}'", image),
        ) {
            tracing::warn!("{}", err);
        }
    }
}

/// Check if the given container exists and carries the primary ybox
/// label, optionally restricted to a set of engine states.
pub fn check_ybox_state(
    engine: &Engine,
    name: &str,
    expected_states: &[&str],
) -> YboxResult<bool> {
    match engine.inspect_state(name)? {
        None => Ok(false),
        Some((label, state)) => {
            if label != constants::CONTAINER_TYPE_PRIMARY {
                return Ok(false);
            }
            Ok(expected_states.is_empty() || expected_states.contains(&state.as_str()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn podman() -> Engine {
        Engine::new(PathBuf::from("/usr/bin/podman"), true)
    }

    fn docker() -> Engine {
        Engine::new(PathBuf::from("/usr/bin/docker"), false)
    }

    #[test]
    fn test_build_run_args_podman_keep_id() {
        let mut spec = ContainerSpec::new("quay.io/arch:latest", "c1");
        spec.user = Some(1000);
        spec.add_env("A", "1");
        spec.pass_env("LANG");
        spec.add_mount(BindMount::read_only("/data/scripts", "/usr/local/ybox"));
        spec.caps_drop.push("ALL".into());
        spec.security_opts.push("no-new-privileges".into());
        spec.entrypoint = Some("/usr/local/ybox/entrypoint.sh".into());
        spec.command = vec!["c1".into()];

        let args = podman().build_run_args(&spec, true);
        assert_eq!(args[0], "run");
        assert_eq!(args[1], "-itd");
        assert!(args.contains(&"--name=c1".to_string()));
        assert!(args.contains(&"--userns=keep-id".to_string()));
        assert!(args.contains(&"--user=1000".to_string()));
        assert!(args.contains(&"-e=A=1".to_string()));
        assert!(args.contains(&"-e=LANG".to_string()));
        assert!(args.contains(&"-v=/data/scripts:/usr/local/ybox:ro".to_string()));
        assert!(args.contains(&"--cap-drop=ALL".to_string()));
        assert!(args.contains(&"--security-opt=no-new-privileges".to_string()));
        // image comes before the command argv
        let image_idx = args.iter().position(|a| a == "quay.io/arch:latest").unwrap();
        assert_eq!(args[image_idx + 1], "c1");
    }

    #[test]
    fn test_build_run_args_docker_falls_back_to_root() {
        let mut spec = ContainerSpec::new("img", "c1");
        spec.user = Some(1000);
        let args = docker().build_run_args(&spec, true);
        assert!(args.contains(&"--user=0".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("--userns")));
    }

    #[test]
    fn test_bash_exec_args() {
        let args = podman().bash_exec_args("c1", "pacman -S vim", false);
        assert_eq!(
            args,
            vec!["exec", "c1", "/bin/bash", "-c", "pacman -S vim"]
        );
        let args_tty = podman().bash_exec_args("c1", "true", true);
        assert_eq!(args_tty[1], "-it");
    }
}
