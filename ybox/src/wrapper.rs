//! Host-side wrappers for container applications: rewritten `.desktop`
//! entries, executable shims and man page links, so guest applications
//! behave as if installed on the host.
//!
//! Generated names carry the container name as a prefix
//! (`<container>-<basename>`) which keeps entries from different
//! containers apart. Every generated path is recorded in the package's
//! `local_copies` so uninstall can remove them; removal ignores files
//! that are already gone.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use ybox_shared::constants;
use ybox_shared::errors::{YboxError, YboxResult};

use crate::engine::Engine;
use crate::env::Environ;
use crate::state::CopyType;

/// Matches `Exec=`/`TryExec=` lines of a desktop entry, splitting the
/// program from its arguments (field codes like %f/%u stay in the
/// argument group and are preserved in position).
fn exec_line_re() -> &'static regex::Regex {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"(?m)^(\s*(?:Try)?Exec\s*=\s*)(\S+)[ \t]*(.*?)[ \t]*$")
            .expect("static regex")
    })
}

/// Matches the man section directory in a guest man page path.
fn man_path_re() -> &'static regex::Regex {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"^/usr(?:/local)?/share/man/(man[0-9lnp][^/]*)/(.+)$")
            .expect("static regex")
    })
}

/// Expand `!p` (program) and `!a` (arguments) in an app_flags value,
/// honoring `!!` as an escape for a literal `!`.
fn apply_flags(flags: &str, program: &str, args: &str) -> String {
    let mut out = String::with_capacity(flags.len());
    let mut rest = flags;
    while let Some(pos) = rest.find('!') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos + 1..];
        match tail.chars().next() {
            Some('!') => {
                out.push('!');
                rest = &tail[1..];
            }
            Some('p') => {
                out.push_str(program);
                rest = &tail[1..];
            }
            Some('a') => {
                out.push_str(args);
                rest = &tail[1..];
            }
            _ => {
                out.push('!');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Generates and removes host wrappers for one container.
pub struct WrapperGenerator<'a> {
    env: &'a Environ,
    engine: &'a Engine,
    container: &'a str,
}

impl<'a> WrapperGenerator<'a> {
    pub fn new(env: &'a Environ, engine: &'a Engine, container: &'a str) -> Self {
        Self {
            env,
            engine,
            container,
        }
    }

    /// Create wrappers for the given guest files of a package and
    /// return the host paths created. `files` is the package's file
    /// list as produced by the distribution's `list_files` template.
    pub fn generate(
        &self,
        copy_type: CopyType,
        app_flags: &HashMap<String, String>,
        files: &[String],
        shared_root: &str,
    ) -> YboxResult<Vec<String>> {
        let mut created = Vec::new();
        if copy_type.is_empty() {
            return Ok(created);
        }
        for file in files {
            let file = file.trim();
            if file.is_empty() || file.ends_with('/') {
                continue;
            }
            let dir = match file.rfind('/') {
                Some(idx) => &file[..idx],
                None => continue,
            };
            let name = &file[dir.len() + 1..];
            if copy_type.contains(CopyType::DESKTOP)
                && constants::CONTAINER_DESKTOP_DIRS.contains(&dir)
                && name.ends_with(".desktop")
            {
                if let Some(path) = self.wrap_desktop_file(file, name, app_flags)? {
                    created.push(path);
                }
                continue;
            }
            if copy_type.contains(CopyType::EXECUTABLE) {
                if constants::CONTAINER_BIN_DIRS.contains(&dir) {
                    created.push(self.wrap_executable(file, name, app_flags)?);
                } else if !shared_root.is_empty() {
                    if let Some(path) = self.link_man_page(file, shared_root)? {
                        created.push(path);
                    }
                }
            }
        }
        Ok(created)
    }

    /// Copy a desktop file out of the container and rewrite its Exec
    /// lines to the exec-into-container trampoline. Returns None when
    /// the file could not be read from the container.
    fn wrap_desktop_file(
        &self,
        file: &str,
        name: &str,
        app_flags: &HashMap<String, String>,
    ) -> YboxResult<Option<String>> {
        let result = self
            .engine
            .exec_capture(self.container, &format!("cat '{}'", file))?;
        if !result.success() {
            tracing::warn!(
                "skipping desktop wrapper for {}: cannot read it from '{}'",
                file,
                self.container
            );
            return Ok(None);
        }
        let rewritten = self.rewrite_desktop_content(&result.stdout, app_flags);

        let apps_dir = self.env.user_applications_dir();
        std::fs::create_dir_all(apps_dir)?;
        let wrapper = apps_dir.join(format!("{}-{}", self.container, name));
        std::fs::write(&wrapper, rewritten)?;
        tracing::info!("linked container desktop file {} to {}", file, wrapper.display());
        Ok(Some(wrapper.display().to_string()))
    }

    /// Rewrite every Exec/TryExec line to run inside the container.
    pub fn rewrite_desktop_content(
        &self,
        content: &str,
        app_flags: &HashMap<String, String>,
    ) -> String {
        let engine_cmd = self.engine.cmd().display().to_string();
        exec_line_re()
            .replace_all(content, |caps: &regex::Captures<'_>| {
                let prefix = &caps[1];
                let program = &caps[2];
                let args = caps.get(3).map(|m| m.as_str()).unwrap_or("");
                let prog_name = program.rsplit('/').next().unwrap_or(program);
                let full_cmd = match app_flags.get(prog_name) {
                    Some(flags) => apply_flags(flags, program, args),
                    None if args.is_empty() => program.to_string(),
                    None => format!("{} {}", program, args),
                };
                // no pseudo-tty: rootless docker cannot allocate one
                // outside a terminal
                format!(
                    "{}{} exec -e=XAUTHORITY -e=DISPLAY {} /usr/local/bin/run-in-dir \"\" {}",
                    prefix, engine_cmd, self.container, full_cmd
                )
            })
            .into_owned()
    }

    /// Write an executable shim that execs the guest program through
    /// the engine, preserving the caller's working directory.
    fn wrap_executable(
        &self,
        file: &str,
        name: &str,
        app_flags: &HashMap<String, String>,
    ) -> YboxResult<String> {
        let bin_dir = self.env.user_executables_dir();
        std::fs::create_dir_all(bin_dir)?;
        let wrapper = bin_dir.join(format!("{}-{}", self.container, name));

        let full_cmd = match app_flags.get(name) {
            Some(flags) => apply_flags(flags, &format!("\"{}\"", file), "\"$@\""),
            None => format!("\"{}\" \"$@\"", file),
        };
        let mut out = std::fs::File::create(&wrapper)?;
        writeln!(out, "#!/bin/sh")?;
        writeln!(
            out,
            "exec {} exec -it -e=XAUTHORITY -e=DISPLAY {} \
             /usr/local/bin/run-in-dir \"`pwd`\" {}",
            self.engine.cmd().display(),
            self.container,
            full_cmd
        )?;
        drop(out);
        let mut perms = std::fs::metadata(&wrapper)?.permissions();
        std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o755);
        std::fs::set_permissions(&wrapper, perms)?;
        tracing::info!("linked container executable {} to {}", file, wrapper.display());
        Ok(wrapper.display().to_string())
    }

    /// Symlink a guest man page from the shared root into the user man
    /// directory. Returns None for paths that are not man pages.
    fn link_man_page(&self, file: &str, shared_root: &str) -> YboxResult<Option<String>> {
        let Some(caps) = man_path_re().captures(file) else {
            return Ok(None);
        };
        let section_dir = self.env.user_man_dir().join(&caps[1]);
        std::fs::create_dir_all(&section_dir)?;
        let link = section_dir.join(&caps[2]);
        if let Some(parent) = link.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if link.exists() || link.symlink_metadata().is_ok() {
            std::fs::remove_file(&link)?;
        }
        std::os::unix::fs::symlink(format!("{}{}", shared_root, file), &link)?;
        tracing::info!("linked man page {} to {}", file, link.display());
        Ok(Some(link.display().to_string()))
    }
}

/// Remove generated wrapper files; missing files are ignored.
pub fn remove_wrappers(paths: &[String]) {
    for path in paths {
        let path = Path::new(path);
        match std::fs::remove_file(path) {
            Ok(_) => tracing::info!("removed local wrapper {}", path.display()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                tracing::warn!("failed to remove wrapper {}: {}", path.display(), err)
            }
        }
    }
}

/// Validate that a generated wrapper path lies under one of the known
/// wrapper directories (applications, bin, man).
pub fn is_known_wrapper_path(env: &Environ, path: &str) -> bool {
    let path = PathBuf::from(path);
    path.starts_with(env.user_applications_dir())
        || path.starts_with(env.user_executables_dir())
        || path.starts_with(env.user_man_dir())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn env_lock() -> std::sync::MutexGuard<'static, ()> {
        static LOCK: std::sync::OnceLock<std::sync::Mutex<()>> = std::sync::OnceLock::new();
        LOCK.get_or_init(|| std::sync::Mutex::new(()))
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn stub_env(dir: &Path) -> Environ {
        let engine = dir.join("podman");
        std::fs::write(&engine, "#!/bin/sh\necho podman version 4.9.0\n").unwrap();
        std::fs::set_permissions(&engine, std::fs::Permissions::from_mode(0o755)).unwrap();
        Environ::with_engine(engine).unwrap()
    }

    #[test]
    fn test_apply_flags() {
        assert_eq!(apply_flags("!p --flag !a", "/usr/bin/app", "%U"), "/usr/bin/app --flag %U");
        assert_eq!(apply_flags("prefix !p", "app", ""), "prefix app");
        assert_eq!(apply_flags("echo !!p !a", "app", "x"), "echo !p x");
    }

    #[test]
    fn test_rewrite_desktop_exec_lines() {
        let temp_dir = TempDir::new().unwrap();
        let env = stub_env(temp_dir.path());
        let engine = Engine::from_env(&env);
        let generator = WrapperGenerator::new(&env, &engine, "c1");

        let content = "[Desktop Entry]\nName=Firefox\nExec=/usr/lib/firefox/firefox %u\n\
                       TryExec=firefox\nIcon=firefox\n";
        let rewritten = generator.rewrite_desktop_content(content, &HashMap::new());
        // field codes are preserved in position
        assert!(rewritten.contains(
            "exec -e=XAUTHORITY -e=DISPLAY c1 /usr/local/bin/run-in-dir \"\" /usr/lib/firefox/firefox %u"
        ));
        assert!(rewritten.contains("TryExec="));
        // non-Exec lines are untouched
        assert!(rewritten.contains("Name=Firefox"));
        assert!(rewritten.contains("Icon=firefox"));
    }

    #[test]
    fn test_rewrite_desktop_with_app_flags() {
        let temp_dir = TempDir::new().unwrap();
        let env = stub_env(temp_dir.path());
        let engine = Engine::from_env(&env);
        let generator = WrapperGenerator::new(&env, &engine, "c1");

        let mut flags = HashMap::new();
        flags.insert(
            "steam".to_string(),
            "setpriv --ambient-caps -all !p !a".to_string(),
        );
        let content = "Exec=/usr/bin/steam %U\n";
        let rewritten = generator.rewrite_desktop_content(content, &flags);
        assert!(rewritten.contains("setpriv --ambient-caps -all /usr/bin/steam %U"));
    }

    #[test]
    fn test_man_page_link_and_removal() {
        let _guard = env_lock();
        let temp_dir = TempDir::new().unwrap();
        std::env::set_var("XDG_DATA_HOME", temp_dir.path().join("share"));
        let env = stub_env(temp_dir.path());
        std::env::remove_var("XDG_DATA_HOME");
        let engine = Engine::from_env(&env);
        let generator = WrapperGenerator::new(&env, &engine, "c1");

        let link = generator
            .link_man_page("/usr/share/man/man1/vim.1.gz", "/data/SHARED_ROOTS/arch")
            .unwrap()
            .unwrap();
        let link_path = PathBuf::from(&link);
        assert!(link_path.symlink_metadata().is_ok());
        assert_eq!(
            std::fs::read_link(&link_path).unwrap(),
            PathBuf::from("/data/SHARED_ROOTS/arch/usr/share/man/man1/vim.1.gz")
        );
        // not a man page path
        assert!(generator
            .link_man_page("/usr/share/doc/vim/README", "/data")
            .unwrap()
            .is_none());

        remove_wrappers(&[link.clone(), "/nonexistent/file".to_string()]);
        assert!(link_path.symlink_metadata().is_err());
    }

    #[test]
    fn test_generate_executable_wrapper() {
        let _guard = env_lock();
        let temp_dir = TempDir::new().unwrap();
        let old_home = std::env::var_os("HOME");
        std::env::set_var("HOME", temp_dir.path());
        let env = stub_env(temp_dir.path());
        if let Some(home) = old_home {
            std::env::set_var("HOME", home);
        }
        let engine = Engine::from_env(&env);
        let generator = WrapperGenerator::new(&env, &engine, "c1");

        let files = vec!["/usr/bin/vim".to_string(), "/usr/share/vim/runtime".to_string()];
        let created = generator
            .generate(CopyType::EXECUTABLE, &HashMap::new(), &files, "")
            .unwrap();
        assert_eq!(created.len(), 1);
        let shim = std::fs::read_to_string(&created[0]).unwrap();
        assert!(shim.starts_with("#!/bin/sh"));
        assert!(shim.contains("run-in-dir"));
        assert!(shim.contains("\"/usr/bin/vim\" \"$@\""));
        assert!(created[0].ends_with("c1-vim"));
    }
}
