#![allow(dead_code)]

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use tempfile::TempDir;

/// A stub engine script that answers like rootless podman without
/// touching any real container runtime. Commands and their arguments
/// are appended to `engine.log` for assertions.
const STUB_ENGINE: &str = r#"#!/bin/sh
log="$(dirname "$0")/engine.log"
echo "$@" >> "$log"
case "$1" in
  --version)
    echo "podman version 4.9.0"
    exit 0
    ;;
  context)
    echo rootless
    exit 0
    ;;
  inspect)
    # no containers or images exist
    exit 1
    ;;
  container)
    case "$2" in
      ls) exit 0 ;;
      *) exit 0 ;;
    esac
    ;;
esac
exit 0
"#;

pub struct TestContext {
    pub home: TempDir,
    pub engine: PathBuf,
}

impl TestContext {
    pub fn new() -> TestContext {
        let home = TempDir::new().expect("temp home");
        let engine = home.path().join("stub-podman");
        std::fs::write(&engine, STUB_ENGINE).expect("write stub engine");
        set_executable(&engine);
        TestContext { home, engine }
    }

    /// A `ybox` command wired to the stub engine and an isolated HOME.
    pub fn ybox(&self) -> Command {
        let mut cmd = Command::cargo_bin("ybox").expect("ybox binary");
        cmd.env("HOME", self.home.path())
            .env("XDG_DATA_HOME", self.home.path().join(".local/share"))
            .env("XDG_CONFIG_HOME", self.home.path().join(".config"))
            .env("YBOX_CONTAINER_MANAGER", &self.engine)
            .env_remove("YBOX_SYS_CONF_DIR");
        cmd
    }

    /// Engine invocations recorded by the stub.
    pub fn engine_log(&self) -> String {
        std::fs::read_to_string(self.home.path().join("engine.log")).unwrap_or_default()
    }
}

fn set_executable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path).expect("stat stub").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms).expect("chmod stub");
}
