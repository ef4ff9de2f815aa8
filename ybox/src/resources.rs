//! Configuration and script resources bundled into the library.
//!
//! User files in `$XDG_CONFIG_HOME/ybox` and an optional system
//! directory (`$YBOX_SYS_CONF_DIR`) always take precedence; these
//! builtins are the fallback so a plain `cargo install` works without
//! any installed data files.

/// Builtin INI/list configuration files, keyed by their path below the
/// configuration directory.
pub const BUILTIN_CONFIGS: &[(&str, &str)] = &[
    (
        "distros/supported.list",
        include_str!("../conf/distros/supported.list"),
    ),
    (
        "distros/arch/distro.ini",
        include_str!("../conf/distros/arch/distro.ini"),
    ),
    ("profiles/basic.ini", include_str!("../conf/profiles/basic.ini")),
];

/// Builtin guest scripts (entrypoints and distribution init scripts),
/// copied into each container's scripts directory. Their contents are an
/// opaque contract with the guest side.
pub const BUILTIN_SCRIPTS: &[(&str, &str)] = &[
    (
        "resources/entrypoint.sh",
        include_str!("../conf/resources/entrypoint.sh"),
    ),
    (
        "resources/entrypoint-base.sh",
        include_str!("../conf/resources/entrypoint-base.sh"),
    ),
    (
        "resources/entrypoint-cp.sh",
        include_str!("../conf/resources/entrypoint-cp.sh"),
    ),
    (
        "resources/entrypoint-common.sh",
        include_str!("../conf/resources/entrypoint-common.sh"),
    ),
    (
        "resources/entrypoint-root.sh",
        include_str!("../conf/resources/entrypoint-root.sh"),
    ),
    (
        "resources/replicate-configs.sh",
        include_str!("../conf/resources/replicate-configs.sh"),
    ),
    ("resources/run-in-dir", include_str!("../conf/resources/run-in-dir")),
    (
        "distros/arch/init-base.sh",
        include_str!("../conf/distros/arch/init-base.sh"),
    ),
    ("distros/arch/init.sh", include_str!("../conf/distros/arch/init.sh")),
    (
        "distros/arch/init-user.sh",
        include_str!("../conf/distros/arch/init-user.sh"),
    ),
    (
        "distros/arch/pkgdeps.sh",
        include_str!("../conf/distros/arch/pkgdeps.sh"),
    ),
];

/// Contents of a builtin configuration file.
pub fn builtin_config(name: &str) -> Option<&'static str> {
    BUILTIN_CONFIGS
        .iter()
        .find(|(file, _)| *file == name)
        .map(|(_, text)| *text)
}

/// Canonical static name of a builtin configuration file; used for
/// include resolution where a `&'static str` key is needed.
pub fn builtin_config_name(name: &str) -> Option<&'static str> {
    BUILTIN_CONFIGS
        .iter()
        .find(|(file, _)| *file == name)
        .map(|(file, _)| *file)
}

/// Contents of a builtin guest script.
pub fn builtin_script(name: &str) -> Option<&'static str> {
    BUILTIN_SCRIPTS
        .iter()
        .find(|(file, _)| *file == name)
        .map(|(_, text)| *text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        assert!(builtin_config("distros/arch/distro.ini").is_some());
        assert_eq!(
            builtin_config_name("profiles/basic.ini"),
            Some("profiles/basic.ini")
        );
        assert!(builtin_config("distros/void/distro.ini").is_none());
        assert!(builtin_script("resources/entrypoint.sh").is_some());
    }

    #[test]
    fn test_all_standard_scripts_bundled() {
        for script in ybox_shared::constants::RESOURCE_SCRIPTS {
            assert!(
                builtin_script(&format!("resources/{}", script)).is_some(),
                "missing bundled script {}",
                script
            );
        }
        for script in ybox_shared::constants::DISTRIBUTION_SCRIPTS {
            assert!(
                builtin_script(&format!("distros/arch/{}", script)).is_some(),
                "missing bundled arch script {}",
                script
            );
        }
    }
}
