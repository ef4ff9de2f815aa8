//! Configuration loading end to end: include chains, interpolation,
//! the bundled distribution INI and profile.

use tempfile::TempDir;

use ybox::config::ini::{ConfigSource, IniDocument};
use ybox::config::interpolate::{resolve_document, ExpandContext};
use ybox::config::{DistroConfig, PkgCmd, RepoCmd};

#[test]
fn test_include_chain_resolution_order() {
    let dir = TempDir::new().unwrap();
    // grandparent <- parent <- child; the child wins on conflicts
    std::fs::write(
        dir.path().join("grandparent.ini"),
        "[base]\nname = gp\n[env]\nA = gp\nB = gp\nC = gp\n",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("parent.ini"),
        "[base]\nname = parent\nincludes = grandparent.ini\n[env]\nB = parent\n",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("child.ini"),
        "[base]\nname = child\nincludes = parent.ini\n[env]\nC = child\n",
    )
    .unwrap();

    let doc = IniDocument::load(&ConfigSource::File(dir.path().join("child.ini"))).unwrap();
    assert_eq!(doc.get("base", "name"), Some("child"));
    assert_eq!(doc.get("env", "A"), Some("gp"));
    assert_eq!(doc.get("env", "B"), Some("parent"));
    assert_eq!(doc.get("env", "C"), Some("child"));
}

#[test]
fn test_include_cycle_fails_without_side_effects() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("a.ini"), "[base]\nincludes = b.ini\n").unwrap();
    std::fs::write(dir.path().join("b.ini"), "[base]\nincludes = a.ini\n").unwrap();
    let before: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();

    let err = IniDocument::load(&ConfigSource::File(dir.path().join("a.ini"))).unwrap_err();
    assert!(matches!(err, ybox::YboxError::Config(_)));

    // resolution is read-only: the directory is untouched
    let after: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(before.len(), after.len());
}

#[test]
fn test_builtin_arch_distro_loads() {
    let source = ConfigSource::Builtin("distros/arch/distro.ini");
    let ctx = ExpandContext::new().placeholder("YBOX_TARGET_SCRIPTS_DIR", "/usr/local/ybox");
    let doc = IniDocument::load(&source).unwrap();
    let resolved = resolve_document(&doc, &ctx).unwrap();
    let distro = DistroConfig::new("arch", resolved).unwrap();

    assert_eq!(distro.name(), "Arch Linux");
    assert_eq!(distro.shared_root_dirs(), vec!["/etc", "/opt", "/usr", "/var"]);

    // the backtick continuation in opt_deps joins into a single line
    let opt_deps = distro.pkgmgr(PkgCmd::OptDeps).unwrap();
    assert!(!opt_deps.contains('`'));
    assert!(opt_deps.contains("-s '{separator}' -p '{prefix}' -H '{header}'"));

    // every template the orchestrator requires is present
    for cmd in [
        PkgCmd::Install,
        PkgCmd::Uninstall,
        PkgCmd::CheckInstall,
        PkgCmd::CheckAvail,
        PkgCmd::ListFiles,
        PkgCmd::Update,
        PkgCmd::UpdateAll,
        PkgCmd::UpdateMeta,
        PkgCmd::Clean,
        PkgCmd::MarkExplicit,
        PkgCmd::Repair,
        PkgCmd::RepairAll,
        PkgCmd::Orphans,
    ] {
        assert!(
            distro.pkgmgr(cmd).is_ok(),
            "missing template {:?} in bundled arch distro.ini",
            cmd
        );
    }
    assert!(!distro.pkgmgr_opt(PkgCmd::ProcessesPattern).is_empty());
    assert!(!distro.pkgmgr_opt(PkgCmd::LocksPattern).is_empty());
    assert!(distro.repo_cmd(RepoCmd::Add).is_some());
    assert!(distro.repo_cmd(RepoCmd::Remove).is_some());
}

#[test]
fn test_builtin_basic_profile_parses() {
    let doc = IniDocument::load(&ConfigSource::Builtin("profiles/basic.ini")).unwrap();
    assert!(doc.has_section("base"));
    assert_eq!(doc.get("base", "shared_root"), Some("true"));
    assert!(doc.has_section("security"));
    assert!(doc.has_section("configs"));
}

#[test]
fn test_placeholder_expansion_in_profile_values() {
    let doc = IniDocument::parse(
        "[base]\nname = test\n[mounts]\ndownloads = ${HOME}/Downloads:${TARGET_HOME}/Downloads\n",
        "test",
    )
    .unwrap();
    let ctx = ExpandContext::new()
        .placeholder("HOME", "/home/alice")
        .placeholder("TARGET_HOME", "/home/alice");
    let resolved = resolve_document(&doc, &ctx).unwrap();
    assert_eq!(
        resolved.get("mounts", "downloads"),
        Some("/home/alice/Downloads:/home/alice/Downloads")
    );
}
