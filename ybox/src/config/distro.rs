//! Distribution configuration: distributions are data, not code.
//!
//! Each supported distribution ships a `distro.ini` describing its base
//! image, the directories eligible for shared roots, and a `[pkgmgr]`
//! table of parametrized command templates that a single dispatcher
//! interprets. Adding a distribution means adding an INI, not a type.

use ybox_shared::errors::{YboxError, YboxResult};

use super::ini::IniDocument;

/// Keys of the `[pkgmgr]` template table. The set of keys is part of
/// the contract between distribution INIs and the package orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PkgCmd {
    Install,
    CheckAvail,
    CheckInstall,
    QuietFlag,
    OptDeps,
    OptDepFlag,
    Uninstall,
    PurgeFlag,
    RemoveDepsFlag,
    Orphans,
    UpdateMeta,
    Update,
    UpdateAll,
    Clean,
    CleanQuiet,
    MarkExplicit,
    Info,
    InfoAll,
    List,
    ListAll,
    ListLong,
    ListAllLong,
    ListFiles,
    Search,
    SearchAll,
    SearchOfficialFlag,
    SearchWordStartFlag,
    SearchWordEndFlag,
    ProcessesPattern,
    LocksPattern,
    Repair,
    RepairAll,
}

impl PkgCmd {
    pub fn key(&self) -> &'static str {
        match self {
            PkgCmd::Install => "install",
            PkgCmd::CheckAvail => "check_avail",
            PkgCmd::CheckInstall => "check_install",
            PkgCmd::QuietFlag => "quiet_flag",
            PkgCmd::OptDeps => "opt_deps",
            PkgCmd::OptDepFlag => "opt_dep_flag",
            PkgCmd::Uninstall => "uninstall",
            PkgCmd::PurgeFlag => "purge_flag",
            PkgCmd::RemoveDepsFlag => "remove_deps_flag",
            PkgCmd::Orphans => "orphans",
            PkgCmd::UpdateMeta => "update_meta",
            PkgCmd::Update => "update",
            PkgCmd::UpdateAll => "update_all",
            PkgCmd::Clean => "clean",
            PkgCmd::CleanQuiet => "clean_quiet",
            PkgCmd::MarkExplicit => "mark_explicit",
            PkgCmd::Info => "info",
            PkgCmd::InfoAll => "info_all",
            PkgCmd::List => "list",
            PkgCmd::ListAll => "list_all",
            PkgCmd::ListLong => "list_long",
            PkgCmd::ListAllLong => "list_all_long",
            PkgCmd::ListFiles => "list_files",
            PkgCmd::Search => "search",
            PkgCmd::SearchAll => "search_all",
            PkgCmd::SearchOfficialFlag => "search_official_flag",
            PkgCmd::SearchWordStartFlag => "search_word_start_flag",
            PkgCmd::SearchWordEndFlag => "search_word_end_flag",
            PkgCmd::ProcessesPattern => "processes_pattern",
            PkgCmd::LocksPattern => "locks_pattern",
            PkgCmd::Repair => "repair",
            PkgCmd::RepairAll => "repair_all",
        }
    }
}

/// Keys of the `[repo]` command table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoCmd {
    Exists,
    DefaultGpgKeyServer,
    AddKey,
    AddKeyId,
    Add,
    AddSource,
    RemoveKey,
    Remove,
}

impl RepoCmd {
    pub fn key(&self) -> &'static str {
        match self {
            RepoCmd::Exists => "exists",
            RepoCmd::DefaultGpgKeyServer => "default_gpg_key_server",
            RepoCmd::AddKey => "add_key",
            RepoCmd::AddKeyId => "add_key_id",
            RepoCmd::Add => "add",
            RepoCmd::AddSource => "add_source",
            RepoCmd::RemoveKey => "remove_key",
            RepoCmd::Remove => "remove",
        }
    }
}

/// A parsed and resolved `distro.ini`.
#[derive(Debug, Clone)]
pub struct DistroConfig {
    distribution: String,
    doc: IniDocument,
}

impl DistroConfig {
    pub fn new(distribution: &str, doc: IniDocument) -> YboxResult<Self> {
        for required in ["name", "image", "shared_root_dirs"] {
            if doc.get("base", required).is_none() {
                return Err(YboxError::Config(format!(
                    "distribution '{}': missing 'base.{}' in distro.ini",
                    distribution, required
                )));
            }
        }
        if !doc.has_section("pkgmgr") {
            return Err(YboxError::Config(format!(
                "distribution '{}': missing [pkgmgr] section in distro.ini",
                distribution
            )));
        }
        Ok(Self {
            distribution: distribution.to_string(),
            doc,
        })
    }

    pub fn distribution(&self) -> &str {
        &self.distribution
    }

    pub fn document(&self) -> &IniDocument {
        &self.doc
    }

    /// Display name of the distribution.
    pub fn name(&self) -> &str {
        self.doc.get("base", "name").unwrap_or(&self.distribution)
    }

    /// Base container image reference.
    pub fn image(&self) -> &str {
        self.doc.get("base", "image").unwrap_or_default()
    }

    /// Directories shared across containers when `shared_root` is
    /// enabled.
    pub fn shared_root_dirs(&self) -> Vec<String> {
        self.doc
            .get("base", "shared_root_dirs")
            .unwrap_or_default()
            .split(',')
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .collect()
    }

    /// Secondary groups for the container user.
    pub fn secondary_groups(&self) -> &str {
        self.doc.get("base", "secondary_groups").unwrap_or_default()
    }

    /// Distribution-specific scripts beyond the standard init trio.
    pub fn extra_scripts(&self) -> Vec<String> {
        self.doc
            .get("base", "scripts")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn configure_fastest_mirrors(&self) -> bool {
        self.doc
            .get_bool("base", "configure_fastest_mirrors")
            .ok()
            .flatten()
            .unwrap_or(false)
    }

    /// A required `[pkgmgr]` template.
    pub fn pkgmgr(&self, cmd: PkgCmd) -> YboxResult<&str> {
        self.doc.get("pkgmgr", cmd.key()).ok_or_else(|| {
            YboxError::Config(format!(
                "distribution '{}': missing 'pkgmgr.{}' template",
                self.distribution,
                cmd.key()
            ))
        })
    }

    /// An optional `[pkgmgr]` template; empty string when absent.
    pub fn pkgmgr_opt(&self, cmd: PkgCmd) -> &str {
        self.doc.get("pkgmgr", cmd.key()).unwrap_or_default()
    }

    /// An optional `[repo]` command; `None` when the distribution does
    /// not support repository management.
    pub fn repo_cmd(&self, cmd: RepoCmd) -> Option<&str> {
        self.doc.get("repo", cmd.key()).filter(|v| !v.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ini::IniDocument;

    fn minimal_distro() -> DistroConfig {
        let doc = IniDocument::parse(
            "[base]\nname = Arch Linux\nimage = quay.io/arch:latest\n\
             shared_root_dirs = /etc,/opt,/usr,/var\nsecondary_groups = wheel,video\n\
             [pkgmgr]\ninstall = pacman -S {quiet} {opt_dep}\nquiet_flag = --noconfirm\n",
            "test",
        )
        .unwrap();
        DistroConfig::new("arch", doc).unwrap()
    }

    #[test]
    fn test_accessors() {
        let distro = minimal_distro();
        assert_eq!(distro.name(), "Arch Linux");
        assert_eq!(distro.image(), "quay.io/arch:latest");
        assert_eq!(
            distro.shared_root_dirs(),
            vec!["/etc", "/opt", "/usr", "/var"]
        );
        assert_eq!(distro.pkgmgr(PkgCmd::Install).unwrap(), "pacman -S {quiet} {opt_dep}");
        assert_eq!(distro.pkgmgr_opt(PkgCmd::Repair), "");
        assert!(distro.pkgmgr(PkgCmd::Uninstall).is_err());
        assert!(distro.repo_cmd(RepoCmd::Add).is_none());
    }

    #[test]
    fn test_missing_base_keys_rejected() {
        let doc = IniDocument::parse("[base]\nname = X\n[pkgmgr]\n", "test").unwrap();
        assert!(DistroConfig::new("x", doc).is_err());
    }
}
