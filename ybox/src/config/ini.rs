//! INI parsing into an ordered, immutable document tree.
//!
//! The dialect used by all ybox configuration:
//! - `[section]` headers with `key = value` pairs, `=` as the only
//!   delimiter, keys case-sensitive, values optional (`key` alone means
//!   an empty value)
//! - `#`/`;` comment lines
//! - a trailing backtick joins the next line to the current value
//!   without a separator (used heavily by distro command templates)
//! - `base.includes` lists files merged *under* the current file, i.e.
//!   the including file wins per key; includes recurse and every file is
//!   read at most once per resolution

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use ybox_shared::errors::{YboxError, YboxResult};

use crate::resources;

/// Where a configuration file comes from: the filesystem or the builtin
/// resources compiled into the library.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConfigSource {
    File(PathBuf),
    Builtin(&'static str),
}

impl ConfigSource {
    pub fn read(&self) -> YboxResult<String> {
        match self {
            ConfigSource::File(path) => std::fs::read_to_string(path).map_err(|e| {
                YboxError::Config(format!("cannot read config '{}': {}", path.display(), e))
            }),
            ConfigSource::Builtin(name) => resources::builtin_config(name)
                .map(str::to_string)
                .ok_or_else(|| YboxError::Config(format!("no builtin config '{}'", name))),
        }
    }

    /// Resolve an include reference relative to this file.
    fn resolve_include(&self, include: &str) -> YboxResult<ConfigSource> {
        if include.starts_with('/') {
            let path = PathBuf::from(include);
            if path.is_file() {
                return Ok(ConfigSource::File(path));
            }
            return Err(YboxError::Config(format!(
                "include '{}' does not exist or is not a file",
                include
            )));
        }
        match self {
            ConfigSource::File(path) => {
                let inc = path.parent().unwrap_or(Path::new(".")).join(include);
                if inc.is_file() {
                    Ok(ConfigSource::File(inc))
                } else {
                    Err(YboxError::Config(format!(
                        "include '{}' of '{}' does not exist or is not a file",
                        include,
                        path.display()
                    )))
                }
            }
            ConfigSource::Builtin(name) => {
                let dir = match name.rfind('/') {
                    Some(idx) => &name[..idx],
                    None => "",
                };
                let joined = if dir.is_empty() {
                    include.to_string()
                } else {
                    format!("{}/{}", dir, include)
                };
                resources::builtin_config_name(&joined)
                    .map(ConfigSource::Builtin)
                    .ok_or_else(|| {
                        YboxError::Config(format!(
                            "include '{}' of builtin '{}' not found",
                            include, name
                        ))
                    })
            }
        }
    }

    pub fn display(&self) -> String {
        match self {
            ConfigSource::File(path) => path.display().to_string(),
            ConfigSource::Builtin(name) => format!("builtin:{}", name),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Section {
    pub name: String,
    entries: Vec<(String, String)>,
}

impl Section {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn set(&mut self, key: String, value: String) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    fn set_if_missing(&mut self, key: &str, value: &str) {
        if self.get(key).is_none() {
            self.entries.push((key.to_string(), value.to_string()));
        }
    }
}

/// An ordered INI document. Section and key order is preserved so the
/// resolved configuration can be written back out deterministically
/// (the state store records it verbatim).
#[derive(Debug, Clone, Default)]
pub struct IniDocument {
    sections: Vec<Section>,
}

impl IniDocument {
    /// Parse a single file without processing includes.
    pub fn parse(text: &str, origin: &str) -> YboxResult<IniDocument> {
        let mut doc = IniDocument::default();
        let mut current: Option<usize> = None;
        let mut lines = text.lines().peekable();
        let mut lineno = 0usize;
        while let Some(raw) = lines.next() {
            lineno += 1;
            let line = raw.trim_end();
            let trimmed = line.trim_start();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
                continue;
            }
            if let Some(name) = trimmed.strip_prefix('[') {
                let name = name.strip_suffix(']').ok_or_else(|| {
                    YboxError::Config(format!(
                        "{}:{}: malformed section header '{}'",
                        origin, lineno, trimmed
                    ))
                })?;
                current = Some(doc.section_index_or_insert(name));
                continue;
            }
            let idx = current.ok_or_else(|| {
                YboxError::Config(format!(
                    "{}:{}: key outside of any section: '{}'",
                    origin, lineno, trimmed
                ))
            })?;
            let (key, mut value) = match trimmed.split_once('=') {
                Some((k, v)) => (k.trim().to_string(), v.trim().to_string()),
                None => (trimmed.to_string(), String::new()),
            };
            if key.is_empty() {
                return Err(YboxError::Config(format!(
                    "{}:{}: empty key in '{}'",
                    origin, lineno, trimmed
                )));
            }
            // a trailing backtick continues the value on the next line,
            // joined without any separator
            while value.ends_with('`') {
                value.pop();
                match lines.next() {
                    Some(next) => {
                        lineno += 1;
                        value.push_str(next.trim());
                    }
                    None => break,
                }
            }
            doc.sections[idx].set(key, value);
        }
        Ok(doc)
    }

    /// Read a configuration source and merge its `base.includes`
    /// recursively. Included files are processed as defaults: the
    /// including file wins for any key both define. A file is read at
    /// most once per resolution (a second reference elsewhere in the
    /// graph is skipped), while a genuine include cycle is an error.
    pub fn load(source: &ConfigSource) -> YboxResult<IniDocument> {
        let mut visited = HashSet::new();
        let mut stack = Vec::new();
        Self::load_inner(source, &mut visited, &mut stack)
    }

    fn load_inner(
        source: &ConfigSource,
        visited: &mut HashSet<ConfigSource>,
        stack: &mut Vec<ConfigSource>,
    ) -> YboxResult<IniDocument> {
        if stack.contains(source) {
            let chain: Vec<String> = stack.iter().map(ConfigSource::display).collect();
            return Err(YboxError::Config(format!(
                "include cycle: {} -> {}",
                chain.join(" -> "),
                source.display()
            )));
        }
        if !visited.insert(source.clone()) {
            // already merged through another include path
            return Ok(IniDocument::default());
        }
        let text = source.read()?;
        let mut doc = Self::parse(&text, &source.display())?;
        let includes = doc
            .get("base", "includes")
            .map(str::to_string)
            .unwrap_or_default();
        stack.push(source.clone());
        for include in includes.split(',') {
            let include = include.trim();
            if include.is_empty() {
                continue;
            }
            let inc_source = source.resolve_include(include)?;
            let inc_doc = Self::load_inner(&inc_source, visited, stack)?;
            doc.merge_defaults(&inc_doc);
        }
        stack.pop();
        Ok(doc)
    }

    fn section_index_or_insert(&mut self, name: &str) -> usize {
        if let Some(idx) = self.sections.iter().position(|s| s.name == name) {
            return idx;
        }
        self.sections.push(Section {
            name: name.to_string(),
            entries: Vec::new(),
        });
        self.sections.len() - 1
    }

    /// Merge another document underneath this one: sections and keys of
    /// `other` are added only where missing here.
    pub fn merge_defaults(&mut self, other: &IniDocument) {
        for section in &other.sections {
            let idx = self.section_index_or_insert(&section.name);
            for (key, value) in section.entries() {
                self.sections[idx].set_if_missing(key, value);
            }
        }
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn sections(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter()
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.section(name).is_some()
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.section(section).and_then(|s| s.get(key))
    }

    /// Convenience boolean accessor recognizing 0/1, false/true, no/yes
    /// and off/on (case-insensitive).
    pub fn get_bool(&self, section: &str, key: &str) -> YboxResult<Option<bool>> {
        match self.get(section, key) {
            None => Ok(None),
            Some(value) => parse_bool(value).map(Some).map_err(|_| {
                YboxError::Config(format!(
                    "not a boolean for '{}.{}': '{}'",
                    section, key, value
                ))
            }),
        }
    }

    pub(crate) fn set_value(&mut self, section: &str, key: &str, value: String) {
        let idx = self.section_index_or_insert(section);
        self.sections[idx].set(key.to_string(), value);
    }

    /// Serialize back to INI text (used to persist the resolved
    /// configuration in the state database).
    pub fn to_ini_string(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            out.push('[');
            out.push_str(&section.name);
            out.push_str("]\n");
            for (key, value) in section.entries() {
                if value.is_empty() {
                    out.push_str(key);
                    out.push('\n');
                } else {
                    out.push_str(&format!("{} = {}\n", key, value));
                }
            }
            out.push('\n');
        }
        out
    }
}

/// Parse a boolean the way configparser does.
pub fn parse_bool(value: &str) -> Result<bool, ()> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_basic() {
        let doc = IniDocument::parse(
            "# comment\n[base]\nname = Test\nempty_key\n[env]\nFOO = bar\n",
            "test",
        )
        .unwrap();
        assert_eq!(doc.get("base", "name"), Some("Test"));
        assert_eq!(doc.get("base", "empty_key"), Some(""));
        assert_eq!(doc.get("env", "FOO"), Some("bar"));
        assert!(doc.get("env", "MISSING").is_none());
    }

    #[test]
    fn test_parse_backtick_continuation() {
        let doc = IniDocument::parse(
            "[pkgmgr]\ninstall = pacman -S `\n    --needed {quiet} `\n    {opt_dep}\n",
            "test",
        )
        .unwrap();
        assert_eq!(
            doc.get("pkgmgr", "install"),
            Some("pacman -S --needed {quiet} {opt_dep}")
        );
    }

    #[test]
    fn test_key_outside_section_fails() {
        let err = IniDocument::parse("stray = 1\n", "test").unwrap_err();
        assert!(err.to_string().contains("outside of any section"));
    }

    #[test]
    fn test_includes_current_file_wins() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path().join("common.ini");
        std::fs::write(&base, "[base]\nname = common\n[env]\nA = 1\nB = 2\n").unwrap();
        let main = temp_dir.path().join("main.ini");
        std::fs::write(
            &main,
            "[base]\nname = main\nincludes = common.ini\n[env]\nB = 3\n",
        )
        .unwrap();

        let doc = IniDocument::load(&ConfigSource::File(main)).unwrap();
        assert_eq!(doc.get("base", "name"), Some("main"));
        assert_eq!(doc.get("env", "A"), Some("1"));
        assert_eq!(doc.get("env", "B"), Some("3"));
    }

    #[test]
    fn test_include_cycle_fails() {
        let temp_dir = TempDir::new().unwrap();
        let first = temp_dir.path().join("a.ini");
        let second = temp_dir.path().join("b.ini");
        std::fs::write(&first, "[base]\nincludes = b.ini\n").unwrap();
        std::fs::write(&second, "[base]\nincludes = a.ini\n").unwrap();

        let err = IniDocument::load(&ConfigSource::File(first)).unwrap_err();
        assert!(matches!(err, YboxError::Config(_)));
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_diamond_include_is_not_a_cycle() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("common.ini"), "[env]\nX = common\n").unwrap();
        std::fs::write(
            temp_dir.path().join("left.ini"),
            "[base]\nincludes = common.ini\n[env]\nL = 1\n",
        )
        .unwrap();
        std::fs::write(
            temp_dir.path().join("right.ini"),
            "[base]\nincludes = common.ini\n[env]\nR = 1\n",
        )
        .unwrap();
        std::fs::write(
            temp_dir.path().join("top.ini"),
            "[base]\nincludes = left.ini, right.ini\n",
        )
        .unwrap();

        let doc = IniDocument::load(&ConfigSource::File(temp_dir.path().join("top.ini"))).unwrap();
        assert_eq!(doc.get("env", "X"), Some("common"));
        assert_eq!(doc.get("env", "L"), Some("1"));
        assert_eq!(doc.get("env", "R"), Some("1"));
    }

    #[test]
    fn test_missing_include_fails() {
        let temp_dir = TempDir::new().unwrap();
        let main = temp_dir.path().join("main.ini");
        std::fs::write(&main, "[base]\nincludes = nope.ini\n").unwrap();
        assert!(IniDocument::load(&ConfigSource::File(main)).is_err());
    }

    #[test]
    fn test_roundtrip_to_string() {
        let doc = IniDocument::parse("[base]\nname = x\n\n[env]\nA = 1\n", "test").unwrap();
        let text = doc.to_ini_string();
        let reparsed = IniDocument::parse(&text, "roundtrip").unwrap();
        assert_eq!(reparsed.get("base", "name"), Some("x"));
        assert_eq!(reparsed.get("env", "A"), Some("1"));
    }
}
